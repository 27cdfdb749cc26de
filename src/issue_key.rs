use regex::Regex;
use std::sync::LazyLock;

static EXPLICIT_RE: LazyLock<Regex> = LazyLock::new(|| match Regex::new(r"^[A-Za-z]+-\d+") {
    Ok(re) => re,
    Err(_) => unreachable!("static regex pattern"),
});
static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| match Regex::new(r"^\d{3,}") {
    Ok(re) => re,
    Err(_) => unreachable!("static regex pattern"),
});

/// Pulls a Jira issue key out of a free-text time entry description.
///
/// An explicit `PROJ-123` at the start of the text wins. Failing that, a
/// leading run of at least three digits is read as an issue number in the
/// default project, so `"123 did the thing"` becomes `APP-123`.
#[derive(Debug, Clone)]
pub struct IssueKeyParser {
    default_prefix: String,
}

impl IssueKeyParser {
    pub fn new(default_prefix: impl Into<String>) -> Self {
        Self {
            default_prefix: default_prefix.into(),
        }
    }

    pub fn parse(&self, text: &str) -> Option<String> {
        if let Some(found) = EXPLICIT_RE.find(text) {
            return Some(found.as_str().to_string());
        }
        NUMERIC_RE
            .find(text)
            .map(|found| format!("{}-{}", self.default_prefix, found.as_str()))
    }
}
