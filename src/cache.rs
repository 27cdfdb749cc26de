use crate::models::Issue;
use std::collections::{HashMap, HashSet};

/// Issues already fetched during the current run, keyed by issue key.
///
/// Lives exactly as long as the resolver that owns it; nothing is read
/// from or written back to the database.
#[derive(Debug, Default)]
pub struct IssueCache {
    issues: HashMap<String, Issue>,
}

impl IssueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Issue> {
        self.issues.get(key)
    }

    pub fn put(&mut self, issue: Issue) {
        self.issues.insert(issue.key.clone(), issue);
    }

    pub fn keys(&self) -> HashSet<String> {
        self.issues.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}
