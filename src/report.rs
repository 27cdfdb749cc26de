use crate::aggregate::{self, AggregatedRow, MergeBy};
use crate::dates::DateRange;
use crate::issue_key::IssueKeyParser;
use crate::models::{Issue, LinkedEntry, TimeEntry, TogglSummaryResponse};
use crate::resolver::IssueResolver;
use crate::source::IssueSource;
use itertools::Itertools;
use std::collections::HashMap;
use std::fmt;

const FIXING_TITLE: &str = "Entries needing fixing";
const PROJECT_PREFIX: &str = "Dev - ";

/// Plain text report, built line by line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportDocument {
    lines: Vec<String>,
}

impl ReportDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn title(&mut self, text: &str) {
        self.log(text);
        self.log(underline(text, '='));
    }

    pub fn heading(&mut self, text: &str) {
        self.log(text);
        self.log(underline(text, '-'));
    }

    pub fn linebreak(&mut self) {
        self.log("");
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl fmt::Display for ReportDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

pub fn underline(text: &str, marker: char) -> String {
    text.chars().map(|_| marker).collect()
}

pub fn report_title(range: &DateRange) -> String {
    format!("Toggl Summary {}", range)
}

/// One row per entry, carrying the issue the entry is linked to.
pub fn rows_from_linked(entries: &[LinkedEntry]) -> Vec<AggregatedRow> {
    entries.iter().map(AggregatedRow::from_linked).collect()
}

/// One row per entry, with issues looked up through `resolver`.
pub async fn rows_from_entries<S: IssueSource>(
    entries: &[TimeEntry],
    resolver: &mut IssueResolver<S>,
) -> Vec<AggregatedRow> {
    let rows = entries.iter().map(AggregatedRow::from_entry).collect::<Vec<_>>();
    let resolved = resolver
        .resolve_many(rows.iter().filter_map(|row| row.issue_key.clone()))
        .await;
    attach_issues(rows, &resolved)
}

/// The per-user breakdown: each user's entries merged on issue key or
/// description, then a list of users with entries missing a description
/// or a project.
pub fn build_detailed(rows: Vec<AggregatedRow>, range: &DateRange) -> ReportDocument {
    let mut doc = ReportDocument::new();
    doc.title(&report_title(range));
    doc.linebreak();

    if rows.is_empty() {
        doc.log("No entries found");
        return doc;
    }

    let by_user = rows
        .into_iter()
        .into_group_map_by(|row| row.user.clone().unwrap_or_default());

    let mut users_with_problems: Vec<String> = Vec::new();
    for (user, rows) in by_user.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
        let rows = aggregate::merge(rows, MergeBy::IssueKeyOrTitle);
        let total = aggregate::two_dp(rows.iter().map(|row| row.time).sum());
        doc.heading(&format!("{}: {}", user, total));

        for row in &rows {
            doc.log(detailed_line(row));
            if row_needs_fixing(row) && !users_with_problems.contains(&user) {
                users_with_problems.push(user.clone());
            }
        }
        doc.linebreak();
    }

    if !users_with_problems.is_empty() {
        doc.linebreak();
        doc.title(FIXING_TITLE);
        let verb = if users_with_problems.len() == 1 { "has" } else { "have" };
        doc.log(format!(
            "{} {} entries with no description or project",
            users_with_problems.join(" & "),
            verb
        ));
    }

    doc
}

fn detailed_line(row: &AggregatedRow) -> String {
    let title = match &row.issue {
        Some(issue) => format!("[{}] {}", issue.key, issue.summary),
        None => format!("* {}", row.title.as_deref().unwrap_or("NO DESCRIPTION")),
    };
    let project = row
        .project
        .as_deref()
        .map(|project| project.strip_prefix(PROJECT_PREFIX).unwrap_or(project))
        .unwrap_or("NO PROJECT");
    format!("{} - {} ({})", title, aggregate::two_dp(row.time), project)
}

fn row_needs_fixing(row: &AggregatedRow) -> bool {
    row.project.is_none() || (row.title.is_none() && row.issue.is_none())
}

/// Points every row with a resolved key at its issue. The key is
/// rewritten to the issue's own, so `123` style keys merge with `APP-123`.
pub fn attach_issues(rows: Vec<AggregatedRow>, resolved: &HashMap<String, Option<Issue>>) -> Vec<AggregatedRow> {
    rows.into_iter()
        .map(|mut row| {
            let issue = row
                .issue_key
                .as_ref()
                .and_then(|key| resolved.get(key).cloned().flatten());
            if let Some(issue) = issue {
                row.issue_key = Some(issue.key.clone());
                row.issue = Some(issue);
            }
            row
        })
        .collect()
}

/// Rows of sub-issues are re-pointed at their parent.
pub fn replace_with_parents(rows: Vec<AggregatedRow>, parents: &HashMap<String, Option<Issue>>) -> Vec<AggregatedRow> {
    rows.into_iter()
        .map(|row| {
            let parent = row
                .issue
                .as_ref()
                .and_then(|issue| issue.parent_key.as_ref())
                .and_then(|key| parents.get(key).cloned().flatten());
            match parent {
                Some(parent) => AggregatedRow {
                    title: Some(parent.key.clone()),
                    issue_key: Some(parent.key.clone()),
                    issue: Some(parent),
                    ..row
                },
                None => row,
            }
        })
        .collect()
}

/// Rows are re-pointed at their issue's epic; issues without one land in
/// a `No Epic` bucket.
pub fn replace_with_epics(rows: Vec<AggregatedRow>, epics: &HashMap<String, Option<Issue>>) -> Vec<AggregatedRow> {
    rows.into_iter()
        .map(|row| {
            let epic_key = row.issue.as_ref().and_then(|issue| issue.epic_key.clone());
            match epic_key {
                None => AggregatedRow {
                    title: Some("No Epic".to_string()),
                    issue_key: None,
                    issue: None,
                    ..row
                },
                Some(key) => match epics.get(&key).cloned().flatten() {
                    Some(epic) => AggregatedRow {
                        title: Some(epic.summary.clone()),
                        issue_key: Some(epic.key.clone()),
                        issue: Some(epic),
                        ..row
                    },
                    None => AggregatedRow {
                        title: Some(key.clone()),
                        issue_key: Some(key),
                        issue: None,
                        ..row
                    },
                },
            }
        })
        .collect()
}

/// Project, epic and feature breakdowns of a Toggl summary report.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    pub title: String,
    pub total: f64,
    pub projects: Vec<AggregatedRow>,
    pub epics: Vec<AggregatedRow>,
    pub features: Vec<AggregatedRow>,
}

/// Project totals and one row per distinct time entry title, with any
/// issue key parsed out of the title.
pub fn summary_rows(response: &TogglSummaryResponse, parser: &IssueKeyParser) -> (Vec<AggregatedRow>, Vec<AggregatedRow>) {
    let mut projects = response
        .data
        .iter()
        .map(|project| AggregatedRow {
            project: project.title.project.clone(),
            ..AggregatedRow::new(
                project.title.project.clone().unwrap_or_else(|| "NO PROJECT".to_string()),
                aggregate::ms_to_hours(project.time),
            )
        })
        .collect::<Vec<_>>();
    aggregate::sort_by_time(&mut projects);

    let items = response
        .data
        .iter()
        .flat_map(|project| {
            project.items.iter().map(move |item| {
                let title = item.title.time_entry.clone().unwrap_or_default();
                AggregatedRow {
                    issue_key: parser.parse(&title),
                    project: project.title.project.clone(),
                    ..AggregatedRow::new(title, aggregate::ms_to_hours(item.time))
                }
            })
        })
        .collect::<Vec<_>>();

    (projects, aggregate::merge(items, MergeBy::IssueKeyOrTitle))
}

pub async fn build_summary<S: IssueSource>(
    response: &TogglSummaryResponse,
    parser: &IssueKeyParser,
    resolver: &mut IssueResolver<S>,
    range: &DateRange,
) -> SummaryReport {
    let (projects, items) = summary_rows(response, parser);

    let resolved = resolver
        .resolve_many(items.iter().filter_map(|row| row.issue_key.clone()))
        .await;
    let issues = attach_issues(items, &resolved)
        .into_iter()
        .filter(|row| row.issue.is_some())
        .collect::<Vec<_>>();

    let parents = resolver
        .resolve_many(issues.iter().filter_map(|row| row.issue.as_ref()?.parent_key.clone()))
        .await;
    let features = aggregate::use_issue_titles(aggregate::merge(
        replace_with_parents(issues.clone(), &parents),
        MergeBy::IssueKeyOrTitle,
    ));

    let epics = resolver
        .resolve_many(issues.iter().filter_map(|row| row.issue.as_ref()?.epic_key.clone()))
        .await;
    let epics = aggregate::merge(replace_with_epics(issues, &epics), MergeBy::IssueKeyOrTitle);

    SummaryReport {
        title: report_title(range),
        total: response.total_grand.map(aggregate::ms_to_hours).unwrap_or_default(),
        projects: aggregate::calculate_percentages(projects, None),
        epics: aggregate::calculate_percentages(epics, None),
        features: aggregate::calculate_percentages(features, None),
    }
}

/// Renders `report`, listing at most `feature_rows` features. Zero lists all.
pub fn render_summary(report: &SummaryReport, feature_rows: usize) -> ReportDocument {
    let mut doc = ReportDocument::new();
    doc.title(&report.title);
    doc.log(format!("Total: {}", report.total));
    doc.linebreak();

    for (title, rows, limit) in [
        ("Toggl Projects", &report.projects, 0),
        ("Epic breakdown", &report.epics, 0),
        ("Features", &report.features, feature_rows),
    ] {
        let shown = if limit == 0 { rows.len() } else { limit.min(rows.len()) };
        doc.title(title);
        doc.log(format!("Showing first {} of {}", shown, rows.len()));
        for row in rows.iter().take(shown) {
            doc.log(format!(
                "{} - {} ({}%)",
                row.title.as_deref().unwrap_or("NO DESCRIPTION"),
                aggregate::two_dp(row.time),
                row.percent.unwrap_or_default()
            ));
        }
        doc.linebreak();
    }

    doc
}
