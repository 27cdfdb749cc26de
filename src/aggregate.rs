use crate::models::{Issue, LinkedEntry, TimeEntry};
use std::collections::HashMap;

/// One line of a report: a time entry, or several merged into one.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
    pub title: Option<String>,
    /// Hours.
    pub time: f64,
    pub percent: Option<i64>,
    pub issue_key: Option<String>,
    pub issue: Option<Issue>,
    pub project: Option<String>,
    pub user: Option<String>,
}

impl AggregatedRow {
    pub fn new(title: impl Into<String>, time: f64) -> Self {
        Self {
            title: Some(title.into()),
            time,
            percent: None,
            issue_key: None,
            issue: None,
            project: None,
            user: None,
        }
    }

    pub fn from_entry(entry: &TimeEntry) -> Self {
        Self {
            title: entry.description.clone().filter(|d| !d.trim().is_empty()),
            time: entry.hours(),
            percent: None,
            issue_key: entry.issue_key.clone(),
            issue: None,
            project: entry.project.clone(),
            user: Some(entry.user.clone()),
        }
    }

    pub fn from_linked(linked: &LinkedEntry) -> Self {
        Self {
            issue: linked.issue.clone(),
            ..Self::from_entry(&linked.entry)
        }
    }
}

/// Field rows are grouped on before their times are summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeBy {
    /// The issue key, or the title for rows without one.
    #[default]
    IssueKeyOrTitle,
    Title,
    Project,
    User,
}

impl MergeBy {
    pub fn key(&self, row: &AggregatedRow) -> String {
        let field = match self {
            MergeBy::IssueKeyOrTitle => row.issue_key.as_ref().or(row.title.as_ref()),
            MergeBy::Title => row.title.as_ref(),
            MergeBy::Project => row.project.as_ref(),
            MergeBy::User => row.user.as_ref(),
        };
        field.cloned().unwrap_or_default()
    }
}

pub fn merge(items: Vec<AggregatedRow>, merge_by: MergeBy) -> Vec<AggregatedRow> {
    merge_with(items, |row| merge_by.key(row))
}

/// Groups `items` on `key`, keeping every field of the first row in each
/// group and summing `time`. Largest totals first; equal totals keep the
/// order in which their groups first appeared, so a reordered input can
/// break ties differently.
pub fn merge_with<F>(items: Vec<AggregatedRow>, key: F) -> Vec<AggregatedRow>
where
    F: Fn(&AggregatedRow) -> String,
{
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<AggregatedRow> = Vec::new();

    for item in items {
        let group = key(&item);
        match positions.get(&group) {
            Some(&index) => merged[index].time += item.time,
            None => {
                positions.insert(group, merged.len());
                merged.push(item);
            }
        }
    }

    sort_by_time(&mut merged);
    merged
}

pub fn sort_by_time(rows: &mut [AggregatedRow]) {
    rows.sort_by(|a, b| b.time.total_cmp(&a.time));
}

/// Sets `percent` on every row relative to `total`, or to the sum of all
/// rows when no positive total is given. Each row is rounded on its own,
/// so the percentages need not add up to exactly 100.
pub fn calculate_percentages(rows: Vec<AggregatedRow>, total: Option<f64>) -> Vec<AggregatedRow> {
    let total = total
        .filter(|total| *total > 0.0)
        .unwrap_or_else(|| rows.iter().map(|row| row.time).sum());

    rows.into_iter()
        .map(|row| {
            let percent = if total > 0.0 {
                (row.time / total * 100.0).round() as i64
            } else {
                0
            };
            AggregatedRow {
                percent: Some(percent),
                ..row
            }
        })
        .collect()
}

/// Swaps the title of rows with a resolved issue for `KEY summary`.
pub fn use_issue_titles(rows: Vec<AggregatedRow>) -> Vec<AggregatedRow> {
    rows.into_iter()
        .map(|mut row| {
            if let Some(issue) = &row.issue {
                row.title = Some(format!("{} {}", issue.key, issue.summary));
            }
            row
        })
        .collect()
}

pub fn two_dp(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn ms_to_hours(ms: i64) -> f64 {
    two_dp(ms as f64 / 1000.0 / 60.0 / 60.0)
}
