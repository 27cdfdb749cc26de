use crate::models::*;
use crate::source::{FetchError, IssueSource};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn issue(id: i64, key: &str) -> Issue {
    Issue {
        id,
        key: key.to_string(),
        issue_type: IssueType {
            id: 10001,
            name: "Story".to_string(),
            subtask: false,
        },
        created: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        updated: None,
        summary: format!("Issue {}", key),
        project: Project {
            id: 10000,
            key: key.split('-').next().unwrap_or("APP").to_string(),
            name: "Application".to_string(),
        },
        impact: None,
        epic_key: None,
        epic_id: None,
        parent_key: None,
        parent_id: None,
        support_request_type: None,
        is_roadmap_item: false,
        components: Vec::new(),
        drivers: Vec::new(),
        client_labels: Vec::new(),
        product_labels: Vec::new(),
        user_types: Vec::new(),
    }
}

pub fn epic(id: i64, key: &str, roadmap: bool) -> Issue {
    Issue {
        issue_type: IssueType {
            id: 10000,
            name: "Epic".to_string(),
            subtask: false,
        },
        is_roadmap_item: roadmap,
        ..issue(id, key)
    }
}

pub fn entry(id: i64, user: &str, description: &str, duration_ms: i64) -> TimeEntry {
    let start = Utc.with_ymd_and_hms(2024, 3, 8, 9, 0, 0).unwrap() + chrono::Duration::minutes(id);
    TimeEntry {
        id,
        user_id: user.len() as i64,
        user: user.to_string(),
        project_id: Some(1),
        project: Some("Dev - App".to_string()),
        task_id: None,
        description: Some(description.to_string()),
        start,
        end: start + chrono::Duration::milliseconds(duration_ms),
        duration_ms,
        issue_key: None,
        issue_id: None,
        error: None,
    }
}

/// Serves issues from memory and records how it was called.
#[derive(Default)]
pub struct FakeIssueSource {
    issues: HashMap<String, Issue>,
    failing: HashSet<String>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fetched: Mutex<Vec<String>>,
}

impl FakeIssueSource {
    pub fn with_issues(issues: impl IntoIterator<Item = Issue>) -> Self {
        Self {
            issues: issues.into_iter().map(|i| (i.key.clone(), i)).collect(),
            ..Self::default()
        }
    }

    pub fn failing<'a>(mut self, keys: impl IntoIterator<Item = &'a str>) -> Self {
        self.failing.extend(keys.into_iter().map(str::to_string));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl IssueSource for FakeIssueSource {
    async fn fetch_issue(&self, key: &str) -> Result<Issue, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(key.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::task::yield_now().await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.contains(key) {
            return Err(FetchError::Transport(format!("{} timed out", key)));
        }
        self.issues
            .get(key)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(key.to_string()))
    }
}
