use crate::database::{Database, DatabaseError};
use crate::dates::DateRange;
use crate::hierarchy::{HierarchyLinker, LinkSummary};
use crate::issue_key::IssueKeyParser;
use crate::models::*;
use crate::repository::TimeEntryRepository;
use crate::resolver::IssueResolver;
use crate::source::{FetchError, IssueSource, TimeEntrySource};
use chrono::NaiveDate;
use chrono_tz::Tz;
use thiserror::Error;

/// Days of entries a full sync refreshes.
pub const SYNC_DAYS: u64 = 7;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

pub fn entry_from_payload(payload: TogglEntry, parser: &IssueKeyParser) -> TimeEntry {
    let end = payload
        .end
        .unwrap_or_else(|| payload.start + chrono::Duration::milliseconds(payload.dur));
    let issue_key = payload.description.as_deref().and_then(|d| parser.parse(d));

    TimeEntry {
        id: payload.id,
        user_id: payload.uid,
        user: payload.user,
        project_id: payload.pid,
        project: payload.project,
        task_id: payload.tid,
        description: payload.description,
        start: payload.start,
        end,
        duration_ms: payload.dur,
        issue_key,
        issue_id: None,
        error: None,
    }
}

/// Moves data from Toggl and Jira into the local store. Owns the issue
/// resolver, so everything fetched from Jira during one job is fetched
/// at most once.
pub struct SyncJob<'a, T, S> {
    time_entries: &'a T,
    database: &'a Database,
    resolver: IssueResolver<S>,
    parser: IssueKeyParser,
    group: Option<i64>,
    timezone: Tz,
}

impl<'a, T, S> SyncJob<'a, T, S>
where
    T: TimeEntrySource,
    S: IssueSource,
{
    pub fn new(
        time_entries: &'a T,
        issues: S,
        database: &'a Database,
        parser: IssueKeyParser,
        group: Option<i64>,
    ) -> Self {
        Self {
            time_entries,
            database,
            resolver: IssueResolver::new(issues),
            parser,
            group,
            timezone: Tz::UTC,
        }
    }

    /// Days are cut at midnight in `timezone` instead of UTC.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn resolver(&self) -> &IssueResolver<S> {
        &self.resolver
    }

    /// Stores every group and workspace user, replacing each user's memberships.
    pub async fn sync_groups(&self) -> Result<usize, SyncError> {
        let groups = self.time_entries.fetch_groups().await?;
        for group in &groups {
            self.database.upsert_group(group).await?;
        }

        let users = self.time_entries.fetch_workspace_users().await?;
        for user in &users {
            let group_ids = user.group_ids.clone().unwrap_or_default();
            self.database
                .upsert_user(user.uid, &user.display_name(), &group_ids)
                .await?;
        }

        tracing::info!(groups = groups.len(), users = users.len(), "synced groups");
        Ok(groups.len())
    }

    /// Replaces the stored entries of `range` with what Toggl has now.
    pub async fn pull_time_entries(&self, range: &DateRange) -> Result<usize, SyncError> {
        let payloads = self.time_entries.fetch_time_entries(range, self.group).await?;
        let deleted = self
            .database
            .delete_between(range.start_utc(self.timezone), range.end_utc(self.timezone))
            .await?;

        let count = payloads.len();
        for payload in payloads {
            let entry = entry_from_payload(payload, &self.parser);
            self.database.upsert_entry(&entry).await?;
        }

        tracing::info!(%range, deleted, stored = count, "pulled time entries");
        Ok(count)
    }

    pub async fn pull_issues(&mut self) -> Result<LinkSummary, SyncError> {
        Ok(HierarchyLinker::new(&mut self.resolver, self.database)
            .link_time_entries()
            .await?)
    }

    pub async fn pull_epics(&mut self) -> Result<LinkSummary, SyncError> {
        Ok(HierarchyLinker::new(&mut self.resolver, self.database)
            .link_unresolved(Relation::Epic)
            .await?)
    }

    pub async fn pull_parents(&mut self) -> Result<LinkSummary, SyncError> {
        Ok(HierarchyLinker::new(&mut self.resolver, self.database)
            .link_unresolved(Relation::Parent)
            .await?)
    }

    pub async fn update_from_parents_and_epics(&mut self) -> Result<usize, SyncError> {
        Ok(HierarchyLinker::new(&mut self.resolver, self.database)
            .refresh_propagation()
            .await?)
    }

    /// Groups, the last week of entries, then issues, parents and epics.
    /// Parents go first so the epics they name are linked in the same run.
    pub async fn run_sync(&mut self, today: NaiveDate) -> Result<(), SyncError> {
        tracing::info!("starting sync");
        self.sync_groups().await?;
        self.pull_time_entries(&DateRange::last_days(today, SYNC_DAYS)).await?;
        self.pull_issues().await?;
        self.pull_parents().await?;
        self.pull_epics().await?;
        self.update_from_parents_and_epics().await?;
        tracing::info!(issues = self.resolver.cache().len(), "sync finished");
        Ok(())
    }
}
