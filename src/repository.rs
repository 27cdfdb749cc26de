use crate::database::DatabaseError;
use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait IssueRepository: Send + Sync {
    /// Issues carrying a raw key for `relation`, linked, flagged or neither.
    async fn find_unlinked(&self, relation: Relation) -> Result<Vec<UnlinkedRow>, DatabaseError>;

    /// Stores the issue with its lookup values and association sets in one
    /// transaction and returns it as now stored, resolved links included.
    async fn upsert_issue(&self, issue: &Issue) -> Result<Issue, DatabaseError>;

    async fn link_rows(&self, relation: Relation, ids: &[i64], target: i64) -> Result<(), DatabaseError>;

    async fn flag_rows(&self, relation: Relation, ids: &[i64], code: ErrorCode) -> Result<(), DatabaseError>;

    /// Returns how many issues had their roadmap flag written.
    async fn bulk_update_flags(
        &self,
        selector: IssueSelector,
        fields: &PropagatedFields,
    ) -> Result<usize, DatabaseError>;

    /// Stored issues that at least one other issue points at through `relation`.
    async fn find_referenced(&self, relation: Relation) -> Result<Vec<Issue>, DatabaseError>;
}

#[async_trait]
pub trait TimeEntryRepository: Send + Sync {
    /// Removes entries starting in `[since, until)`.
    async fn delete_between(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<usize, DatabaseError>;

    async fn upsert_entry(&self, entry: &TimeEntry) -> Result<(), DatabaseError>;

    /// Entries with an issue key but no issue, flagged ones included.
    async fn find_with_unlinked_issue_key(&self) -> Result<Vec<UnlinkedRow>, DatabaseError>;

    async fn link_entries(&self, ids: &[i64], issue_id: i64) -> Result<(), DatabaseError>;

    async fn flag_entries(&self, ids: &[i64], code: ErrorCode) -> Result<(), DatabaseError>;
}
