//! Diesel row models for the pipeline task store.

use super::schema::{content, task_queue, tasks};
use chrono::{DateTime, Utc};
use diesel::prelude::*;

/// Query result row for task records.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TaskRow {
    /// Task identifier.
    pub task_id: String,
    /// Submitting user.
    pub user_id: String,
    /// Optional scheduled start.
    pub scheduled_time: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Insert model for task records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTaskRow {
    /// Task identifier.
    pub task_id: String,
    /// Submitting user.
    pub user_id: String,
    /// Optional scheduled start.
    pub scheduled_time: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Insert model for content rows.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = content)]
pub struct NewContentRow {
    /// Task identifier of the content.
    pub content_id: String,
    /// Initial status.
    pub status: String,
    /// Creation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Query result row for queue entries.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable, Insertable)]
#[diesel(table_name = task_queue)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct QueueRow {
    /// Task identifier.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub task_id: String,
    /// Current stage.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub stage: String,
    /// Status within the stage.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub status: String,
    /// Creation timestamp.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub created_at: DateTime<Utc>,
    /// Claim timestamp.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Timestamptz>)]
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal timestamp.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Timestamptz>)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Recorded error message.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    pub error: Option<String>,
    /// PID of the claiming worker.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Int4>)]
    pub worker_pid: Option<i32>,
}

/// Aggregate row returned by the summary query.
#[derive(Debug, Clone, QueryableByName)]
pub struct StatusCountRow {
    /// Stage name.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub stage: String,
    /// Status name.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub status: String,
    /// Number of rows.
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub count: i64,
}

/// Changeset returning a queue row to its pre-claim state.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = task_queue)]
#[diesel(treat_none_as_null = true)]
pub struct ClaimResetChangeset {
    /// Always `waiting`.
    pub status: &'static str,
    /// Cleared claim timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Cleared terminal timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Cleared error message.
    pub error: Option<String>,
    /// Cleared owner.
    pub worker_pid: Option<i32>,
}
