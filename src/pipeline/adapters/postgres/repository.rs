//! `PostgreSQL` repository implementation for the pipeline task store.

use super::{
    models::{ClaimResetChangeset, NewContentRow, NewTaskRow, QueueRow, StatusCountRow, TaskRow},
    schema::{content, task_queue, tasks},
};
use crate::persistence::{PgPool, pid_from_column, pid_to_column, run_blocking_with};
use crate::pipeline::{
    domain::{
        PersistedQueueEntry, QueueStatus, QueueSummary, Stage, StageAdvance, Task, TaskId,
        TaskQueueEntry, UserId,
    },
    ports::{QueueRepository, QueueRepositoryError, QueueRepositoryResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{Int4, Nullable, Text, Timestamptz};
use std::sync::Arc;

/// Claims the oldest waiting row of a stage. `SKIP LOCKED` makes concurrent
/// claimers pass over a row another transaction is already claiming.
const CLAIM_NEXT_SQL: &str = concat!(
    "WITH next AS (",
    "SELECT task_id FROM task_queue ",
    "WHERE stage = $1 AND status = 'waiting' ",
    "ORDER BY created_at ASC, task_id ASC ",
    "LIMIT 1 ",
    "FOR UPDATE SKIP LOCKED",
    ") ",
    "UPDATE task_queue q ",
    "SET status = 'processing', started_at = $2, worker_pid = $3, error = NULL ",
    "FROM next WHERE q.task_id = next.task_id ",
    "RETURNING q.task_id, q.stage, q.status, q.created_at, q.started_at, ",
    "q.completed_at, q.error, q.worker_pid",
);

const SUMMARY_SQL: &str = concat!(
    "SELECT stage, status, COUNT(*) AS count FROM task_queue ",
    "WHERE status <> 'cancelled' ",
    "GROUP BY stage, status",
);

/// `PostgreSQL`-backed queue repository.
#[derive(Debug, Clone)]
pub struct PostgresQueueRepository {
    pool: PgPool,
}

impl PostgresQueueRepository {
    /// Creates a new repository from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> QueueRepositoryResult<T>
    where
        F: FnOnce(&mut PgConnection) -> QueueRepositoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking_with(&self.pool, f, |err| {
            QueueRepositoryError::Persistence(Arc::from(err))
        })
        .await
    }
}

#[async_trait]
impl QueueRepository for PostgresQueueRepository {
    async fn enqueue(&self, task: &Task, entry: &TaskQueueEntry) -> QueueRepositoryResult<()> {
        let task_id = task.id().clone();
        let task_row = NewTaskRow {
            task_id: task.id().as_str().to_owned(),
            user_id: task.user_id().as_str().to_owned(),
            scheduled_time: task.scheduled_time(),
            created_at: task.created_at(),
        };
        let content_row = NewContentRow {
            content_id: task.id().as_str().to_owned(),
            status: entry.stage().as_str().to_owned(),
            updated_at: task.created_at(),
        };
        let queue_row = to_row(entry);

        self.run_blocking(move |connection| {
            connection
                .transaction::<_, DieselError, _>(|tx| {
                    diesel::insert_into(tasks::table)
                        .values(&task_row)
                        .execute(tx)?;
                    diesel::insert_into(content::table)
                        .values(&content_row)
                        .execute(tx)?;
                    diesel::insert_into(task_queue::table)
                        .values(&queue_row)
                        .execute(tx)?;
                    Ok(())
                })
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        QueueRepositoryError::DuplicateTask(task_id.clone())
                    }
                    _ => QueueRepositoryError::persistence(err),
                })
        })
        .await
    }

    async fn claim_next(
        &self,
        stage: Stage,
        worker_pid: u32,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<Option<TaskQueueEntry>> {
        let pid = pid_to_column(worker_pid);
        self.run_blocking(move |connection| {
            let row = diesel::sql_query(CLAIM_NEXT_SQL)
                .bind::<Text, _>(stage.as_str())
                .bind::<Timestamptz, _>(now)
                .bind::<Nullable<Int4>, _>(pid)
                .get_result::<QueueRow>(connection)
                .optional()
                .map_err(QueueRepositoryError::persistence)?;
            row.map(row_to_entry).transpose()
        })
        .await
    }

    async fn advance(
        &self,
        task_id: &TaskId,
        stage: Stage,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<Option<StageAdvance>> {
        let id = task_id.clone();
        self.run_blocking(move |connection| {
            connection.transaction::<_, QueueRepositoryError, _>(|tx| {
                let row = task_queue::table
                    .filter(task_queue::task_id.eq(id.as_str()))
                    .select(QueueRow::as_select())
                    .for_update()
                    .first::<QueueRow>(tx)
                    .optional()
                    .map_err(QueueRepositoryError::persistence)?
                    .ok_or_else(|| QueueRepositoryError::NotFound(id.clone()))?;

                let mut entry = row_to_entry(row)?;
                if !entry.is_processing_at(stage) {
                    return Ok(None);
                }
                let Ok(outcome) = entry.advance(now) else {
                    return Ok(None);
                };

                diesel::update(task_queue::table.filter(task_queue::task_id.eq(id.as_str())))
                    .set((
                        task_queue::stage.eq(entry.stage().as_str()),
                        task_queue::status.eq(entry.status().as_str()),
                        task_queue::started_at.eq(entry.started_at()),
                        task_queue::completed_at.eq(entry.completed_at()),
                        task_queue::error.eq(None::<String>),
                        task_queue::worker_pid.eq(None::<i32>),
                    ))
                    .execute(tx)
                    .map_err(QueueRepositoryError::persistence)?;
                update_content(tx, &id, outcome.content_status(), now)?;
                Ok(Some(outcome))
            })
        })
        .await
    }

    async fn fail(
        &self,
        task_id: &TaskId,
        stage: Stage,
        message: &str,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<bool> {
        let id = task_id.clone();
        let error_message = message.to_owned();
        self.run_blocking(move |connection| {
            connection.transaction::<_, QueueRepositoryError, _>(|tx| {
                let updated = diesel::update(
                    task_queue::table
                        .filter(task_queue::task_id.eq(id.as_str()))
                        .filter(task_queue::stage.eq(stage.as_str()))
                        .filter(task_queue::status.eq(QueueStatus::Processing.as_str())),
                )
                .set((
                    task_queue::status.eq(QueueStatus::Failed.as_str()),
                    task_queue::completed_at.eq(Some(now)),
                    task_queue::error.eq(Some(error_message.as_str())),
                    task_queue::worker_pid.eq(None::<i32>),
                ))
                .execute(tx)
                .map_err(QueueRepositoryError::persistence)?;
                if updated == 0 {
                    return Ok(false);
                }
                update_content(tx, &id, QueueStatus::Failed.as_str(), now)?;
                Ok(true)
            })
        })
        .await
    }

    async fn cancel(
        &self,
        task_id: &TaskId,
        stage: Stage,
        reason: &str,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<bool> {
        let id = task_id.clone();
        let cancel_reason = reason.to_owned();
        self.run_blocking(move |connection| {
            let updated = diesel::update(
                task_queue::table
                    .filter(task_queue::task_id.eq(id.as_str()))
                    .filter(task_queue::stage.eq(stage.as_str()))
                    .filter(task_queue::status.eq_any([
                        QueueStatus::Waiting.as_str(),
                        QueueStatus::Processing.as_str(),
                    ])),
            )
            .set((
                task_queue::status.eq(QueueStatus::Cancelled.as_str()),
                task_queue::completed_at.eq(Some(now)),
                task_queue::error.eq(Some(cancel_reason.as_str())),
                task_queue::worker_pid.eq(None::<i32>),
            ))
            .execute(connection)
            .map_err(QueueRepositoryError::persistence)?;
            Ok(updated > 0)
        })
        .await
    }

    async fn reopen(&self, task_id: &TaskId, now: DateTime<Utc>) -> QueueRepositoryResult<bool> {
        let id = task_id.clone();
        self.run_blocking(move |connection| {
            connection.transaction::<_, QueueRepositoryError, _>(|tx| {
                let reopened_stage = diesel::update(
                    task_queue::table
                        .filter(task_queue::task_id.eq(id.as_str()))
                        .filter(task_queue::status.eq_any([
                            QueueStatus::Failed.as_str(),
                            QueueStatus::Cancelled.as_str(),
                        ])),
                )
                .set(reset_to_waiting())
                .returning(task_queue::stage)
                .get_result::<String>(tx)
                .optional()
                .map_err(QueueRepositoryError::persistence)?;
                let Some(stage_name) = reopened_stage else {
                    return Ok(false);
                };
                update_content(tx, &id, &stage_name, now)?;
                Ok(true)
            })
        })
        .await
    }

    async fn release_claim(
        &self,
        task_id: &TaskId,
        stage: Stage,
        expected_pid: Option<u32>,
    ) -> QueueRepositoryResult<bool> {
        let id = task_id.clone();
        let owner = expected_pid.and_then(pid_to_column);
        self.run_blocking(move |connection| {
            let target = task_queue::table
                .filter(task_queue::task_id.eq(id.as_str()))
                .filter(task_queue::stage.eq(stage.as_str()))
                .filter(task_queue::status.eq(QueueStatus::Processing.as_str()));
            let updated = match owner {
                Some(pid) => diesel::update(target.filter(task_queue::worker_pid.eq(pid)))
                    .set(reset_to_waiting())
                    .execute(connection),
                None => diesel::update(target.filter(task_queue::worker_pid.is_null()))
                    .set(reset_to_waiting())
                    .execute(connection),
            }
            .map_err(QueueRepositoryError::persistence)?;
            Ok(updated > 0)
        })
        .await
    }

    async fn reconcile(
        &self,
        task_id: &TaskId,
        expected: QueueStatus,
        target: QueueStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<bool> {
        let id = task_id.clone();
        self.run_blocking(move |connection| {
            connection.transaction::<_, QueueRepositoryError, _>(|tx| {
                let updated = diesel::update(
                    task_queue::table
                        .filter(task_queue::task_id.eq(id.as_str()))
                        .filter(task_queue::status.eq(expected.as_str())),
                )
                .set((
                    task_queue::status.eq(target.as_str()),
                    task_queue::completed_at.eq(Some(now)),
                    task_queue::error.eq(error.as_deref()),
                    task_queue::worker_pid.eq(None::<i32>),
                ))
                .execute(tx)
                .map_err(QueueRepositoryError::persistence)?;
                if updated == 0 {
                    return Ok(false);
                }
                if target.is_terminal() {
                    update_content(tx, &id, target.as_str(), now)?;
                }
                Ok(true)
            })
        })
        .await
    }

    async fn find(&self, task_id: &TaskId) -> QueueRepositoryResult<Option<TaskQueueEntry>> {
        let id = task_id.clone();
        self.run_blocking(move |connection| {
            let row = task_queue::table
                .filter(task_queue::task_id.eq(id.as_str()))
                .select(QueueRow::as_select())
                .first::<QueueRow>(connection)
                .optional()
                .map_err(QueueRepositoryError::persistence)?;
            row.map(row_to_entry).transpose()
        })
        .await
    }

    async fn find_task(&self, task_id: &TaskId) -> QueueRepositoryResult<Option<Task>> {
        let id = task_id.clone();
        self.run_blocking(move |connection| {
            let row = tasks::table
                .filter(tasks::task_id.eq(id.as_str()))
                .select(TaskRow::as_select())
                .first::<TaskRow>(connection)
                .optional()
                .map_err(QueueRepositoryError::persistence)?;
            row.map(row_to_task).transpose()
        })
        .await
    }

    async fn content_status(&self, task_id: &TaskId) -> QueueRepositoryResult<Option<String>> {
        let id = task_id.clone();
        self.run_blocking(move |connection| {
            content::table
                .filter(content::content_id.eq(id.as_str()))
                .select(content::status)
                .first::<String>(connection)
                .optional()
                .map_err(QueueRepositoryError::persistence)
        })
        .await
    }

    async fn list_by_status(
        &self,
        statuses: &[QueueStatus],
    ) -> QueueRepositoryResult<Vec<TaskQueueEntry>> {
        let names: Vec<&'static str> = statuses.iter().map(|status| status.as_str()).collect();
        self.run_blocking(move |connection| {
            let rows = task_queue::table
                .filter(task_queue::status.eq_any(names))
                .order((task_queue::created_at.asc(), task_queue::task_id.asc()))
                .select(QueueRow::as_select())
                .load::<QueueRow>(connection)
                .map_err(QueueRepositoryError::persistence)?;
            rows.into_iter().map(row_to_entry).collect()
        })
        .await
    }

    async fn summary(&self) -> QueueRepositoryResult<QueueSummary> {
        self.run_blocking(move |connection| {
            let rows = diesel::sql_query(SUMMARY_SQL)
                .load::<StatusCountRow>(connection)
                .map_err(QueueRepositoryError::persistence)?;
            let mut summary = QueueSummary::new();
            for row in rows {
                let stage = Stage::try_from(row.stage.as_str())
                    .map_err(QueueRepositoryError::persistence)?;
                let status = QueueStatus::try_from(row.status.as_str())
                    .map_err(QueueRepositoryError::persistence)?;
                summary.record(stage, status, u64::try_from(row.count).unwrap_or_default());
            }
            Ok(summary)
        })
        .await
    }

    async fn position(&self, task_id: &TaskId) -> QueueRepositoryResult<Option<u64>> {
        let id = task_id.clone();
        self.run_blocking(move |connection| {
            let target = task_queue::table
                .filter(task_queue::task_id.eq(id.as_str()))
                .filter(task_queue::status.eq(QueueStatus::Waiting.as_str()))
                .select((task_queue::stage, task_queue::created_at))
                .first::<(String, DateTime<Utc>)>(connection)
                .optional()
                .map_err(QueueRepositoryError::persistence)?;
            let Some((stage, created_at)) = target else {
                return Ok(None);
            };
            let ahead = task_queue::table
                .filter(task_queue::stage.eq(stage))
                .filter(task_queue::status.eq(QueueStatus::Waiting.as_str()))
                .filter(task_queue::created_at.lt(created_at))
                .count()
                .get_result::<i64>(connection)
                .map_err(QueueRepositoryError::persistence)?;
            Ok(Some(u64::try_from(ahead).unwrap_or_default()))
        })
        .await
    }

    async fn cleanup(&self, cutoff: DateTime<Utc>) -> QueueRepositoryResult<u64> {
        self.run_blocking(move |connection| {
            let deleted = diesel::delete(
                task_queue::table
                    .filter(task_queue::status.eq_any([
                        QueueStatus::Completed.as_str(),
                        QueueStatus::Failed.as_str(),
                    ]))
                    .filter(task_queue::completed_at.lt(cutoff)),
            )
            .execute(connection)
            .map_err(QueueRepositoryError::persistence)?;
            Ok(u64::try_from(deleted).unwrap_or_default())
        })
        .await
    }
}

impl From<DieselError> for QueueRepositoryError {
    fn from(err: DieselError) -> Self {
        Self::persistence(err)
    }
}

const fn reset_to_waiting() -> ClaimResetChangeset {
    ClaimResetChangeset {
        status: QueueStatus::Waiting.as_str(),
        started_at: None,
        completed_at: None,
        error: None,
        worker_pid: None,
    }
}

fn update_content(
    connection: &mut PgConnection,
    task_id: &TaskId,
    status: &str,
    now: DateTime<Utc>,
) -> QueueRepositoryResult<()> {
    diesel::update(content::table.filter(content::content_id.eq(task_id.as_str())))
        .set((content::status.eq(status), content::updated_at.eq(now)))
        .execute(connection)
        .map_err(QueueRepositoryError::persistence)?;
    Ok(())
}

fn to_row(entry: &TaskQueueEntry) -> QueueRow {
    QueueRow {
        task_id: entry.task_id().as_str().to_owned(),
        stage: entry.stage().as_str().to_owned(),
        status: entry.status().as_str().to_owned(),
        created_at: entry.created_at(),
        started_at: entry.started_at(),
        completed_at: entry.completed_at(),
        error: entry.error().map(str::to_owned),
        worker_pid: entry.worker_pid().and_then(pid_to_column),
    }
}

fn row_to_entry(row: QueueRow) -> QueueRepositoryResult<TaskQueueEntry> {
    let QueueRow {
        task_id,
        stage,
        status,
        created_at,
        started_at,
        completed_at,
        error,
        worker_pid,
    } = row;

    let data = PersistedQueueEntry {
        task_id: TaskId::new(task_id).map_err(QueueRepositoryError::persistence)?,
        stage: Stage::try_from(stage.as_str()).map_err(QueueRepositoryError::persistence)?,
        status: QueueStatus::try_from(status.as_str())
            .map_err(QueueRepositoryError::persistence)?,
        created_at,
        started_at,
        completed_at,
        error,
        worker_pid: pid_from_column(worker_pid),
    };
    Ok(TaskQueueEntry::from_persisted(data))
}

fn row_to_task(row: TaskRow) -> QueueRepositoryResult<Task> {
    Ok(Task::from_persisted(
        TaskId::new(row.task_id).map_err(QueueRepositoryError::persistence)?,
        UserId::new(row.user_id).map_err(QueueRepositoryError::persistence)?,
        row.scheduled_time,
        row.created_at,
    ))
}
