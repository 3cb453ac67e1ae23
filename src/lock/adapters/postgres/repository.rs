//! `PostgreSQL` repository implementation for stage locks.

use super::schema::task_lock;
use crate::lock::{
    domain::{LockHolder, StageLock},
    ports::{StageLockRepository, StageLockRepositoryError, StageLockRepositoryResult},
};
use crate::persistence::{PgPool, pid_from_column, pid_to_column, run_blocking_with};
use crate::pipeline::domain::{Stage, TaskId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{Int4, Nullable, Text, Timestamptz};
use std::sync::Arc;

/// Takes the lock only when it is free or abandoned; the row lock taken by
/// the UPDATE serializes competing acquirers.
const ACQUIRE_SQL: &str = concat!(
    "UPDATE task_lock ",
    "SET locked_by = $2, locked_at = $3, worker_pid = $4 ",
    "WHERE stage = $1 AND (locked_by IS NULL OR locked_at < $5)",
);

const RELEASE_EXPIRED_SQL: &str = concat!(
    "WITH expired AS (",
    "SELECT stage, locked_by, locked_at, worker_pid FROM task_lock ",
    "WHERE locked_by IS NOT NULL AND locked_at < $1 ",
    "FOR UPDATE",
    ") ",
    "UPDATE task_lock t SET locked_by = NULL, locked_at = NULL, worker_pid = NULL ",
    "FROM expired WHERE t.stage = expired.stage ",
    "RETURNING expired.stage, expired.locked_by, expired.locked_at, expired.worker_pid",
);

#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = task_lock)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct LockRow {
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    stage: String,
    #[diesel(sql_type = Nullable<diesel::sql_types::Varchar>)]
    locked_by: Option<String>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    locked_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<Int4>)]
    worker_pid: Option<i32>,
}

/// `PostgreSQL`-backed stage lock repository.
#[derive(Debug, Clone)]
pub struct PostgresStageLockRepository {
    pool: PgPool,
}

impl PostgresStageLockRepository {
    /// Creates a new repository from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> StageLockRepositoryResult<T>
    where
        F: FnOnce(&mut PgConnection) -> StageLockRepositoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking_with(&self.pool, f, |err| {
            StageLockRepositoryError::Persistence(Arc::from(err))
        })
        .await
    }
}

#[async_trait]
impl StageLockRepository for PostgresStageLockRepository {
    async fn acquire(
        &self,
        stage: Stage,
        task_id: &TaskId,
        worker_pid: u32,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StageLockRepositoryResult<bool> {
        let holder = task_id.as_str().to_owned();
        let pid = pid_to_column(worker_pid);
        self.run_blocking(move |connection| {
            let updated = diesel::sql_query(ACQUIRE_SQL)
                .bind::<Text, _>(stage.as_str())
                .bind::<Text, _>(holder)
                .bind::<Timestamptz, _>(now)
                .bind::<Nullable<Int4>, _>(pid)
                .bind::<Timestamptz, _>(stale_before)
                .execute(connection)
                .map_err(StageLockRepositoryError::persistence)?;
            Ok(updated == 1)
        })
        .await
    }

    async fn release(&self, stage: Stage, task_id: &TaskId) -> StageLockRepositoryResult<bool> {
        let holder = task_id.as_str().to_owned();
        self.run_blocking(move |connection| {
            let updated = diesel::update(
                task_lock::table
                    .filter(task_lock::stage.eq(stage.as_str()))
                    .filter(task_lock::locked_by.eq(holder)),
            )
            .set((
                task_lock::locked_by.eq(None::<String>),
                task_lock::locked_at.eq(None::<DateTime<Utc>>),
                task_lock::worker_pid.eq(None::<i32>),
            ))
            .execute(connection)
            .map_err(StageLockRepositoryError::persistence)?;
            Ok(updated == 1)
        })
        .await
    }

    async fn find(&self, stage: Stage) -> StageLockRepositoryResult<StageLock> {
        self.run_blocking(move |connection| {
            let row = task_lock::table
                .filter(task_lock::stage.eq(stage.as_str()))
                .select(LockRow::as_select())
                .first::<LockRow>(connection)
                .optional()
                .map_err(StageLockRepositoryError::persistence)?;
            row.map_or_else(|| Ok(StageLock::free(stage)), row_to_lock)
        })
        .await
    }

    async fn list(&self) -> StageLockRepositoryResult<Vec<StageLock>> {
        self.run_blocking(move |connection| {
            let rows = task_lock::table
                .select(LockRow::as_select())
                .load::<LockRow>(connection)
                .map_err(StageLockRepositoryError::persistence)?;
            let mut locks = rows
                .into_iter()
                .map(row_to_lock)
                .collect::<StageLockRepositoryResult<Vec<_>>>()?;
            locks.sort_by_key(StageLock::stage);
            Ok(locks)
        })
        .await
    }

    async fn release_expired(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StageLockRepositoryResult<Vec<StageLock>> {
        self.run_blocking(move |connection| {
            let rows = diesel::sql_query(RELEASE_EXPIRED_SQL)
                .bind::<Timestamptz, _>(stale_before)
                .load::<LockRow>(connection)
                .map_err(StageLockRepositoryError::persistence)?;
            rows.into_iter().map(row_to_lock).collect()
        })
        .await
    }
}

fn row_to_lock(row: LockRow) -> StageLockRepositoryResult<StageLock> {
    let stage = Stage::try_from(row.stage.as_str()).map_err(StageLockRepositoryError::persistence)?;
    let holder = match (row.locked_by, row.locked_at) {
        (Some(locked_by), Some(locked_at)) => Some(LockHolder {
            task_id: TaskId::new(locked_by).map_err(StageLockRepositoryError::persistence)?,
            locked_at,
            worker_pid: pid_from_column(row.worker_pid),
        }),
        _ => None,
    };
    Ok(holder.map_or_else(|| StageLock::free(stage), |held| StageLock::held(stage, held)))
}
