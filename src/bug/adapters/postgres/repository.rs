//! `PostgreSQL` repository implementation for bug records.

use super::schema::bugs;
use crate::bug::{
    domain::{BugId, BugMetadata, BugRecord, BugStatus, PersistedBug},
    ports::{BugRepository, BugRepositoryError, BugRepositoryResult},
};
use crate::persistence::{PgPool, pid_from_column, pid_to_column, run_blocking_with};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = bugs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct BugRow {
    id: i64,
    title: String,
    status: String,
    assigned_to: Option<String>,
    worker_pid: Option<i32>,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = bugs)]
struct NewBugRow {
    title: String,
    status: String,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = bugs)]
#[diesel(treat_none_as_null = true)]
struct BugChangeset {
    status: String,
    assigned_to: Option<String>,
    worker_pid: Option<i32>,
    metadata: Value,
    updated_at: DateTime<Utc>,
}

impl From<DieselError> for BugRepositoryError {
    fn from(err: DieselError) -> Self {
        Self::persistence(err)
    }
}

/// `PostgreSQL`-backed bug repository.
#[derive(Debug, Clone)]
pub struct PostgresBugRepository {
    pool: PgPool,
}

impl PostgresBugRepository {
    /// Creates a new repository from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> BugRepositoryResult<T>
    where
        F: FnOnce(&mut PgConnection) -> BugRepositoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking_with(&self.pool, f, |err| {
            BugRepositoryError::Persistence(Arc::from(err))
        })
        .await
    }

    /// Locks one bug row, applies `mutate`, and writes the result back when
    /// `mutate` accepts the change.
    async fn mutate<F>(&self, id: BugId, mutate: F) -> BugRepositoryResult<bool>
    where
        F: FnOnce(&mut BugRecord) -> bool + Send + 'static,
    {
        self.run_blocking(move |connection| {
            connection.transaction::<_, BugRepositoryError, _>(|tx| {
                let row = bugs::table
                    .filter(bugs::id.eq(id.value()))
                    .select(BugRow::as_select())
                    .for_update()
                    .first::<BugRow>(tx)
                    .optional()?
                    .ok_or(BugRepositoryError::NotFound(id))?;
                let mut bug = row_to_bug(row)?;
                if !mutate(&mut bug) {
                    return Ok(false);
                }
                write_back(tx, &bug)?;
                Ok(true)
            })
        })
        .await
    }
}

#[async_trait]
impl BugRepository for PostgresBugRepository {
    async fn create(&self, title: &str, now: DateTime<Utc>) -> BugRepositoryResult<BugRecord> {
        let metadata =
            serde_json::to_value(BugMetadata::default()).map_err(BugRepositoryError::persistence)?;
        let new_row = NewBugRow {
            title: title.to_owned(),
            status: BugStatus::Open.as_str().to_owned(),
            metadata,
            created_at: now,
            updated_at: now,
        };
        self.run_blocking(move |connection| {
            let row = diesel::insert_into(bugs::table)
                .values(&new_row)
                .returning(BugRow::as_returning())
                .get_result::<BugRow>(connection)?;
            row_to_bug(row)
        })
        .await
    }

    async fn claim_next(
        &self,
        worker: &str,
        owner_pid: u32,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<Option<BugRecord>> {
        let claimant = worker.to_owned();
        self.run_blocking(move |connection| {
            connection.transaction::<_, BugRepositoryError, _>(|tx| {
                let row = bugs::table
                    .filter(bugs::status.eq(BugStatus::Open.as_str()))
                    .order((bugs::created_at.asc(), bugs::id.asc()))
                    .select(BugRow::as_select())
                    .for_update()
                    .skip_locked()
                    .first::<BugRow>(tx)
                    .optional()?;
                let Some(row) = row else {
                    return Ok(None);
                };
                let mut bug = row_to_bug(row)?;
                if bug.claim(&claimant, owner_pid, now).is_err() {
                    return Ok(None);
                }
                write_back(tx, &bug)?;
                Ok(Some(bug))
            })
        })
        .await
    }

    async fn attach_worker(
        &self,
        id: BugId,
        from_pid: u32,
        pid: u32,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<bool> {
        self.mutate(id, move |bug| bug.attach_worker(from_pid, pid, now))
        .await
    }

    async fn release(
        &self,
        id: BugId,
        expected_pid: Option<u32>,
        note: &str,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<bool> {
        let text = note.to_owned();
        self.mutate(id, move |bug| {
            if !bug.is_owned_by(expected_pid) {
                return false;
            }
            bug.release(&text, now).is_ok()
        })
        .await
    }

    async fn finish(
        &self,
        id: BugId,
        status: BugStatus,
        note: &str,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<bool> {
        let text = note.to_owned();
        self.mutate(id, move |bug| bug.finish(status, &text, now).is_ok())
            .await
    }

    async fn reopen(
        &self,
        id: BugId,
        note: &str,
        now: DateTime<Utc>,
    ) -> BugRepositoryResult<bool> {
        let text = note.to_owned();
        self.mutate(id, move |bug| bug.reopen(&text, now).is_ok())
            .await
    }

    async fn find(&self, id: BugId) -> BugRepositoryResult<Option<BugRecord>> {
        self.run_blocking(move |connection| {
            let row = bugs::table
                .filter(bugs::id.eq(id.value()))
                .select(BugRow::as_select())
                .first::<BugRow>(connection)
                .optional()?;
            row.map(row_to_bug).transpose()
        })
        .await
    }

    async fn list_by_status(&self, statuses: &[BugStatus]) -> BugRepositoryResult<Vec<BugRecord>> {
        let names: Vec<&'static str> = statuses.iter().map(|status| status.as_str()).collect();
        self.run_blocking(move |connection| {
            let rows = bugs::table
                .filter(bugs::status.eq_any(names))
                .order((bugs::created_at.asc(), bugs::id.asc()))
                .select(BugRow::as_select())
                .load::<BugRow>(connection)?;
            rows.into_iter().map(row_to_bug).collect()
        })
        .await
    }
}

fn write_back(connection: &mut PgConnection, bug: &BugRecord) -> BugRepositoryResult<()> {
    let changes = BugChangeset {
        status: bug.status().as_str().to_owned(),
        assigned_to: bug.assigned_to().map(str::to_owned),
        worker_pid: bug.worker_pid().and_then(pid_to_column),
        metadata: serde_json::to_value(bug.metadata()).map_err(BugRepositoryError::persistence)?,
        updated_at: bug.updated_at(),
    };
    diesel::update(bugs::table.filter(bugs::id.eq(bug.id().value())))
        .set(&changes)
        .execute(connection)?;
    Ok(())
}

fn row_to_bug(row: BugRow) -> BugRepositoryResult<BugRecord> {
    let metadata = serde_json::from_value::<BugMetadata>(row.metadata)
        .map_err(BugRepositoryError::persistence)?;
    let status =
        BugStatus::try_from(row.status.as_str()).map_err(BugRepositoryError::persistence)?;
    Ok(BugRecord::from_persisted(PersistedBug {
        id: BugId::new(row.id),
        title: row.title,
        status,
        assigned_to: row.assigned_to,
        worker_pid: pid_from_column(row.worker_pid),
        metadata,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}
