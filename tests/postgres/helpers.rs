//! Disposable `PostgreSQL` schemas for integration tests.
//!
//! Tests run only when `REELWRIGHT_TEST_DATABASE_URL` names a server the
//! test user may create schemas on. Each test gets its own schema with the
//! pipeline migration applied, dropped again when the handle goes out of
//! scope.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use reelwright::persistence::{PgPool, build_pool};
use uuid::Uuid;

/// Environment variable naming the test server.
pub const DATABASE_URL_VAR: &str = "REELWRIGHT_TEST_DATABASE_URL";

/// SQL creating the pipeline tables.
pub const CREATE_SCHEMA_SQL: &str =
    include_str!("../../migrations/2026-10-01-000000_create_pipeline_tables/up.sql");

/// A migrated schema and a pool whose connections default to it.
pub struct TestDatabase {
    /// Pool scoped to the schema.
    pub pool: PgPool,
    admin_url: String,
    schema: String,
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        if let Ok(mut conn) = PgConnection::establish(&self.admin_url) {
            let dropped = conn.batch_execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema));
            debug_assert!(dropped.is_ok(), "failed to drop test schema {}", self.schema);
        }
    }
}

/// Creates a migrated schema, or `None` when no test server is configured.
///
/// # Errors
///
/// Returns an error when the server is configured but unreachable or the
/// migration fails.
pub fn test_database() -> eyre::Result<Option<TestDatabase>> {
    let Ok(admin_url) = std::env::var(DATABASE_URL_VAR) else {
        return Ok(None);
    };
    let schema = format!("reelwright_test_{}", Uuid::new_v4().simple());
    let mut admin = PgConnection::establish(&admin_url)?;
    admin.batch_execute(&format!("CREATE SCHEMA {schema}"))?;

    let scoped_url = scoped_url(&admin_url, &schema);
    let mut conn = PgConnection::establish(&scoped_url)?;
    conn.batch_execute(CREATE_SCHEMA_SQL)?;
    let pool = build_pool(&scoped_url, 8)?;
    Ok(Some(TestDatabase {
        pool,
        admin_url,
        schema,
    }))
}

fn scoped_url(url: &str, schema: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}options=-csearch_path%3D{schema}")
}
