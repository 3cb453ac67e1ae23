//! Shared `PostgreSQL` pool plumbing for the repository adapters.
//!
//! Diesel is synchronous, so every adapter moves its work onto the blocking
//! thread pool through [`run_blocking_with`].

use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PoolError, PooledConnection};

/// `PostgreSQL` connection pool type shared by all adapters.
pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Pooled connection type.
pub type PooledConn = PooledConnection<ConnectionManager<PgConnection>>;

/// Builds a connection pool for `database_url`.
///
/// # Errors
///
/// Returns [`PoolError`] when the initial connections cannot be established.
pub fn build_pool(database_url: &str, max_size: u32) -> Result<PgPool, PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder().max_size(max_size).build(manager)
}

/// Runs `f` with a pooled connection on the blocking thread pool, mapping
/// pool and join failures through `map_err`.
pub(crate) async fn run_blocking_with<F, T, E, M>(pool: &PgPool, f: F, map_err: M) -> Result<T, E>
where
    F: FnOnce(&mut PgConnection) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    M: Fn(Box<dyn std::error::Error + Send + Sync>) -> E + Send + Clone + 'static,
{
    let pool = pool.clone();
    let pool_err = map_err.clone();
    tokio::task::spawn_blocking(move || {
        let mut connection = pool.get().map_err(|err| pool_err(Box::new(err)))?;
        f(&mut connection)
    })
    .await
    .map_err(|err| map_err(Box::new(err)))?
}

/// Converts a PID to the `INTEGER` column representation.
pub(crate) fn pid_to_column(pid: u32) -> Option<i32> {
    i32::try_from(pid).ok()
}

/// Converts a persisted PID column back to a process identifier.
pub(crate) fn pid_from_column(pid: Option<i32>) -> Option<u32> {
    pid.and_then(|value| u32::try_from(value).ok())
}
