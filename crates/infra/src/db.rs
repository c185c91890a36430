//! Postgres connection pool.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::DatabaseSettings;

/// Connect the shared pool used by the tenant fetcher and the lease elector.
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.url)
        .await?;

    info!(
        max_connections = settings.max_connections,
        "connected to postgres"
    );
    Ok(pool)
}

/// Render a sqlx error for logs and error values, naming the failed operation.
pub(crate) fn describe_sqlx_error(operation: &str, err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ),
            None => format!("database error in {operation}: {}", db_err.message()),
        },
        sqlx::Error::PoolClosed => format!("connection pool closed in {operation}"),
        sqlx::Error::PoolTimedOut => format!("timed out waiting for a connection in {operation}"),
        other => format!("sqlx error in {operation}: {other}"),
    }
}
