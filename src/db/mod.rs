use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    Sqlite, SqlitePool, Transaction,
};

use crate::models::Role;

pub mod notifications;
pub mod pickups;
pub mod tps;
pub mod transactions;
pub mod users;

/// Whose rows a listing query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Resident(i64),
    Operator(i64),
    Admin,
}

impl Viewer {
    pub fn new(user_id: i64, role: Role) -> Self {
        match role {
            Role::User => Viewer::Resident(user_id),
            Role::Tps => Viewer::Operator(user_id),
            Role::Admin => Viewer::Admin,
        }
    }
}

/// Opens the SQLite pool and applies the embedded migrations.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .read_only(false)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let db_pool = SqlitePool::connect_with(opts).await?;
    sqlx::migrate!().run(&db_pool).await?;
    log::info!("Database migrated successfully");
    Ok(db_pool)
}

/// Single-connection in-memory database; the connection is never recycled
/// because closing it would drop the data.
#[cfg(test)]
pub async fn connect_in_memory() -> SqlitePool {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid in-memory url")
        .foreign_keys(true);
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .expect("in-memory database");
    sqlx::migrate!().run(&pool).await.expect("Migrate Error");
    pool
}

/// Transaction holding the write lock from the start, for read-check-write
/// sequences. A deferred transaction that has already read cannot take the
/// lock after another connection commits (`SQLITE_BUSY`).
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    pool.begin_with("BEGIN IMMEDIATE").await
}

/// True when the error is a UNIQUE constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}
