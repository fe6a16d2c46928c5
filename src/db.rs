// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::Result;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::Transaction;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

pub async fn create_db_pool(db_url: &str) -> Result<SqlitePool> {
    // Create the database file if it doesn't exist
    let options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    migrate_database(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database, migrated. Every connection to
/// `sqlite::memory:` is a separate database, so the pool must never open a
/// second one or let the first expire.
pub async fn create_test_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    migrate_database(&pool).await?;

    Ok(pool)
}

/// Starts a transaction that takes the write lock up front. A deferred
/// transaction that reads before writing cannot wait out another writer,
/// it fails with SQLITE_BUSY instead.
pub async fn begin_write(pool: &SqlitePool) -> sqlx::Result<Transaction<'static, Sqlite>> {
    pool.begin_with("BEGIN IMMEDIATE").await
}

/// SQLITE_BUSY or SQLITE_LOCKED, including their extended codes
pub fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, 5 | 6)),
        _ => false,
    }
}

pub async fn migrate_database(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Current time truncated to whole seconds, so stored timestamps compare
/// lexically
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}
