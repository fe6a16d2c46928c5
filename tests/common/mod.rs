// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Shared fixtures for the integration tests: a migrated database in a temp
//! directory, seeded rates, a day's remittances and limits, and a funded account.

#![allow(dead_code)]

use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePool;
use std::str::FromStr;
use tempfile::TempDir;

use divisas_rs::config::Config;
use divisas_rs::models::{Account, Currency, Remittance};
use divisas_rs::remittances::NewRemittance;
use divisas_rs::{accounts, db, limits, rates, remittances};

pub const USD_RATE: &str = "36.50";
pub const EUR_RATE: &str = "39.80";

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn trade_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
}

/// Defaults: 0.5% commission both ways, 0.8% spread
pub fn test_config() -> Config {
    Config::default()
}

/// Creates a migrated SQLite database in a temporary directory
pub async fn create_test_db() -> Result<(SqlitePool, TempDir)> {
    let temp_dir = tempfile::tempdir()?;
    let db_path = temp_dir.path().join("test.db");
    let db_url = format!("sqlite:{}", db_path.display());

    let pool = db::create_db_pool(&db_url).await?;

    Ok((pool, temp_dir))
}

/// Stores manual USD and EUR rates
pub async fn seed_rates(pool: &SqlitePool) -> Result<()> {
    rates::store_rate(pool, Currency::Usd, dec(USD_RATE), "manual", db::now()).await?;
    rates::store_rate(pool, Currency::Eur, dec(EUR_RATE), "manual", db::now()).await?;
    Ok(())
}

/// Registers USD remittances of the given amounts on `date`, in order
pub async fn seed_remittances(
    pool: &SqlitePool,
    date: NaiveDate,
    amounts: &[&str],
) -> Result<Vec<Remittance>> {
    let mut registered = Vec::new();
    for (i, amount) in amounts.iter().enumerate() {
        let new = NewRemittance {
            date,
            currency: Currency::Usd,
            amount: dec(amount),
            source: Some("BANCO CENTRAL".to_string()),
            reference: Some(format!("REF-{:03}", i + 1)),
            notes: None,
        };
        registered.push(remittances::register_remittance(pool, &new).await?);
    }
    Ok(registered)
}

/// Rates, USD remittances of 100, 150 and 200 and a USD limit of 300
pub async fn seed_trading_day(pool: &SqlitePool) -> Result<Vec<Remittance>> {
    seed_rates(pool).await?;
    let remittances = seed_remittances(pool, trade_date(), &["100", "150", "200"]).await?;
    limits::configure_limit(pool, trade_date(), Currency::Usd, dec("300")).await?;
    Ok(remittances)
}

/// A client with an open account holding `ves` bolívares
pub async fn funded_account(pool: &SqlitePool, national_id: &str, ves: &str) -> Result<Account> {
    let client = accounts::create_client(pool, national_id, "María Pérez").await?;
    let account = accounts::open_account(pool, client.id).await?;
    if dec(ves) > Decimal::ZERO {
        accounts::deposit(pool, account.id, Currency::Ves, dec(ves)).await?;
    }
    Ok(account)
}
