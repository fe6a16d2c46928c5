// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::db;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{Currency, RateSnapshot};
use crate::money::{round_rate, to_rate_units};

const RATE_COLUMNS: &str = "id, currency, rate_scaled, source, fetched_at, active";

/// Where a resolved rate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateStatus {
    Active,
    /// No active snapshot; the most recent one was used instead
    Historical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentRate {
    pub snapshot: RateSnapshot,
    pub status: RateStatus,
}

/// Prices of one currency in VES, as offered to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    pub currency: Currency,
    pub base: Decimal,
    /// Applied when the client buys foreign currency
    pub buy: Decimal,
    /// Applied when the client sells foreign currency
    pub sell: Decimal,
    pub spread: Decimal,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

impl RateQuote {
    pub fn from_base(snapshot: &RateSnapshot, spread: Decimal) -> Self {
        Self {
            currency: snapshot.currency,
            base: snapshot.rate,
            buy: round_rate(snapshot.rate * (Decimal::ONE + spread)),
            sell: round_rate(snapshot.rate * (Decimal::ONE - spread)),
            spread,
            source: snapshot.source.clone(),
            fetched_at: snapshot.fetched_at,
        }
    }
}

pub(crate) async fn store_rate_on(
    conn: &mut SqliteConnection,
    currency: Currency,
    rate: Decimal,
    source: &str,
    fetched_at: DateTime<Utc>,
) -> LedgerResult<RateSnapshot> {
    let currency = currency.ensure_foreign()?;
    let rate = round_rate(rate);
    if rate <= Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "rate for {} must be greater than zero, got {}",
            currency, rate
        )));
    }
    let units = to_rate_units(rate)?;

    sqlx::query("UPDATE exchange_rates SET active = 0 WHERE currency = ? AND active = 1")
        .bind(currency.as_str())
        .execute(&mut *conn)
        .await?;

    let id = sqlx::query(
        "INSERT INTO exchange_rates (currency, rate_scaled, source, fetched_at, active) VALUES (?, ?, ?, ?, 1)",
    )
    .bind(currency.as_str())
    .bind(units)
    .bind(source)
    .bind(fetched_at)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    let sql = format!("SELECT {} FROM exchange_rates WHERE id = ?", RATE_COLUMNS);
    let snapshot = sqlx::query_as::<_, RateSnapshot>(&sql)
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(snapshot)
}

/// Store a new snapshot, replacing the active rate of that currency
pub async fn store_rate(
    pool: &SqlitePool,
    currency: Currency,
    rate: Decimal,
    source: &str,
    fetched_at: DateTime<Utc>,
) -> LedgerResult<RateSnapshot> {
    let mut tx = db::begin_write(pool).await?;
    let snapshot = store_rate_on(&mut tx, currency, rate, source, fetched_at).await?;
    tx.commit().await?;

    tracing::info!(currency = %currency, rate = %snapshot.rate, source, "exchange rate stored");
    Ok(snapshot)
}

/// The active rate, or failing that the most recent one
pub async fn current_rate(pool: &SqlitePool, currency: Currency) -> LedgerResult<CurrentRate> {
    let currency = currency.ensure_foreign()?;
    let sql = format!(
        "SELECT {} FROM exchange_rates WHERE currency = ? ORDER BY active DESC, fetched_at DESC, id DESC LIMIT 1",
        RATE_COLUMNS
    );
    let snapshot = sqlx::query_as::<_, RateSnapshot>(&sql)
        .bind(currency.as_str())
        .fetch_optional(pool)
        .await?
        .ok_or(LedgerError::NoRate(currency))?;

    let status = if snapshot.active {
        RateStatus::Active
    } else {
        tracing::warn!(currency = %currency, fetched_at = %snapshot.fetched_at, "no active rate, using historical");
        RateStatus::Historical
    };

    Ok(CurrentRate { snapshot, status })
}

/// Newest first
pub async fn rate_history(
    pool: &SqlitePool,
    currency: Currency,
    limit: i64,
) -> LedgerResult<Vec<RateSnapshot>> {
    let sql = format!(
        "SELECT {} FROM exchange_rates WHERE currency = ? ORDER BY fetched_at DESC, id DESC LIMIT ?",
        RATE_COLUMNS
    );
    let history = sqlx::query_as::<_, RateSnapshot>(&sql)
        .bind(currency.as_str())
        .bind(limit.max(0))
        .fetch_all(pool)
        .await?;

    Ok(history)
}

pub async fn quote(pool: &SqlitePool, currency: Currency, spread: Decimal) -> LedgerResult<RateQuote> {
    if spread < Decimal::ZERO || spread >= Decimal::ONE {
        return Err(LedgerError::validation(format!(
            "spread must be a fraction in [0, 1), got {}",
            spread
        )));
    }
    let current = current_rate(pool, currency).await?;
    Ok(RateQuote::from_base(&current.snapshot, spread))
}

/// Active snapshot of every foreign currency
pub async fn active_rates(pool: &SqlitePool) -> LedgerResult<Vec<RateSnapshot>> {
    let sql = format!(
        "SELECT {} FROM exchange_rates WHERE active = 1 ORDER BY currency",
        RATE_COLUMNS
    );
    let rates = sqlx::query_as::<_, RateSnapshot>(&sql).fetch_all(pool).await?;
    Ok(rates)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateHealth {
    pub healthy: bool,
    pub warnings: Vec<String>,
    pub rates: Vec<RateSnapshot>,
}

/// Report foreign currencies without an active rate or with a stale one
pub async fn rate_health(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    max_age: Duration,
) -> LedgerResult<RateHealth> {
    let rates = active_rates(pool).await?;
    let mut warnings = Vec::new();

    for currency in Currency::FOREIGN {
        match rates.iter().find(|r| r.currency == currency) {
            None => warnings.push(format!("no active rate for {}", currency)),
            Some(snapshot) => {
                let age = now - snapshot.fetched_at;
                if age > max_age {
                    warnings.push(format!(
                        "{} rate is {} minutes old (source {})",
                        currency,
                        age.num_minutes(),
                        snapshot.source
                    ));
                }
            }
        }
    }

    Ok(RateHealth {
        healthy: warnings.is_empty(),
        warnings,
        rates,
    })
}
