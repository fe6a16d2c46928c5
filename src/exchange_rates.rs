// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::Result;
use chrono::{Datelike, Duration, Local, NaiveDateTime, Timelike, Weekday};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use std::collections::BTreeMap;

use crate::config::{BankingHours, Config};
use crate::db;
use crate::models::{Currency, RateSnapshot, RateUpdateLogEntry};
use crate::rate_sources::{FetchedRate, RateSource};
use crate::rates::store_rate_on;

/// Result of one refresh run
#[derive(Debug, Clone, Serialize)]
pub struct RateUpdateSummary {
    pub stored: Vec<RateSnapshot>,
    pub failures: Vec<String>,
    pub missing: Vec<Currency>,
}

impl RateUpdateSummary {
    pub fn success(&self) -> bool {
        !self.stored.is_empty()
    }
}

/// Query every source in order and store the first rate seen per currency.
///
/// A failing source does not abort the run. If no source yields anything
/// the previous rates stay active. Each run writes one row to the update log.
pub async fn update_exchange_rates(
    sources: &[Box<dyn RateSource>],
    pool: &SqlitePool,
) -> Result<RateUpdateSummary> {
    let mut chosen: BTreeMap<Currency, FetchedRate> = BTreeMap::new();
    let mut failures = Vec::new();
    let mut used = Vec::new();

    for source in sources {
        match source.fetch().await {
            Ok(rates) => {
                tracing::info!(source = source.name(), count = rates.len(), "rates fetched");
                let mut contributed = false;
                for rate in rates {
                    if rate.currency.is_foreign() && !chosen.contains_key(&rate.currency) {
                        chosen.insert(rate.currency, rate);
                        contributed = true;
                    }
                }
                if contributed {
                    used.push(source.name().to_string());
                }
            }
            Err(e) => {
                tracing::warn!(source = source.name(), error = %e, "rate source failed");
                failures.push(format!("{}: {}", source.name(), e));
            }
        }
    }

    let mut tx = db::begin_write(pool).await?;
    let mut stored = Vec::new();
    for rate in chosen.values() {
        match store_rate_on(&mut tx, rate.currency, rate.rate, &rate.source, rate.fetched_at).await {
            Ok(snapshot) => stored.push(snapshot),
            Err(e) => failures.push(format!("{} from {}: {}", rate.currency, rate.source, e)),
        }
    }

    let missing: Vec<Currency> = Currency::FOREIGN
        .into_iter()
        .filter(|c| !stored.iter().any(|s| s.currency == *c))
        .collect();

    let summary = RateUpdateSummary {
        stored,
        failures,
        missing,
    };

    let message = if summary.success() {
        let updated: Vec<String> = summary
            .stored
            .iter()
            .map(|s| format!("{}={}", s.currency, s.rate))
            .collect();
        let mut message = format!("updated {}", updated.join(", "));
        if !summary.failures.is_empty() {
            message.push_str(&format!("; errors: {}", summary.failures.join("; ")));
        }
        message
    } else {
        format!("no rates obtained; errors: {}", summary.failures.join("; "))
    };

    sqlx::query("INSERT INTO rate_update_log (ran_at, success, sources, message) VALUES (?, ?, ?, ?)")
        .bind(db::now())
        .bind(summary.success())
        .bind(used.join(","))
        .bind(&message)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    if summary.success() {
        tracing::info!(stored = summary.stored.len(), missing = ?summary.missing, "exchange rates updated");
    } else {
        tracing::error!(errors = ?summary.failures, "exchange rate update failed; keeping previous rates");
    }

    Ok(summary)
}

/// Delete update-log rows older than `older_than_days`
pub async fn prune_update_log(pool: &SqlitePool, older_than_days: i64) -> Result<u64> {
    let cutoff = db::now() - Duration::days(older_than_days);
    let result = sqlx::query("DELETE FROM rate_update_log WHERE ran_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn recent_updates(pool: &SqlitePool, limit: i64) -> Result<Vec<RateUpdateLogEntry>> {
    let entries = sqlx::query_as::<_, RateUpdateLogEntry>(
        "SELECT id, ran_at, success, sources, message FROM rate_update_log ORDER BY id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(entries)
}

/// Monday to Friday, from `open_hour` (inclusive) to `close_hour` (exclusive)
pub fn is_banking_hours(now: NaiveDateTime, hours: &BankingHours) -> bool {
    let weekday = now.weekday();
    if matches!(weekday, Weekday::Sat | Weekday::Sun) {
        return false;
    }
    (hours.open_hour..hours.close_hour).contains(&now.hour())
}

/// Refresh rates on a fixed interval during banking hours and prune the
/// update log once a day. Runs until the task is dropped.
pub async fn run_rate_scheduler(
    pool: SqlitePool,
    config: Config,
    sources: Vec<Box<dyn RateSource>>,
) {
    let period = std::time::Duration::from_secs(config.rates.refresh_interval_secs.max(60));
    let mut ticker = tokio::time::interval(period);
    let mut last_prune: Option<chrono::NaiveDate> = None;

    tracing::info!(every_secs = period.as_secs(), "rate scheduler started");

    loop {
        ticker.tick().await;
        let now = Local::now().naive_local();

        if is_banking_hours(now, &config.banking_hours) {
            if let Err(e) = update_exchange_rates(&sources, &pool).await {
                tracing::error!(error = %e, "scheduled rate update failed");
            }
        } else {
            tracing::debug!(%now, "outside banking hours, skipping rate update");
        }

        if last_prune != Some(now.date()) {
            match prune_update_log(&pool, config.rates.log_retention_days).await {
                Ok(deleted) => tracing::info!(deleted, "rate update log pruned"),
                Err(e) => tracing::error!(error = %e, "failed to prune rate update log"),
            }
            last_prune = Some(now.date());
        }
    }
}
