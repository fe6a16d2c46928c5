// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Daily sales limits per currency.
//!
//! A limit caps how much of a currency may be sold on one date. It is
//! independent of remittance stock.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::db;
use crate::error::{LedgerError, LedgerResult, SaleRejection};
use crate::models::{Currency, SalesLimit};
use crate::money::{from_cents, round_money, to_cents};

pub const ALERT_80_PCT: f64 = 80.0;
pub const ALERT_95_PCT: f64 = 95.0;

const LIMIT_COLUMNS: &str = "id, date, currency, daily_limit_cents, sold_cents, alert_80_sent, \
     alert_95_sent, active, configured_at";

pub(crate) async fn active_limit_on(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    currency: Currency,
) -> LedgerResult<Option<SalesLimit>> {
    let sql = format!(
        "SELECT {} FROM sales_limits WHERE date = ? AND currency = ? AND active = 1 \
         ORDER BY id DESC LIMIT 1",
        LIMIT_COLUMNS
    );
    let limit = sqlx::query_as::<_, SalesLimit>(&sql)
        .bind(date)
        .bind(currency.as_str())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(limit)
}

async fn fetch_limit(conn: &mut SqliteConnection, id: i64) -> LedgerResult<SalesLimit> {
    let sql = format!("SELECT {} FROM sales_limits WHERE id = ?", LIMIT_COLUMNS);
    sqlx::query_as::<_, SalesLimit>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::not_found("sales limit", id))
}

/// Set the daily limit for a currency, replacing any active one.
///
/// The amount already sold that day carries over to the new limit, so a
/// limit below it is refused.
pub async fn configure_limit(
    pool: &SqlitePool,
    date: NaiveDate,
    currency: Currency,
    daily_limit: Decimal,
) -> LedgerResult<SalesLimit> {
    let currency = currency.ensure_foreign()?;
    let daily_limit = round_money(daily_limit);
    if daily_limit < Decimal::ZERO {
        return Err(LedgerError::validation("daily limit cannot be negative"));
    }
    let limit_cents = to_cents(daily_limit)?;

    let mut tx = db::begin_write(pool).await?;

    let sold_cents = match active_limit_on(&mut tx, date, currency).await? {
        Some(previous) => {
            if daily_limit < previous.sold {
                return Err(LedgerError::validation(format!(
                    "daily limit {:.2} {} is below the {:.2} {} already sold on {}",
                    daily_limit, currency, previous.sold, currency, date
                )));
            }
            sqlx::query("UPDATE sales_limits SET active = 0 WHERE id = ?")
                .bind(previous.id)
                .execute(&mut *tx)
                .await?;
            to_cents(previous.sold)?
        }
        None => 0,
    };

    // Thresholds already crossed by the carried-over amount do not fire again
    let pct = crate::models::utilization_pct(from_cents(sold_cents), daily_limit);
    let id = sqlx::query(
        r#"
        INSERT INTO sales_limits (
            date, currency, daily_limit_cents, sold_cents, alert_80_sent,
            alert_95_sent, active, configured_at
        )
        VALUES (?, ?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(date)
    .bind(currency.as_str())
    .bind(limit_cents)
    .bind(sold_cents)
    .bind(pct >= ALERT_80_PCT)
    .bind(pct >= ALERT_95_PCT)
    .bind(db::now())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    let limit = fetch_limit(&mut tx, id).await?;
    tx.commit().await?;

    tracing::info!(
        currency = %currency,
        date = %date,
        daily_limit = %daily_limit,
        sold = %limit.sold,
        "sales limit configured"
    );

    Ok(limit)
}

pub async fn active_limit(
    pool: &SqlitePool,
    date: NaiveDate,
    currency: Currency,
) -> LedgerResult<Option<SalesLimit>> {
    let mut conn = pool.acquire().await?;
    active_limit_on(&mut conn, date, currency).await
}

/// Charge a sale against the active limit and raise utilization alerts.
///
/// The update only succeeds while `remaining >= amount`, so two concurrent
/// sales can never overrun the limit together.
pub(crate) async fn record_limit_sale(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    currency: Currency,
    cents: i64,
) -> LedgerResult<SalesLimit> {
    let limit = active_limit_on(conn, date, currency)
        .await?
        .ok_or(SaleRejection::NoLimit { currency, date })?;

    let result = sqlx::query(
        r#"
        UPDATE sales_limits
        SET sold_cents = sold_cents + ?
        WHERE id = ? AND active = 1 AND daily_limit_cents - sold_cents >= ?
        "#,
    )
    .bind(cents)
    .bind(limit.id)
    .bind(cents)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let current = fetch_limit(conn, limit.id).await?;
        return Err(SaleRejection::ExceedsLimit {
            currency,
            date,
            requested: from_cents(cents),
            remaining: current.remaining,
        }
        .into());
    }

    let updated = fetch_limit(conn, limit.id).await?;
    raise_alerts(conn, &updated).await
}

async fn raise_alerts(conn: &mut SqliteConnection, limit: &SalesLimit) -> LedgerResult<SalesLimit> {
    let pct = limit.utilization_pct();
    let fire_95 = pct >= ALERT_95_PCT && !limit.alert_95_sent;
    // Jumping straight past 95 % also marks the 80 % alert as sent
    let fire_80 = pct >= ALERT_80_PCT && !limit.alert_80_sent;

    if !fire_80 && !fire_95 {
        return Ok(limit.clone());
    }

    if fire_95 {
        tracing::warn!(
            currency = %limit.currency,
            date = %limit.date,
            utilization = pct,
            remaining = %limit.remaining,
            "sales limit above 95%"
        );
    } else if fire_80 {
        tracing::warn!(
            currency = %limit.currency,
            date = %limit.date,
            utilization = pct,
            remaining = %limit.remaining,
            "sales limit above 80%"
        );
    }

    sqlx::query(
        "UPDATE sales_limits SET alert_80_sent = (alert_80_sent OR ?), alert_95_sent = (alert_95_sent OR ?) WHERE id = ?",
    )
    .bind(fire_80)
    .bind(fire_95)
    .bind(limit.id)
    .execute(&mut *conn)
    .await?;

    fetch_limit(conn, limit.id).await
}

/// Give back a cancelled sale's share of the active limit
pub(crate) async fn release_limit_sale(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    currency: Currency,
    cents: i64,
) -> LedgerResult<Option<SalesLimit>> {
    let Some(limit) = active_limit_on(conn, date, currency).await? else {
        tracing::warn!(currency = %currency, date = %date, "no active limit to release sale against");
        return Ok(None);
    };

    sqlx::query("UPDATE sales_limits SET sold_cents = MAX(sold_cents - ?, 0) WHERE id = ?")
        .bind(cents)
        .bind(limit.id)
        .execute(&mut *conn)
        .await?;

    fetch_limit(conn, limit.id).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use anyhow::Result;
    use approx::assert_relative_eq;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    #[tokio::test]
    async fn test_configure_and_read_limit() -> Result<()> {
        let pool = create_test_pool().await?;

        assert!(active_limit(&pool, day(), Currency::Usd).await?.is_none());

        let limit = configure_limit(&pool, day(), Currency::Usd, dec("5000")).await?;
        assert_eq!(limit.daily_limit, dec("5000"));
        assert_eq!(limit.sold, Decimal::ZERO);
        assert_eq!(limit.remaining, dec("5000"));
        assert!(limit.active);

        let read = active_limit(&pool, day(), Currency::Usd).await?.unwrap();
        assert_eq!(read.id, limit.id);
        assert!(active_limit(&pool, day(), Currency::Eur).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_configure_rejects_invalid_limits() -> Result<()> {
        let pool = create_test_pool().await?;

        assert!(matches!(
            configure_limit(&pool, day(), Currency::Usd, dec("-1")).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            configure_limit(&pool, day(), Currency::Ves, dec("100")).await,
            Err(LedgerError::Validation(_))
        ));
        // Zero is a valid limit that blocks every sale
        let zero = configure_limit(&pool, day(), Currency::Eur, Decimal::ZERO).await?;
        assert_eq!(zero.remaining, Decimal::ZERO);

        Ok(())
    }

    #[tokio::test]
    async fn test_reconfigure_carries_sold_amount() -> Result<()> {
        let pool = create_test_pool().await?;
        let first = configure_limit(&pool, day(), Currency::Usd, dec("1000")).await?;

        let mut conn = pool.acquire().await?;
        record_limit_sale(&mut conn, day(), Currency::Usd, 30000).await?;
        drop(conn);

        let second = configure_limit(&pool, day(), Currency::Usd, dec("2000")).await?;
        assert_ne!(second.id, first.id);
        assert_eq!(second.sold, dec("300"));
        assert_eq!(second.remaining, dec("1700"));

        let (active_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sales_limits WHERE date = ? AND currency = 'USD' AND active = 1",
        )
        .bind(day())
        .fetch_one(&pool)
        .await?;
        assert_eq!(active_count, 1);

        let below = configure_limit(&pool, day(), Currency::Usd, dec("299.99")).await;
        assert!(matches!(below, Err(LedgerError::Validation(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_record_limit_sale_is_guarded() -> Result<()> {
        let pool = create_test_pool().await?;
        configure_limit(&pool, day(), Currency::Usd, dec("100")).await?;
        let mut conn = pool.acquire().await?;

        let limit = record_limit_sale(&mut conn, day(), Currency::Usd, 6000).await?;
        assert_eq!(limit.remaining, dec("40"));

        let over = record_limit_sale(&mut conn, day(), Currency::Usd, 4001).await;
        match over {
            Err(LedgerError::SaleRejected(SaleRejection::ExceedsLimit { remaining, .. })) => {
                assert_eq!(remaining, dec("40"));
            }
            other => panic!("expected limit rejection, got {:?}", other),
        }

        let exact = record_limit_sale(&mut conn, day(), Currency::Usd, 4000).await?;
        assert_eq!(exact.remaining, Decimal::ZERO);

        let missing = record_limit_sale(&mut conn, day(), Currency::Eur, 1).await;
        assert!(matches!(
            missing,
            Err(LedgerError::SaleRejected(SaleRejection::NoLimit { .. }))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_alerts_fire_once() -> Result<()> {
        let pool = create_test_pool().await?;
        configure_limit(&pool, day(), Currency::Eur, dec("1000")).await?;
        let mut conn = pool.acquire().await?;

        let limit = record_limit_sale(&mut conn, day(), Currency::Eur, 79900).await?;
        assert!(!limit.alert_80_sent);

        let limit = record_limit_sale(&mut conn, day(), Currency::Eur, 100).await?;
        assert_relative_eq!(limit.utilization_pct(), 80.0);
        assert!(limit.alert_80_sent);
        assert!(!limit.alert_95_sent);

        let limit = record_limit_sale(&mut conn, day(), Currency::Eur, 16000).await?;
        assert_relative_eq!(limit.utilization_pct(), 96.0);
        assert!(limit.alert_80_sent);
        assert!(limit.alert_95_sent);

        Ok(())
    }

    #[tokio::test]
    async fn test_jump_past_both_thresholds() -> Result<()> {
        let pool = create_test_pool().await?;
        configure_limit(&pool, day(), Currency::Usdt, dec("100")).await?;
        let mut conn = pool.acquire().await?;

        let limit = record_limit_sale(&mut conn, day(), Currency::Usdt, 10000).await?;
        assert!(limit.alert_80_sent);
        assert!(limit.alert_95_sent);

        Ok(())
    }

    #[tokio::test]
    async fn test_release_limit_sale() -> Result<()> {
        let pool = create_test_pool().await?;
        configure_limit(&pool, day(), Currency::Usd, dec("100")).await?;
        let mut conn = pool.acquire().await?;

        record_limit_sale(&mut conn, day(), Currency::Usd, 5000).await?;
        let released = release_limit_sale(&mut conn, day(), Currency::Usd, 2000)
            .await?
            .unwrap();
        assert_eq!(released.sold, dec("30"));
        assert_eq!(released.remaining, dec("70"));

        assert!(release_limit_sale(&mut conn, day(), Currency::Eur, 100).await?.is_none());

        Ok(())
    }
}
