// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Daily remittance ledger.
//!
//! A remittance stores only what was received and what has been sold;
//! availability is always derived as `received - sold`. Every change to a
//! remittance writes one row to `remittance_movements`.

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::db;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{Currency, MovementKind, Remittance, RemittanceMovement};
use crate::money::{from_cents, positive_amount, round_money, to_cents};

const REMITTANCE_COLUMNS: &str = "id, date, currency, received_cents, sold_cents, source, \
     reference, notes, active, registered_at";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRemittance {
    pub date: NaiveDate,
    pub currency: Currency,
    pub amount: Decimal,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentDirection {
    Increase,
    Decrease,
}

/// Movement about to be written to the ledger
pub(crate) struct MovementRecord<'a> {
    pub remittance_id: i64,
    pub kind: MovementKind,
    pub amount_cents: i64,
    pub available_before_cents: i64,
    pub available_after_cents: i64,
    pub transaction_id: Option<i64>,
    pub description: &'a str,
}

pub(crate) async fn record_movement(
    conn: &mut SqliteConnection,
    movement: MovementRecord<'_>,
) -> LedgerResult<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO remittance_movements (
            remittance_id, kind, amount_cents, available_before_cents,
            available_after_cents, transaction_id, description, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(movement.remittance_id)
    .bind(movement.kind.as_str())
    .bind(movement.amount_cents)
    .bind(movement.available_before_cents)
    .bind(movement.available_after_cents)
    .bind(movement.transaction_id)
    .bind(movement.description)
    .bind(db::now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub(crate) async fn fetch_remittance(conn: &mut SqliteConnection, id: i64) -> LedgerResult<Remittance> {
    let sql = format!("SELECT {} FROM remittances WHERE id = ?", REMITTANCE_COLUMNS);
    sqlx::query_as::<_, Remittance>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::not_found("remittance", id))
}

/// Active remittances of a day in insertion (FIFO) order
pub(crate) async fn active_remittances_on(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    currency: Currency,
) -> LedgerResult<Vec<Remittance>> {
    let sql = format!(
        "SELECT {} FROM remittances WHERE date = ? AND currency = ? AND active = 1 ORDER BY id ASC",
        REMITTANCE_COLUMNS
    );
    let remittances = sqlx::query_as::<_, Remittance>(&sql)
        .bind(date)
        .bind(currency.as_str())
        .fetch_all(&mut *conn)
        .await?;

    Ok(remittances)
}

pub(crate) async fn total_available_on(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    currency: Currency,
) -> LedgerResult<Decimal> {
    let (cents,): (i64,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(received_cents - sold_cents), 0)
        FROM remittances
        WHERE date = ? AND currency = ? AND active = 1
        "#,
    )
    .bind(date)
    .bind(currency.as_str())
    .fetch_one(&mut *conn)
    .await?;

    Ok(from_cents(cents))
}

/// Register a received remittance and its reception movement
pub async fn register_remittance(pool: &SqlitePool, new: &NewRemittance) -> LedgerResult<Remittance> {
    let currency = new.currency.ensure_foreign()?;
    let amount = positive_amount(new.amount, "remittance amount")?;
    let cents = to_cents(amount)?;

    let mut tx = db::begin_write(pool).await?;

    let id = sqlx::query(
        r#"
        INSERT INTO remittances (
            date, currency, received_cents, sold_cents, source, reference, notes,
            active, registered_at
        )
        VALUES (?, ?, ?, 0, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(new.date)
    .bind(currency.as_str())
    .bind(cents)
    .bind(&new.source)
    .bind(&new.reference)
    .bind(&new.notes)
    .bind(db::now())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    let description = format!(
        "remittance received from {}",
        new.source.as_deref().unwrap_or("N/A")
    );
    record_movement(
        &mut tx,
        MovementRecord {
            remittance_id: id,
            kind: MovementKind::Reception,
            amount_cents: cents,
            available_before_cents: 0,
            available_after_cents: cents,
            transaction_id: None,
            description: &description,
        },
    )
    .await?;

    let remittance = fetch_remittance(&mut tx, id).await?;
    tx.commit().await?;

    tracing::info!(
        remittance_id = id,
        currency = %currency,
        date = %new.date,
        amount = %amount,
        "remittance registered"
    );

    Ok(remittance)
}

pub async fn get_remittance(pool: &SqlitePool, id: i64) -> LedgerResult<Remittance> {
    let mut conn = pool.acquire().await?;
    fetch_remittance(&mut conn, id).await
}

pub async fn active_remittances(
    pool: &SqlitePool,
    date: NaiveDate,
    currency: Currency,
) -> LedgerResult<Vec<Remittance>> {
    let mut conn = pool.acquire().await?;
    active_remittances_on(&mut conn, date, currency).await
}

/// Sum of `available` over the active remittances of a day
pub async fn total_available(
    pool: &SqlitePool,
    date: NaiveDate,
    currency: Currency,
) -> LedgerResult<Decimal> {
    let mut conn = pool.acquire().await?;
    total_available_on(&mut conn, date, currency).await
}

/// All remittances of a day, active or not, optionally for one currency
pub async fn list_remittances(
    pool: &SqlitePool,
    date: NaiveDate,
    currency: Option<Currency>,
) -> LedgerResult<Vec<Remittance>> {
    let sql = format!(
        "SELECT {} FROM remittances WHERE date = ? AND (? IS NULL OR currency = ?) \
         ORDER BY currency, id",
        REMITTANCE_COLUMNS
    );
    let code = currency.map(|c| c.as_str());
    let remittances = sqlx::query_as::<_, Remittance>(&sql)
        .bind(date)
        .bind(code)
        .bind(code)
        .fetch_all(pool)
        .await?;

    Ok(remittances)
}

/// Correct the received amount of a remittance.
///
/// A decrease can never take more than what is still available.
pub async fn adjust_remittance(
    pool: &SqlitePool,
    id: i64,
    direction: AdjustmentDirection,
    amount: Decimal,
    reason: &str,
) -> LedgerResult<Remittance> {
    let amount = positive_amount(amount, "adjustment amount")?;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LedgerError::validation("an adjustment needs a reason"));
    }
    let cents = to_cents(amount)?;

    let mut tx = db::begin_write(pool).await?;
    let remittance = fetch_remittance(&mut tx, id).await?;
    if !remittance.active {
        return Err(LedgerError::Conflict(format!(
            "remittance {} is inactive",
            id
        )));
    }

    let before = to_cents(remittance.available)?;
    let (delta, label) = match direction {
        AdjustmentDirection::Increase => (cents, "increase"),
        AdjustmentDirection::Decrease => {
            if cents > before {
                return Err(LedgerError::validation(format!(
                    "decrease of {:.2} {} exceeds available {:.2} {}",
                    amount, remittance.currency, remittance.available, remittance.currency
                )));
            }
            (-cents, "decrease")
        }
    };

    sqlx::query("UPDATE remittances SET received_cents = received_cents + ? WHERE id = ?")
        .bind(delta)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let description = format!("manual adjustment ({}): {}", label, reason);
    record_movement(
        &mut tx,
        MovementRecord {
            remittance_id: id,
            kind: MovementKind::Adjustment,
            amount_cents: delta,
            available_before_cents: before,
            available_after_cents: before + delta,
            transaction_id: None,
            description: &description,
        },
    )
    .await?;

    let updated = fetch_remittance(&mut tx, id).await?;
    tx.commit().await?;

    tracing::info!(remittance_id = id, delta = %from_cents(delta), reason, "remittance adjusted");
    Ok(updated)
}

/// Inactive remittances are ignored by availability and FIFO consumption
pub async fn set_remittance_active(
    pool: &SqlitePool,
    id: i64,
    active: bool,
) -> LedgerResult<Remittance> {
    let result = sqlx::query("UPDATE remittances SET active = ? WHERE id = ?")
        .bind(active)
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(LedgerError::not_found("remittance", id));
    }
    get_remittance(pool, id).await
}

pub async fn deactivate_remittance(pool: &SqlitePool, id: i64) -> LedgerResult<Remittance> {
    let remittance = set_remittance_active(pool, id, false).await?;
    tracing::info!(remittance_id = id, "remittance deactivated");
    Ok(remittance)
}

/// Give back stock taken by a sale, recording a `RETURN` movement
pub(crate) async fn return_to_remittance(
    conn: &mut SqliteConnection,
    remittance_id: i64,
    cents: i64,
    transaction_id: i64,
    description: &str,
) -> LedgerResult<()> {
    let remittance = fetch_remittance(conn, remittance_id).await?;
    let before = to_cents(remittance.available)?;

    let result = sqlx::query(
        "UPDATE remittances SET sold_cents = sold_cents - ? WHERE id = ? AND sold_cents >= ?",
    )
    .bind(cents)
    .bind(remittance_id)
    .bind(cents)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(LedgerError::Conflict(format!(
            "remittance {} has sold less than {:.2} to return",
            remittance_id,
            from_cents(cents)
        )));
    }

    record_movement(
        conn,
        MovementRecord {
            remittance_id,
            kind: MovementKind::Return,
            amount_cents: cents,
            available_before_cents: before,
            available_after_cents: before + cents,
            transaction_id: Some(transaction_id),
            description,
        },
    )
    .await?;

    Ok(())
}

pub async fn movements(pool: &SqlitePool, remittance_id: i64) -> LedgerResult<Vec<RemittanceMovement>> {
    let movements = sqlx::query_as::<_, RemittanceMovement>(
        r#"
        SELECT id, remittance_id, kind, amount_cents, available_before_cents,
               available_after_cents, transaction_id, description, created_at
        FROM remittance_movements
        WHERE remittance_id = ?
        ORDER BY id ASC
        "#,
    )
    .bind(remittance_id)
    .fetch_all(pool)
    .await?;

    Ok(movements)
}

/// Movements recorded between two dates (inclusive), newest first, capped at 100
pub async fn movements_between(
    pool: &SqlitePool,
    from: NaiveDate,
    to: NaiveDate,
    currency: Option<Currency>,
) -> LedgerResult<Vec<RemittanceMovement>> {
    if from > to {
        return Err(LedgerError::validation(format!(
            "date range is inverted: {} > {}",
            from, to
        )));
    }
    let start = from.and_time(NaiveTime::MIN).and_utc();
    let end = to
        .succ_opt()
        .unwrap_or(to)
        .and_time(NaiveTime::MIN)
        .and_utc();
    let code = currency.map(|c| c.as_str());

    let movements = sqlx::query_as::<_, RemittanceMovement>(
        r#"
        SELECT m.id, m.remittance_id, m.kind, m.amount_cents, m.available_before_cents,
               m.available_after_cents, m.transaction_id, m.description, m.created_at
        FROM remittance_movements m
        JOIN remittances r ON r.id = m.remittance_id
        WHERE m.created_at >= ? AND m.created_at < ?
          AND (? IS NULL OR r.currency = ?)
        ORDER BY m.created_at DESC, m.id DESC
        LIMIT 100
        "#,
    )
    .bind(start)
    .bind(end)
    .bind(code)
    .bind(code)
    .fetch_all(pool)
    .await?;

    Ok(movements)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemittanceStats {
    pub currency: Currency,
    pub total_received: Decimal,
    pub total_sold: Decimal,
    pub available: Decimal,
    pub days_with_remittances: i64,
    pub daily_average: Decimal,
}

/// Totals over a date range, e.g. the current month
pub async fn monthly_stats(
    pool: &SqlitePool,
    currency: Currency,
    from: NaiveDate,
    to: NaiveDate,
) -> LedgerResult<RemittanceStats> {
    let (received, sold, days): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(received_cents), 0),
               COALESCE(SUM(sold_cents), 0),
               COUNT(DISTINCT date)
        FROM remittances
        WHERE currency = ? AND date >= ? AND date <= ?
        "#,
    )
    .bind(currency.as_str())
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;

    let total_received = from_cents(received);
    let daily_average = if days > 0 {
        round_money(total_received / Decimal::from(days))
    } else {
        Decimal::ZERO
    };

    Ok(RemittanceStats {
        currency,
        total_received,
        total_sold: from_cents(sold),
        available: from_cents(received - sold),
        days_with_remittances: days,
        daily_average,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use anyhow::Result;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn usd(amount: &str) -> NewRemittance {
        NewRemittance {
            date: day(),
            currency: Currency::Usd,
            amount: dec(amount),
            source: Some("Correspondent A".to_string()),
            reference: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_register_records_reception() -> Result<()> {
        let pool = create_test_pool().await?;

        let remittance = register_remittance(&pool, &usd("1500.50")).await?;
        assert_eq!(remittance.received, dec("1500.50"));
        assert_eq!(remittance.sold, Decimal::ZERO);
        assert_eq!(remittance.available, dec("1500.50"));
        assert!(remittance.active);

        let history = movements(&pool, remittance.id).await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, MovementKind::Reception);
        assert_eq!(history[0].available_before, Decimal::ZERO);
        assert_eq!(history[0].available_after, dec("1500.50"));

        Ok(())
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() -> Result<()> {
        let pool = create_test_pool().await?;

        let mut zero = usd("0");
        assert!(matches!(
            register_remittance(&pool, &zero).await,
            Err(LedgerError::Validation(_))
        ));

        zero.amount = dec("10");
        zero.currency = Currency::Ves;
        assert!(matches!(
            register_remittance(&pool, &zero).await,
            Err(LedgerError::Validation(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_total_available_sums_active_remittances_only() -> Result<()> {
        let pool = create_test_pool().await?;

        let first = register_remittance(&pool, &usd("100")).await?;
        register_remittance(&pool, &usd("250.25")).await?;
        let mut eur = usd("999");
        eur.currency = Currency::Eur;
        register_remittance(&pool, &eur).await?;

        assert_eq!(total_available(&pool, day(), Currency::Usd).await?, dec("350.25"));

        deactivate_remittance(&pool, first.id).await?;
        assert_eq!(total_available(&pool, day(), Currency::Usd).await?, dec("250.25"));

        let active = active_remittances(&pool, day(), Currency::Usd).await?;
        assert_eq!(active.len(), 1);

        let all = list_remittances(&pool, day(), Some(Currency::Usd)).await?;
        assert_eq!(all.len(), 2);
        let everything = list_remittances(&pool, day(), None).await?;
        assert_eq!(everything.len(), 3);

        let other_day = day().succ_opt().unwrap();
        assert_eq!(total_available(&pool, other_day, Currency::Usd).await?, Decimal::ZERO);

        Ok(())
    }

    #[tokio::test]
    async fn test_active_remittances_are_in_insertion_order() -> Result<()> {
        let pool = create_test_pool().await?;

        let a = register_remittance(&pool, &usd("300")).await?;
        let b = register_remittance(&pool, &usd("100")).await?;
        let c = register_remittance(&pool, &usd("200")).await?;

        let ids: Vec<i64> = active_remittances(&pool, day(), Currency::Usd)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);

        Ok(())
    }

    #[tokio::test]
    async fn test_adjustments() -> Result<()> {
        let pool = create_test_pool().await?;
        let remittance = register_remittance(&pool, &usd("100")).await?;

        let increased =
            adjust_remittance(&pool, remittance.id, AdjustmentDirection::Increase, dec("25"), "recount").await?;
        assert_eq!(increased.received, dec("125"));
        assert_eq!(increased.available, dec("125"));

        let decreased =
            adjust_remittance(&pool, remittance.id, AdjustmentDirection::Decrease, dec("125"), "damaged notes")
                .await?;
        assert_eq!(decreased.available, Decimal::ZERO);

        let too_much =
            adjust_remittance(&pool, remittance.id, AdjustmentDirection::Decrease, dec("0.01"), "oops").await;
        assert!(matches!(too_much, Err(LedgerError::Validation(_))));

        let no_reason =
            adjust_remittance(&pool, remittance.id, AdjustmentDirection::Increase, dec("1"), "  ").await;
        assert!(matches!(no_reason, Err(LedgerError::Validation(_))));

        let history = movements(&pool, remittance.id).await?;
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].kind, MovementKind::Adjustment);
        assert_eq!(history[1].amount, dec("25"));
        assert_eq!(history[2].amount, dec("-125"));
        assert_eq!(history[2].available_after, Decimal::ZERO);

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_remittance() -> Result<()> {
        let pool = create_test_pool().await?;
        assert!(matches!(
            get_remittance(&pool, 42).await,
            Err(LedgerError::NotFound { .. })
        ));
        assert!(matches!(
            set_remittance_active(&pool, 42, false).await,
            Err(LedgerError::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_movements_between_filters_by_currency() -> Result<()> {
        let pool = create_test_pool().await?;
        register_remittance(&pool, &usd("10")).await?;
        let mut eur = usd("20");
        eur.currency = Currency::Eur;
        register_remittance(&pool, &eur).await?;

        let today = db::now().date_naive();
        let all = movements_between(&pool, today, today, None).await?;
        assert_eq!(all.len(), 2);

        let only_eur = movements_between(&pool, today, today, Some(Currency::Eur)).await?;
        assert_eq!(only_eur.len(), 1);
        assert_eq!(only_eur[0].amount, dec("20"));

        assert!(movements_between(&pool, today, today.pred_opt().unwrap(), None).await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_monthly_stats() -> Result<()> {
        let pool = create_test_pool().await?;
        register_remittance(&pool, &usd("100")).await?;
        register_remittance(&pool, &usd("50")).await?;
        let mut next_day = usd("150");
        next_day.date = day().succ_opt().unwrap();
        register_remittance(&pool, &next_day).await?;

        let stats = monthly_stats(
            &pool,
            Currency::Usd,
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
        )
        .await?;

        assert_eq!(stats.total_received, dec("300"));
        assert_eq!(stats.total_sold, Decimal::ZERO);
        assert_eq!(stats.available, dec("300"));
        assert_eq!(stats.days_with_remittances, 2);
        assert_eq!(stats.daily_average, dec("150"));

        let empty = monthly_stats(&pool, Currency::Eur, day(), day()).await?;
        assert_eq!(empty.days_with_remittances, 0);
        assert_eq!(empty.daily_average, Decimal::ZERO);

        Ok(())
    }
}
