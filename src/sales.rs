// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Sale authorization and FIFO consumption of remittances.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::db;
use crate::error::{LedgerError, LedgerResult, SaleRejection};
use crate::limits::{self, active_limit_on};
use crate::models::{Currency, MovementKind, Remittance, SalesLimit};
use crate::money::{from_cents, round_money, to_cents};
use crate::remittances::{
    MovementRecord, active_remittances_on, record_movement, return_to_remittance,
    total_available_on,
};

/// Stock and limit state at the moment a sale was approved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleAuthorization {
    pub date: NaiveDate,
    pub currency: Currency,
    pub amount: Decimal,
    pub available: Decimal,
    pub daily_limit: Decimal,
    pub sold: Decimal,
    pub remaining: Decimal,
}

/// Portion of a sale served by one remittance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FifoTake {
    pub remittance_id: i64,
    pub amount: Decimal,
    pub available_before: Decimal,
}

impl FifoTake {
    pub fn available_after(&self) -> Decimal {
        self.available_before - self.amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("requested {requested:.2} but only {available:.2} is available")]
pub struct FifoShortfall {
    pub requested: Decimal,
    pub available: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaleOutcome {
    pub takes: Vec<FifoTake>,
    pub limit: SalesLimit,
}

/// Split `amount` over remittances in the order given, oldest first.
///
/// Remittances without positive availability are skipped. The plan is
/// all-or-nothing: a shortfall returns an error and no partial plan.
pub fn plan_fifo(remittances: &[Remittance], amount: Decimal) -> Result<Vec<FifoTake>, FifoShortfall> {
    let amount = round_money(amount);
    let mut pending = amount;
    let mut plan = Vec::new();

    for remittance in remittances {
        if pending <= Decimal::ZERO {
            break;
        }
        if !remittance.active || remittance.available <= Decimal::ZERO {
            continue;
        }
        let take = pending.min(remittance.available);
        plan.push(FifoTake {
            remittance_id: remittance.id,
            amount: take,
            available_before: remittance.available,
        });
        pending -= take;
    }

    if pending > Decimal::ZERO {
        let available = remittances
            .iter()
            .filter(|r| r.active && r.available > Decimal::ZERO)
            .map(|r| r.available)
            .sum();
        return Err(FifoShortfall {
            requested: amount,
            available,
        });
    }

    Ok(plan)
}

pub(crate) async fn authorize_on(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    currency: Currency,
    amount: Decimal,
) -> LedgerResult<SaleAuthorization> {
    let currency = currency.ensure_foreign()?;
    let amount = round_money(amount);
    if amount <= Decimal::ZERO {
        return Err(SaleRejection::NonPositiveAmount.into());
    }

    let available = total_available_on(conn, date, currency).await?;
    if amount > available {
        return Err(SaleRejection::ExceedsAvailable {
            currency,
            date,
            requested: amount,
            available,
        }
        .into());
    }

    let limit = active_limit_on(conn, date, currency)
        .await?
        .ok_or(SaleRejection::NoLimit { currency, date })?;
    if amount > limit.remaining {
        return Err(SaleRejection::ExceedsLimit {
            currency,
            date,
            requested: amount,
            remaining: limit.remaining,
        }
        .into());
    }

    Ok(SaleAuthorization {
        date,
        currency,
        amount,
        available,
        daily_limit: limit.daily_limit,
        sold: limit.sold,
        remaining: limit.remaining,
    })
}

/// Check that a sale fits both the day's remittance stock and the daily limit
pub async fn authorize_sale(
    pool: &SqlitePool,
    date: NaiveDate,
    currency: Currency,
    amount: Decimal,
) -> LedgerResult<SaleAuthorization> {
    let mut conn = pool.acquire().await?;
    let result = authorize_on(&mut conn, date, currency, amount).await;
    if let Err(LedgerError::SaleRejected(rejection)) = &result {
        tracing::info!(currency = %currency, date = %date, reason = %rejection, "sale rejected");
    }
    result
}

/// Apply a sale to the ledger inside the caller's transaction.
///
/// Every remittance update is guarded on its availability; if a concurrent
/// sale got there first the whole sale fails and the caller rolls back.
pub async fn consume_fifo(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    currency: Currency,
    amount: Decimal,
    transaction_id: Option<i64>,
) -> LedgerResult<SaleOutcome> {
    let remittances = active_remittances_on(conn, date, currency).await?;
    let plan = plan_fifo(&remittances, amount).map_err(|shortfall| SaleRejection::ExceedsAvailable {
        currency,
        date,
        requested: shortfall.requested,
        available: shortfall.available,
    })?;

    let mut total_cents = 0;
    for take in &plan {
        let cents = to_cents(take.amount)?;
        let result = sqlx::query(
            r#"
            UPDATE remittances
            SET sold_cents = sold_cents + ?
            WHERE id = ? AND active = 1 AND received_cents - sold_cents >= ?
            "#,
        )
        .bind(cents)
        .bind(take.remittance_id)
        .bind(cents)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::Conflict(format!(
                "remittance {} changed during the sale; retry",
                take.remittance_id
            )));
        }

        let description = match transaction_id {
            Some(id) => format!("sale of {:.2} {} (transaction {})", take.amount, currency, id),
            None => format!("sale of {:.2} {}", take.amount, currency),
        };
        let before = to_cents(take.available_before)?;
        record_movement(
            conn,
            MovementRecord {
                remittance_id: take.remittance_id,
                kind: MovementKind::Sale,
                amount_cents: cents,
                available_before_cents: before,
                available_after_cents: before - cents,
                transaction_id,
                description: &description,
            },
        )
        .await?;
        total_cents += cents;
    }

    let limit = limits::record_limit_sale(conn, date, currency, total_cents).await?;

    Ok(SaleOutcome { takes: plan, limit })
}

/// Authorize and consume in one database transaction
pub async fn execute_sale(
    pool: &SqlitePool,
    date: NaiveDate,
    currency: Currency,
    amount: Decimal,
    transaction_id: Option<i64>,
) -> LedgerResult<SaleOutcome> {
    let mut tx = db::begin_write(pool).await?;
    authorize_on(&mut tx, date, currency, amount).await?;
    let outcome = consume_fifo(&mut tx, date, currency, amount, transaction_id).await?;
    tx.commit().await?;

    tracing::info!(
        currency = %currency,
        date = %date,
        amount = %round_money(amount),
        remittances = outcome.takes.len(),
        limit_remaining = %outcome.limit.remaining,
        "sale executed"
    );

    Ok(outcome)
}

/// Undo the FIFO consumption of a transaction: stock goes back to the
/// remittances it came from and the limit is released
pub(crate) async fn reverse_sale(
    conn: &mut SqliteConnection,
    transaction_id: i64,
    date: NaiveDate,
    currency: Currency,
) -> LedgerResult<Decimal> {
    let takes: Vec<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT remittance_id, amount_cents
        FROM remittance_movements
        WHERE transaction_id = ? AND kind = 'SALE'
        ORDER BY id ASC
        "#,
    )
    .bind(transaction_id)
    .fetch_all(&mut *conn)
    .await?;

    let description = format!("return from cancelled transaction {}", transaction_id);
    let mut total_cents = 0;
    for (remittance_id, cents) in takes {
        return_to_remittance(conn, remittance_id, cents, transaction_id, &description).await?;
        total_cents += cents;
    }

    if total_cents > 0 {
        limits::release_limit_sale(conn, date, currency, total_cents).await?;
    }

    Ok(from_cents(total_cents))
}
