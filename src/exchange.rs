// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Client purchases and sales of foreign currency.
//!
//! Every conversion captures one quote and applies its single rate to both
//! legs. Purchases draw down the day's remittances and sales limit.

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::QueryBuilder;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool};

use crate::accounts::{BalanceChange, apply_balance_change, balance_cents, require_active_account};
use crate::config::Config;
use crate::db;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{Currency, EntrySide, Transaction, TransactionKind, TransactionStatus};
use crate::money::{from_cents, positive_amount, round_money, to_cents, to_rate_units};
use crate::rates::{self, RateQuote};
use crate::sales::{FifoTake, authorize_on, consume_fifo, reverse_sale};

const TRANSACTION_COLUMNS: &str = "id, account_id, kind, trade_date, source_currency, target_currency, \
     source_amount_cents, target_amount_cents, rate_scaled, commission_cents, receipt, status, \
     created_at, notes";

/// How much a client wants to buy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "in", content = "amount", rename_all = "lowercase")]
pub enum BuyAmount {
    /// Amount of foreign currency to receive
    Foreign(Decimal),
    /// Amount of VES to spend, before commission
    Local(Decimal),
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeResult {
    pub transaction: Transaction,
    pub quote: RateQuote,
    /// VES debited (purchases) or credited (sales), commission included
    pub local_settled: Decimal,
    pub remittances: Vec<FifoTake>,
}

/// Commission on an amount, rounded half-up to cents
pub fn calculate_commission(amount: Decimal, pct: Decimal) -> Decimal {
    round_money(amount * pct)
}

/// Both legs of a conversion at one rate
#[derive(Debug, Clone, Copy, PartialEq)]
struct Pricing {
    foreign: Decimal,
    /// VES before commission
    local: Decimal,
    commission: Decimal,
    /// VES debited on a purchase, credited on a sale
    local_settled: Decimal,
}

fn price_purchase(currency: Currency, amount: BuyAmount, rate: Decimal, pct: Decimal) -> LedgerResult<Pricing> {
    let (foreign, cost) = match amount {
        BuyAmount::Foreign(x) => {
            let foreign = positive_amount(x, "purchase amount")?;
            (foreign, round_money(foreign * rate))
        }
        BuyAmount::Local(v) => {
            let cost = positive_amount(v, "purchase amount")?;
            (round_money(cost / rate), cost)
        }
    };
    if foreign <= Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "{:.2} VES buys less than 0.01 {} at {}",
            cost, currency, rate
        )));
    }
    let commission = calculate_commission(cost, pct);
    Ok(Pricing {
        foreign,
        local: cost,
        commission,
        local_settled: cost + commission,
    })
}

fn price_sale(amount: Decimal, rate: Decimal, pct: Decimal) -> LedgerResult<Pricing> {
    let amount = positive_amount(amount, "sale amount")?;
    let gross = round_money(amount * rate);
    let commission = calculate_commission(gross, pct);
    Ok(Pricing {
        foreign: amount,
        local: gross,
        commission,
        local_settled: gross - commission,
    })
}

/// A conversion to price without executing it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Conversion {
    Buy { currency: Currency, amount: BuyAmount },
    /// `amount` is in the foreign currency
    Sell { currency: Currency, amount: Decimal },
}

/// What a conversion would settle at the current quote
#[derive(Debug, Clone, Serialize)]
pub struct ConversionPreview {
    pub kind: TransactionKind,
    pub currency: Currency,
    pub rate: Decimal,
    /// Foreign currency received on a purchase, net VES received on a sale
    pub converted: Decimal,
    pub commission: Decimal,
    /// VES debited on a purchase, foreign currency debited on a sale
    pub total_debited: Decimal,
    pub quote: RateQuote,
}

/// Price a conversion with the same quote and arithmetic a trade would use.
/// Nothing is written and no stock, limit or balance is checked.
pub async fn preview_conversion(
    pool: &SqlitePool,
    config: &Config,
    conversion: Conversion,
) -> LedgerResult<ConversionPreview> {
    let (kind, currency) = match conversion {
        Conversion::Buy { currency, .. } => (TransactionKind::Buy, currency),
        Conversion::Sell { currency, .. } => (TransactionKind::Sell, currency),
    };
    let currency = currency.ensure_foreign()?;
    let quote = rates::quote(pool, currency, config.rates.spread).await?;

    let (rate, converted, commission, total_debited) = match conversion {
        Conversion::Buy { amount, .. } => {
            let p = price_purchase(currency, amount, quote.buy, config.commissions.buy)?;
            (quote.buy, p.foreign, p.commission, p.local_settled)
        }
        Conversion::Sell { amount, .. } => {
            let p = price_sale(amount, quote.sell, config.commissions.sell)?;
            (quote.sell, p.local_settled, p.commission, p.foreign)
        }
    };

    Ok(ConversionPreview {
        kind,
        currency,
        rate,
        converted,
        commission,
        total_debited,
        quote,
    })
}

/// `{PREFIX}-{YYYYMMDD}-{HHMMSS}-{8 upper hex}`
pub fn generate_receipt<Tz: TimeZone>(kind: TransactionKind, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let short = uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!(
        "{}-{}-{}",
        kind.receipt_prefix(),
        at.format("%Y%m%d-%H%M%S"),
        short
    )
}

async fn unique_receipt(conn: &mut SqliteConnection, kind: TransactionKind) -> LedgerResult<String> {
    let now = Local::now();
    let receipt = generate_receipt(kind, &now);
    let (taken,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions WHERE receipt = ?")
        .bind(&receipt)
        .fetch_one(&mut *conn)
        .await?;
    if taken == 0 {
        return Ok(receipt);
    }
    Ok(format!("{}-{:04}", receipt, now.timestamp() % 10_000))
}

struct NewTransaction<'a> {
    account_id: i64,
    kind: TransactionKind,
    trade_date: NaiveDate,
    source_currency: Currency,
    target_currency: Currency,
    source_cents: i64,
    target_cents: i64,
    rate: Decimal,
    commission_cents: i64,
    receipt: &'a str,
    notes: String,
}

async fn insert_transaction(conn: &mut SqliteConnection, new: NewTransaction<'_>) -> LedgerResult<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO transactions (
            account_id, kind, trade_date, source_currency, target_currency,
            source_amount_cents, target_amount_cents, rate_scaled, commission_cents,
            receipt, status, created_at, notes
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'completed', ?, ?)
        "#,
    )
    .bind(new.account_id)
    .bind(new.kind.as_str())
    .bind(new.trade_date)
    .bind(new.source_currency.as_str())
    .bind(new.target_currency.as_str())
    .bind(new.source_cents)
    .bind(new.target_cents)
    .bind(to_rate_units(new.rate)?)
    .bind(new.commission_cents)
    .bind(new.receipt)
    .bind(db::now())
    .bind(new.notes)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

async fn fetch_transaction(conn: &mut SqliteConnection, id: i64) -> LedgerResult<Transaction> {
    let sql = format!("SELECT {} FROM transactions WHERE id = ?", TRANSACTION_COLUMNS);
    sqlx::query_as::<_, Transaction>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::not_found("transaction", id))
}

pub async fn get_transaction(pool: &SqlitePool, receipt: &str) -> LedgerResult<Transaction> {
    let sql = format!("SELECT {} FROM transactions WHERE receipt = ?", TRANSACTION_COLUMNS);
    sqlx::query_as::<_, Transaction>(&sql)
        .bind(receipt)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| LedgerError::not_found("transaction", receipt))
}

/// All transactions traded on a date, oldest first
pub async fn transactions_on(pool: &SqlitePool, date: NaiveDate) -> LedgerResult<Vec<Transaction>> {
    let sql = format!(
        "SELECT {} FROM transactions WHERE trade_date = ? ORDER BY id ASC",
        TRANSACTION_COLUMNS
    );
    let transactions = sqlx::query_as::<_, Transaction>(&sql)
        .bind(date)
        .fetch_all(pool)
        .await?;
    Ok(transactions)
}

/// Criteria for [`transaction_history`]; unset fields match everything
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub kind: Option<TransactionKind>,
    /// Matches either leg
    pub currency: Option<Currency>,
    pub account_id: Option<i64>,
    pub status: Option<TransactionStatus>,
    pub limit: Option<i64>,
}

/// Transactions matching `filter`, newest first
pub async fn transaction_history(pool: &SqlitePool, filter: &TransactionFilter) -> LedgerResult<Vec<Transaction>> {
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(LedgerError::validation(format!(
                "history range starts {} after it ends {}",
                from, to
            )));
        }
    }

    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM transactions WHERE 1=1",
        TRANSACTION_COLUMNS
    ));
    if let Some(from) = filter.from {
        query.push(" AND trade_date >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        query.push(" AND trade_date <= ").push_bind(to);
    }
    if let Some(kind) = filter.kind {
        query.push(" AND kind = ").push_bind(kind.as_str());
    }
    if let Some(currency) = filter.currency {
        query
            .push(" AND (source_currency = ")
            .push_bind(currency.as_str())
            .push(" OR target_currency = ")
            .push_bind(currency.as_str())
            .push(")");
    }
    if let Some(account_id) = filter.account_id {
        query.push(" AND account_id = ").push_bind(account_id);
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    query.push(" ORDER BY trade_date DESC, id DESC");
    if let Some(limit) = filter.limit {
        query.push(" LIMIT ").push_bind(limit.max(1));
    }

    let transactions = query.build_query_as::<Transaction>().fetch_all(pool).await?;
    Ok(transactions)
}

/// Client buys foreign currency with VES.
///
/// The desk sells from the day's remittances, so the sale must pass the
/// joint stock and limit authorization before anything moves.
pub async fn buy_currency(
    pool: &SqlitePool,
    config: &Config,
    account_id: i64,
    currency: Currency,
    amount: BuyAmount,
    trade_date: NaiveDate,
) -> LedgerResult<TradeResult> {
    let currency = currency.ensure_foreign()?;
    let quote = rates::quote(pool, currency, config.rates.spread).await?;
    let rate = quote.buy;
    let Pricing {
        foreign,
        local: cost,
        commission,
        local_settled: total,
    } = price_purchase(currency, amount, rate, config.commissions.buy)?;

    let mut tx = db::begin_write(pool).await?;
    require_active_account(&mut tx, account_id).await?;

    let ves_balance = balance_cents(&mut tx, account_id, Currency::Ves).await?;
    if ves_balance < to_cents(total)? {
        return Err(LedgerError::InsufficientFunds {
            currency: Currency::Ves,
            balance: from_cents(ves_balance),
            required: total,
        });
    }

    authorize_on(&mut tx, trade_date, currency, foreign).await?;

    let receipt = unique_receipt(&mut tx, TransactionKind::Buy).await?;
    let transaction_id = insert_transaction(
        &mut tx,
        NewTransaction {
            account_id,
            kind: TransactionKind::Buy,
            trade_date,
            source_currency: Currency::Ves,
            target_currency: currency,
            source_cents: to_cents(cost)?,
            target_cents: to_cents(foreign)?,
            rate,
            commission_cents: to_cents(commission)?,
            receipt: &receipt,
            notes: format!("purchase of {} at {}", currency, rate),
        },
    )
    .await?;

    let outcome = consume_fifo(&mut tx, trade_date, currency, foreign, Some(transaction_id)).await?;

    let description = format!("purchase of {} - receipt {}", currency, receipt);
    apply_balance_change(
        &mut tx,
        BalanceChange {
            account_id,
            currency: Currency::Ves,
            side: EntrySide::Debit,
            cents: to_cents(total)?,
            description: &description,
            transaction_id: Some(transaction_id),
        },
    )
    .await?;
    apply_balance_change(
        &mut tx,
        BalanceChange {
            account_id,
            currency,
            side: EntrySide::Credit,
            cents: to_cents(foreign)?,
            description: &description,
            transaction_id: Some(transaction_id),
        },
    )
    .await?;

    let transaction = fetch_transaction(&mut tx, transaction_id).await?;
    tx.commit().await?;

    tracing::info!(
        receipt = %transaction.receipt,
        account_id,
        currency = %currency,
        foreign = %foreign,
        cost = %cost,
        commission = %commission,
        rate = %rate,
        "purchase completed"
    );

    Ok(TradeResult {
        transaction,
        quote,
        local_settled: total,
        remittances: outcome.takes,
    })
}

/// Client sells foreign currency for VES
pub async fn sell_currency(
    pool: &SqlitePool,
    config: &Config,
    account_id: i64,
    currency: Currency,
    amount: Decimal,
    trade_date: NaiveDate,
) -> LedgerResult<TradeResult> {
    let currency = currency.ensure_foreign()?;
    let amount = positive_amount(amount, "sale amount")?;
    let quote = rates::quote(pool, currency, config.rates.spread).await?;
    let rate = quote.sell;
    let Pricing {
        local: gross,
        commission,
        local_settled: net,
        ..
    } = price_sale(amount, rate, config.commissions.sell)?;

    let mut tx = db::begin_write(pool).await?;
    require_active_account(&mut tx, account_id).await?;

    let foreign_balance = balance_cents(&mut tx, account_id, currency).await?;
    if foreign_balance < to_cents(amount)? {
        return Err(LedgerError::InsufficientFunds {
            currency,
            balance: from_cents(foreign_balance),
            required: amount,
        });
    }

    let receipt = unique_receipt(&mut tx, TransactionKind::Sell).await?;
    let transaction_id = insert_transaction(
        &mut tx,
        NewTransaction {
            account_id,
            kind: TransactionKind::Sell,
            trade_date,
            source_currency: currency,
            target_currency: Currency::Ves,
            source_cents: to_cents(amount)?,
            target_cents: to_cents(gross)?,
            rate,
            commission_cents: to_cents(commission)?,
            receipt: &receipt,
            notes: format!("sale of {} at {}", currency, rate),
        },
    )
    .await?;

    let description = format!("sale of {} - receipt {}", currency, receipt);
    apply_balance_change(
        &mut tx,
        BalanceChange {
            account_id,
            currency,
            side: EntrySide::Debit,
            cents: to_cents(amount)?,
            description: &description,
            transaction_id: Some(transaction_id),
        },
    )
    .await?;
    apply_balance_change(
        &mut tx,
        BalanceChange {
            account_id,
            currency: Currency::Ves,
            side: EntrySide::Credit,
            cents: to_cents(net)?,
            description: &description,
            transaction_id: Some(transaction_id),
        },
    )
    .await?;

    let transaction = fetch_transaction(&mut tx, transaction_id).await?;
    tx.commit().await?;

    tracing::info!(
        receipt = %transaction.receipt,
        account_id,
        currency = %currency,
        amount = %amount,
        net = %net,
        commission = %commission,
        rate = %rate,
        "sale completed"
    );

    Ok(TradeResult {
        transaction,
        quote,
        local_settled: net,
        remittances: Vec::new(),
    })
}

/// Reverse a completed transaction.
///
/// Balances are restored and, for purchases, the consumed stock goes back
/// to its remittances and the sales limit is released.
pub async fn cancel_transaction(pool: &SqlitePool, receipt: &str) -> LedgerResult<Transaction> {
    let transaction = get_transaction(pool, receipt).await?;
    if transaction.status == TransactionStatus::Cancelled {
        return Err(LedgerError::Conflict(format!(
            "transaction {} is already cancelled",
            receipt
        )));
    }

    let mut tx = db::begin_write(pool).await?;
    let description = format!("cancellation of {}", receipt);
    let account_id = transaction.account_id;

    // Debit first so a client who already spent the funds blocks the reversal
    let (debit_currency, debit, credit_currency, credit) = match transaction.kind {
        TransactionKind::Buy => (
            transaction.target_currency,
            transaction.target_amount,
            Currency::Ves,
            transaction.source_amount + transaction.commission,
        ),
        TransactionKind::Sell => (
            Currency::Ves,
            transaction.target_amount - transaction.commission,
            transaction.source_currency,
            transaction.source_amount,
        ),
    };

    for (currency, amount, side) in [
        (debit_currency, debit, EntrySide::Debit),
        (credit_currency, credit, EntrySide::Credit),
    ] {
        apply_balance_change(
            &mut tx,
            BalanceChange {
                account_id,
                currency,
                side,
                cents: to_cents(amount)?,
                description: &description,
                transaction_id: Some(transaction.id),
            },
        )
        .await?;
    }

    if transaction.kind == TransactionKind::Buy {
        reverse_sale(
            &mut tx,
            transaction.id,
            transaction.trade_date,
            transaction.target_currency,
        )
        .await?;
    }

    let result = sqlx::query("UPDATE transactions SET status = 'cancelled' WHERE id = ? AND status = 'completed'")
        .bind(transaction.id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(LedgerError::Conflict(format!(
            "transaction {} changed during cancellation",
            receipt
        )));
    }

    let cancelled = fetch_transaction(&mut tx, transaction.id).await?;
    tx.commit().await?;

    tracing::info!(receipt, kind = transaction.kind.as_str(), "transaction cancelled");
    Ok(cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_calculate_commission_is_half_up() {
        assert_eq!(calculate_commission(dec("1000"), dec("0.005")), dec("5.00"));
        assert_eq!(calculate_commission(dec("101"), dec("0.005")), dec("0.51"));
        assert_eq!(calculate_commission(dec("100.9"), dec("0.005")), dec("0.50"));
        assert_eq!(calculate_commission(dec("100"), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_receipt_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 5, 7).unwrap();
        let receipt = generate_receipt(TransactionKind::Buy, &at);
        assert!(receipt.starts_with("COMP-20250314-090507-"), "{}", receipt);

        let suffix = receipt.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));

        let sale = generate_receipt(TransactionKind::Sell, &at);
        assert!(sale.starts_with("VENT-"));
        assert_ne!(receipt, generate_receipt(TransactionKind::Buy, &at));
    }

    #[test]
    fn test_buy_amount_json_shape() {
        let parsed: BuyAmount = serde_json::from_str(r#"{"in":"local","amount":"3650"}"#).unwrap();
        assert_eq!(parsed, BuyAmount::Local(dec("3650")));
        let parsed: BuyAmount = serde_json::from_str(r#"{"in":"foreign","amount":"100"}"#).unwrap();
        assert_eq!(parsed, BuyAmount::Foreign(dec("100")));
    }

    #[test]
    fn test_purchase_and_sale_pricing() {
        let pct = dec("0.005");

        let bought = price_purchase(Currency::Usd, BuyAmount::Foreign(dec("220")), dec("36.792"), pct).unwrap();
        assert_eq!(bought.local, dec("8094.24"));
        assert_eq!(bought.commission, dec("40.47"));
        assert_eq!(bought.local_settled, dec("8134.71"));

        let by_local = price_purchase(Currency::Usd, BuyAmount::Local(dec("3679.20")), dec("36.792"), pct).unwrap();
        assert_eq!(by_local.foreign, dec("100.00"));

        let tiny = price_purchase(Currency::Usd, BuyAmount::Local(dec("0.10")), dec("36.792"), pct);
        assert!(matches!(tiny, Err(LedgerError::Validation(_))));

        let sold = price_sale(dec("100"), dec("36.208"), pct).unwrap();
        assert_eq!(sold.local, dec("3620.80"));
        assert_eq!(sold.commission, dec("18.10"));
        assert_eq!(sold.local_settled, dec("3602.70"));
        assert!(price_sale(Decimal::ZERO, dec("36.208"), pct).is_err());
    }

    #[test]
    fn test_conversion_json_shape() {
        let parsed: Conversion = serde_json::from_str(
            r#"{"kind":"buy","currency":"usd","amount":{"in":"foreign","amount":"10"}}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            Conversion::Buy {
                currency: Currency::Usd,
                amount: BuyAmount::Foreign(dec("10"))
            }
        );
        let parsed: Conversion =
            serde_json::from_str(r#"{"kind":"sell","currency":"EUR","amount":"5.5"}"#).unwrap();
        assert_eq!(
            parsed,
            Conversion::Sell {
                currency: Currency::Eur,
                amount: dec("5.5")
            }
        );
    }

    #[tokio::test]
    async fn test_preview_matches_trade_and_writes_nothing() -> anyhow::Result<()> {
        let pool = db::create_test_pool().await?;
        let config = Config::default();
        rates::store_rate(&pool, Currency::Usd, dec("36.50"), "manual", db::now()).await?;

        let preview = preview_conversion(
            &pool,
            &config,
            Conversion::Buy {
                currency: Currency::Usd,
                amount: BuyAmount::Foreign(dec("220")),
            },
        )
        .await?;
        assert_eq!(preview.kind, TransactionKind::Buy);
        assert_eq!(preview.rate, dec("36.792"));
        assert_eq!(preview.converted, dec("220"));
        assert_eq!(preview.commission, dec("40.47"));
        assert_eq!(preview.total_debited, dec("8134.71"));

        let preview = preview_conversion(
            &pool,
            &config,
            Conversion::Sell {
                currency: Currency::Usd,
                amount: dec("100"),
            },
        )
        .await?;
        assert_eq!(preview.rate, dec("36.208"));
        assert_eq!(preview.converted, dec("3602.70"));
        assert_eq!(preview.total_debited, dec("100"));

        let missing = preview_conversion(
            &pool,
            &config,
            Conversion::Sell {
                currency: Currency::Eur,
                amount: dec("1"),
            },
        )
        .await;
        assert!(matches!(missing, Err(LedgerError::NoRate(Currency::Eur))));

        let local = preview_conversion(
            &pool,
            &config,
            Conversion::Buy {
                currency: Currency::Ves,
                amount: BuyAmount::Foreign(dec("1")),
            },
        )
        .await;
        assert!(matches!(local, Err(LedgerError::Validation(_))));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
            .fetch_one(&pool)
            .await?;
        assert_eq!(count, 0);
        Ok(())
    }
}
