// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, de};
use sqlx::{FromRow, Row, sqlite::SqliteRow};
use std::fmt;
use std::str::FromStr;

use crate::error::{LedgerError, LedgerResult};
use crate::money::{from_cents, from_rate_units};

/// Currencies handled by the desk. VES is the local currency.
///
/// Serialized as the upper-case code; deserialized through `FromStr`, so
/// `"usd"` and `" Usd "` are accepted like the CLI accepts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Ves,
    Usd,
    Eur,
    Usdt,
}

impl Currency {
    pub const LOCAL: Currency = Currency::Ves;
    pub const FOREIGN: [Currency; 3] = [Currency::Usd, Currency::Eur, Currency::Usdt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Ves => "VES",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Usdt => "USDT",
        }
    }

    pub fn is_foreign(&self) -> bool {
        *self != Currency::LOCAL
    }

    /// Remittances, limits and rates only exist for foreign currencies
    pub fn ensure_foreign(self) -> LedgerResult<Self> {
        if self.is_foreign() {
            Ok(self)
        } else {
            Err(LedgerError::validation(format!(
                "{} is the local currency; expected USD, EUR or USDT",
                self
            )))
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported currency '{0}' (expected VES, USD, EUR or USDT)")]
pub struct ParseCurrencyError(pub String);

impl FromStr for Currency {
    type Err = ParseCurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "VES" => Ok(Currency::Ves),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "USDT" => Ok(Currency::Usdt),
            _ => Err(ParseCurrencyError(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

fn decode_enum<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn decode_cents(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    Ok(from_cents(row.try_get::<i64, _>(column)?))
}

/// A daily batch of received foreign currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remittance {
    pub id: i64,
    pub date: NaiveDate,
    pub currency: Currency,
    pub received: Decimal,
    pub sold: Decimal,
    /// Always `received - sold`
    pub available: Decimal,
    pub source: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Remittance {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let received: i64 = row.try_get("received_cents")?;
        let sold: i64 = row.try_get("sold_cents")?;
        Ok(Self {
            id: row.try_get("id")?,
            date: row.try_get("date")?,
            currency: decode_enum(row, "currency")?,
            received: from_cents(received),
            sold: from_cents(sold),
            available: from_cents(received - sold),
            source: row.try_get("source")?,
            reference: row.try_get("reference")?,
            notes: row.try_get("notes")?,
            active: row.try_get("active")?,
            registered_at: row.try_get("registered_at")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementKind {
    Reception,
    Sale,
    Adjustment,
    Return,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Reception => "RECEPTION",
            MovementKind::Sale => "SALE",
            MovementKind::Adjustment => "ADJUSTMENT",
            MovementKind::Return => "RETURN",
        }
    }
}

impl FromStr for MovementKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEPTION" => Ok(MovementKind::Reception),
            "SALE" => Ok(MovementKind::Sale),
            "ADJUSTMENT" => Ok(MovementKind::Adjustment),
            "RETURN" => Ok(MovementKind::Return),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown kind '{0}'")]
pub struct ParseKindError(pub String);

/// One entry of the remittance ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemittanceMovement {
    pub id: i64,
    pub remittance_id: i64,
    pub kind: MovementKind,
    pub amount: Decimal,
    pub available_before: Decimal,
    pub available_after: Decimal,
    pub transaction_id: Option<i64>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for RemittanceMovement {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            remittance_id: row.try_get("remittance_id")?,
            kind: decode_enum(row, "kind")?,
            amount: decode_cents(row, "amount_cents")?,
            available_before: decode_cents(row, "available_before_cents")?,
            available_after: decode_cents(row, "available_after_cents")?,
            transaction_id: row.try_get("transaction_id")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Daily cap on sales of one currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesLimit {
    pub id: i64,
    pub date: NaiveDate,
    pub currency: Currency,
    pub daily_limit: Decimal,
    pub sold: Decimal,
    /// Always `daily_limit - sold`
    pub remaining: Decimal,
    pub alert_80_sent: bool,
    pub alert_95_sent: bool,
    pub active: bool,
    pub configured_at: DateTime<Utc>,
}

impl SalesLimit {
    /// Percentage of the daily limit already sold
    pub fn utilization_pct(&self) -> f64 {
        utilization_pct(self.sold, self.daily_limit)
    }
}

pub fn utilization_pct(sold: Decimal, limit: Decimal) -> f64 {
    if limit <= Decimal::ZERO {
        return 0.0;
    }
    let pct = sold * Decimal::ONE_HUNDRED / limit;
    pct.round_dp(2).to_f64().unwrap_or(0.0)
}

impl<'r> FromRow<'r, SqliteRow> for SalesLimit {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let limit: i64 = row.try_get("daily_limit_cents")?;
        let sold: i64 = row.try_get("sold_cents")?;
        Ok(Self {
            id: row.try_get("id")?,
            date: row.try_get("date")?,
            currency: decode_enum(row, "currency")?,
            daily_limit: from_cents(limit),
            sold: from_cents(sold),
            remaining: from_cents(limit - sold),
            alert_80_sent: row.try_get("alert_80_sent")?,
            alert_95_sent: row.try_get("alert_95_sent")?,
            active: row.try_get("active")?,
            configured_at: row.try_get("configured_at")?,
        })
    }
}

/// A stored exchange rate: VES per one unit of `currency`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub id: i64,
    pub currency: Currency,
    pub rate: Decimal,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub active: bool,
}

impl<'r> FromRow<'r, SqliteRow> for RateSnapshot {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            currency: decode_enum(row, "currency")?,
            rate: from_rate_units(row.try_get("rate_scaled")?),
            source: row.try_get("source")?,
            fetched_at: row.try_get("fetched_at")?,
            active: row.try_get("active")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RateUpdateLogEntry {
    pub id: i64,
    pub ran_at: DateTime<Utc>,
    pub success: bool,
    pub sources: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: i64,
    pub national_id: String,
    pub full_name: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub client_id: i64,
    pub number: String,
    pub active: bool,
    pub opened_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Account {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            number: row
                .try_get::<Option<String>, _>("number")?
                .unwrap_or_default(),
            active: row.try_get("active")?,
            opened_at: row.try_get("opened_at")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntrySide {
    Debit,
    Credit,
}

impl EntrySide {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySide::Debit => "DEBIT",
            EntrySide::Credit => "CREDIT",
        }
    }
}

impl FromStr for EntrySide {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBIT" => Ok(EntrySide::Debit),
            "CREDIT" => Ok(EntrySide::Credit),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountMovement {
    pub id: i64,
    pub account_id: i64,
    pub side: EntrySide,
    pub currency: Currency,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    pub transaction_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for AccountMovement {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            side: decode_enum(row, "kind")?,
            currency: decode_enum(row, "currency")?,
            amount: decode_cents(row, "amount_cents")?,
            balance_before: decode_cents(row, "balance_before_cents")?,
            balance_after: decode_cents(row, "balance_after_cents")?,
            description: row.try_get("description")?,
            transaction_id: row.try_get("transaction_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Direction of a conversion, seen from the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Client buys foreign currency with VES; the desk sells from remittances
    Buy,
    /// Client sells foreign currency for VES
    Sell,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Buy => "buy",
            TransactionKind::Sell => "sell",
        }
    }

    pub fn receipt_prefix(&self) -> &'static str {
        match self {
            TransactionKind::Buy => "COMP",
            TransactionKind::Sell => "VENT",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(TransactionKind::Buy),
            "sell" => Ok(TransactionKind::Sell),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TransactionStatus::Completed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

/// A completed (or cancelled) currency conversion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub kind: TransactionKind,
    pub trade_date: NaiveDate,
    pub source_currency: Currency,
    pub target_currency: Currency,
    pub source_amount: Decimal,
    pub target_amount: Decimal,
    /// The single rate used for both legs
    pub rate: Decimal,
    pub commission: Decimal,
    pub receipt: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl<'r> FromRow<'r, SqliteRow> for Transaction {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            kind: decode_enum(row, "kind")?,
            trade_date: row.try_get("trade_date")?,
            source_currency: decode_enum(row, "source_currency")?,
            target_currency: decode_enum(row, "target_currency")?,
            source_amount: decode_cents(row, "source_amount_cents")?,
            target_amount: decode_cents(row, "target_amount_cents")?,
            rate: from_rate_units(row.try_get("rate_scaled")?),
            commission: decode_cents(row, "commission_cents")?,
            receipt: row.try_get("receipt")?,
            status: decode_enum(row, "status")?,
            created_at: row.try_get("created_at")?,
            notes: row.try_get("notes")?,
        })
    }
}
