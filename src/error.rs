// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::models::Currency;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors raised by the ledger, rate and exchange operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    SaleRejected(#[from] SaleRejection),

    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    #[error("no exchange rate available for {0}")]
    NoRate(Currency),

    #[error(
        "insufficient funds: balance {balance:.2} {currency}, required {required:.2} {currency}"
    )]
    InsufficientFunds {
        currency: Currency,
        balance: Decimal,
        required: Decimal,
    },

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        if crate::db::is_busy(&err) {
            tracing::warn!(error = %err, "database busy");
            return LedgerError::Conflict(
                "the ledger is busy with another operation, retry".to_string(),
            );
        }
        LedgerError::Database(err)
    }
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

/// Why a sale of foreign currency was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaleRejection {
    #[error("sale amount must be greater than zero")]
    NonPositiveAmount,

    #[error("no sales limit configured for {currency} on {date}")]
    NoLimit { currency: Currency, date: NaiveDate },

    #[error(
        "sale of {requested:.2} {currency} exceeds available remittance of {available:.2} {currency} on {date}"
    )]
    ExceedsAvailable {
        currency: Currency,
        date: NaiveDate,
        requested: Decimal,
        available: Decimal,
    },

    #[error(
        "sale of {requested:.2} {currency} exceeds remaining daily limit of {remaining:.2} {currency} on {date}"
    )]
    ExceedsLimit {
        currency: Currency,
        date: NaiveDate,
        requested: Decimal,
        remaining: Decimal,
    },
}
