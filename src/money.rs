// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Decimal helpers for amounts and rates.
//!
//! Amounts carry two decimal places and are persisted as integer cents.
//! Rates carry four decimal places and are persisted scaled by 10 000.
//! All rounding is half-up (midpoint away from zero).

use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

use crate::error::{LedgerError, LedgerResult};

pub const MONEY_SCALE: u32 = 2;
pub const RATE_SCALE: u32 = 4;

/// Round an amount to cents, half-up
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Round a rate to four decimal places, half-up
pub fn round_rate(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(RATE_SCALE);
    rounded
}

pub fn to_cents(value: Decimal) -> LedgerResult<i64> {
    let rounded = round_money(value);
    i64::try_from(rounded.mantissa())
        .map_err(|_| LedgerError::validation(format!("amount {} is out of range", value)))
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, MONEY_SCALE)
}

pub fn to_rate_units(value: Decimal) -> LedgerResult<i64> {
    let rounded = round_rate(value);
    i64::try_from(rounded.mantissa())
        .map_err(|_| LedgerError::validation(format!("rate {} is out of range", value)))
}

pub fn from_rate_units(units: i64) -> Decimal {
    Decimal::new(units, RATE_SCALE)
}

/// Parse a user-supplied amount, accepting a decimal comma
pub fn parse_amount(input: &str) -> LedgerResult<Decimal> {
    let normalized = input.trim().replace(',', ".");
    Decimal::from_str(&normalized)
        .map_err(|_| LedgerError::validation(format!("'{}' is not a valid amount", input)))
}

/// Require a strictly positive amount, returning it rounded to cents
pub fn positive_amount(value: Decimal, what: &str) -> LedgerResult<Decimal> {
    let rounded = round_money(value);
    if rounded <= Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "{} must be greater than zero",
            what
        )));
    }
    Ok(rounded)
}

/// Format an amount with thousands separators, e.g. `1,234,567.89`
pub fn format_amount(value: Decimal) -> String {
    let rounded = round_money(value);
    let text = format!("{:.2}", rounded.abs());
    let (integer, fraction) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, ch) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{}{}.{}", sign, grouped, fraction)
}
