// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

pub mod accounts;
pub mod config;
pub mod db;
pub mod error;
pub mod exchange;
pub mod exchange_rates;
pub mod limits;
pub mod models;
pub mod money;
pub mod rate_sources;
pub mod rates;
pub mod remittances;
pub mod reports;
pub mod sales;
pub mod web;

pub use error::{LedgerError, LedgerResult, SaleRejection};
pub use models::Currency;
