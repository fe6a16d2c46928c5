// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Clients, their accounts and per-currency balances.

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::db;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{Account, AccountMovement, Client, Currency, EntrySide};
use crate::money::{from_cents, positive_amount, to_cents};

const ACCOUNT_PREFIX: &str = "2001";

/// Venezuelan (V) or foreign resident (E) cédula, dash optional
static NATIONAL_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([VE])-?(\d{7,8})$").expect("valid national id pattern"));

/// Trim, upper-case and check a cédula, returning it as `V-12345678`
pub fn normalize_national_id(raw: &str) -> LedgerResult<String> {
    let upper = raw.trim().to_uppercase();
    let caps = NATIONAL_ID_RE.captures(&upper).ok_or_else(|| {
        LedgerError::validation(format!(
            "invalid national id '{}': use V-12345678 or E-12345678",
            raw.trim()
        ))
    })?;
    Ok(format!("{}-{}", &caps[1], &caps[2]))
}

pub fn account_number(id: i64) -> String {
    format!("{}{:016}", ACCOUNT_PREFIX, id)
}

pub async fn create_client(pool: &SqlitePool, national_id: &str, full_name: &str) -> LedgerResult<Client> {
    let national_id = normalize_national_id(national_id)?;
    let full_name = full_name.trim();
    if full_name.is_empty() {
        return Err(LedgerError::validation("full name is required"));
    }

    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM clients WHERE national_id = ?")
        .bind(&national_id)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Err(LedgerError::Conflict(format!(
            "a client with national id {} already exists",
            national_id
        )));
    }

    let client = sqlx::query_as::<_, Client>(
        r#"
        INSERT INTO clients (national_id, full_name, registered_at)
        VALUES (?, ?, ?)
        RETURNING id, national_id, full_name, registered_at
        "#,
    )
    .bind(&national_id)
    .bind(full_name)
    .bind(db::now())
    .fetch_one(pool)
    .await?;

    tracing::info!(client_id = client.id, "client created");
    Ok(client)
}

pub async fn get_client(pool: &SqlitePool, id: i64) -> LedgerResult<Client> {
    sqlx::query_as::<_, Client>("SELECT id, national_id, full_name, registered_at FROM clients WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| LedgerError::not_found("client", id))
}

pub(crate) async fn fetch_account(conn: &mut SqliteConnection, id: i64) -> LedgerResult<Account> {
    sqlx::query_as::<_, Account>("SELECT id, client_id, number, active, opened_at FROM accounts WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::not_found("account", id))
}

pub async fn get_account(pool: &SqlitePool, id: i64) -> LedgerResult<Account> {
    let mut conn = pool.acquire().await?;
    fetch_account(&mut conn, id).await
}

/// Open an account with a zero balance in every currency
pub async fn open_account(pool: &SqlitePool, client_id: i64) -> LedgerResult<Account> {
    get_client(pool, client_id).await?;

    let mut tx = db::begin_write(pool).await?;
    let id = sqlx::query("INSERT INTO accounts (client_id, active, opened_at) VALUES (?, 1, ?)")
        .bind(client_id)
        .bind(db::now())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

    sqlx::query("UPDATE accounts SET number = ? WHERE id = ?")
        .bind(account_number(id))
        .bind(id)
        .execute(&mut *tx)
        .await?;

    for currency in [Currency::Ves, Currency::Usd, Currency::Eur, Currency::Usdt] {
        sqlx::query("INSERT INTO account_balances (account_id, currency, balance_cents) VALUES (?, ?, 0)")
            .bind(id)
            .bind(currency.as_str())
            .execute(&mut *tx)
            .await?;
    }

    let account = fetch_account(&mut tx, id).await?;
    tx.commit().await?;

    tracing::info!(account_id = id, client_id, number = %account.number, "account opened");
    Ok(account)
}

pub async fn set_account_status(pool: &SqlitePool, id: i64, active: bool) -> LedgerResult<Account> {
    let result = sqlx::query("UPDATE accounts SET active = ? WHERE id = ?")
        .bind(active)
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(LedgerError::not_found("account", id));
    }
    get_account(pool, id).await
}

/// An account that exists and may trade
pub(crate) async fn require_active_account(conn: &mut SqliteConnection, id: i64) -> LedgerResult<Account> {
    let account = fetch_account(conn, id).await?;
    if !account.active {
        return Err(LedgerError::Conflict(format!("account {} is inactive", account.number)));
    }
    Ok(account)
}

pub(crate) async fn balance_cents(
    conn: &mut SqliteConnection,
    account_id: i64,
    currency: Currency,
) -> LedgerResult<i64> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT balance_cents FROM account_balances WHERE account_id = ? AND currency = ?")
            .bind(account_id)
            .bind(currency.as_str())
            .fetch_optional(&mut *conn)
            .await?;
    Ok(row.map(|(cents,)| cents).unwrap_or(0))
}

pub async fn balance(pool: &SqlitePool, account_id: i64, currency: Currency) -> LedgerResult<Decimal> {
    let mut conn = pool.acquire().await?;
    fetch_account(&mut conn, account_id).await?;
    Ok(from_cents(balance_cents(&mut conn, account_id, currency).await?))
}

pub async fn balances(pool: &SqlitePool, account_id: i64) -> LedgerResult<BTreeMap<Currency, Decimal>> {
    get_account(pool, account_id).await?;
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT currency, balance_cents FROM account_balances WHERE account_id = ?")
            .bind(account_id)
            .fetch_all(pool)
            .await?;

    let mut map = BTreeMap::new();
    for (code, cents) in rows {
        let currency = code
            .parse::<Currency>()
            .map_err(|e| LedgerError::validation(e.to_string()))?;
        map.insert(currency, from_cents(cents));
    }
    Ok(map)
}

/// One side of a balance change
pub(crate) struct BalanceChange<'a> {
    pub account_id: i64,
    pub currency: Currency,
    pub side: EntrySide,
    pub cents: i64,
    pub description: &'a str,
    pub transaction_id: Option<i64>,
}

/// Apply a debit or credit and write its account movement.
///
/// Debits are guarded in SQL so a balance can never go negative.
pub(crate) async fn apply_balance_change(
    conn: &mut SqliteConnection,
    change: BalanceChange<'_>,
) -> LedgerResult<AccountMovement> {
    let before = balance_cents(conn, change.account_id, change.currency).await?;

    let after = match change.side {
        EntrySide::Credit => {
            sqlx::query(
                r#"
                INSERT INTO account_balances (account_id, currency, balance_cents)
                VALUES (?, ?, ?)
                ON CONFLICT (account_id, currency)
                DO UPDATE SET balance_cents = balance_cents + excluded.balance_cents
                "#,
            )
            .bind(change.account_id)
            .bind(change.currency.as_str())
            .bind(change.cents)
            .execute(&mut *conn)
            .await?;
            before + change.cents
        }
        EntrySide::Debit => {
            let result = sqlx::query(
                r#"
                UPDATE account_balances
                SET balance_cents = balance_cents - ?
                WHERE account_id = ? AND currency = ? AND balance_cents >= ?
                "#,
            )
            .bind(change.cents)
            .bind(change.account_id)
            .bind(change.currency.as_str())
            .bind(change.cents)
            .execute(&mut *conn)
            .await?;
            if result.rows_affected() == 0 {
                return Err(LedgerError::InsufficientFunds {
                    currency: change.currency,
                    balance: from_cents(before),
                    required: from_cents(change.cents),
                });
            }
            before - change.cents
        }
    };

    let movement = sqlx::query_as::<_, AccountMovement>(
        r#"
        INSERT INTO account_movements (
            account_id, kind, currency, amount_cents, balance_before_cents,
            balance_after_cents, description, transaction_id, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id, account_id, kind, currency, amount_cents, balance_before_cents,
                  balance_after_cents, description, transaction_id, created_at
        "#,
    )
    .bind(change.account_id)
    .bind(change.side.as_str())
    .bind(change.currency.as_str())
    .bind(change.cents)
    .bind(before)
    .bind(after)
    .bind(change.description)
    .bind(change.transaction_id)
    .bind(db::now())
    .fetch_one(&mut *conn)
    .await?;

    Ok(movement)
}

pub async fn deposit(
    pool: &SqlitePool,
    account_id: i64,
    currency: Currency,
    amount: Decimal,
) -> LedgerResult<AccountMovement> {
    let amount = positive_amount(amount, "deposit amount")?;

    let mut tx = db::begin_write(pool).await?;
    require_active_account(&mut tx, account_id).await?;
    let description = format!("deposit of {:.2} {}", amount, currency);
    let movement = apply_balance_change(
        &mut tx,
        BalanceChange {
            account_id,
            currency,
            side: EntrySide::Credit,
            cents: to_cents(amount)?,
            description: &description,
            transaction_id: None,
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(account_id, currency = %currency, amount = %amount, "deposit recorded");
    Ok(movement)
}

/// Newest first
pub async fn account_movements(
    pool: &SqlitePool,
    account_id: i64,
    limit: i64,
) -> LedgerResult<Vec<AccountMovement>> {
    let movements = sqlx::query_as::<_, AccountMovement>(
        r#"
        SELECT id, account_id, kind, currency, amount_cents, balance_before_cents,
               balance_after_cents, description, transaction_id, created_at
        FROM account_movements
        WHERE account_id = ?
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(account_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(movements)
}
