// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

//! HTTP API tests, driven in-process through the router.

mod common;

use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::Duration;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::ServiceExt;

use common::{create_test_db, dec, funded_account, seed_trading_day, test_config, trade_date};
use divisas_rs::web::{AppState, models::auth::{Role, issue_token}, server::create_app};

const SECRET: &str = "test-secret";

struct TestApp {
    app: Router,
    pool: SqlitePool,
    _dir: TempDir,
}

async fn test_app() -> Result<TestApp> {
    let (pool, dir) = create_test_db().await?;
    let state = AppState::new(pool.clone(), test_config(), SECRET.to_string());
    Ok(TestApp {
        app: create_app(state),
        pool,
        _dir: dir,
    })
}

fn token(role: Role) -> String {
    issue_token(SECRET, "desk-user", "desk@example.com", role, Duration::hours(1)).unwrap()
}

/// Monetary fields are serialized as decimal strings
fn amount(value: &Value) -> Decimal {
    dec(value.as_str().expect("decimal string"))
}

async fn send(app: &Router, method: &str, uri: &str, role: Option<Role>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(role) = role {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(role)));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let t = test_app().await?;
    let (status, body) = send(&t.app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_api_requires_token() -> Result<()> {
    let t = test_app().await?;

    let (status, _) = send(&t.app, "GET", "/api/rates", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/rates")
        .header(header::AUTHORIZATION, "Bearer not-a-token")
        .body(Body::empty())?;
    let response = t.app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/rates")
        .header(header::COOKIE, format!("theme=dark; token={}", token(Role::Operator)))
        .body(Body::empty())?;
    let response = t.app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_operator_cannot_use_admin_endpoints() -> Result<()> {
    let t = test_app().await?;
    let remittance = json!({
        "date": "2025-03-14",
        "currency": "USD",
        "amount": "100.00",
        "source": "BANCO CENTRAL",
        "reference": null,
        "notes": null
    });

    let (status, _) = send(&t.app, "POST", "/api/remittances", Some(Role::Operator), Some(remittance.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&t.app, "POST", "/api/remittances", Some(Role::Admin), Some(remittance)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["currency"], "USD");
    assert_eq!(amount(&body["available"]), dec("100.00"));
    Ok(())
}

#[tokio::test]
async fn test_error_status_codes() -> Result<()> {
    let t = test_app().await?;

    // VES is not a remittance currency
    let (status, body) = send(
        &t.app,
        "POST",
        "/api/limits",
        Some(Role::Admin),
        Some(json!({ "date": "2025-03-14", "currency": "VES", "daily_limit": "100" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("local currency"));

    let (status, _) = send(&t.app, "GET", "/api/transactions/COMP-NOPE", Some(Role::Operator), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&t.app, "GET", "/api/limits/USD?date=2025-03-14", Some(Role::Operator), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let account = funded_account(&t.pool, "V-12345678", "1000").await?;
    let (status, body) = send(
        &t.app,
        "POST",
        "/api/exchange/buy",
        Some(Role::Operator),
        Some(json!({
            "account_id": account.id,
            "currency": "USD",
            "amount": { "in": "foreign", "amount": "10" },
            "date": "2025-03-14"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("USD"));

    seed_trading_day(&t.pool).await?;
    let (status, _) = send(
        &t.app,
        "POST",
        "/api/sales/authorize",
        Some(Role::Operator),
        Some(json!({ "date": "2025-03-14", "currency": "USD", "amount": "301" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn test_buy_and_cancel_over_http() -> Result<()> {
    let t = test_app().await?;
    seed_trading_day(&t.pool).await?;
    let account = funded_account(&t.pool, "V-12345678", "20000").await?;
    let date = trade_date().to_string();

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/exchange/buy",
        Some(Role::Operator),
        Some(json!({
            "account_id": account.id,
            "currency": "USD",
            "amount": { "in": "foreign", "amount": "220" },
            "date": date
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(amount(&body["transaction"]["rate"]), dec("36.792"));
    assert_eq!(amount(&body["local_settled"]), dec("8134.71"));
    assert_eq!(body["remittances"].as_array().unwrap().len(), 2);
    let receipt = body["transaction"]["receipt"].as_str().unwrap().to_string();

    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/availability/USD?date={}", date),
        Some(Role::Operator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amount(&body["total_available"]), dec("230.00"));
    assert_eq!(amount(&body["limit_remaining"]), dec("80.00"));
    assert_eq!(body["can_sell"], true);

    let (status, body) = send(&t.app, "GET", &format!("/api/accounts/{}", account.id), Some(Role::Operator), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amount(&body["balances"]["VES"]), dec("11865.29"));
    assert_eq!(amount(&body["balances"]["USD"]), dec("220.00"));

    let (status, _) = send(
        &t.app,
        "POST",
        &format!("/api/transactions/{}/cancel", receipt),
        Some(Role::Operator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &t.app,
        "POST",
        &format!("/api/transactions/{}/cancel", receipt),
        Some(Role::Admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, _) = send(
        &t.app,
        "POST",
        &format!("/api/transactions/{}/cancel", receipt),
        Some(Role::Admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/reports/daily?date={}", date),
        Some(Role::Operator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["purchases"], 0);
    assert_eq!(body["cancelled"], 1);
    Ok(())
}

#[tokio::test]
async fn test_rates_endpoints() -> Result<()> {
    let t = test_app().await?;

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/rates",
        Some(Role::Admin),
        Some(json!({ "currency": "USD", "rate": "36.50" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["source"], "manual:desk@example.com");
    assert_eq!(body["active"], true);

    let (status, body) = send(&t.app, "GET", "/api/rates", Some(Role::Operator), None).await;
    assert_eq!(status, StatusCode::OK);
    let quotes = body.as_array().unwrap();
    assert_eq!(quotes.len(), 1);
    assert_eq!(amount(&quotes[0]["buy"]), dec("36.792"));
    assert_eq!(amount(&quotes[0]["sell"]), dec("36.208"));

    let (status, body) = send(&t.app, "GET", "/api/rates/health", Some(Role::Operator), None).await;
    assert_eq!(status, StatusCode::OK);
    // EUR and USDT have no rate yet
    assert_eq!(body["healthy"], false);

    let (status, body) = send(&t.app, "GET", "/api/rates/USD/history?limit=5", Some(Role::Operator), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_inactive_account_cannot_trade() -> Result<()> {
    let t = test_app().await?;
    seed_trading_day(&t.pool).await?;
    let account = funded_account(&t.pool, "V-12345678", "20000").await?;

    let (status, body) = send(
        &t.app,
        "POST",
        &format!("/api/accounts/{}/status", account.id),
        Some(Role::Admin),
        Some(json!({ "active": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);

    let (status, _) = send(
        &t.app,
        "POST",
        "/api/exchange/buy",
        Some(Role::Operator),
        Some(json!({
            "account_id": account.id,
            "currency": "USD",
            "amount": { "in": "foreign", "amount": "10" },
            "date": trade_date().to_string()
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let date = trade_date().to_string();
    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/remittances/movements?from={}&to={}&currency=USD", date, date),
        Some(Role::Operator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // registered today, so nothing falls on the trade date
    assert!(body.as_array().unwrap().is_empty());
    Ok(())
}

async fn send_raw(app: &Router, method: &str, uri: &str, role: Role, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token(role)))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_unreadable_requests_get_json_errors() -> Result<()> {
    let t = test_app().await?;

    let (status, body) = send_raw(&t.app, "POST", "/api/exchange/buy", Role::Operator, "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string(), "body: {}", body);

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/limits",
        Some(Role::Admin),
        Some(json!({ "currency": "GBP", "daily_limit": "100" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("unsupported currency"), "body: {}", body);

    let (status, body) = send(&t.app, "GET", "/api/accounts/not-a-number", Some(Role::Operator), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(&t.app, "GET", "/api/reports/daily?date=14-03-2025", Some(Role::Operator), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(&t.app, "GET", "/api/rates", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, body) = send(&t.app, "POST", "/api/rates/refresh", Some(Role::Operator), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Insufficient permissions");
    Ok(())
}

#[tokio::test]
async fn test_currency_codes_accept_any_case() -> Result<()> {
    let t = test_app().await?;
    seed_trading_day(&t.pool).await?;
    let date = trade_date().to_string();

    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/availability/usd?date={}", date),
        Some(Role::Operator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currency"], "USD");
    assert_eq!(amount(&body["total_available"]), dec("450"));

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/sales/authorize",
        Some(Role::Operator),
        Some(json!({ "date": date, "currency": "usd", "amount": "50" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);

    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/remittances?date={}&currency=Usd", date),
        Some(Role::Operator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_preview_history_and_period_reports() -> Result<()> {
    let t = test_app().await?;
    seed_trading_day(&t.pool).await?;
    let account = funded_account(&t.pool, "V-12345678", "20000").await?;
    let date = trade_date().to_string();

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/exchange/preview",
        Some(Role::Operator),
        Some(json!({ "kind": "buy", "currency": "USD", "amount": { "in": "foreign", "amount": "220" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(amount(&body["rate"]), dec("36.792"));
    assert_eq!(amount(&body["commission"]), dec("40.47"));
    assert_eq!(amount(&body["total_debited"]), dec("8134.71"));

    // A preview moves nothing
    let (_, body) = send(&t.app, "GET", "/api/transactions", Some(Role::Operator), None).await;
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) = send(
        &t.app,
        "POST",
        "/api/exchange/buy",
        Some(Role::Operator),
        Some(json!({
            "account_id": account.id,
            "currency": "USD",
            "amount": { "in": "foreign", "amount": "220" },
            "date": date
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/transactions?from={}&to={}&kind=buy&currency=usd&account_id={}", date, date, account.id),
        Some(Role::Operator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = send(&t.app, "GET", "/api/transactions?kind=sell", Some(Role::Operator), None).await;
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/reports/weekly?date={}", date),
        Some(Role::Operator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["from"], "2025-03-10");
    assert_eq!(body["days"].as_array().unwrap().len(), 7);
    assert_eq!(body["days"][4]["purchases"], 1);

    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/reports/monthly?date={}", date),
        Some(Role::Operator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["to"], "2025-03-31");
    assert_eq!(body["purchases"], 1);
    assert_eq!(amount(&body["total_commissions"]), dec("40.47"));
    Ok(())
}
