// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::web::{routes::api, state::AppState};

/// Create the Axum router with all routes
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Remittances
        .route(
            "/api/remittances",
            get(api::list_remittances).post(api::register_remittance),
        )
        .route("/api/remittances/stats", get(api::remittance_stats))
        .route("/api/remittances/movements", get(api::movements_between))
        .route("/api/remittances/:id/adjust", post(api::adjust_remittance))
        .route(
            "/api/remittances/:id/deactivate",
            post(api::deactivate_remittance),
        )
        .route(
            "/api/remittances/:id/movements",
            get(api::remittance_movements),
        )
        // Limits and sales
        .route("/api/limits", post(api::configure_limit))
        .route("/api/limits/:currency", get(api::get_limit))
        .route("/api/availability/:currency", get(api::get_availability))
        .route("/api/sales/authorize", post(api::authorize_sale))
        // Rates
        .route("/api/rates", get(api::list_rates).post(api::set_rate))
        .route("/api/rates/refresh", post(api::refresh_rates))
        .route("/api/rates/health", get(api::rate_health))
        .route("/api/rates/updates", get(api::rate_updates))
        .route("/api/rates/:currency/history", get(api::rate_history))
        // Clients and accounts
        .route("/api/clients", post(api::create_client))
        .route("/api/accounts", post(api::open_account))
        .route("/api/accounts/:id", get(api::get_account))
        .route("/api/accounts/:id/status", post(api::set_account_status))
        .route("/api/accounts/:id/deposit", post(api::deposit))
        .route("/api/accounts/:id/movements", get(api::account_movements))
        // Exchange
        .route("/api/exchange/buy", post(api::buy))
        .route("/api/exchange/sell", post(api::sell))
        .route("/api/exchange/preview", post(api::preview))
        .route("/api/transactions", get(api::list_transactions))
        .route("/api/transactions/:receipt", get(api::get_transaction))
        .route(
            "/api/transactions/:receipt/cancel",
            post(api::cancel_transaction),
        )
        // Reports
        .route("/api/reports/daily", get(api::daily_report))
        .route("/api/reports/weekly", get(api::weekly_report))
        .route("/api/reports/monthly", get(api::monthly_report))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the web server
pub async fn start_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🚀 Server starting on http://{}", addr);
    tracing::info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
