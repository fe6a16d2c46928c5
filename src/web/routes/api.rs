// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use axum::{
    extract::{
        State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{Duration, Local, NaiveDate};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::error::LedgerError;
use crate::models::Currency;
use crate::remittances::{AdjustmentDirection, NewRemittance};
use crate::web::{
    extract::{ApiJson, ApiPath, ApiQuery},
    middleware::roles::{RequireAdmin, RequireOperator},
    state::AppState,
};
use crate::{
    accounts, exchange, exchange_rates, limits, rate_sources, rates, remittances, reports, sales,
};

/// Error body returned by every API endpoint
#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    /// The request itself could not be read: bad JSON, query or path
    Rejected(StatusCode, String),
    Internal(anyhow::Error),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Ledger(err) => match err {
                LedgerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                LedgerError::SaleRejected(_)
                | LedgerError::InsufficientFunds { .. }
                | LedgerError::Conflict(_) => StatusCode::CONFLICT,
                LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
                LedgerError::NoRate(_) => StatusCode::SERVICE_UNAVAILABLE,
                LedgerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Rejected(status, _) => *status,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Ledger(LedgerError::Database(e)) => {
                tracing::error!(error = %e, "database error");
                "internal error".to_string()
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                "internal error".to_string()
            }
            ApiError::Ledger(e) => e.to_string(),
            ApiError::Rejected(_, message) => message.clone(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub date: Option<NaiveDate>,
    pub currency: Option<Currency>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub currency: Currency,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

// ---- remittances ----

pub async fn register_remittance(
    RequireAdmin(_): RequireAdmin,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<NewRemittance>,
) -> Result<(StatusCode, Json<crate::models::Remittance>), ApiError> {
    let remittance = remittances::register_remittance(&state.db_pool, &body).await?;
    Ok((StatusCode::CREATED, Json(remittance)))
}

pub async fn list_remittances(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<DayQuery>,
) -> ApiResult<Vec<crate::models::Remittance>> {
    let date = query.date.unwrap_or_else(today);
    Ok(Json(
        remittances::list_remittances(&state.db_pool, date, query.currency).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct AdjustBody {
    pub direction: AdjustmentDirection,
    pub amount: Decimal,
    pub reason: String,
}

pub async fn adjust_remittance(
    RequireAdmin(_): RequireAdmin,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<AdjustBody>,
) -> ApiResult<crate::models::Remittance> {
    let remittance =
        remittances::adjust_remittance(&state.db_pool, id, body.direction, body.amount, &body.reason)
            .await?;
    Ok(Json(remittance))
}

pub async fn deactivate_remittance(
    RequireAdmin(_): RequireAdmin,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<crate::models::Remittance> {
    Ok(Json(remittances::deactivate_remittance(&state.db_pool, id).await?))
}

pub async fn remittance_movements(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Vec<crate::models::RemittanceMovement>> {
    remittances::get_remittance(&state.db_pool, id).await?;
    Ok(Json(remittances::movements(&state.db_pool, id).await?))
}

pub async fn remittance_stats(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RangeQuery>,
) -> ApiResult<remittances::RemittanceStats> {
    let stats =
        remittances::monthly_stats(&state.db_pool, query.currency, query.from, query.to).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct MovementsQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub currency: Option<Currency>,
}

pub async fn movements_between(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<MovementsQuery>,
) -> ApiResult<Vec<crate::models::RemittanceMovement>> {
    Ok(Json(
        remittances::movements_between(&state.db_pool, query.from, query.to, query.currency).await?,
    ))
}

// ---- limits and sales ----

#[derive(Debug, Deserialize)]
pub struct LimitBody {
    pub date: Option<NaiveDate>,
    pub currency: Currency,
    pub daily_limit: Decimal,
}

pub async fn configure_limit(
    RequireAdmin(_): RequireAdmin,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LimitBody>,
) -> ApiResult<crate::models::SalesLimit> {
    let date = body.date.unwrap_or_else(today);
    let limit = limits::configure_limit(&state.db_pool, date, body.currency, body.daily_limit).await?;
    Ok(Json(limit))
}

pub async fn get_limit(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiPath(currency): ApiPath<Currency>,
    ApiQuery(query): ApiQuery<DayQuery>,
) -> ApiResult<crate::models::SalesLimit> {
    let date = query.date.unwrap_or_else(today);
    let limit = limits::active_limit(&state.db_pool, date, currency)
        .await?
        .ok_or_else(|| LedgerError::not_found("sales limit", format!("{} {}", currency, date)))?;
    Ok(Json(limit))
}

pub async fn get_availability(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiPath(currency): ApiPath<Currency>,
    ApiQuery(query): ApiQuery<DayQuery>,
) -> ApiResult<reports::Availability> {
    let date = query.date.unwrap_or_else(today);
    Ok(Json(reports::availability(&state.db_pool, date, currency).await?))
}

#[derive(Debug, Deserialize)]
pub struct SaleBody {
    pub date: Option<NaiveDate>,
    pub currency: Currency,
    pub amount: Decimal,
}

pub async fn authorize_sale(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SaleBody>,
) -> ApiResult<sales::SaleAuthorization> {
    let date = body.date.unwrap_or_else(today);
    let authorization = sales::authorize_sale(&state.db_pool, date, body.currency, body.amount).await?;
    Ok(Json(authorization))
}

// ---- rates ----

pub async fn list_rates(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
) -> ApiResult<Vec<rates::RateQuote>> {
    let spread = state.config.rates.spread;
    let quotes = rates::active_rates(&state.db_pool)
        .await?
        .iter()
        .map(|snapshot| rates::RateQuote::from_base(snapshot, spread))
        .collect();
    Ok(Json(quotes))
}

#[derive(Debug, Deserialize)]
pub struct RateBody {
    pub currency: Currency,
    pub rate: Decimal,
    pub source: Option<String>,
}

pub async fn set_rate(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RateBody>,
) -> Result<(StatusCode, Json<crate::models::RateSnapshot>), ApiError> {
    let source = body
        .source
        .unwrap_or_else(|| format!("manual:{}", admin.0.email));
    let snapshot =
        rates::store_rate(&state.db_pool, body.currency, body.rate, &source, crate::db::now()).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn refresh_rates(
    RequireAdmin(_): RequireAdmin,
    State(state): State<AppState>,
) -> ApiResult<exchange_rates::RateUpdateSummary> {
    let sources = rate_sources::default_sources(&state.config.rates)?;
    let summary = exchange_rates::update_exchange_rates(&sources, &state.db_pool).await?;
    Ok(Json(summary))
}

pub async fn rate_updates(
    RequireAdmin(_): RequireAdmin,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<LimitQuery>,
) -> ApiResult<Vec<crate::models::RateUpdateLogEntry>> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    Ok(Json(exchange_rates::recent_updates(&state.db_pool, limit).await?))
}

pub async fn rate_health(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
) -> ApiResult<rates::RateHealth> {
    let max_age = Duration::minutes(state.config.rates.max_age_minutes);
    Ok(Json(
        rates::rate_health(&state.db_pool, crate::db::now(), max_age).await?,
    ))
}

pub async fn rate_history(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiPath(currency): ApiPath<Currency>,
    ApiQuery(query): ApiQuery<LimitQuery>,
) -> ApiResult<Vec<crate::models::RateSnapshot>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(rates::rate_history(&state.db_pool, currency, limit).await?))
}

// ---- clients and accounts ----

#[derive(Debug, Deserialize)]
pub struct ClientBody {
    pub national_id: String,
    pub full_name: String,
}

pub async fn create_client(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ClientBody>,
) -> Result<(StatusCode, Json<crate::models::Client>), ApiError> {
    let client = accounts::create_client(&state.db_pool, &body.national_id, &body.full_name).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

#[derive(Debug, Deserialize)]
pub struct AccountBody {
    pub client_id: i64,
}

pub async fn open_account(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<AccountBody>,
) -> Result<(StatusCode, Json<crate::models::Account>), ApiError> {
    let account = accounts::open_account(&state.db_pool, body.client_id).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn get_account(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account = accounts::get_account(&state.db_pool, id).await?;
    let balances = accounts::balances(&state.db_pool, id).await?;
    Ok(Json(json!({
        "account": account,
        "balances": balances,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub active: bool,
}

pub async fn set_account_status(
    RequireAdmin(_): RequireAdmin,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<StatusBody>,
) -> ApiResult<crate::models::Account> {
    Ok(Json(
        accounts::set_account_status(&state.db_pool, id, body.active).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct DepositBody {
    pub currency: Currency,
    pub amount: Decimal,
}

pub async fn deposit(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<DepositBody>,
) -> ApiResult<crate::models::AccountMovement> {
    Ok(Json(
        accounts::deposit(&state.db_pool, id, body.currency, body.amount).await?,
    ))
}

pub async fn account_movements(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<LimitQuery>,
) -> ApiResult<Vec<crate::models::AccountMovement>> {
    accounts::get_account(&state.db_pool, id).await?;
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    Ok(Json(accounts::account_movements(&state.db_pool, id, limit).await?))
}

// ---- exchange ----

#[derive(Debug, Deserialize)]
pub struct BuyBody {
    pub account_id: i64,
    pub currency: Currency,
    pub amount: exchange::BuyAmount,
    pub date: Option<NaiveDate>,
}

pub async fn buy(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<BuyBody>,
) -> Result<(StatusCode, Json<exchange::TradeResult>), ApiError> {
    let date = body.date.unwrap_or_else(today);
    let result = exchange::buy_currency(
        &state.db_pool,
        &state.config,
        body.account_id,
        body.currency,
        body.amount,
        date,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

#[derive(Debug, Deserialize)]
pub struct SellBody {
    pub account_id: i64,
    pub currency: Currency,
    pub amount: Decimal,
    pub date: Option<NaiveDate>,
}

pub async fn sell(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SellBody>,
) -> Result<(StatusCode, Json<exchange::TradeResult>), ApiError> {
    let date = body.date.unwrap_or_else(today);
    let result = exchange::sell_currency(
        &state.db_pool,
        &state.config,
        body.account_id,
        body.currency,
        body.amount,
        date,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn preview(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<exchange::Conversion>,
) -> ApiResult<exchange::ConversionPreview> {
    Ok(Json(
        exchange::preview_conversion(&state.db_pool, &state.config, body).await?,
    ))
}

pub async fn list_transactions(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiQuery(mut filter): ApiQuery<exchange::TransactionFilter>,
) -> ApiResult<Vec<crate::models::Transaction>> {
    filter.limit = Some(filter.limit.unwrap_or(100).clamp(1, 1000));
    Ok(Json(exchange::transaction_history(&state.db_pool, &filter).await?))
}

pub async fn get_transaction(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiPath(receipt): ApiPath<String>,
) -> ApiResult<crate::models::Transaction> {
    Ok(Json(exchange::get_transaction(&state.db_pool, &receipt).await?))
}

pub async fn cancel_transaction(
    RequireAdmin(_): RequireAdmin,
    State(state): State<AppState>,
    ApiPath(receipt): ApiPath<String>,
) -> ApiResult<crate::models::Transaction> {
    Ok(Json(exchange::cancel_transaction(&state.db_pool, &receipt).await?))
}

// ---- reports ----

pub async fn daily_report(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<DayQuery>,
) -> ApiResult<reports::DailyReport> {
    let date = query.date.unwrap_or_else(today);
    Ok(Json(reports::daily_report(&state.db_pool, date).await?))
}

pub async fn weekly_report(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<DayQuery>,
) -> ApiResult<reports::PeriodReport> {
    let date = query.date.unwrap_or_else(today);
    Ok(Json(reports::weekly_report(&state.db_pool, date).await?))
}

pub async fn monthly_report(
    RequireOperator(_): RequireOperator,
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<DayQuery>,
) -> ApiResult<reports::PeriodReport> {
    let date = query.date.unwrap_or_else(today);
    Ok(Json(reports::monthly_report(&state.db_pool, date).await?))
}
