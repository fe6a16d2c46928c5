// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use jsonwebtoken::{DecodingKey, Validation, decode};

use crate::web::{
    models::auth::{Claims, User},
    state::AppState,
};

/// Extractor for requests carrying a valid desk token
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts)?;
        let claims = validate_jwt(&token, &state.jwt_secret)?;
        let user = User::from_claims(&claims).ok_or(AuthError::InvalidRole)?;

        Ok(AuthUser(user))
    }
}

/// Bearer header first, then the `token` cookie
fn extract_token(parts: &Parts) -> Result<String, AuthError> {
    if let Some(token) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        return Ok(token.trim().to_string());
    }

    if let Some(cookies) = parts
        .headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
    {
        for cookie in cookies.split(';').map(str::trim) {
            if let Some(token) = cookie.strip_prefix("token=") {
                return Ok(token.to_string());
            }
        }
    }

    Err(AuthError::MissingToken)
}

fn validate_jwt(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::default();

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(error = %e, "rejected token");
            AuthError::InvalidToken
        })
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    InvalidRole,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authentication token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid authentication token"),
            AuthError::InvalidRole => (StatusCode::UNAUTHORIZED, "Invalid user role"),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
