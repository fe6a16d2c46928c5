// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

use crate::web::{middleware::auth::AuthUser, state::AppState};

/// Requires the admin role: remittances, limits, rates, cancellations
pub struct RequireAdmin(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = RoleError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state)
            .await
            .map_err(|_| RoleError::Unauthorized)?;

        if !user.is_admin() {
            tracing::warn!(user = %user.email, "admin endpoint refused");
            return Err(RoleError::Forbidden);
        }

        Ok(RequireAdmin(AuthUser(user)))
    }
}

/// Any authenticated desk user (admin or operator)
pub struct RequireOperator(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for RequireOperator {
    type Rejection = RoleError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_user = AuthUser::from_request_parts(parts, state)
            .await
            .map_err(|_| RoleError::Unauthorized)?;

        Ok(RequireOperator(auth_user))
    }
}

#[derive(Debug)]
pub enum RoleError {
    Unauthorized,
    Forbidden,
}

impl IntoResponse for RoleError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            RoleError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required"),
            RoleError::Forbidden => (StatusCode::FORBIDDEN, "Insufficient permissions"),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
