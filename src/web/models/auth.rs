// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Desk roles. Admins manage stock, limits and rates; operators trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "operator" => Ok(Role::Operator),
            other => anyhow::bail!("unknown role '{}' (expected admin or operator)", other),
        }
    }
}

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Operator identifier
    pub sub: String,
    pub email: String,
    pub role: String,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub role: Role,
}

impl User {
    pub fn from_claims(claims: &Claims) -> Option<Self> {
        let role = claims.role.parse().ok()?;
        Some(Self {
            id: claims.sub.clone(),
            email: claims.email.clone(),
            role,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Sign a token for a desk user, valid for `valid_for`
pub fn issue_token(
    secret: &str,
    subject: &str,
    email: &str,
    role: Role,
    valid_for: Duration,
) -> anyhow::Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: subject.to_string(),
        email: email.to_string(),
        role: role.as_str().to_string(),
        iat: now.timestamp(),
        exp: (now + valid_for).timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("operator".parse::<Role>().unwrap(), Role::Operator);
        assert!("viewer".parse::<Role>().is_err());
    }

    #[test]
    fn test_user_from_claims() {
        let claims = Claims {
            sub: "op-1".to_string(),
            email: "cashier@desk.example".to_string(),
            role: "operator".to_string(),
            iat: 0,
            exp: 0,
        };
        let user = User::from_claims(&claims).unwrap();
        assert_eq!(user.role, Role::Operator);
        assert!(!user.is_admin());

        let bad = Claims {
            role: "root".to_string(),
            ..claims
        };
        assert!(User::from_claims(&bad).is_none());
    }
}
