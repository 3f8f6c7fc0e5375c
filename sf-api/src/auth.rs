//! JWT issuance and verification, and the namespace password check behind
//! `POST /auth` (§6 External interfaces).
//!
//! The namespace `all` is the administrative principal; everything else is a
//! tenant namespace whose passwords live under `passwords/<namespace>`.

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sf_core::error::{Error, Result};
use sf_coord::CoordinationStore;

use crate::repo;

pub const ADMIN_NAMESPACE: &str = "all";
const TOKEN_TTL_SECS: i64 = 12 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Namespace this token authenticates as.
    pub sub: String,
    pub exp: i64,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.sub == ADMIN_NAMESPACE
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PasswordRecord {
    passwords: Vec<String>,
}

pub fn issue_token(secret_seed: &str, namespace: &str) -> Result<String> {
    let claims = Claims {
        sub: namespace.to_string(),
        exp: (Utc::now().timestamp() + TOKEN_TTL_SECS),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret_seed.as_bytes()),
    )
    .map_err(|e| Error::Internal(format!("signing token: {e}")))
}

pub fn verify_token(secret_seed: &str, token: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret_seed.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| Error::Unauthorized)
}

pub async fn check_password(
    store: &Arc<dyn CoordinationStore>,
    namespace: &str,
    password: &str,
) -> Result<bool> {
    let record: Option<PasswordRecord> =
        repo::get(store, sf_core::config::keys::PASSWORDS, namespace).await?;
    Ok(record
        .map(|r| r.passwords.iter().any(|p| p == password))
        .unwrap_or(false))
}
