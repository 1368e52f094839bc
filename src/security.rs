use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Identity;

type HmacSha256 = Hmac<Sha256>;

fn keyed_mac(secret: &[u8]) -> Option<HmacSha256> {
    match HmacSha256::new_from_slice(secret) {
        Ok(mac) => Some(mac),
        Err(_) => {
            tracing::error!("Failed to create HMAC instance");
            None
        }
    }
}

/// Hex-encoded HMAC-SHA256 of `data`
pub fn sign(data: &str, secret: &str) -> Option<String> {
    let mut mac = keyed_mac(secret.as_bytes())?;
    mac.update(data.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verify HMAC-SHA256 signature
///
/// # Arguments
/// * `data` - The data that was signed
/// * `signature` - The hex-encoded HMAC signature
/// * `secret` - The shared secret key (from environment)
pub fn verify_hmac(data: &str, signature: &str, secret: &str) -> bool {
    let Some(mut mac) = keyed_mac(secret.as_bytes()) else {
        return false;
    };

    mac.update(data.as_bytes());

    let sig_bytes = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::warn!("Invalid hex signature format");
            return false;
        }
    };

    // Constant-time comparison
    mac.verify_slice(&sig_bytes).is_ok()
}

// =============================================================================
// Password Hashing
// =============================================================================

/// Password material handed to bcrypt: `hex(HMAC-SHA256(pepper, password))`.
/// Fixed at 64 bytes, so bcrypt's 72-byte input limit never truncates.
fn peppered(password: &str, pepper: &str) -> Option<String> {
    sign(password, pepper)
}

/// Hash a password with bcrypt on the blocking pool
///
/// Stored form is the bcrypt string (`$2b$<cost>$<salt+hash>`) of the
/// peppered password; the pepper lives in the environment only.
pub async fn hash_password(password: &str, pepper: &str, cost: u32) -> Result<String, AppError> {
    let material = peppered(password, pepper)
        .ok_or_else(|| AppError::Unexpected("Failed to hash password".to_string()))?;

    tokio::task::spawn_blocking(move || bcrypt::hash(material, cost))
        .await
        .map_err(|e| AppError::Unexpected(format!("Password hashing task failed: {}", e)))?
        .map_err(|e| AppError::Unexpected(format!("Failed to hash password: {}", e)))
}

/// Check a password against a stored bcrypt hash; malformed hashes never match
pub async fn verify_password(password: &str, stored: &str, pepper: &str) -> bool {
    let Some(material) = peppered(password, pepper) else {
        return false;
    };
    let stored = stored.to_string();

    match tokio::task::spawn_blocking(move || bcrypt::verify(material, &stored)).await {
        Ok(Ok(matches)) => matches,
        Ok(Err(e)) => {
            tracing::warn!("Stored password hash is unreadable: {}", e);
            false
        }
        Err(e) => {
            tracing::error!("Password verification task failed: {}", e);
            false
        }
    }
}

// =============================================================================
// Signed Tokens
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Payload carried by access and refresh tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32,
    pub username: String,
    pub email: String,
    pub kind: TokenKind,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.sub,
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
    WrongKind,
}

/// Issue a signed, time-limited token: `hex(json claims).hex(hmac)`
pub fn issue_token(
    identity: &Identity,
    kind: TokenKind,
    ttl_secs: i64,
    secret: &str,
) -> Option<String> {
    let claims = Claims {
        sub: identity.user_id,
        username: identity.username.clone(),
        email: identity.email.clone(),
        kind,
        exp: Utc::now().timestamp() + ttl_secs,
        jti: Uuid::new_v4().to_string(),
    };

    let payload = hex::encode(serde_json::to_vec(&claims).ok()?);
    let signature = sign(&payload, secret)?;
    Some(format!("{}.{}", payload, signature))
}

/// Check signature, expiry and kind of a token
pub fn verify_token(token: &str, secret: &str, kind: TokenKind) -> Result<Claims, TokenError> {
    let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;

    if !verify_hmac(payload, signature, secret) {
        return Err(TokenError::BadSignature);
    }

    let bytes = hex::decode(payload).map_err(|_| TokenError::Malformed)?;
    let claims: Claims = serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)?;

    if claims.kind != kind {
        return Err(TokenError::WrongKind);
    }
    if claims.exp <= Utc::now().timestamp() {
        return Err(TokenError::Expired);
    }

    Ok(claims)
}
