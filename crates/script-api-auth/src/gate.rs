// script-api-auth/src/gate.rs
// ============================================================================
// Module: Auth Gate
// Description: Bearer-token extraction, scope enforcement, admin-secret
//              exchange.
// Purpose: Guard every core operation behind a single, uniform policy.
// Dependencies: crate::jwt, subtle, uuid
// ============================================================================

//! ## Overview
//! When JWT auth is globally disabled, every action is admitted
//! unconditionally. Otherwise a request must carry a valid `Authorization:
//! Bearer <token>` header whose `scopes` claim satisfies the action's
//! required scope set (`"*"` always satisfies). A separate, narrower
//! operation trades a shared admin secret for a freshly minted `scopes:
//! ["*"]` token.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::jwt::JwtError;
use crate::jwt::VerifyOptions;
use crate::jwt::decode_and_verify_hs256;
use crate::jwt::encode_hs256;

const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

/// Static configuration the Auth Gate needs on every call.
#[derive(Debug, Clone)]
pub struct AuthGateConfig {
    /// Whether JWT auth is enforced at all.
    pub jwt_auth_enabled: bool,
    /// HMAC signing secret; required whenever `jwt_auth_enabled` is true.
    pub jwt_secret: Option<String>,
    /// Expected `iss` claim.
    pub jwt_iss: String,
    /// Expected `aud` claim.
    pub jwt_aud: String,
    /// Leeway applied to `exp`/`nbf` comparisons.
    pub jwt_leeway_seconds: i64,
    /// Lifetime of tokens minted by the admin exchange.
    pub jwt_expire_seconds: i64,
    /// Shared secret gating the admin token exchange; `None` disables it.
    pub jwt_admin_secret: Option<String>,
}

/// Errors the Auth Gate can raise; each variant maps to exactly one HTTP
/// status at the surface layer.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No bearer token, or the token failed to verify.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// A valid token lacked a required scope.
    #[error("insufficient scopes")]
    InsufficientScopes,
    /// Auth is enabled but the server has no signing secret configured.
    #[error("server misconfigured: jwt auth enabled without a secret")]
    Misconfigured,
    /// The admin token exchange is not enabled (no admin secret configured).
    #[error("admin token endpoint not enabled")]
    AdminExchangeDisabled,
    /// The admin secret supplied did not match.
    #[error("invalid admin secret")]
    InvalidAdminSecret,
}

/// Claims recognized from a verified token, projected for callers.
#[derive(Debug, Clone)]
pub struct AuthenticatedCaller {
    /// The token's `scopes` claim, as a set.
    pub scopes: BTreeSet<String>,
    /// The token's `sub` claim, if present.
    pub subject: Option<String>,
}

/// Checks a request's `Authorization` header against a required scope set.
///
/// Returns `None` when auth is globally disabled (the caller is admitted
/// unconditionally, matching the admit-all behavior of a disabled gate).
///
/// # Errors
///
/// Returns [`AuthError`] when the header is missing/malformed, the token
/// fails to verify, the scopes are insufficient, or auth is enabled without
/// a configured secret.
pub fn require_scopes(
    config: &AuthGateConfig,
    authorization_header: Option<&str>,
    required_scopes: &BTreeSet<String>,
) -> Result<Option<AuthenticatedCaller>, AuthError> {
    if !config.jwt_auth_enabled {
        return Ok(None);
    }

    let token = parse_bearer_token(authorization_header)?;

    let secret = config.jwt_secret.as_ref().ok_or(AuthError::Misconfigured)?;

    let verified = decode_and_verify_hs256(
        &token,
        secret.as_bytes(),
        VerifyOptions {
            now: now_unix(),
            leeway_seconds: config.jwt_leeway_seconds,
            expected_iss: Some(config.jwt_iss.as_str()),
            expected_aud: Some(config.jwt_aud.as_str()),
        },
    )
    .map_err(|e: JwtError| AuthError::Unauthenticated(e.to_string()))?;

    let scopes: BTreeSet<String> = verified.scopes().into_iter().collect();
    if !required_scopes.is_empty() && !scopes.contains("*") && !required_scopes.is_subset(&scopes) {
        return Err(AuthError::InsufficientScopes);
    }

    let subject = verified.claims.get("sub").and_then(Value::as_str).map(str::to_string);
    Ok(Some(AuthenticatedCaller { scopes, subject }))
}

/// Response body for a successful admin token exchange.
#[derive(Debug, Serialize)]
pub struct AdminToken {
    /// The signed token.
    pub access_token: String,
    /// Always `"Bearer"`.
    pub token_type: &'static str,
    /// Token lifetime in seconds.
    pub expires_in: i64,
}

/// Trades `secret` for a freshly signed `scopes: ["*"]` admin token.
///
/// # Errors
///
/// Returns [`AuthError::AdminExchangeDisabled`] if no admin secret is
/// configured, [`AuthError::InvalidAdminSecret`] if `secret` does not match,
/// or [`AuthError::Misconfigured`] if no signing secret is configured.
pub fn issue_admin_token(config: &AuthGateConfig, secret: &str) -> Result<AdminToken, AuthError> {
    let admin_secret = config.jwt_admin_secret.as_ref().ok_or(AuthError::AdminExchangeDisabled)?;
    if secret.as_bytes().ct_eq(admin_secret.as_bytes()).unwrap_u8() != 1 {
        return Err(AuthError::InvalidAdminSecret);
    }
    let signing_secret = config.jwt_secret.as_ref().ok_or(AuthError::Misconfigured)?;

    let now = now_unix();
    let claims = json!({
        "sub": "admin",
        "type": "admin",
        "role": "admin",
        "scopes": ["*"],
        "iat": now,
        "exp": now + config.jwt_expire_seconds,
        "jti": Uuid::new_v4().to_string(),
        "iss": config.jwt_iss,
        "aud": config.jwt_aud,
    });

    let token = encode_hs256(&claims, signing_secret.as_bytes());
    Ok(AdminToken {
        access_token: token,
        token_type: "Bearer",
        expires_in: config.jwt_expire_seconds,
    })
}

/// Extracts the token from a `Bearer <token>` header value.
fn parse_bearer_token(header: Option<&str>) -> Result<String, AuthError> {
    let header = header.ok_or_else(|| AuthError::Unauthenticated("missing bearer token".to_string()))?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err(AuthError::Unauthenticated("authorization header too large".to_string()));
    }
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::Unauthenticated("missing bearer token".to_string()));
    }
    Ok(token.to_string())
}

/// Current unix time in seconds, clamped to 0 if the clock is before the epoch.
fn now_unix() -> i64 {
    #[allow(clippy::cast_possible_wrap, reason = "seconds since epoch fit comfortably in i64 until year 292 billion")]
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    secs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AuthGateConfig {
        AuthGateConfig {
            jwt_auth_enabled: true,
            jwt_secret: Some("s3cret".to_string()),
            jwt_iss: "quant-script-api".to_string(),
            jwt_aud: "quant-internal".to_string(),
            jwt_leeway_seconds: 30,
            jwt_expire_seconds: 3600,
            jwt_admin_secret: Some("admin-secret".to_string()),
        }
    }

    #[test]
    fn disabled_auth_admits_unconditionally() {
        let mut config = base_config();
        config.jwt_auth_enabled = false;
        let result = require_scopes(&config, None, &BTreeSet::from(["scripts:run".to_string()]));
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn missing_header_is_unauthenticated() {
        let config = base_config();
        let err = require_scopes(&config, None, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated(_)));
    }

    #[test]
    fn wildcard_scope_satisfies_any_requirement() {
        let config = base_config();
        let token = encode_hs256(
            &json!({"scopes": ["*"], "iss": config.jwt_iss, "aud": config.jwt_aud}),
            config.jwt_secret.as_ref().unwrap().as_bytes(),
        );
        let header = format!("Bearer {token}");
        let caller = require_scopes(&config, Some(&header), &BTreeSet::from(["scripts:run".to_string()])).unwrap();
        assert!(caller.is_some());
    }

    #[test]
    fn missing_required_scope_is_forbidden() {
        let config = base_config();
        let token = encode_hs256(
            &json!({"scopes": ["scripts:read"], "iss": config.jwt_iss, "aud": config.jwt_aud}),
            config.jwt_secret.as_ref().unwrap().as_bytes(),
        );
        let header = format!("Bearer {token}");
        let err = require_scopes(&config, Some(&header), &BTreeSet::from(["scripts:run".to_string()])).unwrap_err();
        assert!(matches!(err, AuthError::InsufficientScopes));
    }

    #[test]
    fn admin_exchange_requires_matching_secret() {
        let config = base_config();
        assert!(matches!(issue_admin_token(&config, "wrong").unwrap_err(), AuthError::InvalidAdminSecret));
        assert!(issue_admin_token(&config, "admin-secret").is_ok());
    }

    #[test]
    fn admin_exchange_disabled_without_configured_secret() {
        let mut config = base_config();
        config.jwt_admin_secret = None;
        assert!(matches!(issue_admin_token(&config, "anything").unwrap_err(), AuthError::AdminExchangeDisabled));
    }
}
