// script-api-auth/src/jwt.rs
// ============================================================================
// Module: JWT Codec
// Description: HS256-only JSON Web Token encode/verify.
// Purpose: Sign and verify bearer tokens without pulling in a general-purpose
//          JWT library whose defaults (multi-algorithm, alg confusion guards,
//          etc.) this system does not need.
// Dependencies: hmac, sha2, base64, subtle, serde_json
// ============================================================================

//! ## Overview
//! Supports exactly one algorithm: HS256. A token is
//! `base64url(header) . base64url(payload) . base64url(HMAC-SHA256(secret, signing_input))`,
//! with JSON rendered with no insignificant whitespace and base64url omitting
//! padding. Every failure mode — bad shape, bad signature, expired, not
//! issued by the expected issuer, wrong audience — collapses to a single
//! [`JwtError`] kind; the caller maps that to an HTTP 401.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::Hmac;
use hmac::Mac;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// A single opaque error kind covering every way a token can fail to verify.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct JwtError(String);

impl JwtError {
    fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

/// Encodes `claims` as an HS256-signed JWT under `secret`.
///
/// # Panics
///
/// Never panics: `claims` must already be a valid JSON value, and header
/// serialization is infallible for the fixed `Header` struct above.
#[must_use]
pub fn encode_hs256(claims: &Value, secret: &[u8]) -> String {
    let header = Header { alg: "HS256", typ: "JWT" };
    #[allow(clippy::unwrap_used, reason = "Header has no non-serializable fields")]
    let header_json = serde_json::to_vec(&header).unwrap();
    let payload_json = serde_json::to_vec(claims).unwrap_or_else(|_| b"{}".to_vec());

    let header_b64 = URL_SAFE_NO_PAD.encode(header_json);
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json);
    let signing_input = format!("{header_b64}.{payload_b64}");

    let signature_b64 = sign(signing_input.as_bytes(), secret);
    format!("{signing_input}.{signature_b64}")
}

fn sign(signing_input: &[u8], secret: &[u8]) -> String {
    #[allow(clippy::unwrap_used, reason = "HMAC accepts a key of any length")]
    let mut mac = HmacSha256::new_from_slice(secret).unwrap();
    mac.update(signing_input);
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Claims extracted from a successfully verified token.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    /// The full decoded claim set.
    pub claims: Map<String, Value>,
}

impl VerifiedClaims {
    /// Returns the `scopes` claim as a set of strings. Accepts either a
    /// single string or an array of strings; any other shape yields an
    /// empty set.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        match self.claims.get("scopes") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            _ => Vec::new(),
        }
    }
}

/// Parameters controlling claim verification.
#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions<'a> {
    /// Current time, unix seconds.
    pub now: i64,
    /// Seconds of tolerance applied to `exp`/`nbf` comparisons.
    pub leeway_seconds: i64,
    /// Required `iss` claim value, or `None` to skip the check.
    pub expected_iss: Option<&'a str>,
    /// Required `aud` claim value, or `None` to skip the check.
    pub expected_aud: Option<&'a str>,
}

/// Decodes and verifies an HS256 token.
///
/// # Errors
///
/// Returns [`JwtError`] for any shape, signature, or claim failure: this is
/// deliberately a single error kind (see module docs).
pub fn decode_and_verify_hs256(token: &str, secret: &[u8], options: VerifyOptions<'_>) -> Result<VerifiedClaims, JwtError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(JwtError::new("invalid JWT format"));
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_b64).map_err(|_| JwtError::new("invalid JWT encoding"))?;
    let payload_bytes = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| JwtError::new("invalid JWT encoding"))?;

    let header: Value = serde_json::from_slice(&header_bytes).map_err(|_| JwtError::new("invalid JWT encoding"))?;
    if header.get("alg").and_then(Value::as_str) != Some("HS256") {
        return Err(JwtError::new("unsupported JWT alg"));
    }

    let signing_input = format!("{header_b64}.{payload_b64}");
    let expected_sig_b64 = sign(signing_input.as_bytes(), secret);
    if expected_sig_b64.as_bytes().ct_eq(signature_b64.as_bytes()).unwrap_u8() != 1 {
        return Err(JwtError::new("invalid JWT signature"));
    }

    let payload: Value = serde_json::from_slice(&payload_bytes).map_err(|_| JwtError::new("invalid JWT encoding"))?;
    let Value::Object(claims) = payload else {
        return Err(JwtError::new("invalid JWT encoding"));
    };

    if let Some(exp) = claims.get("exp") {
        let exp = exp.as_i64().ok_or_else(|| JwtError::new("invalid exp claim"))?;
        if options.now > exp + options.leeway_seconds {
            return Err(JwtError::new("token expired"));
        }
    }

    if let Some(nbf) = claims.get("nbf") {
        let nbf = nbf.as_i64().ok_or_else(|| JwtError::new("invalid nbf claim"))?;
        if options.now + options.leeway_seconds < nbf {
            return Err(JwtError::new("token not yet valid"));
        }
    }

    if let Some(expected_iss) = options.expected_iss
        && claims.get("iss").and_then(Value::as_str) != Some(expected_iss)
    {
        return Err(JwtError::new("invalid iss claim"));
    }

    if let Some(expected_aud) = options.expected_aud {
        let ok = match claims.get("aud") {
            Some(Value::String(aud)) => aud == expected_aud,
            Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some(expected_aud)),
            _ => false,
        };
        if !ok {
            return Err(JwtError::new("invalid aud claim"));
        }
    }

    Ok(VerifiedClaims { claims })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts(now: i64) -> VerifyOptions<'static> {
        VerifyOptions {
            now,
            leeway_seconds: 30,
            expected_iss: Some("quant-script-api"),
            expected_aud: Some("quant-internal"),
        }
    }

    #[test]
    fn round_trips() {
        let claims = json!({
            "sub": "admin",
            "scopes": ["*"],
            "iss": "quant-script-api",
            "aud": "quant-internal",
            "iat": 1000,
            "exp": 2000,
        });
        let token = encode_hs256(&claims, b"secret");
        let verified = decode_and_verify_hs256(&token, b"secret", opts(1500)).unwrap();
        assert_eq!(verified.claims.get("sub").and_then(Value::as_str), Some("admin"));
        assert_eq!(verified.scopes(), vec!["*".to_string()]);
    }

    #[test]
    fn rejects_tampered_signature() {
        let claims = json!({"exp": 2000, "iss": "quant-script-api", "aud": "quant-internal"});
        let mut token = encode_hs256(&claims, b"secret");
        token.push('x');
        assert!(decode_and_verify_hs256(&token, b"secret", opts(1000)).is_err());
    }

    #[test]
    fn rejects_wrong_key() {
        let claims = json!({"exp": 2000, "iss": "quant-script-api", "aud": "quant-internal"});
        let token = encode_hs256(&claims, b"secret");
        assert!(decode_and_verify_hs256(&token, b"other", opts(1000)).is_err());
    }

    #[test]
    fn leeway_boundary_accepts_and_rejects() {
        let claims = json!({"exp": 1000});
        let token = encode_hs256(&claims, b"secret");
        let lenient = VerifyOptions { now: 1030, leeway_seconds: 30, expected_iss: None, expected_aud: None };
        assert!(decode_and_verify_hs256(&token, b"secret", lenient).is_ok());
        let strict = VerifyOptions { now: 1031, leeway_seconds: 30, expected_iss: None, expected_aud: None };
        assert!(decode_and_verify_hs256(&token, b"secret", strict).is_err());
    }

    #[test]
    fn aud_accepts_array_membership() {
        let claims = json!({"aud": ["a", "quant-internal", "b"]});
        let token = encode_hs256(&claims, b"secret");
        let options = VerifyOptions { now: 0, leeway_seconds: 0, expected_iss: None, expected_aud: Some("quant-internal") };
        assert!(decode_and_verify_hs256(&token, b"secret", options).is_ok());
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_claims_round_trip(sub in "[a-zA-Z0-9]{1,16}", exp in 1_000_000i64..2_000_000i64) {
            let claims = json!({"sub": sub, "exp": exp});
            let token = encode_hs256(&claims, b"a-secret-key");
            let verified = decode_and_verify_hs256(&token, b"a-secret-key", VerifyOptions {
                now: exp - 10,
                leeway_seconds: 0,
                expected_iss: None,
                expected_aud: None,
            }).unwrap();
            prop_assert_eq!(verified.claims.get("sub").and_then(Value::as_str), Some(sub.as_str()));
        }
    }
}
