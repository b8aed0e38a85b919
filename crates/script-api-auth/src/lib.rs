// script-api-auth/src/lib.rs
// ============================================================================
// Crate: script-api-auth
// Description: HS256 JWT codec and the bearer-token Auth Gate guarding every
//              core operation.
// ============================================================================

//! HS256 JWT encode/verify plus the scope-checking gate that sits in front of
//! every script-registry and run-manager operation.

pub mod gate;
pub mod jwt;

pub use gate::AdminToken;
pub use gate::AuthError;
pub use gate::AuthGateConfig;
pub use gate::AuthenticatedCaller;
pub use gate::issue_admin_token;
pub use gate::require_scopes;
pub use jwt::JwtError;
pub use jwt::VerifiedClaims;
pub use jwt::VerifyOptions;
pub use jwt::decode_and_verify_hs256;
pub use jwt::encode_hs256;
