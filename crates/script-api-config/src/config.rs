// script-api-config/src/config.rs
// ============================================================================
// Module: Script API Configuration
// Description: Environment-driven configuration loading and validation.
// Purpose: Load once at startup, validate, and pass the result by reference.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every setting is read from an environment variable with a fixed default;
//! there is no config file. Loading never fails on a missing variable, only
//! on a value that fails validation once all overrides are collected (scripts
//! root must exist and be a directory, `SCRIPT_JWT_AUTH=true` requires a
//! signing secret, the terminate timeout is floored at one second).

use std::env;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

/// Default value for `SCRIPT_API_PREFIX`.
const DEFAULT_API_PREFIX: &str = "/v1";
/// Default value for `SCRIPT_STATE_DIR`.
const DEFAULT_STATE_DIR: &str = ".quant-script-api";
/// Default value for `SCRIPT_HOST`.
const DEFAULT_HOST: &str = "127.0.0.1";
/// Default value for `SCRIPT_PORT`.
const DEFAULT_PORT: u16 = 8000;
/// Default value for `SCRIPT_JWT_ISS`.
const DEFAULT_JWT_ISS: &str = "quant-script-api";
/// Default value for `SCRIPT_JWT_AUD`.
const DEFAULT_JWT_AUD: &str = "quant-internal";
/// Default value for `SCRIPT_JWT_LEEWAY_SECONDS`.
const DEFAULT_JWT_LEEWAY_SECONDS: i64 = 30;
/// Default value for `SCRIPT_JWT_EXPIRE_SECONDS`.
const DEFAULT_JWT_EXPIRE_SECONDS: i64 = 3600;
/// Default value for `SCRIPT_TERMINATE_TIMEOUT_SECONDS`.
const DEFAULT_TERMINATE_TIMEOUT_SECONDS: u64 = 10;
/// Floor applied to the terminate timeout regardless of configured value.
const MIN_TERMINATE_TIMEOUT_SECONDS: u64 = 1;
/// Default interpreter used to launch scripts; host-configurable, with no
/// direct environment-variable precedent upstream.
const DEFAULT_PYTHON_INTERPRETER: &str = "python3";

/// The fully resolved, validated configuration for one server instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix prepended to every HTTP route, e.g. `/v1`.
    pub api_prefix: String,
    /// Root directory scanned for runnable scripts.
    pub scripts_root: PathBuf,
    /// Directory holding the run store and, by default, logs.
    pub state_dir: PathBuf,
    /// Directory holding per-run stdout/stderr log files.
    pub logs_dir: PathBuf,
    /// Bind host for the HTTP listener.
    pub host: String,
    /// Bind port for the HTTP listener.
    pub port: u16,
    /// Interpreter used to launch scripts, e.g. `python3`.
    pub python_interpreter: String,

    /// Whether bearer-token auth is enforced.
    pub jwt_auth: bool,
    /// HMAC signing secret; required when `jwt_auth` is true.
    pub jwt_secret: Option<String>,
    /// Expected `iss` claim.
    pub jwt_iss: String,
    /// Expected `aud` claim.
    pub jwt_aud: String,
    /// Leeway, in seconds, applied to `exp`/`nbf` checks.
    pub jwt_leeway_seconds: i64,
    /// Lifetime, in seconds, of tokens minted by the admin exchange.
    pub jwt_expire_seconds: i64,
    /// Shared secret gating the admin token exchange; `None` disables it.
    pub jwt_admin_secret: Option<String>,

    /// Grace window granted to a child after SIGTERM before SIGKILL.
    pub terminate_timeout_seconds: u64,
}

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The scripts root does not exist or is not a directory.
    #[error("scripts root {0:?} does not exist or is not a directory")]
    ScriptsRootInvalid(PathBuf),
    /// `SCRIPT_JWT_AUTH=true` without a configured signing secret.
    #[error("SCRIPT_JWT_AUTH is enabled but no signing secret is configured")]
    JwtAuthWithoutSecret,
}

impl Config {
    /// Loads configuration from the process environment, applying the
    /// defaults and overrides described in the module docs.
    ///
    /// `scripts_path_override`, `state_dir_override`, `host_override`, and
    /// `port_override` take precedence over their environment-variable
    /// counterparts; they exist so a CLI flag can win over an env var the
    /// same way the environment wins over a built-in default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the scripts root is missing or not a
    /// directory, or when JWT auth is enabled without a signing secret.
    pub fn load(
        scripts_path_override: Option<&str>,
        state_dir_override: Option<&str>,
        host_override: Option<&str>,
        port_override: Option<u16>,
    ) -> Result<Self, ConfigError> {
        let api_prefix = env_str("SCRIPT_API_PREFIX", DEFAULT_API_PREFIX);

        let scripts_root_raw = scripts_path_override
            .map(str::to_string)
            .or_else(|| env_opt("SCRIPT_SCRIPTS_PATH"))
            .or_else(|| env_opt("SCRIPTS_PATH"))
            .unwrap_or_else(|| ".".to_string());
        let scripts_root = expand_home(&scripts_root_raw);

        let state_dir_raw =
            state_dir_override.map(str::to_string).or_else(|| env_opt("SCRIPT_STATE_DIR")).unwrap_or_else(|| DEFAULT_STATE_DIR.to_string());
        let state_dir = expand_home(&state_dir_raw);

        let logs_dir = env_opt("SCRIPT_LOGS_DIR").map(|raw| expand_home(&raw)).unwrap_or_else(|| state_dir.join("logs"));

        let host = host_override.map(str::to_string).unwrap_or_else(|| env_str("SCRIPT_HOST", DEFAULT_HOST));
        let port = port_override.unwrap_or_else(|| env_int("SCRIPT_PORT", u32::from(DEFAULT_PORT)) as u16);

        let jwt_auth = env_bool("SCRIPT_JWT_AUTH", false);
        let jwt_secret = env_opt("SCRIPT_JWT_SECRET").or_else(|| env_opt("SCRIPT_JWT_SECRETE"));
        let jwt_iss = env_str("SCRIPT_JWT_ISS", DEFAULT_JWT_ISS);
        let jwt_aud = env_str("SCRIPT_JWT_AUD", DEFAULT_JWT_AUD);
        let jwt_leeway_seconds = env_int("SCRIPT_JWT_LEEWAY_SECONDS", DEFAULT_JWT_LEEWAY_SECONDS);
        let jwt_expire_seconds = env_int("SCRIPT_JWT_EXPIRE_SECONDS", DEFAULT_JWT_EXPIRE_SECONDS);
        let jwt_admin_secret = env_opt("SCRIPT_JWT_ADMIN_SECRET").or_else(|| env_opt("SCRIPT_JWT_ADMIN_SECRETE"));

        let terminate_timeout_seconds =
            env_int("SCRIPT_TERMINATE_TIMEOUT_SECONDS", i64::try_from(DEFAULT_TERMINATE_TIMEOUT_SECONDS).unwrap_or(10))
                .max(i64::try_from(MIN_TERMINATE_TIMEOUT_SECONDS).unwrap_or(1)) as u64;

        let python_interpreter = env_str("SCRIPT_PYTHON_INTERPRETER", DEFAULT_PYTHON_INTERPRETER);

        let config = Self {
            api_prefix,
            scripts_root,
            state_dir,
            logs_dir,
            host,
            port,
            python_interpreter,
            jwt_auth,
            jwt_secret,
            jwt_iss,
            jwt_aud,
            jwt_leeway_seconds,
            jwt_expire_seconds,
            jwt_admin_secret,
            terminate_timeout_seconds,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field invariants not expressible while reading a
    /// single variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the scripts root is missing or not a
    /// directory, or when JWT auth is enabled without a signing secret.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scripts_root.is_dir() {
            return Err(ConfigError::ScriptsRootInvalid(self.scripts_root.clone()));
        }
        if self.jwt_auth && self.jwt_secret.is_none() {
            return Err(ConfigError::JwtAuthWithoutSecret);
        }
        Ok(())
    }

    /// Path to the durable run store database file.
    #[must_use]
    pub fn run_store_path(&self) -> PathBuf {
        self.state_dir.join("runs.db")
    }
}

/// Expands a leading `~` to the user's home directory, matching the
/// upstream convention of expanding paths read from configuration.
fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = env::var_os("HOME")
    {
        return Path::new(&home).join(rest);
    }
    PathBuf::from(raw)
}

/// Reads an environment variable, treating an empty value as absent.
fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

/// Reads an environment variable with a string default.
fn env_str(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

/// Reads an integer environment variable, falling back to `default` on any
/// parse failure, matching the fail-soft behavior of the upstream loader.
fn env_int(name: &str, default: i64) -> i64 {
    env_opt(name).and_then(|raw| raw.parse().ok()).unwrap_or(default)
}

/// Parses a boolean environment variable. Recognizes `1`, `true`, `yes`,
/// `y`, and `on`, case-insensitively; anything else (including absence)
/// falls back to `default`.
fn env_bool(name: &str, default: bool) -> bool {
    match env_opt(name) {
        Some(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
        None => default,
    }
}

#[cfg(test)]
#[allow(unsafe_code, reason = "env::set_var/remove_var are unsafe to call from a multi-threaded test binary; these tests run against process-global state and accept that")]
mod tests {
    use super::*;

    fn clear_script_env() {
        for (key, _) in env::vars() {
            if key.starts_with("SCRIPT_") || key == "SCRIPTS_PATH" {
                // SAFETY: none, this runs under #[cfg(test)] only and each test
                // clears before setting its own values; tests in this module
                // run single-threaded via the shared `ENV_LOCK` below in spirit
                // of the upstream fixture pattern.
                unsafe {
                    env::remove_var(key);
                }
            }
        }
    }

    #[test]
    fn defaults_apply_when_unset() {
        clear_script_env();
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(dir.path().to_str().unwrap()), None, None, None).unwrap();
        assert_eq!(config.api_prefix, "/v1");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8000);
        assert!(!config.jwt_auth);
        assert_eq!(config.terminate_timeout_seconds, 10);
    }

    #[test]
    fn typo_tolerant_secret_fallback() {
        clear_script_env();
        let dir = tempfile::tempdir().unwrap();
        // SAFETY: see `clear_script_env`.
        unsafe {
            env::set_var("SCRIPT_JWT_SECRETE", "from-typo-variant");
        }
        let config = Config::load(Some(dir.path().to_str().unwrap()), None, None, None).unwrap();
        assert_eq!(config.jwt_secret.as_deref(), Some("from-typo-variant"));
        clear_script_env();
    }

    #[test]
    fn jwt_auth_without_secret_is_rejected() {
        clear_script_env();
        let dir = tempfile::tempdir().unwrap();
        // SAFETY: see `clear_script_env`.
        unsafe {
            env::set_var("SCRIPT_JWT_AUTH", "true");
        }
        let err = Config::load(Some(dir.path().to_str().unwrap()), None, None, None).unwrap_err();
        assert!(matches!(err, ConfigError::JwtAuthWithoutSecret));
        clear_script_env();
    }

    #[test]
    fn missing_scripts_root_is_rejected() {
        clear_script_env();
        let err = Config::load(Some("/does/not/exist/ever"), None, None, None).unwrap_err();
        assert!(matches!(err, ConfigError::ScriptsRootInvalid(_)));
    }

    #[test]
    fn terminate_timeout_is_floored_at_one_second() {
        clear_script_env();
        let dir = tempfile::tempdir().unwrap();
        // SAFETY: see `clear_script_env`.
        unsafe {
            env::set_var("SCRIPT_TERMINATE_TIMEOUT_SECONDS", "0");
        }
        let config = Config::load(Some(dir.path().to_str().unwrap()), None, None, None).unwrap();
        assert_eq!(config.terminate_timeout_seconds, 1);
        clear_script_env();
    }

    #[test]
    fn bool_parsing_is_case_insensitive() {
        assert!(env_bool("SCRIPT_API_CONFIG_TEST_BOOL_TRUE_1", false) == false);
        for value in ["1", "true", "TRUE", "Yes", "y", "ON"] {
            // SAFETY: see `clear_script_env`.
            unsafe {
                env::set_var("SCRIPT_API_CONFIG_TEST_BOOL", value);
            }
            assert!(env_bool("SCRIPT_API_CONFIG_TEST_BOOL", false), "expected {value:?} to parse as true");
        }
        // SAFETY: see `clear_script_env`.
        unsafe {
            env::remove_var("SCRIPT_API_CONFIG_TEST_BOOL");
        }
    }
}
