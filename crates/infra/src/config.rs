//! Environment-driven configuration.
//!
//! Every knob has a default. Unparsable values fall back to the default with a
//! `tracing::warn!`; only a missing `DATABASE_URL` in persistent mode is fatal.

use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;

use ctms_auth::LockoutPolicy;
use ctms_auth::lockout::{DEFAULT_LOCKOUT_MINUTES, DEFAULT_MAX_FAILED_ATTEMPTS};
use ctms_auth::password::DEFAULT_ITERATIONS as DEFAULT_PBKDF2_ITERATIONS;
use ctms_auth::session::DEFAULT_SESSION_TTL_MINUTES;

pub const DEFAULT_MIN_PASSWORD_LEN: usize = 6;
pub const DEFAULT_SWEEP_SECONDS: u64 = 300;
pub const DEFAULT_BOOTSTRAP_ADMIN_PASSWORD: &str = "admin123";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
/// Upper bound for any minutes-valued knob (ten years).
pub const MAX_CONFIG_MINUTES: i64 = 10 * 366 * 24 * 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")]
    MissingDatabaseUrl,
}

/// Knobs consumed by `AuthService`.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub session_ttl: Duration,
    pub lockout: LockoutPolicy,
    pub pbkdf2_iterations: u32,
    pub min_password_len: usize,
    pub bootstrap_admin_password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("session_ttl", &self.session_ttl)
            .field("lockout", &self.lockout)
            .field("pbkdf2_iterations", &self.pbkdf2_iterations)
            .field("min_password_len", &self.min_password_len)
            .finish_non_exhaustive()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::minutes(DEFAULT_SESSION_TTL_MINUTES),
            lockout: LockoutPolicy::default(),
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
            bootstrap_admin_password: DEFAULT_BOOTSTRAP_ADMIN_PASSWORD.to_string(),
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let session_ttl = minutes_or(&lookup, "CTMS_SESSION_TTL_MINUTES", DEFAULT_SESSION_TTL_MINUTES, 1);
        let max_attempts = parse_or(&lookup, "CTMS_MAX_FAILED_ATTEMPTS", DEFAULT_MAX_FAILED_ATTEMPTS);
        let lockout_duration = minutes_or(&lookup, "CTMS_LOCKOUT_MINUTES", DEFAULT_LOCKOUT_MINUTES, 0);
        let iterations = parse_or(&lookup, "CTMS_PBKDF2_ITERATIONS", DEFAULT_PBKDF2_ITERATIONS);
        let min_password_len = parse_or(&lookup, "CTMS_MIN_PASSWORD_LEN", DEFAULT_MIN_PASSWORD_LEN);

        let bootstrap_admin_password = lookup("CTMS_BOOTSTRAP_ADMIN_PASSWORD").unwrap_or_else(|| {
            tracing::warn!("CTMS_BOOTSTRAP_ADMIN_PASSWORD not set; using insecure dev default");
            DEFAULT_BOOTSTRAP_ADMIN_PASSWORD.to_string()
        });

        Self {
            session_ttl,
            lockout: LockoutPolicy::new(max_attempts.max(1), lockout_duration),
            pbkdf2_iterations: iterations,
            min_password_len,
            bootstrap_admin_password,
        }
    }
}

/// Process-level configuration for the HTTP binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub auth: AuthConfig,
    pub sweep_interval: StdDuration,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub bind_addr: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let use_persistent_stores = parse_or(&lookup, "USE_PERSISTENT_STORES", false);
        let database_url = lookup("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        let sweep_seconds = parse_or(&lookup, "CTMS_SESSION_SWEEP_SECONDS", DEFAULT_SWEEP_SECONDS);

        Ok(Self {
            auth: AuthConfig::from_lookup(&lookup),
            sweep_interval: StdDuration::from_secs(sweep_seconds.max(1)),
            use_persistent_stores,
            database_url,
            bind_addr: lookup("CTMS_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "unparsable config value; using default");
            default
        }),
    }
}

/// Minutes knob clamped up to `min`; values past [`MAX_CONFIG_MINUTES`] fall
/// back to the default.
fn minutes_or<F>(lookup: &F, key: &str, default: i64, min: i64) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let minutes = parse_or(lookup, key, default);
    let minutes = if minutes > MAX_CONFIG_MINUTES {
        tracing::warn!(
            key,
            value = minutes,
            max = MAX_CONFIG_MINUTES,
            default,
            "config value out of range; using default"
        );
        default
    } else {
        minutes.max(min)
    };
    Duration::minutes(minutes)
}
