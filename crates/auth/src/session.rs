//! Session records and bearer tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use ctms_core::{SessionId, UserId};

use crate::error::AuthError;

pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 24 * 60;
const TOKEN_BYTES: usize = 32;

/// Opaque bearer credential.
///
/// 256 bits from the OS RNG, URL-safe base64 without padding. `Debug` is
/// redacted so tokens never end up in logs by accident.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl core::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// A login session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub session_token: SessionToken,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Session {
    /// New active session with absolute expiry `now + ttl`, saturating at the
    /// latest representable instant.
    pub fn issue(
        user_id: UserId,
        ip_address: Option<String>,
        user_agent: Option<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
            session_token: SessionToken::generate(),
            created_at: now,
            expires_at: saturating_add(now, ttl),
            is_active: true,
            ip_address,
            user_agent,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// `at + by`, clamped to the representable range instead of panicking.
pub fn saturating_add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(if by < Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Deterministically check a session's own state (owner status is checked
/// separately, since it lives on the user record).
///
/// Expiry is checked first so that an expired session keeps reporting
/// `ExpiredSession` after it has been marked inactive.
pub fn validate_session(session: &Session, now: DateTime<Utc>) -> Result<(), AuthError> {
    if session.is_expired(now) {
        return Err(AuthError::ExpiredSession);
    }
    if !session.is_active {
        return Err(AuthError::InvalidToken);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 43);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn token_debug_is_redacted() {
        let t = SessionToken::generate();
        assert!(!format!("{t:?}").contains(t.as_str()));
    }

    #[test]
    fn expiry_is_absolute_and_inclusive() {
        let s = Session::issue(UserId::new(), None, None, t0(), Duration::hours(24));
        assert_eq!(s.expires_at, t0() + Duration::hours(24));
        assert!(validate_session(&s, t0() + Duration::hours(23)).is_ok());
        assert_eq!(
            validate_session(&s, t0() + Duration::hours(24)),
            Err(AuthError::ExpiredSession)
        );
    }

    #[test]
    fn oversized_ttl_saturates_instead_of_overflowing() {
        let s = Session::issue(UserId::new(), None, None, t0(), Duration::days(200_000_000));
        assert_eq!(s.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(validate_session(&s, t0()).is_ok());
    }

    #[test]
    fn revoked_session_is_an_invalid_token() {
        let mut s = Session::issue(UserId::new(), None, None, t0(), Duration::hours(1));
        s.is_active = false;
        assert_eq!(validate_session(&s, t0()), Err(AuthError::InvalidToken));
    }

    #[test]
    fn expired_session_stays_expired_once_deactivated() {
        let mut s = Session::issue(UserId::new(), None, None, t0(), Duration::minutes(1));
        s.is_active = false;
        assert_eq!(
            validate_session(&s, t0() + Duration::hours(1)),
            Err(AuthError::ExpiredSession)
        );
    }
}
