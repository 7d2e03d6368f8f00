//! Persistence boundary for users, sessions and audit records.
//!
//! The traits make no storage assumptions: in-memory implementations back
//! tests/dev, Postgres backs production. Implementations must serialize
//! read-modify-write on a single user row (lockout counters) and keep session
//! deactivation idempotent.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use ctms_auth::{
    AuditFilter, AuditRecord, AuthError, FailureOutcome, LockoutPolicy, PasswordDigest, Role,
    Session, SessionToken, SuccessOutcome, User,
};
use ctms_core::UserId;

pub use in_memory::{InMemoryAuditStore, InMemoryCredentialStore, InMemorySessionStore};
pub use postgres::{PostgresAuditStore, PostgresCredentialStore, PostgresSessionStore};

/// Store operation error.
///
/// ## Error Categories
///
/// - **Duplicate**: a uniqueness constraint rejected the write (nothing was written)
/// - **NotFound**: the addressed row does not exist
/// - **Transient**: timeout / connection trouble; the caller may retry
/// - **Backend**: anything else the backend reported
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("duplicate value for {0}")]
    Duplicate(String),

    #[error("row not found")]
    NotFound,

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for AuthError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Duplicate(_) => AuthError::DuplicateIdentity,
            StoreError::NotFound => AuthError::UserNotFound,
            StoreError::Transient(msg) => AuthError::TransientStoreFailure(msg),
            StoreError::Backend(msg) => AuthError::Store(msg),
        }
    }
}

/// User records.
///
/// Lookups by username/email expect the normalized (trimmed, lowercased) form.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a fully prepared record. Fails with `Duplicate` (and writes
    /// nothing) if the username or email is taken.
    async fn create_user(&self, user: User) -> Result<User, StoreError>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// All users, newest first.
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn count_users(&self) -> Result<u64, StoreError>;

    async fn update_role(&self, id: UserId, role: Role, at: DateTime<Utc>) -> Result<User, StoreError>;

    async fn set_active(&self, id: UserId, active: bool, at: DateTime<Utc>) -> Result<User, StoreError>;

    /// Replace email and/or full name. An email already held by another
    /// account fails with `Duplicate` and writes nothing.
    async fn update_profile(
        &self,
        id: UserId,
        email: Option<&str>,
        full_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<User, StoreError>;

    async fn set_password(
        &self,
        id: UserId,
        digest: &PasswordDigest,
        at: DateTime<Utc>,
    ) -> Result<User, StoreError>;

    /// Replace the password and clear any lockout in one write.
    async fn reset_password(
        &self,
        id: UserId,
        digest: &PasswordDigest,
        at: DateTime<Utc>,
    ) -> Result<User, StoreError>;

    /// Atomically re-check the lock and, if none is live, reset the failure
    /// counter, clear the lock and stamp `last_login`.
    async fn record_login_success(
        &self,
        id: UserId,
        at: DateTime<Utc>,
    ) -> Result<(User, SuccessOutcome), StoreError>;

    /// Atomically increment the failure counter and apply `policy`.
    async fn record_login_failure(
        &self,
        id: UserId,
        policy: &LockoutPolicy,
        at: DateTime<Utc>,
    ) -> Result<(User, FailureOutcome), StoreError>;

    /// Administrative unlock.
    async fn clear_lockout(&self, id: UserId, at: DateTime<Utc>) -> Result<User, StoreError>;
}

/// Login sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: Session) -> Result<(), StoreError>;

    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<Session>, StoreError>;

    /// Mark a session inactive. Returns `true` only for the call that actually
    /// flipped it, so concurrent callers can tell who did the work.
    async fn deactivate(&self, token: &SessionToken) -> Result<bool, StoreError>;

    /// Deactivate every active session of `user_id`, optionally sparing one.
    async fn deactivate_all_for_user(
        &self,
        user_id: UserId,
        except: Option<&SessionToken>,
    ) -> Result<u64, StoreError>;

    async fn list_active_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError>;

    /// Deactivate every active session with `expires_at <= now`.
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Append-only audit log.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError>;

    /// Matching records, newest first, at most `filter.effective_limit()`.
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, StoreError>;
}
