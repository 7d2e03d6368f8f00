use chrono::{DateTime, Utc};
use thiserror::Error;

use ctms_core::DomainError;

use crate::rbac::join_roles;
use crate::{Permission, Role};

/// Outcome taxonomy for every auth entry point.
///
/// `InvalidCredentials` deliberately covers both "unknown username" and "wrong
/// password" so callers cannot enumerate accounts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("username or email already exists")]
    DuplicateIdentity,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("account locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    #[error("account is deactivated")]
    AccountInactive,

    #[error("invalid session token")]
    InvalidToken,

    #[error("session has expired")]
    ExpiredSession,

    #[error("permission denied: role '{role}' lacks '{permission}'")]
    PermissionDenied {
        role: Role,
        permission: Permission,
        required_roles: Vec<Role>,
    },

    /// A resource/action pair outside the RBAC vocabulary. Always a denial.
    #[error("permission denied: unknown permission '{0}'")]
    UnknownPermission(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("user not found")]
    UserNotFound,

    #[error("transient store failure: {0}")]
    TransientStoreFailure(String),

    #[error("store failure: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    /// Only `TransientStoreFailure` is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::TransientStoreFailure(_))
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::DuplicateIdentity => "duplicate_identity",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked { .. } => "account_locked",
            AuthError::AccountInactive => "account_inactive",
            AuthError::InvalidToken => "invalid_token",
            AuthError::ExpiredSession => "expired_session",
            AuthError::PermissionDenied { .. } | AuthError::UnknownPermission(_) => {
                "permission_denied"
            }
            AuthError::Validation(_) => "validation_error",
            AuthError::UserNotFound => "not_found",
            AuthError::TransientStoreFailure(_) => "transient_store_failure",
            AuthError::Store(_) => "store_error",
            AuthError::Configuration(_) => "configuration_error",
        }
    }

    /// Message safe to show an end user.
    ///
    /// Authentication failures collapse to one generic sentence so the response
    /// never reveals whether an account exists. A lockout states when to retry;
    /// a permission denial names the roles that would be allowed.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials | AuthError::AccountInactive => {
                "Invalid username or password".to_string()
            }
            AuthError::AccountLocked { until } => format!(
                "Account is temporarily locked due to too many failed login attempts. Try again after {}",
                until.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            AuthError::InvalidToken | AuthError::ExpiredSession => {
                "Please log in to continue".to_string()
            }
            AuthError::UnknownPermission(_) => {
                "You don't have permission to perform this action".to_string()
            }
            AuthError::PermissionDenied { required_roles, .. } if required_roles.is_empty() => {
                "You don't have permission to perform this action".to_string()
            }
            AuthError::PermissionDenied { required_roles, .. } => format!(
                "You don't have permission to perform this action (requires role: {})",
                join_roles(required_roles)
            ),
            AuthError::DuplicateIdentity => "Username or email already exists".to_string(),
            AuthError::Validation(msg) => msg.clone(),
            AuthError::UserNotFound => "User not found".to_string(),
            AuthError::TransientStoreFailure(_) => {
                "The service is temporarily unavailable, please retry".to_string()
            }
            AuthError::Store(_) | AuthError::Configuration(_) => "Internal error".to_string(),
        }
    }
}

impl From<DomainError> for AuthError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => AuthError::Validation(msg),
            DomainError::InvalidId(msg) => AuthError::Validation(msg),
        }
    }
}
