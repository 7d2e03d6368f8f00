//! User account record and creation rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ctms_core::{DomainError, UserId};

use crate::Role;

pub const MIN_USERNAME_LEN: usize = 3;

/// Stored identity record.
///
/// # Invariants
/// - `username` and `email` are stored trimmed and lowercased, so uniqueness is
///   case-insensitive.
/// - `failed_login_attempts` is 0 after any successful login.
/// - `locked_until` is `None` unless the failure threshold was reached.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub salt: String,
    pub role: Role,
    pub full_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl core::fmt::Debug for User {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("is_active", &self.is_active)
            .field("failed_login_attempts", &self.failed_login_attempts)
            .field("locked_until", &self.locked_until)
            .finish_non_exhaustive()
    }
}

/// Lowercased, trimmed form used for storage and lookups.
pub fn normalize_identity(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Validated input for account creation (password not yet hashed).
#[derive(Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub full_name: String,
}

impl core::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl NewUser {
    /// Normalize and validate raw input.
    pub fn parse(
        username: &str,
        email: &str,
        password: &str,
        role: Role,
        full_name: &str,
        min_password_len: usize,
    ) -> Result<Self, DomainError> {
        let username = normalize_identity(username);
        if username.chars().count() < MIN_USERNAME_LEN {
            return Err(DomainError::validation(format!(
                "Username must be at least {MIN_USERNAME_LEN} characters long"
            )));
        }
        if username.chars().any(char::is_whitespace) {
            return Err(DomainError::validation("Username cannot contain whitespace"));
        }

        let email = parse_email(email)?;
        validate_password(password, min_password_len)?;
        let full_name = parse_full_name(full_name)?;

        Ok(Self {
            username,
            email,
            password: password.to_string(),
            role,
            full_name,
        })
    }
}

/// Validated edit of an existing account's contact fields. `None` leaves the
/// field unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub full_name: Option<String>,
}

impl ProfileUpdate {
    pub fn parse(email: Option<&str>, full_name: Option<&str>) -> Result<Self, DomainError> {
        if email.is_none() && full_name.is_none() {
            return Err(DomainError::validation("Nothing to update"));
        }
        Ok(Self {
            email: email.map(parse_email).transpose()?,
            full_name: full_name.map(parse_full_name).transpose()?,
        })
    }
}

fn parse_email(raw: &str) -> Result<String, DomainError> {
    let email = normalize_identity(raw);
    if email.is_empty() || !email.contains('@') {
        return Err(DomainError::validation("Valid email address is required"));
    }
    Ok(email)
}

fn parse_full_name(raw: &str) -> Result<String, DomainError> {
    let full_name = raw.trim();
    if full_name.is_empty() {
        return Err(DomainError::validation("Full name cannot be empty"));
    }
    Ok(full_name.to_string())
}

pub fn validate_password(password: &str, min_len: usize) -> Result<(), DomainError> {
    if password.chars().count() < min_len {
        return Err(DomainError::validation(format!(
            "Password must be at least {min_len} characters long"
        )));
    }
    Ok(())
}
