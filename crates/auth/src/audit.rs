//! Audit record model and query filter.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ctms_core::{AuditRecordId, UserId};

pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Audit action vocabulary.
///
/// Collaborators may log their own business events through `Custom`; the
/// stored form is always the upper-snake-case string. Everything else is
/// written only by the auth core itself, see [`AuditAction::is_caller_recordable`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuditAction {
    LoginSuccess,
    LoginFailed,
    LoginLocked,
    Logout,
    AccessGranted,
    AccessDenied,
    PasswordChanged,
    PasswordChangeFailed,
    PasswordReset,
    UserCreated,
    UserUpdated,
    RoleChanged,
    UserStatusChanged,
    AccountUnlocked,
    SessionRevoked,
    PageAccess,
    ApplicationError,
    Custom(String),
}

impl AuditAction {
    const KNOWN: [AuditAction; 17] = [
        AuditAction::LoginSuccess,
        AuditAction::LoginFailed,
        AuditAction::LoginLocked,
        AuditAction::Logout,
        AuditAction::AccessGranted,
        AuditAction::AccessDenied,
        AuditAction::PasswordChanged,
        AuditAction::PasswordChangeFailed,
        AuditAction::PasswordReset,
        AuditAction::UserCreated,
        AuditAction::UserUpdated,
        AuditAction::RoleChanged,
        AuditAction::UserStatusChanged,
        AuditAction::AccountUnlocked,
        AuditAction::SessionRevoked,
        AuditAction::PageAccess,
        AuditAction::ApplicationError,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            AuditAction::LoginSuccess => "LOGIN_SUCCESS",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::LoginLocked => "LOGIN_LOCKED",
            AuditAction::Logout => "LOGOUT",
            AuditAction::AccessGranted => "ACCESS_GRANTED",
            AuditAction::AccessDenied => "ACCESS_DENIED",
            AuditAction::PasswordChanged => "PASSWORD_CHANGED",
            AuditAction::PasswordChangeFailed => "PASSWORD_CHANGE_FAILED",
            AuditAction::PasswordReset => "PASSWORD_RESET",
            AuditAction::UserCreated => "USER_CREATED",
            AuditAction::UserUpdated => "USER_UPDATED",
            AuditAction::RoleChanged => "ROLE_CHANGED",
            AuditAction::UserStatusChanged => "USER_STATUS_CHANGED",
            AuditAction::AccountUnlocked => "ACCOUNT_UNLOCKED",
            AuditAction::SessionRevoked => "SESSION_REVOKED",
            AuditAction::PageAccess => "PAGE_ACCESS",
            AuditAction::ApplicationError => "APPLICATION_ERROR",
            AuditAction::Custom(s) => s,
        }
    }

    /// Whether an authenticated caller may log this action through the
    /// event endpoint. Security events are reserved for the auth core.
    pub fn is_caller_recordable(&self) -> bool {
        matches!(
            self,
            AuditAction::PageAccess | AuditAction::ApplicationError | AuditAction::Custom(_)
        )
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Ok(Self::KNOWN
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .unwrap_or(AuditAction::Custom(normalized)))
    }
}

impl Serialize for AuditAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AuditAction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let Ok(action) = s.parse::<AuditAction>();
        Ok(action)
    }
}

/// An audit entry about to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAuditRecord {
    pub user_id: Option<UserId>,
    pub action: AuditAction,
    pub resource: Option<String>,
    pub resource_id: Option<String>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
}

impl NewAuditRecord {
    pub fn new(user_id: Option<UserId>, action: AuditAction) -> Self {
        Self {
            user_id,
            action,
            resource: None,
            resource_id: None,
            details: None,
            ip_address: None,
        }
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn resource_id(mut self, resource_id: impl ToString) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn ip_address(mut self, ip: Option<&str>) -> Self {
        self.ip_address = ip.map(str::to_string);
        self
    }

    pub fn into_record(self, timestamp: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            id: AuditRecordId::new(),
            user_id: self.user_id,
            action: self.action,
            resource: self.resource,
            resource_id: self.resource_id,
            details: self.details,
            ip_address: self.ip_address,
            timestamp,
        }
    }
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditRecordId,
    pub user_id: Option<UserId>,
    pub action: AuditAction,
    pub resource: Option<String>,
    pub resource_id: Option<String>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Read-only filter over the audit log. Bounds are `[from, to)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub user_id: Option<UserId>,
    pub action: Option<AuditAction>,
    pub resource: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if self.user_id.is_some() && record.user_id != self.user_id {
            return false;
        }
        if let Some(action) = &self.action {
            if &record.action != action {
                return false;
            }
        }
        if let Some(resource) = &self.resource {
            if record.resource.as_deref() != Some(resource.as_str()) {
                return false;
            }
        }
        if matches!(self.from, Some(from) if record.timestamp < from) {
            return false;
        }
        if matches!(self.to, Some(to) if record.timestamp >= to) {
            return false;
        }
        true
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn known_actions_parse_from_their_wire_names() {
        assert_eq!("login_failed".parse::<AuditAction>().unwrap(), AuditAction::LoginFailed);
        assert_eq!(
            "member_added".parse::<AuditAction>().unwrap(),
            AuditAction::Custom("MEMBER_ADDED".to_string())
        );
    }

    #[test]
    fn only_business_actions_are_caller_recordable() {
        assert!(AuditAction::PageAccess.is_caller_recordable());
        assert!(AuditAction::ApplicationError.is_caller_recordable());
        assert!("member_added".parse::<AuditAction>().unwrap().is_caller_recordable());

        for reserved in ["ACCESS_GRANTED", "login_success", "PASSWORD_RESET", "user_updated"] {
            let action: AuditAction = reserved.parse().unwrap();
            assert!(!action.is_caller_recordable(), "{reserved} must be reserved");
        }
    }

    #[test]
    fn action_serializes_as_plain_string() {
        let json = serde_json::to_string(&AuditAction::AccessDenied).unwrap();
        assert_eq!(json, "\"ACCESS_DENIED\"");
        let back: AuditAction = serde_json::from_str("\"ACCESS_DENIED\"").unwrap();
        assert_eq!(back, AuditAction::AccessDenied);
    }

    #[test]
    fn filter_applies_every_criterion() {
        let user = UserId::new();
        let rec = NewAuditRecord::new(Some(user), AuditAction::RoleChanged)
            .resource("users")
            .into_record(t0());

        assert!(AuditFilter::default().matches(&rec));
        assert!(AuditFilter { user_id: Some(user), ..Default::default() }.matches(&rec));
        assert!(!AuditFilter { user_id: Some(UserId::new()), ..Default::default() }.matches(&rec));
        assert!(!AuditFilter { action: Some(AuditAction::Logout), ..Default::default() }.matches(&rec));
        assert!(!AuditFilter { resource: Some("members".into()), ..Default::default() }.matches(&rec));
        assert!(AuditFilter { from: Some(t0()), to: Some(t0() + Duration::seconds(1)), ..Default::default() }
            .matches(&rec));
        assert!(!AuditFilter { to: Some(t0()), ..Default::default() }.matches(&rec));
    }
}
