use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ctms_auth::{AuditAction, AuditFilter, NewAuditRecord, Role, Session};
use ctms_core::{SessionId, UserId};
use ctms_infra::CreateUserRequest;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct CreateUserBody {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub full_name: String,
}

impl CreateUserBody {
    pub fn into_request(self) -> Result<CreateUserRequest, axum::response::Response> {
        Ok(CreateUserRequest {
            role: parse_role(&self.role)?,
            username: self.username,
            email: self.email,
            password: self.password,
            full_name: self.full_name,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub email: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub role: String,
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn into_filter(self) -> Result<AuditFilter, axum::response::Response> {
        let user_id = self.user_id.as_deref().map(parse_user_id).transpose()?;
        let action = self.action.map(|a| {
            let Ok(action) = a.parse::<AuditAction>();
            action
        });
        Ok(AuditFilter {
            user_id,
            action,
            resource: self.resource,
            from: self.from,
            to: self.to,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordEventRequest {
    pub action: String,
    pub resource: Option<String>,
    pub resource_id: Option<String>,
    pub details: Option<String>,
}

impl RecordEventRequest {
    pub fn into_entry(self, ip_address: Option<&str>) -> Result<NewAuditRecord, axum::response::Response> {
        let action = self.action.trim();
        if action.is_empty() {
            return Err(errors::bad_request("action must not be empty"));
        }
        let Ok(action) = action.parse::<AuditAction>();
        let mut entry = NewAuditRecord::new(None, action).ip_address(ip_address);
        entry.resource = self.resource;
        entry.resource_id = self.resource_id;
        entry.details = self.details;
        Ok(entry)
    }
}

// -------------------------
// Response DTOs
// -------------------------

/// Session listing without the bearer secret.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl From<Session> for SessionView {
    fn from(s: Session) -> Self {
        Self {
            id: s.id,
            created_at: s.created_at,
            expires_at: s.expires_at,
            ip_address: s.ip_address,
            user_agent: s.user_agent,
        }
    }
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_user_id(raw: &str) -> Result<UserId, axum::response::Response> {
    raw.parse::<UserId>()
        .map_err(|_| errors::bad_request(format!("invalid user id '{raw}'")))
}

pub fn parse_role(raw: &str) -> Result<Role, axum::response::Response> {
    raw.parse::<Role>().map_err(|_| {
        let valid: Vec<&str> = Role::ALL.iter().map(Role::as_str).collect();
        errors::bad_request(format!("role must be one of: {}", valid.join(", ")))
    })
}
