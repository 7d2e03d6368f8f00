use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Something a role may act upon.
///
/// These are the capability targets exposed by the collaborators (membership,
/// finance, reporting screens) plus the auth core's own administration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Dashboard,
    Members,
    Transactions,
    Categories,
    Reports,
    Users,
    AuditLog,
    Settings,
}

/// What a role wants to do to a resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Update,
    Delete,
    Generate,
}

impl Resource {
    pub const ALL: [Resource; 8] = [
        Resource::Dashboard,
        Resource::Members,
        Resource::Transactions,
        Resource::Categories,
        Resource::Reports,
        Resource::Users,
        Resource::AuditLog,
        Resource::Settings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Dashboard => "dashboard",
            Resource::Members => "members",
            Resource::Transactions => "transactions",
            Resource::Categories => "categories",
            Resource::Reports => "reports",
            Resource::Users => "users",
            Resource::AuditLog => "audit_log",
            Resource::Settings => "settings",
        }
    }
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::View,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::Generate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Generate => "generate",
        }
    }
}

impl core::fmt::Display for Resource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParsePermissionError {
    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("permission must look like 'resource.action', got '{0}'")]
    Malformed(String),
}

impl FromStr for Resource {
    type Err = ParsePermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Resource::ALL
            .into_iter()
            .find(|r| r.as_str() == needle)
            .ok_or_else(|| ParsePermissionError::UnknownResource(s.to_string()))
    }
}

impl FromStr for Action {
    type Err = ParsePermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == needle)
            .ok_or_else(|| ParsePermissionError::UnknownAction(s.to_string()))
    }
}

/// A `(resource, action)` capability, rendered as `"resource.action"`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub resource: Resource,
    pub action: Action,
}

impl Permission {
    pub const fn new(resource: Resource, action: Action) -> Self {
        Self { resource, action }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.resource, self.action)
    }
}

impl FromStr for Permission {
    type Err = ParsePermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .rsplit_once('.')
            .ok_or_else(|| ParsePermissionError::Malformed(s.to_string()))?;
        Ok(Self::new(resource.parse()?, action.parse()?))
    }
}
