use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC.
///
/// The set is closed: every account holds exactly one of these. Privilege
/// breadth is `Admin ⊇ {Treasurer, Secretary} ⊇ Member ⊇ Viewer`, with
/// treasurer and secretary not ordered against each other.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Treasurer,
    Secretary,
    Member,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::Treasurer,
        Role::Secretary,
        Role::Member,
        Role::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Treasurer => "treasurer",
            Role::Secretary => "secretary",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::Admin => "Full system administrator with all permissions",
            Role::Treasurer => "Manages members, transactions and financial reports",
            Role::Secretary => "Manages member records and generates reports",
            Role::Member => "Read access to members, finances and reports",
            Role::Viewer => "Read-only access to the dashboard and reports",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}'; must be one of: admin, treasurer, secretary, member, viewer")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "treasurer" => Ok(Role::Treasurer),
            "secretary" => Ok(Role::Secretary),
            "member" => Ok(Role::Member),
            "viewer" => Ok(Role::Viewer),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}
