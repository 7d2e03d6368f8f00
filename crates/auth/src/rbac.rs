//! Central role → permission table and the authorization decision.
//!
//! Every role check in the application goes through [`can`] (or [`require`]).
//! Anything not listed in the table for a role is denied.

use serde::Serialize;

use crate::error::AuthError;
use crate::{Action, Permission, Resource, Role};

// ─────────────────────────────────────────────────────────────────────────────
// Role table
// ─────────────────────────────────────────────────────────────────────────────

const fn p(resource: Resource, action: Action) -> Permission {
    Permission::new(resource, action)
}

const VIEWER: &[Permission] = &[
    p(Resource::Dashboard, Action::View),
    p(Resource::Reports, Action::View),
];

const MEMBER: &[Permission] = &[
    p(Resource::Dashboard, Action::View),
    p(Resource::Reports, Action::View),
    p(Resource::Members, Action::View),
    p(Resource::Transactions, Action::View),
    p(Resource::Categories, Action::View),
];

const SECRETARY: &[Permission] = &[
    p(Resource::Dashboard, Action::View),
    p(Resource::Reports, Action::View),
    p(Resource::Reports, Action::Generate),
    p(Resource::Members, Action::View),
    p(Resource::Members, Action::Create),
    p(Resource::Members, Action::Update),
    p(Resource::Transactions, Action::View),
    p(Resource::Categories, Action::View),
];

const TREASURER: &[Permission] = &[
    p(Resource::Dashboard, Action::View),
    p(Resource::Reports, Action::View),
    p(Resource::Reports, Action::Generate),
    p(Resource::Members, Action::View),
    p(Resource::Members, Action::Create),
    p(Resource::Members, Action::Update),
    p(Resource::Transactions, Action::View),
    p(Resource::Transactions, Action::Create),
    p(Resource::Transactions, Action::Update),
    p(Resource::Transactions, Action::Delete),
    p(Resource::Categories, Action::View),
    p(Resource::Categories, Action::Create),
    p(Resource::Categories, Action::Update),
    p(Resource::Categories, Action::Delete),
];

const ADMIN: &[Permission] = &[
    p(Resource::Dashboard, Action::View),
    p(Resource::Reports, Action::View),
    p(Resource::Reports, Action::Generate),
    p(Resource::Members, Action::View),
    p(Resource::Members, Action::Create),
    p(Resource::Members, Action::Update),
    p(Resource::Members, Action::Delete),
    p(Resource::Transactions, Action::View),
    p(Resource::Transactions, Action::Create),
    p(Resource::Transactions, Action::Update),
    p(Resource::Transactions, Action::Delete),
    p(Resource::Categories, Action::View),
    p(Resource::Categories, Action::Create),
    p(Resource::Categories, Action::Update),
    p(Resource::Categories, Action::Delete),
    p(Resource::Users, Action::View),
    p(Resource::Users, Action::Create),
    p(Resource::Users, Action::Update),
    p(Resource::Users, Action::Delete),
    p(Resource::AuditLog, Action::View),
    p(Resource::Settings, Action::View),
    p(Resource::Settings, Action::Update),
];

/// Every permission explicitly granted to `role`.
pub fn permissions_for(role: Role) -> &'static [Permission] {
    match role {
        Role::Admin => ADMIN,
        Role::Treasurer => TREASURER,
        Role::Secretary => SECRETARY,
        Role::Member => MEMBER,
        Role::Viewer => VIEWER,
    }
}

/// Pure, default-deny authorization lookup.
///
/// - No IO
/// - No panics
/// - Identical inputs always yield identical outputs
pub fn can(role: Role, resource: Resource, action: Action) -> bool {
    permissions_for(role).contains(&Permission::new(resource, action))
}

/// Roles that hold `permission`, narrowest first.
pub fn roles_granting(permission: Permission) -> Vec<Role> {
    let mut roles: Vec<Role> = Role::ALL
        .into_iter()
        .filter(|r| permissions_for(*r).contains(&permission))
        .collect();
    roles.sort_by_key(|r| permissions_for(*r).len());
    roles
}

/// [`can`] as a `Result`, carrying the roles that would have been allowed.
pub fn require(role: Role, permission: Permission) -> Result<(), AuthError> {
    if can(role, permission.resource, permission.action) {
        Ok(())
    } else {
        Err(AuthError::PermissionDenied {
            role,
            permission,
            required_roles: roles_granting(permission),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation
// ─────────────────────────────────────────────────────────────────────────────

/// Explanation of a single authorization decision, for admin tooling.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub role: Role,
    pub required_permission: String,
    pub granted: bool,
    pub reason: String,
    pub effective_permissions: Vec<String>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub message: String,
    pub granting_roles: Vec<Role>,
    pub suggestions: Vec<String>,
}

/// Explain why `role` is (or is not) allowed `required`.
pub fn explain_authorization(role: Role, required: Permission) -> AuthorizationExplanation {
    let effective_permissions: Vec<String> =
        permissions_for(role).iter().map(|p| p.to_string()).collect();
    let required_str = required.to_string();

    if can(role, required.resource, required.action) {
        return AuthorizationExplanation {
            role,
            required_permission: required_str.clone(),
            granted: true,
            reason: format!("Role '{role}' is granted '{required_str}'"),
            effective_permissions,
            denial_reason: None,
        };
    }

    let granting_roles = roles_granting(required);
    let suggestions = if granting_roles.is_empty() {
        vec![format!("No role is granted '{required_str}'")]
    } else {
        vec![format!(
            "Assign one of the following roles: {}",
            join_roles(&granting_roles)
        )]
    };

    AuthorizationExplanation {
        role,
        required_permission: required_str.clone(),
        granted: false,
        reason: format!("Role '{role}' is not granted '{required_str}'"),
        effective_permissions,
        denial_reason: Some(DenialReason {
            message: format!("Missing required permission: '{required_str}'"),
            granting_roles,
            suggestions,
        }),
    }
}

pub(crate) fn join_roles(roles: &[Role]) -> String {
    roles.iter().map(Role::as_str).collect::<Vec<_>>().join(", ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Role definition with its granted permissions (for audit/display).
#[derive(Debug, Clone, Serialize)]
pub struct RoleDefinition {
    pub name: Role,
    pub description: &'static str,
    pub permissions: Vec<String>,
}

/// Permission definition (for audit/display).
#[derive(Debug, Clone, Serialize)]
pub struct PermissionDefinition {
    pub name: String,
    pub category: &'static str,
    pub granted_to: Vec<Role>,
}

/// Complete view of the RBAC table.
#[derive(Debug, Clone, Serialize)]
pub struct RbacRegistry {
    pub roles: Vec<RoleDefinition>,
    pub permissions: Vec<PermissionDefinition>,
}

impl RbacRegistry {
    pub fn build() -> Self {
        let roles = Role::ALL
            .into_iter()
            .map(|role| RoleDefinition {
                name: role,
                description: role.description(),
                permissions: permissions_for(role).iter().map(|p| p.to_string()).collect(),
            })
            .collect();

        let mut permissions: Vec<PermissionDefinition> = Vec::new();
        for resource in Resource::ALL {
            for action in Action::ALL {
                let perm = Permission::new(resource, action);
                let granted_to = roles_granting(perm);
                if granted_to.is_empty() {
                    continue;
                }
                permissions.push(PermissionDefinition {
                    name: perm.to_string(),
                    category: resource.as_str(),
                    granted_to,
                });
            }
        }

        Self { roles, permissions }
    }

    pub fn role(&self, role: Role) -> Option<&RoleDefinition> {
        self.roles.iter().find(|r| r.name == role)
    }
}
