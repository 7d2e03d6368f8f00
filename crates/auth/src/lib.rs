//! `ctms-auth`: pure authentication/authorization domain.
//!
//! No storage and no transport: password hashing, lockout rules, session
//! validity, the RBAC table and the audit record model. The infra crate wires
//! these to stores.

pub mod audit;
pub mod error;
pub mod lockout;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod rbac;
pub mod roles;
pub mod session;
pub mod user;

pub use audit::{AuditAction, AuditFilter, AuditRecord, NewAuditRecord};
pub use error::AuthError;
pub use lockout::{
    FailureOutcome, LockoutPolicy, SuccessOutcome, clear_lockout, is_locked, register_success,
};
pub use password::{PasswordDigest, PasswordHasher, generate_temporary_password};
pub use permissions::{Action, ParsePermissionError, Permission, Resource};
pub use principal::Principal;
pub use rbac::{
    AuthorizationExplanation, RbacRegistry, can, explain_authorization, permissions_for, require,
    roles_granting,
};
pub use roles::{Role, UnknownRole};
pub use session::{Session, SessionToken, validate_session};
pub use user::{NewUser, ProfileUpdate, User, normalize_identity};
