use serde::{Deserialize, Serialize};

use ctms_core::UserId;

use crate::{Role, User};

/// The identity resolved from a valid session.
///
/// This is what collaborators receive after a successful `authorize`; it
/// carries no credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
        }
    }
}
