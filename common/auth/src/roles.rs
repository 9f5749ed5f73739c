use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

pub const ROLE_USER: &str = "user";
pub const ROLE_VILLAGE_ADMIN: &str = "village_admin";
pub const ROLE_SUPER_ADMIN: &str = "super_admin";

/// The three role classes served from one browser profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    VillageAdmin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::VillageAdmin, Role::SuperAdmin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => ROLE_USER,
            Role::VillageAdmin => ROLE_VILLAGE_ADMIN,
            Role::SuperAdmin => ROLE_SUPER_ADMIN,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::VillageAdmin | Role::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "village_admin" | "villageadmin" | "admin" => Ok(Role::VillageAdmin),
            "super_admin" | "superadmin" => Ok(Role::SuperAdmin),
            other => Err(AuthError::UnknownRole(other.to_string())),
        }
    }
}
