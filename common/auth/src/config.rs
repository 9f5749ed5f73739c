use crate::roles::Role;

/// Portal paths the gate and the forced-logout path redirect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRoutes {
    pub user_login: String,
    pub admin_login: String,
    pub user_home: String,
    pub village_admin_home: String,
    pub super_admin_home: String,
}

impl PortalRoutes {
    pub fn new() -> Self {
        Self {
            user_login: "/login".to_string(),
            admin_login: "/admin/login".to_string(),
            user_home: "/dashboard".to_string(),
            village_admin_home: "/admin/dashboard".to_string(),
            super_admin_home: "/super-admin/dashboard".to_string(),
        }
    }

    pub fn with_user_login(mut self, path: impl Into<String>) -> Self {
        self.user_login = path.into();
        self
    }

    pub fn with_admin_login(mut self, path: impl Into<String>) -> Self {
        self.admin_login = path.into();
        self
    }

    pub fn with_home(mut self, role: Role, path: impl Into<String>) -> Self {
        let path = path.into();
        match role {
            Role::User => self.user_home = path,
            Role::VillageAdmin => self.village_admin_home = path,
            Role::SuperAdmin => self.super_admin_home = path,
        }
        self
    }

    pub fn login_for(&self, role: Role) -> &str {
        if role.is_admin() {
            &self.admin_login
        } else {
            &self.user_login
        }
    }

    pub fn home_for(&self, role: Role) -> &str {
        match role {
            Role::User => &self.user_home,
            Role::VillageAdmin => &self.village_admin_home,
            Role::SuperAdmin => &self.super_admin_home,
        }
    }
}

impl Default for PortalRoutes {
    fn default() -> Self {
        Self::new()
    }
}
