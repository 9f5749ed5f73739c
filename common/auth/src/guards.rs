use tracing::debug;

use crate::config::PortalRoutes;
use crate::roles::Role;

/// Outcome of a route admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// The session held for this role may enter.
    Admit(Role),
    /// Send the caller elsewhere.
    Redirect(String),
}

/// Admission by set membership over the sessions currently held.
///
/// `held` lists the roles with a live session, the role in focus first. A user
/// session and an admin session may coexist, so the first held role that is
/// also required wins. Without a qualifying session the caller goes to the
/// home of the session it does hold, or to a login screen when it holds none.
pub fn ensure_role(required: &[Role], held: &[Role], routes: &PortalRoutes) -> GateDecision {
    if let Some(role) = held.iter().copied().find(|role| required.contains(role)) {
        return GateDecision::Admit(role);
    }

    if let Some(role) = held.first().copied() {
        debug!(%role, ?required, "session outside required roles; redirecting home");
        return GateDecision::Redirect(routes.home_for(role).to_string());
    }

    let target = if required.is_empty() || required.iter().any(|role| !role.is_admin()) {
        &routes.user_login
    } else {
        &routes.admin_login
    };
    GateDecision::Redirect(target.clone())
}
