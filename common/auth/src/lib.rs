pub mod claims;
pub mod config;
pub mod error;
pub mod extractors;
pub mod guards;
pub mod roles;

pub use claims::{has_jwt_shape, role_hint, subject_hint, UnverifiedClaims};
pub use config::PortalRoutes;
pub use error::{AuthError, AuthResult};
pub use extractors::{bearer_from_headers, bearer_header, parse_bearer};
pub use guards::{ensure_role, GateDecision};
pub use roles::{Role, ROLE_SUPER_ADMIN, ROLE_USER, ROLE_VILLAGE_ADMIN};
