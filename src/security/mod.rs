pub mod auth;
pub mod cors;
pub mod identity;
pub mod jwt;
pub mod password;

pub use auth::{
    cookie_to_bearer, create_auth_cookie, removal_cookie, require_admin, require_top_level_admin,
    AuthenticatedUser, AUTH_COOKIE,
};
pub use cors::{create_cors_layer, CorsConfig};
pub use identity::{IdentityResolver, VerifiedSession};
pub use jwt::{extract_bearer_token, Claims, JwtConfig, JwtManager};
pub use password::{hash_password, verify_password};
