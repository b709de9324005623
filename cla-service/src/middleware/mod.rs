pub mod admin;
pub mod auth;

pub use admin::admin_auth_middleware;
pub use auth::{ManagerPrincipal, auth_middleware};
