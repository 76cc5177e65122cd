pub mod jwt;
pub mod middleware;
pub mod password;

pub use jwt::{issue_token, verify_token, Claims};
pub use middleware::require_auth;
pub use password::{hash_password, verify_password};
