//! Request extractors shared by the endpoints.

mod auth;
mod json;

pub use self::auth::*;
pub use self::json::*;
