//! Middlewares wrapping all endpoints.

mod cors;
mod handle_panic;
mod metrics;
mod trace;

pub use self::cors::*;
pub use self::handle_panic::*;
pub use self::metrics::*;
pub use self::trace::*;
