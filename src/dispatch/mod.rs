//! The redirect dispatch surface: client IP extraction, target selection,
//! parameter rewriting, and the HTTP pipeline that ties them together.

pub mod error;
pub mod handlers;
pub mod ip;
pub mod params;
pub mod routes;
pub mod selector;

pub use error::DispatchError;
pub use routes::create_dispatch_router;
