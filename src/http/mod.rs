//! HTTP surface: routes and ticket middleware

pub mod middleware;
pub mod routes;

pub use routes::build_router;
