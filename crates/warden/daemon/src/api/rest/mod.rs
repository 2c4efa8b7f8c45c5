//! REST API: routers, handlers and gateway middleware

pub mod auth;
pub mod handlers;
pub mod limits;
pub mod rate_limit;
pub mod router;
pub mod state;
