//! HTTP API

pub mod rest;

pub use rest::router::{internal_router, public_router};
