//! HTTP API surface.
//!
//! A thin axum layer over the coordinator: request/response shaping and
//! error-to-status mapping happen here, nothing else.

pub mod routes;
pub mod server;
