//! HTTP API module for the Geko runtime
//!
//! Compiled only with the `http-api` feature.

pub mod routes;
pub mod server;
pub mod types;

pub use routes::AppState;
pub use server::{HttpApiServer, ServerError};
