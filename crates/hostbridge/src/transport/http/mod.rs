//! RPC-over-HTTP transport via axum.

mod routes;
mod server;

pub use routes::{ExecuteToolRequest, routes};
pub use server::{serve_http, serve_http_on};
