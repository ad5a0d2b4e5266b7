//! Transport layer for hostbridge.
//!
//! Both transports decode a request into a [`Command`](crate::bridge::protocol::Command),
//! hand it to the shared [`BridgeService`](crate::service::BridgeService), and
//! encode the outcome:
//! - `tcp`: one JSON object per line on a raw socket
//! - `http`: `POST /rpc/execute_tool` with a string-typed JSON payload

pub mod http;
pub mod tcp;

pub use http::{serve_http, serve_http_on};
pub use tcp::{ServerHandle, TcpBridgeServer};
