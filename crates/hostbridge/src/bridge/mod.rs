//! Wire protocol and framing shared by the socket transport and the client.
//!
//! # Architecture
//!
//! - **protocol**: Message types (Command, Outcome, WireResponse, ErrorKind)
//! - **codec**: Newline-delimited JSON codec for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
