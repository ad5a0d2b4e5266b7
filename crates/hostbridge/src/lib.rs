//! hostbridge: synchronous command bridge into a single-threaded host.
//!
//! Network clients send `{"tool": ..., "arguments": {...}}`; the bridge runs
//! the named handler on the host's main thread and returns
//! `{"success": ..., "result" | "error": ...}`.
//!
//! The host owns a [`HostExecutor`] and drives it from its main loop
//! (`run`, or `tick`/`drain` from a timer). Everything else runs on tokio.

pub mod bridge;
pub mod client;
pub mod config;
pub mod marshal;
pub mod registry;
pub mod service;
pub mod supervisor;
pub mod transport;
mod version;

pub use bridge::protocol::{Arguments, Command, ErrorKind, InvocationId, Outcome, WireResponse};
pub use client::{ClientError, RpcBridgeClient, TcpBridgeClient};
pub use config::{BridgeConfig, ConfigError};
pub use marshal::{HostExecutor, Marshaler, PendingInvocation, WakeHook, channel};
pub use registry::{Handler, ToolInfo, ToolRegistry, UnknownTool};
pub use service::{BridgeService, ServiceSnapshot, ServiceStatus};
pub use supervisor::{InFlight, InvocationSupervisor};
pub use transport::{ServerHandle, TcpBridgeServer, serve_http, serve_http_on};
pub use version::{HOSTBRIDGE_VERSION, VersionInfo};
