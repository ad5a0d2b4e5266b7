//! Wire types shared by every transport.
//!
//! Requests are `{"tool": ..., "arguments": {...}}`, responses are
//! `{"success": true, "result": ...}` or `{"success": false, "error": ...}`.

use serde::{Deserialize, Deserializer, Serialize};

/// Argument bag handed verbatim to a handler.
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for one invocation crossing the host-thread boundary.
///
/// UUID v4 so a late result can never be mistaken for a newer invocation's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(uuid::Uuid);

impl InvocationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded request: which tool to run and with what arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub tool: String,
    #[serde(default, deserialize_with = "deserialize_arguments")]
    pub arguments: Arguments,
}

impl Command {
    pub fn new(tool: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            tool: tool.into(),
            arguments,
        }
    }
}

/// `null` arguments mean "no arguments"; anything other than an object is rejected.
fn deserialize_arguments<'de, D>(deserializer: D) -> Result<Arguments, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(Arguments::new()),
        Some(serde_json::Value::Object(map)) => Ok(map),
        Some(other) => Err(serde::de::Error::custom(format!(
            "arguments must be an object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Why a command failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request frame or payload.
    DecodeError,
    /// No handler registered under the requested name.
    UnknownTool,
    /// The handler returned an error or panicked on the host thread.
    HandlerError,
    /// The host thread did not finish within the configured bound.
    Timeout,
    /// Transport-level failure between client and bridge.
    ConnectionError,
    /// The host executor has shut down and can no longer run handlers.
    HostUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecodeError => "decode_error",
            Self::UnknownTool => "unknown_tool",
            Self::HandlerError => "handler_error",
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection_error",
            Self::HostUnavailable => "host_unavailable",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { result: serde_json::Value },
    Failure { kind: ErrorKind, message: String },
}

impl Outcome {
    pub fn success(result: serde_json::Value) -> Self {
        Self::Success { result }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_tool(tool: &str) -> Self {
        Self::failure(ErrorKind::UnknownTool, format!("Unknown tool: {}", tool))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Failure kind, or `None` on success.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn into_wire(self) -> WireResponse {
        WireResponse::from(self)
    }
}

/// On-the-wire response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure classification; absent on success and ignored by older clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl From<Outcome> for WireResponse {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success { result } => Self {
                success: true,
                result: Some(result),
                error: None,
                kind: None,
            },
            Outcome::Failure { kind, message } => Self {
                success: false,
                result: None,
                error: Some(message),
                kind: Some(kind),
            },
        }
    }
}

impl WireResponse {
    /// Convert back into an outcome. A failure without a kind is reported as
    /// a handler error, the only kind older bridges ever produced.
    pub fn into_outcome(self) -> Outcome {
        if self.success {
            Outcome::success(self.result.unwrap_or(serde_json::Value::Null))
        } else {
            Outcome::failure(
                self.kind.unwrap_or(ErrorKind::HandlerError),
                self.error.unwrap_or_else(|| "Unknown error".to_string()),
            )
        }
    }
}
