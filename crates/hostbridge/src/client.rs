//! Client side of both transports, for whatever sits in front of the bridge
//! (a tool-protocol server, a test harness, a CLI).

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::{CodecError, JsonLinesCodec};
use crate::bridge::protocol::{Arguments, Command, ErrorKind, Outcome, WireResponse};
use crate::config::BridgeConfig;
use crate::registry::ToolInfo;
use crate::transport::http::ExecuteToolRequest;
use crate::version::HOSTBRIDGE_VERSION;

/// Default bound on one request/response exchange. Slightly longer than the
/// server-side timeout so the server's own timeout failure arrives first.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(35);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not connect to host bridge at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to host bridge failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("host bridge closed the connection without responding")]
    NoResponse,

    #[error("no response from host bridge within {0:?}")]
    Timeout(Duration),

    #[error("invalid response from host bridge: {0}")]
    InvalidResponse(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The bridge answered with `success: false`.
    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },
}

impl ClientError {
    /// Map onto the bridge's error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Connect { .. } | ClientError::Io(_) | ClientError::NoResponse => {
                ErrorKind::ConnectionError
            }
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::InvalidResponse(_) => ErrorKind::DecodeError,
            ClientError::Http(e) if e.is_timeout() => ErrorKind::Timeout,
            ClientError::Http(_) => ErrorKind::ConnectionError,
            ClientError::Remote { kind, .. } => *kind,
        }
    }
}

fn into_result(outcome: Outcome) -> Result<Value, ClientError> {
    match outcome {
        Outcome::Success { result } => Ok(result),
        Outcome::Failure { kind, message } => Err(ClientError::Remote { kind, message }),
    }
}

/// One connection per call over the newline-framed socket transport.
#[derive(Debug, Clone)]
pub struct TcpBridgeClient {
    addr: String,
    timeout: Duration,
    max_frame_bytes: usize,
}

impl TcpBridgeClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_CLIENT_TIMEOUT,
            max_frame_bytes: crate::bridge::codec::DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(format!("{}:{}", config.host, config.port))
            .with_timeout(config.timeout + Duration::from_secs(5))
            .with_max_frame_bytes(config.max_frame_bytes)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one command and return the bridge's outcome as-is.
    pub async fn send(&self, command: &Command) -> Result<Outcome, ClientError> {
        tokio::time::timeout(self.timeout, self.exchange(command))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
    }

    /// Run `tool` and return its result, or the bridge's failure as
    /// [`ClientError::Remote`].
    pub async fn call(&self, tool: &str, arguments: Arguments) -> Result<Value, ClientError> {
        into_result(self.send(&Command::new(tool, arguments)).await?)
    }

    async fn exchange(&self, command: &Command) -> Result<Outcome, ClientError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        let (read_half, write_half) = stream.into_split();
        let mut writer = FramedWrite::new(
            write_half,
            JsonLinesCodec::<Command>::with_max_frame_bytes(self.max_frame_bytes),
        );
        let mut reader = FramedRead::new(
            read_half,
            JsonLinesCodec::<WireResponse>::with_max_frame_bytes(self.max_frame_bytes),
        );

        writer.send(command.clone()).await.map_err(codec_error)?;

        match reader.next().await {
            Some(Ok(response)) => Ok(response.into_outcome()),
            Some(Err(e)) => Err(codec_error(e)),
            None => Err(ClientError::NoResponse),
        }
    }
}

fn codec_error(e: CodecError) -> ClientError {
    match e {
        CodecError::Io(e) => ClientError::Io(e),
        other => ClientError::InvalidResponse(other.to_string()),
    }
}

/// Client for the RPC-over-HTTP transport.
#[derive(Debug, Clone)]
pub struct RpcBridgeClient {
    base_url: String,
    client: reqwest::Client,
}

impl RpcBridgeClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, DEFAULT_CLIENT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("hostbridge/{}", HOSTBRIDGE_VERSION))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &BridgeConfig) -> Result<Self, ClientError> {
        Self::with_timeout(
            format!("http://{}:{}", config.host, config.http_port),
            config.timeout + Duration::from_secs(5),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send `arguments_json` verbatim and return the bridge's outcome as-is.
    pub async fn send_json(&self, tool_name: &str, arguments_json: &str) -> Result<Outcome, ClientError> {
        let request = ExecuteToolRequest {
            tool_name: tool_name.to_string(),
            arguments_json: arguments_json.to_string(),
        };
        let encoded: String = self
            .client
            .post(format!("{}/rpc/execute_tool", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let response: WireResponse = serde_json::from_str(&encoded)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(response.into_outcome())
    }

    pub async fn execute_tool(&self, tool_name: &str, arguments: &Arguments) -> Result<Value, ClientError> {
        let arguments_json = serde_json::to_string(arguments)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        into_result(self.send_json(tool_name, &arguments_json).await?)
    }

    pub async fn tools(&self) -> Result<Vec<String>, ClientError> {
        Ok(self
            .client
            .get(format!("{}/tools", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    pub async fn tool_infos(&self) -> Result<Vec<ToolInfo>, ClientError> {
        Ok(self
            .client
            .get(format!("{}/tools/info", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    pub async fn health(&self) -> Result<Value, ClientError> {
        Ok(self
            .client
            .get(format!("{}/health-check", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}
