//! BridgeService: transport-agnostic command execution.
//!
//! This service owns:
//! - The tool registry (read-only once constructed)
//! - The network-side marshaler into the host thread
//! - The invocation supervisor (timeout policy, in-flight bookkeeping)
//! - Shutdown coordination for the transports
//!
//! Transports (raw socket, HTTP RPC) decode a request, call
//! [`BridgeService::execute`], and encode whatever outcome comes back.

use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;

use crate::bridge::protocol::{Arguments, Command, ErrorKind, Outcome};
use crate::config::BridgeConfig;
use crate::marshal::Marshaler;
use crate::registry::ToolRegistry;
use crate::supervisor::InvocationSupervisor;
use crate::version::VersionInfo;

/// Coarse service state for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    /// Nothing waiting on the host thread.
    Ready,
    /// At least one caller is waiting on the host thread.
    Busy,
    /// The host executor is gone; every command will fail.
    HostUnavailable,
}

/// Snapshot of service health for transports to report.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub status: ServiceStatus,
    pub tools: Vec<String>,
    pub in_flight: usize,
    pub completed: u64,
    pub abandoned: u64,
    pub timeout_secs: f64,
    pub started_at: String,
    pub version: VersionInfo,
}

pub struct BridgeService<S> {
    registry: ToolRegistry<S>,
    marshaler: Marshaler<S>,
    supervisor: InvocationSupervisor,
    version: VersionInfo,
    started_at: chrono::DateTime<chrono::Utc>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S> BridgeService<S> {
    /// Build a service; the registry is frozen from here on.
    pub fn new(registry: ToolRegistry<S>, marshaler: Marshaler<S>, config: &BridgeConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tracing::info!(
            tools = registry.len(),
            timeout_ms = config.timeout.as_millis() as u64,
            "Bridge service created"
        );
        Self {
            registry,
            marshaler,
            supervisor: InvocationSupervisor::new(config.timeout),
            version: VersionInfo::new(),
            started_at: chrono::Utc::now(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    pub fn registry(&self) -> &ToolRegistry<S> {
        &self.registry
    }

    pub fn supervisor(&self) -> &InvocationSupervisor {
        &self.supervisor
    }

    /// Resolve, marshal to the host thread, and wait (bounded) for the result.
    pub async fn execute(&self, command: Command) -> Outcome {
        let Command { tool, arguments } = command;

        let handler = match self.registry.resolve(&tool) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::warn!(tool = %tool, "Rejecting unknown tool");
                return Outcome::failure(ErrorKind::UnknownTool, e.to_string());
            }
        };

        let started = Instant::now();
        let pending = self.marshaler.submit(handler, arguments);
        let invocation_id = pending.id();
        let outcome = self.supervisor.await_outcome(pending).await;

        match outcome.kind() {
            None => tracing::info!(
                %invocation_id,
                tool = %tool,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Command succeeded"
            ),
            Some(kind) => tracing::info!(
                %invocation_id,
                tool = %tool,
                %kind,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Command failed"
            ),
        }
        outcome
    }

    /// RPC-style entry point: arguments arrive as a JSON document in a string.
    ///
    /// An empty string means no arguments.
    pub async fn execute_json(&self, tool_name: &str, arguments_json: &str) -> Outcome {
        let arguments = match parse_arguments(arguments_json) {
            Ok(arguments) => arguments,
            Err(message) => {
                tracing::warn!(tool = %tool_name, error = %message, "Rejecting malformed arguments");
                return Outcome::failure(ErrorKind::DecodeError, message);
            }
        };
        self.execute(Command::new(tool_name, arguments)).await
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        let in_flight = self.supervisor.in_flight_count();
        let status = if self.marshaler.is_closed() {
            ServiceStatus::HostUnavailable
        } else if in_flight > 0 {
            ServiceStatus::Busy
        } else {
            ServiceStatus::Ready
        };

        ServiceSnapshot {
            status,
            tools: self.registry.names(),
            in_flight,
            completed: self.supervisor.completed_count(),
            abandoned: self.supervisor.abandoned_count(),
            timeout_secs: self.supervisor.timeout().as_secs_f64(),
            started_at: self.started_at.to_rfc3339(),
            version: self.version.clone(),
        }
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Ask every transport serving this service to stop.
    pub fn trigger_shutdown(&self) {
        tracing::info!("Shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}

fn parse_arguments(arguments_json: &str) -> Result<Arguments, String> {
    if arguments_json.trim().is_empty() {
        return Ok(Arguments::new());
    }
    match serde_json::from_str::<serde_json::Value>(arguments_json) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(serde_json::Value::Null) => Ok(Arguments::new()),
        Ok(_) => Err("invalid request: arguments must be a JSON object".to_string()),
        Err(e) => Err(format!("invalid request: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use serde_json::json;

    use crate::marshal::{self, HostExecutor};

    fn echo_registry() -> ToolRegistry<()> {
        ToolRegistry::new().with_tool("echo", |_, args| Ok(serde_json::Value::Object(args)))
    }

    fn service_on_thread(
        registry: ToolRegistry<()>,
        timeout: Duration,
    ) -> (Arc<BridgeService<()>>, thread::JoinHandle<u64>) {
        let (marshaler, mut executor) = marshal::channel::<()>();
        let host = thread::spawn(move || executor.run(&mut ()));
        let config = BridgeConfig::default().with_timeout(timeout);
        (Arc::new(BridgeService::new(registry, marshaler, &config)), host)
    }

    fn ticked_service(registry: ToolRegistry<()>) -> (BridgeService<()>, HostExecutor<()>) {
        let (marshaler, executor) = marshal::channel::<()>();
        (
            BridgeService::new(registry, marshaler, &BridgeConfig::default()),
            executor,
        )
    }

    #[tokio::test]
    async fn echo_returns_arguments_unchanged() {
        let (service, host) = service_on_thread(echo_registry(), Duration::from_secs(5));

        let command: Command =
            serde_json::from_value(json!({"tool": "echo", "arguments": {"x": 5}})).unwrap();
        let wire = service.execute(command).await.into_wire();

        assert_eq!(
            serde_json::to_value(wire).unwrap(),
            json!({"success": true, "result": {"x": 5}})
        );

        drop(service);
        host.join().unwrap();
    }

    #[tokio::test]
    async fn unknown_tool_never_reaches_host() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let registry = ToolRegistry::new().with_tool("counted", move |_, _| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(json!(null))
        });
        let (service, mut executor) = ticked_service(registry);

        let outcome = service.execute(Command::new("Counted", Arguments::new())).await;

        assert_eq!(outcome.kind(), Some(ErrorKind::UnknownTool));
        assert!(!executor.tick(&mut ()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sleep_forever_times_out_and_service_recovers() {
        let registry = echo_registry().with_tool("sleep_forever", |_, _| {
            thread::sleep(Duration::from_millis(1500));
            Ok(json!("woke up"))
        });
        let (service, host) = service_on_thread(registry, Duration::from_secs(1));

        let started = Instant::now();
        let wire = service
            .execute(Command::new("sleep_forever", Arguments::new()))
            .await
            .into_wire();
        let waited = started.elapsed();

        assert!(!wire.success);
        assert!(wire.error.as_deref().unwrap().contains("timeout"));
        assert!(waited < Duration::from_millis(1800), "waited {:?}", waited);

        let mut args = Arguments::new();
        args.insert("after".to_string(), json!(true));
        let outcome = service.execute(Command::new("echo", args)).await;
        assert_eq!(outcome, Outcome::success(json!({"after": true})));

        let snapshot = service.snapshot();
        assert_eq!(snapshot.abandoned, 1);
        assert_eq!(snapshot.completed, 1);

        drop(service);
        host.join().unwrap();
    }

    #[tokio::test]
    async fn execute_json_parses_argument_string() {
        let (service, host) = service_on_thread(echo_registry(), Duration::from_secs(5));

        let outcome = service.execute_json("echo", r#"{"name": "Cube"}"#).await;
        assert_eq!(outcome, Outcome::success(json!({"name": "Cube"})));

        let outcome = service.execute_json("echo", "").await;
        assert_eq!(outcome, Outcome::success(json!({})));

        drop(service);
        host.join().unwrap();
    }

    #[tokio::test]
    async fn execute_json_rejects_malformed_arguments() {
        let (service, mut executor) = ticked_service(echo_registry());

        let outcome = service.execute_json("echo", "{broken").await;
        assert_eq!(outcome.kind(), Some(ErrorKind::DecodeError));

        let outcome = service.execute_json("echo", "[1, 2]").await;
        assert_eq!(outcome.kind(), Some(ErrorKind::DecodeError));

        assert!(!executor.tick(&mut ()));
    }

    #[test]
    fn snapshot_reports_status() {
        let (service, executor) = ticked_service(echo_registry());

        let snapshot = service.snapshot();
        assert_eq!(snapshot.status, ServiceStatus::Ready);
        assert_eq!(snapshot.tools, vec!["echo".to_string()]);
        assert_eq!(snapshot.in_flight, 0);

        drop(executor);
        assert_eq!(service.snapshot().status, ServiceStatus::HostUnavailable);
    }

    #[test]
    fn trigger_shutdown_flips_watch() {
        let (service, _executor) = ticked_service(echo_registry());
        let rx = service.shutdown_rx();
        assert!(!*rx.borrow());

        service.trigger_shutdown();
        assert!(*rx.borrow());
        assert!(service.is_shutting_down());
    }
}
