//! Main-thread marshaling - run handlers on the host thread, from any thread.
//!
//! The network side holds a cloneable [`Marshaler`]; the host side owns the
//! single [`HostExecutor`]. Invocations travel over one unbounded FIFO
//! channel, results come back over a per-invocation oneshot.
//!
//! ```text
//!  network task ──submit──▶ [ FIFO queue ] ──▶ HostExecutor (host thread)
//!       ▲                                          │ handler(&mut S, args)
//!       └──────────── oneshot<Outcome> ◀───────────┘
//! ```
//!
//! Host integrations pick how the executor is driven:
//! - a dedicated host thread calls [`HostExecutor::run`];
//! - a cooperative scheduler (zero-delay timer, idle callback) calls
//!   [`HostExecutor::tick`] or [`HostExecutor::drain`], optionally woken by a
//!   [`WakeHook`] registered on the marshaler.
//!
//! Because there is exactly one executor and every method takes `&mut self`,
//! two handlers can never run at the same time.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::bridge::protocol::{Arguments, ErrorKind, InvocationId, Outcome};
use crate::registry::Handler;

/// Cross-thread notification fired after every submit.
///
/// Must only *schedule* work on the host loop (post an event, arm a timer);
/// it runs on the submitting thread.
pub type WakeHook = Arc<dyn Fn() + Send + Sync>;

struct Invocation<S> {
    id: InvocationId,
    handler: Handler<S>,
    arguments: Arguments,
    reply: oneshot::Sender<Outcome>,
    enqueued_at: Instant,
}

/// Caller-side half of one invocation: waits for the single result.
#[derive(Debug)]
pub struct PendingInvocation {
    id: InvocationId,
    tool: String,
    reply: oneshot::Receiver<Outcome>,
}

impl PendingInvocation {
    pub fn id(&self) -> InvocationId {
        self.id
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Wait for the host thread, without any bound.
    ///
    /// Dropping the returned future abandons the invocation: a result that
    /// arrives afterwards is discarded by the host side.
    pub async fn wait(self) -> Outcome {
        match self.reply.await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::failure(
                ErrorKind::HostUnavailable,
                format!("host executor stopped before running '{}'", self.tool),
            ),
        }
    }
}

/// Network-side handle for submitting work to the host thread.
pub struct Marshaler<S> {
    tx: mpsc::UnboundedSender<Invocation<S>>,
    wake: Option<WakeHook>,
}

impl<S> Clone for Marshaler<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            wake: self.wake.clone(),
        }
    }
}

impl<S> Marshaler<S> {
    /// Register the notification fired after every submit.
    pub fn with_wake_hook(mut self, hook: WakeHook) -> Self {
        self.wake = Some(hook);
        self
    }

    /// Queue `handler(arguments)` for the host thread.
    pub fn submit(&self, handler: Handler<S>, arguments: Arguments) -> PendingInvocation {
        let id = InvocationId::new();
        let tool = handler.name().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();

        let invocation = Invocation {
            id,
            handler,
            arguments,
            reply: reply_tx,
            enqueued_at: Instant::now(),
        };

        // On failure the invocation (and its reply sender) is dropped here,
        // so the caller's wait resolves to HostUnavailable immediately.
        if self.tx.send(invocation).is_err() {
            tracing::warn!(invocation_id = %id, tool = %tool, "Host executor gone, cannot submit");
        } else {
            tracing::trace!(invocation_id = %id, tool = %tool, "Invocation queued for host thread");
            if let Some(wake) = &self.wake {
                wake();
            }
        }

        PendingInvocation {
            id,
            tool,
            reply: reply_rx,
        }
    }

    /// True once the host executor has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Host-side consumer. Whatever thread drives it is the host thread.
pub struct HostExecutor<S> {
    rx: mpsc::UnboundedReceiver<Invocation<S>>,
    executed: u64,
}

/// Create a connected marshaler/executor pair.
pub fn channel<S>() -> (Marshaler<S>, HostExecutor<S>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Marshaler { tx, wake: None },
        HostExecutor { rx, executed: 0 },
    )
}

impl<S> HostExecutor<S> {
    /// Block the current thread executing invocations until every marshaler
    /// has been dropped. Returns the number of handlers executed.
    ///
    /// Must not be called from inside an async runtime.
    pub fn run(&mut self, state: &mut S) -> u64 {
        tracing::info!("Host executor running");
        while let Some(invocation) = self.rx.blocking_recv() {
            self.execute(state, invocation);
        }
        tracing::info!(executed = self.executed, "All marshalers dropped, host executor stopping");
        self.executed
    }

    /// Execute at most one queued invocation without blocking.
    ///
    /// Returns true if an invocation was dequeued.
    pub fn tick(&mut self, state: &mut S) -> bool {
        match self.rx.try_recv() {
            Ok(invocation) => {
                self.execute(state, invocation);
                true
            }
            Err(_) => false,
        }
    }

    /// Execute everything currently queued without blocking.
    ///
    /// Returns the number of invocations dequeued.
    pub fn drain(&mut self, state: &mut S) -> usize {
        let mut dequeued = 0;
        while self.tick(state) {
            dequeued += 1;
        }
        dequeued
    }

    /// Handlers executed so far.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    fn execute(&mut self, state: &mut S, invocation: Invocation<S>) {
        let Invocation {
            id,
            handler,
            arguments,
            reply,
            enqueued_at,
        } = invocation;

        // Once queued, an invocation always runs. A caller that stopped
        // waiting only loses the result.
        let caller_waiting = !reply.is_closed();
        tracing::debug!(
            invocation_id = %id,
            tool = handler.name(),
            queued_ms = enqueued_at.elapsed().as_millis() as u64,
            caller_waiting,
            "Executing on host thread"
        );

        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.call(state, arguments)));
        self.executed += 1;

        let outcome = match result {
            Ok(Ok(value)) => Outcome::success(value),
            Ok(Err(e)) => {
                tracing::warn!(invocation_id = %id, tool = handler.name(), error = %e, "Handler failed");
                Outcome::failure(ErrorKind::HandlerError, describe_error(&e))
            }
            Err(payload) => {
                let message = describe_panic(payload.as_ref());
                tracing::error!(invocation_id = %id, tool = handler.name(), panic = %message, "Handler panicked");
                Outcome::failure(ErrorKind::HandlerError, message)
            }
        };

        tracing::debug!(
            invocation_id = %id,
            tool = handler.name(),
            success = outcome.is_success(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Handler finished"
        );

        if reply.send(outcome).is_err() {
            tracing::info!(invocation_id = %id, tool = handler.name(), "Caller gave up, discarding late result");
        }
    }
}

/// Error chain plus a backtrace. anyhow only captures one when
/// `RUST_BACKTRACE` is set, so otherwise one is taken here at the boundary.
fn describe_error(err: &anyhow::Error) -> String {
    if err.backtrace().status() == BacktraceStatus::Captured {
        format!("{:?}", err)
    } else {
        format!(
            "{:?}\n\nhost executor backtrace:\n{}",
            err,
            Backtrace::force_capture()
        )
    }
}

fn describe_panic(payload: &(dyn Any + Send)) -> String {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    let backtrace = Backtrace::force_capture();
    format!("handler panicked: {}\n\nhost executor backtrace:\n{}", message, backtrace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    use anyhow::Context;
    use serde_json::json;

    fn handler<S, F>(name: &str, f: F) -> Handler<S>
    where
        F: Fn(&mut S, Arguments) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
    {
        Handler::new(name, f)
    }

    #[tokio::test]
    async fn handler_runs_on_host_thread() {
        let (marshaler, mut executor) = channel::<()>();
        let host = thread::spawn(move || {
            let id = format!("{:?}", thread::current().id());
            executor.run(&mut ());
            id
        });

        let whoami = handler("whoami", |_, _| Ok(json!(format!("{:?}", thread::current().id()))));
        let outcome = marshaler.submit(whoami, Arguments::new()).wait().await;

        drop(marshaler);
        let host_id = host.join().unwrap();

        assert_eq!(outcome, Outcome::success(json!(host_id)));
        assert_ne!(json!(format!("{:?}", thread::current().id())), json!(host_id));
    }

    #[test]
    fn tick_executes_at_most_one() {
        let (marshaler, mut executor) = channel::<u32>();
        let bump = handler("bump", |n: &mut u32, _| {
            *n += 1;
            Ok(json!(*n))
        });
        let first = marshaler.submit(bump.clone(), Arguments::new());
        let _second = marshaler.submit(bump, Arguments::new());

        let mut state = 0;
        assert!(executor.tick(&mut state));
        assert_eq!(state, 1);
        assert!(executor.tick(&mut state));
        assert!(!executor.tick(&mut state));
        assert_eq!(executor.executed(), 2);
        drop(first);
    }

    #[tokio::test]
    async fn drain_runs_in_submission_order() {
        let (marshaler, mut executor) = channel::<Vec<u32>>();
        let push = handler("push", |log: &mut Vec<u32>, args| {
            let n = args.get("n").and_then(|v| v.as_u64()).context("missing n")?;
            log.push(n as u32);
            Ok(json!(log.len()))
        });

        let pending: Vec<_> = (0..5)
            .map(|n| {
                let mut args = Arguments::new();
                args.insert("n".to_string(), json!(n));
                marshaler.submit(push.clone(), args)
            })
            .collect();

        let mut log = Vec::new();
        assert_eq!(executor.drain(&mut log), 5);
        assert_eq!(log, vec![0, 1, 2, 3, 4]);

        for (i, p) in pending.into_iter().enumerate() {
            assert_eq!(p.wait().await, Outcome::success(json!(i + 1)));
        }
    }

    #[tokio::test]
    async fn handler_error_becomes_failure() {
        let (marshaler, mut executor) = channel::<()>();
        let fail = handler("fail", |_, _| {
            Err(anyhow::anyhow!("object not found: Cube")).context("extrude failed")
        });
        let pending = marshaler.submit(fail, Arguments::new());
        executor.drain(&mut ());

        match pending.wait().await {
            Outcome::Failure { kind, message } => {
                assert_eq!(kind, ErrorKind::HandlerError);
                assert!(message.contains("extrude failed"));
                assert!(message.contains("object not found: Cube"));
                assert!(message.contains("backtrace"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn handler_panic_is_captured() {
        let (marshaler, mut executor) = channel::<()>();
        let boom = handler("boom", |_, _| panic!("host API exploded"));
        let ok = handler("ok", |_, _| Ok(json!("still alive")));

        let first = marshaler.submit(boom, Arguments::new());
        let second = marshaler.submit(ok, Arguments::new());
        executor.drain(&mut ());

        match first.wait().await {
            Outcome::Failure { kind, message } => {
                assert_eq!(kind, ErrorKind::HandlerError);
                assert!(message.contains("host API exploded"));
                assert!(message.contains("backtrace"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(second.wait().await, Outcome::success(json!("still alive")));
    }

    #[tokio::test]
    async fn dropped_executor_reports_host_unavailable() {
        let (marshaler, executor) = channel::<()>();
        drop(executor);
        assert!(marshaler.is_closed());

        let outcome = marshaler
            .submit(handler("noop", |_, _| Ok(json!(null))), Arguments::new())
            .wait()
            .await;
        assert_eq!(outcome.kind(), Some(ErrorKind::HostUnavailable));
    }

    #[test]
    fn abandoned_invocation_still_runs() {
        let (marshaler, mut executor) = channel::<()>();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_handler = Arc::clone(&ran);
        let pending = marshaler.submit(
            handler("side_effect", move |_, _| {
                ran_in_handler.store(true, Ordering::SeqCst);
                Ok(json!(null))
            }),
            Arguments::new(),
        );
        drop(pending);

        assert!(executor.tick(&mut ()));
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(executor.executed(), 1);
    }

    #[test]
    fn wake_hook_fires_on_submit() {
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakes);
        let (marshaler, mut executor) = channel::<()>();
        let marshaler = marshaler.with_wake_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let _a = marshaler.submit(handler("a", |_, _| Ok(json!(1))), Arguments::new());
        let _b = marshaler.clone().submit(handler("b", |_, _| Ok(json!(2))), Arguments::new());

        assert_eq!(wakes.load(Ordering::SeqCst), 2);
        assert_eq!(executor.drain(&mut ()), 2);
    }
}
