//! Demo host: a toy "scene" owned by the main thread, exposed over both
//! transports.
//!
//! ```text
//! echo '{"tool":"add_object","arguments":{"name":"Cube"}}' | nc 127.0.0.1 9876
//! curl -s localhost:9875/rpc/execute_tool \
//!     -H 'content-type: application/json' \
//!     -d '{"tool_name":"list_objects","arguments_json":"{}"}'
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use hostbridge::{
    BridgeConfig, BridgeService, Handler, TcpBridgeServer, ToolRegistry, VersionInfo, serve_http,
};

/// State only the main thread may touch.
#[derive(Debug, Default)]
struct Scene {
    objects: Vec<String>,
    counter: u64,
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("HOSTBRIDGE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("hostbridge={level},hostbridge_demo={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn demo_tools() -> ToolRegistry<Scene> {
    ToolRegistry::new()
        .with_tool("echo", |_, args| Ok(serde_json::Value::Object(args)))
        .with_tool("sleep", |_, args| {
            let secs = args.get("seconds").and_then(|v| v.as_f64()).unwrap_or(1.0);
            let duration = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid sleep duration: {}", secs))?;
            thread::sleep(duration);
            Ok(json!({"slept": secs}))
        })
        .with_tool("fail", |_, args| {
            let message = args
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("requested failure");
            anyhow::bail!("{}", message)
        })
        .with_tool("counter", |scene: &mut Scene, _| {
            scene.counter += 1;
            Ok(json!(scene.counter))
        })
        .with_handler(
            Handler::new("add_object", |scene: &mut Scene, args| {
                let name = args
                    .get("name")
                    .and_then(|v| v.as_str())
                    .context("missing 'name'")?;
                if scene.objects.iter().any(|o| o == name) {
                    anyhow::bail!("object already exists: {}", name);
                }
                scene.objects.push(name.to_string());
                Ok(json!({"name": name, "object_count": scene.objects.len()}))
            })
            .with_description("Add a named object to the scene")
            .with_input_schema(json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            })),
        )
        .with_tool("list_objects", |scene: &mut Scene, _| Ok(json!(scene.objects)))
}

/// Serve both transports until SIGINT, SIGTERM, or `POST /shutdown`.
async fn serve(config: BridgeConfig, service: Arc<BridgeService<Scene>>) -> anyhow::Result<()> {
    let tcp = TcpBridgeServer::start(&config, Arc::clone(&service)).await?;
    let result = serve_http(&config, Arc::clone(&service)).await;
    service.trigger_shutdown();
    tcp.stop().await;
    result
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = BridgeConfig::from_env()?;
    let (marshaler, mut executor) = hostbridge::channel::<Scene>();
    let service = Arc::new(
        BridgeService::new(demo_tools(), marshaler, &config)
            .with_version(VersionInfo::new().with_host("hostbridge-demo")),
    );

    // The network side lives on its own thread; the main thread is the host.
    let network = thread::Builder::new()
        .name("hostbridge-net".to_string())
        .spawn(move || -> anyhow::Result<()> {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(serve(config, service))
        })?;

    let mut scene = Scene::default();
    let executed = executor.run(&mut scene);
    tracing::info!(executed, objects = scene.objects.len(), "Host loop finished");

    match network.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("network thread panicked"),
    }
}
