//! Stack demonstration binary.
//!
//! Opens a session over an in-process loopback channel, registers with the
//! discovery service, performs a few reads (blocking and callback-driven),
//! issues one call that outlives the operation timeout, then closes.

use bytes::Bytes;
use clap::Parser;
use stack_session::{
    LoggingObserver, ServerRegistration, Session, SessionConfig, CLOSE_SESSION, CREATE_SESSION,
    REGISTER_SERVER,
};
use stack_transport::{
    wait_for_complete, ChannelError, LoopbackChannel, PendingOperation, Request, RequestHandler,
    Response,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::StackConfig;
use logging::StackLogFormatter;

/// Service answered after the operation timeout has passed
const SLOW_SERVICE: &str = "HistoryRead";

/// How far past the operation timeout the slow service answers
const SLOW_SERVICE_MARGIN: Duration = Duration::from_millis(250);

/// Nodes read during the demonstration
const DEMO_NODES: &[&str] = &[
    "ns=2;s=Boiler.Temperature",
    "ns=2;s=Boiler.Pressure",
    "ns=2;s=Boiler.FlowRate",
];

/// Loopback demonstration of the stack's pending operations
#[derive(Parser, Debug)]
#[command(name = "opc-stack", version, about = "Loopback demonstration of the stack")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Per-request timeout, e.g. 2s (overrides the config file)
    #[arg(long)]
    operation_timeout: Option<humantime::Duration>,

    /// Session name (overrides the config file)
    #[arg(long)]
    session_name: Option<String>,

    /// Simulated loopback latency, e.g. 5ms (overrides the config file)
    #[arg(long)]
    latency: Option<humantime::Duration>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("opc_stack={}", args.log_level).parse()?)
        .add_directive(format!("stack_session={}", args.log_level).parse()?)
        .add_directive(format!("stack_transport={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(true)
        .event_format(StackLogFormatter::new("opc-stack".to_string()))
        .init();

    info!("Starting opc-stack v{}", env!("CARGO_PKG_VERSION"));

    let mut stack_config = StackConfig::load_from_file(&args.config)?;
    if let Some(timeout) = args.operation_timeout {
        stack_config.operation_timeout_ms = duration_millis("operation timeout", timeout.into())?;
    }
    if let Some(latency) = args.latency {
        stack_config.loopback_latency_ms = duration_millis("latency", latency.into())?;
    }
    if let Some(name) = args.session_name {
        stack_config.session_name = name;
    }

    // Session calls block, so they run on the main thread while the loopback
    // server runs on its own runtime.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("stack-loopback")
        .enable_all()
        .build()?;

    let slow_delay = stack_config.operation_timeout() + SLOW_SERVICE_MARGIN;
    let channel = Arc::new(
        LoopbackChannel::new(runtime.handle().clone(), loopback_server(slow_delay))
            .with_latency(stack_config.loopback_latency()),
    );

    let session = Session::new(
        SessionConfig {
            session_name: stack_config.session_name.clone(),
            operation_timeout: stack_config.operation_timeout(),
        },
        channel.clone(),
        Arc::new(LoggingObserver),
    );

    let result = run_demo(&session, &stack_config);

    channel.shutdown();
    runtime.shutdown_timeout(Duration::from_secs(1));

    match &result {
        Ok(()) => info!("opc-stack demonstration complete"),
        Err(e) => warn!("opc-stack demonstration failed: {}", e),
    }
    result
}

fn run_demo(session: &Session, stack_config: &StackConfig) -> anyhow::Result<()> {
    if stack_config.discovery.enabled {
        let registration = stack_config.discovery.discovery_urls.iter().fold(
            ServerRegistration::new(
                stack_config.discovery.server_uri.clone(),
                stack_config.discovery.product_uri.clone(),
            ),
            |registration, url| registration.with_discovery_url(url.clone()),
        );
        session.register_server(&registration)?;
    }

    session.open()?;

    for node in DEMO_NODES {
        let value = session.call("Read", Bytes::from(node.to_string()))?;
        info!(
            component = "demo",
            "Read {} = {}",
            node,
            String::from_utf8_lossy(&value)
        );
    }

    // Same reads again, all in flight at once
    let pending: Vec<PendingOperation<Response>> = DEMO_NODES
        .iter()
        .map(|node| {
            let node = node.to_string();
            session.begin_call(
                "Read",
                Bytes::from(node.clone()),
                Some(Box::new(move |op: &PendingOperation<Response>| {
                    match op.result() {
                        Some(response) => info!(
                            component = "demo",
                            "Callback for {}: {}",
                            node,
                            String::from_utf8_lossy(&response.body)
                        ),
                        None => warn!(component = "demo", "Callback for {}: no response", node),
                    }
                })),
            )
        })
        .collect::<Result<_, _>>()?;

    for op in &pending {
        wait_for_complete(op)?;
        op.dispose();
    }

    match session.call(SLOW_SERVICE, Bytes::from_static(b"ns=2;s=Boiler.Temperature")) {
        Ok(_) => warn!(component = "demo", "{} answered within the timeout", SLOW_SERVICE),
        Err(e) if e.is_timeout() => info!(
            component = "demo",
            "{} timed out after {:?} as expected",
            SLOW_SERVICE,
            stack_config.operation_timeout()
        ),
        Err(e) => return Err(e.into()),
    }

    session.close()?;
    Ok(())
}

/// Milliseconds in `duration`, rejecting values the config cannot hold
fn duration_millis(what: &str, duration: Duration) -> anyhow::Result<u64> {
    u64::try_from(duration.as_millis())
        .map_err(|_| anyhow::anyhow!("{} of {:?} is too large", what, duration))
}

/// Request handler playing the server side of the loopback channel
fn loopback_server(slow_delay: Duration) -> RequestHandler {
    Arc::new(move |request: &Request| match request.service.as_str() {
        CREATE_SESSION => Ok(Bytes::from(format!(
            "session-token-{}",
            request.request_handle
        ))),
        CLOSE_SESSION | REGISTER_SERVER => Ok(Bytes::new()),
        "Read" => Ok(Bytes::from(simulated_value(&request.body).to_string())),
        SLOW_SERVICE => {
            std::thread::sleep(slow_delay);
            Ok(Bytes::new())
        }
        other => Err(ChannelError::ServiceFault(format!(
            "service {} is not supported",
            other
        ))),
    })
}

/// Deterministic reading derived from the node id
fn simulated_value(node_id: &[u8]) -> f64 {
    let sum: u32 = node_id.iter().map(|b| u32::from(*b)).sum();
    f64::from(sum % 1000) / 10.0
}
