use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;

use switchboard_core::clock::{Clock, SystemClock};
use switchboard_core::events::SessionEvent;
use switchboard_engine::collab::LogSink;
use switchboard_engine::{
    AssemblerConfig, ConnectionConfig, ConnectionManager, ConnectionRegistry, ContextAssembler,
    TakeoverController, ToolRegistry, WsTransport,
};
use switchboard_server::{AppState, BroadcastDispatcher, ServerConfig, SubscriberRegistry};
use switchboard_store::{SessionStore, StoreConfig};
use switchboard_telemetry::{init_telemetry, TelemetryConfig};

/// Real-time conversation session coordinator.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version)]
struct Args {
    /// Port for the dashboard WebSocket and health endpoint.
    #[arg(long, default_value_t = 9091)]
    port: u16,

    /// WebSocket URL of the conversational-AI engine.
    #[arg(long, default_value = "ws://127.0.0.1:9090/session")]
    engine_url: String,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_telemetry(TelemetryConfig {
        json: args.json_logs,
        ..Default::default()
    });
    tracing::info!("Starting switchboard");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(SessionStore::new(StoreConfig::default(), Arc::clone(&clock)));
    let connections = Arc::new(ConnectionRegistry::new());

    // Event broadcast channel
    let (events, _) = broadcast::channel::<SessionEvent>(1024);

    // History sources and tool handlers are registered by deployments; the
    // coordinator runs fine with neither.
    let assembler = Arc::new(ContextAssembler::new(
        Vec::new(),
        AssemblerConfig::default(),
        Arc::clone(&clock),
    ));
    let tools = Arc::new(ToolRegistry::new());

    let manager = Arc::new(ConnectionManager::new(
        Arc::clone(&store),
        Arc::new(WsTransport),
        assembler,
        tools,
        Arc::clone(&connections),
        events.clone(),
        Arc::new(LogSink),
        Arc::clone(&clock),
        ConnectionConfig {
            engine_url: args.engine_url,
            ..Default::default()
        },
    ));
    let takeover = Arc::new(TakeoverController::new(
        Arc::clone(&store),
        Arc::clone(&connections),
        events.clone(),
        Arc::clone(&clock),
    ));

    let config = ServerConfig {
        port: args.port,
        ..Default::default()
    };
    let subscribers = Arc::new(SubscriberRegistry::new(config.subscriber_queue));
    let dispatcher = Arc::new(BroadcastDispatcher::new(
        Arc::clone(&subscribers),
        Arc::clone(&store),
        clock,
    ));

    let state = Arc::new(AppState {
        store,
        manager,
        takeover,
        subscribers,
        dispatcher,
    });

    let handle = switchboard_server::start_server(config, state, events.subscribe())
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "Switchboard ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
    handle.shutdown();
}
