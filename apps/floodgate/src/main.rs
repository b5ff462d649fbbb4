use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use floodgate::{
    build_router,
    cli::{Cli, Commands},
    config::Config,
    datastore,
    forwarder::{self, PipelineForwarderFactory},
    websocket::AppState,
};

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Some(Commands::Debug { url, command }) = cli.command {
        if let Err(e) = floodgate::cli::run_debug_client(url, command).await {
            error!("debug client error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    info!("starting floodgate signaling server on port {}", config.port);
    info!("ingest output base: {}", config.output_base_url);

    let datastore = match datastore::create(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!("failed to initialize datastore: {}", e);
            std::process::exit(1);
        }
    };

    // The ingest pipeline consumes this channel; until a media backend is
    // attached, the sink drains and logs the commands.
    let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
    forwarder::spawn_log_sink(pipeline_rx);
    let forwarders = Arc::new(PipelineForwarderFactory::new(pipeline_tx));

    let state = AppState {
        config: Arc::new(config.clone()),
        datastore,
        forwarders,
    };
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!("floodgate listening on {}", addr);

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
