//! Main Entrypoint for the Call Relay API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Wiring the relay engine: upstream connector, translation, broadcast hub.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Serving until Ctrl+C, then stopping every relay before exit.

use anyhow::Context;
use callrelay_api::{
    config::Config,
    relay::{BroadcastHub, ElevenLabsConnector, RelayControl, RelayRegistry},
    router::create_router,
    state::AppState,
};
use callrelay_core::translation::{
    GoogleTranslator, TranslationGateway, Translator, UnconfiguredTranslator,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// How long shutdown waits for relays to publish their final status.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing relay engine...");

    // --- 3. Initialize the relay engine ---
    let translator: Arc<dyn Translator> = match &config.translation.api_key {
        Some(api_key) => {
            info!("Using Google Translate for final segments.");
            Arc::new(GoogleTranslator::new(api_key.clone()))
        }
        None => {
            warn!("GOOGLE_TRANSLATE_API_KEY not set; final segments will carry no translation.");
            Arc::new(UnconfiguredTranslator)
        }
    };
    let gateway = Arc::new(TranslationGateway::new(
        translator,
        config.translation.source_lang.clone(),
        config.translation.target_lang.clone(),
        config.translation.timeout,
    ));

    let hub = Arc::new(BroadcastHub::new(config.broadcast_capacity));
    let control = Arc::new(RelayControl::new(
        Arc::new(RelayRegistry::new()),
        Arc::new(ElevenLabsConnector::new(config.upstream.clone())),
        gateway,
        hub.clone(),
        config.channel_prefix.clone(),
    ));

    let prune_hub = hub.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            let pruned = prune_hub.prune();
            if pruned > 0 {
                info!(pruned, "Dropped channels with no subscribers.");
            }
        }
    });

    let app_state = Arc::new(AppState {
        control: control.clone(),
        hub,
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        upstream = %config.upstream.url,
        agent_id = %config.upstream.agent_id,
        languages = %format!("{}->{}", config.translation.source_lang, config.translation.target_lang),
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let pending = control.shutdown();
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        for signal in &pending {
            signal.cancelled().await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("Some relays did not finish closing before shutdown.");
    }

    info!("Server has shut down.");
    Ok(())
}
