//! Parts CRM server - order lifecycle, tickets and payments over JSON.
//!
//! This binary serves the CRM API on port 3002.
//!
//! # Architecture
//!
//! - Axum web framework, bearer JWTs from the identity provider
//! - `PostgreSQL` record store (in-memory store when no database is configured)
//! - Card capture through an HTTP payment gateway (sandbox when unconfigured)
//! - Background task retrying payment receipts the store failed to record

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::process::ExitCode;

use sentry::integrations::tracing as sentry_tracing;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parts_crm_server::config::{ConfigError, CrmConfig};
use parts_crm_server::db::{MemoryStore, PgStore, Store, create_pool};
use parts_crm_server::payments::{
    Gateway, HttpPaymentGateway, PaymentGatewayError, SandboxGateway,
};
use parts_crm_server::state::AppState;

#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("payment gateway: {0}")]
    Gateway(#[from] PaymentGatewayError),
    #[error("server: {0}")]
    Io(#[from] std::io::Error),
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CrmConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            // Orders carry customer contact details
            send_default_pii: false,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing(config: &CrmConfig) {
    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "parts_crm_server=info,tower_http=debug".into());

    let json_layer = config
        .log_json
        .then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!config.log_json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

async fn open_store(config: &CrmConfig) -> Result<Store, StartupError> {
    if let Some(url) = &config.database_url {
        let pool = create_pool(url).await?;
        tracing::info!("Database pool created");
        // NOTE: Migrations are NOT run automatically on startup.
        // Run them explicitly via: cargo run -p parts-crm-cli -- migrate
        Ok(Store::Postgres(PgStore::new(pool)))
    } else {
        tracing::warn!("No database configured, using the in-memory store (data is lost on exit)");
        Ok(Store::Memory(MemoryStore::new()))
    }
}

fn open_gateway(config: &CrmConfig) -> Result<Gateway, StartupError> {
    if let Some(gateway) = &config.gateway {
        tracing::info!(base_url = %gateway.base_url, "Payment gateway configured");
        Ok(Gateway::Http(HttpPaymentGateway::new(gateway)?))
    } else {
        tracing::warn!("No payment gateway configured, using the sandbox gateway");
        Ok(Gateway::Sandbox(SandboxGateway::new()))
    }
}

/// Spawn the task that records parked payment receipts.
fn spawn_receipt_retry(state: AppState) {
    let period = state.config().receipt_retry_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if state.backlog().is_empty().await {
                continue;
            }
            let recorded = state.backlog().retry_pending(state.store()).await;
            let remaining = state.backlog().len().await;
            if remaining > 0 {
                tracing::warn!(recorded, remaining, "Payment receipts still parked");
            } else {
                tracing::info!(recorded, "Payment receipt backlog drained");
            }
        }
    });
}

async fn run() -> Result<(), StartupError> {
    // Load configuration from environment (needed for Sentry init)
    let config = CrmConfig::from_env()?;

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);
    init_tracing(&config);

    let store = open_store(&config).await?;
    let gateway = open_gateway(&config)?;
    tracing::info!(
        store = store.backend(),
        gateway = gateway.backend(),
        policy = %config.transition_policy,
        "Backends selected"
    );

    let addr = config.socket_addr();
    let state = AppState::new(config, store, gateway);
    spawn_receipt_retry(state.clone());

    let app = parts_crm_server::app(state);

    tracing::info!("crm listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "CRM server failed");
            #[allow(clippy::print_stderr)]
            {
                eprintln!("parts-crm-server: {e}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
