use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::body::Body;
use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use http::StatusCode;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use config::Config;
use services::calendar::CalendarSource;
use services::twitch::StreamingPlatform;
use services::{
    init, live::LiveSyncManager, roster::RosterManager, schedule::ScheduleSyncManager,
    subscriptions::SubscriptionManager,
};

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub twitch: Arc<dyn StreamingPlatform>,
    pub calendar: Option<Arc<dyn CalendarSource>>,
}

#[derive(Parser)]
#[command(name = "streamer-schedule", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server and the periodic workers (default)
    Serve,
    /// Reconcile the stored schedule with Twitch and the calendar once
    SyncSchedules {
        /// Drop every future occurrence before storing the fetched ones
        #[arg(long)]
        reset: bool,
    },
    /// Synchronize live state once
    SyncLive {
        /// Check every streamer and apply online/offline transitions
        #[arg(long)]
        full: bool,
    },
    /// Refresh streamer identities from Twitch
    SyncRoster,
    /// Register a streamer by Twitch login
    AddStreamer { login: String },
    /// Create the missing EventSub subscriptions
    Subscribe,
    /// Delete EventSub subscriptions of the given streamers (all when none given)
    Unsubscribe { logins: Vec<String> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamer_schedule=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let pool = init::init_db(&config).await?;
    let state = init::build_state(pool, config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await?,
        Command::SyncSchedules { reset } => {
            ScheduleSyncManager::sync(&state, reset).await?;
        }
        Command::SyncLive { full } => {
            LiveSyncManager::sync_live(&state, full).await?;
        }
        Command::SyncRoster => {
            RosterManager::sync_roster(&state).await?;
        }
        Command::AddStreamer { login } => {
            RosterManager::add_streamer(&state, &login).await?;
        }
        Command::Subscribe => {
            let report = SubscriptionManager::subscribe_all(&state).await?;
            for (login, subscription_type, error) in &report.failed {
                tracing::error!("{} / {}: {}", login, subscription_type, error);
            }
            if !report.failed.is_empty() {
                anyhow::bail!("{} subscription(s) failed", report.failed.len());
            }
        }
        Command::Unsubscribe { logins } => {
            let report = SubscriptionManager::unsubscribe(&state, &logins).await?;
            tracing::info!("{} subscription(s) deleted", report.deleted);
            for (login, subscription_type, error) in &report.failed {
                tracing::error!("{} / {}: {}", login, subscription_type, error);
            }
            if !report.failed.is_empty() {
                anyhow::bail!("{} unsubscription(s) failed", report.failed.len());
            }
        }
    }

    Ok(())
}

async fn serve(app_state: Arc<AppState>) -> anyhow::Result<()> {
    let config = app_state.config.clone();
    tracing::info!("Starting streamer schedule service");

    // Create shutdown notifier for background workers and std threads
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let thread_shutdown = Arc::new(AtomicBool::new(false));

    let bg_handles = init::spawn_background_workers(app_state.clone(), shutdown_tx.clone());

    // Webhooks limiter
    let mut webhooks_builder = GovernorConfigBuilder::default();
    webhooks_builder.per_second(config.rate_limit.webhook_per_second.into());
    webhooks_builder.burst_size(config.rate_limit.webhook_burst);
    webhooks_builder.key_extractor(SmartIpKeyExtractor);
    webhooks_builder.error_handler(|error: GovernorError| -> http::Response<Body> {
        match error {
            GovernorError::TooManyRequests { wait_time, headers } => {
                let body = serde_json::json!({
                    "error": {
                        "code": "RATE_LIMITED",
                        "message": "Rate limit exceeded",
                    }
                })
                .to_string();

                let mut resp = http::Response::new(Body::from(body));
                *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
                resp.headers_mut().insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/json"),
                );

                if let Some(hmap) = headers {
                    for (name, value) in hmap.iter() {
                        resp.headers_mut().append(name.clone(), value.clone());
                    }
                }

                resp.headers_mut()
                    .insert(http::header::RETRY_AFTER, http::HeaderValue::from(wait_time));

                resp
            }
            GovernorError::UnableToExtractKey => {
                let mut resp = http::Response::new(Body::from(
                    "Unable to determine client IP for rate limiting",
                ));
                *resp.status_mut() = StatusCode::BAD_REQUEST;
                resp
            }
            GovernorError::Other { code, msg, headers } => {
                let body = msg.unwrap_or_else(|| "Rate limiting error".to_string());
                let mut resp = http::Response::new(Body::from(body));
                *resp.status_mut() = StatusCode::from_u16(code.as_u16())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if let Some(hmap) = headers {
                    for (name, value) in hmap.iter() {
                        resp.headers_mut().append(name.clone(), value.clone());
                    }
                }
                resp
            }
        }
    });
    let webhooks_gov_conf = Arc::new(
        webhooks_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build webhooks governor config"))?,
    );

    // Background cleanup for webhooks limiter storage
    let webhooks_cleaner = {
        let limiter = webhooks_gov_conf.limiter().clone();
        let interval = Duration::from_secs(60);
        let flag = thread_shutdown.clone();
        std::thread::spawn(move || {
            let tick = Duration::from_secs(1);
            loop {
                for _ in 0..interval.as_secs() {
                    if flag.load(Ordering::SeqCst) {
                        tracing::info!("Webhooks rate limiter cleanup thread exiting");
                        return;
                    }
                    std::thread::sleep(tick);
                }
                tracing::debug!("webhooks rate limiter size: {}", limiter.len());
                limiter.retain_recent();
            }
        })
    };

    let webhooks_rate_layer = GovernorLayer {
        config: webhooks_gov_conf.clone(),
    };

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest(
            "/webhooks",
            routes::webhooks::router().layer(webhooks_rate_layer),
        )
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);
    tracing::info!(
        "EventSub callback: {}",
        SubscriptionManager::callback_url(&config)
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    let shutdown_tx_clone = shutdown_tx.clone();
    let thread_shutdown_clone = thread_shutdown.clone();

    let signal_fut = async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {},
                        _ = term.recv() => {},
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to bind SIGTERM, waiting for Ctrl+C only: {}", e);
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::info!("Shutdown signal received, notifying background workers and threads");
        let _ = shutdown_tx_clone.send(());
        thread_shutdown_clone.store(true, Ordering::SeqCst);
    };

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = signal_fut => {
            tracing::info!("Signal handler completed; server stopped accepting connections");
        }
    }

    let shutdown_wait = Duration::from_secs(15);
    tracing::info!(
        "Waiting up to {}s for background workers to exit",
        shutdown_wait.as_secs()
    );

    let bg_wait = async {
        for h in bg_handles {
            let _ = h.await;
        }
    };
    if tokio::time::timeout(shutdown_wait, bg_wait).await.is_err() {
        tracing::warn!("Background workers did not exit in time");
    }

    if let Err(e) = webhooks_cleaner.join() {
        tracing::warn!("Webhooks cleanup thread join failed: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
