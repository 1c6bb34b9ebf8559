use tracing::{info, warn};

use scrapedock::{build_router, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("{},tower_http=warn", config.log_level))
    });
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!(
        "starting scrapedock (max pages: {}, auth: {})",
        config.max_concurrent_pages,
        if config.auth_enabled() { "on" } else { "off" }
    );
    if !config.auth_enabled() {
        warn!("AUTH_TOKEN not set; the API is unauthenticated");
    }

    let state = AppState::new(config.clone());
    let sweeper = state.jobs.start_sweeper();
    let app = build_router(state.clone());

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Stop the existing process or set PORT.",
                bind_addr
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("scrapedock listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone(), sweeper))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: AppState, sweeper: tokio::task::JoinHandle<()>) {
    wait_for_signal().await;
    info!("shutdown signal received");

    sweeper.abort();
    state.browser.shutdown().await;

    // Surface how much work gets dropped with the in-memory store.
    let counts = state.jobs.counts().await;
    if counts.queued + counts.processing > 0 {
        warn!(
            "shutting down with {} queued and {} processing job(s)",
            counts.queued, counts.processing
        );
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
            _ = async {
                if let Some(ref mut s) = sigint {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
