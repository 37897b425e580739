use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use thicket::auth::AuthBackend;
use thicket::config::Config;
use thicket::state::AppState;

/// Real-time chat gateway and REST API.
#[derive(Debug, Parser)]
#[command(name = "thicket", version)]
struct Cli {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Seconds of silence before a gateway session is closed
    /// (overrides THICKET_HEARTBEAT_TIMEOUT_SECS)
    #[arg(long)]
    heartbeat_timeout: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thicket=debug,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if let Some(secs) = cli.heartbeat_timeout.filter(|s| *s > 0) {
        config.gateway.heartbeat_timeout = Duration::from_secs(secs);
    }

    print_banner(&config);

    let db = thicket::db::create_pool(&config.database_url)
        .await
        .expect("failed to create database pool");

    let auth = AuthBackend::from_mode(&config.auth, db.clone());
    let state = AppState::new(db, auth, config.gateway.clone());
    let hub = state.hub.clone();
    let app = thicket::routes::router(state);

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("failed to bind");

    let actual_port = listener
        .local_addr()
        .expect("failed to get local address")
        .port();
    eprintln!("  \x1b[32m→ listening on 0.0.0.0:{actual_port}\x1b[0m");
    eprintln!();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            let closed = hub.close_all();
            tracing::info!(closed, "shutting down");
        })
        .await
        .expect("server error");
}

fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");

    eprintln!();
    eprintln!("  \x1b[1;36mthicket\x1b[0m \x1b[2mv{version}\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mport\x1b[0m         {}", config.port);
    eprintln!("  \x1b[2mdatabase\x1b[0m     {}", config.database_url);
    eprintln!("  \x1b[2mauth\x1b[0m         {}", config.auth.name());
    eprintln!(
        "  \x1b[2mheartbeat\x1b[0m    {}s",
        config.gateway.heartbeat_timeout.as_secs()
    );
    eprintln!();
}
