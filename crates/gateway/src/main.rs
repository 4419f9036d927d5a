use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use cl_domain::config::Config;
use cl_gateway::api;
use cl_gateway::state::AppState;
use cl_kernel::spawn_sweeper;

#[derive(Debug, Parser)]
#[command(name = "codelab", about = "Interactive computation backend")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Parse the config and print the effective values.
    ConfigShow,
    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Config::load(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::ConfigShow) => {
            let config = Config::load(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("codelab {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cl_gateway=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    // The pool is lazy: knowledge search degrades with an error result
    // rather than blocking startup when Postgres is down.
    let db = if config.database.url.is_empty() {
        tracing::info!("no database configured, knowledge_search disabled");
        None
    } else {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect_lazy(&config.database.url)
            .context("invalid database URL")?;
        Some(pool)
    };

    let state = AppState::new(config.clone(), db)?;
    let sweeper = spawn_sweeper(state.kernels.clone());

    let app = api::router(state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "codelab gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the ticker, then drain live kernels.
    sweeper.abort();
    state.kernels.shutdown().await;
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
