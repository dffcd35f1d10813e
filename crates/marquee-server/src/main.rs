//! marquee server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens the
//! SQLite repository, wires the HTTP integrations into a publishing engine
//! and serves the JSON API under `/api`.

mod config;
mod services;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use axum::Router;
use clap::Parser;
use marquee_api::{ApiState, api_router};
use marquee_publish::Engine;
use marquee_store_sqlite::SqliteRepository;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

#[derive(Parser)]
#[command(author, version, about = "Marquee module publishing server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = ::config::Config::builder()
    .add_source(::config::File::from(cli.config).required(false))
    .add_source(::config::Environment::with_prefix("MARQUEE").separator("__"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let repo = SqliteRepository::open(&server_cfg.database_path)
    .await
    .with_context(|| format!("failed to open database at {:?}", server_cfg.database_path))?;

  let integrations =
    services::build(&server_cfg.services).context("failed to build service clients")?;
  let engine = Engine::new(repo, integrations, server_cfg.engine.clone());

  let state = ApiState::new(
    Arc::new(engine),
    Duration::from_secs(server_cfg.publish_timeout_secs),
  );
  let app = Router::new()
    .nest("/api", api_router(state))
    .layer(TraceLayer::new_for_http());

  let address = format!("{}:{}", server_cfg.host, server_cfg.port);
  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for shutdown signal");
      }
    })
    .await
    .context("server error")?;

  Ok(())
}
