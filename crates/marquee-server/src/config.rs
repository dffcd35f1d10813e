//! Runtime configuration, deserialised from `config.toml` and `MARQUEE_*`
//! environment variables.

use std::path::PathBuf;

use marquee_publish::EngineConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                 String,
  #[serde(default = "default_port")]
  pub port:                 u16,
  pub database_path:        PathBuf,
  /// A publish still running after this long is cancelled and rolled back.
  #[serde(default = "default_publish_timeout")]
  pub publish_timeout_secs: u64,
  #[serde(default)]
  pub engine:               EngineConfig,
  pub services:             ServicesConfig,
}

/// Endpoints and credentials of the external collaborators.
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
  pub config_delivery_url:           String,
  pub config_delivery_client_id:     String,
  pub config_delivery_client_secret: String,
  pub edge_purge_url:                String,
  pub edge_invalidate_url:           String,
  pub edge_api_key:                  String,
  /// Directory the local asset store copies within.
  pub asset_root:                    PathBuf,
  #[serde(default = "default_http_timeout")]
  pub http_timeout_secs:             u64,
}

fn default_host() -> String { "127.0.0.1".to_string() }

fn default_port() -> u16 { 8080 }

fn default_publish_timeout() -> u64 { 30 * 60 }

fn default_http_timeout() -> u64 { 30 }

#[cfg(test)]
mod tests {
  use ::config::{Config, File, FileFormat};

  use super::*;

  const MINIMAL: &str = r#"
    database_path = "marquee.db"

    [services]
    config_delivery_url = "https://delivery.test"
    config_delivery_client_id = "id"
    config_delivery_client_secret = "secret"
    edge_purge_url = "https://edge.test/purge"
    edge_invalidate_url = "https://edge.test/invalidate"
    edge_api_key = "key"
    asset_root = "/var/lib/marquee/assets"
  "#;

  fn parse(toml: &str) -> ServerConfig {
    Config::builder()
      .add_source(File::from_str(toml, FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn defaults_fill_missing_fields() {
    let cfg = parse(MINIMAL);
    assert_eq!(cfg.host, "127.0.0.1");
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.publish_timeout_secs, 1800);
    assert_eq!(cfg.engine.max_attempts, 5);
    assert_eq!(cfg.engine.token_refresh_margin_secs, 300);
    assert_eq!(cfg.services.http_timeout_secs, 30);
  }

  #[test]
  fn engine_table_overrides_defaults() {
    let cfg = parse(&format!("{MINIMAL}\n[engine]\nmax_attempts = 2\nasset_concurrency = 8\n"));
    assert_eq!(cfg.engine.max_attempts, 2);
    assert_eq!(cfg.engine.asset_concurrency, 8);
    assert_eq!(cfg.engine.initial_backoff_ms, 500);
  }
}
