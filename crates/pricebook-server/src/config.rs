//! Runtime configuration of the `pricebook` binary.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use pricebook_reconcile::ReconcileConfig;
use serde::Deserialize;

/// Deserialised from `pricebook.toml` layered with `PRICEBOOK_*` variables.
///
/// Nested keys use a double underscore in the environment, e.g.
/// `PRICEBOOK_RECONCILE__WORKERS=8`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub store_path:    PathBuf,
  pub host:          String,
  pub port:          u16,
  /// Endpoint of the AI suggestion service. No AI suggestions when unset.
  pub suggester_url: Option<String>,
  pub reconcile:     ReconcileConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      store_path:    PathBuf::from("pricebook.db"),
      host:          "127.0.0.1".into(),
      port:          8080,
      suggester_url: None,
      reconcile:     ReconcileConfig::default(),
    }
  }
}

impl ServerConfig {
  /// Read `path` (optional) and the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("PRICEBOOK")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read config file")?;

    let mut cfg: ServerConfig = settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
