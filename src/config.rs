use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pagerduty::client::RetryPolicy;
use crate::pagerduty::types::ResourceKind;
use crate::refresh::RefreshConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub pagerduty: PagerDutyConfig,
  pub refresh: RefreshSettings,
  /// Custom title for the header (defaults to the API domain if not set)
  pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PagerDutyConfig {
  pub api_url: String,
  /// Items requested per page
  pub page_limit: u32,
  /// Restrict incidents and on-calls to these user ids
  pub user_ids: Vec<String>,
}

impl Default for PagerDutyConfig {
  fn default() -> Self {
    Self {
      api_url: "https://api.pagerduty.com".to_string(),
      page_limit: 100,
      user_ids: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
  /// Seconds between refresh cycles
  pub interval_secs: u64,
  /// Overall deadline for one cycle; slower kinds go stale
  pub cycle_deadline_secs: u64,
  /// Resource kinds to keep fresh
  pub resources: Vec<ResourceKind>,
  /// Attempts per page, including the first
  pub max_attempts: u32,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
  /// Longest suspension waiting out a rate-limit window
  pub max_rate_limit_wait_secs: u64,
}

impl Default for RefreshSettings {
  fn default() -> Self {
    Self {
      interval_secs: 10,
      cycle_deadline_secs: 30,
      resources: ResourceKind::ALL.to_vec(),
      max_attempts: 4,
      base_delay_ms: 500,
      max_delay_ms: 10_000,
      max_rate_limit_wait_secs: 30,
    }
  }
}

impl RefreshSettings {
  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      base_delay: Duration::from_millis(self.base_delay_ms),
      multiplier: 2.0,
      max_delay: Duration::from_millis(self.max_delay_ms),
      max_attempts: self.max_attempts.max(1),
      max_rate_limit_wait: Duration::from_secs(self.max_rate_limit_wait_secs),
    }
  }

  pub fn refresh_config(&self) -> RefreshConfig {
    RefreshConfig {
      interval: Duration::from_secs(self.interval_secs.max(1)),
      cycle_deadline: Duration::from_secs(self.cycle_deadline_secs.max(1)),
      kinds: self.resources.clone(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pd9s.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pd9s/config.yaml
  ///
  /// Everything has a default, so a missing file just means defaults;
  /// only the API token (from the environment) is mandatory.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("pd9s.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pd9s").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the PagerDuty API token from environment variables.
  ///
  /// Checks PD9S_PD_TOKEN first, then PAGERDUTY_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("PD9S_PD_TOKEN")
      .or_else(|_| std::env::var("PAGERDUTY_TOKEN"))
      .map_err(|_| {
        eyre!("PagerDuty API token not found. Set PD9S_PD_TOKEN or PAGERDUTY_TOKEN environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_track_the_poll_constants() {
    let config = Config::default();
    assert_eq!(config.refresh.interval_secs, 10);
    assert_eq!(config.pagerduty.page_limit, 100);
    assert_eq!(config.refresh.resources, ResourceKind::ALL.to_vec());
  }

  #[test]
  fn test_partial_yaml_fills_in_defaults() {
    let config: Config = serde_yaml::from_str(
      "refresh:\n  interval_secs: 5\n  resources: [incidents]\n",
    )
    .expect("parse");

    assert_eq!(config.refresh.interval_secs, 5);
    assert_eq!(config.refresh.resources, vec![ResourceKind::Incidents]);
    // Untouched sections keep their defaults.
    assert_eq!(config.pagerduty.api_url, "https://api.pagerduty.com");
    assert_eq!(config.refresh.max_attempts, 4);
  }
}
