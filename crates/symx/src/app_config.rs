//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing.", every bot operator at 3am 🦆
//!
//! 🏗️ Powered by Figment: `SYMX_*` env vars first, then an optional TOML file on top.
//! Nested keys in env vars use a double underscore, e.g.
//! `SYMX_SYMPHONY__AUTH_HOST=company-api.symphony.com`.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::symphony::SymphonyConfig;

/// 📦 The AppConfig: one struct to rule them all.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 Which pod, which endpoints, which certificate.
    pub symphony: SymphonyConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// ⏱️ Queue sizes and timeouts for the adapter's own workers.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Capacity of the inbound channel, in batches.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound on one outbound message, retries included.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_presence_timeout_secs")]
    pub presence_timeout_secs: u64,
    /// How long each worker gets to wind down before it's cut loose.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Per-request HTTP timeout. Keep it above the datafeed's long-poll window.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_queue_capacity() -> usize {
    10
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_presence_timeout_secs() -> u64 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_http_timeout_secs() -> u64 {
    60
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            send_timeout_secs: default_send_timeout_secs(),
            presence_timeout_secs: default_presence_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl RuntimeConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_secs(self.presence_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// 🚀 Load the config: from env vars, a file, or the sheer power of hoping.
///
/// - `None` → env vars only.
/// - `Some(path)` → env vars + TOML file, merged. TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!("🔧 Loading configuration: {:?}", config_file_name.unwrap_or(Path::new("")));

    let config = Figment::new().merge(Env::prefixed("SYMX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (SYMX_*). \
             The file exists in our hearts, but apparently not in the shape we need.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (SYMX_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    let mut app_config: AppConfig = config.extract().context(context_msg)?;
    app_config
        .symphony
        .fill_default_urls()
        .context("💀 The [symphony] section has no way to reach the pod")?;
    Ok(app_config)
}
