//! 📦 Common backend configs: the shared knobs every HTTP-speaking backend embeds.
//!
//! 🧠 Knowledge graph:
//! - `RetryConfig`: how hard we try before calling a feed read or a message post dead.
//!   Turned into a [`RetryPolicy`] by `policy()`.
//! - `TlsConfig`: whether to verify the server, and with which extra CA. Plain
//!   constructor inputs for the HTTP client. Nobody monkey-patches anything here.
//! - Both live under `[symphony.retry]` / `[symphony.tls]` in the TOML.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

/// 🔁 Retry knobs for datafeed and message-post requests.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts including the first one. `-1` means "never give up", which is brave.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_max_attempts() -> i64 {
    10
}

fn default_initial_interval_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

// 🕰️ five minutes. if the server needs longer than that between tries, it needs a vacation.
fn default_max_interval_ms() -> u64 {
    300_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            multiplier: default_multiplier(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        // -- 🎯 anything below 1 that isn't the -1 sentinel gets clamped to a single attempt
        let max_attempts = match self.max_attempts {
            -1 => None,
            n => Some(u32::try_from(n.max(1)).unwrap_or(u32::MAX)),
        };
        RetryPolicy {
            max_attempts,
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            multiplier: self.multiplier,
            max_interval: Duration::from_millis(self.max_interval_ms),
        }
    }
}

/// 🔒 TLS knobs for the HTTP client.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TlsConfig {
    /// ⚠️ `false` accepts any server certificate. For lab pods with self-signed certs only.
    #[serde(default = "default_ssl_verify")]
    pub ssl_verify: bool,
    /// Extra PEM root certificate to trust, for pods behind a corporate CA.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
}

fn default_ssl_verify() -> bool {
    true
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ssl_verify: default_ssl_verify(),
            ca_cert_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_minus_one_means_forever() {
        let config = RetryConfig {
            max_attempts: -1,
            ..Default::default()
        };
        assert_eq!(config.policy().max_attempts, None);
    }

    #[test]
    fn the_one_where_defaults_become_a_sane_policy() {
        let policy = RetryConfig::default().policy();
        assert_eq!(policy.max_attempts, Some(10));
        assert_eq!(policy.initial_interval, Duration::from_millis(500));
        assert_eq!(policy.max_interval, Duration::from_secs(300));
    }

    #[test]
    fn the_one_where_zero_attempts_still_means_one_try() {
        let config = RetryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(config.policy().max_attempts, Some(1));
    }
}
