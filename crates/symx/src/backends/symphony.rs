//! 📡 The Symphony REST backend: the part of the crate that actually talks to the pod.
//!
//! 🧠 Knowledge graph:
//! - `session`: client-certificate handshake → `sessionToken` + `keyManagerToken` headers.
//!   Also builds the TLS-configured `reqwest::Client` everyone else shares.
//! - `client`: [`SymphonyClient`]. Implements [`Sink`](crate::backends::Sink) (messages,
//!   DM streams, presence) and [`RoomLookup`](crate::backends::RoomLookup) (search, info, members).
//! - `datafeed`: [`DatafeedSource`]. Create a feed, long-poll it with an `ackId`,
//!   delete it on the way out.
//! - URL templates carry `{sid}`, `{room_id}`, `{datafeed_id}` placeholders and are
//!   filled by [`fill_template`]. Hosts differ per pod, so every URL is config.
//!   Set `symphony_host` and any URL left out gets the standard path on that host.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::backends::common_config::{RetryConfig, TlsConfig};

mod client;
mod datafeed;
mod session;

pub use client::SymphonyClient;
pub use datafeed::DatafeedSource;
pub use session::{SessionTokens, build_http_client, fetch_session_tokens};

/// 🔧 Everything needed to reach one Symphony pod.
#[derive(Debug, Deserialize, Clone)]
pub struct SymphonyConfig {
    /// Authentication host, like `company-api.symphony.com`. A full `scheme://host:port`
    /// is accepted too; a bare host means `https`.
    pub auth_host: String,
    #[serde(default = "default_session_auth_path")]
    pub session_auth_path: String,
    #[serde(default = "default_key_auth_path")]
    pub key_auth_path: String,

    /// 🏠 Pod host, like `company.symphony.com` or `https://company.symphony.com/`.
    /// Fills in every endpoint URL below that isn't set explicitly.
    #[serde(default)]
    pub symphony_host: Option<String>,

    /// 📡 `https://HOST/agent/v4/stream/{sid}/message/create`
    #[serde(default)]
    pub message_create_url: String,
    /// `https://HOST/pod/v2/user/presence`
    #[serde(default)]
    pub presence_url: String,
    /// `https://HOST/agent/v5/datafeeds`
    #[serde(default)]
    pub datafeed_create_url: String,
    /// `https://HOST/agent/v5/datafeeds/{datafeed_id}`
    #[serde(default)]
    pub datafeed_delete_url: String,
    /// `https://HOST/agent/v5/datafeeds/{datafeed_id}/read`
    #[serde(default)]
    pub datafeed_read_url: String,
    /// `https://HOST/pod/v3/room/search`
    #[serde(default)]
    pub room_search_url: String,
    /// `https://HOST/pod/v3/room/{room_id}/info`
    #[serde(default)]
    pub room_info_url: String,
    /// `https://HOST/pod/v2/room/{room_id}/membership/list`
    #[serde(default)]
    pub room_members_url: Option<String>,
    /// `https://HOST/pod/v1/im/create`. Without it, DMs only reach users who wrote to us first.
    #[serde(default)]
    pub im_create_url: Option<String>,
    /// `https://HOST/pod/v2/sessioninfo`. Used to learn our own user id.
    #[serde(default)]
    pub session_info_url: Option<String>,

    /// 🔒 Client certificate: PEM text, or a path to a PEM file.
    #[serde(alias = "cert_string")]
    pub cert: String,
    /// 🔒 Client private key: PEM text, or a path to a PEM file.
    #[serde(alias = "key_string")]
    pub key: String,

    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub retry: RetryConfig,

    /// 🚨 Room that receives the full error text when an outbound message fails.
    #[serde(default)]
    pub error_room: Option<String>,
    /// Tell the intended recipient that their message didn't make it.
    #[serde(default)]
    pub inform_client: bool,
}

fn default_session_auth_path() -> String {
    "/sessionauth/v1/authenticate".to_string()
}

fn default_key_auth_path() -> String {
    "/keyauth/v1/authenticate".to_string()
}

/// `https://` unless a scheme is given, never a trailing slash.
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

impl SymphonyConfig {
    /// 🧩 Fill every unset endpoint URL from `symphony_host`. Explicit URLs are kept.
    ///
    /// Errors when a required URL is unset and there is no host to build it from.
    /// Calling it twice changes nothing.
    pub fn fill_default_urls(&mut self) -> Result<()> {
        let host = self.symphony_host.as_deref().map(normalize_host);

        let required = [
            ("message_create_url", &mut self.message_create_url, "/agent/v4/stream/{sid}/message/create"),
            ("presence_url", &mut self.presence_url, "/pod/v2/user/presence"),
            ("datafeed_create_url", &mut self.datafeed_create_url, "/agent/v5/datafeeds"),
            ("datafeed_delete_url", &mut self.datafeed_delete_url, "/agent/v5/datafeeds/{datafeed_id}"),
            ("datafeed_read_url", &mut self.datafeed_read_url, "/agent/v5/datafeeds/{datafeed_id}/read"),
            ("room_search_url", &mut self.room_search_url, "/pod/v3/room/search"),
            ("room_info_url", &mut self.room_info_url, "/pod/v3/room/{room_id}/info"),
        ];
        let mut missing = Vec::new();
        for (name, url, default_path) in required {
            if !url.trim().is_empty() {
                continue;
            }
            match &host {
                Some(host) => *url = format!("{host}{default_path}"),
                None => missing.push(name),
            }
        }
        if !missing.is_empty() {
            bail!(
                "💀 symphony_host must be set, or else every endpoint URL. Missing: {}",
                missing.join(", ")
            );
        }

        if let Some(host) = &host {
            let optional = [
                (&mut self.room_members_url, "/pod/v2/room/{room_id}/membership/list"),
                (&mut self.im_create_url, "/pod/v1/im/create"),
                (&mut self.session_info_url, "/pod/v2/sessioninfo"),
            ];
            for (url, default_path) in optional {
                if url.as_deref().is_none_or(|u| u.trim().is_empty()) {
                    *url = Some(format!("{host}{default_path}"));
                }
            }
        }
        Ok(())
    }

    /// 🔗 Full URL of an auth endpoint on `auth_host`.
    pub fn auth_url(&self, path: &str) -> String {
        let host = self.auth_host.trim_end_matches('/');
        if host.contains("://") {
            format!("{host}{path}")
        } else {
            format!("https://{host}{path}")
        }
    }
}

/// 🧩 Replace `{key}` in a URL template with `value`.
pub fn fill_template(template: &str, key: &str, value: &str) -> String {
    template.replace(&format!("{{{key}}}"), value)
}

/// 📄 Credentials may be inline PEM or a path. Inline wins if it looks like PEM.
pub async fn load_pem(value: &str) -> Result<String> {
    if value.contains("-----BEGIN") {
        return Ok(value.to_string());
    }
    tokio::fs::read_to_string(Path::new(value))
        .await
        .with_context(|| format!("💀 '{}' is neither inline PEM nor a readable PEM file", value))
}
