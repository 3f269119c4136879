//! 📡 `SymphonyClient`: messages out, DM streams, presence, room lookups.
//!
//! Cloneable. Every clone shares one `reqwest::Client` (and its connection pool)
//! plus one set of session headers.
//!
//! 🔄 Only message posts are retried here. Room lookups get one shot: the directory
//! turns a failed lookup into a miss, and misses are allowed.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::datafeed::DatafeedSource;
use super::session::{SessionTokens, build_http_client, fetch_session_tokens};
use super::{SymphonyConfig, fill_template};
use crate::backends::{Presence, RoomLookup, RoomSummary, Sink};
use crate::retry::{RetryPolicy, classify_reqwest_result, retry_with_backoff};

#[derive(Debug, Clone)]
pub struct SymphonyClient {
    http: reqwest::Client,
    headers: HeaderMap,
    config: Arc<SymphonyConfig>,
    retry: RetryPolicy,
}

impl SymphonyClient {
    /// Wire up a client from parts you already have. No network.
    pub fn new(http: reqwest::Client, config: SymphonyConfig, tokens: &SessionTokens) -> Result<Self> {
        Ok(Self {
            http,
            headers: tokens.headers()?,
            retry: config.retry.policy(),
            config: Arc::new(config),
        })
    }

    /// 🚀 Build the HTTP client, authenticate, done. Auth failure is an error, full stop.
    pub async fn connect(mut config: SymphonyConfig, timeout: std::time::Duration) -> Result<Self> {
        config.fill_default_urls()?;
        let http = build_http_client(&config, timeout).await?;
        let tokens = fetch_session_tokens(&http, &config)
            .await
            .context("💀 could not authenticate with the pod")?;
        Self::new(http, config, &tokens)
    }

    pub fn config(&self) -> &SymphonyConfig {
        &self.config
    }

    /// 🚰 A fresh datafeed reader sharing this client's session.
    pub fn datafeed(&self) -> DatafeedSource {
        DatafeedSource::new(self.clone())
    }

    /// 🪪 Who are we? Needed to ignore our own messages.
    pub async fn session_user_id(&self) -> Result<String> {
        let url = self
            .config
            .session_info_url
            .as_deref()
            .ok_or_else(|| anyhow!("💀 no session_info_url configured"))?;
        let response = self.authed(self.http.get(url)).send().await.context("💀 session info request failed")?;
        let info: SessionInfo = ensure_success(response, "session info").await?.json().await?;
        info.id
            .as_ref()
            .and_then(id_to_string)
            .ok_or_else(|| anyhow!("💀 session info carried no user id"))
    }

    pub(super) fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.headers(self.headers.clone())
    }

    pub(super) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(super) fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// 🔄 Send with backoff. `build` is called once per attempt since request bodies don't clone cheaply.
    pub(super) async fn send_with_retry<F>(&self, what: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        retry_with_backoff(
            &self.retry,
            |_attempt| self.authed(build()).send(),
            classify_reqwest_result,
            |info| {
                debug!(
                    "🔁 {} attempt {} failed ({}), retrying in {:?}",
                    what,
                    info.attempt,
                    info.reason.as_str(),
                    info.delay
                )
            },
        )
        .await
        .with_context(|| format!("💀 {} never reached the pod", what))
    }
}

/// Non-2xx → error carrying status and body text.
pub(super) async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("💀 {} failed: {} {}", what, status, body)
}

fn id_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Deserialize)]
struct SessionInfo {
    id: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct CreatedStream {
    id: String,
}

#[derive(Deserialize)]
struct RoomSearchResponse {
    #[serde(default)]
    rooms: Vec<RoomEntry>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RoomEntry {
    #[serde(default)]
    room_attributes: RoomAttributes,
    #[serde(default)]
    room_system_info: RoomSystemInfo,
}

#[derive(Deserialize, Default)]
struct RoomAttributes {
    name: Option<String>,
}

#[derive(Deserialize, Default)]
struct RoomSystemInfo {
    id: Option<String>,
}

#[derive(Deserialize)]
struct Member {
    id: serde_json::Value,
}

#[async_trait]
impl Sink for SymphonyClient {
    async fn send_message(&self, stream_id: &str, message_ml: &str) -> Result<()> {
        let url = fill_template(&self.config.message_create_url, "sid", stream_id);
        let body = json!({ "message": message_ml });
        let response = self
            .send_with_retry("message post", || self.http.post(&url).json(&body))
            .await?;
        ensure_success(response, "message post").await?;
        debug!("📤 posted {} bytes to stream '{}'", message_ml.len(), stream_id);
        Ok(())
    }

    async fn create_im(&self, user_id: &str) -> Result<String> {
        let url = self
            .config
            .im_create_url
            .as_deref()
            .ok_or_else(|| anyhow!("💀 no im_create_url configured, cannot open a DM with '{}'", user_id))?;
        // -- 🔢 the endpoint wants numeric ids; fall back to the string if it isn't one
        let body = match user_id.parse::<u64>() {
            Ok(numeric) => json!([numeric]),
            Err(_) => json!([user_id]),
        };
        let response = self
            .authed(self.http.post(url).json(&body))
            .send()
            .await
            .context("💀 IM create request failed")?;
        let created: CreatedStream = ensure_success(response, "IM create")
            .await?
            .json()
            .await
            .context("💀 IM create returned no stream id")?;
        Ok(created.id)
    }

    async fn set_presence(&self, presence: Presence) -> Result<()> {
        let response = self
            .authed(
                self.http
                    .post(&self.config.presence_url)
                    .json(&json!({ "category": presence.as_category() })),
            )
            .send()
            .await
            .context("💀 presence request failed")?;
        ensure_success(response, "presence update").await?;
        Ok(())
    }
}

#[async_trait]
impl RoomLookup for SymphonyClient {
    async fn search_rooms(&self, query: &str) -> Result<Vec<RoomSummary>> {
        let response = self
            .authed(self.http.post(&self.config.room_search_url).json(&json!({ "query": query })))
            .send()
            .await
            .context("💀 room search request failed")?;
        let found: RoomSearchResponse = ensure_success(response, "room search")
            .await?
            .json()
            .await
            .context("💀 malformed room search response")?;
        Ok(found
            .rooms
            .into_iter()
            .filter_map(|room| {
                Some(RoomSummary::new(
                    room.room_attributes.name?,
                    room.room_system_info.id?,
                ))
            })
            .collect())
    }

    async fn room_info(&self, stream_id: &str) -> Result<Option<RoomSummary>> {
        let url = fill_template(&self.config.room_info_url, "room_id", stream_id);
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("💀 room info request failed")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let entry: RoomEntry = ensure_success(response, "room info")
            .await?
            .json()
            .await
            .context("💀 malformed room info response")?;
        match entry.room_attributes.name {
            Some(name) => Ok(Some(RoomSummary::new(name, stream_id))),
            None => {
                warn!("⚠️ room info for '{}' carried no name", stream_id);
                Ok(None)
            }
        }
    }

    async fn room_member_ids(&self, stream_id: &str) -> Result<Vec<String>> {
        let template = self
            .config
            .room_members_url
            .as_deref()
            .ok_or_else(|| anyhow!("💀 no room_members_url configured"))?;
        let url = fill_template(template, "room_id", stream_id);
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("💀 room membership request failed")?;
        let members: Vec<Member> = ensure_success(response, "room membership")
            .await?
            .json()
            .await
            .context("💀 malformed room membership response")?;
        Ok(members.iter().filter_map(|m| id_to_string(&m.id)).collect())
    }
}
