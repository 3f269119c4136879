//! 🔐 Session setup: one TLS-configured HTTP client, two tokens, three headers.
//!
//! The pod wants a client certificate on the auth host, then a `sessionToken`
//! and a `keyManagerToken` on every call after that. Verification is an ordinary
//! builder flag here. Nobody patches anybody's HTTP library.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{info, warn};

use super::{SymphonyConfig, load_pem};

/// 🎟️ What the two auth endpoints hand back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub session_token: String,
    pub key_manager_token: String,
}

impl SessionTokens {
    /// The headers every authenticated request carries.
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "sessionToken",
            HeaderValue::from_str(&self.session_token).context("💀 session token is not a valid header value")?,
        );
        headers.insert(
            "keyManagerToken",
            HeaderValue::from_str(&self.key_manager_token)
                .context("💀 key manager token is not a valid header value")?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// 🏗️ Build the shared HTTP client: client identity, trust store, verify flag, timeout.
pub async fn build_http_client(config: &SymphonyConfig, timeout: Duration) -> Result<reqwest::Client> {
    let cert = load_pem(&config.cert).await.context("💀 could not load the client certificate")?;
    let key = load_pem(&config.key).await.context("💀 could not load the client private key")?;
    let identity = reqwest::Identity::from_pem(format!("{key}\n{cert}").as_bytes())
        .context("💀 the client certificate and key did not make a usable identity")?;

    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .identity(identity);

    if let Some(ca_path) = &config.tls.ca_cert_path {
        let ca_pem = tokio::fs::read(ca_path)
            .await
            .with_context(|| format!("💀 could not read CA certificate '{}'", ca_path.display()))?;
        let ca = reqwest::Certificate::from_pem(&ca_pem)
            .with_context(|| format!("💀 '{}' is not a PEM certificate", ca_path.display()))?;
        builder = builder.add_root_certificate(ca);
    }

    if !config.tls.ssl_verify {
        warn!("⚠️ TLS verification is OFF. Any server certificate will be accepted.");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .context("💀 The HTTP client refused to be born. Check the certificate, the key, and the CA file.")
}

/// 🤝 Run both handshakes and return the tokens.
pub async fn fetch_session_tokens(http: &reqwest::Client, config: &SymphonyConfig) -> Result<SessionTokens> {
    let session_token = post_for_token(http, &config.auth_url(&config.session_auth_path)).await?;
    let key_manager_token = post_for_token(http, &config.auth_url(&config.key_auth_path)).await?;
    info!("🔐 authenticated against {}", config.auth_host);
    Ok(SessionTokens {
        session_token,
        key_manager_token,
    })
}

async fn post_for_token(http: &reqwest::Client, url: &str) -> Result<String> {
    let response = http
        .post(url)
        .json(&serde_json::json!({}))
        .send()
        .await
        .with_context(|| format!("💀 cannot reach {} for the session handshake", url))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("💀 session handshake at {} was refused: {} {}", url, status, body);
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .with_context(|| format!("💀 handshake at {} did not return a token", url))?;
    Ok(parsed.token)
}
