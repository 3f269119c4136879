//! 🚰 `DatafeedSource`: the long-poll loop's single step.
//!
//! 🧠 Knowledge graph:
//! - The feed is opened lazily on the first read. A feed the pod already lists for
//!   us is reused; only an empty list means creating one.
//! - 400/404 on read means the pod forgot the feed: make a fresh one, backing off
//!   between attempts. Too many stale feeds in a row is fatal.
//! - Each read POSTs `{"ackId": <last ackId>}` and gets back the next `ackId` plus events.
//! - 401/403 anywhere: fatal. Polling with rejected credentials is a very slow way to do nothing.
//! - Transport errors, 429 and 5xx: retried by the client's policy. Once that gives up, fatal.
//! - `close` deletes the feed so the pod stops buffering events for a bot that left.
//!   Dropped without `close` (say, an aborted worker)? The delete goes out in the background.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::client::{SymphonyClient, ensure_success};
use super::fill_template;
use crate::backends::Source;

#[derive(Debug)]
pub struct DatafeedSource {
    client: SymphonyClient,
    feed_id: Option<String>,
    ack_id: String,
}

#[derive(Deserialize)]
struct CreatedFeed {
    id: String,
}

#[derive(Deserialize)]
struct ListedFeed {
    #[serde(default)]
    id: String,
}

#[derive(Deserialize, Default)]
struct ReadResponse {
    #[serde(rename = "ackId")]
    ack_id: Option<String>,
    #[serde(default)]
    events: Vec<Value>,
}

enum ReadOutcome {
    Events(Vec<Value>),
    Stale,
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

async fn delete_feed(client: &SymphonyClient, feed_id: &str) -> Result<()> {
    let url = fill_template(&client.config().datafeed_delete_url, "datafeed_id", feed_id);
    let response = client
        .authed(client.http().delete(&url))
        .send()
        .await
        .with_context(|| format!("💀 could not delete datafeed '{}'", feed_id))?;
    ensure_success(response, "datafeed delete").await?;
    info!("🗑️ deleted datafeed '{}'", feed_id);
    Ok(())
}

impl DatafeedSource {
    pub fn new(client: SymphonyClient) -> Self {
        Self {
            client,
            feed_id: None,
            ack_id: String::new(),
        }
    }

    /// The current feed id, if one has been opened.
    pub fn feed_id(&self) -> Option<&str> {
        self.feed_id.as_deref()
    }

    /// ♻️ The first feed the pod already has for us, if any.
    ///
    /// A listing the pod won't serve (other than a credentials problem) just means
    /// we create a feed instead.
    async fn find_existing_feed(&self) -> Result<Option<String>> {
        let url = self.client.config().datafeed_create_url.clone();
        let response = self
            .client
            .send_with_retry("datafeed list", || self.client.http().get(&url))
            .await?;
        let status = response.status();
        if is_auth_failure(status) {
            bail!("💀 the pod rejected our credentials while listing datafeeds ({})", status);
        }
        if !status.is_success() {
            warn!("⚠️ could not list existing datafeeds ({}), creating a new one", status);
            return Ok(None);
        }
        let feeds: Vec<ListedFeed> = response.json().await.context("💀 malformed datafeed list")?;
        Ok(feeds.into_iter().map(|feed| feed.id).find(|id| !id.is_empty()))
    }

    async fn create_feed(&self) -> Result<String> {
        let url = self.client.config().datafeed_create_url.clone();
        let response = self
            .client
            .send_with_retry("datafeed create", || self.client.http().post(&url).json(&json!({})))
            .await?;
        let status = response.status();
        if is_auth_failure(status) {
            bail!("💀 the pod rejected our credentials while creating a datafeed ({})", status);
        }
        let created: CreatedFeed = ensure_success(response, "datafeed create")
            .await?
            .json()
            .await
            .context("💀 datafeed create returned no id")?;
        info!("🚰 created datafeed '{}'", created.id);
        Ok(created.id)
    }

    /// Reuse a listed feed when allowed, otherwise create one.
    async fn open_feed(&self, reuse_existing: bool) -> Result<String> {
        if reuse_existing {
            if let Some(feed_id) = self.find_existing_feed().await? {
                info!("♻️ reusing existing datafeed '{}'", feed_id);
                return Ok(feed_id);
            }
        }
        self.create_feed().await
    }

    async fn read(&mut self, feed_id: &str) -> Result<ReadOutcome> {
        let url = fill_template(&self.client.config().datafeed_read_url, "datafeed_id", feed_id);
        let body = json!({ "ackId": self.ack_id });
        let response = self
            .client
            .send_with_retry("datafeed read", || self.client.http().post(&url).json(&body))
            .await?;

        let status = response.status();
        if is_auth_failure(status) {
            bail!("💀 the pod rejected our credentials while reading datafeed '{}' ({})", feed_id, status);
        }
        if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
            return Ok(ReadOutcome::Stale);
        }

        let bytes = ensure_success(response, "datafeed read").await?.bytes().await?;
        let parsed: ReadResponse = if bytes.iter().all(u8::is_ascii_whitespace) {
            ReadResponse::default()
        } else {
            serde_json::from_slice(&bytes).context("💀 malformed datafeed read response")?
        };
        if let Some(ack_id) = parsed.ack_id {
            self.ack_id = ack_id;
        }
        Ok(ReadOutcome::Events(parsed.events))
    }
}

#[async_trait]
impl Source for DatafeedSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<Value>>> {
        // -- 🔢 consecutive stale feeds within this call; a good read returns, which resets it
        let mut stale_feeds = 0u32;
        loop {
            let feed_id = match &self.feed_id {
                Some(id) => id.clone(),
                None => {
                    // -- a listed feed may be the very one that just went stale, so only reuse on the first open
                    let id = self.open_feed(stale_feeds == 0).await?;
                    self.feed_id = Some(id.clone());
                    id
                }
            };

            match self.read(&feed_id).await? {
                ReadOutcome::Events(events) => {
                    debug!("📬 datafeed '{}' delivered {} events", feed_id, events.len());
                    return Ok(Some(events));
                }
                ReadOutcome::Stale => {
                    self.feed_id = None;
                    self.ack_id.clear();
                    stale_feeds += 1;
                    let policy = self.client.retry_policy();
                    if policy.max_attempts.is_some_and(|max| stale_feeds >= max) {
                        bail!("💀 datafeed went stale {} times in a row, the pod keeps forgetting us", stale_feeds);
                    }
                    let delay = policy.backoff_delay(stale_feeds);
                    warn!("⚠️ datafeed '{}' went stale, creating a new one in {:?}", feed_id, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let Some(feed_id) = self.feed_id.take() else {
            return Ok(());
        };
        delete_feed(&self.client, &feed_id).await
    }
}

impl Drop for DatafeedSource {
    fn drop(&mut self) {
        let Some(feed_id) = self.feed_id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!("⚠️ datafeed '{}' was never closed, deleting it in the background", feed_id);
                let client = self.client.clone();
                runtime.spawn(async move {
                    if let Err(err) = delete_feed(&client, &feed_id).await {
                        warn!("⚠️ datafeed '{}' is left behind on the pod: {:#}", feed_id, err);
                    }
                });
            }
            Err(_) => warn!("⚠️ datafeed '{}' is left behind on the pod, no runtime to delete it", feed_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{config_for, tokens};
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn feed_for(server: &MockServer) -> Result<DatafeedSource> {
        Ok(SymphonyClient::new(reqwest::Client::new(), config_for(&server.uri()), &tokens())?.datafeed())
    }

    async fn mount_create(server: &MockServer, feed_id: &str) {
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": feed_id})))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn the_one_where_the_ack_id_is_carried_forward() -> Result<()> {
        let server = MockServer::start().await;
        mount_create(&server, "feed-1").await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds/feed-1/read"))
            .and(body_json(json!({"ackId": ""})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ackId": "ack-1", "events": [{"type": "MESSAGESENT"}]})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds/feed-1/read"))
            .and(body_json(json!({"ackId": "ack-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ackId": "ack-2", "events": []})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/agent/v5/datafeeds/feed-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut feed = feed_for(&server)?;
        assert_eq!(feed.next_batch().await?, Some(vec![json!({"type": "MESSAGESENT"})]));
        assert_eq!(feed.feed_id(), Some("feed-1"));
        assert_eq!(feed.next_batch().await?, Some(vec![]));
        feed.close().await?;
        assert_eq!(feed.feed_id(), None);
        // 🔁 closing twice is a no-op, not a second DELETE
        feed.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_stale_feed_is_replaced() -> Result<()> {
        let server = MockServer::start().await;
        mount_create(&server, "old").await;
        mount_create(&server, "new").await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds/old/read"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds/new/read"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ackId": "a", "events": [1]})))
            .mount(&server)
            .await;

        let mut feed = feed_for(&server)?;
        assert_eq!(feed.next_batch().await?, Some(vec![json!(1)]));
        assert_eq!(feed.feed_id(), Some("new"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_rejected_credentials_are_fatal() -> Result<()> {
        let server = MockServer::start().await;
        mount_create(&server, "feed-1").await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds/feed-1/read"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let result = feed_for(&server)?.next_batch().await;
        assert!(result.is_err_and(|e| e.to_string().contains("rejected our credentials")));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_pod_stays_down_too_long() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds"))
            .respond_with(ResponseTemplate::new(503))
            // -- 🎯 config_for allows three attempts
            .expect(3)
            .mount(&server)
            .await;

        assert!(feed_for(&server)?.next_batch().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_body_is_an_empty_batch() -> Result<()> {
        let server = MockServer::start().await;
        mount_create(&server, "feed-1").await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds/feed-1/read"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert_eq!(feed_for(&server)?.next_batch().await?, Some(vec![]));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_pod_keeps_forgetting_the_feed() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "f"})))
            // -- 🎯 config_for allows three attempts, so three feeds and then we give up
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds/f/read"))
            .respond_with(ResponseTemplate::new(400))
            .expect(3)
            .mount(&server)
            .await;

        let mut feed = feed_for(&server)?;
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), feed.next_batch()).await?;
        assert!(outcome.is_err_and(|e| e.to_string().contains("stale 3 times")));
        assert_eq!(feed.feed_id(), None);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_existing_feed_is_picked_back_up() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agent/v5/datafeeds"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"id": "existing", "type": "fanout"}, {"id": "another"}])),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "unwanted"})))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds/existing/read"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ackId": "a", "events": [1]})))
            .expect(1)
            .mount(&server)
            .await;

        let mut feed = feed_for(&server)?;
        assert_eq!(feed.next_batch().await?, Some(vec![json!(1)]));
        assert_eq!(feed.feed_id(), Some("existing"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_list_means_a_fresh_feed() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agent/v5/datafeeds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "fresh"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds/fresh/read"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ackId": "a", "events": []})))
            .mount(&server)
            .await;

        let mut feed = feed_for(&server)?;
        assert_eq!(feed.next_batch().await?, Some(vec![]));
        assert_eq!(feed.feed_id(), Some("fresh"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_creating_a_feed_is_forbidden() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agent/v5/datafeeds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds"))
            .respond_with(ResponseTemplate::new(403))
            // -- 🚫 no second try with credentials the pod already refused
            .expect(1)
            .mount(&server)
            .await;

        let result = feed_for(&server)?.next_batch().await;
        assert!(result.is_err_and(|e| e.to_string().contains("rejected our credentials while creating")));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_dropped_feed_still_gets_deleted() -> Result<()> {
        let server = MockServer::start().await;
        mount_create(&server, "orphan").await;
        Mock::given(method("POST"))
            .and(path("/agent/v5/datafeeds/orphan/read"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ackId": "a", "events": []})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/agent/v5/datafeeds/orphan"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut feed = feed_for(&server)?;
        feed.next_batch().await?;
        drop(feed);

        let mut deleted = false;
        for _ in 0..100 {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests.iter().any(|r| r.method.as_str() == "DELETE") {
                deleted = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(deleted, "the background delete reached the pod");
        Ok(())
    }
}
