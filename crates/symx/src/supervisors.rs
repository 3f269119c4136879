//! 🎬 *[camera pans across a dimly lit trading floor]*
//! 🎬 "In a world where chat messages never stop..."
//! 🎬 "One supervisor dared to manage them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor (exported as `Adapter`): part middle manager, part helicopter
//! parent. It owns the room directory, the sink, the feed, and two workers.
//!
//! 🧠 Knowledge graph:
//! - `subscribe` resolves room names up front, then spawns the [`SourceWorker`].
//!   The host gets a bounded `Receiver<Vec<ChatMessage>>`.
//! - `publisher` lazily spawns the [`SinkWorker`] behind an unbounded queue, so
//!   the host never blocks on a slow pod.
//! - `closed` resolves when the feed worker ends. `Err` = the feed is dead for good.
//!   Deciding whether to exit the process is the host's call, never ours.
//! - `shutdown`: stop signal → bounded join (abort if stuck) → exit message →
//!   close the queue → bounded drain of the sink worker.
//!
//! ⚠️ Workers are private. The world talks to the Supervisor, not to its minions.

mod workers;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_channel::{Receiver, Sender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app_config::{AppConfig, RuntimeConfig};
use crate::backends::symphony::SymphonyClient;
use crate::backends::{Presence, RoomLookup, Sink, SinkBackend, SourceBackend};
use crate::directory::RoomDirectory;
use crate::message::ChatMessage;
use crate::translator::FeedTranslator;
use workers::{FailurePolicy, SinkWorker, SourceWorker, Worker};

/// 🎛️ What to listen to, and how to say goodbye.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Room names (or raw stream ids). Empty means every room the bot is in.
    pub rooms: Vec<String>,
    /// Posted to each subscribed room on shutdown.
    pub exit_message: Option<String>,
    /// Drop messages the bot itself wrote. Needs the bot's user id to be known.
    pub skip_own: bool,
}

/// 📮 The host's handle for outbound messages. Cheap to clone, never blocks.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: Sender<ChatMessage>,
}

impl Publisher {
    /// Queue one message. Fails only once the adapter has shut down.
    pub fn publish(&self, message: ChatMessage) -> Result<()> {
        self.tx
            .try_send(message)
            .map_err(|_| anyhow!("💀 the adapter is shut down, nothing more can be published"))
    }
}

/// 📦 The Supervisor: because even async tasks need someone hovering over them.
#[derive(Debug)]
pub struct Supervisor {
    directory: Arc<RoomDirectory>,
    sink: Arc<SinkBackend>,
    source: Option<SourceBackend>,
    runtime: RuntimeConfig,
    failure: FailurePolicy,
    own_user_id: Option<String>,
    stop_tx: watch::Sender<bool>,
    source_handle: Option<JoinHandle<Result<()>>>,
    outbound: Option<(Sender<ChatMessage>, JoinHandle<Result<()>>)>,
    exit_message: Option<String>,
    subscribed_streams: Vec<String>,
}

impl Supervisor {
    /// 🚀 Authenticate against the pod and wire up the real backends.
    pub async fn connect(config: AppConfig) -> Result<Self> {
        let client = SymphonyClient::connect(config.symphony.clone(), config.runtime.http_timeout())
            .await
            .context("💀 could not connect to the pod")?;

        let own_user_id = if client.config().session_info_url.is_some() {
            match client.session_user_id().await {
                Ok(id) => Some(id),
                Err(err) => {
                    warn!("⚠️ could not learn our own user id, own messages will not be skipped: {:#}", err);
                    None
                }
            }
        } else {
            None
        };

        let lookup: Arc<dyn RoomLookup> = Arc::new(client.clone());
        let source = SourceBackend::Datafeed(client.datafeed());
        let supervisor = Self::from_parts(source, SinkBackend::Symphony(client), lookup, config.runtime)
            .with_failure_policy(config.symphony.error_room, config.symphony.inform_client);
        Ok(match own_user_id {
            Some(id) => supervisor.with_own_user_id(id),
            None => supervisor,
        })
    }

    /// 🧩 Assemble from injected backends. No network.
    pub fn from_parts(
        source: SourceBackend,
        sink: SinkBackend,
        lookup: Arc<dyn RoomLookup>,
        runtime: RuntimeConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            directory: Arc::new(RoomDirectory::new(lookup)),
            sink: Arc::new(sink),
            source: Some(source),
            runtime,
            failure: FailurePolicy::default(),
            own_user_id: None,
            stop_tx,
            source_handle: None,
            outbound: None,
            exit_message: None,
            subscribed_streams: Vec::new(),
        }
    }

    pub fn with_failure_policy(mut self, error_room: Option<String>, inform_client: bool) -> Self {
        self.failure = FailurePolicy {
            error_room,
            inform_client,
        };
        self
    }

    pub fn with_own_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.own_user_id = Some(user_id.into());
        self
    }

    pub fn directory(&self) -> &Arc<RoomDirectory> {
        &self.directory
    }

    /// 📡 Start listening. Every named room must resolve, or nothing starts.
    ///
    /// Callable once: the feed goes to the first subscriber.
    pub async fn subscribe(&mut self, options: SubscribeOptions) -> Result<Receiver<Vec<ChatMessage>>> {
        let Some(source) = self.source.take() else {
            bail!("💀 already subscribed; the feed has exactly one reader");
        };

        let mut allowed = HashSet::new();
        for room in &options.rooms {
            let stream_id = self
                .directory
                .get_id_async(room)
                .await
                .ok_or_else(|| anyhow!("💀 cannot find room '{}'", room))?;
            allowed.insert(stream_id);
        }

        let mut translator = FeedTranslator::new(allowed.clone(), self.directory.clone());
        if options.skip_own {
            match &self.own_user_id {
                Some(id) => translator = translator.skipping_user(id.clone()),
                None => warn!("⚠️ skip_own requested but our own user id is unknown"),
            }
        }

        let (tx, rx) = async_channel::bounded(self.runtime.queue_capacity.max(1));
        let worker = SourceWorker::new(source, translator, self.directory.clone(), tx, self.stop_tx.subscribe());
        self.source_handle = Some(worker.start());
        self.exit_message = options.exit_message.filter(|m| !m.trim().is_empty());
        self.subscribed_streams = allowed.into_iter().collect();
        info!(
            "📡 subscribed to {}",
            if options.rooms.is_empty() {
                "every room".to_string()
            } else {
                options.rooms.join(", ")
            }
        );
        Ok(rx)
    }

    /// 📮 The outbound queue. The sink worker starts on first call.
    pub fn publisher(&mut self) -> Publisher {
        if let Some((tx, _)) = &self.outbound {
            return Publisher { tx: tx.clone() };
        }
        let (tx, rx) = async_channel::unbounded();
        let worker = SinkWorker::new(
            rx,
            self.sink.clone(),
            self.directory.clone(),
            self.failure.clone(),
            self.runtime.send_timeout(),
        );
        self.outbound = Some((tx.clone(), worker.start()));
        Publisher { tx }
    }

    /// 🟢 Set presence, bounded by `presence_timeout`. `false` on timeout or failure.
    pub async fn publish_presence(&self, presence: Presence) -> bool {
        match tokio::time::timeout(self.runtime.presence_timeout(), self.sink.set_presence(presence)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                error!("💀 could not set presence to {}: {:#}", presence, err);
                false
            }
            Err(_) => {
                error!(
                    "💀 setting presence to {} timed out after {:?}",
                    presence,
                    self.runtime.presence_timeout()
                );
                false
            }
        }
    }

    /// 👥 User ids of a room's members, by name or stream id.
    pub async fn room_members(&self, room: &str) -> Vec<String> {
        self.directory.member_ids(room).await
    }

    /// ⏳ Resolves when the feed worker ends. `Err` means the feed died and won't come back.
    ///
    /// Cancel-safe: dropping this future leaves the worker running.
    pub async fn closed(&mut self) -> Result<()> {
        let Some(handle) = self.source_handle.as_mut() else {
            return Ok(());
        };
        let outcome = handle.await;
        self.source_handle = None;
        outcome.map_err(|join_err| anyhow!("💀 the feed worker panicked: {}", join_err))?
    }

    /// 🛑 Orderly teardown. Never exits the process.
    pub async fn shutdown(mut self) -> Result<()> {
        let grace = self.runtime.shutdown_timeout();
        info!("🛑 shutting down");

        // -- 📴 no receivers left means the worker is already gone, which is fine
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.source_handle.take() {
            match join_bounded(handle, grace).await {
                Ok(()) => {}
                Err(err) => warn!("⚠️ feed worker ended badly: {:#}", err),
            }
        }

        if let Some(exit_message) = self.exit_message.take() {
            let publisher = self.publisher();
            for stream_id in &self.subscribed_streams {
                publisher.publish(ChatMessage {
                    room: stream_id.clone(),
                    stream_id: Some(stream_id.clone()),
                    body: exit_message.clone(),
                    ..Default::default()
                })?;
            }
        }

        if let Some((tx, handle)) = self.outbound.take() {
            tx.close();
            join_bounded(handle, grace).await.context("💀 the sink worker did not finish cleanly")?;
        }
        info!("👋 shutdown complete");
        Ok(())
    }
}

/// ⏱️ Join a worker, giving up (and aborting it) after `grace`.
async fn join_bounded(mut handle: JoinHandle<Result<()>>, grace: Duration) -> Result<()> {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_err)) => Err(anyhow!("💀 worker panicked: {}", join_err)),
        Err(_) => {
            handle.abort();
            Err(anyhow!("💀 worker did not stop within {:?}, aborted", grace))
        }
    }
}
