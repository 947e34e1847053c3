//! Media-remote session management
//!
//! Runs on top of an established tunnel: a capability handshake, update
//! subscriptions and an initial queue fetch, then a heartbeat. Inbound
//! state messages maintain the content cache from which the now-playing
//! projection derives. Request timeouts resolve to an empty result rather
//! than an error; an unanswered message is routine here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use prost::Message;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::protobuf::{
    ClientUpdatesConfigMessage, Command, ConnectionStateValue, ContentItem, DeviceInfoMessage,
    MessageType, PlaybackQueueRequestMessage, PlaybackStateValue, ProtocolMessage,
    SendCommandMessage, SetConnectionStateMessage, SetStateMessage, UpdateContentItemMessage,
};
use crate::error::Result;
use crate::types::{NowPlaying, PlaybackState, RemoteConfig};

const PROTOCOL_VERSION: i32 = 1;
const ARTWORK_WIDTH: f64 = 400.0;
const ARTWORK_HEIGHT: f64 = 400.0;

/// Where serialized messages go; the tunnel in production, a channel in tests
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Send one serialized protocol message
    async fn send(&self, message: &[u8]) -> Result<()>;
}

#[async_trait]
impl MessageSink for crate::airplay::AirPlaySession {
    async fn send(&self, message: &[u8]) -> Result<()> {
        self.send_message(message).await
    }
}

/// Player commands exposed to callers
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MrpCommand {
    Play,
    Pause,
    PlayPause,
    Stop,
    NextTrack,
    PreviousTrack,
}

impl MrpCommand {
    fn wire_command(self) -> Command {
        match self {
            Self::Play => Command::Play,
            Self::Pause => Command::Pause,
            Self::PlayPause => Command::TogglePlayPause,
            Self::Stop => Command::Stop,
            Self::NextTrack => Command::NextTrack,
            Self::PreviousTrack => Command::PreviousTrack,
        }
    }
}

/// Cached queue state, cleared when the tunnel goes away
#[derive(Default)]
struct ContentCache {
    items: Vec<ContentItem>,
    location: usize,
    supported_commands: HashMap<i32, bool>,
    playback_state: Option<i32>,
    /// Artwork bytes tagged with the identifier they belong to
    artwork: Option<(String, Vec<u8>)>,
}

impl ContentCache {
    fn current_item(&self) -> Option<&ContentItem> {
        self.items.get(self.location)
    }

    fn apply_set_state(&mut self, state: &SetStateMessage) {
        if let Some(queue) = &state.playback_queue {
            self.location = usize::try_from(queue.location).unwrap_or(0);
            self.items = queue.content_items.clone();
            // Capture artwork delivered with the queue
            for item in &self.items {
                if let Some(artwork) = &item.artwork_data {
                    if !artwork.is_empty() {
                        self.artwork = Some((item.identifier.clone(), artwork.clone()));
                    }
                }
            }
        }
        if let Some(commands) = &state.supported_commands {
            self.supported_commands = commands
                .supported_commands
                .iter()
                .map(|c| (c.command, c.enabled.unwrap_or(false)))
                .collect();
        }
        if state.playback_state.is_some() {
            self.playback_state = state.playback_state;
        }
    }

    fn apply_content_items(&mut self, update: &UpdateContentItemMessage) {
        for updated in &update.content_items {
            if let Some(artwork) = &updated.artwork_data {
                if !artwork.is_empty() {
                    self.artwork = Some((updated.identifier.clone(), artwork.clone()));
                }
            }
            match self
                .items
                .iter_mut()
                .find(|item| item.identifier == updated.identifier)
            {
                Some(existing) => merge_item(existing, updated),
                None => self.items.push(updated.clone()),
            }
        }
    }

    /// Derive the simplified projection from the current queue location
    ///
    /// Artwork is withheld when the cached image belongs to a different
    /// content identifier, so a track change never shows stale art; it is
    /// carried forward across rate and position updates of the same item.
    fn now_playing(&self) -> NowPlaying {
        let Some(item) = self.current_item() else {
            return NowPlaying::default();
        };

        let metadata = item.metadata.as_ref();
        let rate = metadata.and_then(|m| m.playback_rate).map(f64::from);

        let state = match self.playback_state.and_then(|s| PlaybackStateValue::try_from(s).ok())
        {
            Some(PlaybackStateValue::Playing) => PlaybackState::Playing,
            Some(PlaybackStateValue::Paused | PlaybackStateValue::Interrupted) => {
                PlaybackState::Paused
            }
            Some(_) => PlaybackState::Idle,
            None => match rate {
                Some(r) if r > 0.0 => PlaybackState::Playing,
                Some(_) => PlaybackState::Paused,
                None => PlaybackState::Idle,
            },
        };

        let artwork = self
            .artwork
            .as_ref()
            .filter(|(id, _)| *id == item.identifier)
            .map(|(_, bytes)| bytes.clone());

        NowPlaying {
            title: metadata.and_then(|m| m.title.clone()),
            artist: metadata.and_then(|m| m.track_artist_name.clone()),
            album: metadata.and_then(|m| m.album_name.clone()),
            duration: metadata.and_then(|m| m.duration),
            position: metadata.and_then(|m| m.elapsed_time),
            playback_rate: rate,
            state,
            artwork,
        }
    }

    /// Whether an artwork refetch is worthwhile for the current item
    fn wants_artwork(&self) -> bool {
        let Some(item) = self.current_item() else {
            return false;
        };
        let available = item
            .metadata
            .as_ref()
            .and_then(|m| m.artwork_available)
            .unwrap_or(true);
        available
            && !self
                .artwork
                .as_ref()
                .is_some_and(|(id, _)| *id == item.identifier)
    }
}

fn merge_item(existing: &mut ContentItem, updated: &ContentItem) {
    if let Some(metadata) = &updated.metadata {
        match existing.metadata.as_mut() {
            Some(current) => {
                if metadata.title.is_some() {
                    current.title = metadata.title.clone();
                }
                if metadata.track_artist_name.is_some() {
                    current.track_artist_name = metadata.track_artist_name.clone();
                }
                if metadata.album_name.is_some() {
                    current.album_name = metadata.album_name.clone();
                }
                if metadata.duration.is_some() {
                    current.duration = metadata.duration;
                }
                if metadata.elapsed_time.is_some() {
                    current.elapsed_time = metadata.elapsed_time;
                }
                if metadata.playback_rate.is_some() {
                    current.playback_rate = metadata.playback_rate;
                }
                if metadata.artwork_available.is_some() {
                    current.artwork_available = metadata.artwork_available;
                }
            }
            None => existing.metadata = Some(metadata.clone()),
        }
    }
    if updated.artwork_data.is_some() {
        existing.artwork_data = updated.artwork_data.clone();
    }
}

struct Inner {
    sink: Arc<dyn MessageSink>,
    cache: StdMutex<ContentCache>,
    pending: StdMutex<HashMap<String, oneshot::Sender<ProtocolMessage>>>,
    now_playing_tx: broadcast::Sender<NowPlaying>,
    config: RemoteConfig,
    artwork_request_in_flight: AtomicBool,
}

impl Inner {
    async fn send(&self, message: &ProtocolMessage) -> Result<()> {
        self.sink.send(&message.encode_to_vec()).await
    }

    /// Send a request and wait for the identifier-matched reply
    ///
    /// Expiry clears the handler and resolves to `None`; a missing reply
    /// (unsupported message, busy device) is not an error.
    async fn request(&self, mut message: ProtocolMessage) -> Result<Option<ProtocolMessage>> {
        let token = format!("{:016X}", rand::random::<u64>());
        message.identifier = Some(token.clone());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(token.clone(), tx);

        if let Err(e) = self.send(&message).await {
            self.pending.lock().unwrap().remove(&token);
            return Err(e);
        }

        match timeout(self.config.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                self.pending.lock().unwrap().remove(&token);
                tracing::debug!(token, "request expired without a reply");
                Ok(None)
            }
        }
    }

    /// Apply an inbound message to the cache and resolve any waiter
    fn dispatch(self: &Arc<Self>, message: ProtocolMessage) {
        let mut projection_changed = false;

        match message.message_type() {
            Some(MessageType::SetState) => {
                if let Some(state) = &message.set_state_message {
                    self.cache.lock().unwrap().apply_set_state(state);
                    projection_changed = true;
                }
            }
            Some(MessageType::UpdateContentItem) => {
                if let Some(update) = &message.update_content_item_message {
                    self.cache.lock().unwrap().apply_content_items(update);
                    projection_changed = true;
                }
            }
            Some(MessageType::VolumeControlAvailability | MessageType::Notification) | None => {}
            _ => {
                tracing::trace!(message_type = message.r#type, "unhandled message");
            }
        }

        if let Some(token) = &message.identifier {
            let waiter = self.pending.lock().unwrap().remove(token);
            if let Some(tx) = waiter {
                let _ = tx.send(message);
            }
        }

        if projection_changed {
            self.publish_now_playing();
        }
    }

    fn publish_now_playing(self: &Arc<Self>) {
        let (projection, wants_artwork) = {
            let cache = self.cache.lock().unwrap();
            (cache.now_playing(), cache.wants_artwork())
        };

        // Once something is playing without cached art, refetch the queue
        // with artwork; at most one such request runs at a time.
        if projection.state == PlaybackState::Playing
            && projection.artwork.is_none()
            && wants_artwork
            && self
                .artwork_request_in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let result = inner.request(playback_queue_request()).await;
                inner.artwork_request_in_flight.store(false, Ordering::SeqCst);
                if let Err(e) = result {
                    tracing::warn!(error = %e, "artwork refetch failed");
                }
            });
        }

        let _ = self.now_playing_tx.send(projection);
    }

    fn clear(&self) {
        *self.cache.lock().unwrap() = ContentCache::default();
        self.pending.lock().unwrap().clear();
    }
}

fn playback_queue_request() -> ProtocolMessage {
    let mut message = ProtocolMessage::with_type(MessageType::PlaybackQueueRequest);
    message.playback_queue_request_message = Some(PlaybackQueueRequestMessage {
        location: 0,
        length: 1,
        include_metadata: Some(true),
        artwork_width: Some(ARTWORK_WIDTH),
        artwork_height: Some(ARTWORK_HEIGHT),
    });
    message
}

/// A running media-remote session
pub struct MrpSession {
    inner: Arc<Inner>,
    dispatch_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
}

impl MrpSession {
    /// Run the session handshake and start background tasks
    ///
    /// Sequence: device-info (awaited), connection-state (fire and
    /// forget), client-updates subscription (awaited), initial queue fetch
    /// (awaited, empty on timeout), then the heartbeat starts and the
    /// session is ready.
    ///
    /// # Errors
    /// Fails only on transport errors; unanswered requests are tolerated.
    pub async fn start(
        sink: Arc<dyn MessageSink>,
        mut inbound: mpsc::Receiver<Vec<u8>>,
        config: RemoteConfig,
    ) -> Result<Self> {
        let (now_playing_tx, _) = broadcast::channel(16);
        let inner = Arc::new(Inner {
            sink,
            cache: StdMutex::new(ContentCache::default()),
            pending: StdMutex::new(HashMap::new()),
            now_playing_tx,
            config,
            artwork_request_in_flight: AtomicBool::new(false),
        });

        let dispatch_inner = Arc::clone(&inner);
        let dispatch_task = tokio::spawn(async move {
            while let Some(bytes) = inbound.recv().await {
                match ProtocolMessage::decode(&bytes[..]) {
                    Ok(message) => dispatch_inner.dispatch(message),
                    Err(e) => tracing::warn!(error = %e, "undecodable protocol message"),
                }
            }
            // Tunnel gone: the cache does not outlive it.
            dispatch_inner.clear();
        });

        // Capability handshake
        let mut device_info = ProtocolMessage::with_type(MessageType::DeviceInfo);
        device_info.device_info_message = Some(DeviceInfoMessage {
            unique_identifier: inner.config.client_id.clone(),
            name: inner.config.name.clone(),
            localized_model_name: Some("iPhone".to_string()),
            system_build_version: Some("18G82".to_string()),
            application_bundle_identifier: Some("com.apple.TVRemote".to_string()),
            application_bundle_version: Some("344.28".to_string()),
            protocol_version: Some(PROTOCOL_VERSION),
            supports_system_pairing: Some(true),
            connected: Some(true),
            supports_shared_queue: Some(true),
        });
        inner.request(device_info).await?;
        tracing::debug!("device-info exchange done");

        let mut connection_state = ProtocolMessage::with_type(MessageType::SetConnectionState);
        connection_state.set_connection_state_message = Some(SetConnectionStateMessage {
            state: ConnectionStateValue::Connected as i32,
        });
        inner.send(&connection_state).await?;

        let mut updates_config = ProtocolMessage::with_type(MessageType::ClientUpdatesConfig);
        updates_config.client_updates_config_message = Some(ClientUpdatesConfigMessage {
            artwork_updates: true,
            now_playing_updates: true,
            volume_updates: true,
            keyboard_updates: true,
            output_device_updates: true,
        });
        inner.request(updates_config).await?;

        if let Some(reply) = inner.request(playback_queue_request()).await? {
            // Normally applied by the dispatch loop already; logging the
            // reply type helps when the device answers with something else.
            tracing::debug!(message_type = reply.r#type, "initial queue reply");
        } else {
            tracing::debug!("no initial queue state");
        }

        let heartbeat_inner = Arc::clone(&inner);
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_inner.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let beat = ProtocolMessage::with_type(MessageType::Generic);
                if let Err(e) = heartbeat_inner.send(&beat).await {
                    tracing::warn!(error = %e, "heartbeat failed");
                    return;
                }
            }
        });

        tracing::info!("media-remote session ready");
        Ok(Self {
            inner,
            dispatch_task,
            heartbeat_task,
        })
    }

    /// Current now-playing projection
    #[must_use]
    pub fn now_playing(&self) -> NowPlaying {
        self.inner.cache.lock().unwrap().now_playing()
    }

    /// Subscribe to now-playing updates
    #[must_use]
    pub fn updates(&self) -> broadcast::Receiver<NowPlaying> {
        self.inner.now_playing_tx.subscribe()
    }

    /// Whether the current player reports a command as available
    #[must_use]
    pub fn is_command_supported(&self, command: MrpCommand) -> bool {
        self.inner
            .cache
            .lock()
            .unwrap()
            .supported_commands
            .get(&(command.wire_command() as i32))
            .copied()
            .unwrap_or(false)
    }

    /// Dispatch a player command
    ///
    /// # Errors
    /// Fails on transport errors; an unanswered command resolves quietly.
    pub async fn send_command(&self, command: MrpCommand) -> Result<()> {
        let mut message = ProtocolMessage::with_type(MessageType::SendCommand);
        message.send_command_message = Some(SendCommandMessage {
            command: command.wire_command() as i32,
            options: None,
        });
        self.inner.request(message).await?;
        Ok(())
    }

    /// Stop the session and clear all cached state
    pub fn shutdown(&self) {
        self.dispatch_task.abort();
        self.heartbeat_task.abort();
        self.inner.clear();
    }
}

impl Drop for MrpSession {
    fn drop(&mut self) {
        self.dispatch_task.abort();
        self.heartbeat_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::super::protobuf::{
        CommandInfo, ContentItemMetadata, PlaybackQueue, SupportedCommands,
    };
    use super::*;
    use std::time::Duration;

    /// Sink that hands sent messages to the test
    struct ChannelSink {
        tx: mpsc::UnboundedSender<ProtocolMessage>,
    }

    #[async_trait]
    impl MessageSink for ChannelSink {
        async fn send(&self, message: &[u8]) -> Result<()> {
            let decoded = ProtocolMessage::decode(message).unwrap();
            let _ = self.tx.send(decoded);
            Ok(())
        }
    }

    fn test_config() -> RemoteConfig {
        RemoteConfig {
            request_timeout: Duration::from_millis(50),
            heartbeat_interval: Duration::from_secs(60),
            ..RemoteConfig::default()
        }
    }

    fn item(identifier: &str, title: &str, rate: f32) -> ContentItem {
        ContentItem {
            identifier: identifier.to_string(),
            metadata: Some(ContentItemMetadata {
                title: Some(title.to_string()),
                track_artist_name: Some("Artist".to_string()),
                album_name: Some("Album".to_string()),
                duration: Some(180.0),
                elapsed_time: Some(12.0),
                playback_rate: Some(rate),
                artwork_available: Some(true),
                artwork_mime_type: None,
            }),
            artwork_data: None,
        }
    }

    fn set_state(items: Vec<ContentItem>, state: PlaybackStateValue) -> SetStateMessage {
        SetStateMessage {
            playback_queue: Some(PlaybackQueue {
                location: 0,
                content_items: items,
            }),
            supported_commands: None,
            playback_state: Some(state as i32),
        }
    }

    /// Run the handshake against a scripted device, answering every
    /// identified request, and return the running session.
    async fn started_session() -> (MrpSession, mpsc::Sender<Vec<u8>>) {
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let sink = Arc::new(ChannelSink { tx: sent_tx });

        // Answer exactly the three identified handshake requests, then
        // drop our inbound sender so tests control channel lifetime.
        let responder_tx = inbound_tx.clone();
        tokio::spawn(async move {
            let mut answered = 0;
            while let Some(request) = sent_rx.recv().await {
                if let Some(token) = request.identifier {
                    let mut reply = ProtocolMessage::with_type(MessageType::SetState);
                    reply.identifier = Some(token);
                    if responder_tx.send(reply.encode_to_vec()).await.is_err() {
                        return;
                    }
                    answered += 1;
                    if answered == 3 {
                        return;
                    }
                }
            }
        });

        let session = MrpSession::start(sink, inbound_rx, test_config())
            .await
            .unwrap();
        (session, inbound_tx)
    }

    #[tokio::test]
    async fn test_handshake_completes_without_queue_reply() {
        let (session, _inbound) = started_session().await;
        assert_eq!(session.now_playing(), NowPlaying::default());
        session.shutdown();
    }

    #[tokio::test]
    async fn test_set_state_updates_projection() {
        let (session, inbound) = started_session().await;
        let mut updates = session.updates();

        let mut message = ProtocolMessage::with_type(MessageType::SetState);
        message.set_state_message = Some(set_state(
            vec![item("track-1", "Song One", 1.0)],
            PlaybackStateValue::Playing,
        ));
        inbound.send(message.encode_to_vec()).await.unwrap();

        let projection = timeout(Duration::from_secs(1), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(projection.title.as_deref(), Some("Song One"));
        assert_eq!(projection.state, PlaybackState::Playing);
        assert_eq!(projection.position, Some(12.0));

        session.shutdown();
    }

    #[tokio::test]
    async fn test_artwork_withheld_across_identifier_change() {
        let (session, inbound) = started_session().await;
        let mut updates = session.updates();

        // First track arrives with artwork
        let mut with_art = item("track-1", "Song One", 1.0);
        with_art.artwork_data = Some(vec![0xFF, 0xD8, 0xEE]);
        let mut message = ProtocolMessage::with_type(MessageType::SetState);
        message.set_state_message =
            Some(set_state(vec![with_art], PlaybackStateValue::Playing));
        inbound.send(message.encode_to_vec()).await.unwrap();

        let projection = timeout(Duration::from_secs(1), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(projection.artwork, Some(vec![0xFF, 0xD8, 0xEE]));

        // Rate-only update of the same item keeps the artwork
        let mut message = ProtocolMessage::with_type(MessageType::UpdateContentItem);
        message.update_content_item_message = Some(UpdateContentItemMessage {
            content_items: vec![ContentItem {
                identifier: "track-1".to_string(),
                metadata: Some(ContentItemMetadata {
                    playback_rate: Some(0.0),
                    ..ContentItemMetadata::default()
                }),
                artwork_data: None,
            }],
        });
        inbound.send(message.encode_to_vec()).await.unwrap();

        let projection = timeout(Duration::from_secs(1), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(projection.artwork, Some(vec![0xFF, 0xD8, 0xEE]));

        // A different item must not inherit the stale artwork
        let mut message = ProtocolMessage::with_type(MessageType::SetState);
        message.set_state_message = Some(set_state(
            vec![item("track-2", "Song Two", 1.0)],
            PlaybackStateValue::Playing,
        ));
        inbound.send(message.encode_to_vec()).await.unwrap();

        let projection = timeout(Duration::from_secs(1), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(projection.title.as_deref(), Some("Song Two"));
        assert_eq!(projection.artwork, None);

        session.shutdown();
    }

    #[tokio::test]
    async fn test_content_item_delta_appends_unknown_identifier() {
        let (session, inbound) = started_session().await;
        let mut updates = session.updates();

        let mut message = ProtocolMessage::with_type(MessageType::UpdateContentItem);
        message.update_content_item_message = Some(UpdateContentItemMessage {
            content_items: vec![item("new-track", "Fresh", 1.0)],
        });
        inbound.send(message.encode_to_vec()).await.unwrap();

        let projection = timeout(Duration::from_secs(1), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(projection.title.as_deref(), Some("Fresh"));

        session.shutdown();
    }

    #[tokio::test]
    async fn test_supported_commands_tracked() {
        let (session, inbound) = started_session().await;
        let mut updates = session.updates();

        let mut message = ProtocolMessage::with_type(MessageType::SetState);
        message.set_state_message = Some(SetStateMessage {
            playback_queue: Some(PlaybackQueue {
                location: 0,
                content_items: vec![item("track-1", "Song", 1.0)],
            }),
            supported_commands: Some(SupportedCommands {
                supported_commands: vec![
                    CommandInfo {
                        command: Command::Pause as i32,
                        enabled: Some(true),
                    },
                    CommandInfo {
                        command: Command::NextTrack as i32,
                        enabled: Some(false),
                    },
                ],
            }),
            playback_state: Some(PlaybackStateValue::Playing as i32),
        });
        inbound.send(message.encode_to_vec()).await.unwrap();
        let _ = timeout(Duration::from_secs(1), updates.recv()).await;

        assert!(session.is_command_supported(MrpCommand::Pause));
        assert!(!session.is_command_supported(MrpCommand::NextTrack));
        assert!(!session.is_command_supported(MrpCommand::Stop));

        session.shutdown();
    }

    #[tokio::test]
    async fn test_cache_cleared_when_tunnel_drops() {
        let (session, inbound) = started_session().await;
        let mut updates = session.updates();

        let mut message = ProtocolMessage::with_type(MessageType::SetState);
        message.set_state_message = Some(set_state(
            vec![item("track-1", "Song", 1.0)],
            PlaybackStateValue::Playing,
        ));
        inbound.send(message.encode_to_vec()).await.unwrap();
        let _ = timeout(Duration::from_secs(1), updates.recv()).await;

        drop(inbound);
        // Give the dispatch loop a moment to observe the closed channel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.now_playing(), NowPlaying::default());
    }
}
