//! Coordination-server client: connection lifecycle, reconnection with
//! exponential backoff, and protocol message dispatch.
//!
//! One task owns the whole connection lifecycle. Each epoch dials the
//! server, splits the socket into a read duty and a write duty, and runs
//! both until either side closes or shutdown is signalled. Transient
//! network failures loop back into the dial with doubled backoff; protocol
//! violations surface as fatal errors to the caller.

use crate::cache::{CacheError, DataCache};
use crate::config::MultiworldConfig;
use crate::queue::{BroadcastMessage, MessageQueue};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{
    encode_frame, ClientMessage, ConnectRequest, Connected, GetDataPackage, ItemImportance,
    PrintJson, RoomInfo, ServerMessage, Version, ITEM_SEND,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// First retry interval; doubles on every consecutive dial failure.
pub const INITIAL_RETRY: Duration = Duration::from_secs(1);

/// Capacity of the per-connection outbound channel. When handlers outrun
/// the socket, back-pressure blocks the handler rather than the network
/// duty.
pub const OUTBOUND_CAPACITY: usize = 10;

/// Items-handling capability bitmask sent in the join request: receive
/// items from other worlds plus our own, no starting inventory.
const ITEMS_HANDLING: u32 = 0b011;

/// Capability tags marking this client as a non-playing text relay.
const CLIENT_TAGS: &[&str] = &["TextOnly", "IgnoreGame"];

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection refused by server: {0}")]
    Refused(String),
    #[error("server reported an invalid packet: {0}")]
    InvalidPacket(String),
    #[error("websocket failure: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed frame: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("invalid client version {0:?}: {1}")]
    Version(String, semver::Error),
    #[error("outbound channel closed")]
    ChannelClosed,
}

impl ClientError {
    /// Fatal errors terminate the run loop; everything else reconnects.
    /// Continuing after the server flags our session as inconsistent
    /// risks acting on state the server no longer agrees with.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Refused(_) | ClientError::InvalidPacket(_))
    }
}

/// Exponential backoff state for the reconnect loop. Each failure waits
/// the current interval and doubles it, capped at `max`; any successful
/// connection resets the interval to [`INITIAL_RETRY`].
#[derive(Debug)]
struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    fn new(max: Duration) -> Self {
        Self {
            current: INITIAL_RETRY,
            max,
        }
    }

    /// The interval to wait for this failure; advances the state.
    fn next(&mut self) -> Duration {
        let wait = self.current;
        self.current = (self.current * 2).min(self.max);
        wait
    }

    fn reset(&mut self) {
        self.current = INITIAL_RETRY;
    }
}

/// Client for the multiworld coordination server. Owns the metadata cache
/// and produces translated events into the outbound queue.
pub struct MultiworldClient {
    client_id: String,
    client_version: semver::Version,
    slot_name: String,
    password: Option<String>,
    url: String,
    max_retry: Duration,
    cache: DataCache,
    queue: Arc<MessageQueue>,
}

impl MultiworldClient {
    pub fn new(
        config: &MultiworldConfig,
        cache: DataCache,
        queue: Arc<MessageQueue>,
    ) -> Result<Self, ClientError> {
        let client_version = semver::Version::parse(&config.client_version)
            .map_err(|e| ClientError::Version(config.client_version.clone(), e))?;

        Ok(Self {
            client_id: config.client_id.clone(),
            client_version,
            slot_name: config.world.slot.clone(),
            password: config.world.password.clone(),
            url: format!("ws://{}:{}", config.world.server, config.world.port),
            max_retry: Duration::from_secs(config.max_connection_retry),
            cache,
            queue,
        })
    }

    /// Spawns the connection-management task. The returned handle resolves
    /// when shutdown is signalled or a fatal protocol error occurs; the
    /// caller is expected to join it.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<Result<(), ClientError>> {
        tokio::spawn(self.run(shutdown))
    }

    /// Connection-management loop: dial, run one connection epoch, tear
    /// down, repeat. Backoff resets to the initial interval after any
    /// successful dial.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ClientError> {
        let mut backoff = Backoff::new(self.max_retry);

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            info!("connecting to {}", self.url);
            let socket = tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                dialed = connect_async(self.url.as_str()) => match dialed {
                    Ok((socket, _)) => socket,
                    Err(e) => {
                        let wait = backoff.next();
                        warn!(
                            "connection to {} failed: {e}; retrying in {}s",
                            self.url,
                            wait.as_secs()
                        );
                        tokio::select! {
                            _ = shutdown.changed() => return Ok(()),
                            _ = sleep(wait) => {}
                        }
                        continue;
                    }
                },
            };

            info!("connected to {}", self.url);
            backoff.reset();

            match self.run_connection(socket, &mut shutdown).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!("closing connection: {e}");
                    return Err(e);
                }
                Err(e) => warn!("connection error: {e}"),
            }

            if *shutdown.borrow() {
                return Ok(());
            }
            info!("disconnected from {}; reconnecting", self.url);
        }
    }

    /// One connection epoch: a write duty draining the outbound channel
    /// and a read duty dispatching incoming frames. Either duty ending
    /// ends the epoch; the socket is dropped wholesale afterwards.
    async fn run_connection(
        &mut self,
        socket: Socket,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ClientError> {
        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(OUTBOUND_CAPACITY);

        // Write duty: each entry becomes its own single-element frame.
        // Observes shutdown directly so a blocked handler upstream cannot
        // keep it alive past cancellation.
        let mut writer_shutdown = shutdown.clone();
        let writer = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = writer_shutdown.changed() => break,
                    message = outbound_rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                let frame = match encode_frame(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("unable to encode outgoing message: {e}");
                        continue;
                    }
                };
                debug!("sending frame: {frame}");
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    warn!("write failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Read duty: block on frames and dispatch until the connection
        // dies, a handler reports an error, or shutdown is signalled.
        let result = loop {
            tokio::select! {
                _ = shutdown.changed() => break Ok(()),
                incoming = stream.next() => match incoming {
                    None => break Ok(()),
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.dispatch(&text, &outbound_tx).await {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Close(_))) => break Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(ClientError::Socket(e)),
                },
            }
        };

        // Dropping the sender ends the write duty once it drains.
        drop(outbound_tx);
        let _ = writer.await;

        result
    }

    /// Decodes one frame and runs every contained message through the
    /// command table.
    async fn dispatch(
        &mut self,
        text: &str,
        outbound: &mpsc::Sender<ClientMessage>,
    ) -> Result<(), ClientError> {
        debug!("received frame: {text}");
        let messages = shared::decode_frames(text)?;

        for message in messages {
            match message {
                ServerMessage::RoomInfo(info) => self.handle_room_info(info, outbound).await?,
                ServerMessage::DataPackage(package) => {
                    info!(
                        "updating metadata for {} game(s)",
                        package.data.games.len()
                    );
                    self.cache.apply_update(&package.data.games)?;
                }
                ServerMessage::Connected(session) => self.handle_connected(session),
                ServerMessage::ConnectionRefused(refusal) => {
                    return Err(ClientError::Refused(refusal.errors.join(", ")));
                }
                // Reserved for session-state deltas; membership changes
                // currently arrive as full Connected payloads.
                ServerMessage::RoomUpdate(_) => {}
                ServerMessage::PrintJson(print) => self.handle_print_json(print).await,
                ServerMessage::InvalidPacket(packet) => {
                    return Err(ClientError::InvalidPacket(packet.text));
                }
                ServerMessage::Unknown => debug!("ignoring unrecognized command in: {text}"),
            }
        }

        Ok(())
    }

    /// Requests metadata for every game whose checksum went stale, then
    /// joins the session. The join request is sent once per RoomInfo.
    async fn handle_room_info(
        &mut self,
        info: RoomInfo,
        outbound: &mpsc::Sender<ClientMessage>,
    ) -> Result<(), ClientError> {
        info!(
            "room runs protocol {}.{}.{} with {} game(s)",
            info.version.major,
            info.version.minor,
            info.version.build,
            info.games.len()
        );

        let stale = self.cache.pending_updates(&info.datapackage_checksums);
        if !stale.is_empty() {
            info!("requesting metadata for {} stale game(s)", stale.len());
            self.send(outbound, ClientMessage::GetDataPackage(GetDataPackage { games: stale }))
                .await?;
        }

        self.send(outbound, self.join_request()).await
    }

    fn join_request(&self) -> ClientMessage {
        ClientMessage::Connect(ConnectRequest {
            password: self.password.clone(),
            name: self.slot_name.clone(),
            version: Version::new(
                self.client_version.major,
                self.client_version.minor,
                self.client_version.patch,
            ),
            tags: CLIENT_TAGS.iter().map(|tag| tag.to_string()).collect(),
            items_handling: ITEMS_HANDLING,
            uuid: self.client_id.clone(),
            game: String::new(),
        })
    }

    fn handle_connected(&mut self, session: Connected) {
        info!(
            "joined as slot {} with {} player(s) in session",
            session.slot,
            session.players.len()
        );
        self.cache.set_players(session.players, &session.slot_info);
    }

    /// Translates an item-send event and hands it to the queue. Names that
    /// are missing from the cache degrade to their numeric form; a
    /// partially resolved event still gets delivered.
    async fn handle_print_json(&self, print: PrintJson) {
        if print.kind != ITEM_SEND {
            return;
        }

        let item = &print.item;
        let message = BroadcastMessage {
            sender: self.cache.resolve_player_name(item.player),
            receiver: self.cache.resolve_player_name(print.receiving),
            item: self.cache.resolve_item_name(item.item, print.receiving),
            location: self.cache.resolve_location_name(item.location, item.player),
            importance: ItemImportance::from_flags(item.flags),
        };

        self.queue.enqueue(message).await;
    }

    async fn send(
        &self,
        outbound: &mpsc::Sender<ClientMessage>,
        message: ClientMessage,
    ) -> Result<(), ClientError> {
        outbound
            .send(message)
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MultiworldConfig;
    use shared::{DataPackage, DataPackageData, GameTable, InvalidPacket, NetworkItem, Player, SlotInfo};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn test_client(dir: &TempDir) -> (MultiworldClient, Arc<MessageQueue>) {
        let mut config = MultiworldConfig::default();
        config.world.slot = "Civil".to_string();
        config.cache.filepath = dir.path().to_path_buf();

        let mut cache = DataCache::new(dir.path());
        cache.load().unwrap();

        let queue = MessageQueue::new();
        let client = MultiworldClient::new(&config, cache, Arc::clone(&queue)).unwrap();
        (client, queue)
    }

    fn frame(message: &ServerMessage) -> String {
        encode_frame(message).unwrap()
    }

    fn room_info_frame(checksums: &[(&str, &str)]) -> String {
        let mut datapackage_checksums = HashMap::new();
        for (game, checksum) in checksums {
            datapackage_checksums.insert(game.to_string(), checksum.to_string());
        }
        frame(&ServerMessage::RoomInfo(RoomInfo {
            version: Version::new(0, 5, 0),
            password: false,
            games: checksums.iter().map(|(game, _)| game.to_string()).collect(),
            datapackage_checksums,
        }))
    }

    fn connected_frame() -> String {
        let players = vec![
            Player {
                team: 0,
                slot: 1,
                alias: "Civil".to_string(),
                name: "Civil".to_string(),
            },
            Player {
                team: 0,
                slot: 3,
                alias: "Tea".to_string(),
                name: "Tea".to_string(),
            },
        ];
        let mut slot_info = HashMap::new();
        slot_info.insert(
            "1".to_string(),
            SlotInfo {
                name: "Civil".to_string(),
                game: "GameB".to_string(),
                kind: 1,
            },
        );
        slot_info.insert(
            "3".to_string(),
            SlotInfo {
                name: "Tea".to_string(),
                game: "GameA".to_string(),
                kind: 1,
            },
        );
        frame(&ServerMessage::Connected(Connected {
            team: 0,
            slot: 1,
            players,
            slot_info,
        }))
    }

    fn data_package_frame(game: &str, checksum: &str) -> String {
        let mut table = GameTable {
            checksum: checksum.to_string(),
            ..GameTable::default()
        };
        table
            .item_name_to_id
            .insert("Turkey sandwich".to_string(), 50);
        table
            .location_name_to_id
            .insert("Under the couch".to_string(), 10);

        let mut games = HashMap::new();
        games.insert(game.to_string(), table);
        frame(&ServerMessage::DataPackage(DataPackage {
            data: DataPackageData { games },
        }))
    }

    fn item_send_frame(item: i64, location: i64, player: i32, receiving: i32, flags: u32) -> String {
        frame(&ServerMessage::PrintJson(PrintJson {
            kind: ITEM_SEND.to_string(),
            receiving,
            item: NetworkItem {
                item,
                location,
                player,
                flags,
            },
        }))
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1800));
        let observed: Vec<u64> = (0..13).map(|_| backoff.next().as_secs()).collect();

        assert_eq!(
            observed,
            vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024, 1800, 1800]
        );
    }

    #[test]
    fn test_backoff_resets_after_success() {
        let mut backoff = Backoff::new(Duration::from_secs(1800));
        for _ in 0..5 {
            backoff.next();
        }
        assert!(backoff.next() > INITIAL_RETRY);

        backoff.reset();
        assert_eq!(backoff.next(), INITIAL_RETRY);
        assert_eq!(backoff.next(), INITIAL_RETRY * 2);
    }

    #[test]
    fn test_backoff_respects_small_cap() {
        let max = Duration::from_secs(2);
        let mut backoff = Backoff::new(max);
        assert_eq!(backoff.next(), INITIAL_RETRY);
        assert_eq!(backoff.next(), max);
        assert_eq!(backoff.next(), max);
    }

    #[test]
    fn test_rejects_unparseable_version() {
        let config = MultiworldConfig {
            client_version: "not-a-version".to_string(),
            ..MultiworldConfig::default()
        };
        let err = match MultiworldClient::new(&config, DataCache::new("unused"), MessageQueue::new())
        {
            Err(err) => err,
            Ok(_) => panic!("expected a version error"),
        };
        assert!(matches!(err, ClientError::Version(_, _)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_room_info_requests_stale_games_then_joins() {
        let dir = TempDir::new().unwrap();
        let (mut client, _queue) = test_client(&dir);
        let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);

        client
            .dispatch(&room_info_frame(&[("GameA", "abc123")]), &tx)
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            ClientMessage::GetDataPackage(request) => {
                assert_eq!(request.games, vec!["GameA".to_string()]);
            }
            other => panic!("expected metadata request, got {:?}", other),
        }

        match rx.try_recv().unwrap() {
            ClientMessage::Connect(join) => {
                assert_eq!(join.name, "Civil");
                assert_eq!(join.items_handling, ITEMS_HANDLING);
                assert_eq!(join.version.class, "Version");
                assert!(join.tags.contains(&"TextOnly".to_string()));
            }
            other => panic!("expected join request, got {:?}", other),
        }

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_room_info_with_fresh_cache_only_joins() {
        let dir = TempDir::new().unwrap();
        let (mut client, _queue) = test_client(&dir);
        let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);

        client
            .dispatch(&data_package_frame("GameA", "abc123"), &tx)
            .await
            .unwrap();
        client
            .dispatch(&room_info_frame(&[("GameA", "abc123")]), &tx)
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            ClientMessage::Connect(_) => {}
            other => panic!("expected join request, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_item_send_event_contents() {
        let dir = TempDir::new().unwrap();
        let (mut client, queue) = test_client(&dir);
        let (tx, _rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        queue
            .register_listener(move |msg| {
                sink.lock().unwrap().push(msg.clone());
                Ok(())
            })
            .await;

        client
            .dispatch(&data_package_frame("GameA", "abc123"), &tx)
            .await
            .unwrap();
        client.dispatch(&connected_frame(), &tx).await.unwrap();
        // Slot 3 finds its own item 50 at location 10.
        client
            .dispatch(&item_send_frame(50, 10, 3, 3, 0b001), &tx)
            .await
            .unwrap();
        queue.flush_one().await;

        let messages = seen.lock().unwrap();
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.sender, "Tea");
        assert_eq!(message.receiver, "Tea");
        assert_eq!(message.item, "Turkey sandwich");
        assert_eq!(message.location, "Under the couch");
        assert_eq!(message.importance, ItemImportance::Progression);
    }

    #[tokio::test]
    async fn test_item_send_degrades_to_numeric_fallbacks() {
        let dir = TempDir::new().unwrap();
        let (mut client, queue) = test_client(&dir);
        let (tx, _rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        queue
            .register_listener(move |msg| {
                sink.lock().unwrap().push(msg.clone());
                Ok(())
            })
            .await;

        // No metadata, no player directory: everything falls back.
        client
            .dispatch(&item_send_frame(50, 10, 3, 4, 0), &tx)
            .await
            .unwrap();
        queue.flush_one().await;

        let messages = seen.lock().unwrap();
        let message = &messages[0];
        assert_eq!(message.sender, "3");
        assert_eq!(message.receiver, "4");
        assert_eq!(message.item, "50");
        assert_eq!(message.location, "10");
        assert_eq!(message.importance, ItemImportance::Normal);
    }

    #[tokio::test]
    async fn test_non_item_send_print_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (mut client, queue) = test_client(&dir);
        let (tx, _rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let text = frame(&ServerMessage::PrintJson(PrintJson {
            kind: "Chat".to_string(),
            receiving: 1,
            item: NetworkItem::default(),
        }));
        client.dispatch(&text, &tx).await.unwrap();

        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_connection_refused_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (mut client, _queue) = test_client(&dir);
        let (tx, _rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let text = r#"[{"cmd": "ConnectionRefused", "errors": ["InvalidSlot"]}]"#;
        let err = client.dispatch(text, &tx).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("InvalidSlot"));
    }

    #[tokio::test]
    async fn test_invalid_packet_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (mut client, _queue) = test_client(&dir);
        let (tx, _rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let text = frame(&ServerMessage::InvalidPacket(InvalidPacket {
            text: "unexpected Connect".to_string(),
            original_cmd: Some("Connect".to_string()),
        }));
        let err = client.dispatch(&text, &tx).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_unknown_and_room_update_are_ignored() {
        let dir = TempDir::new().unwrap();
        let (mut client, queue) = test_client(&dir);
        let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let text = r#"[{"cmd": "RoomUpdate"}, {"cmd": "Bounced", "data": {}}]"#;
        client.dispatch(text, &tx).await.unwrap();

        assert!(rx.try_recv().is_err());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_recoverable_error() {
        let dir = TempDir::new().unwrap();
        let (mut client, _queue) = test_client(&dir);
        let (tx, _rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let err = client.dispatch("not json", &tx).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_data_package_persists_to_cache_dir() {
        let dir = TempDir::new().unwrap();
        let (mut client, _queue) = test_client(&dir);
        let (tx, _rx) = mpsc::channel(OUTBOUND_CAPACITY);

        client
            .dispatch(&data_package_frame("GameA", "abc123"), &tx)
            .await
            .unwrap();

        assert!(dir.path().join("GameA.json").is_file());
    }
}
