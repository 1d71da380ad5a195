use crate::error::{LiveError, Result};
use crate::state::SessionState;
use formflux_live_types::{
    ClientMessage, MediaChunk, Part, ServerEvent, ServerMessage, SessionConfig, ToolResponse,
};
use formflux_live_utils::audio::decode_base64;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

mod config;
mod consts;
mod stats;
mod transport;
mod utils;

pub use config::{Config, ConfigBuilder};
pub use stats::Stats;
pub use transport::{Connector, WebSocketConnector, WsSink, WsStream};

pub type ServerRx = broadcast::Receiver<ServerEvent>;
type ClientTx = mpsc::Sender<Outbound>;

/// A queued outbound message and the channel its send result is reported on.
struct Outbound {
    message: ClientMessage,
    ack: oneshot::Sender<Result<()>>,
}

struct Connection {
    close_tx: oneshot::Sender<()>,
    send_handle: JoinHandle<()>,
    recv_handle: JoinHandle<()>,
}

/// State guarded together so a stale task can never overwrite a newer session.
struct Lifecycle {
    generation: u64,
    state: SessionState,
    c_tx: Option<ClientTx>,
}

struct Shared {
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<SessionState>,
    abort_tx: watch::Sender<u64>,
    s_tx: broadcast::Sender<ServerEvent>,
    stats: Mutex<Stats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn state(&self) -> SessionState {
        lock(&self.lifecycle).state
    }

    fn apply(&self, lifecycle: &mut Lifecycle, state: SessionState) {
        if lifecycle.state != state {
            tracing::debug!("session state {} -> {}", lifecycle.state, state);
        }
        lifecycle.state = state;
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    fn emit(&self, event: ServerEvent) {
        // No subscribers is not an error.
        let _ = self.s_tx.send(event);
    }

    /// Invalidates any in-flight connect attempt.
    fn abort_pending(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.generation += 1;
        self.abort_tx.send_replace(lifecycle.generation);
    }

    fn begin_connect(&self) -> u64 {
        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.generation += 1;
        lifecycle.c_tx = None;
        self.abort_tx.send_replace(lifecycle.generation);
        self.apply(&mut lifecycle, SessionState::Connecting);
        lifecycle.generation
    }

    fn open(&self, generation: u64, c_tx: ClientTx) -> bool {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.generation != generation || lifecycle.state != SessionState::Connecting {
            return false;
        }
        lifecycle.c_tx = Some(c_tx);
        self.apply(&mut lifecycle, SessionState::Open);
        self.emit(ServerEvent::Open);
        true
    }

    fn fail(&self, generation: u64, detail: String) {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.generation != generation
            || !matches!(lifecycle.state, SessionState::Connecting | SessionState::Open)
        {
            return;
        }
        tracing::error!("connection error: {}", detail);
        lifecycle.c_tx = None;
        self.apply(&mut lifecycle, SessionState::Errored);
        self.emit(ServerEvent::Error { detail });
    }

    fn closed_by_peer(&self, generation: u64, reason: Option<String>) {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.generation != generation || !lifecycle.state.is_open() {
            return;
        }
        tracing::info!("connection closed: {:?}", reason);
        lifecycle.c_tx = None;
        self.apply(&mut lifecycle, SessionState::Closed);
        self.emit(ServerEvent::Close { reason });
    }

    /// Stops accepting sends. Returns whether the session was open.
    fn begin_close(&self) -> bool {
        let mut lifecycle = lock(&self.lifecycle);
        let was_open = lifecycle.state.is_open();
        lifecycle.c_tx = None;
        if matches!(lifecycle.state, SessionState::Connecting | SessionState::Open) {
            self.apply(&mut lifecycle, SessionState::Closing);
        }
        was_open
    }

    fn finish_close(&self, reason: &str, was_open: bool) {
        let mut lifecycle = lock(&self.lifecycle);
        self.apply(&mut lifecycle, SessionState::Closed);
        if was_open {
            tracing::info!("connection closed: {}", reason);
            self.emit(ServerEvent::Close {
                reason: Some(reason.to_string()),
            });
        }
    }

    /// Emits an inbound event unless the session it belongs to has ended.
    fn emit_current(&self, generation: u64, event: ServerEvent) -> bool {
        let lifecycle = lock(&self.lifecycle);
        if lifecycle.generation != generation || !lifecycle.state.is_open() {
            return false;
        }
        self.emit(event);
        true
    }

    fn outbound(&self) -> Result<ClientTx> {
        let lifecycle = lock(&self.lifecycle);
        match (&lifecycle.c_tx, lifecycle.state) {
            (Some(c_tx), SessionState::Open) => Ok(c_tx.clone()),
            _ => Err(LiveError::NotConnected),
        }
    }

    fn record_sent(&self, message: &ClientMessage) {
        lock(&self.stats).record_sent(message);
    }
}

/// Client of one live model session at a time.
///
/// All methods take `&self`; share the client behind an `Arc`. Outbound
/// messages go through a single writer task, so concurrent callers never
/// interleave frames, and each send resolves once its frame is flushed.
pub struct Client {
    config: Config,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    session: Mutex<SessionConfig>,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl Client {
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (abort_tx, _) = watch::channel(0);
        let (s_tx, _) = broadcast::channel(config.capacity());
        Self {
            config,
            connector,
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle {
                    generation: 0,
                    state: SessionState::Idle,
                    c_tx: None,
                }),
                state_tx,
                abort_tx,
                s_tx,
                stats: Mutex::new(Stats::new()),
            }),
            session: Mutex::new(SessionConfig::default()),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn server_events(&self) -> ServerRx {
        self.shared.s_tx.subscribe()
    }

    pub fn stats(&self) -> Stats {
        lock(&self.shared.stats).clone()
    }

    pub fn session_config(&self) -> SessionConfig {
        lock(&self.session).clone()
    }

    /// Replaces the config used by the next `reconnect`.
    pub fn set_session_config(&self, config: SessionConfig) -> Result<()> {
        let state = self.state();
        if matches!(state, SessionState::Connecting | SessionState::Open) {
            return Err(LiveError::SessionLocked(state.to_string()));
        }
        *lock(&self.session) = config;
        Ok(())
    }

    /// Opens a session, closing any existing one first.
    ///
    /// Resolves once the transport is open and the setup message is flushed.
    /// A concurrent `disconnect` aborts the attempt with [`LiveError::Aborted`].
    pub async fn connect(&self, session: SessionConfig) -> Result<()> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.take() {
            tracing::info!("closing existing connection before reconnecting");
            let was_open = self.shared.begin_close();
            self.shutdown(connection).await;
            self.shared.finish_close("reconnect", was_open);
        }
        *lock(&self.session) = session.clone();

        let mut abort_rx = self.shared.abort_tx.subscribe();
        let generation = self.shared.begin_connect();
        if *abort_rx.borrow_and_update() != generation {
            return Err(LiveError::Aborted);
        }
        tracing::info!("connecting to {} with {}", self.config.base_url(), session.model());

        let handshake = async {
            let (mut sink, stream) = self.connector.open(&self.config).await?;
            let setup = serde_json::to_string(&ClientMessage::setup(&session))?;
            sink.send(Message::Text(setup)).await?;
            Ok::<_, LiveError>((sink, stream))
        };
        let result = tokio::select! {
            result = tokio::time::timeout(self.config.connect_timeout(), handshake) => result,
            _ = abort_rx.changed() => {
                tracing::info!("connect aborted");
                return Err(LiveError::Aborted);
            }
        };
        let (sink, stream) = match result {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                self.shared.fail(generation, e.to_string());
                return Err(e);
            }
            Err(_) => {
                let e = LiveError::Connection(format!(
                    "timed out after {:?}",
                    self.config.connect_timeout()
                ));
                self.shared.fail(generation, e.to_string());
                return Err(e);
            }
        };

        let (c_tx, c_rx) = mpsc::channel(self.config.capacity());
        let (close_tx, close_rx) = oneshot::channel();
        let send_handle = tokio::spawn(send_loop(
            sink,
            c_rx,
            close_rx,
            self.shared.clone(),
            generation,
            self.config.close_timeout(),
        ));
        if !self.shared.open(generation, c_tx) {
            let _ = close_tx.send(());
            let _ = send_handle.await;
            return Err(LiveError::Aborted);
        }
        let recv_handle = tokio::spawn(recv_loop(stream, self.shared.clone(), generation));
        *slot = Some(Connection {
            close_tx,
            send_handle,
            recv_handle,
        });
        tracing::info!("session open");
        Ok(())
    }

    /// Connects again with the stored session config.
    pub async fn reconnect(&self) -> Result<()> {
        let session = self.session_config();
        self.connect(session).await
    }

    /// Closes the session from any state. Always leaves the state `Closed`.
    pub async fn disconnect(&self) {
        self.shared.abort_pending();
        let mut slot = self.connection.lock().await;
        let was_open = self.shared.begin_close();
        if let Some(connection) = slot.take() {
            self.shutdown(connection).await;
        }
        self.shared.finish_close("client disconnect", was_open);
    }

    async fn shutdown(&self, connection: Connection) {
        let Connection {
            close_tx,
            mut send_handle,
            recv_handle,
        } = connection;
        let _ = close_tx.send(());
        if tokio::time::timeout(self.config.close_timeout(), &mut send_handle)
            .await
            .is_err()
        {
            tracing::warn!("writer did not stop within {:?}", self.config.close_timeout());
            send_handle.abort();
        }
        recv_handle.abort();
        let _ = recv_handle.await;
    }

    async fn send_client_message(&self, message: ClientMessage) -> Result<()> {
        let c_tx = self.shared.outbound()?;
        let (ack, ack_rx) = oneshot::channel();
        c_tx.send(Outbound { message, ack })
            .await
            .map_err(|_| LiveError::NotConnected)?;
        ack_rx.await.map_err(|_| LiveError::NotConnected)?
    }

    /// Sends a user turn.
    pub async fn send(&self, parts: Vec<Part>, turn_complete: bool) -> Result<()> {
        self.send_client_message(ClientMessage::client_content(parts, turn_complete))
            .await
    }

    pub async fn send_realtime_input(&self, media_chunks: Vec<MediaChunk>) -> Result<()> {
        if media_chunks.is_empty() {
            return Ok(());
        }
        self.send_client_message(ClientMessage::realtime_input(media_chunks))
            .await
    }

    pub async fn send_tool_response(&self, responses: Vec<ToolResponse>) -> Result<()> {
        self.send_client_message(ClientMessage::tool_response(responses))
            .await
    }
}

async fn send_loop(
    mut write: WsSink,
    mut c_rx: mpsc::Receiver<Outbound>,
    mut close_rx: oneshot::Receiver<()>,
    shared: Arc<Shared>,
    generation: u64,
    close_timeout: Duration,
) {
    loop {
        let outbound = tokio::select! {
            biased;
            _ = &mut close_rx => break,
            outbound = c_rx.recv() => outbound,
        };
        let Some(Outbound { message, ack }) = outbound else {
            break;
        };
        let result = match serde_json::to_string(&message) {
            Ok(text) => write.send(Message::Text(text)).await.map_err(LiveError::from),
            Err(e) => {
                tracing::error!("failed to serialize {}: {}", message.kind(), e);
                Err(e.into())
            }
        };
        let failed = match &result {
            Ok(()) => {
                shared.record_sent(&message);
                false
            }
            Err(LiveError::Connection(detail)) => {
                shared.fail(generation, detail.clone());
                true
            }
            Err(_) => false,
        };
        let _ = ack.send(result);
        if failed {
            break;
        }
    }

    let closing = async {
        let _ = write.send(Message::Close(None)).await;
        let _ = write.close().await;
    };
    if tokio::time::timeout(close_timeout, closing).await.is_err() {
        tracing::warn!("timed out sending close frame");
    }
}

async fn recv_loop(mut read: WsStream, shared: Arc<Shared>, generation: u64) {
    let mut next_seq = 0u64;
    while let Some(message) = read.next().await {
        let message = match message {
            Err(e) => {
                shared.fail(generation, e.to_string());
                return;
            }
            Ok(message) => message,
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bin) => match String::from_utf8(bin) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("unexpected non-utf8 binary message: {}", e);
                    continue;
                }
            },
            Message::Close(frame) => {
                let reason = frame.map(|f| format!("{:?}: {}", f.code, f.reason));
                shared.closed_by_peer(generation, reason);
                return;
            }
            _ => continue,
        };

        let message = match serde_json::from_str::<ServerMessage>(&text) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("failed to deserialize message: {}, text=> {:?}", e, text);
                continue;
            }
        };
        if let Some(usage) = &message.usage_metadata {
            lock(&shared.stats).update_usage(usage);
            tracing::debug!(
                "total_tokens: {}, input_tokens: {}, output_tokens: {}",
                usage.total_token_count,
                usage.prompt_token_count,
                usage.response_token_count
            );
        }
        for event in message.into_events(&mut next_seq, decode_base64) {
            if let ServerEvent::GoAway { time_left } = &event {
                tracing::warn!("server is going away, time left: {:?}", time_left);
            }
            if !shared.emit_current(generation, event) {
                return;
            }
        }
    }
    shared.closed_by_peer(generation, None);
}

pub async fn connect(session: SessionConfig) -> Result<Client> {
    connect_with_config(Config::new(), session).await
}

pub async fn connect_with_config(config: Config, session: SessionConfig) -> Result<Client> {
    let client = Client::new(config);
    client.connect(session).await?;
    Ok(client)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use formflux_live_types::{Blob, ToolCall};
    use futures::channel::mpsc as fmpsc;
    use tokio_tungstenite::tungstenite::Error as WsError;

    /// Remote end of an in-memory transport.
    pub(crate) struct Peer {
        pub(crate) sent: fmpsc::UnboundedReceiver<Message>,
        pub(crate) inbound: fmpsc::UnboundedSender<std::result::Result<Message, WsError>>,
    }

    impl Peer {
        pub(crate) async fn next_json(&mut self) -> serde_json::Value {
            match self.sent.next().await {
                Some(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
                other => panic!("unexpected frame: {:?}", other),
            }
        }

        pub(crate) fn push(&self, json: serde_json::Value) {
            self.inbound
                .unbounded_send(Ok(Message::Text(json.to_string())))
                .unwrap();
        }
    }

    pub(crate) struct MemoryConnector {
        peers: tokio::sync::mpsc::UnboundedSender<Peer>,
        open_delay: Option<Duration>,
        refuse: bool,
    }

    impl MemoryConnector {
        pub(crate) fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Peer>) {
            let (peers, peers_rx) = tokio::sync::mpsc::unbounded_channel();
            let connector = Self {
                peers,
                open_delay: None,
                refuse: false,
            };
            (connector, peers_rx)
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn open(&self, _config: &Config) -> Result<(WsSink, WsStream)> {
            if let Some(delay) = self.open_delay {
                tokio::time::sleep(delay).await;
            }
            if self.refuse {
                return Err(LiveError::Connection("refused".into()));
            }
            let (out_tx, out_rx) = fmpsc::unbounded();
            let (in_tx, in_rx) = fmpsc::unbounded();
            let _ = self.peers.send(Peer {
                sent: out_rx,
                inbound: in_tx,
            });
            let sink = out_tx.sink_map_err(|e| {
                WsError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
            });
            Ok((Box::pin(sink), Box::pin(in_rx)))
        }
    }

    pub(crate) fn test_config() -> Config {
        Config::builder()
            .with_api_key("test")
            .with_capacity(64)
            .with_connect_timeout(Duration::from_millis(200))
            .with_close_timeout(Duration::from_millis(200))
            .build()
    }

    pub(crate) async fn connected() -> (Arc<Client>, Peer) {
        let (connector, mut peers) = MemoryConnector::new();
        let client = Arc::new(Client::with_connector(test_config(), Arc::new(connector)));
        client.connect(SessionConfig::default()).await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        let setup = peer.next_json().await;
        assert!(setup.get("setup").is_some());
        (client, peer)
    }

    #[tokio::test]
    async fn test_connect_sends_setup_and_opens() {
        let (connector, mut peers) = MemoryConnector::new();
        let client = Client::with_connector(test_config(), Arc::new(connector));
        let mut events = client.server_events();
        assert_eq!(client.state(), SessionState::Idle);

        client.connect(SessionConfig::default()).await.unwrap();

        let mut peer = peers.recv().await.unwrap();
        let setup = peer.next_json().await;
        assert_eq!(
            setup["setup"]["model"],
            formflux_live_types::session::DEFAULT_MODEL
        );
        assert_eq!(client.state(), SessionState::Open);
        assert_eq!(events.recv().await.unwrap(), ServerEvent::Open);
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let (connector, _peers) = MemoryConnector::new();
        let client = Client::with_connector(test_config(), Arc::new(connector));

        let result = client.send(vec![Part::text("hi")], true).await;

        assert!(matches!(result, Err(LiveError::NotConnected)));
    }

    #[tokio::test]
    async fn test_concurrent_sends_are_whole_frames() {
        let (client, mut peer) = connected().await;

        let mut handles = vec![];
        for i in 0..20 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                let chunk = Blob::new("audio/pcm;rate=16000", format!("{:04}", i));
                client.send_realtime_input(vec![chunk]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut seen = vec![];
        for _ in 0..20 {
            let json = peer.next_json().await;
            let data = json["realtimeInput"]["mediaChunks"][0]["data"]
                .as_str()
                .unwrap()
                .to_string();
            seen.push(data);
        }
        seen.sort();
        assert_eq!(seen.len(), 20);
        seen.dedup();
        assert_eq!(seen.len(), 20);
        assert_eq!(client.stats().audio_chunks_sent(), 20);
    }

    #[tokio::test]
    async fn test_inbound_messages_become_events() {
        let (client, peer) = connected().await;
        let mut events = client.server_events();

        peer.push(serde_json::json!({"setupComplete": {}}));
        peer.push(serde_json::json!({
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAAAA=="}}]},
                "turnComplete": true
            },
            "usageMetadata": {"promptTokenCount": 3, "responseTokenCount": 4, "totalTokenCount": 7}
        }));
        peer.push(serde_json::json!({
            "toolCall": {"functionCalls": [{"id": "c1", "name": "count_rep", "args": {}}]}
        }));

        assert_eq!(events.recv().await.unwrap(), ServerEvent::SetupComplete);
        match events.recv().await.unwrap() {
            ServerEvent::Audio(chunk) => {
                assert_eq!(chunk.seq(), 0);
                assert_eq!(chunk.sample_rate(), 24000);
                assert_eq!(chunk.data(), &[0, 0, 0, 0]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(events.recv().await.unwrap(), ServerEvent::TurnComplete);
        match events.recv().await.unwrap() {
            ServerEvent::ToolCall(batch) => {
                assert_eq!(batch.calls(), &[ToolCall::new("c1", "count_rep", serde_json::json!({}))]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(client.stats().total_tokens(), 7);
    }

    #[tokio::test]
    async fn test_peer_close_moves_to_closed() {
        let (client, peer) = connected().await;
        let mut events = client.server_events();
        let mut states = client.state_changes();

        peer.inbound.unbounded_send(Ok(Message::Close(None))).unwrap();

        states.wait_for(|s| *s == SessionState::Closed).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), ServerEvent::Close { reason: None });
        let result = client.send(vec![], true).await;
        assert!(matches!(result, Err(LiveError::NotConnected)));
    }

    #[tokio::test]
    async fn test_transport_error_moves_to_errored_without_retry() {
        let (client, peer) = connected().await;
        let mut events = client.server_events();
        let mut states = client.state_changes();

        peer.inbound
            .unbounded_send(Err(WsError::ConnectionClosed))
            .unwrap();

        states.wait_for(|s| *s == SessionState::Errored).await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), ServerEvent::Error { .. }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.state(), SessionState::Errored);
    }

    #[tokio::test]
    async fn test_refused_connect_is_errored() {
        let (mut connector, _peers) = MemoryConnector::new();
        connector.refuse = true;
        let client = Client::with_connector(test_config(), Arc::new(connector));

        let result = client.connect(SessionConfig::default()).await;

        assert!(matches!(result, Err(LiveError::Connection(_))));
        assert_eq!(client.state(), SessionState::Errored);

        client.disconnect().await;
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let (mut connector, _peers) = MemoryConnector::new();
        connector.open_delay = Some(Duration::from_secs(3600));
        let client = Client::with_connector(test_config(), Arc::new(connector));

        let result = client.connect(SessionConfig::default()).await;

        assert!(matches!(result, Err(LiveError::Connection(_))));
        assert_eq!(client.state(), SessionState::Errored);
    }

    #[tokio::test]
    async fn test_disconnect_aborts_pending_connect() {
        let (mut connector, _peers) = MemoryConnector::new();
        connector.open_delay = Some(Duration::from_secs(60));
        let config = Config::builder()
            .with_connect_timeout(Duration::from_secs(120))
            .build();
        let client = Arc::new(Client::with_connector(config, Arc::new(connector)));
        let mut states = client.state_changes();

        let connecting = tokio::spawn({
            let client = client.clone();
            async move { client.connect(SessionConfig::default()).await }
        });
        states.wait_for(|s| *s == SessionState::Connecting).await.unwrap();
        client.disconnect().await;

        let result = connecting.await.unwrap();
        assert!(matches!(result, Err(LiveError::Aborted)));
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_reconnect_closes_previous_transport() {
        let (connector, mut peers) = MemoryConnector::new();
        let client = Client::with_connector(test_config(), Arc::new(connector));

        client.connect(SessionConfig::default()).await.unwrap();
        let mut first = peers.recv().await.unwrap();
        client.connect(SessionConfig::default()).await.unwrap();
        let _second = peers.recv().await.unwrap();

        assert!(first.next_json().await.get("setup").is_some());
        assert_eq!(first.sent.next().await, Some(Message::Close(None)));
        assert_eq!(first.sent.next().await, None);
        assert_eq!(client.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (client, mut peer) = connected().await;
        let mut events = client.server_events();

        client.disconnect().await;
        client.disconnect().await;

        assert_eq!(client.state(), SessionState::Closed);
        assert_eq!(peer.sent.next().await, Some(Message::Close(None)));
        assert_eq!(
            events.recv().await.unwrap(),
            ServerEvent::Close {
                reason: Some("client disconnect".to_string())
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_from_idle() {
        let (connector, _peers) = MemoryConnector::new();
        let client = Client::with_connector(test_config(), Arc::new(connector));

        client.disconnect().await;

        assert_eq!(client.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_session_config_locked_while_open() {
        let (client, _peer) = connected().await;
        let config = SessionConfig::builder()
            .with_voice(formflux_live_types::Voice::Kore)
            .build();

        let result = client.set_session_config(config.clone());
        assert!(matches!(result, Err(LiveError::SessionLocked(_))));

        client.disconnect().await;
        client.set_session_config(config.clone()).unwrap();
        assert_eq!(client.session_config(), config);
    }
}
