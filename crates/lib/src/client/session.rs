//! Protocol client session: one persistent connection to a saged endpoint.
//!
//! `connect()` spawns a task that owns the link. Callbacks (`SessionHandler`) run on that
//! task in frame order. Commands are handed to the task over an unbounded channel, so
//! every send returns immediately.

use crate::client::protocol::{Command, Event, GroupAddress, Level, LightStates, SourceAddress};
use crate::client::transport::{
    CloseInfo, FrameSink, FrameStream, LinkEvent, Transport, WebSocketTransport, CLOSE_NORMAL,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long a closing link waits for the peer's close reply by default.
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection lifecycle. Any close or error returns to `Unconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connecting,
    Connected,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not connected (session is {0:?})")]
    NotConnected(SessionState),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("encoding command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Callbacks for connection lifecycle and bus events. Every method has a logging default,
/// so implementors override only what they use.
pub trait SessionHandler: Send + Sync {
    fn on_connect(&self) {
        log::info!("session: connected");
    }

    fn on_disconnect(&self, close: &CloseInfo) {
        log::info!("session: connection closed ({})", close);
    }

    fn on_lighting_group_on(&self, source: SourceAddress, groups: &[GroupAddress]) {
        log::debug!("lighting group on: source={:?} groups={:?}", source, groups);
    }

    fn on_lighting_group_off(&self, source: SourceAddress, groups: &[GroupAddress]) {
        log::debug!("lighting group off: source={:?} groups={:?}", source, groups);
    }

    fn on_lighting_group_ramp(
        &self,
        source: SourceAddress,
        group: GroupAddress,
        duration: u32,
        level: Level,
    ) {
        log::debug!(
            "lighting group ramp: source={:?} group={} duration={}s level={}",
            source,
            group,
            duration,
            level
        );
    }

    fn on_light_states(&self, states: &LightStates) {
        log::debug!("light states: {:?}", states);
    }
}

/// Handler that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl SessionHandler for LoggingHandler {}

enum Outbound {
    Frame(String),
    Close,
}

struct Slot {
    id: u64,
    state: SessionState,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

struct Inner {
    uri: String,
    transport: Arc<dyn Transport>,
    handler: RwLock<Arc<dyn SessionHandler>>,
    slot: Mutex<Slot>,
    next_id: AtomicU64,
    close_timeout_ms: AtomicU64,
}

/// Client for one saged endpoint. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Session over WebSocket with the logging handler.
    pub fn new(uri: impl Into<String>) -> Self {
        Self::with_transport(uri, Arc::new(WebSocketTransport))
    }

    pub fn with_transport(uri: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                uri: uri.into(),
                transport,
                handler: RwLock::new(Arc::new(LoggingHandler)),
                slot: Mutex::new(Slot {
                    id: 0,
                    state: SessionState::Unconnected,
                    outbound: None,
                }),
                next_id: AtomicU64::new(1),
                close_timeout_ms: AtomicU64::new(DEFAULT_CLOSE_TIMEOUT.as_millis() as u64),
            }),
        }
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn state(&self) -> SessionState {
        self.inner.slot().state
    }

    /// Whether the transport can be used here at all.
    pub fn has_transport(&self) -> bool {
        self.inner.transport.is_available()
    }

    /// Bound on waiting for the peer's close reply (local close) or for the reply to a peer
    /// close to flush. After it elapses the link is dropped and reported as 1006.
    pub fn set_close_timeout(&self, timeout: Duration) {
        self.inner
            .close_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    /// Replace the callbacks. Takes effect for the next delivered callback.
    pub fn set_handler(&self, handler: Arc<dyn SessionHandler>) {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(|e| e.into_inner()) = handler;
    }

    /// Open a new connection, replacing the current one. Returns at once; the outcome is
    /// reported through `on_connect` / `on_disconnect`. The handle completes when the
    /// connection ends. Must be called inside a Tokio runtime.
    pub fn connect(&self) -> JoinHandle<()> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut slot = self.inner.slot();
            if slot.state != SessionState::Unconnected {
                log::debug!(
                    "session: connection {} ({:?}) superseded by {}",
                    slot.id,
                    slot.state,
                    id
                );
            }
            *slot = Slot {
                id,
                state: SessionState::Connecting,
                outbound: Some(tx),
            };
        }
        log::debug!("session: connecting to {} (connection {})", self.inner.uri, id);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_connection(id, rx).await })
    }

    /// Ask the current connection to close. The session is `Unconnected` from here on, so
    /// later sends fail; `on_disconnect` still fires once the link is down.
    pub fn close(&self) {
        let mut slot = self.inner.slot();
        if let Some(tx) = &slot.outbound {
            let _ = tx.send(Outbound::Close);
        }
        slot.state = SessionState::Unconnected;
    }

    /// Decode one inbound frame and dispatch it to the handler. Bad frames and unknown
    /// commands are logged and dropped.
    pub fn handle_message(&self, frame: &str) {
        self.inner.handle_message(frame);
    }

    /// Encode and write one command on the current connection.
    pub fn send(&self, command: &Command) -> Result<(), SessionError> {
        let text = command.encode()?;
        let slot = self.inner.slot();
        match (slot.state, &slot.outbound) {
            (SessionState::Connected, Some(tx)) => {
                log::trace!("session: send {}", text);
                tx.send(Outbound::Frame(text))
                    .map_err(|_| SessionError::ConnectionClosed)
            }
            (state, _) => Err(SessionError::NotConnected(state)),
        }
    }

    pub fn lighting_group_on(&self, groups: &[GroupAddress]) -> Result<(), SessionError> {
        self.send(&Command::LightingGroupOn(groups.to_vec()))
    }

    pub fn lighting_group_off(&self, groups: &[GroupAddress]) -> Result<(), SessionError> {
        self.send(&Command::LightingGroupOff(groups.to_vec()))
    }

    pub fn lighting_group_ramp(
        &self,
        group: GroupAddress,
        duration: u32,
        level: Level,
    ) -> Result<(), SessionError> {
        self.send(&Command::LightingGroupRamp {
            group,
            duration,
            level,
        })
    }

    pub fn lighting_group_terminate_ramp(&self, group: GroupAddress) -> Result<(), SessionError> {
        self.send(&Command::LightingGroupTerminateRamp(group))
    }

    /// Request a snapshot; saged answers with a `light_states` event.
    pub fn get_light_states(&self, groups: &[GroupAddress]) -> Result<(), SessionError> {
        self.send(&Command::GetLightStates(groups.to_vec()))
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handler(&self) -> Arc<dyn SessionHandler> {
        Arc::clone(&self.handler.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms.load(Ordering::Relaxed))
    }

    fn is_current(&self, id: u64) -> bool {
        self.slot().id == id
    }

    /// Move the current connection from `from` to `to`. False when `id` was superseded.
    fn transition(&self, id: u64, from: SessionState, to: SessionState) -> bool {
        let mut slot = self.slot();
        if slot.id != id || slot.state != from {
            return false;
        }
        slot.state = to;
        true
    }

    /// Connection `id` is gone. Only the current connection reports a disconnect.
    fn finish(&self, id: u64, close: CloseInfo) {
        let current = {
            let mut slot = self.slot();
            if slot.id == id {
                slot.state = SessionState::Unconnected;
                slot.outbound = None;
                true
            } else {
                false
            }
        };
        if current {
            self.handler().on_disconnect(&close);
        } else {
            log::debug!("session: superseded connection {} closed ({})", id, close);
        }
    }

    fn handle_message(&self, frame: &str) {
        let event = match Event::decode(frame) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("session: dropping frame: {}", e);
                return;
            }
        };
        let handler = self.handler();
        match event {
            Event::LightingGroupOn { source, groups } => {
                handler.on_lighting_group_on(source, &groups)
            }
            Event::LightingGroupOff { source, groups } => {
                handler.on_lighting_group_off(source, &groups)
            }
            Event::LightingGroupRamp {
                source,
                group,
                duration,
                level,
            } => handler.on_lighting_group_ramp(source, group, duration, level),
            Event::LightStates(states) => handler.on_light_states(&states),
        }
    }

    async fn run_connection(
        self: Arc<Self>,
        id: u64,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
    ) {
        let (mut sink, mut frames) = match self.transport.open(&self.uri).await {
            Ok(link) => link,
            Err(e) => {
                log::warn!("session: connecting to {} failed: {}", self.uri, e);
                self.finish(id, CloseInfo::abnormal());
                return;
            }
        };
        if !self.transition(id, SessionState::Connecting, SessionState::Connected) {
            let _ = tokio::time::timeout(self.close_timeout(), sink.close()).await;
            if self.is_current(id) {
                // close() arrived while the link was opening
                self.finish(id, CloseInfo::new(CLOSE_NORMAL, "closed before open"));
            } else {
                log::debug!("session: connection {} superseded before open", id);
            }
            return;
        }
        log::info!("session: connected to {}", self.uri);
        self.handler().on_connect();

        let close = loop {
            tokio::select! {
                out = outbound.recv() => match out {
                    Some(Outbound::Frame(text)) => {
                        if let Err(e) = sink.send(text).await {
                            log::warn!("session: write failed: {}", e);
                            break CloseInfo::abnormal();
                        }
                    }
                    Some(Outbound::Close) => {
                        break self.close_locally(&mut sink, &mut frames).await;
                    }
                    None => {
                        // slot was handed to a newer connection
                        let _ = sink.close().await;
                        break CloseInfo::abnormal();
                    }
                },
                frame = frames.next() => match frame {
                    Some(Ok(LinkEvent::Text(text))) => self.handle_message(&text),
                    Some(Ok(LinkEvent::Close(close))) => {
                        // flush the queued close reply so the peer sees a clean shutdown
                        let flushed =
                            tokio::time::timeout(self.close_timeout(), sink.close()).await;
                        if flushed.is_err() {
                            log::debug!("session: close reply to {} not flushed", self.uri);
                        }
                        break close;
                    }
                    Some(Err(e)) => {
                        log::warn!("session: read failed: {}", e);
                        break CloseInfo::abnormal();
                    }
                    None => break CloseInfo::abnormal(),
                },
            }
        };
        self.finish(id, close);
    }

    /// Send our close frame, then wait (bounded) for the peer's reply.
    async fn close_locally(&self, sink: &mut FrameSink, frames: &mut FrameStream) -> CloseInfo {
        let timeout = self.close_timeout();
        let closing = async {
            let _ = sink.close().await;
            self.drain(frames).await
        };
        match tokio::time::timeout(timeout, closing).await {
            Ok(close) => close,
            Err(_) => {
                log::warn!(
                    "session: no close reply from {} within {:?}, dropping link",
                    self.uri,
                    timeout
                );
                CloseInfo::abnormal()
            }
        }
    }

    /// After a local close: keep dispatching until the peer acknowledges or goes away.
    async fn drain(&self, frames: &mut FrameStream) -> CloseInfo {
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(LinkEvent::Text(text)) => self.handle_message(&text),
                Ok(LinkEvent::Close(close)) => return close,
                Err(e) => {
                    log::debug!("session: error while closing: {}", e);
                    break;
                }
            }
        }
        CloseInfo::abnormal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::TransportError;
    use async_trait::async_trait;
    use futures_util::{stream, Sink};
    use std::pin::Pin;
    use std::sync::atomic::AtomicBool;
    use std::task::{Context, Poll};

    /// Peer side of one in-memory link.
    struct Peer {
        written: mpsc::UnboundedReceiver<String>,
        inbound: mpsc::UnboundedSender<Result<LinkEvent, TransportError>>,
        /// Set once the session closes its write half.
        closed: Arc<AtomicBool>,
    }

    /// Write half of an in-memory link. Closing it ends the peer's `written` channel.
    struct MemorySink {
        tx: Option<mpsc::UnboundedSender<String>>,
        closed: Arc<AtomicBool>,
    }

    impl Sink<String> for MemorySink {
        type Error = TransportError;

        fn poll_ready(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, text: String) -> Result<(), Self::Error> {
            match &self.tx {
                Some(tx) => tx.send(text).map_err(|_| TransportError::Closed),
                None => Err(TransportError::Closed),
            }
        }

        fn poll_flush(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            self.tx = None;
            self.closed.store(true, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    /// Transport handing out in-memory links; the test holds the peer ends.
    struct MemoryTransport {
        peers: mpsc::UnboundedSender<Peer>,
        refuse: bool,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn open(&self, _uri: &str) -> Result<(FrameSink, FrameStream), TransportError> {
            if self.refuse {
                return Err(TransportError::Closed);
            }
            let (written_tx, written_rx) = mpsc::unbounded_channel::<String>();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let closed = Arc::new(AtomicBool::new(false));
            let sink = MemorySink {
                tx: Some(written_tx),
                closed: Arc::clone(&closed),
            };
            let frames = stream::unfold(inbound_rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed();
            let _ = self.peers.send(Peer {
                written: written_rx,
                inbound: inbound_tx,
                closed,
            });
            Ok((Box::pin(sink), frames))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Connect,
        Disconnect(u16),
        On(SourceAddress, Vec<GroupAddress>),
        Off(SourceAddress, Vec<GroupAddress>),
        Ramp(SourceAddress, GroupAddress, u32, Level),
        States(LightStates),
    }

    struct Recorder(mpsc::UnboundedSender<Call>);

    impl SessionHandler for Recorder {
        fn on_connect(&self) {
            let _ = self.0.send(Call::Connect);
        }
        fn on_disconnect(&self, close: &CloseInfo) {
            let _ = self.0.send(Call::Disconnect(close.code));
        }
        fn on_lighting_group_on(&self, source: SourceAddress, groups: &[GroupAddress]) {
            let _ = self.0.send(Call::On(source, groups.to_vec()));
        }
        fn on_lighting_group_off(&self, source: SourceAddress, groups: &[GroupAddress]) {
            let _ = self.0.send(Call::Off(source, groups.to_vec()));
        }
        fn on_lighting_group_ramp(
            &self,
            source: SourceAddress,
            group: GroupAddress,
            duration: u32,
            level: Level,
        ) {
            let _ = self.0.send(Call::Ramp(source, group, duration, level));
        }
        fn on_light_states(&self, states: &LightStates) {
            let _ = self.0.send(Call::States(states.clone()));
        }
    }

    fn setup(
        refuse: bool,
    ) -> (
        Session,
        mpsc::UnboundedReceiver<Peer>,
        mpsc::UnboundedReceiver<Call>,
    ) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let session = Session::with_transport(
            "ws://saged.test/saged",
            Arc::new(MemoryTransport {
                peers: peers_tx,
                refuse,
            }),
        );
        session.set_handler(Arc::new(Recorder(calls_tx)));
        (session, peers_rx, calls_rx)
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    /// True once the channel is closed and drained.
    async fn next_none<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> bool {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .is_none()
    }

    fn parse(frame: &str) -> serde_json::Value {
        serde_json::from_str(frame).unwrap()
    }

    #[test]
    fn handle_message_dispatches_light_states_once() {
        let (session, _peers, mut calls) = setup(false);
        session.handle_message(r#"{"cmd":"light_states","args":[{"5": 0.5}]}"#);
        let expected: LightStates = [(5, 0.5)].into_iter().collect();
        assert_eq!(calls.try_recv().unwrap(), Call::States(expected));
        assert!(calls.try_recv().is_err());
    }

    #[test]
    fn handle_message_dispatches_each_event_kind() {
        let (session, _peers, mut calls) = setup(false);
        session.handle_message(r#"{"cmd":"lighting_group_on","args":[null,[1,2]]}"#);
        session.handle_message(r#"{"cmd":"lighting_group_off","args":[14,[3]]}"#);
        session.handle_message(r#"{"cmd":"lighting_group_ramp","args":[14,4,2,0.75]}"#);
        assert_eq!(calls.try_recv().unwrap(), Call::On(None, vec![1, 2]));
        assert_eq!(calls.try_recv().unwrap(), Call::Off(Some(14), vec![3]));
        assert_eq!(calls.try_recv().unwrap(), Call::Ramp(Some(14), 4, 2, 0.75));
        assert!(calls.try_recv().is_err());
    }

    #[test]
    fn unknown_and_malformed_frames_are_dropped() {
        let (session, _peers, mut calls) = setup(false);
        session.handle_message(r#"{"cmd":"lighting_group_blink","args":[1]}"#);
        session.handle_message("{\"cmd\":");
        session.handle_message("");
        session.handle_message(r#"{"cmd":"lighting_group_on","args":["x"]}"#);
        assert!(calls.try_recv().is_err());
    }

    #[test]
    fn send_before_connect_is_an_error() {
        let session = Session::new("ws://127.0.0.1:1/saged");
        assert_eq!(session.state(), SessionState::Unconnected);
        let err = session.lighting_group_on(&[1]).unwrap_err();
        assert!(matches!(err, SessionError::NotConnected(SessionState::Unconnected)));
        assert!(session.has_transport());
    }

    #[tokio::test]
    async fn commands_reach_the_open_link() {
        let (session, mut peers, mut calls) = setup(false);
        let _task = session.connect();
        let mut peer = next(&mut peers).await;
        assert_eq!(next(&mut calls).await, Call::Connect);
        assert_eq!(session.state(), SessionState::Connected);

        session.lighting_group_on(&[1, 2]).unwrap();
        session.lighting_group_ramp(3, 0, 0.5).unwrap();
        session.get_light_states(&[3, 4]).unwrap();
        session.lighting_group_terminate_ramp(3).unwrap();

        assert_eq!(
            parse(&next(&mut peer.written).await),
            serde_json::json!({"cmd": "lighting_group_on", "args": [[1, 2]]})
        );
        assert_eq!(
            parse(&next(&mut peer.written).await),
            serde_json::json!({"cmd": "lighting_group_ramp", "args": [3, 0, 0.5]})
        );
        assert_eq!(
            parse(&next(&mut peer.written).await),
            serde_json::json!({"cmd": "get_light_states", "args": [3, 4]})
        );
        assert_eq!(
            parse(&next(&mut peer.written).await),
            serde_json::json!({"cmd": "lighting_group_terminate_ramp", "args": [3]})
        );
    }

    #[tokio::test]
    async fn inbound_frames_are_dispatched_in_order() {
        let (session, mut peers, mut calls) = setup(false);
        let _task = session.connect();
        let peer = next(&mut peers).await;
        assert_eq!(next(&mut calls).await, Call::Connect);

        for frame in [
            r#"{"cmd":"lighting_group_on","args":[null,[7]]}"#,
            "garbage",
            r#"{"cmd":"light_states","args":[{"7":1.0}]}"#,
        ] {
            peer.inbound.send(Ok(LinkEvent::Text(frame.to_string()))).unwrap();
        }
        assert_eq!(next(&mut calls).await, Call::On(None, vec![7]));
        assert_eq!(
            next(&mut calls).await,
            Call::States([(7, 1.0)].into_iter().collect())
        );
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn second_connect_writes_only_to_new_link() {
        let (session, mut peers, mut calls) = setup(false);
        let first_task = session.connect();
        let mut first = next(&mut peers).await;
        assert_eq!(next(&mut calls).await, Call::Connect);

        let _second_task = session.connect();
        let mut second = next(&mut peers).await;
        assert_eq!(next(&mut calls).await, Call::Connect);

        session.lighting_group_off(&[9]).unwrap();
        assert_eq!(
            parse(&next(&mut second.written).await),
            serde_json::json!({"cmd": "lighting_group_off", "args": [[9]]})
        );

        // the superseded task closes its link without reporting a disconnect
        tokio::time::timeout(Duration::from_secs(5), first_task)
            .await
            .expect("first connection task did not finish")
            .unwrap();
        assert!(first.written.recv().await.is_none());
        assert!(calls.try_recv().is_err());
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn peer_close_reports_disconnect_once() {
        let (session, mut peers, mut calls) = setup(false);
        let task = session.connect();
        let peer = next(&mut peers).await;
        assert_eq!(next(&mut calls).await, Call::Connect);

        peer.inbound
            .send(Ok(LinkEvent::Close(CloseInfo::new(1001, "going away"))))
            .unwrap();
        task.await.unwrap();
        // the close reply is flushed, not just dropped with the link
        assert!(peer.closed.load(Ordering::SeqCst));
        assert_eq!(next(&mut calls).await, Call::Disconnect(1001));
        assert!(calls.try_recv().is_err());
        assert_eq!(session.state(), SessionState::Unconnected);
        assert!(matches!(
            session.get_light_states(&[1]),
            Err(SessionError::NotConnected(SessionState::Unconnected))
        ));
    }

    #[tokio::test]
    async fn dropped_link_is_abnormal_close() {
        let (session, mut peers, mut calls) = setup(false);
        let task = session.connect();
        let peer = next(&mut peers).await;
        assert_eq!(next(&mut calls).await, Call::Connect);
        drop(peer);
        task.await.unwrap();
        assert_eq!(next(&mut calls).await, Call::Disconnect(1006));
    }

    #[tokio::test]
    async fn failed_open_reports_disconnect_without_connect() {
        let (session, _peers, mut calls) = setup(true);
        session.connect().await.unwrap();
        assert_eq!(next(&mut calls).await, Call::Disconnect(1006));
        assert!(calls.try_recv().is_err());
        assert_eq!(session.state(), SessionState::Unconnected);
    }

    #[tokio::test]
    async fn local_close_waits_for_peer() {
        let (session, mut peers, mut calls) = setup(false);
        let task = session.connect();
        let mut peer = next(&mut peers).await;
        assert_eq!(next(&mut calls).await, Call::Connect);

        session.close();
        assert_eq!(session.state(), SessionState::Unconnected);
        assert!(matches!(
            session.lighting_group_on(&[1]),
            Err(SessionError::NotConnected(SessionState::Unconnected))
        ));
        assert!(next_none(&mut peer.written).await);
        peer.inbound
            .send(Ok(LinkEvent::Close(CloseInfo::new(1000, ""))))
            .unwrap();
        task.await.unwrap();
        assert_eq!(next(&mut calls).await, Call::Disconnect(1000));
        assert!(calls.try_recv().is_err());
    }

    #[tokio::test]
    async fn local_close_gives_up_on_a_silent_peer() {
        let (session, mut peers, mut calls) = setup(false);
        session.set_close_timeout(Duration::from_millis(50));
        let task = session.connect();
        let peer = next(&mut peers).await;
        assert_eq!(next(&mut calls).await, Call::Connect);

        session.close();
        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .expect("connection task did not finish")
            .unwrap();
        assert!(peer.closed.load(Ordering::SeqCst));
        assert_eq!(next(&mut calls).await, Call::Disconnect(1006));
        assert_eq!(session.state(), SessionState::Unconnected);
    }

    #[tokio::test]
    async fn close_while_connecting_reports_disconnect_only() {
        let (session, mut peers, mut calls) = setup(false);
        let task = session.connect();
        session.close();
        task.await.unwrap();
        let peer = next(&mut peers).await;
        assert!(peer.closed.load(Ordering::SeqCst));
        assert_eq!(next(&mut calls).await, Call::Disconnect(1000));
        assert!(calls.try_recv().is_err());
        assert_eq!(session.state(), SessionState::Unconnected);
    }
}
