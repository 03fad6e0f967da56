//! Lifecycle of the single live channel of a session.
//!
//! The manager itself never blocks: `open` spawns a task that dials, pumps
//! outbound frames and reports everything it sees as [`ConnectionEvent`]s.
//! The owner feeds those events back through [`ConnectionManager::apply`],
//! which is the only place the state changes. Every `open` starts a new
//! epoch, and events from older epochs are dropped there, so a channel that
//! is still winding down can never touch the state of its successor.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use shared::{ChatLine, FrameError, InboundFrame, OutboundFrame};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::ConnectionError;

/// How long a closing channel gets to finish its close handshake
const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ConnectionError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ConnectionError>> + Send>>;

/// An established text-frame channel
pub struct FrameChannel {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Dials the live channel for an identity
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, identity: &str) -> Result<FrameChannel, ConnectionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
    /// Failed while connecting; stays here until `open` is called again
    Errored,
}

impl ConnectionState {
    pub fn as_str(&self) -> &str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the channel task observed
#[derive(Debug)]
pub struct ConnectionEvent {
    epoch: u64,
    kind: EventKind,
}

#[derive(Debug)]
enum EventKind {
    Established,
    Failed(ConnectionError),
    Frame(String),
    Closed(Option<ConnectionError>),
}

/// Result of applying an event
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    State {
        state: ConnectionState,
        reason: Option<ConnectionError>,
    },
    Inbound(Result<ChatLine, FrameError>),
}

struct Link {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: ConnectionState,
    identity: Option<String>,
    epoch: u64,
    link: Option<Link>,
    /// Task of the previous channel, still finishing its close
    draining: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create an idle manager and the receiver its events arrive on.
    pub fn new(connector: Arc<dyn Connector>) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            connector,
            events,
            state: ConnectionState::Idle,
            identity: None,
            epoch: 0,
            link: None,
            draining: None,
        };
        (manager, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Start connecting for `identity`.
    ///
    /// Any channel that belongs to another identity (or has failed) is closed
    /// first, and the new channel is only dialed once the old one is gone.
    pub fn open(&mut self, identity: &str) {
        let active = matches!(self.state, ConnectionState::Connecting | ConnectionState::Open);
        if active && self.identity.as_deref() == Some(identity) {
            debug!("Channel for {} already {}", identity, self.state);
            return;
        }

        if let Some(previous) = self.identity.as_deref().filter(|_| self.link.is_some()) {
            info!("Closing channel for {} before opening {}", previous, identity);
        }
        self.retire_link();

        self.epoch += 1;
        self.state = ConnectionState::Connecting;
        self.identity = Some(identity.to_string());

        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_channel(ChannelTask {
            connector: self.connector.clone(),
            identity: identity.to_string(),
            epoch: self.epoch,
            events: self.events.clone(),
            outbound: outbound_rx,
            cancel: cancel.clone(),
            previous: self.draining.take(),
        }));

        info!("Connecting live channel for {} (epoch {})", identity, self.epoch);
        self.link = Some(Link {
            outbound,
            cancel,
            task,
        });
    }

    /// Queue `text` as an outbound frame. Only valid while open.
    pub fn send(&self, text: &str) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Open {
            return Err(ConnectionError::NotConnected);
        }
        let link = self.link.as_ref().ok_or(ConnectionError::NotConnected)?;
        link.outbound
            .send(OutboundFrame::new(text).to_json())
            .map_err(|_| ConnectionError::NotConnected)
    }

    /// Close the channel. Safe from any state, always ends in `Closed`.
    pub fn close(&mut self) {
        self.retire_link();
        if self.state != ConnectionState::Closed {
            info!(
                "Live channel closed ({})",
                self.identity.as_deref().unwrap_or("no identity")
            );
        }
        self.state = ConnectionState::Closed;
        // Anything the retired task still reports belongs to the past.
        self.epoch += 1;
    }

    /// Wait until the last retired channel has fully shut down.
    pub async fn drained(&mut self) {
        if let Some(task) = self.draining.take() {
            drain(task).await;
        }
    }

    /// Apply an event reported by a channel task.
    pub fn apply(&mut self, event: ConnectionEvent) -> Option<Transition> {
        if event.epoch != self.epoch {
            trace!("Ignoring event from epoch {} (current {})", event.epoch, self.epoch);
            return None;
        }

        match (self.state, event.kind) {
            (ConnectionState::Connecting, EventKind::Established) => {
                info!(
                    "Live channel open for {}",
                    self.identity.as_deref().unwrap_or_default()
                );
                self.state = ConnectionState::Open;
                Some(Transition::State {
                    state: ConnectionState::Open,
                    reason: None,
                })
            }
            (ConnectionState::Connecting, EventKind::Failed(err)) => {
                warn!("Live channel failed to connect: {}", err);
                self.retire_link();
                self.state = ConnectionState::Errored;
                Some(Transition::State {
                    state: ConnectionState::Errored,
                    reason: Some(err),
                })
            }
            (ConnectionState::Open, EventKind::Frame(text)) => {
                Some(Transition::Inbound(InboundFrame::decode(&text)))
            }
            (ConnectionState::Open, EventKind::Closed(reason)) => {
                match &reason {
                    Some(err) => warn!("Live channel dropped: {}", err),
                    None => info!("Live channel closed by server"),
                }
                self.retire_link();
                self.state = ConnectionState::Closed;
                Some(Transition::State {
                    state: ConnectionState::Closed,
                    reason,
                })
            }
            (state, kind) => {
                debug!("Ignoring {:?} while {}", kind, state);
                None
            }
        }
    }

    fn retire_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.cancel.cancel();
            self.draining = Some(link.task);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.cancel.cancel();
        }
    }
}

struct ChannelTask {
    connector: Arc<dyn Connector>,
    identity: String,
    epoch: u64,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    previous: Option<JoinHandle<()>>,
}

impl ChannelTask {
    fn emit(&self, kind: EventKind) {
        // The manager may already be gone; nobody is left to tell.
        let _ = self.events.send(ConnectionEvent {
            epoch: self.epoch,
            kind,
        });
    }
}

async fn drain(mut task: JoinHandle<()>) {
    if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
        debug!("Channel task did not stop within {:?}, aborting", CLOSE_GRACE);
        task.abort();
        let _ = task.await;
    }
}

async fn run_channel(mut task: ChannelTask) {
    if let Some(previous) = task.previous.take() {
        drain(previous).await;
    }

    let connected = tokio::select! {
        biased;
        _ = task.cancel.cancelled() => return,
        result = task.connector.connect(&task.identity) => result,
    };

    let FrameChannel {
        mut sink,
        mut stream,
    } = match connected {
        Ok(channel) => channel,
        Err(err) => {
            task.emit(EventKind::Failed(err));
            return;
        }
    };
    task.emit(EventKind::Established);

    let reason = loop {
        tokio::select! {
            biased;
            _ = task.cancel.cancelled() => {
                if tokio::time::timeout(CLOSE_GRACE, sink.close()).await.is_err() {
                    debug!("Close handshake timed out for {}", task.identity);
                }
                return;
            }
            Some(text) = task.outbound.recv() => {
                trace!("→ {}", text);
                if let Err(err) = sink.send(text).await {
                    break Some(err);
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(text)) => {
                    trace!("← {}", text);
                    task.emit(EventKind::Frame(text));
                }
                Some(Err(err)) => break Some(err),
                None => break None,
            },
        }
    };
    task.emit(EventKind::Closed(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;
    use shared::Role;

    async fn next_transition(
        manager: &mut ConnectionManager,
        events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> Transition {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for connection event")
                .expect("event channel closed");
            if let Some(transition) = manager.apply(event) {
                return transition;
            }
        }
    }

    fn state(state: ConnectionState) -> Transition {
        Transition::State {
            state,
            reason: None,
        }
    }

    #[tokio::test]
    async fn open_send_and_receive() {
        let (connector, mut remotes) = MockConnector::new();
        let (mut manager, mut events) = ConnectionManager::new(Arc::new(connector));
        assert_eq!(manager.state(), ConnectionState::Idle);

        manager.open("u1");
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(
            next_transition(&mut manager, &mut events).await,
            state(ConnectionState::Open)
        );

        let mut remote = remotes.recv().await.unwrap();
        assert_eq!(remote.identity, "u1");

        manager.send("hello").unwrap();
        assert_eq!(remote.recv_frame().await.unwrap(), r#"{"message":"hello"}"#);

        remote.push_line(Role::Agent, "hi there");
        assert_eq!(
            next_transition(&mut manager, &mut events).await,
            Transition::Inbound(Ok(ChatLine {
                role: Role::Agent,
                content: "hi there".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn send_outside_open_is_rejected() {
        let (connector, _remotes) = MockConnector::new();
        let (mut manager, _events) = ConnectionManager::new(Arc::new(connector));

        assert_eq!(manager.send("hi"), Err(ConnectionError::NotConnected));

        manager.open("u1");
        assert_eq!(manager.send("hi"), Err(ConnectionError::NotConnected));

        manager.close();
        assert_eq!(manager.send("hi"), Err(ConnectionError::NotConnected));
    }

    #[tokio::test]
    async fn failed_dial_is_errored() {
        let (connector, _remotes) = MockConnector::new();
        connector.refuse("u1");
        let (mut manager, mut events) = ConnectionManager::new(Arc::new(connector));

        manager.open("u1");
        match next_transition(&mut manager, &mut events).await {
            Transition::State { state, reason } => {
                assert_eq!(state, ConnectionState::Errored);
                assert!(matches!(reason, Some(ConnectionError::Connect(_))));
            }
            other => panic!("unexpected transition: {other:?}"),
        }
        assert_eq!(manager.send("hi"), Err(ConnectionError::NotConnected));
    }

    #[tokio::test]
    async fn server_drop_closes() {
        let (connector, mut remotes) = MockConnector::new();
        let (mut manager, mut events) = ConnectionManager::new(Arc::new(connector));

        manager.open("u1");
        next_transition(&mut manager, &mut events).await;
        let remote = remotes.recv().await.unwrap();

        remote.fail("connection reset");
        match next_transition(&mut manager, &mut events).await {
            Transition::State { state, reason } => {
                assert_eq!(state, ConnectionState::Closed);
                assert_eq!(
                    reason,
                    Some(ConnectionError::Transport("connection reset".to_string()))
                );
            }
            other => panic!("unexpected transition: {other:?}"),
        }
        assert!(!manager.is_open());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (connector, mut remotes) = MockConnector::new();
        let (mut manager, mut events) = ConnectionManager::new(Arc::new(connector));

        manager.close();
        assert_eq!(manager.state(), ConnectionState::Closed);

        manager.open("u1");
        next_transition(&mut manager, &mut events).await;
        let _remote = remotes.recv().await.unwrap();

        manager.close();
        manager.close();
        assert_eq!(manager.state(), ConnectionState::Closed);
        manager.drained().await;
    }

    #[tokio::test]
    async fn frames_after_close_are_ignored() {
        let (connector, mut remotes) = MockConnector::new();
        let (mut manager, mut events) = ConnectionManager::new(Arc::new(connector));

        manager.open("u1");
        next_transition(&mut manager, &mut events).await;
        let remote = remotes.recv().await.unwrap();

        remote.push_line(Role::Agent, "late");
        manager.close();
        manager.drained().await;

        while let Ok(event) = events.try_recv() {
            assert!(manager.apply(event).is_none());
        }
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn switching_identity_never_overlaps_channels() {
        let (connector, mut remotes) = MockConnector::new();
        let probe = connector.clone();
        let (mut manager, mut events) = ConnectionManager::new(Arc::new(connector));

        manager.open("u1");
        next_transition(&mut manager, &mut events).await;
        let _first = remotes.recv().await.unwrap();
        assert_eq!(probe.live(), 1);

        manager.open("u2");
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(manager.identity(), Some("u2"));
        assert_eq!(
            next_transition(&mut manager, &mut events).await,
            state(ConnectionState::Open)
        );
        let second = remotes.recv().await.unwrap();
        assert_eq!(second.identity, "u2");

        assert_eq!(probe.live(), 1);
        assert_eq!(probe.max_live(), 1);
        assert_eq!(probe.dials(), vec!["u1".to_string(), "u2".to_string()]);
    }

    #[tokio::test]
    async fn reopening_same_identity_is_noop() {
        let (connector, mut remotes) = MockConnector::new();
        let probe = connector.clone();
        let (mut manager, mut events) = ConnectionManager::new(Arc::new(connector));

        manager.open("u1");
        next_transition(&mut manager, &mut events).await;
        let _remote = remotes.recv().await.unwrap();

        manager.open("u1");
        assert!(manager.is_open());
        assert_eq!(probe.dials().len(), 1);
    }

    #[tokio::test]
    async fn unknown_role_is_reported_not_appended() {
        let (connector, mut remotes) = MockConnector::new();
        let (mut manager, mut events) = ConnectionManager::new(Arc::new(connector));

        manager.open("u1");
        next_transition(&mut manager, &mut events).await;
        let remote = remotes.recv().await.unwrap();

        remote.push_raw(r#"{"role":"narrator","content":"..."}"#);
        assert_eq!(
            next_transition(&mut manager, &mut events).await,
            Transition::Inbound(Err(FrameError::UnknownRole("narrator".to_string())))
        );
        assert!(manager.is_open());
    }
}
