//! The chat session: auth gating, history hydration, live channel and the
//! timeline they all feed.
//!
//! A [`ChatSession`] is bound to one credential for its whole life. It waits
//! for a credential, loads the stored conversation, then opens the live
//! channel. Losing or switching the credential terminates it; the caller
//! builds a new session for the next sign-in.
//!
//! All state changes happen on the caller's task, inside [`ChatSession::next_update`]
//! or the synchronous commands. Background work (the history request and the
//! channel task) only reports back through channels.

use std::collections::VecDeque;
use std::sync::Arc;

use shared::{Credential, FrameError, HistoryEntry};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::AuthStore;
use crate::config::SessionConfig;
use crate::connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, Connector, Transition,
};
use crate::error::{ConnectionError, HistoryError, SubmitError};
use crate::history::{to_drafts, HistorySource};
use crate::reconnect::Backoff;
use crate::timeline::{DeliveryState, MessageDraft, Timeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Hydrating,
    Live,
    Terminated,
}

impl SessionPhase {
    pub fn as_str(&self) -> &str {
        match self {
            SessionPhase::Unauthenticated => "unauthenticated",
            SessionPhase::Hydrating => "hydrating",
            SessionPhase::Live => "live",
            SessionPhase::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the renderer should react to.
///
/// After any update, entries past the last drawn position are available from
/// [`Timeline::after`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Phase(SessionPhase),
    Connection {
        state: ConnectionState,
        reason: Option<ConnectionError>,
    },
    /// New messages were appended
    Timeline,
    /// The timeline was restarted; redraw from scratch
    TimelineReset,
    /// An inbound frame could not be displayed and was dropped
    FrameRejected(FrameError),
}

/// What `submit` did with an accepted message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Appended as confirmed and handed to the live channel
    Sent { position: u64 },
    /// Appended as failed; the channel was not open
    NotSent { position: u64 },
}

impl SubmitOutcome {
    pub fn position(&self) -> u64 {
        match self {
            SubmitOutcome::Sent { position } | SubmitOutcome::NotSent { position } => *position,
        }
    }
}

type HistoryResult = Result<Vec<HistoryEntry>, HistoryError>;

struct PendingHistory {
    result: oneshot::Receiver<HistoryResult>,
    task: JoinHandle<()>,
}

enum Wake {
    Auth,
    History(HistoryResult),
    Connection(ConnectionEvent),
    Reconnect,
}

pub struct ChatSession {
    config: SessionConfig,
    auth: AuthStore,
    auth_rx: watch::Receiver<Option<Credential>>,
    history: Arc<dyn HistorySource>,
    connection: ConnectionManager,
    connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    timeline: Timeline,
    phase: SessionPhase,
    /// Credential this session is bound to, once hydration started
    credential: Option<Credential>,
    pending_history: Option<PendingHistory>,
    queued: VecDeque<SessionUpdate>,
    backoff: Backoff,
    reconnect_at: Option<Instant>,
    opened_at: Option<Instant>,
}

impl ChatSession {
    pub fn new(
        config: SessionConfig,
        auth: AuthStore,
        history: Arc<dyn HistorySource>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (connection, connection_events) = ConnectionManager::new(connector);
        let auth_rx = auth.subscribe();
        let backoff = Backoff::new(config.reconnect.clone());
        Self {
            config,
            auth,
            auth_rx,
            history,
            connection,
            connection_events,
            timeline: Timeline::new(),
            phase: SessionPhase::Unauthenticated,
            credential: None,
            pending_history: None,
            queued: VecDeque::new(),
            backoff,
            reconnect_at: None,
            opened_at: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Identity this session is bound to, if any.
    pub fn identity(&self) -> Option<&str> {
        self.credential.as_ref().map(|c| c.identity())
    }

    /// Wait for the next change worth rendering. Returns `None` once the
    /// session has terminated and every queued update was delivered.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            if let Some(update) = self.queued.pop_front() {
                return Some(update);
            }

            match self.phase {
                SessionPhase::Terminated => return None,
                SessionPhase::Unauthenticated => {
                    let current = self.auth_rx.borrow_and_update().clone();
                    if let Some(credential) = current {
                        self.begin_hydration(credential);
                        return Some(SessionUpdate::Phase(SessionPhase::Hydrating));
                    }
                }
                SessionPhase::Hydrating | SessionPhase::Live => {}
            }

            let wake = tokio::select! {
                // The sender lives in `self.auth`, so this never reports a
                // closed channel.
                _ = self.auth_rx.changed() => Wake::Auth,
                result = recv_history(&mut self.pending_history) => Wake::History(result),
                Some(event) = self.connection_events.recv() => Wake::Connection(event),
                _ = wait_until(self.reconnect_at) => Wake::Reconnect,
            };

            if let Some(update) = self.handle(wake) {
                return Some(update);
            }
        }
    }

    /// Submit a message typed by the user.
    pub fn submit(&mut self, text: &str) -> Result<SubmitOutcome, SubmitError> {
        if text.trim().is_empty() {
            return Err(SubmitError::EmptyMessage);
        }
        if !self.credential_is_current() {
            debug!("Rejecting submit without a bound credential");
            return Err(SubmitError::AuthAbsent);
        }
        // History takes the first positions.
        if self.phase != SessionPhase::Live {
            debug!("Rejecting submit while history is loading");
            return Err(SubmitError::NotReady);
        }

        // Both steps happen before anyone can observe the timeline, so the
        // entry always carries the real outcome.
        let sent = match self.connection.send(text) {
            Ok(()) => true,
            Err(e) => {
                warn!("Message not sent: {}", e);
                false
            }
        };
        let delivery = if sent {
            DeliveryState::Confirmed
        } else {
            DeliveryState::Failed
        };
        let position = self.timeline.append(MessageDraft::local(text, delivery));

        Ok(if sent {
            SubmitOutcome::Sent { position }
        } else {
            SubmitOutcome::NotSent { position }
        })
    }

    /// Clear the displayed conversation down to a single greeting. The live
    /// channel and the server's history are left alone.
    pub fn request_fresh_conversation(&mut self) -> Option<u64> {
        if self.phase == SessionPhase::Terminated {
            return None;
        }
        let greeting = MessageDraft::remote(self.config.fresh_greeting.clone());
        let position = self.timeline.restart(greeting);
        self.queued.push_back(SessionUpdate::TimelineReset);
        info!("Started a fresh conversation");
        Some(position)
    }

    /// Sign out everywhere and terminate this session.
    pub fn logout(&mut self) {
        self.auth.clear();
        self.terminate();
    }

    /// Cancel in-flight history and close the live channel. Idempotent.
    pub fn terminate(&mut self) {
        if self.phase == SessionPhase::Terminated {
            return;
        }
        if let Some(pending) = self.pending_history.take() {
            pending.task.abort();
        }
        self.connection.close();
        self.reconnect_at = None;
        self.phase = SessionPhase::Terminated;
        self.queued.push_back(SessionUpdate::Phase(SessionPhase::Terminated));
        info!(
            "Session for {} terminated",
            self.identity().unwrap_or("nobody")
        );
    }

    /// Terminate and wait until the live channel has fully shut down, so a
    /// successor session can never overlap with it.
    pub async fn shutdown(mut self) {
        self.terminate();
        self.connection.drained().await;
    }

    fn credential_is_current(&self) -> bool {
        match (&self.credential, self.phase) {
            (Some(bound), SessionPhase::Hydrating | SessionPhase::Live) => {
                self.auth_rx.borrow().as_ref() == Some(bound)
            }
            _ => false,
        }
    }

    fn begin_hydration(&mut self, credential: Credential) {
        info!("Loading history for {}", credential.identity());
        self.credential = Some(credential.clone());
        self.phase = SessionPhase::Hydrating;

        let (tx, result) = oneshot::channel();
        let history = self.history.clone();
        let task = tokio::spawn(async move {
            let _ = tx.send(history.load(&credential).await);
        });
        self.pending_history = Some(PendingHistory { result, task });
    }

    fn handle(&mut self, wake: Wake) -> Option<SessionUpdate> {
        match wake {
            Wake::Auth => self.on_auth_change(),
            Wake::History(result) => self.on_history(result),
            Wake::Connection(event) => self.on_connection(event),
            Wake::Reconnect => self.on_reconnect(),
        }
    }

    fn on_auth_change(&mut self) -> Option<SessionUpdate> {
        let current = self.auth_rx.borrow_and_update().clone();
        match self.phase {
            SessionPhase::Unauthenticated => {
                let credential = current?;
                self.begin_hydration(credential);
                Some(SessionUpdate::Phase(SessionPhase::Hydrating))
            }
            SessionPhase::Hydrating | SessionPhase::Live => {
                if current.as_ref() == self.credential.as_ref() {
                    return None;
                }
                match &current {
                    Some(next) => info!("Credential switched to {}", next.identity()),
                    None => info!("Credential cleared"),
                }
                self.terminate();
                self.queued.pop_front()
            }
            SessionPhase::Terminated => None,
        }
    }

    fn on_history(&mut self, result: HistoryResult) -> Option<SessionUpdate> {
        self.pending_history = None;
        if self.phase != SessionPhase::Hydrating {
            return None;
        }
        if !self.credential_is_current() {
            debug!("Discarding history for a credential that is no longer current");
            self.terminate();
            return self.queued.pop_front();
        }

        match result {
            Ok(entries) => {
                let drafts = to_drafts(entries);
                info!("Loaded {} history messages", drafts.len());
                if drafts.is_empty() {
                    self.timeline
                        .append(MessageDraft::remote(self.config.welcome_greeting.clone()));
                }
                for draft in drafts {
                    self.timeline.append(draft);
                }
            }
            Err(e) => {
                warn!("History unavailable: {}", e);
                let notice = self.config.history_unavailable_message(&e);
                self.timeline.append(MessageDraft::remote(notice));
            }
        }

        self.phase = SessionPhase::Live;
        if let Some(identity) = self.identity().map(str::to_string) {
            self.connection.open(&identity);
        }
        Some(SessionUpdate::Phase(SessionPhase::Live))
    }

    fn on_connection(&mut self, event: ConnectionEvent) -> Option<SessionUpdate> {
        match self.connection.apply(event)? {
            Transition::State { state, reason } => {
                match state {
                    ConnectionState::Open => self.opened_at = Some(Instant::now()),
                    ConnectionState::Closed | ConnectionState::Errored => {
                        self.schedule_reconnect()
                    }
                    ConnectionState::Idle | ConnectionState::Connecting => {}
                }
                Some(SessionUpdate::Connection { state, reason })
            }
            Transition::Inbound(Ok(line)) => {
                self.timeline.append(MessageDraft::remote(line.content));
                Some(SessionUpdate::Timeline)
            }
            Transition::Inbound(Err(e)) => {
                warn!("Dropping inbound frame: {}", e);
                Some(SessionUpdate::FrameRejected(e))
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.phase != SessionPhase::Live || !self.backoff.is_enabled() {
            return;
        }
        if let Some(opened_at) = self.opened_at.take() {
            self.backoff.reset_if_stable(opened_at.elapsed());
        }
        match self.backoff.next_delay() {
            Some(delay) => {
                info!(
                    "Reconnecting in {}s (attempt {})",
                    delay.as_secs(),
                    self.backoff.attempts()
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => warn!(
                "Giving up on the live channel after {} attempts",
                self.backoff.attempts()
            ),
        }
    }

    fn on_reconnect(&mut self) -> Option<SessionUpdate> {
        self.reconnect_at = None;
        if self.phase != SessionPhase::Live {
            return None;
        }
        let identity = self.identity()?.to_string();
        self.connection.open(&identity);
        Some(SessionUpdate::Connection {
            state: self.connection.state(),
            reason: None,
        })
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(pending) = self.pending_history.take() {
            pending.task.abort();
        }
        self.connection.close();
    }
}

async fn recv_history(pending: &mut Option<PendingHistory>) -> HistoryResult {
    match pending {
        Some(pending) => match (&mut pending.result).await {
            Ok(result) => result,
            Err(_) => Err(HistoryError::Network("history request was dropped".to_string())),
        },
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
