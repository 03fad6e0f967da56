//! In-memory stand-ins for the network seams, shared by unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use shared::{Credential, HistoryEntry, InboundFrame, Role};
use tokio::sync::{mpsc, Notify};

use crate::connection::{Connector, FrameChannel};
use crate::error::{ConnectionError, HistoryError};
use crate::history::HistorySource;

#[derive(Default)]
struct MockState {
    live: usize,
    max_live: usize,
    dials: Vec<String>,
    refused: HashSet<String>,
}

/// Decrements the live-channel count when the client side goes away.
struct LiveGuard(Arc<Mutex<MockState>>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.live -= 1;
        }
    }
}

/// Server side of a mock channel
pub struct RemoteEnd {
    pub identity: String,
    to_client: mpsc::UnboundedSender<Result<String, ConnectionError>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl RemoteEnd {
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    pub fn push_line(&self, role: Role, content: &str) {
        let frame = InboundFrame {
            role: role.as_str().to_string(),
            content: content.to_string(),
        };
        self.push_raw(&serde_json::to_string(&frame).unwrap());
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.to_client.send(Ok(text.to_string()));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.to_client.send(Err(ConnectionError::Transport(reason.to_string())));
    }

    pub fn pending_frames(&mut self) -> usize {
        let mut count = 0;
        while self.from_client.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}

/// Connector that hands every accepted channel's server side to the test.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    accepted: mpsc::UnboundedSender<RemoteEnd>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (accepted, remotes) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(MockState::default())),
            accepted,
        };
        (connector, remotes)
    }

    /// Make every dial for `identity` fail.
    pub fn refuse(&self, identity: &str) {
        self.state.lock().unwrap().refused.insert(identity.to_string());
    }

    pub fn live(&self) -> usize {
        self.state.lock().unwrap().live
    }

    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    pub fn dials(&self) -> Vec<String> {
        self.state.lock().unwrap().dials.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, identity: &str) -> Result<FrameChannel, ConnectionError> {
        {
            let mut state = self.state.lock().unwrap();
            state.dials.push(identity.to_string());
            if state.refused.contains(identity) {
                return Err(ConnectionError::Connect("connection refused".to_string()));
            }
            state.live += 1;
            state.max_live = state.max_live.max(state.live);
        }

        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel::<String>();
        let guard = LiveGuard(self.state.clone());

        let sink = futures_util::sink::unfold(client_tx, |tx, text: String| async move {
            tx.send(text)
                .map_err(|_| ConnectionError::Transport("peer gone".to_string()))?;
            Ok::<_, ConnectionError>(tx)
        });
        let stream = futures_util::stream::unfold((client_rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|item| (item, (rx, guard)))
        });

        let _ = self.accepted.send(RemoteEnd {
            identity: identity.to_string(),
            to_client,
            from_client,
        });

        Ok(FrameChannel {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// History source returning a fixed result, optionally held until released.
pub struct FakeHistory {
    result: Result<Vec<HistoryEntry>, HistoryError>,
    gate: Option<Arc<Notify>>,
}

impl FakeHistory {
    pub fn entries(entries: Vec<HistoryEntry>) -> Self {
        Self {
            result: Ok(entries),
            gate: None,
        }
    }

    pub fn failing(err: HistoryError) -> Self {
        Self {
            result: Err(err),
            gate: None,
        }
    }

    /// Hold every load until the returned handle is notified.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn load(&self, _credential: &Credential) -> Result<Vec<HistoryEntry>, HistoryError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.result.clone()
    }
}
