//! Error types for chat-session
//!
//! None of these are fatal: the controller turns each of them into a state
//! transition or a synthetic timeline entry.

/// Failure to load conversation history
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server returned status {status}")]
    Server { status: u16 },

    #[error("Failed to parse history: {0}")]
    Parse(String),
}

/// Failure on the live channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Not connected")]
    NotConnected,

    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Reasons `submit` refused to touch the timeline
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Not signed in")]
    AuthAbsent,

    #[error("Conversation is still loading")]
    NotReady,
}

/// Failure reading or writing persisted credentials
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Credential storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential storage is corrupt: {0}")]
    Corrupt(String),
}
