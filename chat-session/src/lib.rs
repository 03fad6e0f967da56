//! Chat session controller
//!
//! Composes an [`AuthStore`], a [`HistorySource`], a [`ConnectionManager`]
//! and a [`Timeline`] into a [`ChatSession`] that a renderer can drive.
//!
//! ```no_run
//! use std::sync::Arc;
//! use chat_session::{AuthStore, ChatSession, HttpHistoryLoader, SessionConfig, WebSocketConnector};
//!
//! # async fn run() {
//! let auth = AuthStore::ephemeral();
//! let mut session = ChatSession::new(
//!     SessionConfig::default(),
//!     auth.clone(),
//!     Arc::new(HttpHistoryLoader::new("http://localhost:8000")),
//!     Arc::new(WebSocketConnector::new("http://localhost:8000")),
//! );
//! while let Some(update) = session.next_update().await {
//!     for message in session.timeline().snapshot() {
//!         println!("{:?}: {}", message.origin, message.text);
//!     }
//!     let _ = update;
//! }
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod history;
pub mod reconnect;
pub mod timeline;
pub mod transport;

#[cfg(test)]
mod testing;

pub use auth::{AuthStore, CredentialStore, MemoryCredentialStore};
pub use config::SessionConfig;
pub use connection::{ConnectionManager, ConnectionState, Connector, FrameChannel};
pub use controller::{ChatSession, SessionPhase, SessionUpdate, SubmitOutcome};
pub use error::{ConnectionError, HistoryError, StoreError, SubmitError};
pub use history::{HistorySource, HttpHistoryLoader};
pub use reconnect::ReconnectPolicy;
pub use timeline::{DeliveryState, Message, MessageDraft, Origin, Timeline};
pub use transport::WebSocketConnector;
