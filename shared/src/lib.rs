use serde::{Deserialize, Serialize};
use std::str::FromStr;

// Protocol constants shared between the auth client, the session core and the CLI
pub mod protocol;

// Endpoint paths and URL helpers
pub mod endpoints;

// HTTP API payload types
pub mod api;
pub use api::{ApiClientConfig, ErrorDetail, RegisterRequest, TokenResponse};

/// An authenticated user's identity and access token.
///
/// A credential is either complete or it does not exist: the constructors refuse
/// a pair where either half is missing or blank, so holders of a `Credential`
/// never have to re-check that invariant.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    identity: String,
    token: String,
}

impl Credential {
    /// Build a credential, or `None` when either field is blank.
    pub fn new(identity: impl Into<String>, token: impl Into<String>) -> Option<Self> {
        let identity = identity.into();
        let token = token.into();
        if identity.trim().is_empty() || token.trim().is_empty() {
            return None;
        }
        Some(Self { identity, token })
    }

    /// Rebuild a credential from two independently stored halves.
    pub fn from_parts(identity: Option<String>, token: Option<String>) -> Option<Self> {
        match (identity, token) {
            (Some(identity), Some(token)) => Self::new(identity, token),
            _ => None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("identity", &self.identity)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Who authored a line of conversation, as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    /// The backend persists agent replies as `bot`; both spellings are accepted.
    #[serde(alias = "bot")]
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "agent" | "bot" => Ok(Role::Agent),
            other => Err(FrameError::UnknownRole(other.to_string())),
        }
    }
}

/// One entry of `GET /api/chat/history/{identity}`.
///
/// The role is kept as a raw string so that a single unknown role does not
/// fail the whole batch; use [`HistoryEntry::line`] to validate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: content.into(),
        }
    }

    pub fn line(&self) -> Result<ChatLine, FrameError> {
        Ok(ChatLine {
            role: self.role.parse()?,
            content: self.content.clone(),
        })
    }
}

/// Frame sent from the client over the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub message: String,
}

impl OutboundFrame {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // A struct with a single string field always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Raw frame received from the server over the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    pub role: String,
    pub content: String,
}

impl InboundFrame {
    /// Decode and validate a text frame.
    pub fn decode(text: &str) -> Result<ChatLine, FrameError> {
        let frame: InboundFrame =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
        Ok(ChatLine {
            role: frame.role.parse()?,
            content: frame.content,
        })
    }
}

/// A validated line of conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub role: Role,
    pub content: String,
}

/// Reasons a frame or history entry could not be turned into a [`ChatLine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not JSON, or missing `role` / `content`
    Malformed(String),
    /// Well-formed, but the role is not one we know how to display
    UnknownRole(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Malformed(msg) => write!(f, "Malformed frame: {}", msg),
            FrameError::UnknownRole(role) => write!(f, "Unknown role: {}", role),
        }
    }
}

impl std::error::Error for FrameError {}
