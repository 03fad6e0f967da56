//! Session configuration.

use crate::error::HistoryError;
use crate::reconnect::ReconnectPolicy;

pub const WELCOME_GREETING: &str = "Welcome! How can I help?";
pub const FRESH_CONVERSATION_GREETING: &str = "Of course. What's on your mind now?";
pub const HISTORY_UNAVAILABLE_NOTICE: &str = "I couldn't load our earlier conversation";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Shown when the stored conversation is empty
    pub welcome_greeting: String,
    /// Shown after the user asks to start over
    pub fresh_greeting: String,
    /// Prefix of the notice shown when history could not be loaded
    pub history_unavailable: String,
    pub reconnect: ReconnectPolicy,
}

impl SessionConfig {
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn history_unavailable_message(&self, err: &HistoryError) -> String {
        format!("{} ({}).", self.history_unavailable, err)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            welcome_greeting: WELCOME_GREETING.to_string(),
            fresh_greeting: FRESH_CONVERSATION_GREETING.to_string(),
            history_unavailable: HISTORY_UNAVAILABLE_NOTICE.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}
