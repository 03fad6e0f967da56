//! HTTP API payload types
//!
//! Shared by the auth client, the history loader and the test fixtures that
//! stand in for the backend.

use serde::{Deserialize, Serialize};

/// Successful response of `/api/auth/token` and `/api/auth/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub user_id: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Error body returned by the backend on 4xx/5xx
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub detail: String,
}

/// Request body for account registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default = "default_anonymous")]
    pub anonymous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_anonymous() -> bool {
    true
}

impl RegisterRequest {
    /// Anonymous account, no username or password
    pub fn anonymous() -> Self {
        Self {
            username: None,
            anonymous: true,
            password: None,
        }
    }

    /// Named account protected by a password
    pub fn named(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            anonymous: false,
            password: Some(password.into()),
        }
    }
}

/// Configuration for creating an API client
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL of the server (e.g., "http://localhost:8000")
    pub base_url: String,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_defaults_token_type() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","user_id":"u1"}"#).unwrap();
        assert_eq!(parsed.token_type, "bearer");
        assert_eq!(parsed.user_id, "u1");
    }

    #[test]
    fn anonymous_registration_omits_secrets() {
        let json = serde_json::to_value(RegisterRequest::anonymous()).unwrap();
        assert_eq!(json, serde_json::json!({"anonymous": true}));
    }

    #[test]
    fn config_url_joins_without_double_slash() {
        let config = ApiClientConfig::new("http://localhost:8000/");
        assert_eq!(config.url("/api/auth/token"), "http://localhost:8000/api/auth/token");
    }
}
