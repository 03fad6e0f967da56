//! Credential issuance against the chat backend.
//!
//! Everything here ends in a [`Credential`]; storing it and reacting to it is
//! the session core's job.

use reqwest::StatusCode;
use shared::endpoints::{self, ws_to_http};
use shared::protocol::{CALLBACK_IDENTITY_PARAM, CALLBACK_TOKEN_PARAM};
use shared::{ApiClientConfig, Credential, ErrorDetail, RegisterRequest, TokenResponse};
use tracing::{info, warn};

/// Errors from the auth boundary
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Registration rejected: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Login callback rejected: {0}")]
    Callback(String),
}

/// HTTP client for the `/api/auth` endpoints
pub struct AuthClient {
    client: reqwest::Client,
    config: ApiClientConfig,
}

impl AuthClient {
    /// Accepts either the HTTP base URL or the WebSocket one.
    pub fn new(backend_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: ApiClientConfig::new(ws_to_http(backend_url)),
        }
    }

    /// Sign in with a username and password.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Credential, AuthError> {
        let url = self.config.url(endpoints::AUTH_TOKEN);
        info!("Signing in as {} via {}", username, url);

        let response = self
            .client
            .post(&url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidCredentials);
        }

        credential_from_response(response).await
    }

    /// Create an account and sign in to it.
    pub async fn register_account(&self, profile: &RegisterRequest) -> Result<Credential, AuthError> {
        let url = self.config.url(endpoints::AUTH_REGISTER);
        info!(
            "Registering {} account via {}",
            if profile.anonymous { "anonymous" } else { "named" },
            url
        );

        let response = self
            .client
            .post(&url)
            .json(profile)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            let detail = error_detail(response).await;
            return Err(AuthError::Validation(detail));
        }

        credential_from_response(response).await
    }

    /// URL the user must open to start the federated (Google) login.
    ///
    /// The flow leaves this process; it comes back through a callback URL that
    /// [`credential_from_callback`] turns into a credential.
    pub fn begin_federated_login(&self) -> String {
        self.config.url(endpoints::AUTH_GOOGLE_LOGIN)
    }
}

async fn credential_from_response(response: reqwest::Response) -> Result<Credential, AuthError> {
    let status = response.status();
    if !status.is_success() {
        let message = error_detail(response).await;
        return Err(AuthError::Server {
            status: status.as_u16(),
            message,
        });
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::Parse(e.to_string()))?;

    Credential::new(token.user_id, token.access_token)
        .ok_or_else(|| AuthError::Parse("token response is missing user_id or access_token".to_string()))
}

async fn error_detail(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorDetail>(&body) {
        Ok(detail) => detail.detail,
        Err(_) if body.is_empty() => "Unknown error".to_string(),
        Err(_) => body,
    }
}

/// Extract the credential carried by a federated login callback URL.
///
/// The backend redirects to `.../auth/callback?token=...&user_id=...`; both
/// parameters must be present and non-empty.
pub fn credential_from_callback(callback_url: &str) -> Result<Credential, AuthError> {
    let url = url::Url::parse(callback_url).map_err(|e| AuthError::Callback(e.to_string()))?;

    let mut token = None;
    let mut identity = None;
    for (key, value) in url.query_pairs() {
        if key == CALLBACK_TOKEN_PARAM {
            token = Some(value.into_owned());
        } else if key == CALLBACK_IDENTITY_PARAM {
            identity = Some(value.into_owned());
        }
    }

    Credential::from_parts(identity, token).ok_or_else(|| {
        warn!("Login callback is missing token or user_id");
        AuthError::Callback("callback is missing token or user_id".to_string())
    })
}
