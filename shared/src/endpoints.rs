//! HTTP and WebSocket endpoint paths exposed by the chat backend.

pub const AUTH_TOKEN: &str = "/api/auth/token";
pub const AUTH_REGISTER: &str = "/api/auth/register";
pub const AUTH_GOOGLE_LOGIN: &str = "/api/auth/google/login";

/// `GET` the stored conversation for a user, oldest first.
pub fn chat_history(identity: &str) -> String {
    format!("/api/chat/history/{}", urlencoding::encode(identity))
}

/// Live channel for a user.
pub fn chat_socket(identity: &str) -> String {
    format!("/api/chat/ws/{}", urlencoding::encode(identity))
}

/// Convert a WebSocket URL to an HTTP URL for API calls.
pub fn ws_to_http(url: &str) -> String {
    url.replace("ws://", "http://")
        .replace("wss://", "https://")
}

/// Convert an HTTP base URL to the matching WebSocket base URL.
pub fn http_to_ws(url: &str) -> String {
    url.replace("http://", "ws://")
        .replace("https://", "wss://")
}
