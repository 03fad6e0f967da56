//! WebSocket transport for the live channel.

use async_trait::async_trait;
use futures_util::{future, SinkExt, StreamExt};
use shared::endpoints;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};

use crate::connection::{Connector, FrameChannel};
use crate::error::ConnectionError;

/// Dials `{ws_base}/api/chat/ws/{identity}`
pub struct WebSocketConnector {
    ws_base: String,
}

impl WebSocketConnector {
    /// Accepts either an `http(s)://` or a `ws(s)://` base URL.
    pub fn new(base_url: &str) -> Self {
        Self {
            ws_base: endpoints::http_to_ws(base_url)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    pub fn url_for(&self, identity: &str) -> String {
        format!("{}{}", self.ws_base, endpoints::chat_socket(identity))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, identity: &str) -> Result<FrameChannel, ConnectionError> {
        let ws_url = self.url_for(identity);
        info!("Connecting to {}", ws_url);

        let (stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;
        let (write, read) = stream.split();

        let sink = write
            .sink_map_err(|e| ConnectionError::Transport(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, ConnectionError>(Message::Text(text))));

        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        debug!("Dropping non-UTF-8 binary frame");
                        None
                    }
                },
                // Ping/pong are answered by tungstenite; a close frame is
                // followed by the end of the stream.
                Ok(_) => None,
                Err(e) => Some(Err(ConnectionError::Transport(e.to_string()))),
            })
        });

        Ok(FrameChannel {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    /// Accept one socket, check its path, and answer every frame with an agent
    /// reply.
    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let check_path = |req: &Request, resp: Response| {
                assert_eq!(req.uri().path(), "/api/chat/ws/u1");
                Ok::<_, ErrorResponse>(resp)
            };
            let mut ws = accept_hdr_async(tcp, check_path).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
                    let reply = serde_json::json!({
                        "role": "agent",
                        "content": format!("echo: {}", frame["message"].as_str().unwrap()),
                    });
                    ws.send(Message::Text(reply.to_string())).await.unwrap();
                }
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn builds_socket_url_from_http_base() {
        let connector = WebSocketConnector::new("https://chat.example.com/");
        assert_eq!(
            connector.url_for("abc"),
            "wss://chat.example.com/api/chat/ws/abc"
        );
    }

    #[tokio::test]
    async fn exchanges_text_frames() {
        let base = echo_server().await;
        let connector = WebSocketConnector::new(&base);

        let FrameChannel {
            mut sink,
            mut stream,
        } = connector.connect("u1").await.unwrap();
        sink.send(r#"{"message":"hello"}"#.to_string()).await.unwrap();

        let reply = stream.next().await.unwrap().unwrap();
        let line = shared::InboundFrame::decode(&reply).unwrap();
        assert_eq!(line.role, shared::Role::Agent);
        assert_eq!(line.content, "echo: hello");
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WebSocketConnector::new(&format!("ws://{}", addr));
        assert!(matches!(
            connector.connect("u1").await,
            Err(ConnectionError::Connect(_))
        ));
    }
}
