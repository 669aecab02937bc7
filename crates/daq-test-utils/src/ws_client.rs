//! Minimal websocket client for driving a Cached Data Server in tests.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WsTestClient {
    ws: WsStream,
}

impl WsTestClient {
    pub async fn connect(url: &str) -> Self {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .expect("connect to server");
        WsTestClient { ws }
    }

    pub async fn send_json(&mut self, value: &Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("send request");
    }

    /// Receive the next text frame and parse it, skipping control frames.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("reply before timeout")
                .expect("connection open")
                .expect("clean frame");
            match frame {
                Message::Text(text) => {
                    return serde_json::from_str(&text).expect("JSON reply");
                }
                Message::Ping(payload) => {
                    let _ = self.ws.send(Message::Pong(payload)).await;
                }
                Message::Close(_) => panic!("server closed the connection"),
                _ => {}
            }
        }
    }

    /// Send a request and return its (JSON) reply.
    pub async fn request(&mut self, value: &Value) -> Value {
        self.send_json(value).await;
        self.recv_json().await
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
