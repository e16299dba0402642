//! WebSocket proxy
//!
//! Bridges a browser WebSocket to the same path on the backend.

use std::borrow::Cow;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::http::{header, HeaderMap, HeaderValue};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace};

use marimo_dev_common::ProxyRoute;

type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One client connection's bridge to the backend
pub struct WsProxy {
    upstream_url: String,
    origin: String,
    cookie: Option<HeaderValue>,
    protocols: Option<HeaderValue>,
}

impl WsProxy {
    /// Proxy for a request on `path_and_query` under `route`
    pub fn new(route: &ProxyRoute, path_and_query: &str, headers: &HeaderMap) -> Self {
        Self {
            upstream_url: route.upstream_url(path_and_query),
            origin: route.origin(),
            cookie: headers.get(header::COOKIE).cloned(),
            protocols: headers.get(header::SEC_WEBSOCKET_PROTOCOL).cloned(),
        }
    }

    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    /// Subprotocols requested by the client, offered back on upgrade
    pub fn requested_protocols(&self) -> Vec<String> {
        self.protocols
            .as_ref()
            .and_then(|value| value.to_str().ok())
            .map(|value| {
                value
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Open the upstream socket with the rewritten origin
    async fn connect(&self) -> anyhow::Result<UpstreamStream> {
        let mut request = self.upstream_url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(header::ORIGIN, HeaderValue::from_str(&self.origin)?);
        if let Some(cookie) = &self.cookie {
            headers.insert(header::COOKIE, cookie.clone());
        }
        if let Some(protocols) = &self.protocols {
            headers.insert(header::SEC_WEBSOCKET_PROTOCOL, protocols.clone());
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        Ok(stream)
    }

    /// Bridge the client socket to the backend until either side closes
    pub async fn bridge(self, socket: WebSocket) -> anyhow::Result<()> {
        debug!("Connecting to upstream WebSocket at {}", self.upstream_url);

        let upstream = match self.connect().await {
            Ok(upstream) => upstream,
            Err(e) => {
                error!("Failed to connect to upstream WebSocket {}: {}", self.upstream_url, e);
                let mut socket = socket;
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: 1011,
                        reason: Cow::Borrowed("marimo server unreachable"),
                    })))
                    .await;
                return Err(anyhow::anyhow!("upstream WebSocket connection failed: {}", e));
            }
        };

        debug!("Connected to upstream WebSocket");

        let (upstream_write, upstream_read) = upstream.split();
        let (client_write, client_read) = socket.split();

        let client_to_upstream = Self::forward_client_to_upstream(client_read, upstream_write);
        let upstream_to_client = Self::forward_upstream_to_client(upstream_read, client_write);

        tokio::select! {
            result = client_to_upstream => {
                if let Err(e) = result {
                    debug!("Client->upstream forwarding ended: {}", e);
                }
            }
            result = upstream_to_client => {
                if let Err(e) = result {
                    debug!("Upstream->client forwarding ended: {}", e);
                }
            }
        }

        debug!("WebSocket proxy session for {} ended", self.upstream_url);
        Ok(())
    }

    /// Forward browser frames to the backend
    async fn forward_client_to_upstream(
        mut client_read: futures::stream::SplitStream<WebSocket>,
        mut upstream_write: futures::stream::SplitSink<UpstreamStream, UpstreamMessage>,
    ) -> anyhow::Result<()> {
        while let Some(msg) = client_read.next().await {
            match msg {
                Ok(Message::Close(frame)) => {
                    debug!("WebSocket closed by client");
                    let _ = upstream_write
                        .send(UpstreamMessage::Close(frame.map(to_upstream_close)))
                        .await;
                    break;
                }
                Ok(msg) => {
                    if let Some(forwarded) = to_upstream(msg) {
                        trace!("client->upstream frame");
                        upstream_write.send(forwarded).await?;
                    }
                }
                Err(e) => {
                    error!("Client WebSocket error: {}", e);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Forward backend frames to the browser
    async fn forward_upstream_to_client(
        mut upstream_read: futures::stream::SplitStream<UpstreamStream>,
        mut client_write: futures::stream::SplitSink<WebSocket, Message>,
    ) -> anyhow::Result<()> {
        while let Some(msg) = upstream_read.next().await {
            match msg {
                Ok(UpstreamMessage::Close(frame)) => {
                    debug!("WebSocket closed by upstream");
                    let _ = client_write.send(Message::Close(frame.map(to_client_close))).await;
                    break;
                }
                Ok(msg) => {
                    if let Some(forwarded) = to_client(msg) {
                        trace!("upstream->client frame");
                        if let Err(e) = client_write.send(forwarded).await {
                            error!("Failed to send to client WebSocket: {}", e);
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("Upstream WebSocket error: {}", e);
                    break;
                }
            }
        }

        let _ = client_write.close().await;
        Ok(())
    }
}

fn to_upstream(msg: Message) -> Option<UpstreamMessage> {
    match msg {
        Message::Text(text) => Some(UpstreamMessage::text(text)),
        Message::Binary(data) => Some(UpstreamMessage::binary(data)),
        Message::Ping(data) => Some(UpstreamMessage::Ping(data.into())),
        Message::Pong(data) => Some(UpstreamMessage::Pong(data.into())),
        Message::Close(frame) => Some(UpstreamMessage::Close(frame.map(to_upstream_close))),
    }
}

fn to_client(msg: UpstreamMessage) -> Option<Message> {
    match msg {
        UpstreamMessage::Text(text) => Some(Message::Text(text.as_str().to_owned())),
        UpstreamMessage::Binary(data) => Some(Message::Binary(data.to_vec())),
        UpstreamMessage::Ping(data) => Some(Message::Ping(data.to_vec())),
        UpstreamMessage::Pong(data) => Some(Message::Pong(data.to_vec())),
        UpstreamMessage::Close(frame) => Some(Message::Close(frame.map(to_client_close))),
        UpstreamMessage::Frame(_) => None,
    }
}

fn to_upstream_close(frame: CloseFrame<'static>) -> UpstreamCloseFrame {
    UpstreamCloseFrame {
        code: CloseCode::from(frame.code),
        reason: frame.reason.into_owned().into(),
    }
}

fn to_client_close(frame: UpstreamCloseFrame) -> CloseFrame<'static> {
    CloseFrame {
        code: u16::from(frame.code),
        reason: Cow::Owned(frame.reason.as_str().to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_creation() {
        let route = ProxyRoute::websocket("/ws", "ws://127.0.0.1:2718");
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("token=abc"));
        headers.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("marimo, lsp"),
        );

        let proxy = WsProxy::new(&route, "/ws?session_id=s_1&file=a.py", &headers);
        assert_eq!(proxy.upstream_url(), "ws://127.0.0.1:2718/ws?session_id=s_1&file=a.py");
        assert_eq!(proxy.origin, "http://127.0.0.1:2718");
        assert_eq!(proxy.requested_protocols(), vec!["marimo".to_string(), "lsp".to_string()]);
    }

    #[test]
    fn test_frame_conversion() {
        let text = to_upstream(Message::Text("{\"op\":\"ping\"}".to_string())).unwrap();
        assert!(matches!(text, UpstreamMessage::Text(ref t) if t.as_str() == "{\"op\":\"ping\"}"));

        let back = to_client(UpstreamMessage::binary(vec![1u8, 2, 3])).unwrap();
        assert!(matches!(back, Message::Binary(ref data) if data == &vec![1u8, 2, 3]));

        let close = to_client_close(to_upstream_close(CloseFrame {
            code: 1000,
            reason: Cow::Borrowed("bye"),
        }));
        assert_eq!(close.code, 1000);
        assert_eq!(close.reason, "bye");
    }
}
