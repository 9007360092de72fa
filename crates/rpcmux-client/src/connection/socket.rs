//! WebSocket flavor (tokio-tungstenite).

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use rpcmux_core::link::LinkIo;
use rpcmux_core::{Result, RpcError, TransportKind};

use super::Connector;

#[derive(Debug, Clone)]
pub struct SocketConnector {
    url: String,
}

impl SocketConnector {
    /// `url` uses the `ws://` or `wss://` scheme.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for SocketConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn connect(&self) -> Result<LinkIo> {
        let (ws, _resp) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| RpcError::transport(format!("{}: {e}", self.url)))?;
        tracing::debug!(url = %self.url, "socket connected");

        let (tx, rx) = ws.split();
        let sink = tx
            .sink_map_err(|e| RpcError::transport(e))
            .with(|chunk: Bytes| async move { Ok::<_, RpcError>(Message::Binary(chunk.to_vec())) });

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.next().await? {
                    Ok(Message::Binary(b)) => return Some((Ok(Bytes::from(b)), rx)),
                    Ok(Message::Text(t)) => return Some((Ok(Bytes::from(t)), rx)),
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => continue,
                    Err(e) => return Some((Err(RpcError::transport(e)), rx)),
                }
            }
        });

        Ok(LinkIo::new(sink, stream))
    }
}
