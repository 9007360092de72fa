//! Duplex flavor: one long-lived HTTP `POST` whose request body carries
//! client frames while the response body streams server frames back.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::mpsc;

use rpcmux_core::link::{self, LinkIo};
use rpcmux_core::{Result, RpcError, TransportKind};

use super::Connector;

const BODY_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct DuplexConnector {
    http: reqwest::Client,
    url: String,
}

impl DuplexConnector {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Duplex
    }

    async fn connect(&self) -> Result<LinkIo> {
        let (tx, mut rx) = mpsc::channel::<Bytes>(BODY_QUEUE);
        let outbound = futures_util::stream::poll_fn(move |cx| {
            rx.poll_recv(cx).map(|chunk| chunk.map(Ok::<_, std::io::Error>))
        });

        let resp = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(outbound))
            .send()
            .await
            .map_err(|e| RpcError::transport(format!("{}: {e}", self.url)))?;
        if !resp.status().is_success() {
            return Err(RpcError::transport(format!(
                "{} answered {}",
                self.url,
                resp.status()
            )));
        }
        tracing::debug!(url = %self.url, "duplex stream opened");

        let inbound = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| RpcError::transport(e)));
        Ok(LinkIo {
            sink: link::channel_sink(tx),
            stream: Box::pin(inbound),
        })
    }
}
