//! One HTTP request per call: the request body carries every frame of the
//! call as lines, and the response body streams the results back.
//!
//! No connection outlives the call, so there is nothing to reconnect and no
//! way for the server to call back into the client.

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rpcmux_core::protocol::{FinalizeOptions, StreamParser};
use rpcmux_core::{
    CorrelationMap, Envelope, ErrorPayload, FrameLimits, Result, RpcError, TransportKind,
    WireFormat,
};

use crate::call::OutboundCall;
use crate::config::ClientConfig;
use crate::transport::{ReplySender, ReplyStream, Transport};

pub struct PlainTransport {
    http: reqwest::Client,
    url: String,
    limits: FrameLimits,
    timeout: std::time::Duration,
    sweep_interval: std::time::Duration,
}

impl PlainTransport {
    pub fn new(http: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            http,
            url: config.endpoint(TransportKind::Plain),
            limits: config.limits,
            timeout: config.timeout(),
            sweep_interval: config.sweep_interval(),
        }
    }
}

struct AbortOnDrop(Vec<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for PlainTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Plain
    }

    async fn start(&self, call: &OutboundCall) -> Result<ReplyStream> {
        let mut body = BytesMut::new();
        for inv in call.invocations() {
            for frame in inv.frames(WireFormat::Lines, &self.limits)? {
                body.extend_from_slice(&frame);
            }
        }

        let resp = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body.freeze())
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

        let (tx, rx) = mpsc::unbounded_channel();
        let waiters: CorrelationMap<String> = CorrelationMap::new(self.timeout);
        for inv in call.invocations() {
            let tx = tx.clone();
            waiters.add(inv.id.clone(), inv.action.clone(), move |id, action: String| {
                let _ = tx.send(Ok(Envelope::error(
                    id,
                    action.clone(),
                    ErrorPayload::timeout(&action),
                )));
            });
        }
        let sweeper = waiters.spawn_sweeper(self.sweep_interval);
        let reader = tokio::spawn(read_replies(resp, waiters, tx, self.limits));
        Ok(ReplyStream::new(rx).with_guard(AbortOnDrop(vec![reader, sweeper])))
    }
}

async fn read_replies(
    resp: reqwest::Response,
    waiters: CorrelationMap<String>,
    tx: ReplySender,
    limits: FrameLimits,
) {
    let mut parser = StreamParser::new(WireFormat::Lines, limits);
    let mut body = resp.bytes_stream();
    let deliver = |envs: Vec<Envelope>| {
        for env in envs {
            let known = if env.is_terminal() {
                waiters.take(&env.id).is_some()
            } else {
                waiters.refresh(&env.id)
            };
            if known {
                let _ = tx.send(Ok(env));
            }
        }
    };

    let outcome = loop {
        match body.next().await {
            Some(Ok(chunk)) => match parser.feed(chunk) {
                Ok(envs) => deliver(envs),
                Err(e) => break Err(e),
            },
            Some(Err(e)) => break Err(RpcError::transport(e)),
            None => {
                let opts = FinalizeOptions {
                    tolerate_missing_attachment: true,
                };
                match parser.finalize(opts) {
                    Ok(envs) => {
                        deliver(envs);
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                }
            }
        }
    };

    let outcome = outcome.and_then(|()| {
        if waiters.is_empty() {
            Ok(())
        } else {
            Err(RpcError::transport("response ended before every action finished"))
        }
    });
    if let Err(e) = outcome {
        tracing::warn!(error = %e, "plain call failed");
        let _ = tx.send(Err(e));
    }
    waiters.drain();
}
