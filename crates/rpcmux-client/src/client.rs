//! Public call API.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use rpcmux_core::{Result, RpcError, TokenIdGenerator, TransportKind};

use crate::call::{ActionResult, Call, CallStream};
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, Connector, DuplexConnector, SocketConnector};
use crate::selector::TransportSelector;
use crate::transport::{PersistentTransport, PlainTransport, Transport};

pub struct Client {
    config: ClientConfig,
    selector: TransportSelector,
    ids: TokenIdGenerator,
}

impl Client {
    /// Build every configured transport. Nothing connects until the first call.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RpcError::Config(format!("http client: {e}")))?;

        let transports = config
            .transports
            .iter()
            .map(|&kind| -> Arc<dyn Transport> {
                let persistent = |connector: Arc<dyn Connector>| -> Arc<dyn Transport> {
                    Arc::new(PersistentTransport::new(ConnectionManager::new(
                        connector, &config,
                    )))
                };
                match kind {
                    TransportKind::Socket => {
                        persistent(Arc::new(SocketConnector::new(config.endpoint(kind))))
                    }
                    TransportKind::Duplex => persistent(Arc::new(DuplexConnector::new(
                        http.clone(),
                        config.endpoint(kind),
                    ))),
                    TransportKind::Plain => Arc::new(PlainTransport::new(http.clone(), &config)),
                }
            })
            .collect();
        Ok(Self::with_transports(config, transports))
    }

    /// Use caller-supplied transports, tried in the given order.
    pub fn with_transports(config: ClientConfig, transports: Vec<Arc<dyn Transport>>) -> Self {
        Self {
            config,
            selector: TransportSelector::new(transports),
            ids: TokenIdGenerator::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Channel that carried the last successful call.
    pub fn working_transport(&self) -> Option<TransportKind> {
        self.selector.working_kind()
    }

    /// Start `call` and return every action's updates as they arrive.
    pub async fn stream(&self, call: Call) -> Result<CallStream> {
        let (call, retry) = call.prepare(&self.ids)?;
        let retry = retry.unwrap_or_default();
        let mut attempt = 0;
        loop {
            match self.selector.start(&call).await {
                Ok((kind, replies)) => return Ok(CallStream::new(&call, replies, kind)),
                Err(e) => match retry.delay_for(attempt, &e) {
                    Some(delay) => {
                        tracing::warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "call start failed; retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    /// Run `call` to completion and settle every action.
    pub async fn fetch(&self, call: Call) -> Result<HashMap<String, ActionResult>> {
        let mut stream = self.stream(call).await?;
        let mut results: HashMap<String, ActionResult> = HashMap::new();
        while let Some(update) = stream.next().await {
            let update = update?;
            let slot = results.entry(update.action).or_default();
            if let Some(data) = update.data {
                slot.values.push(data);
            }
            if let Some(err) = update.error {
                slot.error = Some(err);
            }
        }
        Ok(results)
    }

    /// One action with typed parameters and result. A structured error
    /// reply becomes `RpcError::Remote`.
    pub async fn invoke<P, R>(&self, action: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)
            .map_err(|e| RpcError::Internal(format!("encode params for {action}: {e}")))?;
        let mut results = self.fetch(Call::new().action(action, params)).await?;
        let result = results.remove(action).unwrap_or_default();
        if let Some(err) = result.error {
            return Err(RpcError::Remote(err));
        }
        let value = result.value().cloned().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value)
            .map_err(|e| RpcError::Internal(format!("decode result of {action}: {e}")))
    }

    /// Close every transport; pending calls fail with `Closed`.
    pub async fn close(&self) {
        self.selector.close().await;
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.config.base_url)
            .field("candidates", &self.selector.candidates().collect::<Vec<_>>())
            .field("working", &self.selector.working_kind())
            .finish()
    }
}
