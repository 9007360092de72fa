//! Shared application state.
//!
//! The executor and validator are supplied by the embedding application;
//! [`AppState::with_table`] wires an [`ActionTable`] in as both.

use std::sync::Arc;

use rpcmux_core::error::Result;

use crate::config::GatewayConfig;
use crate::dispatch::{ActionExecutor, ActionTable, Dispatcher, ParamValidator};
use crate::obs::GatewayMetrics;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: GatewayConfig,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<GatewayMetrics>,
}

impl AppState {
    /// Build application state. Startup errors are returned, never panicked.
    pub fn new(
        cfg: GatewayConfig,
        executor: Arc<dyn ActionExecutor>,
        validator: Arc<dyn ParamValidator>,
    ) -> Result<Self> {
        cfg.validate()?;
        let metrics = Arc::new(GatewayMetrics::default());
        let dispatcher = Arc::new(Dispatcher::new(executor, validator, Arc::clone(&metrics)));
        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                dispatcher,
                metrics,
            }),
        })
    }

    pub fn with_table(cfg: GatewayConfig, table: ActionTable) -> Result<Self> {
        let names = table.names().join(",");
        let table = Arc::new(table);
        let state = Self::new(cfg, table.clone(), table)?;
        tracing::info!(actions = %names, "action table registered");
        Ok(state)
    }

    pub fn cfg(&self) -> &GatewayConfig {
        &self.inner.cfg
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.inner.dispatcher)
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.inner.metrics)
    }
}
