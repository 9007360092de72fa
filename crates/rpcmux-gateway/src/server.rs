//! Listener lifecycle.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rpcmux_core::error::{Result, RpcError};

use crate::app_state::AppState;
use crate::router;

/// A running gateway.
pub struct Gateway {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

impl Gateway {
    /// Bind `listen` and start serving.
    pub async fn start(state: AppState, listen: &str) -> Result<Self> {
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|e| RpcError::Config(format!("bind {listen} failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| RpcError::Internal(format!("local_addr failed: {e}")))?;

        let app = router::build_router(state);
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        tracing::info!(%addr, "rpcmux-gateway listening");
        Ok(Self {
            addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for clients, e.g. `http://127.0.0.1:8080`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections and wait for in-flight HTTP exchanges.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        match self.task.await {
            Ok(res) => res.map_err(|e| RpcError::Internal(format!("server failed: {e}"))),
            Err(e) => Err(RpcError::Internal(format!("server task failed: {e}"))),
        }
    }

    /// Run until the server stops on its own.
    pub async fn wait(self) -> Result<()> {
        match self.task.await {
            Ok(res) => res.map_err(|e| RpcError::Internal(format!("server failed: {e}"))),
            Err(e) => Err(RpcError::Internal(format!("server task failed: {e}"))),
        }
    }
}
