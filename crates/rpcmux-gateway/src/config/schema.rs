use std::time::Duration;

use serde::Deserialize;

use rpcmux_core::error::{Result, RpcError};
use rpcmux_core::FrameLimits;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub limits: FrameLimits,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(RpcError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.gateway.validate()?;
        self.limits.validate()?;
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: 1,
            gateway: GatewaySection::default(),
            limits: FrameLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default)]
    pub routes: RouteConfig,

    /// How long a server-initiated client call may wait for its reply.
    #[serde(default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,

    /// How long an uploaded file waits for the invocation that uses it.
    #[serde(default = "default_upload_ttl_ms")]
    pub upload_ttl_ms: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Frames queued per connection before writers wait.
    #[serde(default = "default_write_queue")]
    pub write_queue: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            routes: RouteConfig::default(),
            callback_timeout_ms: default_callback_timeout_ms(),
            upload_ttl_ms: default_upload_ttl_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            write_queue: default_write_queue(),
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=600_000).contains(&self.callback_timeout_ms) {
            return Err(RpcError::Config(
                "gateway.callback_timeout_ms must be between 100 and 600000".into(),
            ));
        }
        if !(100..=600_000).contains(&self.upload_ttl_ms) {
            return Err(RpcError::Config(
                "gateway.upload_ttl_ms must be between 100 and 600000".into(),
            ));
        }
        if !(10..=60_000).contains(&self.sweep_interval_ms) {
            return Err(RpcError::Config(
                "gateway.sweep_interval_ms must be between 10 and 60000".into(),
            ));
        }
        if self.sweep_interval_ms > self.callback_timeout_ms.min(self.upload_ttl_ms) {
            return Err(RpcError::Config(
                "gateway.sweep_interval_ms must not exceed callback_timeout_ms or upload_ttl_ms"
                    .into(),
            ));
        }
        if !(1..=65_536).contains(&self.write_queue) {
            return Err(RpcError::Config(
                "gateway.write_queue must be between 1 and 65536".into(),
            ));
        }
        self.routes.validate()
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    pub fn upload_ttl(&self) -> Duration {
        Duration::from_millis(self.upload_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// HTTP paths of the three physical channels.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    #[serde(default = "default_socket_path")]
    pub socket: String,
    #[serde(default = "default_duplex_path")]
    pub duplex: String,
    #[serde(default = "default_plain_path")]
    pub plain: String,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            socket: default_socket_path(),
            duplex: default_duplex_path(),
            plain: default_plain_path(),
        }
    }
}

impl RouteConfig {
    pub fn validate(&self) -> Result<()> {
        let paths = [
            ("socket", &self.socket),
            ("duplex", &self.duplex),
            ("plain", &self.plain),
        ];
        for (name, p) in paths {
            if !p.starts_with('/') {
                return Err(RpcError::Config(format!(
                    "gateway.routes.{name} must start with '/'"
                )));
            }
        }
        if self.socket == self.duplex || self.socket == self.plain || self.duplex == self.plain {
            return Err(RpcError::Config("gateway.routes must be distinct".into()));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_callback_timeout_ms() -> u64 {
    30_000
}
fn default_upload_ttl_ms() -> u64 {
    30_000
}
fn default_sweep_interval_ms() -> u64 {
    1_000
}
fn default_write_queue() -> usize {
    256
}
fn default_socket_path() -> String {
    "/rpc/ws".into()
}
fn default_duplex_path() -> String {
    "/rpc/duplex".into()
}
fn default_plain_path() -> String {
    "/rpc".into()
}
