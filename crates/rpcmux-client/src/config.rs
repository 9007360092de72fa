//! Client configuration (strict parsing, same rules as the gateway's YAML).

use std::fs;
use std::time::Duration;

use serde::Deserialize;

use rpcmux_core::error::{Result, RpcError};
use rpcmux_core::{FrameLimits, TransportKind};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// `http://host:port` of the gateway.
    pub base_url: String,

    /// Candidate channels in preference order.
    #[serde(default = "default_transports")]
    pub transports: Vec<TransportKind>,

    #[serde(default)]
    pub routes: RouteConfig,

    /// Per-action reply deadline, pushed out whenever the action makes progress.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub limits: FrameLimits,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            transports: default_transports(),
            routes: RouteConfig::default(),
            timeout_ms: default_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            reconnect: ReconnectConfig::default(),
            limits: FrameLimits::default(),
        }
    }

    pub fn with_transports(mut self, transports: impl Into<Vec<TransportKind>>) -> Self {
        self.transports = transports.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)
            .map_err(|e| RpcError::Config(format!("read config failed ({path}): {e}")))?;
        Self::load_from_str(&s)
    }

    pub fn load_from_str(s: &str) -> Result<Self> {
        let cfg: ClientConfig =
            serde_yaml::from_str(s).map_err(|e| RpcError::Config(format!("invalid yaml: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let base = self.base_url.as_str();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(RpcError::Config(
                "base_url must start with http:// or https://".into(),
            ));
        }
        if self.transports.is_empty() {
            return Err(RpcError::Config("transports must not be empty".into()));
        }
        for (i, kind) in self.transports.iter().enumerate() {
            if self.transports[..i].contains(kind) {
                return Err(RpcError::Config(format!("transport {kind} listed twice")));
            }
        }
        if !(10..=3_600_000).contains(&self.timeout_ms) {
            return Err(RpcError::Config(
                "timeout_ms must be between 10 and 3600000".into(),
            ));
        }
        if !(1..=60_000).contains(&self.sweep_interval_ms) {
            return Err(RpcError::Config(
                "sweep_interval_ms must be between 1 and 60000".into(),
            ));
        }
        self.reconnect.validate()?;
        self.limits.validate()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Endpoint URL for `kind`; the socket URL uses the `ws`/`wss` scheme.
    pub fn endpoint(&self, kind: TransportKind) -> String {
        let base = self.base_url.trim_end_matches('/');
        match kind {
            TransportKind::Socket => {
                let ws = match base.strip_prefix("https://") {
                    Some(rest) => format!("wss://{rest}"),
                    None => format!("ws://{}", base.trim_start_matches("http://")),
                };
                format!("{ws}{}", self.routes.socket)
            }
            TransportKind::Duplex => format!("{base}{}", self.routes.duplex),
            TransportKind::Plain => format!("{base}{}", self.routes.plain),
        }
    }
}

/// Gateway paths; must match the gateway's `routes` section.
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

/// Reconnect backoff: `min(initial * 2^attempts, max)`, at most
/// `max_attempts` tries per outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay_ms == 0 {
            return Err(RpcError::Config(
                "reconnect.initial_delay_ms must be at least 1".into(),
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(RpcError::Config(
                "reconnect.initial_delay_ms must not exceed max_delay_ms".into(),
            ));
        }
        if self.max_attempts > 100 {
            return Err(RpcError::Config(
                "reconnect.max_attempts must be at most 100".into(),
            ));
        }
        Ok(())
    }

    /// Delay before reconnect attempt number `attempts` (0-based).
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let initial = Duration::from_millis(self.initial_delay_ms);
        let max = Duration::from_millis(self.max_delay_ms);
        initial
            .saturating_mul(2u32.saturating_pow(attempts))
            .min(max)
    }
}

fn default_transports() -> Vec<TransportKind> {
    vec![
        TransportKind::Duplex,
        TransportKind::Socket,
        TransportKind::Plain,
    ]
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_sweep_interval_ms() -> u64 {
    250
}
fn default_initial_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_max_attempts() -> u32 {
    5
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

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let r = ReconnectConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            max_attempts: 5,
        };
        assert_eq!(r.delay_for(0), Duration::from_millis(100));
        assert_eq!(r.delay_for(1), Duration::from_millis(200));
        assert_eq!(r.delay_for(3), Duration::from_millis(800));
        assert_eq!(r.delay_for(4), Duration::from_millis(1_000));
        assert_eq!(r.delay_for(40), Duration::from_millis(1_000));
    }

    #[test]
    fn endpoints_follow_routes() {
        let cfg = ClientConfig::new("http://127.0.0.1:8080/");
        assert_eq!(cfg.endpoint(TransportKind::Socket), "ws://127.0.0.1:8080/rpc/ws");
        assert_eq!(cfg.endpoint(TransportKind::Duplex), "http://127.0.0.1:8080/rpc/duplex");
        assert_eq!(cfg.endpoint(TransportKind::Plain), "http://127.0.0.1:8080/rpc");

        let tls = ClientConfig::new("https://example.com");
        assert_eq!(tls.endpoint(TransportKind::Socket), "wss://example.com/rpc/ws");
    }

    #[test]
    fn strict_yaml() {
        let ok = "base_url: http://localhost:8080\ntransports: [socket, plain]\n";
        let cfg = ClientConfig::load_from_str(ok).unwrap();
        assert_eq!(cfg.transports, vec![TransportKind::Socket, TransportKind::Plain]);

        assert!(ClientConfig::load_from_str("base_url: http://x\ntimeout: 5\n").is_err());
        assert!(ClientConfig::load_from_str("base_url: http://x\ntransports: [socket, socket]\n").is_err());
        assert!(ClientConfig::load_from_str("base_url: ftp://x\n").is_err());
    }
}
