#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use rpcmux_client::{
    Call, Client, ClientConfig, OutboundCall, ReplyStream, RetryPolicy, Transport,
};
use rpcmux_core::error::ErrorCode;
use rpcmux_core::{Data, Envelope, Result, RpcError, TransportKind};

#[derive(Clone, Copy)]
enum Outcome {
    Refuse,
    BadFrame,
    Answer,
}

/// Transport that follows a script of start outcomes, then answers.
struct Scripted {
    kind: TransportKind,
    script: Mutex<VecDeque<Outcome>>,
    starts: AtomicUsize,
}

impl Scripted {
    fn new(kind: TransportKind, script: &[Outcome]) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(script.iter().copied().collect()),
            starts: AtomicUsize::new(0),
        })
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for Scripted {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn start(&self, call: &OutboundCall) -> Result<ReplyStream> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Answer);
        match next {
            Outcome::Refuse => Err(RpcError::transport(format!("{} refused", self.kind))),
            Outcome::BadFrame => Err(RpcError::framing("attachment too large")),
            Outcome::Answer => {
                let (tx, rx) = mpsc::unbounded_channel();
                for inv in call.invocations() {
                    let data = Data::Json(json!({ "via": self.kind.as_str() }));
                    tx.send(Ok(Envelope::ok(inv.id.clone(), inv.action.clone(), Some(data), true)))
                        .unwrap();
                }
                Ok(ReplyStream::new(rx))
            }
        }
    }
}

fn client(transports: &[&Arc<Scripted>]) -> Client {
    let transports = transports
        .iter()
        .map(|t| -> Arc<dyn Transport> { Arc::<Scripted>::clone(*t) })
        .collect();
    Client::with_transports(ClientConfig::new("http://mock.invalid"), transports)
}

fn ping() -> Call {
    Call::new().action("ping", json!({}))
}

async fn via(client: &Client, call: Call) -> Result<String> {
    let results = client.fetch(call).await?;
    Ok(results["ping"].value().unwrap()["via"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn first_working_transport_is_cached() {
    let duplex = Scripted::new(TransportKind::Duplex, &[Outcome::Refuse]);
    let socket = Scripted::new(TransportKind::Socket, &[]);
    let plain = Scripted::new(TransportKind::Plain, &[]);
    let client = client(&[&duplex, &socket, &plain]);

    assert_eq!(via(&client, ping()).await.unwrap(), "socket");
    assert_eq!(client.working_transport(), Some(TransportKind::Socket));

    assert_eq!(via(&client, ping()).await.unwrap(), "socket");
    assert_eq!(duplex.starts(), 1);
    assert_eq!(socket.starts(), 2);
    assert_eq!(plain.starts(), 0);
}

#[tokio::test]
async fn cached_failure_fails_the_call_and_restarts_the_chain() {
    let duplex = Scripted::new(TransportKind::Duplex, &[Outcome::Refuse, Outcome::Refuse]);
    let socket = Scripted::new(TransportKind::Socket, &[Outcome::Answer, Outcome::Refuse]);
    let plain = Scripted::new(TransportKind::Plain, &[]);
    let client = client(&[&duplex, &socket, &plain]);

    assert_eq!(via(&client, ping()).await.unwrap(), "socket");

    let err = client.fetch(ping()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Transport);
    assert_eq!(client.working_transport(), None);

    // duplex refuses again, socket is healthy again
    assert_eq!(via(&client, ping()).await.unwrap(), "socket");
    assert_eq!(duplex.starts(), 2);
    assert_eq!(socket.starts(), 3);
    assert_eq!(plain.starts(), 0);
}

#[tokio::test]
async fn all_failures_are_aggregated_in_order() {
    let duplex = Scripted::new(TransportKind::Duplex, &[Outcome::Refuse]);
    let socket = Scripted::new(TransportKind::Socket, &[Outcome::Refuse]);
    let plain = Scripted::new(TransportKind::Plain, &[Outcome::Refuse]);
    let client = client(&[&duplex, &socket, &plain]);

    match client.fetch(ping()).await.unwrap_err() {
        RpcError::AllTransportsFailed(failures) => {
            let kinds: Vec<_> = failures.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(kinds, ["duplex", "socket", "plain"]);
            assert!(failures[1].1.contains("socket refused"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(client.working_transport(), None);
}

#[tokio::test]
async fn framing_errors_do_not_fall_through() {
    let duplex = Scripted::new(TransportKind::Duplex, &[Outcome::BadFrame]);
    let socket = Scripted::new(TransportKind::Socket, &[]);
    let client = client(&[&duplex, &socket]);

    let err = client.fetch(ping()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Framing);
    assert_eq!(socket.starts(), 0);
}

#[tokio::test]
async fn retry_policy_restarts_a_failed_start() {
    let socket = Scripted::new(TransportKind::Socket, &[Outcome::Refuse, Outcome::Refuse]);
    let client = client(&[&socket]);

    let policy = RetryPolicy::new(2).with_delays(Duration::from_millis(5), Duration::from_millis(10));
    assert_eq!(via(&client, ping().retry(policy)).await.unwrap(), "socket");
    assert_eq!(socket.starts(), 3);

    let socket = Scripted::new(TransportKind::Socket, &[Outcome::Refuse, Outcome::Refuse]);
    let client = self::client(&[&socket]);
    let err = client.fetch(ping().retry(RetryPolicy::new(1))).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AllTransportsFailed);
    assert_eq!(socket.starts(), 2);
}

#[tokio::test]
async fn invoke_decodes_typed_results() {
    let plain = Scripted::new(TransportKind::Plain, &[]);
    let client = client(&[&plain]);

    let out: serde_json::Value = client.invoke("ping", &json!({ "x": 1 })).await.unwrap();
    assert_eq!(out, json!({ "via": "plain" }));
}
