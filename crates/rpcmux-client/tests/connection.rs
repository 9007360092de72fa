#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};

use rpcmux_client::{Call, Client, ClientConfig, ConnectionManager, Connector, PersistentTransport};
use rpcmux_core::error::ErrorCode;
use rpcmux_core::link::{self, CloseReason, InboundHandler, LinkHandle, LinkIo, LinkOptions};
use rpcmux_core::{ActionError, Data, Envelope, ErrorPayload, Result, RpcError, TransportKind, WireFormat};

/// In-process "server": every connect spawns a scripted peer link.
struct MockConnector {
    connects: AtomicUsize,
    accept: usize,
    delay: Duration,
    servers: Mutex<Vec<LinkHandle>>,
    attempted_at: Mutex<Vec<Instant>>,
}

impl MockConnector {
    fn new(accept: usize) -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            accept,
            delay: Duration::from_millis(20),
            servers: Mutex::new(Vec::new()),
            attempted_at: Mutex::new(Vec::new()),
        })
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn server(&self, n: usize) -> LinkHandle {
        self.servers.lock().unwrap()[n].clone()
    }

    fn attempted_at(&self, n: usize) -> Instant {
        self.attempted_at.lock().unwrap()[n]
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn connect(&self) -> Result<LinkIo> {
        self.attempted_at.lock().unwrap().push(Instant::now());
        tokio::time::sleep(self.delay).await;
        let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if n > self.accept {
            return Err(RpcError::transport("connection refused"));
        }
        let (client, server) = LinkIo::pair(64);
        let handle = link::spawn(
            server,
            LinkOptions::new(WireFormat::LengthPrefixed),
            Scripted { conn: n },
        );
        self.servers.lock().unwrap().push(handle);
        Ok(client)
    }
}

struct Scripted {
    conn: usize,
}

impl InboundHandler for Scripted {
    fn on_envelope(&mut self, link: &LinkHandle, env: Envelope) {
        tokio::spawn(respond(link.clone(), self.conn, env));
    }

    fn on_closed(&mut self, link: &LinkHandle, _reason: CloseReason) {
        link.close();
    }
}

async fn respond(link: LinkHandle, conn: usize, env: Envelope) {
    // a callback answer settles the invocation that asked
    if let Some(invocation) = env.client_id.clone() {
        let out = match env.error {
            Some(err) => Envelope::error(invocation, "ask", err),
            None => Envelope::ok(invocation, "ask", env.data, true),
        };
        let _ = link.send(&out).await;
        return;
    }

    let id = env.id.clone();
    let action = env.action.clone();
    let params = env.json().cloned().unwrap_or(Value::Null);
    let done = |v: Value| Envelope::ok(id.clone(), action.clone(), Some(Data::Json(v)), true);
    match action.as_str() {
        "echo" => {
            let _ = link.send(&done(params)).await;
        }
        "slow" => {
            tokio::time::sleep(Duration::from_millis(80)).await;
            let _ = link.send(&done(params)).await;
        }
        "count" => {
            for i in 0..3 {
                let update = Envelope::ok(id.clone(), action.clone(), Some(Data::Json(json!(i))), false);
                let _ = link.send(&update).await;
            }
            let _ = link.send(&Envelope::ok(id.clone(), action.clone(), None, true)).await;
        }
        "drop_first" if conn == 1 => link.close(),
        "drop_first" => {
            let _ = link.send(&done(json!({ "conn": conn }))).await;
        }
        "drop" => link.close(),
        "count_then_drop" => {
            for i in 0..2 {
                let update = Envelope::ok(id.clone(), action.clone(), Some(Data::Json(json!(i))), false);
                let _ = link.send(&update).await;
            }
            if conn == 1 {
                link.close();
            } else {
                let _ = link.send(&Envelope::ok(id.clone(), action.clone(), None, true)).await;
            }
        }
        "hang" => {}
        "ask" => {
            let function = params["fn"].as_str().unwrap_or_default().to_string();
            let callback = Envelope::request(format!("cb-{id}"), function, params["args"].clone())
                .with_client_id(id.clone());
            let _ = link.send(&callback).await;
        }
        other => {
            let err = ErrorPayload::generic(404, format!("unknown action {other}"));
            let _ = link.send(&Envelope::error(id.clone(), action.clone(), err)).await;
        }
    }
}

fn config() -> ClientConfig {
    let mut cfg = ClientConfig::new("http://mock.invalid").with_timeout(Duration::from_secs(5));
    cfg.sweep_interval_ms = 20;
    cfg.reconnect.initial_delay_ms = 10;
    cfg.reconnect.max_delay_ms = 40;
    cfg.reconnect.max_attempts = 3;
    cfg
}

fn manager(connector: &Arc<MockConnector>, cfg: &ClientConfig) -> ConnectionManager {
    let connector: Arc<dyn Connector> = connector.clone();
    ConnectionManager::new(connector, cfg)
}

fn client(mgr: &ConnectionManager, cfg: ClientConfig) -> Client {
    Client::with_transports(cfg, vec![Arc::new(PersistentTransport::new(mgr.clone()))])
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

#[tokio::test]
async fn concurrent_callers_share_one_connect() {
    let connector = MockConnector::new(usize::MAX);
    let mgr = manager(&connector, &config());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.connection().await.map(|h| h.id()) })
        })
        .collect();
    let mut ids = HashSet::new();
    for task in tasks {
        ids.insert(task.await.unwrap().expect("connected"));
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(connector.connects(), 1);
    assert!(mgr.is_open());
}

#[tokio::test]
async fn failed_connect_reports_error_without_retrying() {
    let connector = MockConnector::new(0);
    let mgr = manager(&connector, &config());

    assert!(mgr.connection().await.is_none());
    assert!(mgr.last_error().unwrap().contains("refused"));

    settle().await;
    assert_eq!(connector.connects(), 1);
    assert_eq!(mgr.phase(), "disconnected");
}

#[tokio::test]
async fn idle_disconnect_does_not_reconnect() {
    let connector = MockConnector::new(usize::MAX);
    let mgr = manager(&connector, &config());
    mgr.connection().await.unwrap();

    connector.server(0).close();
    settle().await;

    assert_eq!(connector.connects(), 1);
    assert!(!mgr.is_open());
    assert_eq!(mgr.phase(), "disconnected");
}

#[tokio::test]
async fn pending_work_reconnects_and_resets_attempts() {
    let connector = MockConnector::new(usize::MAX);
    let mgr = manager(&connector, &config());
    let first = mgr.connection().await.unwrap();
    mgr.mark_request_pending("outstanding");

    let lost = Instant::now();
    connector.server(0).close();
    settle().await;

    assert_eq!(connector.connects(), 2);
    let backoff = Duration::from_millis(config().reconnect.initial_delay_ms);
    assert!(connector.attempted_at(1) >= lost + backoff);
    assert!(mgr.is_open());
    assert_eq!(mgr.reconnect_attempts(), 0);
    let second = mgr.connection().await.unwrap();
    assert_ne!(first.id(), second.id());

    mgr.mark_request_completed("outstanding");
    assert_eq!(mgr.pending_count(), 0);
}

#[tokio::test]
async fn pending_calls_are_replayed_after_reconnect() {
    let cfg = config();
    let connector = MockConnector::new(usize::MAX);
    let mgr = manager(&connector, &cfg);
    let client = client(&mgr, cfg);

    let results = client
        .fetch(Call::new().action("drop_first", json!({})))
        .await
        .unwrap();

    assert_eq!(results["drop_first"].value(), Some(&json!({ "conn": 2 })));
    assert_eq!(connector.connects(), 2);
    assert_eq!(mgr.reconnect_attempts(), 0);
    assert_eq!(mgr.pending_count(), 0);
}

#[tokio::test]
async fn started_calls_fail_instead_of_running_twice() {
    let cfg = config();
    let connector = MockConnector::new(usize::MAX);
    let mgr = manager(&connector, &cfg);
    let client = client(&mgr, cfg);

    let mut stream = client
        .stream(Call::new().action("count_then_drop", json!({})))
        .await
        .unwrap();
    let mut seen = Vec::new();
    let err = loop {
        match stream.next().await.unwrap() {
            Ok(update) => seen.extend(update.json().cloned()),
            Err(e) => break e,
        }
    };

    assert_eq!(seen, vec![json!(0), json!(1)]);
    assert_eq!(err.code(), ErrorCode::Transport);
    assert!(stream.next().await.is_none());
    assert_eq!(mgr.pending_count(), 0);

    settle().await;
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let mut cfg = config();
    cfg.reconnect.max_attempts = 2;
    let connector = MockConnector::new(1);
    let mgr = manager(&connector, &cfg);
    let client = client(&mgr, cfg);

    let mut stream = client
        .stream(Call::new().action("drop", json!({})))
        .await
        .unwrap();
    let err = stream.next().await.unwrap().unwrap_err();

    assert_eq!(err.code(), ErrorCode::Transport);
    assert!(stream.next().await.is_none());
    assert_eq!(connector.connects(), 3);
    assert_eq!(mgr.pending_count(), 0);
    assert_eq!(mgr.phase(), "disconnected");
}

#[tokio::test]
async fn close_is_final() {
    let cfg = config();
    let connector = MockConnector::new(usize::MAX);
    let mgr = manager(&connector, &cfg);
    let client = client(&mgr, cfg);

    let mut stream = client
        .stream(Call::new().action("hang", json!({})))
        .await
        .unwrap();
    mgr.close();

    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.code(), ErrorCode::Closed);
    assert!(mgr.is_closing());
    assert!(mgr.connection().await.is_none());

    settle().await;
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn results_fan_in_out_of_order() {
    let cfg = config();
    let connector = MockConnector::new(usize::MAX);
    let mgr = manager(&connector, &cfg);
    let client = client(&mgr, cfg);

    let call = Call::new()
        .action("slow", json!({ "n": 1 }))
        .action("echo", json!({ "n": 2 }))
        .action("count", json!({}));
    let updates: Vec<_> = client
        .stream(call)
        .await
        .unwrap()
        .map(|u| u.unwrap())
        .collect()
        .await;

    assert_eq!(updates.len(), 6);
    assert_eq!(updates.iter().filter(|u| u.is_last).count(), 3);
    let pos = |name: &str| updates.iter().position(|u| u.action == name && u.is_last).unwrap();
    assert!(pos("echo") < pos("slow"));

    let counted: Vec<_> = updates
        .iter()
        .filter(|u| u.action == "count")
        .filter_map(|u| u.json().cloned())
        .collect();
    assert_eq!(counted, vec![json!(0), json!(1), json!(2)]);
    assert_eq!(updates.last().map(|u| u.action.as_str()), Some("slow"));
}

#[tokio::test]
async fn timeout_only_fails_the_slow_action() {
    let cfg = config().with_timeout(Duration::from_millis(150));
    let connector = MockConnector::new(usize::MAX);
    let mgr = manager(&connector, &cfg);
    let client = client(&mgr, cfg);

    let results = client
        .fetch(
            Call::new()
                .action("hang", json!({}))
                .action("echo", json!("hi")),
        )
        .await
        .unwrap();

    assert_eq!(results["echo"].value(), Some(&json!("hi")));
    let err = results["hang"].error.as_ref().unwrap();
    assert_eq!(err.code, 408);
    assert!(err.message.contains("hang"));
    assert_eq!(mgr.pending_count(), 0);
}

#[tokio::test]
async fn server_calls_back_into_the_client() {
    let cfg = config();
    let connector = MockConnector::new(usize::MAX);
    let mgr = manager(&connector, &cfg);
    let client = client(&mgr, cfg);

    let call = Call::new()
        .action("ask", json!({ "fn": "confirm", "args": { "q": "sure?" } }))
        .client_action("confirm", |params: Value| async move {
            Ok::<_, ActionError>(json!({ "answer": params["q"] }))
        });
    let results = client.fetch(call).await.unwrap();

    assert_eq!(results["ask"].value(), Some(&json!({ "answer": "sure?" })));
}

#[tokio::test]
async fn missing_client_function_is_a_404_reply() {
    let cfg = config();
    let connector = MockConnector::new(usize::MAX);
    let mgr = manager(&connector, &cfg);
    let client = client(&mgr, cfg);

    let results = client
        .fetch(Call::new().action("ask", json!({ "fn": "nope", "args": null })))
        .await
        .unwrap();

    let err = results["ask"].error.as_ref().unwrap();
    assert_eq!(err.code, 404);
    assert!(err.message.contains("nope"));
    assert!(mgr.is_open());
}
