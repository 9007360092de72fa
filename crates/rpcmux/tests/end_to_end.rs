#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use rpcmux::core::ErrorKind;
use rpcmux::gateway::services::register_builtin;
use rpcmux::{
    ActionError, ActionTable, AppState, Attachment, Call, Client, ClientConfig, Gateway,
    GatewayConfig, TransportKind,
};

#[derive(Debug, Deserialize)]
struct UserQuery {
    id: u64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct User {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostsQuery {
    user_id: u64,
}

fn table() -> ActionTable {
    let mut table = ActionTable::new();
    register_builtin(&mut table);
    table
        .typed("getUser", |q: UserQuery, _| async move {
            Ok::<_, ActionError>(User {
                id: q.id,
                name: format!("user-{}", q.id),
            })
        })
        .typed_stream("getPosts", |q: PostsQuery, _| {
            stream::iter(1..=3u64).then(move |n| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, ActionError>(json!({ "userId": q.user_id, "post": n }))
            })
        });
    table
}

async fn gateway() -> Gateway {
    let state = AppState::with_table(GatewayConfig::default(), table()).unwrap();
    Gateway::start(state, "127.0.0.1:0").await.unwrap()
}

fn client(gw: &Gateway, kinds: &[TransportKind]) -> Client {
    let cfg = ClientConfig::new(gw.base_url())
        .with_transports(kinds.to_vec())
        .with_timeout(Duration::from_secs(5));
    Client::new(cfg).unwrap()
}

fn user_and_posts() -> Call {
    Call::new()
        .action("getUser", json!({ "id": 1 }))
        .action("getPosts", json!({ "userId": 1 }))
}

async fn user_and_posts_scenario(kind: TransportKind) {
    let gw = gateway().await;
    let client = client(&gw, &[kind]);

    let results = client.fetch(user_and_posts()).await.unwrap();

    assert_eq!(client.working_transport(), Some(kind));
    assert_eq!(
        results["getUser"].value(),
        Some(&json!({ "id": 1, "name": "user-1" }))
    );
    let posts: Vec<_> = results["getPosts"]
        .values
        .iter()
        .filter_map(|d| d.as_json())
        .map(|v| v["post"].clone())
        .collect();
    assert_eq!(posts, vec![json!(1), json!(2), json!(3)]);
    assert!(results.values().all(|r| r.is_ok()));

    client.close().await;
}

#[tokio::test]
async fn user_and_posts_over_socket() {
    user_and_posts_scenario(TransportKind::Socket).await;
}

#[tokio::test]
async fn user_and_posts_over_duplex() {
    user_and_posts_scenario(TransportKind::Duplex).await;
}

#[tokio::test]
async fn user_and_posts_over_plain() {
    user_and_posts_scenario(TransportKind::Plain).await;
}

#[tokio::test]
async fn stream_ends_after_every_action_is_terminal() {
    let gw = gateway().await;
    let client = client(&gw, &[TransportKind::Socket]);

    let updates: Vec<_> = client
        .stream(user_and_posts())
        .await
        .unwrap()
        .map(|u| u.unwrap())
        .collect()
        .await;

    let posts: Vec<_> = updates.iter().filter(|u| u.action == "getPosts").collect();
    assert_eq!(posts.len(), 4);
    assert!(posts[..3].iter().all(|u| !u.is_last && u.data.is_some()));
    assert!(posts[3].is_last && posts[3].data.is_none());
    assert_eq!(updates.iter().filter(|u| u.is_last).count(), 2);

    client.close().await;
}

#[tokio::test]
async fn per_action_errors_leave_siblings_alone() {
    let gw = gateway().await;
    let client = client(&gw, &[TransportKind::Socket]);

    let results = client
        .fetch(
            Call::new()
                .action("getUser", json!({ "id": "not a number" }))
                .action("nope", json!({}))
                .action("echo", json!("still here")),
        )
        .await
        .unwrap();

    let invalid = results["getUser"].error.as_ref().unwrap();
    assert_eq!(invalid.code, 400);
    assert_eq!(invalid.kind, ErrorKind::Validation);
    assert_eq!(results["nope"].error.as_ref().unwrap().code, 404);
    assert_eq!(results["echo"].value(), Some(&json!("still here")));

    client.close().await;
}

async fn callback_scenario(kind: TransportKind) {
    let gw = gateway().await;
    let client = client(&gw, &[kind]);

    let call = Call::new()
        .action(
            "client.ask",
            json!({ "function": "confirm", "params": { "q": "delete?" } }),
        )
        .client_action("confirm", |params: Value| async move {
            Ok::<_, ActionError>(json!({ "confirmed": params["q"] == "delete?" }))
        });
    let results = client.fetch(call).await.unwrap();

    assert_eq!(
        results["client.ask"].value(),
        Some(&json!({ "confirmed": true }))
    );

    client.close().await;
}

#[tokio::test]
async fn server_calls_client_function_over_socket() {
    callback_scenario(TransportKind::Socket).await;
}

#[tokio::test]
async fn server_calls_client_function_over_duplex() {
    callback_scenario(TransportKind::Duplex).await;
}

#[tokio::test]
async fn plain_channel_cannot_call_back() {
    let gw = gateway().await;
    let client = client(&gw, &[TransportKind::Plain]);

    let call = Call::new()
        .action("client.ask", json!({ "function": "confirm" }))
        .client_action("confirm", |_: Value| async move { Ok::<_, ActionError>(json!(true)) });
    let results = client.fetch(call).await.unwrap();

    assert_eq!(results["client.ask"].error.as_ref().unwrap().code, 501);
}

#[tokio::test]
async fn files_travel_both_ways() {
    let gw = gateway().await;
    let client = client(&gw, &[TransportKind::Socket]);
    let png = Attachment::new(vec![0x89, b'P', b'N', b'G'])
        .named("avatar")
        .with_content_type("image/png");

    let results = client
        .fetch(
            Call::new()
                .action("files.describe", json!({}))
                .file("files.describe", png.clone()),
        )
        .await
        .unwrap();
    assert_eq!(
        results["files.describe"].value(),
        Some(&json!([{ "name": "avatar", "type": "image/png", "size": 4 }]))
    );

    let results = client
        .fetch(
            Call::new()
                .action("files.echo", json!({}))
                .file("files.echo", png.clone()),
        )
        .await
        .unwrap();
    let echoed = results["files.echo"].file().unwrap();
    assert_eq!(echoed.bytes, png.bytes);
    assert_eq!(echoed.name.as_deref(), Some("avatar"));

    client.close().await;
}

#[tokio::test]
async fn unreachable_channel_downgrades_to_the_next() {
    let gw = gateway().await;
    let mut cfg = ClientConfig::new(gw.base_url())
        .with_transports(vec![TransportKind::Duplex, TransportKind::Socket]);
    cfg.routes.duplex = "/not-here".into();
    let client = Client::new(cfg).unwrap();

    let first = client.fetch(Call::new().action("ping", json!({}))).await.unwrap();
    assert_eq!(first["ping"].value().unwrap()["transport"], json!("socket"));
    assert_eq!(client.working_transport(), Some(TransportKind::Socket));

    let user: User = client.invoke("getUser", &json!({ "id": 7 })).await.unwrap();
    assert_eq!(
        user,
        User {
            id: 7,
            name: "user-7".into()
        }
    );

    client.close().await;
}
