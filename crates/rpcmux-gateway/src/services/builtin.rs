//! Small actions that exercise every output shape: single values, sequences,
//! files, uploads and calls back into the client.

use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use rpcmux_core::{ActionError, ActionOutput};

use crate::dispatch::{ActionRequest, ActionTable};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Countdown {
    from: u32,
    #[serde(default)]
    interval_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Ask {
    function: String,
    #[serde(default)]
    params: Value,
}

pub fn builtin_table() -> ActionTable {
    let mut table = ActionTable::new();
    register_builtin(&mut table);
    table
}

pub fn register_builtin(table: &mut ActionTable) {
    table
        .typed("echo", |v: Value, _| async move { Ok::<_, ActionError>(v) })
        .typed("ping", |_: Value, req: ActionRequest| async move {
            Ok::<_, ActionError>(json!({ "pong": true, "transport": req.ctx.transport }))
        })
        .typed_stream("countdown", |p: Countdown, _| {
            let every = Duration::from_millis(p.interval_ms);
            stream::iter((1..=p.from).rev()).then(move |n| async move {
                if !every.is_zero() {
                    tokio::time::sleep(every).await;
                }
                Ok::<_, ActionError>(n)
            })
        })
        .typed("files.describe", |_: Value, req: ActionRequest| async move {
            let files: Vec<Value> = req
                .files
                .iter()
                .map(|f| json!({ "name": f.name, "type": f.content_type, "size": f.len() }))
                .collect();
            Ok::<_, ActionError>(files)
        })
        .register("files.echo", |req: ActionRequest| async move {
            req.files
                .into_vec()
                .into_iter()
                .next()
                .map(ActionOutput::File)
                .ok_or_else(|| ActionError::new("no file uploaded"))
        })
        .typed("client.ask", |p: Ask, req: ActionRequest| async move {
            req.client.call(&p.function, p.params).await
        });
}
