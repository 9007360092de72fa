use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde_json::Value;

use rpcmux_core::{ActionOutput, Data, Envelope, ErrorPayload, LinkHandle};

use crate::dispatch::caller::ClientCaller;
use crate::dispatch::executor::{ActionExecutor, ActionRequest, CallContext, Files, ParamValidator};
use crate::obs::GatewayMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Ok,
    Validation,
    Error,
    /// A result did not fit the channel's framing and was replaced by a 500.
    Unencodable,
    /// The link went away before the terminal envelope was written.
    Abandoned,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Validation => "validation",
            Outcome::Error => "error",
            Outcome::Unencodable => "unencodable",
            Outcome::Abandoned => "abandoned",
        }
    }
}

/// Runs one invocation end to end: validate, execute, write every result
/// envelope for its id, finishing with exactly one terminal envelope.
pub struct Dispatcher {
    executor: Arc<dyn ActionExecutor>,
    validator: Arc<dyn ParamValidator>,
    metrics: Arc<GatewayMetrics>,
}

impl Dispatcher {
    pub fn new(
        executor: Arc<dyn ActionExecutor>,
        validator: Arc<dyn ParamValidator>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            executor,
            validator,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub async fn invoke(
        &self,
        link: &LinkHandle,
        env: Envelope,
        ctx: CallContext,
        files: Files,
        client: ClientCaller,
    ) {
        let started = Instant::now();
        let Envelope { id, action, data, .. } = env;
        let params = match data {
            Some(Data::Json(v)) => v,
            _ => Value::Null,
        };

        let outcome = self.run(link, &id, &action, params, ctx, files, client).await;

        self.metrics
            .actions
            .inc(&[("action", action.as_str()), ("outcome", outcome.as_str())]);
        self.metrics
            .action_duration
            .observe(&[("action", action.as_str())], started.elapsed());
        tracing::debug!(%id, %action, outcome = outcome.as_str(), "invocation finished");
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        link: &LinkHandle,
        id: &str,
        action: &str,
        params: Value,
        ctx: CallContext,
        files: Files,
        client: ClientCaller,
    ) -> Outcome {
        if let Some(errors) = self.validator.validate(action, &params) {
            let env = Envelope::error(id, action, ErrorPayload::validation(errors));
            return finish(link, &env, Outcome::Validation).await;
        }

        let req = ActionRequest {
            action: action.to_string(),
            params,
            ctx,
            files,
            client,
        };
        let output = match self.executor.execute(req).await {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(%id, %action, error = %e, "action failed");
                let env = Envelope::error(id, action, e.into_payload());
                return finish(link, &env, Outcome::Error).await;
            }
        };

        match output {
            ActionOutput::Single(v) => {
                let env = Envelope::ok(id, action, Some(v.into()), true);
                finish(link, &env, Outcome::Ok).await
            }
            ActionOutput::File(file) => {
                let env = Envelope::ok(id, action, Some(file.into()), true);
                finish(link, &env, Outcome::Ok).await
            }
            ActionOutput::Sequence(mut items) => {
                while let Some(item) = items.next().await {
                    match item {
                        Ok(v) => {
                            let env = Envelope::ok(id, action, Some(v.into()), false);
                            if let Err(outcome) = write(link, &env).await {
                                return outcome;
                            }
                        }
                        Err(e) => {
                            let env = Envelope::error(id, action, e.into_payload());
                            return finish(link, &env, Outcome::Error).await;
                        }
                    }
                }
                let env = Envelope::ok(id, action, None, true);
                finish(link, &env, Outcome::Ok).await
            }
        }
    }
}

async fn finish(link: &LinkHandle, env: &Envelope, outcome: Outcome) -> Outcome {
    match write(link, env).await {
        Ok(()) => outcome,
        Err(ended) => ended,
    }
}

/// Write one result envelope. `Err` carries the outcome that ended the
/// invocation: a result that cannot be encoded is answered with a 500
/// terminal in its place.
async fn write(link: &LinkHandle, env: &Envelope) -> Result<(), Outcome> {
    let frame = match link.encode(env) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(id = %env.id, action = %env.action, error = %e, "result could not be encoded");
            let fallback = Envelope::error(
                env.id.as_str(),
                env.action.as_str(),
                ErrorPayload::generic(500, "result could not be encoded"),
            );
            return Err(match link.send(&fallback).await {
                Ok(()) => Outcome::Unencodable,
                Err(_) => Outcome::Abandoned,
            });
        }
    };
    link.send_frame(frame).await.map_err(|e| {
        tracing::debug!(id = %env.id, error = %e, "result envelope not delivered");
        Outcome::Abandoned
    })
}
