//! External bridge call node.
//!
//! Forwards a shell command, a named reference call, or an inline script
//! to a local bridge process and resolves with the correlated reply.

mod client;

pub use client::{backoff_delay, BridgeClient, BridgeConfig};

use async_trait::async_trait;
use flowcore::{lookup_path, Handler, HandlerContext, HandlerMetadata, Message, NodeError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Envelope sent to the bridge; the reply carries the same `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: String,
    pub settings: Value,
    pub globals: Message,
    pub msg: Message,
}

/// Anything that can deliver a [`BridgeRequest`] and await its reply
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    async fn request(&self, request: BridgeRequest) -> Result<Value, NodeError>;
}

pub struct BridgeNode {
    transport: Arc<dyn BridgeTransport>,
}

impl BridgeNode {
    pub fn new(transport: Arc<dyn BridgeTransport>) -> Self {
        Self { transport }
    }
}

/// Where a setting comes from: the literal under `value_key`, or, when
/// `mode_key` equals `property_mode`, the path under `path_key` resolved
/// against `{ globals, msg }`.
struct Source<'k> {
    value_key: &'k str,
    mode_key: &'k str,
    property_mode: &'k str,
    path_key: &'k str,
}

impl Source<'_> {
    fn resolve<'a>(&self, inputs: &'a Message, scope: &'a Value) -> Option<&'a Value> {
        if inputs.get_str(self.mode_key) == Some(self.property_mode) {
            inputs
                .get_str(self.path_key)
                .and_then(|path| lookup_path(scope, path))
        } else {
            inputs.get(self.value_key)
        }
    }
}

const COMMAND: Source<'static> = Source {
    value_key: "bashFunction",
    mode_key: "bashFunctionMode",
    property_mode: "bash-function-property",
    path_key: "bashFunctionPath",
};

const REFERENCE: Source<'static> = Source {
    value_key: "functionName",
    mode_key: "functionNameMode",
    property_mode: "reference-function-property",
    path_key: "functionNamePath",
};

const REFERENCE_ARGS: Source<'static> = Source {
    value_key: "referenceArgs",
    mode_key: "referenceArgsMode",
    property_mode: "reference-args-property",
    path_key: "argsPath",
};

const JAVASCRIPT: Source<'static> = Source {
    value_key: "javascript",
    mode_key: "javascriptMode",
    property_mode: "javascript-property",
    path_key: "javascriptPath",
};

fn render(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(v) => v.to_string(),
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Build the `settings` part of the envelope, or the error description
/// to report on the message.
pub fn build_settings(inputs: &Message, scope: &Value) -> Result<Value, String> {
    match inputs.get_str("callMode") {
        Some("call-bash") => {
            let command = COMMAND.resolve(inputs, scope);
            if is_blank(command) {
                return Err(format!("invalid bashFunction, command is {}", render(command)));
            }
            Ok(json!({ "callMode": "call-bash", "command": command }))
        }
        Some("call-reference") => {
            let reference = REFERENCE.resolve(inputs, scope);
            if is_blank(reference) {
                return Err(format!("invalid functionName, reference is {}", render(reference)));
            }
            let mut settings = json!({ "callMode": "call-reference", "reference": reference });
            if let Some(args) = REFERENCE_ARGS.resolve(inputs, scope) {
                let args = match args {
                    Value::Object(_) | Value::Array(_) | Value::Null => Value::String(args.to_string()),
                    other => other.clone(),
                };
                settings["args"] = args;
            }
            Ok(settings)
        }
        Some("call-javascript") => {
            let javascript = JAVASCRIPT.resolve(inputs, scope);
            if matches!(javascript, None | Some(Value::Null)) {
                return Err(format!("invalid javascript, javascript is\n{}", render(javascript)));
            }
            Ok(json!({ "callMode": "call-javascript", "javascript": javascript }))
        }
        _ => Err("invalid callMode".to_string()),
    }
}

#[async_trait]
impl Handler for BridgeNode {
    fn node_type(&self) -> &str {
        "localhost"
    }

    async fn call(&self, ctx: HandlerContext) -> Result<Message, NodeError> {
        let scope = ctx.scope();
        let settings = match build_settings(&ctx.inputs, &scope) {
            Ok(settings) => settings,
            Err(description) => {
                ctx.events.warn(description.clone());
                return Ok(ctx.msg.with_error(description));
            }
        };

        let request = BridgeRequest {
            id: Uuid::new_v4().to_string(),
            settings,
            globals: ctx.globals.as_ref().clone(),
            msg: ctx.msg.clone(),
        };
        tracing::debug!(node_id = %ctx.node_id, id = %request.id, "Calling bridge");
        ctx.events.info(format!("Bridge call {}", request.id));

        let reply = self.transport.request(request).await?;
        Ok(ctx.msg.with_payload(reply))
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Call a command, reference, or script on the local bridge".to_string(),
            category: "bridge".to_string(),
        }
    }
}
