//! Ops exposed to the bootstrap script.
//!
//! The bootstrap captures `Deno.core.ops` in closures and deletes the `Deno`
//! global before foreign code runs, so these are unreachable from user code
//! except through the surfaces the bootstrap builds. Every op takes and
//! returns strings; values cross as JSON text only.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use deno_core::{op2, OpState};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use toolgate_protocol::{RpcMessage, TraceEvent};

/// Reply delivered to a suspended tool call.
#[derive(Debug)]
pub(crate) struct RpcReply {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl RpcReply {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    fn to_json(&self) -> String {
        json!({
            "success": self.success,
            "result": self.result,
            "error": self.error,
        })
        .to_string()
    }
}

/// Outstanding `rpc_call`s keyed by correlation id.
pub(crate) type PendingCalls = Rc<RefCell<HashMap<String, oneshot::Sender<RpcReply>>>>;

/// Per-isolate state stored in the `OpState`.
pub(crate) struct IsolateState {
    /// JSON handed to the bootstrap: tool definitions, context, depth limit.
    pub bootstrap: String,
    pub outbound: mpsc::UnboundedSender<RpcMessage>,
    pub pending: PendingCalls,
    pub completed: bool,
}

/// Resolve the pending call `id` with `reply`. Unknown or already-answered
/// ids are ignored.
pub(crate) fn resolve_pending(pending: &PendingCalls, id: &str, reply: RpcReply) {
    match pending.borrow_mut().remove(id) {
        Some(sender) => {
            if sender.send(reply).is_err() {
                debug!(call_id = %id, "tool call abandoned before its reply arrived");
            }
        }
        None => warn!(call_id = %id, "rpc_result for unknown or already settled call"),
    }
}

pub(crate) fn reply_from_message(success: bool, result: Option<Value>, error: Option<String>) -> RpcReply {
    RpcReply {
        success,
        result,
        error,
    }
}

#[op2]
#[string]
fn op_toolgate_init(state: &mut OpState) -> String {
    state.borrow::<IsolateState>().bootstrap.clone()
}

#[op2]
#[string]
fn op_toolgate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Stream a capability trace event to the host. Tool events are stamped by
/// the host itself, so anything else is dropped here.
#[op2(fast)]
fn op_toolgate_trace(state: &mut OpState, #[string] event: String) {
    let event: TraceEvent = match serde_json::from_str(&event) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "dropping malformed trace event");
            return;
        }
    };
    if !event.is_capability() {
        warn!(trace_id = %event.trace_id(), "isolate may only emit capability events");
        return;
    }
    let isolate = state.borrow::<IsolateState>();
    if isolate
        .outbound
        .send(RpcMessage::CapabilityTrace { event })
        .is_err()
    {
        debug!("host closed the channel; trace event dropped");
    }
}

/// Post the final outcome. Only the first completion is forwarded.
#[op2(fast)]
fn op_toolgate_complete(state: &mut OpState, #[string] outcome: String) {
    let isolate = state.borrow_mut::<IsolateState>();
    if isolate.completed {
        warn!("ignoring duplicate execution_complete");
        return;
    }
    isolate.completed = true;

    let message = match serde_json::from_str::<Value>(&outcome) {
        Ok(outcome) => RpcMessage::ExecutionComplete {
            success: outcome["success"].as_bool().unwrap_or(false),
            result: outcome.get("result").cloned().filter(|v| !v.is_null()),
            error: outcome["error"].as_str().map(str::to_string),
        },
        Err(e) => RpcMessage::ExecutionComplete {
            success: false,
            result: None,
            error: Some(format!("result is not serializable: {e}")),
        },
    };
    if isolate.outbound.send(message).is_err() {
        debug!("host closed the channel before completion");
    }
}

/// Forward a tool call to the host and suspend until its `rpc_result`.
#[op2(async)]
#[string]
async fn op_toolgate_call_tool(
    state: Rc<RefCell<OpState>>,
    #[string] server: String,
    #[string] tool: String,
    #[string] args: String,
) -> String {
    let args: Value = match serde_json::from_str(&args) {
        Ok(args) => args,
        Err(e) => return RpcReply::failure(format!("arguments are not valid JSON: {e}")).to_json(),
    };
    let id = Uuid::new_v4().to_string();

    let receiver = {
        let state = state.borrow();
        let isolate = state.borrow::<IsolateState>();
        let (sender, receiver) = oneshot::channel();
        isolate.pending.borrow_mut().insert(id.clone(), sender);
        let call = RpcMessage::RpcCall {
            id: id.clone(),
            server,
            tool,
            args,
        };
        if isolate.outbound.send(call).is_err() {
            isolate.pending.borrow_mut().remove(&id);
            return RpcReply::failure("host closed the channel").to_json();
        }
        receiver
    };

    match receiver.await {
        Ok(reply) => reply.to_json(),
        Err(_) => RpcReply::failure(format!("isolate disposed before call {id} was answered"))
            .to_json(),
    }
}

deno_core::extension!(
    toolgate_ext,
    ops = [
        op_toolgate_init,
        op_toolgate_trace_id,
        op_toolgate_trace,
        op_toolgate_complete,
        op_toolgate_call_tool,
    ],
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_pending_settles_once() {
        let pending: PendingCalls = Rc::new(RefCell::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        pending.borrow_mut().insert("c-1".into(), tx);

        resolve_pending(&pending, "c-1", reply_from_message(true, Some(json!(1)), None));
        resolve_pending(&pending, "c-1", reply_from_message(false, None, Some("late".into())));

        let reply = rx.try_recv().unwrap();
        assert!(reply.success);
        assert_eq!(reply.result, Some(json!(1)));
        assert!(pending.borrow().is_empty());
    }

    #[test]
    fn test_reply_json_shape() {
        let reply: Value = serde_json::from_str(&RpcReply::failure("nope").to_json()).unwrap();
        assert_eq!(reply, json!({"success": false, "result": null, "error": "nope"}));
    }
}
