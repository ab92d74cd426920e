//! The bridge: spawns an isolate, answers its `rpc_call`s through the
//! trusted [`ToolClient`], collects traces and waits for
//! `execution_complete`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use toolgate_isolate::{IsolateConfig, IsolateControl, SpawnedIsolate};
use toolgate_protocol::{InitPayload, RpcMessage, TraceEvent};

use super::error::{BridgeError, BridgeResult};
use super::traces::TraceCollector;
use super::{CodeRunner, SandboxOutcome, SandboxRequest};
use crate::config::SandboxConfig;
use crate::metrics::METRICS;
use crate::tools::{ToolCallError, ToolClient};

/// Terminates the isolate when the run ends for any reason, including the
/// caller dropping the future.
struct TerminateOnDrop(IsolateControl);

impl Drop for TerminateOnDrop {
    fn drop(&mut self) {
        self.0.terminate();
    }
}

struct Completion {
    success: bool,
    result: Option<Value>,
    error: Option<String>,
}

/// Owns isolate lifecycles and serves their tool calls.
pub struct SandboxBridge {
    tools: Arc<dyn ToolClient>,
    config: SandboxConfig,
    permits: Semaphore,
}

impl SandboxBridge {
    pub fn new(tools: Arc<dyn ToolClient>, config: SandboxConfig) -> Self {
        let permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            tools,
            config,
            permits,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `request` in a fresh isolate.
    #[instrument(skip_all, fields(code_bytes = request.code.len(), tools = request.tool_definitions.len()))]
    pub async fn run(&self, request: SandboxRequest) -> BridgeResult<SandboxOutcome> {
        if request.code.len() > self.config.max_code_bytes {
            return Err(BridgeError::CodeTooLarge {
                size: request.code.len(),
                limit: self.config.max_code_bytes,
            });
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| BridgeError::Spawn("sandbox permits closed".to_string()))?;
        let start = Instant::now();
        METRICS.inc_sandbox_runs();

        let SpawnedIsolate {
            inbound,
            mut outbound,
            control,
        } = toolgate_isolate::spawn(IsolateConfig {
            max_heap_bytes: self.config.max_heap_bytes,
        })?;
        let _guard = TerminateOnDrop(control.clone());

        let granted: HashSet<String> = request
            .tool_definitions
            .iter()
            .map(|def| def.qualified_name())
            .collect();
        let init = InitPayload {
            code: request.code,
            tool_definitions: request.tool_definitions,
            capability_source: request.capability_source,
            context: request.context,
            max_capability_depth: self.config.max_capability_depth,
        };
        if inbound.send(RpcMessage::Init(init)).is_err() {
            return Err(crash(&control, "isolate exited before init"));
        }

        let traces = Arc::new(TraceCollector::default());
        let timeout_ms = self.config.timeout_ms;
        let driven = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.drive(inbound, &mut outbound, &control, &granted, traces.clone()),
        )
        .await;

        let completion = match driven {
            Ok(completion) => completion?,
            Err(_) => {
                control.terminate();
                warn!(timeout_ms, "sandbox timed out; isolate terminated");
                return Err(BridgeError::WorkerTimeout { timeout_ms });
            }
        };

        let outcome = SandboxOutcome {
            success: completion.success,
            result: completion.result,
            error: completion.error,
            traces: traces.take_merged(),
            duration_ms: start.elapsed().as_millis() as u64,
            cache_hit: false,
        };
        debug!(
            success = outcome.success,
            traces = outcome.traces.len(),
            duration_ms = outcome.duration_ms,
            "sandbox run complete"
        );
        Ok(outcome)
    }

    /// Pump isolate messages until completion. Tool calls are served on
    /// their own tasks so concurrent calls from the isolate overlap. Only
    /// tools named in `granted` ever reach the client.
    async fn drive(
        &self,
        inbound: mpsc::UnboundedSender<RpcMessage>,
        outbound: &mut mpsc::UnboundedReceiver<RpcMessage>,
        control: &IsolateControl,
        granted: &HashSet<String>,
        traces: Arc<TraceCollector>,
    ) -> BridgeResult<Completion> {
        let mut calls: JoinSet<()> = JoinSet::new();
        let mut call_count = 0usize;

        loop {
            tokio::select! {
                message = outbound.recv() => match message {
                    Some(RpcMessage::RpcCall { id, server, tool, args }) => {
                        call_count += 1;
                        METRICS.inc_rpc_calls();
                        let rejected = if !granted.contains(&format!("{server}:{tool}")) {
                            Some(ToolCallError::not_found(&server, &tool))
                        } else if call_count > self.config.max_tool_calls {
                            Some(ToolCallError::CallLimitExceeded {
                                limit: self.config.max_tool_calls,
                            })
                        } else {
                            None
                        };
                        if let Some(error) = rejected {
                            warn!(call_id = %id, %error, "rejecting tool call");
                            if inbound.send(RpcMessage::reply_err(id, error.to_string())).is_err() {
                                debug!("isolate gone before rejection reply");
                            }
                            continue;
                        }
                        calls.spawn(serve_call(
                            self.tools.clone(),
                            inbound.clone(),
                            traces.clone(),
                            id,
                            server,
                            tool,
                            args,
                        ));
                    }
                    Some(RpcMessage::CapabilityTrace { event }) => {
                        if event.is_capability() {
                            traces.push(event);
                        } else {
                            warn!(trace_id = %event.trace_id(), "ignoring non-capability trace from isolate");
                        }
                    }
                    Some(RpcMessage::ExecutionComplete { success, result, error }) => {
                        return Ok(Completion { success, result, error });
                    }
                    Some(other) => warn!(kind = other.kind(), "unexpected message from isolate"),
                    None => return Err(crash(control, "isolate exited without completing")),
                },
                Some(joined) = calls.join_next(), if !calls.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "tool call handler failed");
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl CodeRunner for SandboxBridge {
    async fn run_code(&self, request: SandboxRequest) -> BridgeResult<SandboxOutcome> {
        self.run(request).await
    }
}

fn crash(control: &IsolateControl, fallback: &str) -> BridgeError {
    BridgeError::WorkerCrash {
        reason: control.exit_reason().unwrap_or_else(|| fallback.to_string()),
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Serve one `rpc_call`, bracketing it with host-stamped tool events.
async fn serve_call(
    tools: Arc<dyn ToolClient>,
    inbound: mpsc::UnboundedSender<RpcMessage>,
    traces: Arc<TraceCollector>,
    id: String,
    server: String,
    tool: String,
    args: Value,
) {
    let qualified = format!("{server}:{tool}");
    traces.push(TraceEvent::ToolStart {
        trace_id: id.clone(),
        tool: qualified.clone(),
        ts: now_ms(),
    });
    let started = Instant::now();
    let outcome = tools.call_tool(&server, &tool, args).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let (reply, error) = match outcome {
        Ok(value) => (RpcMessage::reply_ok(id.clone(), value), None),
        Err(e) => {
            debug!(call_id = %id, tool = %qualified, error = %e, "tool call failed");
            (RpcMessage::reply_err(id.clone(), e.to_string()), Some(e.to_string()))
        }
    };
    traces.push(TraceEvent::ToolEnd {
        trace_id: id,
        tool: qualified,
        ts: now_ms(),
        success: error.is_none(),
        duration_ms,
        error,
    });
    if inbound.send(reply).is_err() {
        debug!("isolate gone before tool reply");
    }
}
