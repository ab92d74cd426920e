//! Isolate lifecycle: thread, V8 runtime, scripts, message pump.
//!
//! V8 isolates are `!Send`, so everything below [`spawn`] runs on a dedicated
//! thread with its own current-thread tokio runtime. The host only ever holds
//! the two channel ends and an [`IsolateControl`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use toolgate_protocol::{InitPayload, RpcMessage};

use crate::control::IsolateControl;
use crate::error::{IsolateError, IsolateResult};
use crate::ops::{self, IsolateState, PendingCalls};

const BOOTSTRAP_JS: &str = include_str!("bootstrap.js");

/// Resource limits for one isolate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolateConfig {
    /// V8 heap limit in bytes.
    pub max_heap_bytes: usize,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            max_heap_bytes: 64 * 1024 * 1024,
        }
    }
}

/// The host's view of a running isolate.
#[derive(Debug)]
pub struct SpawnedIsolate {
    /// Host → isolate (`init`, `rpc_result`). Dropping it disposes the isolate.
    pub inbound: mpsc::UnboundedSender<RpcMessage>,
    /// Isolate → host (`rpc_call`, `capability_trace`, `execution_complete`).
    pub outbound: mpsc::UnboundedReceiver<RpcMessage>,
    pub control: IsolateControl,
}

/// Start a fresh isolate on its own thread. It waits for an `init` message
/// on `inbound` before running anything.
pub fn spawn(config: IsolateConfig) -> IsolateResult<SpawnedIsolate> {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let control = IsolateControl::default();
    let thread_control = control.clone();

    std::thread::Builder::new()
        .name("toolgate-isolate".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    thread_control.record_exit(format!("isolate runtime setup failed: {e}"));
                    return;
                }
            };
            let outcome = rt.block_on(run_isolate(
                &config,
                inbound_rx,
                outbound_tx.clone(),
                thread_control.clone(),
            ));
            if let Err(e) = outcome {
                if !matches!(e, IsolateError::Terminated) {
                    error!(error = %e, "isolate stopped without completing");
                }
                thread_control.record_exit(e.to_string());
            }
            // The host sees the channel close only after the exit reason is set.
            drop(outbound_tx);
        })?;

    Ok(SpawnedIsolate {
        inbound: inbound_tx,
        outbound: outbound_rx,
        control,
    })
}

/// State for the near-heap-limit callback. Declared before the runtime so it
/// is dropped after it.
struct HeapGuard {
    control: IsolateControl,
    triggered: AtomicBool,
}

extern "C" fn near_heap_limit_callback(
    data: *mut c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points at the boxed `HeapGuard` in `run_isolate`, which
    // outlives the runtime that invokes this callback.
    let guard = unsafe { &*(data as *const HeapGuard) };
    if !guard.triggered.swap(true, Ordering::SeqCst) {
        guard.control.terminate();
    }
    // Grace so the termination can unwind.
    current_heap_limit + 1024 * 1024
}

async fn run_isolate(
    config: &IsolateConfig,
    mut inbound: mpsc::UnboundedReceiver<RpcMessage>,
    outbound: mpsc::UnboundedSender<RpcMessage>,
    control: IsolateControl,
) -> IsolateResult<()> {
    let init = match inbound.recv().await {
        Some(RpcMessage::Init(payload)) => payload,
        Some(other) => {
            return Err(IsolateError::Protocol(format!(
                "expected init, received {}",
                other.kind()
            )))
        }
        None => {
            debug!("isolate disposed before init");
            return Ok(());
        }
    };

    let heap_guard = Box::new(HeapGuard {
        control: control.clone(),
        triggered: AtomicBool::new(false),
    });
    let pending: PendingCalls = Rc::new(RefCell::new(HashMap::new()));
    let mut runtime = create_runtime(config, &init, outbound.clone(), pending.clone())?;

    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_guard as *const HeapGuard as *mut c_void,
    );
    control.attach(runtime.v8_isolate().thread_safe_handle());

    let outcome = execute(&mut runtime, &init, &mut inbound, &pending, &control).await;

    let completed = runtime.op_state().borrow().borrow::<IsolateState>().completed;
    drop(runtime);

    if heap_guard.triggered.load(Ordering::SeqCst) {
        return Err(IsolateError::HeapLimitExceeded {
            limit_bytes: config.max_heap_bytes,
        });
    }
    if control.is_terminate_requested() {
        return Err(IsolateError::Terminated);
    }

    match outcome {
        Ok(()) if !completed => {
            post_failure(&outbound, "execution finished without producing a result");
            Ok(())
        }
        Ok(()) => Ok(()),
        Err(IsolateError::Bootstrap(message)) if !completed => {
            post_failure(&outbound, &message);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn create_runtime(
    config: &IsolateConfig,
    init: &InitPayload,
    outbound: mpsc::UnboundedSender<RpcMessage>,
    pending: PendingCalls,
) -> IsolateResult<JsRuntime> {
    let create_params = v8::CreateParams::default().heap_limits(0, config.max_heap_bytes);
    let runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![ops::toolgate_ext::init()],
        create_params: Some(create_params),
        ..Default::default()
    });

    let bootstrap = json!({
        "tool_definitions": init.tool_definitions,
        "context": init.context,
        "max_capability_depth": init.max_capability_depth,
    });
    let bootstrap = serde_json::to_string(&bootstrap)
        .map_err(|e| IsolateError::Setup(anyhow::Error::new(e)))?;

    runtime.op_state().borrow_mut().put(IsolateState {
        bootstrap,
        outbound,
        pending,
        completed: false,
    });
    Ok(runtime)
}

/// Run bootstrap, capability bundle and user script, then drive the event
/// loop until it settles or the host closes the channel.
async fn execute(
    runtime: &mut JsRuntime,
    init: &InitPayload,
    inbound: &mut mpsc::UnboundedReceiver<RpcMessage>,
    pending: &PendingCalls,
    control: &IsolateControl,
) -> IsolateResult<()> {
    if control.is_terminate_requested() {
        return Err(IsolateError::Terminated);
    }

    runtime
        .execute_script("[toolgate:bootstrap]", BOOTSTRAP_JS)
        .map_err(|e| IsolateError::Setup(anyhow::anyhow!("bootstrap failed: {e}")))?;

    if let Some(source) = init
        .capability_source
        .as_ref()
        .filter(|source| !source.trim().is_empty())
    {
        runtime
            .execute_script("[toolgate:capabilities]", source.clone())
            .map_err(|e| IsolateError::Bootstrap(format!("capability bundle failed to load: {e}")))?;
    }

    let user_script = format!(
        "globalThis.__toolgate.run(async (tools, capabilities, context) => {{\n{}\n}});",
        init.code
    );
    runtime
        .execute_script("[toolgate:user]", user_script)
        .map_err(|e| IsolateError::Bootstrap(format!("user code failed to load: {e}")))?;

    tokio::select! {
        result = runtime.run_event_loop(PollEventLoopOptions::default()) => {
            result.map_err(|e| IsolateError::EventLoop(e.to_string()))
        }
        () = pump_replies(inbound, pending) => {
            debug!("host disposed the isolate; abandoning execution");
            Err(IsolateError::Terminated)
        }
    }
}

/// Deliver `rpc_result`s to suspended calls until the host drops its sender.
/// Calls still pending at that point are rejected by dropping their senders.
async fn pump_replies(inbound: &mut mpsc::UnboundedReceiver<RpcMessage>, pending: &PendingCalls) {
    while let Some(message) = inbound.recv().await {
        match message {
            RpcMessage::RpcResult {
                id,
                success,
                result,
                error,
            } => ops::resolve_pending(pending, &id, ops::reply_from_message(success, result, error)),
            other => warn!(kind = other.kind(), "unexpected message from host"),
        }
    }
    pending.borrow_mut().clear();
}

fn post_failure(outbound: &mpsc::UnboundedSender<RpcMessage>, error: &str) {
    let message = RpcMessage::ExecutionComplete {
        success: false,
        result: None,
        error: Some(error.to_string()),
    };
    if outbound.send(message).is_err() {
        debug!("host closed the channel before the failure was reported");
    }
}
