//! Drives the raw host/isolate protocol against real V8 isolates.

use std::time::Duration;

use serde_json::{json, Value};
use toolgate_isolate::{spawn, IsolateConfig};
use toolgate_protocol::{InitPayload, RpcMessage, ToolDefinition, TraceEvent};

#[derive(Debug, Default)]
struct Transcript {
    success: bool,
    result: Option<Value>,
    error: Option<String>,
    calls: Vec<(String, String, Value)>,
    traces: Vec<TraceEvent>,
}

/// Run one isolate to completion, answering every `rpc_call` with `answer`.
async fn drive<F>(init: InitPayload, answer: F) -> Transcript
where
    F: Fn(&str, &str, &Value) -> Result<Value, String>,
{
    let mut isolate = spawn(IsolateConfig::default()).unwrap();
    isolate.inbound.send(RpcMessage::Init(init)).unwrap();

    let mut transcript = Transcript::default();
    let run = async {
        while let Some(message) = isolate.outbound.recv().await {
            match message {
                RpcMessage::RpcCall {
                    id,
                    server,
                    tool,
                    args,
                } => {
                    let reply = match answer(&server, &tool, &args) {
                        Ok(value) => RpcMessage::reply_ok(id, value),
                        Err(e) => RpcMessage::reply_err(id, e),
                    };
                    transcript.calls.push((server, tool, args));
                    isolate.inbound.send(reply).unwrap();
                }
                RpcMessage::CapabilityTrace { event } => transcript.traces.push(event),
                RpcMessage::ExecutionComplete {
                    success,
                    result,
                    error,
                } => {
                    transcript.success = success;
                    transcript.result = result;
                    transcript.error = error;
                    return;
                }
                other => panic!("unexpected message from isolate: {}", other.kind()),
            }
        }
        panic!("isolate closed without execution_complete");
    };
    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("isolate did not finish in time");
    transcript
}

fn no_tools(_: &str, _: &str, _: &Value) -> Result<Value, String> {
    Err("no tools configured".to_string())
}

fn capability(name: &str, body: &str) -> String {
    format!(
        "__toolgate.register(\"{name}\", \"{name}-id\", async (args, tools, capabilities) => {{\n{body}\n}});\n"
    )
}

#[tokio::test]
async fn test_returns_plain_value() {
    let t = drive(InitPayload::new("return 1 + 2;"), no_tools).await;
    assert!(t.success, "{:?}", t.error);
    assert_eq!(t.result, Some(json!(3)));
}

#[tokio::test]
async fn test_undefined_result_is_null() {
    let t = drive(InitPayload::new("const x = 1;"), no_tools).await;
    assert!(t.success);
    assert_eq!(t.result, None);
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let mut init = InitPayload::new(
        "const r = await tools.math.add({a: 2, b: 5});\nreturn r.sum * 10;",
    );
    init.tool_definitions = vec![ToolDefinition::new("math", "add")];

    let t = drive(init, |server, tool, args| {
        assert_eq!((server, tool), ("math", "add"));
        let sum = args["a"].as_i64().unwrap() + args["b"].as_i64().unwrap();
        Ok(json!({"sum": sum}))
    })
    .await;

    assert!(t.success, "{:?}", t.error);
    assert_eq!(t.result, Some(json!(70)));
    assert_eq!(t.calls.len(), 1);
    assert_eq!(t.calls[0].2, json!({"a": 2, "b": 5}));
}

#[tokio::test]
async fn test_concurrent_tool_calls_resolve_independently() {
    let mut init = InitPayload::new(
        "const [a, b] = await Promise.all([tools.kv.get({k: 'a'}), tools.kv.get({k: 'b'})]);\nreturn a + b;",
    );
    init.tool_definitions = vec![ToolDefinition::new("kv", "get")];

    let t = drive(init, |_, _, args| match args["k"].as_str() {
        Some("a") => Ok(json!("x")),
        Some("b") => Ok(json!("y")),
        _ => Err("missing key".into()),
    })
    .await;

    assert!(t.success, "{:?}", t.error);
    assert_eq!(t.result, Some(json!("xy")));
    assert_eq!(t.calls.len(), 2);
}

#[tokio::test]
async fn test_tool_error_becomes_exception() {
    let mut init = InitPayload::new(
        "try { await tools.fs.read({}); return 'no'; } catch (e) { return 'caught: ' + e.message; }",
    );
    init.tool_definitions = vec![ToolDefinition::new("fs", "read")];

    let t = drive(init, |_, _, _| Err("permission denied".into())).await;
    assert!(t.success);
    assert_eq!(t.result, Some(json!("caught: permission denied")));
}

#[tokio::test]
async fn test_context_is_exposed() {
    let mut init = InitPayload::new("return context.user + '!';");
    init.context = Some(json!({"user": "ada"}));

    let t = drive(init, no_tools).await;
    assert_eq!(t.result, Some(json!("ada!")));
}

#[tokio::test]
async fn test_ambient_globals_are_removed() {
    let code = "return [typeof Deno, typeof eval, typeof __toolgate, String((() => {}).constructor)];";
    let t = drive(InitPayload::new(code), no_tools).await;
    assert!(t.success, "{:?}", t.error);
    assert_eq!(
        t.result,
        Some(json!(["undefined", "undefined", "undefined", "undefined"]))
    );
}

#[tokio::test]
async fn test_host_internals_unreachable_from_capabilities_and_user_code() {
    let reach = "[typeof Deno, typeof __bootstrap, typeof globalThis.Deno, typeof globalThis.__bootstrap]";
    let mut init = InitPayload::new(&format!(
        "return {{ capability: await capabilities.peek({{}}), user: {reach} }};"
    ));
    init.capability_source = Some(capability("peek", &format!("return {reach};")));

    let t = drive(init, no_tools).await;
    assert!(t.success, "{:?}", t.error);
    let hidden = json!(["undefined", "undefined", "undefined", "undefined"]);
    assert_eq!(
        t.result,
        Some(json!({ "capability": hidden.clone(), "user": hidden }))
    );
}

#[tokio::test]
async fn test_tampered_builtins_do_not_bypass_depth_guard() {
    let code = "\
        try { Array.prototype.some = () => false; } catch (e) {}\n\
        try { Array.prototype[Symbol.iterator] = function* () {}; } catch (e) {}\n\
        try { Object.getPrototypeOf([][Symbol.iterator]()).next = () => ({ done: true }); } catch (e) {}\n\
        try { Map.prototype.get = () => undefined; } catch (e) {}\n\
        try { JSON.stringify = () => '{}'; } catch (e) {}\n\
        try { JSON = { stringify: () => '{}', parse: () => ({}) }; } catch (e) {}\n\
        return await capabilities.a({});";
    let mut init = InitPayload::new(code);
    init.capability_source = Some(capability("a", "return await capabilities.a({});"));

    let t = drive(init, no_tools).await;
    assert!(!t.success);
    assert_eq!(
        t.error.as_deref(),
        Some("DepthExceeded: capability a is already on the call chain")
    );
    assert_eq!(t.traces.len(), 2);
    assert!(matches!(&t.traces[0], TraceEvent::CapabilityStart { capability, .. } if capability == "a"));
    assert_eq!(t.traces[1].success(), Some(false));
}

#[tokio::test]
async fn test_frozen_builtins_still_run_ordinary_code() {
    let code = "\
        class NotFound extends Error { constructor(m) { super(m); this.name = 'NotFound'; } }\n\
        const m = new Map([['a', 1]]);\n\
        const xs = [...m.values(), ...[2, 3]].map((x) => x * 2);\n\
        const settled = await Promise.all(xs.map(async (x) => x + 1));\n\
        try { throw new NotFound('gone'); } catch (e) { return { settled, err: String(e) }; }";
    let t = drive(InitPayload::new(code), no_tools).await;
    assert!(t.success, "{:?}", t.error);
    assert_eq!(
        t.result,
        Some(json!({ "settled": [3, 5, 7], "err": "NotFound: gone" }))
    );
}

#[tokio::test]
async fn test_thrown_error_reports_failure() {
    let t = drive(InitPayload::new("throw new TypeError('bad input');"), no_tools).await;
    assert!(!t.success);
    assert_eq!(t.error.as_deref(), Some("TypeError: bad input"));
}

#[tokio::test]
async fn test_syntax_error_reports_failure() {
    let t = drive(InitPayload::new("return (;"), no_tools).await;
    assert!(!t.success);
    assert!(t.error.unwrap().contains("user code failed to load"));
}

#[tokio::test]
async fn test_capability_traces_are_streamed() {
    let mut init = InitPayload::new("return await capabilities.double({n: 4});");
    init.capability_source = Some(capability("double", "return args.n * 2;"));

    let t = drive(init, no_tools).await;
    assert!(t.success, "{:?}", t.error);
    assert_eq!(t.result, Some(json!(8)));
    assert_eq!(t.traces.len(), 2);
    assert!(matches!(&t.traces[0], TraceEvent::CapabilityStart { capability, .. } if capability == "double"));
    assert_eq!(t.traces[1].success(), Some(true));
    assert_eq!(t.traces[0].trace_id(), t.traces[1].trace_id());
}

#[tokio::test]
async fn test_capability_depth_limit() {
    let mut init = InitPayload::new("return await capabilities.a({});");
    init.capability_source = Some(
        [
            capability("a", "return 'a' + await capabilities.b({});"),
            capability("b", "return 'b' + await capabilities.c({});"),
            capability("c", "return 'c' + await capabilities.d({});"),
            capability("d", "return 'd';"),
        ]
        .concat(),
    );

    let t = drive(init, no_tools).await;
    assert!(!t.success);
    assert!(t.error.unwrap().starts_with("DepthExceeded"));
    let started: Vec<_> = t
        .traces
        .iter()
        .filter_map(|e| match e {
            TraceEvent::CapabilityStart { capability, .. } => Some(capability.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(started, ["a", "b", "c"]);
}

#[tokio::test]
async fn test_capability_chain_within_limit() {
    let mut init = InitPayload::new("return await capabilities.a({});");
    init.capability_source = Some(
        [
            capability("a", "return 'a' + await capabilities.b({});"),
            capability("b", "return 'b' + await capabilities.c({});"),
            capability("c", "return 'c';"),
        ]
        .concat(),
    );

    let t = drive(init, no_tools).await;
    assert!(t.success, "{:?}", t.error);
    assert_eq!(t.result, Some(json!("abc")));

    let parent_of_c = t.traces.iter().find_map(|e| match e {
        TraceEvent::CapabilityStart {
            capability,
            parent_trace_id,
            ..
        } if capability == "c" => Some(parent_trace_id.clone()),
        _ => None,
    });
    assert!(parent_of_c.flatten().is_some());
}

#[tokio::test]
async fn test_capability_recursion_rejected() {
    let mut init = InitPayload::new("return await capabilities.a({});");
    init.capability_source = Some(capability("a", "return await capabilities.a({});"));

    let t = drive(init, no_tools).await;
    assert!(!t.success);
    assert!(t.error.unwrap().starts_with("DepthExceeded"));
}

#[tokio::test]
async fn test_registration_closed_after_start() {
    let code = "return typeof globalThis.__toolgate;";
    let mut init = InitPayload::new(code);
    init.capability_source = Some(capability("noop", "return null;"));

    let t = drive(init, no_tools).await;
    assert_eq!(t.result, Some(json!("undefined")));
}

#[tokio::test]
async fn test_infinite_loop_is_terminated() {
    let mut isolate = spawn(IsolateConfig::default()).unwrap();
    isolate
        .inbound
        .send(RpcMessage::Init(InitPayload::new("while (true) {}")))
        .unwrap();

    let control = isolate.control.clone();
    tokio::time::sleep(Duration::from_millis(100)).await;
    control.terminate();

    let next = tokio::time::timeout(Duration::from_secs(5), isolate.outbound.recv())
        .await
        .expect("isolate did not stop after terminate");
    assert!(next.is_none());
    assert!(control.is_terminate_requested());
}

#[tokio::test]
async fn test_first_message_must_be_init() {
    let mut isolate = spawn(IsolateConfig::default()).unwrap();
    isolate
        .inbound
        .send(RpcMessage::reply_ok("x".to_string(), json!(1)))
        .unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), isolate.outbound.recv())
        .await
        .unwrap();
    assert!(next.is_none());
    assert!(isolate
        .control
        .exit_reason()
        .unwrap()
        .contains("expected init"));
}
