//! Toolgate Isolate
//!
//! The untrusted side of the sandbox boundary. Each call to [`spawn`] starts
//! a fresh V8 isolate on a dedicated thread with its own single-threaded tokio
//! runtime, and hands back two channels of [`RpcMessage`]s. Nothing else is
//! shared with the host.
//!
//! ## Security model
//!
//! - **No ambient authority**: no fs, net, env or process extensions are
//!   loaded; the `Deno` and `__bootstrap` globals and `eval` are removed and
//!   function constructors are locked before any foreign script runs.
//! - **Frozen intrinsics**: shared prototypes used by iteration, promises and
//!   serialization are frozen, and the bootstrap works from builtins it
//!   captured before foreign code could replace them.
//! - **Explicit surfaces**: user code only sees `tools`, `capabilities` and
//!   `context`, all built by the trusted bootstrap from the `init` payload.
//! - **Depth guard in closure state**: the capability call chain lives in the
//!   bootstrap's closures and is unreachable from injected or user code.
//! - **Heap limit**: approaching the V8 heap limit terminates the isolate
//!   instead of aborting the process.
//!
//! [`RpcMessage`]: toolgate_protocol::RpcMessage

mod control;
pub mod error;
mod ops;
mod runtime;

pub use control::IsolateControl;
pub use error::{IsolateError, IsolateResult};
pub use runtime::{spawn, IsolateConfig, SpawnedIsolate};
