//! Toolgate Protocol
//!
//! The serializable contract spoken across the isolation boundary. The host
//! (`toolgate-core`) and the isolated execution context (`toolgate-isolate`)
//! both depend on this crate, so the shapes of [`RpcMessage`] and
//! [`TraceEvent`] cannot drift between the two sides of a deployment.
//!
//! Nothing in here is callable from the other side: every type is plain data.
//!
//! ## Modules
//!
//! - [`tool`]   : `ToolDefinition`
//! - [`message`]: `RpcMessage`, `InitPayload`
//! - [`trace`]  : `TraceEvent`, timestamp merge

pub mod message;
pub mod tool;
pub mod trace;

pub use message::{InitPayload, RpcMessage};
pub use tool::ToolDefinition;
pub use trace::{merge_by_timestamp, TraceEvent};

/// Capability call depth allowed inside the isolate unless configured otherwise.
pub const DEFAULT_MAX_CAPABILITY_DEPTH: u32 = 3;
