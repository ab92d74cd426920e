//! Host-side control over a running isolate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use deno_core::v8;

/// Thread-safe handle the host keeps to terminate an isolate and read why
/// it exited.
///
/// The V8 handle only exists once the isolate thread has built its runtime;
/// a termination requested before that point is remembered and applied as
/// soon as the handle is attached.
#[derive(Clone, Default)]
pub struct IsolateControl {
    inner: Arc<ControlInner>,
}

#[derive(Default)]
struct ControlInner {
    handle: Mutex<Option<v8::IsolateHandle>>,
    terminate_requested: AtomicBool,
    exit_reason: Mutex<Option<String>>,
}

impl IsolateControl {
    /// Stop the isolate. Safe to call repeatedly and from any thread.
    pub fn terminate(&self) {
        self.inner.terminate_requested.store(true, Ordering::SeqCst);
        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = handle.as_ref() {
            handle.terminate_execution();
        }
    }

    pub fn is_terminate_requested(&self) -> bool {
        self.inner.terminate_requested.load(Ordering::SeqCst)
    }

    /// Why the isolate thread stopped without completing, if it recorded a reason.
    pub fn exit_reason(&self) -> Option<String> {
        self.inner
            .exit_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn attach(&self, handle: v8::IsolateHandle) {
        let mut slot = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_terminate_requested() {
            handle.terminate_execution();
        }
        *slot = Some(handle);
    }

    pub(crate) fn record_exit(&self, reason: impl Into<String>) {
        let mut slot = self
            .inner
            .exit_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(reason.into());
        }
    }
}

impl std::fmt::Debug for IsolateControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolateControl")
            .field("terminate_requested", &self.is_terminate_requested())
            .field("exit_reason", &self.exit_reason())
            .finish()
    }
}
