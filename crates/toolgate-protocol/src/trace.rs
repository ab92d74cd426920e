//! Trace events produced on both sides of the boundary.
//!
//! Tool events are stamped by the host clock, capability events by the
//! isolate clock. [`merge_by_timestamp`] orders the combined list by `ts`
//! with arrival order as the tie-break. The two clocks are independent, so the
//! merged order is approximate and carries no causal guarantee.

use serde::{Deserialize, Serialize};

/// Start/end record of a tool or capability invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    ToolStart {
        trace_id: String,
        /// Qualified `server:tool` identifier.
        tool: String,
        /// Epoch milliseconds.
        ts: i64,
    },
    ToolEnd {
        trace_id: String,
        tool: String,
        ts: i64,
        success: bool,
        duration_ms: u64,
        #[serde(default)]
        error: Option<String>,
    },
    CapabilityStart {
        trace_id: String,
        capability: String,
        capability_id: String,
        #[serde(default)]
        parent_trace_id: Option<String>,
        ts: i64,
    },
    CapabilityEnd {
        trace_id: String,
        capability: String,
        capability_id: String,
        #[serde(default)]
        parent_trace_id: Option<String>,
        ts: i64,
        success: bool,
        duration_ms: u64,
        #[serde(default)]
        error: Option<String>,
    },
}

impl TraceEvent {
    pub fn trace_id(&self) -> &str {
        match self {
            Self::ToolStart { trace_id, .. }
            | Self::ToolEnd { trace_id, .. }
            | Self::CapabilityStart { trace_id, .. }
            | Self::CapabilityEnd { trace_id, .. } => trace_id,
        }
    }

    pub fn ts(&self) -> i64 {
        match self {
            Self::ToolStart { ts, .. }
            | Self::ToolEnd { ts, .. }
            | Self::CapabilityStart { ts, .. }
            | Self::CapabilityEnd { ts, .. } => *ts,
        }
    }

    /// Tool id or capability name this event is about.
    pub fn subject(&self) -> &str {
        match self {
            Self::ToolStart { tool, .. } | Self::ToolEnd { tool, .. } => tool,
            Self::CapabilityStart { capability, .. } | Self::CapabilityEnd { capability, .. } => {
                capability
            }
        }
    }

    pub fn is_capability(&self) -> bool {
        matches!(
            self,
            Self::CapabilityStart { .. } | Self::CapabilityEnd { .. }
        )
    }

    /// `Some(success)` for end events, `None` for start events.
    pub fn success(&self) -> Option<bool> {
        match self {
            Self::ToolEnd { success, .. } | Self::CapabilityEnd { success, .. } => Some(*success),
            _ => None,
        }
    }
}

/// Sort `events` by timestamp in place. The sort is stable, so events with
/// equal timestamps keep the order in which they arrived.
pub fn merge_by_timestamp(events: &mut [TraceEvent]) {
    events.sort_by_key(TraceEvent::ts);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_start(id: &str, ts: i64) -> TraceEvent {
        TraceEvent::ToolStart {
            trace_id: id.into(),
            tool: "fs:read".into(),
            ts,
        }
    }

    fn cap_start(id: &str, ts: i64) -> TraceEvent {
        TraceEvent::CapabilityStart {
            trace_id: id.into(),
            capability: "summarize".into(),
            capability_id: "cap-1".into(),
            parent_trace_id: None,
            ts,
        }
    }

    #[test]
    fn test_merge_orders_by_timestamp() {
        let mut events = vec![tool_start("b", 20), cap_start("a", 10), tool_start("c", 30)];
        merge_by_timestamp(&mut events);
        let ids: Vec<&str> = events.iter().map(TraceEvent::trace_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_keeps_arrival_order_on_ties() {
        let mut events = vec![
            tool_start("first", 5),
            cap_start("second", 5),
            tool_start("third", 5),
            cap_start("early", 1),
        ];
        merge_by_timestamp(&mut events);
        let ids: Vec<&str> = events.iter().map(TraceEvent::trace_id).collect();
        assert_eq!(ids, vec!["early", "first", "second", "third"]);
    }

    #[test]
    fn test_capability_end_wire_shape() {
        let event: TraceEvent = serde_json::from_value(serde_json::json!({
            "type": "capability_end",
            "trace_id": "t-1",
            "capability": "fetch",
            "capability_id": "cap-9",
            "parent_trace_id": null,
            "ts": 1700000000000i64,
            "success": false,
            "duration_ms": 12,
            "error": "boom"
        }))
        .unwrap();
        assert!(event.is_capability());
        assert_eq!(event.success(), Some(false));
        assert_eq!(event.subject(), "fetch");
    }
}
