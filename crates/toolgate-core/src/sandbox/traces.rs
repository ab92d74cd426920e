//! Trace collection on the host side and per-subject summaries.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use toolgate_protocol::{merge_by_timestamp, TraceEvent};

/// Collects events from both sides of the boundary in arrival order.
#[derive(Debug, Default)]
pub(crate) struct TraceCollector {
    events: Mutex<Vec<TraceEvent>>,
}

impl TraceCollector {
    pub fn push(&self, event: TraceEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Drain the collected events, merged by timestamp.
    pub fn take_merged(&self) -> Vec<TraceEvent> {
        let mut events =
            std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner));
        merge_by_timestamp(&mut events);
        events
    }
}

/// Call statistics for one tool or capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceStats {
    pub calls: u64,
    pub failures: u64,
    /// Started but never ended (run aborted mid-call).
    pub unfinished: u64,
    pub total_duration_ms: u64,
}

impl TraceStats {
    pub fn mean_duration_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.calls as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            (self.calls - self.failures) as f64 / self.calls as f64
        }
    }
}

/// Per-tool and per-capability statistics derived from one trace list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub tools: BTreeMap<String, TraceStats>,
    pub capabilities: BTreeMap<String, TraceStats>,
}

/// Fold a merged trace list into per-subject statistics.
pub fn summarize(events: &[TraceEvent]) -> TraceSummary {
    let mut summary = TraceSummary::default();
    for event in events {
        let bucket = if event.is_capability() {
            &mut summary.capabilities
        } else {
            &mut summary.tools
        };
        let stats = bucket.entry(event.subject().to_string()).or_default();
        match event {
            TraceEvent::ToolStart { .. } | TraceEvent::CapabilityStart { .. } => {
                stats.unfinished += 1;
            }
            TraceEvent::ToolEnd {
                success,
                duration_ms,
                ..
            }
            | TraceEvent::CapabilityEnd {
                success,
                duration_ms,
                ..
            } => {
                stats.unfinished = stats.unfinished.saturating_sub(1);
                stats.calls += 1;
                stats.total_duration_ms += duration_ms;
                if !success {
                    stats.failures += 1;
                }
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_end(tool: &str, ts: i64, success: bool, duration_ms: u64) -> TraceEvent {
        TraceEvent::ToolEnd {
            trace_id: format!("t-{ts}"),
            tool: tool.into(),
            ts,
            success,
            duration_ms,
            error: (!success).then(|| "failed".to_string()),
        }
    }

    #[test]
    fn test_collector_merges_by_timestamp() {
        let collector = TraceCollector::default();
        collector.push(tool_end("a:x", 30, true, 1));
        collector.push(tool_end("a:y", 10, true, 1));
        collector.push(tool_end("a:z", 10, true, 1));

        let merged = collector.take_merged();
        let order: Vec<_> = merged.iter().map(TraceEvent::subject).collect();
        assert_eq!(order, ["a:y", "a:z", "a:x"]);
        assert!(collector.take_merged().is_empty());
    }

    #[test]
    fn test_summarize_counts_calls_and_failures() {
        let events = vec![
            TraceEvent::ToolStart {
                trace_id: "1".into(),
                tool: "fs:read".into(),
                ts: 1,
            },
            tool_end("fs:read", 5, true, 4),
            tool_end("fs:read", 9, false, 8),
            TraceEvent::CapabilityStart {
                trace_id: "c".into(),
                capability: "digest".into(),
                capability_id: "cap-1".into(),
                parent_trace_id: None,
                ts: 2,
            },
        ];
        let summary = summarize(&events);

        let fs = &summary.tools["fs:read"];
        assert_eq!(fs.calls, 2);
        assert_eq!(fs.failures, 1);
        assert_eq!(fs.unfinished, 0);
        assert_eq!(fs.mean_duration_ms(), 6.0);
        assert_eq!(fs.success_rate(), 0.5);

        let digest = &summary.capabilities["digest"];
        assert_eq!(digest.calls, 0);
        assert_eq!(digest.unfinished, 1);
    }
}
