//! Chrome trace export
//!
//! Renders recorded [`CallTrace`]s to Chrome Trace Event Format JSON,
//! viewable in Perfetto, Speedscope or `chrome://tracing`. Every invocation
//! becomes a begin/end pair on a lane named after its call tree, so nested
//! instrumented calls stack visually the way they nested at runtime.

use std::collections::HashMap;
use std::io::Write;

use serde::Serialize;
use serde_json::Value as JsonValue;

use super::recorder::{CallNode, CallOutcome, CallTrace};
use crate::domain::ExportError;

/// Chrome Trace Event format
/// Spec: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize)]
struct ChromeTraceEvent {
    /// Event name (the invocation's `class#method`)
    name: String,
    /// Category for filtering/coloring
    cat: String,
    /// Phase: "B" = begin, "E" = end, "M" = metadata
    ph: String,
    /// Timestamp in microseconds
    ts: f64,
    /// Process lane (constant; one observed program per export)
    pid: u64,
    /// Thread lane (the call tree ID)
    tid: u64,
    /// Optional arguments (metadata)
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<HashMap<String, JsonValue>>,
}

/// Chrome Trace Format container
#[derive(Debug, Serialize)]
struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<ChromeTraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: String,
}

const EXPORT_PID: u64 = 1;

/// Collects call traces and writes them out as one Chrome trace
#[derive(Debug, Default)]
pub struct TraceExporter {
    traces: Vec<CallTrace>,
}

impl TraceExporter {
    #[must_use]
    pub fn new() -> Self {
        TraceExporter::default()
    }

    /// Add a completed trace to the export set.
    pub fn add_trace(&mut self, trace: CallTrace) {
        self.traces.push(trace);
    }

    /// Number of traces collected so far.
    #[must_use]
    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }

    /// Write all collected traces to `writer` as Chrome trace JSON.
    ///
    /// Accepts any `Write` implementation, so tests can render into a
    /// buffer and production code into a file or stdout.
    ///
    /// # Errors
    ///
    /// Fails when serialization or the underlying writer fails.
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        let mut events = Vec::new();

        for trace in &self.traces {
            push_node_events(&trace.root, trace.process_id, &mut events);

            // Name the lane after its call tree.
            let mut args = HashMap::new();
            args.insert(
                "name".to_string(),
                serde_json::json!(format!("process:{}", trace.process_id)),
            );
            events.push(ChromeTraceEvent {
                name: "thread_name".to_string(),
                cat: String::new(),
                ph: "M".to_string(),
                ts: 0.0,
                pid: EXPORT_PID,
                tid: trace.process_id,
                args: Some(args),
            });
        }

        let chrome = ChromeTrace {
            trace_events: events,
            display_time_unit: "ms".to_string(),
        };
        serde_json::to_writer_pretty(writer, &chrome)?;
        Ok(())
    }
}

#[allow(clippy::cast_precision_loss)]
fn push_node_events(node: &CallNode, tid: u64, events: &mut Vec<ChromeTraceEvent>) {
    let mut args = HashMap::new();
    args.insert("invoke_id".to_string(), serde_json::json!(node.invoke_id));
    if !node.calls.is_empty() {
        args.insert(
            "nested_calls".to_string(),
            serde_json::json!(node.calls.len()),
        );
    }
    if let CallOutcome::Raised { error_type } = &node.outcome {
        args.insert("error_type".to_string(), serde_json::json!(error_type));
    }

    events.push(ChromeTraceEvent {
        name: node.method.clone(),
        cat: "invocation".to_string(),
        ph: "B".to_string(),
        ts: node.start_us as f64,
        pid: EXPORT_PID,
        tid,
        args: Some(args),
    });

    for child in &node.children {
        push_node_events(child, tid, events);
    }

    events.push(ChromeTraceEvent {
        name: node.method.clone(),
        cat: "invocation".to_string(),
        ph: "E".to_string(),
        ts: (node.start_us + node.duration_us) as f64,
        pid: EXPORT_PID,
        tid,
        args: None,
    });
}
