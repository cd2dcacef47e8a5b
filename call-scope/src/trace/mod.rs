//! Call-tree recording and export
//!
//! A ready-made advice listener that assembles every completed observation
//! root into a [`CallTrace`] tree and hands it over a channel, plus an
//! exporter that renders collected traces to Chrome Trace Event Format for
//! visualization in Perfetto or `chrome://tracing`.

pub mod export;
pub mod recorder;

pub use export::TraceExporter;
pub use recorder::{CallEdge, CallNode, CallOutcome, CallTrace, CallTraceRecorder};
