//! Structured error types for call-scope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//!
//! Most engine faults are deliberately *not* errors: correlation misses,
//! registry misses and non-interrupting observer failures are logged and
//! answered with a proceed directive, because observation must never break
//! the observed program. What remains is the interrupting-observer case and
//! trace export I/O.

use call_scope_common::ListenerId;
use thiserror::Error;

use crate::event::EventKinds;
use crate::observer::ObserverError;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// An observer registered as interrupting failed; the instrumented call
    /// aborts with this error.
    #[error("observer {listener_id} failed handling {kind:?} event: {source}")]
    ObserverFailed {
        listener_id: ListenerId,
        kind: EventKinds,
        #[source]
        source: ObserverError,
    },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to serialize trace data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
