//! Event model for instrumentation callbacks
//!
//! Every raw callback a weaved call site emits is correlated into exactly
//! one [`Event`] before observers see it. Events are tagged with the
//! invocation they belong to; only [`Event::Entry`] opens a new frame, all
//! other variants reference an already-open one.
//!
//! [`EventKinds`] is the subscription set observers register with: an
//! observer is only invoked for kinds it asked for, although stack
//! bookkeeping happens regardless.

use std::sync::Arc;

use bitflags::bitflags;
use call_scope_common::{CallTarget, ErrorValue, InvokeId, MethodRef, ProcessId, Value};

mod factory;

pub(crate) use factory::EventFactory;

bitflags! {
    /// Set of event kinds an observer subscribes to
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventKinds: u16 {
        /// Instrumented method entered
        const ENTRY = 1 << 0;
        /// Instrumented method returned normally
        const RETURN = 1 << 1;
        /// Instrumented method raised an error
        const EXCEPTION = 1 << 2;
        /// An observer forced the method to return early
        const FORCED_RETURN = 1 << 3;
        /// An observer forced the method to raise an error
        const FORCED_THROW = 1 << 4;
        /// Nested call about to start inside an instrumented method
        const CALL_ENTRY = 1 << 5;
        /// Nested call returned normally
        const CALL_RETURN = 1 << 6;
        /// Nested call raised an error
        const CALL_EXCEPTION = 1 << 7;
        /// Source line reached inside an instrumented method
        const LINE = 1 << 8;

        /// Everything the advice adapter needs for before/after callbacks
        const ADVICE = Self::ENTRY.bits()
            | Self::RETURN.bits()
            | Self::EXCEPTION.bits()
            | Self::FORCED_RETURN.bits()
            | Self::FORCED_THROW.bits();
        /// Nested-call kinds, for advice listeners that watch call edges
        const CALLS = Self::CALL_ENTRY.bits()
            | Self::CALL_RETURN.bits()
            | Self::CALL_EXCEPTION.bits();
    }
}

/// A correlated instrumentation event
///
/// Constructed by the engine from a raw callback once the callback has been
/// matched against the thread's frame stack. Observers receive events by
/// reference and must not assume they outlive the callback: event storage
/// is pooled per call tree and recycled after every dispatch.
#[derive(Debug)]
pub enum Event {
    /// An instrumented method was entered
    Entry {
        /// Call tree this invocation belongs to
        process_id: ProcessId,
        /// Invocation ID freshly assigned to this call
        invoke_id: InvokeId,
        /// The method being entered
        method: Arc<MethodRef>,
        /// Receiver of the call, if any
        target: Option<Value>,
        /// Call arguments
        args: Vec<Value>,
    },
    /// An instrumented method returned normally
    Return {
        invoke_id: InvokeId,
        /// The returned value (`None` for void returns)
        value: Option<Value>,
    },
    /// An instrumented method raised an error
    Exception {
        invoke_id: InvokeId,
        error: ErrorValue,
    },
    /// Compensating event: an observer forced an early return
    ForcedReturn {
        invoke_id: InvokeId,
        value: Option<Value>,
    },
    /// Compensating event: an observer forced an error
    ForcedThrow {
        invoke_id: InvokeId,
        error: ErrorValue,
    },
    /// A nested call is about to start inside the invocation
    CallEntry {
        invoke_id: InvokeId,
        /// Callee descriptor, including the call-site line
        target: CallTarget,
    },
    /// The current nested call returned normally
    CallReturn { invoke_id: InvokeId },
    /// The current nested call raised an error
    CallException {
        invoke_id: InvokeId,
        /// Type name of the raised error, as reported by the call site
        error_type: String,
    },
    /// A source line was reached inside the invocation
    Line { invoke_id: InvokeId, line: u32 },
}

impl Event {
    /// The subscription flag matching this event.
    #[must_use]
    pub fn kind(&self) -> EventKinds {
        match self {
            Event::Entry { .. } => EventKinds::ENTRY,
            Event::Return { .. } => EventKinds::RETURN,
            Event::Exception { .. } => EventKinds::EXCEPTION,
            Event::ForcedReturn { .. } => EventKinds::FORCED_RETURN,
            Event::ForcedThrow { .. } => EventKinds::FORCED_THROW,
            Event::CallEntry { .. } => EventKinds::CALL_ENTRY,
            Event::CallReturn { .. } => EventKinds::CALL_RETURN,
            Event::CallException { .. } => EventKinds::CALL_EXCEPTION,
            Event::Line { .. } => EventKinds::LINE,
        }
    }

    /// The invocation this event belongs to.
    #[must_use]
    pub fn invoke_id(&self) -> InvokeId {
        match self {
            Event::Entry { invoke_id, .. }
            | Event::Return { invoke_id, .. }
            | Event::Exception { invoke_id, .. }
            | Event::ForcedReturn { invoke_id, .. }
            | Event::ForcedThrow { invoke_id, .. }
            | Event::CallEntry { invoke_id, .. }
            | Event::CallReturn { invoke_id }
            | Event::CallException { invoke_id, .. }
            | Event::Line { invoke_id, .. } => *invoke_id,
        }
    }
}
