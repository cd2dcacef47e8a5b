//! Pooled event construction
//!
//! One [`EventFactory`] lives inside each per-thread process state, so no
//! locking is involved. The factory hands out boxed events and takes them
//! back after every dispatch; recycled boxes avoid an allocation per
//! callback on the hot path.

use std::sync::Arc;

use call_scope_common::{CallTarget, ErrorValue, InvokeId, MethodRef, ProcessId, Value};

use super::Event;

/// Upper bound on retained event boxes per call tree.
///
/// A tree rarely has more than one event in flight at a time (a dispatch
/// plus at most one compensating event), so a small cap is plenty.
const MAX_POOLED: usize = 8;

/// Per-process-state event pool
///
/// `make_*` acquires an event (reusing a pooled box when one is free) and
/// `release` returns it. Release clears the payload so a pooled slot never
/// keeps receiver/argument values of the observed program alive between
/// dispatches.
#[derive(Debug, Default)]
pub(crate) struct EventFactory {
    free: Vec<Box<Event>>,
}

impl EventFactory {
    pub(crate) fn new() -> Self {
        EventFactory::default()
    }

    fn make(&mut self, event: Event) -> Box<Event> {
        match self.free.pop() {
            Some(mut slot) => {
                *slot = event;
                slot
            }
            None => Box::new(event),
        }
    }

    pub(crate) fn make_entry(
        &mut self,
        process_id: ProcessId,
        invoke_id: InvokeId,
        method: Arc<MethodRef>,
        target: Option<Value>,
        args: Vec<Value>,
    ) -> Box<Event> {
        self.make(Event::Entry {
            process_id,
            invoke_id,
            method,
            target,
            args,
        })
    }

    pub(crate) fn make_return(&mut self, invoke_id: InvokeId, value: Option<Value>) -> Box<Event> {
        self.make(Event::Return { invoke_id, value })
    }

    pub(crate) fn make_exception(&mut self, invoke_id: InvokeId, error: ErrorValue) -> Box<Event> {
        self.make(Event::Exception { invoke_id, error })
    }

    pub(crate) fn make_forced_return(
        &mut self,
        invoke_id: InvokeId,
        value: Option<Value>,
    ) -> Box<Event> {
        self.make(Event::ForcedReturn { invoke_id, value })
    }

    pub(crate) fn make_forced_throw(
        &mut self,
        invoke_id: InvokeId,
        error: ErrorValue,
    ) -> Box<Event> {
        self.make(Event::ForcedThrow { invoke_id, error })
    }

    pub(crate) fn make_call_entry(
        &mut self,
        invoke_id: InvokeId,
        target: CallTarget,
    ) -> Box<Event> {
        self.make(Event::CallEntry { invoke_id, target })
    }

    pub(crate) fn make_call_return(&mut self, invoke_id: InvokeId) -> Box<Event> {
        self.make(Event::CallReturn { invoke_id })
    }

    pub(crate) fn make_call_exception(
        &mut self,
        invoke_id: InvokeId,
        error_type: String,
    ) -> Box<Event> {
        self.make(Event::CallException {
            invoke_id,
            error_type,
        })
    }

    pub(crate) fn make_line(&mut self, invoke_id: InvokeId, line: u32) -> Box<Event> {
        self.make(Event::Line { invoke_id, line })
    }

    /// Return an event to the pool.
    ///
    /// The slot is overwritten with a payload-free variant before being
    /// retained, dropping any program values it referenced.
    pub(crate) fn release(&mut self, mut event: Box<Event>) {
        if self.free.len() < MAX_POOLED {
            *event = Event::Line {
                invoke_id: InvokeId(0),
                line: 0,
            };
            self.free.push(event);
        }
    }
}
