//! Observer API: event callbacks and flow-control signals
//!
//! Observers receive correlated [`Event`]s and answer with a
//! [`FlowSignal`]: a plain value describing whether the instrumented call
//! should proceed, return early, or raise an error. Flow control is never
//! expressed by unwinding; an `Err` from an observer means the observer
//! itself failed, which the engine logs and ignores unless the observer was
//! registered as interrupting.

use call_scope_common::{ErrorValue, Value};

use crate::dispatch::InvocationFrame;
use crate::event::Event;

/// Error raised by an observer callback.
///
/// Distinct from [`ErrorValue`]: this is a fault of the *observer*, not an
/// error of the observed program.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// What an observer callback returns.
pub type ObserveResult = Result<FlowSignal, ObserverError>;

/// Requested redirection of the instrumented call
#[derive(Debug, Clone)]
pub enum FlowKind {
    /// Let the call continue unchanged
    NoIntervention,
    /// Abandon the call and return this value immediately
    ReturnImmediately(Option<Value>),
    /// Abandon the call and raise this error immediately
    ThrowImmediately(ErrorValue),
}

/// Flow-control signal returned from an observer callback
///
/// Built with [`none`](Self::none), [`return_immediately`](Self::return_immediately)
/// or [`throw_immediately`](Self::throw_immediately); any of the three can
/// additionally request that the rest of the call tree go unobserved via
/// [`suppressing`](Self::suppressing).
#[derive(Debug, Clone)]
pub struct FlowSignal {
    kind: FlowKind,
    suppress: bool,
}

impl FlowSignal {
    /// No intervention: the call proceeds.
    #[must_use]
    pub fn none() -> Self {
        FlowSignal {
            kind: FlowKind::NoIntervention,
            suppress: false,
        }
    }

    /// Force the call to return `value` without (further) executing.
    #[must_use]
    pub fn return_immediately(value: Option<Value>) -> Self {
        FlowSignal {
            kind: FlowKind::ReturnImmediately(value),
            suppress: false,
        }
    }

    /// Force the call to raise `error` without (further) executing.
    #[must_use]
    pub fn throw_immediately(error: ErrorValue) -> Self {
        FlowSignal {
            kind: FlowKind::ThrowImmediately(error),
            suppress: false,
        }
    }

    /// Additionally silence all further observation of this call tree.
    ///
    /// The suppression is sticky until the tree's outermost frame closes;
    /// stack bookkeeping continues underneath it.
    #[must_use]
    pub fn suppressing(mut self) -> Self {
        self.suppress = true;
        self
    }

    /// The requested redirection.
    #[must_use]
    pub fn kind(&self) -> &FlowKind {
        &self.kind
    }

    /// Whether further observation of the tree should be suppressed.
    #[must_use]
    pub fn suppress(&self) -> bool {
        self.suppress
    }

    /// True when the signal changes nothing at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self.kind, FlowKind::NoIntervention) && !self.suppress
    }
}

/// An observer of correlated instrumentation events
///
/// Implementations are shared across every instrumented thread and must be
/// `Send + Sync`; per-invocation state belongs in the frame attachment, not
/// in the observer.
pub trait EventObserver: Send + Sync {
    /// Handle one correlated event.
    ///
    /// `frame` is the invocation frame the event was correlated to: the
    /// freshly opened frame for an entry, the just-closed frame for a
    /// terminal event, and the innermost open frame for nested-call and
    /// line events. The frame's attachment slot lives as long as the frame
    /// and is only ever touched by the observer.
    fn on_event(&self, event: &Event, frame: &mut InvocationFrame) -> ObserveResult;
}
