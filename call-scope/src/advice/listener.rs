//! The simplified before/after/call observer interface
//!
//! Advice listeners see one [`Advice`] per instrumented invocation instead
//! of raw events. Every callback defaults to a no-op; implementations
//! override only what they care about. Any callback may redirect the
//! instrumented call by returning a non-trivial [`FlowSignal`], exactly as
//! a raw observer would.

use call_scope_common::CallTarget;

use super::model::Advice;
use crate::observer::{FlowSignal, ObserveResult};

/// Callbacks around one instrumented invocation
///
/// Callback order for a normal call: `before`, any number of
/// `before_call`/`after_call_*`/`before_line`, then `after_returning` (or
/// `after_throwing`) and finally, unconditionally, `after`. A call
/// redirected by a flow signal gets no `after` callbacks at all.
#[allow(unused_variables)]
pub trait AdviceListener: Send + Sync {
    /// The invocation is about to run; entry context is populated.
    fn before(&self, advice: &Advice) -> ObserveResult {
        Ok(FlowSignal::none())
    }

    /// The invocation returned normally; `advice.return_value()` is set.
    fn after_returning(&self, advice: &Advice) -> ObserveResult {
        Ok(FlowSignal::none())
    }

    /// The invocation raised an error; `advice.error()` is set.
    fn after_throwing(&self, advice: &Advice) -> ObserveResult {
        Ok(FlowSignal::none())
    }

    /// The invocation finished, however it finished. Runs after
    /// `after_returning`/`after_throwing`; a signal returned here
    /// supersedes theirs.
    fn after(&self, advice: &Advice) -> ObserveResult {
        Ok(FlowSignal::none())
    }

    /// A nested call is about to start inside the invocation.
    fn before_call(&self, advice: &Advice, target: &CallTarget) -> ObserveResult {
        Ok(FlowSignal::none())
    }

    /// The nested call returned normally.
    fn after_call_returning(&self, advice: &Advice, target: &CallTarget) -> ObserveResult {
        Ok(FlowSignal::none())
    }

    /// The nested call raised an error of type `error_type`.
    fn after_call_throwing(
        &self,
        advice: &Advice,
        target: &CallTarget,
        error_type: &str,
    ) -> ObserveResult {
        Ok(FlowSignal::none())
    }

    /// The nested call finished, however it finished. `error_type` is
    /// `Some` when it raised.
    fn after_call(
        &self,
        advice: &Advice,
        target: &CallTarget,
        error_type: Option<&str>,
    ) -> ObserveResult {
        Ok(FlowSignal::none())
    }

    /// A source line was reached inside the invocation.
    fn before_line(&self, advice: &Advice, line: u32) -> ObserveResult {
        Ok(FlowSignal::none())
    }
}
