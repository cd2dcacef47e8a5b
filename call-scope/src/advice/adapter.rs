//! Event-to-advice adapter
//!
//! [`AdviceAdapter`] is a raw [`EventObserver`] that translates the event
//! stream into [`AdviceListener`] callbacks. It keeps its own per-thread
//! stack of advice nodes, mirrored against the engine's frame stack with
//! the same invoke-ID-guarded pop: a node whose events went missing is
//! skipped silently, never mispaired.
//!
//! Stacks are keyed by an integer adapter ID, so any number of adapters can
//! coexist on the same thread without sharing state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use call_scope_common::{CallTarget, InvokeId};

use super::listener::AdviceListener;
use super::model::Advice;
use crate::dispatch::InvocationFrame;
use crate::event::{Event, EventKinds};
use crate::observer::{EventObserver, FlowSignal, ObserveResult};

static ADAPTER_SEQUENCER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static OP_STACKS: RefCell<HashMap<u64, OpStack>> = RefCell::new(HashMap::new());
}

/// Advice node plus the transient descriptor of its in-flight nested call
struct WrapAdvice {
    advice: Rc<Advice>,
    call_target: Option<CallTarget>,
}

/// Secondary per-thread stack of advice nodes, innermost last
#[derive(Default)]
struct OpStack {
    nodes: Vec<WrapAdvice>,
}

impl OpStack {
    fn push(&mut self, advice: Rc<Advice>) {
        self.nodes.push(WrapAdvice {
            advice,
            call_target: None,
        });
    }

    /// Pop the innermost node, but only if it wraps `expected`.
    fn pop_expected(&mut self, expected: InvokeId) -> Option<WrapAdvice> {
        if self.nodes.last()?.advice.invoke_id() == expected {
            self.nodes.pop()
        } else {
            None
        }
    }

    /// Borrow the innermost node, but only if it wraps `expected`.
    fn peek_expected(&mut self, expected: InvokeId) -> Option<&mut WrapAdvice> {
        match self.nodes.last_mut() {
            Some(wrap) if wrap.advice.invoke_id() == expected => Some(wrap),
            _ => None,
        }
    }

    fn peek(&self) -> Option<&WrapAdvice> {
        self.nodes.last()
    }

    fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Adapter turning correlated events into advice callbacks
pub struct AdviceAdapter {
    adapter_id: u64,
    listener: Arc<dyn AdviceListener>,
}

impl AdviceAdapter {
    #[must_use]
    pub fn new(listener: Arc<dyn AdviceListener>) -> Self {
        AdviceAdapter {
            adapter_id: ADAPTER_SEQUENCER.fetch_add(1, Ordering::Relaxed),
            listener,
        }
    }

    /// The event kinds an adapter-backed registration needs.
    ///
    /// Method-level callbacks always need the advice group; add the call
    /// and line kinds only when the listener overrides those callbacks,
    /// since unsubscribed kinds skip observer invocation entirely.
    #[must_use]
    pub fn required_events(with_calls: bool, with_lines: bool) -> EventKinds {
        let mut kinds = EventKinds::ADVICE;
        if with_calls {
            kinds |= EventKinds::CALLS;
        }
        if with_lines {
            kinds |= EventKinds::LINE;
        }
        kinds
    }

    fn relay_event(&self, stack: &mut OpStack, event: &Event) -> ObserveResult {
        match event {
            Event::Entry {
                process_id,
                invoke_id,
                method,
                target,
                args,
            } => {
                // Link the node under the current top of stack; the
                // outermost invocation links to itself.
                let links = stack.peek().map(|wrap| {
                    let parent = Rc::clone(&wrap.advice);
                    let top = parent
                        .process_top()
                        .unwrap_or_else(|| Rc::clone(&parent));
                    (parent, top)
                });
                let advice = Advice::new(
                    *process_id,
                    *invoke_id,
                    Arc::clone(method),
                    target.clone(),
                    args.clone(),
                    links.as_ref().map(|(parent, top)| (parent, top)),
                );
                stack.push(Rc::clone(&advice));
                self.listener.before(&advice)
            }

            Event::Return { invoke_id, value } => {
                let Some(wrap) = stack.pop_expected(*invoke_id) else {
                    return Ok(FlowSignal::none());
                };
                wrap.advice.apply_return(value.clone());
                let on_returning = self.listener.after_returning(&wrap.advice);
                let on_finish = self.listener.after(&wrap.advice);
                sequence(on_returning, on_finish)
            }

            Event::Exception { invoke_id, error } => {
                let Some(wrap) = stack.pop_expected(*invoke_id) else {
                    return Ok(FlowSignal::none());
                };
                wrap.advice.apply_raise(error.clone());
                let on_throwing = self.listener.after_throwing(&wrap.advice);
                let on_finish = self.listener.after(&wrap.advice);
                sequence(on_throwing, on_finish)
            }

            // A redirected call gets no after callbacks; the pop merely
            // realigns this stack with the engine's.
            Event::ForcedReturn { invoke_id, .. } | Event::ForcedThrow { invoke_id, .. } => {
                let _ = stack.pop_expected(*invoke_id);
                Ok(FlowSignal::none())
            }

            Event::CallEntry { invoke_id, target } => {
                let Some(wrap) = stack.peek_expected(*invoke_id) else {
                    return Ok(FlowSignal::none());
                };
                wrap.call_target = Some(target.clone());
                let advice = Rc::clone(&wrap.advice);
                self.listener.before_call(&advice, target)
            }

            Event::CallReturn { invoke_id } => {
                let Some(wrap) = stack.peek_expected(*invoke_id) else {
                    return Ok(FlowSignal::none());
                };
                // No cached target means before_call never ran; skip the
                // closers too rather than report a half-seen call.
                let Some(call_target) = wrap.call_target.take() else {
                    return Ok(FlowSignal::none());
                };
                let advice = Rc::clone(&wrap.advice);
                let on_returning = self.listener.after_call_returning(&advice, &call_target);
                let on_finish = self.listener.after_call(&advice, &call_target, None);
                sequence(on_returning, on_finish)
            }

            Event::CallException {
                invoke_id,
                error_type,
            } => {
                let Some(wrap) = stack.peek_expected(*invoke_id) else {
                    return Ok(FlowSignal::none());
                };
                let Some(call_target) = wrap.call_target.take() else {
                    return Ok(FlowSignal::none());
                };
                let advice = Rc::clone(&wrap.advice);
                let on_throwing =
                    self.listener
                        .after_call_throwing(&advice, &call_target, error_type);
                let on_finish =
                    self.listener
                        .after_call(&advice, &call_target, Some(error_type));
                sequence(on_throwing, on_finish)
            }

            Event::Line { invoke_id, line } => {
                let Some(wrap) = stack.peek_expected(*invoke_id) else {
                    return Ok(FlowSignal::none());
                };
                let advice = Rc::clone(&wrap.advice);
                self.listener.before_line(&advice, *line)
            }
        }
    }
}

impl EventObserver for AdviceAdapter {
    fn on_event(&self, event: &Event, _frame: &mut InvocationFrame) -> ObserveResult {
        OP_STACKS.with(|cell| {
            let mut stacks = cell.borrow_mut();
            let stack = stacks.entry(self.adapter_id).or_default();
            let result = self.relay_event(stack, event);
            // Mirror the engine's teardown: release the thread-local slot
            // as soon as the tree is fully unwound.
            if stack.is_empty() {
                stacks.remove(&self.adapter_id);
            }
            result
        })
    }
}

/// Try/finally composition: the `after*` callback always runs, and its
/// signal (or error) supersedes the preceding callback's.
fn sequence(first: ObserveResult, second: ObserveResult) -> ObserveResult {
    match &second {
        Ok(signal) if signal.is_noop() => first,
        _ => second,
    }
}
