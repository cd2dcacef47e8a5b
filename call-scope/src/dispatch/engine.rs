//! Dispatch & flow-control engine
//!
//! [`EventDispatcher`] is the component weaved call sites talk to. One
//! handler exists per raw callback kind; each correlates the callback
//! against the calling thread's frame stack, invokes the registered
//! observer, interprets any flow-control signal the observer returns, and
//! hands a [`Directive`] back for the call site to apply.
//!
//! ## Crash safety
//!
//! Partial instrumentation is normal: a sub-call whose entry never fired
//! produces exit callbacks the stack cannot account for. Every such
//! correlation miss is dropped silently and answered with
//! [`Directive::Proceed`] - the observed program must never misbehave
//! because observation went wrong. The only exception is an observer
//! registered as *interrupting*, whose failures deliberately abort the
//! instrumented call.
//!
//! ## Execution model
//!
//! Dispatch runs synchronously on whichever thread hit the call site.
//! There is no queueing and no blocking; per-thread state is thread-local
//! and the observer registry is the only shared structure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use call_scope_common::{
    CallTarget, Directive, EntryDirective, ErrorValue, InvokeId, ListenerId, MethodRef, ProcessId,
    Value,
};
use log::{debug, warn};

use super::process::{self, ProcessState};
use super::reentry;
use super::registry::{ObserverRegistry, Registration};
use super::stack::InvocationFrame;
use crate::domain::DispatchError;
use crate::event::{Event, EventKinds};
use crate::observer::{EventObserver, FlowKind, FlowSignal, ObserveResult};

/// First invocation ID handed out by the sequencer.
const INVOKE_ID_BASE: u64 = 1000;

/// Result of one raw-callback dispatch.
///
/// `Err` occurs only when an interrupting observer fails; the call site
/// then aborts the instrumented call with that error.
pub type DispatchResult = Result<Directive, DispatchError>;

/// Where the frame an event was correlated to currently lives.
enum FrameSlot<'a> {
    /// Held by the dispatch code itself: a frame being opened at entry, or
    /// one just closed by a terminal event.
    Detached(&'a mut InvocationFrame),
    /// Still the innermost frame of the stack (nested-call/line events).
    Top,
}

/// Outcome payload of a terminal callback.
enum Exit {
    Return(Option<Value>),
    Exception(ErrorValue),
}

/// Flow-control redirection requested by an observer.
enum Forced {
    Return(Option<Value>),
    Throw(ErrorValue),
}

/// The event-correlation and flow-control engine
///
/// Owns the observer registry and the process-wide invocation-ID
/// sequencer. Cheap to share behind an `Arc`; all per-call mutable state is
/// thread-local.
pub struct EventDispatcher {
    registry: ObserverRegistry,
    invoke_sequencer: AtomicU64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        EventDispatcher {
            registry: ObserverRegistry::new(),
            invoke_sequencer: AtomicU64::new(INVOKE_ID_BASE),
        }
    }
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        EventDispatcher::default()
    }

    /// Activate `observer` under `listener_id` for the given event kinds.
    ///
    /// `interrupting` controls whether a failure of this observer aborts
    /// the instrumented call or is merely logged.
    pub fn activate(
        &self,
        listener_id: ListenerId,
        observer: Arc<dyn EventObserver>,
        subscribed: EventKinds,
        interrupting: bool,
    ) {
        self.registry
            .activate(listener_id, observer, subscribed, interrupting);
    }

    /// Deactivate the observer registered under `listener_id`.
    pub fn deactivate(&self, listener_id: ListenerId) {
        self.registry.deactivate(listener_id);
    }

    /// The shared observer registry.
    #[must_use]
    pub fn registry(&self) -> &ObserverRegistry {
        &self.registry
    }

    fn next_invoke_id(&self) -> InvokeId {
        InvokeId(self.invoke_sequencer.fetch_add(1, Ordering::Relaxed))
    }

    /// An instrumented method was entered.
    ///
    /// Allocates the invocation ID for this call and opens a frame for it.
    /// The call site must thread the returned ID through every later
    /// callback of the same call.
    ///
    /// # Errors
    ///
    /// Fails only when an interrupting observer fails; the call site then
    /// aborts the method with the error instead of running it.
    pub fn handle_entry(
        &self,
        listener_id: ListenerId,
        method: Arc<MethodRef>,
        target: Option<Value>,
        args: Vec<Value>,
    ) -> Result<EntryDirective, DispatchError> {
        let invoke_id = self.next_invoke_id();
        if reentry::active() {
            debug!("{listener_id} entry from observer code, proceeding untracked");
            return Ok(EntryDirective {
                invoke_id,
                directive: Directive::Proceed,
            });
        }
        let Some(registration) = self.registry.lookup(listener_id) else {
            debug!("{listener_id} not active, ignoring entry");
            return Ok(EntryDirective {
                invoke_id,
                directive: Directive::Proceed,
            });
        };

        let directive = process::with_state(
            listener_id,
            registration.activation_id(),
            ProcessId::from(invoke_id),
            |state| {
                if state.ignore_process {
                    // Bookkeeping only: the frame must exist so the
                    // matching exit keeps the stack balanced.
                    state.stack.push(InvocationFrame::new(invoke_id));
                    return Ok(Directive::Proceed);
                }

                let mut frame = InvocationFrame::new(invoke_id);
                let event = state.factory.make_entry(
                    state.process_id(),
                    invoke_id,
                    method,
                    target,
                    args,
                );
                let result = self.process_event(
                    &registration,
                    state,
                    &event,
                    &mut FrameSlot::Detached(&mut frame),
                );
                state.factory.release(event);

                // A forced outcome (or an interrupting failure) means the
                // call never executes and no terminal event will arrive,
                // so the frame never enters the stack.
                if let Ok(Directive::Proceed) = &result {
                    state.stack.push(frame);
                }
                result
            },
        )?;

        Ok(EntryDirective {
            invoke_id,
            directive,
        })
    }

    /// An instrumented method returned normally.
    ///
    /// # Errors
    ///
    /// Fails only when an interrupting observer fails.
    pub fn handle_return(
        &self,
        listener_id: ListenerId,
        invoke_id: InvokeId,
        value: Option<Value>,
    ) -> DispatchResult {
        self.handle_exit(listener_id, invoke_id, Exit::Return(value))
    }

    /// An instrumented method raised an error.
    ///
    /// # Errors
    ///
    /// Fails only when an interrupting observer fails.
    pub fn handle_exception(
        &self,
        listener_id: ListenerId,
        invoke_id: InvokeId,
        error: ErrorValue,
    ) -> DispatchResult {
        self.handle_exit(listener_id, invoke_id, Exit::Exception(error))
    }

    fn handle_exit(&self, listener_id: ListenerId, invoke_id: InvokeId, exit: Exit) -> DispatchResult {
        if reentry::active() {
            return Ok(Directive::Proceed);
        }
        let Some(registration) = self.registry.lookup(listener_id) else {
            debug!("{listener_id} not active, ignoring exit for {invoke_id}");
            return Ok(Directive::Proceed);
        };

        process::with_existing_state(listener_id, registration.activation_id(), |state| {
            let Some(mut frame) = state.stack.pop_expected(invoke_id) else {
                debug!("{listener_id} dropping uncorrelated exit for {invoke_id}");
                return Ok(Directive::Proceed);
            };

            if state.ignore_process {
                return Ok(Directive::Proceed);
            }

            if let Exit::Exception(error) = &exit {
                if state.take_exception_from_forced() {
                    // A forced error unwinding through a frame that did not
                    // request it: keep it moving without observing it twice.
                    return Ok(Directive::ThrowError(error.clone()));
                }
            }

            let event = match exit {
                Exit::Return(value) => state.factory.make_return(invoke_id, value),
                Exit::Exception(error) => state.factory.make_exception(invoke_id, error),
            };
            let result = self.process_event(
                &registration,
                state,
                &event,
                &mut FrameSlot::Detached(&mut frame),
            );
            state.factory.release(event);
            result
        })
        .unwrap_or_else(|| {
            debug!("{listener_id} exit for {invoke_id} without an open call tree");
            Ok(Directive::Proceed)
        })
    }

    /// A nested call is about to start inside invocation `invoke_id`.
    ///
    /// # Errors
    ///
    /// Fails only when an interrupting observer fails.
    pub fn handle_call_entry(
        &self,
        listener_id: ListenerId,
        invoke_id: InvokeId,
        target: CallTarget,
    ) -> DispatchResult {
        if reentry::active() {
            return Ok(Directive::Proceed);
        }
        let Some(registration) = self.registry.lookup(listener_id) else {
            debug!("{listener_id} not active, ignoring call-entry for {invoke_id}");
            return Ok(Directive::Proceed);
        };
        process::with_existing_state(listener_id, registration.activation_id(), |state| {
            // Cache the callee so the matching closer can be paired.
            match state.stack.peek_expected(invoke_id) {
                Some(frame) => frame.call_target = Some(target.clone()),
                None => {
                    debug!("{listener_id} dropping uncorrelated call-entry for {invoke_id}");
                    return Ok(Directive::Proceed);
                }
            }
            if state.ignore_process {
                return Ok(Directive::Proceed);
            }
            let event = state.factory.make_call_entry(invoke_id, target);
            let result =
                self.process_event(&registration, state, &event, &mut FrameSlot::Top);
            state.factory.release(event);
            result
        })
        .unwrap_or(Ok(Directive::Proceed))
    }

    /// The nested call inside invocation `invoke_id` returned normally.
    ///
    /// # Errors
    ///
    /// Fails only when an interrupting observer fails.
    pub fn handle_call_return(&self, listener_id: ListenerId, invoke_id: InvokeId) -> DispatchResult {
        if reentry::active() {
            return Ok(Directive::Proceed);
        }
        let Some(registration) = self.registry.lookup(listener_id) else {
            debug!("{listener_id} not active, ignoring call-return for {invoke_id}");
            return Ok(Directive::Proceed);
        };
        process::with_existing_state(listener_id, registration.activation_id(), |state| {
            let Some(frame) = state.stack.peek_expected(invoke_id) else {
                debug!("{listener_id} dropping uncorrelated call-return for {invoke_id}");
                return Ok(Directive::Proceed);
            };
            if frame.call_target.take().is_none() {
                debug!("{listener_id} call-return for {invoke_id} without a paired call-entry");
                return Ok(Directive::Proceed);
            }
            if state.ignore_process {
                return Ok(Directive::Proceed);
            }
            let event = state.factory.make_call_return(invoke_id);
            let result =
                self.process_event(&registration, state, &event, &mut FrameSlot::Top);
            state.factory.release(event);
            result
        })
        .unwrap_or(Ok(Directive::Proceed))
    }

    /// The nested call inside invocation `invoke_id` raised an error.
    ///
    /// # Errors
    ///
    /// Fails only when an interrupting observer fails.
    pub fn handle_call_exception(
        &self,
        listener_id: ListenerId,
        invoke_id: InvokeId,
        error_type: impl Into<String>,
    ) -> DispatchResult {
        if reentry::active() {
            return Ok(Directive::Proceed);
        }
        let Some(registration) = self.registry.lookup(listener_id) else {
            debug!("{listener_id} not active, ignoring call-exception for {invoke_id}");
            return Ok(Directive::Proceed);
        };
        let error_type = error_type.into();
        process::with_existing_state(listener_id, registration.activation_id(), |state| {
            let Some(frame) = state.stack.peek_expected(invoke_id) else {
                debug!("{listener_id} dropping uncorrelated call-exception for {invoke_id}");
                return Ok(Directive::Proceed);
            };
            if frame.call_target.take().is_none() {
                debug!("{listener_id} call-exception for {invoke_id} without a paired call-entry");
                return Ok(Directive::Proceed);
            }
            if state.ignore_process {
                return Ok(Directive::Proceed);
            }
            let event = state.factory.make_call_exception(invoke_id, error_type);
            let result =
                self.process_event(&registration, state, &event, &mut FrameSlot::Top);
            state.factory.release(event);
            result
        })
        .unwrap_or(Ok(Directive::Proceed))
    }

    /// A source line was reached inside invocation `invoke_id`.
    ///
    /// # Errors
    ///
    /// Fails only when an interrupting observer fails.
    pub fn handle_line(
        &self,
        listener_id: ListenerId,
        invoke_id: InvokeId,
        line: u32,
    ) -> DispatchResult {
        if reentry::active() {
            return Ok(Directive::Proceed);
        }
        let Some(registration) = self.registry.lookup(listener_id) else {
            debug!("{listener_id} not active, ignoring line event for {invoke_id}");
            return Ok(Directive::Proceed);
        };
        process::with_existing_state(listener_id, registration.activation_id(), |state| {
            if state.stack.peek_expected(invoke_id).is_none() {
                debug!("{listener_id} dropping uncorrelated line event for {invoke_id}");
                return Ok(Directive::Proceed);
            }
            if state.ignore_process {
                return Ok(Directive::Proceed);
            }
            let event = state.factory.make_line(invoke_id, line);
            let result =
                self.process_event(&registration, state, &event, &mut FrameSlot::Top);
            state.factory.release(event);
            result
        })
        .unwrap_or(Ok(Directive::Proceed))
    }

    /// Filter by subscription, invoke the observer, and interpret the
    /// flow-control signal it returns.
    fn process_event(
        &self,
        registration: &Registration,
        state: &mut ProcessState,
        event: &Event,
        slot: &mut FrameSlot<'_>,
    ) -> DispatchResult {
        if !registration.subscribed().contains(event.kind()) {
            return Ok(Directive::Proceed);
        }

        match Self::invoke_observer(registration, state, event, slot) {
            Ok(signal) => {
                if signal.suppress() {
                    state.ignore_process = true;
                }
                match signal.kind() {
                    FlowKind::NoIntervention => Ok(Directive::Proceed),
                    FlowKind::ReturnImmediately(value) => {
                        if signal.suppress() {
                            debug!(
                                "{} forced return for {} with suppression, skipping compensation",
                                registration.listener_id(),
                                event.invoke_id()
                            );
                        } else {
                            self.compensate(
                                registration,
                                state,
                                event,
                                slot,
                                Forced::Return(value.clone()),
                            );
                        }
                        Ok(Directive::ReturnValue(value.clone()))
                    }
                    FlowKind::ThrowImmediately(error) => {
                        if signal.suppress() {
                            debug!(
                                "{} forced throw for {} with suppression, skipping compensation",
                                registration.listener_id(),
                                event.invoke_id()
                            );
                        } else {
                            if event.kind() != EventKinds::EXCEPTION {
                                // The forced error will surface as this
                                // frame's (or an ancestor's) exception
                                // event; that one must not be re-observed.
                                state.mark_exception_from_forced();
                            }
                            self.compensate(
                                registration,
                                state,
                                event,
                                slot,
                                Forced::Throw(error.clone()),
                            );
                        }
                        Ok(Directive::ThrowError(error.clone()))
                    }
                }
            }
            Err(source) => {
                if registration.interrupting() {
                    Err(DispatchError::ObserverFailed {
                        listener_id: registration.listener_id(),
                        kind: event.kind(),
                        source,
                    })
                } else {
                    warn!(
                        "{} failed handling {:?} for {}: {source}",
                        registration.listener_id(),
                        event.kind(),
                        event.invoke_id()
                    );
                    Ok(Directive::Proceed)
                }
            }
        }
    }

    /// Redispatch the forced outcome to the same observer as a synthetic
    /// event, so observers written against the forced-event taxonomy see
    /// the redirection they caused. Failures here are logged and swallowed;
    /// they must never mask the original directive.
    fn compensate(
        &self,
        registration: &Registration,
        state: &mut ProcessState,
        origin: &Event,
        slot: &mut FrameSlot<'_>,
        forced: Forced,
    ) {
        let kind = match &forced {
            Forced::Return(_) => EventKinds::FORCED_RETURN,
            Forced::Throw(_) => EventKinds::FORCED_THROW,
        };
        if !registration.subscribed().contains(kind) {
            return;
        }

        let invoke_id = origin.invoke_id();
        let event = match forced {
            Forced::Return(value) => state.factory.make_forced_return(invoke_id, value),
            Forced::Throw(error) => state.factory.make_forced_throw(invoke_id, error),
        };
        match Self::invoke_observer(registration, state, &event, slot) {
            Ok(signal) if !signal.is_noop() => debug!(
                "{} raised a flow signal while compensating {kind:?} for {invoke_id}, ignoring",
                registration.listener_id()
            ),
            Ok(_) => {}
            Err(error) => warn!(
                "{} failed handling compensating {kind:?} for {invoke_id}: {error}",
                registration.listener_id()
            ),
        }
        state.factory.release(event);
    }

    /// Invoke the observer under the reentry guard, against whichever frame
    /// the event was correlated to.
    fn invoke_observer(
        registration: &Registration,
        state: &mut ProcessState,
        event: &Event,
        slot: &mut FrameSlot<'_>,
    ) -> ObserveResult {
        let observer = registration.observer();
        match slot {
            FrameSlot::Detached(frame) => {
                reentry::guarded(|| observer.on_event(event, &mut **frame))
            }
            FrameSlot::Top => match state.stack.top_mut() {
                Some(frame) => reentry::guarded(|| observer.on_event(event, frame)),
                None => Ok(FlowSignal::none()),
            },
        }
    }
}
