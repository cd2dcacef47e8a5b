//! # Call Scope - Event Correlation & Flow Control for Dynamic Instrumentation
//!
//! Call Scope is the runtime core of a dynamic instrumentation system: it
//! receives raw callbacks from weaved call sites in a running program,
//! reconstructs per-thread call-stack structure from them, dispatches
//! correlated events to registered observers, and lets an observer redirect
//! the instrumented call - force an early return, force a raised error, or
//! silence all further observation of the call tree.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Observed Program                           │
//! │              (methods rewritten by the weaver)                  │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ raw callbacks (entry/exit/call/line)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Call Scope (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐        │
//! │  │    Frame     │◀──│   Dispatch   │──▶│   Observer   │        │
//! │  │    Stack     │   │    Engine    │   │   Registry   │        │
//! │  └──────────────┘   └──────┬───────┘   └──────────────┘        │
//! │                           │ correlated events                  │
//! │                           ▼                                    │
//! │                    ┌──────────────┐   ┌──────────────┐         │
//! │                    │    Advice    │──▶│    Trace     │         │
//! │                    │    Adapter   │   │   Recorder   │         │
//! │                    └──────────────┘   └──────────────┘         │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ Directive (proceed / return / throw)
//!                         ▼
//!                   applied by the call site
//! ```
//!
//! ## Module Structure
//!
//! - [`dispatch`]: the engine core - per-thread frame stacks, the
//!   concurrent observer registry, and the dispatcher that turns raw
//!   callbacks into directives
//! - [`event`]: the correlated event model and subscription kinds
//! - [`observer`]: the raw observer trait and flow-control signals
//! - [`advice`]: the simplified before/after/call interface with
//!   parent/top call context and user attachments
//! - [`trace`]: call-tree recording and Chrome-trace export
//! - [`domain`]: structured error types
//!
//! Identifier, value and directive types shared with call sites live in
//! the `call-scope-common` crate and are re-exported here.
//!
//! ## Key Guarantees
//!
//! - **Crash safety**: callbacks that cannot be correlated (partial
//!   instrumentation, constructor delegation) are dropped silently; the
//!   observed program only ever sees a proceed directive for them.
//! - **Isolation**: a failing observer is logged and ignored unless it was
//!   registered as interrupting - observability failures never become
//!   correctness failures.
//! - **No blocking**: dispatch runs synchronously on the instrumented
//!   thread, touches only thread-local state plus one lock-free registry
//!   lookup, and always returns a directive before the call resumes.
//!
//! ## Typical Usage
//!
//! ```
//! use std::sync::Arc;
//! use call_scope::advice::{AdviceAdapter, AdviceListener};
//! use call_scope::dispatch::EventDispatcher;
//! use call_scope::observer::{FlowSignal, ObserveResult};
//! use call_scope::{Advice, ListenerId, MethodRef};
//!
//! struct Watcher;
//!
//! impl AdviceListener for Watcher {
//!     fn before(&self, advice: &Advice) -> ObserveResult {
//!         println!("entering {}", advice.method());
//!         Ok(FlowSignal::none())
//!     }
//! }
//!
//! let dispatcher = EventDispatcher::new();
//! dispatcher.activate(
//!     ListenerId(1),
//!     Arc::new(AdviceAdapter::new(Arc::new(Watcher))),
//!     AdviceAdapter::required_events(false, false),
//!     false,
//! );
//!
//! // The weaver drives the dispatcher from instrumented call sites:
//! let entry = dispatcher
//!     .handle_entry(
//!         ListenerId(1),
//!         Arc::new(MethodRef::new("demo.Service", "run", "()V")),
//!         None,
//!         Vec::new(),
//!     )
//!     .unwrap();
//! dispatcher
//!     .handle_return(ListenerId(1), entry.invoke_id, None)
//!     .unwrap();
//! ```

pub mod advice;
pub mod dispatch;
pub mod domain;
pub mod event;
pub mod observer;
pub mod trace;

// Re-export the boundary types call sites and observers both use.
pub use call_scope_common::{
    CallTarget, Directive, EntryDirective, ErrorValue, InvokeId, ListenerId, MethodRef, ProcessId,
    Value,
};

// Re-export the types most integrations touch.
pub use advice::{Advice, AdviceAdapter, AdviceListener};
pub use dispatch::{EventDispatcher, InvocationFrame, ObserverRegistry};
pub use domain::{DispatchError, ExportError};
pub use event::{Event, EventKinds};
pub use observer::{EventObserver, FlowSignal, ObserveResult, ObserverError};
