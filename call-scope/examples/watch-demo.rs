//! Watch demo: observe and redirect simulated instrumented calls
//!
//! Plays both sides of the instrumentation boundary in one process: the
//! `main` function acts as the weaver-generated call sites of a tiny
//! "service", while a watch-style advice listener observes every call,
//! prints what it sees, and short-circuits requests for a blocked user.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=debug cargo run --example watch-demo
//! ```

use std::sync::Arc;

use anyhow::Result;
use call_scope::advice::{AdviceAdapter, AdviceListener};
use call_scope::dispatch::EventDispatcher;
use call_scope::observer::{FlowSignal, ObserveResult};
use call_scope::{
    Advice, CallTarget, Directive, EntryDirective, ListenerId, MethodRef, Value,
};
use log::info;

const WATCH_LISTENER: ListenerId = ListenerId(1);

/// Watch listener: log every invocation, block one specific user.
struct Watcher;

impl AdviceListener for Watcher {
    fn before(&self, advice: &Advice) -> ObserveResult {
        let user = advice
            .args()
            .first()
            .and_then(|arg| arg.downcast_ref::<String>())
            .cloned()
            .unwrap_or_default();
        info!("before {} user={user}", advice.method());

        // Redirect without touching the service: blocked users get a
        // canned response instead of running the method body.
        if user == "blocked" {
            return Ok(FlowSignal::return_immediately(Some(Value::new(
                "rejected".to_string(),
            ))));
        }
        Ok(FlowSignal::none())
    }

    fn after_returning(&self, advice: &Advice) -> ObserveResult {
        let value = advice
            .return_value()
            .and_then(|value| value.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        info!("after  {} -> {value:?}", advice.method());
        Ok(FlowSignal::none())
    }

    fn before_call(&self, advice: &Advice, target: &CallTarget) -> ObserveResult {
        info!("       {} calls {target}", advice.method());
        Ok(FlowSignal::none())
    }
}

/// The instrumented "service": every method plays its own weaved call
/// site, reporting entry/exit to the dispatcher and applying directives.
fn handle_request(dispatcher: &EventDispatcher, user: &str) -> Result<String> {
    let method = Arc::new(MethodRef::new("demo.Service", "handle", "(Ljava/lang/String;)Ljava/lang/String;"));
    let EntryDirective {
        invoke_id,
        directive,
    } = dispatcher.handle_entry(
        WATCH_LISTENER,
        method,
        None,
        vec![Value::new(user.to_string())],
    )?;

    // The weaver applies a forced return before the body runs.
    if let Directive::ReturnValue(value) = directive {
        let response = value
            .and_then(|v| v.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        return Ok(response);
    }

    // Method body: one nested (uninstrumented) call, reported around it.
    dispatcher.handle_call_entry(
        WATCH_LISTENER,
        invoke_id,
        CallTarget::new(27, "demo.Store", "lookup", "(Ljava/lang/String;)V"),
    )?;
    let response = format!("hello {user}");
    dispatcher.handle_call_return(WATCH_LISTENER, invoke_id)?;

    dispatcher.handle_return(
        WATCH_LISTENER,
        invoke_id,
        Some(Value::new(response.clone())),
    )?;
    Ok(response)
}

fn main() -> Result<()> {
    env_logger::init();

    let dispatcher = EventDispatcher::new();
    dispatcher.activate(
        WATCH_LISTENER,
        Arc::new(AdviceAdapter::new(Arc::new(Watcher))),
        AdviceAdapter::required_events(true, false),
        false,
    );

    for user in ["alice", "blocked", "bob"] {
        let response = handle_request(&dispatcher, user)?;
        println!("{user} -> {response}");
    }

    dispatcher.deactivate(WATCH_LISTENER);
    Ok(())
}
