//! Flow-control behavior: forced returns and throws, compensating events,
//! suppression, and observer-failure isolation.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use call_scope::dispatch::EventDispatcher;
use call_scope::observer::{EventObserver, FlowSignal, ObserveResult};
use call_scope::{
    Directive, ErrorValue, Event, EventKinds, InvocationFrame, ListenerId, MethodRef, Value,
};

static NEXT_LISTENER: AtomicU32 = AtomicU32::new(1000);

fn fresh_listener() -> ListenerId {
    ListenerId(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed))
}

fn method() -> Arc<MethodRef> {
    Arc::new(MethodRef::new("com.example.Service", "handle", "()V"))
}

fn raised() -> ErrorValue {
    ErrorValue::new(std::io::Error::new(
        std::io::ErrorKind::Other,
        "service exploded",
    ))
}

/// Records every event and answers with a scripted response.
struct Scripted<F> {
    events: Mutex<Vec<(EventKinds, u64)>>,
    script: F,
}

impl<F> Scripted<F>
where
    F: Fn(&Event) -> ObserveResult + Send + Sync,
{
    fn new(script: F) -> Arc<Self> {
        Arc::new(Scripted {
            events: Mutex::new(Vec::new()),
            script,
        })
    }

    fn events(&self) -> Vec<(EventKinds, u64)> {
        self.events.lock().unwrap().clone()
    }

    fn kinds(&self) -> Vec<EventKinds> {
        self.events().into_iter().map(|(kind, _)| kind).collect()
    }
}

impl<F> EventObserver for Scripted<F>
where
    F: Fn(&Event) -> ObserveResult + Send + Sync,
{
    fn on_event(&self, event: &Event, _frame: &mut InvocationFrame) -> ObserveResult {
        self.events
            .lock()
            .unwrap()
            .push((event.kind(), event.invoke_id().0));
        (self.script)(event)
    }
}

fn return_value_as_i32(directive: &Directive) -> Option<i32> {
    match directive {
        Directive::ReturnValue(Some(value)) => value.downcast_ref::<i32>().copied(),
        _ => None,
    }
}

#[test]
fn test_forced_return_at_entry_pops_the_frame() {
    let dispatcher = EventDispatcher::new();
    let observer = Scripted::new(|event| match event {
        Event::Entry { .. } => Ok(FlowSignal::return_immediately(Some(Value::new(99_i32)))),
        _ => Ok(FlowSignal::none()),
    });
    let listener = fresh_listener();
    dispatcher.activate(
        listener,
        observer.clone(),
        EventKinds::ENTRY | EventKinds::RETURN | EventKinds::FORCED_RETURN,
        false,
    );

    let entry = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    assert_eq!(return_value_as_i32(&entry.directive), Some(99));

    // The observer saw the redirection it caused, as a compensating event.
    assert_eq!(
        observer.kinds(),
        vec![EventKinds::ENTRY, EventKinds::FORCED_RETURN]
    );

    // No terminal event is expected; a stale one finds nothing to close.
    let directive = dispatcher
        .handle_return(listener, entry.invoke_id, None)
        .unwrap();
    assert!(directive.is_proceed());
    assert_eq!(observer.events().len(), 2);
}

#[test]
fn test_compensation_is_skipped_without_subscription() {
    let dispatcher = EventDispatcher::new();
    let observer = Scripted::new(|event| match event {
        Event::Entry { .. } => Ok(FlowSignal::return_immediately(Some(Value::new(1_i32)))),
        _ => Ok(FlowSignal::none()),
    });
    let listener = fresh_listener();
    dispatcher.activate(listener, observer.clone(), EventKinds::ENTRY, false);

    let entry = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    assert_eq!(return_value_as_i32(&entry.directive), Some(1));
    assert_eq!(observer.kinds(), vec![EventKinds::ENTRY]);
}

#[test]
fn test_forced_return_at_return_replaces_the_value() {
    let dispatcher = EventDispatcher::new();
    let observer = Scripted::new(|event| match event {
        Event::Return { .. } => Ok(FlowSignal::return_immediately(Some(Value::new(7_i32)))),
        _ => Ok(FlowSignal::none()),
    });
    let listener = fresh_listener();
    dispatcher.activate(
        listener,
        observer.clone(),
        EventKinds::ENTRY | EventKinds::RETURN | EventKinds::FORCED_RETURN,
        false,
    );

    let entry = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    let directive = dispatcher
        .handle_return(listener, entry.invoke_id, Some(Value::new(5_i32)))
        .unwrap();
    assert_eq!(return_value_as_i32(&directive), Some(7));
    assert_eq!(
        observer.kinds(),
        vec![
            EventKinds::ENTRY,
            EventKinds::RETURN,
            EventKinds::FORCED_RETURN
        ]
    );
}

#[test]
fn test_suppression_silences_the_rest_of_the_tree() {
    let dispatcher = EventDispatcher::new();
    let observer = Scripted::new(|event| match event {
        Event::Entry { .. } => Ok(FlowSignal::none().suppressing()),
        _ => Ok(FlowSignal::none()),
    });
    let listener = fresh_listener();
    dispatcher.activate(
        listener,
        observer.clone(),
        EventKinds::ENTRY | EventKinds::RETURN | EventKinds::CALLS | EventKinds::LINE,
        false,
    );

    let entry = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    assert!(entry.directive.is_proceed());

    // Everything after the suppression request is bookkeeping only.
    dispatcher
        .handle_call_entry(
            listener,
            entry.invoke_id,
            call_scope::CallTarget::new(3, "com.example.Dao", "query", "()V"),
        )
        .unwrap();
    dispatcher
        .handle_call_return(listener, entry.invoke_id)
        .unwrap();
    dispatcher.handle_line(listener, entry.invoke_id, 14).unwrap();
    let directive = dispatcher
        .handle_return(listener, entry.invoke_id, None)
        .unwrap();
    assert!(directive.is_proceed());
    assert_eq!(observer.kinds(), vec![EventKinds::ENTRY]);

    // The suppression died with its tree: the next one is observed again.
    let next = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    dispatcher
        .handle_return(listener, next.invoke_id, None)
        .unwrap();
    assert_eq!(
        observer.kinds(),
        vec![EventKinds::ENTRY, EventKinds::ENTRY, EventKinds::RETURN]
    );
}

#[test]
fn test_suppressed_forced_return_skips_compensation() {
    let dispatcher = EventDispatcher::new();
    let entries = Arc::new(AtomicUsize::new(0));
    let seen = entries.clone();
    let observer = Scripted::new(move |event| match event {
        Event::Entry { .. } => {
            if seen.fetch_add(1, Ordering::Relaxed) == 1 {
                // Second (nested) entry: cut the call short and silence
                // the rest of the tree.
                Ok(FlowSignal::return_immediately(Some(Value::new(0_i32))).suppressing())
            } else {
                Ok(FlowSignal::none())
            }
        }
        _ => Ok(FlowSignal::none()),
    });
    let listener = fresh_listener();
    dispatcher.activate(
        listener,
        observer.clone(),
        EventKinds::ENTRY | EventKinds::RETURN | EventKinds::FORCED_RETURN,
        false,
    );

    let outer = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    let inner = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    assert_eq!(return_value_as_i32(&inner.directive), Some(0));

    let directive = dispatcher
        .handle_return(listener, outer.invoke_id, None)
        .unwrap();
    assert!(directive.is_proceed());

    // No compensating event, no further observation.
    assert_eq!(observer.kinds(), vec![EventKinds::ENTRY, EventKinds::ENTRY]);
}

#[test]
fn test_forced_throw_is_observed_exactly_once_while_unwinding() {
    let dispatcher = EventDispatcher::new();
    let entries = Arc::new(AtomicUsize::new(0));
    let seen = entries.clone();
    let observer = Scripted::new(move |event| match event {
        Event::Entry { .. } => {
            if seen.fetch_add(1, Ordering::Relaxed) == 1 {
                Ok(FlowSignal::throw_immediately(raised()))
            } else {
                Ok(FlowSignal::none())
            }
        }
        _ => Ok(FlowSignal::none()),
    });
    let listener = fresh_listener();
    dispatcher.activate(
        listener,
        observer.clone(),
        EventKinds::ENTRY | EventKinds::EXCEPTION | EventKinds::FORCED_THROW,
        false,
    );

    let outer = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    let inner = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    assert!(matches!(inner.directive, Directive::ThrowError(_)));

    // The forced error unwinds through the outer frame: the call site
    // reports it, gets told to keep throwing, and the observer is not
    // asked about it a second time.
    let directive = dispatcher
        .handle_exception(listener, outer.invoke_id, raised())
        .unwrap();
    assert!(matches!(directive, Directive::ThrowError(_)));
    assert_eq!(
        observer.kinds(),
        vec![
            EventKinds::ENTRY,
            EventKinds::ENTRY,
            EventKinds::FORCED_THROW
        ]
    );
}

#[test]
fn test_natural_exception_is_observed_at_every_frame() {
    let dispatcher = EventDispatcher::new();
    let observer = Scripted::new(|_| Ok(FlowSignal::none()));
    let listener = fresh_listener();
    dispatcher.activate(
        listener,
        observer.clone(),
        EventKinds::ENTRY | EventKinds::EXCEPTION,
        false,
    );

    let outer = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    let inner = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    dispatcher
        .handle_exception(listener, inner.invoke_id, raised())
        .unwrap();
    dispatcher
        .handle_exception(listener, outer.invoke_id, raised())
        .unwrap();

    // Unlike a forced throw, a natural one is observed at each frame.
    assert_eq!(
        observer.kinds(),
        vec![
            EventKinds::ENTRY,
            EventKinds::ENTRY,
            EventKinds::EXCEPTION,
            EventKinds::EXCEPTION
        ]
    );
}

#[test]
fn test_forced_throw_from_an_exception_event_keeps_ancestors_observed() {
    let dispatcher = EventDispatcher::new();
    let replaced = Arc::new(AtomicUsize::new(0));
    let state = replaced.clone();
    let observer = Scripted::new(move |event| match event {
        Event::Exception { .. } => {
            if state.fetch_add(1, Ordering::Relaxed) == 0 {
                // Replace the error as it leaves the inner frame.
                Ok(FlowSignal::throw_immediately(raised()))
            } else {
                Ok(FlowSignal::none())
            }
        }
        _ => Ok(FlowSignal::none()),
    });
    let listener = fresh_listener();
    dispatcher.activate(
        listener,
        observer.clone(),
        EventKinds::ENTRY | EventKinds::EXCEPTION | EventKinds::FORCED_THROW,
        false,
    );

    let outer = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    let inner = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();

    let directive = dispatcher
        .handle_exception(listener, inner.invoke_id, raised())
        .unwrap();
    assert!(matches!(directive, Directive::ThrowError(_)));

    // Replacing an error that was already raised naturally does not
    // anticipate the ancestors' exception events: the outer frame still
    // observes the unwind.
    dispatcher
        .handle_exception(listener, outer.invoke_id, raised())
        .unwrap();
    assert_eq!(
        observer.kinds(),
        vec![
            EventKinds::ENTRY,
            EventKinds::ENTRY,
            EventKinds::EXCEPTION,
            EventKinds::FORCED_THROW,
            EventKinds::EXCEPTION
        ]
    );
}

#[test]
fn test_non_interrupting_observer_failures_never_change_directives() {
    let dispatcher = EventDispatcher::new();
    let observer = Scripted::new(|_| Err("observer always broken".into()));
    let listener = fresh_listener();
    dispatcher.activate(
        listener,
        observer.clone(),
        EventKinds::ENTRY | EventKinds::RETURN,
        false,
    );

    let entry = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    assert!(entry.directive.is_proceed());
    let directive = dispatcher
        .handle_return(listener, entry.invoke_id, None)
        .unwrap();
    assert!(directive.is_proceed());

    // Both events were attempted, the program never noticed a thing.
    assert_eq!(observer.events().len(), 2);
}

#[test]
fn test_interrupting_failure_at_entry_aborts_the_call() {
    let dispatcher = EventDispatcher::new();
    let observer = Scripted::new(|event| match event {
        Event::Entry { .. } => Err("refusing to observe".into()),
        _ => Ok(FlowSignal::none()),
    });
    let listener = fresh_listener();
    dispatcher.activate(listener, observer.clone(), EventKinds::ENTRY, true);

    let result = dispatcher.handle_entry(listener, method(), None, Vec::new());
    let error = result.unwrap_err();
    assert!(error.to_string().contains("refusing to observe"));

    // The aborted call never ran: nothing was left open.
    let next = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    assert!(next.directive.is_proceed());
}

#[test]
fn test_interrupting_failure_at_return_propagates() {
    let dispatcher = EventDispatcher::new();
    let observer = Scripted::new(|event| match event {
        Event::Return { .. } => Err("exit watcher broken".into()),
        _ => Ok(FlowSignal::none()),
    });
    let listener = fresh_listener();
    dispatcher.activate(
        listener,
        observer.clone(),
        EventKinds::ENTRY | EventKinds::RETURN,
        true,
    );

    let entry = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    let result = dispatcher.handle_return(listener, entry.invoke_id, None);
    assert!(result.is_err());

    // The frame was still closed before the failure propagated.
    let next = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    dispatcher
        .handle_return(listener, next.invoke_id, None)
        .unwrap();
}

#[test]
fn test_compensation_failure_never_masks_the_directive() {
    let dispatcher = EventDispatcher::new();
    let observer = Scripted::new(|event| match event {
        Event::Entry { .. } => Ok(FlowSignal::return_immediately(Some(Value::new(5_i32)))),
        Event::ForcedReturn { .. } => Err("compensation handler broken".into()),
        _ => Ok(FlowSignal::none()),
    });
    let listener = fresh_listener();
    // Even an interrupting observer must not abort over a compensation
    // failure.
    dispatcher.activate(
        listener,
        observer.clone(),
        EventKinds::ENTRY | EventKinds::FORCED_RETURN,
        true,
    );

    let entry = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    assert_eq!(return_value_as_i32(&entry.directive), Some(5));
}

#[test]
fn test_flow_signal_during_compensation_is_ignored() {
    let dispatcher = EventDispatcher::new();
    let observer = Scripted::new(|event| match event {
        Event::Entry { .. } => Ok(FlowSignal::return_immediately(Some(Value::new(5_i32)))),
        // Trying to redirect the redirection goes nowhere.
        Event::ForcedReturn { .. } => {
            Ok(FlowSignal::return_immediately(Some(Value::new(6_i32))))
        }
        _ => Ok(FlowSignal::none()),
    });
    let listener = fresh_listener();
    dispatcher.activate(
        listener,
        observer.clone(),
        EventKinds::ENTRY | EventKinds::FORCED_RETURN,
        false,
    );

    let entry = dispatcher
        .handle_entry(listener, method(), None, Vec::new())
        .unwrap();
    assert_eq!(return_value_as_i32(&entry.directive), Some(5));
    assert_eq!(
        observer.kinds(),
        vec![EventKinds::ENTRY, EventKinds::FORCED_RETURN]
    );
}
