//! Observer registry
//!
//! Concurrent mapping from listener ID to its registration. Activation and
//! deactivation happen from module threads while lookups happen from every
//! instrumented thread; the map is reader-favoring and lookups clone the
//! registration `Arc` out so no shard lock is held while observer code
//! runs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use call_scope_common::ListenerId;
use dashmap::DashMap;
use log::{debug, info, warn};

use crate::event::EventKinds;
use crate::observer::EventObserver;

/// Distinguishes successive activations under the same listener ID, so a
/// re-activation never resumes call-tree state left over from its
/// predecessor.
static ACTIVATION_SEQUENCER: AtomicU64 = AtomicU64::new(1);

/// One activated observer
pub struct Registration {
    listener_id: ListenerId,
    activation_id: u64,
    observer: Arc<dyn EventObserver>,
    subscribed: EventKinds,
    interrupting: bool,
}

impl Registration {
    /// ID the observer was activated under.
    #[must_use]
    pub fn listener_id(&self) -> ListenerId {
        self.listener_id
    }

    /// Event kinds the observer asked for.
    #[must_use]
    pub fn subscribed(&self) -> EventKinds {
        self.subscribed
    }

    /// Whether an observer failure aborts the instrumented call.
    #[must_use]
    pub fn interrupting(&self) -> bool {
        self.interrupting
    }

    pub(crate) fn observer(&self) -> &dyn EventObserver {
        self.observer.as_ref()
    }

    pub(crate) fn activation_id(&self) -> u64 {
        self.activation_id
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("listener_id", &self.listener_id)
            .field("subscribed", &self.subscribed)
            .field("interrupting", &self.interrupting)
            .finish()
    }
}

/// Concurrent listener-ID → registration map
#[derive(Default)]
pub struct ObserverRegistry {
    registrations: DashMap<ListenerId, Arc<Registration>>,
}

impl ObserverRegistry {
    #[must_use]
    pub fn new() -> Self {
        ObserverRegistry::default()
    }

    /// Activate an observer under `listener_id`.
    ///
    /// Re-activating an ID replaces the previous registration; in-flight
    /// dispatches that already looked the old one up finish against it.
    pub fn activate(
        &self,
        listener_id: ListenerId,
        observer: Arc<dyn EventObserver>,
        subscribed: EventKinds,
        interrupting: bool,
    ) {
        let registration = Arc::new(Registration {
            listener_id,
            activation_id: ACTIVATION_SEQUENCER.fetch_add(1, Ordering::Relaxed),
            observer,
            subscribed,
            interrupting,
        });
        if self.registrations.insert(listener_id, registration).is_some() {
            warn!("{listener_id} re-activated, replacing previous registration");
        }
        info!("activated {listener_id} for {subscribed:?} (interrupting={interrupting})");
    }

    /// Deactivate the observer registered under `listener_id`.
    ///
    /// Open call trees are unaffected beyond no longer dispatching to the
    /// observer; their remaining events miss the lookup and proceed.
    pub fn deactivate(&self, listener_id: ListenerId) {
        match self.registrations.remove(&listener_id) {
            Some(_) => info!("deactivated {listener_id}"),
            None => debug!("ignoring deactivation of unknown {listener_id}"),
        }
    }

    /// Fetch the registration for `listener_id`, if the observer is active.
    #[must_use]
    pub fn lookup(&self, listener_id: ListenerId) -> Option<Arc<Registration>> {
        self.registrations
            .get(&listener_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of active observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// True when no observer is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::InvocationFrame;
    use crate::event::Event;
    use crate::observer::{FlowSignal, ObserveResult};

    struct NullObserver;

    impl EventObserver for NullObserver {
        fn on_event(&self, _event: &Event, _frame: &mut InvocationFrame) -> ObserveResult {
            Ok(FlowSignal::none())
        }
    }

    #[test]
    fn test_lookup_after_activate() {
        let registry = ObserverRegistry::new();
        registry.activate(
            ListenerId(1),
            Arc::new(NullObserver),
            EventKinds::ENTRY | EventKinds::RETURN,
            false,
        );

        let registration = registry.lookup(ListenerId(1)).unwrap();
        assert_eq!(registration.listener_id(), ListenerId(1));
        assert!(registration.subscribed().contains(EventKinds::ENTRY));
        assert!(!registration.interrupting());
    }

    #[test]
    fn test_lookup_miss_is_none() {
        let registry = ObserverRegistry::new();
        assert!(registry.lookup(ListenerId(404)).is_none());
    }

    #[test]
    fn test_deactivate_removes_registration() {
        let registry = ObserverRegistry::new();
        registry.activate(ListenerId(2), Arc::new(NullObserver), EventKinds::ENTRY, false);
        assert_eq!(registry.len(), 1);

        registry.deactivate(ListenerId(2));
        assert!(registry.lookup(ListenerId(2)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reactivation_replaces() {
        let registry = ObserverRegistry::new();
        registry.activate(ListenerId(3), Arc::new(NullObserver), EventKinds::ENTRY, false);
        registry.activate(ListenerId(3), Arc::new(NullObserver), EventKinds::LINE, true);

        let registration = registry.lookup(ListenerId(3)).unwrap();
        assert_eq!(registration.subscribed(), EventKinds::LINE);
        assert!(registration.interrupting());
    }
}
