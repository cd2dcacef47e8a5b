//! The advice call node
//!
//! An [`Advice`] wraps one instrumented invocation for the simplified
//! before/after interface: entry context (method, receiver, arguments),
//! the outcome once the call finished, links to the parent and top of the
//! call tree, and a typed user attachment that lives as long as the node.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use call_scope_common::{ErrorValue, InvokeId, MethodRef, ProcessId, Value};

/// How an invocation ended, as far as advice callbacks have seen
#[derive(Debug, Clone)]
pub enum AdviceOutcome {
    /// Still executing (only state visible from `before` callbacks)
    Pending,
    /// Returned normally with this value
    Returned(Option<Value>),
    /// Raised this error
    Raised(ErrorValue),
}

/// One instrumented invocation, as exposed to advice listeners
///
/// Nodes form a chain through [`parent`](Self::parent) up to
/// [`process_top`](Self::process_top); the outermost node links to itself.
/// An `Advice` never leaves the thread that created it.
pub struct Advice {
    process_id: ProcessId,
    invoke_id: InvokeId,
    method: Arc<MethodRef>,
    target: Option<Value>,
    args: Vec<Value>,
    outcome: RefCell<AdviceOutcome>,
    attachment: RefCell<Option<Rc<dyn Any>>>,
    parent: Weak<Advice>,
    top: Weak<Advice>,
}

impl Advice {
    /// Build a node and wire its parent/top links. `links` is `None` for
    /// the outermost invocation, which then links to itself.
    pub(crate) fn new(
        process_id: ProcessId,
        invoke_id: InvokeId,
        method: Arc<MethodRef>,
        target: Option<Value>,
        args: Vec<Value>,
        links: Option<(&Rc<Advice>, &Rc<Advice>)>,
    ) -> Rc<Advice> {
        Rc::new_cyclic(|me| {
            let (parent, top) = match links {
                Some((parent, top)) => (Rc::downgrade(parent), Rc::downgrade(top)),
                None => (me.clone(), me.clone()),
            };
            Advice {
                process_id,
                invoke_id,
                method,
                target,
                args,
                outcome: RefCell::new(AdviceOutcome::Pending),
                attachment: RefCell::new(None),
                parent,
                top,
            }
        })
    }

    /// Call tree this invocation belongs to.
    #[must_use]
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Invocation ID of this call.
    #[must_use]
    pub fn invoke_id(&self) -> InvokeId {
        self.invoke_id
    }

    /// The instrumented method.
    #[must_use]
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// Receiver of the call, if any.
    #[must_use]
    pub fn target(&self) -> Option<&Value> {
        self.target.as_ref()
    }

    /// Call arguments.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// True when this node is the outermost invocation of its tree.
    #[must_use]
    pub fn is_process_top(&self) -> bool {
        self.process_id.is_root(self.invoke_id)
    }

    /// The invocation this one was called from; the outermost node returns
    /// itself. `None` only if the tree has already been torn down.
    #[must_use]
    pub fn parent(&self) -> Option<Rc<Advice>> {
        self.parent.upgrade()
    }

    /// The outermost invocation of the tree; the outermost node returns
    /// itself. `None` only if the tree has already been torn down.
    #[must_use]
    pub fn process_top(&self) -> Option<Rc<Advice>> {
        self.top.upgrade()
    }

    /// Outcome as recorded so far.
    #[must_use]
    pub fn outcome(&self) -> AdviceOutcome {
        self.outcome.borrow().clone()
    }

    /// Return value, when the call has returned normally.
    #[must_use]
    pub fn return_value(&self) -> Option<Value> {
        match &*self.outcome.borrow() {
            AdviceOutcome::Returned(value) => value.clone(),
            _ => None,
        }
    }

    /// Raised error, when the call has finished by raising.
    #[must_use]
    pub fn error(&self) -> Option<ErrorValue> {
        match &*self.outcome.borrow() {
            AdviceOutcome::Raised(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Attach arbitrary user data to this node, replacing any previous
    /// attachment. Lifetime = node lifetime.
    pub fn attach<T: Any>(&self, value: T) {
        *self.attachment.borrow_mut() = Some(Rc::new(value));
    }

    /// Fetch the attachment as `T`.
    #[must_use]
    pub fn attachment<T: Any>(&self) -> Option<Rc<T>> {
        let slot = self.attachment.borrow();
        slot.clone().and_then(|any| any.downcast::<T>().ok())
    }

    pub(crate) fn apply_return(&self, value: Option<Value>) {
        *self.outcome.borrow_mut() = AdviceOutcome::Returned(value);
    }

    pub(crate) fn apply_raise(&self, error: ErrorValue) {
        *self.outcome.borrow_mut() = AdviceOutcome::Raised(error);
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Advice")
            .field("process_id", &self.process_id)
            .field("invoke_id", &self.invoke_id)
            .field("method", &self.method)
            .field("outcome", &self.outcome.borrow())
            .finish()
    }
}
