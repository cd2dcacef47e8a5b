//! Per-thread invocation frame stack
//!
//! Tracks the nested instrumented calls currently open on one thread. The
//! pop/peek operations are guarded by the expected invocation ID: when
//! instrumentation on a sub-call failed to fire its entry (unsafe-class
//! filtering, a constructor delegating to a supertype constructor), the
//! stack and the incoming ID diverge, and the guarded operation reports
//! "no correlated frame" instead of corrupting the stack. Callers drop such
//! events silently; a desynchronized observation is never a fatal error.

use std::any::Any;
use std::fmt;

use call_scope_common::{CallTarget, InvokeId};

/// Runtime record of one open instrumented call
pub struct InvocationFrame {
    invoke_id: InvokeId,
    /// Observer-owned payload, alive exactly as long as the frame
    attachment: Option<Box<dyn Any + Send>>,
    /// Descriptor of the nested call currently in flight, cached at
    /// call-entry so the matching call-return/-exception can be paired
    pub(crate) call_target: Option<CallTarget>,
}

impl fmt::Debug for InvocationFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationFrame")
            .field("invoke_id", &self.invoke_id)
            .field("has_attachment", &self.attachment.is_some())
            .field("call_target", &self.call_target)
            .finish()
    }
}

impl InvocationFrame {
    pub(crate) fn new(invoke_id: InvokeId) -> Self {
        InvocationFrame {
            invoke_id,
            attachment: None,
            call_target: None,
        }
    }

    /// Invocation this frame records.
    #[must_use]
    pub fn invoke_id(&self) -> InvokeId {
        self.invoke_id
    }

    /// Store an observer payload on the frame, replacing any previous one.
    pub fn attach(&mut self, value: Box<dyn Any + Send>) {
        self.attachment = Some(value);
    }

    /// Borrow the observer payload as `T`.
    #[must_use]
    pub fn attachment<T: Any>(&self) -> Option<&T> {
        self.attachment.as_deref().and_then(|slot| slot.downcast_ref())
    }

    /// Mutably borrow the observer payload as `T`.
    pub fn attachment_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.attachment
            .as_deref_mut()
            .and_then(|slot| slot.downcast_mut())
    }

    /// Descriptor of the nested call currently being made from this frame.
    #[must_use]
    pub fn current_call(&self) -> Option<&CallTarget> {
        self.call_target.as_ref()
    }
}

/// LIFO stack of open invocation frames, innermost last
#[derive(Debug, Default)]
pub struct FrameStack {
    frames: Vec<InvocationFrame>,
}

impl FrameStack {
    pub(crate) fn new() -> Self {
        FrameStack::default()
    }

    /// Open a new frame for `invoke_id`.
    pub(crate) fn push(&mut self, frame: InvocationFrame) {
        self.frames.push(frame);
    }

    /// Close the innermost frame, but only if it records `expected`.
    ///
    /// Returns `None` on an empty stack or a mismatched ID, leaving the
    /// stack untouched in both cases.
    pub(crate) fn pop_expected(&mut self, expected: InvokeId) -> Option<InvocationFrame> {
        if self.frames.last()?.invoke_id == expected {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Borrow the innermost frame, but only if it records `expected`.
    pub(crate) fn peek_expected(&mut self, expected: InvokeId) -> Option<&mut InvocationFrame> {
        match self.frames.last_mut() {
            Some(frame) if frame.invoke_id == expected => Some(frame),
            _ => None,
        }
    }

    /// Borrow the innermost frame unconditionally.
    pub(crate) fn top_mut(&mut self) -> Option<&mut InvocationFrame> {
        self.frames.last_mut()
    }

    /// True when no instrumented call is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Invocation ID of the innermost open frame.
    #[must_use]
    pub fn current_invoke_id(&self) -> Option<InvokeId> {
        self.frames.last().map(|frame| frame.invoke_id)
    }

    /// Number of open frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
