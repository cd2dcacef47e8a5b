//! # Shared Data Structures (Call Site ↔ Engine)
//!
//! Defines the types shared between weaver-generated call sites and the
//! event-correlation engine. Call sites emit raw callbacks carrying these
//! types and apply the [`Directive`] the engine hands back; nothing in this
//! crate dispatches events itself.
//!
//! ## Key Types
//!
//! - [`ListenerId`] / [`InvokeId`] / [`ProcessId`] - identifier newtypes
//! - [`Value`] / [`ErrorValue`] - opaque handles to observed-program values
//! - [`MethodRef`] / [`CallTarget`] - descriptors for instrumented methods
//!   and the nested calls they make
//! - [`Directive`] / [`EntryDirective`] - the engine's instruction back to
//!   the call site

use std::any::Any;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Identifier Newtypes
// ============================================================================

/// Observer (listener) ID
///
/// Assigned by the module that registers the observer. Identity is carried
/// by this explicit integer handle, never by reference identity of the
/// observer object itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u32);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener:{}", self.0)
    }
}

/// Invocation ID
///
/// Unique for the life of one instrumented call, assigned monotonically
/// from a process-wide sequencer when the call's entry event is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvokeId(pub u64);

impl fmt::Display for InvokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invoke:{}", self.0)
    }
}

/// Process (call tree) ID
///
/// The invocation ID of the outermost instrumented call of a thread's call
/// tree. Every event of the tree shares this ID; when the frame carrying it
/// closes, the tree is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u64);

impl ProcessId {
    /// Returns true if `invoke_id` names the outermost frame of this tree.
    #[must_use]
    pub fn is_root(self, invoke_id: InvokeId) -> bool {
        self.0 == invoke_id.0
    }
}

impl From<InvokeId> for ProcessId {
    fn from(invoke_id: InvokeId) -> Self {
        ProcessId(invoke_id.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process:{}", self.0)
    }
}

// ============================================================================
// Opaque Program Values
// ============================================================================

/// Opaque handle to a value of the observed program
///
/// Arguments, receivers and return values cross the instrumentation
/// boundary as type-erased handles. The engine never inspects them; an
/// observer that knows the concrete type can [`downcast_ref`](Self::downcast_ref).
///
/// Cloning is cheap (shared `Arc`), which matters because the same value
/// may flow through an event, a directive and a compensating event.
#[derive(Clone)]
pub struct Value(Arc<dyn Any + Send + Sync>);

impl Value {
    /// Wrap a concrete value into an opaque handle.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Value(Arc::new(value))
    }

    /// Borrow the payload as `T`, if that is its concrete type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Returns true if the payload has concrete type `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Value(<opaque>)")
    }
}

/// Opaque handle to an error raised in (or injected into) the observed
/// program
///
/// Like [`Value`], the payload is type-erased; the concrete type name and a
/// display message are captured at construction so the engine can describe
/// the error in logs without understanding it.
#[derive(Clone)]
pub struct ErrorValue {
    payload: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    message: String,
}

impl ErrorValue {
    /// Wrap a concrete error into an opaque handle.
    pub fn new<T: Any + Send + Sync + fmt::Display>(error: T) -> Self {
        let message = error.to_string();
        ErrorValue {
            payload: Arc::new(error),
            type_name: std::any::type_name::<T>(),
            message,
        }
    }

    /// Concrete type name of the payload, as captured at construction.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Display message of the payload, as captured at construction.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Borrow the payload as `T`, if that is its concrete type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl fmt::Debug for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorValue")
            .field("type_name", &self.type_name)
            .field("message", &self.message)
            .finish()
    }
}

// ============================================================================
// Method / Call Descriptors
// ============================================================================

/// Descriptor of an instrumented method
///
/// Built once by the weaver when it rewrites a method and shared (via
/// `Arc`) by every entry event that method emits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Fully qualified class (or module) name
    pub class_name: String,
    /// Method name within the class
    pub method_name: String,
    /// Parameter/return signature in the source language's notation
    pub signature: String,
}

impl MethodRef {
    #[must_use]
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        MethodRef {
            class_name: class_name.into(),
            method_name: method_name.into(),
            signature: signature.into(),
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class_name, self.method_name)
    }
}

/// Descriptor of a nested call site inside an instrumented method
///
/// Emitted with the nested-call entry event; the engine caches it on the
/// open frame so the matching return/exception callback knows which call it
/// closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    /// Source line of the call site
    pub line: u32,
    /// Class owning the callee
    pub class_name: String,
    /// Callee method name
    pub method_name: String,
    /// Callee signature
    pub signature: String,
}

impl CallTarget {
    #[must_use]
    pub fn new(
        line: u32,
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        CallTarget {
            line,
            class_name: class_name.into(),
            method_name: method_name.into(),
            signature: signature.into(),
        }
    }
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}:{}", self.class_name, self.method_name, self.line)
    }
}

// ============================================================================
// Call-Site Directives
// ============================================================================

/// Instruction returned to the call site after each dispatch
///
/// Consumed exactly once by the call site that produced the event:
///
/// - [`Proceed`](Directive::Proceed) - resume normal execution
/// - [`ReturnValue`](Directive::ReturnValue) - abandon the call (or replace
///   its result) and return the given value immediately
/// - [`ThrowError`](Directive::ThrowError) - abandon the call and raise the
///   given error instead
#[derive(Debug, Clone)]
pub enum Directive {
    /// No change to control flow
    Proceed,
    /// Force the instrumented call to return this value
    ReturnValue(Option<Value>),
    /// Force the instrumented call to raise this error
    ThrowError(ErrorValue),
}

impl Directive {
    /// Returns true if the call site should resume normal execution.
    #[must_use]
    pub fn is_proceed(&self) -> bool {
        matches!(self, Directive::Proceed)
    }
}

/// Result of an entry dispatch
///
/// Besides the directive, entry hands the call site the invocation ID
/// assigned to the new frame; the call site threads it through its exit and
/// nested-call callbacks so the engine can correlate them.
#[derive(Debug, Clone)]
pub struct EntryDirective {
    /// Invocation ID assigned to this call
    pub invoke_id: InvokeId,
    /// Directive to apply before the method body runs
    pub directive: Directive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(ListenerId(7).to_string(), "listener:7");
        assert_eq!(InvokeId(1001).to_string(), "invoke:1001");
        assert_eq!(ProcessId(1000).to_string(), "process:1000");
    }

    #[test]
    fn test_process_id_root_check() {
        let process_id = ProcessId::from(InvokeId(1000));
        assert!(process_id.is_root(InvokeId(1000)));
        assert!(!process_id.is_root(InvokeId(1001)));
    }

    #[test]
    fn test_value_downcast() {
        let value = Value::new(42_i32);
        assert!(value.is::<i32>());
        assert_eq!(value.downcast_ref::<i32>(), Some(&42));
        assert_eq!(value.downcast_ref::<String>(), None);
    }

    #[test]
    fn test_value_clone_shares_payload() {
        let value = Value::new(String::from("shared"));
        let copy = value.clone();
        assert_eq!(copy.downcast_ref::<String>().unwrap(), "shared");
    }

    #[test]
    fn test_error_value_captures_type_and_message() {
        let error = ErrorValue::new(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing resource",
        ));
        assert!(error.type_name().contains("io::error::Error")
            || error.type_name().contains("io::Error"));
        assert_eq!(error.message(), "missing resource");
        assert!(error.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_method_ref_display() {
        let method = MethodRef::new("com.example.Service", "handle", "(Ljava/lang/String;)V");
        assert_eq!(method.to_string(), "com.example.Service#handle");
    }

    #[test]
    fn test_call_target_display() {
        let target = CallTarget::new(42, "com.example.Dao", "query", "()V");
        assert_eq!(target.to_string(), "com.example.Dao#query:42");
    }

    #[test]
    fn test_directive_is_proceed() {
        assert!(Directive::Proceed.is_proceed());
        assert!(!Directive::ReturnValue(None).is_proceed());
        assert!(!Directive::ThrowError(ErrorValue::new("boom".to_string())).is_proceed());
    }
}
