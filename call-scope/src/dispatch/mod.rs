//! Event correlation and flow control
//!
//! This module contains the engine core:
//! - `stack`: per-thread invocation frame stack with guarded pop/peek
//! - `registry`: concurrent observer registry
//! - `process`: per-(thread, listener) call-tree state, created lazily and
//!   torn down when the tree empties
//! - `reentry`: guard that silences dispatches issued from observer code
//! - `engine`: the dispatcher itself

pub mod engine;
mod process;
mod reentry;
pub mod registry;
pub mod stack;

pub use engine::{DispatchResult, EventDispatcher};
pub use registry::{ObserverRegistry, Registration};
pub use stack::{FrameStack, InvocationFrame};
