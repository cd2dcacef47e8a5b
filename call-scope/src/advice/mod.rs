//! Advice layer: the simplified observer interface
//!
//! Built on top of the dispatch engine; nothing here talks to call sites
//! directly. Register an [`AdviceAdapter`] as a raw observer and implement
//! [`AdviceListener`] instead of decoding events by hand.

pub mod adapter;
pub mod listener;
pub mod model;

pub use adapter::AdviceAdapter;
pub use listener::AdviceListener;
pub use model::{Advice, AdviceOutcome};
