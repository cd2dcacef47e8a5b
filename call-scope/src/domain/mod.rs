//! Domain errors for call-scope
//!
//! Structured error types; identifier and value types live in
//! `call-scope-common` because call sites share them.

pub mod errors;

pub use errors::{DispatchError, ExportError};
