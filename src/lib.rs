//! logo-core - a parser and tree-walking evaluator for a UCBLogo-flavored
//! Logo dialect, meant to be embedded behind a turtle-graphics host.
//!
//! The crate owns the language: lists, scopes, procedures, infix
//! arithmetic, templates, and cooperative pause/break cancellation. It
//! knows nothing about rendering a turtle or painting pixels — an
//! embedder registers its own primitives as builtins and drives
//! execution through the [`Interpreter`] facade.
//!
//! # Quick start
//!
//! ```
//! use logo_core::Interpreter;
//!
//! let mut interpreter = Interpreter::new();
//! interpreter.execute("to sq :n output :n * :n end print sq 7").unwrap();
//! ```
//!
//! # Host integration
//!
//! Register turtle primitives (or anything else) with
//! [`Interpreter::register_builtin`]; they are indistinguishable from
//! built-in or user-defined procedures at the call site. Drive
//! long-running programs from another thread with the handle returned by
//! [`Interpreter::handle`].
//!
//! # Not supported
//!
//! - Compilation to an intermediate representation.
//! - Tail-call optimization beyond what the host affords.
//! - Persistence of program state between processes.
//! - Running more than one program at a time on a single interpreter.
//! - Sandboxing against malicious embedder-supplied builtins.

mod builtins;
mod control;
mod diagnostic;
mod error;
mod eval;
mod interpreter;
mod list;
mod parser;
mod scope;
mod sourcemap;
mod value;

pub use control::{InterpreterHandle, Limits};
pub use diagnostic::{Diagnostic, Label};
pub use error::{Error, Result};
pub use interpreter::Interpreter;
pub use list::{List, NodeId};
pub use scope::ProcedureScope;
pub use sourcemap::{SourceLocation, SourceMap, Span};
pub use value::Value;
