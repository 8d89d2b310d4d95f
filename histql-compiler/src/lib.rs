//! histql compiler
//!
//! Compiles a restricted SQL SELECT query into a histogram-trigger program
//! for the kernel tracing subsystem: one trigger for a plain selection, or
//! a correlated start/end trigger pair plus a synthetic event definition
//! for a two-event join.

pub mod ast;
pub mod builder;
pub mod codegen;
pub mod compiler;
pub mod error;
pub mod intern;
pub mod parser;
pub mod resolver;

// Re-exports
pub use codegen::{CompiledQuery, SyntheticEvent, Trigger, TriggerRole};
pub use compiler::Compiler;
pub use error::{Error, Result};
