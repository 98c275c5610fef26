//! Calla: a small typed scripting language with configurable syntax,
//! builtin capability modules, and cooperative single-threaded tasks.
//!
//! The pipeline is config -> lexer -> parser -> type checker -> interpreter;
//! [`Session`] wires the stages together and tracks the run lifecycle.

pub mod ast;
pub mod checker;
pub mod config;
pub mod diagnostics;
pub mod environment;
pub mod exception;
pub mod lexer;
pub mod parser;
pub mod pretty;
pub mod registry;
pub mod repl;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod types;
pub mod value;

pub use config::LanguageConfig;
pub use diagnostics::{CallaError, Diagnostic, DiagnosticKind, Result, Severity, SourcePos};
pub use exception::Exception;
pub use registry::Registry;
pub use repl::Repl;
pub use runtime::Interpreter;
pub use session::{RunState, Session};
pub use value::Value;
