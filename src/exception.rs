use std::fmt;

use crate::{diagnostics::SourcePos, value::Value};

/// One call-stack level captured while an exception propagates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub function: String,
    pub line: u32,
    pub column: u32,
}

/// A first-class runtime error value. Frames are accumulated innermost-first
/// as the evaluator unwinds its call stack; the payload carries the thrown
/// value when the script raised something other than a plain message.
#[derive(Debug, Clone)]
pub struct Exception {
    pub kind: String,
    pub message: String,
    pub payload: Option<Value>,
    pub frames: Vec<TraceFrame>,
}

impl Exception {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            payload: None,
            frames: Vec::new(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::new("NameError", message)
    }

    pub fn redeclaration(name: &str) -> Self {
        Self::new(
            "RedeclarationError",
            format!("`{name}` is already declared in this scope"),
        )
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new("IndexError", message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new("KeyError", message)
    }

    pub fn with_payload(mut self, value: Value) -> Self {
        self.payload = Some(value);
        self
    }

    pub fn push_frame(&mut self, function: impl Into<String>, pos: SourcePos) {
        self.frames.push(TraceFrame {
            function: function.into(),
            line: pos.line,
            column: pos.column,
        });
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for frame in &self.frames {
            write!(
                f,
                "\n  at {} (line {}, column {})",
                frame.function, frame.line, frame.column
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for Exception {}
