use std::{fmt, path::Path, rc::Rc};

use tracing::{info, warn};

use crate::{
    ast::Program,
    checker::TypeChecker,
    config::LanguageConfig,
    diagnostics::{CallaError, Diagnostic, Result},
    parser,
    registry::Registry,
    runtime::Interpreter,
    value::Value,
};

/// Lifecycle of one program run. `Failed` covers both a blocked run (type
/// errors under the blocking policy) and an uncaught exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Loaded,
    TypeChecked,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Loaded => "loaded",
            RunState::TypeChecked => "type-checked",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// A loaded program plus everything needed to check and run it. Modules are
/// loaded eagerly at construction, so a missing or broken builtin module
/// aborts before any user statement executes.
pub struct Session {
    config: LanguageConfig,
    registry: Rc<Registry>,
    program: Program,
    diagnostics: Vec<Diagnostic>,
    state: RunState,
}

impl Session {
    pub fn from_source(source: &str, config: LanguageConfig) -> Result<Session> {
        let registry = Rc::new(Registry::load(&config)?);
        let program = parser::parse_program(source, &config)?;
        info!(statements = program.statements.len(), "program loaded");
        Ok(Session {
            config,
            registry,
            program,
            diagnostics: Vec::new(),
            state: RunState::Loaded,
        })
    }

    pub fn from_path(path: &Path, config: LanguageConfig) -> Result<Session> {
        let source = std::fs::read_to_string(path)?;
        Self::from_source(&source, config)
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn summary(&self) -> String {
        self.registry.summary()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Runs the type checker once and caches its diagnostics.
    pub fn check(&mut self) -> &[Diagnostic] {
        if self.state == RunState::Loaded {
            self.diagnostics =
                TypeChecker::new(&self.config, &self.registry).check(&self.program);
            let errors = self.diagnostics.iter().filter(|d| d.is_error()).count();
            if errors > 0 {
                warn!(errors, "type checking found errors");
            }
            self.state = RunState::TypeChecked;
        }
        &self.diagnostics
    }

    fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    /// Checks (if not already done) and executes the program. Under the
    /// blocking policy a nonzero error count refuses to run; with the policy
    /// disabled the program runs anyway and may fail at runtime instead.
    pub fn run(&mut self) -> Result<Value> {
        self.check();
        let errors = self.error_count();
        if errors > 0 && self.config.type_block_policy {
            self.state = RunState::Failed;
            return Err(CallaError::TypeCheckFailed { errors });
        }
        self.state = RunState::Running;
        let mut interpreter = Interpreter::new(self.config.clone(), Rc::clone(&self.registry));
        match interpreter.run(&self.program) {
            Ok(value) => {
                self.state = RunState::Completed;
                Ok(value)
            }
            Err(exc) => {
                self.state = RunState::Failed;
                Err(CallaError::Uncaught(exc))
            }
        }
    }
}
