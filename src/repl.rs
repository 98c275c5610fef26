use std::rc::Rc;

use rustyline::{error::ReadlineError, DefaultEditor};

use crate::{
    config::LanguageConfig,
    diagnostics::Result,
    registry::Registry,
    runtime::Interpreter,
    value::{Value, ValueKind},
};

/// Interactive line-by-line evaluator. Bindings persist across lines because
/// the same interpreter (and so the same global scope) serves the whole
/// session.
pub struct Repl {
    editor: DefaultEditor,
    interpreter: Interpreter,
}

impl Repl {
    pub fn new(config: LanguageConfig) -> Result<Self> {
        let registry = Rc::new(Registry::load(&config)?);
        let editor = DefaultEditor::new()
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        Ok(Self {
            editor,
            interpreter: Interpreter::new(config, registry),
        })
    }

    pub fn run(&mut self) -> Result<()> {
        println!("calla repl, :quit to exit");
        loop {
            match self.editor.readline("calla> ") {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if line == ":quit" || line == ":exit" {
                        break;
                    }
                    let _ = self.editor.add_history_entry(line);
                    match self.interpreter.eval(line) {
                        Ok(value) => {
                            if !matches!(&*value.0, ValueKind::Null) {
                                print_value(&value);
                            }
                        }
                        Err(err) => eprintln!("{err}"),
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("readline error: {err}");
                    break;
                }
            }
        }
        Ok(())
    }
}

fn print_value(value: &Value) {
    println!("{value}");
}
