use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use calla::{pretty::Printer, parser as syntax, LanguageConfig, Repl, Session};

#[derive(Parser)]
#[command(name = "calla", version, about = "The calla scripting language")]
struct Cli {
    /// Path to a language configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Type-check and execute a script.
    Run { script: PathBuf },
    /// Type-check a script and report diagnostics without running it.
    Check { script: PathBuf },
    /// Evaluate an inline source snippet.
    Eval { source: String },
    /// Reprint a script in canonical form.
    Fmt { script: PathBuf },
    /// Start an interactive session.
    Repl,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Run { script } => run_script(&script, config),
        Command::Check { script } => check_script(&script, config),
        Command::Eval { source } => eval_source(&source, config),
        Command::Fmt { script } => fmt_script(&script, config),
        Command::Repl => Repl::new(config).and_then(|mut repl| repl.run()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> calla::Result<LanguageConfig> {
    match path {
        Some(path) => LanguageConfig::from_path(path),
        None => Ok(LanguageConfig::default()),
    }
}

fn run_script(script: &std::path::Path, config: LanguageConfig) -> calla::Result<()> {
    let mut session = Session::from_path(script, config)?;
    println!("{}", session.summary());
    for diagnostic in session.check() {
        eprintln!("{diagnostic}");
    }
    session.run()?;
    Ok(())
}

fn check_script(script: &std::path::Path, config: LanguageConfig) -> calla::Result<()> {
    let mut session = Session::from_path(script, config)?;
    let diagnostics = session.check();
    for diagnostic in diagnostics {
        println!("{diagnostic}");
    }
    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    if errors > 0 {
        return Err(calla::CallaError::TypeCheckFailed { errors });
    }
    Ok(())
}

fn eval_source(source: &str, config: LanguageConfig) -> calla::Result<()> {
    let mut session = Session::from_source(source, config)?;
    for diagnostic in session.check() {
        eprintln!("{diagnostic}");
    }
    let value = session.run()?;
    println!("{value}");
    Ok(())
}

fn fmt_script(script: &std::path::Path, config: LanguageConfig) -> calla::Result<()> {
    let source = std::fs::read_to_string(script)?;
    let program = syntax::parse_program(&source, &config)?;
    print!("{}", Printer::new(&config).print(&program));
    Ok(())
}
