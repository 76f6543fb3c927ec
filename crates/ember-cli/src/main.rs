//! Ember CLI - evaluate JavaScript/TypeScript notebooks from the terminal.

mod colors;
mod export;
mod generate;
mod run;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ember")]
#[command(about = "Evaluate JavaScript/TypeScript notebooks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a notebook headlessly
    Run {
        /// Path to the notebook (.json file)
        notebook: String,

        /// Project directory modules are installed into (default: notebook's directory)
        #[arg(long)]
        project: Option<String>,

        /// Skip installing missing npm packages
        #[arg(long)]
        no_install: bool,

        /// Print the captured environment as JSON after the run
        #[arg(long)]
        env: bool,

        /// Also write console output straight to the terminal
        #[arg(long)]
        echo: bool,
    },

    /// Export notebook as a standalone script
    Export {
        /// Path to the notebook (.json file)
        notebook: String,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Print the compiled evaluation program
    Generate {
        /// Path to the notebook (.json file)
        notebook: String,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<String>,

        /// Also write the source map next to the output
        #[arg(long)]
        map: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Helper to format ember-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(ember_err) = err.downcast_ref::<ember_core::Error>() {
            anyhow::anyhow!("{}", ember_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Run {
            notebook,
            project,
            no_install,
            env,
            echo,
        } => {
            let options = run::RunOptions {
                project,
                install: !no_install,
                print_env: env,
                echo,
            };
            run::execute(&notebook, &options).map_err(format_error)?;
        }

        Commands::Export { notebook, output } => {
            export::execute(&notebook, output.as_deref()).map_err(format_error)?;
        }

        Commands::Generate {
            notebook,
            output,
            map,
        } => {
            generate::execute(&notebook, output.as_deref(), map).map_err(format_error)?;
        }
    }

    Ok(())
}

/// Load a notebook, failing with a readable message when the file is missing.
pub(crate) fn load_notebook(path: &str) -> anyhow::Result<(PathBuf, ember_core::Notebook)> {
    let path = PathBuf::from(path);
    if !path.is_file() {
        anyhow::bail!("Notebook not found: {}", path.display());
    }
    let notebook = ember_core::Notebook::load(&path)?;
    Ok((path, notebook))
}

/// The directory containing `path`, or the current directory for bare names.
pub(crate) fn notebook_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// File name used to label the notebook in error messages.
pub(crate) fn notebook_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
