//! Run command implementation for Ember CLI.
//!
//! Evaluates a notebook headlessly, streaming cell output as it arrives.

use std::cell::Cell;
use std::path::PathBuf;
use std::time::Instant;

use ember_core::{
    DisplayValue, EvaluationCallback, Evaluator, EvaluatorConfig, NoopInstaller, NpmInstaller,
};

use crate::colors;

/// Options for `ember run`.
pub struct RunOptions {
    /// Project directory, defaulting to the notebook's directory.
    pub project: Option<String>,
    pub install: bool,
    pub print_env: bool,
    pub echo: bool,
}

/// Execute a notebook.
pub fn execute(notebook_path: &str, options: &RunOptions) -> anyhow::Result<()> {
    let start = Instant::now();

    let (path, notebook) = crate::load_notebook(notebook_path)?;
    let name = crate::notebook_name(&path);
    let project_path = options
        .project
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| crate::notebook_dir(&path));

    let code_cells = notebook.code_cells().len();
    println!(
        "\n{} - {}",
        colors::paint(colors::HEADER, "Ember Run"),
        colors::paint(colors::CELL_STARTED, &name)
    );
    println!("{}", "─".repeat(50));
    println!("Found {} code cells", code_cells);

    if code_cells == 0 {
        println!(
            "\n{}",
            colors::paint(colors::NOTICE, "No code cells found in notebook.")
        );
        return Ok(());
    }

    let config = EvaluatorConfig {
        echo_output: options.echo,
        ..Default::default()
    };
    let evaluator = Evaluator::new(config);
    let mut evaluator = if options.install {
        evaluator.with_installer(NpmInstaller::new())
    } else {
        evaluator.with_installer(NoopInstaller)
    };
    evaluator.set_callback(ProgressCallback::default());

    println!();
    let report = evaluator.evaluate(&notebook, &name, &project_path)?;

    if options.print_env {
        println!("\n{}", colors::paint(colors::HEADER, "Environment:"));
        println!("{}", serde_json::to_string_pretty(&report.environment)?);
    }

    // Summary
    println!("\n{}", "─".repeat(50));
    if report.outputs_capped {
        println!(
            "{}",
            colors::paint(
                colors::NOTICE,
                format!("Output was capped at {} entries", evaluator.config().max_outputs)
            )
        );
    }

    if !report.succeeded() {
        println!(
            "{} with {} error(s) in {:.2}s",
            colors::paint(colors::ERROR, "Failed"),
            report.errors,
            start.elapsed().as_secs_f64()
        );
        anyhow::bail!("Evaluation reported {} error(s)", report.errors);
    }

    println!(
        "{} {} cells in {:.2}s (evaluation: {:.2}s)",
        colors::paint(colors::CELL_ENDED, "Completed"),
        code_cells,
        start.elapsed().as_secs_f64(),
        report.elapsed.as_secs_f64()
    );

    Ok(())
}

/// Prints cell progress and output to the terminal.
#[derive(Default)]
struct ProgressCallback {
    started: Cell<Option<Instant>>,
}

impl EvaluationCallback for ProgressCallback {
    fn on_cell_started(&self, cell_id: &str) {
        self.started.set(Some(Instant::now()));
        println!(
            "{} {}",
            colors::paint(colors::CELL_STARTED, "  ▶ Running"),
            colors::paint(colors::HEADER, cell_id)
        );
        colors::flush_stdout();
    }

    fn on_cell_ended(&self, cell_id: &str) {
        let elapsed = self
            .started
            .get()
            .map(|start| {
                format!(
                    " {}",
                    colors::paint(
                        colors::TIMING,
                        format!("({:.1}ms)", start.elapsed().as_secs_f64() * 1000.0)
                    )
                )
            })
            .unwrap_or_default();
        println!("{} {}{}", colors::paint(colors::CELL_ENDED, "  ✓"), cell_id, elapsed);
    }

    fn on_display(&self, _cell_id: &str, value: &DisplayValue) {
        let text = match &value.data {
            serde_json::Value::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        let style = colors::display_style(value.display_type.as_deref());
        for line in text.trim_end_matches('\n').lines() {
            match style {
                Some(style) => println!("    {}", colors::paint(style, line)),
                None => println!("    {}", line),
            }
        }
        colors::flush_stdout();
    }

    fn on_error(&self, cell_id: &str, message: &str) {
        let label = if cell_id.is_empty() { "notebook" } else { cell_id };
        println!("{}", colors::paint(colors::ERROR, format!("  ✗ {}", label)));
        for line in message.trim_end_matches('\n').lines() {
            println!("    {}", colors::paint(colors::ERROR, line));
        }
    }

    fn on_output_capped(&self) {
        println!(
            "{}",
            colors::paint(
                colors::NOTICE,
                "  ! Output limit reached, further output is dropped"
            )
        );
    }
}
