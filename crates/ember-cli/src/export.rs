//! Export command implementation for Ember CLI.
//!
//! Writes the notebook's code cells as one standalone script.

use std::fs;

use ember_core::CodeGenerator;

use crate::colors;

/// Export a notebook to a script, or to stdout when no output is given.
pub fn execute(notebook_path: &str, output_path: Option<&str>) -> anyhow::Result<()> {
    let (_, notebook) = crate::load_notebook(notebook_path)?;
    let script = CodeGenerator::export_code(&notebook.cells);

    match output_path {
        Some(output) => {
            fs::write(output, &script)?;
            eprintln!(
                "{} {} code cells to {}",
                colors::paint(colors::CELL_ENDED, "Exported"),
                notebook.code_cells().len(),
                output
            );
        }
        None => print!("{}", script),
    }

    Ok(())
}
