//! Show command - render the steps of a procedure.

use std::path::PathBuf;

use miette::{Result, WrapErr};
use stepwise_procedure::{render, EditSession, EditorConfig};

use crate::output::{print_json, OutputFormat, ShowOutput, TableRenderer};

/// Run the show command.
pub fn run(file: PathBuf, format: OutputFormat, config: EditorConfig) -> Result<()> {
    let session = EditSession::open(&file, config)
        .wrap_err_with(|| format!("Failed to load procedure: {}", file.display()))?;

    tracing::info!("Showing {}", file.display());

    if format.is_json() {
        let mut sweeps: Vec<_> = session.store().sweeps().map(|(_, sweep)| sweep).collect();
        sweeps.sort_by_key(|sweep| sweep.step_number);
        print_json(&ShowOutput {
            file: file.display().to_string(),
            steps: render::project_all(session.store()),
            sweeps,
        });
        return Ok(());
    }

    let mut table = TableRenderer::default();
    session.render(&mut table);
    println!("Procedure: {}", file.display());
    println!();
    for line in table.finish() {
        println!("{line}");
    }

    let mut sweeps: Vec<_> = session.store().sweeps().collect();
    sweeps.sort_by_key(|(_, sweep)| sweep.step_number);
    if !sweeps.is_empty() {
        println!();
        println!("Sweeps:");
        for (row, sweep) in sweeps {
            println!(
                "  step {} (row {}): {} {} Hz -> {} Hz, amplitude {}, {} points{}",
                sweep.step_number,
                row,
                sweep.mode,
                sweep.start_frequency_hz,
                sweep.stop_frequency_hz,
                sweep.amplitude,
                sweep.point_count,
                sweep
                    .source_file_path
                    .as_deref()
                    .map(|path| format!(", file {path}"))
                    .unwrap_or_default(),
            );
        }
    }
    Ok(())
}
