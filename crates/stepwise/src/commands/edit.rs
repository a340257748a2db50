//! Edit command - apply scripted operations and save.

use std::path::PathBuf;

use miette::{Result, WrapErr};
use stepwise_procedure::{EditSession, EditorConfig};

use crate::script::{self, DefaultSweep};

/// Run the edit command. Nothing is written unless every operation applies.
pub fn run(
    file: PathBuf,
    ops: Vec<String>,
    output: Option<PathBuf>,
    config: EditorConfig,
) -> Result<()> {
    let parsed = ops
        .iter()
        .enumerate()
        .map(|(i, line)| {
            script::parse_op(line)
                .map_err(|e| miette::miette!("Operation {} `{}`: {}", i + 1, line, e))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut session = EditSession::open(&file, config)
        .wrap_err_with(|| format!("Failed to load procedure: {}", file.display()))?;
    session.set_sweep_editor(Box::new(DefaultSweep));

    tracing::info!("Editing {} ({} operation(s))", file.display(), parsed.len());

    for (i, (op, line)) in parsed.into_iter().zip(&ops).enumerate() {
        tracing::debug!("Applying {}", line);
        script::apply(&mut session, op)
            .map_err(|e| miette::miette!("Operation {} `{}`: {}", i + 1, line, e))?;
    }

    let target = output.unwrap_or(file);
    session
        .save_as(&target)
        .wrap_err_with(|| format!("Failed to save procedure: {}", target.display()))?;

    println!(
        "Applied {} operation(s), saved {}",
        ops.len(),
        target.display()
    );
    Ok(())
}
