//! New command - write a fresh procedure file.

use std::path::PathBuf;

use miette::{Result, WrapErr};
use stepwise_procedure::{EditSession, EditorConfig};

/// Run the new command.
pub fn run(file: PathBuf, force: bool, config: EditorConfig) -> Result<()> {
    if file.exists() && !force {
        return Err(miette::miette!(
            "Procedure file already exists: {} (use --force to overwrite)",
            file.display()
        ));
    }

    let mut session = EditSession::new(config);
    session
        .save_as(&file)
        .wrap_err_with(|| format!("Failed to write procedure: {}", file.display()))?;

    tracing::info!("Created {}", file.display());
    println!("Created {}", file.display());
    Ok(())
}
