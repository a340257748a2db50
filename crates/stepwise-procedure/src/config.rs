//! Editor configuration: session defaults and file format settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ProcedureError, Result};
use crate::tabular::SheetKind;

/// Top-level editor configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Editing session behaviour.
    #[serde(default)]
    pub editor: EditingConfig,
    /// Procedure file format.
    #[serde(default)]
    pub format: FormatConfig,
}

/// Editing session behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditingConfig {
    /// Start new procedures from the seed rest step.
    #[serde(default = "default_true")]
    pub seed_new_procedure: bool,
    /// Paste re-attaches the copied sub-steps.
    #[serde(default)]
    pub paste_sub_steps: bool,
    /// Maximum undo depth (0 = unbounded).
    #[serde(default)]
    pub history_limit: usize,
}

/// Procedure file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatConfig {
    /// Cell delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl EditorConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ProcedureError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ProcedureError::Config {
            detail: e.message().to_string(),
        })?;
        config.format.validate()?;
        Ok(config)
    }
}

impl FormatConfig {
    /// Delimited text with the configured delimiter.
    pub fn delimited(&self) -> SheetKind {
        SheetKind::Delimited {
            delimiter: self.delimiter_byte(),
        }
    }

    /// Storage form for a procedure file at `path`.
    pub fn sheet_for(&self, path: &Path) -> SheetKind {
        SheetKind::for_path(path, self.delimiter_byte())
    }

    fn delimiter_byte(&self) -> u8 {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .unwrap_or(b',')
    }

    fn validate(&self) -> Result<()> {
        let d = self.delimiter;
        if !d.is_ascii() || matches!(d, '"' | '\r' | '\n') {
            return Err(ProcedureError::Config {
                detail: format!("delimiter {d:?} cannot separate cells"),
            });
        }
        Ok(())
    }
}

impl Default for EditingConfig {
    fn default() -> Self {
        Self {
            seed_new_procedure: default_true(),
            paste_sub_steps: false,
            history_limit: 0,
        }
    }
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_delimiter() -> char {
    ','
}
