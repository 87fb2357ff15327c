//! Program document persistence
//!
//! A program document is self-contained JSON, golden snapshots included.
//! Loading is all-or-nothing: a document that fails to parse leaves the
//! caller's active program untouched, and there is no schema migration.

use std::path::{Path, PathBuf};

use anyhow::Result;
use thiserror::Error;
use tracing::info;

use crate::program::Program;

/// Why a program document could not be loaded.
#[derive(Debug, Error)]
pub enum ProgramLoadError {
    #[error("failed to read program document: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed program document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serialize a program to its document form.
pub fn serialize_program(program: &Program) -> Result<String> {
    Ok(serde_json::to_string_pretty(program)?)
}

/// Parse a program document. Any missing or malformed field fails the whole
/// parse; there is no partial application.
pub fn parse_program(document: &str) -> Result<Program, ProgramLoadError> {
    Ok(serde_json::from_str(document)?)
}

/// Write a program document to disk.
pub fn save_program(program: &Program, path: &Path) -> Result<()> {
    let document = serialize_program(program)?;
    std::fs::write(path, document)?;
    info!(program = %program.id, path = %path.display(), "program saved");
    Ok(())
}

/// Read and parse a program document from disk.
pub fn load_program(path: &Path) -> Result<Program, ProgramLoadError> {
    let document = std::fs::read_to_string(path)?;
    let program = parse_program(&document)?;
    info!(program = %program.id, rois = program.rois.len(), "program loaded");
    Ok(program)
}

/// Application data directory.
pub fn get_data_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "gonogo", "gonogo")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Application configuration directory.
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "gonogo", "gonogo")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}
