//! System instruction given to the language model.

use std::path::{Path, PathBuf};

use roam_core::error::RoamError;

/// Built-in instruction for the stamp assistant.
pub const DEFAULT_INSTRUCTION: &str = include_str!("instruction.md");

/// Load the instruction from `path`, or the built-in one when unset.
pub fn load_instruction(path: Option<&str>) -> Result<String, RoamError> {
    let Some(path) = path else {
        return Ok(DEFAULT_INSTRUCTION.to_string());
    };
    let path = expand_home(path);
    let text = std::fs::read_to_string(&path).map_err(|e| {
        RoamError::Config(format!("cannot read instruction {}: {e}", path.display()))
    })?;
    if text.trim().is_empty() {
        return Err(RoamError::Config(format!(
            "instruction file {} is empty",
            path.display()
        )));
    }
    tracing::info!(path = %path.display(), "Loaded custom instruction");
    Ok(text)
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => Path::new(&home).join(rest),
        _ => PathBuf::from(path),
    }
}
