//! Filesystem loader for preset files.
//!
//! Presets are TOML documents describing passes, lookup textures, and dynamic
//! imports. The loader parses, validates, and resolves relative paths against
//! the preset's own directory so the render chain only ever sees concrete
//! locations.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::ShaderPreset;

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("preset not found at {0}")]
    Missing(PathBuf),

    #[error("failed to parse preset: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("preset validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads a preset from disk and returns it with all paths resolved.
///
/// The returned preset is validated but not yet normalized; the chain builder
/// applies the defaulting/synthesis rules when it takes ownership.
pub fn load_preset(path: impl AsRef<Path>) -> Result<ShaderPreset, PresetError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(PresetError::Missing(path.to_path_buf()));
    }

    let raw = fs::read_to_string(path)?;
    let mut preset: ShaderPreset = toml::from_str(&raw)?;
    let issues = preset.validate();
    if !issues.is_empty() {
        return Err(PresetError::Validation(issues));
    }

    if let Some(base) = path.parent() {
        preset.resolve_relative(base);
    }

    tracing::debug!(
        preset = %path.display(),
        passes = preset.passes.len(),
        textures = preset.textures.len(),
        imports = preset.imports.len(),
        "loaded shader preset"
    );
    Ok(preset)
}
