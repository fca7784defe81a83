//! Core preset types shared by the loader and the render chain.
//!
//! Types:
//!
//! - `ShaderPreset` holds the ordered pass list plus lookup textures and
//!   dynamic imports, and applies the defaulting/synthesis rules that
//!   guarantee the chain always terminates on the viewport.
//! - `PassSpec` is one shader stage; `scale == None` means the pass declared
//!   no explicit sizing and will be defaulted by `normalize`.
//! - `PassScale` pairs a per-axis `ScaleType` with a scale factor. For
//!   `Absolute` axes the factor is the output size in pixels.
//! - `FilterMode` stays `Unspecified` until resolved against the global
//!   smoothing preference at chain-build time.
//! - `LookupTexture` and `DynamicImport` describe the auxiliary resources a
//!   chain build wires into the passes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Upper bound on shader stages in one preset.
pub const MAX_PASSES: usize = 8;

/// Reference dimension a pass's output size is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleType {
    /// Previous pass's output (or the raw source frame for pass 0).
    Input,
    /// The original pass-0 input, fixed for the whole chain.
    Source,
    /// The final on-screen display rectangle.
    Viewport,
    /// Factors are literal pixel counts.
    Absolute,
}

/// Per-axis scaling rule for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct PassScale {
    pub type_x: ScaleType,
    pub type_y: ScaleType,
    pub factor_x: f32,
    pub factor_y: f32,
}

impl PassScale {
    pub fn uniform(kind: ScaleType, factor: f32) -> Self {
        Self {
            type_x: kind,
            type_y: kind,
            factor_x: factor,
            factor_y: factor,
        }
    }

    /// The 1.0x1.0 viewport rule every chain must end on.
    pub fn viewport_identity() -> Self {
        Self::uniform(ScaleType::Viewport, 1.0)
    }

    /// True only for the exact rule a chain may terminate on: both axes
    /// viewport-relative with factor 1.0. A scaled viewport pass still needs
    /// a pass-through appended after it.
    pub fn targets_viewport(&self) -> bool {
        self.type_x == ScaleType::Viewport
            && self.type_y == ScaleType::Viewport
            && self.factor_x == 1.0
            && self.factor_y == 1.0
    }
}

/// Texture filtering requested by a pass or lookup texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Unspecified,
    Linear,
    Nearest,
}

impl Default for FilterMode {
    fn default() -> Self {
        Self::Unspecified
    }
}

/// One shader stage in the pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PassSpec {
    /// Shader source reference; `None` means the backend's stock blit.
    #[serde(default)]
    pub shader: Option<PathBuf>,
    #[serde(default)]
    pub filter: FilterMode,
    /// Explicit sizing, if the pass declared any.
    #[serde(default)]
    pub scale: Option<PassScale>,
}

impl PassSpec {
    /// A pass-through stage with no shader transform.
    pub fn identity(scale: PassScale) -> Self {
        Self {
            shader: None,
            filter: FilterMode::Unspecified,
            scale: Some(scale),
        }
    }

    pub fn is_explicitly_sized(&self) -> bool {
        self.scale.is_some()
    }
}

/// Static auxiliary texture available to shader passes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LookupTexture {
    pub id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub filter: FilterMode,
}

/// Named value resolved each frame by the external state tracker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DynamicImport {
    pub name: String,
    /// Opaque to this crate; interpreted by the state tracker only.
    pub spec: String,
}

/// Ordered sequence of passes plus the auxiliary resources wired in at
/// chain-build time.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ShaderPreset {
    #[serde(default)]
    pub passes: Vec<PassSpec>,
    #[serde(default)]
    pub textures: Vec<LookupTexture>,
    #[serde(default)]
    pub imports: Vec<DynamicImport>,
}

impl ShaderPreset {
    /// The implicit preset used when no preset file is supplied: one
    /// viewport-relative pass-through.
    pub fn single_pass(shader: Option<PathBuf>) -> Self {
        Self {
            passes: vec![PassSpec {
                shader,
                filter: FilterMode::Unspecified,
                scale: Some(PassScale::viewport_identity()),
            }],
            textures: Vec::new(),
            imports: Vec::new(),
        }
    }

    /// Applies the defaulting and synthesis rules so every pass carries a
    /// concrete scale and the final pass targets the viewport.
    ///
    /// Unsized passes become input-relative 1.0x1.0, except the last pass
    /// which becomes viewport-relative 1.0x1.0. If the last pass is
    /// explicitly sized to something other than a viewport target, a
    /// synthetic pass-through is appended when there is room; at the pass
    /// bound the last pass's scale is overwritten instead. Idempotent.
    pub fn normalize(&mut self) {
        let count = self.passes.len();
        if count == 0 {
            return;
        }

        for (index, pass) in self.passes.iter_mut().enumerate() {
            if pass.scale.is_none() {
                pass.scale = Some(if index + 1 == count {
                    PassScale::viewport_identity()
                } else {
                    PassScale::uniform(ScaleType::Input, 1.0)
                });
            }
        }

        let last_targets_viewport = self
            .passes
            .last()
            .and_then(|pass| pass.scale)
            .map(|scale| scale.targets_viewport())
            .unwrap_or(false);
        if last_targets_viewport {
            return;
        }

        if self.passes.len() < MAX_PASSES {
            self.passes
                .push(PassSpec::identity(PassScale::viewport_identity()));
        } else if let Some(last) = self.passes.last_mut() {
            tracing::warn!(
                passes = count,
                "pass bound reached; forcing final pass to viewport scale"
            );
            last.scale = Some(PassScale::viewport_identity());
        }
    }

    /// Returns human-readable issues so loaders can surface
    /// misconfigurations without panicking.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.passes.is_empty() {
            issues.push("preset must declare at least one pass".to_string());
        }
        if self.passes.len() > MAX_PASSES {
            issues.push(format!(
                "preset declares {} passes which exceeds the bound of {}",
                self.passes.len(),
                MAX_PASSES
            ));
        }
        for (index, pass) in self.passes.iter().enumerate() {
            let Some(scale) = pass.scale else { continue };
            for (axis, kind, factor) in [
                ("x", scale.type_x, scale.factor_x),
                ("y", scale.type_y, scale.factor_y),
            ] {
                if factor <= 0.0 {
                    issues.push(format!(
                        "pass {index} has non-positive scale factor {factor} on {axis}"
                    ));
                } else if kind == ScaleType::Absolute && (factor.fract() != 0.0 || factor < 1.0) {
                    issues.push(format!(
                        "pass {index} has non-integral absolute size {factor} on {axis}"
                    ));
                }
            }
        }
        for (index, texture) in self.textures.iter().enumerate() {
            if texture.id.is_empty() {
                issues.push(format!("lookup texture {index} has an empty id"));
            }
            if self.textures[..index]
                .iter()
                .any(|other| other.id == texture.id)
            {
                issues.push(format!("duplicate lookup texture id '{}'", texture.id));
            }
        }
        for import in &self.imports {
            if import.name.is_empty() {
                issues.push("dynamic import with an empty name".to_string());
            }
        }
        issues
    }

    /// Resolves shader and texture paths relative to the preset's own
    /// directory. Absolute paths are left untouched.
    pub fn resolve_relative(&mut self, base: &Path) {
        for pass in &mut self.passes {
            if let Some(shader) = &mut pass.shader {
                if shader.is_relative() {
                    *shader = base.join(shader.as_path());
                }
            }
        }
        for texture in &mut self.textures {
            if texture.path.is_relative() {
                texture.path = base.join(&texture.path);
            }
        }
    }
}
