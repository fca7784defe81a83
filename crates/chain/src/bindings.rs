//! Auxiliary resource wiring performed once per chain build.
//!
//! Lookup textures are decoded on the CPU and handed to the backend as RGBA8
//! pixels; a texture that fails to load is logged and skipped so one bad path
//! never takes the whole chain down. Dynamic imports are the opposite: a
//! preset that declares imports cannot run its shaders without them, so a
//! missing state tracker aborts the build.

use anyhow::Context;

use preset::{DynamicImport, FilterMode, LookupTexture};

use crate::backend::{BoundLut, RenderBackend, StateTracker, TrackerFactory};
use crate::ChainError;

/// Loads every lookup texture the preset declares, resolving `Unspecified`
/// filters against the global smoothing preference. Failures are non-fatal.
pub(crate) fn load_lookups<B: RenderBackend>(
    backend: &mut B,
    textures: &[LookupTexture],
    smooth: bool,
) -> Vec<BoundLut<B::Target>> {
    let mut luts = Vec::with_capacity(textures.len());
    for texture in textures {
        match load_one(backend, texture, smooth) {
            Ok(lut) => luts.push(lut),
            Err(error) => tracing::warn!(
                id = %texture.id,
                path = %texture.path.display(),
                error = %error,
                "skipping lookup texture that failed to load"
            ),
        }
    }
    luts
}

fn load_one<B: RenderBackend>(
    backend: &mut B,
    texture: &LookupTexture,
    smooth: bool,
) -> anyhow::Result<BoundLut<B::Target>> {
    let image = image::open(&texture.path)
        .with_context(|| format!("failed to open lookup texture at {}", texture.path.display()))?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    let linear = match texture.filter {
        FilterMode::Linear => true,
        FilterMode::Nearest => false,
        FilterMode::Unspecified => smooth,
    };
    let handle = backend.create_texture(width, height, &rgba, linear)?;
    Ok(BoundLut {
        id: texture.id.clone(),
        texture: handle,
        linear,
    })
}

/// Obtains the state tracker backing the preset's dynamic imports. An empty
/// import list needs no tracker; a non-empty one without a working factory is
/// fatal to the build.
pub(crate) fn init_tracker(
    imports: &[DynamicImport],
    factory: Option<&TrackerFactory>,
) -> Result<Option<Box<dyn StateTracker>>, ChainError> {
    if imports.is_empty() {
        return Ok(None);
    }

    let factory = factory.ok_or_else(|| {
        ChainError::MissingImport(
            "preset declares dynamic imports but no state tracker is available".to_string(),
        )
    })?;
    match factory(imports) {
        Ok(tracker) => {
            tracing::debug!(imports = imports.len(), "state tracker initialised");
            Ok(Some(tracker))
        }
        Err(error) => Err(ChainError::MissingImport(error.to_string())),
    }
}
