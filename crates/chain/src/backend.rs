//! The narrow capability seam between the sizing/ownership logic and a
//! concrete graphics API.
//!
//! The chain never issues graphics calls itself; it asks a `RenderBackend`
//! for targets, shaders, and draws, and owns whatever handles come back.
//! Dropping a handle must release the underlying GPU resource, which is what
//! makes chain rollback and swap-on-rebuild safe without explicit teardown.

use std::path::Path;

use preset::DynamicImport;
use thiserror::Error;

use crate::geometry::Dimensions;

/// Pixel layout of the emulated source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb565,
    Xrgb8888,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to allocate a {width}x{height} render target: {detail}")]
    TargetCreation {
        width: u32,
        height: u32,
        detail: String,
    },

    #[error("failed to prepare shader '{reference}': {detail}")]
    ShaderCreation { reference: String, detail: String },

    #[error("frame upload failed: {detail}")]
    Upload { detail: String },

    #[error("draw submission failed: {detail}")]
    Draw { detail: String },
}

/// One emulated frame handed over by the core for a single render call.
#[derive(Debug, Clone, Copy)]
pub struct FrameBuffer<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes per row in `data`; may exceed `width * bytes_per_pixel`.
    pub pitch: usize,
    pub format: PixelFormat,
}

/// A lookup texture already uploaded to the backend, keyed by its preset id.
pub struct BoundLut<T> {
    pub id: String,
    pub texture: T,
    pub linear: bool,
}

/// Everything the backend needs to run one pass.
pub struct DrawCall<'a, B: RenderBackend> {
    pub shader: &'a B::Shader,
    /// Previous pass's output, or the chain's source texture for pass 0.
    pub input: &'a B::Target,
    /// `None` rasterizes to the display viewport.
    pub output: Option<&'a B::Target>,
    pub output_size: Dimensions,
    /// Filter for sampling `input`, already resolved against the global
    /// smoothing preference.
    pub linear: bool,
    pub luts: &'a [BoundLut<B::Target>],
    /// Dynamic parameter values for this frame, in declaration order.
    pub params: &'a [(String, f32)],
}

/// Backend capability used by `PassChain`. Implementations own the device
/// plumbing; the chain owns every `Target`/`Shader` handed out.
pub trait RenderBackend: Sized {
    /// Off-screen texture a pass renders into, later sampled by the next pass.
    type Target;
    /// Compiled shader bound by one pass.
    type Shader;

    fn create_target(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self::Target, BackendError>;

    /// `None` selects the backend's stock pass-through shader.
    fn create_shader(&mut self, reference: Option<&Path>) -> Result<Self::Shader, BackendError>;

    /// Static RGBA8 texture, used for lookup tables.
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
        linear: bool,
    ) -> Result<Self::Target, BackendError>;

    fn upload_frame(
        &mut self,
        target: &Self::Target,
        frame: &FrameBuffer<'_>,
    ) -> Result<(), BackendError>;

    fn draw(&mut self, call: DrawCall<'_, Self>) -> Result<(), BackendError>;
}

/// Resolves the declared dynamic imports against live machine state once per
/// frame. Construction is host business; see `TrackerFactory`.
pub trait StateTracker {
    fn update(&mut self, frame_count: u64) -> Vec<(String, f32)>;
}

/// Host-supplied constructor for the state tracker backing a preset's
/// dynamic imports. Called once per chain build when the import list is
/// non-empty; failure is fatal to that build.
pub type TrackerFactory =
    dyn Fn(&[DynamicImport]) -> anyhow::Result<Box<dyn StateTracker>> + Send + Sync;
