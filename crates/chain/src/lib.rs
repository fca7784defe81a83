//! Multi-pass render-chain builder for an emulation video backend.
//!
//! Given a shader preset and the live dimensions of the emulated frame and
//! display viewport, this crate derives concrete per-pass texture sizes,
//! owns the chain of intermediate render targets, and wires in lookup
//! textures and dynamic shader parameters. The overall flow is:
//!
//! ```text
//!   preset::ShaderPreset ──normalize──▶ resolve_pass_sizes()
//!          │                                  │ per-pass Dimensions
//!          ▼                                  ▼
//!   VideoPipeline ─────────────────▶ PassChain::init ──▶ lookup/import wiring
//!          │ render_frame()
//!          └─▶ upload source ─▶ pass 0 ─▶ … ─▶ pass N-1 ─▶ display
//! ```
//!
//! `VideoPipeline` exclusively owns one `PassChain` at a time. A rebuild
//! constructs the candidate chain fully before the old one is dropped and
//! swaps only on success, so every failure path leaves the last known-good
//! chain active. All graphics-API specifics sit behind the `RenderBackend`
//! trait; see the `chain-wgpu` crate for the stock implementation.

pub mod backend;
mod bindings;
mod chain;
pub mod geometry;
mod resolve;
#[cfg(test)]
mod testutil;

use std::path::Path;

use preset::ShaderPreset;
use thiserror::Error;

pub use backend::{
    BackendError, BoundLut, DrawCall, FrameBuffer, PixelFormat, RenderBackend, StateTracker,
    TrackerFactory,
};
pub use chain::{PassChain, RenderPass};
pub use geometry::Dimensions;
pub use resolve::resolve_pass_sizes;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("pass {pass} is misconfigured: {detail}")]
    Config { pass: usize, detail: String },

    #[error("pass {pass} resolves to a degenerate {width}x{height} target")]
    Resolution { pass: usize, width: u32, height: u32 },

    #[error("failed to allocate resources for pass {pass}: {source}")]
    Allocation {
        pass: usize,
        #[source]
        source: BackendError,
    },

    #[error("dynamic imports could not be bound: {0}")]
    MissingImport(String),

    #[error("failed to load preset: {0}")]
    Preset(#[from] preset::PresetError),

    #[error("frame submission failed: {0}")]
    Render(#[from] BackendError),
}

/// Host configuration fixed at pipeline construction.
pub struct PipelineOptions {
    /// Base content multiplier; the chain's source size is the emulated
    /// frame times this factor, fixed for the lifetime of the chain.
    pub base_scale: u32,
    /// Pixel layout of the frames the emulation core hands over.
    pub format: PixelFormat,
    /// Global smoothing preference `Unspecified` filters resolve against.
    pub smooth: bool,
    /// Constructor for the state tracker backing dynamic imports.
    pub tracker_factory: Option<Box<TrackerFactory>>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            base_scale: 2,
            format: PixelFormat::Xrgb8888,
            smooth: true,
            tracker_factory: None,
        }
    }
}

/// Orchestrates preset normalization, size resolution, and chain ownership
/// for one video backend instance. Single-threaded by design: rebuilds and
/// frame submission take `&mut self`, so a frame can never observe a chain
/// mid-rebuild.
pub struct VideoPipeline<B: RenderBackend> {
    backend: B,
    preset: ShaderPreset,
    chain: PassChain<B>,
    source: Dimensions,
    viewport: Dimensions,
    options: PipelineOptions,
    /// Why the supplied preset was replaced by the pass-through fallback,
    /// when that happened at construction.
    fallback_error: Option<ChainError>,
}

impl<B: RenderBackend> VideoPipeline<B> {
    /// Builds the initial chain. With no preset, or when the supplied
    /// preset's first build fails, the pipeline falls back to an implicit
    /// single viewport-relative pass-through.
    ///
    /// `frame` is the maximum emulated frame size, before the base content
    /// multiplier is applied.
    pub fn new(
        backend: B,
        preset: Option<ShaderPreset>,
        frame: Dimensions,
        viewport: Dimensions,
        options: PipelineOptions,
    ) -> Result<Self, ChainError> {
        if frame.is_degenerate() || options.base_scale == 0 {
            return Err(ChainError::Config {
                pass: 0,
                detail: format!(
                    "source geometry {frame} with base scale {} is degenerate",
                    options.base_scale
                ),
            });
        }
        let source = Dimensions::new(
            frame.width * options.base_scale,
            frame.height * options.base_scale,
        );

        let supplied = preset.is_some();
        let mut preset = preset.unwrap_or_else(|| ShaderPreset::single_pass(None));
        preset.normalize();

        let mut backend = backend;
        let mut fallback_error = None;
        let chain = match build_chain(&mut backend, &preset, source, viewport, &options) {
            Ok(chain) => chain,
            Err(error) if supplied => {
                tracing::warn!(
                    error = %error,
                    "initial chain build failed; falling back to pass-through"
                );
                fallback_error = Some(error);
                preset = ShaderPreset::single_pass(None);
                preset.normalize();
                build_chain(&mut backend, &preset, source, viewport, &options)?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            backend,
            preset,
            chain,
            source,
            viewport,
            options,
            fallback_error,
        })
    }

    /// Tears down the current chain and builds one for the new preset.
    ///
    /// Atomic from the caller's perspective: the candidate is constructed
    /// fully before the swap, and on any failure the previous chain is
    /// retained unmodified.
    pub fn set_shader(&mut self, preset: ShaderPreset) -> Result<(), ChainError> {
        let mut preset = preset;
        preset.normalize();
        let candidate = build_chain(
            &mut self.backend,
            &preset,
            self.source,
            self.viewport,
            &self.options,
        )?;
        self.chain = candidate;
        self.preset = preset;
        self.fallback_error = None;
        tracing::debug!(passes = self.chain.pass_count(), "shader chain rebuilt");
        Ok(())
    }

    /// Loads a preset file and switches to it; see `set_shader`.
    pub fn set_shader_path(&mut self, path: impl AsRef<Path>) -> Result<(), ChainError> {
        let preset = preset::load_preset(path)?;
        self.set_shader(preset)
    }

    /// Updates the display viewport and re-resolves every pass that depends
    /// on it. Absolute-sized passes resolve to the same dimensions and are
    /// left untouched. A zero dimension (minimized surface) is ignored.
    ///
    /// Atomic like `set_shader`: replacement targets are all allocated
    /// before any pass is touched, so a failed resize leaves every pass and
    /// the stored viewport at their previous values.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), ChainError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let viewport = Dimensions::new(width, height);
        if viewport == self.viewport {
            return Ok(());
        }

        let sizes = resolve_pass_sizes(&self.preset, self.source, viewport)?;
        self.chain.resize_passes(&mut self.backend, &sizes)?;
        self.viewport = viewport;
        Ok(())
    }

    /// Pushes one emulated frame through the chain to the display.
    pub fn render_frame(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
    ) -> Result<(), ChainError> {
        let frame = FrameBuffer {
            data,
            width,
            height,
            pitch,
            format: self.options.format,
        };
        self.chain.render_frame(&mut self.backend, &frame)?;
        Ok(())
    }

    pub fn chain(&self) -> &PassChain<B> {
        &self.chain
    }

    /// The error that forced the construction-time fall back to the
    /// pass-through chain, until a later `set_shader` succeeds. `None` when
    /// the requested preset is the one rendering.
    pub fn last_build_error(&self) -> Option<&ChainError> {
        self.fallback_error.as_ref()
    }

    pub fn preset(&self) -> &ShaderPreset {
        &self.preset
    }

    pub fn viewport(&self) -> Dimensions {
        self.viewport
    }

    pub fn source_size(&self) -> Dimensions {
        self.source
    }
}

fn build_chain<B: RenderBackend>(
    backend: &mut B,
    preset: &ShaderPreset,
    source: Dimensions,
    viewport: Dimensions,
    options: &PipelineOptions,
) -> Result<PassChain<B>, ChainError> {
    let sizes = resolve_pass_sizes(preset, source, viewport)?;
    let mut chain = PassChain::init(backend, preset, &sizes, source, options.format, options.smooth)?;
    chain.set_lookups(bindings::load_lookups(
        backend,
        &preset.textures,
        options.smooth,
    ));
    chain.set_tracker(bindings::init_tracker(
        &preset.imports,
        options.tracker_factory.as_deref(),
    )?);
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockBackend;
    use preset::{DynamicImport, PassScale, PassSpec, ScaleType};

    const FRAME: Dimensions = Dimensions {
        width: 256,
        height: 224,
    };
    const VIEWPORT: Dimensions = Dimensions {
        width: 1920,
        height: 1080,
    };

    fn options() -> PipelineOptions {
        PipelineOptions {
            base_scale: 4,
            ..Default::default()
        }
    }

    fn three_pass_preset() -> ShaderPreset {
        ShaderPreset {
            passes: vec![
                PassSpec::identity(PassScale::uniform(ScaleType::Source, 1.0)),
                PassSpec::identity(PassScale::uniform(ScaleType::Absolute, 512.0)),
                PassSpec::identity(PassScale::viewport_identity()),
            ],
            ..Default::default()
        }
    }

    fn submit_frame(pipeline: &mut VideoPipeline<MockBackend>) {
        let data = vec![0u8; 256 * 224 * 4];
        pipeline.render_frame(&data, 256, 224, 256 * 4).unwrap();
    }

    #[test]
    fn missing_preset_builds_the_pass_through_chain() {
        let pipeline =
            VideoPipeline::new(MockBackend::default(), None, FRAME, VIEWPORT, options()).unwrap();

        assert_eq!(pipeline.chain().pass_count(), 1);
        assert_eq!(pipeline.chain().pass_size(0), Some(VIEWPORT));
        assert_eq!(pipeline.source_size(), Dimensions::new(1024, 896));
    }

    #[test]
    fn first_build_failure_falls_back_to_pass_through() {
        let mut backend = MockBackend::default();
        backend.fail_target_at(0);

        let mut pipeline = VideoPipeline::new(
            backend,
            Some(three_pass_preset()),
            FRAME,
            VIEWPORT,
            options(),
        )
        .unwrap();

        assert_eq!(pipeline.chain().pass_count(), 1);
        assert_eq!(pipeline.chain().pass_size(0), Some(VIEWPORT));
        // The failure stays reportable until a later preset builds.
        assert!(matches!(
            pipeline.last_build_error(),
            Some(ChainError::Allocation { pass: 0, .. })
        ));

        pipeline.set_shader(ShaderPreset::single_pass(None)).unwrap();
        assert!(pipeline.last_build_error().is_none());
    }

    #[test]
    fn rebuild_failure_keeps_the_old_chain_queryable() {
        let mut pipeline = VideoPipeline::new(
            MockBackend::default(),
            Some(three_pass_preset()),
            FRAME,
            VIEWPORT,
            options(),
        )
        .unwrap();
        // Initial build used serials 0..=2; fail the candidate's second
        // intermediate target, i.e. allocation of pass 2 of 3.
        pipeline.backend.fail_target_at(5);

        let err = pipeline.set_shader(three_pass_preset()).unwrap_err();
        assert!(matches!(err, ChainError::Allocation { pass: 1, .. }));

        assert_eq!(pipeline.chain().pass_count(), 3);
        assert_eq!(pipeline.chain().pass_size(0), Some(Dimensions::new(1024, 1024)));
        assert_eq!(pipeline.chain().pass_size(1), Some(Dimensions::new(512, 512)));
        assert_eq!(pipeline.chain().pass_size(2), Some(VIEWPORT));
        assert_eq!(pipeline.backend.live_targets(), 3);

        // The retained chain still renders.
        submit_frame(&mut pipeline);
        assert_eq!(pipeline.backend.draws().len(), 3);
    }

    #[test]
    fn successful_rebuild_swaps_and_releases_the_old_chain() {
        let mut pipeline = VideoPipeline::new(
            MockBackend::default(),
            Some(three_pass_preset()),
            FRAME,
            VIEWPORT,
            options(),
        )
        .unwrap();
        assert_eq!(pipeline.backend.live_targets(), 3);

        pipeline
            .set_shader(ShaderPreset::single_pass(None))
            .unwrap();
        assert_eq!(pipeline.chain().pass_count(), 1);
        // Only the new chain's source texture remains alive.
        assert_eq!(pipeline.backend.live_targets(), 1);
    }

    #[test]
    fn resize_touches_only_viewport_dependent_passes() {
        let mut pipeline = VideoPipeline::new(
            MockBackend::default(),
            Some(three_pass_preset()),
            FRAME,
            VIEWPORT,
            options(),
        )
        .unwrap();
        let created_before = pipeline.backend.targets_created();

        pipeline.resize(1280, 720).unwrap();

        // Source-relative and absolute passes resolve to the same sizes and
        // the terminal pass owns no target, so nothing was reallocated.
        assert_eq!(pipeline.backend.targets_created(), created_before);
        assert_eq!(pipeline.chain().pass_size(1), Some(Dimensions::new(512, 512)));
        assert_eq!(pipeline.chain().pass_size(2), Some(Dimensions::new(1280, 720)));
        assert_eq!(pipeline.viewport(), Dimensions::new(1280, 720));
    }

    #[test]
    fn resize_reallocates_intermediate_viewport_passes() {
        let preset = ShaderPreset {
            passes: vec![
                PassSpec::identity(PassScale::uniform(ScaleType::Viewport, 0.5)),
                PassSpec::identity(PassScale::viewport_identity()),
            ],
            ..Default::default()
        };
        let mut pipeline = VideoPipeline::new(
            MockBackend::default(),
            Some(preset),
            FRAME,
            VIEWPORT,
            options(),
        )
        .unwrap();
        // 960x540 pads to 1024x1024.
        assert_eq!(pipeline.chain().pass_size(0), Some(Dimensions::new(1024, 1024)));
        let created_before = pipeline.backend.targets_created();

        pipeline.resize(1280, 720).unwrap();
        // 640x360 pads to 1024x512, so the backing target is recreated.
        assert_eq!(pipeline.chain().pass_size(0), Some(Dimensions::new(1024, 512)));
        assert_eq!(pipeline.backend.targets_created(), created_before + 1);
        assert_eq!(pipeline.backend.live_targets(), 2);
    }

    #[test]
    fn failed_resize_leaves_every_pass_and_the_viewport_untouched() {
        let preset = ShaderPreset {
            passes: vec![
                PassSpec::identity(PassScale::uniform(ScaleType::Viewport, 0.5)),
                PassSpec::identity(PassScale::uniform(ScaleType::Viewport, 0.25)),
                PassSpec::identity(PassScale::viewport_identity()),
            ],
            ..Default::default()
        };
        let mut pipeline = VideoPipeline::new(
            MockBackend::default(),
            Some(preset),
            FRAME,
            VIEWPORT,
            options(),
        )
        .unwrap();
        assert_eq!(pipeline.chain().pass_size(0), Some(Dimensions::new(1024, 1024)));
        assert_eq!(pipeline.chain().pass_size(1), Some(Dimensions::new(512, 512)));
        // Both intermediate passes need new targets at 640x480; fail the
        // second replacement allocation.
        pipeline.backend.fail_target_at(4);

        let err = pipeline.resize(640, 480).unwrap_err();
        assert!(matches!(err, ChainError::Allocation { pass: 1, .. }));

        assert_eq!(pipeline.chain().pass_size(0), Some(Dimensions::new(1024, 1024)));
        assert_eq!(pipeline.chain().pass_size(1), Some(Dimensions::new(512, 512)));
        assert_eq!(pipeline.chain().pass_size(2), Some(VIEWPORT));
        assert_eq!(pipeline.viewport(), VIEWPORT);
        assert_eq!(pipeline.backend.live_targets(), 3);

        // The untouched chain still renders at the old sizes.
        submit_frame(&mut pipeline);
        assert_eq!(pipeline.backend.draws().len(), 3);
    }

    #[test]
    fn zero_resize_is_ignored() {
        let mut pipeline =
            VideoPipeline::new(MockBackend::default(), None, FRAME, VIEWPORT, options()).unwrap();
        pipeline.resize(0, 720).unwrap();
        assert_eq!(pipeline.viewport(), VIEWPORT);
    }

    #[test]
    fn degenerate_source_geometry_is_a_config_error() {
        let err = VideoPipeline::new(
            MockBackend::default(),
            None,
            Dimensions::new(0, 224),
            VIEWPORT,
            options(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ChainError::Config { .. }));
    }

    #[test]
    fn missing_import_aborts_rebuild_and_retains_the_chain() {
        let mut pipeline = VideoPipeline::new(
            MockBackend::default(),
            Some(three_pass_preset()),
            FRAME,
            VIEWPORT,
            options(),
        )
        .unwrap();

        let mut preset = ShaderPreset::single_pass(None);
        preset.imports.push(DynamicImport {
            name: "scanline".to_string(),
            spec: "ram 0x0042 byte".to_string(),
        });
        let err = pipeline.set_shader(preset).unwrap_err();
        assert!(matches!(err, ChainError::MissingImport(_)));
        assert_eq!(pipeline.chain().pass_count(), 3);
        assert_eq!(pipeline.backend.live_targets(), 3);
    }

    #[test]
    fn tracker_values_reach_every_draw() {
        struct FrameCounter;
        impl StateTracker for FrameCounter {
            fn update(&mut self, frame_count: u64) -> Vec<(String, f32)> {
                vec![("scanline".to_string(), frame_count as f32)]
            }
        }

        let mut preset = ShaderPreset::single_pass(None);
        preset.imports.push(DynamicImport {
            name: "scanline".to_string(),
            spec: "ram 0x0042 byte".to_string(),
        });

        let mut pipeline = VideoPipeline::new(
            MockBackend::default(),
            Some(preset),
            FRAME,
            VIEWPORT,
            PipelineOptions {
                base_scale: 4,
                tracker_factory: Some(Box::new(|_imports| {
                    Ok(Box::new(FrameCounter) as Box<dyn StateTracker>)
                })),
                ..Default::default()
            },
        )
        .unwrap();

        submit_frame(&mut pipeline);
        submit_frame(&mut pipeline);

        let draws = pipeline.backend.draws();
        assert_eq!(draws[0].params, vec![("scanline".to_string(), 0.0)]);
        assert_eq!(draws[1].params, vec![("scanline".to_string(), 1.0)]);
    }

    #[test]
    fn unspecified_filters_resolve_to_the_smoothing_preference() {
        let mut pipeline = VideoPipeline::new(
            MockBackend::default(),
            None,
            FRAME,
            VIEWPORT,
            PipelineOptions {
                base_scale: 4,
                smooth: false,
                ..Default::default()
            },
        )
        .unwrap();

        submit_frame(&mut pipeline);
        assert!(!pipeline.backend.draws()[0].linear);
    }
}
