//! Ownership of the per-pass GPU resources.
//!
//! A `PassChain` owns one `RenderPass` per preset entry plus the source
//! texture the emulated frame is uploaded into. The chain is replaced as a
//! whole unit on rebuild; the only in-place mutation allowed after `init` is
//! `set_pass_size`, which swaps a single pass's backing target.

use preset::{FilterMode, PassSpec, ShaderPreset};

use crate::backend::{
    BackendError, BoundLut, DrawCall, FrameBuffer, PixelFormat, RenderBackend, StateTracker,
};
use crate::geometry::Dimensions;
use crate::ChainError;

/// One shader stage and the target it renders into. The terminal pass owns
/// no target; it rasterizes to the display.
pub struct RenderPass<B: RenderBackend> {
    shader: B::Shader,
    filter: FilterMode,
    size: Dimensions,
    target: Option<B::Target>,
}

pub struct PassChain<B: RenderBackend> {
    passes: Vec<RenderPass<B>>,
    source: B::Target,
    source_size: Dimensions,
    format: PixelFormat,
    smooth: bool,
    luts: Vec<BoundLut<B::Target>>,
    tracker: Option<Box<dyn StateTracker>>,
    frame_count: u64,
}

impl<B: RenderBackend> PassChain<B> {
    /// Allocates the whole chain: the source texture plus one pass per
    /// preset entry at its resolved size.
    ///
    /// Any single allocation failure drops everything allocated so far and
    /// reports which pass failed; a partially constructed chain is never
    /// returned.
    pub fn init(
        backend: &mut B,
        preset: &ShaderPreset,
        sizes: &[Dimensions],
        source_size: Dimensions,
        format: PixelFormat,
        smooth: bool,
    ) -> Result<Self, ChainError> {
        if preset.passes.len() != sizes.len() {
            return Err(ChainError::Config {
                pass: 0,
                detail: format!(
                    "{} passes but {} resolved sizes",
                    preset.passes.len(),
                    sizes.len()
                ),
            });
        }

        let source = backend
            .create_target(source_size.width, source_size.height, format)
            .map_err(|source| ChainError::Allocation { pass: 0, source })?;

        let mut chain = Self {
            passes: Vec::with_capacity(sizes.len()),
            source,
            source_size,
            format,
            smooth,
            luts: Vec::new(),
            tracker: None,
            frame_count: 0,
        };

        let count = preset.passes.len();
        for (index, (spec, size)) in preset.passes.iter().zip(sizes.iter()).enumerate() {
            let terminal = index + 1 == count;
            chain.add_pass(backend, spec, *size, terminal)?;
        }

        tracing::debug!(
            passes = chain.passes.len(),
            source = %source_size,
            "render chain allocated"
        );
        Ok(chain)
    }

    /// Appends one pass during initial construction. Not a runtime mutation;
    /// chain topology is fixed once `init` returns.
    pub fn add_pass(
        &mut self,
        backend: &mut B,
        spec: &PassSpec,
        size: Dimensions,
        terminal: bool,
    ) -> Result<(), ChainError> {
        let index = self.passes.len();
        let shader = backend
            .create_shader(spec.shader.as_deref())
            .map_err(|source| ChainError::Allocation {
                pass: index,
                source,
            })?;
        let target = if terminal {
            None
        } else {
            Some(
                backend
                    .create_target(size.width, size.height, self.format)
                    .map_err(|source| ChainError::Allocation {
                        pass: index,
                        source,
                    })?,
            )
        };

        self.passes.push(RenderPass {
            shader,
            filter: spec.filter,
            size,
            target,
        });
        Ok(())
    }

    /// Recreates a single pass's backing target at a new size. The stored
    /// size and old target are kept whenever allocation fails.
    pub fn set_pass_size(
        &mut self,
        backend: &mut B,
        index: usize,
        size: Dimensions,
    ) -> Result<(), ChainError> {
        let format = self.format;
        let pass = self
            .passes
            .get_mut(index)
            .ok_or_else(|| ChainError::Config {
                pass: index,
                detail: "pass index out of range".to_string(),
            })?;
        if pass.size == size {
            return Ok(());
        }

        if pass.target.is_some() {
            let target = backend
                .create_target(size.width, size.height, format)
                .map_err(|source| ChainError::Allocation {
                    pass: index,
                    source,
                })?;
            pass.target = Some(target);
        }
        tracing::debug!(pass = index, from = %pass.size, to = %size, "pass resized");
        pass.size = size;
        Ok(())
    }

    /// Re-sizes every pass in one step. All replacement targets are
    /// allocated before any pass is touched, so an allocation failure leaves
    /// the whole chain at its previous sizes.
    pub fn resize_passes(
        &mut self,
        backend: &mut B,
        sizes: &[Dimensions],
    ) -> Result<(), ChainError> {
        if sizes.len() != self.passes.len() {
            return Err(ChainError::Config {
                pass: 0,
                detail: format!(
                    "{} passes but {} resolved sizes",
                    self.passes.len(),
                    sizes.len()
                ),
            });
        }

        let mut replacements = Vec::new();
        for (index, (pass, size)) in self.passes.iter().zip(sizes).enumerate() {
            if pass.size == *size || pass.target.is_none() {
                continue;
            }
            let target = backend
                .create_target(size.width, size.height, self.format)
                .map_err(|source| ChainError::Allocation {
                    pass: index,
                    source,
                })?;
            replacements.push((index, target));
        }

        for (index, target) in replacements {
            tracing::debug!(pass = index, from = %self.passes[index].size, to = %sizes[index], "pass resized");
            self.passes[index].target = Some(target);
        }
        for (pass, size) in self.passes.iter_mut().zip(sizes) {
            pass.size = *size;
        }
        Ok(())
    }

    pub fn set_lookups(&mut self, luts: Vec<BoundLut<B::Target>>) {
        self.luts = luts;
    }

    pub fn set_tracker(&mut self, tracker: Option<Box<dyn StateTracker>>) {
        self.tracker = tracker;
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn pass_size(&self, index: usize) -> Option<Dimensions> {
        self.passes.get(index).map(|pass| pass.size)
    }

    pub fn lookup_count(&self) -> usize {
        self.luts.len()
    }

    pub fn source_size(&self) -> Dimensions {
        self.source_size
    }

    /// Pushes one emulated frame through every pass in order.
    pub fn render_frame(
        &mut self,
        backend: &mut B,
        frame: &FrameBuffer<'_>,
    ) -> Result<(), BackendError> {
        backend.upload_frame(&self.source, frame)?;

        let params = match self.tracker.as_mut() {
            Some(tracker) => tracker.update(self.frame_count),
            None => Vec::new(),
        };

        let mut input = &self.source;
        for pass in &self.passes {
            backend.draw(DrawCall {
                shader: &pass.shader,
                input,
                output: pass.target.as_ref(),
                output_size: pass.size,
                linear: match pass.filter {
                    FilterMode::Linear => true,
                    FilterMode::Nearest => false,
                    FilterMode::Unspecified => self.smooth,
                },
                luts: &self.luts,
                params: &params,
            })?;
            if let Some(target) = pass.target.as_ref() {
                input = target;
            }
        }

        self.frame_count = self.frame_count.wrapping_add(1);
        Ok(())
    }
}
