//! Scripted backend used by the chain and pipeline tests. Tracks how many
//! targets are alive so rollback behaviour is observable, and records every
//! draw so tests can check the wiring between passes.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::backend::{BackendError, DrawCall, FrameBuffer, PixelFormat, RenderBackend};
use crate::geometry::Dimensions;

pub(crate) struct MockTarget {
    pub size: Dimensions,
    live: Rc<Cell<usize>>,
}

impl Drop for MockTarget {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

pub(crate) struct MockShader {
    #[allow(dead_code)]
    pub reference: Option<PathBuf>,
}

pub(crate) struct DrawRecord {
    pub to_display: bool,
    pub input_size: Dimensions,
    pub output_size: Dimensions,
    pub linear: bool,
    pub lut_count: usize,
    pub params: Vec<(String, f32)>,
}

#[derive(Default)]
pub(crate) struct MockBackend {
    live: Rc<Cell<usize>>,
    targets_created: usize,
    textures_created: usize,
    fail_target: Option<usize>,
    uploads: usize,
    draws: Vec<DrawRecord>,
}

impl MockBackend {
    /// Fails the create_target call with the given zero-based serial.
    pub fn fail_target_at(&mut self, serial: usize) {
        self.fail_target = Some(serial);
    }

    pub fn targets_created(&self) -> usize {
        self.targets_created
    }

    pub fn textures_created(&self) -> usize {
        self.textures_created
    }

    pub fn live_targets(&self) -> usize {
        self.live.get()
    }

    pub fn uploads(&self) -> usize {
        self.uploads
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    fn track(&mut self, width: u32, height: u32) -> MockTarget {
        self.live.set(self.live.get() + 1);
        MockTarget {
            size: Dimensions::new(width, height),
            live: Rc::clone(&self.live),
        }
    }
}

impl RenderBackend for MockBackend {
    type Target = MockTarget;
    type Shader = MockShader;

    fn create_target(
        &mut self,
        width: u32,
        height: u32,
        _format: PixelFormat,
    ) -> Result<Self::Target, BackendError> {
        let serial = self.targets_created;
        self.targets_created += 1;
        if self.fail_target == Some(serial) {
            return Err(BackendError::TargetCreation {
                width,
                height,
                detail: "scripted failure".to_string(),
            });
        }
        Ok(self.track(width, height))
    }

    fn create_shader(&mut self, reference: Option<&Path>) -> Result<Self::Shader, BackendError> {
        Ok(MockShader {
            reference: reference.map(Path::to_path_buf),
        })
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        _pixels: &[u8],
        _linear: bool,
    ) -> Result<Self::Target, BackendError> {
        self.textures_created += 1;
        Ok(self.track(width, height))
    }

    fn upload_frame(
        &mut self,
        _target: &Self::Target,
        _frame: &FrameBuffer<'_>,
    ) -> Result<(), BackendError> {
        self.uploads += 1;
        Ok(())
    }

    fn draw(&mut self, call: DrawCall<'_, Self>) -> Result<(), BackendError> {
        self.draws.push(DrawRecord {
            to_display: call.output.is_none(),
            input_size: call.input.size,
            output_size: call.output_size,
            linear: call.linear,
            lut_count: call.luts.len(),
            params: call.params.to_vec(),
        });
        Ok(())
    }
}
