//! Pure geometry conversion for pass sizing.
//!
//! `convert` turns one pass's nominal scale rule plus the chain's fixed
//! source size, the running input size, and the display viewport into
//! concrete pixel dimensions. Rounding to the next power of two is the
//! caller's business: intermediate targets get padded for sampling, the
//! terminal pass keeps the exact size because nothing resamples it.

use std::fmt;

use preset::{PassScale, ScaleType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_degenerate(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Rounds both axes up to the next power of two.
    pub fn next_pow2(self) -> Self {
        Self {
            width: self.width.max(1).next_power_of_two(),
            height: self.height.max(1).next_power_of_two(),
        }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Computes a pass's nominal output size from its scale rule.
pub fn convert(
    scale: PassScale,
    source: Dimensions,
    input: Dimensions,
    viewport: Dimensions,
) -> Dimensions {
    Dimensions {
        width: scale_axis(
            scale.type_x,
            scale.factor_x,
            source.width,
            input.width,
            viewport.width,
        ),
        height: scale_axis(
            scale.type_y,
            scale.factor_y,
            source.height,
            input.height,
            viewport.height,
        ),
    }
}

fn scale_axis(kind: ScaleType, factor: f32, source: u32, input: u32, viewport: u32) -> u32 {
    // Products truncate toward zero, matching the float-to-unsigned
    // conversion the preset format was defined against.
    match kind {
        ScaleType::Input => (input as f32 * factor) as u32,
        ScaleType::Source => (source as f32 * factor) as u32,
        ScaleType::Viewport => (viewport as f32 * factor) as u32,
        ScaleType::Absolute => factor as u32,
    }
}
