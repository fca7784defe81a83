//! Sequential pass-size resolution over a normalized preset.
//!
//! One walk serves both initial chain construction and re-resolution on
//! viewport change, so the two can never drift apart. Resolution is pure:
//! the same preset, source size, and viewport always produce the same
//! dimensions, which makes re-resolving on every potential resize safe.

use preset::ShaderPreset;

use crate::geometry::{self, Dimensions};
use crate::ChainError;

/// Produces the concrete output size of every pass in order.
///
/// `source` is the pass-0 input (emulated frame times the base content
/// multiplier), fixed for the whole chain. Intermediate sizes are rounded up
/// to the next power of two; the terminal pass keeps the exact computed size
/// because it rasterizes straight to the display.
pub fn resolve_pass_sizes(
    preset: &ShaderPreset,
    source: Dimensions,
    viewport: Dimensions,
) -> Result<Vec<Dimensions>, ChainError> {
    let count = preset.passes.len();
    let mut sizes = Vec::with_capacity(count);
    let mut input = source;

    for (index, pass) in preset.passes.iter().enumerate() {
        let scale = pass.scale.ok_or_else(|| ChainError::Config {
            pass: index,
            detail: "pass carries no scale rule; preset was not normalized".to_string(),
        })?;
        if scale.factor_x <= 0.0 || scale.factor_y <= 0.0 {
            return Err(ChainError::Config {
                pass: index,
                detail: format!(
                    "non-positive scale factors {}x{}",
                    scale.factor_x, scale.factor_y
                ),
            });
        }

        let nominal = geometry::convert(scale, source, input, viewport);
        if nominal.is_degenerate() {
            return Err(ChainError::Resolution {
                pass: index,
                width: nominal.width,
                height: nominal.height,
            });
        }

        let terminal = index + 1 == count;
        let resolved = if terminal {
            nominal
        } else {
            nominal.next_pow2()
        };
        sizes.push(resolved);
        input = resolved;
    }

    Ok(sizes)
}
