//! Shader preset data model for the multi-pass render chain.
//!
//! A preset describes an ordered list of shader passes with per-pass scaling
//! rules, plus the auxiliary resources the chain wires in at build time
//! (static lookup textures and dynamic parameter imports). The `chain` crate
//! consumes a fully normalized `ShaderPreset`; this crate owns the schema,
//! the defaulting/synthesis rules for sparse presets, and the on-disk loader.

mod load;
mod model;

pub use load::{load_preset, PresetError};
pub use model::{
    DynamicImport, FilterMode, LookupTexture, PassScale, PassSpec, ScaleType, ShaderPreset,
    MAX_PASSES,
};
