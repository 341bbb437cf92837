//! Packing of scalar kernel arguments into a uniform buffer.
//!
//! WGSL entry points cannot take scalar parameters, so scalar arguments are
//! written, in order, into one uniform buffer that the kernel declares as a
//! struct of 4-byte fields.
//!
//! # Memory Layout
//!
//! Every scalar occupies one 4-byte word, so a kernel struct made of `i32`,
//! `u32` and `f32` fields lines up field by field:
//!
//! ```text
//! Offset  Size  Field (convolve3d)
//! 0       4     nz
//! 4       4     ny
//! 8       4     nx
//! 12      4     hz
//! 16      4     hy
//! 20      4     hx
//! 24      8     padding
//! ```
//!
//! The total is rounded up to 16 bytes (one vec4), the alignment of
//! uniform structs.

use bytemuck::{Pod, Zeroable};

/// Uniform buffer alignment in bytes.
pub const UNIFORM_ALIGNMENT: usize = 16;

/// One 4-byte word of a scalar argument block.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ScalarWord(pub u32);

impl From<i32> for ScalarWord {
    fn from(value: i32) -> Self {
        Self(bytemuck::cast(value))
    }
}

impl From<u32> for ScalarWord {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<f32> for ScalarWord {
    fn from(value: f32) -> Self {
        Self(value.to_bits())
    }
}

/// Packs scalar words into bytes padded to [`UNIFORM_ALIGNMENT`].
pub fn pack_scalars(words: &[ScalarWord]) -> Vec<u8> {
    let mut bytes = bytemuck::cast_slice::<ScalarWord, u8>(words).to_vec();
    let padded = bytes.len().div_ceil(UNIFORM_ALIGNMENT).max(1) * UNIFORM_ALIGNMENT;
    bytes.resize(padded, 0);
    bytes
}
