//! GPU backend for gpuconv using wgpu.
//!
//! This module holds everything that touches a device: adapter and device
//! selection, device-resident buffers and images, and compiled programs.
//!
//! # Architecture
//!
//! A convolution call uses a single bind group (group 0):
//!
//! - **Binding 0**: input image (`texture_2d` or `texture_3d`)
//! - **Binding 1**: kernel weights (read-only storage)
//! - **Binding 2**: output (read-write storage)
//! - **Binding 3**: scalar arguments (uniform)
//!
//! Layouts are reflected from the WGSL source with naga, not hard-coded, so
//! [`Program::run`] works for any compute entry point that follows the
//! "resources first, scalars last" convention.
//!
//! # Example
//!
//! ```rust,no_run
//! use gpuconv::gpu::{GpuTensor, WgpuBackend, WgpuOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = WgpuBackend::init(WgpuOptions::default())?;
//!
//! let data = vec![1.0f32; 1024];
//! let tensor = GpuTensor::upload(&backend, &data, vec![1024])?;
//! let result = tensor.download(&backend)?;
//! assert_eq!(result.len(), 1024);
//! # Ok(())
//! # }
//! ```
//!
//! # Public API
//!
//! - [`WgpuBackend`] — device initialization and limits
//! - [`DeviceProvider`] — source of a default device
//! - [`GpuTensor`] — device buffer with upload/download
//! - [`GpuImage`] — device image for kernel input
//! - [`ProgramBuilder`] / [`Program`] — compiled WGSL with `run`

mod backend;
mod image;
mod program;
mod shader;
mod tensor;
mod uniforms;

pub use backend::{
    DefaultDeviceProvider, DeviceProvider, NoDevice, PowerPreference, WgpuBackend, WgpuOptions,
};
pub use image::GpuImage;
pub use program::{KernelArg, Program, ProgramBuilder};
pub use shader::{BindingKind, ReflectedBinding, ShaderIr};
pub use tensor::GpuTensor;
pub use uniforms::{pack_scalars, ScalarWord, UNIFORM_ALIGNMENT};
