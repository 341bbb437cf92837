//! # gpuconv - Edge-Clamped N-d Convolution on the GPU
//!
//! Dimension-agnostic convolution of 1D signals, 2D images and 3D volumes
//! with a single call. Out-of-range samples are clamped to the nearest edge
//! along each axis (edge replication), so a constant input stays constant
//! under any normalized kernel.
//!
//! ## Architecture
//! - [`dispatch`]: validates arrays, picks a kernel by `(rank, element type)`
//! - [`gpu`]: wgpu device, buffers, images and the program builder
//! - [`source`]: kernel source lookup, bundled or from disk
//! - [`preprocess`]: `-D` build flags and `#ifdef` blocks for WGSL
//!
//! ## Usage
//! ```rust,no_run
//! use gpuconv::{Convolver, HostArray};
//!
//! let convolver = Convolver::new();
//! let data = HostArray::from_u16(vec![2, 3], vec![1, 2, 3, 4, 5, 6])?;
//! let h = HostArray::filled(vec![3, 3], 1.0 / 9.0)?;
//!
//! // uint16 data, float32 result
//! let out = convolver.convolve(&data, &h, None)?;
//! assert_eq!(out.shape(), &[2, 3]);
//! # Ok::<(), gpuconv::ConvError>(())
//! ```

pub mod array;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gpu;
pub mod preprocess;
pub mod source;

// Re-exports
pub use array::{ArrayData, ElementType, HostArray};
pub use config::{ConfigError, ConvolveConfig, DEFAULT_MAX_KERNEL_LEN, DEFAULT_SOURCE_ID};
pub use dispatch::{convolve, select_variant, Convolver, KernelVariant, LaunchGeometry, SUPPORTED_TYPES};
pub use error::{ConvError, ConvResult};
pub use gpu::{DefaultDeviceProvider, DeviceProvider, NoDevice, WgpuBackend, WgpuOptions};
pub use source::{BundledSources, ShaderDir, SourceResolver};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
