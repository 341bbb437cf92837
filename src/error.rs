//! Unified error types for gpuconv.
//!
//! This module provides [`ConvError`], the single error type returned by the
//! dispatcher, the program builder and the device primitives. It uses the
//! `thiserror` crate for ergonomic error handling.
//!
//! # Example
//!
//! ```rust
//! use gpuconv::ConvError;
//!
//! fn check_rank(rank: usize) -> Result<(), ConvError> {
//!     if !(1..=3).contains(&rank) {
//!         return Err(ConvError::UnsupportedRank(rank));
//!     }
//!     Ok(())
//! }
//! assert!(check_rank(4).is_err());
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::array::ElementType;
use crate::config::ConfigError;

/// Unified error type for gpuconv operations.
///
/// Validation variants (`UnsupportedRank`, `UnsupportedType`, `RankMismatch`,
/// `ShapeMismatch`) are raised before any device work starts. Everything else
/// comes out of device resolution, program builds or kernel launches and is
/// propagated unchanged to the caller of `convolve`.
#[derive(Error, Debug)]
pub enum ConvError {
    /// Data rank outside 1..=3.
    #[error("dim = {0} not supported (expected 1, 2 or 3)")]
    UnsupportedRank(usize),

    /// Element type with no entry in the dispatch table.
    #[error("data type {found} not supported, please convert to one of {supported:?}")]
    UnsupportedType {
        /// Element type that was supplied.
        found: ElementType,
        /// Element types the dispatcher accepts.
        supported: Vec<ElementType>,
    },

    /// Data and kernel arrays have different ranks.
    #[error("rank mismatch: data has rank {data}, kernel has rank {kernel}")]
    RankMismatch {
        /// Rank of the data array.
        data: usize,
        /// Rank of the kernel array.
        kernel: usize,
    },

    /// Shape mismatch between expected and actual shapes.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Shape actually received.
        got: Vec<usize>,
    },

    /// No compute device could be resolved.
    #[error("no compute device available: {0}")]
    DeviceUnavailable(String),

    /// The adapter refused to create a device with the requested limits.
    #[error("Failed to create GPU device: {0}")]
    DeviceRequestFailed(#[from] wgpu::RequestDeviceError),

    /// Missing or invalid configuration, including missing kernel source.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Kernel source file could not be read.
    #[error("failed to read kernel source '{path}'")]
    SourceIo {
        /// Path that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The device compiler rejected the program source or build flags.
    #[error("failed to build program '{label}':\n{diagnostic}")]
    Compile {
        /// Label of the program being built.
        label: String,
        /// Raw compiler diagnostic text.
        diagnostic: String,
    },

    /// The requested entry point does not exist in the compiled program.
    #[error("kernel '{name}' not found in program (available: {available:?})")]
    KernelNotFound {
        /// Requested entry point.
        name: String,
        /// Compute entry points the program does provide.
        available: Vec<String>,
    },

    /// Kernel arguments do not match the entry point interface.
    #[error("invalid kernel arguments: {0}")]
    KernelArguments(String),

    /// wgpu reported a validation error while creating or binding resources.
    #[error("GPU validation error: {0}")]
    Validation(String),

    /// The device cannot satisfy a size or dispatch limit.
    #[error("Unsupported GPU limits: {0}")]
    UnsupportedLimits(String),

    /// A single device allocation would exceed the device limit.
    #[error("allocation of {requested} bytes exceeds device limit of {limit} bytes")]
    AllocationTooLarge {
        /// Requested size in bytes.
        requested: u64,
        /// Largest size the device accepts.
        limit: u64,
    },

    /// Mapping a staging buffer failed.
    #[error("Buffer async error: {0}")]
    BufferAsync(#[from] wgpu::BufferAsyncError),

    /// Buffer operation failed.
    #[error("Buffer operation failed: {0}")]
    Buffer(String),
}

/// Result type alias for gpuconv operations.
pub type ConvResult<T> = Result<T, ConvError>;

impl ConvError {
    /// Creates an unsupported type error listing the supported set.
    pub fn unsupported_type(found: ElementType, supported: &[ElementType]) -> Self {
        ConvError::UnsupportedType {
            found,
            supported: supported.to_vec(),
        }
    }

    /// Creates a shape mismatch error.
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        ConvError::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Creates a device unavailable error.
    pub fn device_unavailable<S: Into<String>>(msg: S) -> Self {
        ConvError::DeviceUnavailable(msg.into())
    }

    /// Creates a compile error carrying the compiler diagnostic.
    pub fn compile<L: Into<String>, D: Into<String>>(label: L, diagnostic: D) -> Self {
        ConvError::Compile {
            label: label.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Creates a kernel argument error.
    pub fn kernel_arguments<S: Into<String>>(msg: S) -> Self {
        ConvError::KernelArguments(msg.into())
    }

    /// Creates a GPU validation error.
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        ConvError::Validation(msg.into())
    }

    /// Creates an unsupported limits error.
    pub fn unsupported_limits<S: Into<String>>(msg: S) -> Self {
        ConvError::UnsupportedLimits(msg.into())
    }

    /// Creates a buffer error.
    pub fn buffer<S: Into<String>>(msg: S) -> Self {
        ConvError::Buffer(msg.into())
    }
}
