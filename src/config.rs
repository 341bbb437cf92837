//! Convolution configuration.
//!
//! [`ConvolveConfig`] carries the few knobs the dispatcher exposes: which
//! kernel source to build and how large a kernel it accepts.
//!
//! # Example
//!
//! ```rust
//! use gpuconv::ConvolveConfig;
//!
//! let config = ConvolveConfig {
//!     max_kernel_len: 4096,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier of the bundled convolution kernel source.
pub const DEFAULT_SOURCE_ID: &str = "convolve.wgsl";

/// Default upper bound on kernel weights per call.
///
/// Every work-item loops over the whole kernel, so very large kernels turn
/// into multi-second dispatches that desktop drivers kill.
pub const DEFAULT_MAX_KERNEL_LEN: usize = 1 << 16;

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConvolveConfig {
    /// Kernel source identifier handed to the source resolver.
    pub source_id: String,

    /// Maximum number of kernel weights accepted by `convolve`.
    pub max_kernel_len: usize,
}

impl Default for ConvolveConfig {
    fn default() -> Self {
        Self {
            source_id: DEFAULT_SOURCE_ID.to_string(),
            max_kernel_len: DEFAULT_MAX_KERNEL_LEN,
        }
    }
}

impl ConvolveConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the source id is blank or the kernel limit
    /// is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_id.trim().is_empty() {
            return Err(ConfigError::MissingSource);
        }
        if self.max_kernel_len == 0 {
            return Err(ConfigError::InvalidKernelLimit(self.max_kernel_len));
        }
        Ok(())
    }
}

/// Configuration errors, including missing kernel source.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Neither a source identifier nor literal source text was supplied.
    #[error("empty src_str: no kernel source id or source text given")]
    MissingSource,

    /// The resolved kernel source is empty.
    #[error("kernel source '{0}' is empty")]
    EmptySource(String),

    /// The source resolver does not know the identifier.
    #[error("unknown kernel source '{0}'")]
    UnknownSource(String),

    /// Kernel length limit must be positive.
    #[error("max_kernel_len must be > 0, got {0}")]
    InvalidKernelLimit(usize),

    /// Kernel has more weights than the configured limit.
    #[error("kernel has {len} weights, limit is {limit}")]
    KernelTooLarge {
        /// Number of weights in the kernel.
        len: usize,
        /// Configured limit.
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConvolveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.source_id, "convolve.wgsl");
    }

    #[test]
    fn test_blank_source_rejected() {
        let config = ConvolveConfig {
            source_id: "  ".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingSource)));
    }

    #[test]
    fn test_zero_kernel_limit_rejected() {
        let mut config = ConvolveConfig::default();
        config.max_kernel_len = 0;
        assert!(config.validate().is_err());
    }
}
