//! Kernel source resolution.
//!
//! Programs are built from WGSL text looked up by identifier through a
//! [`SourceResolver`]. The crate ships the convolution kernels compiled in
//! ([`BundledSources`]); [`ShaderDir`] reads them from a directory instead,
//! which is handy when iterating on a kernel without rebuilding.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{ConfigError, DEFAULT_SOURCE_ID};
use crate::error::{ConvError, ConvResult};

/// WGSL source of the 1D/2D/3D convolution kernels.
pub const CONVOLVE_WGSL: &str = include_str!("kernels/convolve.wgsl");

/// Resolves a kernel source identifier to its text.
pub trait SourceResolver {
    /// Returns the source text for `id`.
    fn load_source(&self, id: &str) -> ConvResult<String>;
}

/// Resolver backed by the kernels compiled into the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledSources;

impl SourceResolver for BundledSources {
    fn load_source(&self, id: &str) -> ConvResult<String> {
        match id {
            DEFAULT_SOURCE_ID => Ok(CONVOLVE_WGSL.to_string()),
            other => Err(ConfigError::UnknownSource(other.to_string()).into()),
        }
    }
}

/// Resolver reading `<dir>/<id>` from disk.
#[derive(Debug, Clone)]
pub struct ShaderDir {
    dir: PathBuf,
}

impl ShaderDir {
    /// Creates a resolver rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolver rooted at this crate's kernel directory.
    pub fn crate_kernels() -> Self {
        Self::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("src").join("kernels"))
    }

    /// Directory the resolver reads from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SourceResolver for ShaderDir {
    fn load_source(&self, id: &str) -> ConvResult<String> {
        let path = self.dir.join(id);
        if !path.is_file() {
            return Err(ConfigError::UnknownSource(path.display().to_string()).into());
        }
        fs::read_to_string(&path).map_err(|source| ConvError::SourceIo { path, source })
    }
}

impl<R: SourceResolver + ?Sized> SourceResolver for &R {
    fn load_source(&self, id: &str) -> ConvResult<String> {
        (**self).load_source(id)
    }
}
