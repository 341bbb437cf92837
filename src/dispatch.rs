//! Convolution dispatcher.
//!
//! [`Convolver::convolve`] validates the input arrays, picks a kernel variant
//! from a static `(rank, element type)` table, stages the arrays on the
//! device, launches the kernel and reads the result back.
//!
//! Every call builds its own [`Program`](crate::gpu::Program) and owns every
//! buffer and image it creates, so concurrent calls share nothing except the
//! device and queue.
//!
//! # Example
//!
//! ```rust,no_run
//! use gpuconv::{convolve, HostArray};
//!
//! let data = HostArray::ones(vec![100, 120, 140])?;
//! let h = HostArray::ones(vec![10, 11, 12])?;
//! let out = convolve(&data, &h, None)?;
//! assert_eq!(out.shape(), data.shape());
//! # Ok::<(), gpuconv::ConvError>(())
//! ```

use std::borrow::Cow;

use crate::array::{ElementType, HostArray};
use crate::config::{ConfigError, ConvolveConfig};
use crate::error::{ConvError, ConvResult};
use crate::gpu::{
    DefaultDeviceProvider, DeviceProvider, GpuImage, GpuTensor, KernelArg, ProgramBuilder,
    WgpuBackend,
};
use crate::preprocess::SHORT_TYPE_FLAG;
use crate::source::{BundledSources, SourceResolver};

/// Element types the device kernels read directly.
pub const SUPPORTED_TYPES: [ElementType; 2] = [ElementType::Float32, ElementType::Uint16];

/// Entry point and build flags for one `(rank, element type)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelVariant {
    /// Compute entry point in the kernel source.
    pub entry_point: &'static str,
    /// Build flags for the program.
    pub build_flags: &'static str,
}

const DISPATCH_TABLE: [((usize, ElementType), KernelVariant); 6] = [
    ((1, ElementType::Float32), variant("convolve1d", "")),
    ((1, ElementType::Uint16), variant("convolve1d", SHORT_TYPE_FLAG)),
    ((2, ElementType::Float32), variant("convolve2d", "")),
    ((2, ElementType::Uint16), variant("convolve2d", SHORT_TYPE_FLAG)),
    ((3, ElementType::Float32), variant("convolve3d", "")),
    ((3, ElementType::Uint16), variant("convolve3d", SHORT_TYPE_FLAG)),
];

const fn variant(entry_point: &'static str, build_flags: &'static str) -> KernelVariant {
    KernelVariant {
        entry_point,
        build_flags,
    }
}

/// Looks up the kernel variant for data of `rank` and `element_type`.
///
/// # Errors
///
/// - `ConvError::UnsupportedRank` if `rank` is not 1, 2 or 3.
/// - `ConvError::UnsupportedType` if `element_type` is not in
///   [`SUPPORTED_TYPES`].
pub fn select_variant(rank: usize, element_type: ElementType) -> ConvResult<KernelVariant> {
    if !(1..=3).contains(&rank) {
        return Err(ConvError::UnsupportedRank(rank));
    }
    DISPATCH_TABLE
        .iter()
        .find(|(key, _)| *key == (rank, element_type))
        .map(|&(_, variant)| variant)
        .ok_or_else(|| ConvError::unsupported_type(element_type, &SUPPORTED_TYPES))
}

/// Work size and scalar arguments of one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchGeometry {
    /// Work-items per axis, x first.
    pub global_size: Vec<u32>,
    /// Data shape followed by kernel shape, as `i32` kernel arguments.
    pub shape_args: Vec<i32>,
}

impl LaunchGeometry {
    /// Derives the geometry from the staged image and the two array shapes.
    ///
    /// # Errors
    ///
    /// Returns `ConvError::RankMismatch` if the shapes differ in rank and
    /// `ConvError::UnsupportedLimits` if an extent does not fit in `i32`.
    pub fn new(
        image_extents: &[u32],
        data_shape: &[usize],
        kernel_shape: &[usize],
    ) -> ConvResult<Self> {
        if data_shape.len() != kernel_shape.len() {
            return Err(ConvError::RankMismatch {
                data: data_shape.len(),
                kernel: kernel_shape.len(),
            });
        }
        let shape_args = data_shape
            .iter()
            .chain(kernel_shape)
            .map(|&n| {
                i32::try_from(n).map_err(|_| {
                    ConvError::unsupported_limits(format!("extent {} does not fit in i32", n))
                })
            })
            .collect::<ConvResult<Vec<_>>>()?;
        Ok(Self {
            global_size: image_extents.to_vec(),
            shape_args,
        })
    }

    /// Scalar kernel arguments in launch order.
    pub fn scalar_args<'a>(&self) -> Vec<KernelArg<'a>> {
        self.shape_args.iter().map(|&n| KernelArg::Int(n)).collect()
    }
}

/// Convolution dispatcher with injected device provider and source resolver.
///
/// Keep one `Convolver` around to reuse the default device across calls;
/// programs are still built per call.
#[derive(Debug)]
pub struct Convolver<P = DefaultDeviceProvider, S = BundledSources> {
    config: ConvolveConfig,
    devices: P,
    sources: S,
}

impl Default for Convolver {
    fn default() -> Self {
        Self {
            config: ConvolveConfig::default(),
            devices: DefaultDeviceProvider::default(),
            sources: BundledSources,
        }
    }
}

impl Convolver {
    /// Creates a dispatcher with the default provider, bundled sources and
    /// default configuration.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P: DeviceProvider, S: SourceResolver> Convolver<P, S> {
    /// Creates a dispatcher from its parts.
    ///
    /// # Errors
    ///
    /// Returns `ConvError::Config` if `config` does not validate.
    pub fn with_parts(config: ConvolveConfig, devices: P, sources: S) -> ConvResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            devices,
            sources,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &ConvolveConfig {
        &self.config
    }

    /// Convolves `data` with `kernel` using edge-clamped boundaries.
    ///
    /// Per axis, with data extent `N` and kernel extent `K`:
    /// `out[i] = Σ_k h[k] · in[clamp(i + K/2 − k, 0, N−1)]`.
    /// This is a true convolution (the kernel is flipped) centred at `K/2`,
    /// so even kernel extents shift the result half a sample towards lower
    /// indices; for a correlation, pass the kernel reversed along each axis.
    ///
    /// `data` of a type other than `float32` or `uint16` is converted to
    /// `float32` with a warning; `kernel` is always converted to `float32`.
    /// If `device` is `None` the device provider is asked for one.
    ///
    /// Returns a new `float32` array shaped like `data`.
    ///
    /// # Errors
    ///
    /// - `ConvError::UnsupportedRank` if `data` rank is not 1, 2 or 3.
    /// - `ConvError::RankMismatch` if `kernel` rank differs.
    /// - `ConvError::UnsupportedType` if an array cannot convert to `float32`.
    /// - `ConvError::Config` if `kernel` exceeds the configured size.
    /// - `ConvError::DeviceUnavailable` if no device can be resolved.
    /// - Build, staging and launch errors propagate unchanged.
    pub fn convolve(
        &self,
        data: &HostArray,
        kernel: &HostArray,
        device: Option<&WgpuBackend>,
    ) -> ConvResult<HostArray> {
        let rank = data.rank();
        if !(1..=3).contains(&rank) {
            return Err(ConvError::UnsupportedRank(rank));
        }
        if kernel.rank() != rank {
            return Err(ConvError::RankMismatch {
                data: rank,
                kernel: kernel.rank(),
            });
        }
        if kernel.len() > self.config.max_kernel_len {
            return Err(ConfigError::KernelTooLarge {
                len: kernel.len(),
                limit: self.config.max_kernel_len,
            }
            .into());
        }

        let data: Cow<'_, HostArray> = if SUPPORTED_TYPES.contains(&data.element_type()) {
            Cow::Borrowed(data)
        } else {
            let converted = data.to_f32()?;
            log::warn!(
                "data type {} not supported, converting to float32",
                data.element_type()
            );
            Cow::Owned(converted)
        };
        let weights = match kernel.as_f32() {
            Some(values) => Cow::Borrowed(values),
            None => Cow::Owned(kernel.to_f32_vec()?),
        };
        let variant = select_variant(rank, data.element_type())?;

        let provided;
        let backend = match device {
            Some(device) => device,
            None => {
                provided = self.devices.default_device().ok_or_else(|| {
                    ConvError::device_unavailable("no device given and no default device found")
                })?;
                &*provided
            }
        };

        let program = ProgramBuilder::new()
            .source_id(self.config.source_id.as_str())
            .build_flags(variant.build_flags)
            .device(backend)
            .build(&self.sources, &self.devices)?;

        let weights = GpuTensor::upload(backend, &weights, kernel.shape().to_vec())?;
        let image = if rank == 1 {
            GpuImage::from_host(backend, &data.reshape(vec![1, data.len()])?)?
        } else {
            GpuImage::from_host(backend, &data)?
        };
        let output = GpuTensor::uninit(backend, data.shape().to_vec())?;

        let geometry = LaunchGeometry::new(&image.extents(), data.shape(), kernel.shape())?;
        log::debug!(
            "convolve: rank {} {} via '{}' flags '{}' global {:?} args {:?}",
            rank,
            data.element_type(),
            variant.entry_point,
            variant.build_flags,
            geometry.global_size,
            geometry.shape_args
        );

        let mut args = vec![
            KernelArg::Image(&image),
            KernelArg::Buffer(&weights),
            KernelArg::Buffer(&output),
        ];
        args.extend(geometry.scalar_args());
        program.run(variant.entry_point, &geometry.global_size, None, &args)?;

        let values = output.download(backend)?;
        HostArray::from_f32(data.shape().to_vec(), values)
    }
}

/// Convolves `data` with `kernel` on `device`, or on a freshly initialized
/// default device when `device` is `None`.
///
/// Shorthand for [`Convolver::new().convolve(..)`](Convolver::convolve).
pub fn convolve(
    data: &HostArray,
    kernel: &HostArray,
    device: Option<&WgpuBackend>,
) -> ConvResult<HostArray> {
    Convolver::new().convolve(data, kernel, device)
}
