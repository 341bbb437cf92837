//! GPU images for convolution input.
//!
//! Input data is staged as a sampled texture rather than a buffer: kernels
//! read it with `textureLoad` at clamped coordinates, which gives edge
//! replication without any padding copy on the host.

use crate::array::{ElementType, HostArray};
use crate::error::{ConvError, ConvResult};
use crate::gpu::WgpuBackend;

/// A read-only 2D or 3D image holding `float32` or `uint16` samples.
///
/// The image extents are the array shape reversed: a `[depth, height, width]`
/// array becomes a `width × height × depth` texture, so x indexes the
/// fastest-varying axis.
pub struct GpuImage {
    /// The underlying texture.
    pub texture: wgpu::Texture,
    /// Default view bound by kernels.
    pub view: wgpu::TextureView,
    /// Row-major shape of the staged array.
    pub shape: Vec<usize>,
    /// Texel format (`R32Float` or `R16Uint`).
    pub format: wgpu::TextureFormat,
}

impl GpuImage {
    /// Uploads a rank-2 or rank-3 array as an image.
    ///
    /// # Errors
    ///
    /// - `ConvError::UnsupportedRank` for ranks other than 2 and 3.
    /// - `ConvError::UnsupportedType` for element types other than
    ///   `float32` and `uint16`.
    /// - `ConvError::UnsupportedLimits` if an extent exceeds the device's
    ///   texture limits.
    pub fn from_host(backend: &WgpuBackend, array: &HostArray) -> ConvResult<Self> {
        let (format, bytes): (wgpu::TextureFormat, &[u8]) =
            match (array.as_f32(), array.as_u16()) {
                (Some(values), _) => (wgpu::TextureFormat::R32Float, bytemuck::cast_slice(values)),
                (_, Some(values)) => (wgpu::TextureFormat::R16Uint, bytemuck::cast_slice(values)),
                _ => {
                    return Err(ConvError::unsupported_type(
                        array.element_type(),
                        &[ElementType::Float32, ElementType::Uint16],
                    ))
                }
            };

        let (dimension, size) = image_extent(array.shape())?;
        check_extent(backend.limits(), dimension, size)?;

        let texture = backend.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("GpuImage"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let texel_bytes = array.element_type().size_bytes() as u32;
        backend.queue().write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(size.width * texel_bytes),
                rows_per_image: Some(size.height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            texture,
            view,
            shape: array.shape().to_vec(),
            format,
        })
    }

    /// Returns the image extents `[width, height(, depth)]`.
    ///
    /// This is the global work size for kernels that run one work-item per
    /// sample.
    pub fn extents(&self) -> Vec<u32> {
        self.shape.iter().rev().map(|&n| n as u32).collect()
    }

    /// Number of axes (2 or 3).
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

/// Maps a row-major shape to a texture dimension and extent.
pub(crate) fn image_extent(shape: &[usize]) -> ConvResult<(wgpu::TextureDimension, wgpu::Extent3d)> {
    let to_u32 = |n: usize| {
        u32::try_from(n)
            .map_err(|_| ConvError::unsupported_limits(format!("image extent {} overflows u32", n)))
    };
    match *shape {
        [height, width] => Ok((
            wgpu::TextureDimension::D2,
            wgpu::Extent3d {
                width: to_u32(width)?,
                height: to_u32(height)?,
                depth_or_array_layers: 1,
            },
        )),
        [depth, height, width] => Ok((
            wgpu::TextureDimension::D3,
            wgpu::Extent3d {
                width: to_u32(width)?,
                height: to_u32(height)?,
                depth_or_array_layers: to_u32(depth)?,
            },
        )),
        _ => Err(ConvError::UnsupportedRank(shape.len())),
    }
}

fn check_extent(
    limits: &wgpu::Limits,
    dimension: wgpu::TextureDimension,
    size: wgpu::Extent3d,
) -> ConvResult<()> {
    let (max, largest) = match dimension {
        wgpu::TextureDimension::D3 => (
            limits.max_texture_dimension_3d,
            size.width.max(size.height).max(size.depth_or_array_layers),
        ),
        _ => (limits.max_texture_dimension_2d, size.width.max(size.height)),
    };
    if largest > max {
        return Err(ConvError::unsupported_limits(format!(
            "image extent {} exceeds max {:?} texture dimension {}",
            largest, dimension, max
        )));
    }
    Ok(())
}

impl std::fmt::Debug for GpuImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuImage")
            .field("shape", &self.shape)
            .field("format", &self.format)
            .finish()
    }
}
