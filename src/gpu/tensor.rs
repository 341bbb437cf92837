//! GPU buffer abstraction with upload/download helpers.
//!
//! This module provides [`GpuTensor`], a GPU-resident `f32` buffer that wraps
//! a wgpu buffer with shape metadata. The convolution weights and the result
//! live in `GpuTensor`s.

use crate::error::{ConvError, ConvResult};
use crate::gpu::WgpuBackend;
use wgpu::util::DeviceExt;

/// A GPU-resident `f32` buffer with shape metadata.
///
/// # Memory Layout
///
/// Data is stored in row-major order (C-style) matching [`HostArray`].
///
/// # Example
///
/// ```rust,no_run
/// use gpuconv::gpu::{GpuTensor, WgpuBackend, WgpuOptions};
///
/// let backend = WgpuBackend::init(WgpuOptions::default())?;
/// let data = vec![1.0f32, 2.0, 3.0, 4.0];
/// let tensor = GpuTensor::upload(&backend, &data, vec![2, 2])?;
/// assert_eq!(tensor.download(&backend)?, data);
/// # Ok::<(), gpuconv::ConvError>(())
/// ```
///
/// [`HostArray`]: crate::HostArray
pub struct GpuTensor {
    /// The underlying wgpu buffer.
    pub buffer: wgpu::Buffer,
    /// Shape of the tensor.
    pub shape: Vec<usize>,
}

impl GpuTensor {
    /// Creates a storage buffer by uploading `data`.
    ///
    /// # Errors
    ///
    /// - `ConvError::ShapeMismatch` if `data.len()` differs from the shape product.
    /// - `ConvError::AllocationTooLarge` if the buffer exceeds the device limit.
    pub fn upload(backend: &WgpuBackend, data: &[f32], shape: Vec<usize>) -> ConvResult<Self> {
        let expected_len: usize = shape.iter().product();
        if data.len() != expected_len {
            return Err(ConvError::shape_mismatch(&shape, &[data.len()]));
        }
        check_size(backend, byte_len(data.len()))?;

        let buffer = backend
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("GpuTensor"),
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            });

        Ok(Self { buffer, shape })
    }

    /// Creates a read-write storage buffer with uninitialized contents.
    ///
    /// # Errors
    ///
    /// Returns `ConvError::AllocationTooLarge` if the buffer exceeds the device limit.
    pub fn uninit(backend: &WgpuBackend, shape: Vec<usize>) -> ConvResult<Self> {
        let num_elements: usize = shape.iter().product();
        let size_bytes = byte_len(num_elements);
        check_size(backend, size_bytes)?;

        let buffer = backend.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuTensor (uninit)"),
            size: size_bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        Ok(Self { buffer, shape })
    }

    /// Downloads the buffer contents to host memory.
    ///
    /// Blocks until all previously submitted work touching the buffer has
    /// finished, so this is the synchronization point after a kernel launch.
    pub fn download(&self, backend: &WgpuBackend) -> ConvResult<Vec<f32>> {
        let size_bytes = self.size_bytes();
        let device = backend.device();

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuTensor staging (download)"),
            size: size_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("GpuTensor download encoder"),
        });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging_buffer, 0, size_bytes);
        backend.queue().submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| ConvError::buffer(format!("Failed to receive map result: {}", e)))??;

        let data = {
            let mapped = buffer_slice.get_mapped_range();
            bytemuck::cast_slice(&mapped).to_vec()
        };
        staging_buffer.unmap();

        Ok(data)
    }

    /// Returns the total number of elements.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Returns the size in bytes.
    pub fn size_bytes(&self) -> u64 {
        byte_len(self.num_elements())
    }
}

fn byte_len(num_elements: usize) -> u64 {
    (num_elements * std::mem::size_of::<f32>()) as u64
}

fn check_size(backend: &WgpuBackend, size_bytes: u64) -> ConvResult<()> {
    let limit = backend.max_storage_buffer_size();
    if size_bytes > limit {
        return Err(ConvError::AllocationTooLarge {
            requested: size_bytes,
            limit,
        });
    }
    Ok(())
}

impl std::fmt::Debug for GpuTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuTensor")
            .field("shape", &self.shape)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}
