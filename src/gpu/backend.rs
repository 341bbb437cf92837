//! GPU device initialization and default-device resolution.
//!
//! This module provides [`WgpuBackend`], which owns the wgpu device and
//! queue, and the [`DeviceProvider`] seam through which `convolve` and the
//! program builder obtain a device when the caller does not pass one.

use crate::error::{ConvError, ConvResult};
use std::sync::{Arc, Mutex, OnceLock};

/// Power preference for GPU adapter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    /// Prefer low power consumption (integrated GPU).
    LowPower,
    /// Prefer high performance (discrete GPU).
    #[default]
    HighPerformance,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(pref: PowerPreference) -> Self {
        match pref {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

/// Options for initializing the wgpu backend.
#[derive(Debug, Clone)]
pub struct WgpuOptions {
    /// Power preference for adapter selection.
    pub power_preference: PowerPreference,
    /// Preferred backend (Vulkan, DX12, Metal, etc.).
    /// If None, wgpu will auto-select the best available.
    pub backend: Option<wgpu::Backends>,
    /// Force a specific adapter by name (substring match).
    pub force_adapter_name: Option<String>,
    /// Required features.
    pub required_features: wgpu::Features,
    /// Required limits (minimum).
    pub required_limits: wgpu::Limits,
}

impl Default for WgpuOptions {
    fn default() -> Self {
        Self {
            power_preference: PowerPreference::HighPerformance,
            backend: None,
            force_adapter_name: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
        }
    }
}

impl WgpuOptions {
    /// Creates options for large volumes: bigger buffers and 3D images.
    pub fn compute() -> Self {
        Self {
            required_limits: wgpu::Limits {
                max_storage_buffer_binding_size: 1 << 30, // 1GB
                max_buffer_size: 1 << 30,
                max_texture_dimension_2d: 16384,
                ..wgpu::Limits::default()
            },
            ..Self::default()
        }
    }

    /// Creates options for low-memory environments.
    pub fn low_memory() -> Self {
        Self {
            power_preference: PowerPreference::LowPower,
            required_limits: wgpu::Limits::downlevel_defaults(),
            ..Self::default()
        }
    }
}

/// The compute device handle.
///
/// Holds the wgpu device, queue, and adapter info. Device and queue are
/// reference counted so programs built on this backend can outlive borrows
/// of it.
///
/// # Example
///
/// ```rust,no_run
/// use gpuconv::gpu::{WgpuBackend, WgpuOptions};
///
/// let backend = WgpuBackend::init(WgpuOptions::default())?;
/// println!("Using GPU: {}", backend.adapter_info().name);
/// # Ok::<(), gpuconv::ConvError>(())
/// ```
pub struct WgpuBackend {
    /// The wgpu instance.
    pub instance: wgpu::Instance,
    /// The selected adapter.
    pub adapter: wgpu::Adapter,
    /// The wgpu device for resource creation.
    pub device: Arc<wgpu::Device>,
    /// The wgpu queue for command submission.
    pub queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
    error_scopes: ErrorScopes,
}

impl WgpuBackend {
    /// Initializes the GPU backend with the given options.
    ///
    /// # Errors
    ///
    /// - `ConvError::DeviceUnavailable` - No suitable GPU adapter found.
    /// - `ConvError::UnsupportedLimits` - Adapter limits below the requested ones.
    /// - `ConvError::DeviceRequestFailed` - Failed to create the device.
    pub fn init(options: WgpuOptions) -> ConvResult<Self> {
        let backends = options.backend.unwrap_or(wgpu::Backends::all());
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = pollster::block_on(Self::request_adapter(&instance, &options))?;
        let adapter_info = adapter.get_info();

        log::info!(
            "Selected GPU adapter: {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        Self::check_limits(&adapter.limits(), &options.required_limits)?;

        let (device, queue) = pollster::block_on(Self::request_device(&adapter, &options))?;
        let limits = device.limits();

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
            limits,
            error_scopes: ErrorScopes::default(),
        })
    }

    async fn request_adapter(
        instance: &wgpu::Instance,
        options: &WgpuOptions,
    ) -> ConvResult<wgpu::Adapter> {
        if let Some(ref name_filter) = options.force_adapter_name {
            let needle = name_filter.to_lowercase();
            return instance
                .enumerate_adapters(options.backend.unwrap_or(wgpu::Backends::all()))
                .into_iter()
                .find(|a| a.get_info().name.to_lowercase().contains(&needle))
                .ok_or_else(|| {
                    ConvError::device_unavailable(format!(
                        "no adapter matching '{}' found",
                        name_filter
                    ))
                });
        }

        let preferred = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference.into(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await;

        match preferred {
            Some(adapter) => Ok(adapter),
            None => instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::None,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| {
                    ConvError::device_unavailable(
                        "no GPU adapters available, ensure GPU drivers are installed",
                    )
                }),
        }
    }

    async fn request_device(
        adapter: &wgpu::Adapter,
        options: &WgpuOptions,
    ) -> ConvResult<(wgpu::Device, wgpu::Queue)> {
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("gpuconv device"),
                    required_features: options.required_features,
                    required_limits: options.required_limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        Ok((device, queue))
    }

    fn check_limits(adapter: &wgpu::Limits, required: &wgpu::Limits) -> ConvResult<()> {
        let checks = [
            (
                "max_storage_buffer_binding_size",
                adapter.max_storage_buffer_binding_size as u64,
                required.max_storage_buffer_binding_size as u64,
            ),
            ("max_buffer_size", adapter.max_buffer_size, required.max_buffer_size),
            (
                "max_texture_dimension_2d",
                adapter.max_texture_dimension_2d as u64,
                required.max_texture_dimension_2d as u64,
            ),
            (
                "max_texture_dimension_3d",
                adapter.max_texture_dimension_3d as u64,
                required.max_texture_dimension_3d as u64,
            ),
        ];
        for (name, has, wants) in checks {
            if has < wants {
                return Err(ConvError::unsupported_limits(format!(
                    "{}: adapter has {}, required {}",
                    name, has, wants
                )));
            }
        }
        Ok(())
    }

    /// Returns information about the selected adapter.
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    /// Returns the device limits.
    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Returns the largest storage buffer binding in bytes.
    pub fn max_storage_buffer_size(&self) -> u64 {
        self.limits.max_storage_buffer_binding_size as u64
    }

    /// Returns the error scope guard shared by everything built on this device.
    pub(crate) fn error_scopes(&self) -> ErrorScopes {
        self.error_scopes.clone()
    }

    /// Returns a reference to the device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Returns a reference to the queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .field("device_type", &self.adapter_info.device_type)
            .field(
                "max_storage_buffer",
                &self.limits.max_storage_buffer_binding_size,
            )
            .finish()
    }
}

/// Serializes validation error scopes on one device.
///
/// wgpu keeps a single error scope stack per device, so two threads pushing
/// and popping scopes on a shared backend could pop each other's scope. Every
/// push/pop pair made by this crate runs under this lock. Errors raised by
/// unscoped work on other threads can still be captured; callers mixing their
/// own wgpu work with `convolve` on a shared device should scope it themselves.
#[derive(Debug, Clone, Default)]
pub(crate) struct ErrorScopes {
    lock: Arc<Mutex<()>>,
}

impl ErrorScopes {
    /// Runs `f` inside a validation error scope and returns its value and
    /// the first validation error it raised.
    pub(crate) fn validate<T>(
        &self,
        device: &wgpu::Device,
        f: impl FnOnce() -> T,
    ) -> (T, Option<wgpu::Error>) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let error = pollster::block_on(device.pop_error_scope());
        (value, error)
    }
}

/// Supplies a device when the caller does not pass one explicitly.
pub trait DeviceProvider {
    /// Returns the default device, or `None` if no device is available.
    fn default_device(&self) -> Option<Arc<WgpuBackend>>;
}

/// Provider that initializes a [`WgpuBackend`] on first use and keeps it.
///
/// The backend lives in the provider instance, so two providers never share
/// a device unless the caller shares the provider.
#[derive(Debug, Default)]
pub struct DefaultDeviceProvider {
    options: WgpuOptions,
    backend: OnceLock<Option<Arc<WgpuBackend>>>,
}

impl DefaultDeviceProvider {
    /// Creates a provider that initializes with `options`.
    pub fn new(options: WgpuOptions) -> Self {
        Self {
            options,
            backend: OnceLock::new(),
        }
    }
}

impl DeviceProvider for DefaultDeviceProvider {
    fn default_device(&self) -> Option<Arc<WgpuBackend>> {
        self.backend
            .get_or_init(|| match WgpuBackend::init(self.options.clone()) {
                Ok(backend) => Some(Arc::new(backend)),
                Err(err) => {
                    log::warn!("default GPU device unavailable: {}", err);
                    None
                }
            })
            .clone()
    }
}

impl<P: DeviceProvider + ?Sized> DeviceProvider for &P {
    fn default_device(&self) -> Option<Arc<WgpuBackend>> {
        (**self).default_device()
    }
}

/// Provider that never yields a device.
///
/// Forces callers to pass a device explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDevice;

impl DeviceProvider for NoDevice {
    fn default_device(&self) -> Option<Arc<WgpuBackend>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let opts = WgpuOptions::default();
        assert_eq!(opts.power_preference, PowerPreference::HighPerformance);
        assert!(opts.backend.is_none());
    }

    #[test]
    fn test_options_compute() {
        let opts = WgpuOptions::compute();
        assert!(opts.required_limits.max_storage_buffer_binding_size >= 1 << 30);
        assert_eq!(opts.required_limits.max_texture_dimension_2d, 16384);
    }

    #[test]
    fn test_check_limits_rejects_small_adapter() {
        let adapter = wgpu::Limits::downlevel_defaults();
        let required = WgpuOptions::compute().required_limits;
        let err = WgpuBackend::check_limits(&adapter, &required).unwrap_err();
        assert!(matches!(err, ConvError::UnsupportedLimits(_)));
    }

    #[test]
    fn test_no_device_provider() {
        assert!(NoDevice.default_device().is_none());
    }

    // GPU tests require actual GPU, run with: cargo test -- --ignored
    #[test]
    #[ignore = "Requires GPU"]
    fn test_error_scope_reports_validation_error() {
        let backend = WgpuBackend::init(WgpuOptions::default()).expect("GPU init");
        let scopes = backend.error_scopes();
        let device = backend.device();

        let (_, error) = scopes.validate(device, || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: None,
                size: 16,
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        });
        assert!(error.is_none());

        // MAP_READ may only be combined with COPY_DST.
        let (_, error) = scopes.validate(device, || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: None,
                size: 16,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        });
        assert!(matches!(error, Some(wgpu::Error::Validation { .. })));
    }

    #[test]
    #[ignore = "Requires GPU"]
    fn test_default_provider_memoizes() {
        let provider = DefaultDeviceProvider::default();
        let a = provider.default_device().expect("GPU init");
        let b = provider.default_device().expect("GPU init");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
