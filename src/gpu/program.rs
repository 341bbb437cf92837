//! Compiled device programs.
//!
//! A [`Program`] is one WGSL source built with one set of build flags on one
//! device. Building is eager: [`ProgramBuilder::build`] preprocesses, parses,
//! validates and creates the shader module, so a broken source fails at
//! construction rather than at the first launch.
//!
//! # Example
//!
//! ```rust,no_run
//! use gpuconv::gpu::{GpuTensor, KernelArg, ProgramBuilder, WgpuBackend, WgpuOptions};
//! use gpuconv::gpu::NoDevice;
//! use gpuconv::source::BundledSources;
//!
//! let backend = WgpuBackend::init(WgpuOptions::default())?;
//! let src = r#"
//! @group(0) @binding(0) var<storage, read_write> a: array<f32>;
//! struct Params { val: f32, }
//! @group(0) @binding(1) var<uniform> p: Params;
//! @compute @workgroup_size(64)
//! fn add(@builtin(global_invocation_id) gid: vec3<u32>) {
//!     if (gid.x < arrayLength(&a)) { a[gid.x] += p.val; }
//! }
//! "#;
//! let prog = ProgramBuilder::new()
//!     .source_text(src)
//!     .device(&backend)
//!     .build(&BundledSources, &NoDevice)?;
//!
//! let data = vec![1.0f32; 1000];
//! let buf = GpuTensor::upload(&backend, &data, vec![1000])?;
//! prog.run("add", &[1000], None, &[KernelArg::Buffer(&buf), KernelArg::Float(2.0)])?;
//! assert_eq!(buf.download(&backend)?, vec![3.0; 1000]);
//! # Ok::<(), gpuconv::ConvError>(())
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use wgpu::util::DeviceExt;

use crate::config::ConfigError;
use crate::error::{ConvError, ConvResult};
use crate::gpu::shader::{BindingKind, ReflectedBinding, ShaderIr};
use crate::gpu::uniforms::{pack_scalars, ScalarWord};
use crate::gpu::backend::ErrorScopes;
use crate::gpu::{DeviceProvider, GpuImage, GpuTensor, WgpuBackend};
use crate::source::SourceResolver;

/// One positional kernel argument.
///
/// Resources bind to the entry point's bindings in ascending order; scalars
/// are packed, in order, into a uniform buffer bound after the last resource.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg<'a> {
    /// Sampled image.
    Image(&'a GpuImage),
    /// Storage buffer.
    Buffer(&'a GpuTensor),
    /// Signed 32-bit scalar.
    Int(i32),
    /// Unsigned 32-bit scalar.
    Uint(u32),
    /// 32-bit float scalar.
    Float(f32),
}

impl KernelArg<'_> {
    fn scalar_word(&self) -> Option<ScalarWord> {
        match *self {
            KernelArg::Int(v) => Some(v.into()),
            KernelArg::Uint(v) => Some(v.into()),
            KernelArg::Float(v) => Some(v.into()),
            KernelArg::Image(_) | KernelArg::Buffer(_) => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            KernelArg::Image(_) => "image",
            KernelArg::Buffer(_) => "buffer",
            KernelArg::Int(_) => "i32",
            KernelArg::Uint(_) => "u32",
            KernelArg::Float(_) => "f32",
        }
    }
}

/// Builder for [`Program`].
#[derive(Debug, Default)]
pub struct ProgramBuilder<'a> {
    source_id: Option<String>,
    source_text: Option<String>,
    build_flags: String,
    label: Option<String>,
    device: Option<&'a WgpuBackend>,
}

impl<'a> ProgramBuilder<'a> {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Source identifier to resolve. Takes precedence over literal text.
    pub fn source_id(mut self, id: impl Into<String>) -> Self {
        self.source_id = Some(id.into());
        self
    }

    /// Literal WGSL source.
    pub fn source_text(mut self, text: impl Into<String>) -> Self {
        self.source_text = Some(text.into());
        self
    }

    /// Build flags, e.g. `"-D SHORTTYPE"`.
    pub fn build_flags(mut self, flags: impl Into<String>) -> Self {
        self.build_flags = flags.into();
        self
    }

    /// Label used for wgpu objects and diagnostics.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Device to build on. Without one, `build` asks the device provider.
    pub fn device(mut self, device: &'a WgpuBackend) -> Self {
        self.device = Some(device);
        self
    }

    /// Resolves source and device and compiles the program.
    ///
    /// # Errors
    ///
    /// - `ConvError::Config` if no source is given or it is empty.
    /// - `ConvError::DeviceUnavailable` if no device is given or provided.
    /// - `ConvError::Compile` if the flags or source are rejected.
    pub fn build<R, P>(self, resolver: &R, devices: &P) -> ConvResult<Program>
    where
        R: SourceResolver + ?Sized,
        P: DeviceProvider + ?Sized,
    {
        let source = match (&self.source_id, self.source_text) {
            (Some(id), _) => resolver.load_source(id)?,
            (None, Some(text)) => text,
            (None, None) => return Err(ConfigError::MissingSource.into()),
        };
        let label = self
            .label
            .or_else(|| self.source_id.clone())
            .unwrap_or_else(|| "inline".to_string());
        if source.trim().is_empty() {
            return Err(ConfigError::EmptySource(label).into());
        }

        let provided;
        let backend = match self.device {
            Some(device) => device,
            None => {
                provided = devices.default_device().ok_or_else(|| {
                    ConvError::device_unavailable("no device given and no default device found")
                })?;
                &*provided
            }
        };

        Program::compile(backend, label, self.source_id, &source, self.build_flags)
    }
}

struct CompiledKernel {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    bindings: Vec<ReflectedBinding>,
    workgroup_size: [u32; 3],
}

/// A program compiled for one device with one set of build flags.
pub struct Program {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    error_scopes: ErrorScopes,
    max_workgroups: u32,
    source_id: Option<String>,
    build_flags: String,
    ir: ShaderIr,
    module: wgpu::ShaderModule,
    kernels: Mutex<HashMap<String, Arc<CompiledKernel>>>,
}

impl Program {
    /// Compiles literal `source` on `backend`.
    pub fn build(backend: &WgpuBackend, source: &str, build_flags: &str) -> ConvResult<Self> {
        ProgramBuilder::new()
            .source_text(source)
            .build_flags(build_flags)
            .device(backend)
            .build(&NoSources, &crate::gpu::NoDevice)
    }

    fn compile(
        backend: &WgpuBackend,
        label: String,
        source_id: Option<String>,
        source: &str,
        build_flags: String,
    ) -> ConvResult<Self> {
        log::debug!("building program '{}' with flags '{}'", label, build_flags);

        let ir = ShaderIr::compile(&label, source, &build_flags)?;

        let device = backend.device();
        let error_scopes = backend.error_scopes();
        let (module, error) = error_scopes.validate(device, || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(ir.source())),
            })
        });
        if let Some(err) = error {
            return Err(ConvError::compile(label, err.to_string()));
        }

        Ok(Self {
            device: Arc::clone(&backend.device),
            queue: Arc::clone(&backend.queue),
            error_scopes,
            max_workgroups: backend.limits().max_compute_workgroups_per_dimension,
            source_id,
            build_flags,
            ir,
            module,
            kernels: Mutex::new(HashMap::new()),
        })
    }

    /// Label of the program.
    pub fn label(&self) -> &str {
        self.ir.label()
    }

    /// Source identifier the program was built from, if any.
    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    /// Build flags the program was built with.
    pub fn build_flags(&self) -> &str {
        &self.build_flags
    }

    /// Names of the compute entry points.
    pub fn kernel_names(&self) -> Vec<String> {
        self.ir.compute_entry_points()
    }

    /// Workgroup size declared by an entry point.
    pub fn workgroup_size(&self, name: &str) -> ConvResult<[u32; 3]> {
        self.ir.workgroup_size(name)
    }

    /// Launches entry point `name`.
    ///
    /// `global_size` gives the number of work-items per axis (1 to 3 axes).
    /// `local_size`, if given, must match the workgroup size the entry point
    /// declares. The launch is submitted to the queue and not awaited; reading
    /// an output buffer back synchronizes.
    ///
    /// # Errors
    ///
    /// - `ConvError::KernelNotFound` for unknown entry points.
    /// - `ConvError::KernelArguments` if geometry or arguments do not match
    ///   the entry point.
    /// - `ConvError::UnsupportedLimits` if the dispatch is too large.
    /// - `ConvError::Validation` if wgpu rejects the bind group or dispatch.
    pub fn run(
        &self,
        name: &str,
        global_size: &[u32],
        local_size: Option<&[u32]>,
        args: &[KernelArg<'_>],
    ) -> ConvResult<()> {
        let kernel = self.kernel(name)?;
        let workgroups =
            dispatch_counts(global_size, local_size, kernel.workgroup_size, self.max_workgroups)?;
        check_arguments(name, &kernel.bindings, args)?;

        let words: Vec<ScalarWord> = args.iter().filter_map(KernelArg::scalar_word).collect();
        let scalars = if words.is_empty() {
            None
        } else {
            Some(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Program scalar arguments"),
                contents: &pack_scalars(&words),
                usage: wgpu::BufferUsages::UNIFORM,
            }))
        };

        let mut resources = args.iter().filter(|a| a.scalar_word().is_none());
        let mut entries = Vec::with_capacity(kernel.bindings.len());
        for binding in &kernel.bindings {
            let resource = match (binding.kind, resources.next()) {
                (BindingKind::Texture { .. }, Some(KernelArg::Image(image))) => {
                    wgpu::BindingResource::TextureView(&image.view)
                }
                (BindingKind::StorageBuffer { .. }, Some(KernelArg::Buffer(tensor))) => {
                    tensor.buffer.as_entire_binding()
                }
                (BindingKind::Uniform, None) => match scalars.as_ref() {
                    Some(buffer) => buffer.as_entire_binding(),
                    None => return Err(missing_scalars(name)),
                },
                // check_arguments already matched kinds and counts
                _ => return Err(ConvError::kernel_arguments(format!(
                    "'{}': argument does not fit binding {}",
                    name, binding.binding
                ))),
            };
            entries.push(wgpu::BindGroupEntry {
                binding: binding.binding,
                resource,
            });
        }

        let ((), error) = self.error_scopes.validate(&self.device, || {
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(name),
                layout: &kernel.bind_group_layout,
                entries: &entries,
            });

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(name) });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(name),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&kernel.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                if workgroups.iter().all(|&n| n > 0) {
                    pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
                }
            }
            self.queue.submit(std::iter::once(encoder.finish()));
        });
        if let Some(err) = error {
            return Err(ConvError::validation(err.to_string()));
        }

        log::debug!(
            "'{}': launched {:?} workgroups for global size {:?}",
            name,
            workgroups,
            global_size
        );
        Ok(())
    }

    fn kernel(&self, name: &str) -> ConvResult<Arc<CompiledKernel>> {
        let mut kernels = self.kernels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(kernel) = kernels.get(name) {
            return Ok(Arc::clone(kernel));
        }

        let bindings = self.ir.bindings(name)?;
        let workgroup_size = self.ir.workgroup_size(name)?;
        let layout_entries: Vec<_> = bindings.iter().map(ReflectedBinding::layout_entry).collect();

        let ((bind_group_layout, pipeline), error) =
            self.error_scopes.validate(&self.device, || {
                let bind_group_layout =
                    self.device
                        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                            label: Some(name),
                            entries: &layout_entries,
                        });
                let pipeline_layout =
                    self.device
                        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                            label: Some(name),
                            bind_group_layouts: &[&bind_group_layout],
                            push_constant_ranges: &[],
                        });
                let pipeline =
                    self.device
                        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                            label: Some(name),
                            layout: Some(&pipeline_layout),
                            module: &self.module,
                            entry_point: Some(name),
                            compilation_options: Default::default(),
                            cache: None,
                        });
                (bind_group_layout, pipeline)
            });
        if let Some(err) = error {
            return Err(ConvError::validation(err.to_string()));
        }

        let kernel = Arc::new(CompiledKernel {
            pipeline,
            bind_group_layout,
            bindings,
            workgroup_size,
        });
        kernels.insert(name.to_string(), Arc::clone(&kernel));
        Ok(kernel)
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("label", &self.label())
            .field("source_id", &self.source_id)
            .field("build_flags", &self.build_flags)
            .field("kernels", &self.kernel_names())
            .finish()
    }
}

/// Resolver used for literal-source builds; never consulted.
struct NoSources;

impl SourceResolver for NoSources {
    fn load_source(&self, id: &str) -> ConvResult<String> {
        Err(ConfigError::UnknownSource(id.to_string()).into())
    }
}

fn missing_scalars(name: &str) -> ConvError {
    ConvError::kernel_arguments(format!("'{}' expects scalar arguments, none given", name))
}

/// Computes workgroup counts per axis for a launch.
pub(crate) fn dispatch_counts(
    global_size: &[u32],
    local_size: Option<&[u32]>,
    declared: [u32; 3],
    max_per_dimension: u32,
) -> ConvResult<[u32; 3]> {
    if global_size.is_empty() || global_size.len() > 3 {
        return Err(ConvError::kernel_arguments(format!(
            "global size must have 1 to 3 axes, got {:?}",
            global_size
        )));
    }
    if let Some(local) = local_size {
        let mut padded = [1u32; 3];
        padded[..local.len().min(3)].copy_from_slice(&local[..local.len().min(3)]);
        if local.len() != global_size.len() || padded != declared {
            return Err(ConvError::kernel_arguments(format!(
                "local size {:?} does not match declared workgroup size {:?}",
                local, declared
            )));
        }
    }

    let mut counts = [1u32; 3];
    for (axis, &global) in global_size.iter().enumerate() {
        counts[axis] = global.div_ceil(declared[axis]);
        if counts[axis] > max_per_dimension {
            return Err(ConvError::unsupported_limits(format!(
                "{} workgroups on axis {} exceeds device limit {}",
                counts[axis], axis, max_per_dimension
            )));
        }
    }
    Ok(counts)
}

/// Checks argument count and kinds against the reflected bindings.
pub(crate) fn check_arguments(
    name: &str,
    bindings: &[ReflectedBinding],
    args: &[KernelArg<'_>],
) -> ConvResult<()> {
    let resources: Vec<&KernelArg<'_>> =
        args.iter().filter(|a| a.scalar_word().is_none()).collect();
    let has_scalars = resources.len() < args.len();
    let expected = resources.len() + usize::from(has_scalars);
    if bindings.len() != expected {
        return Err(ConvError::kernel_arguments(format!(
            "'{}' declares {} bindings, got {} resource argument(s) and {} scalar(s)",
            name,
            bindings.len(),
            resources.len(),
            args.len() - resources.len()
        )));
    }

    for (binding, arg) in bindings.iter().zip(resources.iter()) {
        let fits = matches!(
            (binding.kind, arg),
            (BindingKind::Texture { .. }, KernelArg::Image(_))
                | (BindingKind::StorageBuffer { .. }, KernelArg::Buffer(_))
        );
        if !fits {
            return Err(ConvError::kernel_arguments(format!(
                "'{}': binding {} expects {:?}, got {}",
                name,
                binding.binding,
                binding.kind,
                arg.kind_name()
            )));
        }
    }
    if has_scalars && bindings.last().map(|b| b.kind) != Some(BindingKind::Uniform) {
        return Err(ConvError::kernel_arguments(format!(
            "'{}' takes no uniform block for its scalar arguments",
            name
        )));
    }
    Ok(())
}
