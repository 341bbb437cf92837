//! Host-side WGSL compilation and interface reflection.
//!
//! Programs are preprocessed with their build flags, then parsed and
//! validated with naga before wgpu ever sees them. That turns compiler
//! failures into [`ConvError::Compile`] values carrying the formatted
//! diagnostic, and gives us the entry points and resource bindings needed to
//! build explicit bind group layouts.
//!
//! Explicit layouts matter here: `r32float` images are not filterable, and a
//! layout derived by wgpu would declare them as filterable floats.

use crate::error::{ConvError, ConvResult};
use crate::preprocess::BuildFlags;

/// A validated shader module and its naga IR.
#[derive(Debug)]
pub struct ShaderIr {
    label: String,
    source: String,
    module: naga::Module,
    info: naga::valid::ModuleInfo,
}

impl ShaderIr {
    /// Preprocesses, parses and validates `source`.
    ///
    /// # Errors
    ///
    /// Returns `ConvError::Compile` for malformed build flags or directives,
    /// WGSL syntax errors, and validation failures.
    pub fn compile(label: &str, source: &str, build_flags: &str) -> ConvResult<Self> {
        let flags = BuildFlags::parse(build_flags).map_err(|d| ConvError::compile(label, d))?;
        let text = flags.apply(source).map_err(|d| ConvError::compile(label, d))?;

        let module = naga::front::wgsl::parse_str(&text)
            .map_err(|e| ConvError::compile(label, e.emit_to_string(&text)))?;

        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::default(),
        )
        .validate(&module)
        .map_err(|e| ConvError::compile(label, e.emit_to_string(&text)))?;

        Ok(Self {
            label: label.to_string(),
            source: text,
            module,
            info,
        })
    }

    /// Label used in diagnostics.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Preprocessed WGSL text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of all compute entry points, in declaration order.
    pub fn compute_entry_points(&self) -> Vec<String> {
        self.module
            .entry_points
            .iter()
            .filter(|ep| ep.stage == naga::ShaderStage::Compute)
            .map(|ep| ep.name.clone())
            .collect()
    }

    fn entry_index(&self, name: &str) -> ConvResult<usize> {
        self.module
            .entry_points
            .iter()
            .position(|ep| ep.name == name && ep.stage == naga::ShaderStage::Compute)
            .ok_or_else(|| ConvError::KernelNotFound {
                name: name.to_string(),
                available: self.compute_entry_points(),
            })
    }

    /// Workgroup size declared by a compute entry point.
    pub fn workgroup_size(&self, name: &str) -> ConvResult<[u32; 3]> {
        let index = self.entry_index(name)?;
        Ok(self.module.entry_points[index].workgroup_size)
    }

    /// Resource bindings used by an entry point, sorted by binding number.
    ///
    /// # Errors
    ///
    /// - `ConvError::KernelNotFound` for unknown entry points.
    /// - `ConvError::KernelArguments` for bindings outside group 0 or of
    ///   kinds kernels cannot take as arguments (samplers, storage textures).
    pub fn bindings(&self, name: &str) -> ConvResult<Vec<ReflectedBinding>> {
        let index = self.entry_index(name)?;
        let usage = self.info.get_entry_point(index);

        let mut bindings = Vec::new();
        for (handle, var) in self.module.global_variables.iter() {
            if usage[handle].is_empty() {
                continue;
            }
            let Some(ref binding) = var.binding else {
                continue;
            };
            let var_name = var.name.as_deref().unwrap_or("<unnamed>");
            if binding.group != 0 {
                return Err(ConvError::kernel_arguments(format!(
                    "'{}' uses @group({}) for '{}', only group 0 can be bound",
                    name, binding.group, var_name
                )));
            }
            let kind = match var.space {
                naga::AddressSpace::Uniform => BindingKind::Uniform,
                naga::AddressSpace::Storage { access } => BindingKind::StorageBuffer {
                    read_only: !access.contains(naga::StorageAccess::STORE),
                },
                naga::AddressSpace::Handle => image_binding(&self.module.types[var.ty].inner)
                    .ok_or_else(|| {
                        ConvError::kernel_arguments(format!(
                            "'{}' binds unsupported resource '{}'",
                            name, var_name
                        ))
                    })?,
                other => {
                    return Err(ConvError::kernel_arguments(format!(
                        "'{}' binds '{}' in unsupported address space {:?}",
                        name, var_name, other
                    )))
                }
            };
            bindings.push(ReflectedBinding {
                binding: binding.binding,
                kind,
            });
        }
        bindings.sort_by_key(|b| b.binding);
        Ok(bindings)
    }
}

fn image_binding(inner: &naga::TypeInner) -> Option<BindingKind> {
    let naga::TypeInner::Image {
        dim,
        arrayed,
        class: naga::ImageClass::Sampled { kind, multi },
    } = *inner
    else {
        return None;
    };
    let view_dimension = match (dim, arrayed) {
        (naga::ImageDimension::D1, false) => wgpu::TextureViewDimension::D1,
        (naga::ImageDimension::D2, false) => wgpu::TextureViewDimension::D2,
        (naga::ImageDimension::D2, true) => wgpu::TextureViewDimension::D2Array,
        (naga::ImageDimension::D3, false) => wgpu::TextureViewDimension::D3,
        (naga::ImageDimension::Cube, false) => wgpu::TextureViewDimension::Cube,
        (naga::ImageDimension::Cube, true) => wgpu::TextureViewDimension::CubeArray,
        _ => return None,
    };
    let sample_type = match kind {
        naga::ScalarKind::Float => wgpu::TextureSampleType::Float { filterable: false },
        naga::ScalarKind::Uint => wgpu::TextureSampleType::Uint,
        naga::ScalarKind::Sint => wgpu::TextureSampleType::Sint,
        _ => return None,
    };
    Some(BindingKind::Texture {
        view_dimension,
        sample_type,
        multisampled: multi,
    })
}

/// Kind of resource an entry point expects at a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Sampled texture read with `textureLoad`.
    Texture {
        /// View dimension of the texture.
        view_dimension: wgpu::TextureViewDimension,
        /// Sample type of the texture.
        sample_type: wgpu::TextureSampleType,
        /// Whether the texture is multisampled.
        multisampled: bool,
    },
    /// Storage buffer.
    StorageBuffer {
        /// True for `var<storage, read>`.
        read_only: bool,
    },
    /// Uniform buffer (scalar arguments).
    Uniform,
}

/// One `@group(0)` binding used by an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectedBinding {
    /// Binding number.
    pub binding: u32,
    /// Expected resource kind.
    pub kind: BindingKind,
}

impl ReflectedBinding {
    /// Converts to a compute-visible bind group layout entry.
    pub fn layout_entry(&self) -> wgpu::BindGroupLayoutEntry {
        let ty = match self.kind {
            BindingKind::Texture {
                view_dimension,
                sample_type,
                multisampled,
            } => wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled,
            },
            BindingKind::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::Uniform => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        };
        wgpu::BindGroupLayoutEntry {
            binding: self.binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD: &str = r#"
@group(0) @binding(0) var<storage, read_write> a: array<f32>;
struct Params { val: f32, n: u32, }
@group(0) @binding(1) var<uniform> p: Params;

@compute @workgroup_size(64)
fn add(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x < p.n) {
        a[gid.x] += p.val;
    }
}
"#;

    #[test]
    fn test_compile_and_reflect() {
        let ir = ShaderIr::compile("add", ADD, "").unwrap();
        assert_eq!(ir.compute_entry_points(), vec!["add".to_string()]);
        assert_eq!(ir.workgroup_size("add").unwrap(), [64, 1, 1]);

        let bindings = ir.bindings("add").unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].kind, BindingKind::StorageBuffer { read_only: false });
        assert_eq!(bindings[1].kind, BindingKind::Uniform);
    }

    #[test]
    fn test_syntax_error_carries_diagnostic() {
        let broken = ADD.replace("a[gid.x] += p.val;", "a[gid.x] += p.val");
        match ShaderIr::compile("broken", &broken, "") {
            Err(ConvError::Compile { label, diagnostic }) => {
                assert_eq!(label, "broken");
                assert!(!diagnostic.is_empty());
            }
            other => panic!("expected compile error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_validation_error_is_compile_error() {
        let bad_type = ADD.replace("a[gid.x] += p.val;", "a[gid.x] += p.n;");
        assert!(matches!(
            ShaderIr::compile("bad", &bad_type, ""),
            Err(ConvError::Compile { .. })
        ));
    }

    #[test]
    fn test_unsupported_flag_is_compile_error() {
        assert!(matches!(
            ShaderIr::compile("add", ADD, "-cl-fast-relaxed-math"),
            Err(ConvError::Compile { .. })
        ));
    }

    #[test]
    fn test_unknown_kernel() {
        let ir = ShaderIr::compile("add", ADD, "").unwrap();
        match ir.bindings("sub") {
            Err(ConvError::KernelNotFound { name, available }) => {
                assert_eq!(name, "sub");
                assert_eq!(available, vec!["add".to_string()]);
            }
            other => panic!("expected KernelNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_layout_entry_for_unfilterable_image() {
        let binding = ReflectedBinding {
            binding: 0,
            kind: BindingKind::Texture {
                view_dimension: wgpu::TextureViewDimension::D3,
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                multisampled: false,
            },
        };
        let entry = binding.layout_entry();
        assert_eq!(entry.binding, 0);
        assert!(matches!(
            entry.ty,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                ..
            }
        ));
    }
}
