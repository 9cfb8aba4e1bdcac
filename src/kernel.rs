//! Kernel compilation.
//!
//! A kernel is GLSL compute source compiled at runtime. The runtime
//! prepends [`KERNEL_PROLOG`], which defines the ABI every kernel sees:
//! the global heap bound as a `uint` array at binding 0, the bindless
//! RW-texture array at binding 1, pointer load/store helpers, and texture
//! helpers that apply non-uniform indexing. Launch parameters are a
//! `push_constant` block laid out by the kernel author; reflection
//! recovers its size and the workgroup dimensions and rejects kernels
//! that declare resources outside this model.

mod reflect;

use std::path::Path;

use ash::vk;
use glam::UVec3;

use crate::device::Device;
use crate::error::{GpuError, GpuResult};
use crate::pool::Handle;

pub(crate) use reflect::Reflection;

/// Upper bound on a kernel's launch-parameter block, in bytes.
pub const GPU_LAUNCH_PARAMS_MAX_SIZE: u32 = 48;
/// Maximum number of preprocessor defines per kernel.
pub const GPU_KERNEL_MAX_NUM_DEFINES: usize = 8;
/// Maximum length of a single define string.
pub const GPU_KERNEL_DEFINE_MAX_LEN: usize = 48;

/// The source prelude prepended to every kernel.
///
/// This text is the runtime/kernel contract: kernel sources must not
/// declare their own `#version` or resource bindings, and address all
/// memory through `GpuPtr` offsets and `GpuRWTex` indices.
pub const KERNEL_PROLOG: &str = r#"#version 460
#extension GL_EXT_nonuniform_qualifier : require
#extension GL_EXT_shader_image_load_formatted : require

// Marker macros for code shared between host and kernels.
#define SCORIA 1
#define GPU_GLSL 1

// Fixed binding model. The runtime owns both bindings; kernels must not
// declare any other buffer or image resources.
layout(set = 0, binding = 0, std430) buffer GpuGlobalHeap {
    uint gpu_global_heap[];
};
layout(set = 0, binding = 1) uniform image2D gpu_rwtex_array[];

// Texture indices (matches GpuRWTex on the host).
#define GpuRWTex uint
const GpuRWTex GPU_NULL_RWTEX = 0;
const GpuRWTex GPU_RWTEX_SWAPCHAIN = 1;

ivec2 rwtex_res(GpuRWTex idx)
{
    return imageSize(gpu_rwtex_array[nonuniformEXT(idx)]);
}
vec4 rwtex_load(GpuRWTex idx, ivec2 coord)
{
    return imageLoad(gpu_rwtex_array[nonuniformEXT(idx)], coord);
}
void rwtex_store(GpuRWTex idx, ivec2 coord, vec4 value)
{
    imageStore(gpu_rwtex_array[nonuniformEXT(idx)], coord, value);
}
vec4 swapchain_load(ivec2 coord) { return rwtex_load(GPU_RWTEX_SWAPCHAIN, coord); }
void swapchain_store(ivec2 coord, vec4 value) { rwtex_store(GPU_RWTEX_SWAPCHAIN, coord, value); }

// Pointer type (matches GpuPtr on the host): a byte offset into the heap.
#define GpuPtr uint
const GpuPtr GPU_NULLPTR = 0;

uint ptr_load_u32(GpuPtr ptr) { return gpu_global_heap[ptr >> 2]; }
void ptr_store_u32(GpuPtr ptr, uint value) { gpu_global_heap[ptr >> 2] = value; }

uint ptr_load_byte(GpuPtr ptr)
{
    uint word = gpu_global_heap[ptr >> 2];
    return (word >> ((ptr & 3u) * 8u)) & 0xFFu;
}

int ptr_load_i32(GpuPtr ptr) { return int(ptr_load_u32(ptr)); }
void ptr_store_i32(GpuPtr ptr, int value) { ptr_store_u32(ptr, uint(value)); }
float ptr_load_f32(GpuPtr ptr) { return uintBitsToFloat(ptr_load_u32(ptr)); }
void ptr_store_f32(GpuPtr ptr, float value) { ptr_store_u32(ptr, floatBitsToUint(value)); }

uvec2 ptr_load_u32x2(GpuPtr ptr) { return uvec2(ptr_load_u32(ptr), ptr_load_u32(ptr + 4)); }
void ptr_store_u32x2(GpuPtr ptr, uvec2 v) { ptr_store_u32(ptr, v.x); ptr_store_u32(ptr + 4, v.y); }
vec2 ptr_load_f32x2(GpuPtr ptr) { return vec2(ptr_load_f32(ptr), ptr_load_f32(ptr + 4)); }
void ptr_store_f32x2(GpuPtr ptr, vec2 v) { ptr_store_f32(ptr, v.x); ptr_store_f32(ptr + 4, v.y); }
vec4 ptr_load_f32x4(GpuPtr ptr)
{
    return vec4(ptr_load_f32(ptr), ptr_load_f32(ptr + 4), ptr_load_f32(ptr + 8), ptr_load_f32(ptr + 12));
}
void ptr_store_f32x4(GpuPtr ptr, vec4 v)
{
    ptr_store_f32(ptr, v.x);
    ptr_store_f32(ptr + 4, v.y);
    ptr_store_f32(ptr + 8, v.z);
    ptr_store_f32(ptr + 12, v.w);
}

uint ptr_load_u32_elem(GpuPtr ptr, uint idx) { return ptr_load_u32(ptr + idx * 4); }
void ptr_store_u32_elem(GpuPtr ptr, uint idx, uint value) { ptr_store_u32(ptr + idx * 4, value); }
float ptr_load_f32_elem(GpuPtr ptr, uint idx) { return ptr_load_f32(ptr + idx * 4); }
void ptr_store_f32_elem(GpuPtr ptr, uint idx, float value) { ptr_store_f32(ptr + idx * 4, value); }
"#;

/// An opaque handle to a compiled kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GpuKernel(pub(crate) Handle);

impl GpuKernel {
    pub const NULL: GpuKernel = GpuKernel(Handle::NULL);

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

/// Where a kernel's source text comes from.
#[derive(Debug, Clone, Copy)]
pub enum KernelSource<'a> {
    /// In-memory GLSL source.
    Source(&'a str),
    /// A path to a GLSL source file, read at kernel init.
    File(&'a Path),
}

/// Kernel creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct GpuKernelDesc<'a> {
    /// Name used in logs and compile diagnostics.
    pub name: &'a str,
    pub source: KernelSource<'a>,
    /// Preprocessor defines, each `"NAME"` or `"NAME=VALUE"`.
    /// At most [`GPU_KERNEL_MAX_NUM_DEFINES`] entries of at most
    /// [`GPU_KERNEL_DEFINE_MAX_LEN`] characters.
    pub defines: &'a [&'a str],
}

/// A compiled kernel: pipeline, layout and reflected facts.
pub(crate) struct KernelInfo {
    device: Device,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub group_dims: UVec3,
    pub launch_params_size: u32,
}

impl Drop for KernelInfo {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Compiles kernels against the fixed binding model.
pub(crate) struct KernelCompiler {
    device: Device,
    compiler: shaderc::Compiler,
}

impl KernelCompiler {
    pub fn new(device: Device) -> GpuResult<Self> {
        let compiler = shaderc::Compiler::new().ok_or_else(|| GpuError::KernelCompile {
            name: String::new(),
            message: "shader compiler unavailable".into(),
        })?;
        Ok(Self { device, compiler })
    }

    /// Compiles, reflects and builds the pipeline for one kernel.
    pub fn compile(
        &self,
        desc: &GpuKernelDesc<'_>,
        set_layout: vk::DescriptorSetLayout,
    ) -> GpuResult<KernelInfo> {
        let user_source;
        let (source, input_name) = match desc.source {
            KernelSource::Source(text) => (text, desc.name),
            KernelSource::File(path) => {
                user_source =
                    std::fs::read_to_string(path).map_err(|source| GpuError::KernelSource {
                        path: path.to_path_buf(),
                        source,
                    })?;
                (user_source.as_str(), desc.name)
            }
        };
        let full_source = assemble_source(source);

        let mut options =
            shaderc::CompileOptions::new().ok_or_else(|| GpuError::KernelCompile {
                name: desc.name.into(),
                message: "failed to create compile options".into(),
            })?;
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_2 as u32,
        );
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);
        options.set_generate_debug_info();
        for define in parse_defines(desc.defines).map_err(|message| GpuError::KernelCompile {
            name: desc.name.into(),
            message,
        })? {
            options.add_macro_definition(define.0, define.1);
        }

        let artifact = self
            .compiler
            .compile_into_spirv(
                &full_source,
                shaderc::ShaderKind::Compute,
                input_name,
                "main",
                Some(&options),
            )
            .map_err(|err| GpuError::KernelCompile {
                name: desc.name.into(),
                message: err.to_string(),
            })?;
        if artifact.get_num_warnings() > 0 {
            tracing::warn!(
                kernel = desc.name,
                "{}",
                artifact.get_warning_messages().trim_end()
            );
        }
        let words = artifact.as_binary();

        let reflection = reflect::reflect(words).map_err(|message| GpuError::KernelReflection {
            name: desc.name.into(),
            message,
        })?;
        if reflection.launch_params_size > GPU_LAUNCH_PARAMS_MAX_SIZE {
            return Err(GpuError::KernelReflection {
                name: desc.name.into(),
                message: format!(
                    "launch-parameter block is {} bytes, limit is {GPU_LAUNCH_PARAMS_MAX_SIZE}",
                    reflection.launch_params_size
                ),
            });
        }

        self.build_pipeline(desc.name, words, set_layout, reflection)
    }

    fn build_pipeline(
        &self,
        name: &str,
        words: &[u32],
        set_layout: vk::DescriptorSetLayout,
        reflection: Reflection,
    ) -> GpuResult<KernelInfo> {
        let device = &self.device;
        let module = unsafe {
            device.create_shader_module(
                &vk::ShaderModuleCreateInfo::default().code(words),
                None,
            )?
        };

        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: reflection.launch_params_size,
        }];
        let set_layouts = [set_layout];
        let mut layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        if reflection.launch_params_size > 0 {
            layout_info = layout_info.push_constant_ranges(&push_constant_ranges);
        }
        let layout = match unsafe { device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(err) => {
                unsafe { device.destroy_shader_module(module, None) };
                return Err(err.into());
            }
        };

        let create_info = vk::ComputePipelineCreateInfo {
            layout,
            stage: vk::PipelineShaderStageCreateInfo {
                stage: vk::ShaderStageFlags::COMPUTE,
                module,
                p_name: c"main".as_ptr(),
                ..Default::default()
            },
            ..Default::default()
        };
        let pipelines = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
        };
        unsafe { device.destroy_shader_module(module, None) };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(err.into());
            }
        };

        tracing::info!(
            kernel = name,
            group_dims = ?reflection.group_dims,
            launch_params_size = reflection.launch_params_size,
            "compiled kernel"
        );
        Ok(KernelInfo {
            device: device.clone(),
            pipeline,
            layout,
            group_dims: UVec3::from_array(reflection.group_dims),
            launch_params_size: reflection.launch_params_size,
        })
    }
}

fn assemble_source(user_source: &str) -> String {
    let mut full = String::with_capacity(KERNEL_PROLOG.len() + user_source.len() + 1);
    full.push_str(KERNEL_PROLOG);
    full.push('\n');
    full.push_str(user_source);
    full
}

/// Splits `"NAME"` / `"NAME=VALUE"` define strings, enforcing the count
/// and length bounds.
fn parse_defines<'a>(
    defines: &'a [&'a str],
) -> Result<Vec<(&'a str, Option<&'a str>)>, String> {
    if defines.len() > GPU_KERNEL_MAX_NUM_DEFINES {
        return Err(format!(
            "{} defines exceeds the limit of {GPU_KERNEL_MAX_NUM_DEFINES}",
            defines.len()
        ));
    }
    let mut parsed = Vec::with_capacity(defines.len());
    for define in defines {
        if define.is_empty() {
            return Err("empty define".into());
        }
        if define.len() > GPU_KERNEL_DEFINE_MAX_LEN {
            return Err(format!(
                "define `{define}` exceeds {GPU_KERNEL_DEFINE_MAX_LEN} characters"
            ));
        }
        match define.split_once('=') {
            Some((name, value)) => {
                if name.is_empty() {
                    return Err(format!("define `{define}` has an empty name"));
                }
                parsed.push((name, Some(value)));
            }
            None => parsed.push((*define, None)),
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::testing::{small_cfg, try_init};

    #[test]
    fn prolog_declares_the_fixed_binding_model() {
        assert!(KERNEL_PROLOG.starts_with("#version 460"));
        assert!(KERNEL_PROLOG.contains("binding = 0"));
        assert!(KERNEL_PROLOG.contains("gpu_global_heap"));
        assert!(KERNEL_PROLOG.contains("binding = 1"));
        assert!(KERNEL_PROLOG.contains("gpu_rwtex_array"));
        assert!(KERNEL_PROLOG.contains("nonuniformEXT"));
        assert!(KERNEL_PROLOG.contains("GPU_NULL_RWTEX = 0"));
        assert!(KERNEL_PROLOG.contains("GPU_RWTEX_SWAPCHAIN = 1"));
    }

    #[test]
    fn user_source_follows_the_prolog() {
        let assembled = assemble_source("void main() {}");
        assert!(assembled.starts_with(KERNEL_PROLOG));
        assert!(assembled.ends_with("void main() {}"));
    }

    #[test]
    fn defines_parse_names_and_values() {
        let parsed = parse_defines(&["FOO", "BAR=1", "BAZ=vec2(1, 2)"]).unwrap();
        assert_eq!(parsed[0], ("FOO", None));
        assert_eq!(parsed[1], ("BAR", Some("1")));
        assert_eq!(parsed[2], ("BAZ", Some("vec2(1, 2)")));
    }

    #[test]
    fn define_bounds_are_enforced() {
        let too_many: Vec<&str> = (0..GPU_KERNEL_MAX_NUM_DEFINES + 1)
            .map(|_| "X")
            .collect();
        assert!(parse_defines(&too_many).is_err());

        let long = "L".repeat(GPU_KERNEL_DEFINE_MAX_LEN + 1);
        let defines = [long.as_str()];
        assert!(parse_defines(&defines).is_err());

        assert!(parse_defines(&[""]).is_err());
        assert!(parse_defines(&["=3"]).is_err());
    }

    #[test]
    fn kernel_rejections() {
        let Some(mut gpu) = try_init(&small_cfg()) else {
            return;
        };

        // Source that does not compile.
        assert!(gpu
            .kernel_init(&GpuKernelDesc {
                name: "broken",
                source: KernelSource::Source("this is not glsl"),
                defines: &[],
            })
            .is_err());

        // Launch-parameter block over the 48-byte limit.
        let oversized = r#"
            layout(local_size_x = 1) in;
            layout(push_constant) uniform Params { vec4 a; vec4 b; vec4 c; vec4 d; } params;
            void main() { ptr_store_f32(0u, params.d.w); }
        "#;
        assert!(matches!(
            gpu.kernel_init(&GpuKernelDesc {
                name: "oversized",
                source: KernelSource::Source(oversized),
                defines: &[],
            }),
            Err(GpuError::KernelReflection { .. })
        ));

        // A kernel-declared uniform buffer violates the binding model.
        let with_ubo = r#"
            layout(local_size_x = 1) in;
            layout(set = 0, binding = 2) uniform Extra { vec4 v; } extra;
            void main() { ptr_store_f32(64u, extra.v.x); }
        "#;
        assert!(gpu
            .kernel_init(&GpuKernelDesc {
                name: "with_ubo",
                source: KernelSource::Source(with_ubo),
                defines: &[],
            })
            .is_err());

        // Too many defines.
        let defines = ["A", "B", "C", "D", "E", "F", "G", "H", "I"];
        assert!(gpu
            .kernel_init(&GpuKernelDesc {
                name: "defines",
                source: KernelSource::Source("layout(local_size_x = 1) in; void main() {}"),
                defines: &defines,
            })
            .is_err());
    }

    #[test]
    fn defines_parameterize_kernels() {
        let Some(mut gpu) = try_init(&small_cfg()) else {
            return;
        };
        let source = r#"
            layout(local_size_x = 1) in;
            layout(push_constant) uniform Params { GpuPtr dst; } params;
            void main() { ptr_store_u32(params.dst, FILL_VALUE); }
        "#;
        let kernel = gpu
            .kernel_init(&GpuKernelDesc {
                name: "fill",
                source: KernelSource::Source(source),
                defines: &["FILL_VALUE=0xC0FFEEu"],
            })
            .unwrap();

        let ptr = gpu.malloc(64);
        gpu.queue_dispatch_with(kernel, UVec3::ONE, &ptr);
        let ticket = gpu.queue_memcpy_download(ptr, 4);
        gpu.submit();
        gpu.flush();

        let mut out = [0u8; 4];
        gpu.get_downloaded(ticket, &mut out).unwrap();
        assert_eq!(u32::from_le_bytes(out), 0xC0FFEE);

        gpu.kernel_destroy(kernel);
    }
}
