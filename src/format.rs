//! RW-texture pixel formats.
//!
//! The runtime exposes a small, fixed selection of 2-D texture formats.
//! Kernels access every texture through the format-agnostic bindless array,
//! so the format only matters for storage size and host-side interpretation.

use ash::vk;

/// Pixel formats accepted for RW textures.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuFormat {
    #[default]
    Undefined,

    R_U8_UNORM,
    RG_U8_UNORM,
    RGBA_U8_UNORM,

    R_U8,
    RG_U8,
    RGBA_U8,

    R_U16,
    RG_U16,
    RGBA_U16,

    R_I32,
    RG_I32,
    RGBA_I32,

    R_F16,
    RG_F16,
    RGBA_F16,

    R_F32,
    RG_F32,
    RGBA_F32,
}

impl GpuFormat {
    /// Maps the abstract format onto the backing API format.
    pub fn to_vk(self) -> vk::Format {
        match self {
            GpuFormat::Undefined => vk::Format::UNDEFINED,

            GpuFormat::R_U8_UNORM => vk::Format::R8_UNORM,
            GpuFormat::RG_U8_UNORM => vk::Format::R8G8_UNORM,
            GpuFormat::RGBA_U8_UNORM => vk::Format::R8G8B8A8_UNORM,

            GpuFormat::R_U8 => vk::Format::R8_UINT,
            GpuFormat::RG_U8 => vk::Format::R8G8_UINT,
            GpuFormat::RGBA_U8 => vk::Format::R8G8B8A8_UINT,

            GpuFormat::R_U16 => vk::Format::R16_UINT,
            GpuFormat::RG_U16 => vk::Format::R16G16_UINT,
            GpuFormat::RGBA_U16 => vk::Format::R16G16B16A16_UINT,

            GpuFormat::R_I32 => vk::Format::R32_SINT,
            GpuFormat::RG_I32 => vk::Format::R32G32_SINT,
            GpuFormat::RGBA_I32 => vk::Format::R32G32B32A32_SINT,

            GpuFormat::R_F16 => vk::Format::R16_SFLOAT,
            GpuFormat::RG_F16 => vk::Format::R16G16_SFLOAT,
            GpuFormat::RGBA_F16 => vk::Format::R16G16B16A16_SFLOAT,

            GpuFormat::R_F32 => vk::Format::R32_SFLOAT,
            GpuFormat::RG_F32 => vk::Format::R32G32_SFLOAT,
            GpuFormat::RGBA_F32 => vk::Format::R32G32B32A32_SFLOAT,
        }
    }

    /// Bytes per texel.
    pub fn texel_size(self) -> u32 {
        match self {
            GpuFormat::Undefined => 0,
            GpuFormat::R_U8_UNORM | GpuFormat::R_U8 => 1,
            GpuFormat::RG_U8_UNORM | GpuFormat::RG_U8 | GpuFormat::R_U16 | GpuFormat::R_F16 => 2,
            GpuFormat::RGBA_U8_UNORM
            | GpuFormat::RGBA_U8
            | GpuFormat::RG_U16
            | GpuFormat::RG_F16
            | GpuFormat::R_I32
            | GpuFormat::R_F32 => 4,
            GpuFormat::RGBA_U16 | GpuFormat::RGBA_F16 | GpuFormat::RG_I32 | GpuFormat::RG_F32 => 8,
            GpuFormat::RGBA_I32 | GpuFormat::RGBA_F32 => 16,
        }
    }
}

impl std::fmt::Display for GpuFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GpuFormat::Undefined => "UNDEFINED",
            GpuFormat::R_U8_UNORM => "R_U8_UNORM",
            GpuFormat::RG_U8_UNORM => "RG_U8_UNORM",
            GpuFormat::RGBA_U8_UNORM => "RGBA_U8_UNORM",
            GpuFormat::R_U8 => "R_U8",
            GpuFormat::RG_U8 => "RG_U8",
            GpuFormat::RGBA_U8 => "RGBA_U8",
            GpuFormat::R_U16 => "R_U16",
            GpuFormat::RG_U16 => "RG_U16",
            GpuFormat::RGBA_U16 => "RGBA_U16",
            GpuFormat::R_I32 => "R_I32",
            GpuFormat::RG_I32 => "RG_I32",
            GpuFormat::RGBA_I32 => "RGBA_I32",
            GpuFormat::R_F16 => "R_F16",
            GpuFormat::RG_F16 => "RG_F16",
            GpuFormat::RGBA_F16 => "RGBA_F16",
            GpuFormat::R_F32 => "R_F32",
            GpuFormat::RG_F32 => "RG_F32",
            GpuFormat::RGBA_F32 => "RGBA_F32",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_mapping_is_total_for_defined_formats() {
        let all = [
            GpuFormat::R_U8_UNORM,
            GpuFormat::RG_U8_UNORM,
            GpuFormat::RGBA_U8_UNORM,
            GpuFormat::R_U8,
            GpuFormat::RG_U8,
            GpuFormat::RGBA_U8,
            GpuFormat::R_U16,
            GpuFormat::RG_U16,
            GpuFormat::RGBA_U16,
            GpuFormat::R_I32,
            GpuFormat::RG_I32,
            GpuFormat::RGBA_I32,
            GpuFormat::R_F16,
            GpuFormat::RG_F16,
            GpuFormat::RGBA_F16,
            GpuFormat::R_F32,
            GpuFormat::RG_F32,
            GpuFormat::RGBA_F32,
        ];
        for fmt in all {
            assert_ne!(fmt.to_vk(), vk::Format::UNDEFINED, "{fmt}");
            assert!(fmt.texel_size() > 0, "{fmt}");
        }
        assert_eq!(GpuFormat::Undefined.to_vk(), vk::Format::UNDEFINED);
    }

    #[test]
    fn texel_sizes() {
        assert_eq!(GpuFormat::R_U8_UNORM.texel_size(), 1);
        assert_eq!(GpuFormat::RGBA_U8_UNORM.texel_size(), 4);
        assert_eq!(GpuFormat::RGBA_F16.texel_size(), 8);
        assert_eq!(GpuFormat::RGBA_F32.texel_size(), 16);
    }
}
