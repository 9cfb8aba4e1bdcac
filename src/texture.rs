//! RW texture management.
//!
//! Textures live in a slot array whose indices double as the shader-visible
//! bindless handles. Slot 0 is the null texture and slot 1 the virtual
//! swapchain RT; user textures occupy slots 2 and up. Destroying a texture
//! resets its descriptor slot to the null image; a swapchain resize
//! recreates every swapchain-relative texture *in place*, so kernels
//! holding the index keep working.

use ash::vk;
use glam::UVec2;

use crate::alloc::Allocator;
use crate::descriptor::BindlessTable;
use crate::device::Device;
use crate::error::{GpuError, GpuResult};
use crate::format::GpuFormat;
use crate::image::{Image, ImageView};

/// Highest accepted `relative_fixed_height`.
pub const RWTEX_MAX_FIXED_HEIGHT: u32 = 16384;
/// Highest accepted `relative_scale`.
pub const RWTEX_MAX_SCALE: f32 = 8.0;

/// A bindless RW-texture index, directly usable inside kernels.
///
/// The value is the slot in the texture array: `GpuRWTex::NULL` (0) is the
/// reserved null texture and [`GpuRWTex::SWAPCHAIN`] (1) the virtual
/// swapchain RT. Embed the raw value in launch parameters to hand a texture
/// to a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuRWTex(pub u16);

impl GpuRWTex {
    pub const NULL: GpuRWTex = GpuRWTex(0);
    pub const SWAPCHAIN: GpuRWTex = GpuRWTex(1);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn index(&self) -> u16 {
        self.0
    }
}

impl Default for GpuRWTex {
    fn default() -> Self {
        GpuRWTex::NULL
    }
}

/// Creation rule for an RW texture.
///
/// Fixed-resolution textures set `fixed_res`. Swapchain-relative textures
/// set `swapchain_relative` and exactly one of `relative_fixed_height`
/// (aspect-preserving height) or `relative_scale` (uniform scale); they are
/// rebuilt automatically whenever the swapchain resolution changes.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuRWTexDesc {
    pub name: String,
    pub format: GpuFormat,
    pub fixed_res: UVec2,
    pub swapchain_relative: bool,
    pub relative_fixed_height: u32,
    pub relative_scale: f32,
}

impl Default for GpuRWTexDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            format: GpuFormat::RGBA_U8_UNORM,
            fixed_res: UVec2::ZERO,
            swapchain_relative: false,
            relative_fixed_height: 0,
            relative_scale: 0.0,
        }
    }
}

/// Computes the target resolution for a texture descriptor given the
/// current swapchain resolution. Both axes are clamped to at least 1.
pub fn calc_rwtex_res(swapchain_res: UVec2, desc: &GpuRWTexDesc) -> UVec2 {
    let res = if !desc.swapchain_relative {
        desc.fixed_res
    } else if desc.relative_fixed_height != 0 {
        let aspect = swapchain_res.x as f32 / swapchain_res.y.max(1) as f32;
        let height = desc.relative_fixed_height;
        let width = (aspect * height as f32).round() as u32;
        UVec2::new(width, height)
    } else {
        UVec2::new(
            (desc.relative_scale * swapchain_res.x as f32).round() as u32,
            (desc.relative_scale * swapchain_res.y as f32).round() as u32,
        )
    };
    res.max(UVec2::ONE)
}

fn validate_desc(desc: &GpuRWTexDesc) -> GpuResult<()> {
    if desc.format == GpuFormat::Undefined {
        return Err(GpuError::TextureDesc("format must not be UNDEFINED".into()));
    }
    if desc.swapchain_relative {
        let has_height = desc.relative_fixed_height != 0;
        let has_scale = desc.relative_scale != 0.0;
        if has_height == has_scale {
            return Err(GpuError::TextureDesc(
                "swapchain-relative textures need exactly one of relative_fixed_height and relative_scale"
                    .into(),
            ));
        }
        if has_height && desc.relative_fixed_height > RWTEX_MAX_FIXED_HEIGHT {
            return Err(GpuError::TextureDesc(format!(
                "relative_fixed_height {} exceeds {RWTEX_MAX_FIXED_HEIGHT}",
                desc.relative_fixed_height
            )));
        }
        if has_scale && !(desc.relative_scale > 0.0 && desc.relative_scale <= RWTEX_MAX_SCALE) {
            return Err(GpuError::TextureDesc(format!(
                "relative_scale {} outside (0, {RWTEX_MAX_SCALE}]",
                desc.relative_scale
            )));
        }
    } else if desc.fixed_res.x == 0 || desc.fixed_res.y == 0 {
        return Err(GpuError::TextureDesc(
            "fixed-resolution textures need a non-zero fixed_res".into(),
        ));
    }
    Ok(())
}

pub(crate) struct RwTexture {
    image: Image,
    view: ImageView,
    res: UVec2,
    desc: GpuRWTexDesc,
}

/// The texture slot array. Indices are shader-visible; generations are not
/// used here because the shader ABI requires bare 16-bit indices.
pub(crate) struct RwTexturePool {
    device: Device,
    allocator: Allocator,
    slots: Vec<Option<RwTexture>>,
    free: Vec<u16>,
}

/// Number of reserved slots at the bottom of the table (null + swapchain).
const RESERVED_SLOTS: u16 = 2;

impl RwTexturePool {
    pub fn new(device: Device, allocator: Allocator, capacity: u32) -> Self {
        let capacity = capacity.clamp(1, 16384) as u16;
        let mut slots = Vec::with_capacity(capacity as usize);
        slots.resize_with(capacity as usize, || None);
        // Hand out high slots last so fresh indices are small.
        let free: Vec<u16> = (RESERVED_SLOTS..capacity).rev().collect();
        Self {
            device,
            allocator,
            slots,
            free,
        }
    }

    /// Creates a texture and publishes it in the bindless table.
    ///
    /// Returns the slot handle plus the raw image, which still needs its
    /// initial layout transition on the current command list.
    pub fn create(
        &mut self,
        desc: GpuRWTexDesc,
        swapchain_res: Option<UVec2>,
        table: &BindlessTable,
    ) -> GpuResult<(GpuRWTex, vk::Image)> {
        validate_desc(&desc)?;
        if desc.swapchain_relative && swapchain_res.is_none() {
            return Err(GpuError::NoSwapchain);
        }
        let slot = self
            .free
            .pop()
            .ok_or(GpuError::PoolExhausted("rw texture"))?;

        let res = calc_rwtex_res(swapchain_res.unwrap_or(UVec2::ONE), &desc);
        match self.build_texture(&desc, res) {
            Ok(texture) => {
                table.write_slot(slot, &texture.view);
                let image = texture.image.vk_handle();
                tracing::info!(
                    name = %desc.name,
                    slot,
                    width = res.x,
                    height = res.y,
                    format = %desc.format,
                    "created rw texture"
                );
                self.slots[slot as usize] = Some(texture);
                Ok((GpuRWTex(slot), image))
            }
            Err(err) => {
                self.free.push(slot);
                Err(err)
            }
        }
    }

    /// Destroys a texture and resets its slot to the null image. The
    /// returned payload must outlive any command list referencing it; the
    /// façade parks it in the submit ring's graveyard.
    pub fn destroy(&mut self, tex: GpuRWTex, table: &BindlessTable) -> GpuResult<RwTexture> {
        if tex.index() < RESERVED_SLOTS {
            return Err(GpuError::InvalidHandle);
        }
        let slot = self
            .slots
            .get_mut(tex.index() as usize)
            .ok_or(GpuError::InvalidHandle)?;
        let texture = slot.take().ok_or(GpuError::InvalidHandle)?;
        table.write_null(tex.index());
        self.free.push(tex.index());
        tracing::info!(name = %texture.desc.name, slot = tex.index(), "destroyed rw texture");
        Ok(texture)
    }

    /// The backing image of a live user texture, for barrier recording.
    pub fn image_handle(&self, tex: GpuRWTex) -> GpuResult<vk::Image> {
        self.texture(tex).map(|t| t.image.vk_handle())
    }

    pub fn get_desc(&self, tex: GpuRWTex) -> GpuResult<GpuRWTexDesc> {
        self.texture(tex).map(|t| t.desc.clone())
    }

    pub fn get_res(&self, tex: GpuRWTex) -> GpuResult<UVec2> {
        self.texture(tex).map(|t| t.res)
    }

    /// Replaces the texture's relative scale and rebuilds it in place.
    /// A no-op when the scale is already set.
    pub fn set_relative_scale(
        &mut self,
        tex: GpuRWTex,
        scale: f32,
        swapchain_res: UVec2,
        table: &BindlessTable,
    ) -> GpuResult<Option<vk::Image>> {
        let current = self.texture(tex)?;
        if !current.desc.swapchain_relative {
            return Err(GpuError::TextureDesc(
                "texture is not swapchain-relative".into(),
            ));
        }
        if current.desc.relative_scale == scale && current.desc.relative_fixed_height == 0 {
            return Ok(None);
        }
        let mut desc = current.desc.clone();
        desc.relative_scale = scale;
        desc.relative_fixed_height = 0;
        validate_desc(&desc)?;
        self.rebuild_slot(tex.index(), desc, swapchain_res, table)
            .map(Some)
    }

    /// Replaces the texture's fixed relative height and rebuilds it in
    /// place. A no-op when the height is already set.
    pub fn set_relative_fixed_height(
        &mut self,
        tex: GpuRWTex,
        height: u32,
        swapchain_res: UVec2,
        table: &BindlessTable,
    ) -> GpuResult<Option<vk::Image>> {
        let current = self.texture(tex)?;
        if !current.desc.swapchain_relative {
            return Err(GpuError::TextureDesc(
                "texture is not swapchain-relative".into(),
            ));
        }
        if current.desc.relative_fixed_height == height && current.desc.relative_scale == 0.0 {
            return Ok(None);
        }
        let mut desc = current.desc.clone();
        desc.relative_fixed_height = height;
        desc.relative_scale = 0.0;
        validate_desc(&desc)?;
        self.rebuild_slot(tex.index(), desc, swapchain_res, table)
            .map(Some)
    }

    /// Rebuilds every swapchain-relative texture for a new swapchain
    /// resolution. Returns the fresh images needing layout transitions.
    pub fn rebuild_swapchain_relative(
        &mut self,
        swapchain_res: UVec2,
        table: &BindlessTable,
    ) -> Vec<vk::Image> {
        let relative_slots: Vec<u16> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, texture)| {
                let texture = texture.as_ref()?;
                texture.desc.swapchain_relative.then_some(slot as u16)
            })
            .collect();
        let mut fresh = Vec::with_capacity(relative_slots.len());
        for slot in relative_slots {
            let desc = self.slots[slot as usize].as_ref().unwrap().desc.clone();
            match self.rebuild_slot(slot, desc, swapchain_res, table) {
                Ok(image) => fresh.push(image),
                Err(err) => {
                    tracing::error!(slot, ?err, "failed to rebuild swapchain-relative texture")
                }
            }
        }
        fresh
    }

    fn rebuild_slot(
        &mut self,
        slot: u16,
        desc: GpuRWTexDesc,
        swapchain_res: UVec2,
        table: &BindlessTable,
    ) -> GpuResult<vk::Image> {
        let res = calc_rwtex_res(swapchain_res, &desc);
        let texture = self.build_texture(&desc, res)?;
        table.write_slot(slot, &texture.view);
        let image = texture.image.vk_handle();
        tracing::info!(
            name = %desc.name,
            slot,
            width = res.x,
            height = res.y,
            "rebuilt rw texture in place"
        );
        // The old image drops here; callers flushed the GPU beforehand.
        self.slots[slot as usize] = Some(texture);
        Ok(image)
    }

    fn build_texture(&self, desc: &GpuRWTexDesc, res: UVec2) -> GpuResult<RwTexture> {
        let image = Image::new_private(
            self.allocator.clone(),
            res,
            desc.format.to_vk(),
            vk::ImageUsageFlags::STORAGE,
        )?;
        let view = image.create_view(&self.device)?;
        Ok(RwTexture {
            image,
            view,
            res,
            desc: desc.clone(),
        })
    }

    fn texture(&self, tex: GpuRWTex) -> GpuResult<&RwTexture> {
        self.slots
            .get(tex.index() as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(GpuError::InvalidHandle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relative_scale(scale: f32) -> GpuRWTexDesc {
        GpuRWTexDesc {
            swapchain_relative: true,
            relative_scale: scale,
            ..Default::default()
        }
    }

    fn relative_height(height: u32) -> GpuRWTexDesc {
        GpuRWTexDesc {
            swapchain_relative: true,
            relative_fixed_height: height,
            ..Default::default()
        }
    }

    #[test]
    fn fixed_resolution_passes_through() {
        let desc = GpuRWTexDesc {
            fixed_res: UVec2::new(512, 256),
            ..Default::default()
        };
        assert_eq!(
            calc_rwtex_res(UVec2::new(1920, 1080), &desc),
            UVec2::new(512, 256)
        );
    }

    #[test]
    fn scale_mode_rounds_both_axes() {
        let desc = relative_scale(0.5);
        assert_eq!(
            calc_rwtex_res(UVec2::new(1280, 720), &desc),
            UVec2::new(640, 360)
        );
        assert_eq!(
            calc_rwtex_res(UVec2::new(1920, 1080), &desc),
            UVec2::new(960, 540)
        );
        // 0.33 * 1280 = 422.4 -> 422, 0.33 * 720 = 237.6 -> 238
        let desc = relative_scale(0.33);
        assert_eq!(
            calc_rwtex_res(UVec2::new(1280, 720), &desc),
            UVec2::new(422, 238)
        );
    }

    #[test]
    fn fixed_height_preserves_aspect_ratio() {
        let desc = relative_height(360);
        assert_eq!(
            calc_rwtex_res(UVec2::new(1280, 720), &desc),
            UVec2::new(640, 360)
        );
        assert_eq!(
            calc_rwtex_res(UVec2::new(2560, 1080), &desc),
            UVec2::new(853, 360)
        );
    }

    #[test]
    fn resolution_is_clamped_to_one() {
        let desc = relative_scale(0.001);
        assert_eq!(calc_rwtex_res(UVec2::new(64, 64), &desc), UVec2::ONE);
    }

    #[test]
    fn descriptor_validation() {
        assert!(validate_desc(&relative_scale(0.5)).is_ok());
        assert!(validate_desc(&relative_height(720)).is_ok());
        // Neither rule set.
        assert!(validate_desc(&GpuRWTexDesc {
            swapchain_relative: true,
            ..Default::default()
        })
        .is_err());
        // Both rules set.
        assert!(validate_desc(&GpuRWTexDesc {
            swapchain_relative: true,
            relative_fixed_height: 360,
            relative_scale: 0.5,
            ..Default::default()
        })
        .is_err());
        // Out-of-range bounds.
        assert!(validate_desc(&relative_scale(9.0)).is_err());
        assert!(validate_desc(&relative_height(RWTEX_MAX_FIXED_HEIGHT + 1)).is_err());
        // Fixed-resolution textures need a resolution.
        assert!(validate_desc(&GpuRWTexDesc::default()).is_err());
        assert!(validate_desc(&GpuRWTexDesc {
            fixed_res: UVec2::new(16, 16),
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn reserved_slot_constants() {
        assert_eq!(GpuRWTex::NULL.index(), 0);
        assert_eq!(GpuRWTex::SWAPCHAIN.index(), 1);
        assert!(GpuRWTex::NULL.is_null());
        assert!(!GpuRWTex::SWAPCHAIN.is_null());
    }
}
