//! Vulkan instance bring-up.
//!
//! The runtime needs a fixed instance configuration: the validation layer
//! and debug messenger when debug mode is requested, GPU-assisted shader
//! validation when asked for, and the platform surface extensions when a
//! window handle was supplied.

use std::ffi::{c_void, CStr};
use std::sync::Arc;

use ash::{ext, khr, vk};
use raw_window_handle::RawDisplayHandle;

use crate::error::{GpuError, GpuResult};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// A reference-counted Vulkan instance.
///
/// Dereferences to [`ash::Instance`]; destroyed when the last clone drops.
#[derive(Clone)]
pub struct Instance(Arc<InstanceInner>);

struct InstanceInner {
    // Field order: the messenger and instance must drop before `entry`.
    debug_messenger: vk::DebugUtilsMessengerEXT,
    debug_utils: Option<ext::debug_utils::Instance>,
    instance: ash::Instance,
    entry: ash::Entry,
}

impl Instance {
    /// Loads the Vulkan library and creates an instance.
    ///
    /// `display` selects which platform surface extension to enable; pass
    /// `None` for headless operation.
    pub fn new(
        display: Option<RawDisplayHandle>,
        debug_mode: bool,
        debug_shader_validation: bool,
    ) -> GpuResult<Self> {
        let entry = unsafe { ash::Entry::load()? };

        let mut extensions: Vec<*const std::ffi::c_char> = Vec::new();
        if let Some(display) = display {
            extensions.push(khr::surface::NAME.as_ptr());
            extensions.push(surface_extension_for(display)?.as_ptr());
        }
        if debug_mode {
            extensions.push(ext::debug_utils::NAME.as_ptr());
        }

        let mut layers: Vec<*const std::ffi::c_char> = Vec::new();
        if debug_mode {
            if validation_layer_available(&entry) {
                layers.push(VALIDATION_LAYER.as_ptr());
            } else {
                tracing::warn!("debug mode requested but the validation layer is not installed");
            }
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"scoria")
            .engine_name(c"scoria")
            .api_version(vk::API_VERSION_1_3);

        let enabled_validation = [
            vk::ValidationFeatureEnableEXT::GPU_ASSISTED,
            vk::ValidationFeatureEnableEXT::GPU_ASSISTED_RESERVE_BINDING_SLOT,
        ];
        let mut validation_features =
            vk::ValidationFeaturesEXT::default().enabled_validation_features(&enabled_validation);

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        if debug_shader_validation && !layers.is_empty() {
            create_info = create_info.push_next(&mut validation_features);
        }

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        tracing::info!(debug_mode, "created Vulkan instance");

        let mut debug_utils = None;
        let mut debug_messenger = vk::DebugUtilsMessengerEXT::null();
        if debug_mode {
            let loader = ext::debug_utils::Instance::new(&entry, &instance);
            debug_messenger = unsafe {
                loader.create_debug_utils_messenger(
                    &vk::DebugUtilsMessengerCreateInfoEXT::default()
                        .message_severity(
                            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                        )
                        .message_type(
                            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                                | vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                        )
                        .pfn_user_callback(Some(debug_callback)),
                    None,
                )?
            };
            debug_utils = Some(loader);
        }

        Ok(Self(Arc::new(InstanceInner {
            debug_messenger,
            debug_utils,
            instance,
            entry,
        })))
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.0.entry
    }
}

impl std::ops::Deref for Instance {
    type Target = ash::Instance;

    fn deref(&self) -> &Self::Target {
        &self.0.instance
    }
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        tracing::info!("drop instance");
        unsafe {
            if let Some(loader) = &self.debug_utils {
                loader.destroy_debug_utils_messenger(self.debug_messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn validation_layer_available(entry: &ash::Entry) -> bool {
    let layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };
    layers.iter().any(|layer| {
        layer
            .layer_name_as_c_str()
            .map(|name| name == VALIDATION_LAYER)
            .unwrap_or(false)
    })
}

fn surface_extension_for(display: RawDisplayHandle) -> GpuResult<&'static CStr> {
    match display {
        RawDisplayHandle::Windows(_) => Ok(khr::win32_surface::NAME),
        RawDisplayHandle::Wayland(_) => Ok(khr::wayland_surface::NAME),
        RawDisplayHandle::Xlib(_) => Ok(khr::xlib_surface::NAME),
        RawDisplayHandle::Xcb(_) => Ok(khr::xcb_surface::NAME),
        RawDisplayHandle::Android(_) => Ok(khr::android_surface::NAME),
        _ => Err(GpuError::Config(
            "unsupported window system for swapchain creation".into(),
        )),
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let message = unsafe {
        let p_message = (*data).p_message;
        if p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(p_message).to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "scoria::vulkan", "{message}");
    } else {
        tracing::warn!(target: "scoria::vulkan", "{message}");
    }
    vk::FALSE
}
