// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use ash::ext::debug_utils;
use ash::khr::surface;
use ash::vk;
use raw_window_handle::RawDisplayHandle;

use crate::debug;
use crate::error::InitError;
use crate::probe::missing_names;

struct Diagnostics {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Loader entry + instance + optional diagnostic messenger.
///
/// Shared through `Arc` by everything created from the instance, so it is
/// destroyed only after the surface and the device are gone.
pub struct InstanceContext {
    entry: ash::Entry,
    instance: ash::Instance,
    surface_loader: surface::Instance,
    diagnostics: Option<Diagnostics>,
}

impl std::fmt::Debug for InstanceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceContext")
            .field("handle", &self.instance.handle())
            .field("diagnostics", &self.diagnostics.is_some())
            .finish_non_exhaustive()
    }
}

impl InstanceContext {
    // STRICT ORDER:
    // 1) Load the loader, verify requested layers exist
    // 2) Create VkInstance with WSI extensions (+ debug utils when validating),
    //    messenger info chained so instance creation is itself reported
    // 3) Create the persistent messenger
    pub fn new(
        app_name: &str,
        display: RawDisplayHandle,
        validation_layers: &[CString],
    ) -> Result<Arc<Self>, InitError> {
        // SAFETY: loading the system Vulkan library; no Vulkan calls are in
        // flight yet.
        let entry = unsafe { ash::Entry::load() }.map_err(|e| InitError::Loader(e.to_string()))?;

        let validate = !validation_layers.is_empty();
        if validate {
            // SAFETY: entry is a valid loaded entry point table.
            let available = unsafe { entry.enumerate_instance_layer_properties() }
                .map_err(InitError::vulkan("vkEnumerateInstanceLayerProperties"))?;
            let names: Vec<&CStr> = available
                .iter()
                .filter_map(|l| l.layer_name_as_c_str().ok())
                .collect();
            let missing = missing_names(&names, validation_layers);
            if !missing.is_empty() {
                return Err(InitError::LayerMissing(missing));
            }
        }

        let app = CString::new(app_name)
            .map_err(|_| InitError::Config(format!("app name {app_name:?} contains NUL")))?;
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app.as_ptr(),
            application_version: vk::make_api_version(0, 1, 0, 0),
            p_engine_name: c"vkframe".as_ptr(),
            engine_version: vk::make_api_version(0, 1, 0, 0),
            api_version: vk::API_VERSION_1_1,
            ..Default::default()
        };

        let wsi = ash_window::enumerate_required_extensions(display)
            .map_err(InitError::vulkan("enumerate_required_extensions"))?;
        let mut extensions: Vec<*const c_char> = wsi.to_vec();
        if validate {
            extensions.push(debug_utils::NAME.as_ptr());
        }
        let layer_ptrs: Vec<*const c_char> =
            validation_layers.iter().map(|l| l.as_ptr()).collect();

        let chained = debug::messenger_create_info();
        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_next: if validate {
                (&chained as *const vk::DebugUtilsMessengerCreateInfoEXT<'_>)
                    .cast::<std::ffi::c_void>()
            } else {
                std::ptr::null()
            },
            p_application_info: &app_info,
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            enabled_layer_count: layer_ptrs.len() as u32,
            pp_enabled_layer_names: layer_ptrs.as_ptr(),
            ..Default::default()
        };

        // SAFETY: every pointer in create_info references locals that outlive
        // this call.
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(InitError::vulkan("vkCreateInstance"))?;
        let surface_loader = surface::Instance::new(&entry, &instance);

        let mut ctx = Self {
            entry,
            instance,
            surface_loader,
            diagnostics: None,
        };

        if validate {
            let loader = debug_utils::Instance::new(&ctx.entry, &ctx.instance);
            // SAFETY: instance was created with VK_EXT_debug_utils enabled.
            let messenger =
                unsafe { loader.create_debug_utils_messenger(&debug::messenger_create_info(), None) }
                    .map_err(InitError::vulkan("vkCreateDebugUtilsMessengerEXT"))?;
            ctx.diagnostics = Some(Diagnostics { loader, messenger });
            tracing::info!("validation enabled: {:?}", validation_layers);
        }

        Ok(Arc::new(ctx))
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface_loader
    }

    pub fn validation_enabled(&self) -> bool {
        self.diagnostics.is_some()
    }

    pub fn adapters(&self) -> Result<Vec<vk::PhysicalDevice>, InitError> {
        // SAFETY: instance is alive for &self.
        unsafe { self.instance.enumerate_physical_devices() }
            .map_err(InitError::vulkan("vkEnumeratePhysicalDevices"))
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        tracing::debug!("dropping instance {:?}", self.instance.handle());
        if let Some(d) = self.diagnostics.take() {
            // SAFETY: messenger belongs to this instance and nothing reports
            // through it after this point.
            unsafe { d.loader.destroy_debug_utils_messenger(d.messenger, None) };
        }
        // SAFETY: last owner; surface and device hold Arcs and are gone.
        unsafe { self.instance.destroy_instance(None) };
    }
}
