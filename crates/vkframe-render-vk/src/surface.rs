// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::InitError;
use crate::instance::InstanceContext;

/// What a surface supports on one adapter.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Presentable surface. Keeps its instance alive until it is destroyed.
pub struct Surface {
    instance: Arc<InstanceContext>,
    handle: vk::SurfaceKHR,
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Surface {
    pub fn new(
        instance: &Arc<InstanceContext>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Arc<Self>, InitError> {
        // SAFETY: handles come from a live window; the instance was created
        // with the WSI extensions ash_window reported for this display.
        let handle = unsafe {
            ash_window::create_surface(instance.entry(), instance.raw(), display, window, None)
        }
        .map_err(InitError::vulkan("ash_window::create_surface"))?;

        Ok(Arc::new(Self {
            instance: Arc::clone(instance),
            handle,
        }))
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn instance(&self) -> &Arc<InstanceContext> {
        &self.instance
    }

    pub fn supports_present(
        &self,
        phys: vk::PhysicalDevice,
        family: u32,
    ) -> Result<bool, vk::Result> {
        // SAFETY: phys was enumerated from the instance owning this surface.
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_support(phys, family, self.handle)
        }
    }

    /// Capabilities, formats and present modes for `phys`. Capabilities are
    /// re-queried on every swapchain build since the current extent moves
    /// with the window.
    pub fn support(&self, phys: vk::PhysicalDevice) -> Result<SurfaceSupport, vk::Result> {
        let loader = self.instance.surface_loader();
        // SAFETY: phys was enumerated from the instance owning this surface.
        unsafe {
            Ok(SurfaceSupport {
                capabilities: loader
                    .get_physical_device_surface_capabilities(phys, self.handle)?,
                formats: loader.get_physical_device_surface_formats(phys, self.handle)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(phys, self.handle)?,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        tracing::debug!("dropping surface {:?}", self.handle);
        // SAFETY: every swapchain built on this surface holds an Arc to it,
        // so none remain.
        unsafe {
            self.instance
                .surface_loader()
                .destroy_surface(self.handle, None)
        };
    }
}

