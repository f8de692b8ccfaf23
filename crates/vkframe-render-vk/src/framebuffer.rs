// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;

use crate::device::DeviceContext;
use crate::error::InitError;

/// One framebuffer per swapchain image view, indexed like the images.
pub struct Framebuffers {
    device: Arc<DeviceContext>,
    handles: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
}

impl std::fmt::Debug for Framebuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffers")
            .field("count", &self.handles.len())
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}

impl Framebuffers {
    pub fn build(
        device: &Arc<DeviceContext>,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self, InitError> {
        let mut out = Self {
            device: Arc::clone(device),
            handles: Vec::with_capacity(views.len()),
            extent,
        };
        for view in views {
            let info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: 1,
                p_attachments: view,
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            // SAFETY: view and render_pass are live objects of this device.
            let fb = unsafe { device.raw().create_framebuffer(&info, None) }
                .map_err(InitError::vulkan("vkCreateFramebuffer"))?;
            out.handles.push(fb);
        }
        Ok(out)
    }

    pub fn get(&self, image_index: usize) -> Option<vk::Framebuffer> {
        self.handles.get(image_index).copied()
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        tracing::debug!("dropping {} framebuffer(s)", self.handles.len());
        for fb in self.handles.drain(..) {
            // SAFETY: the device is idle before framebuffers are replaced.
            unsafe { self.device.raw().destroy_framebuffer(fb, None) };
        }
    }
}
