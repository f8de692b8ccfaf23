// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;

use crate::config::{PresentPolicy, VkConfig};
use crate::device::{DeviceContext, PresentStatus};
use crate::error::{InitError, RenderError, RenderResult};
use crate::frame::{AcquireOutcome, FrameBackend, SwapchainRebuild};
use crate::framebuffer::Framebuffers;
use crate::pipeline::FramePipeline;
use crate::probe::AdapterDescriptor;
use crate::ring::SyncRing;
use crate::shader::ShaderBlobs;
use crate::surface::Surface;
use crate::swapchain::SurfaceResourceSet;
use crate::sync::WaitFenceError;

/// Vulkan side of the frame loop: owns every per-surface and per-frame
/// object and implements [`FrameBackend`] over them.
///
/// Field order is drop order: ring, framebuffers, pipeline, swapchain, then
/// the shared surface and device handles.
pub struct Presenter {
    ring: SyncRing,
    framebuffers: Option<Framebuffers>,
    pipeline: FramePipeline,
    surface_set: SurfaceResourceSet,
    shaders: ShaderBlobs,
    adapter: AdapterDescriptor,
    window_extent: vk::Extent2D,
    policy: PresentPolicy,
    clear_color: [f32; 4],
    fence_timeout_ns: u64,
    surface: Arc<Surface>,
    device: Arc<DeviceContext>,
}

impl std::fmt::Debug for Presenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Presenter")
            .field("surface_set", &self.surface_set)
            .field("pipeline", &self.pipeline)
            .field("ring", &self.ring)
            .field("window_extent", &self.window_extent)
            .finish_non_exhaustive()
    }
}

impl Presenter {
    pub fn new(
        device: &Arc<DeviceContext>,
        surface: &Arc<Surface>,
        adapter: AdapterDescriptor,
        config: &VkConfig,
        window_extent: vk::Extent2D,
    ) -> Result<Self, InitError> {
        let surface_set = SurfaceResourceSet::build(
            device,
            surface,
            &adapter,
            window_extent,
            config.present_policy,
            None,
        )?;
        let pipeline = FramePipeline::build(device, surface_set.format(), &config.shaders)?;
        let framebuffers = Framebuffers::build(
            device,
            pipeline.render_pass(),
            surface_set.views(),
            surface_set.extent(),
        )?;
        let ring = SyncRing::new(device, config.frames_in_flight)?;

        Ok(Self {
            ring,
            framebuffers: Some(framebuffers),
            pipeline,
            surface_set,
            shaders: config.shaders.clone(),
            adapter,
            window_extent,
            policy: config.present_policy,
            clear_color: config.clear_color,
            fence_timeout_ns: config.fence_timeout_ns(),
            surface: Arc::clone(surface),
            device: Arc::clone(device),
        })
    }

    pub fn set_window_extent(&mut self, extent: vk::Extent2D) {
        self.window_extent = extent;
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn surface_set(&self) -> &SurfaceResourceSet {
        &self.surface_set
    }

    fn framebuffer(&self, image: u32) -> RenderResult<vk::Framebuffer> {
        self.framebuffers
            .as_ref()
            .and_then(|f| f.get(image as usize))
            .ok_or(RenderError::SurfaceOutOfDate)
    }
}

impl FrameBackend for Presenter {
    fn image_count(&self) -> usize {
        self.surface_set.image_count()
    }

    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
        let timeout_ns = self.fence_timeout_ns;
        self.ring
            .slot(slot)
            .in_flight
            .wait(timeout_ns)
            .map_err(|e| match e {
                WaitFenceError::Timeout => {
                    tracing::error!("slot {slot} fence still unsignaled after {timeout_ns} ns");
                    RenderError::FenceTimeout { slot, timeout_ns }
                }
                WaitFenceError::Vulkan(r) => RenderError::from_vk("vkWaitForFences", r),
            })
    }

    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
        let signal = self.ring.slot(slot).image_available.raw();
        match self.surface_set.acquire(u64::MAX, signal) {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RenderError::from_vk("vkAcquireNextImageKHR", e)),
        }
    }

    fn record(&mut self, slot: usize, image: u32) -> RenderResult<()> {
        let framebuffer = self.framebuffer(image)?;
        let cmd = self.ring.slot(slot).command_buffer;
        let extent = self.surface_set.extent();
        let d = self.device.raw();

        let clear = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        };
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.pipeline.render_pass(),
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: 1,
            p_clear_values: &clear,
            ..Default::default()
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        // SAFETY: the driver waited on this slot's fence, so cmd is not
        // pending; every handle belongs to this device.
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(RenderError::vulkan("vkResetCommandBuffer"))?;
            d.begin_command_buffer(cmd, &begin)
                .map_err(RenderError::vulkan("vkBeginCommandBuffer"))?;
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.raw());
            d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
            d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));
            d.cmd_draw(cmd, 3, 1, 0, 0);
            d.cmd_end_render_pass(cmd);
            d.end_command_buffer(cmd)
                .map_err(RenderError::vulkan("vkEndCommandBuffer"))?;
        }
        Ok(())
    }

    fn reset_slot_fence(&mut self, slot: usize) -> RenderResult<()> {
        // SAFETY: waited on in this tick and not resubmitted since.
        unsafe { self.ring.slot(slot).in_flight.reset() }
            .map_err(RenderError::vulkan("vkResetFences"))
    }

    fn submit(&mut self, slot: usize) -> RenderResult<()> {
        let s = self.ring.slot(slot);
        self.device.submit(
            s.command_buffer,
            s.image_available.raw(),
            s.render_finished.raw(),
            s.in_flight.raw(),
        )
    }

    fn present(&mut self, slot: usize, image: u32) -> RenderResult<PresentStatus> {
        let wait = self.ring.slot(slot).render_finished.raw();
        self.device.present(self.surface_set.raw(), image, wait)
    }

    // STRICT ORDER:
    // 1) idle, 2) plan from fresh caps (zero area defers),
    // 3) drop framebuffers, 4) new swapchain with the old one as hint, then
    //    drop the old
    fn rebuild_swapchain(&mut self) -> RenderResult<SwapchainRebuild> {
        self.device.wait_idle()?;

        let plan = SurfaceResourceSet::plan_for(
            &self.surface,
            &self.adapter,
            self.window_extent,
            self.policy,
        )?;
        if !plan.is_presentable() {
            tracing::debug!("surface has zero area, deferring rebuild");
            return Ok(SwapchainRebuild::Deferred);
        }

        self.framebuffers = None;
        let fresh = SurfaceResourceSet::realize(
            &self.device,
            &self.surface,
            self.adapter.queues,
            plan,
            Some(&self.surface_set),
        )?;
        drop(std::mem::replace(&mut self.surface_set, fresh));

        Ok(SwapchainRebuild::Rebuilt {
            pipeline_format: self.pipeline.format(),
            swapchain_format: self.surface_set.format(),
        })
    }

    fn rebuild_pipeline(&mut self) -> RenderResult<()> {
        self.framebuffers = None;
        self.pipeline = FramePipeline::build(&self.device, self.surface_set.format(), &self.shaders)?;
        Ok(())
    }

    fn rebuild_framebuffers(&mut self) -> RenderResult<()> {
        self.framebuffers = None;
        self.framebuffers = Some(Framebuffers::build(
            &self.device,
            self.pipeline.render_pass(),
            self.surface_set.views(),
            self.surface_set.extent(),
        )?);
        Ok(())
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::warn!("wait_idle before presenter teardown: {e}");
        }
    }
}
