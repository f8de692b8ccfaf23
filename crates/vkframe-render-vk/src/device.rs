// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CString};
use std::sync::Arc;

use ash::khr::swapchain;
use ash::vk;

use crate::error::{InitError, RenderError, RenderResult};
use crate::instance::InstanceContext;
use crate::probe::AdapterDescriptor;

/// Outcome of a present call that did not fail outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl PresentStatus {
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, PresentStatus::Optimal)
    }

    pub(crate) fn from_result(result: Result<bool, vk::Result>) -> RenderResult<Self> {
        match result {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(RenderError::from_vk("vkQueuePresentKHR", e)),
        }
    }
}

/// Logical device, its queues and the command pool every frame slot
/// allocates from. Created once per process.
pub struct DeviceContext {
    device: ash::Device,
    swapchain_loader: swapchain::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    graphics_family: u32,
    present_family: u32,
    command_pool: vk::CommandPool,
    instance: Arc<InstanceContext>,
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("handle", &self.device.handle())
            .field("graphics_family", &self.graphics_family)
            .field("present_family", &self.present_family)
            .finish_non_exhaustive()
    }
}

impl DeviceContext {
    pub fn create(
        instance: &Arc<InstanceContext>,
        adapter: &AdapterDescriptor,
        required_extensions: &[CString],
        required_layers: &[CString],
    ) -> Result<Arc<Self>, InitError> {
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = adapter
            .queues
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let ext_ptrs: Vec<*const c_char> =
            required_extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = required_layers.iter().map(|l| l.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            enabled_layer_count: layer_ptrs.len() as u32,
            pp_enabled_layer_names: layer_ptrs.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        // SAFETY: adapter.phys was enumerated from this instance; every
        // pointer in dinfo references locals alive for the call.
        let device = unsafe { instance.raw().create_device(adapter.phys, &dinfo, None) }
            .map_err(InitError::DeviceCreationFailed)?;

        let graphics_family = adapter.queues.graphics;
        let present_family = adapter.queues.present;
        // SAFETY: one queue was requested for each of these families.
        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(graphics_family, 0),
                device.get_device_queue(present_family, 0),
            )
        };

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: graphics_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        // SAFETY: device is valid; pool_info has no borrowed pointers.
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                // SAFETY: nothing was created from the device yet.
                unsafe { device.destroy_device(None) };
                return Err(InitError::vulkan("vkCreateCommandPool")(e));
            }
        };

        let swapchain_loader = swapchain::Device::new(instance.raw(), &device);

        tracing::info!(
            "device ready on {}: {} extension(s), queues g={} p={}",
            adapter.name,
            required_extensions.len(),
            graphics_family,
            present_family
        );

        Ok(Arc::new(Self {
            device,
            swapchain_loader,
            graphics_queue,
            present_queue,
            graphics_family,
            present_family,
            command_pool,
            instance: Arc::clone(instance),
        }))
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &Arc<InstanceContext> {
        &self.instance
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    pub fn present_family(&self) -> u32 {
        self.present_family
    }

    pub fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>, InitError> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        // SAFETY: the pool belongs to this device and is only used from the
        // driving thread.
        unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(InitError::vulkan("vkAllocateCommandBuffers"))
    }

    /// # Safety
    /// The buffers must come from this context's pool and not be pending.
    pub unsafe fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        // SAFETY: upheld by the caller.
        unsafe { self.device.free_command_buffers(self.command_pool, buffers) };
    }

    /// Submit one command buffer on the graphics queue. The wait happens at
    /// the color-attachment-output stage.
    pub fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> RenderResult<()> {
        let wait_stage = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let waits = [wait];
        let signals = [signal];
        let cmds = [command_buffer];
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: waits.as_ptr(),
            p_wait_dst_stage_mask: wait_stage.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: cmds.as_ptr(),
            signal_semaphore_count: 1,
            p_signal_semaphores: signals.as_ptr(),
            ..Default::default()
        };
        // SAFETY: all handles belong to this device; arrays outlive the call.
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, std::slice::from_ref(&si), fence)
        }
        .map_err(RenderError::vulkan("vkQueueSubmit"))
    }

    pub fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RenderResult<PresentStatus> {
        let waits = [wait];
        let swapchains = [swapchain];
        let indices = [image_index];
        let pi = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: waits.as_ptr(),
            swapchain_count: 1,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: indices.as_ptr(),
            ..Default::default()
        };
        // SAFETY: image_index was acquired from swapchain and not yet presented.
        let result = unsafe { self.swapchain_loader.queue_present(self.present_queue, &pi) };
        PresentStatus::from_result(result)
    }

    pub fn wait_idle(&self) -> RenderResult<()> {
        // SAFETY: device is alive for &self.
        unsafe { self.device.device_wait_idle() }.map_err(RenderError::vulkan("vkDeviceWaitIdle"))
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        tracing::debug!("dropping device {:?}", self.device.handle());
        // SAFETY: last owner. Every object created from the device holds an
        // Arc to it and is already gone.
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::warn!("device_wait_idle during teardown: {e}");
            }
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
    }
}
