// SPDX-License-Identifier: CEPL-1.0
//! Owned binary fences and semaphores.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::DeviceContext;
use crate::error::InitError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitFenceError {
    #[error("fence wait timed out")]
    Timeout,
    #[error("Vulkan error waiting for fence: {0}")]
    Vulkan(vk::Result),
}

impl WaitFenceError {
    fn from_vk(e: vk::Result) -> Self {
        if e == vk::Result::TIMEOUT {
            WaitFenceError::Timeout
        } else {
            WaitFenceError::Vulkan(e)
        }
    }
}

/// CPU-GPU fence. Frame slots create theirs signaled so the first wait
/// returns immediately.
pub struct Fence {
    parent: Arc<DeviceContext>,
    handle: vk::Fence,
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Fence {
    pub fn new(device: &Arc<DeviceContext>, signaled: bool) -> Result<Self, InitError> {
        let info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        // SAFETY: info has no borrowed pointers.
        let handle = unsafe { device.raw().create_fence(&info, None) }
            .map_err(InitError::vulkan("vkCreateFence"))?;
        Ok(Self {
            parent: Arc::clone(device),
            handle,
        })
    }

    /// Block until signaled or until `timeout_ns` elapses.
    pub fn wait(&self, timeout_ns: u64) -> Result<(), WaitFenceError> {
        // SAFETY: handle was created from parent.
        unsafe {
            self.parent
                .raw()
                .wait_for_fences(&[self.handle], true, timeout_ns)
        }
        .map_err(WaitFenceError::from_vk)
    }

    /// Return the fence to the unsignaled state.
    ///
    /// # Safety
    /// The fence must not be pending on any queue submission.
    pub unsafe fn reset(&self) -> Result<(), vk::Result> {
        // SAFETY: upheld by the caller.
        unsafe { self.parent.raw().reset_fences(&[self.handle]) }
    }

    pub fn raw(&self) -> vk::Fence {
        self.handle
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        tracing::debug!("dropping fence {:?}", self.handle);
        // SAFETY: owners wait for the device to go idle before dropping
        // frame slots.
        unsafe { self.parent.raw().destroy_fence(self.handle, None) };
    }
}

/// GPU-GPU binary semaphore.
pub struct Semaphore {
    parent: Arc<DeviceContext>,
    handle: vk::Semaphore,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Semaphore {
    pub fn new(device: &Arc<DeviceContext>) -> Result<Self, InitError> {
        let info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        // SAFETY: info has no borrowed pointers.
        let handle = unsafe { device.raw().create_semaphore(&info, None) }
            .map_err(InitError::vulkan("vkCreateSemaphore"))?;
        Ok(Self {
            parent: Arc::clone(device),
            handle,
        })
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        tracing::debug!("dropping semaphore {:?}", self.handle);
        // SAFETY: no queue operation waits on or signals it once the device
        // is idle.
        unsafe { self.parent.raw().destroy_semaphore(self.handle, None) };
    }
}
