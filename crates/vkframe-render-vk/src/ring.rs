// SPDX-License-Identifier: CEPL-1.0
//! Fixed ring of per-frame resources.

use std::sync::Arc;

use ash::vk;

use crate::device::DeviceContext;
use crate::error::InitError;
use crate::sync::{Fence, Semaphore};

/// Everything one frame in flight needs. The command buffer may only be
/// re-recorded after `in_flight` has signaled.
#[derive(Debug)]
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub image_available: Semaphore,
    pub render_finished: Semaphore,
    pub in_flight: Fence,
}

pub struct SyncRing {
    device: Arc<DeviceContext>,
    slots: Vec<FrameSlot>,
}

impl std::fmt::Debug for SyncRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRing")
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl SyncRing {
    /// `frames_in_flight` slots, fences created signaled.
    pub fn new(device: &Arc<DeviceContext>, frames_in_flight: usize) -> Result<Self, InitError> {
        let buffers = device.allocate_command_buffers(frames_in_flight as u32)?;
        let mut ring = Self {
            device: Arc::clone(device),
            slots: Vec::with_capacity(frames_in_flight),
        };
        let mut pending = buffers.into_iter();
        while let Some(command_buffer) = pending.next() {
            let slot = Semaphore::new(device).and_then(|image_available| {
                Ok(FrameSlot {
                    command_buffer,
                    image_available,
                    render_finished: Semaphore::new(device)?,
                    in_flight: Fence::new(device, true)?,
                })
            });
            match slot {
                Ok(slot) => ring.slots.push(slot),
                Err(e) => {
                    let rest: Vec<vk::CommandBuffer> =
                        std::iter::once(command_buffer).chain(pending).collect();
                    // SAFETY: freshly allocated, never submitted.
                    unsafe { device.free_command_buffers(&rest) };
                    return Err(e);
                }
            }
        }
        tracing::debug!("sync ring: {} slot(s)", ring.slots.len());
        Ok(ring)
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }
}

impl Drop for SyncRing {
    fn drop(&mut self) {
        let buffers: Vec<vk::CommandBuffer> =
            self.slots.iter().map(|s| s.command_buffer).collect();
        // SAFETY: owners idle the device before dropping the ring.
        unsafe { self.device.free_command_buffers(&buffers) };
        // Semaphores and fences drop with the slots.
    }
}
