// SPDX-License-Identifier: CEPL-1.0
//! Frame driver: one acquire -> record/submit -> present iteration per tick.
//!
//! Two indices are in play and never mixed up:
//! * the ring slot, `frame_counter % frames_in_flight`, which owns the
//!   command buffer, both semaphores and the in-flight fence;
//! * the swapchain image index handed out by acquire, in any order.
//!
//! `images_in_flight[image]` remembers which slot last submitted work for
//! that image, so a reacquired image waits on the right fence even when
//! image count and ring size differ.

use ash::vk;

use crate::device::PresentStatus;
use crate::error::{InitError, RenderError, RenderResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt,
    /// Surface has zero area; nothing was built.
    Deferred,
}

/// Result of replacing the swapchain alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainRebuild {
    Rebuilt {
        /// Color format the current pipeline was built for.
        pipeline_format: vk::Format,
        swapchain_format: vk::Format,
    },
    Deferred,
}

/// What has to follow a new swapchain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildScope {
    Framebuffers,
    PipelineAndFramebuffers,
}

impl RebuildScope {
    pub fn for_formats(pipeline_format: vk::Format, swapchain_format: vk::Format) -> Self {
        if pipeline_format == swapchain_format {
            Self::Framebuffers
        } else {
            Self::PipelineAndFramebuffers
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Presented {
        slot: usize,
        image: u32,
        rebuilt: bool,
    },
    /// Aborted at acquire; the surface was rebuilt and the counter kept.
    Rebuilt,
    /// Paused (zero-area surface), nothing submitted or rebuilt.
    Skipped,
}

/// The GPU-facing half of a frame. Implemented by the Vulkan presenter and
/// by scripted backends in tests.
pub trait FrameBackend {
    fn image_count(&self) -> usize;

    /// Block until `slot`'s last submission has completed.
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()>;

    /// Acquire the next image, signaling `slot`'s image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome>;

    fn record(&mut self, slot: usize, image: u32) -> RenderResult<()>;

    fn reset_slot_fence(&mut self, slot: usize) -> RenderResult<()>;

    fn submit(&mut self, slot: usize) -> RenderResult<()>;

    fn present(&mut self, slot: usize, image: u32) -> RenderResult<PresentStatus>;

    /// Idle the device, drop the framebuffers and replace the swapchain.
    fn rebuild_swapchain(&mut self) -> RenderResult<SwapchainRebuild>;

    /// Rebuild render pass and pipeline for the current swapchain format.
    fn rebuild_pipeline(&mut self) -> RenderResult<()>;

    /// One framebuffer per current swapchain image.
    fn rebuild_framebuffers(&mut self) -> RenderResult<()>;
}

#[derive(Debug)]
pub struct FrameDriver {
    frames_in_flight: usize,
    frame_counter: u64,
    images_in_flight: Vec<Option<usize>>,
    state: FrameState,
    rebuild_requested: bool,
    paused: bool,
}

impl FrameDriver {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Result<Self, InitError> {
        if frames_in_flight == 0 {
            return Err(InitError::Config(
                "frames_in_flight must be at least 1".into(),
            ));
        }
        Ok(Self {
            frames_in_flight,
            frame_counter: 0,
            images_in_flight: vec![None; image_count],
            state: FrameState::Idle,
            rebuild_requested: false,
            paused: false,
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.frames_in_flight as u64) as usize
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Rebuild before the next frame (window resized).
    pub fn request_rebuild(&mut self) {
        self.rebuild_requested = true;
        self.paused = false;
    }

    /// Stop rendering until the next `request_rebuild` (zero-area window).
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn tick<B: FrameBackend>(&mut self, backend: &mut B) -> RenderResult<TickOutcome> {
        let result = self.run_tick(backend);
        self.state = FrameState::Idle;
        match result {
            Err(RenderError::SurfaceOutOfDate) => {
                tracing::debug!("surface out of date mid-frame, rebuilding");
                Ok(self.rebuild(backend)?.into())
            }
            other => other,
        }
    }

    fn run_tick<B: FrameBackend>(&mut self, backend: &mut B) -> RenderResult<TickOutcome> {
        if self.paused {
            return Ok(TickOutcome::Skipped);
        }
        if self.rebuild_requested && self.rebuild(backend)? == RebuildOutcome::Deferred {
            return Ok(TickOutcome::Skipped);
        }

        let slot = self.current_slot();

        self.state = FrameState::Acquiring;
        backend.wait_for_slot(slot)?;
        let (image, acquire_suboptimal) = match backend.acquire_image(slot)? {
            AcquireOutcome::Image { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                tracing::debug!("acquire out of date on frame {}", self.frame_counter);
                return Ok(self.rebuild(backend)?.into());
            }
        };

        let image_slot = image as usize;
        if image_slot >= self.images_in_flight.len() {
            self.images_in_flight.resize(image_slot + 1, None);
        }
        if let Some(previous) = self.images_in_flight[image_slot] {
            if previous != slot {
                backend.wait_for_slot(previous)?;
            }
        }
        self.images_in_flight[image_slot] = Some(slot);

        self.state = FrameState::Recording;
        backend.record(slot, image)?;

        backend.reset_slot_fence(slot)?;
        backend.submit(slot)?;
        self.state = FrameState::Submitted;
        tracing::trace!("frame {} submitted on slot {slot}, image {image}", self.frame_counter);

        self.state = FrameState::Presenting;
        let status = backend.present(slot, image)?;
        self.frame_counter += 1;

        let rebuilt = if status.needs_rebuild() || acquire_suboptimal {
            tracing::debug!("present reported {:?}, rebuilding", status);
            self.rebuild(backend)? == RebuildOutcome::Rebuilt
        } else {
            false
        };

        Ok(TickOutcome::Presented {
            slot,
            image,
            rebuilt,
        })
    }

    // STRICT ORDER:
    // 1) swapchain (idles the device), 2) pipeline only on format change,
    // 3) framebuffers against the new views and render pass
    fn rebuild<B: FrameBackend>(&mut self, backend: &mut B) -> RenderResult<RebuildOutcome> {
        let (pipeline_format, swapchain_format) = match backend.rebuild_swapchain()? {
            SwapchainRebuild::Rebuilt {
                pipeline_format,
                swapchain_format,
            } => (pipeline_format, swapchain_format),
            SwapchainRebuild::Deferred => {
                self.paused = true;
                self.rebuild_requested = true;
                return Ok(RebuildOutcome::Deferred);
            }
        };

        if RebuildScope::for_formats(pipeline_format, swapchain_format)
            == RebuildScope::PipelineAndFramebuffers
        {
            tracing::info!(
                "swapchain format changed {:?} -> {:?}, rebuilding pipeline",
                pipeline_format,
                swapchain_format
            );
            backend.rebuild_pipeline()?;
        }
        backend.rebuild_framebuffers()?;

        // The device was idled, so no image is owed to any slot.
        self.images_in_flight = vec![None; backend.image_count()];
        self.rebuild_requested = false;
        Ok(RebuildOutcome::Rebuilt)
    }
}

impl From<RebuildOutcome> for TickOutcome {
    fn from(outcome: RebuildOutcome) -> Self {
        match outcome {
            RebuildOutcome::Rebuilt => Self::Rebuilt,
            RebuildOutcome::Deferred => Self::Skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    /// Scripted GPU: a submission stays pending until its slot is waited on.
    struct MockBackend {
        images: usize,
        pending: Vec<bool>,
        image_owner: Vec<Option<usize>>,
        next_image: u32,
        acquire_calls: u64,
        out_of_date_acquires: BTreeSet<u64>,
        present_script: Vec<PresentStatus>,
        presents: usize,
        rebuilds: usize,
        zero_area: bool,
        waits: Vec<usize>,
        max_pending: usize,
        fail_wait: Option<usize>,
        pipeline_format: vk::Format,
        swapchain_format: vk::Format,
        /// Format the surface reports at the next swapchain rebuild.
        surface_format: vk::Format,
        pipeline_builds: usize,
        framebuffer_builds: usize,
    }

    impl MockBackend {
        fn new(slots: usize, images: usize) -> Self {
            Self {
                images,
                pending: vec![false; slots],
                image_owner: vec![None; images],
                next_image: 0,
                acquire_calls: 0,
                out_of_date_acquires: BTreeSet::new(),
                present_script: Vec::new(),
                presents: 0,
                rebuilds: 0,
                zero_area: false,
                waits: Vec::new(),
                max_pending: 0,
                fail_wait: None,
                pipeline_format: vk::Format::B8G8R8A8_UNORM,
                swapchain_format: vk::Format::B8G8R8A8_UNORM,
                surface_format: vk::Format::B8G8R8A8_UNORM,
                pipeline_builds: 0,
                framebuffer_builds: 0,
            }
        }
    }

    impl FrameBackend for MockBackend {
        fn image_count(&self) -> usize {
            self.images
        }

        fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
            if self.fail_wait == Some(slot) {
                return Err(RenderError::FenceTimeout {
                    slot,
                    timeout_ns: 1,
                });
            }
            self.waits.push(slot);
            self.pending[slot] = false;
            Ok(())
        }

        fn acquire_image(&mut self, _slot: usize) -> RenderResult<AcquireOutcome> {
            self.acquire_calls += 1;
            if self.out_of_date_acquires.contains(&self.acquire_calls) {
                return Ok(AcquireOutcome::OutOfDate);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.images as u32;
            Ok(AcquireOutcome::Image {
                index,
                suboptimal: false,
            })
        }

        fn record(&mut self, slot: usize, image: u32) -> RenderResult<()> {
            assert!(!self.pending[slot], "slot {slot} re-recorded while in flight");
            if let Some(owner) = self.image_owner[image as usize] {
                assert!(
                    !self.pending[owner],
                    "image {image} reused while slot {owner} still renders to it"
                );
            }
            Ok(())
        }

        fn reset_slot_fence(&mut self, slot: usize) -> RenderResult<()> {
            assert!(!self.pending[slot]);
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> RenderResult<()> {
            self.pending[slot] = true;
            self.max_pending = self.max_pending.max(self.pending.iter().filter(|p| **p).count());
            Ok(())
        }

        fn present(&mut self, slot: usize, image: u32) -> RenderResult<PresentStatus> {
            self.image_owner[image as usize] = Some(slot);
            let status = self
                .present_script
                .get(self.presents)
                .copied()
                .unwrap_or(PresentStatus::Optimal);
            self.presents += 1;
            Ok(status)
        }

        fn rebuild_swapchain(&mut self) -> RenderResult<SwapchainRebuild> {
            if self.zero_area {
                return Ok(SwapchainRebuild::Deferred);
            }
            // Device idle.
            self.pending.iter_mut().for_each(|p| *p = false);
            self.image_owner.iter_mut().for_each(|o| *o = None);
            self.next_image = 0;
            self.rebuilds += 1;
            self.swapchain_format = self.surface_format;
            Ok(SwapchainRebuild::Rebuilt {
                pipeline_format: self.pipeline_format,
                swapchain_format: self.swapchain_format,
            })
        }

        fn rebuild_pipeline(&mut self) -> RenderResult<()> {
            self.pipeline_format = self.swapchain_format;
            self.pipeline_builds += 1;
            Ok(())
        }

        fn rebuild_framebuffers(&mut self) -> RenderResult<()> {
            assert_eq!(
                self.pipeline_format, self.swapchain_format,
                "framebuffers built against a stale render pass"
            );
            self.framebuffer_builds += 1;
            Ok(())
        }
    }

    #[test]
    fn slots_rotate_through_the_ring() {
        let mut backend = MockBackend::new(2, 3);
        let mut driver = FrameDriver::new(2, 3).unwrap();
        let mut slots = Vec::new();
        for _ in 0..6 {
            match driver.tick(&mut backend).unwrap() {
                TickOutcome::Presented { slot, .. } => slots.push(slot),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(driver.frame_counter(), 6);
        assert_eq!(driver.state(), FrameState::Idle);
    }

    #[test]
    fn never_more_submissions_outstanding_than_slots() {
        for (slots, images) in [(1, 3), (2, 2), (2, 3), (3, 2), (3, 4)] {
            let mut backend = MockBackend::new(slots, images);
            let mut driver = FrameDriver::new(slots, images).unwrap();
            for _ in 0..40 {
                driver.tick(&mut backend).unwrap();
            }
            assert!(backend.max_pending <= slots);
            assert_eq!(backend.presents, 40);
        }
    }

    #[test]
    fn reacquired_image_waits_on_the_slot_that_last_used_it() {
        // 3 images, 2 slots: image 0 comes back on tick 4 (slot 1) while
        // slot 0 still owns it.
        let mut backend = MockBackend::new(2, 3);
        let mut driver = FrameDriver::new(2, 3).unwrap();
        for _ in 0..4 {
            driver.tick(&mut backend).unwrap();
        }
        // tick1: wait 0; tick2: wait 1; tick3: wait 0;
        // tick4: wait 1 then image 0 owned by slot 0 -> wait 0.
        assert_eq!(backend.waits, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn out_of_date_acquire_rebuilds_without_advancing() {
        let mut backend = MockBackend::new(2, 3);
        backend.out_of_date_acquires.insert(5);
        let mut driver = FrameDriver::new(2, 3).unwrap();

        for _ in 0..4 {
            assert!(matches!(
                driver.tick(&mut backend).unwrap(),
                TickOutcome::Presented { .. }
            ));
        }
        assert_eq!(driver.tick(&mut backend).unwrap(), TickOutcome::Rebuilt);
        assert_eq!(driver.frame_counter(), 4);
        assert_eq!(backend.rebuilds, 1);
        assert_eq!(backend.pipeline_builds, 0);
        assert_eq!(backend.framebuffer_builds, 1);

        match driver.tick(&mut backend).unwrap() {
            TickOutcome::Presented { slot, image, .. } => {
                assert_eq!(slot, 0);
                assert_eq!(image, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(driver.frame_counter(), 5);
    }

    #[test]
    fn suboptimal_present_rebuilds_after_the_frame() {
        let mut backend = MockBackend::new(2, 2);
        backend.present_script = vec![PresentStatus::Optimal, PresentStatus::Suboptimal];
        let mut driver = FrameDriver::new(2, 2).unwrap();
        driver.tick(&mut backend).unwrap();
        let out = driver.tick(&mut backend).unwrap();
        assert!(matches!(out, TickOutcome::Presented { rebuilt: true, .. }));
        assert_eq!(driver.frame_counter(), 2);
        assert_eq!(backend.rebuilds, 1);
    }

    #[test]
    fn out_of_date_present_still_counts_the_frame() {
        let mut backend = MockBackend::new(2, 2);
        backend.present_script = vec![PresentStatus::OutOfDate];
        let mut driver = FrameDriver::new(2, 2).unwrap();
        let out = driver.tick(&mut backend).unwrap();
        assert!(matches!(out, TickOutcome::Presented { rebuilt: true, .. }));
        assert_eq!(driver.frame_counter(), 1);
    }

    #[test]
    fn resize_request_rebuilds_before_the_next_frame() {
        let mut backend = MockBackend::new(2, 2);
        let mut driver = FrameDriver::new(2, 2).unwrap();
        driver.tick(&mut backend).unwrap();
        driver.request_rebuild();
        driver.tick(&mut backend).unwrap();
        assert_eq!(backend.rebuilds, 1);
        driver.tick(&mut backend).unwrap();
        assert_eq!(backend.rebuilds, 1);
    }

    #[test]
    fn zero_area_pauses_until_resized() {
        let mut backend = MockBackend::new(2, 2);
        let mut driver = FrameDriver::new(2, 2).unwrap();
        backend.zero_area = true;
        driver.request_rebuild();
        assert_eq!(driver.tick(&mut backend).unwrap(), TickOutcome::Skipped);
        assert!(driver.is_paused());
        assert_eq!(driver.tick(&mut backend).unwrap(), TickOutcome::Skipped);
        assert_eq!(backend.acquire_calls, 0);

        backend.zero_area = false;
        driver.request_rebuild();
        assert!(matches!(
            driver.tick(&mut backend).unwrap(),
            TickOutcome::Presented { .. }
        ));
        assert_eq!(backend.rebuilds, 1);
    }

    #[test]
    fn extent_only_change_keeps_the_pipeline() {
        let mut backend = MockBackend::new(2, 2);
        let mut driver = FrameDriver::new(2, 2).unwrap();
        driver.tick(&mut backend).unwrap();
        driver.request_rebuild();
        driver.tick(&mut backend).unwrap();
        assert_eq!(backend.rebuilds, 1);
        assert_eq!(backend.pipeline_builds, 0);
        assert_eq!(backend.framebuffer_builds, 1);
    }

    #[test]
    fn format_change_rebuilds_the_pipeline_first() {
        let mut backend = MockBackend::new(2, 2);
        let mut driver = FrameDriver::new(2, 2).unwrap();
        driver.tick(&mut backend).unwrap();
        backend.surface_format = vk::Format::R8G8B8A8_SRGB;
        driver.request_rebuild();
        driver.tick(&mut backend).unwrap();
        assert_eq!(backend.pipeline_builds, 1);
        assert_eq!(backend.framebuffer_builds, 1);
        assert_eq!(backend.pipeline_format, vk::Format::R8G8B8A8_SRGB);

        driver.request_rebuild();
        driver.tick(&mut backend).unwrap();
        assert_eq!(backend.pipeline_builds, 1);
        assert_eq!(backend.framebuffer_builds, 2);
    }

    #[test]
    fn rebuild_scope_follows_format() {
        assert_eq!(
            RebuildScope::for_formats(vk::Format::B8G8R8A8_UNORM, vk::Format::B8G8R8A8_UNORM),
            RebuildScope::Framebuffers
        );
        assert_eq!(
            RebuildScope::for_formats(vk::Format::B8G8R8A8_UNORM, vk::Format::B8G8R8A8_SRGB),
            RebuildScope::PipelineAndFramebuffers
        );
    }

    #[test]
    fn out_of_date_acquire_on_zero_area_skips() {
        let mut backend = MockBackend::new(2, 2);
        backend.out_of_date_acquires.insert(1);
        backend.zero_area = true;
        let mut driver = FrameDriver::new(2, 2).unwrap();
        assert_eq!(driver.tick(&mut backend).unwrap(), TickOutcome::Skipped);
        assert!(driver.is_paused());
        assert_eq!(backend.rebuilds, 0);
        assert_eq!(driver.frame_counter(), 0);
    }

    #[test]
    fn empty_ring_is_rejected() {
        assert!(matches!(
            FrameDriver::new(0, 3),
            Err(InitError::Config(_))
        ));
    }

    #[test]
    fn explicit_pause_skips_frames() {
        let mut backend = MockBackend::new(2, 2);
        let mut driver = FrameDriver::new(2, 2).unwrap();
        driver.pause();
        assert_eq!(driver.tick(&mut backend).unwrap(), TickOutcome::Skipped);
        assert_eq!(driver.frame_counter(), 0);
    }

    #[test]
    fn fence_timeout_is_fatal_and_leaves_driver_idle() {
        let mut backend = MockBackend::new(2, 2);
        backend.fail_wait = Some(1);
        let mut driver = FrameDriver::new(2, 2).unwrap();
        driver.tick(&mut backend).unwrap();
        let err = driver.tick(&mut backend).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, RenderError::FenceTimeout { slot: 1, .. }));
        assert_eq!(driver.state(), FrameState::Idle);
        assert_eq!(driver.frame_counter(), 1);
    }
}
