// SPDX-License-Identifier: CEPL-1.0
//! Vulkan device/resource lifecycle and per-frame synchronization.
#![deny(unsafe_op_in_unsafe_fn)]

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;

use vkframe_render::{RenderSize, Renderer};

pub mod config;
mod debug;
pub mod device;
pub mod error;
pub mod frame;
pub mod framebuffer;
pub mod instance;
pub mod pipeline;
pub mod presenter;
pub mod probe;
pub mod ring;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use config::{PresentPolicy, VkConfig};
pub use error::{InitError, RenderError, RenderResult};
pub use frame::{FrameDriver, RebuildScope, TickOutcome};
pub use shader::ShaderBlobs;

use device::DeviceContext;
use instance::InstanceContext;
use presenter::Presenter;
use surface::Surface;

fn extent_of(size: RenderSize) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

/// The renderer the application drives.
///
/// Drop order follows field order: the presenter (and with it every
/// per-surface and per-frame object) goes first, then the device, the
/// surface and last the instance.
pub struct VkRenderer {
    driver: FrameDriver,
    presenter: Presenter,
    device: Arc<DeviceContext>,
    surface: Arc<Surface>,
    instance: Arc<InstanceContext>,
}

impl std::fmt::Debug for VkRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkRenderer")
            .field("driver", &self.driver)
            .field("presenter", &self.presenter)
            .finish_non_exhaustive()
    }
}

impl VkRenderer {
    // STRICT ORDER:
    // 1) instance (+ messenger), 2) surface from that instance,
    // 3) adapter probed against that surface, 4) device,
    // 5) swapchain, pipeline, framebuffers, ring
    pub fn with_config(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: VkConfig,
    ) -> Result<Self, InitError> {
        let config = config.validated()?;

        let dh = display
            .display_handle()
            .map_err(|e| InitError::WindowHandle(e.to_string()))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| InitError::WindowHandle(e.to_string()))?
            .as_raw();

        let instance = InstanceContext::new(&config.app_name, dh, &config.validation_layers)?;
        let surface = Surface::new(&instance, dh, wh)?;

        let adapters = instance.adapters()?;
        let adapter = probe::select_adapter(&adapters, &config.device_extensions, |phys| {
            probe::query_facts(&instance, &surface, phys)
        })?;

        let device = DeviceContext::create(
            &instance,
            &adapter,
            &config.device_extensions,
            &config.validation_layers,
        )?;

        let presenter = Presenter::new(&device, &surface, adapter, &config, extent_of(size))?;
        let driver = FrameDriver::new(config.frames_in_flight, presenter.surface_set().image_count())?;

        let extent = presenter.surface_set().extent();
        info!(
            "Vulkan renderer ready ({}x{}, {:?}, {:?}, {} frame(s) in flight)",
            extent.width,
            extent.height,
            presenter.surface_set().format(),
            presenter.surface_set().present_mode(),
            config.frames_in_flight
        );

        Ok(Self {
            driver,
            presenter,
            device,
            surface,
            instance,
        })
    }

    pub fn frame_counter(&self) -> u64 {
        self.driver.frame_counter()
    }

    pub fn is_paused(&self) -> bool {
        self.driver.is_paused()
    }

    pub fn validation_enabled(&self) -> bool {
        self.instance.validation_enabled()
    }

    /// Run one frame, keeping the typed error.
    pub fn tick(&mut self) -> RenderResult<TickOutcome> {
        self.driver.tick(&mut self.presenter)
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self> {
        Self::with_config(window, display, size, VkConfig::default())
            .context("initializing Vulkan renderer")
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_empty() {
            tracing::debug!("window has zero area, pausing");
            self.driver.pause();
            return Ok(());
        }
        self.presenter.set_window_extent(extent_of(size));
        self.driver.request_rebuild();
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        match self.tick() {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(anyhow!(e)),
            Err(e) => {
                tracing::debug!("transient render error: {e}");
                Ok(())
            }
        }
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.presenter.set_clear_color(rgba);
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        tracing::debug!(
            "dropping renderer after {} frame(s), surface {:?}",
            self.driver.frame_counter(),
            self.surface.raw()
        );
        if let Err(e) = self.device.wait_idle() {
            tracing::warn!("wait_idle at shutdown: {e}");
        }
    }
}
