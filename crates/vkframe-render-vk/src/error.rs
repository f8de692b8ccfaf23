// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Anything that stops the renderer from coming up. Always fatal.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("could not load the Vulkan loader: {0}")]
    Loader(String),

    #[error("could not obtain window/display handles: {0}")]
    WindowHandle(String),

    #[error("requested validation layers are not available: {0:?}")]
    LayerMissing(Vec<String>),

    #[error("required device extensions are missing: {0:?}")]
    ExtensionMissing(Vec<String>),

    #[error("no suitable adapter found ({})", .rejections.join("; "))]
    NoSuitableAdapter { rejections: Vec<String> },

    #[error("logical device creation failed: {0}")]
    DeviceCreationFailed(vk::Result),

    #[error("invalid shader blob `{name}`: {reason}")]
    Shader { name: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{what} failed: {result}")]
    Vulkan {
        what: &'static str,
        result: vk::Result,
    },
}

impl InitError {
    pub(crate) fn vulkan(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { what, result }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("initialization failed: {0}")]
    InitializationFailure(#[from] InitError),

    /// The surface no longer matches the swapchain. Handled by a rebuild
    /// inside the frame driver.
    #[error("surface out of date")]
    SurfaceOutOfDate,

    #[error("frame slot {slot} fence not signaled within {timeout_ns} ns, treating device as lost")]
    FenceTimeout { slot: usize, timeout_ns: u64 },

    #[error("device lost")]
    DeviceLost,

    #[error("{what} failed: {result}")]
    Vulkan {
        what: &'static str,
        result: vk::Result,
    },
}

impl RenderError {
    /// Classify a raw Vulkan failure from the frame loop.
    pub(crate) fn from_vk(what: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SurfaceOutOfDate,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            result => Self::Vulkan { what, result },
        }
    }

    pub(crate) fn vulkan(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::from_vk(what, result)
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::SurfaceOutOfDate)
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
