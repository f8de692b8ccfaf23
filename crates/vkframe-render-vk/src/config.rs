// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{CStr, CString};
use std::time::Duration;

use ash::khr::swapchain;
use ash::vk;

use crate::error::InitError;
use crate::shader::ShaderBlobs;

pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;
pub const DEFAULT_FENCE_TIMEOUT: Duration = Duration::from_secs(5);
pub const KHRONOS_VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Present-mode preference. FIFO is the universal fallback for every policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPolicy {
    /// MAILBOX, then IMMEDIATE, then FIFO.
    #[default]
    LowLatency,
    /// Always FIFO.
    Vsync,
    /// IMMEDIATE, then MAILBOX, then FIFO.
    Uncapped,
}

impl PresentPolicy {
    /// Modes to try in order, before falling back to FIFO.
    pub fn preference(self) -> &'static [vk::PresentModeKHR] {
        match self {
            PresentPolicy::LowLatency => {
                &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
            }
            PresentPolicy::Vsync => &[],
            PresentPolicy::Uncapped => {
                &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX]
            }
        }
    }
}

/// Everything the engine needs that is not a window handle.
#[derive(Clone, Debug)]
pub struct VkConfig {
    pub app_name: String,
    pub frames_in_flight: usize,
    pub device_extensions: Vec<CString>,
    /// Empty disables validation and the diagnostic messenger.
    pub validation_layers: Vec<CString>,
    pub present_policy: PresentPolicy,
    pub fence_timeout: Duration,
    pub clear_color: [f32; 4],
    pub shaders: ShaderBlobs,
}

impl Default for VkConfig {
    fn default() -> Self {
        let validation_layers = if cfg!(debug_assertions) {
            vec![KHRONOS_VALIDATION_LAYER.to_owned()]
        } else {
            Vec::new()
        };
        Self {
            app_name: "vkframe".to_owned(),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            device_extensions: vec![swapchain::NAME.to_owned()],
            validation_layers,
            present_policy: PresentPolicy::default(),
            fence_timeout: DEFAULT_FENCE_TIMEOUT,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shaders: ShaderBlobs::builtin(),
        }
    }
}

impl VkConfig {
    pub fn validation_enabled(&self) -> bool {
        !self.validation_layers.is_empty()
    }

    pub fn fence_timeout_ns(&self) -> u64 {
        u64::try_from(self.fence_timeout.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Check invariants and make sure the swapchain extension is requested.
    pub fn validated(mut self) -> Result<Self, InitError> {
        if self.frames_in_flight == 0 {
            return Err(InitError::Config(
                "frames_in_flight must be at least 1".into(),
            ));
        }
        if self.fence_timeout.is_zero() {
            return Err(InitError::Config("fence_timeout must be non-zero".into()));
        }
        if !self
            .device_extensions
            .iter()
            .any(|e| e.as_c_str() == swapchain::NAME)
        {
            self.device_extensions.insert(0, swapchain::NAME.to_owned());
        }
        let mut seen = Vec::with_capacity(self.device_extensions.len());
        self.device_extensions.retain(|e| {
            if seen.contains(e) {
                false
            } else {
                seen.push(e.clone());
                true
            }
        });
        Ok(self)
    }
}

/// Parse extension/layer names coming from text configuration.
pub fn names_to_cstrings<S: AsRef<str>>(names: &[S]) -> Result<Vec<CString>, InitError> {
    names
        .iter()
        .map(|n| {
            CString::new(n.as_ref())
                .map_err(|_| InitError::Config(format!("name {:?} contains NUL", n.as_ref())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_requires_swapchain_and_two_frames() {
        let cfg = VkConfig::default().validated().unwrap();
        assert_eq!(cfg.frames_in_flight, 2);
        assert_eq!(cfg.device_extensions, vec![swapchain::NAME.to_owned()]);
    }

    #[test]
    fn validated_adds_swapchain_and_dedups() {
        let cfg = VkConfig {
            device_extensions: vec![
                c"VK_KHR_maintenance1".to_owned(),
                c"VK_KHR_maintenance1".to_owned(),
            ],
            ..VkConfig::default()
        }
        .validated()
        .unwrap();
        assert_eq!(
            cfg.device_extensions,
            vec![swapchain::NAME.to_owned(), c"VK_KHR_maintenance1".to_owned()]
        );
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let err = VkConfig {
            frames_in_flight: 0,
            ..VkConfig::default()
        }
        .validated()
        .unwrap_err();
        assert!(matches!(err, InitError::Config(_)));
    }

    #[test]
    fn every_policy_stays_off_fifo_in_its_preference_list() {
        for policy in [
            PresentPolicy::LowLatency,
            PresentPolicy::Vsync,
            PresentPolicy::Uncapped,
        ] {
            assert!(!policy.preference().contains(&vk::PresentModeKHR::FIFO));
        }
    }

    #[test]
    fn names_with_nul_are_rejected() {
        assert!(names_to_cstrings(&["VK_KHR_swapchain"]).is_ok());
        assert!(names_to_cstrings(&["bad\0name"]).is_err());
    }
}
