// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use vkframe_render::RenderSize;
use vkframe_render_vk::config::{names_to_cstrings, KHRONOS_VALIDATION_LAYER};
use vkframe_render_vk::{PresentPolicy, ShaderBlobs, VkConfig};

pub const DEFAULT_CONFIG_PATH: &str = "vkframe.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PresentModeCfg {
    #[default]
    LowLatency,
    Vsync,
    Uncapped,
}

impl From<PresentModeCfg> for PresentPolicy {
    fn from(mode: PresentModeCfg) -> Self {
        match mode {
            PresentModeCfg::LowLatency => PresentPolicy::LowLatency,
            PresentModeCfg::Vsync => PresentPolicy::Vsync,
            PresentModeCfg::Uncapped => PresentPolicy::Uncapped,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "vkframe".to_owned(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

impl WindowCfg {
    pub fn size(&self) -> RenderSize {
        RenderSize::new(self.width.max(1), self.height.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    pub present_mode: PresentModeCfg,
    /// Unset: on in debug builds only.
    pub validation: Option<bool>,
    pub validation_layers: Vec<String>,
    pub device_extensions: Vec<String>,
    pub fence_timeout_ms: u64,
    pub vertex_shader: Option<PathBuf>,
    pub fragment_shader: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            frames_in_flight: vkframe_render_vk::config::DEFAULT_FRAMES_IN_FLIGHT,
            present_mode: PresentModeCfg::default(),
            validation: None,
            validation_layers: Vec::new(),
            device_extensions: Vec::new(),
            fence_timeout_ms: vkframe_render_vk::config::DEFAULT_FENCE_TIMEOUT.as_millis() as u64,
            vertex_shader: None,
            fragment_shader: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Missing file means defaults; an unreadable or malformed one is logged
/// and also falls back to defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(text) => match parse_cfg(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("ignoring {}: {e}", path.display());
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} not found, using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("could not read {}: {e}", path.display());
            AppCfg::default()
        }
    }
}

impl RenderCfg {
    fn validation_enabled(&self) -> bool {
        self.validation.unwrap_or(cfg!(debug_assertions))
    }

    pub fn to_vk_config(&self, app_name: &str) -> Result<VkConfig> {
        let validation_layers = if !self.validation_enabled() {
            Vec::new()
        } else if self.validation_layers.is_empty() {
            vec![KHRONOS_VALIDATION_LAYER.to_owned()]
        } else {
            names_to_cstrings(&self.validation_layers).context("validation_layers")?
        };

        let shaders = match (&self.vertex_shader, &self.fragment_shader) {
            (None, None) => ShaderBlobs::builtin(),
            (Some(vs), Some(fs)) => ShaderBlobs::from_paths(vs, fs).context("loading shaders")?,
            _ => bail!("vertex_shader and fragment_shader must be given together"),
        };

        // validated() adds VK_KHR_swapchain when it is not listed.
        let device_extensions =
            names_to_cstrings(&self.device_extensions).context("device_extensions")?;

        Ok(VkConfig {
            app_name: app_name.to_owned(),
            frames_in_flight: self.frames_in_flight,
            device_extensions,
            validation_layers,
            present_policy: self.present_mode.into(),
            fence_timeout: Duration::from_millis(self.fence_timeout_ms),
            clear_color: self.clear_color,
            shaders,
        }
        .validated()?)
    }
}
