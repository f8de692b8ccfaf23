// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info};

use vkframe_core::init_tracing;
use vkframe_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use vkframe_platform::{window_attributes, SizeChange, WindowState};
use vkframe_render::{RenderSize, Renderer};
use vkframe_render_vk::VkRenderer;

mod config;

use config::{load_cfg, AppCfg, PresentModeCfg, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Frames in flight (ring size)
    #[arg(long)]
    frames_in_flight: Option<usize>,

    /// Present policy: low-latency | vsync | uncapped
    #[arg(long, value_enum)]
    present_mode: Option<PresentModeCfg>,

    /// Force validation layers on
    #[arg(long, conflicts_with = "no_validation")]
    validation: bool,

    /// Force validation layers off
    #[arg(long)]
    no_validation: bool,
}

impl Args {
    fn apply(&self, cfg: &mut AppCfg) {
        if let Some(n) = self.frames_in_flight {
            cfg.render.frames_in_flight = n;
        }
        if let Some(mode) = self.present_mode {
            cfg.render.present_mode = mode;
        }
        if self.validation {
            cfg.render.validation = Some(true);
        } else if self.no_validation {
            cfg.render.validation = Some(false);
        }
    }
}

struct App {
    cfg: AppCfg,
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    state: WindowState,
    fatal: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        let state = WindowState::new(cfg.window.size());
        Self {
            cfg,
            window: None,
            renderer: None,
            state,
            fatal: None,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop
            .create_window(window_attributes(
                &self.cfg.window.title,
                self.cfg.window.size(),
                self.cfg.window.resizable,
            ))
            .context("create_window")?;

        self.state = WindowState::from_physical(window.inner_size());
        let size = self.state.size();
        let initial = RenderSize::new(size.width.max(1), size.height.max(1));

        let vk_cfg = self
            .cfg
            .render
            .to_vk_config(&self.cfg.window.title)
            .context("render configuration")?;
        let renderer = VkRenderer::with_config(&window, &window, initial, vk_cfg)
            .context("initializing Vulkan renderer")?;

        info!(
            "window {}x{}, validation={}",
            size.width,
            size.height,
            renderer.validation_enabled()
        );
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    // Renderer before window: the surface must go before its window.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.state.request_close();
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let change = self.state.resize(new_size);
                debug!("Resized -> {}x{} ({:?})", new_size.width, new_size.height, change);
                let target = match change {
                    SizeChange::Unchanged => return,
                    SizeChange::Resized(size) => size,
                    SizeChange::Paused => RenderSize::new(0, 0),
                };
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(target) {
                        self.fail(event_loop, e);
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                if self.state.set_occluded(occluded) {
                    info!("Occluded={} -> paused={}", occluded, self.state.is_paused());
                }
            }

            WindowEvent::RedrawRequested => {
                if self.state.close_requested() || self.state.is_paused() {
                    return;
                }
                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                match renderer.render() {
                    Ok(()) => self.frames = self.frames.saturating_add(1),
                    Err(e) => self.fail(event_loop, e.context("rendering frame")),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.close_requested() || self.renderer.is_none() {
            return;
        }

        if self.state.is_paused() {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            debug!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn run(args: Args) -> Result<Option<anyhow::Error>> {
    let mut cfg = load_cfg(&args.config);
    args.apply(&mut cfg);

    let event_loop: EventLoop<()> = EventLoop::new().context("creating event loop")?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app).context("event loop")?;
    Ok(app.fatal)
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args) {
        Ok(None) => ExitCode::SUCCESS,
        Ok(Some(e)) | Err(e) => {
            eprintln!("vkframe: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_file_values() {
        let args = Args::parse_from([
            "vkframe",
            "--frames-in-flight",
            "3",
            "--present-mode",
            "vsync",
            "--no-validation",
        ]);
        let mut cfg = AppCfg::default();
        args.apply(&mut cfg);
        assert_eq!(cfg.render.frames_in_flight, 3);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Vsync);
        assert_eq!(cfg.render.validation, Some(false));
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn validation_flags_conflict() {
        assert!(Args::try_parse_from(["vkframe", "--validation", "--no-validation"]).is_err());
    }

    #[test]
    fn no_flags_keep_file_values() {
        let args = Args::parse_from(["vkframe"]);
        let mut cfg = AppCfg::default();
        cfg.render.frames_in_flight = 4;
        args.apply(&mut cfg);
        assert_eq!(cfg.render.frames_in_flight, 4);
        assert_eq!(cfg.render.validation, None);
    }
}
