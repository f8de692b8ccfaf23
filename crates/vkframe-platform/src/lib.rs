// SPDX-License-Identifier: CEPL-1.0
//! Window-system side: winit re-export plus the window signals the renderer
//! cares about (pixel size, pause, close).
#![deny(unsafe_op_in_unsafe_fn)]

pub use winit;

use vkframe_render::RenderSize;
use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowAttributes};

pub fn window_attributes(title: &str, size: RenderSize, resizable: bool) -> WindowAttributes {
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(size.width, size.height))
        .with_resizable(resizable)
}

/// What the renderer should do after a window signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeChange {
    Unchanged,
    Resized(RenderSize),
    Paused,
}

/// Last known framebuffer size and visibility of one window.
#[derive(Clone, Copy, Debug)]
pub struct WindowState {
    size: RenderSize,
    occluded: bool,
    close_requested: bool,
}

impl WindowState {
    pub fn new(size: RenderSize) -> Self {
        Self {
            size,
            occluded: false,
            close_requested: false,
        }
    }

    pub fn from_physical(size: PhysicalSize<u32>) -> Self {
        Self::new(RenderSize::new(size.width, size.height))
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    /// Nothing should be drawn: zero area or fully hidden.
    pub fn is_paused(&self) -> bool {
        self.size.is_empty() || self.occluded
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    pub fn resize(&mut self, size: PhysicalSize<u32>) -> SizeChange {
        let next = RenderSize::new(size.width, size.height);
        if next == self.size {
            return SizeChange::Unchanged;
        }
        self.size = next;
        tracing::debug!("window resized to {}x{}", next.width, next.height);
        if next.is_empty() {
            SizeChange::Paused
        } else {
            SizeChange::Resized(next)
        }
    }

    /// Returns true if the paused state flipped.
    pub fn set_occluded(&mut self, occluded: bool) -> bool {
        let before = self.is_paused();
        self.occluded = occluded;
        before != self.is_paused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_area_resize_pauses() {
        let mut state = WindowState::new(RenderSize::new(800, 600));
        assert!(!state.is_paused());
        assert_eq!(state.resize(PhysicalSize::new(0, 600)), SizeChange::Paused);
        assert!(state.is_paused());
        assert_eq!(
            state.resize(PhysicalSize::new(1024, 768)),
            SizeChange::Resized(RenderSize::new(1024, 768))
        );
        assert!(!state.is_paused());
    }

    #[test]
    fn same_size_is_not_a_change() {
        let mut state = WindowState::from_physical(PhysicalSize::new(640, 480));
        assert_eq!(state.resize(PhysicalSize::new(640, 480)), SizeChange::Unchanged);
    }

    #[test]
    fn occlusion_toggles_pause() {
        let mut state = WindowState::new(RenderSize::new(10, 10));
        assert!(state.set_occluded(true));
        assert!(state.is_paused());
        assert!(!state.set_occluded(true));
        assert!(state.set_occluded(false));
        assert!(!state.is_paused());
    }

    #[test]
    fn close_is_sticky() {
        let mut state = WindowState::new(RenderSize::new(1, 1));
        assert!(!state.close_requested());
        state.request_close();
        assert!(state.close_requested());
    }
}
