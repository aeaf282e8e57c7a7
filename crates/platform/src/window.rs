//! The viewer window and its Vulkan surface.

use std::ffi::{CStr, c_char};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use night_core::{Error, Result, WindowConfig};

use crate::resize::ResizeSignal;

/// `VkSurfaceKHR` for a [`Window`]. Drop it before the instance.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by `Window::create_surface` from the loader's
        // instance, destroyed only here.
        unsafe { self.loader.destroy_surface(self.handle, None) };
        debug!("Vulkan surface destroyed");
    }
}

/// Resizable window. Size changes reported through [`Window::resize`] raise
/// the shared [`ResizeSignal`].
pub struct Window {
    window: WinitWindow,
    last_size: PhysicalSize<u32>,
    resize_signal: ResizeSignal,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attributes = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attributes)
            .map_err(|e| Error::Window(e.to_string()))?;
        let last_size = window.inner_size();

        info!("Window created: {}x{}", last_size.width, last_size.height);
        Ok(Self {
            window,
            last_size,
            resize_signal: ResizeSignal::new(),
        })
    }

    /// Current framebuffer size in pixels, queried from the window system.
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    pub fn is_minimized(&self) -> bool {
        is_zero_extent(self.framebuffer_size())
    }

    /// Handles a resize event. Repeats of the last size are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        let size = PhysicalSize::new(width, height);
        if size == self.last_size {
            return;
        }

        debug!(
            "Window resized: {}x{} -> {}x{}",
            self.last_size.width, self.last_size.height, width, height
        );
        self.last_size = size;
        self.resize_signal.notify();
    }

    pub fn resize_signal(&self) -> ResizeSignal {
        self.resize_signal.clone()
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions this window's display needs for presentation.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("no display handle: {e}")))?;
        let extensions = ash_window::enumerate_required_extensions(display.as_raw())
            .map_err(|e| Error::Surface(format!("cannot list surface extensions: {e}")))?;

        for &name in extensions {
            // SAFETY: ash-window returns pointers to static C strings.
            debug!("Surface extension: {:?}", unsafe { CStr::from_ptr(name) });
        }
        Ok(extensions.to_vec())
    }

    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("no display handle: {e}")))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("no window handle: {e}")))?;

        // SAFETY: both handles come from a live winit window that outlives
        // the surface; `Surface::drop` destroys it.
        let handle = unsafe {
            ash_window::create_surface(entry, instance, display.as_raw(), window.as_raw(), None)
        }
        .map_err(|e| Error::Surface(format!("cannot create surface: {e}")))?;

        info!("Vulkan surface created");
        Ok(Surface {
            handle,
            loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }
}

/// A framebuffer with no pixels, as reported while minimized.
pub fn is_zero_extent((width, height): (u32, u32)) -> bool {
    width == 0 || height == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_extent() {
        assert!(is_zero_extent((0, 0)));
        assert!(is_zero_extent((800, 0)));
        assert!(is_zero_extent((0, 600)));
        assert!(!is_zero_extent((1, 1)));
    }
}
