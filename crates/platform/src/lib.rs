//! Windowing for the viewer: the winit window, its Vulkan surface and the
//! resize notification read by the frame loop.

mod resize;
mod window;

pub use resize::ResizeSignal;
pub use window::{Surface, Window, is_zero_extent};
