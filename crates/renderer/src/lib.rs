//! Textured model renderer.
//!
//! - [`frame_manager`]: the per-frame acquire/submit/present protocol and
//!   swapchain recreation, independent of Vulkan
//! - [`renderer`]: the Vulkan backend driving that protocol
//! - [`ubo`]: per-frame uniform data

mod error;

pub mod depth_buffer;
pub mod frame;
pub mod frame_manager;
pub mod renderer;
pub mod ubo;

pub use error::{RendererError, RendererResult};
pub use frame_manager::{FrameManager, FrameStatus};
pub use renderer::Renderer;

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
