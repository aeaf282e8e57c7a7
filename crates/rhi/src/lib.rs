//! RAII wrappers over `ash` for the viewer's Vulkan objects.
//!
//! Every wrapper holds an `Arc<Device>` (or the [`instance::Instance`]) and
//! destroys its handle on drop, so owners only have to drop in reverse
//! creation order. Memory comes from the `gpu-allocator` owned by
//! [`device::Device`].

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod framebuffer;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod vertex;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
