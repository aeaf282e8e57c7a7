//! Framebuffers binding swapchain views and the depth view to a render pass.
//!
//! Framebuffers reference image views they do not own, so they are rebuilt
//! whenever the swapchain or the depth buffer is. The owner drops the old
//! set before the views it points at.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use night_rhi::device::Device;
//! use night_rhi::framebuffer::create_framebuffers;
//!
//! # fn example(
//! #     device: Arc<Device>,
//! #     render_pass: vk::RenderPass,
//! #     color_views: &[vk::ImageView],
//! #     depth_view: vk::ImageView,
//! # ) -> Result<(), night_rhi::RhiError> {
//! let extent = vk::Extent2D { width: 800, height: 600 };
//! let framebuffers = create_framebuffers(&device, render_pass, color_views, depth_view, extent)?;
//! assert_eq!(framebuffers.len(), color_views.len());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan framebuffer wrapper.
pub struct Framebuffer {
    /// Device that created the framebuffer and outlives it.
    device: Arc<Device>,
    /// Vulkan framebuffer handle.
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// Creates a framebuffer with `[color_view, depth_view]` as attachments.
    ///
    /// # Arguments
    ///
    /// * `render_pass` - Pass whose attachment list the views match
    /// * `color_view` - One swapchain image view
    /// * `depth_view` - The shared depth view
    /// * `extent` - Size of both views
    ///
    /// # Errors
    ///
    /// Returns the driver's error when creation fails.
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        color_view: vk::ImageView,
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let attachments = [color_view, depth_view];

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        // SAFETY: both views and the render pass belong to this device and
        // are alive; `attachments` outlives the call.
        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };

        Ok(Self {
            device,
            framebuffer,
        })
    }

    /// Returns the Vulkan framebuffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        // SAFETY: created from this device and destroyed once; the owner
        // waits for the device to go idle before dropping framebuffers.
        unsafe {
            self.device
                .handle()
                .destroy_framebuffer(self.framebuffer, None);
        }
    }
}

/// One framebuffer per swapchain image, all sharing the same depth view.
///
/// Framebuffers created before a failure are dropped with the partial vector.
///
/// # Errors
///
/// Returns the first creation error.
pub fn create_framebuffers(
    device: &Arc<Device>,
    render_pass: vk::RenderPass,
    color_views: &[vk::ImageView],
    depth_view: vk::ImageView,
    extent: vk::Extent2D,
) -> RhiResult<Vec<Framebuffer>> {
    let framebuffers = color_views
        .iter()
        .map(|&view| Framebuffer::new(device.clone(), render_pass, view, depth_view, extent))
        .collect::<RhiResult<Vec<_>>>()?;

    debug!(
        "Created {} framebuffers ({}x{})",
        framebuffers.len(),
        extent.width,
        extent.height
    );

    Ok(framebuffers)
}
