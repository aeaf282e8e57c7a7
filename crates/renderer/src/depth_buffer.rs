//! Depth attachment sized to the swapchain.
//!
//! The format is the first of [`DEPTH_FORMAT_CANDIDATES`] the device can use
//! as an optimal-tiling depth attachment. The image is moved to
//! `DEPTH_STENCIL_ATTACHMENT_OPTIMAL` right after creation and recreated
//! together with the swapchain.
//!
//! [`DEPTH_FORMAT_CANDIDATES`]: night_rhi::image::DEPTH_FORMAT_CANDIDATES

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use night_rhi::RhiResult;
use night_rhi::command::CommandPool;
use night_rhi::device::Device;
use night_rhi::image::{Image, ImageDesc};

/// Depth image and view.
pub struct DepthBuffer {
    /// GPU-only image in `DEPTH_STENCIL_ATTACHMENT_OPTIMAL`.
    image: Image,
}

impl DepthBuffer {
    /// Creates a depth buffer and transitions it for use as an attachment.
    ///
    /// Blocks until the transition has executed on the graphics queue.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `pool` - Pool for the one-time transition command buffer
    /// * `format` - A depth format the device supports, see
    ///   [`night_rhi::image::select_depth_format`]
    /// * `extent` - The swapchain extent
    ///
    /// # Errors
    ///
    /// Image creation, an unsupported transition or the submission.
    pub fn new(
        device: Arc<Device>,
        pool: &CommandPool,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let image = Image::new(
            device,
            &ImageDesc {
                width: extent.width,
                height: extent.height,
                format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                name: "depth_buffer",
            },
        )?;

        let mut recorded = Ok(());
        pool.one_time_submit(|cmd| {
            recorded = image.record_transition(
                cmd,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            );
        })?;
        recorded?;

        debug!(
            "Depth buffer ready: {}x{} ({:?})",
            extent.width, extent.height, format
        );

        Ok(Self { image })
    }

    /// Returns the view every framebuffer uses as attachment 1.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }
}
