//! Resources owned by one frame slot.
//!
//! There are [`crate::MAX_FRAMES_IN_FLIGHT`] slots. While the GPU works on
//! one, the CPU records the next, so each slot needs its own command buffer,
//! synchronization and uniform buffer.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use night_rhi::RhiResult;
use night_rhi::buffer::{Buffer, BufferUsage};
use night_rhi::command::{CommandBuffer, CommandPool};
use night_rhi::descriptor::DescriptorWriter;
use night_rhi::device::Device;
use night_rhi::sync::FrameSync;

use crate::ubo::UniformBufferObject;

/// Everything the GPU may still be reading while the slot is in flight.
///
/// Only touched after the slot's in-flight fence has been waited on.
/// Survives swapchain recreation.
pub struct FrameData {
    /// Re-recorded every time the slot is used.
    command_buffer: CommandBuffer,
    sync: FrameSync,
    /// Host-visible, holds one [`UniformBufferObject`].
    uniform_buffer: Buffer,
    /// Binding 0 is `uniform_buffer`, binding 1 the model texture. Freed
    /// with the descriptor pool.
    descriptor_set: vk::DescriptorSet,
}

impl FrameData {
    /// Creates the slot's command buffer, sync triple and uniform buffer and
    /// points `descriptor_set` at the uniform buffer and the texture.
    ///
    /// # Errors
    ///
    /// The first failed allocation or creation.
    pub fn new(
        device: Arc<Device>,
        pool: &CommandPool,
        descriptor_set: vk::DescriptorSet,
        texture_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> RhiResult<Self> {
        let command_buffer = pool.allocate_buffer()?;
        let sync = FrameSync::new(device.clone())?;
        let uniform_buffer = Buffer::new(
            device.clone(),
            BufferUsage::Uniform,
            UniformBufferObject::SIZE as vk::DeviceSize,
        )?;

        DescriptorWriter::new(descriptor_set)
            .uniform_buffer(
                0,
                uniform_buffer.handle(),
                UniformBufferObject::SIZE as vk::DeviceSize,
            )
            .combined_image_sampler(1, texture_view, sampler)
            .update(&device);

        debug!("Created frame slot resources");

        Ok(Self {
            command_buffer,
            sync,
            uniform_buffer,
            descriptor_set,
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn sync(&self) -> &FrameSync {
        &self.sync
    }

    #[inline]
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    /// Copies `ubo` into the slot's persistently mapped uniform buffer.
    ///
    /// Only valid after the slot's fence was waited on.
    pub fn write_uniforms(&self, ubo: &UniformBufferObject) -> RhiResult<()> {
        self.uniform_buffer.write_pod(ubo)
    }
}
