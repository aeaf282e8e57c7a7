//! Command pools and command buffer recording.
//!
//! Per-frame buffers come from [`CommandPool::allocate_buffer`] and are
//! re-recorded every frame. Uploads go through
//! [`CommandPool::one_time_submit`], which blocks until the GPU is done.
//!
//! The `cmd_*` wrappers on [`CommandBuffer`] may only be called between
//! [`CommandBuffer::begin`] and [`CommandBuffer::end`], and every handle they
//! take must come from the same device as the buffer.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use night_rhi::command::CommandPool;
//! use night_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>, src: vk::Buffer, dst: vk::Buffer) -> Result<(), night_rhi::RhiError> {
//! let (graphics_family, _) = device.queue_families().resolved()?;
//! let pool = CommandPool::new(device.clone(), graphics_family)?;
//!
//! pool.one_time_submit(|cmd| {
//!     let region = vk::BufferCopy::default().size(256);
//!     cmd.copy_buffer(src, dst, &[region]);
//! })?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Pool for one queue family, created with `RESET_COMMAND_BUFFER` so each
/// frame slot resets its own buffer.
///
/// # Thread Safety
///
/// Vulkan pools are externally synchronized. The pool is `Send` but is used
/// from the render thread only.
pub struct CommandPool {
    /// Device that created the pool and outlives it.
    device: Arc<Device>,
    /// Vulkan command pool handle.
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Creates a resettable pool for `queue_family_index`.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `queue_family_index` - Family whose queue will run the buffers
    ///
    /// # Errors
    ///
    /// Returns the driver's error when creation fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        // SAFETY: the family index was chosen from this device's families.
        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        debug!("Command pool for queue family {}", queue_family_index);
        Ok(Self { device, pool })
    }

    /// A primary buffer, freed with the pool.
    ///
    /// # Errors
    ///
    /// Returns the driver's error, or [`RhiError::InvalidHandle`] if the
    /// driver hands back no buffer.
    pub fn allocate_buffer(&self) -> RhiResult<CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        // SAFETY: the pool belongs to this device and is only used from the
        // render thread.
        let buffer = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? }
            .pop()
            .ok_or_else(|| RhiError::InvalidHandle("no command buffer allocated".to_string()))?;

        Ok(CommandBuffer {
            device: self.device.clone(),
            buffer,
        })
    }

    /// Records through `record`, submits to the graphics queue and waits for
    /// the queue to drain. Load-time only.
    ///
    /// # Errors
    ///
    /// Any recording, submission or wait failure. The temporary buffer is
    /// freed either way.
    pub fn one_time_submit<F>(&self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer),
    {
        let cmd = self.allocate_buffer()?;

        let result = (|| {
            cmd.begin_one_time()?;
            record(&cmd);
            cmd.end()?;

            let command_buffers = [cmd.buffer];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            // SAFETY: the buffer was just recorded and nothing waits on or
            // signals a semaphore.
            unsafe {
                self.device
                    .submit_graphics(&[submit_info], vk::Fence::null())?
            };
            self.device.graphics_queue_wait_idle()
        })();

        // SAFETY: the queue is idle or the submit never happened, so the
        // buffer is not pending.
        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool, &[cmd.buffer])
        };

        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // SAFETY: created from this device and destroyed once, after the
        // device went idle; its buffers are freed with it.
        unsafe { self.device.handle().destroy_command_pool(self.pool, None) };
        debug!("Command pool destroyed");
    }
}

/// Recording handle. The pool owns the underlying buffer.
pub struct CommandBuffer {
    /// Device whose function table records into the buffer.
    device: Arc<Device>,
    /// Vulkan command buffer handle, owned by the pool.
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Returns the Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Starts a recording that may be submitted more than once.
    pub fn begin(&self) -> RhiResult<()> {
        self.begin_with(vk::CommandBufferUsageFlags::empty())
    }

    /// Starts a recording that is submitted exactly once.
    pub fn begin_one_time(&self) -> RhiResult<()> {
        self.begin_with(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
    }

    fn begin_with(&self, flags: vk::CommandBufferUsageFlags) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        // SAFETY: the buffer is not pending; frame slots wait on their fence
        // before re-recording.
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?
        };
        Ok(())
    }

    /// Finishes the recording.
    pub fn end(&self) -> RhiResult<()> {
        // SAFETY: the buffer is recording and no render pass is open.
        unsafe { self.device.handle().end_command_buffer(self.buffer)? };
        Ok(())
    }

    /// Back to the initial state. Must not be pending execution.
    pub fn reset(&self) -> RhiResult<()> {
        // SAFETY: the pool was created with RESET_COMMAND_BUFFER and the
        // caller has waited for the slot's fence.
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    /// Begins `render_pass` on `framebuffer` over the whole extent.
    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(full_scissor(extent))
            .clear_values(clear_values);

        // SAFETY: recording; the framebuffer was built for this render pass.
        unsafe {
            self.device.handle().cmd_begin_render_pass(
                self.buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            )
        };
    }

    pub fn end_render_pass(&self) {
        // SAFETY: recording inside a render pass begun on this buffer.
        unsafe { self.device.handle().cmd_end_render_pass(self.buffer) };
    }

    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        // SAFETY: recording; the pipeline belongs to this device.
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(self.buffer, bind_point, pipeline)
        };
    }

    /// Binds `buffer` at binding 0, offset 0.
    pub fn bind_vertex_buffer(&self, buffer: vk::Buffer) {
        // SAFETY: recording; the buffer has VERTEX_BUFFER usage.
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.buffer, 0, &[buffer], &[0])
        };
    }

    /// Binds a `u32` index buffer at offset 0.
    pub fn bind_index_buffer_u32(&self, buffer: vk::Buffer) {
        // SAFETY: recording; the buffer has INDEX_BUFFER usage.
        unsafe {
            self.device.handle().cmd_bind_index_buffer(
                self.buffer,
                buffer,
                0,
                vk::IndexType::UINT32,
            )
        };
    }

    /// Binds `set` as set 0 of `layout`.
    pub fn bind_descriptor_set(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        // SAFETY: recording; the set was allocated with the layout's set 0.
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                bind_point,
                layout,
                0,
                &[set],
                &[],
            )
        };
    }

    /// Dynamic viewport and scissor covering `extent`.
    pub fn set_viewport_and_scissor(&self, extent: vk::Extent2D) {
        // SAFETY: recording; the bound pipeline declares both states dynamic.
        unsafe {
            let device = self.device.handle();
            device.cmd_set_viewport(self.buffer, 0, &[full_viewport(extent)]);
            device.cmd_set_scissor(self.buffer, 0, &[full_scissor(extent)]);
        }
    }

    /// One instance of `index_count` indices from the bound index buffer.
    pub fn draw_indexed(&self, index_count: u32) {
        // SAFETY: recording inside a render pass with pipeline, vertex and
        // index buffers bound.
        unsafe {
            self.device
                .handle()
                .cmd_draw_indexed(self.buffer, index_count, 1, 0, 0, 0)
        };
    }

    /// Image memory barriers only.
    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    ) {
        // SAFETY: recording outside a render pass; the barriers name images
        // of this device.
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            )
        };
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        // SAFETY: recording; the regions lie inside both buffers.
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, regions)
        };
    }

    /// Copies `src` into `dst`, which must already be in `dst_layout`.
    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        // SAFETY: recording; `dst` has been transitioned to `dst_layout`.
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer_to_image(self.buffer, src, dst, dst_layout, regions)
        };
    }
}

/// Viewport over `extent` with the full 0..1 depth range.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Rectangle over the whole of `extent`.
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }
}
