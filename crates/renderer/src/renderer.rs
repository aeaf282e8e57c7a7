//! Vulkan renderer for a single textured, spinning model.
//!
//! [`Renderer`] pairs a [`FrameManager`] with [`GpuContext`], the
//! [`FrameBackend`] that owns every Vulkan object.

use std::mem::ManuallyDrop;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use night_core::{Config, Timer};
use night_platform::{Surface, Window};
use night_resources::{Model, TextureData};
use night_rhi::buffer::{Buffer, BufferUsage};
use night_rhi::command::CommandPool;
use night_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
use night_rhi::device::Device;
use night_rhi::framebuffer::{Framebuffer, create_framebuffers};
use night_rhi::image::select_depth_format;
use night_rhi::instance::Instance;
use night_rhi::physical_device::select_physical_device;
use night_rhi::pipeline::{GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use night_rhi::render_pass::{RenderPass, clear_values};
use night_rhi::sampler::{Sampler, SamplerDesc};
use night_rhi::shader::{Shader, ShaderStage};
use night_rhi::swapchain::Swapchain;
use night_rhi::texture::Texture;
use night_rhi::vertex::Vertex;
use night_rhi::{RhiError, RhiResult};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::depth_buffer::DepthBuffer;
use crate::error::{RendererError, RendererResult};
use crate::frame::FrameData;
use crate::frame_manager::{
    AcquireOutcome, FrameBackend, FrameManager, FrameStatus, PresentOutcome,
};
use crate::ubo::UniformBufferObject;

/// Renders the configured model every frame.
pub struct Renderer {
    frames: FrameManager,
    gpu: GpuContext,
}

impl Renderer {
    /// Builds every GPU resource for `window` and loads the configured assets.
    pub fn new(window: &Window, config: &Config) -> RendererResult<Self> {
        let gpu = GpuContext::new(window, config)?;
        let frames = FrameManager::new(
            MAX_FRAMES_IN_FLIGHT,
            config.renderer.fence_timeout_ns(),
            window.resize_signal(),
        );

        Ok(Self { frames, gpu })
    }

    /// Draws one frame at the window's current size.
    ///
    /// Errors are fatal; stale swapchains are handled internally.
    pub fn render_frame(&mut self, window: &Window) -> RendererResult<FrameStatus> {
        self.gpu.surface_size = window.framebuffer_size();
        Ok(self.frames.draw_frame(&mut self.gpu)?)
    }
}

/// Model geometry in GPU-only memory.
struct MeshBuffers {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

/// All Vulkan state, destroyed in reverse creation order after the device
/// has gone idle.
struct GpuContext {
    instance: ManuallyDrop<Instance>,
    surface: ManuallyDrop<Surface>,
    device: ManuallyDrop<Arc<Device>>,
    swapchain: ManuallyDrop<Swapchain>,
    render_pass: ManuallyDrop<RenderPass>,
    descriptor_set_layout: ManuallyDrop<DescriptorSetLayout>,
    pipeline_layout: ManuallyDrop<PipelineLayout>,
    pipeline: ManuallyDrop<Pipeline>,
    command_pool: ManuallyDrop<CommandPool>,
    depth_format: vk::Format,
    depth_buffer: Option<DepthBuffer>,
    framebuffers: Vec<Framebuffer>,
    texture: ManuallyDrop<Texture>,
    sampler: ManuallyDrop<Sampler>,
    mesh: ManuallyDrop<MeshBuffers>,
    descriptor_pool: ManuallyDrop<DescriptorPool>,
    frames: Vec<FrameData>,

    timer: Timer,
    surface_size: (u32, u32),
}

impl GpuContext {
    fn new(window: &Window, config: &Config) -> RendererResult<Self> {
        let (width, height) = window.framebuffer_size();
        info!("Initializing Vulkan renderer ({}x{})", width, height);

        let surface_extensions = window.required_extensions()?;
        let instance = Instance::new(config.renderer.validation.enabled(), &surface_extensions)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device_info)?;

        let swapchain = Swapchain::new(&instance, device.clone(), surface.handle(), width, height)?;

        let depth_format = select_depth_format(&device)?;
        let render_pass = RenderPass::new(device.clone(), swapchain.format(), depth_format)?;

        let bindings = [
            DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
            DescriptorBindingBuilder::combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT),
        ];
        let descriptor_set_layout = DescriptorSetLayout::new(device.clone(), &bindings)?;

        let pipeline_layout =
            PipelineLayout::new(device.clone(), &[descriptor_set_layout.handle()])?;
        let pipeline = Self::create_pipeline(
            &device,
            &render_pass,
            &pipeline_layout,
            &config.assets.vertex_shader,
            &config.assets.fragment_shader,
        )?;

        let (graphics_family, _) = device.queue_families().resolved()?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;

        let depth_buffer =
            DepthBuffer::new(device.clone(), &command_pool, depth_format, swapchain.extent())?;
        let framebuffers = create_framebuffers(
            &device,
            render_pass.handle(),
            swapchain.image_views(),
            depth_buffer.view(),
            swapchain.extent(),
        )?;

        let texture_data = TextureData::load(&config.assets.texture)?;
        let texture = Texture::from_rgba8(
            device.clone(),
            &command_pool,
            texture_data.width,
            texture_data.height,
            &texture_data.pixels,
        )?;
        let sampler = Sampler::new(device.clone(), &SamplerDesc::default())?;

        let mesh = Self::load_mesh(&device, &command_pool, &config.assets.model)?;

        let descriptor_pool =
            DescriptorPool::for_layout(device.clone(), &bindings, MAX_FRAMES_IN_FLIGHT as u32)?;
        let set_layouts = [descriptor_set_layout.handle(); MAX_FRAMES_IN_FLIGHT];
        let descriptor_sets = descriptor_pool.allocate(&set_layouts)?;

        let frames = descriptor_sets
            .into_iter()
            .map(|set| {
                FrameData::new(
                    device.clone(),
                    &command_pool,
                    set,
                    texture.view(),
                    sampler.handle(),
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;

        info!(
            "Renderer initialized: {} swapchain images, {} frames in flight, {} indices",
            swapchain.image_count(),
            frames.len(),
            mesh.index_count
        );

        Ok(Self {
            instance: ManuallyDrop::new(instance),
            surface: ManuallyDrop::new(surface),
            device: ManuallyDrop::new(device),
            swapchain: ManuallyDrop::new(swapchain),
            render_pass: ManuallyDrop::new(render_pass),
            descriptor_set_layout: ManuallyDrop::new(descriptor_set_layout),
            pipeline_layout: ManuallyDrop::new(pipeline_layout),
            pipeline: ManuallyDrop::new(pipeline),
            command_pool: ManuallyDrop::new(command_pool),
            depth_format,
            depth_buffer: Some(depth_buffer),
            framebuffers,
            texture: ManuallyDrop::new(texture),
            sampler: ManuallyDrop::new(sampler),
            mesh: ManuallyDrop::new(mesh),
            descriptor_pool: ManuallyDrop::new(descriptor_pool),
            frames,
            timer: Timer::new(),
            surface_size: (width, height),
        })
    }

    fn create_pipeline(
        device: &Arc<Device>,
        render_pass: &RenderPass,
        layout: &PipelineLayout,
        vertex_shader: &Path,
        fragment_shader: &Path,
    ) -> RhiResult<Pipeline> {
        let vert = Shader::from_spirv_file(device.clone(), vertex_shader, ShaderStage::Vertex)?;
        let frag = Shader::from_spirv_file(device.clone(), fragment_shader, ShaderStage::Fragment)?;

        // Shader modules can go once the pipeline exists.
        GraphicsPipelineBuilder::new()
            .vertex_shader(&vert)
            .fragment_shader(&frag)
            .vertex_binding(Vertex::binding_description())
            .vertex_attributes(&Vertex::attribute_descriptions())
            .render_pass(render_pass.handle(), 0)
            .build(device.clone(), layout)
    }

    fn load_mesh(
        device: &Arc<Device>,
        pool: &CommandPool,
        path: &Path,
    ) -> RendererResult<MeshBuffers> {
        let model = Model::load(path)?;
        if model.indices.is_empty() {
            return Err(RendererError::EmptyModel(path.to_path_buf()));
        }

        let vertices: Vec<Vertex> = model
            .vertices
            .iter()
            .map(|v| Vertex::new(v.position, v.color, v.tex_coord))
            .collect();

        let vertex_buffer = Buffer::device_local_with_data(
            device.clone(),
            pool,
            BufferUsage::Vertex,
            bytemuck::cast_slice(&vertices),
        )?;
        let index_buffer = Buffer::device_local_with_data(
            device.clone(),
            pool,
            BufferUsage::Index,
            bytemuck::cast_slice(&model.indices),
        )?;

        Ok(MeshBuffers {
            vertex_buffer,
            index_buffer,
            index_count: model.indices.len() as u32,
        })
    }

    fn frame(&self, slot: usize) -> RhiResult<&FrameData> {
        self.frames
            .get(slot)
            .ok_or_else(|| RhiError::InvalidHandle(format!("frame slot {} out of range", slot)))
    }
}

impl FrameBackend for GpuContext {
    fn wait_for_slot(&mut self, slot: usize, timeout_ns: u64) -> RhiResult<()> {
        self.frame(slot)?.sync().in_flight_fence().wait(timeout_ns)
    }

    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
        let semaphore = self.frame(slot)?.sync().image_available_handle();

        match self.swapchain.acquire_next_image(semaphore) {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.frame(slot)?.sync().in_flight_fence().reset()
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
        let frame = self.frame(slot)?;
        let framebuffer = self.framebuffers.get(image_index as usize).ok_or_else(|| {
            RhiError::InvalidHandle(format!("no framebuffer for image {}", image_index))
        })?;
        let extent = self.swapchain.extent();
        let cmd = frame.command_buffer();

        cmd.reset()?;
        cmd.begin()?;

        cmd.begin_render_pass(
            self.render_pass.handle(),
            framebuffer.handle(),
            extent,
            &clear_values(),
        );
        cmd.bind_pipeline(self.pipeline.bind_point(), self.pipeline.handle());
        cmd.set_viewport_and_scissor(extent);
        cmd.bind_vertex_buffer(self.mesh.vertex_buffer.handle());
        cmd.bind_index_buffer_u32(self.mesh.index_buffer.handle());
        cmd.bind_descriptor_set(
            self.pipeline.bind_point(),
            self.pipeline_layout.handle(),
            frame.descriptor_set(),
        );
        cmd.draw_indexed(self.mesh.index_count);

        cmd.end_render_pass();
        cmd.end()
    }

    fn update_frame_data(&mut self, slot: usize) -> RhiResult<()> {
        let extent = self.swapchain.extent();
        let ubo =
            UniformBufferObject::for_time(self.timer.elapsed_secs(), extent.width, extent.height);
        self.frame(slot)?.write_uniforms(&ubo)
    }

    fn submit(&mut self, slot: usize) -> RhiResult<()> {
        let frame = self.frame(slot)?;

        let wait_semaphores = [frame.sync().image_available_handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.sync().render_finished_handle()];
        let command_buffers = [frame.command_buffer().handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer was recorded in this frame, the fence
        // was reset after waiting on it and the acquire signals the semaphore.
        unsafe {
            self.device
                .submit_graphics(&[submit_info], frame.sync().in_flight_fence_handle())
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
        let wait_semaphore = self.frame(slot)?.sync().render_finished_handle();

        match self
            .swapchain
            .present(self.device.present_queue(), image_index, wait_semaphore)
        {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn surface_extent(&self) -> (u32, u32) {
        self.surface_size
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    fn rebuild_swapchain(&mut self, width: u32, height: u32) -> RhiResult<u32> {
        self.framebuffers.clear();
        self.depth_buffer = None;

        let image_count = self.swapchain.recreate(width, height)?;
        let extent = self.swapchain.extent();

        let depth_buffer =
            DepthBuffer::new(share(&self.device), &self.command_pool, self.depth_format, extent)?;
        self.framebuffers = create_framebuffers(
            &self.device,
            self.render_pass.handle(),
            self.swapchain.image_views(),
            depth_buffer.view(),
            extent,
        )?;
        self.depth_buffer = Some(depth_buffer);

        debug!(
            "Rebuilt depth buffer and {} framebuffers at {}x{}",
            self.framebuffers.len(),
            extent.width,
            extent.height
        );

        Ok(image_count)
    }

    fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }
}

/// A second owner of a device held in a `ManuallyDrop` slot.
///
/// Cloning the slot itself would produce another `ManuallyDrop`, not an
/// `Arc` that dependents can keep.
fn share<T>(held: &ManuallyDrop<Arc<T>>) -> Arc<T> {
    Arc::clone(&**held)
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        info!("Shutting down renderer...");

        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during shutdown: {:?}", e);
        }

        self.frames.clear();
        self.framebuffers.clear();
        self.depth_buffer = None;

        // SAFETY: each field is dropped exactly once, here, in reverse
        // creation order, after the device went idle. The device Arc goes
        // before the surface and instance, and every other holder of it has
        // been dropped by then.
        unsafe {
            ManuallyDrop::drop(&mut self.descriptor_pool);
            ManuallyDrop::drop(&mut self.mesh);
            ManuallyDrop::drop(&mut self.sampler);
            ManuallyDrop::drop(&mut self.texture);
            ManuallyDrop::drop(&mut self.command_pool);
            ManuallyDrop::drop(&mut self.pipeline);
            ManuallyDrop::drop(&mut self.pipeline_layout);
            ManuallyDrop::drop(&mut self.descriptor_set_layout);
            ManuallyDrop::drop(&mut self.render_pass);
            ManuallyDrop::drop(&mut self.swapchain);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Renderer shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_hands_out_a_counted_owner() {
        let mut held = ManuallyDrop::new(Arc::new(7u32));

        let shared = share(&held);
        assert_eq!(*shared, 7);
        assert_eq!(Arc::strong_count(&shared), 2);

        // SAFETY: `held` is not used after this.
        unsafe { ManuallyDrop::drop(&mut held) };
        assert_eq!(Arc::strong_count(&shared), 1);
    }
}
