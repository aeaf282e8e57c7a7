//! Pipeline layout and the single graphics pipeline.
//!
//! Fixed state: triangle lists, filled polygons, back-face culling with
//! counter-clockwise front faces, depth test and write with `LESS`, one
//! sample, no blending. Viewport and scissor are dynamic so the pipeline
//! survives swapchain recreation.
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use night_rhi::device::Device;
//! use night_rhi::pipeline::{GraphicsPipelineBuilder, PipelineLayout};
//! use night_rhi::render_pass::RenderPass;
//! use night_rhi::shader::{Shader, ShaderStage};
//! use night_rhi::vertex::Vertex;
//!
//! # fn example(device: Arc<Device>, render_pass: &RenderPass) -> Result<(), night_rhi::RhiError> {
//! let vert = Shader::from_spirv_file(device.clone(), Path::new("shaders/vert.spv"), ShaderStage::Vertex)?;
//! let frag = Shader::from_spirv_file(device.clone(), Path::new("shaders/frag.spv"), ShaderStage::Fragment)?;
//! let layout = PipelineLayout::new(device.clone(), &[])?;
//!
//! let pipeline = GraphicsPipelineBuilder::new()
//!     .vertex_shader(&vert)
//!     .fragment_shader(&frag)
//!     .vertex_binding(Vertex::binding_description())
//!     .vertex_attributes(&Vertex::attribute_descriptions())
//!     .render_pass(render_pass.handle(), 0)
//!     .build(device, &layout)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::Shader;

const DYNAMIC_STATES: [vk::DynamicState; 2] = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// Descriptor set layouts visible to a pipeline. No push constants.
pub struct PipelineLayout {
    /// Device that created the layout and outlives it.
    device: Arc<Device>,
    /// Vulkan pipeline layout handle.
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a layout over `set_layouts`, bound as sets `0..n` in order.
    ///
    /// # Errors
    ///
    /// Returns the driver's error when creation fails.
    pub fn new(device: Arc<Device>, set_layouts: &[vk::DescriptorSetLayout]) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
        // SAFETY: every set layout belongs to this device and is alive.
        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!("Pipeline layout over {} set layout(s)", set_layouts.len());
        Ok(Self { device, layout })
    }

    /// Returns the Vulkan pipeline layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        // SAFETY: created from this device and destroyed once, after the
        // pipeline that uses it.
        unsafe { self.device.handle().destroy_pipeline_layout(self.layout, None) };
    }
}

/// Graphics pipeline built by [`GraphicsPipelineBuilder::build`].
pub struct Pipeline {
    /// Device that created the pipeline and outlives it.
    device: Arc<Device>,
    /// Vulkan pipeline handle.
    pipeline: vk::Pipeline,
}

impl Pipeline {
    /// Returns the Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Always `GRAPHICS`.
    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        vk::PipelineBindPoint::GRAPHICS
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // SAFETY: created from this device and destroyed once; no command
        // buffer using it is pending after the device went idle.
        unsafe { self.device.handle().destroy_pipeline(self.pipeline, None) };
        info!("Graphics pipeline destroyed");
    }
}

/// Collects the variable parts of a graphics pipeline: shaders, vertex
/// layout and the render pass it runs in.
///
/// Everything else is fixed, see the module docs.
#[derive(Default)]
pub struct GraphicsPipelineBuilder<'a> {
    vertex_shader: Option<&'a Shader>,
    fragment_shader: Option<&'a Shader>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    /// Render pass handle and the subpass index within it.
    render_pass: Option<(vk::RenderPass, u32)>,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    /// An empty builder. Both shaders and the render pass are required.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_shader(mut self, shader: &'a Shader) -> Self {
        self.vertex_shader = Some(shader);
        self
    }

    pub fn fragment_shader(mut self, shader: &'a Shader) -> Self {
        self.fragment_shader = Some(shader);
        self
    }

    pub fn vertex_binding(mut self, binding: vk::VertexInputBindingDescription) -> Self {
        self.vertex_bindings.push(binding);
        self
    }

    pub fn vertex_attributes(mut self, attributes: &[vk::VertexInputAttributeDescription]) -> Self {
        self.vertex_attributes.extend_from_slice(attributes);
        self
    }

    pub fn render_pass(mut self, render_pass: vk::RenderPass, subpass: u32) -> Self {
        self.render_pass = Some((render_pass, subpass));
        self
    }

    /// Creates the pipeline against `layout`.
    ///
    /// # Errors
    ///
    /// [`RhiError::PipelineError`] when a shader stage or the render pass was
    /// never given; otherwise whatever the driver reports.
    pub fn build(self, device: Arc<Device>, layout: &PipelineLayout) -> RhiResult<Pipeline> {
        let (vertex_shader, fragment_shader, (render_pass, subpass)) = self.required()?;

        let stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = rasterization_state();
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = depth_stencil_state();
        let blend_attachments = [opaque_blend_attachment()];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout.handle())
            .render_pass(render_pass)
            .subpass(subpass);

        // SAFETY: the shaders, layout and render pass are alive and belong
        // to `device`; every state struct outlives the call.
        let pipeline = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, result)| result)?
        .pop()
        .ok_or_else(|| RhiError::PipelineError("driver returned no pipeline".to_string()))?;

        info!(
            "Graphics pipeline created with {} vertex attribute(s)",
            self.vertex_attributes.len()
        );
        Ok(Pipeline { device, pipeline })
    }

    fn required(&self) -> RhiResult<(&'a Shader, &'a Shader, (vk::RenderPass, u32))> {
        let missing = |what: &str| RhiError::PipelineError(format!("{what} is required"));

        let vertex = self.vertex_shader.ok_or_else(|| missing("a vertex shader"))?;
        let fragment = self
            .fragment_shader
            .ok_or_else(|| missing("a fragment shader"))?;
        let render_pass = self
            .render_pass
            .filter(|(handle, _)| *handle != vk::RenderPass::null())
            .ok_or_else(|| missing("a render pass"))?;

        Ok((vertex, fragment, render_pass))
    }
}

fn rasterization_state() -> vk::PipelineRasterizationStateCreateInfo<'static> {
    vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
}

fn depth_stencil_state() -> vk::PipelineDepthStencilStateCreateInfo<'static> {
    vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
}

fn opaque_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_state() {
        let raster = rasterization_state();
        assert_eq!(raster.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(raster.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(raster.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(raster.line_width, 1.0);

        let depth = depth_stencil_state();
        assert_eq!(depth.depth_test_enable, vk::TRUE);
        assert_eq!(depth.depth_write_enable, vk::TRUE);
        assert_eq!(depth.depth_compare_op, vk::CompareOp::LESS);
        assert_eq!(depth.stencil_test_enable, vk::FALSE);

        let blend = opaque_blend_attachment();
        assert_eq!(blend.blend_enable, vk::FALSE);
        assert_eq!(blend.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_viewport_and_scissor_are_dynamic() {
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::VIEWPORT));
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::SCISSOR));
    }

    #[test]
    fn test_missing_parts_are_reported() {
        let err = GraphicsPipelineBuilder::new().required().err();
        assert!(matches!(err, Some(RhiError::PipelineError(m)) if m.contains("vertex shader")));
    }
}
