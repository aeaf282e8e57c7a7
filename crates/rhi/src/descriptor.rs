//! Descriptor set layouts, pools and writes.
//!
//! The renderer uses one layout: a uniform buffer at binding 0 for the
//! vertex stage and a combined image sampler at binding 1 for the fragment
//! stage. Each frame slot gets its own set from a pool sized for exactly
//! that many sets.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use ash::vk;
//! # use night_rhi::device::Device;
//! use night_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout, DescriptorWriter};
//!
//! # fn example(device: Arc<Device>, ubo: vk::Buffer, view: vk::ImageView, sampler: vk::Sampler)
//! #     -> Result<(), night_rhi::RhiError> {
//! let bindings = [
//!     DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
//!     DescriptorBindingBuilder::combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT),
//! ];
//! let layout = DescriptorSetLayout::new(device.clone(), &bindings)?;
//! let pool = DescriptorPool::for_layout(device.clone(), &bindings, 2)?;
//!
//! for set in pool.allocate(&[layout.handle(); 2])? {
//!     DescriptorWriter::new(set)
//!         .uniform_buffer(0, ubo, 192)
//!         .combined_image_sampler(1, view, sampler)
//!         .update(&device);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    /// Device that created the layout and outlives it.
    device: Arc<Device>,
    /// Vulkan descriptor set layout handle.
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Creates a layout from `bindings`, usually built with
    /// [`DescriptorBindingBuilder`].
    ///
    /// # Errors
    ///
    /// Returns the driver's error when creation fails.
    pub fn new(device: Arc<Device>, bindings: &[vk::DescriptorSetLayoutBinding]) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        // SAFETY: binding numbers are unique and `bindings` outlives the call.
        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!("Descriptor set layout with {} binding(s)", bindings.len());
        Ok(Self { device, layout })
    }

    /// Returns the Vulkan descriptor set layout handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        // SAFETY: created from this device and destroyed once, after the
        // pipeline layout that references it.
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None)
        };
    }
}

/// Fixed-size pool. Sets are never freed one by one; they go with the pool.
pub struct DescriptorPool {
    /// Device that created the pool and outlives it.
    device: Arc<Device>,
    /// Vulkan descriptor pool handle.
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Room for exactly `set_count` sets of the layout made from `bindings`.
    ///
    /// # Errors
    ///
    /// Returns the driver's error when creation fails.
    pub fn for_layout(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
        set_count: u32,
    ) -> RhiResult<Self> {
        let pool_sizes = pool_sizes_for(bindings, set_count);
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(set_count)
            .pool_sizes(&pool_sizes);

        // SAFETY: `pool_sizes` is non-empty for a non-empty layout and
        // outlives the call.
        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!("Descriptor pool for {} set(s)", set_count);
        Ok(Self { device, pool })
    }

    /// One set per entry of `layouts`.
    ///
    /// # Errors
    ///
    /// `ERROR_OUT_OF_POOL_MEMORY` when more sets are requested than the
    /// pool was sized for.
    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> RhiResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        // SAFETY: the pool and every layout belong to this device.
        Ok(unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? })
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        // SAFETY: created from this device and destroyed once, which also
        // frees its sets; no command buffer using them is pending.
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None)
        };
    }
}

/// Pool sizes for `set_count` sets, one entry per descriptor type in order
/// of first appearance.
pub fn pool_sizes_for(
    bindings: &[vk::DescriptorSetLayoutBinding],
    set_count: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in bindings {
        let count = binding.descriptor_count * set_count;
        match sizes.iter_mut().find(|s| s.ty == binding.descriptor_type) {
            Some(size) => size.descriptor_count += count,
            None => sizes.push(vk::DescriptorPoolSize {
                ty: binding.descriptor_type,
                descriptor_count: count,
            }),
        }
    }
    sizes
}

/// Single-descriptor layout bindings.
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    /// One uniform buffer at `binding`, visible to `stages`.
    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stages: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::single(binding, vk::DescriptorType::UNIFORM_BUFFER, stages)
    }

    /// One sampled image at `binding`, visible to `stages`.
    #[inline]
    pub fn combined_image_sampler(
        binding: u32,
        stages: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::single(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stages)
    }

    fn single(
        binding: u32,
        ty: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(ty)
            .descriptor_count(1)
            .stage_flags(stages)
    }
}

/// Collects the resources of one descriptor set and writes them in a
/// single `vkUpdateDescriptorSets` call.
pub struct DescriptorWriter {
    /// Destination of every write.
    set: vk::DescriptorSet,
    buffers: Vec<(u32, vk::DescriptorBufferInfo)>,
    images: Vec<(u32, vk::DescriptorImageInfo)>,
}

impl DescriptorWriter {
    /// A writer with nothing queued for `set`.
    pub fn new(set: vk::DescriptorSet) -> Self {
        Self {
            set,
            buffers: Vec::new(),
            images: Vec::new(),
        }
    }

    /// The first `range` bytes of `buffer` at `binding`.
    pub fn uniform_buffer(mut self, binding: u32, buffer: vk::Buffer, range: vk::DeviceSize) -> Self {
        self.buffers.push((
            binding,
            vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range,
            },
        ));
        self
    }

    /// `view` in SHADER_READ_ONLY_OPTIMAL, sampled through `sampler`.
    pub fn combined_image_sampler(
        mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Self {
        self.images.push((
            binding,
            vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        ));
        self
    }

    /// Buffer writes first, then image writes, each in insertion order.
    pub fn writes(&self) -> Vec<vk::WriteDescriptorSet<'_>> {
        let buffer_writes = self.buffers.iter().map(|(binding, info)| {
            vk::WriteDescriptorSet::default()
                .dst_set(self.set)
                .dst_binding(*binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(std::slice::from_ref(info))
        });
        let image_writes = self.images.iter().map(|(binding, info)| {
            vk::WriteDescriptorSet::default()
                .dst_set(self.set)
                .dst_binding(*binding)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(std::slice::from_ref(info))
        });

        buffer_writes.chain(image_writes).collect()
    }

    /// The set must not be in use by pending command buffers.
    pub fn update(&self, device: &Device) {
        let writes = self.writes();
        if writes.is_empty() {
            return;
        }
        // SAFETY: every queued handle belongs to `device` and the info
        // structs live in `self` until the call returns.
        unsafe { device.handle().update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
        [
            DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
            DescriptorBindingBuilder::combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT),
        ]
    }

    #[test]
    fn test_binding_builder() {
        let [ubo, sampler] = frame_bindings();

        assert_eq!(ubo.binding, 0);
        assert_eq!(ubo.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(ubo.descriptor_count, 1);
        assert_eq!(ubo.stage_flags, vk::ShaderStageFlags::VERTEX);

        assert_eq!(sampler.binding, 1);
        assert_eq!(
            sampler.descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(sampler.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_pool_sizes_cover_every_set() {
        let sizes = pool_sizes_for(&frame_bindings(), 2);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 2);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 2);
    }

    #[test]
    fn test_pool_sizes_merge_same_type() {
        let bindings = [
            DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
            DescriptorBindingBuilder::uniform_buffer(1, vk::ShaderStageFlags::FRAGMENT),
        ];
        let sizes = pool_sizes_for(&bindings, 3);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].descriptor_count, 6);
    }

    #[test]
    fn test_writer_emits_one_write_per_binding() {
        let writer = DescriptorWriter::new(vk::DescriptorSet::null())
            .combined_image_sampler(1, vk::ImageView::null(), vk::Sampler::null())
            .uniform_buffer(0, vk::Buffer::null(), 192);

        let writes = writer.writes();
        assert_eq!(writes.len(), 2);

        assert_eq!(writes[0].dst_binding, 0);
        assert_eq!(writes[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(writes[0].descriptor_count, 1);
        assert_eq!(writer.buffers[0].1.range, 192);

        assert_eq!(writes[1].dst_binding, 1);
        assert_eq!(
            writes[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(
            writer.images[0].1.image_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_empty_writer_has_no_writes() {
        assert!(DescriptorWriter::new(vk::DescriptorSet::null()).writes().is_empty());
    }
}
