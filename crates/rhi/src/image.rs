//! GPU images and image views.
//!
//! [`Image`] is a single-mip 2D image in GPU-only memory plus one view over
//! it. Textures and the depth buffer are both built on it. This module also
//! holds the format helpers used to pick a depth format and the barrier
//! parameters for the layout transitions the renderer performs.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use night_rhi::device::Device;
//! use night_rhi::image::{Image, ImageDesc, select_depth_format};
//!
//! # fn example(device: Arc<Device>) -> Result<(), night_rhi::RhiError> {
//! let format = select_depth_format(&device)?;
//! let depth = Image::new(
//!     device,
//!     &ImageDesc {
//!         width: 800,
//!         height: 600,
//!         format,
//!         usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
//!         name: "depth buffer",
//!     },
//! )?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::buffer::Buffer;
use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Returns the first candidate whose `tiling` supports all of `features`.
///
/// # Errors
///
/// Returns [`RhiError::NoSupportedFormat`] when no candidate qualifies.
pub fn find_supported_format(
    device: &Device,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> RhiResult<vk::Format> {
    pick_format(candidates, tiling, features, |format| {
        device.format_properties(format)
    })
}

/// Selects the depth attachment format for optimal tiling.
///
/// # Errors
///
/// [`RhiError::NoSupportedFormat`] when the GPU supports none of
/// [`DEPTH_FORMAT_CANDIDATES`].
pub fn select_depth_format(device: &Device) -> RhiResult<vk::Format> {
    let format = find_supported_format(
        device,
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )?;
    debug!("Selected depth format {:?}", format);
    Ok(format)
}

fn pick_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> RhiResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = properties(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| RhiError::NoSupportedFormat(format!("{:?}", candidates)))
}

/// True for depth formats that also carry a stencil component.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Aspect flags an image of `format` is accessed through.
pub fn aspect_flags_for(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM => vk::ImageAspectFlags::DEPTH,
        f if has_stencil_component(f) => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Access masks and pipeline stages of one layout transition barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Writes that must be made available before the transition.
    pub src_access: vk::AccessFlags,
    /// Accesses that wait for the transition.
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    /// Barrier parameters for `old -> new`.
    ///
    /// Supported transitions:
    /// - UNDEFINED -> TRANSFER_DST_OPTIMAL (before a staging copy)
    /// - TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL (after the copy)
    /// - UNDEFINED -> DEPTH_STENCIL_ATTACHMENT_OPTIMAL (fresh depth buffer)
    ///
    /// # Errors
    ///
    /// [`RhiError::UnsupportedLayoutTransition`] for any other pair.
    pub fn between(old: vk::ImageLayout, new: vk::ImageLayout) -> RhiResult<Self> {
        let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            ),
            (from, to) => return Err(RhiError::UnsupportedLayoutTransition { from, to }),
        };

        Ok(Self {
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        })
    }
}

/// Creation parameters for an [`Image`].
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    /// Width in texels, greater than zero.
    pub width: u32,
    /// Height in texels, greater than zero.
    pub height: u32,
    pub format: vk::Format,
    /// Usage flags. Memory is GPU-only regardless.
    pub usage: vk::ImageUsageFlags,
    /// Used in allocation debug output.
    pub name: &'static str,
}

/// 2D image with GPU-only memory and a view over its single mip level.
pub struct Image {
    /// Device that created the image and outlives it.
    device: Arc<Device>,
    /// Vulkan image handle.
    image: vk::Image,
    /// Null until construction reaches the view.
    view: vk::ImageView,
    /// `None` only after drop has freed it.
    allocation: Option<Allocation>,
    /// Picks the aspect used in barriers and the view.
    format: vk::Format,
    /// Copy size for staging uploads.
    extent: vk::Extent2D,
    /// Allocation and log name.
    name: &'static str,
}

impl Image {
    /// Creates the image, binds memory and creates the view.
    ///
    /// The image starts in `UNDEFINED` layout.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidHandle`] for a zero dimension; otherwise the first
    /// failed creation, allocation or bind. Anything created before the
    /// failure is released.
    pub fn new(device: Arc<Device>, desc: &ImageDesc) -> RhiResult<Self> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "{} dimensions must be greater than 0",
                desc.name
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        // SAFETY: both dimensions are non-zero and the create info is valid
        // for a single-mip optimal-tiling 2D image.
        let image = unsafe { device.handle().create_image(&image_info, None)? };
        // SAFETY: `image` was just created from this device.
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.lock_allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: desc.name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: `image` has no memory or view yet and is not used.
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        // Drop releases everything created so far if a later step fails.
        let mut result = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            format: desc.format,
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            name: desc.name,
        };

        if let Some(allocation) = result.allocation.as_ref() {
            // SAFETY: the allocation satisfies `requirements` and the image is
            // bound exactly once.
            unsafe {
                result.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(subresource_range(aspect_flags_for(desc.format)));

        // SAFETY: the image has memory bound and the range matches its one
        // mip level and layer.
        result.view = unsafe { result.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created {} image: {}x{} ({:?})",
            desc.name, desc.width, desc.height, desc.format
        );

        Ok(result)
    }

    /// Records a barrier moving the whole image from `old` to `new`.
    pub fn record_transition(
        &self,
        cmd: &CommandBuffer,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> RhiResult<()> {
        let transition = LayoutTransition::between(old, new)?;

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(subresource_range(aspect_flags_for(self.format)))
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access);

        cmd.pipeline_barrier(transition.src_stage, transition.dst_stage, &[barrier]);
        Ok(())
    }

    /// Records a copy of tightly packed texels from `src` into the image,
    /// which must be in `TRANSFER_DST_OPTIMAL`. `src` must hold at least
    /// `width * height` texels.
    pub fn record_copy_from(&self, cmd: &CommandBuffer, src: &Buffer) {
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            });

        cmd.copy_buffer_to_image(
            src.handle(),
            self.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }

    /// Returns the view over the whole image.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        // SAFETY: view and image were created from this device, are
        // destroyed once, and the device is idle when images are dropped.
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free {} allocation: {:?}", self.name, e);
                    }
                }
                Err(e) => error!("Leaking {} allocation: {}", self.name, e),
            }
        }

        debug!(
            "Destroyed {} image: {}x{}",
            self.name, self.extent.width, self.extent.height
        );
    }
}

fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect_mask)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimal(features: vk::FormatFeatureFlags) -> vk::FormatProperties {
        vk::FormatProperties {
            optimal_tiling_features: features,
            ..Default::default()
        }
    }

    #[test]
    fn test_pick_format_takes_first_supported() {
        let format = pick_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |f| {
                if f == vk::Format::D32_SFLOAT {
                    optimal(vk::FormatFeatureFlags::empty())
                } else {
                    optimal(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
                }
            },
        )
        .unwrap();
        assert_eq!(format, vk::Format::D32_SFLOAT_S8_UINT);
    }

    #[test]
    fn test_pick_format_respects_tiling() {
        let linear_only = |_| vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        let err = pick_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            linear_only,
        )
        .unwrap_err();
        assert!(matches!(err, RhiError::NoSupportedFormat(_)));

        let format = pick_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            linear_only,
        )
        .unwrap();
        assert_eq!(format, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_stencil_formats_add_stencil_aspect() {
        assert_eq!(
            aspect_flags_for(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_flags_for(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_flags_for(vk::Format::R8G8B8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn test_texture_upload_transitions() {
        let to_dst = LayoutTransition::between(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_dst.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_read = LayoutTransition::between(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_depth_transition_and_unsupported() {
        let depth = LayoutTransition::between(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(depth.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);

        let err = LayoutTransition::between(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::UNDEFINED,
        )
        .unwrap_err();
        assert!(matches!(err, RhiError::UnsupportedLayoutTransition { .. }));
    }
}
