//! Texture samplers.
//!
//! [`SamplerDesc`] is plain data so the state can be tested without a GPU;
//! [`Sampler`] turns it into a Vulkan object.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Sampler state used for the model texture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    /// Filter when a texel covers more than a pixel.
    pub mag_filter: vk::Filter,
    /// Filter when a texel covers less than a pixel.
    pub min_filter: vk::Filter,
    /// Used for all of U, V and W.
    pub address_mode: vk::SamplerAddressMode,
    /// `None` disables anisotropic filtering.
    pub max_anisotropy: Option<f32>,
}

impl Default for SamplerDesc {
    /// Linear filtering, repeat addressing, no anisotropy.
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: None,
        }
    }
}

impl SamplerDesc {
    fn create_info(&self) -> vk::SamplerCreateInfo<'static> {
        vk::SamplerCreateInfo::default()
            .mag_filter(self.mag_filter)
            .min_filter(self.min_filter)
            .address_mode_u(self.address_mode)
            .address_mode_v(self.address_mode)
            .address_mode_w(self.address_mode)
            .anisotropy_enable(self.max_anisotropy.is_some())
            .max_anisotropy(self.max_anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0)
    }
}

/// Vulkan sampler wrapper.
pub struct Sampler {
    /// Device that created the sampler and outlives it.
    device: Arc<Device>,
    /// Vulkan sampler handle.
    sampler: vk::Sampler,
}

impl Sampler {
    /// Creates a sampler from `desc`.
    ///
    /// Anisotropy must have been enabled on the device when
    /// `desc.max_anisotropy` is set.
    ///
    /// # Errors
    ///
    /// Returns the driver's error when creation fails.
    pub fn new(device: Arc<Device>, desc: &SamplerDesc) -> RhiResult<Self> {
        // SAFETY: the create info is fully initialized and anisotropy is only
        // requested when the device enabled the feature.
        let sampler = unsafe { device.handle().create_sampler(&desc.create_info(), None)? };
        debug!("Created sampler ({:?}, {:?})", desc.mag_filter, desc.address_mode);
        Ok(Self { device, sampler })
    }

    /// Returns the Vulkan sampler handle.
    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        // SAFETY: created from this device and destroyed once, after the
        // device went idle.
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
        debug!("Destroyed sampler");
    }
}
