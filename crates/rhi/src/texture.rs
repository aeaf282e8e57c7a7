//! Sampled textures uploaded from RGBA8 pixel data.
//!
//! ```no_run
//! use std::sync::Arc;
//! use night_rhi::command::CommandPool;
//! use night_rhi::device::Device;
//! use night_rhi::texture::Texture;
//!
//! # fn example(device: Arc<Device>, pool: &CommandPool) -> Result<(), night_rhi::RhiError> {
//! // A single opaque white texel.
//! let texture = Texture::from_rgba8(device, pool, 1, 1, &[255, 255, 255, 255])?;
//! let view = texture.view();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::buffer::Buffer;
use crate::command::CommandPool;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageDesc};

/// Format of every texture created by [`Texture::from_rgba8`].
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Shader-readable 2D texture.
///
/// Left in `SHADER_READ_ONLY_OPTIMAL` after upload.
pub struct Texture {
    /// Sampled image and its view.
    image: Image,
}

impl Texture {
    /// Uploads tightly packed RGBA8 `pixels` into a new texture.
    ///
    /// The pixels go through a staging buffer; the image is transitioned
    /// UNDEFINED -> TRANSFER_DST_OPTIMAL, filled, then transitioned to
    /// SHADER_READ_ONLY_OPTIMAL in one submission.
    ///
    /// # Errors
    ///
    /// Returns an error if `pixels` is not `width * height * 4` bytes or any
    /// Vulkan call fails.
    pub fn from_rgba8(
        device: Arc<Device>,
        pool: &CommandPool,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> RhiResult<Self> {
        let expected = expected_rgba8_len(width, height);
        if pixels.len() != expected {
            return Err(RhiError::InvalidHandle(format!(
                "Texture data is {} bytes, expected {} for {}x{} RGBA8",
                pixels.len(),
                expected,
                width,
                height
            )));
        }

        let staging = Buffer::staging(device.clone(), pixels)?;
        let image = Image::new(
            device,
            &ImageDesc {
                width,
                height,
                format: TEXTURE_FORMAT,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                name: "texture",
            },
        )?;

        let mut recorded = Ok(());
        pool.one_time_submit(|cmd| {
            recorded = image
                .record_transition(
                    cmd,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                )
                .map(|()| image.record_copy_from(cmd, &staging))
                .and_then(|()| {
                    image.record_transition(
                        cmd,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    )
                });
        })?;
        recorded?;

        info!("Texture uploaded: {}x{}", width, height);
        Ok(Self { image })
    }

    /// Returns the view bound at the fragment sampler binding.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }
}

fn expected_rgba8_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_rgba8_len() {
        assert_eq!(expected_rgba8_len(2, 3), 24);
        assert_eq!(expected_rgba8_len(0, 10), 0);
    }

    #[test]
    fn test_texture_format_is_srgb() {
        assert_eq!(TEXTURE_FORMAT, vk::Format::R8G8B8A8_SRGB);
    }
}
