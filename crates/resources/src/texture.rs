//! Texture image loading.

use std::path::Path;

use tracing::info;

use crate::error::{ResourceError, ResourceResult};

/// Decoded image, 4 bytes per pixel, rows top to bottom.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Decodes any supported image file and converts it to RGBA8.
    pub fn load(path: &Path) -> ResourceResult<Self> {
        let image = image::open(path).map_err(|source| match source {
            image::ImageError::IoError(source) => ResourceError::Io {
                path: path.to_path_buf(),
                source,
            },
            source => ResourceError::Image {
                path: path.to_path_buf(),
                source,
            },
        })?;

        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(ResourceError::EmptyImage(path.to_path_buf()));
        }

        info!("Loaded texture {} ({}x{})", path.display(), width, height);

        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}
