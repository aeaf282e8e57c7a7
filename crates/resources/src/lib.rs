//! Asset loading for the viewer.
//!
//! - [`model`]: Wavefront OBJ meshes, de-indexed into a flat vertex list
//! - [`texture`]: image files decoded to tightly packed RGBA8

mod error;

pub mod model;
pub mod texture;

pub use error::{ResourceError, ResourceResult};
pub use model::{Model, ModelVertex};
pub use texture::TextureData;
