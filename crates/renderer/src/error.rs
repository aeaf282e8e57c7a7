//! Errors raised while building or driving the renderer.

use std::path::PathBuf;
use thiserror::Error;

use night_resources::ResourceError;
use night_rhi::RhiError;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Window or surface setup failed.
    #[error(transparent)]
    Platform(#[from] night_core::Error),

    /// The model produced no triangles, so there is nothing to draw.
    #[error("Model '{0}' contains no triangles")]
    EmptyModel(PathBuf),
}

impl RendererError {
    /// True when the GPU stopped making progress within the fence bound.
    pub fn is_fence_timeout(&self) -> bool {
        matches!(self, RendererError::Rhi(RhiError::FenceTimeout { .. }))
    }
}

pub type RendererResult<T> = Result<T, RendererError>;
