//! Error type shared by every wrapper in this crate.

use ash::vk;
use thiserror::Error;

/// Failures of the Vulkan layer. Raw driver codes pass through unchanged in
/// [`RhiError::VulkanError`] so callers can match on them.
#[derive(Error, Debug)]
pub enum RhiError {
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    #[error("GPU allocation failed: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// A thread panicked while holding the allocator lock.
    #[error("GPU allocator lock poisoned")]
    AllocatorPoisoned,

    /// No GPU passed the checks in [`crate::physical_device`].
    #[error("No GPU supports graphics, presentation and the swapchain")]
    NoSuitableGpu,

    /// No candidate format supports the requested features.
    #[error("None of {0} is supported")]
    NoSupportedFormat(String),

    /// Missing, unreadable or malformed SPIR-V; the message names the file.
    #[error("Shader error: {0}")]
    ShaderError(String),

    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Out-of-range index or otherwise unusable object.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// The pipeline builder lacks a required part.
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    #[error("Unsupported layout transition: {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },

    /// A frame fence did not signal within the configured bound.
    #[error("Fence wait timed out after {timeout_ns} ns")]
    FenceTimeout { timeout_ns: u64 },
}

pub type RhiResult<T> = std::result::Result<T, RhiError>;
