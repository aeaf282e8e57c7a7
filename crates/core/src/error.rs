//! Errors for setup that happens before any GPU object exists.
//!
//! The GPU layers have their own error types; the renderer wraps this one
//! when window or surface creation fails.

use thiserror::Error;

/// Errors raised before the GPU is involved: configuration and the window.
#[derive(Error, Debug)]
pub enum Error {
    /// The config file is unreadable or not valid TOML for [`crate::Config`].
    #[error("Config error: {0}")]
    Config(String),

    /// winit refused to create the window.
    #[error("Window error: {0}")]
    Window(String),

    /// The window system could not provide a Vulkan surface.
    #[error("Surface error: {0}")]
    Surface(String),
}

pub type Result<T> = std::result::Result<T, Error>;
