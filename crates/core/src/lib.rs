//! Shared plumbing for the viewer crates: TOML configuration, the error
//! type for the window and config layers, `tracing` setup and the
//! animation clock.

mod config;
mod error;
mod logging;
mod timer;

pub use config::{AssetConfig, Config, RendererConfig, Validation, WindowConfig};
pub use error::{Error, Result};
pub use logging::{DEFAULT_LOG_FILTER, init_logging};
pub use timer::Timer;
