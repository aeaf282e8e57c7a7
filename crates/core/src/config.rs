//! Application configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! runnable configuration. Unknown keys are rejected to catch typos early.
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//!
//! [renderer]
//! validation = "off"
//! fence_timeout_ms = 2000
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::logging::DEFAULT_LOG_FILTER;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "triangle-night.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub window: WindowConfig,
    pub assets: AssetConfig,
    pub renderer: RendererConfig,
}

/// Initial window geometry and title.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "TriangleNight".to_string(),
        }
    }
}

/// Paths of the model, texture and SPIR-V shaders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetConfig {
    pub model: PathBuf,
    pub texture: PathBuf,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("assets/teapot.obj"),
            texture: PathBuf::from("assets/texture.jpg"),
            vertex_shader: PathBuf::from("shaders/vert.spv"),
            fragment_shader: PathBuf::from("shaders/frag.spv"),
        }
    }
}

/// Validation layer policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
    /// Enabled in debug builds only.
    #[default]
    Auto,
    On,
    Off,
}

impl Validation {
    /// Resolves the policy for the current build profile.
    pub fn enabled(self) -> bool {
        match self {
            Validation::Auto => cfg!(debug_assertions),
            Validation::On => true,
            Validation::Off => false,
        }
    }
}

/// Renderer behavior knobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    pub validation: Validation,
    /// Bound on the per-frame fence wait. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
    pub log_filter: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: Validation::Auto,
            fence_timeout_ms: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl RendererConfig {
    /// Fence wait timeout in nanoseconds, `u64::MAX` meaning infinite.
    pub fn fence_timeout_ns(&self) -> u64 {
        match self.fence_timeout_ms {
            Some(ms) => ms.saturating_mul(1_000_000),
            None => u64::MAX,
        }
    }
}

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(contents).map_err(|e| Error::Config(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&contents)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads `path` if given; otherwise [`DEFAULT_CONFIG_FILE`] when it
    /// exists, falling back to built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Self::load(default_path)
        } else {
            debug!("No {} found, using default configuration", DEFAULT_CONFIG_FILE);
            Ok(Self::default())
        }
    }

    /// Rejects values the renderer cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "Window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        if self.renderer.fence_timeout_ms == Some(0) {
            return Err(Error::Config(
                "fence_timeout_ms must be greater than 0 (omit it to wait forever)".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.assets.model, PathBuf::from("assets/teapot.obj"));
        assert_eq!(config.renderer.fence_timeout_ns(), u64::MAX);
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            title = "Teapot"

            [renderer]
            validation = "off"
            fence_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Teapot");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.renderer.validation, Validation::Off);
        assert!(!config.renderer.validation.enabled());
        assert_eq!(config.renderer.fence_timeout_ns(), 250_000_000);
        assert_eq!(config.assets, AssetConfig::default());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = Config::from_toml_str("[window]\nwidht = 10\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_window_size_is_rejected() {
        let err = Config::from_toml_str("[window]\nwidth = 0\n").unwrap_err();
        assert!(err.to_string().contains("non-zero"));
    }

    #[test]
    fn test_zero_fence_timeout_is_rejected() {
        let err = Config::from_toml_str("[renderer]\nfence_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let renderer = RendererConfig {
            fence_timeout_ms: Some(u64::MAX),
            ..Default::default()
        };
        assert_eq!(renderer.fence_timeout_ns(), u64::MAX);
    }

    #[test]
    fn test_validation_policy() {
        assert!(Validation::On.enabled());
        assert!(!Validation::Off.enabled());
        assert_eq!(Validation::Auto.enabled(), cfg!(debug_assertions));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[assets]\nmodel = \"models/cube.obj\"").unwrap();

        let config = Config::load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.assets.model, PathBuf::from("models/cube.obj"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Config::load_or_default(Some(&missing)),
            Err(Error::Config(_))
        ));
    }
}
