//! TOML configuration.
//!
//! Every field has a default, so a partial file (or no file at all) yields a
//! usable [`Config`].
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//!
//! [gpu]
//! validation = true
//! present_mode = "mailbox"
//! frame_timeout_ms = 2000
//!
//! [render]
//! clear_color = [0.1, 0.1, 0.15, 1.0]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Window settings.
    pub window: WindowConfig,
    /// GPU and presentation settings.
    pub gpu: GpuConfig,
    /// Per-frame rendering settings.
    pub render: RenderConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Config {
    /// Parses a configuration from TOML text.
    ///
    /// `origin` is only used for error reporting.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Config`]
    /// if it is not valid TOML for this schema.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text, path)
    }

    /// Loads a configuration file, returning defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

/// Window settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Initial client width in pixels.
    pub width: u32,
    /// Initial client height in pixels.
    pub height: u32,
    /// Window title.
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "cadence".to_string(),
        }
    }
}

/// Preferred presentation mode. Falls back to FIFO when unsupported.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    /// Low-latency, non-blocking, no tearing.
    #[default]
    Mailbox,
    /// Vsync; always available.
    Fifo,
    /// No vsync, may tear.
    Immediate,
    /// Vsync that tears when late.
    FifoRelaxed,
}

impl std::str::FromStr for PresentModePreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mailbox" => Ok(Self::Mailbox),
            "fifo" => Ok(Self::Fifo),
            "immediate" => Ok(Self::Immediate),
            "fifo_relaxed" => Ok(Self::FifoRelaxed),
            other => Err(format!(
                "unknown present mode '{other}' (expected mailbox, fifo, immediate, fifo_relaxed)"
            )),
        }
    }
}

/// GPU and presentation settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GpuConfig {
    /// Enables the Khronos validation layer when available.
    pub validation: bool,
    /// Preferred present mode.
    pub present_mode: PresentModePreference,
    /// Upper bound for fence and acquire waits. `None` waits forever.
    pub frame_timeout_ms: Option<u64>,
    /// Maximum number of descriptor sets in the shared descriptor pool.
    pub descriptor_pool_max_sets: u32,
}

impl GpuConfig {
    /// Returns the wait timeout in nanoseconds, as Vulkan expects it.
    pub fn frame_timeout_ns(&self) -> u64 {
        match self.frame_timeout_ms {
            Some(ms) => Duration::from_millis(ms)
                .as_nanos()
                .try_into()
                .unwrap_or(u64::MAX),
            None => u64::MAX,
        }
    }
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            present_mode: PresentModePreference::Mailbox,
            frame_timeout_ms: None,
            descriptor_pool_max_sets: 64,
        }
    }
}

/// Per-frame rendering settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Color the frame is cleared to.
    pub clear_color: [f32; 4],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.1, 0.1, 0.15, 1.0],
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: crate::logging::DEFAULT_FILTER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("", Path::new("empty.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.gpu.present_mode, PresentModePreference::Mailbox);
        assert_eq!(config.gpu.frame_timeout_ns(), u64::MAX);
    }

    #[test]
    fn test_partial_config() {
        let text = r#"
            [window]
            width = 800

            [gpu]
            present_mode = "fifo_relaxed"
            frame_timeout_ms = 250
        "#;
        let config = Config::from_toml_str(text, Path::new("partial.toml")).unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.gpu.present_mode, PresentModePreference::FifoRelaxed);
        assert_eq!(config.gpu.frame_timeout_ns(), 250_000_000);
    }

    #[test]
    fn test_invalid_config_reports_path() {
        let err = Config::from_toml_str("[gpu]\npresent_mode = \"vsync\"", Path::new("bad.toml"))
            .unwrap_err();
        match err {
            Error::Config { path, .. } => assert_eq!(path, Path::new("bad.toml")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = Path::new("definitely/not/here/cadence.toml");
        assert_eq!(Config::load_or_default(path).unwrap(), Config::default());
    }

    #[test]
    fn test_present_mode_from_str() {
        assert_eq!("fifo".parse(), Ok(PresentModePreference::Fifo));
        assert_eq!("immediate".parse(), Ok(PresentModePreference::Immediate));
        assert!("vsync".parse::<PresentModePreference>().is_err());
    }
}
