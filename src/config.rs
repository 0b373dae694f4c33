// src/config.rs

//! Runtime configuration.
//!
//! Options mirror what the presentation engine needs to bring up a display:
//! which device/connector to drive, which timing mode to request, the swap
//! chain pixel format and layout modifier, and the loop behavior knobs.
//!
//! Configuration is resolved in three layers, later layers winning:
//! built-in defaults, an optional JSON file (`KMS_FLIP_CONFIG`), then
//! individual `KMS_FLIP_*` environment variables. There is no global
//! config singleton; `main` builds one value and passes it down.

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Pixel formats the swap chain can be allocated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 32-bit with alpha.
    Argb8888,
    /// 32-bit, alpha byte ignored.
    Xrgb8888,
}

impl PixelFormat {
    pub fn gbm(self) -> gbm::Format {
        match self {
            PixelFormat::Argb8888 => gbm::Format::Argb8888,
            PixelFormat::Xrgb8888 => gbm::Format::Xrgb8888,
        }
    }

    /// The fourcc code, as EGL reports it through `NATIVE_VISUAL_ID`.
    pub fn fourcc(self) -> u32 {
        self.gbm() as u32
    }

    /// Whether the format carries an alpha channel worth requesting from EGL.
    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Argb8888)
    }
}

/// Linear (untiled) buffer layout, the default modifier request.
pub const MODIFIER_LINEAR: u64 = 0;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Explicit DRM device node. `None` probes `/dev/dri/card*` in order.
    pub device: Option<PathBuf>,
    /// Explicit connector index into the device's connector list.
    pub connector: Option<usize>,
    /// Requested mode name, e.g. "1920x1080".
    pub mode: Option<String>,
    /// Requested refresh rate in Hz; 0 accepts any rate for a named mode.
    pub vrefresh: u32,
    /// Swap chain pixel format.
    pub format: PixelFormat,
    /// Requested buffer layout modifier (raw 64-bit token).
    pub modifier: u64,
    /// Multisample count passed to EGL config selection.
    pub samples: u32,
    /// Total frames to present before stopping.
    pub count: u64,
    /// When set, stdin readability does not stop the loop.
    pub ignore_input: bool,
    /// Present via synchronous modesets instead of page flips.
    pub mode_set_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device: None,
            connector: None,
            mode: None,
            vrefresh: 0,
            format: PixelFormat::Argb8888,
            modifier: MODIFIER_LINEAR,
            samples: 0,
            count: 500,
            ignore_input: false,
            mode_set_only: false,
        }
    }
}

impl Config {
    /// Resolves the effective configuration from file and environment.
    pub fn load() -> Result<Self> {
        let mut config = match env::var_os("KMS_FLIP_CONFIG") {
            Some(path) => {
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {:?}", path))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse config file {:?}", path))?
            }
            None => Config::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Applies `KMS_FLIP_*` environment overrides on top of `self`.
    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env::var_os("KMS_FLIP_DEVICE") {
            self.device = Some(PathBuf::from(path));
        }
        if let Ok(idx) = env::var("KMS_FLIP_CONNECTOR") {
            self.connector = Some(idx.parse().context("KMS_FLIP_CONNECTOR must be an index")?);
        }
        if let Ok(name) = env::var("KMS_FLIP_MODE") {
            if !name.is_empty() {
                self.mode = Some(name);
            }
        }
        if let Ok(rate) = env::var("KMS_FLIP_VREFRESH") {
            self.vrefresh = rate.parse().context("KMS_FLIP_VREFRESH must be in Hz")?;
        }
        if let Ok(count) = env::var("KMS_FLIP_COUNT") {
            self.count = count.parse().context("KMS_FLIP_COUNT must be a frame count")?;
        }
        if let Ok(modifier) = env::var("KMS_FLIP_MODIFIER") {
            self.modifier = modifier
                .parse()
                .context("KMS_FLIP_MODIFIER must be a raw modifier token")?;
        }
        if env::var_os("KMS_FLIP_IGNORE_INPUT").is_some() {
            self.ignore_input = true;
        }
        if env::var_os("KMS_FLIP_MODE_SET_ONLY").is_some() {
            self.mode_set_only = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_demo_expectations() {
        let config = Config::default();
        assert_eq!(config.count, 500);
        assert_eq!(config.format, PixelFormat::Argb8888);
        assert_eq!(config.modifier, MODIFIER_LINEAR);
        assert!(config.device.is_none());
        assert!(!config.mode_set_only);
    }

    #[test]
    fn parses_json_config() {
        let text = r#"{
            "device": "/dev/dri/card1",
            "mode": "1920x1080",
            "vrefresh": 60,
            "format": "xrgb8888",
            "count": 10
        }"#;
        let config: Config = serde_json::from_str(text).unwrap();
        assert_eq!(config.device, Some(PathBuf::from("/dev/dri/card1")));
        assert_eq!(config.mode.as_deref(), Some("1920x1080"));
        assert_eq!(config.vrefresh, 60);
        assert_eq!(config.format, PixelFormat::Xrgb8888);
        assert_eq!(config.count, 10);
        // Unset fields keep their defaults.
        assert_eq!(config.modifier, MODIFIER_LINEAR);
        assert!(!config.ignore_input);
    }

    #[test]
    fn fourcc_matches_drm_codes() {
        // 'AR24' / 'XR24' little-endian fourcc values.
        assert_eq!(PixelFormat::Argb8888.fourcc(), 0x3432_5241);
        assert_eq!(PixelFormat::Xrgb8888.fourcc(), 0x3432_5258);
    }
}
