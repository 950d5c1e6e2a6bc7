use crate::compositor::CompositeMode;
use image::Rgb;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const DEFAULT_BLUR_AMOUNT: i32 = 15;
pub const DEFAULT_EDGE_SMOOTHING: i32 = 3;
/// Green, packed as 0x00RRGGBB
pub const DEFAULT_REPLACEMENT_COLOR: u32 = 0x0000_FF00;

pub const BLUR_AMOUNT_RANGE: std::ops::RangeInclusive<i32> = 1..=50;
pub const EDGE_SMOOTHING_RANGE: std::ops::RangeInclusive<i32> = 1..=10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid threshold value: {0} (must be 0.0-1.0)")]
    Threshold(f32),

    #[error("invalid blur_amount: {0} (must be 1-50)")]
    BlurAmount(i32),

    #[error("invalid edge_smoothing: {0} (must be 1-10)")]
    EdgeSmoothing(i32),

    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Raw settings block as delivered by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub threshold: f32,
    pub blur_background: bool,
    pub blur_amount: i32,
    pub replace_background: bool,
    /// 24-bit RGB packed as 0x00RRGGBB; the top byte is ignored
    pub replacement_color: u32,
    pub smooth_edges: bool,
    pub edge_smoothing: i32,
    pub model_path: Option<PathBuf>,
    /// Expected hex SHA-256 of the model file
    pub model_sha256: Option<String>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            blur_background: false,
            blur_amount: DEFAULT_BLUR_AMOUNT,
            replace_background: true,
            replacement_color: DEFAULT_REPLACEMENT_COLOR,
            smooth_edges: true,
            edge_smoothing: DEFAULT_EDGE_SMOOTHING,
            model_path: None,
            model_sha256: None,
        }
    }
}

impl FilterSettings {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the bounded fields together
    ///
    /// The packed replacement colour is masked to 24 bits on use, so every
    /// value is acceptable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Threshold(self.threshold));
        }
        if !BLUR_AMOUNT_RANGE.contains(&self.blur_amount) {
            return Err(ConfigError::BlurAmount(self.blur_amount));
        }
        if !EDGE_SMOOTHING_RANGE.contains(&self.edge_smoothing) {
            return Err(ConfigError::EdgeSmoothing(self.edge_smoothing));
        }
        Ok(())
    }

    /// Set the replacement colour from a 0xRRGGBB value
    pub fn set_replacement_rgb(&mut self, rgb: u32) {
        self.replacement_color = rgb & 0x00FF_FFFF;
    }

    /// Validated configuration
    ///
    /// On any out-of-range value the numeric fields are replaced together by
    /// their defaults; flags and colour are kept.
    pub fn to_config(&self) -> FilterConfig {
        let (threshold, blur_amount, edge_smoothing) = match self.validate() {
            Ok(()) => (self.threshold, self.blur_amount, self.edge_smoothing),
            Err(err) => {
                tracing::error!("Invalid configuration values detected: {}", err);
                tracing::error!("Using safe defaults instead");
                (
                    DEFAULT_THRESHOLD,
                    DEFAULT_BLUR_AMOUNT,
                    DEFAULT_EDGE_SMOOTHING,
                )
            }
        };

        let [_, r, g, b] = self.replacement_color.to_be_bytes();
        FilterConfig {
            threshold,
            blur_background: self.blur_background,
            blur_amount: blur_amount.unsigned_abs(),
            replace_background: self.replace_background,
            replacement_color: Rgb([r, g, b]),
            smooth_edges: self.smooth_edges,
            edge_smoothing: edge_smoothing.unsigned_abs(),
        }
    }
}

/// Validated, read-only configuration used while processing frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    pub threshold: f32,
    pub blur_background: bool,
    pub blur_amount: u32,
    pub replace_background: bool,
    pub replacement_color: Rgb<u8>,
    pub smooth_edges: bool,
    pub edge_smoothing: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterSettings::default().to_config()
    }
}

impl FilterConfig {
    /// Replace wins over blur; with neither set the frame passes through
    pub fn composite_mode(&self) -> CompositeMode {
        if self.replace_background {
            CompositeMode::Replace(self.replacement_color)
        } else if self.blur_background {
            CompositeMode::Blur {
                amount: self.blur_amount,
            }
        } else {
            CompositeMode::Passthrough
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    fn with_values(threshold: f32, blur_amount: i32, edge_smoothing: i32) -> FilterSettings {
        FilterSettings {
            threshold,
            blur_amount,
            edge_smoothing,
            ..FilterSettings::default()
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(FilterSettings::default().validate().is_ok());
        let config = FilterConfig::default();
        assert_eq!(config.replacement_color, Rgb([0, 255, 0]));
        assert_eq!(config.composite_mode(), CompositeMode::Replace(Rgb([0, 255, 0])));
    }

    #[test]
    fn test_nan_threshold_rejected() {
        assert!(matches!(
            with_values(f32::NAN, 15, 3).validate(),
            Err(ConfigError::Threshold(_))
        ));
    }

    #[test]
    fn test_invalid_batch_replaced_wholesale() {
        let mut settings = with_values(0.8, 99, 5);
        settings.blur_background = true;
        settings.replace_background = false;
        let config = settings.to_config();

        // threshold and smoothing were valid but are reset with the batch
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.blur_amount, 15);
        assert_eq!(config.edge_smoothing, 3);
        assert!(config.blur_background);
        assert_eq!(config.composite_mode(), CompositeMode::Blur { amount: 15 });
    }

    #[test]
    fn test_replacement_color_unpacking() {
        let mut settings = FilterSettings::default();
        settings.set_replacement_rgb(0xFF0000);
        assert_eq!(settings.replacement_color, 0x00FF_0000);
        assert_eq!(settings.to_config().replacement_color, Rgb([255, 0, 0]));

        settings.set_replacement_rgb(0x12_3456);
        assert_eq!(settings.to_config().replacement_color, Rgb([0x12, 0x34, 0x56]));
    }

    #[test]
    fn test_replacement_color_is_rrggbb() {
        let settings = FilterSettings {
            replacement_color: 0x00FF_0000,
            ..FilterSettings::default()
        };
        assert_eq!(settings.to_config().replacement_color, Rgb([255, 0, 0]));

        // Top byte carries no colour
        let settings = FilterSettings {
            replacement_color: 0xFF00_00FF,
            ..FilterSettings::default()
        };
        assert_eq!(settings.to_config().replacement_color, Rgb([0, 0, 255]));
    }

    #[test]
    fn test_mode_priority() {
        let mut config = FilterConfig {
            replace_background: true,
            blur_background: true,
            ..FilterConfig::default()
        };
        assert!(matches!(config.composite_mode(), CompositeMode::Replace(_)));
        config.replace_background = false;
        assert!(matches!(config.composite_mode(), CompositeMode::Blur { .. }));
        config.blur_background = false;
        assert_eq!(config.composite_mode(), CompositeMode::Passthrough);
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "threshold = 0.7").unwrap();
        writeln!(file, "replace_background = false").unwrap();
        writeln!(file, "blur_background = true").unwrap();
        writeln!(file, "model_path = \"/opt/models/u2net.onnx\"").unwrap();

        let settings = FilterSettings::from_toml_file(file.path()).unwrap();
        assert_eq!(settings.threshold, 0.7);
        assert!(!settings.replace_background);
        assert_eq!(settings.blur_amount, DEFAULT_BLUR_AMOUNT);
        assert_eq!(
            settings.model_path.as_deref(),
            Some(Path::new("/opt/models/u2net.onnx"))
        );
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "threshold = \"high\"").unwrap();
        assert!(matches!(
            FilterSettings::from_toml_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_in_range_accepted(
            threshold in 0.0f32..=1.0,
            blur in 1i32..=50,
            smoothing in 1i32..=10,
        ) {
            let settings = with_values(threshold, blur, smoothing);
            prop_assert!(settings.validate().is_ok());
            let config = settings.to_config();
            prop_assert_eq!(config.threshold, threshold);
            prop_assert_eq!(config.blur_amount, blur as u32);
            prop_assert_eq!(config.edge_smoothing, smoothing as u32);
        }

        #[test]
        fn prop_out_of_range_falls_back_to_defaults(
            threshold in 0.0f32..=1.0,
            blur in 1i32..=50,
            smoothing in 1i32..=10,
            which in 0usize..3,
            offset in 1i32..1000,
        ) {
            let mut settings = with_values(threshold, blur, smoothing);
            match which {
                0 => settings.threshold = 1.0 + offset as f32 / 100.0,
                1 => settings.blur_amount = if offset % 2 == 0 { 50 + offset } else { 1 - offset },
                _ => settings.edge_smoothing = if offset % 2 == 0 { 10 + offset } else { 1 - offset },
            }
            prop_assert!(settings.validate().is_err());
            let config = settings.to_config();
            prop_assert_eq!(config.threshold, DEFAULT_THRESHOLD);
            prop_assert_eq!(config.blur_amount, DEFAULT_BLUR_AMOUNT as u32);
            prop_assert_eq!(config.edge_smoothing, DEFAULT_EDGE_SMOOTHING as u32);
        }
    }
}
