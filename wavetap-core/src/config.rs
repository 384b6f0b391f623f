use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::peaks::{NormalizeRange, PeakParams, PeaksFormat};
use crate::probe::ProbeMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Workspace-level configuration. Always an explicit value threaded into
/// requests; there is no process-global configuration state.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WavetapConfig {
    #[serde(default)]
    pub binaries: BinariesSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub peaks: PeaksSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinariesSection {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

impl Default for BinariesSection {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSection {
    /// Wall-clock bound for one transcoder run.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Fail runs whose probe fails instead of assuming stereo 44.1 kHz.
    #[serde(default)]
    pub strict_probe: bool,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            strict_probe: false,
        }
    }
}

impl ExecutionSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn probe_mode(&self) -> ProbeMode {
        if self.strict_probe {
            ProbeMode::Strict
        } else {
            ProbeMode::Lenient
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeaksSection {
    #[serde(default = "default_samples_per_pixel")]
    pub samples_per_pixel: usize,
    /// Optional `[low, high]` target range; raw 16-bit values when absent.
    #[serde(default)]
    pub normalize_range: Option<NormalizeRange>,
    #[serde(default = "default_peaks_format")]
    pub format: PeaksFormat,
}

impl Default for PeaksSection {
    fn default() -> Self {
        Self {
            samples_per_pixel: default_samples_per_pixel(),
            normalize_range: None,
            format: default_peaks_format(),
        }
    }
}

impl PeaksSection {
    pub fn params(&self) -> PeakParams {
        PeakParams {
            samples_per_pixel: self.samples_per_pixel,
            normalize_range: self.normalize_range,
        }
    }
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_timeout_seconds() -> u64 {
    3600
}

fn default_samples_per_pixel() -> usize {
    512
}

fn default_peaks_format() -> PeaksFormat {
    PeaksFormat::Simple
}

pub fn load_wavetap_config<P: AsRef<Path>>(path: P) -> Result<WavetapConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/wavetap.toml");
        let config = load_wavetap_config(path).expect("config should parse");
        assert_eq!(config.binaries.ffmpeg, "ffmpeg");
        assert_eq!(config.execution.timeout_seconds, 3600);
        assert_eq!(config.peaks.samples_per_pixel, 512);
        assert_eq!(config.peaks.format, PeaksFormat::Simple);
        assert_eq!(config.execution.probe_mode(), ProbeMode::Lenient);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: WavetapConfig = toml::from_str("").expect("empty config");
        assert_eq!(config.binaries.ffprobe, "ffprobe");
        assert_eq!(config.execution.timeout(), Duration::from_secs(3600));
        assert_eq!(config.peaks.params().samples_per_pixel, 512);
        assert!(config.peaks.normalize_range.is_none());
    }

    #[test]
    fn normalize_range_parses_as_two_bounds() {
        let config: WavetapConfig =
            toml::from_str("[peaks]\nnormalize_range = [0.0, 1.0]\n").expect("config");
        let range = config.peaks.normalize_range.expect("range");
        assert_eq!(range.low, 0.0);
        assert_eq!(range.high, 1.0);

        // Anything but exactly two bounds is rejected at parse time.
        let malformed = toml::from_str::<WavetapConfig>("[peaks]\nnormalize_range = [0.0]\n");
        assert!(malformed.is_err());
    }
}
