use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeaksWriteError {
    #[error("failed to serialize peaks: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write peaks to {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Peak values in the numeric domain the run produced: raw signed 16-bit
/// integers, or 32-bit-tagged floats when a normalization range was
/// applied. Untagged so JSON output carries bare numbers either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeaksData {
    Raw(Vec<i16>),
    Normalized(Vec<f64>),
}

impl PeaksData {
    pub fn len(&self) -> usize {
        match self {
            PeaksData::Raw(values) => values.len(),
            PeaksData::Normalized(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bit-depth tag carried in the serialized metadata.
    pub fn bits(&self) -> u8 {
        match self {
            PeaksData::Raw(_) => 16,
            PeaksData::Normalized(_) => 32,
        }
    }
}

pub const PEAKS_FORMAT_VERSION: u32 = 2;

/// Completed waveform summary for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeaksResult {
    pub version: u32,
    pub channels: u16,
    pub sample_rate: u32,
    pub samples_per_pixel: usize,
    pub bits: u8,
    /// Min/max pair count per channel; `data.len() == length * channels * 2`.
    pub length: usize,
    pub data: PeaksData,
}

/// Rendering choice for serialized peaks: the bare data array (waveform
/// renderers consume this directly) or the full metadata object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeaksFormat {
    Simple,
    Full,
}

impl PeaksResult {
    pub fn render(&self, format: PeaksFormat) -> serde_json::Result<String> {
        match format {
            PeaksFormat::Simple => serde_json::to_string(&self.data),
            PeaksFormat::Full => serde_json::to_string_pretty(self),
        }
    }

    pub async fn write_to_file(
        &self,
        path: impl AsRef<Path>,
        format: PeaksFormat,
    ) -> Result<(), PeaksWriteError> {
        let path = path.as_ref();
        let rendered = self.render(format)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| PeaksWriteError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
        }
        tokio::fs::write(path, rendered)
            .await
            .map_err(|source| PeaksWriteError::Io {
                source,
                path: path.to_path_buf(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result(data: PeaksData) -> PeaksResult {
        let length = data.len() / 2;
        PeaksResult {
            version: PEAKS_FORMAT_VERSION,
            channels: 1,
            sample_rate: 44100,
            samples_per_pixel: 512,
            bits: data.bits(),
            length,
            data,
        }
    }

    #[test]
    fn raw_data_serializes_as_integers() {
        let result = sample_result(PeaksData::Raw(vec![-400, 300]));
        let rendered = result.render(PeaksFormat::Simple).unwrap();
        assert_eq!(rendered, "[-400,300]");
    }

    #[test]
    fn normalized_data_serializes_as_floats() {
        let result = sample_result(PeaksData::Normalized(vec![0.1, 0.3]));
        let rendered = result.render(PeaksFormat::Simple).unwrap();
        assert_eq!(rendered, "[0.1,0.3]");
    }

    #[test]
    fn full_format_carries_metadata() {
        let result = sample_result(PeaksData::Raw(vec![-400, 300]));
        let rendered = result.render(PeaksFormat::Full).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["version"], 2);
        assert_eq!(value["bits"], 16);
        assert_eq!(value["length"], 1);
        assert_eq!(value["data"][0], -400);
    }

    #[test]
    fn bits_tag_tracks_normalization() {
        assert_eq!(PeaksData::Raw(vec![]).bits(), 16);
        assert_eq!(PeaksData::Normalized(vec![]).bits(), 32);
    }
}
