mod format;
mod frame;
mod normalize;
mod reducer;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::command::CommandPlanner;
use crate::config::WavetapConfig;
use crate::exec::{AudioTapRequest, ExecError, Executor, NoopObserver, RunRequest};
use crate::probe::{AudioStreamInfo, MediaProber, ProbeError, ProbeMode};

pub use format::{PeaksData, PeaksFormat, PeaksResult, PeaksWriteError, PEAKS_FORMAT_VERSION};
pub use frame::{split_frames, ChannelBuffer};
pub use normalize::{normalize, normalize_sample, round6, NormalizeRange, S16_HIGH, S16_LOW};
pub use reducer::PeakReducer;

/// Peak extraction parameters supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakParams {
    /// Audio frames reduced into one min/max pair. Higher means less
    /// detail and a smaller result.
    pub samples_per_pixel: usize,
    /// Target range for normalized output, e.g. `[0, 1]` for
    /// wavesurfer-style renderers. `None` keeps raw 16-bit values.
    pub normalize_range: Option<NormalizeRange>,
}

impl Default for PeakParams {
    fn default() -> Self {
        Self {
            samples_per_pixel: 512,
            normalize_range: None,
        }
    }
}

/// Output accumulator; the variant fixes the numeric domain for the
/// whole run.
#[derive(Debug)]
enum PeaksAccumulator {
    Raw(Vec<i16>),
    Normalized {
        range: NormalizeRange,
        values: Vec<f64>,
    },
}

impl PeaksAccumulator {
    fn push_pairs(&mut self, pairs: &[(i16, i16)]) {
        match self {
            PeaksAccumulator::Raw(values) => {
                for (min, max) in pairs {
                    values.push(*min);
                    values.push(*max);
                }
            }
            PeaksAccumulator::Normalized { range, values } => {
                for (min, max) in pairs {
                    values.push(normalize_sample(*min, *range));
                    values.push(normalize_sample(*max, *range));
                }
            }
        }
    }

    fn into_data(self) -> PeaksData {
        match self {
            PeaksAccumulator::Raw(values) => PeaksData::Raw(values),
            PeaksAccumulator::Normalized { values, .. } => PeaksData::Normalized(values),
        }
    }
}

/// Incremental peaks pipeline for one run: carries partial frames across
/// chunk boundaries, reduces windows, and accumulates the (optionally
/// normalized) output sequence.
#[derive(Debug)]
pub struct PeaksCollector {
    buffer: ChannelBuffer,
    reducer: PeakReducer,
    accumulator: PeaksAccumulator,
    channels: u16,
    sample_rate: u32,
    samples_per_pixel: usize,
}

impl PeaksCollector {
    pub fn new(params: PeakParams, stream: AudioStreamInfo) -> Self {
        let accumulator = match params.normalize_range {
            Some(range) => PeaksAccumulator::Normalized {
                range,
                values: Vec::new(),
            },
            None => PeaksAccumulator::Raw(Vec::new()),
        };
        Self {
            buffer: ChannelBuffer::new(),
            reducer: PeakReducer::new(usize::from(stream.channels), params.samples_per_pixel),
            accumulator,
            channels: stream.channels,
            sample_rate: stream.sample_rate,
            samples_per_pixel: params.samples_per_pixel,
        }
    }

    /// Bytes per PCM frame: two bytes per sample, one sample per channel.
    pub fn frame_size(&self) -> usize {
        usize::from(self.channels) * 2
    }

    /// Feeds one chunk of raw little-endian s16 PCM.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.buffer.extend(chunk);
        let frame_size = self.frame_size();
        let Self {
            buffer, reducer, ..
        } = self;
        let mut ready = Vec::new();
        buffer.drain_frames(frame_size, |frame| {
            for (channel, bytes) in frame.chunks_exact(2).enumerate() {
                reducer.observe(channel, i16::from_le_bytes([bytes[0], bytes[1]]));
            }
            if reducer.window_ready() {
                ready.push(reducer.emit());
            }
        });
        for pairs in ready {
            self.accumulator.push_pairs(&pairs);
        }
    }

    /// Flushes the trailing partial window and assembles the result.
    pub fn finish(mut self) -> PeaksResult {
        if let Some(pairs) = self.reducer.flush_partial() {
            self.accumulator.push_pairs(&pairs);
        }
        debug!(
            windows = self.reducer.windows_emitted(),
            channels = self.channels,
            "peaks collection finished"
        );
        let data = self.accumulator.into_data();
        PeaksResult {
            version: PEAKS_FORMAT_VERSION,
            channels: self.channels,
            sample_rate: self.sample_rate,
            samples_per_pixel: self.samples_per_pixel,
            bits: data.bits(),
            length: self.reducer.windows_emitted(),
            data,
        }
    }
}

#[derive(Debug, Error)]
pub enum PeaksError {
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("execution failed: {0}")]
    Exec(#[from] ExecError),
    #[error("failed to persist peaks: {0}")]
    Write(#[from] PeaksWriteError),
    #[error("transcoder produced no audio channel")]
    NoAudio,
}

pub type PeaksResultOf<T> = Result<T, PeaksError>;

/// Standalone peaks extraction: probes the input, then runs a decode-only
/// transcode that taps s16 PCM without re-encoding a payload.
#[derive(Debug)]
pub struct PeaksGenerator {
    ffmpeg: PathBuf,
    prober: MediaProber,
    probe_mode: ProbeMode,
    timeout: Duration,
}

impl PeaksGenerator {
    pub fn new(ffmpeg: impl Into<PathBuf>, prober: MediaProber) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            prober,
            probe_mode: ProbeMode::Lenient,
            timeout: Duration::from_secs(3600),
        }
    }

    pub fn from_config(config: &WavetapConfig) -> Self {
        let prober = MediaProber::new(&config.binaries.ffprobe);
        Self::new(&config.binaries.ffmpeg, prober)
            .with_probe_mode(config.execution.probe_mode())
            .with_timeout(config.execution.timeout())
    }

    pub fn with_probe_mode(mut self, mode: ProbeMode) -> Self {
        self.probe_mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn generate(&self, input: &str, params: PeakParams) -> PeaksResultOf<PeaksResult> {
        let stream = self.prober.audio_stream(input, self.probe_mode).await?;
        let plan = CommandPlanner::new(&self.ffmpeg)
            .input(input)
            .audio_tap(stream.channels, stream.sample_rate)
            .plan();
        let request = RunRequest {
            plan,
            peaks: Some(AudioTapRequest { params, stream }),
            payload_key: None,
            timeout: self.timeout,
        };
        let report = Executor::new().run(request, &NoopObserver).await?;
        match report.peaks {
            Some(peaks) => Ok(peaks),
            None => Err(PeaksError::NoAudio),
        }
    }

    pub async fn generate_to_file(
        &self,
        input: &str,
        params: PeakParams,
        output: impl AsRef<Path>,
        format: PeaksFormat,
    ) -> PeaksResultOf<PeaksResult> {
        let peaks = self.generate(input, params).await?;
        peaks.write_to_file(output, format).await?;
        Ok(peaks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(channels: u16) -> AudioStreamInfo {
        AudioStreamInfo {
            channels,
            sample_rate: 44100,
        }
    }

    #[test]
    fn mono_chunk_produces_raw_pair() {
        let params = PeakParams {
            samples_per_pixel: 4,
            normalize_range: None,
        };
        let mut collector = PeaksCollector::new(params, stream(1));
        let mut pcm = Vec::new();
        for value in [100i16, -200, 300, -400] {
            pcm.extend_from_slice(&value.to_le_bytes());
        }
        collector.push_chunk(&pcm);
        let result = collector.finish();
        assert_eq!(result.data, PeaksData::Raw(vec![-400, 300]));
        assert_eq!(result.length, 1);
        assert_eq!(result.bits, 16);
    }

    #[test]
    fn stereo_interleaves_per_channel_pairs() {
        let params = PeakParams {
            samples_per_pixel: 2,
            normalize_range: None,
        };
        let mut collector = PeaksCollector::new(params, stream(2));
        let mut pcm = Vec::new();
        for value in [100i16, 200, 300, 400] {
            pcm.extend_from_slice(&value.to_le_bytes());
        }
        collector.push_chunk(&pcm);
        let result = collector.finish();
        assert_eq!(result.data, PeaksData::Raw(vec![100, 300, 200, 400]));
    }

    #[test]
    fn split_byte_boundaries_do_not_change_output() {
        let params = PeakParams {
            samples_per_pixel: 2,
            normalize_range: None,
        };
        let mut pcm = Vec::new();
        for value in [100i16, -200, 300, -400, 500] {
            pcm.extend_from_slice(&value.to_le_bytes());
        }

        let mut whole = PeaksCollector::new(params, stream(1));
        whole.push_chunk(&pcm);
        let expected = whole.finish();

        for cut in 0..=pcm.len() {
            let mut pieces = PeaksCollector::new(params, stream(1));
            pieces.push_chunk(&pcm[..cut]);
            pieces.push_chunk(&pcm[cut..]);
            assert_eq!(pieces.finish(), expected, "cut at {cut}");
        }
    }

    #[test]
    fn normalized_output_is_rounded_floats() {
        let params = PeakParams {
            samples_per_pixel: 2,
            normalize_range: Some(NormalizeRange::from([0.0, 1.0])),
        };
        let mut collector = PeaksCollector::new(params, stream(1));
        let mut pcm = Vec::new();
        for value in [0i16, i16::MAX] {
            pcm.extend_from_slice(&value.to_le_bytes());
        }
        collector.push_chunk(&pcm);
        let result = collector.finish();
        match result.data {
            PeaksData::Normalized(values) => {
                assert_eq!(values.len(), 2);
                assert!(values[0] > 0.499 && values[0] < 0.501);
                assert_eq!(values[1], 1.0);
            }
            other => panic!("expected normalized data, got {other:?}"),
        }
        assert_eq!(result.bits, 32);
    }

    #[test]
    fn empty_stream_yields_empty_result() {
        let collector = PeaksCollector::new(PeakParams::default(), stream(2));
        let result = collector.finish();
        assert_eq!(result.length, 0);
        assert!(result.data.is_empty());
        assert_eq!(result.channels, 2);
        assert_eq!(result.sample_rate, 44100);
    }
}
