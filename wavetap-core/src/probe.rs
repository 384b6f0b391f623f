use std::io;
use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run ffprobe: {0}")]
    Io(#[from] io::Error),
    #[error("ffprobe exited with status {status:?}: {stderr}")]
    Process {
        status: Option<i32>,
        stderr: String,
    },
    #[error("failed to parse ffprobe output: {0}")]
    Parse(String),
    #[error("no audio stream found in input")]
    NoAudioStream,
}

pub type ProbeResult<T> = Result<T, ProbeError>;

/// Geometry of the first audio stream. Defaults mirror the transcoder's
/// most common layout and back the lenient probe mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub channels: u16,
    pub sample_rate: u32,
}

impl Default for AudioStreamInfo {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 44100,
        }
    }
}

/// How a failed probe is treated. `Lenient` keeps runs going with the
/// default stream geometry; `Strict` surfaces the failure for callers
/// that would rather abort than guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    #[default]
    Lenient,
    Strict,
}

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> io::Result<Output> {
        command.output().await
    }
}

/// Asks ffprobe for the audio stream geometry of an input.
#[derive(Clone)]
pub struct MediaProber {
    ffprobe: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for MediaProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaProber")
            .field("ffprobe", &self.ffprobe)
            .finish()
    }
}

impl MediaProber {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub async fn audio_stream(&self, input: &str, mode: ProbeMode) -> ProbeResult<AudioStreamInfo> {
        match self.probe(input).await {
            Ok(info) => Ok(info),
            Err(error) => match mode {
                ProbeMode::Strict => Err(error),
                ProbeMode::Lenient => {
                    warn!(%error, input, "probe failed, falling back to default stream geometry");
                    Ok(AudioStreamInfo::default())
                }
            },
        }
    }

    async fn probe(&self, input: &str) -> ProbeResult<AudioStreamInfo> {
        let mut command = Command::new(&self.ffprobe);
        command
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-select_streams")
            .arg("a:0")
            .arg(input);
        let output = self.executor.run(&mut command).await?;
        if !output.status.success() {
            return Err(ProbeError::Process {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        parse_probe_output(&output.stdout)
    }
}

fn parse_probe_output(stdout: &[u8]) -> ProbeResult<AudioStreamInfo> {
    let value: serde_json::Value =
        serde_json::from_slice(stdout).map_err(|err| ProbeError::Parse(err.to_string()))?;
    let stream = value
        .get("streams")
        .and_then(|streams| streams.get(0))
        .ok_or(ProbeError::NoAudioStream)?;

    // Field-level fallbacks: a stream that omits one value does not sink
    // the probe.
    let defaults = AudioStreamInfo::default();
    let channels = stream
        .get("channels")
        .and_then(|v| v.as_u64())
        .map(|v| v as u16)
        .unwrap_or(defaults.channels);
    // ffprobe reports sample_rate as a string.
    let sample_rate = stream
        .get("sample_rate")
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse::<u32>().ok())
        .or_else(|| {
            stream
                .get("sample_rate")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32)
        })
        .unwrap_or(defaults.sample_rate);

    Ok(AudioStreamInfo {
        channels,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    struct StubExecutor {
        stdout: Vec<u8>,
        status_code: i32,
        seen_args: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl CommandExecutor for StubExecutor {
        async fn run(&self, command: &mut Command) -> io::Result<Output> {
            let args = command
                .as_std()
                .get_args()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect();
            *self.seen_args.lock().unwrap() = args;
            Ok(Output {
                status: ExitStatus::from_raw(self.status_code << 8),
                stdout: self.stdout.clone(),
                stderr: Vec::new(),
            })
        }
    }

    fn make_prober(stdout: &str, status_code: i32) -> (MediaProber, Arc<StubExecutor>) {
        let executor = Arc::new(StubExecutor {
            stdout: stdout.as_bytes().to_vec(),
            status_code,
            seen_args: Mutex::new(Vec::new()),
        });
        let prober = MediaProber::new("ffprobe").with_executor(executor.clone());
        (prober, executor)
    }

    #[tokio::test]
    async fn extracts_channels_and_sample_rate() {
        let (prober, executor) = make_prober(
            r#"{"streams":[{"channels":1,"sample_rate":"48000","codec_name":"aac"}]}"#,
            0,
        );
        let info = prober
            .audio_stream("input.mp3", ProbeMode::Strict)
            .await
            .expect("probe");
        assert_eq!(info.channels, 1);
        assert_eq!(info.sample_rate, 48000);

        let args = executor.seen_args.lock().unwrap().clone();
        assert!(args.contains(&"a:0".to_string()));
        assert!(args.contains(&"input.mp3".to_string()));
    }

    #[tokio::test]
    async fn missing_fields_fall_back_per_field() {
        let (prober, _) = make_prober(r#"{"streams":[{"sample_rate":"48000"}]}"#, 0);
        let info = prober
            .audio_stream("input.mp3", ProbeMode::Strict)
            .await
            .expect("probe");
        assert_eq!(info.channels, 2);
        assert_eq!(info.sample_rate, 48000);

        let (prober, _) = make_prober(r#"{"streams":[{"channels":1}]}"#, 0);
        let info = prober
            .audio_stream("input.mp3", ProbeMode::Strict)
            .await
            .expect("probe");
        assert_eq!(info.channels, 1);
        assert_eq!(info.sample_rate, 44100);
    }

    #[tokio::test]
    async fn lenient_mode_defaults_on_failure() {
        let (prober, _) = make_prober("", 1);
        let info = prober
            .audio_stream("input.mp3", ProbeMode::Lenient)
            .await
            .expect("lenient probe never fails");
        assert_eq!(info, AudioStreamInfo::default());
    }

    #[tokio::test]
    async fn strict_mode_surfaces_failure() {
        let (prober, _) = make_prober("", 1);
        let error = prober
            .audio_stream("input.mp3", ProbeMode::Strict)
            .await
            .expect_err("strict probe fails");
        assert!(matches!(error, ProbeError::Process { .. }));
    }

    #[tokio::test]
    async fn empty_stream_list_is_no_audio() {
        let (prober, _) = make_prober(r#"{"streams":[]}"#, 0);
        let error = prober
            .audio_stream("input.mp3", ProbeMode::Strict)
            .await
            .expect_err("no stream");
        assert!(matches!(error, ProbeError::NoAudioStream));
    }
}
