use std::path::{Path, PathBuf};

/// Child fd carrying raw s16le PCM when peak extraction is on.
pub const AUDIO_TAP_FD: i32 = 3;
/// Child fd carrying the encoded payload when streaming to a store.
pub const PAYLOAD_FD: i32 = 4;

/// A fully-formed transcoder invocation plus the extra output channels it
/// declares. The executor wires one pipe per declared channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub audio_tap: bool,
    pub payload_tap: bool,
}

/// Output destination of the main encode.
#[derive(Debug, Clone, PartialEq)]
enum OutputTarget {
    /// Written by the child directly; `-y` overwrites without asking.
    Path(PathBuf),
    /// Streamed over the payload pipe in the given container format.
    Stream { container: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct AudioTap {
    channels: u16,
    sample_rate: u32,
}

/// Assembles the ffmpeg argv. Arguments stay a vector end to end; they
/// are passed to the process API directly, never through a shell.
#[derive(Debug, Clone)]
pub struct CommandPlanner {
    program: PathBuf,
    input_options: Vec<String>,
    inputs: Vec<String>,
    filters: Vec<String>,
    metadata: Vec<(String, String)>,
    output_options: Vec<String>,
    audio_tap: Option<AudioTap>,
    output: Option<OutputTarget>,
}

impl CommandPlanner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            input_options: Vec::new(),
            inputs: Vec::new(),
            filters: Vec::new(),
            metadata: Vec::new(),
            output_options: Vec::new(),
            audio_tap: None,
            output: None,
        }
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    /// Raw option applied before the inputs, e.g. `-ss 10`.
    pub fn input_option(mut self, option: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.input_options.extend(option.into_iter().map(Into::into));
        self
    }

    /// Raw option applied to the main output, e.g. `-c:v libx264`.
    pub fn output_option(mut self, option: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.output_options
            .extend(option.into_iter().map(Into::into));
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Adds the raw-PCM side output used for peak extraction.
    pub fn audio_tap(mut self, channels: u16, sample_rate: u32) -> Self {
        self.audio_tap = Some(AudioTap {
            channels,
            sample_rate,
        });
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(OutputTarget::Path(path.into()));
        self
    }

    /// Streams the encoded payload over the payload pipe instead of a
    /// local path. The container format must be explicit because the
    /// child cannot infer it from a pipe.
    pub fn output_stream(mut self, container: impl Into<String>) -> Self {
        self.output = Some(OutputTarget::Stream {
            container: container.into(),
        });
        self
    }

    pub fn plan(self) -> CommandPlan {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            "error".into(),
            "-progress".into(),
            "pipe:1".into(),
        ];
        args.extend(self.input_options);
        for input in &self.inputs {
            args.push("-i".into());
            args.push(input.clone());
        }
        if !self.filters.is_empty() {
            args.push("-vf".into());
            args.push(self.filters.join(","));
        }
        for (key, value) in &self.metadata {
            args.push("-metadata".into());
            args.push(format!("{key}={value}"));
        }

        if let Some(tap) = self.audio_tap {
            args.extend([
                "-map".into(),
                "0:a".into(),
                "-f".into(),
                "s16le".into(),
                "-acodec".into(),
                "pcm_s16le".into(),
                "-ar".into(),
                tap.sample_rate.to_string(),
                "-ac".into(),
                tap.channels.to_string(),
                format!("pipe:{AUDIO_TAP_FD}"),
            ]);
        }

        let mut payload_tap = false;
        if let Some(output) = &self.output {
            args.extend(self.output_options.iter().cloned());
            match output {
                OutputTarget::Path(path) => {
                    args.push("-y".into());
                    args.push(path.to_string_lossy().into_owned());
                }
                OutputTarget::Stream { container } => {
                    args.push("-f".into());
                    args.push(container.clone());
                    args.push(format!("pipe:{PAYLOAD_FD}"));
                    payload_tap = true;
                }
            }
        }

        CommandPlan {
            program: self.program,
            args,
            audio_tap: self.audio_tap.is_some(),
            payload_tap,
        }
    }
}

/// Container format for a given output extension; pipes need the format
/// spelled out.
pub fn container_for_extension(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("m4a") | Some("mp4") | Some("mov") => "mp4",
        Some("mkv") => "matroska",
        Some("webm") => "webm",
        Some("ogg") | Some("oga") => "ogg",
        Some("flac") => "flac",
        Some("wav") => "wav",
        Some("ts") => "mpegts",
        _ => "mp3",
    }
}
