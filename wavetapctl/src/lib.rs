use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;

use wavetap_core::command::{container_for_extension, CommandPlanner};
use wavetap_core::config::{load_wavetap_config, WavetapConfig};
use wavetap_core::exec::{AudioTapRequest, Executor, RunObserver, RunRequest};
use wavetap_core::peaks::{NormalizeRange, PeaksError, PeaksFormat, PeaksGenerator, PeaksResult};
use wavetap_core::probe::MediaProber;
use wavetap_core::storage::FsPayloadStore;
use wavetap_core::ProgressSample;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] wavetap_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("execution error: {0}")]
    Exec(#[from] wavetap_core::ExecError),
    #[error("peaks error: {0}")]
    Peaks(#[from] PeaksError),
    #[error("probe error: {0}")]
    Probe(#[from] wavetap_core::ProbeError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Transcoder driver with streaming peak extraction", long_about = None)]
pub struct Cli {
    /// Path to wavetap.toml
    #[arg(long, default_value = "configs/wavetap.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract waveform peaks from a media file
    Peaks(PeaksArgs),
    /// Show the audio stream geometry of a media file
    Probe(ProbeArgs),
    /// Run a transcode, optionally extracting peaks along the way
    Transcode(TranscodeArgs),
}

#[derive(Args, Debug)]
pub struct PeaksArgs {
    /// Input media file
    pub input: String,
    /// Write peaks JSON here instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Audio frames per min/max pair
    #[arg(long)]
    pub samples_per_pixel: Option<usize>,
    /// Normalize into this range, e.g. --normalize 0 1
    #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"])]
    pub normalize: Option<Vec<f64>>,
    /// Emit the full metadata object instead of the bare data array
    #[arg(long, value_enum)]
    pub peaks_format: Option<CliPeaksFormat>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Input media file
    pub input: String,
}

#[derive(Args, Debug)]
pub struct TranscodeArgs {
    /// Input media file
    pub input: String,
    /// Output media file
    pub output: PathBuf,
    /// Extra output options passed through to the transcoder, e.g.
    /// --opt -acodec --opt aac
    #[arg(long = "opt", allow_hyphen_values = true)]
    pub options: Vec<String>,
    /// Also extract peaks and write them to this JSON file
    #[arg(long)]
    pub peaks_output: Option<PathBuf>,
    /// Stream the payload into this store root instead of writing
    /// directly; the output path becomes the store key
    #[arg(long)]
    pub store_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliPeaksFormat {
    Simple,
    Full,
}

impl From<CliPeaksFormat> for PeaksFormat {
    fn from(format: CliPeaksFormat) -> Self {
        match format {
            CliPeaksFormat::Simple => PeaksFormat::Simple,
            CliPeaksFormat::Full => PeaksFormat::Full,
        }
    }
}

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    match cli.command {
        Commands::Peaks(args) => run_peaks(&config, cli.format, args).await,
        Commands::Probe(args) => run_probe(&config, cli.format, args).await,
        Commands::Transcode(args) => run_transcode(&config, cli.format, args).await,
    }
}

fn load_config(path: &PathBuf) -> Result<WavetapConfig> {
    if path.exists() {
        // A present but broken config fails loudly; a missing one means
        // defaults.
        Ok(load_wavetap_config(path)?)
    } else {
        Ok(WavetapConfig::default())
    }
}

async fn run_peaks(config: &WavetapConfig, format: OutputFormat, args: PeaksArgs) -> Result<()> {
    let mut params = config.peaks.params();
    if let Some(samples_per_pixel) = args.samples_per_pixel {
        params.samples_per_pixel = samples_per_pixel;
    }
    if let Some(bounds) = &args.normalize {
        params.normalize_range = Some(NormalizeRange::from([bounds[0], bounds[1]]));
    }
    let peaks_format = args
        .peaks_format
        .map(PeaksFormat::from)
        .unwrap_or(config.peaks.format);

    let generator = PeaksGenerator::from_config(config);
    let peaks = match &args.output {
        Some(output) => {
            generator
                .generate_to_file(&args.input, params, output, peaks_format)
                .await?
        }
        None => {
            let peaks = generator.generate(&args.input, params).await?;
            println!("{}", peaks.render(peaks_format)?);
            peaks
        }
    };
    if let Some(output) = &args.output {
        report_peaks(format, &peaks, output);
    }
    Ok(())
}

fn report_peaks(format: OutputFormat, peaks: &PeaksResult, output: &PathBuf) {
    match format {
        OutputFormat::Text => println!(
            "wrote {} pairs x {} channels to {}",
            peaks.length,
            peaks.channels,
            output.display()
        ),
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "output": output,
                "length": peaks.length,
                "channels": peaks.channels,
                "sample_rate": peaks.sample_rate,
            })
        ),
    }
}

async fn run_probe(config: &WavetapConfig, format: OutputFormat, args: ProbeArgs) -> Result<()> {
    let prober = MediaProber::new(&config.binaries.ffprobe);
    let info = prober
        .audio_stream(&args.input, config.execution.probe_mode())
        .await?;
    match format {
        OutputFormat::Text => println!(
            "channels: {}\nsample_rate: {}",
            info.channels, info.sample_rate
        ),
        OutputFormat::Json => println!("{}", serde_json::to_string(&info)?),
    }
    Ok(())
}

struct ProgressPrinter {
    format: OutputFormat,
}

impl RunObserver for ProgressPrinter {
    fn on_progress(&self, sample: &ProgressSample) {
        match self.format {
            OutputFormat::Text => {
                let speed = sample
                    .speed
                    .map(|s| format!(" (speed {s}x)"))
                    .unwrap_or_default();
                eprintln!("progress: {:.2}s{speed}", sample.time_processed);
            }
            OutputFormat::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "time_processed": sample.time_processed,
                        "fps": sample.fps,
                        "speed": sample.speed,
                    })
                );
            }
        }
    }
}

async fn run_transcode(
    config: &WavetapConfig,
    format: OutputFormat,
    args: TranscodeArgs,
) -> Result<()> {
    let peaks_wanted = args.peaks_output.is_some();
    let stream = if peaks_wanted {
        let prober = MediaProber::new(&config.binaries.ffprobe);
        prober
            .audio_stream(&args.input, config.execution.probe_mode())
            .await?
    } else {
        Default::default()
    };

    let mut planner = CommandPlanner::new(&config.binaries.ffmpeg).input(&args.input);
    if !args.options.is_empty() {
        planner = planner.output_option(args.options.clone());
    }
    if peaks_wanted {
        planner = planner.audio_tap(stream.channels, stream.sample_rate);
    }

    let mut executor = Executor::new();
    let payload_key = match &args.store_root {
        Some(root) => {
            planner = planner.output_stream(container_for_extension(&args.output));
            executor = executor.with_store(Arc::new(FsPayloadStore::new(root)));
            Some(args.output.to_string_lossy().into_owned())
        }
        None => {
            planner = planner.output_path(&args.output);
            None
        }
    };

    let request = RunRequest {
        plan: planner.plan(),
        peaks: peaks_wanted.then(|| AudioTapRequest {
            params: config.peaks.params(),
            stream,
        }),
        payload_key,
        timeout: config.execution.timeout(),
    };

    let observer = ProgressPrinter { format };
    let report = executor.run(request, &observer).await?;

    if let (Some(peaks), Some(path)) = (&report.peaks, &args.peaks_output) {
        peaks
            .write_to_file(path, config.peaks.format)
            .await
            .map_err(PeaksError::Write)?;
        report_peaks(format, peaks, path);
    }

    match format {
        OutputFormat::Text => println!("transcode completed: {}", args.output.display()),
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "output": args.output,
                "stored_key": report.payload_key,
                "peaks": args.peaks_output,
            })
        ),
    }
    Ok(())
}
