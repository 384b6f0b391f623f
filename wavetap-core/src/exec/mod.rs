mod error;
mod multiplex;
mod observer;
mod pipe;
mod progress;
mod standard;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::command::CommandPlan;
use crate::peaks::{PeakParams, PeaksCollector, PeaksResult};
use crate::probe::AudioStreamInfo;
use crate::storage::PayloadStore;

pub use error::{ExecError, ExecResult};
pub use observer::{NoopObserver, RunObserver};
pub use progress::{LineBuffer, ProgressParser, ProgressSample};

/// Peaks side of a run: extraction parameters plus the stream geometry
/// the PCM tap was configured with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioTapRequest {
    pub params: PeakParams,
    pub stream: AudioStreamInfo,
}

/// One execution request. Immutable per run; nothing is shared between
/// concurrent runs.
#[derive(Debug)]
pub struct RunRequest {
    pub plan: CommandPlan,
    /// Present iff the plan taps raw PCM for peak extraction.
    pub peaks: Option<AudioTapRequest>,
    /// Destination key for the streamed payload; present iff the plan
    /// taps the encoded payload channel.
    pub payload_key: Option<String>,
    pub timeout: Duration,
}

/// Uniform terminal record of a successful run.
#[derive(Debug)]
pub struct ExecutionReport {
    pub peaks: Option<PeaksResult>,
    /// Key the payload was handed to the store under.
    pub payload_key: Option<String>,
}

/// Runs transcoder commands, choosing the plain two-pipe path or the
/// multiplexed one depending on what the request asks for.
#[derive(Default)]
pub struct Executor {
    store: Option<Arc<dyn PayloadStore>>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn PayloadStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn run(
        &self,
        request: RunRequest,
        observer: &dyn RunObserver,
    ) -> ExecResult<ExecutionReport> {
        self.validate(&request)?;

        let program = request.plan.program.to_string_lossy().into_owned();
        observer.on_started(&program, &request.plan.args);
        info!(
            program = %program,
            peaks = request.peaks.is_some(),
            payload = request.payload_key.is_some(),
            "starting transcoder run"
        );

        let result = self.dispatch(&request, observer).await;
        match result {
            Ok(report) => {
                observer.on_completed();
                Ok(report)
            }
            Err(error) => {
                let text = match &error {
                    ExecError::Process { stderr, .. } => stderr.clone(),
                    other => other.to_string(),
                };
                observer.on_failed(&text);
                Err(error)
            }
        }
    }

    async fn dispatch(
        &self,
        request: &RunRequest,
        observer: &dyn RunObserver,
    ) -> ExecResult<ExecutionReport> {
        if !request.plan.audio_tap && !request.plan.payload_tap {
            standard::run_standard(&request.plan, request.timeout, observer).await?;
            return Ok(ExecutionReport {
                peaks: None,
                payload_key: None,
            });
        }

        let collector = request
            .peaks
            .map(|tap| PeaksCollector::new(tap.params, tap.stream));
        let outcome = multiplex::run_multiplexed(
            &request.plan,
            collector,
            request.plan.payload_tap,
            request.timeout,
            observer,
        )
        .await?;

        let mut stored_key = None;
        if let (Some(sink), Some(key)) = (outcome.payload, request.payload_key.as_deref()) {
            let store = self
                .store
                .as_ref()
                .ok_or_else(|| ExecError::MalformedInput("payload store not configured".into()))?;
            debug!(key, bytes = sink.total_bytes(), "handing payload to store");
            store.store(sink, key).await?;
            stored_key = Some(key.to_string());
        }

        Ok(ExecutionReport {
            peaks: outcome.peaks,
            payload_key: stored_key,
        })
    }

    fn validate(&self, request: &RunRequest) -> ExecResult<()> {
        if let Some(tap) = &request.peaks {
            if tap.params.samples_per_pixel == 0 {
                return Err(ExecError::MalformedInput(
                    "samples_per_pixel must be at least 1".into(),
                ));
            }
            if tap.stream.channels == 0 {
                return Err(ExecError::MalformedInput(
                    "audio tap requires at least one channel".into(),
                ));
            }
            if !request.plan.audio_tap {
                return Err(ExecError::MalformedInput(
                    "peaks requested but the plan declares no audio tap".into(),
                ));
            }
        } else if request.plan.audio_tap {
            return Err(ExecError::MalformedInput(
                "plan taps audio but no peaks request was given".into(),
            ));
        }

        match (&request.payload_key, request.plan.payload_tap) {
            (Some(_), false) => Err(ExecError::MalformedInput(
                "payload key given but the plan declares no payload tap".into(),
            )),
            (None, true) => Err(ExecError::MalformedInput(
                "plan taps the payload but no destination key was given".into(),
            )),
            (Some(_), true) if self.store.is_none() => Err(ExecError::MalformedInput(
                "payload store not configured".into(),
            )),
            _ => Ok(()),
        }
    }
}
