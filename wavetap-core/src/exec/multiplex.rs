//! Readiness-driven demultiplexer for one transcoder run.
//!
//! One task owns the child process and every output pipe: progress text
//! on stdout, diagnostics on stderr, raw PCM on fd 3, encoded payload on
//! fd 4. A single `select!` loop routes whichever channel has bytes,
//! polls child liveness on a bounded tick, keeps draining after exit
//! until every pipe reports end-of-input, and enforces the wall-clock
//! deadline. Nothing here is shared across runs.

use std::future;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::command::{CommandPlan, AUDIO_TAP_FD, PAYLOAD_FD};
use crate::peaks::{PeaksCollector, PeaksResult};
use crate::storage::PayloadSink;

use super::error::{ExecError, ExecResult};
use super::observer::RunObserver;
use super::pipe::{dup_into_place, ChannelPipe};
use super::progress::{LineBuffer, ProgressParser};

const READ_CHUNK: usize = 8 * 1024;
const LIVENESS_INTERVAL: Duration = Duration::from_millis(250);

pub(crate) struct MultiplexOutcome {
    pub peaks: Option<PeaksResult>,
    pub payload: Option<PayloadSink>,
}

pub(crate) async fn run_multiplexed(
    plan: &CommandPlan,
    peaks: Option<PeaksCollector>,
    want_payload: bool,
    timeout: Duration,
    observer: &dyn RunObserver,
) -> ExecResult<MultiplexOutcome> {
    let mut audio_pipe = match peaks {
        Some(_) => Some(ChannelPipe::new(AUDIO_TAP_FD)?),
        None => None,
    };
    let mut payload_pipe = match want_payload {
        true => Some(ChannelPipe::new(PAYLOAD_FD)?),
        false => None,
    };

    let mut command = Command::new(&plan.program);
    command
        .args(&plan.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut mappings = Vec::new();
    for pipe in [audio_pipe.as_ref(), payload_pipe.as_ref()].into_iter().flatten() {
        if let Some(write_fd) = pipe.write_fd() {
            mappings.push((write_fd, pipe.target_fd()));
        }
    }
    if !mappings.is_empty() {
        unsafe {
            command.pre_exec(move || dup_into_place(&mappings));
        }
    }

    let mut child = command.spawn().map_err(|source| ExecError::Spawn {
        program: plan.program.display().to_string(),
        source,
    })?;

    // The parent copies of the write ends must close now, or the readers
    // never reach end-of-input once the child exits.
    if let Some(pipe) = audio_pipe.as_mut() {
        pipe.close_write();
    }
    if let Some(pipe) = payload_pipe.as_mut() {
        pipe.close_write();
    }

    let mut progress_reader = child.stdout.take();
    let mut error_reader = child.stderr.take();
    let mut audio_reader = audio_pipe.map(ChannelPipe::into_reader);
    let mut payload_reader = payload_pipe.map(ChannelPipe::into_reader);

    let parser = ProgressParser::new();
    let mut line_buffer = LineBuffer::new();
    let mut error_text = String::new();
    let mut collector = peaks;
    let mut sink = match want_payload {
        true => Some(PayloadSink::new()),
        false => None,
    };

    let mut progress_buf = vec![0u8; READ_CHUNK];
    let mut error_buf = vec![0u8; READ_CHUNK];
    let mut audio_buf = vec![0u8; READ_CHUNK];
    let mut payload_buf = vec![0u8; READ_CHUNK];

    let deadline = Instant::now() + timeout;
    let mut liveness = time::interval(LIVENESS_INTERVAL);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut exit_status = None;

    while progress_reader.is_some()
        || error_reader.is_some()
        || audio_reader.is_some()
        || payload_reader.is_some()
    {
        tokio::select! {
            result = next_chunk(&mut progress_reader, &mut progress_buf) => {
                let read = settle(&mut progress_reader, result, "progress");
                if read > 0 {
                    line_buffer.push(&progress_buf[..read], |line| {
                        if let Some(sample) = parser.parse(line) {
                            observer.on_progress(&sample);
                        }
                    });
                }
            }
            result = next_chunk(&mut error_reader, &mut error_buf) => {
                let read = settle(&mut error_reader, result, "error");
                if read > 0 {
                    error_text.push_str(&String::from_utf8_lossy(&error_buf[..read]));
                }
            }
            result = next_chunk(&mut audio_reader, &mut audio_buf) => {
                let read = settle(&mut audio_reader, result, "audio");
                if read > 0 {
                    if let Some(collector) = collector.as_mut() {
                        collector.push_chunk(&audio_buf[..read]);
                    }
                }
            }
            result = next_chunk(&mut payload_reader, &mut payload_buf) => {
                let read = settle(&mut payload_reader, result, "payload");
                if read > 0 {
                    if let Some(sink) = sink.as_mut() {
                        sink.write(&payload_buf[..read])?;
                    }
                }
            }
            // End-of-input alone is not trusted as a death signal: a
            // crashed child's pipes may linger, so liveness is polled on
            // its own tick.
            _ = liveness.tick() => {
                if exit_status.is_none() {
                    if let Some(status) = child.try_wait()? {
                        debug!(code = status.code(), "child exited, draining channels");
                        exit_status = Some(status);
                    }
                }
            }
            _ = time::sleep_until(deadline) => {
                warn!(?timeout, "run exceeded timeout, killing child");
                if let Err(error) = child.kill().await {
                    warn!(%error, "failed to kill timed out child");
                }
                return Err(ExecError::Timeout { timeout });
            }
        }
    }

    let status = match exit_status {
        Some(status) => status,
        None => {
            // Bind before matching so the wait future's borrow of the
            // child is released before the kill path runs.
            let waited = time::timeout_at(deadline, child.wait()).await;
            match waited {
                Ok(status) => status?,
                Err(_) => {
                    warn!(?timeout, "child did not exit after channels closed, killing");
                    if let Err(error) = child.kill().await {
                        warn!(%error, "failed to kill timed out child");
                    }
                    return Err(ExecError::Timeout { timeout });
                }
            }
        }
    };

    // A trailing unterminated progress line still counts.
    if let Some(line) = line_buffer.finish() {
        if let Some(sample) = parser.parse(&line) {
            observer.on_progress(&sample);
        }
    }

    if !status.success() {
        // All-or-nothing: buffered peaks and payload are discarded.
        return Err(ExecError::Process {
            status: status.code(),
            stderr: error_text,
        });
    }

    let peaks = collector.map(PeaksCollector::finish);
    Ok(MultiplexOutcome {
        peaks,
        payload: sink,
    })
}

async fn next_chunk<R>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader.as_mut() {
        Some(reader) => reader.read(buf).await,
        // A closed channel never resolves; the other branches drive the
        // loop to completion.
        None => future::pending().await,
    }
}

/// Interprets one read result: end-of-input closes the channel, transient
/// errors count as no data this tick, hard errors close the channel with
/// a warning (the deadline still bounds the run).
fn settle<R>(reader: &mut Option<R>, result: io::Result<usize>, channel: &'static str) -> usize {
    match result {
        Ok(0) => {
            debug!(channel, "channel drained");
            *reader = None;
            0
        }
        Ok(read) => read,
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ) =>
        {
            0
        }
        Err(error) => {
            warn!(channel, %error, "read failed, closing channel");
            *reader = None;
            0
        }
    }
}
