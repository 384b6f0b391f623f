//! Degenerate execution path: no extra pipes, the child writes its
//! payload straight to the destination named in its argv. Only progress
//! (stdout) and diagnostics (stderr) need servicing, so stdout is
//! consumed line by line in this task while a helper task drains stderr.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{self, Instant};
use tracing::warn;

use crate::command::CommandPlan;

use super::error::{ExecError, ExecResult};
use super::observer::RunObserver;
use super::progress::ProgressParser;

pub(crate) async fn run_standard(
    plan: &CommandPlan,
    timeout: Duration,
    observer: &dyn RunObserver,
) -> ExecResult<()> {
    let mut command = Command::new(&plan.program);
    command
        .args(&plan.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| ExecError::Spawn {
        program: plan.program.display().to_string(),
        source,
    })?;

    // Drain stderr concurrently so a chatty child cannot fill the pipe
    // and stall while this task is blocked on stdout.
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut collected = String::new();
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push_str(&line);
                collected.push('\n');
            }
        }
        collected
    });

    let deadline = Instant::now() + timeout;
    let parser = ProgressParser::new();
    let stdout = child.stdout.take();

    let consume = async {
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(sample) = parser.parse(&line) {
                    observer.on_progress(&sample);
                }
            }
        }
        child.wait().await
    };

    // Bind before matching so the consuming future (and its borrow of
    // the child) is dropped before the kill path runs.
    let waited = time::timeout_at(deadline, consume).await;
    let status = match waited {
        Ok(status) => status?,
        Err(_) => {
            warn!(?timeout, "standard run exceeded timeout, killing child");
            if let Err(error) = child.kill().await {
                warn!(%error, "failed to kill timed out child");
            }
            stderr_task.abort();
            return Err(ExecError::Timeout { timeout });
        }
    };

    let error_text = stderr_task.await.unwrap_or_default();
    if !status.success() {
        return Err(ExecError::Process {
            status: status.code(),
            stderr: error_text,
        });
    }
    Ok(())
}
