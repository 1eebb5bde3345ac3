//! Supervised child processes with bounded output capture.

use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use process_utils::OutputTail;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::database::models::JobStage;
use crate::{Error, Result};

/// Characters of stdout/stderr kept for diagnostics.
pub const OUTPUT_TAIL_CHARS: usize = 800;

/// Result of a finished child process.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub duration_secs: f64,
    /// Last [`OUTPUT_TAIL_CHARS`] characters of stdout.
    pub stdout: String,
    /// Last [`OUTPUT_TAIL_CHARS`] characters of stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Turn a non-zero exit into `StageFailed` carrying both output tails.
    pub fn ensure_success(self, stage: JobStage) -> Result<Self> {
        if self.status.success() {
            return Ok(self);
        }
        let code = self
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Err(Error::stage_failed(
            stage.as_str(),
            format!(
                "exit={}. stdout={} stderr={}",
                code, self.stdout, self.stderr
            ),
        ))
    }
}

async fn drain<R>(reader: Option<R>, stream: &'static str, stage: JobStage) -> String
where
    R: AsyncRead + Unpin,
{
    let mut tail = OutputTail::new(OUTPUT_TAIL_CHARS);
    let Some(reader) = reader else {
        return tail.into_string();
    };

    // Read raw bytes until EOF; stopping early would close the pipe under
    // a child that is still writing.
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                debug!(stage = %stage, stream, "{}", line);
                tail.push_line(line);
            }
            Err(e) => {
                warn!(stage = %stage, stream, "Failed to read child output: {}", e);
                // Keep the pipe open until the child is done with it.
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                break;
            }
        }
    }
    tail.into_string()
}

/// Spawn `command`, stream its output to `tracing` and wait for it.
///
/// Output readers run inside this future rather than on spawned tasks, so
/// dropping the future tears down the readers and (through `kill_on_drop`)
/// the child.
pub async fn run_captured(mut command: Command, stage: JobStage) -> Result<CommandOutput> {
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();
    debug!(stage = %stage, "Running {:?}", command.as_std());

    let start = Instant::now();
    let mut child = command.spawn().map_err(|e| {
        Error::stage_failed(stage.as_str(), format!("failed to spawn {}: {}", program, e))
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr, status) = tokio::join!(
        drain(stdout, "stdout", stage),
        drain(stderr, "stderr", stage),
        child.wait(),
    );

    let status = status.map_err(|e| {
        Error::stage_failed(stage.as_str(), format!("failed to wait for {}: {}", program, e))
    })?;
    let duration_secs = start.elapsed().as_secs_f64();

    if status.success() {
        debug!(stage = %stage, "{} finished in {:.2}s", program, duration_secs);
    } else {
        warn!(stage = %stage, "{} exited with {} after {:.2}s", program, status, duration_secs);
    }

    Ok(CommandOutput {
        status,
        duration_secs,
        stdout,
        stderr,
    })
}
