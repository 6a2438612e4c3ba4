//! Subprocess runner (spec.md §4.2, C2).
//!
//! Two modes: [`run_batched`] feeds a byte buffer on stdin and collects full
//! stdout/stderr under a wall-clock deadline; [`spawn_streaming`] spawns a
//! program and hands back a live handle whose stdout a caller (the Git
//! gateway, in `aurcache-server`) can attach to an HTTP response body.

use crate::error::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

/// Outcome of a batched subprocess invocation.
#[derive(Debug)]
pub struct BatchedOutput {
    pub ok: bool,
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// A live, still-running subprocess whose stdout streams to the caller.
///
/// `stdout` is taken out for streaming; `child` remains so the caller can
/// await its exit status once the body is fully written.
pub struct StreamingHandle {
    pub stdout: ChildStdout,
    pub child: Child,
}

/// Runs `program` with `args`, feeding `stdin` and collecting stdout/stderr,
/// under `cwd` if given, killing it if `timeout` elapses.
pub async fn run_batched(
    program: &str,
    args: &[&str],
    stdin: &[u8],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<BatchedOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;

    let mut child_stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::InvalidInput("child has no stdin handle".to_string()))?;
    let stdin_bytes = stdin.to_vec();
    let write_task = tokio::spawn(async move {
        let _ = child_stdin.write_all(&stdin_bytes).await;
        drop(child_stdin);
    });

    let wait = async {
        let output = child.wait_with_output().await?;
        Ok::<_, std::io::Error>(output)
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(Ok(output)) => {
            let _ = write_task.await;
            Ok(BatchedOutput {
                ok: output.status.success(),
                exit_code: output.status.code(),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
        Ok(Err(err)) => Err(Error::Io(err)),
        Err(_) => {
            warn!(program, timeout_secs = timeout.as_secs(), "subprocess timed out, killing");
            Err(Error::SubprocessTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            })
        }
    }
}

/// Spawns `program` with `args` under `cwd`, returning a handle whose stdout
/// is ready to stream. No input is written to stdin. Stderr is logged as it
/// becomes available once the process exits (streaming mode does not
/// collect it incrementally, matching spec.md §4.2's "logged" contract).
pub fn spawn_streaming(program: &str, args: &[&str], cwd: Option<&Path>) -> Result<StreamingHandle> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::InvalidInput("child has no stdout handle".to_string()))?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, BufReader};
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(stderr = %line, "subprocess stderr");
            }
        });
    }

    debug!(program, "spawned streaming subprocess");
    Ok(StreamingHandle { stdout, child })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_batched_captures_stdout_and_exit_code() {
        let output = run_batched("echo", &["hello"], &[], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.ok);
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn run_batched_feeds_stdin_through_cat() {
        let output = run_batched("cat", &[], b"piped bytes", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.ok);
        assert_eq!(output.stdout, b"piped bytes");
    }

    #[tokio::test]
    async fn run_batched_reports_nonzero_exit() {
        let output = run_batched("sh", &["-c", "exit 7"], &[], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!output.ok);
        assert_eq!(output.exit_code, Some(7));
    }

    #[tokio::test]
    async fn run_batched_times_out_and_kills_child() {
        let result = run_batched("sleep", &["5"], &[], None, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::SubprocessTimeout { .. })));
    }

    #[tokio::test]
    async fn spawn_streaming_yields_readable_stdout() {
        let handle = spawn_streaming("echo", &["streamed"], None).unwrap();
        let mut stdout = handle.stdout;
        let mut child = handle.child;
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await.unwrap();
        let status = child.wait().await.unwrap();
        assert!(status.success());
        assert_eq!(String::from_utf8_lossy(&buf).trim(), "streamed");
    }
}
