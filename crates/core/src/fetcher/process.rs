//! Cancellable subprocess execution for the retrieval tool.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::FetchError;

/// Captured result of a finished tool invocation.
#[derive(Debug)]
pub(crate) struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Diagnostic text for error reporting: stderr, or stdout when stderr is empty.
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!("Failed to read tool output: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// SIGKILL the process group led by `pgid`.
///
/// The tool is spawned as a group leader, so this also reaches helpers it
/// started (the ffmpeg merge, for one).
#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("Failed to kill process group {}: {}", pgid, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Kill the tool and everything it started, then reap the child so no
/// orphan is left behind.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_group(pid);
    }
    if let Err(e) = child.kill().await {
        warn!("Failed to kill retrieval tool (pid {:?}): {}", child.id(), e);
    }
}

/// Run `command` (program followed by fixed leading args) with `args`.
///
/// Arguments are passed as a vector, never through a shell. When `cancel`
/// fires or `timeout` elapses the process is killed and awaited before
/// returning.
pub(crate) async fn run_tool(
    command: &[String],
    args: &[String],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ToolOutput, FetchError> {
    let Some((program, leading)) = command.split_first() else {
        return Err(FetchError::ToolNotFound {
            path: PathBuf::new(),
        });
    };

    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }

    let mut command = Command::new(program);
    command
        .args(leading)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::ToolNotFound {
                    path: PathBuf::from(program),
                }
            } else {
                FetchError::Io(e)
            }
        })?;

    let pgid = child.id();
    debug!("Spawned {} (pid {:?})", program, pgid);

    // Drain both pipes concurrently so a chatty tool never blocks on a full pipe.
    let stdout_task = child.stdout.take().map(|out| tokio::spawn(read_all(out)));
    let stderr_task = child.stderr.take().map(|err| tokio::spawn(read_all(err)));

    let status = tokio::select! {
        status = child.wait() => {
            // Helpers that outlived the tool would hold the pipes open.
            if let Some(pgid) = pgid {
                kill_group(pgid);
            }
            status?
        }
        _ = cancel.cancelled() => {
            terminate(&mut child).await;
            return Err(FetchError::Cancelled);
        }
        _ = tokio::time::sleep(timeout) => {
            terminate(&mut child).await;
            return Err(FetchError::Timeout {
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = match stdout_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    Ok(ToolOutput {
        status,
        stdout,
        stderr,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string(), "tool".to_string()]
    }

    #[tokio::test]
    async fn test_captures_output_and_status() {
        let cancel = CancellationToken::new();
        let output = run_tool(
            &sh("echo out; echo err >&2; exit 3"),
            &[],
            Duration::from_secs(10),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.diagnostic().trim(), "err");
    }

    #[tokio::test]
    async fn test_passes_arguments_verbatim() {
        let cancel = CancellationToken::new();
        let output = run_tool(
            &sh("printf '%s\\n' \"$@\""),
            &["a b".to_string(), "$(id)".to_string()],
            Duration::from_secs(10),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(output.stdout, "a b\n$(id)\n");
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let cancel = CancellationToken::new();
        let result = run_tool(
            &["/nonexistent/ladle-tool".to_string()],
            &[],
            Duration::from_secs(1),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(FetchError::ToolNotFound { .. })));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let result = run_tool(&sh("exec sleep 30"), &[], Duration::from_millis(200), &cancel).await;
        assert!(matches!(result, Err(FetchError::Timeout { .. })));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    /// True once `pid` is gone or only a zombie waiting for init.
    #[cfg(target_os = "linux")]
    async fn wait_for_exit(pid: &str) -> bool {
        for _ in 0..200 {
            match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Err(_) => return true,
                Ok(stat) if stat.rsplit(')').next().is_some_and(|rest| rest.trim_start().starts_with('Z')) => {
                    return true
                }
                Ok(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        false
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancel_kills_background_helpers() {
        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("helper.pid");
        let script = format!(
            "sleep 30 & echo $! > '{}.tmp'; mv '{0}.tmp' '{0}'; wait",
            pid_file.display()
        );

        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        let watched = pid_file.clone();
        let canceller = tokio::spawn(async move {
            for _ in 0..500 {
                if watched.exists() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            trip.cancel();
        });

        let result = run_tool(&sh(&script), &[], Duration::from_secs(20), &cancel).await;
        canceller.await.unwrap();
        assert!(matches!(result, Err(FetchError::Cancelled)));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(wait_for_exit(pid.trim()).await, "helper {} survived cancel", pid.trim());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_background_helpers() {
        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("helper.pid");
        let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());

        let cancel = CancellationToken::new();
        let result = run_tool(&sh(&script), &[], Duration::from_secs(1), &cancel).await;
        assert!(matches!(result, Err(FetchError::Timeout { .. })));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(wait_for_exit(pid.trim()).await, "helper {} survived timeout", pid.trim());
    }

    #[tokio::test]
    async fn test_exit_does_not_wait_on_detached_helper() {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let output = run_tool(
            &sh("sleep 30 & echo done"),
            &[],
            Duration::from_secs(20),
            &cancel,
        )
        .await
        .unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout.trim(), "done");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancel_before_spawn() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_tool(&sh("exit 0"), &[], Duration::from_secs(1), &cancel).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }
}
