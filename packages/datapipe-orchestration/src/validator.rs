//! External process validator
//!
//! Runs `executable <args...> <suite>` with both output streams captured.
//! Waiting for exit and draining the two pipes happen together, and that
//! combined future races the timeout and the caller's cancellation. Whichever
//! branch loses, the child is killed and reaped before returning.

use crate::config::ValidatorConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[async_trait]
pub trait DataValidator: Send + Sync {
    /// Run `suite` and return the validator's report
    async fn validate(&self, suite: &str, cancel: &CancellationToken) -> Result<String>;
}

pub struct ExternalValidator {
    executable: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

enum Outcome {
    Exited(std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)>),
    TimedOut,
    Cancelled,
}

impl ExternalValidator {
    pub fn new(executable: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &ValidatorConfig) -> Self {
        Self::new(config.executable.clone(), config.args.clone(), config.timeout())
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    async fn spawn(&self, suite: &str) -> Result<Child> {
        match tokio::fs::metadata(&self.executable).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(PipelineError::ValidatorNotFound(self.executable.clone())),
        }

        Command::new(&self.executable)
            .args(&self.args)
            .arg(suite)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PipelineError::ValidatorNotFound(self.executable.clone())
                } else {
                    PipelineError::unavailable("validator", format!("failed to start: {}", e))
                }
            })
    }
}

#[async_trait]
impl DataValidator for ExternalValidator {
    async fn validate(&self, suite: &str, cancel: &CancellationToken) -> Result<String> {
        let started = Instant::now();
        let mut child = self.spawn(suite).await?;
        let pid = child.id();
        debug!(?pid, suite, "validator started");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = {
            let run = async {
                let (status, out, err) =
                    tokio::join!(child.wait(), read_all(stdout), read_all(stderr));
                Ok::<_, std::io::Error>((status?, out?, err?))
            };

            tokio::select! {
                result = run => Outcome::Exited(result),
                _ = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
                _ = cancel.cancelled() => Outcome::Cancelled,
            }
        };

        match outcome {
            Outcome::Exited(Ok((status, out, err))) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                if status.success() {
                    info!(suite, elapsed_ms, "validation passed");
                    Ok(String::from_utf8_lossy(&out).into_owned())
                } else {
                    let stderr = String::from_utf8_lossy(&err).trim().to_string();
                    warn!(suite, code = ?status.code(), elapsed_ms, "validation failed");
                    Err(PipelineError::ValidationFailed {
                        exit_code: status.code(),
                        stderr,
                    })
                }
            }
            Outcome::Exited(Err(e)) => {
                kill(&mut child).await;
                Err(PipelineError::unavailable(
                    "validator",
                    format!("i/o error while running: {}", e),
                ))
            }
            Outcome::TimedOut => {
                warn!(suite, ?pid, timeout = ?self.timeout, "validation timed out, killing");
                kill(&mut child).await;
                Err(PipelineError::ValidationTimeout(self.timeout))
            }
            Outcome::Cancelled => {
                info!(suite, ?pid, "validation cancelled, killing");
                kill(&mut child).await;
                Err(PipelineError::cancelled("validation"))
            }
        }
    }
}

async fn read_all<R>(stream: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "kill failed, child already exited");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "failed to reap validator process");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Run scripts through `/bin/sh` so the script file itself is never exec'd
    fn script(dir: &TempDir, body: &str) -> ExternalValidator {
        let path = dir.path().join("validator.sh");
        std::fs::write(&path, body).unwrap();
        ExternalValidator::new(
            "/bin/sh",
            vec![path.to_string_lossy().into_owned()],
            Duration::from_millis(500),
        )
    }

    fn process_alive(pid: &str) -> bool {
        std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_success_returns_stdout() {
        let dir = TempDir::new().unwrap();
        let validator = script(&dir, "echo \"suite=$1 success=true\"\n");

        let report = validator
            .validate("orders_suite", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.trim(), "suite=orders_suite success=true");
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let validator = script(&dir, "echo 'expectation failed: not_null(id)' >&2\nexit 3\n");

        let err = validator
            .validate("orders_suite", &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            PipelineError::ValidationFailed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "expectation failed: not_null(id)");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let validator = script(
            &dir,
            &format!("echo $$ > {}\nexec sleep 30\n", pid_file.display()),
        );

        let started = Instant::now();
        let err = validator
            .validate("slow_suite", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ValidationTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(!process_alive(&pid), "validator process {} still running", pid.trim());
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let dir = TempDir::new().unwrap();
        let validator = ExternalValidator::new(
            "/bin/sh",
            vec![{
                let path = dir.path().join("validator.sh");
                std::fs::write(&path, "exec sleep 30\n").unwrap();
                path.to_string_lossy().into_owned()
            }],
            Duration::from_secs(60),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = validator.validate("suite", &cancel).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let validator = ExternalValidator::new(
            "/nonexistent/great_expectations",
            vec![],
            Duration::from_secs(5),
        );
        let err = validator
            .validate("suite", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ValidatorNotFound(_)));
        assert_eq!(err.dependency(), Some("validator"));
    }
}
