//! Subprocess transport for the kernel worker.
//!
//! Spawns `python -u -c <driver>` and speaks a JSON-lines protocol over
//! its stdin/stdout. The driver holds the interpreter namespace; this
//! side owns the child's lifecycle and the request/response framing.

use cl_domain::error::{Error, Result};
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// The embedded Python driver.
const WORKER_SRC: &str = include_str!("worker.py");

/// How long a fresh worker gets to print its ready line.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) struct Worker {
    notebook_id: String,
    child: Child,
    stdin: ChildStdin,
    stdout: tokio::io::Lines<BufReader<ChildStdout>>,
}

impl Worker {
    /// Spawn a worker and wait for its ready line.
    pub(crate) async fn spawn(python_bin: &str, notebook_id: &str) -> Result<Self> {
        let mut cmd = Command::new(python_bin);
        cmd.arg("-u")
            .arg("-c")
            .arg(WORKER_SRC)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| Error::KernelExec {
            notebook_id: notebook_id.to_string(),
            message: format!("failed to spawn {python_bin}: {e}"),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| Error::KernelExec {
            notebook_id: notebook_id.to_string(),
            message: "worker stdin unavailable".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| Error::KernelExec {
            notebook_id: notebook_id.to_string(),
            message: "worker stdout unavailable".into(),
        })?;

        // Drain stderr into the log so interpreter noise is visible but
        // never blocks the child on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            let nb = notebook_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(notebook_id = %nb, line = %line, "kernel stderr");
                }
            });
        }

        let mut worker = Self {
            notebook_id: notebook_id.to_string(),
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        let ready = worker.read_response(STARTUP_TIMEOUT).await?;
        if ready.get("ready").and_then(Value::as_bool) != Some(true) {
            worker.kill().await;
            return Err(Error::KernelExec {
                notebook_id: notebook_id.to_string(),
                message: format!("unexpected worker greeting: {ready}"),
            });
        }

        tracing::info!(notebook_id = %notebook_id, "kernel worker started");
        Ok(worker)
    }

    /// Send one request line and wait for the matching response line.
    ///
    /// The timeout here is the outer guard: the worker enforces its own
    /// execution cap and answers within it, so tripping this one means
    /// the worker itself is wedged.
    pub(crate) async fn request(&mut self, req: &Value, timeout: Duration) -> Result<Value> {
        let mut line = serde_json::to_string(req)?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.exec_err(format!("worker stdin write failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| self.exec_err(format!("worker stdin flush failed: {e}")))?;

        self.read_response(timeout).await
    }

    async fn read_response(&mut self, timeout: Duration) -> Result<Value> {
        match tokio::time::timeout(timeout, self.stdout.next_line()).await {
            Err(_) => Err(Error::Timeout(format!(
                "kernel {} did not respond within {}s",
                self.notebook_id,
                timeout.as_secs()
            ))),
            Ok(Ok(Some(line))) => {
                serde_json::from_str(&line).map_err(|e| {
                    self.exec_err(format!("malformed worker response: {e}"))
                })
            }
            Ok(Ok(None)) => Err(self.exec_err("worker exited".into())),
            Ok(Err(e)) => Err(self.exec_err(format!("worker stdout read failed: {e}"))),
        }
    }

    /// Best-effort graceful shutdown, then kill.
    pub(crate) async fn shutdown(mut self) {
        let _ = self
            .stdin
            .write_all(b"{\"op\":\"shutdown\"}\n")
            .await;
        let _ = self.stdin.flush().await;
        self.kill().await;
    }

    pub(crate) async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }

    fn exec_err(&self, message: String) -> Error {
        Error::KernelExec {
            notebook_id: self.notebook_id.clone(),
            message,
        }
    }
}
