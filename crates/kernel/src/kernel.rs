//! One persistent interpreter namespace tied to a notebook.
//!
//! The namespace lives in the worker subprocess; this side owns the
//! execution counter, the usage timestamps, and the per-kernel lock that
//! serializes executes (cell outputs and the counter depend on previous
//! mutations, so serialization is a correctness requirement).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;

use cl_domain::error::{Error, Result};
use cl_domain::notebook::CellOutput;

use crate::worker::Worker;

/// Extra slack on the protocol round-trip beyond the in-worker cap.
/// Tripping it means the worker is wedged, not that user code is slow.
const GUARD_GRACE: Duration = Duration::from_secs(10);

/// Result of one `execute` call.
#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    pub success: bool,
    pub outputs: Vec<CellOutput>,
    pub execution_count: u32,
    pub execution_time_ms: u64,
}

pub struct Kernel {
    notebook_id: String,
    python_bin: String,
    /// `None` means no live worker; the next execute respawns one with a
    /// fresh namespace (the counter is preserved).
    worker: Mutex<Option<Worker>>,
    execution_count: AtomicU32,
    created_at: DateTime<Utc>,
    last_used_at: RwLock<DateTime<Utc>>,
}

impl Kernel {
    /// Create a kernel handle. The worker is spawned lazily on first use.
    pub fn new(notebook_id: impl Into<String>, python_bin: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            notebook_id: notebook_id.into(),
            python_bin: python_bin.into(),
            worker: Mutex::new(None),
            execution_count: AtomicU32::new(0),
            created_at: now,
            last_used_at: RwLock::new(now),
        }
    }

    pub fn notebook_id(&self) -> &str {
        &self.notebook_id
    }

    pub fn execution_count(&self) -> u32 {
        self.execution_count.load(Ordering::Acquire)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used_at(&self) -> DateTime<Utc> {
        *self.last_used_at.read()
    }

    fn touch(&self) {
        *self.last_used_at.write() = Utc::now();
    }

    /// Execute a code fragment in the shared namespace.
    ///
    /// The counter increments before dispatch so even failed executes
    /// consume a count. User exceptions and in-worker timeouts come back
    /// as `error` outputs with `success: false`; only infrastructure
    /// failures (wedged or dead worker) return `Err`.
    pub async fn execute(&self, code: &str, timeout: Duration) -> Result<ExecuteOutcome> {
        self.touch();
        let count = self.execution_count.fetch_add(1, Ordering::AcqRel) + 1;

        let mut guard = self.worker.lock().await;
        if guard.is_none() {
            *guard = Some(Worker::spawn(&self.python_bin, &self.notebook_id).await?);
        }
        let worker = guard.as_mut().expect("worker just ensured");

        let req = serde_json::json!({
            "op": "execute",
            "code": code,
            "timeout_secs": timeout.as_secs(),
        });

        match worker.request(&req, timeout + GUARD_GRACE).await {
            Ok(resp) => {
                let outcome = parse_execute_response(&self.notebook_id, &resp, count)?;
                Ok(outcome)
            }
            Err(e) => {
                // The worker is unusable; drop it so the next execute
                // respawns a fresh namespace.
                tracing::warn!(
                    notebook_id = %self.notebook_id,
                    error = %e,
                    "kernel worker lost, will respawn on next use"
                );
                if let Some(mut w) = guard.take() {
                    w.kill().await;
                }
                Err(e)
            }
        }
    }

    /// User-visible variables: name → type name.
    pub async fn variables(&self) -> Result<HashMap<String, String>> {
        self.touch();

        let mut guard = self.worker.lock().await;
        if guard.is_none() {
            *guard = Some(Worker::spawn(&self.python_bin, &self.notebook_id).await?);
        }
        let worker = guard.as_mut().expect("worker just ensured");

        let resp = match worker
            .request(&serde_json::json!({"op": "variables"}), GUARD_GRACE)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                if let Some(mut w) = guard.take() {
                    w.kill().await;
                }
                return Err(e);
            }
        };

        let vars = resp
            .get("variables")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::KernelExec {
                notebook_id: self.notebook_id.clone(),
                message: format!("malformed variables response: {resp}"),
            })?;

        Ok(vars
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|t| (k.clone(), t.to_string())))
            .collect())
    }

    /// Clear the namespace, reseed init bindings, reset the counter.
    pub async fn reset(&self) -> Result<()> {
        let mut guard = self.worker.lock().await;
        if let Some(worker) = guard.as_mut() {
            match worker
                .request(&serde_json::json!({"op": "reset"}), GUARD_GRACE)
                .await
            {
                Ok(_) => {}
                Err(e) => {
                    // A dead worker is as reset as it gets.
                    tracing::warn!(
                        notebook_id = %self.notebook_id,
                        error = %e,
                        "reset lost the worker"
                    );
                    if let Some(mut w) = guard.take() {
                        w.kill().await;
                    }
                }
            }
        }
        self.execution_count.store(0, Ordering::Release);
        Ok(())
    }

    /// Tear down the worker. The handle must not be used afterwards.
    pub async fn destroy(&self) {
        let mut guard = self.worker.lock().await;
        if let Some(worker) = guard.take() {
            worker.shutdown().await;
        }
        tracing::info!(notebook_id = %self.notebook_id, "kernel destroyed");
    }

    /// Test/sweeper hook: backdate the last-used timestamp.
    pub fn set_last_used(&self, at: DateTime<Utc>) {
        *self.last_used_at.write() = at;
    }
}

fn parse_execute_response(notebook_id: &str, resp: &Value, count: u32) -> Result<ExecuteOutcome> {
    let ok = resp.get("ok").and_then(Value::as_bool).unwrap_or(false);
    let duration_ms = resp
        .get("duration_ms")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let outputs: Vec<CellOutput> = match resp.get("outputs") {
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| Error::KernelExec {
            notebook_id: notebook_id.to_string(),
            message: format!("malformed outputs: {e}"),
        })?,
        None => Vec::new(),
    };

    Ok(ExecuteOutcome {
        success: ok,
        outputs,
        execution_count: count,
        execution_time_ms: duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_domain::notebook::StreamName;

    fn kernel(name: &str) -> Kernel {
        Kernel::new(name, "python3")
    }

    const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn state_is_shared_across_executes() {
        let k = kernel("nb-shared");
        let first = k.execute("x = 41", EXEC_TIMEOUT).await.unwrap();
        assert!(first.success);
        assert!(first.outputs.is_empty());
        assert_eq!(first.execution_count, 1);

        let second = k.execute("x + 1", EXEC_TIMEOUT).await.unwrap();
        assert!(second.success);
        assert_eq!(second.execution_count, 2);
        assert_eq!(
            second.outputs,
            vec![CellOutput::ExecuteResult { text: "42".into() }]
        );

        k.destroy().await;
    }

    #[tokio::test]
    async fn stdout_is_captured_as_stream_output() {
        let k = kernel("nb-stdout");
        let out = k.execute("print('hello')", EXEC_TIMEOUT).await.unwrap();
        assert!(out.success);
        assert_eq!(
            out.outputs,
            vec![CellOutput::Stream {
                name: StreamName::Stdout,
                text: "hello\n".into()
            }]
        );
        k.destroy().await;
    }

    #[tokio::test]
    async fn trailing_statement_produces_no_result() {
        let k = kernel("nb-stmt");
        let out = k.execute("import json\ny = 2", EXEC_TIMEOUT).await.unwrap();
        assert!(out.success);
        assert!(out.outputs.is_empty());
        k.destroy().await;
    }

    #[tokio::test]
    async fn exception_becomes_error_output_and_counts() {
        let k = kernel("nb-err");
        let out = k.execute("1 / 0", EXEC_TIMEOUT).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.execution_count, 1);
        match &out.outputs[..] {
            [CellOutput::Error { ename, evalue, traceback }] => {
                assert_eq!(ename, "ZeroDivisionError");
                assert!(evalue.contains("zero"));
                assert!(!traceback.is_empty());
            }
            other => panic!("unexpected outputs: {other:?}"),
        }

        // The namespace survives the exception.
        let ok = k.execute("z = 7\nz", EXEC_TIMEOUT).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.execution_count, 2);
        k.destroy().await;
    }

    #[tokio::test]
    async fn partial_output_is_retained_on_failure() {
        let k = kernel("nb-partial");
        let out = k
            .execute("print('before')\nraise ValueError('boom')", EXEC_TIMEOUT)
            .await
            .unwrap();
        assert!(!out.success);
        assert!(matches!(
            &out.outputs[0],
            CellOutput::Stream { name: StreamName::Stdout, text } if text == "before\n"
        ));
        assert!(matches!(
            out.outputs.last().unwrap(),
            CellOutput::Error { ename, .. } if ename == "ValueError"
        ));
        k.destroy().await;
    }

    #[tokio::test]
    async fn in_worker_timeout_keeps_namespace() {
        let k = kernel("nb-timeout");
        k.execute("marker = 'alive'", EXEC_TIMEOUT).await.unwrap();

        let out = k
            .execute("import time\ntime.sleep(5)", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!out.success);
        assert!(matches!(
            out.outputs.last().unwrap(),
            CellOutput::Error { ename, .. } if ename == "TimeoutError"
        ));

        let check = k.execute("marker", EXEC_TIMEOUT).await.unwrap();
        assert!(check.success);
        assert_eq!(
            check.outputs,
            vec![CellOutput::ExecuteResult { text: "'alive'".into() }]
        );
        k.destroy().await;
    }

    #[tokio::test]
    async fn variables_exclude_private_and_callables() {
        let k = kernel("nb-vars");
        k.execute(
            "a = 1\n_hidden = 2\ndef f():\n    pass\nclass C:\n    pass\ns = 'txt'",
            EXEC_TIMEOUT,
        )
        .await
        .unwrap();

        let vars = k.variables().await.unwrap();
        assert_eq!(vars.get("a").map(String::as_str), Some("int"));
        assert_eq!(vars.get("s").map(String::as_str), Some("str"));
        assert!(!vars.contains_key("_hidden"));
        assert!(!vars.contains_key("f"));
        assert!(!vars.contains_key("C"));
        k.destroy().await;
    }

    #[tokio::test]
    async fn reset_clears_namespace_and_counter() {
        let k = kernel("nb-reset");
        k.execute("x = 1", EXEC_TIMEOUT).await.unwrap();
        assert_eq!(k.execution_count(), 1);

        k.reset().await.unwrap();
        assert_eq!(k.execution_count(), 0);
        assert!(k.variables().await.unwrap().is_empty());

        let out = k.execute("x", EXEC_TIMEOUT).await.unwrap();
        assert!(!out.success, "x must be gone after reset");
        k.destroy().await;
    }

    #[tokio::test]
    async fn warning_only_stderr_is_suppressed() {
        let k = kernel("nb-warn");
        let out = k
            .execute(
                "import sys\n_ = sys.stderr.write('WARNING: harmless\\n')",
                EXEC_TIMEOUT,
            )
            .await
            .unwrap();
        assert!(out.success);
        assert!(out.outputs.is_empty());

        let out = k
            .execute(
                "import sys\n_ = sys.stderr.write('WARNING: x\\nreal error\\n')",
                EXEC_TIMEOUT,
            )
            .await
            .unwrap();
        assert!(matches!(
            &out.outputs[..],
            [CellOutput::Stream { name: StreamName::Stderr, text }] if text.contains("real error")
        ));
        k.destroy().await;
    }
}
