//! Owns one interpreter subprocess: framing, timeouts, stderr draining, and
//! the process-group lifecycle. See SPEC_FULL.md §4.2.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::ReplPoolError;
use crate::repl::sampler::Sampler;

/// Opaque identity, stable for the worker's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(Uuid);

impl WorkerId {
    fn new() -> Self {
        WorkerId(Uuid::new_v4())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub repl_uuid: String,
    pub cpu_max: f64,
    pub memory_max: u64,
}

pub struct SendOutcome {
    pub response: serde_json::Value,
    pub elapsed: Duration,
    pub diagnostics: Option<Diagnostics>,
}

enum WorkerState {
    New,
    Running(RunningWorker),
    Closed,
}

struct RunningWorker {
    child: tokio::process::Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr_buf: Arc<AsyncMutex<Vec<u8>>>,
    stderr_task: JoinHandle<()>,
    sampler: Sampler,
}

/// One interpreter subprocess plus its bookkeeping. `NEW` until [`Worker::start`]
/// is called; `RUNNING` until [`Worker::close`] or a crash detected mid-`send`
/// transitions it to `CLOSED`.
pub struct Worker {
    id: WorkerId,
    header: String,
    max_uses: u32,
    max_mem_mib: u64,
    use_count: u32,
    created_at: Instant,
    state: WorkerState,
}

impl Worker {
    pub fn new(header: String, max_uses: u32, max_mem_mib: u64) -> Self {
        Worker {
            id: WorkerId::new(),
            header,
            max_uses,
            max_mem_mib,
            use_count: 0,
            created_at: Instant::now(),
            state: WorkerState::New,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, WorkerState::Running(_))
    }

    /// A worker with a non-blank header spends its first use loading the
    /// header, so its effective body quota is `max_uses`.
    pub fn exhausted(&self) -> bool {
        let header_tax = if self.header.trim().is_empty() { 0 } else { 1 };
        self.use_count >= self.max_uses + header_tax
    }

    /// Spawns the interpreter, places it in its own process group, installs an
    /// address-space rlimit where supported, and starts the background sampler.
    pub async fn start(&mut self, interpreter_path: &Path, cwd: &Path) -> Result<(), ReplPoolError> {
        let mut cmd = Command::new(interpreter_path);
        cmd.current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        install_memory_limit(&mut cmd, self.max_mem_mib);

        let mut child = cmd
            .spawn()
            .map_err(|e| ReplPoolError::SpawnFailed(format!("{}: {e}", interpreter_path.display())))?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = BufReader::new(child.stdout.take().expect("stdout was piped"));
        let stderr = child.stderr.take().expect("stderr was piped");

        let stderr_buf = Arc::new(AsyncMutex::new(Vec::new()));
        let stderr_task = spawn_stderr_drain(stderr, stderr_buf.clone());
        let sampler = Sampler::spawn(child.id());

        tracing::info!(worker_id = %self.id, header_bytes = self.header.len(), "REPL worker started");

        self.state = WorkerState::Running(RunningWorker {
            child,
            stdin,
            stdout,
            stderr_buf,
            stderr_task,
            sampler,
        });
        Ok(())
    }

    /// Frames `code` as a request, writes it, and reads back the next response
    /// frame. `is_header` suppresses the `env: 0` field on the first send.
    pub async fn send(&mut self, code: &str, debug: bool, is_header: bool) -> Result<SendOutcome, ReplPoolError> {
        let running = match &mut self.state {
            WorkerState::Running(r) => r,
            _ => return Err(ReplPoolError::ReplCrashed("worker is not running".to_string())),
        };

        let mut payload = serde_json::json!({ "cmd": code });
        if self.use_count != 0 && !is_header {
            payload["env"] = serde_json::json!(0);
        }

        let mut frame = serde_json::to_vec(&payload).map_err(|e| ReplPoolError::ProtocolError(e.to_string()))?;
        frame.extend_from_slice(b"\n\n");

        let start = Instant::now();

        running
            .stdin
            .write_all(&frame)
            .await
            .map_err(|e| ReplPoolError::ReplCrashed(format!("broken pipe on write: {e}")))?;
        running
            .stdin
            .flush()
            .await
            .map_err(|e| ReplPoolError::ReplCrashed(format!("broken pipe on flush: {e}")))?;

        let raw = read_frame(&mut running.stdout).await?;
        let elapsed = start.elapsed();

        let response: serde_json::Value =
            serde_json::from_slice(&raw).map_err(|e| ReplPoolError::ProtocolError(e.to_string()))?;

        let stderr_text = drain_stderr(&running.stderr_buf).await;
        if !stderr_text.is_empty() {
            return Err(ReplPoolError::InterpreterError(stderr_text));
        }

        self.use_count += 1;

        let diagnostics = if debug {
            let (cpu_max, memory_max) = running.sampler.peaks();
            Some(Diagnostics { repl_uuid: self.id.to_string(), cpu_max, memory_max })
        } else {
            None
        };

        tracing::debug!(worker_id = %self.id, elapsed_ms = elapsed.as_millis(), is_header, "REPL send completed");

        Ok(SendOutcome { response, elapsed, diagnostics })
    }

    /// Runs [`Worker::send`] under a deadline. On expiry the worker's stdio state
    /// is indeterminate — the caller must destroy it rather than reuse it.
    pub async fn send_with_timeout(
        &mut self,
        code: &str,
        debug: bool,
        is_header: bool,
        timeout: Duration,
    ) -> Result<SendOutcome, ReplPoolError> {
        match tokio::time::timeout(timeout, self.send(code, debug, is_header)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(worker_id = %self.id, timeout_secs = timeout.as_secs_f64(), "REPL send timed out");
                Err(ReplPoolError::Timeout(timeout.as_secs_f64()))
            }
        }
    }

    /// Closes stdin, SIGKILLs the whole process group, waits for exit, and
    /// cancels the sampler. Consumes the worker — it cannot be reused after this.
    pub async fn close(mut self) {
        let running = match std::mem::replace(&mut self.state, WorkerState::Closed) {
            WorkerState::Running(r) => r,
            _ => return,
        };

        let RunningWorker { mut child, stdin, stderr_task, sampler, .. } = running;
        drop(stdin);

        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
        let _ = child.wait().await;
        stderr_task.abort();
        sampler.cancel();

        tracing::info!(worker_id = %self.id, use_count = self.use_count, "REPL worker closed");
    }
}

#[cfg(target_os = "linux")]
fn install_memory_limit(cmd: &mut Command, max_mem_mib: u64) {
    use std::os::unix::process::CommandExt;

    let limit_bytes = max_mem_mib.saturating_mul(1024 * 1024);
    // SAFETY: the closure only calls async-signal-safe libc functions between
    // fork and exec, per the contract of `pre_exec`.
    unsafe {
        cmd.pre_exec(move || {
            let rlimit = libc::rlimit { rlim_cur: limit_bytes, rlim_max: limit_bytes };
            if libc::setrlimit(libc::RLIMIT_AS, &rlimit) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(target_os = "linux"))]
fn install_memory_limit(_cmd: &mut Command, _max_mem_mib: u64) {
    // RLIMIT_AS is not meaningfully enforceable on this platform (e.g. macOS);
    // the worker still runs, just without the address-space ceiling.
}

async fn read_frame(stdout: &mut BufReader<ChildStdout>) -> Result<Vec<u8>, ReplPoolError> {
    let mut acc = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let n = stdout
            .read_line(&mut line)
            .await
            .map_err(|e| ReplPoolError::ReplCrashed(format!("stdout read error: {e}")))?;
        if n == 0 {
            if acc.is_empty() {
                return Err(ReplPoolError::ReplCrashed("EOF on stdout with no data".to_string()));
            }
            break;
        }
        if line.trim().is_empty() {
            break;
        }
        acc.extend_from_slice(line.as_bytes());
    }
    Ok(acc)
}

fn spawn_stderr_drain(mut stderr: ChildStderr, buf: Arc<AsyncMutex<Vec<u8>>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match stderr.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    let mut guard = buf.lock().await;
                    guard.extend_from_slice(&chunk[..n]);
                }
                Err(_) => break,
            }
        }
    })
}

async fn drain_stderr(buf: &Arc<AsyncMutex<Vec<u8>>>) -> String {
    let mut guard = buf.lock().await;
    let text = String::from_utf8_lossy(&guard).trim().to_string();
    guard.clear();
    text
}
