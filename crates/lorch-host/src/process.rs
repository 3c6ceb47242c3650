//! Supervision of external OS processes.
//!
//! Processes are always launched from an explicit argv with an explicit
//! environment overlay, never through a shell. Readiness of long-running
//! daemons is detected by tailing their log file for marker lines.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, OrchestratorResult};

/// One supervised process. `exit_code` stays `None` while it runs.
#[derive(Debug, Clone, Default)]
pub struct ManagedProcess {
    pub pid: u32,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub log_path: Option<PathBuf>,
}

/// Result of waiting for a log marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerOutcome {
    Ready,
    Failed(String),
    TimedOut,
}

impl MarkerOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, MarkerOutcome::Ready)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    processes: Arc<Mutex<HashMap<u32, ManagedProcess>>>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `command` in its own process group with stdout and stderr
    /// appended to `log_path`. The process outlives the returned handle.
    pub fn launch_detached<I, S>(
        &self,
        command: impl AsRef<OsStr>,
        args: I,
        env: &[(String, String)],
        log_path: &Path,
    ) -> OrchestratorResult<u32>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|e| {
                OrchestratorError::Launch(format!("open log {}: {e}", log_path.display()))
            })?;
        let log_err = log
            .try_clone()
            .map_err(|e| OrchestratorError::Launch(format!("clone log handle: {e}")))?;

        let mut cmd = Command::new(command.as_ref());
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            OrchestratorError::Launch(format!("spawn {}: {e}", command.as_ref().to_string_lossy()))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| OrchestratorError::Launch("failed to get process ID".into()))?;

        self.lock().insert(
            pid,
            ManagedProcess {
                pid,
                log_path: Some(log_path.to_path_buf()),
                ..Default::default()
            },
        );

        // Reap the child so it never lingers as a zombie and record its exit.
        let processes = self.processes.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(err) => {
                    warn!(pid, "wait on detached process failed: {err}");
                    -1
                }
            };
            debug!(pid, code, "detached process exited");
            let mut table = processes.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = table.get_mut(&pid) {
                entry.exit_code = Some(code);
            }
        });

        info!(pid, log = %log_path.display(), "launched detached process");
        Ok(pid)
    }

    /// Run to completion and return stdout, or the exit code and stderr on
    /// a non-zero exit. `env` is layered over the inherited environment of
    /// the child only.
    pub async fn run_and_capture<I, S>(
        &self,
        command: impl AsRef<OsStr>,
        args: I,
        env: &[(String, String)],
    ) -> OrchestratorResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(command.as_ref());
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            OrchestratorError::Launch(format!("spawn {}: {e}", command.as_ref().to_string_lossy()))
        })?;
        let pid = child.id().unwrap_or_default();

        let Some(mut stdout) = child.stdout.take() else {
            return Err(OrchestratorError::Launch("missing child stdout pipe".into()));
        };
        let Some(mut stderr) = child.stderr.take() else {
            return Err(OrchestratorError::Launch("missing child stderr pipe".into()));
        };
        let stdout_task = tokio::spawn(async move {
            let mut out = Vec::new();
            let _ = stdout.read_to_end(&mut out).await;
            out
        });
        let stderr_task = tokio::spawn(async move {
            let mut out = Vec::new();
            let _ = stderr.read_to_end(&mut out).await;
            out
        });

        let status = child
            .wait()
            .await
            .map_err(|e| OrchestratorError::Launch(format!("wait for pid {pid}: {e}")))?;
        let exit_code = status.code().unwrap_or(-1);
        let process = ManagedProcess {
            pid,
            stdout: String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned(),
            exit_code: Some(exit_code),
            log_path: None,
        };

        if exit_code == 0 {
            return Ok(process.stdout);
        }
        warn!(
            pid,
            exit_code,
            stderr = %process.stderr.trim(),
            stdout = %process.stdout.trim(),
            "process failed"
        );
        Err(OrchestratorError::ProcessExecution {
            exit_code,
            stderr: process.stderr,
        })
    }

    /// Send SIGTERM. A process that is already gone is not an error.
    pub fn stop(&self, pid: u32) {
        self.lock().remove(&pid);
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return;
        };
        // SAFETY: kill(2) with a concrete pid has no memory-safety preconditions.
        let rc = unsafe { libc::kill(raw, libc::SIGTERM) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                debug!(pid, "process already stopped");
            } else {
                warn!(pid, "failed to stop process: {err}");
            }
        } else {
            info!(pid, "sent SIGTERM");
        }
    }

    /// Whether `pid` is alive: not reaped by us and still signalable.
    pub fn is_running(&self, pid: u32) -> bool {
        if let Some(entry) = self.lock().get(&pid) {
            if entry.exit_code.is_some() {
                return false;
            }
        }
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: signal 0 only checks that the pid exists.
        unsafe { libc::kill(raw, 0) == 0 }
    }

    /// Snapshot of a tracked process.
    pub fn process(&self, pid: u32) -> Option<ManagedProcess> {
        self.lock().get(&pid).cloned()
    }

    /// Tail `path` from its current end until a marker shows up.
    pub async fn await_log_marker(
        &self,
        path: &Path,
        success_marker: &str,
        failure_markers: &[String],
        poll_interval: Duration,
        max_wait: Duration,
    ) -> MarkerOutcome {
        LogTail::at_end(path)
            .await
            .wait_for(success_marker, failure_markers, poll_interval, max_wait)
            .await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, ManagedProcess>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A read cursor over a log file that another process appends to.
///
/// Create it before launching the writer to see every line the writer
/// produces. The file may not exist yet; it is opened lazily and read with
/// shared access. Incomplete trailing lines are held back until their
/// newline arrives.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    offset: u64,
    pending: String,
}

impl LogTail {
    /// Position at the current end of `path` (zero if it does not exist).
    pub async fn at_end(path: &Path) -> Self {
        let offset = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
        Self {
            path: path.to_path_buf(),
            offset,
            pending: String::new(),
        }
    }

    /// Position at the start of `path`.
    pub fn from_start(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            offset: 0,
            pending: String::new(),
        }
    }

    /// Complete lines appended since the last call.
    pub async fn read_new_lines(&mut self) -> std::io::Result<Vec<String>> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let len = file.metadata().await?.len();
        if len < self.offset {
            // truncated or replaced
            self.offset = 0;
            self.pending.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        self.offset += buf.len() as u64;
        self.pending.push_str(&String::from_utf8_lossy(&buf));

        let mut lines = Vec::new();
        while let Some(idx) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=idx).collect();
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        Ok(lines)
    }

    /// Poll until a line contains `success_marker` (Ready) or any of
    /// `failure_markers` (Failed), or `max_wait` elapses.
    pub async fn wait_for(
        mut self,
        success_marker: &str,
        failure_markers: &[String],
        poll_interval: Duration,
        max_wait: Duration,
    ) -> MarkerOutcome {
        let scan = async {
            loop {
                match self.read_new_lines().await {
                    Ok(lines) => {
                        for line in lines {
                            if line.contains(success_marker) {
                                return MarkerOutcome::Ready;
                            }
                            if failure_markers.iter().any(|m| line.contains(m.as_str())) {
                                return MarkerOutcome::Failed(line);
                            }
                        }
                    }
                    Err(err) => warn!(path = %self.path.display(), "log tail read failed: {err}"),
                }
                tokio::time::sleep(poll_interval).await;
            }
        };
        match tokio::time::timeout(max_wait, scan).await {
            Ok(outcome) => outcome,
            Err(_) => MarkerOutcome::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    fn shell_available() -> bool {
        Path::new("/bin/sh").exists()
    }

    fn markers() -> Vec<String> {
        vec!["error".into(), "panic".into()]
    }

    #[tokio::test]
    async fn run_and_capture_returns_stdout() {
        if !shell_available() {
            eprintln!("skipping run_and_capture_returns_stdout: /bin/sh not available");
            return;
        }
        let sup = ProcessSupervisor::new();
        let out = sup
            .run_and_capture("/bin/sh", ["-c", "printf 'line1\\nline2\\n'; echo noise >&2"], &[])
            .await
            .expect("run");
        assert_eq!(out, "line1\nline2\n");
    }

    #[tokio::test]
    async fn run_and_capture_reports_exit_code_and_stderr() {
        if !shell_available() {
            eprintln!("skipping run_and_capture_reports_exit_code_and_stderr");
            return;
        }
        let sup = ProcessSupervisor::new();
        let err = sup
            .run_and_capture("/bin/sh", ["-c", "echo boom >&2; exit 3"], &[])
            .await
            .expect_err("should fail");
        match err {
            OrchestratorError::ProcessExecution { exit_code, stderr } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr.trim(), "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn env_overlay_reaches_child_only() {
        if !shell_available() {
            eprintln!("skipping env_overlay_reaches_child_only");
            return;
        }
        let sup = ProcessSupervisor::new();
        let env = vec![("LORCH_TEST_OVERLAY".to_string(), "overlay-value".to_string())];
        let out = sup
            .run_and_capture("/bin/sh", ["-c", "printf %s \"$LORCH_TEST_OVERLAY\""], &env)
            .await
            .expect("run");
        assert_eq!(out, "overlay-value");
        assert!(std::env::var("LORCH_TEST_OVERLAY").is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let sup = ProcessSupervisor::new();
        let err = sup
            .run_and_capture("/nonexistent/lorch-binary-12345", Vec::<String>::new(), &[])
            .await
            .expect_err("should fail");
        assert!(matches!(err, OrchestratorError::Launch(_)), "{err:?}");
    }

    #[tokio::test]
    async fn detached_process_logs_and_stops() {
        if !shell_available() {
            eprintln!("skipping detached_process_logs_and_stops");
            return;
        }
        let dir = TempDir::new().expect("tmp");
        let log = dir.path().join("node.log");
        let sup = ProcessSupervisor::new();
        let tail = LogTail::at_end(&log).await;
        let pid = sup
            .launch_detached(
                "/bin/sh",
                ["-c", "echo 'node is up'; exec sleep 30"],
                &[],
                &log,
            )
            .expect("launch");
        assert!(pid > 0);
        let tracked = sup.process(pid).expect("tracked");
        assert_eq!(tracked.log_path.as_deref(), Some(log.as_path()));

        let outcome = tail
            .wait_for("node is up", &markers(), Duration::from_millis(20), Duration::from_secs(5))
            .await;
        assert_eq!(outcome, MarkerOutcome::Ready);
        assert!(sup.is_running(pid));

        sup.stop(pid);
        let mut stopped = false;
        for _ in 0..100 {
            if !sup.is_running(pid) {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(stopped, "process {pid} still running");
        // stopping twice is harmless
        sup.stop(pid);
    }

    #[tokio::test]
    async fn marker_wait_tolerates_missing_file_and_partial_lines() {
        let dir = TempDir::new().expect("tmp");
        let log = dir.path().join("service.log");
        let tail = LogTail::at_end(&log).await;

        let writer_path = log.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut f = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&writer_path)
                .await
                .unwrap();
            f.write_all(b"booting\nGraphiQL").await.unwrap();
            f.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            f.write_all(b" IDE: http://localhost:8080\n").await.unwrap();
            f.flush().await.unwrap();
        });

        let outcome = tail
            .wait_for("GraphiQL IDE", &markers(), Duration::from_millis(10), Duration::from_secs(5))
            .await;
        writer.await.unwrap();
        assert_eq!(outcome, MarkerOutcome::Ready);
    }

    #[tokio::test]
    async fn marker_wait_reports_failure_line() {
        let dir = TempDir::new().expect("tmp");
        let log = dir.path().join("service.log");
        tokio::fs::write(&log, "old error from a previous run\n").await.unwrap();

        let sup = ProcessSupervisor::new();
        let failure = markers();
        let wait = sup.await_log_marker(
            &log,
            "GraphiQL IDE",
            &failure,
            Duration::from_millis(10),
            Duration::from_secs(5),
        );
        let append = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut f = tokio::fs::OpenOptions::new().append(true).open(&log).await.unwrap();
            f.write_all(b"thread 'main' panicked: storage locked\n").await.unwrap();
        };
        let (outcome, ()) = tokio::join!(wait, append);
        assert_eq!(
            outcome,
            MarkerOutcome::Failed("thread 'main' panicked: storage locked".into())
        );
    }

    #[tokio::test]
    async fn marker_wait_times_out() {
        let dir = TempDir::new().expect("tmp");
        let log = dir.path().join("quiet.log");
        let outcome = LogTail::from_start(&log)
            .wait_for("ready", &markers(), Duration::from_millis(10), Duration::from_millis(100))
            .await;
        assert_eq!(outcome, MarkerOutcome::TimedOut);
        assert!(!outcome.is_ready());
    }
}
