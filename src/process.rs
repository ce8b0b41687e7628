use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::engine::EngineId;
use crate::error::{Error, Result};
use crate::event::{ActionEvent, CompletedEvent, Event};
use crate::runner::EventStream;

/// Maximum bytes we'll collect from stderr before truncating (§4.1).
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Maximum bytes for a single stdout line before it is treated as malformed
/// and the run is aborted (§4.2).
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Capacity of the bounded channel between the decoder task and the consumer
/// (§4.3: back-pressure, no per-event task spawning).
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Guard that kills a child process group on drop.
///
/// On Unix, SIGTERM is sent to the process group, followed by SIGKILL after a
/// short grace period if the group hasn't exited. Wrapped in `Arc` so every
/// task holding a clone keeps the child alive until all are done.
pub(crate) struct ChildGuard {
    pid: u32,
    killed: AtomicBool,
}

impl ChildGuard {
    fn new(pid: u32) -> Self {
        Self {
            pid,
            killed: AtomicBool::new(false),
        }
    }

    #[cfg(unix)]
    pub(crate) fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }

        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let pgid = Pid::from_raw(self.pid as i32);
        if let Err(e) = killpg(pgid, Signal::SIGTERM) {
            tracing::debug!("SIGTERM to pgid {} failed: {e}", self.pid);
            return;
        }

        let pid = self.pid;
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(2));
            let pgid = Pid::from_raw(pid as i32);
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                tracing::debug!("SIGKILL to pgid {} failed: {e}", pid);
            }
        });
    }

    #[cfg(windows)]
    pub(crate) fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = std::process::Command::new("taskkill")
            .args(["/PID", &self.pid.to_string(), "/T", "/F"])
            .output()
        {
            tracing::debug!("taskkill for pid {} failed: {e}", self.pid);
        }
    }

    #[cfg(not(any(unix, windows)))]
    pub(crate) fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!("process cleanup not supported on this platform (pid={})", self.pid);
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Everything needed to spawn one engine invocation.
pub struct SpawnSpec {
    pub engine_id: EngineId,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
    /// If set, written to the child's stdin then closed (Codex's invocation).
    /// Otherwise stdin is closed immediately.
    pub stdin_prompt: Option<String>,
}

/// Spawns an engine subprocess and returns its translated event stream.
///
/// Shared scaffolding used by every adapter — only argument construction and
/// line translation differ per engine. `parse_line` may return zero or more
/// events per JSONL record; all translator-produced events are stamped before
/// delivery. Any of: non-zero exit, oversized line, or cancellation produces
/// exactly one terminal `Event::Completed`, matching the runner contract.
pub async fn spawn_and_stream<F>(
    spec: SpawnSpec,
    parse_line: F,
    cancel: CancellationToken,
) -> Result<EventStream>
where
    F: Fn(&str) -> Vec<Event> + Send + Sync + 'static,
{
    validate_cwd(&spec.cwd)?;

    tracing::debug!(
        engine = %spec.engine_id,
        binary = %spec.binary.display(),
        args = ?spec.args,
        cwd = %spec.cwd.display(),
        "spawning engine process"
    );

    let mut cmd = Command::new(&spec.binary);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    cmd.process_group(0);

    for (k, v) in &spec.env {
        cmd.env(k, v);
    }

    let mut child = cmd.spawn().map_err(Error::SpawnFailed)?;

    let child_pid = child
        .id()
        .ok_or_else(|| Error::Other("failed to get child process ID".into()))?;
    let guard = Arc::new(ChildGuard::new(child_pid));

    let mut stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Other("failed to capture stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Other("failed to capture stderr".into()))?;

    if let Some(prompt) = spec.stdin_prompt {
        let mut stdin = stdin.take().expect("stdin was piped");
        tokio::spawn(async move {
            let _ = stdin.write_all(prompt.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });
    } else {
        drop(stdin.take());
    }

    let stderr_handle = tokio::spawn(async move {
        let reader = BufReader::new(stderr);
        let mut lines = reader.lines();
        let mut buf = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if buf.len() >= MAX_STDERR_BYTES {
                break;
            }
            if !buf.is_empty() {
                buf.push('\n');
            }
            let remaining = MAX_STDERR_BYTES - buf.len();
            if line.len() > remaining {
                buf.push_str(&line[..remaining]);
                break;
            }
            buf.push_str(&line);
        }
        buf
    });

    let wait_handle = tokio::spawn(async move { child.wait().await });

    let mut reader = BufReader::new(stdout);
    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);
    let engine_id = spec.engine_id;

    tokio::spawn(async move {
        let _guard = guard;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    _guard.kill();
                    let _ = tx.send(Event::Completed(CompletedEvent {
                        engine_id: engine_id.clone(),
                        ok: false,
                        answer: None,
                        error: Some("cancelled".to_string()),
                        resume_token: None,
                        timestamp_ms: 0,
                    }).stamp()).await;
                    return;
                }
                line_result = read_capped_line(&mut reader) => {
                    match line_result {
                        Ok(Some(LineOutcome::Line(line))) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            for event in parse_line(&line) {
                                let is_terminal = matches!(event, Event::Completed(_));
                                if tx.send(event.stamp()).await.is_err() {
                                    return;
                                }
                                if is_terminal {
                                    // Translator already produced the terminal event for this
                                    // run (e.g. a malformed-JSON abort); stop reading stdout and
                                    // skip the exit-status handling below entirely.
                                    return;
                                }
                            }
                        }
                        Ok(Some(LineOutcome::TooLong(excerpt))) => {
                            _guard.kill();
                            let _ = tx.send(Event::Completed(CompletedEvent {
                                engine_id: engine_id.clone(),
                                ok: false,
                                answer: None,
                                error: Some(format!("line exceeded {MAX_LINE_BYTES} bytes: {excerpt}")),
                                resume_token: None,
                                timestamp_ms: 0,
                            }).stamp()).await;
                            return;
                        }
                        Ok(None) => break, // EOF
                        Err(e) => {
                            let _ = tx.send(Event::Completed(CompletedEvent {
                                engine_id: engine_id.clone(),
                                ok: false,
                                answer: None,
                                error: Some(format!("I/O error reading engine output: {e}")),
                                resume_token: None,
                                timestamp_ms: 0,
                            }).stamp()).await;
                            return;
                        }
                    }
                }
            }
        }

        match wait_handle.await {
            Ok(Ok(status)) if !status.success() => {
                let stderr_text = stderr_handle.await.unwrap_or_default();
                let code = status.code().unwrap_or(-1);
                let _ = tx
                    .send(
                        Event::Action(ActionEvent {
                            engine_id: engine_id.clone(),
                            text: format!("engine exited with code {code}"),
                            resume_token: None,
                            timestamp_ms: 0,
                        })
                        .stamp(),
                    )
                    .await;
                let _ = tx
                    .send(
                        Event::Completed(CompletedEvent {
                            engine_id,
                            ok: false,
                            answer: None,
                            error: Some(format!("exit code {code}: {stderr_text}")),
                            resume_token: None,
                            timestamp_ms: 0,
                        })
                        .stamp(),
                    )
                    .await;
            }
            Ok(Err(e)) => {
                let _ = tx
                    .send(
                        Event::Completed(CompletedEvent {
                            engine_id,
                            ok: false,
                            answer: None,
                            error: Some(format!("failed to wait for child: {e}")),
                            resume_token: None,
                            timestamp_ms: 0,
                        })
                        .stamp(),
                    )
                    .await;
            }
            Err(e) => {
                let _ = tx
                    .send(
                        Event::Completed(CompletedEvent {
                            engine_id,
                            ok: false,
                            answer: None,
                            error: Some(format!("join error: {e}")),
                            resume_token: None,
                            timestamp_ms: 0,
                        })
                        .stamp(),
                    )
                    .await;
            }
            _ => {} // success — the translator should already have emitted Completed
        }
    });

    let stream = tokio_stream::wrappers::ReceiverStream::new(rx);
    Ok(Box::pin(stream))
}

enum LineOutcome {
    Line(String),
    TooLong(String),
}

/// Reads one LF-delimited line, lossily decoded, capped at `MAX_LINE_BYTES`.
/// Returns `Ok(None)` on EOF with no trailing partial line.
async fn read_capped_line(
    reader: &mut BufReader<tokio::process::ChildStdout>,
) -> std::io::Result<Option<LineOutcome>> {
    let mut buf: Vec<u8> = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.len() > MAX_LINE_BYTES {
        let excerpt = String::from_utf8_lossy(&buf[..256.min(buf.len())]).into_owned();
        return Ok(Some(LineOutcome::TooLong(excerpt)));
    }
    Ok(Some(LineOutcome::Line(String::from_utf8_lossy(&buf).into_owned())))
}

fn validate_cwd(cwd: &Path) -> Result<()> {
    if !cwd.exists() {
        return Err(Error::InvalidWorkDir(cwd.to_path_buf()));
    }
    if !cwd.is_dir() {
        return Err(Error::Other(format!(
            "working directory is not a directory: {}",
            cwd.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_cwd_rejects_missing_dir() {
        let err = validate_cwd(Path::new("/does/not/exist/at/all")).unwrap_err();
        assert!(matches!(err, Error::InvalidWorkDir(_)));
    }

    #[test]
    fn validate_cwd_accepts_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_cwd(dir.path()).is_ok());
    }
}
