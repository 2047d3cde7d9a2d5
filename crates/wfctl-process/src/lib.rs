//! Process management: spawning, process-group isolation, and streamed
//! output capture with idle-timeout enforcement.

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::warn;

/// Controls whether stdout is forwarded to stderr in real-time.
///
/// By default, stdout is both buffered and forwarded to stderr with a
/// `[stdout] ` prefix, allowing callers to distinguish "thinking" from "hung".
/// Set to `BufferOnly` to suppress real-time streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Only buffer stdout; do not forward.
    BufferOnly,
    /// Buffer stdout AND forward each line to stderr with `[stdout] ` prefix (default).
    #[default]
    TeeToStderr,
}

/// Result of executing a command.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Combined stdout output.
    pub output: String,
    /// Captured stderr output (tee'd to parent stderr in real-time).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr_output: String,
    /// Last non-empty line or truncated output (max 200 chars).
    pub summary: String,
    /// Exit code (137 if idle-timeout killed).
    pub exit_code: i32,
    /// Set when the process was killed for exceeding `idle_timeout`.
    pub idle_timed_out: bool,
}

pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Spawn a command in its own process group, with stdout/stderr piped.
///
/// Isolates the child via `setsid()` in `pre_exec` so the whole process
/// group can be killed with a single negative-PID `kill`, and sets
/// `kill_on_drop` as a safety net against a forgotten `.wait()`.
pub async fn spawn_tool(mut cmd: Command, stdin_data: Option<Vec<u8>>) -> Result<tokio::process::Child> {
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    if stdin_data.is_some() {
        cmd.stdin(std::process::Stdio::piped());
    } else {
        cmd.stdin(std::process::Stdio::null());
    }
    cmd.kill_on_drop(true);

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = cmd.spawn().context("failed to spawn command")?;

    if let Some(data) = stdin_data {
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&data).await {
                    warn!("stdin write error: {e}");
                }
                let _ = stdin.shutdown().await;
            });
        }
    }

    Ok(child)
}

/// Wait for a spawned child, capturing output and killing it if idle for
/// `idle_timeout` with no stdout/stderr activity.
pub async fn wait_and_capture_with_idle_timeout(
    mut child: tokio::process::Child,
    stream_mode: StreamMode,
    idle_timeout: Duration,
) -> Result<ExecutionResult> {
    let stdout = child.stdout.take().context("child stdout was not piped")?;
    let stderr = child.stderr.take().context("child stderr was not piped")?;

    const READ_BUF_SIZE: usize = 4096;
    let mut stdout_reader = BufReader::new(stdout);
    let mut stderr_reader = BufReader::new(stderr);
    let mut output = String::new();
    let mut stdout_line_buf = String::new();
    let mut stderr_output = String::new();
    let mut stderr_line_buf = String::new();

    let mut last_activity = Instant::now();
    let mut idle_timed_out = false;
    let timeout_note = format!(
        "idle timeout: no stdout/stderr output for {}s; process group killed",
        idle_timeout.as_secs()
    );

    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut stdout_buf = [0u8; READ_BUF_SIZE];
    let mut stderr_buf = [0u8; READ_BUF_SIZE];

    while !stdout_done || !stderr_done {
        tokio::select! {
            result = stdout_reader.read(&mut stdout_buf), if !stdout_done => {
                match result {
                    Ok(0) => {
                        flush_line_buf(&mut stdout_line_buf, &mut output, stream_mode);
                        stdout_done = true;
                    }
                    Ok(n) => {
                        last_activity = Instant::now();
                        let chunk = String::from_utf8_lossy(&stdout_buf[..n]);
                        accumulate_and_flush_lines(&chunk, &mut stdout_line_buf, &mut output, stream_mode);
                    }
                    Err(_) => {
                        flush_line_buf(&mut stdout_line_buf, &mut output, stream_mode);
                        stdout_done = true;
                    }
                }
            }
            result = stderr_reader.read(&mut stderr_buf), if !stderr_done => {
                match result {
                    Ok(0) => {
                        flush_stderr_buf(&mut stderr_line_buf, &mut stderr_output);
                        stderr_done = true;
                    }
                    Ok(n) => {
                        last_activity = Instant::now();
                        let chunk = String::from_utf8_lossy(&stderr_buf[..n]);
                        accumulate_and_flush_stderr(&chunk, &mut stderr_line_buf, &mut stderr_output);
                    }
                    Err(_) => {
                        flush_stderr_buf(&mut stderr_line_buf, &mut stderr_output);
                        stderr_done = true;
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {
                if last_activity.elapsed() >= idle_timeout {
                    idle_timed_out = true;
                    warn!(timeout_secs = idle_timeout.as_secs(), "killing child due to idle timeout");
                    kill_child_process_group(&mut child);
                    break;
                }
            }
        }
    }

    let status = child.wait().await.context("failed to wait for command")?;

    let mut exit_code = status.code().unwrap_or_else(|| {
        warn!("process terminated by signal, using exit code 1");
        1
    });
    if idle_timed_out {
        exit_code = 137;
        if !stderr_output.is_empty() && !stderr_output.ends_with('\n') {
            stderr_output.push('\n');
        }
        stderr_output.push_str(&timeout_note);
        stderr_output.push('\n');
    }

    let summary = if idle_timed_out {
        timeout_note
    } else if exit_code == 0 {
        extract_summary(&output)
    } else {
        failure_summary(&output, &stderr_output, exit_code)
    };

    Ok(ExecutionResult {
        output,
        stderr_output,
        summary,
        exit_code,
        idle_timed_out,
    })
}

/// Spawn and wait for completion in one call, with the default idle timeout.
pub async fn run_and_capture_with_stdin(
    cmd: Command,
    stdin_data: Option<Vec<u8>>,
    stream_mode: StreamMode,
) -> Result<ExecutionResult> {
    let child = spawn_tool(cmd, stdin_data).await?;
    wait_and_capture_with_idle_timeout(
        child,
        stream_mode,
        Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
    )
    .await
}

fn accumulate_and_flush_lines(chunk: &str, line_buf: &mut String, output: &mut String, stream_mode: StreamMode) {
    line_buf.push_str(chunk);
    while let Some(newline_pos) = line_buf.find('\n') {
        let line: String = line_buf.drain(..=newline_pos).collect();
        if stream_mode == StreamMode::TeeToStderr {
            eprint!("[stdout] {line}");
        }
        output.push_str(&line);
    }
}

fn flush_line_buf(line_buf: &mut String, output: &mut String, stream_mode: StreamMode) {
    if !line_buf.is_empty() {
        if stream_mode == StreamMode::TeeToStderr {
            eprint!("[stdout] {line_buf}");
        }
        output.push_str(line_buf);
        line_buf.clear();
    }
}

fn accumulate_and_flush_stderr(chunk: &str, line_buf: &mut String, stderr_output: &mut String) {
    line_buf.push_str(chunk);
    while let Some(newline_pos) = line_buf.find('\n') {
        let line: String = line_buf.drain(..=newline_pos).collect();
        eprint!("{line}");
        stderr_output.push_str(&line);
    }
}

fn flush_stderr_buf(line_buf: &mut String, stderr_output: &mut String) {
    if !line_buf.is_empty() {
        eprint!("{line_buf}");
        stderr_output.push_str(line_buf);
        line_buf.clear();
    }
}

fn kill_child_process_group(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: kill() is async-signal-safe; negative PID targets the process group.
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
            return;
        }
    }
    let _ = child.start_kill();
}

/// Check if an external tool is installed and on `PATH`.
pub async fn check_tool_installed(executable: &str) -> Result<()> {
    let output = Command::new("which")
        .arg(executable)
        .output()
        .await
        .context("failed to execute 'which'")?;
    if !output.status.success() {
        anyhow::bail!("tool '{executable}' is not installed or not in PATH");
    }
    Ok(())
}

fn extract_summary(output: &str) -> String {
    truncate_line(last_non_empty_line(output), 200)
}

fn failure_summary(stdout: &str, stderr: &str, exit_code: i32) -> String {
    let stdout_line = last_non_empty_line(stdout);
    if !stdout_line.is_empty() {
        return truncate_line(stdout_line, 200);
    }
    let stderr_line = last_non_empty_line(stderr);
    if !stderr_line.is_empty() {
        return truncate_line(stderr_line, 200);
    }
    format!("exit code {exit_code}")
}

fn last_non_empty_line(text: &str) -> &str {
    text.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or("")
}

fn truncate_line(line: &str, max_chars: usize) -> String {
    if line.chars().nth(max_chars).is_none() {
        line.to_string()
    } else {
        let truncated: String = line.chars().take(max_chars - 3).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_summary_takes_last_non_empty_line() {
        assert_eq!(extract_summary("first\nsecond\n\n"), "second");
        assert_eq!(extract_summary(""), "");
    }

    #[test]
    fn truncate_line_appends_ellipsis_only_when_needed() {
        assert_eq!(truncate_line("short", 200), "short");
        let long = "x".repeat(210);
        let truncated = truncate_line(&long, 200);
        assert_eq!(truncated.len(), 200);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn failure_summary_prefers_stdout_then_stderr_then_exit_code() {
        assert_eq!(failure_summary("out line\n", "err line\n", 1), "out line");
        assert_eq!(failure_summary("", "err line\n", 1), "err line");
        assert_eq!(failure_summary("", "", 7), "exit code 7");
    }

    #[tokio::test]
    async fn run_and_capture_reports_exit_code_and_output() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo hello; exit 0");
        let result = run_and_capture_with_stdin(cmd, None, StreamMode::BufferOnly)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("hello"));
        assert!(!result.idle_timed_out);
    }

    #[tokio::test]
    async fn run_and_capture_reports_nonzero_exit() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo boom 1>&2; exit 3");
        let result = run_and_capture_with_stdin(cmd, None, StreamMode::BufferOnly)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(result.stderr_output.contains("boom"));
    }

    #[tokio::test]
    async fn idle_timeout_kills_hanging_process() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 5");
        let child = spawn_tool(cmd, None).await.unwrap();
        let result = wait_and_capture_with_idle_timeout(
            child,
            StreamMode::BufferOnly,
            Duration::from_millis(300),
        )
        .await
        .unwrap();
        assert!(result.idle_timed_out);
        assert_eq!(result.exit_code, 137);
    }

    #[tokio::test]
    async fn check_tool_installed_finds_sh() {
        assert!(check_tool_installed("sh").await.is_ok());
    }

    #[tokio::test]
    async fn check_tool_installed_fails_for_bogus_binary() {
        assert!(check_tool_installed("definitely-not-a-real-binary-xyz").await.is_err());
    }
}
