//! Advisory file locking for a workflow's lifetime, using `flock(2)` directly.
//!
//! A second process racing a `resume` on the same workflow name must not be
//! able to mutate state concurrently (spec §5: "a file-system advisory lock
//! ... is acquired for the workflow's lifetime to prevent a second process
//! from racing on resume"). We call `flock` directly rather than wrap an RAII
//! guard crate so the guard only needs to own the `File` (whose fd carries
//! the lock); `Drop` releases it explicitly.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct LockDiagnostic {
    pid: u32,
    workflow: String,
    acquired_at: DateTime<Utc>,
    reason: String,
}

/// Workflow lock guard backed by `flock(2)`.
pub struct WorkflowLock {
    file: File,
    lock_path: PathBuf,
}

impl std::fmt::Debug for WorkflowLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl Drop for WorkflowLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor owned by `self.file` for the
        // lifetime of this call.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

impl WorkflowLock {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

/// Acquire a non-blocking exclusive lock for `workflow_dir`.
///
/// Lock path: `{workflow_dir}/.lock`. On success, writes a diagnostic JSON
/// blob (pid, workflow name, acquired_at, reason) into the lock file so a
/// losing process can report who holds it.
pub fn acquire_lock(workflow_dir: &Path, workflow_name: &str, reason: &str) -> Result<WorkflowLock> {
    fs::create_dir_all(workflow_dir).with_context(|| {
        format!(
            "Failed to create workflow directory: {}",
            workflow_dir.display()
        )
    })?;

    let lock_path = workflow_dir.join(".lock");

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

    let fd = file.as_raw_fd();

    // SAFETY: `fd` was just opened above and is valid for this call.
    let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

    if ret == 0 {
        let mut lock = WorkflowLock { file, lock_path };

        let diagnostic = LockDiagnostic {
            pid: std::process::id(),
            workflow: workflow_name.to_string(),
            acquired_at: Utc::now(),
            reason: reason.to_string(),
        };
        let json =
            serde_json::to_string(&diagnostic).context("Failed to serialize lock diagnostic")?;

        lock.file
            .set_len(0)
            .context("Failed to truncate lock file")?;
        lock.file
            .write_all(json.as_bytes())
            .context("Failed to write lock diagnostic")?;
        lock.file.flush().context("Failed to flush lock file")?;

        Ok(lock)
    } else {
        let mut diag_file =
            File::open(&lock_path).context("Failed to open lock file to read diagnostic")?;
        let mut contents = String::new();
        diag_file
            .read_to_string(&mut contents)
            .context("Failed to read lock file")?;

        let error_msg = if let Ok(diagnostic) = serde_json::from_str::<LockDiagnostic>(&contents) {
            format!(
                "Workflow '{}' locked by PID {} (reason: {}, acquired: {})",
                diagnostic.workflow, diagnostic.pid, diagnostic.reason, diagnostic.acquired_at
            )
        } else {
            format!("Workflow '{}' is locked (unable to read diagnostic info)", workflow_name)
        };

        Err(anyhow::anyhow!(error_msg))
    }
}
