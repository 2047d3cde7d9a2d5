//! `CIWaiter`: polls `gh pr checks` until every check reaches a terminal
//! state or the overall timeout fires (spec §4.4).

use rand::Rng;
use std::time::{Duration, Instant};
use wfctl_core::AppError;

use crate::adapter::{CheckRun, GhAdapter};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);
const MAX_TRANSIENT_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct CIWaitOptions {
    pub poll_interval: Duration,
    pub max_interval: Duration,
}

impl Default for CIWaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
        }
    }
}

/// One progress tick emitted per poll.
#[derive(Debug, Clone)]
pub struct CIProgress {
    pub elapsed: Duration,
    pub checks: Vec<CheckRun>,
}

#[derive(Debug, Clone)]
pub struct CIResult {
    pub passed: bool,
    pub status: String,
    pub failed_checks: Vec<String>,
}

pub struct CIWaiter<'a> {
    gh: &'a GhAdapter,
}

impl<'a> CIWaiter<'a> {
    pub fn new(gh: &'a GhAdapter) -> Self {
        Self { gh }
    }

    /// Poll `gh pr checks` until every check is terminal or `timeout` elapses.
    ///
    /// Backoff grows geometrically from `opts.poll_interval` toward
    /// `opts.max_interval` with +/-20% jitter, so repeated polls against a
    /// slow CI provider don't hammer it at a fixed cadence. A transient
    /// polling error is retried up to `MAX_TRANSIENT_RETRIES` times within
    /// the overall deadline; any other error is surfaced as `CIUnavailable`.
    pub async fn wait_for_ci_with_progress(
        &self,
        pr: &str,
        timeout: Duration,
        opts: CIWaitOptions,
        mut on_progress: impl FnMut(CIProgress),
    ) -> Result<CIResult, AppError> {
        let start = Instant::now();
        let mut interval = opts.poll_interval;
        let mut transient_retries = 0u32;

        loop {
            if start.elapsed() >= timeout {
                return Ok(CIResult {
                    passed: false,
                    status: "timeout".to_string(),
                    failed_checks: Vec::new(),
                });
            }

            match self.gh.pr_checks(pr).await {
                Ok(checks) => {
                    transient_retries = 0;
                    on_progress(CIProgress { elapsed: start.elapsed(), checks: checks.clone() });

                    if !checks.is_empty() && checks.iter().all(CheckRun::is_terminal) {
                        let failed: Vec<String> =
                            checks.iter().filter(|c| c.is_failure()).map(|c| c.name.clone()).collect();
                        return Ok(CIResult {
                            passed: failed.is_empty(),
                            status: if failed.is_empty() { "success".to_string() } else { "failure".to_string() },
                            failed_checks: failed,
                        });
                    }
                }
                Err(AppError::CIUnavailable(msg)) => {
                    return Err(AppError::CIUnavailable(msg));
                }
                Err(e) => {
                    transient_retries += 1;
                    if transient_retries > MAX_TRANSIENT_RETRIES {
                        return Err(AppError::CIUnavailable(format!(
                            "exceeded {MAX_TRANSIENT_RETRIES} transient polling retries: {e}"
                        )));
                    }
                }
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                continue;
            }
            let sleep_for = jittered(interval).min(remaining);
            tokio::time::sleep(sleep_for).await;
            interval = next_interval(interval, opts.max_interval);
        }
    }
}

fn next_interval(current: Duration, max: Duration) -> Duration {
    let grown = current.mul_f64(1.5);
    grown.min(max)
}

fn jittered(interval: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor: f64 = rng.gen_range(0.8..=1.2);
    interval.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_interval_grows_geometrically_and_caps() {
        let mut interval = Duration::from_secs(15);
        for _ in 0..20 {
            interval = next_interval(interval, Duration::from_secs(60));
        }
        assert_eq!(interval, Duration::from_secs(60));
    }

    #[test]
    fn jittered_stays_within_twenty_percent() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let j = jittered(base);
            assert!(j >= Duration::from_millis(7900));
            assert!(j <= Duration::from_millis(12100));
        }
    }

    #[tokio::test]
    async fn wait_returns_success_when_all_checks_terminal_and_passing() {
        let dir = tempfile::tempdir().unwrap();
        // `gh` fixture script stand-in: always prints two passing checks.
        let script = dir.path().join("gh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '[{\"name\":\"build\",\"state\":\"SUCCESS\"},{\"name\":\"test\",\"state\":\"SUCCESS\"}]'\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let gh = GhAdapter::with_binary(dir.path(), script.to_string_lossy().to_string());
        let waiter = CIWaiter::new(&gh);
        let result = waiter
            .wait_for_ci_with_progress(
                "1",
                Duration::from_secs(5),
                CIWaitOptions { poll_interval: Duration::from_millis(10), max_interval: Duration::from_millis(20) },
                |_| {},
            )
            .await
            .unwrap();
        assert!(result.passed);
        assert_eq!(result.status, "success");
    }

    #[tokio::test]
    async fn wait_reports_failed_checks() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("gh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '[{\"name\":\"build\",\"state\":\"SUCCESS\"},{\"name\":\"lint\",\"state\":\"FAILURE\"}]'\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let gh = GhAdapter::with_binary(dir.path(), script.to_string_lossy().to_string());
        let waiter = CIWaiter::new(&gh);
        let result = waiter
            .wait_for_ci_with_progress(
                "1",
                Duration::from_secs(5),
                CIWaitOptions { poll_interval: Duration::from_millis(10), max_interval: Duration::from_millis(20) },
                |_| {},
            )
            .await
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.failed_checks, vec!["lint".to_string()]);
    }

    #[tokio::test]
    async fn wait_times_out_when_checks_never_settle() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("gh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '[{\"name\":\"build\",\"state\":\"PENDING\"}]'\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let gh = GhAdapter::with_binary(dir.path(), script.to_string_lossy().to_string());
        let waiter = CIWaiter::new(&gh);
        let result = waiter
            .wait_for_ci_with_progress(
                "1",
                Duration::from_millis(50),
                CIWaitOptions { poll_interval: Duration::from_millis(10), max_interval: Duration::from_millis(20) },
                |_| {},
            )
            .await
            .unwrap();
        assert_eq!(result.status, "timeout");
    }
}
