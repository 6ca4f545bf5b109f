use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::error::{Result, RunnerError};
use crate::runs::paths;

/// A one-line file holding the pid of a launched run.
///
/// Presence of the file means the run was launched and has not been reaped
/// yet. It says nothing about whether the process is still alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_run(app_root: &Path, job_name: &str, run_id: &str) -> Self {
        Self::new(paths::pidfile_path(app_root, job_name, run_id))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, pid: u32) -> Result<()> {
        tokio::fs::write(&self.path, pid.to_string())
            .await
            .map_err(|source| RunnerError::PidFile {
                path: self.path.clone(),
                source,
            })
    }

    /// Returns `None` if the pidfile does not exist.
    pub async fn read(&self) -> Result<Option<u32>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(RunnerError::PidFile {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        parse_pid(&contents)
            .map(Some)
            .ok_or_else(|| RunnerError::InvalidPidFile {
                path: self.path.clone(),
                contents,
            })
    }

    /// Removing an absent pidfile is not an error.
    pub async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RunnerError::PidFile {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Hard-kill the recorded process, if any, then remove the pidfile.
    ///
    /// Returns the pid that was signalled.
    pub async fn kill_and_remove(&self) -> Result<Option<u32>> {
        let pid = self.read().await?;
        if let Some(pid) = pid {
            kill(pid);
        }
        self.delete().await?;
        Ok(pid)
    }
}

fn parse_pid(contents: &str) -> Option<u32> {
    let pid: i32 = contents.trim().parse().ok()?;
    // 0 and negative pids address process groups, never a single run
    if pid <= 0 {
        return None;
    }
    Some(pid as u32)
}

fn to_nix_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

/// Every pidfile under the runs tree for `job_name`, or for all jobs when
/// `job_name` is `None`. Sorted by path.
pub async fn list_all(app_root: &Path, job_name: Option<&str>) -> Result<Vec<PathBuf>> {
    let pattern = paths::pidfile_pattern(app_root, job_name)?;
    tokio::task::spawn_blocking(move || glob_pidfiles(&pattern))
        .await
        .map_err(|e| RunnerError::Io(std::io::Error::other(e)))?
}

fn glob_pidfiles(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob::glob(pattern).map_err(|e| {
        RunnerError::InvalidRequest(format!("Invalid pidfile pattern {}: {}", pattern, e))
    })?;

    let mut pidfiles = Vec::new();
    for entry in entries {
        pidfiles.push(entry.map_err(|e| RunnerError::Io(e.into_error()))?);
    }
    pidfiles.sort();
    Ok(pidfiles)
}

/// Probe a pid with signal 0.
///
/// A process we are not permitted to signal counts as not alive: it is not
/// something this service can still control.
pub fn is_alive(pid: u32) -> bool {
    match to_nix_pid(pid) {
        Some(pid) => signal::kill(pid, None).is_ok(),
        None => false,
    }
}

/// Send SIGKILL. A process that is already gone is not an error.
pub fn kill(pid: u32) {
    let Some(nix_pid) = to_nix_pid(pid) else {
        return;
    };
    if let Err(e) = signal::kill(nix_pid, Signal::SIGKILL) {
        tracing::debug!(pid, error = %e, "Kill signal not delivered");
    }
}

/// True when the run has a pidfile whose process is still alive.
pub async fn is_running(app_root: &Path, job_name: &str, run_id: &str) -> Result<bool> {
    let pid = PidFile::for_run(app_root, job_name, run_id).read().await?;
    Ok(pid.is_some_and(is_alive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pid_accepts_digits_with_whitespace() {
        assert_eq!(parse_pid("1234"), Some(1234));
        assert_eq!(parse_pid("1234\n"), Some(1234));
        assert_eq!(parse_pid("  42 "), Some(42));
    }

    #[test]
    fn parse_pid_rejects_garbage_and_group_pids() {
        assert_eq!(parse_pid(""), None);
        assert_eq!(parse_pid("abc"), None);
        assert_eq!(parse_pid("0"), None);
        assert_eq!(parse_pid("-1"), None);
        assert_eq!(parse_pid("99999999999"), None);
    }

    #[test]
    fn out_of_range_pid_is_never_alive() {
        assert!(!is_alive(0));
        assert!(!is_alive(u32::MAX));
    }

    #[test]
    fn own_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }
}
