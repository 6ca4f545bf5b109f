use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tokio::sync::Mutex;

use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::notify::Notifier;
use crate::registry::JobRegistry;
use crate::runs::launcher::ProcessLauncher;
use crate::runs::pidfile::{self, PidFile};
use crate::runs::{paths, relay};

const RUN_ID_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Name of the job module. Looked up from `job_id` when absent.
    #[serde(default)]
    pub job_name: Option<String>,
    pub job_id: String,
    /// Schedule that triggered the run, if any
    #[serde(default)]
    pub schedule_id: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    /// Code to run instead of the job's source file
    #[serde(default)]
    pub code: Option<String>,
    /// Kill every other run of this job before starting
    #[serde(default)]
    pub kill_old_runs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillRequest {
    pub job_name: String,
    pub run_id: String,
}

/// A run with a pidfile on disk, as seen by the run listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRun {
    pub job_name: String,
    pub run_id: String,
    pub pid: Option<u32>,
    pub alive: bool,
}

/// Caller-supplied run id, else `<schedule>-<utc timestamp>`, else
/// `noid-<utc timestamp>`.
pub fn make_run_id(request: &RunRequest, now: DateTime<Utc>) -> String {
    if let Some(run_id) = &request.run_id {
        return run_id.clone();
    }
    let now = now.format(RUN_ID_TIME_FORMAT);
    match &request.schedule_id {
        Some(schedule_id) => format!("{}-{}", schedule_id, now),
        None => format!("noid-{}", now),
    }
}

/// Runs jobs end to end.
///
/// Directory allocation, killing old runs and spawning happen inside one
/// critical section shared by every run of every job. Only one coordinator
/// should exist per app root, otherwise the lock does not cover all runs.
#[derive(Debug)]
pub struct RunCoordinator {
    app_root: PathBuf,
    launcher: ProcessLauncher,
    registry: JobRegistry,
    launch_lock: Mutex<()>,
}

impl RunCoordinator {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            app_root: config.app_root.clone(),
            launcher: ProcessLauncher::new(config),
            registry: JobRegistry::new(config.app_root.clone()),
            launch_lock: Mutex::new(()),
        }
    }

    /// Launch a run and relay its output until it exits.
    pub async fn run(&self, request: RunRequest, notifier: &dyn Notifier) -> Result<RunResponse> {
        let launched = self.launch(request).await?;
        let exit_code = launched.wait(notifier).await?;
        Ok(RunResponse { exit_code })
    }

    /// Allocate the run directory, optionally kill old runs, start the
    /// process and record its pid. Returns once the process is running.
    pub async fn launch(&self, request: RunRequest) -> Result<LaunchedRun> {
        let run_id = make_run_id(&request, Utc::now());

        let launch_guard = self.launch_lock.lock().await;

        let job_name = self.resolve_job_name(&request).await?;
        paths::validate_component("job name", &job_name)?;
        paths::validate_component("run id", &run_id)?;

        let code = self
            .launcher
            .resolve_source_code(&job_name, request.code)
            .await?;
        let run_dir = self
            .launcher
            .prepare_run_directory(&job_name, &run_id)
            .await?;

        if request.kill_old_runs {
            self.kill_old_runs(&job_name).await?;
        }

        let command = self.launcher.materialize(&run_dir, &code).await?;
        let mut child = self.launcher.start(&command)?;

        let Some(pid) = child.id() else {
            return Err(RunnerError::SpawnFailure(std::io::Error::other(
                "job process exited before its pid could be recorded",
            )));
        };

        let pidfile = PidFile::new(command.pidfile.clone());
        if let Err(e) = pidfile.write(pid).await {
            // An untracked process could never be killed by run id
            if let Err(kill_err) = child.start_kill() {
                tracing::warn!(pid, error = %kill_err, "Failed to kill untracked job process");
            }
            return Err(e);
        }
        drop(launch_guard);

        tracing::info!(
            job_name = %job_name,
            run_id = %run_id,
            pid,
            kill_old_runs = request.kill_old_runs,
            "Job run started"
        );

        Ok(LaunchedRun {
            job_name,
            run_id,
            pid,
            child,
            cleanup: PidFileGuard::new(pidfile),
        })
    }

    /// Hard-kill a run and remove its pidfile. Does not take the launch lock.
    /// A run without a pidfile is left alone.
    pub async fn kill(&self, job_name: &str, run_id: &str) -> Result<()> {
        paths::validate_component("job name", job_name)?;
        paths::validate_component("run id", run_id)?;

        let pidfile = PidFile::for_run(&self.app_root, job_name, run_id);
        match pidfile.kill_and_remove().await? {
            Some(pid) => tracing::info!(job_name, run_id, pid, "Killed job run"),
            None => tracing::debug!(job_name, run_id, "No pidfile for job run, nothing to kill"),
        }
        Ok(())
    }

    pub async fn is_running(&self, job_name: &str, run_id: &str) -> Result<bool> {
        paths::validate_component("job name", job_name)?;
        paths::validate_component("run id", run_id)?;
        pidfile::is_running(&self.app_root, job_name, run_id).await
    }

    /// Runs that still have a pidfile, for one job or for all jobs.
    pub async fn active_runs(&self, job_name: Option<&str>) -> Result<Vec<ActiveRun>> {
        if let Some(job_name) = job_name {
            paths::validate_component("job name", job_name)?;
        }

        let mut runs = Vec::new();
        for path in pidfile::list_all(&self.app_root, job_name).await? {
            let Some((job_name, run_id)) = paths::run_identity(&path) else {
                continue;
            };
            let pid = match PidFile::new(&path).read().await {
                Ok(pid) => pid,
                Err(RunnerError::InvalidPidFile { .. }) => None,
                Err(e) => return Err(e),
            };
            runs.push(ActiveRun {
                job_name,
                run_id,
                pid,
                alive: pid.is_some_and(pidfile::is_alive),
            });
        }
        Ok(runs)
    }

    async fn resolve_job_name(&self, request: &RunRequest) -> Result<String> {
        match request.job_name.as_deref() {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => self.registry.resolve_name(&request.job_id).await,
        }
    }

    /// Must only be called while holding the launch lock.
    async fn kill_old_runs(&self, job_name: &str) -> Result<()> {
        for path in pidfile::list_all(&self.app_root, Some(job_name)).await? {
            let old = PidFile::new(path);
            match old.read().await {
                Ok(Some(pid)) if pidfile::is_alive(pid) => {
                    pidfile::kill(pid);
                    tracing::info!(job_name, pid, pidfile = %old.path().display(), "Killed old job run");
                }
                Ok(_) => {}
                Err(RunnerError::InvalidPidFile { path, contents }) => {
                    tracing::warn!(path = %path.display(), contents = %contents, "Removing unreadable pidfile");
                }
                Err(e) => return Err(e),
            }
            old.delete().await?;
        }
        Ok(())
    }
}

/// A started run whose output has not been relayed yet.
///
/// Dropping it without calling [`LaunchedRun::wait`] removes the pidfile but
/// leaves the process running.
#[derive(Debug)]
pub struct LaunchedRun {
    pub job_name: String,
    pub run_id: String,
    pub pid: u32,
    child: Child,
    cleanup: PidFileGuard,
}

impl LaunchedRun {
    pub fn pidfile(&self) -> &Path {
        self.cleanup.path()
    }

    /// Relay output until the process exits, then remove the pidfile.
    ///
    /// The pidfile is removed whether relaying succeeds, fails or this future
    /// is dropped.
    pub async fn wait(self, notifier: &dyn Notifier) -> Result<Option<i32>> {
        let LaunchedRun {
            job_name,
            run_id,
            pid,
            child,
            cleanup,
        } = self;

        let result = relay::relay(notifier, child).await;

        if let Err(e) = cleanup.release().await {
            tracing::warn!(job_name = %job_name, run_id = %run_id, error = %e, "Failed to remove pidfile");
        }

        match &result {
            Ok(exit_code) => tracing::info!(
                job_name = %job_name,
                run_id = %run_id,
                pid,
                exit_code = ?exit_code,
                "Job run completed"
            ),
            Err(e) => tracing::error!(
                job_name = %job_name,
                run_id = %run_id,
                pid,
                error = %e,
                "Job run failed"
            ),
        }

        result
    }
}

/// Removes a pidfile when dropped unless already released.
#[derive(Debug)]
struct PidFileGuard {
    pidfile: Option<PidFile>,
    path: PathBuf,
}

impl PidFileGuard {
    fn new(pidfile: PidFile) -> Self {
        Self {
            path: pidfile.path().to_path_buf(),
            pidfile: Some(pidfile),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn release(mut self) -> Result<()> {
        match self.pidfile.take() {
            Some(pidfile) => pidfile.delete().await,
            None => Ok(()),
        }
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let Some(pidfile) = self.pidfile.take() else {
            return;
        };
        match std::fs::remove_file(pidfile.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %pidfile.path().display(), error = %e, "Failed to remove pidfile")
            }
        }
    }
}
