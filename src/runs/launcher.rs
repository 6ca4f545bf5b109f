use std::collections::HashMap;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::runs::paths;

/// A freshly created, exclusively owned run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    pub job_name: String,
    pub run_id: String,
    pub path: PathBuf,
}

impl RunDirectory {
    pub fn pidfile(&self) -> PathBuf {
        self.path.join(paths::PIDFILE_NAME)
    }
}

/// Everything needed to start a run's process.
#[derive(Debug, Clone)]
pub struct CommandEnvironment {
    pub cmd: String,
    pub args: Vec<OsString>,
    pub cwd: PathBuf,
    pub env: HashMap<OsString, OsString>,
    pub pidfile: PathBuf,
}

/// Prepares run directories and starts job processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    app_root: PathBuf,
    interpreter: String,
    script_name: String,
}

impl ProcessLauncher {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            app_root: config.app_root.clone(),
            interpreter: config.interpreter.clone(),
            script_name: config.script_name.clone(),
        }
    }

    /// Create the run directory. An existing directory means this run id was
    /// already started and yields [`RunnerError::Conflict`].
    pub async fn prepare_run_directory(&self, job_name: &str, run_id: &str) -> Result<RunDirectory> {
        let path = paths::run_dir(&self.app_root, job_name, run_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match tokio::fs::create_dir(&path).await {
            Ok(()) => Ok(RunDirectory {
                job_name: job_name.to_string(),
                run_id: run_id.to_string(),
                path,
            }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(RunnerError::Conflict {
                job_name: job_name.to_string(),
                run_id: run_id.to_string(),
            }),
            Err(e) => Err(RunnerError::Io(e)),
        }
    }

    /// Supplied code wins; otherwise read the job's source from disk.
    pub async fn resolve_source_code(&self, job_name: &str, code: Option<String>) -> Result<String> {
        if let Some(code) = code {
            return Ok(code);
        }

        for src_path in [
            paths::job_source_path(&self.app_root, job_name),
            paths::legacy_source_path(&self.app_root, job_name),
        ] {
            match tokio::fs::read_to_string(&src_path).await {
                Ok(code) => {
                    tracing::debug!(job_name, path = %src_path.display(), "Loaded job source");
                    return Ok(code);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(RunnerError::Io(e)),
            }
        }

        Err(RunnerError::SourceNotFound(job_name.to_string()))
    }

    /// Write the source snapshot into the run directory and build the
    /// command that runs it.
    pub async fn materialize(&self, run_dir: &RunDirectory, code: &str) -> Result<CommandEnvironment> {
        let script_path = run_dir.path.join(&self.script_name);
        tokio::fs::write(&script_path, code).await?;

        Ok(CommandEnvironment {
            cmd: self.interpreter.clone(),
            args: vec![script_path.into_os_string()],
            cwd: run_dir.path.clone(),
            env: job_env(),
            pidfile: run_dir.pidfile(),
        })
    }

    /// Spawn the process with stdout and stderr piped. Returns as soon as the
    /// process is running.
    pub fn start(&self, command: &CommandEnvironment) -> Result<Child> {
        tracing::debug!(cmd = %command.cmd, args = ?command.args, cwd = %command.cwd.display(), "Starting job process");

        Command::new(&command.cmd)
            .args(&command.args)
            .current_dir(&command.cwd)
            .env_clear()
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(RunnerError::SpawnFailure)
    }
}

/// Jobs inherit the service's environment.
fn job_env() -> HashMap<OsString, OsString> {
    std::env::vars_os().collect()
}
