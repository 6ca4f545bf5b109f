//! Job id to job name lookup backed by `appconfig.json`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, RunnerError};

pub const APP_CONFIG_FILE: &str = "appconfig.json";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEntry {
    pub job_id: Option<String>,
    pub name: Option<String>,
}

impl AppConfig {
    pub fn job_name(&self, job_id: &str) -> Option<&str> {
        self.jobs
            .iter()
            .find(|j| j.job_id.as_deref() == Some(job_id))
            .and_then(|j| j.name.as_deref())
    }
}

/// Resolves job names from the application's static configuration.
///
/// The document is re-read on every lookup so edits take effect without a
/// restart.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    app_root: PathBuf,
}

impl JobRegistry {
    pub fn new(app_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.app_root.join(APP_CONFIG_FILE)
    }

    pub async fn load(&self) -> Result<AppConfig> {
        load_app_config(&self.config_path()).await
    }

    pub async fn resolve_name(&self, job_id: &str) -> Result<String> {
        let config = self.load().await?;
        match config.job_name(job_id) {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => Err(RunnerError::JobNotFound(job_id.to_string())),
        }
    }
}

async fn load_app_config(path: &Path) -> Result<AppConfig> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RunnerError::Misconfiguration(format!(
                "Could not find {}",
                path.display()
            )));
        }
        Err(e) => {
            return Err(RunnerError::Misconfiguration(format!(
                "Could not read {}: {}",
                path.display(),
                e
            )));
        }
    };

    serde_json::from_str(&raw).map_err(|e| {
        RunnerError::Misconfiguration(format!("Could not parse {}: {}", path.display(), e))
    })
}
