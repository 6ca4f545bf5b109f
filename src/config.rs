use std::net::SocketAddr;
use std::path::PathBuf;

/// Settings for launching job processes and serving the HTTP API.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Application root. Run directories live under `<app_root>/run/jobs`,
    /// job sources under `<app_root>/src/jobs` and the job table in
    /// `<app_root>/appconfig.json`.
    pub app_root: PathBuf,
    pub listen_addr: SocketAddr,
    /// Executable that runs the source snapshot (e.g., "python")
    pub interpreter: String,
    /// File name of the source snapshot written into each run directory
    pub script_name: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            app_root: PathBuf::from("."),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8765)),
            interpreter: "python".to_string(),
            script_name: "main.py".to_string(),
        }
    }
}

impl RunnerConfig {
    pub fn new(app_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
            ..Default::default()
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_script_name(mut self, script_name: impl Into<String>) -> Self {
        self.script_name = script_name.into();
        self
    }

    pub fn with_listen_addr(mut self, listen_addr: SocketAddr) -> Self {
        self.listen_addr = listen_addr;
        self
    }
}
