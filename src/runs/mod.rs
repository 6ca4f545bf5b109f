//! Job run lifecycle: launching job code as local processes and tracking
//! them through pidfiles.
//!
//! # Components
//!
//! - [`paths`]: On-disk layout of sources and run directories
//! - [`pidfile`]: Pidfile read/write/delete, discovery and liveness probes
//! - [`launcher`]: Run directory allocation and process spawning
//! - [`relay`]: Line-by-line forwarding of stdout/stderr to a notifier
//! - [`RunCoordinator`]: Serialized launch, kill and cleanup of runs
//!
//! # Run Flow
//!
//! 1. [`RunCoordinator::launch`] takes the launch lock
//! 2. Resolves the job name and source, creates `run/jobs/<job>/<run>/`
//!    (an existing directory is a conflict)
//! 3. Optionally kills every other run of the job
//! 4. Spawns the interpreter and writes `PIDFILE`, then releases the lock
//! 5. [`LaunchedRun::wait`] relays output, waits for exit and removes the pidfile
//!
//! Killing a run by id goes straight to its pidfile and never waits on the
//! launch lock.

pub mod coordinator;
pub mod launcher;
pub mod paths;
pub mod pidfile;
pub mod relay;

pub use coordinator::{
    ActiveRun, KillRequest, LaunchedRun, RunCoordinator, RunRequest, RunResponse,
};
pub use launcher::{CommandEnvironment, ProcessLauncher, RunDirectory};
pub use pidfile::PidFile;
