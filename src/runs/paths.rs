//! On-disk layout of job sources and run directories.
//!
//! ```text
//! <app_root>/
//!   appconfig.json
//!   src/jobs/<job_name>/main.py
//!   src/backends/<job_name>/__init__.py   (legacy source location)
//!   run/jobs/<job_name>/<run_id>/
//!     main.py                              (source snapshot)
//!     PIDFILE
//! ```

use std::path::{Path, PathBuf};

use crate::error::{Result, RunnerError};

pub const JOB_RUNS_DIR: &str = "run/jobs";
pub const PIDFILE_NAME: &str = "PIDFILE";

pub fn runs_root(app_root: &Path) -> PathBuf {
    app_root.join(JOB_RUNS_DIR)
}

pub fn run_dir(app_root: &Path, job_name: &str, run_id: &str) -> PathBuf {
    runs_root(app_root).join(job_name).join(run_id)
}

pub fn pidfile_path(app_root: &Path, job_name: &str, run_id: &str) -> PathBuf {
    run_dir(app_root, job_name, run_id).join(PIDFILE_NAME)
}

pub fn job_source_path(app_root: &Path, job_name: &str) -> PathBuf {
    app_root
        .join("src")
        .join("jobs")
        .join(job_name)
        .join("main.py")
}

pub fn legacy_source_path(app_root: &Path, job_name: &str) -> PathBuf {
    app_root
        .join("src")
        .join("backends")
        .join(job_name)
        .join("__init__.py")
}

/// Glob pattern matching every pidfile of `job_name`, or of all jobs when
/// `job_name` is `None`.
///
/// Glob patterns are UTF-8 only, so a non-UTF-8 app root is rejected rather
/// than matched against a different path.
pub fn pidfile_pattern(app_root: &Path, job_name: Option<&str>) -> Result<String> {
    let runs_root = runs_root(app_root);
    let Some(root) = runs_root.to_str() else {
        return Err(RunnerError::Misconfiguration(format!(
            "App root {} is not valid UTF-8",
            app_root.display()
        )));
    };
    let job = match job_name {
        Some(name) => glob::Pattern::escape(name),
        None => "*".to_string(),
    };
    Ok(format!(
        "{}/{}/*/{}",
        glob::Pattern::escape(root),
        job,
        PIDFILE_NAME
    ))
}

/// Split a pidfile path back into `(job_name, run_id)`.
pub fn run_identity(pidfile: &Path) -> Option<(String, String)> {
    let run_dir = pidfile.parent()?;
    let run_id = run_dir.file_name()?.to_str()?;
    let job_name = run_dir.parent()?.file_name()?.to_str()?;
    Some((job_name.to_string(), run_id.to_string()))
}

/// Job names and run ids become directory names; reject anything that could
/// escape the runs tree.
pub fn validate_component(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(RunnerError::InvalidRequest(format!("{} must not be empty", kind)));
    }
    if value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
        return Err(RunnerError::InvalidRequest(format!(
            "{} {:?} is not a valid path component",
            kind, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_layout() {
        let root = Path::new("/app");
        assert_eq!(
            run_dir(root, "report-gen", "r1"),
            PathBuf::from("/app/run/jobs/report-gen/r1")
        );
        assert_eq!(
            pidfile_path(root, "report-gen", "r1"),
            PathBuf::from("/app/run/jobs/report-gen/r1/PIDFILE")
        );
        assert_eq!(
            job_source_path(root, "report-gen"),
            PathBuf::from("/app/src/jobs/report-gen/main.py")
        );
        assert_eq!(
            legacy_source_path(root, "report-gen"),
            PathBuf::from("/app/src/backends/report-gen/__init__.py")
        );
    }

    #[test]
    fn pattern_for_one_job_and_all_jobs() {
        let root = Path::new("/app");
        assert_eq!(
            pidfile_pattern(root, Some("report-gen")).unwrap(),
            "/app/run/jobs/report-gen/*/PIDFILE"
        );
        assert_eq!(
            pidfile_pattern(root, None).unwrap(),
            "/app/run/jobs/*/*/PIDFILE"
        );
    }

    #[test]
    fn pattern_rejects_non_utf8_root() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let root = Path::new(OsStr::from_bytes(b"/app\xff"));
        assert!(matches!(
            pidfile_pattern(root, None),
            Err(RunnerError::Misconfiguration(_))
        ));
    }

    #[test]
    fn pattern_escapes_job_name() {
        let pattern = pidfile_pattern(Path::new("/app"), Some("weird[1]")).unwrap();
        assert!(glob::Pattern::new(&pattern)
            .unwrap()
            .matches("/app/run/jobs/weird[1]/r1/PIDFILE"));
    }

    #[test]
    fn identity_from_pidfile() {
        let path = pidfile_path(Path::new("/app"), "report-gen", "r1");
        assert_eq!(
            run_identity(&path),
            Some(("report-gen".to_string(), "r1".to_string()))
        );
    }

    #[test]
    fn component_validation() {
        assert!(validate_component("run id", "sched-20240101T000000").is_ok());
        assert!(validate_component("job name", "report-gen").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "a\0b"] {
            assert!(
                matches!(
                    validate_component("run id", bad),
                    Err(RunnerError::InvalidRequest(_))
                ),
                "{:?} should be rejected",
                bad
            );
        }
    }
}
