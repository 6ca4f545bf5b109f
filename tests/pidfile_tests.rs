
use jobrunner::error::RunnerError;
use jobrunner::runs::pidfile::{self, PidFile};
use test_harness::{reaped_pid, TestApp};

#[tokio::test]
async fn test_write_then_read() {
    let app = TestApp::new();
    let pidfile = PidFile::new(app.root().join("PIDFILE"));

    pidfile.write(4242).await.unwrap();

    assert_eq!(pidfile.read().await.unwrap(), Some(4242));
    let raw = std::fs::read_to_string(pidfile.path()).unwrap();
    assert_eq!(raw, "4242");
}

#[tokio::test]
async fn test_read_missing_is_none() {
    let app = TestApp::new();
    let pidfile = PidFile::new(app.root().join("PIDFILE"));

    assert_eq!(pidfile.read().await.unwrap(), None);
}

#[tokio::test]
async fn test_read_garbage_is_invalid() {
    let app = TestApp::new();
    let path = app.root().join("PIDFILE");
    std::fs::write(&path, "not a pid").unwrap();

    let err = PidFile::new(&path).read().await.unwrap_err();
    assert!(matches!(err, RunnerError::InvalidPidFile { contents, .. } if contents == "not a pid"));
}

#[tokio::test]
async fn test_read_directory_is_fatal_error() {
    let app = TestApp::new();
    let path = app.root().join("PIDFILE");
    std::fs::create_dir(&path).unwrap();

    let err = PidFile::new(&path).read().await.unwrap_err();
    assert!(matches!(err, RunnerError::PidFile { .. }));
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let app = TestApp::new();
    let pidfile = PidFile::new(app.root().join("PIDFILE"));
    pidfile.write(1).await.unwrap();

    pidfile.delete().await.unwrap();
    assert!(!pidfile.path().exists());

    // Second delete of an absent file is fine
    pidfile.delete().await.unwrap();
}

#[tokio::test]
async fn test_list_all_for_one_job_and_all_jobs() {
    let app = TestApp::new();
    for (job, run) in [("alpha", "r1"), ("alpha", "r2"), ("beta", "r1")] {
        std::fs::create_dir_all(app.run_dir(job, run)).unwrap();
        std::fs::write(app.pidfile(job, run), "1").unwrap();
    }
    // A run directory without a pidfile is not listed
    std::fs::create_dir_all(app.run_dir("alpha", "r3")).unwrap();

    let alpha = pidfile::list_all(app.root(), Some("alpha")).await.unwrap();
    assert_eq!(
        alpha,
        vec![app.pidfile("alpha", "r1"), app.pidfile("alpha", "r2")]
    );

    let all = pidfile::list_all(app.root(), None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.contains(&app.pidfile("beta", "r1")));
}

#[tokio::test]
async fn test_list_all_without_runs_tree() {
    let app = TestApp::new();
    assert!(pidfile::list_all(app.root(), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_all_rejects_non_utf8_root() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let app = TestApp::new();
    let root = app.root().join(OsStr::from_bytes(b"app-\xff"));

    let err = pidfile::list_all(&root, None).await.unwrap_err();
    assert!(matches!(err, RunnerError::Misconfiguration(_)));
}

#[tokio::test]
async fn test_is_alive_tracks_process_lifetime() {
    let mut child = tokio::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap();
    let pid = child.id().unwrap();

    assert!(pidfile::is_alive(pid));

    child.kill().await.unwrap();
    assert!(!pidfile::is_alive(pid));
}

#[tokio::test]
async fn test_is_alive_false_for_reaped_pid() {
    let pid = reaped_pid().await;
    assert!(!pidfile::is_alive(pid));
}

#[tokio::test]
async fn test_kill_gone_process_is_silent() {
    let pid = reaped_pid().await;
    pidfile::kill(pid);
}

#[tokio::test]
async fn test_kill_and_remove_missing_pidfile() {
    let app = TestApp::new();
    let pidfile = PidFile::new(app.root().join("PIDFILE"));

    assert_eq!(pidfile.kill_and_remove().await.unwrap(), None);
}

#[tokio::test]
async fn test_kill_and_remove_live_process() {
    let app = TestApp::new();
    let mut child = tokio::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap();
    let pid = child.id().unwrap();
    let pidfile = PidFile::new(app.root().join("PIDFILE"));
    pidfile.write(pid).await.unwrap();

    assert_eq!(pidfile.kill_and_remove().await.unwrap(), Some(pid));
    assert!(!pidfile.path().exists());

    let status = child.wait().await.unwrap();
    assert_eq!(status.code(), None, "killed by signal");
}

#[tokio::test]
async fn test_is_running() {
    let app = TestApp::new();
    assert!(!pidfile::is_running(app.root(), "alpha", "r1").await.unwrap());

    std::fs::create_dir_all(app.run_dir("alpha", "r1")).unwrap();
    std::fs::write(app.pidfile("alpha", "r1"), std::process::id().to_string()).unwrap();
    assert!(pidfile::is_running(app.root(), "alpha", "r1").await.unwrap());

    std::fs::write(app.pidfile("alpha", "r1"), reaped_pid().await.to_string()).unwrap();
    assert!(!pidfile::is_running(app.root(), "alpha", "r1").await.unwrap());
}
