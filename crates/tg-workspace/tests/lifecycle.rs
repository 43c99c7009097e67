// lifecycle.rs - End-to-end tests for workspace acquisition, command runs,
// and guaranteed release.
//
// Commands go through `sh`, so the run tests are Unix-only.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tg_workspace::{with_workspace, OutputMode, RunOptions, Workspace, WorkspaceError};

fn sh(script: &str) -> [&str; 3] {
    ["sh", "-c", script]
}

/// A zombie waiting for an absent reaper counts as dead.
#[cfg(unix)]
fn process_alive(pid: &str) -> bool {
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        let state = stat.rsplit(')').next().unwrap_or("").trim_start();
        return !state.starts_with('Z');
    }
    if std::path::Path::new("/proc/self").exists() {
        return false;
    }
    std::process::Command::new("sh")
        .args(["-c", &format!("kill -0 {pid}")])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[test]
fn acquired_files_round_trip() {
    let mut files = BTreeMap::new();
    files.insert("build.gradle.kts".to_string(), "plugins { id(\"application\") }\n".to_string());
    files.insert("settings.gradle.kts".to_string(), String::new());
    files.insert("src/main/kotlin/Main.kt".to_string(), "fun main() {\n}\n".to_string());

    let ws = Workspace::acquire(&files).unwrap();

    for (path, content) in &files {
        assert_eq!(&ws.read_file(path).unwrap(), content);
    }
    assert_eq!(ws.list_files().unwrap(), files.keys().cloned().collect::<Vec<_>>());
}

#[test]
fn two_workspaces_do_not_collide() {
    let mut a = Workspace::acquire([("shared.txt", "from a")]).unwrap();
    let b = Workspace::acquire([("shared.txt", "from b")]).unwrap();

    assert_ne!(a.root().unwrap(), b.root().unwrap());
    assert_eq!(a.read_file("shared.txt").unwrap(), "from a");
    assert_eq!(b.read_file("shared.txt").unwrap(), "from b");

    let a_root = a.root().unwrap().to_path_buf();
    assert!(a.release());
    assert!(!a.release());
    assert!(!a_root.exists());

    // Releasing `a` twice leaves `b` untouched.
    assert!(b.root().unwrap().exists());
    assert_eq!(b.read_file("shared.txt").unwrap(), "from b");
}

#[cfg(unix)]
#[test]
fn run_captures_exact_stdout() {
    let ws = Workspace::acquire([("value.txt", "12.3")]).unwrap();
    let result = ws
        .run(&sh("cat value.txt; echo"), &RunOptions::new())
        .unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "12.3\n");
    assert_eq!(result.stderr.as_deref(), Some(""));
    assert!(result.success());
}

#[cfg(unix)]
#[test]
fn non_zero_exit_is_reported_not_raised() {
    let ws = Workspace::acquire([("a.txt", "a")]).unwrap();
    let result = ws
        .run(&sh("echo broken >&2; exit 3"), &RunOptions::new())
        .unwrap();

    assert_eq!(result.exit_code, 3);
    assert!(!result.success());
    assert_eq!(result.stdout, "");
    assert_eq!(result.stderr.as_deref(), Some("broken\n"));
}

#[cfg(unix)]
#[test]
fn streams_are_configured_independently() {
    let ws = Workspace::acquire([("a.txt", "a")]).unwrap();
    let script = sh("echo out; echo err >&2");

    let result = ws
        .run(&script, &RunOptions::new().capture_stderr(false))
        .unwrap();
    assert_eq!(result.stdout, "out\n");
    assert_eq!(result.stderr, None);

    let result = ws
        .run(&script, &RunOptions::new().stdout(OutputMode::Discard))
        .unwrap();
    assert_eq!(result.stdout, "");
    assert_eq!(result.stderr.as_deref(), Some("err\n"));
}

#[cfg(unix)]
#[test]
fn large_output_does_not_deadlock() {
    let ws = Workspace::acquire([("a.txt", "a")]).unwrap();
    let result = ws
        .run(
            &sh("i=0; while [ $i -lt 20000 ]; do echo line-$i; echo err-$i >&2; i=$((i+1)); done"),
            &RunOptions::new().timeout(Duration::from_secs(60)),
        )
        .unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout.lines().count(), 20000);
    assert_eq!(result.stderr.unwrap().lines().count(), 20000);
}

#[cfg(unix)]
#[test]
fn env_overrides_are_merged() {
    let ws = Workspace::acquire([("a.txt", "a")]).unwrap();
    let result = ws
        .run(
            &sh("printf '%s:%s' \"$TG_VALUE\" \"${PATH:+path}\""),
            &RunOptions::new().env("TG_VALUE", "override"),
        )
        .unwrap();

    assert_eq!(result.stdout, "override:path");
}

#[cfg(unix)]
#[test]
fn command_runs_inside_workspace_root() {
    let ws = Workspace::acquire([("marker.txt", "here")]).unwrap();
    let result = ws.run(&["pwd", "-P"], &RunOptions::new()).unwrap();

    let expected = ws.root().unwrap().canonicalize().unwrap();
    assert_eq!(result.stdout.trim_end(), expected.to_string_lossy());
}

#[cfg(unix)]
#[test]
fn relative_program_resolves_against_root() {
    use std::os::unix::fs::PermissionsExt;

    let ws = Workspace::acquire([("gradlew", "#!/bin/sh\necho wrapper \"$@\"\n")]).unwrap();
    let script = ws.root().unwrap().join("gradlew");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let result = ws
        .run(&["./gradlew", "run", "-q"], &RunOptions::new())
        .unwrap();
    assert_eq!(result.stdout, "wrapper run -q\n");
}

#[test]
fn missing_program_is_a_launch_error() {
    let ws = Workspace::acquire([("a.txt", "a")]).unwrap();
    let err = ws
        .run(&["tempground-no-such-program-xyz"], &RunOptions::new())
        .unwrap_err();

    match err {
        WorkspaceError::Launch { program, .. } => {
            assert_eq!(program, "tempground-no-such-program-xyz")
        }
        other => panic!("expected Launch, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn timeout_kills_the_whole_process_tree() {
    let ws = Workspace::acquire([("a.txt", "a")]).unwrap();
    let started = Instant::now();
    let err = ws
        .run(
            &sh("sleep 30 & echo $! > bg.pid; echo started; sleep 30"),
            &RunOptions::new().timeout(Duration::from_millis(500)),
        )
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(20));
    match &err {
        WorkspaceError::Timeout {
            program,
            timeout,
            stdout,
            ..
        } => {
            assert_eq!(program, "sh");
            assert_eq!(*timeout, Duration::from_millis(500));
            assert_eq!(stdout.as_deref(), Some("started\n"));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }

    // The backgrounded grandchild shared the process group and must be gone.
    let pid = ws.read_file("bg.pid").unwrap().trim().to_string();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if !process_alive(&pid) {
            break;
        }
        assert!(Instant::now() < deadline, "grandchild {pid} survived the timeout");
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(unix)]
#[test]
fn timeout_bounds_output_held_open_by_background_process() {
    // The shell exits at once, but the backgrounded sleep inherits stdout and
    // keeps the pipe open.
    let ws = Workspace::acquire([("a.txt", "a")]).unwrap();
    let started = Instant::now();
    let err = ws
        .run(
            &sh("sleep 8 & echo started"),
            &RunOptions::new().timeout(Duration::from_millis(500)),
        )
        .unwrap_err();

    assert!(
        started.elapsed() < Duration::from_secs(3),
        "run took {:?}",
        started.elapsed()
    );
    match &err {
        WorkspaceError::Timeout { stdout, .. } => {
            assert_eq!(stdout.as_deref(), Some("started\n"));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn timeout_returns_when_pipe_holder_left_the_process_group() {
    // setsid moves the sleep out of the group, so the group kill cannot reach
    // it and its copy of stdout stays open after the timeout.
    let ws = Workspace::acquire([("a.txt", "a")]).unwrap();
    let started = Instant::now();
    let err = ws
        .run(
            &sh("if command -v setsid >/dev/null 2>&1; then setsid sleep 8 & echo $! > escaped.pid; fi; \
                 echo started; sleep 30"),
            &RunOptions::new().timeout(Duration::from_millis(500)),
        )
        .unwrap_err();

    assert!(
        started.elapsed() < Duration::from_secs(3),
        "run took {:?}",
        started.elapsed()
    );
    match &err {
        WorkspaceError::Timeout { stdout, .. } => {
            assert_eq!(stdout.as_deref(), Some("started\n"));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }

    if let Ok(pid) = ws.read_file("escaped.pid") {
        let _ = std::process::Command::new("kill").arg(pid.trim()).status();
    }
}

#[cfg(unix)]
#[test]
fn command_finishing_before_timeout_succeeds() {
    let ws = Workspace::acquire([("a.txt", "a")]).unwrap();
    let result = ws
        .run(
            &sh("printf '12.3\\n'"),
            &RunOptions::new().timeout(Duration::from_secs(30)),
        )
        .unwrap();
    assert_eq!(result.stdout, "12.3\n");
}

#[test]
fn scoped_helper_releases_on_success_and_error() {
    let root = with_workspace([("a.txt", "a")], |ws| {
        Ok::<_, WorkspaceError>(ws.root()?.to_path_buf())
    })
    .unwrap();
    assert!(!root.exists());

    let mut seen = None;
    let err = with_workspace([("a.txt", "a")], |ws| {
        seen = Some(ws.root()?.to_path_buf());
        ws.read_file("missing.txt")
    })
    .unwrap_err();
    assert!(matches!(err, WorkspaceError::FileNotFound { .. }));
    assert!(!seen.unwrap().exists());
}

#[test]
fn scoped_helper_releases_on_panic() {
    let mut seen = None;
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        with_workspace([("a.txt", "a")], |ws| -> Result<(), WorkspaceError> {
            seen = Some(ws.root()?.to_path_buf());
            if seen.is_some() {
                panic!("driver assertion failed");
            }
            Ok(())
        })
    }));

    assert!(outcome.is_err());
    assert!(!seen.unwrap().exists());
}

#[test]
fn creation_error_propagates_from_scoped_helper() {
    let err = with_workspace([("/abs/path", "x")], |_ws| Ok::<(), WorkspaceError>(()))
        .unwrap_err();
    assert!(err.is_creation());
}

#[cfg(unix)]
#[test]
fn run_result_serializes_to_json() {
    let ws = Workspace::acquire([("a.txt", "a")]).unwrap();
    let result = ws.run(&sh("echo hi"), &RunOptions::new()).unwrap();

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["stdout"], "hi\n");
}
