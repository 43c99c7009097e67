// process.rs - Blocking execution of an external command inside a workspace.
//
// Each captured stream is drained on its own thread so a chatty child can
// never block on a full pipe while we wait for it. With a timeout, both the
// child's exit and the closing of its pipes must happen before the deadline;
// otherwise the whole process tree is killed and reaped, and readers still
// blocked by a process that escaped the group are abandoned after a short
// grace period.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::WorkspaceError;

/// How often a child with a deadline is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long a timed-out run waits for its pipes to close after the kill
/// before the reader threads are abandoned.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

const READ_CHUNK: usize = 8 * 1024;

/// What happens to one output stream of the launched process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Collect into an in-memory buffer and return it in the [`RunResult`].
    #[default]
    Capture,
    /// Pass through to this process's own stream.
    Inherit,
    /// Send to the null device.
    Discard,
}

impl OutputMode {
    fn stdio(self) -> Stdio {
        match self {
            OutputMode::Capture => Stdio::piped(),
            OutputMode::Inherit => Stdio::inherit(),
            OutputMode::Discard => Stdio::null(),
        }
    }
}

/// Options for [`Workspace::run`](crate::Workspace::run).
///
/// Defaults capture both streams, wait forever, and inherit the current
/// environment unchanged.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub stdout: OutputMode,
    pub stderr: OutputMode,
    pub timeout: Option<Duration>,
    /// Variables set on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture stdout (`true`) or discard it (`false`).
    pub fn capture_stdout(mut self, capture: bool) -> Self {
        self.stdout = if capture {
            OutputMode::Capture
        } else {
            OutputMode::Discard
        };
        self
    }

    /// Capture stderr (`true`) or discard it (`false`).
    pub fn capture_stderr(mut self, capture: bool) -> Self {
        self.stderr = if capture {
            OutputMode::Capture
        } else {
            OutputMode::Discard
        };
        self
    }

    pub fn stdout(mut self, mode: OutputMode) -> Self {
        self.stdout = mode;
        self
    }

    pub fn stderr(mut self, mode: OutputMode) -> Self {
        self.stderr = mode;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one command execution.
///
/// Output is kept exactly as produced: nothing is trimmed. Bytes that are not
/// valid UTF-8 are replaced with U+FFFD (a warning is logged when that
/// happens).
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Exit code of the process. On Unix a process terminated by a signal
    /// reports `128 + signal`, following the shell convention.
    pub exit_code: i32,
    /// Captured standard output; empty unless stdout was captured.
    pub stdout: String,
    /// Captured standard error; `None` unless stderr was captured.
    pub stderr: Option<String>,
    /// Wall-clock time between spawn and exit.
    pub elapsed: Duration,
}

impl RunResult {
    /// True if the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "exit code: {} ({:.2?})", self.exit_code, self.elapsed)?;
        writeln!(f, "stdout: {:?}", self.stdout)?;
        match &self.stderr {
            Some(stderr) => write!(f, "stderr: {:?}", stderr),
            None => write!(f, "stderr: <not captured>"),
        }
    }
}

/// Run `command` with `cwd` as its working directory.
pub(crate) fn run_command<S: AsRef<OsStr>>(
    cwd: &Path,
    command: &[S],
    options: &RunOptions,
) -> Result<RunResult, WorkspaceError> {
    let (program, args) = command.split_first().ok_or(WorkspaceError::EmptyCommand)?;
    let program_name = program.as_ref().to_string_lossy().into_owned();

    let launch_error = |source| WorkspaceError::Launch {
        program: program_name.clone(),
        source,
    };

    let resolved = resolve_program(program.as_ref(), cwd, &options.env).map_err(launch_error)?;

    let mut cmd = Command::new(&resolved);
    cmd.args(args)
        .current_dir(cwd)
        .envs(&options.env)
        .stdin(Stdio::null())
        .stdout(options.stdout.stdio())
        .stderr(options.stderr.stdio());

    // A fresh process group lets a timeout take down grandchildren too.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    tracing::debug!(
        program = %resolved.display(),
        args = args.len(),
        cwd = %cwd.display(),
        "spawning command"
    );

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(launch_error)?;

    let mut stdout_reader = child.stdout.take().map(|s| StreamReader::spawn(s, "stdout"));
    let mut stderr_reader = child.stderr.take().map(|s| StreamReader::spawn(s, "stderr"));

    // One deadline covers both the exit and the draining of the pipes, so a
    // background process holding a pipe open cannot outlast the timeout.
    let deadline = options.timeout.map(|timeout| started + timeout);

    let status = match wait_for_exit(&mut child, deadline) {
        Ok(Some(status)) => status,
        Ok(None) => {
            return Err(timed_out(
                &mut child,
                program_name,
                options.timeout.unwrap_or_default(),
                stdout_reader,
                stderr_reader,
            ));
        }
        Err(source) => {
            abort_child(&mut child, &program_name);
            return Err(WorkspaceError::Io {
                path: cwd.to_path_buf(),
                source,
            });
        }
    };

    let drained = [stdout_reader.as_mut(), stderr_reader.as_mut()]
        .into_iter()
        .flatten()
        .all(|reader| reader.wait(deadline, &program_name));
    if !drained {
        return Err(timed_out(
            &mut child,
            program_name,
            options.timeout.unwrap_or_default(),
            stdout_reader,
            stderr_reader,
        ));
    }

    let elapsed = started.elapsed();
    let result = RunResult {
        exit_code: exit_code(status),
        stdout: stdout_reader
            .map(|reader| reader.into_text(&program_name))
            .unwrap_or_default(),
        stderr: stderr_reader.map(|reader| reader.into_text(&program_name)),
        elapsed,
    };

    tracing::info!(
        program = %program_name,
        exit_code = result.exit_code,
        ?elapsed,
        "command finished"
    );

    Ok(result)
}

/// Kill the process tree, reap the child, and collect what the readers
/// managed to capture within [`DRAIN_GRACE`].
fn timed_out(
    child: &mut Child,
    program: String,
    timeout: Duration,
    stdout_reader: Option<StreamReader>,
    stderr_reader: Option<StreamReader>,
) -> WorkspaceError {
    tracing::warn!(program = %program, ?timeout, "command timed out; killing process tree");
    abort_child(child, &program);

    let grace = Some(Instant::now() + DRAIN_GRACE);
    let finish = |reader: Option<StreamReader>| {
        reader.map(|mut reader| {
            if !reader.wait(grace, &program) {
                tracing::warn!(
                    program = %program,
                    stream = reader.name,
                    "stream still held open by an escaped process; returning partial output"
                );
            }
            reader.into_text(&program)
        })
    };
    let stdout = finish(stdout_reader);
    let stderr = finish(stderr_reader);

    WorkspaceError::Timeout {
        program,
        timeout,
        stdout,
        stderr,
    }
}

/// Kill the child's process tree and reap it so no zombie is left behind.
fn abort_child(child: &mut Child, program: &str) {
    terminate(child);
    if let Err(e) = child.wait() {
        tracing::warn!(program, "failed to reap child: {}", e);
    }
}

/// Locate the executable the way a shell would, honoring a `PATH` override
/// and resolving relative paths such as `./gradlew` against `cwd`.
fn resolve_program(
    program: &OsStr,
    cwd: &Path,
    env: &BTreeMap<String, String>,
) -> std::io::Result<PathBuf> {
    let search_path = env
        .get("PATH")
        .map(OsString::from)
        .or_else(|| std::env::var_os("PATH"));

    which::which_in(program, search_path, cwd)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e))
}

/// Drains one output pipe on a background thread.
///
/// Bytes land in a shared buffer as they arrive, so a reader that has to be
/// abandoned still yields everything read so far. The thread signals on
/// `done` when the pipe closes; a dropped sender without a signal means the
/// thread died.
struct StreamReader {
    name: &'static str,
    buffer: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
    finished: bool,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(mut stream: R, name: &'static str) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();

        let sink = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                match stream.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => lock(&sink).extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::warn!(
                            stream = name,
                            "reading output failed; output may be incomplete: {}",
                            e
                        );
                        break;
                    }
                }
            }
            let _ = tx.send(());
        });

        Self {
            name,
            buffer,
            done,
            finished: false,
        }
    }

    /// Block until the pipe closes or `deadline` passes. Returns whether the
    /// reader finished.
    fn wait(&mut self, deadline: Option<Instant>, program: &str) -> bool {
        if self.finished {
            return true;
        }
        let outcome = match deadline {
            None => self.done.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(deadline) => self
                .done
                .recv_timeout(deadline.saturating_duration_since(Instant::now())),
        };
        match outcome {
            Ok(()) => self.finished = true,
            Err(RecvTimeoutError::Timeout) => return false,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!(
                    program,
                    stream = self.name,
                    "output reader stopped unexpectedly; output may be incomplete"
                );
                self.finished = true;
            }
        }
        true
    }

    /// Everything captured so far, decoded.
    fn into_text(self, program: &str) -> String {
        let bytes = std::mem::take(&mut *lock(&self.buffer));
        decode(bytes, self.name, program)
    }
}

fn lock(buffer: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn decode(bytes: Vec<u8>, stream: &str, program: &str) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(
                program,
                stream,
                "output is not valid UTF-8; invalid sequences replaced with U+FFFD"
            );
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    }
}

/// Poll `child` until it exits or `deadline` passes. `None` means timed out.
fn wait_for_exit(
    child: &mut Child,
    deadline: Option<Instant>,
) -> std::io::Result<Option<ExitStatus>> {
    let Some(deadline) = deadline else {
        return child.wait().map(Some);
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: killpg only sends a signal. The group was created at spawn with
    // the child as leader; the id stays reserved while the child is unreaped
    // or any member of its group is still alive.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
