//! Running one toolchain subprocess with captured output.
//!
//! Standard output and standard error are both redirected into a single log
//! file, so the captured text keeps the order in which the tool wrote it and
//! nothing reaches the console of the importing process.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::InvokeError;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A program and its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    /// The program to run.
    pub program: PathBuf,
    /// Its arguments.
    pub args: Vec<String>,
}

impl CommandLine {
    /// Creates a command line without arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '"') {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Limits applied while a subprocess runs.
#[derive(Clone, Copy, Default)]
pub struct RunLimits<'a> {
    /// Wall-clock limit; the process is killed when it is exceeded.
    pub timeout: Option<Duration>,
    /// Raised by the caller to abandon the run; the process is killed.
    pub cancel: Option<&'a AtomicBool>,
}

/// How a subprocess ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The process exited; `None` when it was ended by a signal.
    Exited(Option<i32>),
    /// The process was killed after exceeding the timeout.
    TimedOut(Duration),
    /// The process was killed because the run was cancelled.
    Cancelled,
    /// The process could not be started.
    SpawnFailed(String),
    /// The step was not run; an injection table forced this errno.
    Injected(i32),
}

impl Termination {
    /// Returns `true` only for a zero exit status.
    pub fn success(&self) -> bool {
        *self == Termination::Exited(Some(0))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(Some(code)) => write!(f, "exit status {code}"),
            Termination::Exited(None) => f.write_str("terminated by signal"),
            Termination::TimedOut(limit) => {
                write!(f, "timed out after {:.1}s, killed", limit.as_secs_f64())
            }
            Termination::Cancelled => f.write_str("cancelled, killed"),
            Termination::SpawnFailed(reason) => write!(f, "could not start: {reason}"),
            Termination::Injected(errno) => write!(f, "injected failure (errno {errno})"),
        }
    }
}

/// Result of one subprocess run.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// How the process ended.
    pub termination: Termination,
    /// Everything written to stdout and stderr, interleaved.
    pub output: String,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// Kills the child if the waiting caller unwinds before it exits.
struct ChildGuard(Option<Child>);

impl ChildGuard {
    fn child(&mut self) -> Option<&mut Child> {
        self.0.as_mut()
    }

    fn reap(&mut self) {
        if let Some(mut child) = self.0.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.reap();
    }
}

/// Runs `cmd` in `cwd`, capturing its combined output into `log_path`.
pub fn run_captured(
    cmd: &CommandLine,
    cwd: &Path,
    log_path: &Path,
    limits: RunLimits<'_>,
) -> Result<RunOutcome, InvokeError> {
    log::debug!("running {cmd}");
    if limits.cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
        return Ok(RunOutcome {
            termination: Termination::Cancelled,
            output: String::new(),
            elapsed: Duration::ZERO,
        });
    }
    let log = File::create(log_path).map_err(|e| InvokeError::io(log_path, e))?;
    let log_err = log.try_clone().map_err(|e| InvokeError::io(log_path, e))?;

    let start = Instant::now();
    let spawned = Command::new(&cmd.program)
        .args(&cmd.args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn();
    let child = match spawned {
        Ok(child) => child,
        Err(e) => {
            return Ok(RunOutcome {
                termination: Termination::SpawnFailed(e.to_string()),
                output: String::new(),
                elapsed: start.elapsed(),
            })
        }
    };

    let mut guard = ChildGuard(Some(child));
    let termination = wait(&mut guard, start, limits)?;
    let elapsed = start.elapsed();

    let raw = std::fs::read(log_path).map_err(|e| InvokeError::io(log_path, e))?;
    Ok(RunOutcome {
        termination,
        output: String::from_utf8_lossy(&raw).into_owned(),
        elapsed,
    })
}

fn wait(
    guard: &mut ChildGuard,
    start: Instant,
    limits: RunLimits<'_>,
) -> Result<Termination, InvokeError> {
    let deadline = limits.timeout.and_then(|t| start.checked_add(t));
    loop {
        let Some(child) = guard.child() else {
            return Ok(Termination::Cancelled);
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                guard.0 = None;
                return Ok(Termination::Exited(status.code()));
            }
            Ok(None) => {}
            Err(e) => return Err(InvokeError::io("<child process>", e)),
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            guard.reap();
            return Ok(Termination::TimedOut(limits.timeout.unwrap_or_default()));
        }
        if limits.cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            guard.reap();
            return Ok(Termination::Cancelled);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sh(script: &str) -> CommandLine {
        let mut cmd = CommandLine::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn display_quotes_spaces() {
        let cmd = sh("echo hi");
        assert_eq!(cmd.to_string(), "/bin/sh -c 'echo hi'");
    }

    #[test]
    fn captures_interleaved_output() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_captured(
            &sh("echo out; echo err 1>&2; echo out2"),
            dir.path(),
            &dir.path().join("run.log"),
            RunLimits::default(),
        )
        .unwrap();
        assert!(outcome.termination.success());
        assert_eq!(outcome.output, "out\nerr\nout2\n");
    }

    #[test]
    fn reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_captured(
            &sh("echo failing; exit 3"),
            dir.path(),
            &dir.path().join("run.log"),
            RunLimits::default(),
        )
        .unwrap();
        assert_eq!(outcome.termination, Termination::Exited(Some(3)));
        assert!(!outcome.termination.success());
        assert_eq!(outcome.output, "failing\n");
    }

    #[test]
    fn timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let limits = RunLimits {
            timeout: Some(Duration::from_millis(100)),
            cancel: None,
        };
        let outcome =
            run_captured(&sh("sleep 30"), dir.path(), &dir.path().join("run.log"), limits)
                .unwrap();
        assert!(matches!(outcome.termination, Termination::TimedOut(_)));
        assert!(outcome.elapsed < Duration::from_secs(10));
        assert!(outcome.termination.to_string().contains("timed out"));
    }

    #[test]
    fn cancel_flag_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let raiser = {
            let cancel = Arc::clone(&cancel);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                cancel.store(true, Ordering::Relaxed);
            })
        };
        let limits = RunLimits {
            timeout: None,
            cancel: Some(&cancel),
        };
        let outcome =
            run_captured(&sh("sleep 30"), dir.path(), &dir.path().join("run.log"), limits)
                .unwrap();
        raiser.join().unwrap();
        assert_eq!(outcome.termination, Termination::Cancelled);
    }

    #[test]
    fn already_cancelled_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let cancel = AtomicBool::new(true);
        let limits = RunLimits {
            timeout: None,
            cancel: Some(&cancel),
        };
        let script = format!("touch {}", marker.display());
        let outcome =
            run_captured(&sh(&script), dir.path(), &dir.path().join("run.log"), limits).unwrap();
        assert_eq!(outcome.termination, Termination::Cancelled);
        assert!(!marker.exists());
    }

    #[test]
    fn missing_program_is_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_captured(
            &CommandLine::new("/nonexistent/bin/cload-tool"),
            dir.path(),
            &dir.path().join("run.log"),
            RunLimits::default(),
        )
        .unwrap();
        assert!(matches!(outcome.termination, Termination::SpawnFailed(_)));
    }
}
