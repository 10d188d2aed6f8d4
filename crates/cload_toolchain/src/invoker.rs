//! The two-phase build of one unit: compile to an object, link to a
//! loadable artifact.
//!
//! Everything happens inside a workspace directory owned by the caller. A
//! failed compile short-circuits the link. The transcript of the attempt
//! collects each command line, the interleaved output of the tool, and how
//! the tool ended; it is returned whatever the outcome.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use cload_common::{ContentHash, Role, SourceLanguage, UnitIdentity};
use cload_config::UnitSidecar;

use crate::error::{InjectionError, InvokeError};
use crate::flags::{macro_environment, role_cflags, BASE_CFLAGS};
use crate::header;
use crate::injection::{check_role, InjectionTable, BUILD_FUNCTION};
use crate::probe::Environment;
use crate::run::{run_captured, CommandLine, RunLimits, Termination};

/// A step of the build pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Source to object.
    Compile,
    /// Object to loadable artifact.
    Link,
}

impl Phase {
    /// Lowercase name of the phase.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Compile => "compile",
            Phase::Link => "link",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome class of a build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildStatus {
    /// Both phases succeeded and the artifact exists.
    Success,
    /// The compile phase failed; no link was attempted.
    CompileFailed,
    /// The compile phase succeeded and the link phase failed.
    LinkFailed,
}

/// What a build attempt produced. Not persisted beyond the transcript.
#[derive(Clone, Debug)]
pub struct BuildResult {
    /// Outcome class.
    pub status: BuildStatus,
    /// Exit code of the failing step, when it exited normally.
    pub exit_code: Option<i32>,
    /// The failing step was killed after the timeout.
    pub timed_out: bool,
    /// The failing step was killed because the build was cancelled.
    pub cancelled: bool,
    /// Full transcript of the attempt.
    pub transcript: String,
    /// The linked artifact inside the workspace, on success.
    pub artifact: Option<PathBuf>,
}

impl BuildResult {
    /// The phase that failed, if any.
    pub fn failed_phase(&self) -> Option<Phase> {
        match self.status {
            BuildStatus::Success => None,
            BuildStatus::CompileFailed => Some(Phase::Compile),
            BuildStatus::LinkFailed => Some(Phase::Link),
        }
    }

    fn failed(phase: Phase, termination: &Termination, transcript: String) -> Self {
        Self {
            status: match phase {
                Phase::Compile => BuildStatus::CompileFailed,
                Phase::Link => BuildStatus::LinkFailed,
            },
            exit_code: match termination {
                Termination::Exited(code) => *code,
                _ => None,
            },
            timed_out: matches!(termination, Termination::TimedOut(_)),
            cancelled: matches!(termination, Termination::Cancelled),
            transcript,
            artifact: None,
        }
    }
}

/// One build to run.
#[derive(Clone, Copy)]
pub struct BuildRequest<'a> {
    /// The unit to build.
    pub identity: &'a UnitIdentity,
    /// Extra inputs declared by the unit's sidecar.
    pub sidecar: Option<&'a UnitSidecar>,
    /// Directory that receives every intermediate file.
    pub workspace: &'a Path,
    /// Raised by the caller to abandon the build.
    pub cancel: Option<&'a AtomicBool>,
}

/// Builds units for one role against one probed environment.
pub struct Invoker {
    env: Arc<Environment>,
    role: Role,
    role_options: BTreeMap<Role, Vec<String>>,
    timeout: Option<Duration>,
    injections: Option<Arc<InjectionTable>>,
}

impl Invoker {
    /// Creates an invoker without timeout or injections.
    pub fn new(env: Arc<Environment>, role: Role, role_options: BTreeMap<Role, Vec<String>>) -> Self {
        Self {
            env,
            role,
            role_options,
            timeout: None,
            injections: None,
        }
    }

    /// Sets the wall-clock limit of each step.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Consults `table` before each step. Only allowed in the test role.
    pub fn with_injections(mut self, table: Arc<InjectionTable>) -> Result<Self, InjectionError> {
        check_role(self.role)?;
        self.injections = Some(table);
        Ok(self)
    }

    /// The probed environment.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// The role every unit is compiled for.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Fingerprint of the toolchain configuration this invoker builds with.
    pub fn toolchain_fingerprint(&self) -> ContentHash {
        self.env.toolchain_fingerprint(self.role, &self.role_options)
    }

    /// Path of the object file of `req` inside its workspace.
    pub fn object_path(&self, req: &BuildRequest<'_>) -> PathBuf {
        req.workspace.join(format!("{}.o", req.identity.basename()))
    }

    /// Path of the linked artifact of `req` inside its workspace.
    pub fn artifact_path(&self, req: &BuildRequest<'_>) -> PathBuf {
        req.workspace.join(format!(
            "{}.{}",
            req.identity.basename(),
            self.env.platform.artifact_suffix
        ))
    }

    /// The compile command for `req`, force-including `header`.
    pub fn compile_command(&self, req: &BuildRequest<'_>, header: &Path) -> CommandLine {
        let identity = req.identity;
        let mut cmd = CommandLine::new(&self.env.driver_for(identity.language).path);
        cmd.arg("-x").arg(identity.language.driver_name());
        cmd.args(BASE_CFLAGS.iter().copied());
        cmd.args(role_cflags(self.role).iter().copied());
        cmd.args(self.env.cflags.iter().cloned());
        for dir in &self.env.include_dirs {
            cmd.arg(format!("-I{}", dir.display()));
        }
        if let Some(sidecar) = req.sidecar {
            for dir in &sidecar.compile.include_dirs {
                cmd.arg(format!("-I{}", identity.source_dir().join(dir).display()));
            }
        }
        for define in macro_environment(identity, self.role, &self.role_options) {
            cmd.arg(define.to_arg());
        }
        if let Some(sidecar) = req.sidecar {
            for (name, value) in &sidecar.compile.defines {
                if value.is_empty() {
                    cmd.arg(format!("-D{name}"));
                } else {
                    cmd.arg(format!("-D{name}={value}"));
                }
            }
        }
        cmd.arg("-include").arg(header.to_string_lossy());
        cmd.arg("-o").arg(self.object_path(req).to_string_lossy());
        cmd.arg("-c").arg(identity.source.to_string_lossy());
        cmd
    }

    /// The link command for `req`.
    pub fn link_command(&self, req: &BuildRequest<'_>) -> CommandLine {
        let identity = req.identity;
        let platform = &self.env.platform;
        let mut cmd = CommandLine::new(&self.env.driver_for(identity.language).path);
        cmd.args(platform.link_flags.iter().cloned());
        cmd.args(self.env.ldflags.iter().cloned());
        for dir in &self.env.library_dirs {
            cmd.arg(format!("-L{}", dir.display()));
        }
        if let Some(sidecar) = req.sidecar {
            for dir in &sidecar.link.library_dirs {
                cmd.arg(format!("-L{}", identity.source_dir().join(dir).display()));
            }
        }
        cmd.arg("-o").arg(self.artifact_path(req).to_string_lossy());
        cmd.arg(self.object_path(req).to_string_lossy());

        if let Some(sidecar) = req.sidecar {
            for lib in &sidecar.link.libraries {
                cmd.arg(format!("-l{lib}"));
            }
            if platform.is_darwin() {
                for framework in &sidecar.link.frameworks {
                    cmd.arg("-framework").arg(framework);
                }
            } else if !sidecar.link.frameworks.is_empty() {
                log::debug!(
                    "{}: ignoring frameworks on {}",
                    identity.module_path,
                    platform.os
                );
            }
        }
        match identity.language {
            SourceLanguage::ObjC if platform.is_darwin() => {
                cmd.arg("-framework").arg("Foundation");
            }
            SourceLanguage::ObjC => {
                cmd.arg("-lobjc");
            }
            SourceLanguage::Cxx if self.env.cxx.is_none() => {
                cmd.arg(if platform.is_darwin() { "-lc++" } else { "-lstdc++" });
            }
            _ => {}
        }
        cmd
    }

    /// Compiles and links `req`. Tool failures are reported in the result;
    /// only workspace I/O errors are returned as errors.
    pub fn build(&self, req: &BuildRequest<'_>) -> Result<BuildResult, InvokeError> {
        log::info!(
            "building {} ({}) from {}",
            req.identity.module_path,
            self.role,
            req.identity.source.display()
        );
        let header = header::materialize(req.workspace)?;
        let mut transcript = String::new();

        let compile = self.compile_command(req, &header);
        let termination = self.step(Phase::Compile, &compile, req, &mut transcript)?;
        if !termination.success() {
            return Ok(BuildResult::failed(Phase::Compile, &termination, transcript));
        }

        let link = self.link_command(req);
        let termination = self.step(Phase::Link, &link, req, &mut transcript)?;
        if !termination.success() {
            return Ok(BuildResult::failed(Phase::Link, &termination, transcript));
        }

        let artifact = self.artifact_path(req);
        if !artifact.is_file() {
            let _ = writeln!(transcript, "linker produced no {}", artifact.display());
            return Ok(BuildResult::failed(
                Phase::Link,
                &Termination::Exited(None),
                transcript,
            ));
        }
        Ok(BuildResult {
            status: BuildStatus::Success,
            exit_code: Some(0),
            timed_out: false,
            cancelled: false,
            transcript,
            artifact: Some(artifact),
        })
    }

    fn step(
        &self,
        phase: Phase,
        cmd: &CommandLine,
        req: &BuildRequest<'_>,
        transcript: &mut String,
    ) -> Result<Termination, InvokeError> {
        let _ = writeln!(transcript, "$ {cmd}");
        let injected = self
            .injections
            .as_ref()
            .and_then(|t| t.get(BUILD_FUNCTION, phase.as_str()));
        let termination = match injected {
            Some(errno) => Termination::Injected(errno),
            None => {
                let log_path = req.workspace.join(format!("{phase}.log"));
                let limits = RunLimits {
                    timeout: self.timeout,
                    cancel: req.cancel,
                };
                let outcome = run_captured(cmd, req.workspace, &log_path, limits)?;
                transcript.push_str(&outcome.output);
                if !outcome.output.is_empty() && !outcome.output.ends_with('\n') {
                    transcript.push('\n');
                }
                outcome.termination
            }
        };
        let _ = writeln!(transcript, "[{phase}: {termination}]");
        if !termination.success() {
            log::debug!("{} {phase} failed: {termination}", req.identity.module_path);
        }
        Ok(termination)
    }
}
