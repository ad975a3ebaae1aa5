//! [`CommandGateway`] – the single path from the hub to the operating system.
//!
//! Every hardware probe and device-control action is expressed as a
//! [`CommandSpec`] (a fixed program plus literal arguments) and must pass
//! through [`CommandGateway::execute`], which enforces in order:
//!
//! 1. **Schema check** ([`SchemaSet`]): the program is allow-listed and the
//!    arguments match one of its registered shapes.  Failures return
//!    [`GatewayError::Rejected`] without spawning anything.
//! 2. **Spawn rate limit**: a process-wide token bucket; callers wait for a
//!    permit instead of failing.
//! 3. **Wall-clock timeout**: the per-call timeout (default 5 s) is clamped
//!    to the configured maximum.  An overrunning child is killed and reaped
//!    and the call returns [`GatewayError::Timeout`].
//!
//! Exactly one child process is spawned per accepted call and no shell is
//! ever involved.  The actual spawning sits behind [`CommandRunner`] so tests
//! can script outputs.

use std::fmt;
use std::num::NonZeroU32;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use os4ai_types::{GatewayError, GatewaySettings};
use os4ai_types::config::DEFAULT_GATEWAY_TIMEOUT_MS;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::command_schema::SchemaSet;

// ────────────────────────────────────────────────────────────────────────────
// CommandSpec / CommandOutput
// ────────────────────────────────────────────────────────────────────────────

/// A program name plus literal arguments.  Never interpreted by a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Overrides the gateway default; still clamped to the maximum.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Decoded output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

// ────────────────────────────────────────────────────────────────────────────
// CommandRunner
// ────────────────────────────────────────────────────────────────────────────

/// Executes one already-validated command.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion or until `timeout` elapses.
    async fn run(&self, spec: &CommandSpec, timeout: Duration)
    -> Result<CommandOutput, GatewayError>;
}

/// Runs commands as real child processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, GatewayError> {
        let program = spec.program.clone();
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&program, e))?;

        let outcome = {
            let collect = collect_output(&mut child);
            tokio::time::timeout(timeout, collect).await
        };

        let (status, stdout, stderr) = match outcome {
            Ok(result) => result.map_err(|e| GatewayError::Io {
                program: program.clone(),
                details: e.to_string(),
            })?,
            Err(_) => {
                // kill() also waits, so the child is reaped before we return.
                if let Err(e) = child.kill().await {
                    warn!(program = %program, error = %e, "failed to kill timed-out command");
                }
                return Err(GatewayError::Timeout {
                    program,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        if !status.success() {
            return Err(GatewayError::NonZeroExit {
                program,
                code: status.code(),
            });
        }

        let stdout = String::from_utf8(stdout).map_err(|e| GatewayError::ParseFailure {
            program: program.clone(),
            details: e.to_string(),
        })?;
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        Ok(CommandOutput { stdout, stderr })
    }
}

async fn collect_output(
    child: &mut Child,
) -> std::io::Result<(std::process::ExitStatus, Vec<u8>, Vec<u8>)> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout.as_mut() {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };
    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr.as_mut() {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };

    let (out, err) = tokio::try_join!(read_stdout, read_stderr)?;
    let status = child.wait().await?;
    Ok((status, out, err))
}

fn spawn_error(program: &str, e: std::io::Error) -> GatewayError {
    match e.kind() {
        std::io::ErrorKind::NotFound => GatewayError::NotFound {
            program: program.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => GatewayError::PermissionDenied {
            program: program.to_string(),
        },
        _ => GatewayError::Io {
            program: program.to_string(),
            details: e.to_string(),
        },
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CommandGateway
// ────────────────────────────────────────────────────────────────────────────

/// Validating, rate-limited, time-bounded command executor.
///
/// # Example
///
/// ```no_run
/// # async fn demo() -> Result<(), os4ai_types::GatewayError> {
/// use os4ai_kernel::{ArgPattern, CommandGateway, CommandSchema, CommandSpec, SchemaSet};
/// use os4ai_types::GatewaySettings;
///
/// let mut schemas = SchemaSet::new();
/// schemas.register(CommandSchema::new("sensors", vec![ArgPattern::literal("-j")]));
///
/// let gateway = CommandGateway::with_process_runner(schemas, &GatewaySettings::default());
/// let out = gateway.execute(&CommandSpec::new("sensors", ["-j"])).await?;
/// println!("{}", out.stdout);
/// # Ok(())
/// # }
/// ```
pub struct CommandGateway {
    schemas: SchemaSet,
    runner: Arc<dyn CommandRunner>,
    limiter: DefaultDirectRateLimiter,
    default_timeout: Duration,
    max_timeout: Duration,
    invocations: AtomicU64,
}

impl CommandGateway {
    pub fn new(
        schemas: SchemaSet,
        runner: Arc<dyn CommandRunner>,
        settings: &GatewaySettings,
    ) -> Self {
        let per_second = NonZeroU32::new(settings.spawns_per_second).unwrap_or(NonZeroU32::MIN);
        let max_timeout = Duration::from_millis(settings.max_timeout_ms.max(1));
        Self {
            schemas,
            runner,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            default_timeout: Duration::from_millis(DEFAULT_GATEWAY_TIMEOUT_MS).min(max_timeout),
            max_timeout,
            invocations: AtomicU64::new(0),
        }
    }

    pub fn with_process_runner(schemas: SchemaSet, settings: &GatewaySettings) -> Self {
        Self::new(schemas, Arc::new(ProcessRunner), settings)
    }

    pub fn schemas(&self) -> &SchemaSet {
        &self.schemas
    }

    /// The timeout `spec` will actually run under.
    pub fn effective_timeout(&self, spec: &CommandSpec) -> Duration {
        spec.timeout
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }

    /// Validate, rate-limit and run `spec`.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Rejected`] – unknown program or invalid arguments;
    ///   nothing was spawned.
    /// - [`GatewayError::Timeout`] – the child overran and was killed.
    /// - [`GatewayError::NotFound`] / [`GatewayError::PermissionDenied`] /
    ///   [`GatewayError::Io`] – the spawn itself failed.
    /// - [`GatewayError::NonZeroExit`] – the command reported failure.
    /// - [`GatewayError::ParseFailure`] – stdout was not valid UTF-8.
    pub async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput, GatewayError> {
        if let Err(e) = self.schemas.validate(spec) {
            warn!(program = %spec.program, error = %e, "command rejected");
            return Err(e);
        }

        self.limiter.until_ready().await;
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let timeout = self.effective_timeout(spec);
        debug!(command = %spec, timeout_ms = timeout.as_millis() as u64, "running command");

        let result = self.runner.run(spec, timeout).await;
        if let Err(e) = &result {
            debug!(program = %spec.program, error = %e, "command failed");
        }
        result
    }

    /// Number of commands that passed validation and were handed to the runner.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }
}
