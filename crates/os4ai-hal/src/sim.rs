//! Scripted command runner for headless tests.
//!
//! [`ScriptedRunner`] stands in for [`ProcessRunner`][os4ai_kernel::ProcessRunner]
//! behind the gateway.  Replies are scripted per program; the last reply for
//! a program repeats until it is replaced.  Every call is counted so tests can
//! assert how often the hardware would have been hit.
//!
//! # Example
//!
//! ```rust
//! use os4ai_hal::sim::ScriptedRunner;
//!
//! let runner = ScriptedRunner::new()
//!     .with_output("sensors", r#"{"coretemp": {"Package id 0": {"temp1_input": 50.0}}}"#);
//! assert_eq!(runner.calls(), 0);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use os4ai_kernel::{CommandOutput, CommandRunner, CommandSpec};
use os4ai_types::GatewayError;

type Reply = Result<CommandOutput, GatewayError>;

#[derive(Default)]
pub struct ScriptedRunner {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    history: Mutex<Vec<CommandSpec>>,
    calls: AtomicU64,
    delay: Option<Duration>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` first (bounded by the call's timeout).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_output(self, program: &str, stdout: &str) -> Self {
        self.push(program, Ok(stdout_only(stdout)));
        self
    }

    pub fn with_reply(self, program: &str, reply: Reply) -> Self {
        self.push(program, reply);
        self
    }

    /// Queue `reply` after the ones already scripted for `program`.
    pub fn push(&self, program: &str, reply: Reply) {
        self.lock_replies()
            .entry(program.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Replace everything scripted for `program` with `reply`.
    pub fn set(&self, program: &str, reply: Reply) {
        self.lock_replies()
            .insert(program.to_string(), VecDeque::from([reply]));
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, program: &str) -> usize {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|s| s.program == program)
            .count()
    }

    pub fn history(&self) -> Vec<CommandSpec> {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<Reply>>> {
        self.replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn next_reply(&self, program: &str) -> Reply {
        let mut replies = self.lock_replies();
        match replies.get_mut(program) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| not_found(program)),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| not_found(program)),
            None => not_found(program),
        }
    }
}

fn stdout_only(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn not_found(program: &str) -> Reply {
    Err(GatewayError::NotFound {
        program: program.to_string(),
    })
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(spec.clone());

        if let Some(delay) = self.delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(GatewayError::Timeout {
                    program: spec.program.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(delay).await;
        }
        self.next_reply(&spec.program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_reply_repeats() {
        let runner = ScriptedRunner::new()
            .with_output("sensors", "a")
            .with_output("sensors", "b");
        let spec = CommandSpec::new("sensors", ["-j"]);
        let t = Duration::from_secs(1);
        assert_eq!(runner.run(&spec, t).await.unwrap().stdout, "a");
        assert_eq!(runner.run(&spec, t).await.unwrap().stdout, "b");
        assert_eq!(runner.run(&spec, t).await.unwrap().stdout, "b");
        assert_eq!(runner.calls(), 3);
        assert_eq!(runner.calls_for("sensors"), 3);
    }

    #[tokio::test]
    async fn unscripted_program_is_not_found() {
        let runner = ScriptedRunner::new();
        let result = runner
            .run(&CommandSpec::new("nmcli", ["dev"]), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(GatewayError::NotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_beyond_timeout_times_out() {
        let runner = ScriptedRunner::new()
            .with_output("sox", "")
            .with_delay(Duration::from_secs(10));
        let result = runner
            .run(&CommandSpec::new("sox", ["-q"]), Duration::from_secs(2))
            .await;
        assert!(matches!(result, Err(GatewayError::Timeout { timeout_ms: 2000, .. })));
    }
}
