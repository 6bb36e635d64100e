//! The judge seam: whoever computes the next turn.
//!
//! The engine never implements game rules; it consumes a [`JudgeAdapter`]
//! that, given the turn log and init data, eventually returns either a
//! per-slot request map or a finish command with final scores. Any host
//! can sit behind the trait (an embedded webview, a script engine, or
//! the subprocess host provided here) as long as it honors "one pending
//! request at a time, eventual response or explicit failure".

use std::path::PathBuf;
use std::process::Child;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::instrument;

use crate::error::{Error, Result};
use crate::match_log::{JudgeOutput, TurnLogEntry};
use crate::match_state::CancelToken;
use crate::program_runner::{run_once, RawStatus, SharedChild};

/// Produces the judge's output for the next turn.
pub trait JudgeAdapter {
    /// Computes the next output from the full turn log and the match's
    /// init data. Called strictly sequentially; an `Err` is fatal to the
    /// match.
    fn next_output(&mut self, logs: &[TurnLogEntry], initdata: &Value) -> Result<JudgeOutput>;

    /// Hands the adapter the match's cancel token so a long-running host
    /// can unwind when the match is aborted mid-request.
    fn bind_cancel(&mut self, _cancel: CancelToken) {}

    /// Subprocess handle the abort path should kill, for hosts that run
    /// one.
    fn abort_hook(&self) -> Option<Arc<Mutex<Option<Child>>>> {
        None
    }
}

/// Hosts the judge as a local executable.
///
/// Each call runs the program once with a single stdin line
/// `{"log": [...], "initdata": ...}` and parses a [`JudgeOutput`] from
/// its first stdout line. A judge that overruns its budget, crashes or
/// answers garbage is a [`Error::Judge`]: unlike players, there is no
/// per-turn verdict to record and the match cannot continue.
pub struct ProgramJudge {
    program: PathBuf,
    time_limit: Duration,
    cancel: CancelToken,
    child: SharedChild,
}

impl ProgramJudge {
    /// Default judge time budget per turn.
    pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(5);

    /// Judge host for the executable at `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ProgramJudge {
            program: program.into(),
            time_limit: Self::DEFAULT_TIME_LIMIT,
            cancel: CancelToken::new(),
            child: SharedChild::default(),
        }
    }

    /// Overrides the judge time budget.
    #[must_use]
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }
}

impl JudgeAdapter for ProgramJudge {
    fn bind_cancel(&mut self, cancel: CancelToken) {
        self.cancel = cancel;
    }

    fn abort_hook(&self) -> Option<SharedChild> {
        Some(self.child.clone())
    }

    #[instrument(skip_all, fields(judge = %self.program.display()))]
    fn next_output(&mut self, logs: &[TurnLogEntry], initdata: &Value) -> Result<JudgeOutput> {
        let input = serde_json::to_string(&json!({"log": logs, "initdata": initdata}))
            .map_err(|e| Error::Judge(format!("could not serialize judge input: {e}")))?
            + "\n";
        let run = run_once(
            &self.program,
            &input,
            self.time_limit,
            &self.child,
            &self.cancel,
        );
        match run.status {
            RawStatus::SpawnFailed(reason) => {
                Err(Error::Judge(format!("judge failed to start: {reason}")))
            }
            RawStatus::TimedOut => Err(Error::Judge(format!(
                "judge produced no output within {:?}",
                self.time_limit
            ))),
            RawStatus::Exited(status) if !status.success() => Err(Error::Judge(format!(
                "judge exited with {status}: {}",
                run.stderr.trim()
            ))),
            RawStatus::Exited(_) => {
                let line = run.stdout.lines().next().unwrap_or("");
                serde_json::from_str::<JudgeOutput>(line)
                    .map_err(|e| Error::Judge(format!("malformed judge output: {e} (got {line:?})")))
            }
        }
    }
}
