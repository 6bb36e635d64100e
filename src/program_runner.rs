//! Runs one local player program for a single turn and classifies the
//! result.
//!
//! Each slot owns a [`ProgramRunner`] holding the accumulated
//! request/response history and the two opaque side-channel blobs
//! (`data`, `globaldata`) a stateful program round-trips between turns.
//! [`ProgramRunner::run_turn`] spawns the program with redirected stdio
//! and its containing directory as working directory, feeds it the
//! history as one line of JSON (or the line-oriented simple-IO framing),
//! and races natural exit against the time budget. A timeout or crash is
//! a first-class [`Verdict`](crate::match_log::Verdict), never an error
//! propagated past the call.
//!
//! The running [`Child`] is kept in a shared handle so a concurrent abort
//! can kill it; the handle is cleared on every return path.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, trace, warn};

use crate::match_log::ProgramOutcome;
use crate::match_state::CancelToken;

/// Memory budget advertised to player programs, in megabytes. Only
/// round-tripped in the stdin payload; nothing enforces it locally.
pub const MEMORY_LIMIT_MB: u64 = 256;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Concurrently-observable handle to the subprocess of an in-flight turn.
pub(crate) type SharedChild = Arc<Mutex<Option<Child>>>;

pub(crate) enum RawStatus {
    Exited(ExitStatus),
    TimedOut,
    SpawnFailed(String),
}

pub(crate) struct RawRun {
    pub status: RawStatus,
    pub stdout: String,
    pub stderr: String,
    /// CPU milliseconds consumed by the child (wall-clock fallback on
    /// platforms without child rusage).
    pub cpu_ms: u64,
}

/// One line of JSON on the program's stdout.
#[derive(Deserialize)]
struct PlayerReply {
    #[serde(default)]
    response: Value,
    #[serde(default)]
    debug: Value,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    globaldata: Value,
}

/// Per-slot turn runner for a local player program.
#[derive(Debug)]
pub struct ProgramRunner {
    program: PathBuf,
    simple_io: bool,
    /// Requests received so far, oldest first.
    pub requests: Vec<Value>,
    /// Responses produced so far; `null` for failed turns so both
    /// histories stay aligned.
    pub responses: Vec<Value>,
    data: Value,
    globaldata: Value,
    child: SharedChild,
}

impl ProgramRunner {
    /// Runner for the program at `program`, using the JSON protocol or
    /// the simple line-oriented variant.
    pub fn new(program: impl Into<PathBuf>, simple_io: bool) -> Self {
        ProgramRunner {
            program: program.into(),
            simple_io,
            requests: vec![],
            responses: vec![],
            data: Value::Null,
            globaldata: Value::Null,
            child: SharedChild::default(),
        }
    }

    /// Appends the request the program will answer on the next
    /// [`ProgramRunner::run_turn`].
    pub fn push_request(&mut self, request: Value) {
        self.requests.push(request);
    }

    /// Handle through which an abort can kill the in-flight subprocess.
    pub(crate) fn child_handle(&self) -> SharedChild {
        Arc::clone(&self.child)
    }

    /// Runs one turn against the newest request and classifies the result.
    ///
    /// Never panics or errors on program misbehavior: a slow program is
    /// killed and reported as [`Verdict::TimeLimitExceeded`], a non-zero
    /// exit or unparsable answer as [`Verdict::RuntimeError`]. On success
    /// the returned `data`/`globaldata` blobs are stored for the next
    /// call of this same runner.
    ///
    /// [`Verdict::TimeLimitExceeded`]: crate::match_log::Verdict::TimeLimitExceeded
    /// [`Verdict::RuntimeError`]: crate::match_log::Verdict::RuntimeError
    #[instrument(skip_all, fields(program = %self.program.display()))]
    pub fn run_turn(&mut self, time_limit: Duration, cancel: &CancelToken) -> ProgramOutcome {
        let input = self.build_stdin_payload(time_limit);
        let run = run_once(&self.program, &input, time_limit, &self.child, cancel);

        let outcome = match run.status {
            RawStatus::SpawnFailed(reason) => {
                warn!("failed to start {}: {reason}", self.program.display());
                ProgramOutcome::runtime_error(format!("failed to start: {reason}"), 0)
            }
            RawStatus::TimedOut => {
                debug!("time limit of {time_limit:?} exceeded");
                ProgramOutcome::time_limit_exceeded(run.cpu_ms)
            }
            RawStatus::Exited(status) if !status.success() => {
                let diagnostic = if run.stderr.trim().is_empty() {
                    format!("exited with {status}")
                } else {
                    run.stderr.trim().to_string()
                };
                ProgramOutcome::runtime_error(diagnostic, run.cpu_ms)
            }
            RawStatus::Exited(_) => self.classify_success(&run),
        };

        self.responses
            .push(outcome.response.clone().unwrap_or(Value::Null));
        outcome
    }

    fn classify_success(&mut self, run: &RawRun) -> ProgramOutcome {
        if self.simple_io {
            let response = Value::String(run.stdout.trim().to_string());
            return ProgramOutcome::ok(response, None, run.cpu_ms);
        }
        let line = run.stdout.lines().next().unwrap_or("");
        match serde_json::from_str::<PlayerReply>(line) {
            Ok(reply) => {
                self.data = reply.data;
                self.globaldata = reply.globaldata;
                let debug = match reply.debug {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                };
                ProgramOutcome::ok(reply.response, debug, run.cpu_ms)
            }
            Err(e) => ProgramOutcome::runtime_error(
                format!("unparsable response line: {e} (got {line:?})"),
                run.cpu_ms,
            ),
        }
    }

    // JSON protocol: the full history plus side blobs, one line.
    // Simple IO: the request count, then the interleaved history one item
    // per line, ending with the newest request.
    fn build_stdin_payload(&self, time_limit: Duration) -> String {
        if self.simple_io {
            let mut lines = vec![self.requests.len().to_string()];
            for (i, request) in self.requests.iter().enumerate() {
                lines.push(render_line(request));
                if let Some(response) = self.responses.get(i) {
                    lines.push(render_line(response));
                }
            }
            lines.push(String::new());
            lines.join("\n")
        } else {
            let payload = json!({
                "requests": self.requests,
                "responses": self.responses,
                "data": self.data,
                "globaldata": self.globaldata,
                "time_limit_ms": time_limit.as_millis() as u64,
                "memory_limit_mb": MEMORY_LIMIT_MB,
            });
            format!("{payload}\n")
        }
    }
}

fn render_line(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Spawns `program`, writes `input` to its stdin and races exit against
/// `time_limit`, killing on expiry or cancellation. Used for both player
/// programs and the subprocess judge host.
#[instrument(skip_all, fields(program = %program.display()))]
pub(crate) fn run_once(
    program: &Path,
    input: &str,
    time_limit: Duration,
    slot: &SharedChild,
    cancel: &CancelToken,
) -> RawRun {
    let started = Instant::now();
    #[cfg(unix)]
    let cpu_before = children_cpu_ms();

    let mut command = Command::new(program);
    if let Some(dir) = program.parent().filter(|p| !p.as_os_str().is_empty()) {
        command.current_dir(dir);
    }
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return RawRun {
                status: RawStatus::SpawnFailed(e.to_string()),
                stdout: String::new(),
                stderr: String::new(),
                cpu_ms: 0,
            }
        }
    };
    trace!("spawned pid {:?}", child.id());

    // Dedicated pipe threads keep the deadline loop free and avoid the
    // classic full-pipe deadlock between stdin and stdout.
    let mut stdin = child.stdin.take().expect("stdin was piped");
    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");
    let input = input.to_string();
    let writer = thread::spawn(move || {
        let _ = stdin.write_all(input.as_bytes());
    });
    let stdout_reader = thread::spawn(move || read_to_string_lossy(stdout));
    let stderr_reader = thread::spawn(move || read_to_string_lossy(stderr));

    *slot.lock().expect("poisoned") = Some(child);

    let deadline = started + time_limit;
    let status = loop {
        let waited = {
            let mut guard = slot.lock().expect("poisoned");
            match guard.as_mut() {
                Some(child) => child.try_wait(),
                // an abort raced us and already reaped the child
                None => break RawStatus::TimedOut,
            }
        };
        match waited {
            Ok(Some(status)) => break RawStatus::Exited(status),
            Ok(None) => {}
            Err(e) => {
                kill_in_slot(slot);
                break RawStatus::SpawnFailed(format!("wait failed: {e}"));
            }
        }
        if cancel.is_cancelled() || Instant::now() >= deadline {
            kill_in_slot(slot);
            break RawStatus::TimedOut;
        }
        thread::sleep(POLL_INTERVAL);
    };

    // the handle must be cleared on every return path
    *slot.lock().expect("poisoned") = None;

    let _ = writer.join();
    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    #[cfg(unix)]
    let cpu_ms = children_cpu_ms().saturating_sub(cpu_before);
    #[cfg(not(unix))]
    let cpu_ms = started.elapsed().as_millis() as u64;

    RawRun {
        status,
        stdout,
        stderr,
        cpu_ms,
    }
}

pub(crate) fn kill_in_slot(slot: &SharedChild) {
    let mut guard = slot.lock().expect("poisoned");
    if let Some(child) = guard.as_mut() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

fn read_to_string_lossy(mut source: impl Read) -> String {
    let mut buf = Vec::new();
    let _ = source.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

// CPU time is charged via the children rusage counter, which only ticks
// when a child is reaped; turns run one child at a time, so the delta
// around a turn belongs to that turn's program.
#[cfg(unix)]
fn children_cpu_ms() -> u64 {
    use nix::sys::resource::{getrusage, UsageWho};
    match getrusage(UsageWho::RUSAGE_CHILDREN) {
        Ok(usage) => {
            let user = usage.user_time();
            let system = usage.system_time();
            let secs = (user.tv_sec() + system.tv_sec()) as u64;
            let usecs = (user.tv_usec() + system.tv_usec()) as u64;
            secs * 1_000 + usecs / 1_000
        }
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_payload_carries_history_and_side_data() {
        let mut runner = ProgramRunner::new("/tmp/bot", false);
        runner.push_request(json!({"x": 1}));
        runner.responses.push(json!("a"));
        runner.push_request(json!({"x": 2}));

        let payload = runner.build_stdin_payload(Duration::from_millis(1500));
        assert!(payload.ends_with('\n'));
        let parsed: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["requests"], json!([{"x": 1}, {"x": 2}]));
        assert_eq!(parsed["responses"], json!(["a"]));
        assert_eq!(parsed["time_limit_ms"], json!(1500));
        assert_eq!(parsed["memory_limit_mb"], json!(MEMORY_LIMIT_MB));
        assert!(parsed["data"].is_null());
        assert!(parsed["globaldata"].is_null());
    }

    #[test]
    fn simple_io_payload_interleaves_history() {
        let mut runner = ProgramRunner::new("/tmp/bot", true);
        runner.push_request(json!("3 4"));
        runner.responses.push(json!("7"));
        runner.push_request(json!("5 6"));

        let payload = runner.build_stdin_payload(Duration::from_secs(1));
        assert_eq!(payload, "2\n3 4\n7\n5 6\n");
    }
}
