//! Process runner behavior against real subprocesses.
#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use match_arena::match_state::CancelToken;
use match_arena::prelude::*;
use serde_json::json;
use tempfile::tempdir;

#[test]
fn sleeper_is_killed_and_reported_as_tle() {
    let dir = tempdir().unwrap();
    let program = common::script(&dir, "sleeper", "sleep 30");
    let mut runner = ProgramRunner::new(&program, false);
    runner.push_request(json!("go"));

    let limit = Duration::from_millis(300);
    let started = Instant::now();
    let outcome = runner.run_turn(limit, &CancelToken::new());

    assert_eq!(outcome.verdict, Verdict::TimeLimitExceeded);
    assert!(outcome.response.is_none(), "partial output must be discarded");
    // limit + ε: the poll loop ticks every 10ms, reaping is immediate
    assert!(
        started.elapsed() < limit + Duration::from_secs(1),
        "runner took {:?}",
        started.elapsed()
    );
}

#[test]
fn non_zero_exit_is_a_runtime_error_with_stderr() {
    let dir = tempdir().unwrap();
    let program = common::script(&dir, "crasher", "echo boom >&2\nexit 1");
    let mut runner = ProgramRunner::new(&program, false);
    runner.push_request(json!("go"));

    let outcome = runner.run_turn(Duration::from_secs(5), &CancelToken::new());
    assert_eq!(outcome.verdict, Verdict::RuntimeError);
    assert_eq!(outcome.raw.as_deref(), Some("boom"));
}

#[test]
fn missing_program_is_a_distinct_runtime_error() {
    let mut runner = ProgramRunner::new("/nonexistent/bot", false);
    runner.push_request(json!("go"));

    let outcome = runner.run_turn(Duration::from_secs(1), &CancelToken::new());
    assert_eq!(outcome.verdict, Verdict::RuntimeError);
    assert!(outcome.raw.unwrap().starts_with("failed to start:"));
}

#[test]
fn side_data_round_trips_into_the_next_call() {
    let dir = tempdir().unwrap();
    let program = common::script(
        &dir,
        "stateful",
        "cat > input.txt\n\
         echo '{\"response\":\"X\",\"debug\":\"\",\"data\":\"state1\",\"globaldata\":42}'",
    );
    let mut runner = ProgramRunner::new(&program, false);

    runner.push_request(json!("turn 1"));
    let first = runner.run_turn(Duration::from_secs(5), &CancelToken::new());
    assert_eq!(first.verdict, Verdict::Ok);
    assert_eq!(first.response, Some(json!("X")));

    runner.push_request(json!("turn 2"));
    let second = runner.run_turn(Duration::from_secs(5), &CancelToken::new());
    assert_eq!(second.verdict, Verdict::Ok);

    // the payload of the second call carries the first call's side blobs
    let seen: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("input.txt")).unwrap())
            .unwrap();
    assert_eq!(seen["data"], json!("state1"));
    assert_eq!(seen["globaldata"], json!(42));
    assert_eq!(seen["requests"], json!(["turn 1", "turn 2"]));
    assert_eq!(seen["responses"], json!(["X"]));
}

#[test]
fn simple_io_uses_raw_lines() {
    let dir = tempdir().unwrap();
    let program = common::script(&dir, "adder", "read n\nread req\necho \"$req $n\"");
    let mut runner = ProgramRunner::new(&program, true);
    runner.push_request(json!("hello"));

    let outcome = runner.run_turn(Duration::from_secs(5), &CancelToken::new());
    assert_eq!(outcome.verdict, Verdict::Ok);
    assert_eq!(outcome.response, Some(json!("hello 1")));
}
