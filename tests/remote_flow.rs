//! Remote match flow against a canned matchmaking service.
#![cfg(unix)]

mod common;

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc::Sender;
use std::time::Duration;

use match_arena::configuration::MatchConfiguration;
use match_arena::prelude::*;
use serde_json::json;
use tempfile::tempdir;

const MATCH_ID: &str = "5f2a1bc96e1a2b3c4d5e6f70";

/// Serves one canned body per connection (`Connection: close`, so the
/// client opens a fresh connection per request) and reports each request
/// line + headers back for assertions.
fn canned_service(bodies: Vec<String>, seen: Sender<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}/api/", listener.local_addr().unwrap());
    std::thread::spawn(move || {
        for body in bodies {
            let (mut stream, _addr) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0; 4096];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = String::from_utf8_lossy(&request).into_owned();
            // drain a form body if the headers announce one
            if let Some(length) = content_length(&head) {
                let already = request
                    .windows(4)
                    .position(|w| w == b"\r\n\r\n")
                    .map(|i| request.len() - (i + 4))
                    .unwrap_or(0);
                let mut remaining = length.saturating_sub(already);
                while remaining > 0 {
                    let n = stream.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    remaining = remaining.saturating_sub(n);
                }
            }
            seen.send(head).unwrap();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
        }
    });
    base
}

fn content_length(head: &str) -> Option<usize> {
    head.lines()
        .find_map(|line| line.to_ascii_lowercase().strip_prefix("content-length:").map(str::trim).map(str::to_string))
        .and_then(|v| v.parse().ok())
}

fn remote_config(program: &std::path::Path) -> MatchConfiguration {
    let mut configuration = MatchConfiguration::new();
    configuration.set_game(Game::new("duel", 2));
    configuration.set_slot_identity(0, program.to_str().unwrap());
    configuration.set_slot_kind(1, PlayerKind::RemoteBot);
    configuration.set_slot_identity(1, "a1b2c3d4e5f6a1b2c3d4e5f6");
    configuration
}

#[test]
fn remote_match_polls_runs_and_finishes() {
    let dir = tempdir().unwrap();
    let program = common::echo_player(&dir, "bot", "my move");

    let (seen_tx, seen_rx) = std::sync::mpsc::channel();
    let base = canned_service(
        vec![
            // runmatch
            MATCH_ID.to_string(),
            // poll 1: another match's request, then ours
            format!("2 0\nother\nignored\n{MATCH_ID}\n\"3 4\"\n"),
            // poll 2: our finish
            format!("0 1\n{MATCH_ID} 0 1 2 5\n"),
        ],
        seen_tx,
    );

    let credentials = Credentials::from_url("http://x/u1/s1/localai").unwrap();
    let client = RemoteClient::new(base, credentials);
    let configuration = remote_config(&program);

    let active = ActiveMatchSlot::new();
    let mut m = RemoteMatch::create(&configuration, client, &active).unwrap();
    assert_eq!(m.match_id(), MATCH_ID);

    let result = m.run();
    assert_eq!(result.status(), MatchStatus::Finished);
    assert_eq!(result.scores(), Some([2.0, 5.0].as_slice()));
    // one request turn: judge entry + player entry
    assert_eq!(result.logs().len(), 2);
    let TurnLogEntry::Players(entry) = &result.logs()[1] else {
        panic!("expected a player entry");
    };
    assert_eq!(entry["0"].response, Some(json!("my move")));
    assert!(!active.is_busy());

    let creation = seen_rx.recv().unwrap();
    assert!(creation.starts_with("POST /api/u1/s1/runmatch"));
    let poll_1 = seen_rx.recv().unwrap();
    assert!(poll_1.starts_with(&format!("GET /api/u1/s1/localai?match={MATCH_ID}")));
    let poll_2 = seen_rx.recv().unwrap();
    assert!(
        poll_2.contains("response=my"),
        "second poll must carry the previous response: {poll_2}"
    );
}

#[test]
fn remote_abort_signal_ends_the_match() {
    let dir = tempdir().unwrap();
    let program = common::echo_player(&dir, "bot", "my move");

    let (seen_tx, _seen_rx) = std::sync::mpsc::channel();
    let base = canned_service(
        vec![
            MATCH_ID.to_string(),
            format!("0 1\n{MATCH_ID} 0 0\n"),
        ],
        seen_tx,
    );

    let credentials = Credentials::from_url("http://x/u1/s1/localai").unwrap();
    let client = RemoteClient::new(base, credentials);

    let active = ActiveMatchSlot::new();
    let mut m = RemoteMatch::create(&remote_config(&program), client, &active).unwrap();
    let result = m.run();
    assert_eq!(result.status(), MatchStatus::Aborted);
    assert!(result.logs().is_empty());
    assert!(!active.is_busy());
}

#[test]
fn permanent_rejection_surfaces_immediately() {
    // 403 on runmatch: no retries, the error carries the body
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}/api/", listener.local_addr().unwrap());
    std::thread::spawn(move || {
        let (mut stream, _addr) = listener.accept().unwrap();
        let mut buf = [0; 4096];
        let _ = stream.read(&mut buf);
        let body = "bad credentials";
        let response = format!(
            "HTTP/1.1 403 Forbidden\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).unwrap();
    });

    let dir = tempdir().unwrap();
    let program = common::script(&dir, "bot", "exit 0");
    let credentials = Credentials::from_url("http://x/u1/s1/localai").unwrap();
    let client = RemoteClient::new(base, credentials);

    let active = ActiveMatchSlot::new();
    let started = std::time::Instant::now();
    let result = RemoteMatch::create(&remote_config(&program), client, &active);
    match result {
        Err(Error::PermanentRequest { status, message }) => {
            assert_eq!(status, 403);
            assert_eq!(message, "bad credentials");
        }
        Err(other) => panic!("expected a permanent rejection, got {other:?}"),
        Ok(_) => panic!("expected a permanent rejection, got a match"),
    }
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "4xx must not be retried"
    );
    assert!(!active.is_busy(), "failed creation must release the slot");
}
