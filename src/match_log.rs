//! The append-only turn log and the per-turn outcome types.
//!
//! A match log alternates [`JudgeEntry`] and player entries: turn *n* is
//! exactly one judge entry followed by zero or one player entry (none when
//! the judge finished the match). Judge payloads are opaque
//! [`serde_json::Value`] trees; the only values the engine ever inspects
//! are the command string and, on finish, the per-slot numeric scores.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Classification of a player program's turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// The program answered in time with exit code 0.
    #[serde(rename = "OK")]
    Ok,
    /// The program exceeded the per-turn time budget and was killed.
    #[serde(rename = "TLE")]
    TimeLimitExceeded,
    /// The program exited non-zero, produced unparsable output, or failed
    /// to start.
    #[serde(rename = "RE")]
    RuntimeError,
}

/// Immutable record of one player's turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramOutcome {
    /// How the turn ended.
    pub verdict: Verdict,
    /// CPU time consumed by the program, in milliseconds.
    pub time: u64,
    /// Parsed response on [`Verdict::Ok`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Raw diagnostic text (stderr, or a launch-failure description).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    /// Debug text the program chose to emit alongside its response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

impl ProgramOutcome {
    pub(crate) fn ok(response: Value, debug: Option<String>, time: u64) -> Self {
        ProgramOutcome {
            verdict: Verdict::Ok,
            time,
            response: Some(response),
            raw: None,
            debug,
        }
    }

    pub(crate) fn time_limit_exceeded(time: u64) -> Self {
        ProgramOutcome {
            verdict: Verdict::TimeLimitExceeded,
            time,
            response: None,
            raw: None,
            debug: None,
        }
    }

    pub(crate) fn runtime_error(diagnostic: impl Into<String>, time: u64) -> Self {
        ProgramOutcome {
            verdict: Verdict::RuntimeError,
            time,
            response: None,
            raw: Some(diagnostic.into()),
            debug: None,
        }
    }
}

/// What the judge produced for one turn.
///
/// `content` maps slot indices (as decimal strings, the judge's native
/// keying) to the payload each slot receives this turn, or, when
/// `command` is `"finish"`, to that slot's numeric score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JudgeOutput {
    /// Judge command; `"finish"` terminates the match.
    pub command: String,
    /// Opaque visualization payload, not interpreted by the engine.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub display: Value,
    /// Per-slot payloads (or scores on finish).
    #[serde(default)]
    pub content: BTreeMap<String, Value>,
    /// Judge-defined init blob, only meaningful on the first entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initdata: Option<Value>,
}

/// Command value that terminates a match.
pub const COMMAND_FINISH: &str = "finish";

impl JudgeOutput {
    /// True when this output ends the match.
    pub fn is_finish(&self) -> bool {
        self.command == COMMAND_FINISH
    }

    /// Payload addressed to `slot` this turn, if any.
    pub fn payload_for(&self, slot: usize) -> Option<&Value> {
        self.content.get(&slot.to_string())
    }

    /// Interprets `content` as the final per-slot scores.
    ///
    /// Scores arrive as numeric strings (or plain numbers); every slot in
    /// `0..player_count` must be present, anything else is a judge failure.
    pub fn finish_scores(&self, player_count: usize) -> Result<Vec<f64>> {
        let mut scores = Vec::with_capacity(player_count);
        for slot in 0..player_count {
            let value = self
                .content
                .get(&slot.to_string())
                .ok_or_else(|| Error::Judge(format!("finish content misses slot {slot}")))?;
            let score = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .ok_or_else(|| Error::Judge(format!("slot {slot} score is not numeric: {value}")))?;
            scores.push(score);
        }
        Ok(scores)
    }
}

/// The judge's half of a turn as recorded in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeEntry {
    /// Verdict of the judge invocation itself.
    pub verdict: Verdict,
    /// CPU time the judge spent, in milliseconds.
    pub time: u64,
    /// The produced output; absent when the judge failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<JudgeOutput>,
    /// Diagnostic text when the judge failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

/// Outcomes of all slots that acted in one turn, keyed by slot index in
/// decimal form (the log's native JSON keying).
pub type PlayerEntry = BTreeMap<String, ProgramOutcome>;

/// One element of the append-only match log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnLogEntry {
    /// The judge's output (or failure) opening a turn.
    Judge(JudgeEntry),
    /// The players' responses closing a turn.
    Players(PlayerEntry),
}

impl TurnLogEntry {
    /// The judge output carried by this entry, if it is a successful
    /// judge entry.
    pub fn judge_output(&self) -> Option<&JudgeOutput> {
        match self {
            TurnLogEntry::Judge(entry) => entry.output.as_ref(),
            TurnLogEntry::Players(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn finish_output(content: Value) -> JudgeOutput {
        serde_json::from_value(json!({ "command": "finish", "content": content })).unwrap()
    }

    #[test]
    fn finish_scores_from_numeric_strings() {
        let output = finish_output(json!({"0": "3", "1": "1"}));
        assert!(output.is_finish());
        assert_eq!(output.finish_scores(2).unwrap(), vec![3.0, 1.0]);
    }

    #[test]
    fn finish_scores_accept_plain_numbers() {
        let output = finish_output(json!({"0": 2, "1": 0.5}));
        assert_eq!(output.finish_scores(2).unwrap(), vec![2.0, 0.5]);
    }

    #[test]
    fn finish_scores_reject_missing_slot() {
        let output = finish_output(json!({"0": "3"}));
        assert!(matches!(output.finish_scores(2), Err(Error::Judge(_))));
    }

    #[test]
    fn finish_scores_reject_non_numeric() {
        let output = finish_output(json!({"0": "three", "1": "1"}));
        assert!(matches!(output.finish_scores(2), Err(Error::Judge(_))));
    }

    #[test]
    fn log_entries_round_trip_untagged() {
        let judge = TurnLogEntry::Judge(JudgeEntry {
            verdict: Verdict::Ok,
            time: 12,
            output: Some(finish_output(json!({"0": "1", "1": "0"}))),
            raw: None,
        });
        let mut players = PlayerEntry::new();
        players.insert("0".into(), ProgramOutcome::ok(json!("move"), None, 3));
        players.insert("1".into(), ProgramOutcome::runtime_error("boom", 0));
        let players = TurnLogEntry::Players(players);

        let text = serde_json::to_string(&vec![judge, players]).unwrap();
        let back: Vec<TurnLogEntry> = serde_json::from_str(&text).unwrap();
        assert!(matches!(back[0], TurnLogEntry::Judge(_)));
        let TurnLogEntry::Players(entry) = &back[1] else {
            panic!("expected player entry");
        };
        assert_eq!(entry["1"].verdict, Verdict::RuntimeError);
        assert_eq!(entry["1"].raw.as_deref(), Some("boom"));
    }
}
