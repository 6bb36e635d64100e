//! The match aggregate: status, timestamps, scores and the turn log.
//!
//! A [`Match`] is created from a validated configuration (deep-copied so
//! later edits cannot mutate an in-flight match), mutated exclusively by
//! the driver that owns it, and becomes immutable once its status reaches
//! [`MatchStatus::Finished`] or [`MatchStatus::Aborted`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::configuration::MatchConfiguration;
use crate::match_log::{JudgeEntry, PlayerEntry, TurnLogEntry};

/// Lifecycle of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    /// Created, judge not yet ready.
    Waiting,
    /// Turns proceeding.
    Running,
    /// The judge issued an explicit finish; terminal.
    Finished,
    /// Fatal failure, user abort, or remote abort signal; terminal.
    Aborted,
}

impl MatchStatus {
    /// True for [`MatchStatus::Finished`] and [`MatchStatus::Aborted`].
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchStatus::Finished | MatchStatus::Aborted)
    }
}

/// Cooperative cancellation flag shared between a match driver and its
/// abort handle.
///
/// Every blocking point of the turn loop (subprocess wait, human wait,
/// retry sleep) observes the token so a concurrent abort unwinds promptly
/// instead of completing a stale turn.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag; returns `true` when it was already set.
    pub fn cancel(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }

    /// Whether an abort was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Aggregate root of one match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    configuration: MatchConfiguration,
    #[serde(with = "time::serde::rfc3339")]
    begin_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    end_time: Option<OffsetDateTime>,
    status: MatchStatus,
    initdata: Value,
    scores: Option<Vec<f64>>,
    logs: Vec<TurnLogEntry>,
    display_logs: Vec<Value>,
}

impl Match {
    /// Snapshots `configuration` and starts the lifecycle in
    /// [`MatchStatus::Waiting`].
    pub(crate) fn new(configuration: &MatchConfiguration) -> Self {
        let configuration = configuration.clone();
        let initdata = configuration.initdata.clone();
        Match {
            configuration,
            begin_time: OffsetDateTime::now_utc(),
            end_time: None,
            status: MatchStatus::Waiting,
            initdata,
            scores: None,
            logs: vec![],
            display_logs: vec![],
        }
    }

    /// The configuration snapshot taken at creation.
    pub fn configuration(&self) -> &MatchConfiguration {
        &self.configuration
    }

    pub(crate) fn configuration_mut(&mut self) -> &mut MatchConfiguration {
        &mut self.configuration
    }

    /// Current lifecycle state.
    pub fn status(&self) -> MatchStatus {
        self.status
    }

    /// Creation timestamp.
    pub fn begin_time(&self) -> OffsetDateTime {
        self.begin_time
    }

    /// Completion timestamp, set on reaching a terminal state.
    pub fn end_time(&self) -> Option<OffsetDateTime> {
        self.end_time
    }

    /// Judge-defined init blob captured from the first judge entry.
    pub fn initdata(&self) -> &Value {
        &self.initdata
    }

    /// Final per-slot scores, populated only on [`MatchStatus::Finished`].
    pub fn scores(&self) -> Option<&[f64]> {
        self.scores.as_deref()
    }

    /// The append-only turn log.
    pub fn logs(&self) -> &[TurnLogEntry] {
        &self.logs
    }

    /// Per-turn display payloads: a lossy projection of the log kept for
    /// visualization, reconstructible from [`Match::logs`].
    pub fn display_logs(&self) -> &[Value] {
        &self.display_logs
    }

    pub(crate) fn mark_running(&mut self) {
        if self.status == MatchStatus::Waiting {
            self.status = MatchStatus::Running;
        }
    }

    pub(crate) fn push_judge_entry(&mut self, entry: JudgeEntry) {
        if let Some(output) = &entry.output {
            if self.logs.is_empty() {
                if let Some(init) = &output.initdata {
                    self.initdata = init.clone();
                }
            }
            if !output.display.is_null() {
                self.display_logs.push(output.display.clone());
            }
        }
        self.logs.push(TurnLogEntry::Judge(entry));
    }

    pub(crate) fn push_player_entry(&mut self, entry: PlayerEntry) {
        self.logs.push(TurnLogEntry::Players(entry));
    }

    pub(crate) fn finish(&mut self, scores: Vec<f64>) {
        self.scores = Some(scores);
        self.close(MatchStatus::Finished);
    }

    pub(crate) fn abort(&mut self) {
        self.close(MatchStatus::Aborted);
    }

    fn close(&mut self, status: MatchStatus) {
        if !self.status.is_terminal() {
            self.status = status;
            self.end_time = Some(OffsetDateTime::now_utc());
        }
    }
}
