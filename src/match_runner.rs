//! Match drivers: the state machines that take a match from creation to a
//! terminal verdict.
//!
//! [`LocalMatch`] drives a purely local match: every turn it asks the
//! [`JudgeAdapter`] for output, dispatches the per-slot payloads to the
//! local program runners (or suspends for a human response), and appends
//! both halves of the turn to the log. [`RemoteMatch`] drives a match
//! hosted by the matchmaking service: it polls for requests addressed to
//! the single local seat, runs them, and submits each response with the
//! following poll.
//!
//! Both drivers run their turn loop on the calling thread and hand out a
//! cloneable [`AbortHandle`] that may be fired from anywhere: it kills
//! any in-flight subprocess, notifies the service for remote matches, and
//! makes every blocking point of the loop unwind promptly. The log never
//! receives entries for a turn interrupted by an abort.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::configuration::{MatchConfiguration, PlayerKind};
use crate::error::{Error, Result};
use crate::judge::JudgeAdapter;
use crate::match_log::{JudgeEntry, JudgeOutput, PlayerEntry, ProgramOutcome, Verdict};
use crate::match_state::{CancelToken, Match};
use crate::program_runner::{kill_in_slot, ProgramRunner, SharedChild};
use crate::registry::{ActiveMatchGuard, ActiveMatchSlot};
use crate::remote::{RemoteClient, TurnSignal};

const HUMAN_POLL: Duration = Duration::from_millis(100);

/// Fires an abort into a running match from any thread.
///
/// Aborting is idempotent: the first call kills every in-flight
/// subprocess and (for remote matches) notifies the service; later calls
/// are no-ops.
#[derive(Clone)]
pub struct AbortHandle {
    inner: Arc<AbortInner>,
}

struct AbortInner {
    cancel: CancelToken,
    children: Vec<SharedChild>,
    remote: Option<(RemoteClient, String)>,
}

impl AbortHandle {
    fn new(
        cancel: CancelToken,
        children: Vec<SharedChild>,
        remote: Option<(RemoteClient, String)>,
    ) -> Self {
        AbortHandle {
            inner: Arc::new(AbortInner {
                cancel,
                children,
                remote,
            }),
        }
    }

    /// Requests the abort. Safe to call concurrently with a running turn
    /// loop and safe to call more than once.
    pub fn abort(&self) {
        if self.inner.cancel.cancel() {
            debug!("abort requested twice; ignoring");
            return;
        }
        info!("aborting match");
        for child in &self.inner.children {
            kill_in_slot(child);
        }
        if let Some((client, match_id)) = &self.inner.remote {
            // fresh token: this retry loop must outlive the cancelled match
            if let Err(e) = client.abort_match(match_id, &CancelToken::new()) {
                warn!("could not signal remote abort: {e}");
            }
        }
    }

    /// Whether an abort was requested.
    pub fn is_aborted(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    // Stops the loop without the kill/notify side effects; used when the
    // driver itself winds down (judge failure, remote abort signal).
    fn mark_cancelled(&self) {
        let _ = self.inner.cancel.cancel();
    }
}

/// Submits the human player's responses into a running [`LocalMatch`].
#[derive(Clone)]
pub struct HumanInput {
    tx: Sender<Value>,
}

impl HumanInput {
    /// Delivers one response for the pending human turn. Returns `false`
    /// when the match is no longer listening.
    pub fn submit(&self, response: Value) -> bool {
        self.tx.send(response).is_ok()
    }
}

/// Driver for a match where every participant is local.
pub struct LocalMatch {
    state: Match,
    judge: Box<dyn JudgeAdapter + Send>,
    runners: Vec<Option<ProgramRunner>>,
    human_seat: Option<usize>,
    human_tx: Sender<Value>,
    human_rx: Receiver<Value>,
    cancel: CancelToken,
    abort: AbortHandle,
    guard: Option<ActiveMatchGuard>,
}

impl LocalMatch {
    /// Creates the match from a validated local configuration, claiming
    /// the process-wide active-match slot.
    ///
    /// Fails fast with [`Error::MatchAlreadyRunning`] when another match
    /// is active, and with [`Error::InvalidConfiguration`] when the
    /// configuration is invalid or remote-flavored.
    pub fn new(
        configuration: &MatchConfiguration,
        mut judge: Box<dyn JudgeAdapter + Send>,
        active: &ActiveMatchSlot,
    ) -> Result<Self> {
        if !configuration.is_valid() {
            return Err(Error::InvalidConfiguration(
                configuration.validity().reason.clone(),
            ));
        }
        if configuration.is_remote_match() {
            return Err(Error::InvalidConfiguration(
                "configuration contains remote bots; use RemoteMatch".into(),
            ));
        }
        let guard = active.try_acquire()?;

        let cancel = CancelToken::new();
        judge.bind_cancel(cancel.clone());

        let runners: Vec<Option<ProgramRunner>> = configuration
            .slots()
            .iter()
            .map(|slot| match slot.kind {
                PlayerKind::LocalProgram => Some(ProgramRunner::new(
                    slot.identity.clone(),
                    configuration.simple_io,
                )),
                _ => None,
            })
            .collect();
        let human_seat = configuration
            .slots()
            .iter()
            .find(|s| s.kind == PlayerKind::LocalHuman)
            .map(|s| s.index);

        let mut children: Vec<SharedChild> = runners
            .iter()
            .flatten()
            .map(ProgramRunner::child_handle)
            .collect();
        children.extend(judge.abort_hook());
        let abort = AbortHandle::new(cancel.clone(), children, None);

        let (human_tx, human_rx) = channel();
        Ok(LocalMatch {
            state: Match::new(configuration),
            judge,
            runners,
            human_seat,
            human_tx,
            human_rx,
            cancel,
            abort,
            guard: Some(guard),
        })
    }

    /// Handle for aborting this match from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Channel for the human seat's responses, when the configuration has
    /// one.
    pub fn human_input(&self) -> Option<HumanInput> {
        self.human_seat.map(|_| HumanInput {
            tx: self.human_tx.clone(),
        })
    }

    /// Read access to the match aggregate.
    pub fn state(&self) -> &Match {
        &self.state
    }

    /// Consumes the driver, keeping the (terminal) match.
    pub fn into_state(self) -> Match {
        self.state
    }

    /// Drives the match to a terminal state and returns it.
    #[instrument(skip_all)]
    pub fn run(&mut self) -> &Match {
        info!(game = ?self.state.configuration().game().map(|g| &g.name), "starting local match");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let output = match self.judge.next_output(self.state.logs(), self.state.initdata()) {
                Ok(output) => output,
                Err(e) => {
                    error!("judge failure: {e}");
                    self.state.push_judge_entry(JudgeEntry {
                        verdict: Verdict::RuntimeError,
                        time: 0,
                        output: None,
                        raw: Some(e.to_string()),
                    });
                    break;
                }
            };
            self.state.push_judge_entry(JudgeEntry {
                verdict: Verdict::Ok,
                time: 0,
                output: Some(output.clone()),
                raw: None,
            });
            self.state.mark_running();

            if output.is_finish() {
                let player_count = self.runners.len();
                match output.finish_scores(player_count) {
                    Ok(scores) => {
                        info!(?scores, "match finished");
                        self.state.finish(scores);
                        self.guard.take();
                        return &self.state;
                    }
                    Err(e) => {
                        error!("judge failure: {e}");
                        break;
                    }
                }
            }

            if !self.play_turn(&output) {
                break;
            }
        }
        self.finalize_abort();
        &self.state
    }

    // Runs every slot the judge addressed, in slot order. Returns false
    // when an abort interrupted the turn; the partial entry is dropped.
    fn play_turn(&mut self, output: &JudgeOutput) -> bool {
        let time_limit = self.state.configuration().time_limit;
        let addressed: Vec<(usize, PlayerKind, Value)> = self
            .state
            .configuration()
            .slots()
            .iter()
            .filter_map(|slot| {
                output
                    .payload_for(slot.index)
                    .map(|payload| (slot.index, slot.kind, payload.clone()))
            })
            .collect();

        let mut entry = PlayerEntry::new();
        for (index, kind, payload) in addressed {
            if self.cancel.is_cancelled() {
                return false;
            }
            let outcome = match kind {
                PlayerKind::LocalProgram => {
                    let runner = self.runners[index]
                        .as_mut()
                        .expect("local program slot has a runner");
                    runner.push_request(payload.clone());
                    runner.run_turn(time_limit, &self.cancel)
                }
                PlayerKind::LocalHuman => {
                    info!("waiting for the human response for slot {index}");
                    match self.wait_for_human() {
                        Some(response) => ProgramOutcome::ok(response, None, 0),
                        None => return false,
                    }
                }
                // a valid local configuration has no remote slots
                PlayerKind::RemoteBot => continue,
            };
            if self.cancel.is_cancelled() {
                return false;
            }
            self.record_transcript(index, &payload, &outcome);
            entry.insert(index.to_string(), outcome);
        }
        // appended unconditionally, failing outcomes included: the log
        // stays a faithful audit trail
        self.state.push_player_entry(entry);
        true
    }

    // Human turns are unbounded; only an abort ends the wait early.
    fn wait_for_human(&self) -> Option<Value> {
        loop {
            match self.human_rx.recv_timeout(HUMAN_POLL) {
                Ok(response) => return Some(response),
                Err(RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() {
                        return None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("human input channel closed; aborting the turn");
                    return None;
                }
            }
        }
    }

    fn record_transcript(&mut self, index: usize, payload: &Value, outcome: &ProgramOutcome) {
        let response = outcome
            .response
            .as_ref()
            .map(Value::to_string)
            .or_else(|| outcome.raw.clone())
            .unwrap_or_default();
        let text = format!(">>> REQUEST\n{payload}\n<<< RESPONSE\n{response}\n");
        self.state.configuration_mut().append_transcript(index, &text);
    }

    fn finalize_abort(&mut self) {
        self.abort.mark_cancelled();
        self.state.abort();
        self.guard.take();
        info!("match aborted");
    }
}

/// Driver for a match hosted by the matchmaking service.
///
/// All remote seats are played by the service; this driver only runs the
/// single local program seat and relays its responses.
pub struct RemoteMatch {
    state: Match,
    client: RemoteClient,
    match_id: String,
    seat: usize,
    runner: ProgramRunner,
    cancel: CancelToken,
    abort: AbortHandle,
    guard: Option<ActiveMatchGuard>,
}

impl RemoteMatch {
    /// Registers the match with the service and claims the process-wide
    /// active-match slot.
    pub fn create(
        configuration: &MatchConfiguration,
        client: RemoteClient,
        active: &ActiveMatchSlot,
    ) -> Result<Self> {
        if !configuration.is_valid() {
            return Err(Error::InvalidConfiguration(
                configuration.validity().reason.clone(),
            ));
        }
        let Some(seat) = configuration.local_seat().filter(|_| configuration.is_remote_match())
        else {
            return Err(Error::InvalidConfiguration(
                "configuration has no remote bots; use LocalMatch".into(),
            ));
        };
        let guard = active.try_acquire()?;

        let cancel = CancelToken::new();
        let match_id = client.create_match(configuration, &cancel)?;
        let runner = ProgramRunner::new(
            configuration.slots()[seat].identity.clone(),
            configuration.simple_io,
        );
        let abort = AbortHandle::new(
            cancel.clone(),
            vec![runner.child_handle()],
            Some((client.clone(), match_id.clone())),
        );

        Ok(RemoteMatch {
            state: Match::new(configuration),
            client,
            match_id,
            seat,
            runner,
            cancel,
            abort,
            guard: Some(guard),
        })
    }

    /// Service-assigned identifier of this match.
    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    /// Handle for aborting this match from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Read access to the match aggregate.
    pub fn state(&self) -> &Match {
        &self.state
    }

    /// Consumes the driver, keeping the (terminal) match.
    pub fn into_state(self) -> Match {
        self.state
    }

    /// Drives the match to a terminal state and returns it.
    #[instrument(skip_all, fields(match_id = %self.match_id))]
    pub fn run(&mut self) -> &Match {
        info!("starting remote match {}", self.match_id);
        let mut last_response: Option<Value> = None;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let signal = match self.client.poll_next_turn(
                &self.match_id,
                last_response.as_ref(),
                &self.cancel,
            ) {
                Ok(signal) => signal,
                Err(Error::Cancelled) => break,
                Err(e) => {
                    error!("poll failed permanently: {e}");
                    self.state.push_judge_entry(JudgeEntry {
                        verdict: Verdict::RuntimeError,
                        time: 0,
                        output: None,
                        raw: Some(e.to_string()),
                    });
                    break;
                }
            };
            match signal {
                TurnSignal::NoSignalYet => continue,
                TurnSignal::Aborted => {
                    info!("service reports the match as aborted");
                    break;
                }
                TurnSignal::Finished(scores) => {
                    info!(?scores, "match finished");
                    self.state.finish(scores);
                    self.guard.take();
                    return &self.state;
                }
                TurnSignal::NewRequest(payload) => {
                    self.state.mark_running();
                    last_response = self.play_local_turn(payload);
                    if last_response.is_none() {
                        break;
                    }
                }
            }
        }
        self.finalize_abort();
        &self.state
    }

    // Returns the response to submit with the next poll, or None when an
    // abort interrupted the turn.
    fn play_local_turn(&mut self, payload: Value) -> Option<Value> {
        let seat_key = self.seat.to_string();
        let mut content = std::collections::BTreeMap::new();
        content.insert(seat_key.clone(), payload.clone());
        self.state.push_judge_entry(JudgeEntry {
            verdict: Verdict::Ok,
            time: 0,
            output: Some(JudgeOutput {
                command: "request".to_string(),
                display: Value::Null,
                content,
                initdata: None,
            }),
            raw: None,
        });

        debug!("request for the local seat: {payload}");
        self.runner.push_request(payload.clone());
        let outcome = self
            .runner
            .run_turn(self.state.configuration().time_limit, &self.cancel);
        if self.cancel.is_cancelled() {
            return None;
        }

        let response = outcome.response.clone().unwrap_or(Value::Null);
        let transcript = format!(
            ">>> REQUEST\n{payload}\n<<< RESPONSE\n{response}\n"
        );
        self.state
            .configuration_mut()
            .append_transcript(self.seat, &transcript);

        let mut entry = PlayerEntry::new();
        entry.insert(seat_key, outcome);
        self.state.push_player_entry(entry);
        Some(response)
    }

    fn finalize_abort(&mut self) {
        self.abort.mark_cancelled();
        self.state.abort();
        self.guard.take();
        info!("match aborted");
    }
}
