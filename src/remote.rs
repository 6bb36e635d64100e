//! Client for the remote matchmaking service.
//!
//! All calls share one retry policy: a transport error or 5xx answer is
//! transient, so it is logged, slept through for a fixed 5 seconds and
//! retried indefinitely (a human is expected to notice and cancel),
//! while a 4xx answer is permanent and surfaces immediately as
//! [`Error::PermanentRequest`]. The distinction is made on the response
//! status, never on the error type.
//!
//! The poll endpoint batches data for every match of the account, in a
//! line-oriented format scanned here for the one match we drive (see
//! [`poll format`](RemoteClient::poll_next_turn)).

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::configuration::{MatchConfiguration, PlayerKind};
use crate::error::{Error, Result};
use crate::game::Game;
use crate::match_state::CancelToken;

/// Fixed delay between retries of transient failures.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Account credentials extracted from the service URL the user pastes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account identifier.
    pub user_id: String,
    /// Per-account secret.
    pub secret: String,
}

impl Credentials {
    /// Extracts user ID and secret from a pasted URL of the shape
    /// `<base>/<userid>/<secret>/localai`.
    pub fn from_url(url: &str) -> Result<Self> {
        let mut segments = url.trim_end_matches('/').rsplit('/');
        let (Some("localai"), Some(secret), Some(user_id)) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(Error::CredentialUrl);
        };
        if user_id.is_empty() || secret.is_empty() {
            return Err(Error::CredentialUrl);
        }
        Ok(Credentials {
            user_id: user_id.to_string(),
            secret: secret.to_string(),
        })
    }
}

/// What a poll produced for the driven match.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnSignal {
    /// The service has a new request for the local seat.
    NewRequest(Value),
    /// The remote match finished with these per-slot scores.
    Finished(Vec<f64>),
    /// The remote match was aborted.
    Aborted,
    /// The batch carried only other matches' data; poll again right away.
    NoSignalYet,
}

/// Blocking client bound to one service base URL and one account.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: Client,
    base: String,
    credentials: Credentials,
}

impl RemoteClient {
    /// Client for the service at `base` (scheme + host + API prefix).
    pub fn new(base: impl Into<String>, credentials: Credentials) -> Self {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        RemoteClient {
            http: Client::new(),
            base,
            credentials,
        }
    }

    fn account_url(&self, endpoint: &str) -> String {
        format!(
            "{}{}/{}/{endpoint}",
            self.base, self.credentials.user_id, self.credentials.secret
        )
    }

    /// Fetches the list of games the service can referee.
    pub fn fetch_games(&self, cancel: &CancelToken) -> Result<Vec<Game>> {
        loop {
            info!("fetching game list");
            let url = format!("{}public/games", self.base);
            let body = self.send_with_retry("game list request", cancel, || self.http.get(&url))?;
            match serde_json::from_str::<Value>(&body) {
                Ok(Value::Array(raw)) => {
                    return Ok(raw
                        .iter()
                        .filter_map(|game| {
                            Some(Game {
                                name: game.get("name")?.as_str()?.to_string(),
                                player_count: game.get("min_player_num")?.as_u64()? as usize,
                                description: game
                                    .get("desc")
                                    .and_then(Value::as_str)
                                    .unwrap_or_default()
                                    .to_string(),
                            })
                        })
                        .collect());
                }
                _ => {
                    warn!(
                        "game list was not a JSON array; retrying in {}s",
                        RETRY_DELAY.as_secs()
                    );
                    cancellable_sleep(RETRY_DELAY, cancel)?;
                }
            }
        }
    }

    /// Registers a new remote match and returns its ID.
    ///
    /// Sends the game name, each slot's identity (`"me"` for the local
    /// seat), the simple-IO flag and the per-turn time limit.
    #[instrument(skip_all)]
    pub fn create_match(
        &self,
        configuration: &MatchConfiguration,
        cancel: &CancelToken,
    ) -> Result<String> {
        if !configuration.is_valid() {
            return Err(Error::InvalidConfiguration(
                configuration.validity().reason.clone(),
            ));
        }
        let Some(game) = configuration.game() else {
            return Err(Error::InvalidConfiguration("no game selected".into()));
        };
        if !configuration.is_remote_match() {
            return Err(Error::InvalidConfiguration(
                "cannot create a remote match without remote bots".into(),
            ));
        }

        let mut form: Vec<(String, String)> = vec![("game".into(), game.name.clone())];
        for slot in configuration.slots() {
            let identity = if slot.kind == PlayerKind::RemoteBot {
                slot.identity.clone()
            } else {
                "me".to_string()
            };
            form.push((format!("player{}", slot.index), identity));
        }
        form.push(("simpleio".into(), configuration.simple_io.to_string()));
        form.push((
            "timelimit".into(),
            configuration.time_limit.as_millis().to_string(),
        ));

        let url = self.account_url("runmatch");
        let body = self.send_with_retry("match creation", cancel, || {
            self.http.post(&url).form(&form)
        })?;
        let match_id = body.trim().to_string();
        if match_id.is_empty() {
            return Err(Error::Protocol("empty match ID from runmatch".into()));
        }
        info!("created remote match {match_id}");
        Ok(match_id)
    }

    /// Polls for the next signal concerning `match_id`.
    ///
    /// `last_response` (the local seat's previous answer) is attached to
    /// the poll as a correlation parameter rather than sent separately.
    /// The response body is line-oriented: line 1 holds two counts
    /// (pending requests and pending finishes), then `2 * reqCount` lines
    /// alternate match ID and request payload, then `finishCount` lines
    /// read `matchID slotIndex resultFlag score...` (flag `"0"` means
    /// aborted). [`TurnSignal::NoSignalYet`] means the batch only carried
    /// other matches' data and the caller must poll again immediately.
    #[instrument(skip_all, fields(match_id))]
    pub fn poll_next_turn(
        &self,
        match_id: &str,
        last_response: Option<&Value>,
        cancel: &CancelToken,
    ) -> Result<TurnSignal> {
        let url = self.account_url("localai");
        let mut query: Vec<(String, String)> = vec![("match".into(), match_id.to_string())];
        if let Some(response) = last_response {
            let rendered = match response {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            query.push(("response".into(), rendered));
        }
        let body = self.send_with_retry("turn poll", cancel, || {
            self.http.get(&url).query(&query)
        })?;
        let signal = scan_poll_body(&body, match_id)?;
        debug!(?signal);
        Ok(signal)
    }

    /// Tells the service the match is abandoned. Fire-and-retry: returns
    /// once the signal was accepted, without waiting for the remote match
    /// to reflect the abort.
    #[instrument(skip_all, fields(match_id))]
    pub fn abort_match(&self, match_id: &str, cancel: &CancelToken) -> Result<()> {
        let url = self.account_url("abortmatch");
        self.send_with_retry("match abort", cancel, || {
            self.http.post(&url).form(&[("match", match_id)])
        })?;
        info!("remote match {match_id} abandoned");
        Ok(())
    }

    // One attempt per loop iteration; transient failures (transport, 5xx)
    // sleep RETRY_DELAY and go again, 4xx surfaces immediately.
    fn send_with_retry(
        &self,
        what: &str,
        cancel: &CancelToken,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<String> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let transient = match build().send() {
                Ok(response) => {
                    let status = response.status();
                    match response.text() {
                        Ok(body) if status.is_success() => return Ok(body),
                        Ok(body) if status.is_server_error() => {
                            format!("service answered {status}: {}", body.trim())
                        }
                        Ok(body) => {
                            return Err(Error::PermanentRequest {
                                status: status.as_u16(),
                                message: if body.trim().is_empty() {
                                    status.to_string()
                                } else {
                                    body.trim().to_string()
                                },
                            })
                        }
                        Err(e) => format!("could not read response body: {e}"),
                    }
                }
                Err(e) => e.to_string(),
            };
            warn!(
                "{what} failed ({transient}); retrying in {}s",
                RETRY_DELAY.as_secs()
            );
            cancellable_sleep(RETRY_DELAY, cancel)?;
        }
    }
}

fn cancellable_sleep(total: Duration, cancel: &CancelToken) -> Result<()> {
    let deadline = std::time::Instant::now() + total;
    while std::time::Instant::now() < deadline {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        std::thread::sleep(SLEEP_SLICE);
    }
    Ok(())
}

fn scan_poll_body(body: &str, match_id: &str) -> Result<TurnSignal> {
    let mut lines = body.lines();
    let header = lines
        .next()
        .ok_or_else(|| Error::Protocol("empty poll response".into()))?;
    let mut counts = header.split_whitespace();
    let request_count: usize = parse_count(counts.next(), header)?;
    let finish_count: usize = parse_count(counts.next(), header)?;

    for _ in 0..request_count {
        let id = lines
            .next()
            .ok_or_else(|| Error::Protocol("truncated request lines".into()))?;
        let payload = lines
            .next()
            .ok_or_else(|| Error::Protocol("request without payload line".into()))?;
        if id.trim() == match_id {
            let payload = serde_json::from_str::<Value>(payload)
                .unwrap_or_else(|_| Value::String(payload.to_string()));
            return Ok(TurnSignal::NewRequest(payload));
        }
    }

    for _ in 0..finish_count {
        let line = lines
            .next()
            .ok_or_else(|| Error::Protocol("truncated finish lines".into()))?;
        let mut fields = line.split_whitespace();
        let id = fields
            .next()
            .ok_or_else(|| Error::Protocol(format!("bad finish line: {line:?}")))?;
        let _slot = fields.next();
        let flag = fields
            .next()
            .ok_or_else(|| Error::Protocol(format!("bad finish line: {line:?}")))?;
        if id != match_id {
            continue;
        }
        if flag == "0" {
            return Ok(TurnSignal::Aborted);
        }
        let scores = fields
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|_| Error::Protocol(format!("non-numeric score {s:?} in {line:?}")))
            })
            .collect::<Result<Vec<f64>>>()?;
        return Ok(TurnSignal::Finished(scores));
    }

    Ok(TurnSignal::NoSignalYet)
}

fn parse_count(token: Option<&str>, header: &str) -> Result<usize> {
    token
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("bad poll header: {header:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ID: &str = "5f2a1bc96e1a2b3c4d5e6f70";

    #[test]
    fn credentials_from_pasted_url() {
        let creds =
            Credentials::from_url("https://example.org/api/user123/s3cr3t/localai").unwrap();
        assert_eq!(creds.user_id, "user123");
        assert_eq!(creds.secret, "s3cr3t");

        assert!(matches!(
            Credentials::from_url("https://example.org/api/whatever"),
            Err(Error::CredentialUrl)
        ));
    }

    #[test]
    fn poll_scan_finds_new_request() {
        let body = format!("2 0\nother-match\n{{\"x\":1}}\n{ID}\n{{\"y\":2}}\n");
        assert_eq!(
            scan_poll_body(&body, ID).unwrap(),
            TurnSignal::NewRequest(json!({"y": 2}))
        );
    }

    #[test]
    fn poll_scan_keeps_plain_text_payloads() {
        let body = format!("1 0\n{ID}\n3 4\n");
        assert_eq!(
            scan_poll_body(&body, ID).unwrap(),
            TurnSignal::NewRequest(json!("3 4"))
        );
    }

    #[test]
    fn poll_scan_reads_abort_flag() {
        let body = format!("0 1\n{ID} 0 0\n");
        assert_eq!(scan_poll_body(&body, ID).unwrap(), TurnSignal::Aborted);
    }

    #[test]
    fn poll_scan_reads_finish_scores() {
        let body = format!("0 1\n{ID} 0 1 3 1\n");
        assert_eq!(
            scan_poll_body(&body, ID).unwrap(),
            TurnSignal::Finished(vec![3.0, 1.0])
        );
    }

    #[test]
    fn poll_scan_ignores_other_matches() {
        let body = "1 1\nsomeone-else\npayload\nanother-match 0 1 2 2\n";
        assert_eq!(scan_poll_body(body, ID).unwrap(), TurnSignal::NoSignalYet);
    }

    #[test]
    fn poll_scan_rejects_bad_header() {
        assert!(matches!(
            scan_poll_body("not counts\n", ID),
            Err(Error::Protocol(_))
        ));
    }
}
