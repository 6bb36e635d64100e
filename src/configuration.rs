//! Match configuration: the ordered player slots bound to a game.
//!
//! A [`MatchConfiguration`] holds one [`PlayerSlot`] per seat of the
//! selected [`Game`] and recomputes its [`Validity`] on every mutation.
//! The validity gates which match flavor can be started: a configuration
//! with at least one [`PlayerKind::RemoteBot`] slot is a *remote match*
//! (turns are exchanged through the matchmaking service), anything else is
//! a *local match* (turns run entirely through local subprocesses).
//!
//! Slot identities start out as kind-specific placeholders; a slot only
//! counts as configured once the caller supplied a real identity, i.e. a
//! program path or a remote bot ID (a human seat needs none).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::Game;

/// Shown until a program path is chosen.
pub const LOCAL_PROGRAM_PLACEHOLDER: &str = "<path to program>";
/// Fixed identity of a human seat.
pub const LOCAL_HUMAN_PLACEHOLDER: &str = "(yourself)";
/// Shown until a remote bot ID is entered.
pub const REMOTE_BOT_PLACEHOLDER: &str = "<bot id>";

/// Default per-turn wall-clock budget for player programs.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(1);

/// Which kind of participant occupies a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerKind {
    /// A local executable driven through stdin/stdout.
    LocalProgram,
    /// The user, answering requests interactively.
    LocalHuman,
    /// A bot hosted by the matchmaking service.
    RemoteBot,
}

impl PlayerKind {
    /// The identity a slot of this kind resets to on kind change.
    pub fn placeholder(self) -> &'static str {
        match self {
            PlayerKind::LocalProgram => LOCAL_PROGRAM_PLACEHOLDER,
            PlayerKind::LocalHuman => LOCAL_HUMAN_PLACEHOLDER,
            PlayerKind::RemoteBot => REMOTE_BOT_PLACEHOLDER,
        }
    }
}

/// One seat in a match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSlot {
    /// Position in the match, stable for the match's lifetime.
    pub index: usize,
    /// Participant kind.
    pub kind: PlayerKind,
    /// Program path, remote bot ID, or placeholder.
    pub identity: String,
    /// Accumulated request/response transcript for diagnostics.
    pub transcript: String,
}

impl PlayerSlot {
    fn new(index: usize) -> Self {
        PlayerSlot {
            index,
            kind: PlayerKind::LocalProgram,
            identity: LOCAL_PROGRAM_PLACEHOLDER.to_string(),
            transcript: String::new(),
        }
    }

    /// True once the slot has a usable identity.
    ///
    /// A human seat is always configured: its identity is the fixed
    /// placeholder and nothing external needs to be supplied.
    pub fn is_configured(&self) -> bool {
        match self.kind {
            PlayerKind::LocalHuman => true,
            PlayerKind::LocalProgram | PlayerKind::RemoteBot => {
                !self.identity.is_empty()
                    && self.identity != LOCAL_PROGRAM_PLACEHOLDER
                    && self.identity != REMOTE_BOT_PLACEHOLDER
            }
        }
    }

    fn missing_identity_reason(&self) -> String {
        match self.kind {
            PlayerKind::LocalProgram => format!("player {} has no program path", self.index),
            _ => format!("player {} has no bot ID", self.index),
        }
    }
}

/// Outcome of a validation pass: a boolean plus the first failing reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    /// Whether a match can be created from the configuration.
    pub is_valid: bool,
    /// Human-readable reason when invalid, empty otherwise.
    pub reason: String,
}

impl Validity {
    fn ok() -> Self {
        Validity {
            is_valid: true,
            reason: String::new(),
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Validity {
            is_valid: false,
            reason: reason.into(),
        }
    }
}

type ValidationListener = Arc<dyn Fn(&Validity) + Send + Sync>;

/// Ordered player slots bound to exactly one game.
///
/// Every mutation (game change, kind change, identity change) triggers a
/// revalidation and notifies the registered listener, even when the
/// boolean did not flip: downstream consumers recompute their own reason
/// string from it.
#[derive(Clone, Serialize, Deserialize)]
pub struct MatchConfiguration {
    game: Option<Game>,
    slots: Vec<PlayerSlot>,
    /// Per-turn time budget, also forwarded to the service on remote matches.
    pub time_limit: Duration,
    /// Use the line-oriented subprocess protocol instead of one-line JSON.
    pub simple_io: bool,
    /// Judge-defined initialization blob handed to the first judge call.
    pub initdata: Value,
    validity: Validity,
    #[serde(skip)]
    listener: Option<ValidationListener>,
}

impl std::fmt::Debug for MatchConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchConfiguration")
            .field("game", &self.game)
            .field("slots", &self.slots)
            .field("time_limit", &self.time_limit)
            .field("simple_io", &self.simple_io)
            .field("validity", &self.validity)
            .finish()
    }
}

impl Default for MatchConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchConfiguration {
    /// Empty configuration; invalid until a game is selected and every
    /// slot is configured.
    pub fn new() -> Self {
        MatchConfiguration {
            game: None,
            slots: vec![],
            time_limit: DEFAULT_TIME_LIMIT,
            simple_io: false,
            initdata: Value::String(String::new()),
            validity: Validity::fail("choose a game first"),
            listener: None,
        }
    }

    /// Sets the per-turn time budget.
    #[must_use]
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    /// Enables or disables the simple line-oriented subprocess protocol.
    #[must_use]
    pub fn with_simple_io(mut self, value: bool) -> Self {
        self.simple_io = value;
        self
    }

    /// Selected game, if any.
    pub fn game(&self) -> Option<&Game> {
        self.game.as_ref()
    }

    /// The player slots, one per seat of the selected game.
    pub fn slots(&self) -> &[PlayerSlot] {
        &self.slots
    }

    /// Binds the configuration to `game`, resizing the slot list to its
    /// player count. Existing slots are preserved by index; new slots
    /// default to an unconfigured [`PlayerKind::LocalProgram`].
    pub fn set_game(&mut self, game: Game) {
        while self.slots.len() < game.player_count {
            self.slots.push(PlayerSlot::new(self.slots.len()));
        }
        self.slots.truncate(game.player_count);
        self.game = Some(game);
        self.revalidate();
    }

    /// Changes a slot's kind and resets its identity to the new kind's
    /// placeholder; callers must re-supply the identity afterward.
    ///
    /// # Panics
    /// Panics when `index` is out of range.
    pub fn set_slot_kind(&mut self, index: usize, kind: PlayerKind) {
        let slot = &mut self.slots[index];
        if slot.kind != kind {
            slot.kind = kind;
            slot.identity = kind.placeholder().to_string();
        }
        self.revalidate();
    }

    /// Supplies a slot's identity (program path or remote bot ID).
    ///
    /// # Panics
    /// Panics when `index` is out of range.
    pub fn set_slot_identity(&mut self, index: usize, identity: impl Into<String>) {
        self.slots[index].identity = identity.into();
        self.revalidate();
    }

    /// Registers a listener invoked on every validity recomputation.
    pub fn set_validation_listener(
        &mut self,
        listener: impl Fn(&Validity) + Send + Sync + 'static,
    ) {
        self.listener = Some(Arc::new(listener));
    }

    /// A match is remote iff any slot hosts a remote bot.
    pub fn is_remote_match(&self) -> bool {
        self.slots.iter().any(|s| s.kind == PlayerKind::RemoteBot)
    }

    /// Latest validation outcome.
    pub fn validity(&self) -> &Validity {
        &self.validity
    }

    /// Shorthand for `validity().is_valid`.
    pub fn is_valid(&self) -> bool {
        self.validity.is_valid
    }

    /// Appends diagnostic text to a slot's transcript.
    pub(crate) fn append_transcript(&mut self, index: usize, text: &str) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.transcript.push_str(text);
        }
    }

    /// Index of the single non-remote seat of a remote match.
    pub(crate) fn local_seat(&self) -> Option<usize> {
        self.slots
            .iter()
            .find(|s| s.kind != PlayerKind::RemoteBot)
            .map(|s| s.index)
    }

    // Rules are checked in order; the first failure wins.
    fn compute_validity(&self) -> Validity {
        let Some(game) = &self.game else {
            return Validity::fail("choose a game first");
        };
        if game.player_count == 0 {
            return Validity::fail("choose a game first");
        }
        for slot in &self.slots {
            if !slot.is_configured() {
                return Validity::fail(slot.missing_identity_reason());
            }
        }
        let humans = self
            .slots
            .iter()
            .filter(|s| s.kind == PlayerKind::LocalHuman)
            .count();
        if humans > 1 {
            return Validity::fail("too many human players (at most one)");
        }
        if self.is_remote_match() {
            if humans > 0 {
                return Validity::fail("a remote match cannot include a human player");
            }
            let locals = self
                .slots
                .iter()
                .filter(|s| s.kind != PlayerKind::RemoteBot)
                .count();
            if locals != 1 {
                return Validity::fail(format!(
                    "a remote match needs exactly one local player and {} remote bots",
                    self.slots.len() - 1
                ));
            }
        }
        Validity::ok()
    }

    fn revalidate(&mut self) {
        self.validity = self.compute_validity();
        if let Some(listener) = &self.listener {
            listener(&self.validity);
        }
    }
}
