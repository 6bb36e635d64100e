//! # Match Arena
//!
//! A crate for running turn-based AI matches: an authoritative judge
//! produces per-turn requests, player programs answer them as local
//! subprocesses under a hard time budget, and (for remote matches) a
//! matchmaking service relays turns between the local player and bots it
//! hosts.
//!
//! It provides:
//! - Match configuration and validation ([`MatchConfiguration`](crate::configuration::MatchConfiguration))
//! - Local match execution against any [`JudgeAdapter`](crate::judge::JudgeAdapter) host
//! - A subprocess judge host ([`ProgramJudge`](crate::judge::ProgramJudge))
//! - A per-slot program runner with timeout racing and verdict
//!   classification ([`ProgramRunner`](crate::program_runner::ProgramRunner))
//! - A polling client for the matchmaking service with fixed-delay retry
//!   ([`RemoteClient`](crate::remote::RemoteClient))
//!
//! Each player program runs as a separate OS process, once per turn: it
//! receives the full request/response history on stdin and answers on
//! stdout (see [`program_runner`] for both protocol variants). A program
//! that overruns the budget or crashes yields a per-turn verdict and the
//! judge decides how the match continues; only judge failures abort a
//! match outright.
//!
//! # Usage Example
//!
//! Below is a minimal local two-program match driven by a judge
//! executable:
//!
//! ```no_run
//! use match_arena::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut configuration = MatchConfiguration::new();
//!     configuration.set_game(Game::new("tictactoe", 2));
//!     configuration.set_slot_identity(0, "bots/alice");
//!     configuration.set_slot_identity(1, "bots/bob");
//!
//!     let judge = Box::new(ProgramJudge::new("judges/tictactoe"));
//!     let active = ActiveMatchSlot::new();
//!     let mut m = LocalMatch::new(&configuration, judge, &active)?;
//!
//!     // an abort handle may be fired from any thread, e.g. a UI cancel
//!     let _abort = m.abort_handle();
//!
//!     let result = m.run();
//!     println!("{:?} {:?}", result.status(), result.scores());
//!     Ok(())
//! }
//! ```
//!
//! Remote matches are created through a [`RemoteClient`] built from the
//! credentials URL pasted from the service, then driven the same way by
//! [`RemoteMatch`](crate::match_runner::RemoteMatch).
//!
//! Only one match may be active per process: match creation claims an
//! [`ActiveMatchSlot`](crate::registry::ActiveMatchSlot) owned by the
//! embedding application and fails fast when it is taken.
//!
//! [`RemoteClient`]: crate::remote::RemoteClient
#![warn(missing_docs)]

pub use anyhow;

pub mod configuration;
pub mod error;
pub mod game;
pub mod judge;
pub mod logger;
pub mod match_log;
pub mod match_runner;
pub mod match_state;
pub mod program_runner;
pub mod registry;
pub mod remote;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use match_arena::prelude::*;
/// ```
pub mod prelude {
    pub use crate::configuration::{MatchConfiguration, PlayerKind, PlayerSlot};
    pub use crate::error::{Error, Result};
    pub use crate::game::Game;
    pub use crate::judge::{JudgeAdapter, ProgramJudge};
    pub use crate::match_log::{JudgeOutput, ProgramOutcome, TurnLogEntry, Verdict};
    pub use crate::match_runner::{AbortHandle, HumanInput, LocalMatch, RemoteMatch};
    pub use crate::match_state::{Match, MatchStatus};
    pub use crate::program_runner::ProgramRunner;
    pub use crate::registry::ActiveMatchSlot;
    pub use crate::remote::{Credentials, RemoteClient, TurnSignal};
}
