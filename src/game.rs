//! Game descriptors as published by the matchmaking service.

use serde::{Deserialize, Serialize};

/// Immutable descriptor of a game known to the judge and the service.
///
/// The name doubles as the lookup key for the judge plugin and as the game
/// identifier sent when creating a remote match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Unique game name.
    pub name: String,
    /// Number of player slots a match of this game has.
    pub player_count: usize,
    /// Human-readable description.
    pub description: String,
}

impl Game {
    /// Create a descriptor by hand (e.g. from CLI arguments).
    pub fn new(name: impl Into<String>, player_count: usize) -> Self {
        Game {
            name: name.into(),
            player_count,
            description: String::new(),
        }
    }
}
