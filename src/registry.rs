//! Game registry collaborator.
//!
//! Requests name a game by a short name; the registry turns that into the
//! domain segment the API uses in its paths.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A game known to the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameDescriptor {
    /// Name used by callers (`skyrimse`).
    pub short_name: String,
    /// Domain name used in API paths (`skyrimspecialedition`).
    pub domain_name: String,
    /// Numeric game id on the repository, when known.
    #[serde(default)]
    pub repository_id: Option<u64>,
}

impl GameDescriptor {
    pub fn new(short_name: impl Into<String>, domain_name: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            domain_name: domain_name.into(),
            repository_id: None,
        }
    }
}

/// Resolves game names for URL construction.
pub trait GameRegistry: Send + Sync + fmt::Debug {
    /// Returns the descriptor for `name`, or `None` if the game is unknown.
    fn resolve_game(&self, name: &str) -> Option<GameDescriptor>;
}

/// Registry backed by a fixed table.
///
/// Lookups are case-insensitive on both the short and the domain name.
#[derive(Debug, Clone, Default)]
pub struct StaticGameRegistry {
    games: HashMap<String, GameDescriptor>,
}

impl StaticGameRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a game.
    #[must_use]
    pub fn with_game(mut self, game: GameDescriptor) -> Self {
        self.games
            .insert(game.domain_name.to_ascii_lowercase(), game.clone());
        self.games.insert(game.short_name.to_ascii_lowercase(), game);
        self
    }
}

impl GameRegistry for StaticGameRegistry {
    fn resolve_game(&self, name: &str) -> Option<GameDescriptor> {
        self.games.get(&name.to_ascii_lowercase()).cloned()
    }
}

/// Registry that resolves any non-empty name to itself, lowercased.
///
/// Used by the CLI where the caller passes the API domain name directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughGameRegistry;

impl GameRegistry for PassthroughGameRegistry {
    fn resolve_game(&self, name: &str) -> Option<GameDescriptor> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(GameDescriptor::new(name, name.to_ascii_lowercase()))
    }
}
