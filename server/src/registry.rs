//! Player bookkeeping for the relay server
//!
//! This module owns the authoritative player records, including:
//! - Name de-duplication for join requests
//! - Record creation with a spawn point and cosmetic color
//! - Position overwrites from movement events
//! - Record removal on disconnect
//!
//! The registry performs no I/O. The relay loop decides who hears about
//! each change; this type only answers what changed.

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    PlayerId, PlayerInfo, Position, Roster, DEFAULT_PLAYER_NAME, MAX_COLOR, SPAWN_POSITION,
};
use std::collections::HashMap;

/// Server-held state for one joined connection
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    /// Identity of the owning connection
    pub id: PlayerId,
    /// Display name, unique among live records
    pub username: String,
    /// Last position reported by the owning client
    pub position: Position,
    /// Cosmetic 24-bit color tag
    pub color: u32,
}

impl PlayerRecord {
    pub fn info(&self) -> PlayerInfo {
        PlayerInfo::new(self.username.clone(), self.position, self.color)
    }
}

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// The newly inserted record
    pub record: PlayerRecord,
    /// Every live record at insertion time, the new one included
    pub roster: Roster,
}

/// Maps connection identities to player records
///
/// A record exists only for connections that completed a join. Display
/// names are kept pairwise distinct by [`SessionRegistry::unique_name`].
pub struct SessionRegistry {
    players: HashMap<PlayerId, PlayerRecord>,
    rng: StdRng,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Creates a registry whose color tags are reproducible
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            players: HashMap::new(),
            rng,
        }
    }

    /// Inserts a record for `id` under a collision-free name
    ///
    /// Returns `None` if `id` already has a record; a connection joins at
    /// most once. Otherwise the join always succeeds.
    pub fn join(&mut self, id: PlayerId, requested: Option<&str>) -> Option<JoinOutcome> {
        if self.players.contains_key(&id) {
            return None;
        }

        let username = self.unique_name(requested);
        let record = PlayerRecord {
            id,
            username,
            position: SPAWN_POSITION,
            color: self.rng.gen_range(0..=MAX_COLOR),
        };

        info!("{} joined the game.", record.username);
        self.players.insert(id, record.clone());

        Some(JoinOutcome {
            record,
            roster: self.roster(),
        })
    }

    /// Picks the display name a join request would receive right now
    ///
    /// An empty or absent request falls back to [`DEFAULT_PLAYER_NAME`].
    /// On collision the suffixes 1, 2, 3, ... are appended to that base
    /// name until no live record uses the candidate.
    pub fn unique_name(&self, requested: Option<&str>) -> String {
        let base = match requested {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_PLAYER_NAME,
        };

        let mut candidate = base.to_string();
        let mut suffix: u32 = 1;
        while self.is_name_taken(&candidate) {
            candidate = format!("{}{}", base, suffix);
            suffix += 1;
        }
        candidate
    }

    pub fn is_name_taken(&self, name: &str) -> bool {
        self.players.values().any(|player| player.username == name)
    }

    /// Overwrites the position of a joined player
    ///
    /// Returns false when `id` has no record, e.g. a movement that was in
    /// flight while its connection closed.
    pub fn move_player(&mut self, id: PlayerId, position: Position) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                player.position = position;
                true
            }
            None => false,
        }
    }

    /// Removes and returns the record for `id`, if it joined
    pub fn leave(&mut self, id: PlayerId) -> Option<PlayerRecord> {
        let record = self.players.remove(&id)?;
        info!("{} left.", record.username);
        Some(record)
    }

    /// Point-in-time copy of every live record
    pub fn roster(&self) -> Roster {
        self.players
            .iter()
            .map(|(id, player)| (*id, player.info()))
            .collect()
    }

    pub fn get(&self, id: PlayerId) -> Option<&PlayerRecord> {
        self.players.get(&id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    /// Identities of every joined connection
    pub fn ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
