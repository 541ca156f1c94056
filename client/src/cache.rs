//! Disk-backed metadata cache translating numeric identifiers into names.
//!
//! The coordination server keys every gameplay event by numeric item and
//! location identifiers; the per-game tables mapping those back to names
//! are large and versioned by checksum. This module persists one JSON
//! record per game under a configured directory so a restart only
//! re-downloads tables whose server-side checksum changed.

use log::debug;
use serde::{Deserialize, Serialize};
use shared::{GameTable, Player, SlotInfo};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Cache I/O failures. Fatal at startup; fatal to the call during an
/// update (the caller must not assume cache consistency afterwards).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot create cache directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("unable to read cache directory {path}: {source}")]
    ReadDir { path: PathBuf, source: io::Error },
    #[error("unable to read cache file {path}: {source}")]
    ReadFile { path: PathBuf, source: io::Error },
    #[error("corrupt cache record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("unable to encode record for {game}: {source}")]
    Encode {
        game: String,
        source: serde_json::Error,
    },
    #[error("unable to persist record for {game}: {source}")]
    Persist { game: String, source: io::Error },
}

/// One game's identifier tables in lookup orientation, plus the checksum
/// identifying the server-side version they were built from. The checksum
/// uniquely determines table contents; on mismatch the whole record is
/// re-fetched, never patched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    #[serde(default)]
    pub location_id_to_name: HashMap<i64, String>,
    #[serde(default)]
    pub item_id_to_name: HashMap<i64, String>,
    #[serde(default)]
    pub checksum: String,
}

impl GameRecord {
    /// Inverts the server's name→id tables into id→name lookups.
    pub fn from_table(table: &GameTable) -> Self {
        let mut location_id_to_name = HashMap::new();
        for (name, id) in &table.location_name_to_id {
            location_id_to_name.insert(*id, name.clone());
        }

        let mut item_id_to_name = HashMap::new();
        for (name, id) in &table.item_name_to_id {
            item_id_to_name.insert(*id, name.clone());
        }

        Self {
            location_id_to_name,
            item_id_to_name,
            checksum: table.checksum.clone(),
        }
    }
}

/// Per-session metadata: game identifier tables (disk-backed) and the
/// player directory (rebuilt wholesale from each session-membership
/// payload, never persisted).
#[derive(Debug, Default)]
pub struct DataCache {
    root: PathBuf,
    players: HashMap<i32, Player>,
    slot_games: HashMap<i32, String>,
    games: HashMap<String, GameRecord>,
}

impl DataCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            players: HashMap::new(),
            slot_games: HashMap::new(),
            games: HashMap::new(),
        }
    }

    /// Reads every persisted game record from the cache directory,
    /// creating the directory if it does not exist yet.
    ///
    /// An unreadable directory or a corrupt record aborts startup: a
    /// silently skipped record would leave the checksum map claiming
    /// tables we do not actually have.
    pub fn load(&mut self) -> Result<(), CacheError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return fs::create_dir_all(&self.root).map_err(|source| CacheError::CreateDir {
                    path: self.root.clone(),
                    source,
                });
            }
            Err(source) => {
                return Err(CacheError::ReadDir {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        for entry in entries {
            let entry = entry.map_err(|source| CacheError::ReadDir {
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                continue;
            }

            let Some(game) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let game = game.to_string();

            let contents =
                fs::read_to_string(&path).map_err(|source| CacheError::ReadFile {
                    path: path.clone(),
                    source,
                })?;
            let record: GameRecord = serde_json::from_str(&contents)
                .map_err(|source| CacheError::Corrupt { path, source })?;

            debug!("loaded cached tables for {game} (checksum {})", record.checksum);
            self.games.insert(game, record);
        }

        Ok(())
    }

    /// Returns every game whose server-reported checksum is absent from or
    /// differs from the local record. Order is not significant.
    pub fn pending_updates(&self, server_checksums: &HashMap<String, String>) -> Vec<String> {
        let mut updates = Vec::new();
        for (game, checksum) in server_checksums {
            match self.games.get(game) {
                Some(record) if record.checksum == *checksum => {}
                _ => updates.push(game.clone()),
            }
        }
        updates
    }

    /// Replaces the local record for every game in the payload and
    /// persists each new record before returning. A persistence failure
    /// aborts the call; games already processed remain consistent between
    /// memory and disk, the rest stay untouched.
    pub fn apply_update(&mut self, games: &HashMap<String, GameTable>) -> Result<(), CacheError> {
        for (game, table) in games {
            let record = GameRecord::from_table(table);
            self.persist(game, &record)?;
            self.games.insert(game.clone(), record);
        }
        Ok(())
    }

    fn persist(&self, game: &str, record: &GameRecord) -> Result<(), CacheError> {
        let contents = serde_json::to_string(record).map_err(|source| CacheError::Encode {
            game: game.to_string(),
            source,
        })?;
        let path = self.root.join(format!("{game}.json"));
        fs::write(&path, contents).map_err(|source| CacheError::Persist {
            game: game.to_string(),
            source,
        })
    }

    /// Replaces the player directory and slot→game mapping wholesale.
    /// Slots are joined to games by player name, as the session payload
    /// carries the mapping.
    pub fn set_players(&mut self, players: Vec<Player>, slot_info: &HashMap<String, SlotInfo>) {
        let mut slot_games = HashMap::new();
        for info in slot_info.values() {
            for player in &players {
                if info.name == player.name {
                    slot_games.insert(player.slot, info.game.clone());
                }
            }
        }

        let mut by_slot = HashMap::new();
        for player in players {
            by_slot.insert(player.slot, player);
        }

        self.players = by_slot;
        self.slot_games = slot_games;
    }

    /// Name of the player in `slot`, or the stringified slot number.
    /// Missing metadata never blocks message delivery.
    pub fn resolve_player_name(&self, slot: i32) -> String {
        match self.players.get(&slot) {
            Some(player) => player.name.clone(),
            None => slot.to_string(),
        }
    }

    /// Item name within the game played by `slot`, or the stringified id.
    pub fn resolve_item_name(&self, item_id: i64, slot: i32) -> String {
        self.slot_games
            .get(&slot)
            .and_then(|game| self.games.get(game))
            .and_then(|record| record.item_id_to_name.get(&item_id))
            .cloned()
            .unwrap_or_else(|| item_id.to_string())
    }

    /// Location name within the game played by `slot`, or the stringified id.
    pub fn resolve_location_name(&self, location_id: i64, slot: i32) -> String {
        self.slot_games
            .get(&slot)
            .and_then(|game| self.games.get(game))
            .and_then(|record| record.location_id_to_name.get(&location_id))
            .cloned()
            .unwrap_or_else(|| location_id.to_string())
    }

    /// Looks up a cached record. Primarily for inspection in tests.
    pub fn record(&self, game: &str) -> Option<&GameRecord> {
        self.games.get(game)
    }
}
