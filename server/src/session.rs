//! Scripted session fixtures served by the mock coordination server.

use shared::{
    Connected, DataPackage, DataPackageData, GameTable, NetworkItem, Player, PrintJson, RoomInfo,
    SlotInfo, Version, ITEM_SEND,
};
use std::collections::HashMap;

/// One scripted item transfer, played back after a client joins.
#[derive(Debug, Clone)]
pub struct ScriptedSend {
    pub item: i64,
    pub location: i64,
    /// Slot whose world contained the item.
    pub player: i32,
    /// Slot receiving the item.
    pub receiving: i32,
    pub flags: u32,
}

impl ScriptedSend {
    pub fn to_print_json(&self) -> PrintJson {
        PrintJson {
            kind: ITEM_SEND.to_string(),
            receiving: self.receiving,
            item: NetworkItem {
                item: self.item,
                location: self.location,
                player: self.player,
                flags: self.flags,
            },
        }
    }
}

/// Everything the mock serves for one session: per-game identifier
/// tables, the player roster, and the transfers to play back.
#[derive(Debug, Clone, Default)]
pub struct MockSession {
    pub games: HashMap<String, GameTable>,
    pub players: Vec<Player>,
    pub slot_info: HashMap<String, SlotInfo>,
    pub sends: Vec<ScriptedSend>,
    /// When set, every join request is refused with these errors.
    pub refusal: Option<Vec<String>>,
}

impl MockSession {
    /// Two games, two players, two transfers. Enough to exercise
    /// metadata fetch, name resolution, and self-find phrasing.
    pub fn sample() -> Self {
        let mut games = HashMap::new();

        let mut game_a = GameTable {
            checksum: "abc123".to_string(),
            ..GameTable::default()
        };
        game_a
            .item_name_to_id
            .insert("Turkey sandwich".to_string(), 50);
        game_a
            .item_name_to_id
            .insert("A bag full of math rocks".to_string(), 51);
        game_a
            .location_name_to_id
            .insert("Under the couch".to_string(), 10);
        game_a
            .location_name_to_id
            .insert("The kitchen".to_string(), 11);
        games.insert("GameA".to_string(), game_a);

        let mut game_b = GameTable {
            checksum: "def456".to_string(),
            ..GameTable::default()
        };
        game_b
            .item_name_to_id
            .insert("Way too many checks".to_string(), 60);
        game_b
            .location_name_to_id
            .insert("Somewhere in Canada".to_string(), 20);
        games.insert("GameB".to_string(), game_b);

        let players = vec![
            Player {
                team: 0,
                slot: 1,
                alias: "Civil".to_string(),
                name: "Civil".to_string(),
            },
            Player {
                team: 0,
                slot: 3,
                alias: "Tea".to_string(),
                name: "Tea".to_string(),
            },
        ];

        let mut slot_info = HashMap::new();
        slot_info.insert(
            "1".to_string(),
            SlotInfo {
                name: "Civil".to_string(),
                game: "GameB".to_string(),
                kind: 1,
            },
        );
        slot_info.insert(
            "3".to_string(),
            SlotInfo {
                name: "Tea".to_string(),
                game: "GameA".to_string(),
                kind: 1,
            },
        );

        let sends = vec![
            // Tea finds their own progression item.
            ScriptedSend {
                item: 50,
                location: 10,
                player: 3,
                receiving: 3,
                flags: 0b001,
            },
            // Civil sends an item from their world over to Tea.
            ScriptedSend {
                item: 51,
                location: 20,
                player: 1,
                receiving: 3,
                flags: 0,
            },
        ];

        Self {
            games,
            players,
            slot_info,
            sends,
            refusal: None,
        }
    }

    pub fn room_info(&self) -> RoomInfo {
        RoomInfo {
            version: Version::new(0, 5, 0),
            password: false,
            games: self.games.keys().cloned().collect(),
            datapackage_checksums: self.checksums(),
        }
    }

    pub fn checksums(&self) -> HashMap<String, String> {
        self.games
            .iter()
            .map(|(game, table)| (game.clone(), table.checksum.clone()))
            .collect()
    }

    /// The tables for the requested games; unknown names are skipped.
    pub fn data_package_for(&self, requested: &[String]) -> DataPackage {
        let mut games = HashMap::new();
        for game in requested {
            if let Some(table) = self.games.get(game) {
                games.insert(game.clone(), table.clone());
            }
        }
        DataPackage {
            data: DataPackageData { games },
        }
    }

    pub fn connected(&self) -> Connected {
        Connected {
            team: 0,
            slot: 1,
            players: self.players.clone(),
            slot_info: self.slot_info.clone(),
        }
    }
}
