//! Wire protocol for the multiworld coordination server.
//!
//! Frames are JSON arrays of tagged objects; the `cmd` field selects the
//! message type. Outgoing messages are always wrapped in a single-element
//! array before transmission.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The `type` value of a PrintJSON message describing a cross-player item
/// transfer. Every other PrintJSON type is presentation-only chatter.
pub const ITEM_SEND: &str = "ItemSend";

/// Messages received from the coordination server.
///
/// An unrecognized `cmd` decodes to [`ServerMessage::Unknown`] rather than
/// failing the whole frame, so new server-side commands never kill the
/// connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum ServerMessage {
    RoomInfo(RoomInfo),
    DataPackage(DataPackage),
    Connected(Connected),
    ConnectionRefused(ConnectionRefused),
    RoomUpdate(RoomUpdate),
    #[serde(rename = "PrintJSON")]
    PrintJson(PrintJson),
    InvalidPacket(InvalidPacket),
    #[serde(other)]
    Unknown,
}

/// Messages sent to the coordination server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum ClientMessage {
    Connect(ConnectRequest),
    GetDataPackage(GetDataPackage),
}

/// First message after the socket opens: the server describes the session
/// and the checksums of every game's identifier tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomInfo {
    #[serde(default)]
    pub version: Version,
    /// Whether joining this session requires a password.
    #[serde(default)]
    pub password: bool,
    #[serde(default)]
    pub games: Vec<String>,
    #[serde(default)]
    pub datapackage_checksums: HashMap<String, String>,
}

/// Per-game identifier tables, server orientation (name keyed).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameTable {
    #[serde(default)]
    pub location_name_to_id: HashMap<String, i64>,
    #[serde(default)]
    pub item_name_to_id: HashMap<String, i64>,
    #[serde(default)]
    pub checksum: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataPackage {
    pub data: DataPackageData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataPackageData {
    #[serde(default)]
    pub games: HashMap<String, GameTable>,
}

/// Session membership, sent in response to a successful join request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Connected {
    #[serde(default)]
    pub team: i32,
    #[serde(default)]
    pub slot: i32,
    #[serde(default)]
    pub players: Vec<Player>,
    #[serde(default)]
    pub slot_info: HashMap<String, SlotInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Player {
    #[serde(default)]
    pub team: i32,
    pub slot: i32,
    #[serde(default)]
    pub alias: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub name: String,
    #[serde(rename = "Game")]
    pub game: String,
    #[serde(rename = "type", default)]
    pub kind: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionRefused {
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Session-state delta. Accepted but currently carries nothing we act on;
/// membership changes keep arriving as full `Connected` payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomUpdate {}

/// Server-side gameplay event feed. Only `type == "ItemSend"` matters to
/// the relay; the rest is chat/status text for playing clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrintJson {
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Slot receiving the item.
    #[serde(default)]
    pub receiving: i32,
    #[serde(default)]
    pub item: NetworkItem,
}

/// One item transfer as carried inside a PrintJSON message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkItem {
    pub item: i64,
    pub location: i64,
    /// Slot whose world contained the item.
    #[serde(rename = "Player")]
    pub player: i32,
    #[serde(default)]
    pub flags: u32,
}

/// The server considered one of our packets malformed. Protocol invariant
/// violation; the session is not safe to continue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidPacket {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub original_cmd: Option<String>,
}

/// Join request sent once per RoomInfo receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub password: Option<String>,
    pub name: String,
    pub version: Version,
    pub tags: Vec<String>,
    pub items_handling: u32,
    pub uuid: String,
    pub game: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetDataPackage {
    pub games: Vec<String>,
}

/// Protocol version triple. The `class` marker is part of the wire format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub build: u64,
    #[serde(default)]
    pub class: String,
}

impl Version {
    pub fn new(major: u64, minor: u64, build: u64) -> Self {
        Self {
            major,
            minor,
            build,
            class: "Version".to_string(),
        }
    }
}

/// Importance classification of a transferred item, decoded from the
/// protocol's flag bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemImportance {
    Normal,
    Progression,
    Helpful,
    Trap,
}

impl ItemImportance {
    /// Bit 0 marks progression, bit 1 helpful, bit 2 a trap; zero is a
    /// filler item. Progression wins when several bits are set.
    pub fn from_flags(flags: u32) -> Self {
        if flags & 0b001 != 0 {
            ItemImportance::Progression
        } else if flags & 0b010 != 0 {
            ItemImportance::Helpful
        } else if flags & 0b100 != 0 {
            ItemImportance::Trap
        } else {
            ItemImportance::Normal
        }
    }
}

/// Decodes one incoming frame (a JSON array of tagged messages).
pub fn decode_frames(text: &str) -> serde_json::Result<Vec<ServerMessage>> {
    serde_json::from_str(text)
}

/// Decodes one incoming frame of client-originated messages. Used by the
/// server side of the protocol.
pub fn decode_client_frames(text: &str) -> serde_json::Result<Vec<ClientMessage>> {
    serde_json::from_str(text)
}

/// Encodes one outgoing message as a single-element array frame.
pub fn encode_frame<T: Serialize>(message: &T) -> serde_json::Result<String> {
    serde_json::to_string(std::slice::from_ref(message))
}
