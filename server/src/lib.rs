//! # Mock Coordination Server
//!
//! A scripted stand-in for the multiworld coordination server, used by
//! the integration tests and runnable standalone for local relay
//! development.
//!
//! The mock speaks just enough of the protocol to exercise a relay
//! client end to end: it greets every connection with `RoomInfo`,
//! answers `GetDataPackage` with the requested identifier tables,
//! answers `Connect` with the session membership, and then plays back a
//! configured script of item-send events. Anything it cannot decode is
//! answered with `InvalidPacket`, the same way the real server reports a
//! protocol violation.
//!
//! ## Module Organization
//!
//! - `session`: the scripted fixture: games, identifier tables, players,
//!   and the item transfers to play back.
//! - `network`: the websocket accept loop and per-connection protocol
//!   handling.

pub mod network;
pub mod session;
