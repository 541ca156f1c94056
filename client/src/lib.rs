//! # Multiworld Chat Relay
//!
//! This library bridges a multiworld coordination server to a chat
//! surface. It keeps a persistent websocket connection to the server,
//! translates the numeric identifiers in gameplay events into
//! human-readable names, and forwards the result to delivery listeners at
//! a rate the downstream chat surface tolerates.
//!
//! ## Architecture Overview
//!
//! Three subsystems cooperate, connected by explicit handles rather than
//! process-wide globals:
//!
//! ### Coordination Client (`network`)
//! Owns the socket and the whole connection lifecycle: dialing with
//! exponential backoff, the protocol handshake, and per-command dispatch
//! of incoming frames. Transient network failures feed the reconnect
//! loop; protocol violations (a refused join, a malformed-packet report
//! from the server) terminate the relay with a diagnostic, since an
//! inconsistent session is not safe to keep acting on.
//!
//! ### Metadata Cache (`cache`)
//! The server describes events by numeric item and location identifiers.
//! The per-game tables mapping those to names are versioned by checksum
//! and cached on disk, one JSON record per game, so restarts only
//! re-download what actually changed. Lookups never fail: a missing name
//! degrades to the stringified identifier so delivery is never blocked on
//! metadata.
//!
//! ### Outbound Queue (`queue`)
//! An unbounded FIFO between event production and delivery. A flush task
//! drains exactly one event per 250 ms tick to every registered listener,
//! in registration order. Delivery is best-effort: a failing listener is
//! logged and skipped, never retried.
//!
//! ## Task Model
//!
//! Four tasks run concurrently: the connection-management loop, the
//! socket read duty, the socket write duty, and the queue flush duty.
//! All of them observe one shared `watch` shutdown signal and unwind
//! within a single iteration; the binary joins every handle before
//! exiting.

pub mod cache;
pub mod chat;
pub mod config;
pub mod network;
pub mod queue;
