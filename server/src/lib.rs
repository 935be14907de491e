//! # Broadcaster Server Library
//!
//! Server-side half of the rollback netcode. The server owns the single
//! authoritative timeline for a session and fans events between
//! connections, relying on the deterministic event order (not on being
//! the only simulator) to keep every peer's replica converged.
//!
//! ## Authoritative Timeline
//! The server's simulator advances on its own fixed tick, independent of
//! connection activity. Inputs arrive tagged with the frame the sending
//! client applied them at; the server inserts them at exactly that frame,
//! replaying history when the frame is already in the past, and
//! rebroadcasts them verbatim so every other peer does the same.
//!
//! ## History Pruning
//! Each connection's sync probes report how far its clock has advanced.
//! The minimum across all connections (and the server's own clock) is the
//! stable frame: no connected peer can ever again ask about anything
//! older, so history below it is discarded immediately. A connection that
//! nevertheless sends an event for a discarded frame is force-closed;
//! tolerating it could require access to history that no longer exists.
//!
//! ## Module Organization
//!
//! ### Broadcast Module (`broadcast`)
//! The transport-agnostic broadcaster: connection roster, event fan-out,
//! stable-frame bookkeeping, and onboarding snapshots.
//!
//! ### Session Module (`session`)
//! Registry of named sessions keyed by join code, each owning one
//! broadcaster with its own timeline.
//!
//! ### Network Module (`network`)
//! UDP wiring: datagram routing by source address, per-connection
//! outbound queues, the fixed tick, and timeout reaping.

pub mod broadcast;
pub mod network;
pub mod session;
