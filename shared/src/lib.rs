//! Shared core for the deterministic rollback simulation.
//!
//! Everything in this crate is transport-agnostic and is used by both the
//! client and the server: the frame-indexed [`simulator::Simulator`], the
//! [`game::Game`] step-function contract, the wire [`protocol::Message`] set,
//! and the canonical serialization used for cross-process state comparison.

pub mod canonical;
pub mod game;
pub mod grid;
pub mod protocol;
pub mod simulator;

/// Logical timestamp identifying one discrete simulation step.
pub type Frame = u64;

/// Identifier assigned by the server to one connection.
pub type ClientId = u32;
