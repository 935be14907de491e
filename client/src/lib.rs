//! # Synchronizer Client Library
//!
//! Client-side half of the rollback netcode: a predictive synchronizer
//! that keeps a local deterministic simulation loosely locked to the
//! server's authoritative one.
//!
//! ## Client-Side Prediction
//! Local input is inserted into the local simulator at the current frame
//! the instant it happens, without waiting for the server. The same frame
//! number travels with the input over the wire, so when the server and the
//! other peers replay it, it lands on exactly the same moment and all
//! timelines converge.
//!
//! ## Drift Correction
//! The client probes the server once a second with its current frame. The
//! reply carries the server's frame, from which the client estimates how
//! far ahead or behind it is running. Small drift is absorbed by slightly
//! stretching or shrinking the tick interval over a smoothing window;
//! falling a whole second behind triggers an immediate fast-forward to the
//! server's frame instead.
//!
//! ## Desync Detection
//! Probe replies may carry a canonical hash of the state at the stable
//! frame (the watermark below which no peer needs history). The client
//! recomputes the hash over its own copy of that state; a mismatch is
//! logged as a desync. There is deliberately no automatic repair.
//!
//! ## Module Organization
//!
//! ### Sync Module (`sync`)
//! The transport-agnostic synchronizer: message handling, prediction,
//! clock smoothing, and desync detection over an injected messenger.
//!
//! ### Network Module (`network`)
//! UDP wiring and the single-threaded event loop that drives the
//! synchronizer's self-rearming tick.

pub mod network;
pub mod sync;
