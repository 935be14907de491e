//! The step-function contract consumed by the simulator.
//!
//! The simulator never interprets game rules itself. It delegates to an
//! implementation of [`Game`], which must be a pure, deterministic function
//! of the previous state and the ordered events of that frame. Two processes
//! that run the same `Game` over the same `(frame, event)` pairs must produce
//! bit-identical states, which is what makes replay and cross-process hash
//! comparison possible.

use crate::{ClientId, Frame};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An externally-triggered occurrence targeted at one frame.
///
/// The roster-level kinds (connect/disconnect) are fixed by the protocol,
/// while the input payload stays opaque to the core. How events are ranked
/// within a frame is entirely up to [`Game::compare_events`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event<I> {
    Connect { client_id: ClientId },
    Disconnect { client_id: ClientId },
    Input { client_id: ClientId, input: I },
}

impl<I> Event<I> {
    /// The connection that caused this event.
    pub fn client_id(&self) -> ClientId {
        match self {
            Event::Connect { client_id }
            | Event::Disconnect { client_id }
            | Event::Input { client_id, .. } => *client_id,
        }
    }
}

/// An event tagged with the frame it applies to, used when transferring
/// outstanding history between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameEvent<I> {
    pub frame: Frame,
    pub event: Event<I>,
}

/// Implemented by state types so the simulator can read the frame counter.
pub trait FrameState {
    fn frame(&self) -> Frame;
}

/// A pure, deterministic simulation step.
///
/// Contract:
/// - `update` must return a state whose frame is exactly `state.frame() + 1`.
///   Violating this is a bug in the implementation and aborts the session.
/// - `update` must not mutate its inputs; it derives a new state value.
/// - `compare_events` must be a total order. It is load-bearing: it is the
///   only thing guaranteeing that independent simulators which receive the
///   same events in any arrival order converge to the same state.
pub trait Game {
    type State: FrameState + Clone + Serialize + DeserializeOwned + Send + 'static;
    type Input: Clone + Serialize + DeserializeOwned + Send + 'static;

    /// Produces the seed state at frame 0.
    fn init(&self) -> Self::State;

    /// Derives the state of the next frame from a state and the sorted
    /// events of its frame.
    fn update(&self, state: &Self::State, events: &[Event<Self::Input>]) -> Self::State;

    /// Total order over events sharing a frame.
    fn compare_events(&self, a: &Event<Self::Input>, b: &Event<Self::Input>) -> Ordering;
}
