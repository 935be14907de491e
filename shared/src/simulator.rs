//! Frame-indexed timeline: history buffer, future-event queue, replay.
//!
//! The simulator is the single source of truth for one simulation's history.
//! It holds a list of moments, newest first, where each moment pairs a state
//! with the events that occurred in that state's frame. The next state is
//! always derived from the previous moment's state and events, so inserting
//! an event into remembered history re-derives every later state. This is
//! how a late-arriving input retroactively changes an already-advanced
//! present without breaking determinism.
//!
//! Vocabulary:
//! - moment: a state and the events that happen in a specific frame.
//! - frame: an incrementing number identifying a moment in time.
//! - prehistoric moment: a moment too old to remember (it was disposed).

use crate::canonical::canonical_json;
use crate::game::{Event, FrameEvent, FrameState, Game};
use crate::Frame;
use log::debug;
use std::cmp::Ordering;
use std::collections::VecDeque;
use thiserror::Error;

/// Recoverable timeline failures.
///
/// Invariant violations (a step function not advancing the frame by exactly
/// one, internal index inconsistency) are not represented here: those are
/// bugs and panic, aborting the owning session. This type covers the
/// conditions a caller is expected to react to, such as dropping the
/// connection that sent an impossibly old event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimulationError {
    #[error("frame {frame} is prehistoric: the oldest remembered frame is {oldest}")]
    PrehistoricFrame { frame: Frame, oldest: Frame },
}

/// A state and the sorted events applied to it to derive the next state.
#[derive(Debug, Clone)]
pub struct Moment<S, I> {
    pub state: S,
    pub events: Vec<Event<I>>,
}

/// Simulates a game and holds a bounded history of previous moments and
/// their inputs, plus a queue of events destined for frames not yet reached.
pub struct Simulator<G: Game> {
    game: G,
    /// Remembered history, newest first. Always holds at least one moment,
    /// and successive frames are contiguous.
    moments: VecDeque<Moment<G::State, G::Input>>,
    /// Events for frames beyond the current one, ordered by target frame.
    future_events: Vec<FrameEvent<G::Input>>,
    /// History bound; `None` disables retention-based pruning.
    max_remembered_moments: Option<usize>,
}

impl<G: Game> Simulator<G> {
    /// Creates a simulator seeded from `game.init()` with unbounded history.
    pub fn new(game: G) -> Self {
        let initial = game.init();
        assert_eq!(initial.frame(), 0, "initial state must start at frame 0");
        Simulator {
            game,
            moments: VecDeque::from([Moment {
                state: initial,
                events: Vec::new(),
            }]),
            future_events: Vec::new(),
            max_remembered_moments: None,
        }
    }

    /// Caps how many moments are remembered; older ones are disposed as the
    /// simulation advances. `None` disables the cap.
    pub fn set_max_remembered_moments(&mut self, limit: Option<usize>) {
        self.max_remembered_moments = limit.map(|l| l.max(1));
    }

    /// Increments the game one frame.
    ///
    /// The latest state and events produce a new moment, then any queued
    /// future events destined for the new frame are moved into it in
    /// comparator order. If a history bound is set, moments beyond it are
    /// exported to the debug log and disposed.
    pub fn advance_to_next_moment(&mut self) {
        let new_state = self.next_state_from_moment(self.current_moment());
        let new_frame = new_state.frame();
        self.moments.push_front(Moment {
            state: new_state,
            events: Vec::new(),
        });

        while self
            .future_events
            .first()
            .is_some_and(|fe| fe.frame == new_frame)
        {
            let due = self.future_events.remove(0);
            let moment = self.moments.front_mut().expect("history is never empty");
            add_sorted(&mut moment.events, due.event, |a, b| {
                self.game.compare_events(a, b)
            });
        }

        if let Some(limit) = self.max_remembered_moments {
            while self.moments.len() > limit {
                let dropped = self.moments.pop_back().expect("history is never empty");
                export_dropped_moment(&dropped);
            }
        }
    }

    /// Keeps advancing until the current frame equals `frame` exactly.
    ///
    /// Used both to catch a newly joined peer up to the present and to apply
    /// a burst of already-known future events.
    pub fn fast_forward(&mut self, frame: Frame) {
        debug!(
            "Fast-forwarding from frame {} to {}",
            self.current_frame(),
            frame
        );
        while self.current_frame() < frame {
            self.advance_to_next_moment();
        }
    }

    /// Inserts `event` into the current frame, taking effect next advance.
    pub fn push_event(&mut self, event: Event<G::Input>) {
        let frame = self.current_frame();
        self.insert_event(frame, event)
            .expect("the current frame is never prehistoric");
    }

    /// Adds the specified event into the specified frame.
    ///
    /// If the frame is in the future the event is queued until that frame is
    /// reached. If the frame is in remembered history the event is inserted
    /// into its moment in comparator order and every later state is
    /// re-simulated. A prehistoric frame yields an error and leaves the
    /// timeline untouched; the caller decides what to do with the peer that
    /// sent it.
    pub fn insert_event(
        &mut self,
        frame: Frame,
        event: Event<G::Input>,
    ) -> Result<(), SimulationError> {
        if frame > self.current_frame() {
            let index = self
                .future_events
                .iter()
                .position(|fe| frame < fe.frame)
                .unwrap_or(self.future_events.len());
            self.future_events.insert(index, FrameEvent { frame, event });
            return Ok(());
        }

        if self.is_frame_prehistoric(frame) {
            return Err(SimulationError::PrehistoricFrame {
                frame,
                oldest: self.oldest_frame(),
            });
        }

        let moment = self
            .moment_mut(frame)
            .expect("non-prehistoric past frame is remembered");
        let mut events = std::mem::take(&mut moment.events);
        add_sorted(&mut events, event, |a, b| self.game.compare_events(a, b));
        self.moment_mut(frame)
            .expect("non-prehistoric past frame is remembered")
            .events = events;
        self.recalculate_states(frame);
        Ok(())
    }

    /// Disposes all moments before `frame`, always preserving at least the
    /// current one. Afterwards every earlier frame is prehistoric. This is
    /// irreversible.
    pub fn forget_moments_before(&mut self, frame: Frame) {
        while self.moments.len() > 1
            && self
                .moments
                .back()
                .is_some_and(|m| m.state.frame() < frame)
        {
            self.moments.pop_back();
        }
    }

    /// Replaces the entire history with a single seed moment at `state`,
    /// then re-inserts the given frame-tagged events.
    ///
    /// Use together with [`Self::fast_forward`] to also simulate the events.
    /// An event older than the seed state's frame is an error: the snapshot
    /// cannot represent it.
    pub fn reset_state(
        &mut self,
        state: G::State,
        future_events: Vec<FrameEvent<G::Input>>,
    ) -> Result<(), SimulationError> {
        debug!(
            "Resetting state to frame {} with {} pending events",
            state.frame(),
            future_events.len()
        );
        self.moments.clear();
        self.moments.push_front(Moment {
            state,
            events: Vec::new(),
        });
        self.future_events.clear();

        for fe in future_events {
            self.insert_event(fe.frame, fe.event)?;
        }
        Ok(())
    }

    /// Flattens all remembered events plus the future-event queue into one
    /// frame-tagged sequence, oldest first.
    ///
    /// Together with the oldest state this is enough for a fresh peer to
    /// reconstruct identical history via [`Self::reset_state`].
    pub fn get_events(&self) -> Vec<FrameEvent<G::Input>> {
        let mut events = Vec::new();
        for moment in self.moments.iter().rev() {
            let frame = moment.state.frame();
            for event in &moment.events {
                events.push(FrameEvent {
                    frame,
                    event: event.clone(),
                });
            }
        }
        events.extend(self.future_events.iter().cloned());
        events
    }

    /// Returns whether the frame is before remembered history.
    pub fn is_frame_prehistoric(&self, frame: Frame) -> bool {
        frame < self.oldest_frame()
    }

    /// The moment at `frame`, or `None` when it is in the future or already
    /// disposed.
    pub fn moment(&self, frame: Frame) -> Option<&Moment<G::State, G::Input>> {
        let index = self.current_frame().checked_sub(frame)? as usize;
        self.moments.get(index)
    }

    pub fn current_moment(&self) -> &Moment<G::State, G::Input> {
        self.moments.front().expect("history is never empty")
    }

    pub fn current_state(&self) -> &G::State {
        &self.current_moment().state
    }

    pub fn current_frame(&self) -> Frame {
        self.current_state().frame()
    }

    pub fn oldest_state(&self) -> &G::State {
        &self.moments.back().expect("history is never empty").state
    }

    pub fn oldest_frame(&self) -> Frame {
        self.oldest_state().frame()
    }

    /// Number of remembered moments.
    pub fn remembered_moments(&self) -> usize {
        self.moments.len()
    }

    /// Events queued beyond the current frame.
    pub fn pending_future_events(&self) -> usize {
        self.future_events.len()
    }

    fn moment_mut(&mut self, frame: Frame) -> Option<&mut Moment<G::State, G::Input>> {
        let index = self.current_frame().checked_sub(frame)? as usize;
        self.moments.get_mut(index)
    }

    /// Derives the next state and enforces the frame-advance invariant.
    fn next_state_from_moment(&self, moment: &Moment<G::State, G::Input>) -> G::State {
        let new_state = self.game.update(&moment.state, &moment.events);
        assert_eq!(
            new_state.frame(),
            moment.state.frame() + 1,
            "step function must advance the frame by exactly 1"
        );
        new_state
    }

    /// Recomputes every state after `from_frame` by reapplying the step
    /// function frame by frame up to the current frame.
    fn recalculate_states(&mut self, from_frame: Frame) {
        let now = self.current_frame();
        for frame in from_frame..now {
            let moment = self
                .moment(frame)
                .expect("replay range lies in remembered history");
            let new_state = self.next_state_from_moment(moment);
            self.moment_mut(frame + 1)
                .expect("replay range lies in remembered history")
                .state = new_state;
        }
    }
}

/// Inserts `item` before the first element it does not rank after,
/// preserving the relative order of equal elements already present.
fn add_sorted<T, F>(items: &mut Vec<T>, item: T, mut compare: F)
where
    F: FnMut(&T, &T) -> Ordering,
{
    let index = items
        .iter()
        .position(|existing| compare(&item, existing) != Ordering::Greater)
        .unwrap_or(items.len());
    items.insert(index, item);
}

/// Writes a disposed moment to the debug log in canonical form so a
/// desynced run can be reconstructed from two processes' logs.
fn export_dropped_moment<S: serde::Serialize + FrameState, I: serde::Serialize>(
    moment: &Moment<S, I>,
) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let frame = moment.state.frame();
    if let Ok(json) = canonical_json(&moment.state) {
        debug!("!STATE: {} {}", frame, json);
    }
    for event in &moment.events {
        if let Ok(json) = canonical_json(event) {
            debug!("!EVENT: {} {}", frame, json);
        }
    }
}
