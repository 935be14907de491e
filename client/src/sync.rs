//! The predictive synchronizer driving a local simulator.
//!
//! The synchronizer keeps a local [`Simulator`] advancing at the nominal
//! tick rate while staying loosely synchronized with the remote
//! authoritative simulator. Local input is applied immediately at the
//! current local frame (client-side prediction) and simultaneously sent to
//! the server tagged with that same frame, so every remote replay lands on
//! the same moment.
//!
//! Clock drift is corrected from the server's probe replies: a small drift
//! stretches or shrinks the tick interval over a smoothing window so the
//! player sees no jump; falling a whole second behind triggers an immediate
//! fast-forward instead (the backgrounded-tab case).

use log::{debug, info, warn};
use shared::canonical::state_hash;
use shared::game::{Event, Game};
use shared::protocol::{Message, Messenger, MessengerError};
use shared::simulator::{SimulationError, Simulator};
use shared::{ClientId, Frame};
use std::time::Duration;
use thiserror::Error;

/// How many ticks a drift correction is spread over.
const SMOOTHING_WINDOW_TICKS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Waiting for the server's initialize message.
    Initializing,
    /// Ticking and exchanging events.
    Active,
}

/// Failures the driving loop must react to by tearing the session down.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("received a message for prehistoric frame {frame} while active")]
    PrehistoricMessage { frame: Frame },
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Messenger(#[from] MessengerError),
}

pub struct NetworkClient<G: Game, M: Messenger<G::State, G::Input>> {
    simulator: Simulator<G>,
    messenger: M,
    status: Status,
    client_id: Option<ClientId>,
    tick_rate: u32,
    nominal_interval_ms: f64,
    /// Per-tick interval adjustment in milliseconds, negative to speed up.
    latency_adjust_ms: f64,
    /// Remaining ticks over which the adjustment applies.
    adjust_ticks_left: u32,
    /// Last measured round trip, for diagnostics.
    round_trip_ms: f64,
}

impl<G: Game, M: Messenger<G::State, G::Input>> NetworkClient<G, M> {
    pub fn new(game: G, messenger: M, tick_rate: u32) -> Self {
        assert!(tick_rate > 0, "tick rate must be positive");
        NetworkClient {
            simulator: Simulator::new(game),
            messenger,
            status: Status::Initializing,
            client_id: None,
            tick_rate,
            nominal_interval_ms: 1000.0 / tick_rate as f64,
            latency_adjust_ms: 0.0,
            adjust_ticks_left: 0,
            round_trip_ms: 0.0,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn simulator(&self) -> &Simulator<G> {
        &self.simulator
    }

    pub fn nominal_interval(&self) -> Duration {
        Duration::from_secs_f64(self.nominal_interval_ms / 1000.0)
    }

    /// Last measured round trip to the server in milliseconds.
    pub fn round_trip_ms(&self) -> f64 {
        self.round_trip_ms
    }

    #[cfg(test)]
    fn latency_adjust_ms(&self) -> f64 {
        self.latency_adjust_ms
    }

    /// Handles one inbound message. An error means the session is beyond
    /// repair and the caller must stop driving this synchronizer.
    pub fn handle_message(&mut self, message: Message<G::State, G::Input>) -> Result<(), ClientError> {
        if let Some(frame) = message.event_frame() {
            if self.simulator.is_frame_prehistoric(frame) {
                // Stale messages can trickle in while a connection is being
                // torn down or before initialization; those are skipped. In
                // the active state this must never happen, so the server is
                // given both sides of the story before the session dies.
                if self.status == Status::Active {
                    let report = format!(
                        "prehistoric message for frame {} (local history {}..={})",
                        frame,
                        self.simulator.oldest_frame(),
                        self.simulator.current_frame()
                    );
                    let _ = self.messenger.send(Message::Debug { content: report });
                    return Err(ClientError::PrehistoricMessage { frame });
                }
                return Ok(());
            }
        }

        match message {
            Message::Initialize {
                client_id,
                state,
                events,
                current_frame,
            } => {
                self.client_id = Some(client_id);
                self.apply_snapshot(state, events, current_frame)?;
                info!("Initialized as client {}", client_id);
                Ok(())
            }
            Message::Reset {
                state,
                events,
                current_frame,
            } => {
                debug!("Resetting to server snapshot at frame {}", current_frame);
                self.apply_snapshot(state, events, current_frame)
            }
            Message::Ack {
                oframe,
                nframe,
                stable_frame,
                stable_state_hash,
            } if self.is_active() => {
                self.handle_ack(oframe, nframe, stable_frame, stable_state_hash);
                Ok(())
            }
            Message::Connect { client_id, frame } => {
                self.insert_if_active(frame, Event::Connect { client_id })
            }
            Message::Disconnect { client_id, frame } => {
                self.insert_if_active(frame, Event::Disconnect { client_id })
            }
            Message::GameInput {
                client_id,
                frame,
                input,
            } => self.insert_if_active(frame, Event::Input { client_id, input }),
            Message::Ack { .. } => Ok(()),
            other => {
                warn!("Ignoring unrecognized message: {}", message_kind(&other));
                Ok(())
            }
        }
    }

    /// Applies local input with zero latency and forwards it to the server
    /// tagged with the same frame.
    pub fn game_input(&mut self, input: G::Input) -> Result<(), ClientError> {
        let Some(client_id) = self.client_id else {
            warn!("Dropping local input: not initialized yet");
            return Ok(());
        };
        let frame = self.simulator.current_frame();
        self.simulator.insert_event(
            frame,
            Event::Input {
                client_id,
                input: input.clone(),
            },
        )?;
        self.messenger.send(Message::GameInput {
            client_id,
            frame,
            input,
        })?;
        Ok(())
    }

    /// Sends the periodic clock probe.
    pub fn sync_probe(&mut self) -> Result<(), ClientError> {
        let frame = self.simulator.current_frame();
        self.messenger.send(Message::Syn { frame })?;
        Ok(())
    }

    /// Advances one frame and returns how long to wait before the next
    /// tick, nominal interval plus the current drift adjustment.
    pub fn tick(&mut self) -> Duration {
        if self.adjust_ticks_left > 0 {
            self.adjust_ticks_left -= 1;
            if self.adjust_ticks_left == 0 {
                self.latency_adjust_ms = 0.0;
            }
        }
        let interval_ms = (self.nominal_interval_ms + self.latency_adjust_ms).max(0.0);
        self.simulator.advance_to_next_moment();
        Duration::from_secs_f64(interval_ms / 1000.0)
    }

    fn apply_snapshot(
        &mut self,
        state: G::State,
        events: Vec<shared::game::FrameEvent<G::Input>>,
        current_frame: Frame,
    ) -> Result<(), ClientError> {
        self.simulator.reset_state(state, events)?;
        self.simulator.fast_forward(current_frame);
        self.status = Status::Active;
        self.latency_adjust_ms = 0.0;
        self.adjust_ticks_left = 0;
        Ok(())
    }

    fn insert_if_active(
        &mut self,
        frame: Frame,
        event: Event<G::Input>,
    ) -> Result<(), ClientError> {
        if !self.is_active() {
            debug!("Skipping event for frame {} before initialization", frame);
            return Ok(());
        }
        self.simulator.insert_event(frame, event)?;
        Ok(())
    }

    fn handle_ack(
        &mut self,
        oframe: Frame,
        nframe: Frame,
        stable_frame: Frame,
        stable_state_hash: Option<String>,
    ) {
        let now = self.simulator.current_frame();
        let round_trip = now.saturating_sub(oframe) as f64;
        // The server-equivalent local frame assumes symmetric latency.
        let estimated_local = oframe as f64 + round_trip * 0.5;
        let frames_difference = estimated_local - nframe as f64;

        self.simulator.forget_moments_before(stable_frame);
        self.check_stable_hash(stable_frame, stable_state_hash);

        if -frames_difference >= self.tick_rate as f64 {
            // A whole second behind the server. Smoothing would take too
            // long, and the frames skipped here were never drawn anyway.
            info!(
                "Client too far behind server ({:.0} frames); fast-forwarding to frame {}",
                -frames_difference, nframe
            );
            self.simulator.fast_forward(nframe);
            self.latency_adjust_ms = 0.0;
            self.adjust_ticks_left = 0;
        } else {
            self.adjust_ticks_left = SMOOTHING_WINDOW_TICKS;
            let new_adjust = self.to_ms(frames_difference) / SMOOTHING_WINDOW_TICKS as f64;
            self.latency_adjust_ms = self.latency_adjust_ms * 0.5 + new_adjust * 0.5;
            self.round_trip_ms = self.to_ms(round_trip);
        }
    }

    /// Compares the server's canonical hash of the stable state against the
    /// locally derived one. A mismatch means the two simulations diverged;
    /// it is reported but not repaired.
    fn check_stable_hash(&self, stable_frame: Frame, stable_state_hash: Option<String>) {
        let Some(server_hash) = stable_state_hash else {
            return;
        };
        let Some(moment) = self.simulator.moment(stable_frame) else {
            debug!(
                "Stable frame {} not remembered locally; skipping hash check",
                stable_frame
            );
            return;
        };
        match state_hash(&moment.state) {
            Ok(local_hash) if local_hash != server_hash => {
                warn!(
                    "Out of sync with server at stable frame {} (local {}, server {})",
                    stable_frame, local_hash, server_hash
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to hash local stable state: {}", e),
        }
    }

    fn to_ms(&self, frames: f64) -> f64 {
        frames * (1000.0 / self.tick_rate as f64)
    }
}

fn message_kind<S, I>(message: &Message<S, I>) -> &'static str {
    match message {
        Message::Initialize { .. } => "initialize",
        Message::Reset { .. } => "reset",
        Message::Syn { .. } => "syn",
        Message::Ack { .. } => "ack",
        Message::Connect { .. } => "connect",
        Message::Disconnect { .. } => "disconnect",
        Message::GameInput { .. } => "game-input",
        Message::Debug { .. } => "debug",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::game::FrameEvent;
    use shared::grid::{Direction, GridGame, GridState};
    use std::collections::BTreeMap;
    use tokio::sync::mpsc::UnboundedReceiver;

    type TestClient = NetworkClient<GridGame, shared::protocol::ChannelMessenger<GridState, Direction>>;
    type Outbound = UnboundedReceiver<Message<GridState, Direction>>;

    const TICK_RATE: u32 = 30;

    fn test_client() -> (TestClient, Outbound) {
        let (messenger, rx) = shared::protocol::ChannelMessenger::channel();
        (NetworkClient::new(GridGame, messenger, TICK_RATE), rx)
    }

    fn initialize_at(client: &mut TestClient, client_id: ClientId, current_frame: Frame) {
        let state = GridState {
            frame: 0,
            players: BTreeMap::new(),
        };
        let events = vec![FrameEvent {
            frame: 0,
            event: Event::Connect { client_id },
        }];
        client
            .handle_message(Message::Initialize {
                client_id,
                state,
                events,
                current_frame,
            })
            .unwrap();
    }

    #[test]
    fn starts_initializing() {
        let (client, _rx) = test_client();
        assert_eq!(client.status(), Status::Initializing);
        assert_eq!(client.client_id(), None);
    }

    #[test]
    fn initialize_adopts_id_and_fast_forwards() {
        let (mut client, _rx) = test_client();
        initialize_at(&mut client, 7, 20);

        assert!(client.is_active());
        assert_eq!(client.client_id(), Some(7));
        assert_eq!(client.simulator().current_frame(), 20);
        // The connect event from the snapshot replayed into the roster.
        assert!(client.simulator().current_state().players.contains_key(&7));
    }

    #[test]
    fn reset_keeps_identity() {
        let (mut client, _rx) = test_client();
        initialize_at(&mut client, 7, 10);

        let state = GridState {
            frame: 30,
            players: BTreeMap::new(),
        };
        client
            .handle_message(Message::Reset {
                state,
                events: Vec::new(),
                current_frame: 35,
            })
            .unwrap();

        assert_eq!(client.client_id(), Some(7));
        assert_eq!(client.simulator().current_frame(), 35);
    }

    #[test]
    fn events_before_initialization_are_skipped() {
        let (mut client, _rx) = test_client();
        client
            .handle_message(Message::Connect {
                client_id: 3,
                frame: 5,
            })
            .unwrap();
        assert_eq!(client.simulator().pending_future_events(), 0);
    }

    #[test]
    fn game_input_predicts_locally_and_transmits_same_frame() {
        let (mut client, mut rx) = test_client();
        initialize_at(&mut client, 7, 20);

        client.game_input(Direction::Right).unwrap();

        let frame = client.simulator().current_frame();
        assert_eq!(frame, 20);
        assert_eq!(client.simulator().current_moment().events.len(), 1);

        let sent = rx.try_recv().unwrap();
        assert_eq!(
            sent,
            Message::GameInput {
                client_id: 7,
                frame: 20,
                input: Direction::Right,
            }
        );
    }

    #[test]
    fn game_input_before_initialize_is_dropped() {
        let (mut client, mut rx) = test_client();
        client.game_input(Direction::Up).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sync_probe_reports_current_frame() {
        let (mut client, mut rx) = test_client();
        initialize_at(&mut client, 1, 12);

        client.sync_probe().unwrap();
        assert_eq!(rx.try_recv().unwrap(), Message::Syn { frame: 12 });
    }

    #[test]
    fn remote_input_inserted_at_tagged_frame() {
        let (mut client, _rx) = test_client();
        initialize_at(&mut client, 1, 10);

        client
            .handle_message(Message::GameInput {
                client_id: 2,
                frame: 15,
                input: Direction::Down,
            })
            .unwrap();
        assert_eq!(client.simulator().pending_future_events(), 1);
    }

    #[test]
    fn ack_soft_corrects_with_blended_adjustment() {
        let (mut client, _rx) = test_client();
        initialize_at(&mut client, 1, 100);

        // Probe echoed at our current frame, server 10 frames ahead.
        client
            .handle_message(Message::Ack {
                oframe: 100,
                nframe: 110,
                stable_frame: 0,
                stable_state_hash: None,
            })
            .unwrap();

        // Blend of the previous adjustment (0) and -10 frames over 30 ticks.
        let expected = 0.5 * (-10.0 * (1000.0 / TICK_RATE as f64) / 30.0);
        assert_approx_eq!(client.latency_adjust_ms(), expected, 1e-9);
        assert_eq!(client.simulator().current_frame(), 100);

        // A faster tick follows until the window drains.
        let interval = client.tick();
        assert!(interval < client.nominal_interval());
    }

    #[test]
    fn ack_adjustment_expires_after_window() {
        let (mut client, _rx) = test_client();
        initialize_at(&mut client, 1, 50);

        client
            .handle_message(Message::Ack {
                oframe: 50,
                nframe: 55,
                stable_frame: 0,
                stable_state_hash: None,
            })
            .unwrap();
        assert!(client.latency_adjust_ms() != 0.0);

        for _ in 0..SMOOTHING_WINDOW_TICKS {
            client.tick();
        }
        assert_eq!(client.latency_adjust_ms(), 0.0);
        assert_eq!(client.tick(), client.nominal_interval());
    }

    #[test]
    fn ack_hard_corrects_when_a_second_behind() {
        let (mut client, _rx) = test_client();
        initialize_at(&mut client, 1, 100);

        client
            .handle_message(Message::Ack {
                oframe: 100,
                nframe: 140,
                stable_frame: 0,
                stable_state_hash: None,
            })
            .unwrap();

        assert_eq!(client.simulator().current_frame(), 140);
        assert_eq!(client.latency_adjust_ms(), 0.0);
    }

    #[test]
    fn ack_prunes_history_to_stable_frame() {
        let (mut client, _rx) = test_client();
        initialize_at(&mut client, 1, 40);

        client
            .handle_message(Message::Ack {
                oframe: 40,
                nframe: 40,
                stable_frame: 25,
                stable_state_hash: None,
            })
            .unwrap();

        assert_eq!(client.simulator().oldest_frame(), 25);
    }

    #[test]
    fn ack_with_matching_hash_is_quiet() {
        let (mut client, _rx) = test_client();
        initialize_at(&mut client, 1, 10);

        let stable_state = &client.simulator().moment(5).unwrap().state;
        let hash = state_hash(stable_state).unwrap();

        client
            .handle_message(Message::Ack {
                oframe: 10,
                nframe: 10,
                stable_frame: 5,
                stable_state_hash: Some(hash),
            })
            .unwrap();
        assert_eq!(client.simulator().oldest_frame(), 5);
    }

    #[test]
    fn prehistoric_message_while_active_fails_and_reports() {
        let (mut client, mut rx) = test_client();
        initialize_at(&mut client, 1, 50);
        client
            .handle_message(Message::Ack {
                oframe: 50,
                nframe: 50,
                stable_frame: 30,
                stable_state_hash: None,
            })
            .unwrap();

        let result = client.handle_message(Message::GameInput {
            client_id: 2,
            frame: 10,
            input: Direction::Up,
        });

        assert!(matches!(
            result,
            Err(ClientError::PrehistoricMessage { frame: 10 })
        ));
        let report = rx.try_recv().unwrap();
        assert!(matches!(report, Message::Debug { .. }));
    }

    #[test]
    fn tick_advances_one_frame() {
        let (mut client, _rx) = test_client();
        initialize_at(&mut client, 1, 5);
        client.tick();
        assert_eq!(client.simulator().current_frame(), 6);
    }
}
