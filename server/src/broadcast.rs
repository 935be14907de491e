//! The authoritative broadcaster and its per-connection handles.
//!
//! One `NetworkServer` owns one simulator and fans events between
//! connections: an input from one peer is inserted into the authoritative
//! timeline at the frame the peer labeled it with and rebroadcast verbatim
//! to every other peer, which replays it onto the same frame. The
//! broadcaster also tracks each connection's acknowledged frame to compute
//! the stable frame, the watermark below which no connected peer will ever
//! again need history and pruning is safe.

use log::{debug, info, warn};
use shared::canonical::state_hash;
use shared::game::{Event, Game};
use shared::protocol::{Message, Messenger};
use shared::simulator::Simulator;
use shared::{ClientId, Frame};

/// What became of a connection after handling one of its messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Open,
    Closed,
}

/// One connected peer: identifier, acknowledged frame, transport handle.
struct RemoteClient<M> {
    id: ClientId,
    /// Frame this connection last reported via a sync probe. Everything
    /// below the minimum of these across connections can be pruned.
    last_frame: Frame,
    messenger: M,
}

/// Authoritative timeline plus the roster of connections synchronized to it.
pub struct NetworkServer<G: Game, M: Messenger<G::State, G::Input>> {
    simulator: Simulator<G>,
    clients: Vec<RemoteClient<M>>,
    stable_frame: Frame,
    next_client_id: ClientId,
}

impl<G: Game, M: Messenger<G::State, G::Input>> NetworkServer<G, M> {
    pub fn new(game: G) -> Self {
        NetworkServer {
            simulator: Simulator::new(game),
            clients: Vec::new(),
            stable_frame: 0,
            next_client_id: 1,
        }
    }

    pub fn simulator(&self) -> &Simulator<G> {
        &self.simulator
    }

    pub fn stable_frame(&self) -> Frame {
        self.stable_frame
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.iter().map(|c| c.id).collect()
    }

    /// Advances the authoritative timeline one frame. Driven by the owner's
    /// fixed tick, independent of any connection activity.
    pub fn tick(&mut self) {
        self.simulator.advance_to_next_moment();
    }

    /// Registers a new connection and onboards it.
    ///
    /// The joining peer receives the oldest retained state, every
    /// outstanding event (its own connect included), and the current frame,
    /// enough to reconstruct identical history by resetting and
    /// fast-forwarding. Everyone else just gets the connect event.
    pub fn create_client(&mut self, mut messenger: M) -> ClientId {
        let id = self.next_client_id;
        self.next_client_id += 1;

        let current_frame = self.simulator.current_frame();
        self.simulator.push_event(Event::Connect { client_id: id });
        self.broadcast(Message::Connect {
            client_id: id,
            frame: current_frame,
        });

        let initialize = Message::Initialize {
            client_id: id,
            state: self.simulator.oldest_state().clone(),
            events: self.simulator.get_events(),
            current_frame,
        };
        if messenger.send(initialize).is_err() {
            warn!("Failed to send initialize to client {}", id);
        }

        self.clients.push(RemoteClient {
            id,
            last_frame: self.simulator.oldest_frame(),
            messenger,
        });
        info!("Client {} connected at frame {}", id, current_frame);
        id
    }

    /// Removes a connection, informing the timeline and every remaining
    /// peer. Returns false if the client was already gone.
    pub fn remove_client(&mut self, id: ClientId) -> bool {
        let Some(index) = self.clients.iter().position(|c| c.id == id) else {
            return false;
        };
        self.clients.remove(index);

        let frame = self.simulator.current_frame();
        self.simulator.push_event(Event::Disconnect { client_id: id });
        self.broadcast(Message::Disconnect {
            client_id: id,
            frame,
        });
        // A departed peer no longer holds the watermark back.
        self.recalculate_stable_frame();

        info!("Client {} disconnected", id);
        if self.clients.is_empty() {
            info!("Session is now empty");
        }
        true
    }

    /// Stable frame = minimum of every connection's acknowledged frame and
    /// the server's own current frame. History below it is pruned
    /// immediately; no connected peer can ever ask for it again.
    pub fn recalculate_stable_frame(&mut self) {
        let mut stable = self.simulator.current_frame();
        for client in &self.clients {
            stable = stable.min(client.last_frame);
        }
        self.stable_frame = stable;
        self.simulator.forget_moments_before(stable);
    }

    /// Handles one inbound message from the given connection.
    ///
    /// A non-probe message carrying a prehistoric frame is a protocol
    /// violation: tolerating it could later require access to discarded
    /// history, so the offending connection is force-closed. Sibling
    /// connections are unaffected.
    pub fn handle_message(
        &mut self,
        id: ClientId,
        message: Message<G::State, G::Input>,
    ) -> ConnectionStatus {
        if let Some(frame) = message.event_frame() {
            if self.simulator.is_frame_prehistoric(frame) {
                warn!(
                    "Client {} sent a message for prehistoric frame {} (oldest is {})",
                    id,
                    frame,
                    self.simulator.oldest_frame()
                );
                self.force_close(id);
                return ConnectionStatus::Closed;
            }
        }

        match message {
            Message::Syn { frame } => {
                self.handle_syn(id, frame);
                ConnectionStatus::Open
            }
            Message::GameInput { frame, input, .. } => self.handle_game_input(id, frame, input),
            Message::Disconnect { .. } => {
                self.remove_client(id);
                ConnectionStatus::Closed
            }
            Message::Debug { content } => {
                debug!("Client {} debug report: {}", id, content);
                ConnectionStatus::Open
            }
            _ => {
                debug!("Ignoring unrecognized message type from client {}", id);
                ConnectionStatus::Open
            }
        }
    }

    /// Clock probe: record the connection's progress, move the watermark,
    /// and reply with the server clock plus a canonical hash of the stable
    /// state so the client can detect a desync.
    fn handle_syn(&mut self, id: ClientId, frame: Frame) {
        if let Some(client) = self.clients.iter_mut().find(|c| c.id == id) {
            client.last_frame = frame;
        }
        self.recalculate_stable_frame();

        let stable_frame = self.stable_frame;
        let stable_state_hash = self
            .simulator
            .moment(stable_frame)
            .and_then(|moment| state_hash(&moment.state).ok());
        let ack = Message::Ack {
            oframe: frame,
            nframe: self.simulator.current_frame(),
            stable_frame,
            stable_state_hash,
        };
        self.send_to(id, ack);
    }

    /// Player input: insert into the authoritative timeline tagged with the
    /// connection's identifier (never the one claimed in the message) and
    /// rebroadcast to everyone except the sender, which already applied it
    /// locally.
    fn handle_game_input(
        &mut self,
        id: ClientId,
        frame: Frame,
        input: G::Input,
    ) -> ConnectionStatus {
        let event = Event::Input {
            client_id: id,
            input: input.clone(),
        };
        if let Err(e) = self.simulator.insert_event(frame, event) {
            warn!("Rejecting input from client {}: {}", id, e);
            self.force_close(id);
            return ConnectionStatus::Closed;
        }

        self.broadcast_except(
            id,
            Message::GameInput {
                client_id: id,
                frame,
                input,
            },
        );
        ConnectionStatus::Open
    }

    fn force_close(&mut self, id: ClientId) {
        if let Some(client) = self.clients.iter_mut().find(|c| c.id == id) {
            client.messenger.close();
        }
        self.remove_client(id);
    }

    fn send_to(&mut self, id: ClientId, message: Message<G::State, G::Input>) {
        if let Some(client) = self.clients.iter_mut().find(|c| c.id == id) {
            if client.messenger.send(message).is_err() {
                warn!("Failed to send to client {}", id);
            }
        }
    }

    fn broadcast(&mut self, message: Message<G::State, G::Input>)
    where
        Message<G::State, G::Input>: Clone,
    {
        for client in &mut self.clients {
            if client.messenger.send(message.clone()).is_err() {
                warn!("Failed to broadcast to client {}", client.id);
            }
        }
    }

    fn broadcast_except(&mut self, skip: ClientId, message: Message<G::State, G::Input>)
    where
        Message<G::State, G::Input>: Clone,
    {
        for client in &mut self.clients {
            if client.id == skip {
                continue;
            }
            if client.messenger.send(message.clone()).is_err() {
                warn!("Failed to broadcast to client {}", client.id);
            }
        }
    }
}
