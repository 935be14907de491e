//! Wire messages and the messenger abstraction.
//!
//! The messenger is the system's only view of the transport: something that
//! can send a [`Message`] and be closed. The binaries back it with UDP and
//! bincode; tests back it with in-process channels. Inbound delivery is the
//! driver's job: it reads from whatever the transport is and feeds each
//! message to the synchronizer or broadcaster, so all simulation mutation
//! stays on one logical thread.

use crate::game::FrameEvent;
use crate::{ClientId, Frame};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Everything exchanged between a client and the server.
///
/// `S` is the game's state type and `I` its input payload. Event-carrying
/// messages tag the frame the event targets, so every peer replays it onto
/// the same moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message<S, I> {
    /// Onboards a new connection with enough history to replay.
    Initialize {
        client_id: ClientId,
        state: S,
        events: Vec<FrameEvent<I>>,
        current_frame: Frame,
    },
    /// Forces a full resynchronization from an authoritative snapshot.
    Reset {
        state: S,
        events: Vec<FrameEvent<I>>,
        current_frame: Frame,
    },
    /// Clock probe carrying the client's current frame.
    Syn { frame: Frame },
    /// Probe reply: the echoed probe frame, the server's current frame, and
    /// the prune watermark with an optional canonical hash of its state.
    Ack {
        oframe: Frame,
        nframe: Frame,
        stable_frame: Frame,
        stable_state_hash: Option<String>,
    },
    /// Roster change, target-frame tagged.
    Connect { client_id: ClientId, frame: Frame },
    /// Roster change, target-frame tagged.
    Disconnect { client_id: ClientId, frame: Frame },
    /// Player input, target-frame tagged.
    GameInput {
        client_id: ClientId,
        frame: Frame,
        input: I,
    },
    /// Out-of-band diagnostics, non-authoritative.
    Debug { content: String },
}

impl<S, I> Message<S, I> {
    /// The frame an event-carrying message targets. `Syn` is deliberately
    /// excluded: probes report clock position and are exempt from the
    /// prehistoric guard.
    pub fn event_frame(&self) -> Option<Frame> {
        match self {
            Message::Connect { frame, .. }
            | Message::Disconnect { frame, .. }
            | Message::GameInput { frame, .. } => Some(*frame),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessengerError {
    #[error("the peer channel is closed")]
    Closed,
}

/// Bidirectional message channel to one peer, reduced to its sending half.
pub trait Messenger<S, I> {
    fn send(&mut self, message: Message<S, I>) -> Result<(), MessengerError>;
    fn close(&mut self);
}

/// In-process messenger over a tokio channel.
///
/// The server binary gives every connection one of these and forwards the
/// receiving half to the UDP socket; tests read the receiving half directly.
#[derive(Debug)]
pub struct ChannelMessenger<S, I> {
    tx: mpsc::UnboundedSender<Message<S, I>>,
    open: bool,
}

impl<S, I> ChannelMessenger<S, I> {
    /// Creates a connected messenger pair: the sending side and the stream
    /// of messages it produces.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message<S, I>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelMessenger { tx, open: true }, rx)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl<S, I> Clone for ChannelMessenger<S, I> {
    fn clone(&self) -> Self {
        ChannelMessenger {
            tx: self.tx.clone(),
            open: self.open,
        }
    }
}

impl<S, I> Messenger<S, I> for ChannelMessenger<S, I> {
    fn send(&mut self, message: Message<S, I>) -> Result<(), MessengerError> {
        if !self.open {
            return Err(MessengerError::Closed);
        }
        self.tx.send(message).map_err(|_| MessengerError::Closed)
    }

    fn close(&mut self) {
        self.open = false;
    }
}
