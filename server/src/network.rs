//! UDP transport and event loop for the broadcaster.
//!
//! One socket serves every connection; peers are identified by source
//! address, and the first datagram from an unknown address is treated as a
//! join. All broadcaster and simulator mutation happens inside a single
//! `select!` loop: ticks, inbound datagrams, and the timeout sweep are
//! discrete, non-overlapping steps. Outbound traffic is queued on
//! per-connection channels drained by sender tasks.

use crate::broadcast::{ConnectionStatus, NetworkServer};
use crate::session::SessionRegistry;
use bincode::{deserialize, serialize};
use log::{debug, info, warn};
use shared::grid::{Direction, GridGame, GridState};
use shared::protocol::{ChannelMessenger, Message};
use shared::ClientId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};

type WireMessage = Message<GridState, Direction>;

/// Connections are reaped after this long without a datagram.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Main server: one UDP socket, one session, one authoritative timeline.
pub struct Server {
    socket: Arc<UdpSocket>,
    registry: SessionRegistry<GridGame, ChannelMessenger<GridState, Direction>>,
    session_code: String,
    tick_duration: Duration,
    addr_to_id: HashMap<SocketAddr, ClientId>,
    last_seen: HashMap<ClientId, Instant>,
}

impl Server {
    pub async fn new(addr: &str, tick_rate: u32) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", addr);

        let mut registry = SessionRegistry::new();
        let session_code = registry.create(GridGame);
        info!("Hosting session {}", session_code);

        Ok(Server {
            socket,
            registry,
            session_code,
            tick_duration: Duration::from_secs_f64(1.0 / tick_rate as f64),
            addr_to_id: HashMap::new(),
            last_seen: HashMap::new(),
        })
    }

    /// Runs the event loop forever (or until the socket fails).
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut tick = interval(self.tick_duration);
        let mut sweep = interval(Duration::from_secs(1));
        let mut buffer = [0u8; 65536];

        info!("Server started successfully");

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => {
                    let (len, addr) = received?;
                    match deserialize::<WireMessage>(&buffer[..len]) {
                        Ok(message) => self.handle_datagram(addr, message),
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    }
                }

                _ = tick.tick() => {
                    self.session().tick();
                }

                _ = sweep.tick() => {
                    self.sweep_timeouts();
                }
            }
        }
    }

    fn session(&mut self) -> &mut NetworkServer<GridGame, ChannelMessenger<GridState, Direction>> {
        self.registry
            .get_mut(&self.session_code)
            .expect("the hosted session always exists")
    }

    fn handle_datagram(&mut self, addr: SocketAddr, message: WireMessage) {
        let id = match self.addr_to_id.get(&addr) {
            Some(id) => *id,
            None => self.connect_peer(addr),
        };
        self.last_seen.insert(id, Instant::now());

        if self.session().handle_message(id, message) == ConnectionStatus::Closed {
            self.forget_peer(addr, id);
        }
    }

    /// First datagram from an unknown address: register the connection and
    /// start pumping its outbound queue onto the socket.
    fn connect_peer(&mut self, addr: SocketAddr) -> ClientId {
        let (messenger, outbound) = ChannelMessenger::channel();
        spawn_sender(Arc::clone(&self.socket), addr, outbound);

        let id = self.session().create_client(messenger);
        self.addr_to_id.insert(addr, id);
        debug!("Address {} registered as client {}", addr, id);
        id
    }

    fn forget_peer(&mut self, addr: SocketAddr, id: ClientId) {
        self.addr_to_id.remove(&addr);
        self.last_seen.remove(&id);
        if self.session().is_empty() {
            let code = self.session_code.clone();
            info!("Session {} has no connections left", code);
        }
    }

    /// Reaps connections that have gone silent.
    fn sweep_timeouts(&mut self) {
        let now = Instant::now();
        let timed_out: Vec<ClientId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) > CLIENT_TIMEOUT)
            .map(|(id, _)| *id)
            .collect();

        for id in timed_out {
            warn!("Client {} timed out", id);
            self.session().remove_client(id);
            self.last_seen.remove(&id);
            self.addr_to_id.retain(|_, mapped| *mapped != id);
        }
    }
}

/// Drains one connection's outbound queue onto the shared socket.
fn spawn_sender(
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
    mut outbound: mpsc::UnboundedReceiver<WireMessage>,
) {
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            match serialize(&message) {
                Ok(bytes) => {
                    if let Err(e) = socket.send_to(&bytes, addr).await {
                        warn!("Failed to send to {}: {}", addr, e);
                        break;
                    }
                }
                Err(e) => warn!("Failed to serialize outbound message: {}", e),
            }
        }
    });
}
