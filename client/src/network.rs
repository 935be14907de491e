//! UDP transport and event loop for the synchronizer.
//!
//! All simulation mutation happens inside one `select!` loop, so the tick,
//! inbound messages, and the periodic clock probe can never run
//! concurrently with each other. Outbound traffic goes through a channel
//! drained by a dedicated sender task, keeping the synchronizer free of
//! socket concerns.

use crate::sync::NetworkClient;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::grid::{Direction, GridGame, GridState};
use shared::protocol::{ChannelMessenger, Message, Messenger};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep_until, Instant};

type WireMessage = Message<GridState, Direction>;

/// The four walking directions, cycled by the demo input generator.
const WALK_CYCLE: [Direction; 4] = [
    Direction::Right,
    Direction::Down,
    Direction::Left,
    Direction::Up,
];

/// Connects to the server and drives the synchronizer until the session
/// ends or becomes unrecoverable.
pub async fn run(
    server_addr: &str,
    tick_rate: u32,
    auto_walk: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(server_addr).await?;
    let socket = Arc::new(socket);
    info!("Connecting to server at {}", server_addr);

    let (messenger, outbound) = ChannelMessenger::channel();
    spawn_sender(Arc::clone(&socket), outbound);

    let mut client: NetworkClient<GridGame, _> =
        NetworkClient::new(GridGame, messenger.clone(), tick_rate);

    // First datagram from an unknown address is how the server learns we
    // exist; the probe doubles as that knock.
    let mut knock = messenger;
    knock.send(Message::Syn { frame: 0 })?;

    let mut buffer = [0u8; 65536];
    let mut next_tick = Instant::now() + client.nominal_interval();
    let mut probe_interval = interval(Duration::from_secs(1));
    let mut walk_interval = interval(Duration::from_millis(500));
    let mut walk_step = 0usize;

    loop {
        tokio::select! {
            received = socket.recv(&mut buffer) => {
                let len = received?;
                match deserialize::<WireMessage>(&buffer[..len]) {
                    Ok(message) => {
                        if let Err(e) = client.handle_message(message) {
                            error!("Session failed: {}", e);
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to deserialize message from server: {}", e),
                }
            }

            _ = sleep_until(next_tick) => {
                if client.is_active() {
                    let wait = client.tick();
                    next_tick = Instant::now() + wait;

                    let state = client.simulator().current_state();
                    if state.frame % (tick_rate as u64 * 10) == 0 {
                        debug!(
                            "Frame {}: {} players, rtt {:.0}ms",
                            state.frame,
                            state.players.len(),
                            client.round_trip_ms()
                        );
                    }
                } else {
                    next_tick = Instant::now() + client.nominal_interval();
                }
            }

            _ = probe_interval.tick() => {
                if client.is_active() {
                    client.sync_probe()?;
                }
            }

            _ = walk_interval.tick(), if auto_walk => {
                if client.is_active() {
                    let direction = WALK_CYCLE[walk_step % WALK_CYCLE.len()];
                    walk_step += 1;
                    client.game_input(direction)?;
                }
            }
        }
    }

    Ok(())
}

/// Drains the outbound queue onto the socket.
fn spawn_sender(
    socket: Arc<UdpSocket>,
    mut outbound: tokio::sync::mpsc::UnboundedReceiver<WireMessage>,
) {
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            match serialize(&message) {
                Ok(bytes) => {
                    if let Err(e) = socket.send(&bytes).await {
                        error!("Failed to send to server: {}", e);
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize outbound message: {}", e),
            }
        }
    });
}
