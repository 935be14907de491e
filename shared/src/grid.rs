//! Reference step function: a deterministic grid world.
//!
//! Small enough to read in one sitting, rich enough to exercise the core:
//! players occupy integer cells, directional inputs move them one cell per
//! frame, and connects/disconnects edit the roster. All arithmetic is
//! integer, so two processes running this game can never drift through
//! floating-point differences.

use crate::game::{Event, FrameState, Game};
use crate::{ClientId, Frame};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const GRID_WIDTH: i32 = 32;
pub const GRID_HEIGHT: i32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCell {
    pub x: i32,
    pub y: i32,
}

/// Complete world state. Players live in a `BTreeMap` so iteration and the
/// canonical serialization are key-ordered without extra work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridState {
    pub frame: Frame,
    pub players: BTreeMap<ClientId, PlayerCell>,
}

impl FrameState for GridState {
    fn frame(&self) -> Frame {
        self.frame
    }
}

/// Spawn cell derived from the client id so every peer places a joining
/// player identically without coordination.
pub fn spawn_cell(client_id: ClientId) -> PlayerCell {
    PlayerCell {
        x: (client_id as i32 * 7) % GRID_WIDTH,
        y: (client_id as i32 * 13) % GRID_HEIGHT,
    }
}

fn event_priority<I>(event: &Event<I>) -> u8 {
    match event {
        Event::Connect { .. } => 1,
        Event::Input { .. } => 2,
        Event::Disconnect { .. } => 99,
    }
}

pub struct GridGame;

impl Game for GridGame {
    type State = GridState;
    type Input = Direction;

    fn init(&self) -> GridState {
        GridState {
            frame: 0,
            players: BTreeMap::new(),
        }
    }

    fn update(&self, state: &GridState, events: &[Event<Direction>]) -> GridState {
        let mut players = state.players.clone();
        for event in events {
            match event {
                Event::Connect { client_id } => {
                    players.insert(*client_id, spawn_cell(*client_id));
                }
                Event::Disconnect { client_id } => {
                    players.remove(client_id);
                }
                Event::Input { client_id, input } => {
                    if let Some(cell) = players.get_mut(client_id) {
                        match input {
                            Direction::Up => cell.y -= 1,
                            Direction::Down => cell.y += 1,
                            Direction::Left => cell.x -= 1,
                            Direction::Right => cell.x += 1,
                        }
                        cell.x = cell.x.clamp(0, GRID_WIDTH - 1);
                        cell.y = cell.y.clamp(0, GRID_HEIGHT - 1);
                    }
                }
            }
        }
        GridState {
            frame: state.frame + 1,
            players,
        }
    }

    fn compare_events(&self, a: &Event<Direction>, b: &Event<Direction>) -> Ordering {
        event_priority(a)
            .cmp(&event_priority(b))
            .then_with(|| a.client_id().cmp(&b.client_id()))
            .then_with(|| match (a, b) {
                (Event::Input { input: ia, .. }, Event::Input { input: ib, .. }) => ia.cmp(ib),
                _ => Ordering::Equal,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(client_id: ClientId) -> Event<Direction> {
        Event::Connect { client_id }
    }

    fn input(client_id: ClientId, direction: Direction) -> Event<Direction> {
        Event::Input {
            client_id,
            input: direction,
        }
    }

    #[test]
    fn init_is_empty_at_frame_zero() {
        let state = GridGame.init();
        assert_eq!(state.frame, 0);
        assert!(state.players.is_empty());
    }

    #[test]
    fn update_advances_frame_by_one() {
        let state = GridGame.init();
        let next = GridGame.update(&state, &[]);
        assert_eq!(next.frame, 1);
    }

    #[test]
    fn connect_spawns_deterministically() {
        let state = GridGame.init();
        let a = GridGame.update(&state, &[connect(5)]);
        let b = GridGame.update(&state, &[connect(5)]);
        assert_eq!(a, b);
        assert_eq!(a.players[&5], spawn_cell(5));
    }

    #[test]
    fn disconnect_removes_player() {
        let state = GridGame.init();
        let joined = GridGame.update(&state, &[connect(3)]);
        let left = GridGame.update(&joined, &[Event::Disconnect { client_id: 3 }]);
        assert!(left.players.is_empty());
    }

    #[test]
    fn inputs_move_and_clamp() {
        let mut state = GridGame.init();
        state.players.insert(1, PlayerCell { x: 0, y: 0 });

        let moved = GridGame.update(&state, &[input(1, Direction::Left)]);
        assert_eq!(moved.players[&1], PlayerCell { x: 0, y: 0 });

        let moved = GridGame.update(&state, &[input(1, Direction::Right)]);
        assert_eq!(moved.players[&1], PlayerCell { x: 1, y: 0 });
    }

    #[test]
    fn input_for_unknown_player_is_ignored() {
        let state = GridGame.init();
        let next = GridGame.update(&state, &[input(42, Direction::Up)]);
        assert!(next.players.is_empty());
    }

    #[test]
    fn comparator_orders_by_declared_priority_first() {
        // Priority decides irrespective of any other field.
        let late_connect = connect(99);
        let early_input = input(0, Direction::Up);
        let disconnect = Event::Disconnect { client_id: 0 };

        assert_eq!(
            GridGame.compare_events(&late_connect, &early_input),
            Ordering::Less
        );
        assert_eq!(
            GridGame.compare_events(&early_input, &disconnect),
            Ordering::Less
        );
        assert_eq!(
            GridGame.compare_events(&disconnect, &late_connect),
            Ordering::Greater
        );
    }

    #[test]
    fn comparator_is_reflexive() {
        let event = input(4, Direction::Down);
        assert_eq!(GridGame.compare_events(&event, &event), Ordering::Equal);
    }

    #[test]
    fn comparator_breaks_ties_by_client_then_payload() {
        assert_eq!(
            GridGame.compare_events(&input(1, Direction::Up), &input(2, Direction::Up)),
            Ordering::Less
        );
        assert_eq!(
            GridGame.compare_events(&input(1, Direction::Up), &input(1, Direction::Down)),
            Ordering::Less
        );
    }
}
