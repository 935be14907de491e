//! Session registry: named, independently simulated game sessions.
//!
//! Sessions are keyed by short join codes handed out to players. The
//! registry is an explicit object with explicit lifecycle: creation hands
//! back the code, removal happens when the owner decides a session is done
//! (typically once its roster empties).

use crate::broadcast::NetworkServer;
use log::info;
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::game::Game;
use shared::protocol::Messenger;
use std::collections::HashMap;

const CODE_LENGTH: usize = 6;

pub struct SessionRegistry<G: Game, M: Messenger<G::State, G::Input>> {
    sessions: HashMap<String, NetworkServer<G, M>>,
}

impl<G: Game, M: Messenger<G::State, G::Input>> SessionRegistry<G, M> {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: HashMap::new(),
        }
    }

    /// Creates a session for `game` and returns its join code.
    pub fn create(&mut self, game: G) -> String {
        let mut rng = rand::thread_rng();
        let code = loop {
            let candidate = generate_code(&mut rng);
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        self.sessions.insert(code.clone(), NetworkServer::new(game));
        info!("Created session {}", code);
        code
    }

    pub fn get(&self, code: &str) -> Option<&NetworkServer<G, M>> {
        self.sessions.get(code)
    }

    pub fn get_mut(&mut self, code: &str) -> Option<&mut NetworkServer<G, M>> {
        self.sessions.get_mut(code)
    }

    pub fn remove(&mut self, code: &str) -> bool {
        if self.sessions.remove(code).is_some() {
            info!("Removed session {}", code);
            true
        } else {
            false
        }
    }

    /// Removes the session only when its roster is empty. Returns whether
    /// it was removed.
    pub fn remove_if_empty(&mut self, code: &str) -> bool {
        match self.sessions.get(code) {
            Some(session) if session.is_empty() => self.remove(code),
            _ => false,
        }
    }

    pub fn codes(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<G: Game, M: Messenger<G::State, G::Input>> Default for SessionRegistry<G, M> {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_code<R: Rng>(rng: &mut R) -> String {
    (0..CODE_LENGTH)
        .map(|_| char::from(rng.sample(Alphanumeric)).to_ascii_uppercase())
        .collect()
}
