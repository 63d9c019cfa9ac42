pub mod presence;
pub mod room;
pub mod scoreboard;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use hyper_tungstenite::tungstenite::Message;
use log::info;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::messages::ServerMessage;
use room::{ConnId, RoomCode, RoomRegistry};

pub type WsSender = mpsc::UnboundedSender<Message>;

/// What the gateway knows about one live connection.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub room: Option<RoomCode>,
    pub name: Option<String>,
}

/// Everything behind the single state lock: session records, outbound
/// senders, and the room registry. All mutation happens through the
/// operations in `game`, each of which runs to completion under the lock.
pub struct ServerState {
    pub sessions: HashMap<ConnId, Session>,
    pub senders: HashMap<ConnId, WsSender>,
    pub rooms: RoomRegistry,
}

pub type SharedState = Arc<Mutex<ServerState>>;

impl ServerState {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            senders: HashMap::new(),
            rooms: RoomRegistry::default(),
        }
    }

    /// Registers a fresh connection with no room or name yet.
    pub fn connect(&mut self, conn: &str, tx: WsSender) {
        self.sessions.insert(conn.to_string(), Session::default());
        self.senders.insert(conn.to_string(), tx);
    }

    /// Forgets a connection entirely, returning its last session record.
    pub fn remove_connection(&mut self, conn: &str) -> Option<Session> {
        self.senders.remove(conn);
        self.sessions.remove(conn)
    }

    /// Unicast. Dropped silently if the connection is gone.
    pub fn send_to(&self, conn: &str, msg: &ServerMessage) {
        let Some(tx) = self.senders.get(conn) else {
            return;
        };
        let Ok(json) = serde_json::to_string(msg) else {
            return;
        };
        let _ = tx.send(Message::Text(json));
    }

    /// Room-scoped fan-out: serialized once, delivered in one pass over
    /// every connection subscribed to the room.
    pub fn broadcast_to_room(&self, code: &str, msg: &ServerMessage) {
        let Ok(json) = serde_json::to_string(msg) else {
            return;
        };
        for (conn, session) in &self.sessions {
            if session.room.as_deref() == Some(code) {
                if let Some(tx) = self.senders.get(conn) {
                    let _ = tx.send(Message::Text(json.clone()));
                }
            }
        }
    }

    pub fn broadcast_presence(&self, code: &str) {
        let players = presence::list(self, code);
        self.broadcast_to_room(code, &ServerMessage::Presence { players });
    }

    pub fn broadcast_scoreboard(&self, code: &str) {
        let rows = self
            .rooms
            .get(code)
            .map(|room| scoreboard::standings(&room.scores))
            .unwrap_or_default();
        self.broadcast_to_room(code, &ServerMessage::Scoreboard { rows });
    }

    /// Drops rooms nobody is subscribed to once they have sat idle long
    /// enough, aborting any stray countdown. Rooms with a live
    /// connection are never touched.
    pub fn evict_idle_rooms(&mut self, idle_for: Duration) -> usize {
        let now = Instant::now();
        let live: HashSet<&str> = self
            .sessions
            .values()
            .filter_map(|session| session.room.as_deref())
            .collect();
        let stale: Vec<RoomCode> = self
            .rooms
            .iter()
            .filter(|(code, room)| {
                !live.contains(code.as_str())
                    && now.saturating_duration_since(room.last_activity) >= idle_for
            })
            .map(|(code, _)| code.clone())
            .collect();
        for code in &stale {
            if let Some(mut room) = self.rooms.remove(code) {
                room.stop_timer();
                info!("room {code}: evicted after sitting idle");
            }
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::Phase;

    fn connect(state: &mut ServerState, id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.connect(id, tx);
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn idle_rooms_are_evicted_once_abandoned() {
        let mut state = ServerState::new();
        let _rx = connect(&mut state, "a");
        state.join("a", "c1", "Ada").unwrap();

        tokio::time::advance(Duration::from_secs(7200)).await;

        // Still subscribed: survives any idle window.
        assert_eq!(state.evict_idle_rooms(Duration::from_secs(3600)), 0);
        assert!(state.rooms.get("c1").is_some());

        state.disconnect("a");
        tokio::time::advance(Duration::from_secs(7200)).await;
        assert_eq!(state.evict_idle_rooms(Duration::from_secs(3600)), 1);
        assert!(state.rooms.get("c1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn recently_active_rooms_survive_the_sweep() {
        let mut state = ServerState::new();
        let _rx = connect(&mut state, "a");
        state.join("a", "c1", "Ada").unwrap();
        state.disconnect("a");

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(state.evict_idle_rooms(Duration::from_secs(3600)), 0);
        assert_eq!(state.rooms.get("c1").map(|r| r.phase), Some(Phase::Lobby));
    }
}
