use serde::{Deserialize, Serialize};

// ============================================
// Wire Protocol
// ============================================

/// Messages clients send over the WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Player (or projector screen) joins a room under a display name.
    Join {
        room: String,
        #[serde(default)]
        name: String,
    },
    /// Player picks a choice for the question in progress.
    Answer { index: i64 },
    /// Host opens a room, or re-enters one already in progress.
    HostCreate { room: String },
    /// Host starts a timed question round.
    HostStart {
        room: String,
        question: String,
        choices: Vec<String>,
        #[serde(default)]
        duration: Option<i64>,
    },
    /// Host closes the answer window and publishes the correct choice.
    HostReveal { room: String, correct: i64 },
    /// Host resets the room back to the lobby. Scores are kept.
    HostNext { room: String },
}

/// Messages the server pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Join/leave notices and lobby transitions.
    System { kind: SystemKind, text: String },
    /// Live roster of the room.
    Presence { players: Vec<PresenceEntry> },
    /// Ranked standings for the room.
    Scoreboard { rows: Vec<ScoreRow> },
    /// A question round is open; `ends_in` is whole seconds remaining.
    Question {
        question: String,
        choices: Vec<String>,
        ends_in: u64,
    },
    /// Once-per-second countdown while a question is open.
    Tick { seconds: u64 },
    /// The answer window closed without a reveal.
    TimeUp,
    /// The correct choice, as the host sent it.
    Reveal { correct: i64 },
    /// Unicast receipt for an accepted answer.
    AnswerAck { accepted: bool, index: i64 },
    /// Unicast confirmation that the host's room is ready.
    HostReady { room: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemKind {
    Join,
    Leave,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceEntry {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreRow {
    pub name: String,
    pub score: u32,
}
