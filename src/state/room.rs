use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub type RoomCode = String;
pub type ConnId = String;

/// Reserved display name for the host connection.
pub const HOST_NAME: &str = "HOST";

pub const NAME_MAX_CHARS: usize = 40;
pub const QUESTION_MAX_CHARS: usize = 300;
pub const CHOICE_MAX_CHARS: usize = 120;

pub const MIN_DURATION_SECS: i64 = 5;
pub const MAX_DURATION_SECS: i64 = 120;
pub const DEFAULT_DURATION_SECS: i64 = 20;

/// Where a room is in its round lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lobby,
    Question,
    Reveal,
}

/// One recorded answer for the round in progress.
#[derive(Debug, Clone)]
pub struct AnswerRecord {
    pub name: String,
    pub index: i64,
    pub at: DateTime<Utc>,
}

/// An isolated game session identified by a user-chosen code.
pub struct Room {
    pub phase: Phase,
    /// Connections currently counted as players, by display name.
    pub players: HashMap<ConnId, String>,
    /// Keyed by display name: the same name across reconnects (or across
    /// two simultaneous connections) shares one score entry.
    pub scores: HashMap<String, u32>,
    pub question: Option<String>,
    pub choices: Vec<String>,
    /// Set only by a reveal; echoed back exactly as the host sent it.
    pub correct: Option<i64>,
    /// When the current answer window closes.
    pub deadline: Option<Instant>,
    /// At most one entry per connection per round; cleared on each start.
    pub answers: HashMap<ConnId, AnswerRecord>,
    /// Active countdown task. At most one per room.
    pub timer: Option<JoinHandle<()>>,
    /// Bumped whenever a round starts; a tick from a stale generation
    /// must go quiet.
    pub timer_generation: u64,
    pub last_activity: Instant,
}

impl Room {
    fn new() -> Self {
        Self {
            phase: Phase::Lobby,
            players: HashMap::new(),
            scores: HashMap::new(),
            question: None,
            choices: Vec::new(),
            correct: None,
            deadline: None,
            answers: HashMap::new(),
            timer: None,
            timer_generation: 0,
            last_activity: Instant::now(),
        }
    }

    /// Whole seconds until the deadline, floored at zero.
    pub fn remaining_secs(&self) -> u64 {
        let Some(deadline) = self.deadline else {
            return 0;
        };
        let left = deadline.saturating_duration_since(Instant::now());
        (left.as_millis() as u64).div_ceil(1000)
    }

    /// Idempotent: cancels the active countdown if there is one.
    pub fn stop_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// All live rooms, keyed by code. Rooms are created lazily on first
/// reference and never fail to resolve.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomCode, Room>,
}

impl RoomRegistry {
    pub fn get_or_create(&mut self, code: &str) -> &mut Room {
        self.rooms.entry(code.to_string()).or_insert_with(Room::new)
    }

    pub fn get(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn get_mut(&mut self, code: &str) -> Option<&mut Room> {
        self.rooms.get_mut(code)
    }

    pub fn remove(&mut self, code: &str) -> Option<Room> {
        self.rooms.remove(code)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RoomCode, &Room)> {
        self.rooms.iter()
    }
}

/// Trim, default blank names to "Student", cap at 40 chars.
pub fn normalize_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::from("Student");
    }
    trimmed.chars().take(NAME_MAX_CHARS).collect()
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Answer windows run 5..=120 seconds; missing duration means 20.
pub fn clamp_duration(duration: Option<i64>) -> u64 {
    duration
        .unwrap_or(DEFAULT_DURATION_SECS)
        .clamp(MIN_DURATION_SECS, MAX_DURATION_SECS) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_default_to_student() {
        assert_eq!(normalize_name(""), "Student");
        assert_eq!(normalize_name("   "), "Student");
    }

    #[test]
    fn names_are_trimmed_and_capped() {
        assert_eq!(normalize_name("  Ada  "), "Ada");
        let long = "x".repeat(100);
        assert_eq!(normalize_name(&long).chars().count(), NAME_MAX_CHARS);
    }

    #[test]
    fn duration_clamps_to_bounds() {
        assert_eq!(clamp_duration(Some(3)), 5);
        assert_eq!(clamp_duration(Some(500)), 120);
        assert_eq!(clamp_duration(Some(-7)), 5);
        assert_eq!(clamp_duration(Some(45)), 45);
        assert_eq!(clamp_duration(None), 20);
    }

    #[test]
    fn registry_creates_lobby_rooms_lazily() {
        let mut registry = RoomRegistry::default();
        assert!(registry.get("c1").is_none());
        assert_eq!(registry.get_or_create("c1").phase, Phase::Lobby);
        assert!(registry.get("c1").is_some());
        // Second lookup returns the same room untouched.
        registry.get_or_create("c1").scores.insert("Ada".into(), 3);
        assert_eq!(registry.get_or_create("c1").scores["Ada"], 3);
    }
}
