use chrono::Utc;
use log::{info, warn};
use std::time::Duration;
use tokio::time::Instant;

use crate::messages::{ServerMessage, SystemKind};
use crate::state::room::{
    clamp_duration, normalize_name, truncate, AnswerRecord, Phase, CHOICE_MAX_CHARS, HOST_NAME,
    QUESTION_MAX_CHARS,
};
use crate::state::ServerState;

/// Why an operation was dropped. Clients are never told (bad input from
/// one socket must not disturb a shared room), but the reasons stay
/// observable for the gateway's logs and for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingRoom,
    NotInRoom,
    NotAcceptingAnswers,
    DeadlinePassed,
    AlreadyAnswered,
    EmptyQuestion,
    NotEnoughChoices,
}

pub type Outcome<T = ()> = Result<T, Rejection>;

impl ServerState {
    /// Registers the connection in the room under a normalized display
    /// name, seeds a score entry for new names, and announces the join.
    /// Late joiners are resynced by unicast: the open question (with the
    /// remaining window, not the original one) or the last reveal.
    pub fn join(&mut self, conn: &str, code: &str, raw_name: &str) -> Outcome {
        if code.is_empty() {
            return Err(Rejection::MissingRoom);
        }
        let name = normalize_name(raw_name);

        let session = self.sessions.entry(conn.to_string()).or_default();
        session.room = Some(code.to_string());
        session.name = Some(name.clone());

        let room = self.rooms.get_or_create(code);
        room.players.insert(conn.to_string(), name.clone());
        room.scores.entry(name.clone()).or_insert(0);
        room.touch();

        self.broadcast_to_room(
            code,
            &ServerMessage::System {
                kind: SystemKind::Join,
                text: format!("{name} joined"),
            },
        );
        self.broadcast_presence(code);
        self.broadcast_scoreboard(code);

        let resync = match self.rooms.get(code) {
            Some(room) if room.phase == Phase::Question => Some(ServerMessage::Question {
                question: room.question.clone().unwrap_or_default(),
                choices: room.choices.clone(),
                ends_in: room.remaining_secs(),
            }),
            Some(room) if room.phase == Phase::Reveal => room
                .correct
                .map(|correct| ServerMessage::Reveal { correct }),
            _ => None,
        };
        if let Some(msg) = resync {
            self.send_to(conn, &msg);
        }
        Ok(())
    }

    /// Records an answer if the window is open and this connection has
    /// not answered yet; acks the submitter only. Everything else is
    /// dropped, and the first recorded index is never overwritten.
    pub fn submit_answer(&mut self, conn: &str, index: i64) -> Outcome<i64> {
        let session = self.sessions.get(conn).ok_or(Rejection::NotInRoom)?;
        let code = session.room.clone().ok_or(Rejection::NotInRoom)?;
        let name = session.name.clone().unwrap_or_else(|| String::from("Student"));

        let room = self.rooms.get_mut(&code).ok_or(Rejection::NotInRoom)?;
        if room.phase != Phase::Question {
            return Err(Rejection::NotAcceptingAnswers);
        }
        let deadline = room.deadline.ok_or(Rejection::NotAcceptingAnswers)?;
        if Instant::now() > deadline {
            return Err(Rejection::DeadlinePassed);
        }
        if room.answers.contains_key(conn) {
            return Err(Rejection::AlreadyAnswered);
        }
        room.answers.insert(
            conn.to_string(),
            AnswerRecord {
                name,
                index,
                at: Utc::now(),
            },
        );
        room.touch();

        self.send_to(
            conn,
            &ServerMessage::AnswerAck {
                accepted: true,
                index,
            },
        );
        Ok(index)
    }

    /// Puts the host connection in the room under the reserved name and
    /// confirms readiness. Safe to repeat: existing room state is kept.
    pub fn host_create(&mut self, conn: &str, code: &str) -> Outcome {
        if code.is_empty() {
            return Err(Rejection::MissingRoom);
        }
        let session = self.sessions.entry(conn.to_string()).or_default();
        session.room = Some(code.to_string());
        session.name = Some(HOST_NAME.to_string());
        self.rooms.get_or_create(code).touch();

        self.send_to(
            conn,
            &ServerMessage::HostReady {
                room: code.to_string(),
            },
        );
        self.broadcast_presence(code);
        self.broadcast_scoreboard(code);
        Ok(())
    }

    /// Opens a new answer window: clears the previous round's answers and
    /// reveal, stores the truncated prompt, and broadcasts the question.
    /// Returns the effective duration and the timer generation the caller
    /// must hand to the countdown task it spawns.
    pub fn host_start(
        &mut self,
        code: &str,
        question: &str,
        choices: &[String],
        duration: Option<i64>,
    ) -> Outcome<(u64, u64)> {
        if code.is_empty() {
            return Err(Rejection::MissingRoom);
        }
        if question.trim().is_empty() {
            return Err(Rejection::EmptyQuestion);
        }
        if choices.len() < 2 {
            return Err(Rejection::NotEnoughChoices);
        }

        let secs = clamp_duration(duration);
        let text = truncate(question, QUESTION_MAX_CHARS);
        let list: Vec<String> = choices
            .iter()
            .map(|choice| truncate(choice, CHOICE_MAX_CHARS))
            .collect();

        let room = self.rooms.get_or_create(code);
        room.stop_timer();
        room.timer_generation += 1;
        let generation = room.timer_generation;
        room.phase = Phase::Question;
        room.question = Some(text.clone());
        room.choices = list.clone();
        room.correct = None;
        room.answers.clear();
        room.deadline = Some(Instant::now() + Duration::from_secs(secs));
        room.touch();

        info!("room {code}: question opened for {secs}s");
        self.broadcast_to_room(
            code,
            &ServerMessage::Question {
                question: text,
                choices: list,
                ends_in: secs,
            },
        );
        Ok((secs, generation))
    }

    /// Closes the round: publishes the correct index exactly as sent and
    /// awards one point per recorded answer that matches it. The index is
    /// not checked against the choice list; an out-of-range reveal simply
    /// scores nobody.
    pub fn host_reveal(&mut self, code: &str, correct: i64) -> Outcome {
        if code.is_empty() {
            return Err(Rejection::MissingRoom);
        }
        let room = self.rooms.get_or_create(code);
        room.stop_timer();
        room.phase = Phase::Reveal;
        room.correct = Some(correct);
        if correct < 0 || correct as usize >= room.choices.len() {
            warn!("room {code}: reveal index {correct} is outside the choice list");
        }
        for record in room.answers.values() {
            if record.index == correct {
                *room.scores.entry(record.name.clone()).or_insert(0) += 1;
            }
        }
        room.touch();

        self.broadcast_to_room(code, &ServerMessage::Reveal { correct });
        self.broadcast_scoreboard(code);
        Ok(())
    }

    /// Back to the lobby. Question, choices, reveal, deadline, and
    /// answers are cleared; scores are kept.
    pub fn host_next(&mut self, code: &str) -> Outcome {
        if code.is_empty() {
            return Err(Rejection::MissingRoom);
        }
        let room = self.rooms.get_or_create(code);
        room.stop_timer();
        room.phase = Phase::Lobby;
        room.question = None;
        room.choices.clear();
        room.correct = None;
        room.deadline = None;
        room.answers.clear();
        room.touch();

        self.broadcast_to_room(
            code,
            &ServerMessage::System {
                kind: SystemKind::Info,
                text: String::from("Next round starting soon"),
            },
        );
        Ok(())
    }

    /// Connection went away: drop it from the room's player map and
    /// announce the departure. Any answer it already recorded this round
    /// stays and still counts at reveal time.
    pub fn disconnect(&mut self, conn: &str) {
        let Some(session) = self.remove_connection(conn) else {
            return;
        };
        let Some(code) = session.room else {
            return;
        };
        let name = session.name.unwrap_or_else(|| String::from("Student"));
        if let Some(room) = self.rooms.get_mut(&code) {
            room.players.remove(conn);
            room.touch();
        }
        self.broadcast_to_room(
            &code,
            &ServerMessage::System {
                kind: SystemKind::Leave,
                text: format!("{name} left"),
            },
        );
        self.broadcast_presence(&code);
    }
}
