use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::messages::ServerMessage;
use crate::state::room::{Phase, RoomCode};
use crate::state::SharedState;

/// Drives the once-per-second countdown for one question round:
/// broadcasts the remaining whole seconds each tick, then a single
/// `TimeUp` when the deadline is crossed, and stops itself.
///
/// Every tick revalidates the room's phase and timer generation under
/// the state lock before emitting anything, so a cancelled or superseded
/// timer goes quiet even if the cancellation raced an in-flight tick.
pub fn spawn_round_timer(state: SharedState, code: RoomCode, generation: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(1);
        let mut ticker = time::interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let mut st = state.lock().await;
            let Some(room) = st.rooms.get(&code) else {
                break;
            };
            if room.timer_generation != generation || room.phase != Phase::Question {
                break;
            }
            let left = room.remaining_secs();
            st.broadcast_to_room(&code, &ServerMessage::Tick { seconds: left });
            if left == 0 {
                if let Some(room) = st.rooms.get_mut(&code) {
                    room.timer = None;
                }
                st.broadcast_to_room(&code, &ServerMessage::TimeUp);
                debug!("room {code}: time up");
                break;
            }
        }
    })
}

/// Hooks a freshly spawned countdown onto its room. If another round
/// started while the task was being spawned, the task is already stale:
/// abort it instead of attaching.
pub async fn attach_round_timer(
    state: &SharedState,
    code: &str,
    generation: u64,
    handle: JoinHandle<()>,
) {
    let mut st = state.lock().await;
    match st.rooms.get_mut(code) {
        Some(room) if room.timer_generation == generation && room.phase == Phase::Question => {
            room.timer = Some(handle);
        }
        _ => handle.abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ServerState;
    use hyper_tungstenite::tungstenite::Message;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tokio::sync::Mutex;

    async fn question_room(
        state: &SharedState,
        code: &str,
        secs: i64,
    ) -> (UnboundedReceiver<Message>, u64) {
        let mut st = state.lock().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        st.connect("watcher", tx);
        st.join("watcher", code, "Watcher").unwrap();
        let choices = vec!["x".to_string(), "y".to_string()];
        let (_, generation) = st.host_start(code, "Q?", &choices, Some(secs)).unwrap();
        while rx.try_recv().is_ok() {}
        (rx, generation)
    }

    fn parse(msg: Message) -> Value {
        match msg {
            Message::Text(json) => serde_json::from_str(&json).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_and_fires_timeup_exactly_once() {
        let state: SharedState = Arc::new(Mutex::new(ServerState::new()));
        let (mut rx, generation) = question_room(&state, "c1", 5).await;
        let handle = spawn_round_timer(state.clone(), "c1".to_string(), generation);
        attach_round_timer(&state, "c1", generation, handle).await;

        let mut seen = Vec::new();
        loop {
            let msg = parse(rx.recv().await.expect("timer message"));
            if msg["type"] == "TimeUp" {
                break;
            }
            seen.push(msg["seconds"].as_u64().unwrap());
        }
        assert_eq!(seen, [4, 3, 2, 1, 0]);

        // Nothing after the expiry signal, and the handle is released.
        time::advance(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        let st = state.lock().await;
        let room = st.rooms.get("c1").unwrap();
        assert!(room.timer.is_none());
        assert_eq!(room.phase, Phase::Question);
    }

    #[tokio::test(start_paused = true)]
    async fn reveal_cancels_the_countdown() {
        let state: SharedState = Arc::new(Mutex::new(ServerState::new()));
        let (mut rx, generation) = question_room(&state, "c1", 30).await;
        let handle = spawn_round_timer(state.clone(), "c1".to_string(), generation);
        attach_round_timer(&state, "c1", generation, handle).await;

        time::advance(Duration::from_secs(2)).await;
        state.lock().await.host_reveal("c1", 0).unwrap();
        time::advance(Duration::from_secs(60)).await;

        let mut ticks_after_reveal = 0;
        let mut saw_reveal = false;
        let mut saw_timeup = false;
        while let Ok(msg) = rx.try_recv() {
            let msg = parse(msg);
            match msg["type"].as_str().unwrap() {
                "Reveal" => saw_reveal = true,
                "TimeUp" => saw_timeup = true,
                "Tick" if saw_reveal => ticks_after_reveal += 1,
                _ => {}
            }
        }
        assert!(saw_reveal);
        assert!(!saw_timeup);
        assert_eq!(ticks_after_reveal, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn a_new_round_supersedes_the_old_countdown() {
        let state: SharedState = Arc::new(Mutex::new(ServerState::new()));
        let (mut rx, first_gen) = question_room(&state, "c1", 120).await;
        let handle = spawn_round_timer(state.clone(), "c1".to_string(), first_gen);
        attach_round_timer(&state, "c1", first_gen, handle).await;

        // Second start aborts the first timer before its first tick.
        let second_gen = {
            let mut st = state.lock().await;
            let choices = vec!["x".to_string(), "y".to_string()];
            let (_, generation) = st.host_start("c1", "Q2?", &choices, Some(3)).unwrap();
            generation
        };
        let handle = spawn_round_timer(state.clone(), "c1".to_string(), second_gen);
        attach_round_timer(&state, "c1", second_gen, handle).await;

        let mut seen = Vec::new();
        loop {
            let msg = parse(rx.recv().await.expect("timer message"));
            match msg["type"].as_str().unwrap() {
                "TimeUp" => break,
                "Tick" => seen.push(msg["seconds"].as_u64().unwrap()),
                _ => {}
            }
        }
        // Only the 3-second round ever ticked.
        assert_eq!(seen, [2, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn a_stale_handle_is_not_attached() {
        let state: SharedState = Arc::new(Mutex::new(ServerState::new()));
        let (_rx, generation) = question_room(&state, "c1", 10).await;
        let handle = spawn_round_timer(state.clone(), "c1".to_string(), generation);

        // A newer round began between spawn and attach.
        {
            let mut st = state.lock().await;
            let choices = vec!["x".to_string(), "y".to_string()];
            st.host_start("c1", "Q2?", &choices, Some(10)).unwrap();
        }
        attach_round_timer(&state, "c1", generation, handle).await;
        let st = state.lock().await;
        assert!(st.rooms.get("c1").unwrap().timer.is_none());
    }
}
