use futures_util::{SinkExt, StreamExt};
use hyper::upgrade::Upgraded;
use hyper_tungstenite::tungstenite::Message;
use hyper_tungstenite::WebSocketStream;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::messages::ClientMessage;
use crate::state::room::ConnId;
use crate::state::SharedState;
use crate::timer;

/// Owns one WebSocket for its lifetime: registers the connection,
/// forwards outbound messages from the connection's channel, dispatches
/// inbound frames to the game operations, and cleans up on close.
pub async fn handle_connection(ws: WebSocketStream<Upgraded>, state: SharedState) {
    let conn_id: ConnId = uuid::Uuid::new_v4().to_string();
    info!("connection {conn_id} established");

    let (mut ws_sender, mut ws_receiver) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.lock().await.connect(&conn_id, tx.clone());

    // Forward queued outbound messages to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => handle_message(msg, &conn_id, &state).await,
                        // Undecodable frames are dropped without a reply;
                        // one noisy client must not disturb the room.
                        Err(err) => warn!("connection {conn_id}: undecodable frame: {err}"),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = tx.send(Message::Pong(payload));
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("connection {conn_id} closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("connection {conn_id}: socket error: {err}");
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut send_task => break,
        }
    }

    state.lock().await.disconnect(&conn_id);
    send_task.abort();
    info!("connection {conn_id} cleaned up");
}

async fn handle_message(msg: ClientMessage, conn_id: &ConnId, state: &SharedState) {
    match msg {
        ClientMessage::Join { room, name } => {
            let mut st = state.lock().await;
            if let Err(why) = st.join(conn_id, &room, &name) {
                debug!("connection {conn_id}: join dropped: {why:?}");
            }
        }
        ClientMessage::Answer { index } => {
            let mut st = state.lock().await;
            if let Err(why) = st.submit_answer(conn_id, index) {
                debug!("connection {conn_id}: answer dropped: {why:?}");
            }
        }
        ClientMessage::HostCreate { room } => {
            let mut st = state.lock().await;
            if let Err(why) = st.host_create(conn_id, &room) {
                debug!("connection {conn_id}: create dropped: {why:?}");
            }
        }
        ClientMessage::HostStart {
            room,
            question,
            choices,
            duration,
        } => {
            let started = {
                let mut st = state.lock().await;
                st.host_start(&room, &question, &choices, duration)
            };
            match started {
                Ok((_, generation)) => {
                    let handle =
                        timer::spawn_round_timer(state.clone(), room.clone(), generation);
                    timer::attach_round_timer(state, &room, generation, handle).await;
                }
                Err(why) => debug!("connection {conn_id}: start dropped: {why:?}"),
            }
        }
        ClientMessage::HostReveal { room, correct } => {
            let mut st = state.lock().await;
            if let Err(why) = st.host_reveal(&room, correct) {
                debug!("connection {conn_id}: reveal dropped: {why:?}");
            }
        }
        ClientMessage::HostNext { room } => {
            let mut st = state.lock().await;
            if let Err(why) = st.host_next(&room) {
                debug!("connection {conn_id}: next dropped: {why:?}");
            }
        }
    }
}
