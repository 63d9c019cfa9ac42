use crate::messages::PresenceEntry;
use crate::state::ServerState;

/// Live roster for a room, derived fresh from the connection set: every
/// connection subscribed to the room that has been given a display name.
/// A view, not stored state. Sorted by name then id so repeated
/// snapshots are stable.
pub fn list(state: &ServerState, code: &str) -> Vec<PresenceEntry> {
    let mut players: Vec<PresenceEntry> = state
        .sessions
        .iter()
        .filter(|(conn, session)| {
            session.room.as_deref() == Some(code) && state.senders.contains_key(*conn)
        })
        .filter_map(|(conn, session)| {
            session.name.as_ref().map(|name| PresenceEntry {
                id: conn.clone(),
                name: name.clone(),
            })
        })
        .collect();
    players.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    players
}
