//! Client-facing text views
//!
//! Renders the hub listing, the room view, and the static menus pushed to
//! clients. Views are plain text blocks; the session prepends the clear
//! sequence so dumb terminal clients repaint instead of scrolling.

use crate::room::{RoomSnapshot, RoomSummary};

/// ANSI clear-screen + cursor-home, prepended to pushed views.
pub const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// The unauthenticated menu.
pub const AUTH_MENU: &str = "Choose an option:\n1. Register\n2. Login\nq. Quit";

/// Command summary shown for `/help`.
pub const HELP: &str = "Commands:\n\
    /join <room number>  join a room from the hub listing\n\
    /create              create a new room\n\
    /quit, /exit         leave the current room (or disconnect from the hub)\n\
    /logout              log out and return to the menu\n\
    /disconnect          close the connection\n\
    /help                show this message";

fn capacity_label(max_members: i32) -> String {
    if max_members < 0 {
        "∞".to_string()
    } else {
        max_members.to_string()
    }
}

/// Hub view: numbered room listing with occupancy.
pub fn render_hub(rooms: &[RoomSummary]) -> String {
    let mut out = String::from("Welcome to xchat!\n\nRooms Available:\n");
    for (i, room) in rooms.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} [{}/{}]{}\n",
            i + 1,
            room.name,
            room.occupancy,
            capacity_label(room.max_members),
            if room.is_ai { " (AI)" } else { "" }
        ));
    }
    if rooms.is_empty() {
        out.push_str("(no rooms yet)\n");
    }
    out.push_str("\nTo join a room, type: /join <room number> or /create to create a room.");
    out
}

/// Room view: header, member names, full message log.
pub fn render_room(snap: &RoomSnapshot) -> String {
    let mut out = format!(
        "=== {} [{}/{}]{} ===\nMembers: {}\n{}\n",
        snap.name,
        snap.member_names.len(),
        capacity_label(snap.max_members),
        if snap.is_ai { " (AI)" } else { "" },
        snap.member_names.join(", "),
        "-".repeat(40)
    );
    for msg in &snap.messages {
        out.push_str(&format!("{msg}\n"));
    }
    out.push_str("\nType a message, /quit to leave, /help for commands.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::Room;
    use crate::types::{RoomId, UserId};

    #[test]
    fn test_hub_listing_numbers_and_occupancy() {
        let mut room = Room::new(RoomId(0), "Lobby", 5, false);
        room.join(UserId::new(), "alice").unwrap();
        let rooms = vec![room.summary(), Room::new(RoomId(1), "Bots", -1, true).summary()];

        let view = render_hub(&rooms);
        assert!(view.contains("1. Lobby [1/5]"));
        assert!(view.contains("2. Bots [0/∞] (AI)"));
        assert!(view.contains("/join <room number>"));
    }

    #[test]
    fn test_empty_hub() {
        let view = render_hub(&[]);
        assert!(view.contains("(no rooms yet)"));
    }

    #[test]
    fn test_room_view_members_and_log() {
        let mut room = Room::new(RoomId(0), "Lobby", 5, false);
        room.join(UserId::new(), "alice").unwrap();
        room.join(UserId::new(), "bob").unwrap();
        room.post("alice", "hello");

        let view = render_room(&room.snapshot());
        assert!(view.contains("=== Lobby [2/5] ==="));
        assert!(view.contains("Members: alice, bob"));
        assert!(view.contains("alice: hello"));
    }
}
