//! Append-only, ordered log of the messages shown to the user.
//!
//! Positions are handed out at insertion time from a counter that only moves
//! forward, so render order is arrival order. Nothing is deduplicated: a local
//! message and the server's echo of it are two entries.

use shared::{ChatLine, Role};

/// Where a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Typed by the user on this client
    Local,
    /// Produced by the server (history, live channel, or a synthetic notice)
    Remote,
}

impl From<Role> for Origin {
    fn from(role: Role) -> Self {
        match role {
            Role::User => Origin::Local,
            Role::Agent => Origin::Remote,
        }
    }
}

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Waiting for a transport acknowledgment. The baseline protocol has none,
    /// so this is only seen with transports that correlate sends.
    Pending,
    Confirmed,
    /// Shown optimistically, but never handed to the transport
    Failed,
}

/// A message before it has a position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub origin: Origin,
    pub text: String,
    pub delivery: DeliveryState,
}

impl MessageDraft {
    pub fn local(text: impl Into<String>, delivery: DeliveryState) -> Self {
        Self {
            origin: Origin::Local,
            text: text.into(),
            delivery,
        }
    }

    pub fn remote(text: impl Into<String>) -> Self {
        Self {
            origin: Origin::Remote,
            text: text.into(),
            delivery: DeliveryState::Confirmed,
        }
    }
}

impl From<ChatLine> for MessageDraft {
    fn from(line: ChatLine) -> Self {
        Self {
            origin: line.role.into(),
            text: line.content,
            delivery: DeliveryState::Confirmed,
        }
    }
}

/// A message as stored in the timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub position: u64,
    pub origin: Origin,
    pub text: String,
    pub delivery: DeliveryState,
}

#[derive(Debug, Default)]
pub struct Timeline {
    entries: Vec<Message>,
    next_position: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return the position assigned to it.
    pub fn append(&mut self, draft: MessageDraft) -> u64 {
        let position = self.next_position;
        self.next_position += 1;
        self.entries.push(Message {
            position,
            origin: draft.origin,
            text: draft.text,
            delivery: draft.delivery,
        });
        position
    }

    /// Current contents, oldest first.
    pub fn snapshot(&self) -> &[Message] {
        &self.entries
    }

    /// Entries appended after `position` (all entries when `None`).
    pub fn after(&self, position: Option<u64>) -> &[Message] {
        let Some(position) = position else {
            return &self.entries;
        };
        let start = self.entries.partition_point(|m| m.position <= position);
        &self.entries[start..]
    }

    /// Replace the displayed contents with a single greeting.
    ///
    /// The position counter is not rewound, so positions stay strictly
    /// increasing for the life of the session.
    pub fn restart(&mut self, greeting: MessageDraft) -> u64 {
        self.entries.clear();
        self.append(greeting)
    }

    pub fn last_position(&self) -> Option<u64> {
        self.entries.last().map(|m| m.position)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_follow_append_order() {
        let mut timeline = Timeline::new();
        let texts = ["a", "b", "c", "d", "e"];
        for (i, text) in texts.iter().enumerate() {
            let draft = if i % 2 == 0 {
                MessageDraft::local(*text, DeliveryState::Confirmed)
            } else {
                MessageDraft::remote(*text)
            };
            assert_eq!(timeline.append(draft), i as u64);
        }

        let snapshot = timeline.snapshot();
        assert_eq!(snapshot.len(), texts.len());
        for pair in snapshot.windows(2) {
            assert!(pair[0].position < pair[1].position);
        }
        let collected: Vec<&str> = snapshot.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(collected, texts);
    }

    #[test]
    fn echo_is_kept_as_separate_entry() {
        let mut timeline = Timeline::new();
        timeline.append(MessageDraft::local("hello", DeliveryState::Confirmed));
        timeline.append(MessageDraft::remote("hello"));

        let snapshot = timeline.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].origin, Origin::Local);
        assert_eq!(snapshot[1].origin, Origin::Remote);
    }

    #[test]
    fn restart_keeps_counting() {
        let mut timeline = Timeline::new();
        timeline.append(MessageDraft::remote("one"));
        timeline.append(MessageDraft::remote("two"));

        let pos = timeline.restart(MessageDraft::remote("greeting"));
        assert_eq!(pos, 2);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.snapshot()[0].text, "greeting");
        assert_eq!(timeline.append(MessageDraft::remote("three")), 3);
    }

    #[test]
    fn after_returns_tail() {
        let mut timeline = Timeline::new();
        for text in ["a", "b", "c"] {
            timeline.append(MessageDraft::remote(text));
        }

        assert_eq!(timeline.after(None).len(), 3);
        let tail = timeline.after(Some(0));
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].text, "b");
        assert!(timeline.after(Some(2)).is_empty());
    }

    #[test]
    fn history_roles_map_to_origin() {
        let line = ChatLine {
            role: Role::User,
            content: "hi".to_string(),
        };
        let draft = MessageDraft::from(line);
        assert_eq!(draft.origin, Origin::Local);
        assert_eq!(draft.delivery, DeliveryState::Confirmed);
    }
}
