//! Identifier newtypes.

use std::fmt;
use std::num::NonZeroU32;

/// A command tag (e.g. `A0001`).
///
/// Tags correlate a tagged completion response with the command that
/// produced it. They are opaque once generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(String);

impl Tag {
    /// Creates a tag from a string.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A message sequence number (1-based, never zero).
///
/// Sequence numbers shift when messages are expunged, so they are only
/// meaningful within the mailbox state they were observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeqNum(NonZeroU32);

impl SeqNum {
    /// Creates a sequence number, returning `None` for zero.
    #[must_use]
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    /// Returns the underlying value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a cached message.
///
/// A sequence number alone is not a stable key (expunges shift it), so
/// cache entries carry the mailbox generation alongside the number and
/// both must match for a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId {
    /// Mailbox generation the number was observed under.
    pub uidvalidity: u32,
    /// Message sequence number within that generation.
    pub number: u32,
}

impl MessageId {
    /// Creates a message identity.
    #[must_use]
    pub const fn new(uidvalidity: u32, number: u32) -> Self {
        Self {
            uidvalidity,
            number,
        }
    }

    /// Cache slot index for a cache of `slots` entries.
    #[must_use]
    pub const fn slot(self, slots: usize) -> usize {
        (self.number as usize) % slots
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_display() {
        let tag = Tag::new("A0001");
        assert_eq!(tag.to_string(), "A0001");
        assert_eq!(tag.as_str(), "A0001");
    }

    #[test]
    fn test_seqnum_rejects_zero() {
        assert!(SeqNum::new(0).is_none());
        assert_eq!(SeqNum::new(7).unwrap().get(), 7);
    }

    #[test]
    fn test_message_id_slot_wraps() {
        let id = MessageId::new(1234, 23);
        assert_eq!(id.slot(10), 3);
        assert_eq!(MessageId::new(1234, 10).slot(10), 0);
    }

    #[test]
    fn test_message_id_identity_includes_generation() {
        let a = MessageId::new(1, 5);
        let b = MessageId::new(2, 5);
        assert_ne!(a, b);
        assert_eq!(a, MessageId::new(1, 5));
    }
}
