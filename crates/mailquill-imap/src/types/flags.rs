//! Message flags.

/// Per-message flag set as observed in a FETCH response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags {
    /// `\Seen`
    pub seen: bool,
    /// `\Answered`
    pub answered: bool,
    /// `\Flagged`
    pub flagged: bool,
    /// `\Deleted`
    pub deleted: bool,
    /// `\Draft`
    pub draft: bool,
    /// `\Recent`
    pub recent: bool,
}

impl MessageFlags {
    /// Whether the message counts as "old": neither seen nor recent.
    #[must_use]
    pub const fn old(self) -> bool {
        !self.seen && !self.recent
    }

    /// Sets the flag named by a `\Name` token.
    ///
    /// Returns `false` for unrecognized flags so the caller can decide
    /// whether that is an error in its context. Keyword flags (no
    /// backslash) are not routed here.
    pub fn set_named(&mut self, name: &str) -> bool {
        match name.to_ascii_uppercase().as_str() {
            "\\SEEN" => self.seen = true,
            "\\ANSWERED" => self.answered = true,
            "\\FLAGGED" => self.flagged = true,
            "\\DELETED" => self.deleted = true,
            "\\DRAFT" => self.draft = true,
            "\\RECENT" => self.recent = true,
            _ => return false,
        }
        true
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
    fn test_old_requires_neither_seen_nor_recent() {
        let mut flags = MessageFlags::default();
        assert!(flags.old());
        flags.recent = true;
        assert!(!flags.old());
        flags = MessageFlags {
            seen: true,
            ..MessageFlags::default()
        };
        assert!(!flags.old());
    }

    #[test]
    fn test_set_named_case_insensitive() {
        let mut flags = MessageFlags::default();
        assert!(flags.set_named("\\seen"));
        assert!(flags.set_named("\\Draft"));
        assert!(flags.seen);
        assert!(flags.draft);
    }

    #[test]
    fn test_set_named_rejects_unknown() {
        let mut flags = MessageFlags::default();
        assert!(!flags.set_named("\\Junk"));
        assert!(!flags.set_named("INTERNALDATE"));
        assert_eq!(flags, MessageFlags::default());
    }
}
