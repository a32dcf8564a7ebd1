//! Callbacks for unsolicited server responses.
//!
//! Servers may volunteer mailbox state changes on any exchange. The
//! drive loop reports them through [`MailboxHandler`] so callers can
//! track mailbox size, expunges, and flag changes without parsing
//! anything themselves.

use crate::types::MessageFlags;

/// Handler for unsolicited responses observed while a command runs.
///
/// All methods have default no-op implementations, so implementors only
/// override what they care about.
pub trait MailboxHandler: Send {
    /// Called on `* n EXISTS` with the new message count.
    fn on_exists(&mut self, count: u32) {
        let _ = count;
    }

    /// Called on `* n RECENT` with the new recent count.
    fn on_recent(&mut self, count: u32) {
        let _ = count;
    }

    /// Called on `* n EXPUNGE` with the removed sequence number.
    fn on_expunge(&mut self, seq: u32) {
        let _ = seq;
    }

    /// Called when an unsolicited FETCH reports new flags for a message.
    fn on_flags_changed(&mut self, seq: u32, flags: MessageFlags) {
        let _ = (seq, flags);
    }

    /// Called on `* BYE` with the server's parting text.
    fn on_bye(&mut self, message: &str) {
        let _ = message;
    }

    /// Called on an `[ALERT]` response code; the text must be shown to
    /// the user per the protocol.
    fn on_alert(&mut self, message: &str) {
        let _ = message;
    }

    /// Called on other informational untagged status lines.
    fn on_info(&mut self, message: &str) {
        let _ = message;
    }
}

/// A handler that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl MailboxHandler for NoopHandler {}

/// A handler that logs events via `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl MailboxHandler for LoggingHandler {
    fn on_exists(&mut self, count: u32) {
        tracing::debug!(count, "mailbox EXISTS");
    }

    fn on_recent(&mut self, count: u32) {
        tracing::debug!(count, "mailbox RECENT");
    }

    fn on_expunge(&mut self, seq: u32) {
        tracing::debug!(seq, "message expunged");
    }

    fn on_flags_changed(&mut self, seq: u32, flags: MessageFlags) {
        tracing::debug!(seq, ?flags, "flags changed");
    }

    fn on_bye(&mut self, message: &str) {
        tracing::warn!(message, "server BYE");
    }

    fn on_alert(&mut self, message: &str) {
        tracing::warn!(message, "server ALERT");
    }

    fn on_info(&mut self, message: &str) {
        tracing::trace!(message, "server info");
    }
}

/// An event recorded by [`CollectingHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxEvent {
    /// New message count.
    Exists(u32),
    /// New recent count.
    Recent(u32),
    /// Removed sequence number.
    Expunge(u32),
    /// Flags update for a message.
    FlagsChanged(u32, MessageFlags),
    /// Server is closing the connection.
    Bye(String),
    /// User-visible alert.
    Alert(String),
    /// Other informational text.
    Info(String),
}

/// A handler that collects events for later inspection.
#[derive(Debug, Clone, Default)]
pub struct CollectingHandler {
    /// Events in arrival order.
    pub events: Vec<MailboxEvent>,
}

impl MailboxHandler for CollectingHandler {
    fn on_exists(&mut self, count: u32) {
        self.events.push(MailboxEvent::Exists(count));
    }

    fn on_recent(&mut self, count: u32) {
        self.events.push(MailboxEvent::Recent(count));
    }

    fn on_expunge(&mut self, seq: u32) {
        self.events.push(MailboxEvent::Expunge(seq));
    }

    fn on_flags_changed(&mut self, seq: u32, flags: MessageFlags) {
        self.events.push(MailboxEvent::FlagsChanged(seq, flags));
    }

    fn on_bye(&mut self, message: &str) {
        self.events.push(MailboxEvent::Bye(message.to_string()));
    }

    fn on_alert(&mut self, message: &str) {
        self.events.push(MailboxEvent::Alert(message.to_string()));
    }

    fn on_info(&mut self, message: &str) {
        self.events.push(MailboxEvent::Info(message.to_string()));
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
    fn test_collecting_handler_preserves_order() {
        let mut handler = CollectingHandler::default();
        handler.on_exists(10);
        handler.on_expunge(3);
        handler.on_exists(9);

        assert_eq!(
            handler.events,
            vec![
                MailboxEvent::Exists(10),
                MailboxEvent::Expunge(3),
                MailboxEvent::Exists(9),
            ]
        );
    }

    #[test]
    fn test_noop_handler_accepts_everything() {
        let mut handler = NoopHandler;
        handler.on_bye("going down");
        handler.on_flags_changed(1, MessageFlags::default());
    }
}
