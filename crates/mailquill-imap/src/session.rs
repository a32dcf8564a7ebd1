//! Command/response correlation over one connection.
//!
//! A [`Session`] owns the framed stream and enforces the engine's core
//! invariant: one command in flight at a time. [`Session::issue`] tags
//! and sends a command, then the caller pulls [`Step`]s until the
//! matching tagged completion arrives. Untagged responses observed in
//! between are surfaced as parsed events, so reacting to mid-command
//! mailbox changes is ordinary control flow for the caller.

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::{FramedStream, ImapStream};
use crate::error::ProtocolError;
use crate::handler::{MailboxHandler, NoopHandler};
use crate::parser::FetchFieldParser;
use crate::types::{Capabilities, MessageFlags, Tag};
use crate::wire::{self, ServerReply, Status};
use crate::{Error, Result};

/// Tag generator for IMAP commands.
///
/// Generates unique sequential tags in the format "A0000", "A0001", etc.
#[derive(Debug)]
pub struct TagGenerator {
    counter: AtomicU32,
    prefix: char,
}

impl TagGenerator {
    /// Creates a new tag generator with the given prefix.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self {
            counter: AtomicU32::new(0),
            prefix,
        }
    }

    /// Generates the next tag.
    ///
    /// # Panics
    ///
    /// Panics if the tag counter would overflow `u32::MAX`. In practice
    /// this would require 4+ billion commands in a single session.
    #[must_use]
    pub fn next(&self) -> Tag {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        assert!(n != u32::MAX, "tag counter overflow");
        Tag::new(format!("{}{:04}", self.prefix, n))
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('A')
    }
}

/// A tagged command completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Completion condition.
    pub status: Status,
    /// Server's completion text, verbatim.
    pub text: String,
}

impl Completion {
    /// Returns true for `OK` (and `PREAUTH`) completions.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, Status::Ok | Status::Preauth)
    }

    /// Converts to a `Result`, surfacing `NO`/`BAD`/`BYE` text verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] for non-OK completions.
    pub fn into_result(self) -> Result<String> {
        if self.is_ok() {
            Ok(self.text)
        } else {
            Err(Error::Rejected(self.text))
        }
    }
}

/// A parsed untagged response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UntaggedEvent {
    /// `* n EXISTS` — mailbox now holds `n` messages.
    Exists(u32),
    /// `* n RECENT`.
    Recent(u32),
    /// `* n EXPUNGE` — message `n` removed, later numbers shift down.
    Expunge(u32),
    /// `* n FETCH (...` — data for message `n`; `fields` is the raw
    /// field list, which may end in a literal marker the caller must
    /// consume before reading the next line.
    Fetch {
        /// Message sequence number.
        seq: u32,
        /// Field list text after `FETCH `.
        fields: String,
    },
    /// `* CAPABILITY ...` (already absorbed into the session state).
    Capabilities(Capabilities),
    /// `* BYE ...` — the server is closing the connection.
    Bye(String),
    /// Untagged status with an `[ALERT]` code; must reach the user.
    Alert(String),
    /// Other untagged line, verbatim.
    Info(String),
}

/// One step of a command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// `+ ...` — the server wants more data for the current command.
    Continuation(String),
    /// An untagged response arrived.
    Untagged(UntaggedEvent),
    /// The tagged completion for the command in flight.
    Done(Completion),
}

/// An IMAP session over any async byte stream.
#[derive(Debug)]
pub struct Session<S> {
    framed: FramedStream<S>,
    tags: TagGenerator,
    capabilities: Capabilities,
    in_flight: Option<Tag>,
    pre_authenticated: bool,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Consumes the server greeting and establishes a session.
    ///
    /// Capabilities are taken from the greeting's `[CAPABILITY ...]`
    /// response code when present, otherwise fetched with an explicit
    /// CAPABILITY command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] for a `BYE` greeting and
    /// [`Error::Protocol`] for anything that is not a greeting.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut framed = FramedStream::new(stream);
        let greeting = framed.read_line().await?;

        let ServerReply::Untagged(payload) = wire::classify(&greeting)? else {
            return Err(Error::Protocol(ProtocolError::Malformed(format!(
                "greeting is not untagged: {greeting}"
            ))));
        };

        let (word, text) = payload.split_once(' ').unwrap_or((payload, ""));
        let pre_authenticated = match word.to_ascii_uppercase().as_str() {
            "OK" => false,
            "PREAUTH" => true,
            "BYE" => return Err(Error::Rejected(text.to_string())),
            _ => {
                return Err(Error::Protocol(ProtocolError::Malformed(format!(
                    "unexpected greeting: {greeting}"
                ))));
            }
        };

        tracing::debug!(pre_authenticated, "greeting received");

        let mut session = Self {
            framed,
            tags: TagGenerator::default(),
            capabilities: capability_code(text).unwrap_or_default(),
            in_flight: None,
            pre_authenticated,
        };

        if !session.capabilities.usable() {
            session.refresh_capabilities().await?;
        }

        Ok(session)
    }

    /// The server's advertised capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Whether the greeting was `PREAUTH` (no authentication needed).
    #[must_use]
    pub const fn pre_authenticated(&self) -> bool {
        self.pre_authenticated
    }

    /// Tags and sends a command line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if a command is already in flight and
    /// [`Error::ConnectionLost`] if the write fails.
    pub async fn issue(&mut self, command: &str) -> Result<Tag> {
        if self.in_flight.is_some() {
            return Err(Error::Protocol(ProtocolError::Malformed(
                "command already in flight".to_string(),
            )));
        }
        let tag = self.tags.next();
        self.framed
            .write_line(&format!("{tag} {command}"))
            .await
            .map_err(Error::into_lost)?;
        tracing::trace!(tag = %tag, "command issued");
        self.in_flight = Some(tag.clone());
        Ok(tag)
    }

    /// Reads and classifies the next server line.
    ///
    /// Untagged non-FETCH lines that end in a literal marker have the
    /// literal drained here so the stream stays framed; FETCH literals
    /// are left for the caller, which knows where the bytes belong.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnmatchedTag`] when a tagged completion
    /// does not match the command in flight.
    pub async fn step(&mut self) -> Result<Step> {
        let line = self.framed.read_line().await.map_err(Error::into_lost)?;

        match wire::classify(&line)? {
            ServerReply::Continuation(prompt) => Ok(Step::Continuation(prompt.to_string())),
            ServerReply::Untagged(payload) => {
                let payload = payload.to_string();
                let event = self.untagged(&payload)?;
                if !matches!(event, UntaggedEvent::Fetch { .. }) {
                    self.drain_literals(&payload).await?;
                }
                Ok(Step::Untagged(event))
            }
            ServerReply::Tagged { tag, status, text } => {
                let expected = self.in_flight.take().ok_or_else(|| {
                    Error::Protocol(ProtocolError::UnmatchedTag {
                        expected: "<none>".to_string(),
                        got: tag.to_string(),
                    })
                })?;
                if expected.as_str() != tag {
                    return Err(Error::Protocol(ProtocolError::UnmatchedTag {
                        expected: expected.as_str().to_string(),
                        got: tag.to_string(),
                    }));
                }
                Ok(Step::Done(Completion {
                    status,
                    text: text.to_string(),
                }))
            }
        }
    }

    /// Pulls steps until the tagged completion, reporting untagged
    /// traffic to `handler`.
    ///
    /// # Errors
    ///
    /// A continuation request here is a protocol violation; commands
    /// that expect continuations drive [`Session::step`] themselves.
    pub async fn drive_to_completion(
        &mut self,
        handler: &mut dyn MailboxHandler,
    ) -> Result<Completion> {
        loop {
            match self.step().await? {
                Step::Continuation(_) => {
                    return Err(Error::Protocol(ProtocolError::Malformed(
                        "unexpected continuation request".to_string(),
                    )));
                }
                Step::Untagged(event) => self.dispatch(event, handler).await?,
                Step::Done(completion) => return Ok(completion),
            }
        }
    }

    /// Issues a command and drives it to completion.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::issue`] and [`Session::drive_to_completion`]
    /// failures.
    pub async fn run(
        &mut self,
        command: &str,
        handler: &mut dyn MailboxHandler,
    ) -> Result<Completion> {
        self.issue(command).await?;
        self.drive_to_completion(handler).await
    }

    /// Issues NOOP, giving the server a chance to volunteer updates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] if the server answers `NO`/`BAD`.
    pub async fn noop(&mut self, handler: &mut dyn MailboxHandler) -> Result<()> {
        self.run("NOOP", handler).await?.into_result()?;
        Ok(())
    }

    /// Issues LOGOUT and waits for completion.
    ///
    /// # Errors
    ///
    /// Propagates transport failures; the `BYE` the server sends first
    /// is expected and not an error.
    pub async fn logout(mut self) -> Result<()> {
        self.run("LOGOUT", &mut NoopHandler).await?.into_result()?;
        Ok(())
    }

    /// Re-fetches capabilities with an explicit CAPABILITY command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] if the server answers `NO`/`BAD`.
    pub async fn refresh_capabilities(&mut self) -> Result<()> {
        self.run("CAPABILITY", &mut NoopHandler)
            .await?
            .into_result()?;
        Ok(())
    }

    /// Dispatches one untagged event to a handler.
    ///
    /// Unsolicited FETCH data is parsed for flags (literals drained) so
    /// flag changes reach the handler even mid-command.
    pub(crate) async fn dispatch(
        &mut self,
        event: UntaggedEvent,
        handler: &mut dyn MailboxHandler,
    ) -> Result<()> {
        match event {
            UntaggedEvent::Exists(n) => handler.on_exists(n),
            UntaggedEvent::Recent(n) => handler.on_recent(n),
            UntaggedEvent::Expunge(n) => handler.on_expunge(n),
            UntaggedEvent::Capabilities(_) => {}
            UntaggedEvent::Bye(m) => handler.on_bye(&m),
            UntaggedEvent::Alert(m) => handler.on_alert(&m),
            UntaggedEvent::Info(m) => handler.on_info(&m),
            UntaggedEvent::Fetch { seq, fields } => {
                if let Some(flags) = self.discard_fetch(&fields).await? {
                    handler.on_flags_changed(seq, flags);
                }
            }
        }
        Ok(())
    }

    /// Parses an unsolicited FETCH for flags, discarding any literals.
    async fn discard_fetch(&mut self, first: &str) -> Result<Option<MessageFlags>> {
        let mut parser = FetchFieldParser::new();
        let mut segment = first.to_string();
        loop {
            match parser.feed(&segment)? {
                Some(len) => {
                    let mut sink = tokio::io::sink();
                    self.framed
                        .read_literal_into(len, &mut sink)
                        .await
                        .map_err(Error::into_lost)?;
                    segment = self.framed.read_line().await.map_err(Error::into_lost)?;
                }
                None => break,
            }
        }
        Ok(parser.finish()?.flags)
    }

    /// Drains trailing literals on untagged lines we do not interpret.
    async fn drain_literals(&mut self, first: &str) -> Result<()> {
        let mut line = first.to_string();
        while let Some(marker) = wire::literal_at_end(&line)? {
            let mut sink = tokio::io::sink();
            self.framed
                .read_literal_into(marker.length, &mut sink)
                .await
                .map_err(Error::into_lost)?;
            line = self.framed.read_line().await.map_err(Error::into_lost)?;
        }
        Ok(())
    }

    /// Parses one untagged payload into an event.
    fn untagged(&mut self, payload: &str) -> Result<UntaggedEvent> {
        let (first, rest) = payload.split_once(' ').unwrap_or((payload, ""));

        if let Ok(n) = first.parse::<u32>() {
            let (kind, data) = rest.split_once(' ').unwrap_or((rest, ""));
            return match kind.to_ascii_uppercase().as_str() {
                "EXISTS" => Ok(UntaggedEvent::Exists(n)),
                "RECENT" => Ok(UntaggedEvent::Recent(n)),
                "EXPUNGE" => Ok(UntaggedEvent::Expunge(n)),
                "FETCH" => Ok(UntaggedEvent::Fetch {
                    seq: n,
                    fields: data.to_string(),
                }),
                _ => Err(Error::Protocol(ProtocolError::Malformed(format!(
                    "unknown numbered response: {payload}"
                )))),
            };
        }

        match first.to_ascii_uppercase().as_str() {
            "CAPABILITY" => {
                let caps = Capabilities::parse(rest);
                self.capabilities = caps.clone();
                Ok(UntaggedEvent::Capabilities(caps))
            }
            "BYE" => Ok(UntaggedEvent::Bye(rest.to_string())),
            "OK" | "NO" | "BAD" | "PREAUTH" => {
                if let Some(caps) = capability_code(rest) {
                    self.capabilities = caps.clone();
                    return Ok(UntaggedEvent::Capabilities(caps));
                }
                if let Some(alert) = rest.strip_prefix("[ALERT]") {
                    Ok(UntaggedEvent::Alert(alert.trim_start().to_string()))
                } else {
                    Ok(UntaggedEvent::Info(rest.to_string()))
                }
            }
            // Data lines we carry no state for (FLAGS, LIST, SEARCH, ...).
            _ => Ok(UntaggedEvent::Info(payload.to_string())),
        }
    }

    /// Sends a bare line (auth continuations, literal trailers).
    pub(crate) async fn send_line(&mut self, line: &str) -> Result<()> {
        self.framed.write_line(line).await.map_err(Error::into_lost)
    }

    /// Sends raw bytes without framing or flushing.
    pub(crate) async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.framed.write_raw(data).await.map_err(Error::into_lost)
    }

    /// Flushes pending raw writes.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        self.framed.flush().await.map_err(Error::into_lost)
    }

    /// Reads the next line segment of a response spanning literals.
    pub(crate) async fn read_segment(&mut self) -> Result<String> {
        self.framed.read_line().await.map_err(Error::into_lost)
    }

    /// Streams a literal's bytes into `sink`.
    pub(crate) async fn read_literal_to<W>(&mut self, length: usize, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        self.framed
            .read_literal_into(length, sink)
            .await
            .map_err(Error::into_lost)
    }

    /// Reads a literal's bytes into memory.
    pub(crate) async fn read_literal(&mut self, length: usize) -> Result<Vec<u8>> {
        self.framed.read_literal(length).await.map_err(Error::into_lost)
    }
}

impl Session<ImapStream> {
    /// Upgrades a plaintext session with STARTTLS.
    ///
    /// Capabilities are refreshed afterwards; pre-TLS capabilities may
    /// have been tampered with and must not be trusted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] if the server refuses STARTTLS, or a
    /// TLS error if the handshake fails.
    pub async fn starttls(mut self, host: &str) -> Result<Self> {
        self.run("STARTTLS", &mut NoopHandler).await?.into_result()?;

        let Self {
            framed,
            tags,
            pre_authenticated,
            ..
        } = self;
        let stream = framed.into_inner().upgrade_to_tls(host).await?;

        let mut session = Self {
            framed: FramedStream::new(stream),
            tags,
            capabilities: Capabilities::default(),
            in_flight: None,
            pre_authenticated,
        };
        session.refresh_capabilities().await?;
        Ok(session)
    }
}

/// Extracts a `[CAPABILITY ...]` response code from status text.
fn capability_code(text: &str) -> Option<Capabilities> {
    let rest = text.strip_prefix('[')?;
    let end = rest.find(']')?;
    let code = &rest[..end];
    let (word, listing) = code.split_once(' ')?;
    if !word.eq_ignore_ascii_case("CAPABILITY") {
        return None;
    }
    Some(Capabilities::parse(listing))
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
    use crate::handler::{CollectingHandler, MailboxEvent};
    use tokio_test::io::Builder;

    #[test]
    fn test_tag_generation() {
        let tags = TagGenerator::default();
        assert_eq!(tags.next().as_str(), "A0000");
        assert_eq!(tags.next().as_str(), "A0001");
    }

    #[test]
    fn test_capability_code_extraction() {
        let caps = capability_code("[CAPABILITY IMAP4rev1 AUTH=PLAIN] ready").unwrap();
        assert!(caps.imap4rev1);
        assert_eq!(caps.auth, vec!["PLAIN"]);

        assert!(capability_code("[UIDVALIDITY 3857529045] ok").is_none());
        assert!(capability_code("no code here").is_none());
    }

    #[tokio::test]
    async fn test_greeting_with_capability_code() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=PLAIN] server ready\r\n")
            .build();

        let session = Session::from_stream(mock).await.unwrap();
        assert!(session.capabilities().imap4rev1);
        assert!(session.capabilities().sasl_ir);
        assert!(!session.pre_authenticated());
    }

    #[tokio::test]
    async fn test_greeting_split_across_reads() {
        // The CRLF arrives in a separate TCP segment.
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r")
            .read(b"\n")
            .build();

        let session = Session::from_stream(mock).await.unwrap();
        assert!(session.capabilities().imap4rev1);
    }

    #[tokio::test]
    async fn test_greeting_without_code_fetches_capabilities() {
        let mock = Builder::new()
            .read(b"* OK server ready\r\n")
            .write(b"A0000 CAPABILITY\r\n")
            .read(b"* CAPABILITY IMAP4rev1 LITERAL+\r\n")
            .read(b"A0000 OK done\r\n")
            .build();

        let session = Session::from_stream(mock).await.unwrap();
        assert!(session.capabilities().imap4rev1);
        assert!(session.capabilities().literal_plus);
    }

    #[tokio::test]
    async fn test_preauth_greeting() {
        let mock = Builder::new()
            .read(b"* PREAUTH [CAPABILITY IMAP4rev1] logged in already\r\n")
            .build();

        let session = Session::from_stream(mock).await.unwrap();
        assert!(session.pre_authenticated());
    }

    #[tokio::test]
    async fn test_bye_greeting_is_rejected() {
        let mock = Builder::new()
            .read(b"* BYE too many connections\r\n")
            .build();

        let err = Session::from_stream(mock).await.unwrap_err();
        assert!(matches!(err, Error::Rejected(m) if m.contains("too many")));
    }

    #[tokio::test]
    async fn test_unmatched_tag() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0000 NOOP\r\n")
            .read(b"B9999 OK done\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let err = session.noop(&mut NoopHandler).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnmatchedTag { .. })
        ));
    }

    #[tokio::test]
    async fn test_info_line_ending_in_braces_is_not_a_literal() {
        // Some servers quote backend chatter in status lines; "{ok}" is
        // text, not a literal announcement.
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0000 NOOP\r\n")
            .read(b"* OK backend said {ok}\r\n")
            .read(b"A0000 OK NOOP completed\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let mut handler = CollectingHandler::default();
        session.noop(&mut handler).await.unwrap();

        assert_eq!(
            handler.events,
            vec![MailboxEvent::Info("backend said {ok}".to_string())]
        );
    }

    #[tokio::test]
    async fn test_untagged_dispatch_during_command() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0000 NOOP\r\n")
            .read(b"* 12 EXISTS\r\n")
            .read(b"* 3 EXPUNGE\r\n")
            .read(b"* OK [ALERT] maintenance at noon\r\n")
            .read(b"A0000 OK NOOP completed\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let mut handler = CollectingHandler::default();
        session.noop(&mut handler).await.unwrap();

        assert_eq!(
            handler.events,
            vec![
                MailboxEvent::Exists(12),
                MailboxEvent::Expunge(3),
                MailboxEvent::Alert("maintenance at noon".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unsolicited_fetch_reports_flags() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0000 NOOP\r\n")
            .read(b"* 7 FETCH (FLAGS (\\Seen \\Flagged))\r\n")
            .read(b"A0000 OK done\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let mut handler = CollectingHandler::default();
        session.noop(&mut handler).await.unwrap();

        assert_eq!(handler.events.len(), 1);
        let MailboxEvent::FlagsChanged(seq, flags) = &handler.events[0] else {
            panic!("expected flags change");
        };
        assert_eq!(*seq, 7);
        assert!(flags.seen);
        assert!(flags.flagged);
    }

    #[tokio::test]
    async fn test_rejected_completion_text_is_verbatim() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0000 NOOP\r\n")
            .read(b"A0000 NO [INUSE] mailbox locked\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let err = session.noop(&mut NoopHandler).await.unwrap_err();
        assert!(matches!(err, Error::Rejected(m) if m == "[INUSE] mailbox locked"));
    }

    #[tokio::test]
    async fn test_io_failure_mid_command_is_connection_lost() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0000 NOOP\r\n")
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let err = session.noop(&mut NoopHandler).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
    }

    #[tokio::test]
    async fn test_capability_refresh_via_untagged() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0000 CAPABILITY\r\n")
            .read(b"* CAPABILITY IMAP4rev1 UIDPLUS IDLE\r\n")
            .read(b"A0000 OK done\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        assert!(!session.capabilities().uidplus);
        session.refresh_capabilities().await.unwrap();
        assert!(session.capabilities().uidplus);
        assert!(session.capabilities().idle);
    }
}
