//! Full-message retrieval with a rotating file cache.
//!
//! Message bodies are streamed straight from the literal into a file,
//! never buffered whole. The cache has a fixed number of slots; a
//! message's slot is its sequence number modulo the slot count, so
//! adjacent messages evict each other in a round-robin pattern that
//! suits "read a few nearby messages" access. Identity includes the
//! mailbox generation (`UIDVALIDITY`), so stale entries from a reset
//! mailbox can never produce a false hit.

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::handler::MailboxHandler;
use crate::parser::FetchFieldParser;
use crate::session::{Session, Step, UntaggedEvent};
use crate::types::{MessageFlags, MessageId};
use crate::{Error, Result};

/// Default number of cache slots.
pub const DEFAULT_SLOTS: usize = 10;

/// Upper bound on how much of a cached file is scanned for headers.
const HEADER_SCAN_LIMIT: usize = 64 * 1024;

/// Summary header fields re-read from the message on disk.
///
/// The bulk header fetch only sees the fields it asked for and may
/// predate the full message; once the body is materialized the file's
/// own header block is authoritative, so these come from the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    /// `Date:` value, when it parses as RFC 2822.
    pub date: Option<DateTime<FixedOffset>>,
    /// `From:` value, unfolded.
    pub from: Option<String>,
    /// `To:` value, unfolded.
    pub to: Option<String>,
    /// `Subject:` value, unfolded.
    pub subject: Option<String>,
    /// `Message-ID:` value.
    pub message_id: Option<String>,
}

/// A message materialized on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMessage {
    /// Identity the entry was fetched under.
    pub id: MessageId,
    /// File holding the full RFC822 message.
    pub path: PathBuf,
    /// Message size in bytes as received.
    pub size: u64,
    /// Flags observed at fetch time.
    pub flags: MessageFlags,
    /// Header fields re-parsed from the cached file.
    pub headers: MessageHeaders,
}

/// Rotating cache of fully fetched messages.
pub struct MessageCache {
    dir: PathBuf,
    slots: Vec<Option<CachedMessage>>,
}

impl MessageCache {
    /// Creates a cache writing files under `dir` with `slots` slots.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, slots: usize) -> Self {
        Self {
            dir: dir.into(),
            slots: (0..slots.max(1)).map(|_| None).collect(),
        }
    }

    /// Creates a cache with [`DEFAULT_SLOTS`] slots.
    #[must_use]
    pub fn with_default_slots(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, DEFAULT_SLOTS)
    }

    /// Looks up a cached message without touching the network.
    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&CachedMessage> {
        let slot = id.slot(self.slots.len());
        self.slots[slot].as_ref().filter(|entry| entry.id == id)
    }

    /// Returns the cached message, fetching it if necessary.
    ///
    /// A miss evicts the slot's current occupant (its file is removed)
    /// and streams `FETCH n (FLAGS RFC822)` into a fresh file. On any
    /// failure the partial file is removed before the error returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] when the server refuses the FETCH
    /// and protocol or transport errors as usual.
    pub async fn fetch<S>(
        &mut self,
        session: &mut Session<S>,
        handler: &mut dyn MailboxHandler,
        id: MessageId,
    ) -> Result<CachedMessage>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let slot = id.slot(self.slots.len());
        if let Some(entry) = self.slots[slot].as_ref() {
            if entry.id == id {
                tracing::debug!(number = id.number, "message cache hit");
                return Ok(entry.clone());
            }
        }

        if let Some(evicted) = self.slots[slot].take() {
            tracing::debug!(number = evicted.id.number, "evicting cached message");
            let _ = tokio::fs::remove_file(&evicted.path).await;
        }

        let path = self
            .dir
            .join(format!("msg-{}-{}.eml", id.uidvalidity, id.number));

        let fetched = async {
            let (flags, size) = fetch_into(session, handler, id, &path).await?;
            let headers = refresh_headers(&path).await?;
            Ok::<_, Error>((flags, size, headers))
        }
        .await;

        match fetched {
            Ok((flags, size, headers)) => {
                let entry = CachedMessage {
                    id,
                    path,
                    size,
                    flags,
                    headers,
                };
                self.slots[slot] = Some(entry.clone());
                Ok(entry)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                Err(e)
            }
        }
    }

    /// Drops every entry and removes its backing file.
    ///
    /// Called on reconnect or when `UIDVALIDITY` changes.
    pub async fn clear(&mut self) {
        for slot in &mut self.slots {
            if let Some(entry) = slot.take() {
                let _ = tokio::fs::remove_file(&entry.path).await;
            }
        }
    }
}

/// Runs the FETCH and streams the body literal into `path`.
async fn fetch_into<S>(
    session: &mut Session<S>,
    handler: &mut dyn MailboxHandler,
    id: MessageId,
    path: &Path,
) -> Result<(MessageFlags, u64)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    session
        .issue(&format!("FETCH {} (FLAGS RFC822)", id.number))
        .await?;

    let mut flags = MessageFlags::default();
    let mut size: Option<u64> = None;

    loop {
        match session.step().await? {
            Step::Continuation(_) => {
                return Err(Error::Protocol(ProtocolError::Malformed(
                    "unexpected continuation during FETCH".to_string(),
                )));
            }
            Step::Untagged(UntaggedEvent::Fetch { seq, fields }) if seq == id.number => {
                let (parsed, written) = read_body(session, &fields, path).await?;
                if let Some(f) = parsed.flags {
                    flags = f;
                }
                if written.is_some() {
                    size = written;
                }
            }
            Step::Untagged(event) => session.dispatch(event, handler).await?,
            Step::Done(completion) => {
                completion.into_result()?;
                break;
            }
        }
    }

    let Some(size) = size else {
        return Err(Error::Protocol(ProtocolError::Malformed(format!(
            "server sent no body for message {}",
            id.number
        ))));
    };

    tracing::debug!(number = id.number, size, "message cached");
    Ok((flags, size))
}

/// Parses the response for our message, streaming its literal to disk.
async fn read_body<S>(
    session: &mut Session<S>,
    fields: &str,
    path: &Path,
) -> Result<(crate::parser::FetchFields, Option<u64>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut parser = FetchFieldParser::new();
    let mut segment = fields.to_string();
    let mut written: Option<u64> = None;

    loop {
        match parser.feed(&segment)? {
            Some(length) => {
                let mut file = tokio::fs::File::create(path).await?;
                session.read_literal_to(length, &mut file).await?;
                file.flush().await?;
                written = Some(length as u64);
                segment = session.read_segment().await?;
            }
            None => break,
        }
    }

    Ok((parser.finish()?, written))
}

/// Re-parses the header block at the start of the cached file.
///
/// Reads until the blank line separating headers from the body, capped
/// at [`HEADER_SCAN_LIMIT`]; a message with no blank line in that span
/// yields whatever fields were seen.
async fn refresh_headers(path: &Path) -> Result<MessageHeaders> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut block = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        block.extend_from_slice(&chunk[..n]);
        if let Some(end) = block.windows(4).position(|w| w == b"\r\n\r\n") {
            block.truncate(end + 2);
            break;
        }
        if block.len() >= HEADER_SCAN_LIMIT {
            break;
        }
    }

    Ok(parse_headers(&block))
}

/// Extracts the summary fields from a raw header block, unfolding
/// continuation lines first.
fn parse_headers(block: &[u8]) -> MessageHeaders {
    let text = String::from_utf8_lossy(block);
    let mut unfolded: Vec<String> = Vec::new();

    for line in text.split("\r\n") {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = unfolded.last_mut() {
                last.push(' ');
                last.push_str(line.trim_start());
            }
        } else if !line.is_empty() {
            unfolded.push(line.to_string());
        }
    }

    let mut headers = MessageHeaders::default();
    for line in unfolded {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.to_ascii_lowercase().as_str() {
            "date" => headers.date = DateTime::parse_from_rfc2822(value).ok(),
            "from" => headers.from = Some(value.to_string()),
            "to" => headers.to = Some(value.to_string()),
            "subject" => headers.subject = Some(value.to_string()),
            "message-id" => headers.message_id = Some(value.to_string()),
            _ => {}
        }
    }
    headers
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
    use crate::handler::NoopHandler;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::io::Builder;

    static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

    async fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "mailquill-cache-test-{}-{}",
            std::process::id(),
            DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        dir
    }

    fn body_response(seq: u32, body: &str) -> String {
        format!(
            "* {seq} FETCH (FLAGS (\\Seen) RFC822 {{{}}}\r\n{body})\r\n",
            body.len()
        )
    }

    #[tokio::test]
    async fn test_fetch_materializes_file() {
        let dir = temp_dir().await;
        let body = "Subject: hello\r\n\r\nworld\r\n";
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0000 FETCH 3 (FLAGS RFC822)\r\n")
            .read(body_response(3, body).as_bytes())
            .read(b"A0000 OK FETCH completed\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let mut cache = MessageCache::with_default_slots(&dir);
        let id = MessageId::new(1234, 3);

        let entry = cache.fetch(&mut session, &mut NoopHandler, id).await.unwrap();
        assert_eq!(entry.size, body.len() as u64);
        assert!(entry.flags.seen);
        assert_eq!(entry.headers.subject.as_deref(), Some("hello"));

        let on_disk = tokio::fs::read(&entry.path).await.unwrap();
        assert_eq!(on_disk, body.as_bytes());

        cache.clear().await;
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_headers_refreshed_from_cached_file() {
        let dir = temp_dir().await;
        let body = "Date: Mon, 7 Feb 1994 21:52:25 -0800\r\n\
                    From: Fred Foobar <foobar@example.com>\r\n\
                    To: joe@example.com\r\n\
                    Subject: afternoon\r\n meeting\r\n\
                    Message-ID: <B27397-0100000@example.com>\r\n\
                    \r\n\
                    Hello Joe.\r\n";
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0000 FETCH 4 (FLAGS RFC822)\r\n")
            .read(body_response(4, body).as_bytes())
            .read(b"A0000 OK FETCH completed\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let mut cache = MessageCache::with_default_slots(&dir);

        let entry = cache
            .fetch(&mut session, &mut NoopHandler, MessageId::new(1, 4))
            .await
            .unwrap();
        assert_eq!(entry.headers.subject.as_deref(), Some("afternoon meeting"));
        assert_eq!(
            entry.headers.from.as_deref(),
            Some("Fred Foobar <foobar@example.com>")
        );
        assert_eq!(entry.headers.to.as_deref(), Some("joe@example.com"));
        assert_eq!(
            entry.headers.message_id.as_deref(),
            Some("<B27397-0100000@example.com>")
        );
        let date = entry.headers.date.unwrap();
        assert_eq!(date.timestamp(), 760686745);

        cache.clear().await;
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[test]
    fn test_parse_headers_without_blank_line() {
        let headers = parse_headers(b"Subject: dangling\r\nX-Other: ignored");
        assert_eq!(headers.subject.as_deref(), Some("dangling"));
        assert!(headers.date.is_none());
    }

    #[tokio::test]
    async fn test_second_fetch_is_a_cache_hit() {
        let dir = temp_dir().await;
        let body = "Subject: cached\r\n\r\n";
        // The mock carries exactly one exchange: a second network fetch
        // would panic on missing expectations.
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0000 FETCH 7 (FLAGS RFC822)\r\n")
            .read(body_response(7, body).as_bytes())
            .read(b"A0000 OK FETCH completed\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let mut cache = MessageCache::with_default_slots(&dir);
        let id = MessageId::new(9, 7);

        let first = cache.fetch(&mut session, &mut NoopHandler, id).await.unwrap();
        let second = cache.fetch(&mut session, &mut NoopHandler, id).await.unwrap();
        assert_eq!(first, second);
        assert!(cache.get(id).is_some());

        cache.clear().await;
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_same_slot_evicts_and_unlinks() {
        let dir = temp_dir().await;
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0000 FETCH 3 (FLAGS RFC822)\r\n")
            .read(body_response(3, "three\r\n").as_bytes())
            .read(b"A0000 OK done\r\n")
            .write(b"A0001 FETCH 13 (FLAGS RFC822)\r\n")
            .read(body_response(13, "thirteen\r\n").as_bytes())
            .read(b"A0001 OK done\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        // 3 and 13 share slot 3 of 10.
        let mut cache = MessageCache::new(&dir, 10);
        let first = cache
            .fetch(&mut session, &mut NoopHandler, MessageId::new(1, 3))
            .await
            .unwrap();
        let second = cache
            .fetch(&mut session, &mut NoopHandler, MessageId::new(1, 13))
            .await
            .unwrap();

        assert!(cache.get(MessageId::new(1, 3)).is_none());
        assert!(cache.get(MessageId::new(1, 13)).is_some());
        assert!(!tokio::fs::try_exists(&first.path).await.unwrap());
        assert!(tokio::fs::try_exists(&second.path).await.unwrap());

        cache.clear().await;
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_uidvalidity_change_misses() {
        let dir = temp_dir().await;
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0000 FETCH 3 (FLAGS RFC822)\r\n")
            .read(body_response(3, "old generation\r\n").as_bytes())
            .read(b"A0000 OK done\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let mut cache = MessageCache::new(&dir, 10);
        cache
            .fetch(&mut session, &mut NoopHandler, MessageId::new(1, 3))
            .await
            .unwrap();

        assert!(cache.get(MessageId::new(2, 3)).is_none());

        cache.clear().await;
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_removes_partial_file() {
        let dir = temp_dir().await;
        // Literal declares 100 bytes but the connection dies after 7.
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(b"A0000 FETCH 3 (FLAGS RFC822)\r\n")
            .read(b"* 3 FETCH (FLAGS (\\Seen) RFC822 {100}\r\n")
            .read(b"partial")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let mut cache = MessageCache::new(&dir, 10);
        let id = MessageId::new(1, 3);

        let err = cache
            .fetch(&mut session, &mut NoopHandler, id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::LiteralMismatch { .. })));
        assert!(cache.get(id).is_none());

        let expected = dir.join("msg-1-3.eml");
        assert!(!tokio::fs::try_exists(&expected).await.unwrap());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
