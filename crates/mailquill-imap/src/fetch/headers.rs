//! Bulk header retrieval.
//!
//! One FETCH per contiguous range, with every message's header section
//! landing in a single shared staging buffer; records carry offsets
//! into it instead of owning allocations. If the mailbox grows while
//! the batch is running (`* n EXISTS` mid-command), a tail command is
//! issued for just the new messages, so the caller always gets one
//! record per message that existed when the batch finished.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, FixedOffset};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ProtocolError;
use crate::handler::MailboxHandler;
use crate::parser::FetchFieldParser;
use crate::session::{Session, Step, UntaggedEvent};
use crate::types::MessageFlags;
use crate::{Error, Result};

/// Header fields requested for every message in a batch.
pub const HEADER_FIELDS: &str = "DATE FROM TO CC SUBJECT MESSAGE-ID";

/// Summary data for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    /// Sequence number at batch time.
    pub seq: u32,
    /// UID, when the server volunteered one.
    pub uid: Option<u32>,
    /// Flags at batch time.
    pub flags: MessageFlags,
    /// Server-side arrival time.
    pub internal_date: Option<DateTime<FixedOffset>>,
    /// Full message size in bytes.
    pub size: Option<u32>,
    /// Offset of the header section in the batch staging buffer.
    pub header_offset: usize,
    /// Length of the header section.
    pub header_len: usize,
}

/// A completed header batch.
#[derive(Debug, Clone)]
pub struct HeaderBatch {
    staging: Bytes,
    records: Vec<HeaderRecord>,
}

impl HeaderBatch {
    /// Records in ascending sequence order, one per message.
    #[must_use]
    pub fn records(&self) -> &[HeaderRecord] {
        &self.records
    }

    /// Raw header bytes for a record.
    #[must_use]
    pub fn header_bytes(&self, record: &HeaderRecord) -> &[u8] {
        &self.staging[record.header_offset..record.header_offset + record.header_len]
    }
}

/// Fetches flags, dates, sizes, and header sections for `first..=last`.
///
/// The whole batch either succeeds or fails; no partial result is
/// returned. Mailbox growth observed mid-batch widens the batch (a
/// tail FETCH for the new messages only), and the handler still sees
/// every unsolicited event.
///
/// # Errors
///
/// Returns [`Error::Rejected`] when any FETCH in the batch is refused
/// and protocol or transport errors as usual.
pub async fn fetch_headers<S>(
    session: &mut Session<S>,
    handler: &mut dyn MailboxHandler,
    first: u32,
    last: u32,
) -> Result<HeaderBatch>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if first == 0 || last < first {
        return Err(Error::Protocol(ProtocolError::Malformed(format!(
            "invalid header range {first}:{last}"
        ))));
    }

    let mut staging = BytesMut::new();
    let mut records: BTreeMap<u32, HeaderRecord> = BTreeMap::new();

    let mut range = (first, last);
    let mut batch_end = last;

    // Legacy IMAP4 servers predate BODY.PEEK.
    let header_item = if session.capabilities().imap4rev1 {
        format!("BODY.PEEK[HEADER.FIELDS ({HEADER_FIELDS})]")
    } else {
        format!("RFC822.HEADER.LINES ({HEADER_FIELDS})")
    };

    loop {
        let command = format!(
            "FETCH {}:{} (FLAGS INTERNALDATE RFC822.SIZE {header_item})",
            range.0, range.1
        );
        session.issue(&command).await?;
        tracing::debug!(first = range.0, last = range.1, "header batch issued");

        let mut grown_to: Option<u32> = None;

        loop {
            match session.step().await? {
                Step::Continuation(_) => {
                    return Err(Error::Protocol(ProtocolError::Malformed(
                        "unexpected continuation during FETCH".to_string(),
                    )));
                }
                Step::Untagged(UntaggedEvent::Exists(n)) => {
                    handler.on_exists(n);
                    if n > batch_end {
                        grown_to = Some(n);
                    }
                }
                Step::Untagged(UntaggedEvent::Fetch { seq, fields }) => {
                    let (parsed, header) =
                        read_record(session, &mut staging, &fields).await?;
                    if let Some((header_offset, header_len)) = header {
                        records.insert(
                            seq,
                            HeaderRecord {
                                seq,
                                uid: parsed.uid,
                                flags: parsed.flags.unwrap_or_default(),
                                internal_date: parsed.internal_date,
                                size: parsed.size,
                                header_offset,
                                header_len,
                            },
                        );
                    } else if let Some(flags) = parsed.flags {
                        // Flags-only update; refresh the record if the
                        // message is part of this batch.
                        if let Some(existing) = records.get_mut(&seq) {
                            existing.flags = flags;
                        }
                        handler.on_flags_changed(seq, flags);
                    }
                }
                Step::Untagged(event) => session.dispatch(event, handler).await?,
                Step::Done(completion) => {
                    completion.into_result()?;
                    break;
                }
            }
        }

        match grown_to {
            Some(n) => {
                tracing::debug!(from = batch_end + 1, to = n, "mailbox grew mid-batch");
                range = (batch_end + 1, n);
                batch_end = n;
            }
            None => break,
        }
    }

    Ok(HeaderBatch {
        staging: staging.freeze(),
        records: records.into_values().collect(),
    })
}

/// Parses one FETCH response, landing the header literal in `staging`.
///
/// The second element is the staged header's offset and length; absent
/// for flags-only responses, which are not batch records.
async fn read_record<S>(
    session: &mut Session<S>,
    staging: &mut BytesMut,
    fields: &str,
) -> Result<(crate::parser::FetchFields, Option<(usize, usize)>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut parser = FetchFieldParser::new();
    let mut segment = fields.to_string();
    let mut header: Option<(usize, usize)> = None;

    loop {
        match parser.feed(&segment)? {
            Some(length) => {
                let offset = staging.len();
                let bytes = session.read_literal(length).await?;
                staging.extend_from_slice(&bytes);
                header = Some((offset, length));
                segment = session.read_segment().await?;
            }
            None => break,
        }
    }

    Ok((parser.finish()?, header))
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
    use tokio_test::io::Builder;

    fn fetch_command(tag: &str, first: u32, last: u32) -> String {
        format!(
            "{tag} FETCH {first}:{last} (FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER.FIELDS ({HEADER_FIELDS})])\r\n"
        )
    }

    fn fetch_response(seq: u32, header: &str, size: u32) -> String {
        format!(
            "* {seq} FETCH (FLAGS (\\Seen) INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" RFC822.SIZE {size} BODY[HEADER.FIELDS ({HEADER_FIELDS})] {{{}}}\r\n{header})\r\n",
            header.len()
        )
    }

    #[tokio::test]
    async fn test_two_message_batch() {
        let h1 = "Subject: first\r\n\r\n";
        let h2 = "Subject: second\r\n\r\n";
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(fetch_command("A0000", 1, 2).as_bytes())
            .read(fetch_response(1, h1, 100).as_bytes())
            .read(fetch_response(2, h2, 200).as_bytes())
            .read(b"A0000 OK FETCH completed\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let batch = fetch_headers(&mut session, &mut NoopHandler, 1, 2)
            .await
            .unwrap();

        let records = batch.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].seq, 1);
        assert_eq!(records[1].seq, 2);
        assert_eq!(batch.header_bytes(&records[0]), h1.as_bytes());
        assert_eq!(batch.header_bytes(&records[1]), h2.as_bytes());
        assert_eq!(records[1].size, Some(200));
        assert!(records[0].flags.seen);
        assert!(records[0].internal_date.is_some());
    }

    #[tokio::test]
    async fn test_mid_batch_growth_issues_tail_fetch() {
        let headers: Vec<String> = (1..=6)
            .map(|n| format!("Subject: msg {n}\r\n\r\n"))
            .collect();

        let mut builder = Builder::new();
        builder
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(fetch_command("A0000", 1, 5).as_bytes())
            .read(fetch_response(1, &headers[0], 10).as_bytes())
            .read(fetch_response(2, &headers[1], 10).as_bytes())
            // New mail lands while the batch streams.
            .read(b"* 6 EXISTS\r\n")
            .read(fetch_response(3, &headers[2], 10).as_bytes())
            .read(fetch_response(4, &headers[3], 10).as_bytes())
            .read(fetch_response(5, &headers[4], 10).as_bytes())
            .read(b"A0000 OK FETCH completed\r\n")
            // Tail command covers only the new message.
            .write(fetch_command("A0001", 6, 6).as_bytes())
            .read(fetch_response(6, &headers[5], 10).as_bytes())
            .read(b"A0001 OK FETCH completed\r\n");
        let mock = builder.build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let batch = fetch_headers(&mut session, &mut NoopHandler, 1, 5)
            .await
            .unwrap();

        let records = batch.records();
        assert_eq!(records.len(), 6);
        for (i, record) in records.iter().enumerate() {
            let n = u32::try_from(i).unwrap() + 1;
            assert_eq!(record.seq, n);
            assert_eq!(
                batch.header_bytes(record),
                format!("Subject: msg {n}\r\n\r\n").as_bytes()
            );
        }
    }

    #[tokio::test]
    async fn test_legacy_server_uses_rfc822_header_lines() {
        let h1 = "Subject: old server\r\n\r\n";
        let command = format!(
            "A0000 FETCH 1:1 (FLAGS INTERNALDATE RFC822.SIZE RFC822.HEADER.LINES ({HEADER_FIELDS}))\r\n"
        );
        let response = format!(
            "* 1 FETCH (FLAGS (\\Seen) RFC822.SIZE 90 RFC822.HEADER {{{}}}\r\n{h1})\r\n",
            h1.len()
        );
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4] hi\r\n")
            .write(command.as_bytes())
            .read(response.as_bytes())
            .read(b"A0000 OK FETCH completed\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let batch = fetch_headers(&mut session, &mut NoopHandler, 1, 1)
            .await
            .unwrap();
        assert_eq!(batch.header_bytes(&batch.records()[0]), h1.as_bytes());
    }

    #[tokio::test]
    async fn test_rejection_returns_no_partial_batch() {
        let h1 = "Subject: first\r\n\r\n";
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(fetch_command("A0000", 1, 3).as_bytes())
            .read(fetch_response(1, h1, 100).as_bytes())
            .read(b"A0000 NO FETCH failed: mailbox gone\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let err = fetch_headers(&mut session, &mut NoopHandler, 1, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(m) if m.contains("mailbox gone")));
    }

    #[tokio::test]
    async fn test_invalid_range() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .build();
        let mut session = Session::from_stream(mock).await.unwrap();

        assert!(fetch_headers(&mut session, &mut NoopHandler, 0, 5)
            .await
            .is_err());
        assert!(fetch_headers(&mut session, &mut NoopHandler, 5, 2)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_flags_only_fetch_is_not_a_record() {
        let h1 = "Subject: only\r\n\r\n";
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(fetch_command("A0000", 1, 1).as_bytes())
            .read(fetch_response(1, h1, 100).as_bytes())
            // Unsolicited flags change for some other message.
            .read(b"* 9 FETCH (FLAGS (\\Deleted))\r\n")
            .read(b"A0000 OK FETCH completed\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let batch = fetch_headers(&mut session, &mut NoopHandler, 1, 1)
            .await
            .unwrap();
        assert_eq!(batch.records().len(), 1);
        assert_eq!(batch.records()[0].seq, 1);
    }
}
