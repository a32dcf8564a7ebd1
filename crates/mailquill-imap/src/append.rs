//! APPEND with CRLF-normalized literals.
//!
//! IMAP literals count exact octets and message bodies must use CRLF
//! line endings, so the source is read twice: a dry pass computes the
//! normalized length for the `{N}` marker, then a second pass streams
//! the normalized bytes. The two passes share one normalization
//! routine, which keeps the counts honest by construction.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite};

use crate::error::ProtocolError;
use crate::handler::MailboxHandler;
use crate::session::{Session, Step};
use crate::{Error, Result};

/// Chunk size for both passes.
const CHUNK_SIZE: usize = 8192;

/// Appends a message to `mailbox`.
///
/// Bare LF line endings in the source are normalized to CRLF on the
/// wire; the source itself is never modified. With `LITERAL+` the
/// payload follows the command immediately; otherwise the encoder
/// waits for the server's continuation and surfaces a refusal (quota,
/// bad mailbox name) verbatim before any payload bytes are sent.
///
/// Returns the server's completion text (which carries `[APPENDUID]`
/// on UIDPLUS servers).
///
/// # Errors
///
/// Returns [`Error::Rejected`] with the server's text when the append
/// is refused, and protocol or transport errors as usual.
pub async fn append<S, R>(
    session: &mut Session<S>,
    handler: &mut dyn MailboxHandler,
    mailbox: &str,
    source: &mut R,
) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncSeek + Unpin,
{
    let length = normalized_length(source).await?;
    source.rewind().await?;

    let non_sync = session.capabilities().literal_plus;
    let marker = if non_sync {
        format!("{{{length}+}}")
    } else {
        format!("{{{length}}}")
    };
    session
        .issue(&format!("APPEND {} {marker}", quote_mailbox(mailbox)))
        .await?;
    tracing::debug!(mailbox, length, non_sync, "append issued");

    if !non_sync {
        // The server accepts or refuses before any payload moves.
        loop {
            match session.step().await? {
                Step::Continuation(_) => break,
                Step::Untagged(event) => session.dispatch(event, handler).await?,
                Step::Done(completion) => {
                    // NO/BAD is an ordinary refusal; an OK here means
                    // the server completed a command it never received
                    // the payload for.
                    let text = completion.into_result()?;
                    return Err(Error::Protocol(ProtocolError::Malformed(format!(
                        "APPEND completed before its literal was sent: {text}"
                    ))));
                }
            }
        }
    }

    stream_normalized(session, source, length).await?;
    session.send_line("").await?;

    session.drive_to_completion(handler).await?.into_result()
}

/// Dry pass: the exact byte count the normalized stream will produce.
async fn normalized_length<R>(source: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; CHUNK_SIZE];
    let mut out = Vec::with_capacity(CHUNK_SIZE + 1);
    let mut prev = 0u8;
    let mut total: u64 = 0;

    loop {
        let n = source.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        out.clear();
        normalize_into(&chunk[..n], &mut prev, &mut out);
        total += out.len() as u64;
    }

    Ok(total)
}

/// Second pass: stream the normalized bytes, verifying the count.
async fn stream_normalized<S, R>(
    session: &mut Session<S>,
    source: &mut R,
    declared: u64,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; CHUNK_SIZE];
    let mut out = Vec::with_capacity(CHUNK_SIZE + 1);
    let mut prev = 0u8;
    let mut sent: u64 = 0;

    loop {
        let n = source.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        out.clear();
        normalize_into(&chunk[..n], &mut prev, &mut out);
        session.send_raw(&out).await?;
        sent += out.len() as u64;
    }
    session.flush().await?;

    // A source that changed between the passes has already desynced
    // the literal framing; nothing after this can be trusted.
    if sent != declared {
        return Err(Error::Protocol(ProtocolError::LiteralMismatch {
            declared: usize::try_from(declared).unwrap_or(usize::MAX),
            got: usize::try_from(sent).unwrap_or(usize::MAX),
        }));
    }
    Ok(())
}

/// Appends `chunk` to `out` with bare LFs expanded to CRLF.
///
/// `prev` carries the last byte across chunk boundaries so an LF at a
/// chunk start still sees the CR before it.
fn normalize_into(chunk: &[u8], prev: &mut u8, out: &mut Vec<u8>) {
    for &byte in chunk {
        if byte == b'\n' && *prev != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        *prev = byte;
    }
}

/// Quotes a mailbox name for the wire.
fn quote_mailbox(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for c in name.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
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
    use proptest::prelude::*;
    use std::io::Cursor;
    use tokio_test::io::Builder;

    fn normalize_all(input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut prev = 0u8;
        normalize_into(input, &mut prev, &mut out);
        out
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_all(b"a\nb"), b"a\r\nb");
        assert_eq!(normalize_all(b"a\r\nb"), b"a\r\nb");
        assert_eq!(normalize_all(b"\n\n"), b"\r\n\r\n");
        assert_eq!(normalize_all(b"a\rb"), b"a\rb");
        assert_eq!(normalize_all(b""), b"");
    }

    #[test]
    fn test_normalization_across_chunk_boundary() {
        let mut out = Vec::new();
        let mut prev = 0u8;
        normalize_into(b"line\r", &mut prev, &mut out);
        normalize_into(b"\nnext", &mut prev, &mut out);
        assert_eq!(out, b"line\r\nnext");
    }

    #[test]
    fn test_quote_mailbox() {
        assert_eq!(quote_mailbox("INBOX"), "\"INBOX\"");
        assert_eq!(quote_mailbox("Sent Items"), "\"Sent Items\"");
        assert_eq!(quote_mailbox("odd\"name"), "\"odd\\\"name\"");
    }

    #[tokio::test]
    async fn test_append_with_literal_plus() {
        let message = b"Subject: test\n\nbody\n";
        let normalized = b"Subject: test\r\n\r\nbody\r\n";
        let command = format!("A0000 APPEND \"INBOX\" {{{}+}}\r\n", normalized.len());

        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 LITERAL+] hi\r\n")
            .write(command.as_bytes())
            .write(normalized)
            .write(b"\r\n")
            .read(b"A0000 OK [APPENDUID 38505 3955] APPEND completed\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let mut source = Cursor::new(message.to_vec());
        let text = append(&mut session, &mut NoopHandler, "INBOX", &mut source)
            .await
            .unwrap();
        assert!(text.contains("APPENDUID 38505 3955"));
    }

    #[tokio::test]
    async fn test_append_waits_for_continuation() {
        let message = b"Subject: sync\r\n\r\nok\r\n";
        let command = format!("A0000 APPEND \"Drafts\" {{{}}}\r\n", message.len());

        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(command.as_bytes())
            .read(b"+ Ready for literal data\r\n")
            .write(message)
            .write(b"\r\n")
            .read(b"A0000 OK APPEND completed\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let mut source = Cursor::new(message.to_vec());
        append(&mut session, &mut NoopHandler, "Drafts", &mut source)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_refusal_before_payload_is_verbatim() {
        let message = b"Subject: big\r\n\r\n";
        let command = format!("A0000 APPEND \"INBOX\" {{{}}}\r\n", message.len());

        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(command.as_bytes())
            .read(b"A0000 NO [OVERQUOTA] Quota exceeded\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let mut source = Cursor::new(message.to_vec());
        let err = append(&mut session, &mut NoopHandler, "INBOX", &mut source)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(m) if m == "[OVERQUOTA] Quota exceeded"));
    }

    #[tokio::test]
    async fn test_ok_before_continuation_is_a_protocol_error() {
        let message = b"Subject: odd\r\n\r\n";
        let command = format!("A0000 APPEND \"INBOX\" {{{}}}\r\n", message.len());

        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
            .write(command.as_bytes())
            .read(b"A0000 OK done already\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let mut source = Cursor::new(message.to_vec());
        let err = append(&mut session, &mut NoopHandler, "INBOX", &mut source)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::Malformed(m)) if m.contains("before its literal")
        ));
    }

    proptest! {
        #[test]
        fn prop_dry_count_matches_streamed_bytes(input in proptest::collection::vec(any::<u8>(), 0..4096)) {
            // The `{N}` marker must equal the octets actually sent, for
            // any source content and any chunking.
            let whole = normalize_all(&input);

            let mut chunked = Vec::new();
            let mut prev = 0u8;
            for piece in input.chunks(7) {
                normalize_into(piece, &mut prev, &mut chunked);
            }

            prop_assert_eq!(&whole, &chunked);

            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            let counted = runtime
                .block_on(normalized_length(&mut Cursor::new(input)))
                .unwrap();
            prop_assert_eq!(counted, whole.len() as u64);
        }
    }
}
