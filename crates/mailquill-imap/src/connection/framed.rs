//! Framed I/O for the IMAP protocol.
//!
//! IMAP interleaves CRLF-terminated lines with raw literal octets
//! announced by `{N}` markers. The reader here has exactly two modes:
//! [`FramedStream::read_line`] for lines and
//! [`FramedStream::read_literal`] / [`FramedStream::read_literal_into`]
//! for literal bytes. Literals are never consumed implicitly; the
//! caller sees the marker on the line and decides where the bytes go.

#![allow(clippy::missing_errors_doc)]

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::ProtocolError;
use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Maximum literal size to prevent memory exhaustion.
pub const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Framed connection for the IMAP protocol.
///
/// Buffered line reading, explicit literal reading, buffered writing.
#[derive(Debug)]
pub struct FramedStream<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Reads a single CRLF-terminated line, returning it without CRLF.
    ///
    /// Lines are required to be valid UTF-8 (IMAP response lines are
    /// 7-bit; 8-bit data travels in literals).
    pub async fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }

            // The CRLF may be split across transport reads: the CR is
            // already in `line` and this chunk starts with the LF.
            if line.last() == Some(&b'\r') && buf[0] == b'\n' {
                line.pop();
                self.reader.consume(1);
                break;
            }

            if let Some(pos) = find_crlf(buf) {
                line.extend_from_slice(&buf[..pos]);
                self.reader.consume(pos + 2);
                break;
            }

            // No CRLF yet, consume all and continue
            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);

            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol(ProtocolError::LineTooLong));
            }
        }

        if line.len() > MAX_LINE_LENGTH {
            return Err(Error::Protocol(ProtocolError::LineTooLong));
        }

        String::from_utf8(line)
            .map_err(|_| Error::Protocol(ProtocolError::Malformed("non-UTF-8 line".to_string())))
    }

    /// Reads exactly `length` literal bytes into memory.
    ///
    /// Use [`Self::read_literal_into`] for bodies that should not be
    /// buffered whole.
    pub async fn read_literal(&mut self, length: usize) -> Result<Vec<u8>> {
        check_literal_size(length)?;
        let mut data = Vec::with_capacity(length);
        self.copy_literal(length, &mut data).await?;
        Ok(data)
    }

    /// Streams exactly `length` literal bytes into `sink`.
    ///
    /// A short read (server closed mid-literal) is reported as
    /// [`ProtocolError::LiteralMismatch`] with the byte counts.
    pub async fn read_literal_into<W>(&mut self, length: usize, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        check_literal_size(length)?;
        self.copy_literal(length, sink).await
    }

    async fn copy_literal<W>(&mut self, length: usize, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut chunk = [0u8; DEFAULT_BUFFER_SIZE];
        let mut remaining = length;

        while remaining > 0 {
            let want = remaining.min(chunk.len());
            let n = self.reader.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Err(Error::Protocol(ProtocolError::LiteralMismatch {
                    declared: length,
                    got: length - remaining,
                }));
            }
            sink.write_all(&chunk[..n]).await?;
            remaining -= n;
        }

        Ok(())
    }

    /// Writes one line, appending CRLF, and flushes.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(line.as_bytes());
        self.write_buffer.extend_from_slice(b"\r\n");

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;

        Ok(())
    }

    /// Writes raw bytes (literal payloads) without framing.
    ///
    /// Does not flush; callers flush once per logical payload with
    /// [`Self::flush`].
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        Ok(())
    }

    /// Flushes the underlying stream.
    pub async fn flush(&mut self) -> Result<()> {
        self.reader.get_mut().flush().await?;
        Ok(())
    }

    /// Gets a mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        self.reader.get_mut()
    }

    /// Consumes the framed stream and returns the inner stream.
    ///
    /// Note: any buffered read data is lost, so only call this between
    /// complete exchanges (e.g. after a STARTTLS `OK`).
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

fn check_literal_size(length: usize) -> Result<()> {
    if length > MAX_LITERAL_SIZE {
        return Err(Error::Protocol(ProtocolError::BadLiteral(format!(
            "literal too large: {length} bytes (max {MAX_LITERAL_SIZE})"
        ))));
    }
    Ok(())
}

/// Finds the position of CRLF in a buffer.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
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
    use tokio_test::io::Builder;

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"hello\r\n"), Some(5));
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"no newline"), None);
        assert_eq!(find_crlf(b"just\n"), None);
        assert_eq!(find_crlf(b"just\r"), None);
    }

    #[tokio::test]
    async fn test_read_line_strips_crlf() {
        let mock = Builder::new().read(b"* OK ready\r\n").build();
        let mut framed = FramedStream::new(mock);

        let line = framed.read_line().await.unwrap();
        assert_eq!(line, "* OK ready");
    }

    #[tokio::test]
    async fn test_read_line_across_chunks() {
        let mock = Builder::new().read(b"* OK re").read(b"ady\r\n").build();
        let mut framed = FramedStream::new(mock);

        let line = framed.read_line().await.unwrap();
        assert_eq!(line, "* OK ready");
    }

    #[tokio::test]
    async fn test_read_line_crlf_split_across_chunks() {
        let mock = Builder::new()
            .read(b"* OK ready\r")
            .read(b"\n* 2 EXISTS\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_line().await.unwrap(), "* OK ready");
        assert_eq!(framed.read_line().await.unwrap(), "* 2 EXISTS");
    }

    #[tokio::test]
    async fn test_read_line_bare_cr_is_data() {
        let mock = Builder::new().read(b"a\rb\r").read(b"c\r\n").build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_line().await.unwrap(), "a\rb\rc");
    }

    #[tokio::test]
    async fn test_read_line_length_limit() {
        let long_line = "A".repeat(MAX_LINE_LENGTH + 100);
        let mock = Builder::new().read(long_line.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let result = framed.read_line().await;
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::LineTooLong))
        ));
    }

    #[tokio::test]
    async fn test_literal_not_consumed_by_read_line() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (RFC822 {5}\r\nhello)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let line = framed.read_line().await.unwrap();
        assert_eq!(line, "* 1 FETCH (RFC822 {5}");

        let literal = framed.read_literal(5).await.unwrap();
        assert_eq!(literal, b"hello");

        let tail = framed.read_line().await.unwrap();
        assert_eq!(tail, ")");
    }

    #[tokio::test]
    async fn test_read_literal_into_sink() {
        let mock = Builder::new().read(b"0123456789").build();
        let mut framed = FramedStream::new(mock);

        let mut sink = Vec::new();
        framed.read_literal_into(10, &mut sink).await.unwrap();
        assert_eq!(sink, b"0123456789");
    }

    #[tokio::test]
    async fn test_read_literal_short_read() {
        let mock = Builder::new().read(b"abc").build();
        let mut framed = FramedStream::new(mock);

        let result = framed.read_literal(10).await;
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::LiteralMismatch {
                declared: 10,
                got: 3,
            }))
        ));
    }

    #[tokio::test]
    async fn test_read_literal_size_limit() {
        let mock = Builder::new().build();
        let mut framed = FramedStream::new(mock);

        let result = framed.read_literal(MAX_LITERAL_SIZE + 1).await;
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::BadLiteral(_)))
        ));
    }

    #[tokio::test]
    async fn test_write_line_appends_crlf() {
        let mock = Builder::new().write(b"A001 NOOP\r\n").build();
        let mut framed = FramedStream::new(mock);

        framed.write_line("A001 NOOP").await.unwrap();
    }
}
