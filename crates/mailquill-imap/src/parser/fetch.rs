//! FETCH response field parsing.
//!
//! A FETCH data line carries a parenthesized list of fields whose tail
//! may be interrupted by a literal. The parser is fed one line segment
//! at a time: when a segment ends in a `{N}` marker, [`FetchFieldParser::feed`]
//! returns `Some(N)`, the caller reads the literal wherever it wants
//! the bytes to go, then feeds the next segment to resume the list.
//!
//! Unknown field names are a hard error. Guessing how many tokens an
//! unknown field occupies would desynchronize everything after it, so
//! the whole response is rejected instead.

use chrono::{DateTime, FixedOffset};

use crate::error::ProtocolError;
use crate::types::MessageFlags;
use crate::wire;

/// Fields extracted from one FETCH response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchFields {
    /// `FLAGS (...)` contents.
    pub flags: Option<MessageFlags>,
    /// `INTERNALDATE "..."` value.
    pub internal_date: Option<DateTime<FixedOffset>>,
    /// `RFC822.SIZE n` value.
    pub size: Option<u32>,
    /// `UID n` value.
    pub uid: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListState {
    /// Opening paren not seen yet.
    Start,
    /// Inside the field list.
    Open,
    /// Closing paren consumed.
    Closed,
}

/// Incremental parser for one FETCH field list.
#[derive(Debug)]
pub struct FetchFieldParser {
    fields: FetchFields,
    state: ListState,
}

impl Default for FetchFieldParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchFieldParser {
    /// Creates a parser for a single FETCH response.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fields: FetchFields {
                flags: None,
                internal_date: None,
                size: None,
                uid: None,
            },
            state: ListState::Start,
        }
    }

    /// Consumes one line segment of the field list.
    ///
    /// Returns `Some(n)` when the segment ends in a literal marker: the
    /// caller must read exactly `n` raw bytes from the connection, then
    /// feed the next line segment.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedField`] for unknown field
    /// names (including non-flag tokens inside a FLAGS list) and
    /// [`ProtocolError::Malformed`] for list syntax violations.
    pub fn feed(&mut self, segment: &str) -> Result<Option<usize>, ProtocolError> {
        let mut rest = segment;

        if self.state == ListState::Start {
            rest = rest.trim_start();
            rest = rest
                .strip_prefix('(')
                .ok_or_else(|| malformed("FETCH data does not start with '('", segment))?;
            self.state = ListState::Open;
        }

        loop {
            rest = rest.trim_start();

            if self.state == ListState::Closed {
                if rest.is_empty() {
                    return Ok(None);
                }
                return Err(malformed("trailing data after ')'", segment));
            }

            if rest.is_empty() {
                return Err(malformed("field list ended without ')'", segment));
            }

            if let Some(after) = rest.strip_prefix(')') {
                self.state = ListState::Closed;
                rest = after;
                continue;
            }

            rest = self.field(rest, segment)?;

            if let Some(len) = take_literal_marker(&mut rest)? {
                return Ok(Some(len));
            }
        }
    }

    /// Finishes parsing and returns the collected fields.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the field list was never
    /// closed.
    pub fn finish(self) -> Result<FetchFields, ProtocolError> {
        if self.state == ListState::Closed {
            Ok(self.fields)
        } else {
            Err(ProtocolError::Malformed(
                "FETCH field list not terminated".to_string(),
            ))
        }
    }

    /// Parses one field (name plus value) from `rest`.
    ///
    /// Returns the remainder. When the value is a literal, the marker is
    /// left in place for the caller to detect.
    fn field<'a>(&mut self, rest: &'a str, segment: &str) -> Result<&'a str, ProtocolError> {
        if rest.starts_with('{') {
            // Value literal left over from a previous field; nothing to do.
            return Ok(rest);
        }

        let (name, after_name) = take_atom(rest);
        let upper = name.to_ascii_uppercase();

        match upper.as_str() {
            "FLAGS" => {
                let (flags, after) = parse_flag_list(after_name, segment)?;
                self.fields.flags = Some(flags);
                Ok(after)
            }
            "INTERNALDATE" => {
                let (value, after) = parse_quoted_or_nil(after_name, segment)?;
                if let Some(text) = value {
                    let parsed =
                        DateTime::parse_from_str(text.trim(), "%d-%b-%Y %H:%M:%S %z")
                            .map_err(|e| {
                                malformed(&format!("bad INTERNALDATE ({e})"), segment)
                            })?;
                    self.fields.internal_date = Some(parsed);
                }
                Ok(after)
            }
            "RFC822.SIZE" => {
                let (n, after) = parse_number(after_name, segment)?;
                self.fields.size = Some(n);
                Ok(after)
            }
            "UID" => {
                let (n, after) = parse_number(after_name, segment)?;
                self.fields.uid = Some(n);
                Ok(after)
            }
            "RFC822" | "RFC822.HEADER" | "RFC822.TEXT" => Ok(after_name),
            _ if upper.starts_with("BODY[") || upper.starts_with("BODY.PEEK[") => {
                // The bracket section may contain spaces, so re-scan it
                // from the original position.
                let close = rest
                    .find(']')
                    .ok_or_else(|| malformed("unterminated BODY section", segment))?;
                let mut after = &rest[close + 1..];
                // Optional partial range, e.g. <0>.
                if after.starts_with('<') {
                    let end = after
                        .find('>')
                        .ok_or_else(|| malformed("unterminated partial range", segment))?;
                    after = &after[end + 1..];
                }
                Ok(after)
            }
            _ => Err(ProtocolError::UnexpectedField(name.to_string())),
        }
    }
}

fn malformed(what: &str, segment: &str) -> ProtocolError {
    ProtocolError::Malformed(format!("{what}: {segment}"))
}

/// Splits off the next atom (up to space, paren, or bracket-free end).
fn take_atom(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| c == ' ' || c == '(' || c == ')')
        .unwrap_or(s.len());
    (&s[..end], &s[end..])
}

/// Consumes a trailing `{N}` or `{N+}` marker, returning its length.
///
/// Literal markers are only legal at the very end of a line, so a
/// marker with anything after it is rejected.
fn take_literal_marker(rest: &mut &str) -> Result<Option<usize>, ProtocolError> {
    let s = rest.trim_start();
    if !s.starts_with('{') {
        return Ok(None);
    }
    let Some(marker) = wire::literal_at_end(s)? else {
        return Err(ProtocolError::BadLiteral(s.to_string()));
    };
    *rest = "";
    Ok(Some(marker.length))
}

/// Parses `(\Flag ...)`; non-flag atoms inside the list are rejected.
fn parse_flag_list<'a>(
    s: &'a str,
    segment: &str,
) -> Result<(MessageFlags, &'a str), ProtocolError> {
    let s = s.trim_start();
    let mut rest = s
        .strip_prefix('(')
        .ok_or_else(|| malformed("FLAGS not followed by '('", segment))?;

    let mut flags = MessageFlags::default();
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix(')') {
            return Ok((flags, after));
        }
        if rest.is_empty() {
            return Err(malformed("unterminated flag list", segment));
        }
        let (name, after) = take_atom(rest);
        if !name.starts_with('\\') {
            return Err(ProtocolError::UnexpectedField(name.to_string()));
        }
        // Unknown system flags are tolerated; clients see new ones in
        // the wild and must not choke on them.
        let _ = flags.set_named(name);
        rest = after;
    }
}

/// Parses a quoted string or NIL, returning the unescaped content.
fn parse_quoted_or_nil<'a>(
    s: &'a str,
    segment: &str,
) -> Result<(Option<&'a str>, &'a str), ProtocolError> {
    let s = s.trim_start();
    if let Some(after) = s.strip_prefix("NIL") {
        return Ok((None, after));
    }
    let body = s
        .strip_prefix('"')
        .ok_or_else(|| malformed("expected quoted string", segment))?;
    let close = body
        .find('"')
        .ok_or_else(|| malformed("unterminated quoted string", segment))?;
    Ok((Some(&body[..close]), &body[close + 1..]))
}

/// Parses an unsigned decimal number.
fn parse_number<'a>(s: &'a str, segment: &str) -> Result<(u32, &'a str), ProtocolError> {
    let s = s.trim_start();
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return Err(malformed("expected number", segment));
    }
    let n = s[..end]
        .parse::<u32>()
        .map_err(|_| malformed("number out of range", segment))?;
    Ok((n, &s[end..]))
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
    fn test_flags_and_size_single_segment() {
        let mut parser = FetchFieldParser::new();
        let more = parser
            .feed("(FLAGS (\\Seen \\Answered) RFC822.SIZE 3041)")
            .unwrap();
        assert_eq!(more, None);

        let fields = parser.finish().unwrap();
        let flags = fields.flags.unwrap();
        assert!(flags.seen);
        assert!(flags.answered);
        assert!(!flags.deleted);
        assert_eq!(fields.size, Some(3041));
    }

    #[test]
    fn test_internaldate_parsing() {
        let mut parser = FetchFieldParser::new();
        parser
            .feed("(INTERNALDATE \"17-Jul-1996 02:44:25 -0700\")")
            .unwrap();
        let fields = parser.finish().unwrap();
        let date = fields.internal_date.unwrap();
        assert_eq!(date.timezone().local_minus_utc(), -7 * 3600);
    }

    #[test]
    fn test_internaldate_single_digit_day() {
        let mut parser = FetchFieldParser::new();
        parser
            .feed("(INTERNALDATE \" 5-Jan-2024 09:00:00 +0000\")")
            .unwrap();
        let fields = parser.finish().unwrap();
        assert!(fields.internal_date.is_some());
    }

    #[test]
    fn test_literal_interrupts_list() {
        let mut parser = FetchFieldParser::new();
        let more = parser
            .feed("(UID 42 BODY[HEADER.FIELDS (SUBJECT FROM)] {64}")
            .unwrap();
        assert_eq!(more, Some(64));

        // Caller reads 64 bytes, then resumes with the rest of the line.
        let more = parser.feed(" FLAGS (\\Seen))").unwrap();
        assert_eq!(more, None);

        let fields = parser.finish().unwrap();
        assert_eq!(fields.uid, Some(42));
        assert!(fields.flags.unwrap().seen);
    }

    #[test]
    fn test_fields_after_literal_only() {
        let mut parser = FetchFieldParser::new();
        assert_eq!(parser.feed("(RFC822 {10}").unwrap(), Some(10));
        assert_eq!(parser.feed(")").unwrap(), None);
        assert!(parser.finish().is_ok());
    }

    #[test]
    fn test_unknown_field_is_hard_error() {
        let mut parser = FetchFieldParser::new();
        let err = parser.feed("(MODSEQ (624140003))").unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedField(f) if f == "MODSEQ"));
    }

    #[test]
    fn test_non_flag_token_inside_flag_list() {
        let mut parser = FetchFieldParser::new();
        let err = parser
            .feed("(FLAGS (\\Seen INTERNALDATE) RFC822.SIZE 10)")
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedField(f) if f == "INTERNALDATE"));
    }

    #[test]
    fn test_unknown_system_flag_tolerated() {
        let mut parser = FetchFieldParser::new();
        parser.feed("(FLAGS (\\Seen \\Junk \\Draft))").unwrap();
        let flags = parser.finish().unwrap().flags.unwrap();
        assert!(flags.seen);
        assert!(flags.draft);
    }

    #[test]
    fn test_unterminated_list() {
        let mut parser = FetchFieldParser::new();
        assert!(parser.feed("(FLAGS (\\Seen)").is_err());
    }

    #[test]
    fn test_missing_open_paren() {
        let mut parser = FetchFieldParser::new();
        assert!(parser.feed("FLAGS (\\Seen))").is_err());
    }

    #[test]
    fn test_recent_makes_message_not_old() {
        let mut parser = FetchFieldParser::new();
        parser.feed("(FLAGS (\\Recent))").unwrap();
        let flags = parser.finish().unwrap().flags.unwrap();
        assert!(!flags.old());
    }
}
