//! Wire response classification.
//!
//! Pure functions over a single response line (CRLF already stripped).
//! No I/O happens here; the connection layer reads lines and literals,
//! this module decides what a line *is*.

use crate::error::ProtocolError;

/// Completion or status condition carried by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// `OK`
    Ok,
    /// `NO`
    No,
    /// `BAD`
    Bad,
    /// `PREAUTH` (greeting only)
    Preauth,
    /// `BYE`
    Bye,
}

impl Status {
    fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "NO" => Some(Self::No),
            "BAD" => Some(Self::Bad),
            "PREAUTH" => Some(Self::Preauth),
            "BYE" => Some(Self::Bye),
            _ => None,
        }
    }
}

/// One classified server line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReply<'a> {
    /// `+ ...` continuation request; payload is the text after `+ `.
    Continuation(&'a str),
    /// `* ...` untagged data or status; payload is the text after `* `.
    Untagged(&'a str),
    /// `tag STATUS text` command completion.
    Tagged {
        /// The echoed command tag.
        tag: &'a str,
        /// Completion condition.
        status: Status,
        /// Remainder of the line after the status word.
        text: &'a str,
    },
}

/// Classifies a single response line.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] for lines that fit none of the
/// three shapes (empty line, tag without status, unknown status word).
pub fn classify(line: &str) -> Result<ServerReply<'_>, ProtocolError> {
    if line == "+" {
        return Ok(ServerReply::Continuation(""));
    }
    if let Some(rest) = line.strip_prefix("+ ") {
        return Ok(ServerReply::Continuation(rest));
    }
    if let Some(rest) = line.strip_prefix("* ") {
        return Ok(ServerReply::Untagged(rest));
    }
    let (tag, rest) = line
        .split_once(' ')
        .ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
    if tag.is_empty() {
        return Err(ProtocolError::Malformed(line.to_string()));
    }
    let (status_word, text) = match rest.split_once(' ') {
        Some((w, t)) => (w, t),
        None => (rest, ""),
    };
    let status = Status::from_word(status_word)
        .ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
    Ok(ServerReply::Tagged { tag, status, text })
}

/// A `{N}` or `{N+}` literal marker found at the end of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiteralMarker {
    /// Declared byte count.
    pub length: usize,
    /// `true` for a non-synchronizing `{N+}` literal.
    pub non_sync: bool,
}

/// Parses a trailing literal marker, if the line carries one.
///
/// A line ending in `}` with a matching `{` and all digits between (an
/// optional trailing `+` allowed) announces that `length` raw bytes
/// follow the CRLF. Anything else ending in `}` is not a marker —
/// servers put human text like `{ok}` in status lines.
///
/// # Errors
///
/// Returns [`ProtocolError::BadLiteral`] when the count is all digits
/// but does not fit in `usize`.
pub fn literal_at_end(line: &str) -> Result<Option<LiteralMarker>, ProtocolError> {
    let Some(body) = line.strip_suffix('}') else {
        return Ok(None);
    };
    let Some(open) = body.rfind('{') else {
        return Ok(None);
    };
    let mut digits = &body[open + 1..];
    let non_sync = if let Some(d) = digits.strip_suffix('+') {
        digits = d;
        true
    } else {
        false
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    let length = digits
        .parse::<usize>()
        .map_err(|_| ProtocolError::BadLiteral(line.to_string()))?;
    Ok(Some(LiteralMarker { length, non_sync }))
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
    fn test_classify_continuation() {
        assert_eq!(classify("+ ").unwrap(), ServerReply::Continuation(""));
        assert_eq!(classify("+").unwrap(), ServerReply::Continuation(""));
        assert_eq!(
            classify("+ PDQzMjE+").unwrap(),
            ServerReply::Continuation("PDQzMjE+")
        );
    }

    #[test]
    fn test_classify_untagged() {
        assert_eq!(
            classify("* 23 EXISTS").unwrap(),
            ServerReply::Untagged("23 EXISTS")
        );
        assert_eq!(
            classify("* OK [ALERT] disk full").unwrap(),
            ServerReply::Untagged("OK [ALERT] disk full")
        );
    }

    #[test]
    fn test_classify_tagged() {
        let reply = classify("A0003 OK FETCH completed").unwrap();
        assert_eq!(
            reply,
            ServerReply::Tagged {
                tag: "A0003",
                status: Status::Ok,
                text: "FETCH completed",
            }
        );
    }

    #[test]
    fn test_classify_tagged_no_text() {
        let reply = classify("A1 NO").unwrap();
        assert_eq!(
            reply,
            ServerReply::Tagged {
                tag: "A1",
                status: Status::No,
                text: "",
            }
        );
    }

    #[test]
    fn test_classify_malformed() {
        assert!(classify("").is_err());
        assert!(classify("A0001").is_err());
        assert!(classify("A0001 MAYBE done").is_err());
    }

    #[test]
    fn test_literal_marker_sync_and_nonsync() {
        let m = literal_at_end("* 12 FETCH (BODY[HEADER] {342}").unwrap().unwrap();
        assert_eq!(m.length, 342);
        assert!(!m.non_sync);

        let m = literal_at_end("A1 APPEND saved {7+}").unwrap().unwrap();
        assert_eq!(m.length, 7);
        assert!(m.non_sync);
    }

    #[test]
    fn test_literal_marker_absent() {
        assert_eq!(literal_at_end("* 5 EXISTS").unwrap(), None);
        assert_eq!(literal_at_end("no braces here}").unwrap(), None);
    }

    #[test]
    fn test_literal_marker_non_digit_braces_are_text() {
        assert_eq!(literal_at_end("x {12a}").unwrap(), None);
        assert_eq!(literal_at_end("x {}").unwrap(), None);
        assert_eq!(literal_at_end("x {+}").unwrap(), None);
        assert_eq!(literal_at_end("* OK backend said {ok}").unwrap(), None);
    }

    #[test]
    fn test_literal_marker_count_overflow() {
        assert!(literal_at_end("x {99999999999999999999999999}").is_err());
    }
}
