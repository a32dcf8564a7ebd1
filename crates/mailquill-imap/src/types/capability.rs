//! Server capability set.

/// Capabilities advertised by the server, parsed once per connection.
///
/// The flags the engine actually branches on are pre-extracted as
/// booleans; the raw `AUTH=` mechanism names are kept verbatim for the
/// generic SASL path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `IMAP4rev1` advertised.
    pub imap4rev1: bool,
    /// Legacy `IMAP4` advertised.
    pub imap4: bool,
    /// `LITERAL+` non-synchronizing literals.
    pub literal_plus: bool,
    /// `SASL-IR` initial-response on AUTHENTICATE.
    pub sasl_ir: bool,
    /// `UIDPLUS` extension.
    pub uidplus: bool,
    /// `IDLE` extension.
    pub idle: bool,
    /// `STARTTLS` offered.
    pub starttls: bool,
    /// `AUTH=` mechanism names, uppercased, in advertised order.
    pub auth: Vec<String>,
}

impl Capabilities {
    /// Parses a space-separated capability listing.
    ///
    /// Accepts either the payload of an untagged `* CAPABILITY ...`
    /// response or the bracketed `[CAPABILITY ...]` response code from a
    /// greeting; the caller strips the surrounding syntax.
    #[must_use]
    pub fn parse(listing: &str) -> Self {
        let mut caps = Self::default();
        for word in listing.split_ascii_whitespace() {
            let upper = word.to_ascii_uppercase();
            match upper.as_str() {
                "IMAP4REV1" => caps.imap4rev1 = true,
                "IMAP4" => caps.imap4 = true,
                "LITERAL+" => caps.literal_plus = true,
                "SASL-IR" => caps.sasl_ir = true,
                "UIDPLUS" => caps.uidplus = true,
                "IDLE" => caps.idle = true,
                "STARTTLS" => caps.starttls = true,
                _ => {
                    if let Some(mech) = upper.strip_prefix("AUTH=") {
                        caps.auth.push(mech.to_string());
                    }
                }
            }
        }
        caps
    }

    /// Whether a given `AUTH=` mechanism was advertised.
    #[must_use]
    pub fn supports_auth(&self, mechanism: &str) -> bool {
        self.auth.iter().any(|m| m == mechanism)
    }

    /// Whether the server speaks a protocol revision we understand.
    #[must_use]
    pub fn usable(&self) -> bool {
        self.imap4rev1 || self.imap4
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
    fn test_parse_typical_listing() {
        let caps =
            Capabilities::parse("IMAP4rev1 LITERAL+ SASL-IR AUTH=PLAIN AUTH=CRAM-MD5 IDLE");
        assert!(caps.imap4rev1);
        assert!(caps.literal_plus);
        assert!(caps.sasl_ir);
        assert!(caps.idle);
        assert!(!caps.uidplus);
        assert_eq!(caps.auth, vec!["PLAIN", "CRAM-MD5"]);
        assert!(caps.supports_auth("CRAM-MD5"));
        assert!(!caps.supports_auth("GSSAPI"));
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let caps = Capabilities::parse("imap4rev1 starttls auth=xoauth2");
        assert!(caps.imap4rev1);
        assert!(caps.starttls);
        assert!(caps.supports_auth("XOAUTH2"));
    }

    #[test]
    fn test_legacy_imap4_counts_as_usable() {
        let caps = Capabilities::parse("IMAP4 AUTH=ANONYMOUS");
        assert!(!caps.imap4rev1);
        assert!(caps.usable());
    }

    #[test]
    fn test_empty_listing_not_usable() {
        assert!(!Capabilities::parse("").usable());
    }
}
