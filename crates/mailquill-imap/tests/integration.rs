//! Integration tests for the IMAP protocol engine.
//!
//! These tests drive the public API against mock streams with exact
//! read/write expectations, so no real server is needed.

#![allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::similar_names
)]

use std::io::Cursor;

use tokio_test::io::Builder;

use mailquill_imap::handler::{CollectingHandler, MailboxEvent};
use mailquill_imap::{
    Account, Authenticator, Capabilities, CredentialSource, Error, MessageCache, MessageFlags,
    MessageId, NoopHandler, ServerReply, Session, Status, TokenSource, append, fetch_headers,
};

/// Password source with a fixed answer.
struct StaticPassword(&'static str);

impl CredentialSource for StaticPassword {
    fn password(&mut self, _username: &str, _host: &str) -> Option<String> {
        Some(self.0.to_string())
    }
}

/// Token source with a fixed answer.
struct StaticToken(&'static str);

impl TokenSource for StaticToken {
    fn bearer_token(&mut self, _username: &str) -> Result<String, String> {
        Ok(self.0.to_string())
    }
}

#[test]
fn test_classify_untagged() {
    let reply = mailquill_imap::wire::classify("* 23 EXISTS").unwrap();
    assert!(matches!(reply, ServerReply::Untagged("23 EXISTS")));
}

#[test]
fn test_classify_tagged_ok() {
    let reply = mailquill_imap::wire::classify("A001 OK LOGIN completed").unwrap();
    match reply {
        ServerReply::Tagged { tag, status, text } => {
            assert_eq!(tag, "A001");
            assert_eq!(status, Status::Ok);
            assert!(text.contains("LOGIN"));
        }
        _ => panic!("expected tagged reply"),
    }
}

#[test]
fn test_classify_continuation() {
    let reply = mailquill_imap::wire::classify("+ Ready for additional input").unwrap();
    assert!(matches!(reply, ServerReply::Continuation(_)));
}

#[test]
fn test_capability_parsing() {
    let caps = Capabilities::parse("IMAP4rev1 LITERAL+ SASL-IR UIDPLUS AUTH=PLAIN AUTH=CRAM-MD5");
    assert!(caps.imap4rev1);
    assert!(caps.literal_plus);
    assert!(caps.sasl_ir);
    assert!(caps.uidplus);
    assert!(caps.supports_auth("CRAM-MD5"));
    assert!(!caps.supports_auth("GSSAPI"));
}

#[test]
fn test_flag_names() {
    let mut flags = MessageFlags::default();
    assert!(flags.set_named("\\Seen"));
    assert!(flags.set_named("\\Answered"));
    assert!(!flags.set_named("$Forwarded"));
    assert!(flags.seen);
    assert!(flags.answered);
    assert!(!flags.old());
}

/// Greeting, authentication, SELECT, header batch, APPEND, LOGOUT
/// against one mock stream.
#[tokio::test]
async fn test_full_session_flow() {
    let header = "Subject: welcome\r\n\r\n";
    let draft = b"Subject: reply\r\n\r\nthanks\r\n";
    let fetch_cmd = "A0002 FETCH 1:1 (FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[HEADER.FIELDS (DATE FROM TO CC SUBJECT MESSAGE-ID)])\r\n";
    let fetch_resp = format!(
        "* 1 FETCH (FLAGS (\\Seen) INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" RFC822.SIZE 845 BODY[HEADER.FIELDS (DATE FROM TO CC SUBJECT MESSAGE-ID)] {{{}}}\r\n{header})\r\n",
        header.len()
    );
    let append_cmd = format!("A0003 APPEND \"Sent\" {{{}+}}\r\n", draft.len());

    let mock = Builder::new()
        .read(b"* OK [CAPABILITY IMAP4rev1 LITERAL+ AUTH=CRAM-MD5] ready\r\n")
        .write(b"A0000 AUTHENTICATE CRAM-MD5\r\n")
        .read(b"+ PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n")
        .write(b"dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw\r\n")
        .read(b"A0000 OK authenticated\r\n")
        .write(b"A0001 SELECT INBOX\r\n")
        .read(b"* 1 EXISTS\r\n")
        .read(b"* 1 RECENT\r\n")
        .read(b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n")
        .read(b"A0001 OK [READ-WRITE] SELECT completed\r\n")
        .write(fetch_cmd.as_bytes())
        .read(fetch_resp.as_bytes())
        .read(b"A0002 OK FETCH completed\r\n")
        .write(append_cmd.as_bytes())
        .write(draft)
        .write(b"\r\n")
        .read(b"A0003 OK APPEND completed\r\n")
        .write(b"A0004 LOGOUT\r\n")
        .read(b"* BYE logging out\r\n")
        .read(b"A0004 OK LOGOUT completed\r\n")
        .build();

    let mut session = Session::from_stream(mock).await.unwrap();
    let mut handler = CollectingHandler::default();

    let account = Account::new("tim", "mail.example.com");
    Authenticator::new(account)
        .with_credentials(Box::new(StaticPassword("tanstaaftanstaaf")))
        .authenticate(&mut session, &mut handler)
        .await
        .unwrap();

    session
        .run("SELECT INBOX", &mut handler)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert!(handler.events.contains(&MailboxEvent::Exists(1)));
    assert!(handler.events.contains(&MailboxEvent::Recent(1)));

    let batch = fetch_headers(&mut session, &mut handler, 1, 1).await.unwrap();
    assert_eq!(batch.records().len(), 1);
    assert_eq!(batch.records()[0].size, Some(845));
    assert_eq!(batch.header_bytes(&batch.records()[0]), header.as_bytes());

    let mut source = Cursor::new(draft.to_vec());
    append(&mut session, &mut handler, "Sent", &mut source)
        .await
        .unwrap();

    session.logout().await.unwrap();
}

/// GSSAPI has no context builder and CRAM-MD5 is not advertised, so
/// the scan lands on OAUTHBEARER with a SASL-IR initial response.
#[tokio::test]
async fn test_negotiator_falls_through_to_oauthbearer() {
    let mock = Builder::new()
        .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=OAUTHBEARER] hi\r\n")
        .write(b"A0000 AUTHENTICATE OAUTHBEARER bixhPWFsaWNlQGV4YW1wbGUuY29tLAFhdXRoPUJlYXJlciB0b2stMTIzAQE=\r\n")
        .read(b"A0000 OK authenticated\r\n")
        .build();

    let mut session = Session::from_stream(mock).await.unwrap();
    let account = Account::new("alice@example.com", "mail.example.com");
    Authenticator::new(account)
        .with_credentials(Box::new(StaticPassword("unused")))
        .with_tokens(Box::new(StaticToken("tok-123")))
        .authenticate(&mut session, &mut NoopHandler)
        .await
        .unwrap();
}

/// A server that only speaks the proprietary variant still works; the
/// standard mechanism is skipped because it is not advertised.
#[tokio::test]
async fn test_negotiator_uses_xoauth2_when_offered_alone() {
    let mock = Builder::new()
        .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=XOAUTH2] hi\r\n")
        .write(b"A0000 AUTHENTICATE XOAUTH2 dXNlcj1hbGljZUBleGFtcGxlLmNvbQFhdXRoPUJlYXJlciB0b2stMTIzAQE=\r\n")
        .read(b"A0000 OK authenticated\r\n")
        .build();

    let mut session = Session::from_stream(mock).await.unwrap();
    let account = Account::new("alice@example.com", "mail.example.com");
    Authenticator::new(account)
        .with_tokens(Box::new(StaticToken("tok-123")))
        .authenticate(&mut session, &mut NoopHandler)
        .await
        .unwrap();
}

/// A rejected attempt stops the scan; the mock carries no further
/// expectations, so trying ANONYMOUS afterwards would panic.
#[tokio::test]
async fn test_rejected_mechanism_stops_the_scan() {
    let mock = Builder::new()
        .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=CRAM-MD5 AUTH=ANONYMOUS] hi\r\n")
        .write(b"A0000 AUTHENTICATE CRAM-MD5\r\n")
        .read(b"+ PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n")
        .write(b"dGltIDYyY2MyOGFmNmMwNTI2MWM0NzM4ZmZhMWU4NTVlNTRj\r\n")
        .read(b"A0000 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
        .build();

    let mut session = Session::from_stream(mock).await.unwrap();
    let account = Account::new("tim", "mail.example.com");
    let err = Authenticator::new(account)
        .with_credentials(Box::new(StaticPassword("wrong-password")))
        .authenticate(&mut session, &mut NoopHandler)
        .await
        .unwrap_err();

    match err {
        Error::AuthFailed { mechanism, message } => {
            assert_eq!(mechanism, "CRAM-MD5");
            assert!(message.contains("Invalid credentials"));
        }
        other => panic!("expected AuthFailed, got {other:?}"),
    }
}

/// Messages fetched through the cache land on disk; a repeat fetch of
/// the same identity never touches the network.
#[tokio::test]
async fn test_message_cache_flow() {
    let dir = std::env::temp_dir().join(format!("mailquill-integration-{}", std::process::id()));
    tokio::fs::create_dir_all(&dir).await.unwrap();

    let body = "Subject: cached\r\n\r\nfull body\r\n";
    let resp = format!(
        "* 4 FETCH (FLAGS (\\Seen \\Answered) RFC822 {{{}}}\r\n{body})\r\n",
        body.len()
    );
    let mock = Builder::new()
        .read(b"* PREAUTH [CAPABILITY IMAP4rev1] welcome back\r\n")
        .write(b"A0000 FETCH 4 (FLAGS RFC822)\r\n")
        .read(resp.as_bytes())
        .read(b"A0000 OK FETCH completed\r\n")
        .build();

    let mut session = Session::from_stream(mock).await.unwrap();
    assert!(session.pre_authenticated());

    let mut cache = MessageCache::with_default_slots(&dir);
    let id = MessageId::new(3857529045, 4);
    let entry = cache
        .fetch(&mut session, &mut NoopHandler, id)
        .await
        .unwrap();
    assert_eq!(entry.size, body.len() as u64);
    assert!(entry.flags.answered);
    assert_eq!(entry.headers.subject.as_deref(), Some("cached"));
    assert_eq!(tokio::fs::read(&entry.path).await.unwrap(), body.as_bytes());

    let again = cache
        .fetch(&mut session, &mut NoopHandler, id)
        .await
        .unwrap();
    assert_eq!(entry, again);

    cache.clear().await;
    tokio::fs::remove_dir_all(&dir).await.unwrap();
}
