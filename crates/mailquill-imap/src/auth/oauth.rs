//! OAUTHBEARER (RFC 7628) and XOAUTH2 bearer-token mechanisms.
//!
//! Both send one framed token message. On failure the server does not
//! answer `NO` directly; it sends the error detail as a continuation
//! and waits for an acknowledgement before the tagged rejection.
//! OAUTHBEARER acknowledges with a lone `%x01` octet, XOAUTH2 with an
//! empty line.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::auth::{AuthOutcome, Exchange, Reply, outcome};
use crate::credentials::{Account, TokenSource};
use crate::handler::MailboxHandler;
use crate::session::Session;
use crate::Result;

/// OAUTHBEARER initial client response (RFC 7628 framing).
fn oauthbearer_payload(user: &str, token: &str) -> String {
    format!("n,a={user},\x01auth=Bearer {token}\x01\x01")
}

/// XOAUTH2 initial client response (proprietary framing).
fn xoauth2_payload(user: &str, token: &str) -> String {
    format!("user={user}\x01auth=Bearer {token}\x01\x01")
}

pub(super) async fn attempt_oauthbearer<S>(
    session: &mut Session<S>,
    handler: &mut dyn MailboxHandler,
    account: &Account,
    tokens: &mut dyn TokenSource,
) -> Result<AuthOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !session.capabilities().supports_auth("OAUTHBEARER") {
        return Ok(AuthOutcome::Unavailable("not advertised".to_string()));
    }
    let token = match tokens.bearer_token(&account.username) {
        Ok(token) => token,
        Err(reason) => return Ok(AuthOutcome::Unavailable(reason)),
    };

    let payload = oauthbearer_payload(&account.username, &token);
    let mut exchange =
        Exchange::begin(session, handler, "OAUTHBEARER", Some(payload.as_bytes())).await?;

    match exchange.next().await? {
        Reply::Done(completion) => Ok(outcome(completion)),
        Reply::Challenge(detail) => {
            // Error detail round: acknowledge with the abort octet, then
            // take the tagged NO.
            exchange.send(&[0x01]).await?;
            let completion = exchange.drain().await?;
            Ok(AuthOutcome::Failed(failure_message(&detail, completion.text)))
        }
    }
}

pub(super) async fn attempt_xoauth2<S>(
    session: &mut Session<S>,
    handler: &mut dyn MailboxHandler,
    account: &Account,
    tokens: &mut dyn TokenSource,
) -> Result<AuthOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !session.capabilities().supports_auth("XOAUTH2") {
        return Ok(AuthOutcome::Unavailable("not advertised".to_string()));
    }
    let token = match tokens.bearer_token(&account.username) {
        Ok(token) => token,
        Err(reason) => return Ok(AuthOutcome::Unavailable(reason)),
    };

    let payload = xoauth2_payload(&account.username, &token);
    let mut exchange =
        Exchange::begin(session, handler, "XOAUTH2", Some(payload.as_bytes())).await?;

    match exchange.next().await? {
        Reply::Done(completion) => Ok(outcome(completion)),
        Reply::Challenge(detail) => {
            exchange.send_empty().await?;
            let completion = exchange.drain().await?;
            Ok(AuthOutcome::Failed(failure_message(&detail, completion.text)))
        }
    }
}

/// Prefers the continuation's error payload (usually a JSON blob with
/// the HTTP status) over the generic tagged text.
fn failure_message(detail: &[u8], tagged_text: String) -> String {
    let detail = String::from_utf8_lossy(detail);
    let detail = detail.trim();
    if detail.is_empty() {
        tagged_text
    } else {
        detail.to_string()
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
    use crate::handler::NoopHandler;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use tokio_test::io::Builder;

    struct FixedToken(std::result::Result<String, String>);

    impl TokenSource for FixedToken {
        fn bearer_token(&mut self, _username: &str) -> std::result::Result<String, String> {
            self.0.clone()
        }
    }

    #[test]
    fn test_payload_framing() {
        assert_eq!(
            oauthbearer_payload("u@example.com", "tok"),
            "n,a=u@example.com,\x01auth=Bearer tok\x01\x01"
        );
        assert_eq!(
            xoauth2_payload("u@example.com", "tok"),
            "user=u@example.com\x01auth=Bearer tok\x01\x01"
        );
    }

    #[tokio::test]
    async fn test_oauthbearer_success_with_sasl_ir() {
        let initial = STANDARD.encode(oauthbearer_payload("alice@example.com", "tok123"));
        let command = format!("A0000 AUTHENTICATE OAUTHBEARER {initial}\r\n");

        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=OAUTHBEARER] hi\r\n")
            .write(command.as_bytes())
            .read(b"A0000 OK welcome\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("alice@example.com", "mail.example.com");
        let mut tokens = FixedToken(Ok("tok123".to_string()));

        let result = attempt_oauthbearer(&mut session, &mut NoopHandler, &account, &mut tokens)
            .await
            .unwrap();
        assert_eq!(result, AuthOutcome::Success);
    }

    #[tokio::test]
    async fn test_oauthbearer_failure_sends_abort_octet() {
        let initial = STANDARD.encode(oauthbearer_payload("alice@example.com", "expired"));
        let command = format!("A0000 AUTHENTICATE OAUTHBEARER {initial}\r\n");

        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=OAUTHBEARER] hi\r\n")
            .write(command.as_bytes())
            // base64 of {"status":"401","schemes":"bearer"}
            .read(b"+ eyJzdGF0dXMiOiI0MDEiLCJzY2hlbWVzIjoiYmVhcmVyIn0=\r\n")
            .write(b"AQ==\r\n")
            .read(b"A0000 NO SASL authentication failed\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("alice@example.com", "mail.example.com");
        let mut tokens = FixedToken(Ok("expired".to_string()));

        let result = attempt_oauthbearer(&mut session, &mut NoopHandler, &account, &mut tokens)
            .await
            .unwrap();
        let AuthOutcome::Failed(message) = result else {
            panic!("expected failure");
        };
        assert!(message.contains("401"));
    }

    #[tokio::test]
    async fn test_xoauth2_failure_sends_empty_line() {
        let initial = STANDARD.encode(xoauth2_payload("alice@example.com", "expired"));
        let command = format!("A0000 AUTHENTICATE XOAUTH2 {initial}\r\n");

        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=XOAUTH2] hi\r\n")
            .write(command.as_bytes())
            .read(b"+ eyJzdGF0dXMiOiI0MDEiLCJzY2hlbWVzIjoiYmVhcmVyIn0=\r\n")
            .write(b"\r\n")
            .read(b"A0000 NO invalid credentials\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("alice@example.com", "mail.example.com");
        let mut tokens = FixedToken(Ok("expired".to_string()));

        let result = attempt_xoauth2(&mut session, &mut NoopHandler, &account, &mut tokens)
            .await
            .unwrap();
        assert!(matches!(result, AuthOutcome::Failed(m) if m.contains("401")));
    }

    #[tokio::test]
    async fn test_no_token_is_unavailable() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=OAUTHBEARER] hi\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("alice@example.com", "mail.example.com");
        let mut tokens = FixedToken(Err("refresh token revoked".to_string()));

        let result = attempt_oauthbearer(&mut session, &mut NoopHandler, &account, &mut tokens)
            .await
            .unwrap();
        assert_eq!(
            result,
            AuthOutcome::Unavailable("refresh token revoked".to_string())
        );
    }
}
