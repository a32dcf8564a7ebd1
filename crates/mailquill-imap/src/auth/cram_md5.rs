//! CRAM-MD5 mechanism (RFC 2195).
//!
//! The server sends a timestamped challenge; the client answers with
//! `username HEX(HMAC-MD5(password, challenge))`. The password never
//! crosses the wire, which is why this survives on plaintext ports.

use hmac::{Hmac, Mac};
use md5::Md5;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::auth::{AuthOutcome, Exchange, Reply, outcome};
use crate::credentials::{Account, CredentialSource};
use crate::handler::MailboxHandler;
use crate::session::Session;
use crate::{Error, Result};

type HmacMd5 = Hmac<Md5>;

pub(super) async fn attempt<S>(
    session: &mut Session<S>,
    handler: &mut dyn MailboxHandler,
    account: &Account,
    credentials: &mut dyn CredentialSource,
) -> Result<AuthOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !session.capabilities().supports_auth("CRAM-MD5") {
        return Ok(AuthOutcome::Unavailable("not advertised".to_string()));
    }

    let Some(password) = credentials.password(&account.username, &account.host) else {
        return Err(Error::Cancelled);
    };

    // Challenge-first mechanism: no initial response exists.
    let mut exchange = Exchange::begin(session, handler, "CRAM-MD5", None).await?;

    match exchange.next().await? {
        Reply::Challenge(challenge) => {
            let Some(response) = digest_response(&account.username, &password, &challenge)
            else {
                let completion = exchange.abort().await?;
                return Ok(AuthOutcome::Failed(format!(
                    "cannot compute digest ({})",
                    completion.text
                )));
            };
            exchange.send(response.as_bytes()).await?;
            Ok(outcome(exchange.drain().await?))
        }
        Reply::Done(completion) => {
            // Completed without ever challenging: treat as a rejection.
            Ok(AuthOutcome::Failed(completion.text))
        }
    }
}

/// Computes `username HEX(HMAC-MD5(password, challenge))`.
///
/// HMAC accepts keys of any length, so `None` is unreachable in
/// practice; it exists to keep the caller panic-free.
fn digest_response(username: &str, password: &str, challenge: &[u8]) -> Option<String> {
    let mut mac = HmacMd5::new_from_slice(password.as_bytes()).ok()?;
    mac.update(challenge);
    let digest = mac.finalize().into_bytes();

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    Some(format!("{username} {hex}"))
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

    struct FixedPassword(Option<String>);

    impl CredentialSource for FixedPassword {
        fn password(&mut self, _username: &str, _host: &str) -> Option<String> {
            self.0.clone()
        }
    }

    #[test]
    fn test_rfc_2195_vector() {
        let response = digest_response(
            "tim",
            "tanstaaftanstaaf",
            b"<1896.697170952@postoffice.reston.mci.net>",
        )
        .unwrap();
        assert_eq!(response, "tim b913a602c7eda7a495b4e6e7334d3890");
    }

    #[tokio::test]
    async fn test_cram_md5_exchange() {
        // Challenge/response pair from the RFC 2195 example.
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=CRAM-MD5] hi\r\n")
            .write(b"A0000 AUTHENTICATE CRAM-MD5\r\n")
            .read(b"+ PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n")
            .write(b"dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw\r\n")
            .read(b"A0000 OK CRAM authentication successful\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("tim", "postoffice.reston.mci.net");
        let mut creds = FixedPassword(Some("tanstaaftanstaaf".to_string()));

        let result = attempt(&mut session, &mut NoopHandler, &account, &mut creds)
            .await
            .unwrap();
        assert_eq!(result, AuthOutcome::Success);
    }

    #[tokio::test]
    async fn test_cancelled_prompt_stops_negotiation() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=CRAM-MD5] hi\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("tim", "example.com");
        let mut creds = FixedPassword(None);

        let err = attempt(&mut session, &mut NoopHandler, &account, &mut creds)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_wrong_password_is_failure() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=CRAM-MD5] hi\r\n")
            .write(b"A0000 AUTHENTICATE CRAM-MD5\r\n")
            .read(b"+ PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n")
            .write(b"dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw\r\n")
            .read(b"A0000 NO authentication failed\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("tim", "example.com");
        let mut creds = FixedPassword(Some("tanstaaftanstaaf".to_string()));

        let result = attempt(&mut session, &mut NoopHandler, &account, &mut creds)
            .await
            .unwrap();
        assert_eq!(
            result,
            AuthOutcome::Failed("authentication failed".to_string())
        );
    }
}
