//! GSSAPI mechanism (RFC 4752).
//!
//! The Kerberos machinery lives behind [`ContextBuilder`]; this module
//! only shuttles tokens. Two phases: context establishment (client
//! sends the first token), then one wrapped round negotiating the
//! security layer, where we always select "none" since the connection
//! is already TLS-protected.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::auth::{AuthOutcome, Exchange, Reply, outcome};
use crate::credentials::{Account, ContextBuilder, ContextStep, SecurityContext};
use crate::handler::MailboxHandler;
use crate::session::Session;
use crate::Result;

/// No security layer, from the RFC 4752 bitmask.
const LAYER_NONE: u8 = 0x01;

pub(super) async fn attempt<S>(
    session: &mut Session<S>,
    handler: &mut dyn MailboxHandler,
    account: &Account,
    builder: &mut dyn ContextBuilder,
) -> Result<AuthOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !session.capabilities().supports_auth("GSSAPI") {
        return Ok(AuthOutcome::Unavailable("not advertised".to_string()));
    }

    let service = format!("imap@{}", account.host);
    let mut context = match builder.establish(&service) {
        Ok(context) => context,
        // No ticket, unknown realm: not an authentication failure.
        Err(reason) => return Ok(AuthOutcome::Unavailable(reason)),
    };

    let (initial, mut established) = match context.step(&[]) {
        Ok(ContextStep::Continue(token)) => (token, false),
        Ok(ContextStep::Complete(token)) => (token, true),
        Err(reason) => return Ok(AuthOutcome::Unavailable(reason)),
    };

    let mut exchange = Exchange::begin(session, handler, "GSSAPI", Some(&initial)).await?;

    loop {
        match exchange.next().await? {
            Reply::Done(completion) => return Ok(outcome(completion)),
            Reply::Challenge(challenge) if !established => {
                match context.step(&challenge) {
                    Ok(ContextStep::Continue(token)) => exchange.send(&token).await?,
                    Ok(ContextStep::Complete(token)) => {
                        established = true;
                        exchange.send(&token).await?;
                    }
                    Err(reason) => return fail(&mut exchange, reason).await,
                }
            }
            Reply::Challenge(challenge) => {
                match layer_response(context.as_mut(), &account.username, &challenge) {
                    Ok(response) => exchange.send(&response).await?,
                    Err(reason) => return fail(&mut exchange, reason).await,
                }
            }
        }
    }
}

/// Answers the wrapped security-layer round: no layer, echo the
/// server's size limit, append the authorization identity.
fn layer_response(
    context: &mut dyn SecurityContext,
    username: &str,
    challenge: &[u8],
) -> std::result::Result<Vec<u8>, String> {
    let plain = context.unwrap(challenge)?;
    if plain.len() < 4 {
        return Err(format!("security layer token too short: {}", plain.len()));
    }

    let mut reply = vec![LAYER_NONE, plain[1], plain[2], plain[3]];
    reply.extend_from_slice(username.as_bytes());
    context.wrap(&reply)
}

async fn fail<S>(exchange: &mut Exchange<'_, S>, reason: String) -> Result<AuthOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    exchange.abort().await?;
    Ok(AuthOutcome::Failed(reason))
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

    struct FakeContext {
        steps: u32,
    }

    impl SecurityContext for FakeContext {
        fn step(&mut self, input: &[u8]) -> std::result::Result<ContextStep, String> {
            self.steps += 1;
            match self.steps {
                1 => {
                    assert!(input.is_empty());
                    Ok(ContextStep::Continue(b"CLIENT1".to_vec()))
                }
                2 => {
                    assert_eq!(input, b"SRV1");
                    Ok(ContextStep::Complete(b"CLIENT2".to_vec()))
                }
                _ => Err("too many steps".to_string()),
            }
        }

        fn unwrap(&mut self, input: &[u8]) -> std::result::Result<Vec<u8>, String> {
            assert_eq!(input, b"WRAPPED");
            Ok(vec![0x01, 0x00, 0x10, 0x00])
        }

        fn wrap(&mut self, input: &[u8]) -> std::result::Result<Vec<u8>, String> {
            let mut out = b"W:".to_vec();
            out.extend_from_slice(input);
            Ok(out)
        }
    }

    struct FakeBuilder {
        fail: bool,
    }

    impl ContextBuilder for FakeBuilder {
        fn establish(
            &mut self,
            service: &str,
        ) -> std::result::Result<Box<dyn SecurityContext>, String> {
            assert_eq!(service, "imap@mail.example.com");
            if self.fail {
                Err("no credential cache".to_string())
            } else {
                Ok(Box::new(FakeContext { steps: 0 }))
            }
        }
    }

    #[tokio::test]
    async fn test_gssapi_full_exchange() {
        let mut wrapped_reply = b"W:".to_vec();
        wrapped_reply.extend_from_slice(&[0x01, 0x00, 0x10, 0x00]);
        wrapped_reply.extend_from_slice(b"alice");
        let final_line = format!("{}\r\n", STANDARD.encode(&wrapped_reply));

        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=GSSAPI] hi\r\n")
            .write(b"A0000 AUTHENTICATE GSSAPI Q0xJRU5UMQ==\r\n")
            .read(b"+ U1JWMQ==\r\n")
            .write(b"Q0xJRU5UMg==\r\n")
            .read(b"+ V1JBUFBFRA==\r\n")
            .write(final_line.as_bytes())
            .read(b"A0000 OK kerberos login\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("alice", "mail.example.com");
        let mut builder = FakeBuilder { fail: false };

        let result = attempt(&mut session, &mut NoopHandler, &account, &mut builder)
            .await
            .unwrap();
        assert_eq!(result, AuthOutcome::Success);
    }

    #[tokio::test]
    async fn test_gssapi_no_ticket_is_unavailable() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=GSSAPI] hi\r\n")
            .build();

        let mut session = Session::from_stream(mock).await.unwrap();
        let account = Account::new("alice", "mail.example.com");
        let mut builder = FakeBuilder { fail: true };

        let result = attempt(&mut session, &mut NoopHandler, &account, &mut builder)
            .await
            .unwrap();
        assert_eq!(
            result,
            AuthOutcome::Unavailable("no credential cache".to_string())
        );
    }

    #[test]
    fn test_layer_response_selects_no_layer() {
        let mut context = FakeContext { steps: 2 };
        let response = layer_response(&mut context, "bob", b"WRAPPED").unwrap();
        assert_eq!(&response[..2], b"W:");
        assert_eq!(response[2], 0x01);
        assert_eq!(&response[3..6], &[0x00, 0x10, 0x00]);
        assert_eq!(&response[6..], b"bob");
    }
}
