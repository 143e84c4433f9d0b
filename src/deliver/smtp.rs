//! Real SMTP [`Deliver`], feature-gated behind `smtp`. Off by default so
//! the crate runs with zero configuration; an operator opts in via
//! `--smtp-*` flags/env vars and `SES_FROM_EMAIL` for the `From:` address.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{Deliver, DeliverError};

pub struct SmtpDeliverer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpDeliverer {
    pub fn new(
        relay: &str,
        username: &str,
        password: &str,
        from_email: &str,
    ) -> Result<Self, DeliverError> {
        let creds = Credentials::new(username.to_string(), password.to_string());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(relay)
            .map_err(|e| DeliverError(format!("smtp relay config: {e}")))?
            .credentials(creds)
            .build();
        let from: Mailbox = from_email
            .parse()
            .map_err(|e| DeliverError(format!("invalid SES_FROM_EMAIL '{from_email}': {e}")))?;
        Ok(SmtpDeliverer { transport, from })
    }
}

#[async_trait]
impl Deliver for SmtpDeliverer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliverError> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| DeliverError(format!("invalid recipient '{to}': {e}")))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| DeliverError(format!("SMTP send failed: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| DeliverError(format!("SMTP send failed: {e}")))?;
        Ok(())
    }
}
