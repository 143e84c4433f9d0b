//! Zero-config default [`Deliver`]: records the formatted message via
//! `tracing::info!` and always succeeds. This is what lets the crate run
//! out of the box with no SMTP relay configured.

use async_trait::async_trait;
use tracing::info;

use super::{Deliver, DeliverError};

pub struct LoggingDeliverer {
    pub from_email: String,
}

impl LoggingDeliverer {
    pub fn new(from_email: impl Into<String>) -> Self {
        LoggingDeliverer {
            from_email: from_email.into(),
        }
    }
}

#[async_trait]
impl Deliver for LoggingDeliverer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliverError> {
        info!(from = %self.from_email, %to, %subject, %body, "email delivery (logging deliverer)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_succeeds() {
        let deliverer = LoggingDeliverer::new("notices@example.com");
        let result = deliverer.send("a@b.com", "subject", "body").await;
        assert!(result.is_ok());
    }
}
