//! The `Deliver` capability: an opaque email transport the Worker calls
//! after chaos injection passes. We ship a zero-config default
//! ([`LoggingDeliverer`]) and a real SMTP transport behind the `smtp`
//! feature.

pub mod logging;
#[cfg(feature = "smtp")]
pub mod smtp;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DeliverError(pub String);

/// `send(to, subject, body) -> Result<(), DeliverError>`.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliverError>;
}
