//! Broker trait seam and error taxonomy.
//!
//! # Purpose
//! Narrows the broker surface to the operations this demo needs: connect,
//! open a channel, declare a queue, publish, subscribe, acknowledge, close.
//! The AMQP backend talks to a real broker; the in-process backend backs
//! the tests and offline runs.
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod amqp;
pub mod inprocess;

pub use amqp::AmqpConnection;
pub use inprocess::InProcessBroker;

pub type Result<T> = std::result::Result<T, BrokerError>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("failed to open connection to message broker")]
    Connect(#[source] BoxError),
    #[error("failed to open channel")]
    Channel(#[source] BoxError),
    #[error("failed to declare queue {queue}")]
    Declare { queue: String, source: BoxError },
    #[error("failed to publish to queue {queue}")]
    Publish { queue: String, source: BoxError },
    #[error("failed to subscribe to queue {queue}")]
    Subscribe { queue: String, source: BoxError },
    #[error("failed to acknowledge delivery")]
    Ack(#[source] BoxError),
    #[error("failed to close broker handle")]
    Close(#[source] BoxError),
}

impl BrokerError {
    /// Process exit status for a fatal broker error: 1 for a connection
    /// failure, 2 for anything that went wrong on an established connection.
    pub fn exit_code(&self) -> u8 {
        match self {
            BrokerError::Connect(_) => 1,
            _ => 2,
        }
    }
}

/// Logical connection to the broker. Owns the session; channels are scoped
/// to it and opened independently with no ordering guarantee between calls.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>>;

    async fn close(&self) -> Result<()>;
}

/// One logical direction of traffic on a connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares the queue, creating it if absent. Safe to call from every
    /// role-holder; whichever side runs first wins and the rest are no-ops.
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<()>;

    /// Fire-and-forget publish; no delivery confirmation is awaited.
    async fn publish(&self, queue: &str, payload: Bytes) -> Result<()>;

    /// Subscribes to the queue. Deliveries arrive on the returned receiver
    /// until the channel closes; each must be acknowledged explicitly.
    async fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Box<dyn Delivery>>>;

    async fn close(&self) -> Result<()>;
}

/// A single received message plus its acknowledgment handle.
#[async_trait]
pub trait Delivery: Send {
    fn payload(&self) -> &[u8];

    async fn ack(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_connect_from_channel_failures() {
        let connect = BrokerError::Connect("unreachable".into());
        assert_eq!(connect.exit_code(), 1);
        let channel = BrokerError::Channel("refused".into());
        assert_eq!(channel.exit_code(), 2);
        let publish = BrokerError::Publish {
            queue: "message-demo".to_string(),
            source: "closed".into(),
        };
        assert_eq!(publish.exit_code(), 2);
    }
}
