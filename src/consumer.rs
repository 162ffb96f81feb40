// Queue subscriber: parses, logs, and acknowledges each delivery.
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::{self, BrokerChannel, Delivery};
use crate::envelope::Envelope;

/// The single consumer draining the shared queue.
///
/// Holds no state beyond its subscription task; one instance keeps up with
/// however many producers the pool is running at the time.
pub struct Consumer {
    handle: JoinHandle<()>,
}

impl Consumer {
    /// Declares the target queue (idempotent, so either side may run
    /// first), subscribes, and processes deliveries until the channel
    /// closes. Every delivery is acknowledged exactly once.
    pub async fn start(channel: Arc<dyn BrokerChannel>, queue: &str) -> broker::Result<Self> {
        channel.declare_queue(queue, false).await?;
        let deliveries = channel.subscribe(queue).await?;
        let handle = tokio::spawn(consume_loop(deliveries));
        info!("created a consumer");
        Ok(Self { handle })
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        // Shutdown closes the channels without draining the queue first;
        // once the owner lets go there is nothing left for the
        // subscription task to serve, so cut it loose.
        self.handle.abort();
    }
}

async fn consume_loop(mut deliveries: mpsc::Receiver<Box<dyn Delivery>>) {
    while let Some(delivery) = deliveries.recv().await {
        match Envelope::decode(delivery.payload()) {
            Ok(envelope) => {
                info!(
                    message = %envelope.message,
                    slot = envelope.slot,
                    timestamp = envelope.timestamp,
                    "received message"
                );
            }
            Err(err) => {
                // Malformed payloads are dropped, not redelivered: ack below
                // still runs so the broker forgets them.
                warn!(error = %err, "discarding malformed payload");
            }
        }
        if let Err(err) = delivery.ack().await {
            warn!(error = %err, "failed to acknowledge delivery");
        }
    }
}
