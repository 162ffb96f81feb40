// Roster of live producers plus the timer that churns it.
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::broker::{self, BrokerChannel};
use crate::config::MessengerConfig;
use crate::producer::Producer;

/// Ordered roster of live producers; insertion order is creation order.
///
/// Scaling follows a LIFO discipline: only the most recently created
/// producer is ever removed. Slots are 1-based positions at creation time,
/// so after enough churn two different producers over the run's lifetime
/// can have carried the same slot number. That is the demo's documented
/// behavior, kept as-is.
pub struct ProducerPool {
    channel: Arc<dyn BrokerChannel>,
    queue: String,
    message: String,
    emit_interval: Duration,
    producers: Vec<Producer>,
}

impl ProducerPool {
    pub fn new(channel: Arc<dyn BrokerChannel>, config: &MessengerConfig) -> Self {
        Self {
            channel,
            queue: config.queue.clone(),
            message: config.message.clone(),
            emit_interval: config.emit_interval,
            producers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// Slots of the live producers, in creation order.
    pub fn slots(&self) -> Vec<usize> {
        self.producers.iter().map(Producer::slot).collect()
    }

    /// Starts one more producer and appends it to the roster. A failure
    /// here is channel-level and therefore fatal to the whole process.
    pub async fn scale_up(&mut self) -> broker::Result<()> {
        let slot = self.producers.len() + 1;
        let producer = Producer::start(
            Arc::clone(&self.channel),
            &self.queue,
            &self.message,
            self.emit_interval,
            slot,
        )
        .await?;
        self.producers.push(producer);
        info!(total = self.producers.len(), slot, "created a producer");
        Ok(())
    }

    /// Stops and discards the tail producer. On an empty pool this is a
    /// logged no-op, not an error.
    pub async fn scale_down(&mut self) {
        let Some(producer) = self.producers.pop() else {
            info!("no producers to remove");
            return;
        };
        let slot = producer.slot();
        producer.stop().await;
        info!(total = self.producers.len(), slot, "removed a producer");
    }
}

/// Drives the pool with one coin flip per tick: heads grows the fleet,
/// tails shrinks it. Runs until a scale-up fails fatally.
pub async fn run_churn(mut pool: ProducerPool, scale_interval: Duration) -> broker::Result<()> {
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + scale_interval, scale_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let grow = rand::thread_rng().gen_bool(0.5);
        if grow {
            pool.scale_up().await?;
        } else {
            pool.scale_down().await;
        }
    }
}
