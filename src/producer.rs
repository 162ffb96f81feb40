// Periodic envelope emitter.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::broker::{self, BrokerChannel};
use crate::envelope::Envelope;

/// One member of the producer fleet.
///
/// Emits an [`Envelope`] on a fixed interval from a spawned task until
/// stopped. A stopped producer is discarded, never restarted.
pub struct Producer {
    slot: usize,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Producer {
    /// Declares the target queue and begins emitting. The first envelope
    /// goes out one full interval after start.
    pub async fn start(
        channel: Arc<dyn BrokerChannel>,
        queue: &str,
        message: &str,
        interval: Duration,
        slot: usize,
    ) -> broker::Result<Self> {
        channel.declare_queue(queue, false).await?;
        let (stop_tx, stop_rx) = oneshot::channel();
        // Anchor the schedule here, before the task is first polled.
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let handle = tokio::spawn(emit_loop(
            channel,
            queue.to_string(),
            message.to_string(),
            ticker,
            slot,
            stop_rx,
        ));
        Ok(Self {
            slot,
            stop_tx,
            handle,
        })
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Cancels the emission timer and waits for the task to wind down.
    /// No envelope with this producer's slot is emitted after this returns;
    /// a publish already dispatched to the broker is not recalled.
    pub async fn stop(self) {
        let Self {
            slot,
            stop_tx,
            handle,
        } = self;
        let _ = stop_tx.send(());
        if let Err(err) = handle.await {
            warn!(slot, error = %err, "producer task ended abnormally");
        }
    }
}

async fn emit_loop(
    channel: Arc<dyn BrokerChannel>,
    queue: String,
    message: String,
    mut ticker: tokio::time::Interval,
    slot: usize,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                let envelope = Envelope::new(message.clone(), slot);
                let payload = match envelope.encode() {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(slot, error = %err, "dropping unencodable envelope");
                        continue;
                    }
                };
                // Best-effort: a failed publish is logged, never fatal here.
                if let Err(err) = channel.publish(&queue, payload).await {
                    warn!(slot, error = %err, "publish failed");
                } else {
                    debug!(slot, "published envelope");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerConnection, InProcessBroker};
    use tokio::sync::mpsc;
    use tokio::time::{advance, timeout};

    const QUEUE: &str = "message-demo";

    async fn drain(
        deliveries: &mut mpsc::Receiver<Box<dyn crate::broker::Delivery>>,
    ) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        while let Ok(Some(delivery)) =
            timeout(Duration::from_millis(10), deliveries.recv()).await
        {
            envelopes.push(Envelope::decode(delivery.payload()).expect("decode"));
        }
        envelopes
    }

    #[tokio::test(start_paused = true)]
    async fn emits_once_per_interval() {
        let broker = Arc::new(InProcessBroker::new());
        let channel = broker.connect().open_channel().await.expect("channel");
        let producer = Producer::start(
            Arc::clone(&channel),
            QUEUE,
            "Hello Demo!",
            Duration::from_millis(500),
            1,
        )
        .await
        .expect("start");
        let mut deliveries = channel.subscribe(QUEUE).await.expect("subscribe");
        tokio::task::yield_now().await;

        // Step the clock one interval at a time so each tick is observed.
        for _ in 0..3 {
            advance(Duration::from_millis(500)).await;
            tokio::task::yield_now().await;
        }
        producer.stop().await;

        let envelopes = drain(&mut deliveries).await;
        assert_eq!(envelopes.len(), 3, "three full intervals elapsed");
        assert!(envelopes.iter().all(|envelope| envelope.slot == 1));
        assert!(
            envelopes
                .iter()
                .all(|envelope| envelope.message == "Hello Demo!")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_emitted_before_the_first_interval() {
        let broker = Arc::new(InProcessBroker::new());
        let channel = broker.connect().open_channel().await.expect("channel");
        let producer = Producer::start(
            Arc::clone(&channel),
            QUEUE,
            "Hello Demo!",
            Duration::from_millis(500),
            1,
        )
        .await
        .expect("start");
        let mut deliveries = channel.subscribe(QUEUE).await.expect("subscribe");
        tokio::task::yield_now().await;

        advance(Duration::from_millis(499)).await;
        tokio::task::yield_now().await;
        producer.stop().await;

        assert!(drain(&mut deliveries).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_emission_for_good() {
        let broker = Arc::new(InProcessBroker::new());
        let channel = broker.connect().open_channel().await.expect("channel");
        let producer = Producer::start(
            Arc::clone(&channel),
            QUEUE,
            "Hello Demo!",
            Duration::from_millis(500),
            7,
        )
        .await
        .expect("start");
        let mut deliveries = channel.subscribe(QUEUE).await.expect("subscribe");
        tokio::task::yield_now().await;

        advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        producer.stop().await;
        let before = drain(&mut deliveries).await.len();
        assert_eq!(before, 1);

        // However long we wait afterwards, slot 7 stays silent.
        advance(Duration::from_secs(60)).await;
        assert!(drain(&mut deliveries).await.is_empty());
    }
}
