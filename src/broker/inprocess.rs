// In-process broker backend for tests and offline runs.
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use super::{BrokerChannel, BrokerConnection, BrokerError, Delivery, Result};

/// Broker that lives inside the process.
///
/// Queues are unbounded buffers: envelopes published before anyone
/// subscribes are retained and handed over once a consumer arrives. Each
/// queue supports a single consumer, which is all this demo ever creates.
///
/// ```
/// use bytes::Bytes;
/// use messenger::broker::{BrokerConnection, InProcessBroker};
/// use std::sync::Arc;
///
/// let broker = Arc::new(InProcessBroker::new());
/// let connection = broker.connect();
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     let channel = connection.open_channel().await.expect("channel");
///     channel.declare_queue("demo", false).await.expect("declare");
///     channel
///         .publish("demo", Bytes::from_static(b"{}"))
///         .await
///         .expect("publish");
///     let mut deliveries = channel.subscribe("demo").await.expect("subscribe");
///     let delivery = deliveries.recv().await.expect("delivery");
///     assert_eq!(delivery.payload(), b"{}");
///     delivery.ack().await.expect("ack");
/// });
/// assert_eq!(broker.acked(), 1);
/// ```
#[derive(Default)]
pub struct InProcessBroker {
    queues: Mutex<HashMap<String, QueueState>>,
    // Total acknowledgments seen, for test assertions.
    acked: AtomicUsize,
}

struct QueueState {
    publish_tx: mpsc::UnboundedSender<Bytes>,
    // Taken by the first subscriber.
    delivery_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a logical connection sharing this broker's state.
    pub fn connect(self: &Arc<Self>) -> Arc<dyn BrokerConnection> {
        Arc::new(InProcessConnection {
            broker: Arc::clone(self),
        })
    }

    /// Number of deliveries acknowledged so far.
    pub fn acked(&self) -> usize {
        self.acked.load(Ordering::SeqCst)
    }

    /// Whether a queue has been declared.
    pub fn has_queue(&self, queue: &str) -> bool {
        self.queues.lock().contains_key(queue)
    }
}

struct InProcessConnection {
    broker: Arc<InProcessBroker>,
}

#[async_trait]
impl BrokerConnection for InProcessConnection {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        Ok(Arc::new(InProcessChannel {
            broker: Arc::clone(&self.broker),
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct InProcessChannel {
    broker: Arc<InProcessBroker>,
}

#[async_trait]
impl BrokerChannel for InProcessChannel {
    async fn declare_queue(&self, queue: &str, _durable: bool) -> Result<()> {
        let mut queues = self.broker.queues.lock();
        queues.entry(queue.to_string()).or_insert_with(|| {
            let (publish_tx, delivery_rx) = mpsc::unbounded_channel();
            QueueState {
                publish_tx,
                delivery_rx: Some(delivery_rx),
            }
        });
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Bytes) -> Result<()> {
        let queues = self.broker.queues.lock();
        let state = queues.get(queue).ok_or_else(|| BrokerError::Publish {
            queue: queue.to_string(),
            source: "queue has not been declared".into(),
        })?;
        state
            .publish_tx
            .send(payload)
            .map_err(|_| BrokerError::Publish {
                queue: queue.to_string(),
                source: "queue buffer dropped".into(),
            })
    }

    async fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Box<dyn Delivery>>> {
        let mut buffered = {
            let mut queues = self.broker.queues.lock();
            let state = queues.get_mut(queue).ok_or_else(|| BrokerError::Subscribe {
                queue: queue.to_string(),
                source: "queue has not been declared".into(),
            })?;
            state
                .delivery_rx
                .take()
                .ok_or_else(|| BrokerError::Subscribe {
                    queue: queue.to_string(),
                    source: "queue already has a consumer".into(),
                })?
        };
        let (delivery_tx, delivery_rx) = mpsc::channel(64);
        let broker = Arc::clone(&self.broker);
        tokio::spawn(async move {
            while let Some(payload) = buffered.recv().await {
                let boxed: Box<dyn Delivery> = Box::new(InProcessDelivery {
                    payload,
                    broker: Arc::clone(&broker),
                });
                if delivery_tx.send(boxed).await.is_err() {
                    break;
                }
            }
        });
        Ok(delivery_rx)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct InProcessDelivery {
    payload: Bytes,
    broker: Arc<InProcessBroker>,
}

#[async_trait]
impl Delivery for InProcessDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        self.broker.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
