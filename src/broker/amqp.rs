// AMQP backend built on lapin.
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, ConnectionProperties};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{BrokerChannel, BrokerConnection, BrokerError, Delivery, Result};

// Bounded hand-off between the lapin consumer stream and the application.
const DELIVERY_QUEUE_DEPTH: usize = 64;

const CONSUMER_TAG: &str = "messenger-consumer";
const CLOSE_REPLY_CODE: u16 = 200;

/// Connection to a real AMQP broker.
pub struct AmqpConnection {
    inner: lapin::Connection,
}

impl AmqpConnection {
    pub async fn connect(url: &str) -> Result<Self> {
        let inner = lapin::Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|err| BrokerError::Connect(err.into()))?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        let channel = self
            .inner
            .create_channel()
            .await
            .map_err(|err| BrokerError::Channel(err.into()))?;
        debug!(id = channel.id(), "amqp channel opened");
        Ok(Arc::new(AmqpChannel { inner: channel }))
    }

    async fn close(&self) -> Result<()> {
        self.inner
            .close(CLOSE_REPLY_CODE, "client shutdown")
            .await
            .map_err(|err| BrokerError::Close(err.into()))
    }
}

struct AmqpChannel {
    inner: lapin::Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<()> {
        let options = QueueDeclareOptions {
            durable,
            ..QueueDeclareOptions::default()
        };
        self.inner
            .queue_declare(queue, options, FieldTable::default())
            .await
            .map_err(|err| BrokerError::Declare {
                queue: queue.to_string(),
                source: err.into(),
            })?;
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Bytes) -> Result<()> {
        // Publish through the default exchange so the routing key is the
        // queue name. The confirmation future is dropped: fire-and-forget.
        self.inner
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|err| BrokerError::Publish {
                queue: queue.to_string(),
                source: err.into(),
            })?;
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Box<dyn Delivery>>> {
        let mut consumer = self
            .inner
            .basic_consume(
                queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| BrokerError::Subscribe {
                queue: queue.to_string(),
                source: err.into(),
            })?;
        let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(attempt) = consumer.next().await {
                match attempt {
                    Ok(delivery) => {
                        let boxed: Box<dyn Delivery> = Box::new(AmqpDelivery { inner: delivery });
                        if delivery_tx.send(boxed).await.is_err() {
                            // Application side hung up; stop forwarding.
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "amqp consumer stream failed");
                        break;
                    }
                }
            }
        });
        Ok(delivery_rx)
    }

    async fn close(&self) -> Result<()> {
        self.inner
            .close(CLOSE_REPLY_CODE, "client shutdown")
            .await
            .map_err(|err| BrokerError::Close(err.into()))
    }
}

struct AmqpDelivery {
    inner: lapin::message::Delivery,
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn payload(&self) -> &[u8] {
        // The payload lives in the delivery's data buffer, not in the
        // delivery object itself.
        &self.inner.data
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        self.inner
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|err| BrokerError::Ack(err.into()))
    }
}
