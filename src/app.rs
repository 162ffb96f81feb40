//! Orchestration: connection bring-up, startup, and coordinated shutdown.
//!
//! # Purpose
//! Owns the broker handles in one explicit context, brings the two channels
//! up concurrently behind a latch, starts the consumer and the producer
//! churn, and tears everything down in connection-channel order on a fatal
//! error or a termination signal.
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::barrier::ChannelBarrier;
use crate::broker::{self, BrokerChannel, BrokerConnection};
use crate::config::MessengerConfig;
use crate::consumer::Consumer;
use crate::pool::{self, ProducerPool};

/// Status reported for a clean, signal-driven exit.
pub const STATUS_OK: u8 = 0;
// Channel-level failures that carry no BrokerError of their own.
const STATUS_CHANNEL_FAILURE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelRole {
    Producer,
    Consumer,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRole::Producer => write!(f, "producer"),
            ChannelRole::Consumer => write!(f, "consumer"),
        }
    }
}

/// Everything the running demo owns: the connection plus the two channels.
/// Replaces the original design's free-standing module globals.
#[derive(Default)]
pub struct MessengerContext {
    connection: Option<Arc<dyn BrokerConnection>>,
    producer_channel: Option<Arc<dyn BrokerChannel>>,
    consumer_channel: Option<Arc<dyn BrokerChannel>>,
}

impl MessengerContext {
    /// Releases channels and connection in a fixed order and returns the
    /// process status. Each close step is guarded by presence, never by the
    /// success of the previous step; close failures are logged and skipped.
    pub async fn shutdown(&mut self, status: u8, reason: Option<&str>) -> u8 {
        if let Some(reason) = reason {
            info!(reason, "shutting down");
        }
        info!("shooting the messenger");
        if let Some(channel) = self.producer_channel.take() {
            info!("closing the producer channel");
            if let Err(err) = channel.close().await {
                warn!(error = %err, "producer channel close failed");
            }
        }
        if let Some(channel) = self.consumer_channel.take() {
            info!("closing the consumer channel");
            if let Err(err) = channel.close().await {
                warn!(error = %err, "consumer channel close failed");
            }
        }
        if let Some(connection) = self.connection.take() {
            info!("closing the connection to the message broker");
            if let Err(err) = connection.close().await {
                warn!(error = %err, "connection close failed");
            }
        }
        status
    }
}

/// Runs the demo to completion and returns the process status.
///
/// `connect` produces the broker connection (AMQP in the binary, in-process
/// in the tests); `shutdown_signal` resolves when the process should wind
/// down cleanly.
pub async fn run<C, F>(config: MessengerConfig, connect: C, shutdown_signal: F) -> u8
where
    C: Future<Output = broker::Result<Arc<dyn BrokerConnection>>>,
    F: Future<Output = ()>,
{
    let mut context = MessengerContext::default();

    let connection = match connect.await {
        Ok(connection) => connection,
        Err(err) => {
            error!(error = %err, "broker connect failed");
            return context
                .shutdown(
                    err.exit_code(),
                    Some("failed to open connection to message broker"),
                )
                .await;
        }
    };
    info!("connection to message broker established");
    context.connection = Some(Arc::clone(&connection));

    // The two channel opens run concurrently and complete in unknown
    // relative order; the latch holds startup until the second one lands.
    let (result_tx, mut result_rx) = mpsc::channel(2);
    for role in [ChannelRole::Producer, ChannelRole::Consumer] {
        let connection = Arc::clone(&connection);
        let result_tx = result_tx.clone();
        tokio::spawn(async move {
            let result = connection.open_channel().await;
            let _ = result_tx.send((role, result)).await;
        });
    }
    drop(result_tx);

    let barrier = ChannelBarrier::new(2);
    loop {
        let Some((role, result)) = result_rx.recv().await else {
            return context
                .shutdown(
                    STATUS_CHANNEL_FAILURE,
                    Some("channel bring-up ended before both channels were ready"),
                )
                .await;
        };
        match result {
            Ok(channel) => {
                info!(%role, "channel established");
                match role {
                    ChannelRole::Producer => context.producer_channel = Some(channel),
                    ChannelRole::Consumer => context.consumer_channel = Some(channel),
                }
                if barrier.arrive() {
                    break;
                }
            }
            Err(err) => {
                error!(%role, error = %err, "channel open failed");
                let reason = format!("failed to open channel for {role}s");
                return context.shutdown(err.exit_code(), Some(&reason)).await;
            }
        }
    }

    let (Some(producer_channel), Some(consumer_channel)) = (
        context.producer_channel.clone(),
        context.consumer_channel.clone(),
    ) else {
        // The latch only releases once both slots are filled.
        return context
            .shutdown(
                STATUS_CHANNEL_FAILURE,
                Some("channel bring-up released without both channels"),
            )
            .await;
    };

    // Startup: one consumer is plenty for everything the fleet sends.
    let _consumer = match Consumer::start(consumer_channel, &config.queue).await {
        Ok(consumer) => consumer,
        Err(err) => {
            error!(error = %err, "consumer start failed");
            return context
                .shutdown(err.exit_code(), Some("failed to start the consumer"))
                .await;
        }
    };

    let pool = ProducerPool::new(producer_channel, &config);
    let mut churn = tokio::spawn(pool::run_churn(pool, config.scale_interval));

    let status = tokio::select! {
        _ = shutdown_signal => {
            context
                .shutdown(STATUS_OK, Some("termination signal received"))
                .await
        }
        churn_result = &mut churn => match churn_result {
            Ok(Err(err)) => {
                error!(error = %err, "producer scaling failed");
                context
                    .shutdown(err.exit_code(), Some("producer scaling failed"))
                    .await
            }
            Ok(Ok(())) => {
                context
                    .shutdown(STATUS_OK, Some("producer scaling stopped"))
                    .await
            }
            Err(err) => {
                error!(error = %err, "scaling task failed");
                context
                    .shutdown(STATUS_CHANNEL_FAILURE, Some("scaling task failed"))
                    .await
            }
        },
    };
    churn.abort();
    status
}
