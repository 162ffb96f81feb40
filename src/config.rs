// Client configuration sourced from environment variables.
use std::time::Duration;

const DEFAULT_BROKER_URL: &str = "amqp://localhost:5672";
const DEFAULT_QUEUE: &str = "message-demo";
const DEFAULT_MESSAGE: &str = "Hello Demo!";
// One envelope per producer every 500ms.
const DEFAULT_EMIT_INTERVAL_MS: u64 = 500;
// One scale-up/scale-down coin flip every 3s; usually enough time to watch
// the slot numbers change in the consumer's log.
const DEFAULT_SCALE_INTERVAL_MS: u64 = 3000;

#[derive(Debug, Clone)]
pub struct MessengerConfig {
    // Broker address handed to the AMQP connector.
    pub broker_url: String,
    // Queue shared by every producer and the consumer.
    pub queue: String,
    // Fixed message text carried by every envelope.
    pub message: String,
    // Interval between envelope emissions within one producer.
    pub emit_interval: Duration,
    // Interval between producer-pool scaling decisions.
    pub scale_interval: Duration,
}

impl MessengerConfig {
    pub fn from_env() -> Self {
        // Environment variables provide overrides for local development.
        let broker_url = std::env::var("MESSENGER_BROKER_URL")
            .unwrap_or_else(|_| DEFAULT_BROKER_URL.to_string());
        let queue =
            std::env::var("MESSENGER_QUEUE").unwrap_or_else(|_| DEFAULT_QUEUE.to_string());
        let message =
            std::env::var("MESSENGER_MESSAGE").unwrap_or_else(|_| DEFAULT_MESSAGE.to_string());
        let emit_interval_ms = std::env::var("MESSENGER_EMIT_INTERVAL_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_EMIT_INTERVAL_MS);
        let scale_interval_ms = std::env::var("MESSENGER_SCALE_INTERVAL_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_SCALE_INTERVAL_MS);
        Self {
            broker_url,
            queue,
            message,
            emit_interval: Duration::from_millis(emit_interval_ms),
            scale_interval: Duration::from_millis(scale_interval_ms),
        }
    }
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            queue: DEFAULT_QUEUE.to_string(),
            message: DEFAULT_MESSAGE.to_string(),
            emit_interval: Duration::from_millis(DEFAULT_EMIT_INTERVAL_MS),
            scale_interval: Duration::from_millis(DEFAULT_SCALE_INTERVAL_MS),
        }
    }
}
