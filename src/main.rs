// Demo entry point: connect to the broker and run until interrupted.
use messenger::app;
use messenger::broker::{AmqpConnection, BrokerConnection};
use messenger::config::MessengerConfig;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = MessengerConfig::from_env();
    let broker_url = config.broker_url.clone();
    let connect = async move {
        AmqpConnection::connect(&broker_url)
            .await
            .map(|connection| Arc::new(connection) as Arc<dyn BrokerConnection>)
    };
    let status = app::run(config, connect, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;
    ExitCode::from(status)
}
