// End-to-end scenarios over the in-process broker.
use async_trait::async_trait;
use messenger::app;
use messenger::broker::{self, BrokerChannel, BrokerConnection, BrokerError, InProcessBroker};
use messenger::config::MessengerConfig;
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

fn quick_config() -> MessengerConfig {
    // Tighten the timers so a short real-time test sees some activity.
    MessengerConfig {
        emit_interval: Duration::from_millis(10),
        scale_interval: Duration::from_millis(50),
        ..MessengerConfig::default()
    }
}

#[tokio::test]
async fn connect_failure_exits_with_status_1() {
    let connect = async {
        Err::<Arc<dyn BrokerConnection>, _>(BrokerError::Connect("broker unreachable".into()))
    };
    let status = app::run(MessengerConfig::default(), connect, future::pending()).await;
    assert_eq!(status, 1);
}

// Connection whose channel opens always fail, for the fatal bring-up path.
struct FailingChannelConnection;

#[async_trait]
impl BrokerConnection for FailingChannelConnection {
    async fn open_channel(&self) -> broker::Result<Arc<dyn BrokerChannel>> {
        Err(BrokerError::Channel("channel refused".into()))
    }

    async fn close(&self) -> broker::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn channel_failure_exits_with_status_2() {
    let connect = async {
        Ok::<_, BrokerError>(Arc::new(FailingChannelConnection) as Arc<dyn BrokerConnection>)
    };
    let status = app::run(MessengerConfig::default(), connect, future::pending()).await;
    assert_eq!(status, 2);
}

// Connection whose channel opens complete only when the test releases them,
// so the bring-up interleaving is under test control.
struct GatedConnection {
    inner: Arc<dyn BrokerConnection>,
    gates: parking_lot::Mutex<Vec<oneshot::Receiver<()>>>,
}

#[async_trait]
impl BrokerConnection for GatedConnection {
    async fn open_channel(&self) -> broker::Result<Arc<dyn BrokerChannel>> {
        let gate = self.gates.lock().pop();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.inner.open_channel().await
    }

    async fn close(&self) -> broker::Result<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn startup_waits_for_the_second_channel_open() {
    // Connect succeeds, then the two channel opens resolve one at a time;
    // startup (observable as the consumer declaring the queue) must happen
    // after the second completion, not the first.
    let broker = Arc::new(InProcessBroker::new());
    let (first_tx, first_rx) = oneshot::channel::<()>();
    let (second_tx, second_rx) = oneshot::channel::<()>();
    let connection = Arc::new(GatedConnection {
        inner: broker.connect(),
        gates: parking_lot::Mutex::new(vec![first_rx, second_rx]),
    }) as Arc<dyn BrokerConnection>;
    let (signal_tx, signal_rx) = oneshot::channel::<()>();
    let config = MessengerConfig {
        scale_interval: Duration::from_secs(3600),
        ..MessengerConfig::default()
    };
    let run = tokio::spawn(app::run(
        config,
        async move { Ok::<_, BrokerError>(connection) },
        async move {
            let _ = signal_rx.await;
        },
    ));

    // Both opens still gated: no startup yet.
    sleep(Duration::from_millis(50)).await;
    assert!(!broker.has_queue("message-demo"));

    // One channel alone must not release startup.
    second_tx.send(()).expect("release first gate");
    sleep(Duration::from_millis(100)).await;
    assert!(
        !broker.has_queue("message-demo"),
        "startup must wait for both channels"
    );

    first_tx.send(()).expect("release second gate");
    timeout(Duration::from_secs(5), async {
        while !broker.has_queue("message-demo") {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("startup should follow the second channel open");

    signal_tx.send(()).expect("signal");
    let status = timeout(Duration::from_secs(5), run)
        .await
        .expect("run finished")
        .expect("join");
    assert_eq!(status, 0);
}

#[tokio::test]
async fn signal_shutdown_exits_with_status_0() {
    let broker = Arc::new(InProcessBroker::new());
    let connection = broker.connect();
    let (signal_tx, signal_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(app::run(
        quick_config(),
        async move { Ok::<_, BrokerError>(connection) },
        async move {
            let _ = signal_rx.await;
        },
    ));

    // Let bring-up and a few churn ticks happen in real time.
    sleep(Duration::from_millis(300)).await;
    assert!(
        broker.has_queue("message-demo"),
        "consumer declares the queue at startup"
    );

    signal_tx.send(()).expect("signal");
    let status = timeout(Duration::from_secs(5), run)
        .await
        .expect("run should finish promptly after the signal")
        .expect("join");
    assert_eq!(status, 0);
}

#[tokio::test]
async fn bring_up_completes_before_any_scaling_decision() {
    // With a long scale interval the run reaches its steady state with an
    // empty pool; startup itself must still have happened (queue declared,
    // consumer subscribed) before the signal arrives.
    let broker = Arc::new(InProcessBroker::new());
    let connection = broker.connect();
    let (signal_tx, signal_rx) = oneshot::channel::<()>();
    let config = MessengerConfig {
        scale_interval: Duration::from_secs(3600),
        ..MessengerConfig::default()
    };
    let run = tokio::spawn(app::run(
        config,
        async move { Ok::<_, BrokerError>(connection) },
        async move {
            let _ = signal_rx.await;
        },
    ));

    timeout(Duration::from_secs(5), async {
        while !broker.has_queue("message-demo") {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("startup should declare the queue");

    signal_tx.send(()).expect("signal");
    let status = timeout(Duration::from_secs(5), run)
        .await
        .expect("run finished")
        .expect("join");
    assert_eq!(status, 0);
}
