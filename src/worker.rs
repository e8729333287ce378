use std::sync::Arc;

use futures_util::{future::BoxFuture, StreamExt};
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::broker::{AmqpChannel, BrokerChannel, Pool};
use crate::config::Config;
use crate::consumer::Consumer;
use crate::delivery::Delivery;
use crate::dispatch::{Dispatcher, SetupError};
use crate::metrics::Metrics;
use crate::observer::{FailureObserver, LogObserver};
use crate::shutdown::ShutdownSignal;

// ── Error ──────────────────────────────────────────────────────────────────────

/// Startup failure. Anything that goes wrong before all subscriptions are
/// live aborts the worker; nothing here is retried.
#[derive(Debug)]
pub enum WorkerError {
    Connection(String),
    Channel(String),
    Qos(String),
    Setup(SetupError),
    Subscribe(String),
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(m) => write!(f, "worker connection error: {m}"),
            Self::Channel(m) => write!(f, "worker channel error: {m}"),
            Self::Qos(m) => write!(f, "QoS setup failed: {m}"),
            Self::Setup(e) => write!(f, "queue setup failed: {e}"),
            Self::Subscribe(m) => write!(f, "failed to start consuming: {m}"),
        }
    }
}

impl std::error::Error for WorkerError {}

// ── Registration ───────────────────────────────────────────────────────────────

// Consumer types are heterogeneous (each has its own Message type), so a
// registration is stored as a deferred start function that owns its
// consumer and spawns the fully-typed dispatch machinery when run.
struct Registration {
    queue: String,
    start: StartFn,
}

type StartFn =
    Box<dyn FnOnce(StartCtx) -> BoxFuture<'static, Result<Vec<JoinHandle<()>>, WorkerError>> + Send>;

struct StartCtx {
    pool: Pool,
    config: Config,
    metrics: Arc<Metrics>,
    observers: Vec<Arc<dyn FailureObserver>>,
    shutdown: ShutdownSignal,
}

// ── Worker ─────────────────────────────────────────────────────────────────────

/// Hosts any number of consumer types against one broker.
///
/// Each registered consumer gets its own channel, queue setup (including
/// the retry ladder when the consumer opts in), subscription with manual
/// acknowledgement, and a fixed set of dispatch tasks.
///
/// # Architecture (per consumer)
///
/// ```text
/// lapin consumer stream
///     │
///     │  consume loop: lapin delivery → Delivery, stops on shutdown
///     ▼
/// bounded mpsc (capacity = workers × 2)
///     │
///     │  Arc<Mutex<Receiver>> shared by N dispatch tasks
///     ▼
/// task-0..task-N ──► Dispatcher::handle_message ──► ack / nack / republish
/// ```
///
/// # Backpressure
/// When all dispatch tasks are busy and the buffer is full, the consume
/// loop's `send().await` blocks, which stops it from pulling the stream;
/// combined with `prefetch_count` the broker then holds deliveries back
/// until an ack frees a slot.
///
/// # Shutdown
/// On signal the consume loops stop and drop their senders; dispatch tasks
/// drain buffered deliveries to a terminal action and exit; `run` joins
/// every task before returning.
pub struct Worker {
    pool: Pool,
    config: Config,
    metrics: Arc<Metrics>,
    observers: Vec<Arc<dyn FailureObserver>>,
    registrations: Vec<Registration>,
}

impl Worker {
    /// A [`LogObserver`] is installed by default; additional observers
    /// stack on top of it.
    pub fn new(pool: Pool, config: Config) -> Self {
        Self {
            pool,
            config,
            metrics: Arc::new(Metrics::new()),
            observers: vec![Arc::new(LogObserver)],
            registrations: Vec::new(),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn add_observer(&mut self, observer: Arc<dyn FailureObserver>) {
        self.observers.push(observer);
    }

    /// Register a consumer type. All registration happens before
    /// [`run`](Self::run); there is no way to add subscriptions to a
    /// running worker.
    pub fn register<C: Consumer>(&mut self, consumer: C) {
        let queue = consumer.queue_name().to_string();
        let consumer = Arc::new(consumer);
        let start: StartFn = Box::new(move |ctx| Box::pin(run_consumer(consumer, ctx)));
        self.registrations.push(Registration { queue, start });
    }

    /// Set up every registered consumer, then process deliveries until
    /// `shutdown` fires and all in-flight work has drained.
    ///
    /// Setup is sequential and fail-fast: a declaration or subscription
    /// error on any consumer aborts startup with the cause.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> Result<(), WorkerError> {
        if self.registrations.is_empty() {
            tracing::warn!("no consumers registered, nothing to do");
            return Ok(());
        }

        let consumer_count = self.registrations.len();
        let mut handles = Vec::new();

        for registration in self.registrations.drain(..) {
            tracing::info!(queue = %registration.queue, "starting consumer");

            let ctx = StartCtx {
                pool: self.pool.clone(),
                config: self.config.clone(),
                metrics: Arc::clone(&self.metrics),
                observers: self.observers.clone(),
                shutdown: shutdown.clone(),
            };

            handles.extend((registration.start)(ctx).await?);
        }

        tracing::info!(
            consumers = consumer_count,
            workers_per_consumer = self.config.workers_count,
            "✅ worker ready"
        );

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task panicked");
            }
        }

        self.metrics.log_summary();
        tracing::info!("worker stopped");
        Ok(())
    }
}

// ── Per-consumer machinery ─────────────────────────────────────────────────────

/// Open a channel, provision the consumer's topology, subscribe, and spawn
/// the consume loop plus N dispatch tasks. Returns the spawned handles.
async fn run_consumer<C: Consumer>(
    consumer: Arc<C>,
    ctx: StartCtx,
) -> Result<Vec<JoinHandle<()>>, WorkerError> {
    let StartCtx {
        pool,
        config,
        metrics,
        observers,
        shutdown,
    } = ctx;

    let conn = pool
        .get()
        .await
        .map_err(|e| WorkerError::Connection(e.to_string()))?;

    let channel = conn
        .create_channel()
        .await
        .map_err(|e| WorkerError::Channel(e.to_string()))?;

    // conn (pool object) drops here; the channel keeps the underlying
    // connection alive, lapin is Arc-backed.

    channel
        .basic_qos(config.prefetch_count, BasicQosOptions { global: false })
        .await
        .map_err(|e| WorkerError::Qos(e.to_string()))?;

    let broker: Arc<dyn BrokerChannel> = Arc::new(AmqpChannel::new(channel.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&consumer),
        Arc::clone(&broker),
        config.exchange_name.clone(),
        observers,
        Arc::clone(&metrics),
    ));

    dispatcher.setup_queue().await.map_err(WorkerError::Setup)?;

    let tag = format!("{}-{}", config.consumer_tag_prefix, uuid::Uuid::new_v4());
    let stream = channel
        .basic_consume(
            consumer.queue_name(),
            &tag,
            BasicConsumeOptions {
                no_ack: false, // manual acknowledgement, always
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| WorkerError::Subscribe(e.to_string()))?;

    tracing::info!(queue = consumer.queue_name(), tag = %tag, "▶️  consuming");

    let (tx, rx) = mpsc::channel::<Delivery>(config.workers_count * 2);
    let shared_rx = Arc::new(Mutex::new(rx));

    let mut handles = Vec::with_capacity(config.workers_count + 1);

    for worker_id in 0..config.workers_count {
        let rx = Arc::clone(&shared_rx);
        let dispatcher = Arc::clone(&dispatcher);

        handles.push(tokio::spawn(async move {
            loop {
                // Hold the lock only across recv(), not across dispatch, so
                // at most one task waits on the mutex while the rest are
                // processing.
                let delivery = {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                };

                match delivery {
                    None => {
                        tracing::debug!(worker = worker_id, "dispatch task stopping");
                        break;
                    }
                    Some(delivery) => dispatcher.handle_message(delivery).await,
                }
            }
        }));
    }

    let queue = consumer.queue_name().to_string();
    handles.push(tokio::spawn(consume_loop(stream, tx, metrics, shutdown, queue)));

    Ok(handles)
}

/// Map raw lapin deliveries into [`Delivery`] values and feed the dispatch
/// channel. Runs until the stream ends or shutdown fires; dropping the
/// sender on exit is what lets the dispatch tasks drain and stop.
async fn consume_loop(
    mut stream: lapin::Consumer,
    tx: mpsc::Sender<Delivery>,
    metrics: Arc<Metrics>,
    mut shutdown: ShutdownSignal,
    queue: String,
) {
    loop {
        // biased: check shutdown before the stream so a busy queue cannot
        // starve the signal.
        tokio::select! {
            biased;

            _ = shutdown.wait() => {
                tracing::info!(queue = %queue, "🛑 shutdown signal received, draining in-flight deliveries");
                break;
            }

            next = stream.next() => {
                match next {
                    None => {
                        tracing::warn!(queue = %queue, "consumer stream closed by broker");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!(queue = %queue, error = %e, "consumer stream error");
                        break;
                    }
                    Some(Ok(raw)) => {
                        metrics.inc_received();
                        if tx.send(Delivery::from(raw)).await.is_err() {
                            // All dispatch tasks are gone; nothing left to feed.
                            break;
                        }
                    }
                }
            }
        }
    }
}
