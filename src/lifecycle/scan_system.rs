use crate::clients::SubmissionClient;
use crate::config::{ChannelDefaults, Config};
use crate::consumer::{Consumer, ConsumerError, ConsumerHandle, DefaultProcessFactory};
use crate::fabric::{ChannelFabric, HeartbeatListener, InMemoryBroker};
use crate::heartbeat::LivenessMonitor;
use std::sync::Arc;
use tracing::{info, warn};

pub const QUEUE_WORKER: &str = "queue-service";
pub const SCAN_WORKER: &str = "scan-service";

/// Liveness listener that relies on the monitor's own logging.
struct Unobserved;

impl HeartbeatListener for Unobserved {}

/// Two services over one in-memory broker.
///
/// - The **queue service** consumes [`config.channels`](Config::channels). Plain
///   scans run in place; scan atoms are delegated to the scan service.
/// - The **scan service** consumes the same channel names prefixed with `scan.`
///   on the same address and runs every scan in place.
///
/// Both publish heartbeats on the shared heartbeat topic, watched by one
/// [`LivenessMonitor`].
///
/// # Example
///
/// ```ignore
/// let system = ScanSystem::start(Config::default())?;
/// let done = system.client.submit_and_wait(&task, Some(Duration::from_secs(30))).await?;
/// system.shutdown().await;
/// ```
pub struct ScanSystem {
    /// Submits to the queue service.
    pub client: SubmissionClient,

    /// Submits straight to the scan service.
    pub scan_client: SubmissionClient,

    pub broker: InMemoryBroker,

    queue_service: ConsumerHandle,
    scan_service: ConsumerHandle,
    monitor: LivenessMonitor,
}

impl ScanSystem {
    pub fn start(config: Config) -> Result<Self, ConsumerError> {
        Self::start_with_listener(config, Arc::new(Unobserved))
    }

    /// Starts both services, reporting liveness verdicts to `listener`.
    ///
    /// The scan service starts first so delegated children always find a consumer.
    pub fn start_with_listener(config: Config, listener: Arc<dyn HeartbeatListener>) -> Result<Self, ConsumerError> {
        let broker = InMemoryBroker::new();
        let fabric = ChannelFabric::new(Arc::new(broker.clone()));
        let scan_channels = ChannelDefaults::prefixed(config.channels.broker_address.clone(), "scan");

        let scan_config = Config {
            channels: scan_channels.clone(),
            ..config.clone()
        };
        let scan_factory = DefaultProcessFactory::new(fabric.clone(), scan_channels.clone(), config.process.clone());
        let scan_service = Consumer::new(SCAN_WORKER, fabric.clone(), &scan_config, Arc::new(scan_factory)).start()?;

        let queue_factory = DefaultProcessFactory::new(fabric.clone(), scan_channels.clone(), config.process.clone());
        let queue_service = Consumer::new(QUEUE_WORKER, fabric.clone(), &config, Arc::new(queue_factory)).start()?;

        let heartbeats =
            fabric.open_heartbeat_topic(&config.channels.broker_address, &config.channels.heartbeat_topic)?;
        let monitor = LivenessMonitor::start(&heartbeats, &config.heartbeat, listener)?;

        info!(queue = %config.channels.submit_queue, scan_queue = %scan_channels.submit_queue, "Scan system started");
        Ok(Self {
            client: SubmissionClient::new(fabric.clone(), config.channels),
            scan_client: SubmissionClient::new(fabric, scan_channels),
            broker,
            queue_service,
            scan_service,
            monitor,
        })
    }

    /// `None` until the worker has sent its first heartbeat.
    pub fn is_responsive(&self, worker_id: &str) -> Option<bool> {
        self.monitor.is_responsive(worker_id)
    }

    /// Stops the queue service first so no new children are delegated, then
    /// the scan service, then the liveness monitor.
    pub async fn shutdown(self) {
        info!("Shutting down scan system...");
        let active = self.queue_service.active().len() + self.scan_service.active().len();
        if active > 0 {
            warn!(active, "Terminating unfinished tasks");
        }
        self.queue_service.stop().await;
        self.scan_service.stop().await;
        self.monitor.stop().await;
        info!("Scan system shutdown complete.");
    }
}
