use anyhow::Result;
use helion::clock::{Clock, SystemClock};
use helion::loadpoint::events::{ChannelNotifier, EventMessage};
use helion::logging::{get_logger, init_logging};
use helion::publish::BroadcastPublisher;
use helion::{Config, Scheduler, Site, sim};
use std::sync::Arc;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;
    init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    let logger = get_logger("main");
    logger.info(&format!(
        "Helion v{} starting up: {}",
        env!("APP_VERSION"),
        config.site.title
    ));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let publisher = Arc::new(BroadcastPublisher::new(1024));
    let devices = sim::build_devices(&config, &clock)
        .map_err(|e| anyhow::anyhow!("Failed to create devices: {}", e))?;
    let site = Site::from_config(&config, devices, clock, publisher.clone())
        .map_err(|e| anyhow::anyhow!("Failed to create site: {}", e))?;

    // Lifecycle notifications
    let (events_tx, mut events_rx) = broadcast::channel::<EventMessage>(64);
    for lp in site.loadpoints() {
        let mut lp = lp.lock().await;
        let notifier = ChannelNotifier::new(lp.name(), events_tx.clone());
        lp.add_observer(Box::new(notifier));
    }
    let events_task = tokio::spawn(async move {
        let logger = get_logger("events");
        loop {
            match events_rx.recv().await {
                Ok(message) => {
                    logger.info(&format!("{}: {:?}", message.loadpoint, message.event));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    logger.warn(&format!("dropped {n} lifecycle events"));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    site.prepare().await;

    let scheduler = Scheduler::new(site)?;
    let shutdown = scheduler.shutdown_handle();

    // Trace published values
    let mut values = publisher.subscribe();
    let trace_task = tokio::spawn(async move {
        let logger = get_logger("publish");
        while let Ok(param) = values.recv().await {
            logger.trace(&format!(
                "{}{} = {}",
                param.loadpoint.map(|lp| format!("{lp}/")).unwrap_or_default(),
                param.key,
                param.value
            ));
        }
    });

    let signal_logger = logger.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            signal_logger.error(&format!("Failed to listen for shutdown signal: {}", e));
        }
        shutdown.shutdown();
    });

    let result = scheduler.run().await;
    trace_task.abort();
    events_task.abort();
    match result {
        Ok(()) => {
            logger.info("Helion shutdown complete");
            Ok(())
        }
        Err(e) => {
            logger.error(&format!("Scheduler failed with error: {}", e));
            Err(anyhow::anyhow!("Scheduler error: {}", e))
        }
    }
}
