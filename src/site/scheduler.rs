use super::Site;
use crate::error::{HelionError, Result};
use crate::logging::{StructuredLogger, get_logger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval};

/// Stops a running [`Scheduler`]
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Round-robin driver: one loadpoint per tick, out-of-band requests at once
pub struct Scheduler {
    site: Arc<Site>,
    update_rx: mpsc::UnboundedReceiver<usize>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    next: usize,
    logger: StructuredLogger,
}

impl Scheduler {
    pub fn new(mut site: Site) -> Result<Self> {
        let update_rx = site
            .take_update_receiver()
            .ok_or_else(|| HelionError::generic("site is already scheduled"))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            site: Arc::new(site),
            update_rx,
            shutdown_tx,
            shutdown_rx,
            next: 0,
            logger: get_logger("scheduler"),
        })
    }

    /// Shared site, for setters while the scheduler runs
    pub fn site(&self) -> Arc<Site> {
        Arc::clone(&self.site)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    fn next_index(&mut self) -> Option<usize> {
        let count = self.site.loadpoints().len();
        if count == 0 {
            return None;
        }
        let index = self.next % count;
        self.next = (index + 1) % count;
        Some(index)
    }

    /// Run until shut down
    pub async fn run(mut self) -> Result<()> {
        let period = self.site.poll_interval().max(Duration::from_millis(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if self.site.loadpoints().is_empty() {
            self.logger.warn("no loadpoints configured");
        }
        self.logger.info(&format!(
            "scheduler started: {} loadpoint(s), every {}ms",
            self.site.loadpoints().len(),
            period.as_millis()
        ));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(index) = self.next_index() {
                        self.site.update(index).await;
                    }
                }
                Some(index) = self.update_rx.recv() => {
                    self.logger.debug(&format!("out-of-band update: loadpoint {index}"));
                    self.site.update(index).await;
                    ticker.reset();
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        self.logger.info("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        self.logger.info("scheduler stopped");
        Ok(())
    }
}
