//! Background maintenance for one engine.
//!
//! Keys are expired lazily on access and actively here. The same cycle also
//! times out local transactions that outlived the configured timeout.

use super::CacheEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, info, trace};

/// Configuration for the expiry manager.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// How often to run the cycle (default: 100ms)
    pub cycle_interval: Duration,
    /// Maximum keys to expire per pass (default: 20)
    pub keys_per_cycle: usize,
    /// Extra passes allowed when a pass hit its limit (default: 10)
    pub max_aggressive_passes: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_millis(100),
            keys_per_cycle: 20,
            max_aggressive_passes: 10,
        }
    }
}

/// Background expiration and transaction reaping.
///
/// Each cycle:
/// 1. Remove up to `keys_per_cycle` expired keys
/// 2. While a pass removes a full batch, run another pass, yielding between them
/// 3. Time out stale transactions
#[derive(Debug)]
pub struct ExpiryManager {
    engine: Arc<CacheEngine>,
    config: ExpiryConfig,
    running: AtomicBool,
    shutdown: Notify,
}

impl ExpiryManager {
    pub fn new(engine: Arc<CacheEngine>) -> Self {
        Self::with_config(engine, ExpiryConfig::default())
    }

    pub fn with_config(engine: Arc<CacheEngine>, config: ExpiryConfig) -> Self {
        Self {
            engine,
            config,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Start the background task.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Signal the task to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run(&self) {
        info!(node = self.engine.node_id(), "Expiry manager started");

        let mut interval = time::interval(self.config.cycle_interval);

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                _ = self.shutdown.notified() => {
                    break;
                }
            }
        }

        info!(node = self.engine.node_id(), "Expiry manager stopped");
    }

    /// Run one cycle. Returns the number of keys expired and transactions reaped.
    pub async fn run_cycle(&self) -> (usize, usize) {
        let batch = self.config.keys_per_cycle;
        let mut expired = self.engine.purge_expired(batch);
        let mut last = expired;
        let mut passes = 0;

        while last == batch && passes < self.config.max_aggressive_passes {
            tokio::task::yield_now().await;
            last = self.engine.purge_expired(batch);
            expired += last;
            passes += 1;
        }
        if passes > 0 {
            debug!(passes, expired, "Aggressive expiry");
        }

        let reaped = self.engine.transactions().reap_timed_out();

        if expired > 0 || reaped > 0 {
            trace!(expired, reaped, "Expiry cycle finished");
        }
        (expired, reaped)
    }
}
