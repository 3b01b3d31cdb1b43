//! Scheduler module: periodic probe fan-out over all registered targets.

mod host_locks;

pub use host_locks::HostLocks;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::canon;
use crate::config::Config;
use crate::db::{Storage, MAX_PAGE_SIZE};
use crate::probe;

/// The scheduler that drives periodic probing.
///
/// Owns the shared HTTP client, the host lock registry, and the root
/// cancellation token; all three live for the process and are torn down by
/// [`Scheduler::stop`].
pub struct Scheduler {
    store: Arc<dyn Storage>,
    client: Client,
    host_locks: Arc<HostLocks>,
    interval: Duration,
    max_concurrency: usize,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Storage>, cfg: &Config) -> reqwest::Result<Self> {
        Ok(Self {
            store,
            client: probe::build_client(cfg.http_timeout)?,
            host_locks: Arc::new(HostLocks::new()),
            interval: cfg.check_interval,
            max_concurrency: cfg.max_concurrency,
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
        })
    }

    /// Launch the periodic driver. The first tick fires one interval from now.
    pub fn start(&self) {
        let store = self.store.clone();
        let client = self.client.clone();
        let host_locks = self.host_locks.clone();
        let cancel = self.cancel.clone();
        let max_concurrency = self.max_concurrency;
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            // A slow tick delays later ticks; they never overlap because the
            // pool drain is awaited before the next tick is polled.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        run_tick(&store, &client, &host_locks, &cancel, max_concurrency).await;
                    }
                }
            }
        });
        *self.driver.lock().unwrap() = Some(handle);
    }

    /// Request shutdown and wait for in-flight probes to finish or observe
    /// cancellation. Targets still queued for admission are dropped.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.driver.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler driver task failed: {}", e);
            }
        }
    }
}

/// Probe every registered target once.
///
/// At most `max_concurrency` probes are in flight at a time, and probes that
/// share a canonical host are serialized on the host lock. Each target's
/// outcome is written through storage; per-target failures never fail the
/// tick.
async fn run_tick(
    store: &Arc<dyn Storage>,
    client: &Client,
    host_locks: &Arc<HostLocks>,
    cancel: &CancellationToken,
    max_concurrency: usize,
) {
    let targets = match store.list_targets("", MAX_PAGE_SIZE, None) {
        Ok((targets, _)) => targets,
        Err(e) => {
            tracing::error!("Skipping tick, failed to list targets: {}", e);
            return;
        }
    };
    if targets.is_empty() {
        return;
    }
    tracing::debug!("Tick: probing {} targets", targets.len());

    let admission = Arc::new(Semaphore::new(max_concurrency));
    let mut pool = JoinSet::new();
    for target in targets {
        let admission = admission.clone();
        let store = store.clone();
        let client = client.clone();
        let host_locks = host_locks.clone();
        let cancel = cancel.clone();

        pool.spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return,
                permit = admission.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            let _host_lock = tokio::select! {
                _ = cancel.cancelled() => return,
                guard = host_locks.acquire(canon::host_of(&target.url)) => guard,
            };

            let result = probe::execute(&client, &target, &cancel).await;
            if let Err(e) = store.save_check_result(&result) {
                tracing::error!("Failed to save result for {}: {}", target.url, e);
            }
        });
    }

    while let Some(joined) = pool.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Probe worker panicked: {}", e);
        }
    }
}
