use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use sysinfo::{ProcessesToUpdate, System};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    connection::{wait_for_shutdown, ConnectionState},
    context::{BotContext, BotEvent, ClearCause},
    error::CoreError,
};

pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Source of the process' resident memory, in bytes.
pub trait MemoryProbe: Send + Sync {
    fn sample_bytes(&self) -> Result<u64>;
}

/// Reads the resident set size of the current process.
pub struct SysinfoProbe {
    system: std::sync::Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: std::sync::Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn sample_bytes(&self) -> Result<u64> {
        let pid = sysinfo::get_current_pid().map_err(|err| anyhow!(err))?;
        let mut system = self
            .system
            .lock()
            .map_err(|_| anyhow!("memory probe lock poisoned"))?;
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = system
            .process(pid)
            .with_context(|| format!("process {pid} not visible to the memory probe"))?;
        Ok(process.memory())
    }
}

/// The three periodic ticks. Each one can also be run on demand.
pub struct MaintenanceTasks {
    ctx: Arc<BotContext>,
    probe: Arc<dyn MemoryProbe>,
}

impl MaintenanceTasks {
    pub fn new(ctx: Arc<BotContext>, probe: Arc<dyn MemoryProbe>) -> Self {
        Self { ctx, probe }
    }

    /// Overwrites every group entry with fresh metadata. Skipped unless connected.
    /// Returns the number of refreshed groups.
    pub async fn refresh_groups(&self) -> Result<usize> {
        if self.ctx.connection_state().await != ConnectionState::Connected {
            debug!("skipping group refresh while disconnected");
            return Ok(0);
        }
        let Some(session) = self.ctx.live_session().await else {
            return Ok(0);
        };
        let groups = session
            .fetch_all_groups()
            .await
            .context("failed to fetch participating groups")?;
        let refreshed = groups.len();
        for metadata in groups {
            self.ctx.caches().set_group(metadata);
        }
        debug!(refreshed, "group cache refreshed");
        Ok(refreshed)
    }

    pub async fn report_stats(&self) -> Result<()> {
        let stats = self.ctx.caches().stats();
        let memory_mb = match self.probe.sample_bytes() {
            Ok(bytes) => Some(bytes.div_ceil(BYTES_PER_MB)),
            Err(err) => {
                debug!(error = %err, "memory sample unavailable");
                None
            }
        };
        info!(
            total_keys = stats.total_keys(),
            messages = stats.messages.keys,
            users = stats.users.keys,
            groups = stats.groups.keys,
            media = stats.media.keys,
            hit_rate = format_args!("{:.1}%", stats.hit_rate() * 100.0),
            memory_mb = ?memory_mb,
            "cache stats"
        );
        self.ctx.emit(BotEvent::StatsReported { stats, memory_mb });
        Ok(())
    }

    /// Purges expired entries, then clears every domain when memory is over the
    /// threshold. Returns true when the emergency clear ran.
    pub async fn check_memory(&self) -> Result<bool> {
        let purged = self.ctx.caches().purge_expired();
        if purged > 0 {
            debug!(purged, "expired cache entries purged");
        }

        let sampled_bytes = self.probe.sample_bytes()?;
        let threshold_mb = self.ctx.config().maintenance.memory_threshold_mb;
        if sampled_bytes <= threshold_mb.saturating_mul(BYTES_PER_MB) {
            return Ok(false);
        }
        // Rounded up so a fractional overshoot never reports as the threshold itself.
        let sampled_mb = sampled_bytes.div_ceil(BYTES_PER_MB);
        warn!(sampled_mb, threshold_mb, "high memory usage");
        self.ctx.emit(BotEvent::MemoryPressure {
            sampled_mb,
            threshold_mb,
        });
        self.ctx.emergency_clear(ClearCause::MemoryPressure);
        Ok(true)
    }
}

/// Owns the periodic maintenance tasks so shutdown can stop them deterministically.
pub struct MaintenanceScheduler {
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MaintenanceScheduler {
    pub fn start(tasks: MaintenanceTasks) -> Self {
        let (shutdown, _) = watch::channel(false);
        let config = tasks.ctx.config().maintenance.clone();
        let tasks = Arc::new(tasks);

        let handles = vec![
            spawn_periodic(
                "group_refresh",
                config.group_refresh_interval,
                shutdown.subscribe(),
                {
                    let tasks = Arc::clone(&tasks);
                    move || {
                        let tasks = Arc::clone(&tasks);
                        async move { tasks.refresh_groups().await.map(|_| ()) }
                    }
                },
            ),
            spawn_periodic("stats_report", config.stats_interval, shutdown.subscribe(), {
                let tasks = Arc::clone(&tasks);
                move || {
                    let tasks = Arc::clone(&tasks);
                    async move { tasks.report_stats().await }
                }
            }),
            spawn_periodic(
                "memory_guard",
                config.memory_check_interval,
                shutdown.subscribe(),
                {
                    let tasks = Arc::clone(&tasks);
                    move || {
                        let tasks = Arc::clone(&tasks);
                        async move { tasks.check_memory().await.map(|_| ()) }
                    }
                },
            ),
        ];
        info!("maintenance scheduler started");

        Self {
            shutdown,
            handles: Mutex::new(handles),
        }
    }

    /// Stops every task and waits for in-flight ticks to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "maintenance task ended abnormally");
            }
        }
        info!("maintenance scheduler stopped");
    }
}

fn spawn_periodic<F, Fut>(
    task: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + period,
            period.max(Duration::from_millis(1)),
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
            if let Err(err) = tick().await {
                let err = CoreError::maintenance(task, err);
                warn!(%err, "maintenance tick failed; retrying next period");
            }
        }
        debug!(task, "maintenance task stopped");
    })
}

#[cfg(test)]
#[path = "tests/maintenance_tests.rs"]
mod tests;
