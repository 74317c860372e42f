//! Background maintenance: periodic heartbeats and idle-client eviction.

use crate::config::BrokerConfig;
use crate::connection::ConnectionRegistry;
use crate::dispatcher;
use crate::message::Event;
use log::*;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

struct Loops {
    heartbeat: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

/// Owns the heartbeat and idle-sweep tasks. Stopping is synchronous and idempotent.
#[derive(Default)]
pub struct Scheduler {
    loops: Mutex<Option<Loops>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn both loops, replacing any that are already running.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, registry: Arc<ConnectionRegistry>, config: &BrokerConfig) {
        let heartbeat_registry = Arc::clone(&registry);
        let loops = Loops {
            heartbeat: spawn_periodic(config.heartbeat_interval(), move || {
                let registry = Arc::clone(&heartbeat_registry);
                async move {
                    heartbeat_tick(&registry).await;
                }
            }),
            sweep: spawn_periodic(config.sweep_interval(), move || {
                sweep_tick(&registry);
                async {}
            }),
        };

        let previous = self
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(loops);
        if let Some(previous) = previous {
            previous.heartbeat.abort();
            previous.sweep.abort();
        }

        info!(
            "Scheduler started (heartbeat every {:?}, sweep every {:?})",
            config.heartbeat_interval(),
            config.sweep_interval()
        );
    }

    /// Abort both loops. Returns false when nothing was running.
    pub fn stop(&self) -> bool {
        match self
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(loops) => {
                loops.heartbeat.abort();
                loops.sweep.abort();
                info!("Scheduler stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// First tick fires one full period after start, not immediately
fn spawn_periodic<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            tick().await;
        }
    })
}

/// One heartbeat round: dispatch to every client, then mark all of them as pinged.
/// Delivery outcome does not affect `last_ping`; the sweep deals with dead clients.
pub async fn heartbeat_tick(registry: &ConnectionRegistry) -> usize {
    let handles = registry.all_handles();
    if handles.is_empty() {
        return 0;
    }

    let delivered = match dispatcher::send_to_many(&handles, &Event::heartbeat()).await {
        Ok(delivered) => {
            debug!("Heartbeat delivered to {delivered}/{} client(s)", handles.len());
            delivered
        }
        Err(e) => {
            error!("Heartbeat dispatch failed: {e}");
            0
        }
    };

    let now = Instant::now();
    for handle in &handles {
        handle.touch(now);
    }
    delivered
}

/// One sweep round: evict clients idle beyond the configured timeout.
pub fn sweep_tick(registry: &ConnectionRegistry) -> usize {
    let evicted = registry.mark_stale(Instant::now());
    if evicted > 0 {
        info!("Evicted {evicted} stale client(s)");
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ClientHandle;
    use crate::message::HEARTBEAT_EVENT;
    use crate::sink::MemorySink;

    fn setup(heartbeat: Duration, timeout: Duration) -> (Arc<ConnectionRegistry>, BrokerConfig) {
        let config = BrokerConfig::new(heartbeat, timeout, 100);
        (Arc::new(ConnectionRegistry::new(&config)), config)
    }

    fn register(registry: &ConnectionRegistry, sink: Arc<MemorySink>) -> Arc<ClientHandle> {
        let handle = Arc::new(ClientHandle::new(None, None, sink));
        registry.add(Arc::clone(&handle)).unwrap();
        handle
    }

    fn heartbeats(sink: &MemorySink) -> usize {
        sink.frames()
            .iter()
            .filter(|frame| frame.starts_with(&format!("event: {HEARTBEAT_EVENT}\n")))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_loop_pings_clients_each_period() {
        let (registry, config) = setup(Duration::from_secs(1), Duration::from_secs(60));
        let sink = Arc::new(MemorySink::default());
        let handle = register(&registry, sink.clone());
        let scheduler = Scheduler::new();

        scheduler.start(Arc::clone(&registry), &config);
        time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(heartbeats(&sink), 3);
        assert!(handle.last_ping().is_some());
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_tick_touches_clients_even_when_delivery_fails() {
        let (registry, _) = setup(Duration::from_secs(1), Duration::from_secs(60));
        let failing = register(&registry, Arc::new(MemorySink::failing()));
        let healthy = register(&registry, Arc::new(MemorySink::default()));

        let delivered = heartbeat_tick(&registry).await;

        assert_eq!(delivered, 1);
        assert!(failing.last_ping().is_some());
        assert!(healthy.last_ping().is_some());
        assert_eq!(registry.count(), 2);
    }

    #[tokio::test]
    async fn test_heartbeat_tick_skips_empty_registry() {
        let (registry, _) = setup(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(heartbeat_tick(&registry).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_evicts_idle_client_within_one_and_a_half_timeouts() {
        // Heartbeat far beyond the timeout so nothing refreshes last_ping
        let (registry, config) = setup(Duration::from_secs(3600), Duration::from_secs(10));
        let sink = Arc::new(MemorySink::default());
        register(&registry, sink.clone());
        let scheduler = Scheduler::new();

        scheduler.start(Arc::clone(&registry), &config);
        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(registry.count(), 1, "idle for 10s is not past the boundary");

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(registry.count(), 0);
        assert!(sink.is_closed());
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_halts_heartbeats() {
        let (registry, config) = setup(Duration::from_secs(1), Duration::from_secs(60));
        let sink = Arc::new(MemorySink::default());
        register(&registry, sink.clone());
        let scheduler = Scheduler::new();

        assert!(!scheduler.stop(), "stopping before start must not fail");
        scheduler.start(Arc::clone(&registry), &config);
        assert!(scheduler.is_running());
        time::sleep(Duration::from_millis(1500)).await;
        assert!(scheduler.stop());
        assert!(!scheduler.stop());

        let before = heartbeats(&sink);
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(heartbeats(&sink), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_running_loops() {
        let (registry, config) = setup(Duration::from_secs(1), Duration::from_secs(60));
        let sink = Arc::new(MemorySink::default());
        register(&registry, sink.clone());
        let scheduler = Scheduler::new();

        scheduler.start(Arc::clone(&registry), &config);
        scheduler.start(Arc::clone(&registry), &config);
        time::sleep(Duration::from_millis(1500)).await;

        // Only one heartbeat loop may be alive after a restart
        assert_eq!(heartbeats(&sink), 1);
        scheduler.stop();
    }
}
