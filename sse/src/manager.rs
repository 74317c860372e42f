use crate::config::BrokerConfig;
use crate::connection::{ClientHandle, ClientId, ConnectionRegistry, SessionId, UserId};
use crate::dispatcher;
use crate::error::{Error, ErrorKind};
use crate::message::{Event, Filter, Message};
use crate::metrics::MetricsSnapshot;
use crate::scheduler::Scheduler;
use crate::sink::{ChannelSink, ClientStream};
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Composes the registry, dispatcher and scheduler behind the broker's public operations.
///
/// One instance is constructed by the hosting process and shared via `Arc`.
/// Construction starts the background loops, so it must happen inside a Tokio runtime.
pub struct Manager {
    config: BrokerConfig,
    registry: Arc<ConnectionRegistry>,
    scheduler: Scheduler,
    shut_down: AtomicBool,
}

impl Manager {
    pub fn new(config: BrokerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(&config));
        let scheduler = Scheduler::new();
        scheduler.start(Arc::clone(&registry), &config);

        info!(
            "Push broker started (max clients {}, client timeout {:?})",
            config.max_clients(),
            config.client_timeout()
        );

        Self {
            config,
            registry,
            scheduler,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    fn ensure_running(&self) -> Result<(), Error> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::ShutDown));
        }
        Ok(())
    }

    /// Register a new client and return its handle plus the stream the transport pumps.
    ///
    /// The client receives a `connection` event before this returns. On capacity
    /// rejection nothing stays registered and the stream is dropped closed.
    pub async fn create_client(
        &self,
        user_id: Option<UserId>,
        session_id: Option<SessionId>,
    ) -> Result<(Arc<ClientHandle>, ClientStream), Error> {
        self.ensure_running()?;

        let (sink, stream) = ChannelSink::pair();
        let handle = Arc::new(ClientHandle::new(user_id, session_id, Arc::new(sink)));

        // Queued before the handle is visible, so no other event can precede it
        if !dispatcher::send_to(&handle, &Event::connection_ack(handle.id())).await {
            warn!("Connection acknowledgement to client {} failed", handle.id());
        }

        self.registry.add(Arc::clone(&handle))?;
        info!(
            "Registered client {} (user: {:?}, session: {:?})",
            handle.id(),
            handle.user_id(),
            handle.session_id()
        );

        Ok((handle, stream))
    }

    /// Deregister a client. Returns false if it was already gone.
    pub fn remove_client(&self, client_id: &ClientId) -> bool {
        let removed = self.registry.remove(client_id);
        if removed {
            info!("Unregistered client {client_id}");
        }
        removed
    }

    /// Record transport-level activity for a client.
    pub fn touch_client(&self, client_id: &ClientId) -> bool {
        match self.registry.get(client_id) {
            Some(handle) => {
                handle.touch(Instant::now());
                true
            }
            None => false,
        }
    }

    pub fn get_client(&self, client_id: &ClientId) -> Option<Arc<ClientHandle>> {
        self.registry.get(client_id)
    }

    /// Deliver an event to every client matching `filter` and return how many received it.
    ///
    /// Per-client write failures only lower the count. An `Err` is returned when
    /// the broker is shut down, the event cannot be framed (`Serialization`) or
    /// the fan-out itself failed (`DeliveryFailed`).
    pub async fn send_event(&self, event: &Event, filter: &Filter) -> Result<usize, Error> {
        self.ensure_running()?;
        dispatcher::check_framing(event)?;

        let targets = self.registry.select_by_filter(filter);
        if targets.is_empty() {
            debug!(
                "No clients matched {filter:?} for event {}",
                event.event_type()
            );
            return Ok(0);
        }

        match dispatcher::send_to_many(&targets, event).await {
            Ok(delivered) => {
                self.registry.bump_dispatched();
                self.registry
                    .metrics()
                    .add_failed_deliveries((targets.len() - delivered) as u64);
                debug!(
                    "Sent event {} to {delivered}/{} client(s)",
                    event.event_type(),
                    targets.len()
                );
                Ok(delivered)
            }
            Err(e) => {
                self.registry.bump_errors();
                error!("Failed to dispatch event {}: {e}", event.event_type());
                Err(e)
            }
        }
    }

    /// Send a message based on its filter
    pub async fn send_message(&self, message: &Message) -> Result<usize, Error> {
        self.send_event(&message.event, &message.filter).await
    }

    pub async fn broadcast(&self, event: &Event) -> Result<usize, Error> {
        self.send_event(event, &Filter::Broadcast).await
    }

    pub async fn send_to_user(&self, user_id: &str, event: &Event) -> Result<usize, Error> {
        let filter = Filter::User {
            user_id: user_id.to_string(),
        };
        self.send_event(event, &filter).await
    }

    pub async fn send_to_session(&self, session_id: &str, event: &Event) -> Result<usize, Error> {
        let filter = Filter::Session {
            session_id: session_id.to_string(),
        };
        self.send_event(event, &filter).await
    }

    pub async fn send_to_clients(
        &self,
        client_ids: &[ClientId],
        event: &Event,
    ) -> Result<usize, Error> {
        let filter = Filter::Clients {
            client_ids: client_ids.to_vec(),
        };
        self.send_event(event, &filter).await
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.registry.metrics_snapshot()
    }

    pub fn get_active_client_count(&self) -> usize {
        self.registry.count()
    }

    /// Stop both loops and disconnect every client. Further sends and connects fail.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            debug!("Push broker already shut down");
            return;
        }
        self.scheduler.stop();
        let closed = self.registry.close();
        info!("Push broker shut down, closed {closed} client(s)");
    }

    /// Disconnect every client, zero the counters and restart both loops.
    /// Also brings a shut-down broker back into service.
    pub fn reset(&self) {
        self.scheduler.stop();
        let closed = self.registry.reset();
        self.scheduler.start(Arc::clone(&self.registry), &self.config);
        self.shut_down.store(false, Ordering::Release);
        info!("Push broker reset, closed {closed} client(s)");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CONNECTION_EVENT, HEARTBEAT_EVENT};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time;

    fn manager(max_clients: usize) -> Manager {
        Manager::new(BrokerConfig::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            max_clients,
        ))
    }

    async fn next_frame(stream: &mut ClientStream) -> String {
        String::from_utf8(stream.recv().await.expect("stream closed")).unwrap()
    }

    #[tokio::test]
    async fn test_create_client_sends_connection_ack() {
        let manager = manager(10);
        let (handle, mut stream) = manager
            .create_client(Some("u1".to_string()), Some("s1".to_string()))
            .await
            .unwrap();

        let frame = next_frame(&mut stream).await;
        assert!(frame.starts_with(&format!("event: {CONNECTION_EVENT}\nid: connection-")));
        assert!(frame.contains(handle.id().as_str()));
        assert_eq!(manager.get_active_client_count(), 1);
        assert_eq!(manager.get_metrics().total_connections, 1);
    }

    #[tokio::test]
    async fn test_create_client_propagates_capacity_exceeded() {
        let manager = manager(1);
        let _first = manager.create_client(None, None).await.unwrap();

        let err = manager
            .create_client(Some("u2".to_string()), None)
            .await
            .unwrap_err();

        assert_eq!(err.error_kind, ErrorKind::CapacityExceeded { max_clients: 1 });
        assert_eq!(manager.get_active_client_count(), 1);
        assert_eq!(
            manager
                .send_to_user("u2", &Event::new("probe", json!(null)))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_user_and_broadcast_fan_out() {
        let manager = manager(10);
        let (_a, mut a_stream) = manager
            .create_client(Some("u1".to_string()), None)
            .await
            .unwrap();
        let (_b, mut b_stream) = manager
            .create_client(Some("u1".to_string()), None)
            .await
            .unwrap();
        let (_c, mut c_stream) = manager
            .create_client(Some("u2".to_string()), None)
            .await
            .unwrap();
        for stream in [&mut a_stream, &mut b_stream, &mut c_stream] {
            next_frame(stream).await;
        }

        let event = Event::new("notification", json!({ "message": "hi" })).with_id("abc");
        assert_eq!(manager.send_to_user("u1", &event).await.unwrap(), 2);

        let expected = "event: notification\nid: abc\ndata: {\"message\":\"hi\"}\n\n";
        assert_eq!(next_frame(&mut a_stream).await, expected);
        assert_eq!(next_frame(&mut b_stream).await, expected);

        assert_eq!(manager.broadcast(&event).await.unwrap(), 3);
        assert_eq!(next_frame(&mut c_stream).await, expected);
        assert_eq!(manager.get_metrics().events_dispatched, 2);
    }

    #[tokio::test]
    async fn test_session_and_explicit_client_filters() {
        let manager = manager(10);
        let (a, _a_stream) = manager
            .create_client(None, Some("s1".to_string()))
            .await
            .unwrap();
        let (b, _b_stream) = manager
            .create_client(None, Some("s2".to_string()))
            .await
            .unwrap();
        let event = Event::new("sync", json!("payload"));

        assert_eq!(manager.send_to_session("s1", &event).await.unwrap(), 1);
        assert_eq!(
            manager
                .send_to_clients(&[a.id().clone(), b.id().clone(), ClientId::new()], &event)
                .await
                .unwrap(),
            2
        );
        let message = Message {
            event: event.clone(),
            filter: Filter::Session {
                session_id: "s2".to_string(),
            },
        };
        assert_eq!(manager.send_message(&message).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_matching_clients_is_zero_not_error() {
        let manager = manager(10);
        let delivered = manager
            .send_to_user("nobody", &Event::new("x", json!(1)))
            .await
            .unwrap();
        assert_eq!(delivered, 0);
        let metrics = manager.get_metrics();
        assert_eq!(metrics.events_dispatched, 0);
        assert_eq!(metrics.errors, 0);
    }

    #[tokio::test]
    async fn test_dropped_stream_counts_as_failed_delivery_not_eviction() {
        let manager = manager(10);
        let (dropped, dropped_stream) = manager.create_client(None, None).await.unwrap();
        let (_kept, _kept_stream) = manager.create_client(None, None).await.unwrap();
        drop(dropped_stream);

        let delivered = manager
            .broadcast(&Event::new("news", json!("x")))
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(manager.get_client(dropped.id()).is_some());
        assert_eq!(manager.get_metrics().failed_deliveries, 1);
    }

    #[tokio::test]
    async fn test_remove_client_closes_stream_and_is_idempotent() {
        let manager = manager(10);
        let (handle, mut stream) = manager.create_client(None, None).await.unwrap();
        next_frame(&mut stream).await;

        assert!(manager.remove_client(handle.id()));
        assert!(stream.recv().await.is_none());
        assert!(!manager.remove_client(handle.id()));
        assert_eq!(manager.get_metrics().total_connections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_clients_and_stops_heartbeats() {
        let manager = manager(10);
        let (_handle, mut stream) = manager.create_client(None, None).await.unwrap();
        next_frame(&mut stream).await;

        time::sleep(Duration::from_millis(1500)).await;
        assert!(next_frame(&mut stream).await.starts_with(&format!("event: {HEARTBEAT_EVENT}")));

        manager.shutdown();
        manager.shutdown();

        assert_eq!(manager.get_active_client_count(), 0);
        time::sleep(Duration::from_secs(5)).await;
        // The sink was closed by shutdown and no heartbeat followed
        assert!(stream.recv().await.is_none());

        let err = manager
            .broadcast(&Event::new("late", json!(null)))
            .await
            .unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::ShutDown);
        assert!(manager.create_client(None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_landing_after_registry_close_is_rejected() {
        let manager = manager(10);
        // Shutdown drained the registry after this connect passed its running check
        manager.registry.close();

        let err = manager.create_client(None, None).await.unwrap_err();

        assert_eq!(err.error_kind, ErrorKind::ShutDown);
        assert_eq!(manager.get_active_client_count(), 0);
        assert_eq!(manager.get_metrics().total_connections, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_connection_ack_precedes_concurrent_broadcasts() {
        let manager = Arc::new(manager(100));
        let broadcaster = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                loop {
                    let _ = manager.broadcast(&Event::new("news", json!("x"))).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..50 {
            let (_handle, mut stream) = manager.create_client(None, None).await.unwrap();
            assert!(next_frame(&mut stream)
                .await
                .starts_with(&format!("event: {CONNECTION_EVENT}\n")));
        }
        broadcaster.abort();
    }

    #[tokio::test]
    async fn test_unframeable_event_is_rejected_before_fan_out() {
        let manager = manager(10);
        let (_handle, mut stream) = manager.create_client(None, None).await.unwrap();
        next_frame(&mut stream).await;

        let err = manager
            .broadcast(&Event::new("x\ndata: forged", json!("real")))
            .await
            .unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Serialization);
        let err = manager
            .send_to_user("nobody", &Event::new("x", json!(1)).with_id("1\n"))
            .await
            .unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Serialization);

        let metrics = manager.get_metrics();
        assert_eq!(metrics.events_dispatched, 0);
        assert_eq!(metrics.errors, 0);

        manager
            .broadcast(&Event::new("ok", json!(1)))
            .await
            .unwrap();
        assert_eq!(next_frame(&mut stream).await, "event: ok\ndata: 1\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_zeroes_metrics_and_restarts_loops() {
        let manager = manager(10);
        let (_old, _old_stream) = manager.create_client(None, None).await.unwrap();
        manager
            .broadcast(&Event::new("x", json!(1)))
            .await
            .unwrap();
        manager.shutdown();

        manager.reset();

        assert!(!manager.is_shut_down());
        assert_eq!(manager.get_metrics(), MetricsSnapshot::default());

        let (_new, mut stream) = manager.create_client(None, None).await.unwrap();
        next_frame(&mut stream).await;
        time::sleep(Duration::from_millis(1500)).await;
        assert!(next_frame(&mut stream).await.starts_with(&format!("event: {HEARTBEAT_EVENT}")));
        assert_eq!(manager.get_metrics().total_connections, 1);
    }

    #[tokio::test]
    async fn test_touch_client_updates_last_ping() {
        let manager = manager(10);
        let (handle, _stream) = manager.create_client(None, None).await.unwrap();
        assert!(handle.last_ping().is_none());

        assert!(manager.touch_client(handle.id()));
        assert!(handle.last_ping().is_some());
        assert!(!manager.touch_client(&ClientId::new()));
    }
}
