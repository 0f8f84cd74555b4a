use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;

use dispatch_engine::{
    EngineBuilder, EnvelopeStreamer, HostState, MessageEnvelope, QueueWriterRegistry, SystemEvent,
    SystemObserver,
};

// --- Test Messages ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct OrderPlaced {
    order_id: u64,
    sku: String,
}

/// Observer that records every event it sees, for asserting on the event stream.
struct EventLog {
    events: Arc<Mutex<Vec<SystemEvent>>>,
}

impl SystemObserver for EventLog {
    fn on_event(
        &self,
        event: &SystemEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// End-to-end: one in-memory transport, one declared message type. An envelope
/// sent through the memory endpoint reaches the handler; resending with the same
/// id is deduplicated; stopping the host completes within the grace period.
#[tokio::test]
async fn memory_host_delivers_deduplicates_and_stops() {
    let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel::<OrderPlaced>();
    let events = Arc::new(Mutex::new(Vec::new()));

    let mut builder = EngineBuilder::new();
    builder.domain(move |directory| {
        directory.handle::<OrderPlaced, _>("OrderPlaced", move |order| {
            delivered_tx
                .send(order)
                .map_err(|_| dispatch_engine::DispatchError::Handler("receiver dropped".into()))
        });
    });
    builder.memory(|memory| {
        memory.add_memory_process("orders");
    });
    builder.advanced().register_observer(Box::new(EventLog {
        events: Arc::clone(&events),
    }));

    let mut host = builder.build().unwrap();
    assert_eq!(host.state(), HostState::Initialized);
    host.start().unwrap();
    assert_eq!(host.state(), HostState::Running);

    let scope = host.scope().unwrap().clone();
    let writers = scope.resolve::<QueueWriterRegistry>().unwrap();
    let streamer = scope.resolve::<EnvelopeStreamer>().unwrap();
    let writer = writers.get("memory").unwrap().create_writer("orders").unwrap();

    // First delivery.
    let order = OrderPlaced {
        order_id: 42,
        sku: "widget".to_string(),
    };
    let envelope = MessageEnvelope::new(order.clone()).with_id("order-42");
    writer.put(streamer.save(&envelope).unwrap()).await.unwrap();

    let received = timeout(Duration::from_secs(2), delivered_rx.recv())
        .await
        .expect("envelope was not dispatched in time")
        .unwrap();
    assert_eq!(received, order);

    // Resend with the same identity: deduplicated, handler not invoked again.
    let resend = MessageEnvelope::new(order.clone()).with_id("order-42");
    writer.put(streamer.save(&resend).unwrap()).await.unwrap();

    // A fresh identity still flows, which also proves the duplicate was skipped
    // rather than stuck.
    let fresh = OrderPlaced {
        order_id: 43,
        sku: "gadget".to_string(),
    };
    let fresh_envelope = MessageEnvelope::new(fresh.clone()).with_id("order-43");
    writer
        .put(streamer.save(&fresh_envelope).unwrap())
        .await
        .unwrap();

    let second = timeout(Duration::from_secs(2), delivered_rx.recv())
        .await
        .expect("second envelope was not dispatched in time")
        .unwrap();
    assert_eq!(second, fresh);
    assert!(delivered_rx.try_recv().is_err(), "duplicate was dispatched");

    // Stop must complete within the grace period.
    let grace = Duration::from_secs(2);
    let started = std::time::Instant::now();
    host.stop(grace).await.unwrap();
    assert!(started.elapsed() < grace + Duration::from_millis(500));
    assert_eq!(host.state(), HostState::Stopped);
    assert!(host.scope().is_none());
    assert!(host.is_healthy());

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, SystemEvent::EnvelopeDuplicateSkipped { message_id } if message_id == "order-42")));
    assert!(events
        .iter()
        .any(|e| matches!(e, SystemEvent::EnvelopeDispatched { message_id, .. } if message_id == "order-43")));
    assert!(events.iter().any(|e| matches!(e, SystemEvent::EngineStopped { .. })));
}

/// A malformed envelope and an unrouted message type are reported through the
/// observer stream; the dispatch process keeps running either way.
#[tokio::test]
async fn bad_envelopes_are_reported_not_fatal() {
    let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel::<OrderPlaced>();
    let events = Arc::new(Mutex::new(Vec::new()));

    let mut builder = EngineBuilder::new();
    builder.domain(move |directory| {
        directory.handle::<OrderPlaced, _>("OrderPlaced", move |order| {
            delivered_tx
                .send(order)
                .map_err(|_| dispatch_engine::DispatchError::Handler("receiver dropped".into()))
        });
    });
    builder.memory(|memory| {
        memory.add_memory_process("orders");
    });
    builder.advanced().register_observer(Box::new(EventLog {
        events: Arc::clone(&events),
    }));

    let mut host = builder.build().unwrap();
    host.start().unwrap();

    let scope = host.scope().unwrap().clone();
    let writers = scope.resolve::<QueueWriterRegistry>().unwrap();
    let streamer = scope.resolve::<EnvelopeStreamer>().unwrap();
    let writer = writers.get("memory").unwrap().create_writer("orders").unwrap();

    // Garbage bytes first.
    writer.put(b"definitely not an envelope".to_vec()).await.unwrap();

    // Then a valid envelope, proving the process survived.
    let order = OrderPlaced {
        order_id: 1,
        sku: "widget".to_string(),
    };
    writer
        .put(streamer.save(&MessageEnvelope::new(order.clone())).unwrap())
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(2), delivered_rx.recv())
        .await
        .expect("valid envelope was not dispatched after a bad one")
        .unwrap();
    assert_eq!(received, order);

    host.stop(Duration::from_secs(2)).await.unwrap();

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, SystemEvent::EnvelopeDeserializationFailed { .. })));
    assert!(host.is_healthy());
}

/// End-to-end over the file transport: envelopes written as files are picked up
/// by the polling dispatcher.
#[tokio::test]
async fn file_host_delivers_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel::<OrderPlaced>();

    let mut builder = EngineBuilder::new();
    builder.domain(move |directory| {
        directory.handle::<OrderPlaced, _>("OrderPlaced", move |order| {
            delivered_tx
                .send(order)
                .map_err(|_| dispatch_engine::DispatchError::Handler("receiver dropped".into()))
        });
    });
    builder.file(|file| {
        file.folder(&root);
        file.add_file_process("orders");
    });

    let mut host = builder.build().unwrap();
    host.start().unwrap();

    let scope = host.scope().unwrap().clone();
    let writers = scope.resolve::<QueueWriterRegistry>().unwrap();
    let streamer = scope.resolve::<EnvelopeStreamer>().unwrap();
    let writer = writers.get("file").unwrap().create_writer("orders").unwrap();

    let order = OrderPlaced {
        order_id: 7,
        sku: "disk".to_string(),
    };
    writer
        .put(streamer.save(&MessageEnvelope::new(order.clone())).unwrap())
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(3), delivered_rx.recv())
        .await
        .expect("file envelope was not dispatched in time")
        .unwrap();
    assert_eq!(received, order);

    host.stop(Duration::from_secs(2)).await.unwrap();
    assert_eq!(host.state(), HostState::Stopped);
}
