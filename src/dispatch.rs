//! Asynchronous delivery of snapshots to sinks.
//!
//! Every sink attached to a channel gets one background consumer thread and
//! one bounded FIFO queue. The producer side (`take_snapshot`) posts
//! messages with `try_send` and never blocks waiting for a sink: when a
//! queue is full the newest snapshot is dropped and counted. The consumer
//! announces each schema hash with [`DataSink::add_channel`] before the
//! first payload carrying that hash, then feeds snapshots to
//! [`DataSink::push_snapshot`] in FIFO order.
//!
//! # Shutdown
//!
//! Dropping a [`SinkWorker`] disconnects its queue; the worker thread
//! drains whatever was already buffered, finishes the in-flight
//! `push_snapshot`, and exits. The drop then joins the thread, so sinks
//! never outlive their channel's workers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::schema::Schema;
use crate::types::Snapshot;

/// Capacity of each per-(channel, sink) snapshot queue.
pub const SINK_QUEUE_CAPACITY: usize = 64;

/// A downstream consumer of schemas and snapshots.
///
/// Sinks are shared as `Arc<dyn DataSink>` and may be attached to several
/// channels at once; both methods are called from worker threads.
pub trait DataSink: Send + Sync {
    /// Announces a schema before the first snapshot carrying its hash.
    ///
    /// Called at most once per (worker, schema hash); a sink attached to
    /// several channels may see the same hash announced once per channel
    /// and must treat equal hashes idempotently.
    fn add_channel(&self, schema: &Schema);

    /// Processes one snapshot. The return value is advisory: `false` is
    /// counted by the owning channel and otherwise swallowed, it never
    /// propagates to producers.
    fn push_snapshot(&self, snapshot: &Snapshot) -> bool;
}

/// One queued delivery: the snapshot plus the schema it conforms to.
pub(crate) struct SinkMessage {
    pub(crate) schema: Arc<Schema>,
    pub(crate) snapshot: Arc<Snapshot>,
}

/// Background consumer for one (channel, sink) pair.
pub(crate) struct SinkWorker {
    tx: Option<Sender<SinkMessage>>,
    handle: Option<JoinHandle<()>>,
}

impl SinkWorker {
    /// Spawns the consumer thread for `sink`.
    pub(crate) fn spawn(
        channel_name: &str,
        sink: Arc<dyn DataSink>,
        rejections: Arc<AtomicU64>,
    ) -> SinkWorker {
        let (tx, rx) = bounded(SINK_QUEUE_CAPACITY);
        let name = channel_name.to_string();
        let handle = std::thread::spawn(move || worker_loop(&name, sink, rx, rejections));
        SinkWorker {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    /// Posts a message without blocking. Returns `false` when the queue is
    /// full or the worker is shutting down.
    pub(crate) fn enqueue(&self, message: SinkMessage) -> bool {
        match &self.tx {
            Some(tx) => tx.try_send(message).is_ok(),
            None => false,
        }
    }
}

impl Drop for SinkWorker {
    fn drop(&mut self) {
        // Disconnect first so the worker drains buffered messages and exits.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("sink worker thread panicked");
            }
        }
    }
}

fn worker_loop(
    channel_name: &str,
    sink: Arc<dyn DataSink>,
    rx: Receiver<SinkMessage>,
    rejections: Arc<AtomicU64>,
) {
    tracing::debug!(channel = channel_name, "sink worker started");
    let mut seen_hashes = HashSet::new();
    while let Ok(message) = rx.recv() {
        if seen_hashes.insert(message.snapshot.schema_hash) {
            sink.add_channel(&message.schema);
        }
        if !sink.push_snapshot(&message.snapshot) {
            rejections.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                channel = channel_name,
                schema_hash = message.snapshot.schema_hash,
                "sink rejected snapshot"
            );
        }
    }
    tracing::debug!(channel = channel_name, "sink worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn message(hash: u64, timestamp_ns: i64) -> SinkMessage {
        SinkMessage {
            schema: Arc::new(Schema {
                channel_name: "test".to_string(),
                fields: Vec::new(),
                hash,
            }),
            snapshot: Arc::new(Snapshot {
                schema_hash: hash,
                timestamp_ns,
                active_mask: Vec::new(),
                payload: Vec::new(),
            }),
        }
    }

    #[derive(Debug, PartialEq)]
    enum Event {
        Schema(u64),
        Snapshot(i64),
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl DataSink for RecordingSink {
        fn add_channel(&self, schema: &Schema) {
            self.events.lock().unwrap().push(Event::Schema(schema.hash));
        }

        fn push_snapshot(&self, snapshot: &Snapshot) -> bool {
            self.events
                .lock()
                .unwrap()
                .push(Event::Snapshot(snapshot.timestamp_ns));
            true
        }
    }

    #[test]
    fn test_fifo_order_and_single_announcement() {
        let sink = Arc::new(RecordingSink::default());
        let worker = SinkWorker::spawn("chan", sink.clone(), Arc::new(AtomicU64::new(0)));

        for i in 0..10 {
            assert!(worker.enqueue(message(7, i)));
        }
        drop(worker); // drains and joins

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 11);
        assert_eq!(events[0], Event::Schema(7));
        for (i, event) in events[1..].iter().enumerate() {
            assert_eq!(*event, Event::Snapshot(i as i64));
        }
    }

    struct GatedSink {
        gate: Receiver<()>,
        pushed: AtomicU64,
    }

    impl DataSink for GatedSink {
        fn add_channel(&self, _schema: &Schema) {}

        fn push_snapshot(&self, _snapshot: &Snapshot) -> bool {
            // Blocks until the test opens the gate (or drops the sender).
            let _ = self.gate.recv();
            self.pushed.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn test_full_queue_rejects_enqueue() {
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let sink = Arc::new(GatedSink {
            gate: gate_rx,
            pushed: AtomicU64::new(0),
        });
        let worker = SinkWorker::spawn("chan", sink.clone(), Arc::new(AtomicU64::new(0)));

        let mut accepted = 0usize;
        while worker.enqueue(message(1, accepted as i64)) {
            accepted += 1;
            assert!(accepted < 200, "queue never reported full");
        }
        // The queue holds SINK_QUEUE_CAPACITY messages; the worker may have
        // pulled one more before blocking on the gate.
        assert!(accepted >= SINK_QUEUE_CAPACITY);
        assert!(accepted <= SINK_QUEUE_CAPACITY + 1);

        drop(gate_tx); // unblock the sink
        drop(worker); // drain and join

        assert_eq!(sink.pushed.load(Ordering::SeqCst), accepted as u64);
    }

    #[test]
    fn test_rejections_are_counted() {
        struct RefusingSink;

        impl DataSink for RefusingSink {
            fn add_channel(&self, _schema: &Schema) {}

            fn push_snapshot(&self, _snapshot: &Snapshot) -> bool {
                false
            }
        }

        let rejections = Arc::new(AtomicU64::new(0));
        let worker = SinkWorker::spawn("chan", Arc::new(RefusingSink), rejections.clone());
        for i in 0..5 {
            assert!(worker.enqueue(message(3, i)));
        }
        drop(worker);

        assert_eq!(rejections.load(Ordering::SeqCst), 5);
    }
}
