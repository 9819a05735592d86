//! Channels: named collections of observed variables.
//!
//! A [`Channel`] owns the ordered field list that defines its schema, the
//! per-field enable bits, and the `take_snapshot` operation that serialises
//! the enabled subset into a [`Snapshot`] and hands it to every attached
//! sink.
//!
//! # Locking
//!
//! One mutex guards the field list, enable bits and freeze flag.
//! Registration, enable/disable and snapshot capture all take it, so the
//! serialised bytes are always coherent with the active mask at one
//! instant. Live values are read only inside `take_snapshot` while this
//! lock is held. Sink queues live outside the lock; the producer never
//! waits for a sink to drain.
//!
//! # Schema freezing
//!
//! The field list is extendable only until the first snapshot. From then
//! on the schema (and its hash) is immutable: registering a brand-new name
//! fails with [`ChannelError::SchemaLocked`], while re-registering an
//! existing name with a matching signature just swaps the observed pointer
//! and re-enables the field.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::clock::MonotonicClock;
use crate::dispatch::{DataSink, SinkMessage, SinkWorker};
use crate::error::{ChannelError, Result};
use crate::schema::{add_field_to_hash, Field, Schema};
use crate::types::{RegistrationID, Snapshot};
use crate::value::{CustomSerializer, Observable, ValueRef};

/// One registered field: the live-value handle plus its enable bit.
struct FieldSlot {
    value: ValueRef,
    enabled: bool,
}

/// State guarded by the channel mutex.
struct ChannelInner {
    schema: Schema,
    slots: Vec<FieldSlot>,
    name_to_index: HashMap<String, usize>,
    frozen: bool,
    /// Immutable copy shared with sink workers, created when the schema
    /// freezes.
    shared_schema: Option<Arc<Schema>>,
}

/// A named, ordered collection of observed live values.
///
/// Channels are created through a
/// [`ChannelsRegistry`](crate::registry::ChannelsRegistry) and shared as
/// `Arc<Channel>`. All methods take `&self`; the channel is safe to use
/// from several producer threads.
pub struct Channel {
    name: String,
    inner: Mutex<ChannelInner>,
    workers: Mutex<Vec<SinkWorker>>,
    clock: Arc<dyn MonotonicClock>,
    dropped_snapshots: AtomicU64,
    sink_rejections: Arc<AtomicU64>,
}

impl Channel {
    pub(crate) fn new(name: String, clock: Arc<dyn MonotonicClock>) -> Arc<Channel> {
        Arc::new(Channel {
            inner: Mutex::new(ChannelInner {
                schema: Schema {
                    channel_name: name.clone(),
                    fields: Vec::new(),
                    hash: 0,
                },
                slots: Vec::new(),
                name_to_index: HashMap::new(),
                frozen: false,
                shared_schema: None,
            }),
            name,
            workers: Mutex::new(Vec::new()),
            clock,
            dropped_snapshots: AtomicU64::new(0),
            sink_rejections: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The channel's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a live value under `name` and returns its handle.
    ///
    /// If `name` is already registered with the same signature (type,
    /// scalar/array/vector shape), the stored pointer is replaced and the
    /// field re-enabled; this is valid even after the schema froze. A
    /// signature mismatch fails with [`ChannelError::TypeMismatch`], and a
    /// new name after the first snapshot fails with
    /// [`ChannelError::SchemaLocked`].
    ///
    /// # Safety
    ///
    /// `value` must outlive this channel and must not be mutated while a
    /// snapshot is being taken. The channel dereferences the address only
    /// inside [`take_snapshot`](Channel::take_snapshot), under the channel
    /// lock, and only while the field is enabled.
    pub unsafe fn register_value<T: Observable>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<RegistrationID> {
        self.register_ref(name, T::value_ref(value))
    }

    /// Registers a value of a user-defined type, serialised through `info`.
    ///
    /// A mismatch on the custom type's name counts as a type mismatch.
    ///
    /// # Safety
    ///
    /// Same contract as [`register_value`](Channel::register_value).
    pub unsafe fn register_custom_value<T, S>(
        &self,
        name: &str,
        value: &T,
        info: Arc<S>,
    ) -> Result<RegistrationID>
    where
        T: 'static,
        S: CustomSerializer<T> + 'static,
    {
        self.register_ref(name, ValueRef::custom(value, info))
    }

    /// Registers a fixed array of custom-typed values.
    ///
    /// # Safety
    ///
    /// Same contract as [`register_value`](Channel::register_value).
    pub unsafe fn register_custom_array<T, S, const N: usize>(
        &self,
        name: &str,
        value: &[T; N],
        info: Arc<S>,
    ) -> Result<RegistrationID>
    where
        T: 'static,
        S: CustomSerializer<T> + 'static,
    {
        self.register_ref(name, ValueRef::custom_array(value, info))
    }

    /// Registers a dynamic vector of custom-typed values.
    ///
    /// # Safety
    ///
    /// Same contract as [`register_value`](Channel::register_value).
    #[allow(clippy::ptr_arg)] // the Vec itself is observed, its length is read live
    pub unsafe fn register_custom_vec<T, S>(
        &self,
        name: &str,
        value: &Vec<T>,
        info: Arc<S>,
    ) -> Result<RegistrationID>
    where
        T: 'static,
        S: CustomSerializer<T> + 'static,
    {
        self.register_ref(name, ValueRef::custom_vec(value, info))
    }

    fn register_ref(&self, name: &str, vref: ValueRef) -> Result<RegistrationID> {
        let mut inner = self.lock_inner();

        if let Some(&index) = inner.name_to_index.get(name) {
            let slot = &mut inner.slots[index];
            if !slot.value.matches(&vref) {
                return Err(ChannelError::TypeMismatch {
                    name: name.to_string(),
                    registered: slot.value.signature(),
                    requested: vref.signature(),
                });
            }
            slot.value = vref;
            slot.enabled = true;
            return Ok(RegistrationID {
                first_index: index,
                fields_count: 1,
            });
        }

        if inner.frozen {
            return Err(ChannelError::SchemaLocked {
                channel: self.name.clone(),
                name: name.to_string(),
            });
        }

        let field = Field {
            name: name.to_string(),
            basic_type: vref.basic_type(),
            is_vector: vref.is_vector(),
            array_size: vref.array_size(),
            custom_type: vref.custom_type().cloned(),
        };
        inner.schema.hash = add_field_to_hash(&field, inner.schema.hash);
        inner.schema.fields.push(field);
        inner.slots.push(FieldSlot {
            value: vref,
            enabled: true,
        });
        let index = inner.slots.len() - 1;
        inner.name_to_index.insert(name.to_string(), index);
        Ok(RegistrationID {
            first_index: index,
            fields_count: 1,
        })
    }

    /// Disables the fields covered by `id`.
    ///
    /// The fields stay in the schema (the hash is unchanged) but contribute
    /// nothing to subsequent snapshots, and their stored addresses are no
    /// longer dereferenced. Re-registering the same name re-enables the
    /// field.
    pub fn unregister(&self, id: RegistrationID) {
        self.set_enabled(id, false);
    }

    /// Sets the enable bit for the fields covered by `id`.
    pub fn set_enabled(&self, id: RegistrationID, enabled: bool) {
        let mut inner = self.lock_inner();
        for index in id.first_index..id.first_index + id.fields_count {
            if let Some(slot) = inner.slots.get_mut(index) {
                slot.enabled = enabled;
            }
        }
    }

    /// Attaches a sink to this channel, spawning its consumer thread.
    ///
    /// Each attached sink gets its own bounded queue and worker; a sink
    /// shared between channels therefore receives `add_channel` once per
    /// channel schema hash and must treat equal hashes idempotently.
    pub fn add_data_sink(&self, sink: Arc<dyn DataSink>) {
        let worker = SinkWorker::spawn(&self.name, sink, self.sink_rejections.clone());
        self.lock_workers().push(worker);
    }

    /// Captures a snapshot of the enabled fields and enqueues it on every
    /// attached sink.
    ///
    /// The first call freezes the schema. Returns `false` if any sink
    /// queue was full (the snapshot is dropped for that sink and counted,
    /// never blocking the caller).
    pub fn take_snapshot(&self) -> bool {
        let (schema, snapshot) = self.capture();

        let mut delivered_everywhere = true;
        for worker in self.lock_workers().iter() {
            let message = SinkMessage {
                schema: schema.clone(),
                snapshot: snapshot.clone(),
            };
            if !worker.enqueue(message) {
                self.dropped_snapshots.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(channel = %self.name, "sink queue full, snapshot dropped");
                delivered_everywhere = false;
            }
        }
        delivered_everywhere
    }

    /// Freezes the schema if needed and serialises the enabled fields
    /// under the channel lock.
    fn capture(&self) -> (Arc<Schema>, Arc<Snapshot>) {
        let mut inner = self.lock_inner();
        inner.frozen = true;

        let timestamp_ns = self.clock.now_ns();
        let schema = match inner.shared_schema.clone() {
            Some(schema) => schema,
            None => {
                let schema = Arc::new(inner.schema.clone());
                inner.shared_schema = Some(schema.clone());
                schema
            }
        };

        let mut active_mask = vec![0u8; inner.slots.len().div_ceil(8)];
        let mut payload_size = 0usize;
        for (index, slot) in inner.slots.iter().enumerate() {
            if slot.enabled {
                active_mask[index / 8] |= 1 << (index % 8);
                payload_size += slot.value.serialized_size() as usize;
            }
        }

        let mut payload = Vec::with_capacity(payload_size);
        for slot in inner.slots.iter().filter(|slot| slot.enabled) {
            slot.value.serialize(&mut payload);
        }

        (
            schema,
            Arc::new(Snapshot {
                schema_hash: inner.schema.hash,
                timestamp_ns,
                active_mask,
                payload,
            }),
        )
    }

    /// A copy of the current schema.
    pub fn schema(&self) -> Schema {
        self.lock_inner().schema.clone()
    }

    /// Snapshots dropped because a sink queue was full.
    pub fn dropped_snapshots(&self) -> u64 {
        self.dropped_snapshots.load(Ordering::Relaxed)
    }

    /// Snapshots a sink's `push_snapshot` refused to process.
    pub fn sink_rejections(&self) -> u64 {
        self.sink_rejections.load(Ordering::Relaxed)
    }

    fn lock_inner(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<SinkWorker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn capture_for_test(&self) -> Snapshot {
        (*self.capture().1).clone()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock_inner();
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("fields", &inner.schema.fields.len())
            .field("frozen", &inner.frozen)
            .finish()
    }
}
