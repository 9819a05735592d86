//! # statetap: in-process binary telemetry
//!
//! A low-overhead telemetry library for applications where logging text is
//! too slow: declare a set of live program variables as a *channel*,
//! periodically capture a consistent binary snapshot of their current
//! values, and hand each snapshot to one or more downstream *sinks*
//! asynchronously.
//!
//! ## Architecture
//!
//! - **Channel**: owns the ordered field list (the *schema*), the per-field
//!   enable bits, and `take_snapshot`, which serialises the enabled subset
//!   under a snapshot-time lock
//! - **Schema**: content-addressed by a 64-bit hash embedded in every
//!   snapshot; the textual form ([`Schema`]'s `Display` /
//!   [`parser::schema_from_text`]) is the interchange format consumers use
//!   to decode payloads
//! - **Sink dispatch**: one background worker and bounded queue per
//!   (channel, sink) pair; producers never block on a slow sink, overflow
//!   drops the newest snapshot and counts it
//! - **Registry**: channels are looked up by name through a
//!   [`ChannelsRegistry`], which attaches its default sinks to every newly
//!   created channel
//!
//! ## Observed variables
//!
//! Registration stores the *address* of a user-owned variable, so the
//! registration methods are `unsafe`: the caller guarantees the variable
//! outlives the channel and is not mutated while a snapshot is taken. The
//! library only dereferences the address inside `take_snapshot`, under the
//! channel lock.
//!
//! ## Example
//!
//! ```
//! use statetap::sinks::MemorySink;
//! use statetap::ChannelsRegistry;
//! use std::sync::Arc;
//!
//! // Observed variables, declared before the registry so they outlive it.
//! let speed = 3.14f64;
//! let ticks = 49i32;
//!
//! let registry = ChannelsRegistry::new();
//! let sink = Arc::new(MemorySink::new());
//! registry.add_default_sink(sink.clone());
//!
//! let channel = registry.get_channel("drive");
//! // Safety: `speed` and `ticks` outlive `registry` and are not mutated
//! // while snapshots are taken.
//! unsafe {
//!     channel.register_value("speed", &speed).unwrap();
//!     channel.register_value("ticks", &ticks).unwrap();
//! }
//!
//! assert!(channel.take_snapshot());
//! println!("{}", channel.schema());
//! ```

pub mod channel;
pub mod clock;
pub mod dispatch;
pub mod error;
pub mod parser;
pub mod registry;
pub mod schema;
pub mod sinks;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use channel::Channel;
pub use clock::{MonotonicClock, ProcessClock};
pub use dispatch::{DataSink, SINK_QUEUE_CAPACITY};
pub use error::{ChannelError, ParseError, Result};
pub use registry::ChannelsRegistry;
pub use schema::{
    add_field_to_hash, hash_fields, CustomTypeInfo, Field, OpaqueCustomType, Schema,
    SCHEMA_VERSION,
};
pub use types::{
    deserialize_as_var_type, BasicType, RegistrationID, Snapshot, Value, TYPES_COUNT,
};
pub use value::{CustomSerializer, Observable, Primitive, ValueRef};
