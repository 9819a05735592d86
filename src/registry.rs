//! Channel registry: process-scoped lookup of channels by name.
//!
//! A [`ChannelsRegistry`] owns every channel created through it and the set
//! of *default sinks* attached to each newly created channel. Registries
//! are constructed explicitly — tests can run several side by side — and a
//! shared process-wide instance is available through
//! [`ChannelsRegistry::global`] for the common single-registry setup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::channel::Channel;
use crate::clock::{MonotonicClock, ProcessClock};
use crate::dispatch::DataSink;

struct RegistryInner {
    channels: HashMap<String, Arc<Channel>>,
    default_sinks: Vec<Arc<dyn DataSink>>,
}

/// Collection of channels keyed by name.
///
/// Channels live as long as the registry (plus any outstanding handles);
/// dropping the registry stops their sink workers after draining.
pub struct ChannelsRegistry {
    inner: Mutex<RegistryInner>,
    clock: Arc<dyn MonotonicClock>,
}

static GLOBAL_REGISTRY: OnceLock<ChannelsRegistry> = OnceLock::new();

impl ChannelsRegistry {
    /// An empty registry stamping snapshots with the process clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(ProcessClock))
    }

    /// An empty registry using a caller-provided time source.
    pub fn with_clock(clock: Arc<dyn MonotonicClock>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                channels: HashMap::new(),
                default_sinks: Vec::new(),
            }),
            clock,
        }
    }

    /// The shared process-wide registry.
    ///
    /// Convenience for applications that want one registry everywhere;
    /// libraries and tests should prefer constructing their own.
    pub fn global() -> &'static ChannelsRegistry {
        GLOBAL_REGISTRY.get_or_init(ChannelsRegistry::new)
    }

    /// Registers a sink to be attached to every channel created from now
    /// on. Channels created earlier are not retroactively wired.
    pub fn add_default_sink(&self, sink: Arc<dyn DataSink>) {
        self.lock().default_sinks.push(sink);
    }

    /// Returns the channel named `name`, creating it (with all current
    /// default sinks attached) on first lookup.
    pub fn get_channel(&self, name: &str) -> Arc<Channel> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if let Some(channel) = inner.channels.get(name) {
            return channel.clone();
        }

        tracing::debug!(channel = name, "creating channel");
        let channel = Channel::new(name.to_string(), self.clock.clone());
        for sink in &inner.default_sinks {
            channel.add_data_sink(sink.clone());
        }
        inner.channels.insert(name.to_string(), channel.clone());
        channel
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ChannelsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChannelsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ChannelsRegistry")
            .field("channels", &inner.channels.len())
            .field("default_sinks", &inner.default_sinks.len())
            .finish()
    }
}
