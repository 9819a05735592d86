//! Bundled sink implementations.
//!
//! Production sinks (file writers, network publishers) live outside the
//! core; this module only ships [`MemorySink`], the collecting in-memory
//! sink used by the test suite and by applications that want to inspect
//! recent telemetry in-process.

pub mod memory;

pub use memory::MemorySink;
