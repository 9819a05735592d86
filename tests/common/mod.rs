//! Shared helpers for the integration tests.

#![allow(dead_code)] // each test binary uses a subset of the helpers

use std::sync::Arc;
use std::time::{Duration, Instant};

use statetap::{CustomSerializer, CustomTypeInfo};

/// Polls `condition` until it holds or the timeout expires. Returns whether
/// the condition was met, so tests can assert with their own message.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Default settling time for sink workers to drain.
pub fn settle() -> Duration {
    Duration::from_secs(2)
}

/// Example user-defined type observed through a custom serializer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Serializer for [`Point3D`]: three little-endian `f32`s, 12 bytes.
pub struct PointTypeInfo;

impl CustomTypeInfo for PointTypeInfo {
    fn type_name(&self) -> &str {
        "Point3D"
    }

    fn type_schema(&self) -> Option<&str> {
        Some("float32 x\nfloat32 y\nfloat32 z\n")
    }
}

impl CustomSerializer<Point3D> for PointTypeInfo {
    fn serialized_size(&self, _value: &Point3D) -> u32 {
        12
    }

    fn serialize(&self, value: &Point3D, dst: &mut Vec<u8>) -> u32 {
        dst.extend_from_slice(&value.x.to_le_bytes());
        dst.extend_from_slice(&value.y.to_le_bytes());
        dst.extend_from_slice(&value.z.to_le_bytes());
        12
    }
}

/// Shared handle to the serializer, as channels expect.
pub fn point_info() -> Arc<PointTypeInfo> {
    Arc::new(PointTypeInfo)
}
