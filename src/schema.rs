//! Schema model: fields, custom types, the schema hash and the textual form.
//!
//! A channel's schema is a flat, ordered list of named, typed fields. Its
//! identity is a content-addressed 64-bit hash computed incrementally as
//! fields are registered; downstream consumers use the hash to bind each
//! snapshot to the schema text that decodes it.
//!
//! # Textual form
//!
//! [`Schema`] implements `Display` producing the line-oriented interchange
//! format: reserved `__`-prefixed headers, one declaration line per field,
//! then one block per distinct custom type delimited by `---------` lines.
//! [`crate::parser::schema_from_text`] is the inverse.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::BasicType;

/// Version tag embedded in the textual schema.
pub const SCHEMA_VERSION: u16 = 3;

/// Description of a user-defined type referenced by `other` fields.
///
/// The same custom type may back many fields; it is shared as an
/// `Arc<dyn CustomTypeInfo>` and appears exactly once in the textual
/// schema, keyed by [`type_name`](CustomTypeInfo::type_name).
pub trait CustomTypeInfo: Send + Sync {
    /// Name of the type, written in the schema in place of a basic type.
    fn type_name(&self) -> &str;

    /// Optional nested schema describing the type's own layout.
    ///
    /// Types returning `None` contribute no block to the textual schema.
    fn type_schema(&self) -> Option<&str> {
        None
    }
}

/// A name-only custom type, for schemas whose definitions live elsewhere
/// (or were parsed from text).
#[derive(Debug, Clone)]
pub struct OpaqueCustomType {
    name: String,
    schema: Option<String>,
}

impl OpaqueCustomType {
    /// A custom type with no nested schema.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
        }
    }

    /// A custom type carrying a nested schema body.
    pub fn with_schema(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: Some(schema.into()),
        }
    }
}

impl CustomTypeInfo for OpaqueCustomType {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn type_schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

/// One key/value pair in a schema: a name plus the shape of its value.
///
/// `array_size == 0 && is_vector` describes a dynamic vector (length
/// prefixed on the wire); `array_size > 0 && is_vector` a fixed array;
/// `!is_vector` a single scalar or custom value.
#[derive(Clone, Serialize, Deserialize)]
pub struct Field {
    /// Field name, unique within its schema.
    pub name: String,
    /// Primary type tag; `Other` for custom types.
    pub basic_type: BasicType,
    /// Whether the field is an array or vector of `basic_type`.
    pub is_vector: bool,
    /// Element count for fixed arrays; 0 for scalars and dynamic vectors.
    pub array_size: u16,
    /// Shared description of the custom type; required when
    /// `basic_type == Other`.
    #[serde(skip)]
    pub custom_type: Option<Arc<dyn CustomTypeInfo>>,
}

impl Field {
    /// The type token used in schema text: the custom type name for
    /// `other` fields, the basic type name otherwise, with `[]`/`[N]`
    /// appended for vectors and arrays.
    pub fn type_label(&self) -> String {
        let base = match (&self.basic_type, &self.custom_type) {
            (BasicType::Other, Some(custom)) => custom.type_name().to_string(),
            (ty, _) => ty.as_str().to_string(),
        };
        if self.is_vector {
            if self.array_size != 0 {
                format!("{base}[{}]", self.array_size)
            } else {
                format!("{base}[]")
            }
        } else {
            base
        }
    }

    /// Name of the custom type, if any.
    pub fn custom_type_name(&self) -> Option<&str> {
        self.custom_type.as_deref().map(CustomTypeInfo::type_name)
    }
}

/// Field identity ignores the custom-type handle; two fields referring to
/// the same name and shape are equal even if one was parsed from text and
/// carries no serialiser.
impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.basic_type == other.basic_type
            && self.is_vector == other.is_vector
            && self.array_size == other.array_size
    }
}

impl Eq for Field {}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("basic_type", &self.basic_type)
            .field("is_vector", &self.is_vector)
            .field("array_size", &self.array_size)
            .field("custom_type", &self.custom_type_name())
            .finish()
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.type_label(), self.name)
    }
}

/// The ordered field list that defines how a channel's snapshots decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Name of the channel this schema belongs to.
    pub channel_name: String,
    /// Fields in registration order.
    pub fields: Vec<Field>,
    /// Content hash of `fields`, updated incrementally on registration.
    pub hash: u64,
}

impl std::fmt::Display for Schema {
    /// Emits the textual schema.
    ///
    /// Custom-type blocks are emitted after the field lines in ascending
    /// order of type name, once per distinct type. Types whose
    /// `type_schema()` is `None` are suppressed entirely.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "__version__: {SCHEMA_VERSION}")?;
        writeln!(f, "__hash__: {}", self.hash)?;
        writeln!(f, "__channel_name__: {}", self.channel_name)?;

        let mut custom_types: BTreeMap<&str, &Arc<dyn CustomTypeInfo>> = BTreeMap::new();
        for field in &self.fields {
            if let Some(custom) = &field.custom_type {
                custom_types.insert(custom.type_name(), custom);
            }
            writeln!(f, "{field}")?;
        }
        for (name, custom) in custom_types {
            if let Some(body) = custom.type_schema() {
                write!(f, "---------\n{name}\n---------\n{body}")?;
            }
        }
        Ok(())
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over a byte string, the stable 64-bit sub-hash used for every
/// value that feeds the schema hash.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Golden-ratio combiner; the constant and mix are fixed for compatibility
/// with existing consumers.
fn combine(hash: u64, sub: u64) -> u64 {
    hash ^ sub
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(hash << 6)
        .wrapping_add(hash >> 2)
}

/// Folds one field into a running schema hash.
///
/// Sub-values are combined in this exact order: name (FNV-1a over UTF-8),
/// type tag (FNV-1a over its single byte), the custom type name for
/// `other` fields (FNV-1a over UTF-8), `is_vector` (one byte), and
/// `array_size` (two little-endian bytes). The result depends only on the
/// field sequence, never on pointers or enable state.
pub fn add_field_to_hash(field: &Field, mut hash: u64) -> u64 {
    hash = combine(hash, fnv1a(field.name.as_bytes()));
    hash = combine(hash, fnv1a(&[field.basic_type.wire_tag()]));
    if field.basic_type == BasicType::Other {
        if let Some(custom) = &field.custom_type {
            hash = combine(hash, fnv1a(custom.type_name().as_bytes()));
        }
    }
    hash = combine(hash, fnv1a(&[u8::from(field.is_vector)]));
    hash = combine(hash, fnv1a(&field.array_size.to_le_bytes()));
    hash
}

/// Computes the hash of an ordered field sequence from scratch.
pub fn hash_fields(fields: &[Field]) -> u64 {
    fields.iter().fold(0, |hash, field| add_field_to_hash(field, hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(name: &str, ty: BasicType) -> Field {
        Field {
            name: name.to_string(),
            basic_type: ty,
            is_vector: false,
            array_size: 0,
            custom_type: None,
        }
    }

    #[test]
    fn test_field_type_labels() {
        assert_eq!(scalar("x", BasicType::Float64).type_label(), "float64");

        let vect = Field {
            is_vector: true,
            ..scalar("v", BasicType::Int32)
        };
        assert_eq!(vect.type_label(), "int32[]");

        let array = Field {
            is_vector: true,
            array_size: 5,
            ..scalar("a", BasicType::Float32)
        };
        assert_eq!(array.type_label(), "float32[5]");

        let custom = Field {
            basic_type: BasicType::Other,
            custom_type: Some(Arc::new(OpaqueCustomType::named("Pose"))),
            ..scalar("p", BasicType::Other)
        };
        assert_eq!(custom.type_label(), "Pose");
    }

    #[test]
    fn test_field_equality_ignores_custom_handle() {
        let mut a = scalar("p", BasicType::Other);
        a.custom_type = Some(Arc::new(OpaqueCustomType::named("Pose")));
        let b = scalar("p", BasicType::Other);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_depends_only_on_field_sequence() {
        let fields = vec![
            scalar("a", BasicType::Float64),
            scalar("b", BasicType::Int32),
        ];
        assert_eq!(hash_fields(&fields), hash_fields(&fields.clone()));

        let swapped = vec![
            scalar("b", BasicType::Int32),
            scalar("a", BasicType::Float64),
        ];
        assert_ne!(hash_fields(&fields), hash_fields(&swapped));
    }

    #[test]
    fn test_hash_distinguishes_shape() {
        let s = scalar("x", BasicType::Float32);
        let vect = Field {
            is_vector: true,
            ..s.clone()
        };
        let array = Field {
            is_vector: true,
            array_size: 4,
            ..s.clone()
        };
        let h_scalar = add_field_to_hash(&s, 0);
        let h_vect = add_field_to_hash(&vect, 0);
        let h_array = add_field_to_hash(&array, 0);
        assert_ne!(h_scalar, h_vect);
        assert_ne!(h_vect, h_array);
        assert_ne!(h_scalar, h_array);
    }

    #[test]
    fn test_hash_includes_custom_type_name() {
        let mut a = scalar("p", BasicType::Other);
        a.custom_type = Some(Arc::new(OpaqueCustomType::named("Pose")));
        let mut b = scalar("p", BasicType::Other);
        b.custom_type = Some(Arc::new(OpaqueCustomType::named("Twist")));
        assert_ne!(add_field_to_hash(&a, 0), add_field_to_hash(&b, 0));
    }

    #[test]
    fn test_schema_text_layout() {
        let schema = Schema {
            channel_name: "chan".to_string(),
            fields: vec![
                scalar("speed", BasicType::Float64),
                Field {
                    is_vector: true,
                    array_size: 3,
                    ..scalar("gyro", BasicType::Float32)
                },
                Field {
                    is_vector: true,
                    ..scalar("samples", BasicType::Int16)
                },
            ],
            hash: 42,
        };
        let text = schema.to_string();
        let expected = "__version__: 3\n\
                        __hash__: 42\n\
                        __channel_name__: chan\n\
                        float64 speed\n\
                        float32[3] gyro\n\
                        int16[] samples\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_schema_text_custom_blocks_sorted_and_deduped() {
        let pose: Arc<dyn CustomTypeInfo> =
            Arc::new(OpaqueCustomType::with_schema("Pose", "float64 x\nfloat64 y\n"));
        let accel: Arc<dyn CustomTypeInfo> =
            Arc::new(OpaqueCustomType::with_schema("Accel", "float32 a\n"));

        let mut f1 = scalar("p1", BasicType::Other);
        f1.custom_type = Some(pose.clone());
        let mut f2 = scalar("acc", BasicType::Other);
        f2.custom_type = Some(accel);
        let mut f3 = scalar("p2", BasicType::Other);
        f3.custom_type = Some(pose);

        let schema = Schema {
            channel_name: "c".to_string(),
            fields: vec![f1, f2, f3],
            hash: 0,
        };
        let text = schema.to_string();

        // One block each, Accel before Pose.
        assert_eq!(text.matches("---------\nPose\n---------\n").count(), 1);
        assert_eq!(text.matches("---------\nAccel\n---------\n").count(), 1);
        let accel_pos = text.find("---------\nAccel").unwrap();
        let pose_pos = text.find("---------\nPose").unwrap();
        assert!(accel_pos < pose_pos);
    }

    #[test]
    fn test_schema_text_suppresses_bodyless_custom() {
        let mut f = scalar("blob", BasicType::Other);
        f.custom_type = Some(Arc::new(OpaqueCustomType::named("Blob")));
        let schema = Schema {
            channel_name: "c".to_string(),
            fields: vec![f],
            hash: 0,
        };
        let text = schema.to_string();
        assert!(text.contains("Blob blob\n"));
        assert!(!text.contains("---------"));
    }
}
