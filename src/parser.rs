//! Parsing of textual schemas and decoding of snapshot payloads.
//!
//! This is the consumer-side counterpart of the channel: given the schema
//! text announced by a sink and the snapshots that follow, it recovers the
//! field list and the individual values.
//!
//! Parsing is line oriented and whitespace tolerant: blank lines are
//! ignored, field declarations may use any amount of spacing between the
//! type token and the name, and the reserved `__`-prefixed headers may
//! appear in any order. Custom-type blocks (`---------` separators) are
//! collected and re-attached to the fields that reference them by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ParseError;
use crate::schema::{hash_fields, CustomTypeInfo, Field, OpaqueCustomType, Schema};
use crate::types::{deserialize_as_var_type, BasicType, Cursor, Snapshot, Value};

/// Separator line delimiting custom-type blocks in schema text.
const BLOCK_SEPARATOR: &str = "---------";

/// Parses a textual schema produced by [`Schema`]'s `Display`
/// implementation (or by a compatible writer in another language).
///
/// Unknown type tokens become `other` fields carrying a name-only custom
/// type; if the text later defines a block for that name, the block's body
/// is attached as the custom type's schema. When a `__hash__` header is
/// present it is checked against the hash recomputed from the parsed
/// fields.
pub fn schema_from_text(text: &str) -> Result<Schema, ParseError> {
    enum Section {
        Fields,
        BlockName,
        BlockSeparator(String),
        BlockBody(String, Vec<String>),
    }

    let mut channel_name = String::new();
    let mut declared_hash: Option<u64> = None;
    let mut fields: Vec<(Field, Option<String>)> = Vec::new();
    let mut blocks: BTreeMap<String, String> = BTreeMap::new();
    let mut section = Section::Fields;

    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim();

        section = match section {
            Section::Fields => {
                if line.is_empty() {
                    Section::Fields
                } else if line == BLOCK_SEPARATOR {
                    Section::BlockName
                } else if let Some(rest) = line.strip_prefix("__") {
                    parse_header(rest, line_no, &mut channel_name, &mut declared_hash)?;
                    Section::Fields
                } else {
                    let parsed = parse_field_line(line, line_no)?;
                    if fields.iter().any(|(field, _)| field.name == parsed.0.name) {
                        return Err(ParseError::DuplicateField(parsed.0.name));
                    }
                    fields.push(parsed);
                    Section::Fields
                }
            }
            Section::BlockName => {
                if line.is_empty() {
                    Section::BlockName
                } else {
                    Section::BlockSeparator(line.to_string())
                }
            }
            Section::BlockSeparator(name) => {
                if line != BLOCK_SEPARATOR {
                    return Err(ParseError::InvalidSchemaLine {
                        line: line_no,
                        message: format!(
                            "expected '{BLOCK_SEPARATOR}' after custom type name '{name}'"
                        ),
                    });
                }
                Section::BlockBody(name, Vec::new())
            }
            Section::BlockBody(name, mut body) => {
                if line == BLOCK_SEPARATOR {
                    finish_block(&mut blocks, name, body);
                    Section::BlockName
                } else {
                    body.push(raw_line.to_string());
                    Section::BlockBody(name, body)
                }
            }
        };
    }

    match section {
        Section::Fields | Section::BlockName => {}
        Section::BlockSeparator(name) => {
            return Err(ParseError::InvalidSchemaLine {
                line: text.lines().count(),
                message: format!("custom type '{name}' has no body separator"),
            });
        }
        Section::BlockBody(name, body) => finish_block(&mut blocks, name, body),
    }

    // Share one handle per distinct custom type name.
    let mut custom_types: BTreeMap<String, Arc<dyn CustomTypeInfo>> = BTreeMap::new();
    let mut resolved = Vec::with_capacity(fields.len());
    for (mut field, custom_name) in fields {
        if let Some(name) = custom_name {
            let custom = custom_types
                .entry(name.clone())
                .or_insert_with(|| match blocks.get(&name) {
                    Some(body) => Arc::new(OpaqueCustomType::with_schema(&name, body.clone())),
                    None => Arc::new(OpaqueCustomType::named(&name)),
                });
            field.custom_type = Some(custom.clone());
        }
        resolved.push(field);
    }

    let computed = hash_fields(&resolved);
    if let Some(declared) = declared_hash {
        if declared != computed {
            return Err(ParseError::HashMismatch {
                declared,
                computed,
            });
        }
    }

    Ok(Schema {
        channel_name,
        fields: resolved,
        hash: computed,
    })
}

fn finish_block(blocks: &mut BTreeMap<String, String>, name: String, body: Vec<String>) {
    let mut text = body.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    blocks.insert(name, text);
}

fn parse_header(
    rest: &str,
    line_no: usize,
    channel_name: &mut String,
    declared_hash: &mut Option<u64>,
) -> Result<(), ParseError> {
    let (key, value) = rest.split_once(':').ok_or(ParseError::InvalidSchemaLine {
        line: line_no,
        message: "reserved header is missing ':'".to_string(),
    })?;
    let value = value.trim();
    match key.trim_end_matches('_') {
        "version" | "" => {} // version is informational; other headers are reserved
        "hash" => {
            let hash = value.parse().map_err(|_| ParseError::InvalidSchemaLine {
                line: line_no,
                message: format!("invalid hash value '{value}'"),
            })?;
            *declared_hash = Some(hash);
        }
        "channel_name" => {
            *channel_name = value.to_string();
        }
        _ => {} // unknown reserved headers are skipped for forward compatibility
    }
    Ok(())
}

/// Parses one `<type> <name>` declaration, returning the field plus the
/// custom type name for unknown type tokens.
fn parse_field_line(line: &str, line_no: usize) -> Result<(Field, Option<String>), ParseError> {
    let mut tokens = line.split_whitespace();
    let (type_token, name) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(ty), Some(name), None) => (ty, name),
        _ => {
            return Err(ParseError::InvalidSchemaLine {
                line: line_no,
                message: format!("expected '<type> <name>', got '{line}'"),
            });
        }
    };

    let (base, is_vector, array_size) = if let Some(base) = type_token.strip_suffix("[]") {
        (base, true, 0u16)
    } else if let Some((base, size)) = type_token
        .strip_suffix(']')
        .and_then(|t| t.split_once('['))
    {
        let array_size: u16 = size.parse().map_err(|_| ParseError::InvalidSchemaLine {
            line: line_no,
            message: format!("invalid array size '{size}'"),
        })?;
        if array_size == 0 {
            return Err(ParseError::InvalidSchemaLine {
                line: line_no,
                message: "fixed array size must be positive; use '[]' for vectors".to_string(),
            });
        }
        (base, true, array_size)
    } else {
        (type_token, false, 0u16)
    };

    if base.is_empty() {
        return Err(ParseError::InvalidSchemaLine {
            line: line_no,
            message: "empty type token".to_string(),
        });
    }

    let basic_type: BasicType = base.parse().unwrap_or(BasicType::Other);
    let custom_name = match basic_type {
        BasicType::Other if base != BasicType::Other.as_str() => Some(base.to_string()),
        _ => None,
    };

    Ok((
        Field {
            name: name.to_string(),
            basic_type,
            is_vector,
            array_size,
            custom_type: None,
        },
        custom_name,
    ))
}

/// One decoded field payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    /// A single basic-typed value.
    Scalar(Value),
    /// A fixed array or dynamic vector of basic-typed values.
    Sequence(Vec<Value>),
    /// The raw bytes of one custom-typed value (size prefix stripped);
    /// interpreting them is the caller's responsibility.
    Custom(Vec<u8>),
    /// Raw bytes of each element of an array/vector of custom values.
    CustomSequence(Vec<Vec<u8>>),
}

/// A field together with its value decoded from one snapshot.
#[derive(Debug, Clone)]
pub struct DecodedField<'a> {
    /// The schema field this value belongs to.
    pub field: &'a Field,
    /// The decoded payload.
    pub value: DecodedValue,
}

/// Decodes a snapshot's payload against its schema.
///
/// Only fields whose active-mask bit is set appear in the result, in field
/// order. Fails if the snapshot carries a different schema hash, the mask
/// length is wrong, or the payload is shorter or longer than the active
/// fields require.
pub fn decode_snapshot<'a>(
    schema: &'a Schema,
    snapshot: &Snapshot,
) -> Result<Vec<DecodedField<'a>>, ParseError> {
    if snapshot.schema_hash != schema.hash {
        return Err(ParseError::WrongSchema {
            snapshot: snapshot.schema_hash,
            schema: schema.hash,
        });
    }
    let expected_mask = schema.fields.len().div_ceil(8);
    if snapshot.active_mask.len() != expected_mask {
        return Err(ParseError::MaskLength {
            fields: schema.fields.len(),
            expected: expected_mask,
            actual: snapshot.active_mask.len(),
        });
    }

    let mut cursor = Cursor::new(&snapshot.payload);
    let mut decoded = Vec::with_capacity(snapshot.active_count());
    for (index, field) in schema.fields.iter().enumerate() {
        if !snapshot.is_active(index) {
            continue;
        }
        let value = decode_field(field, &mut cursor)?;
        decoded.push(DecodedField { field, value });
    }
    if cursor.remaining() != 0 {
        return Err(ParseError::TrailingBytes(cursor.remaining()));
    }
    Ok(decoded)
}

fn decode_field(field: &Field, cursor: &mut Cursor<'_>) -> Result<DecodedValue, ParseError> {
    if field.basic_type == BasicType::Other {
        return decode_custom_field(field, cursor);
    }

    if !field.is_vector {
        return Ok(DecodedValue::Scalar(read_scalar(
            field.basic_type,
            &field.name,
            cursor,
        )?));
    }

    let count = if field.array_size != 0 {
        field.array_size as usize
    } else {
        u32::from_le_bytes(cursor.take_fixed(&field.name)?) as usize
    };
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        elements.push(read_scalar(field.basic_type, &field.name, cursor)?);
    }
    Ok(DecodedValue::Sequence(elements))
}

fn decode_custom_field(field: &Field, cursor: &mut Cursor<'_>) -> Result<DecodedValue, ParseError> {
    if !field.is_vector {
        return Ok(DecodedValue::Custom(read_sized_blob(&field.name, cursor)?));
    }
    let count = if field.array_size != 0 {
        field.array_size as usize
    } else {
        u32::from_le_bytes(cursor.take_fixed(&field.name)?) as usize
    };
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        elements.push(read_sized_blob(&field.name, cursor)?);
    }
    Ok(DecodedValue::CustomSequence(elements))
}

fn read_scalar(
    ty: BasicType,
    context: &str,
    cursor: &mut Cursor<'_>,
) -> Result<Value, ParseError> {
    let bytes = cursor.take(context, ty.size_bytes())?;
    deserialize_as_var_type(ty, bytes).ok_or(ParseError::Truncated {
        context: context.to_string(),
    })
}

fn read_sized_blob(context: &str, cursor: &mut Cursor<'_>) -> Result<Vec<u8>, ParseError> {
    let size = u32::from_le_bytes(cursor.take_fixed(context)?) as usize;
    Ok(cursor.take(context, size)?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_schema_from_plain_text() {
        let text = "\n\
            int8 v1\n\
            float64 v2\n\
            float32[5] array\n\
            int32[] vect\n\
            bool is_true\n\
            char[256] blob\n\
            uint16  my/short\n";

        let schema = schema_from_text(text).unwrap();
        assert_eq!(schema.fields.len(), 7);

        let expect = |i: usize, name: &str, ty: BasicType, is_vector: bool, size: u16| {
            let field = &schema.fields[i];
            assert_eq!(field.name, name);
            assert_eq!(field.basic_type, ty);
            assert_eq!(field.is_vector, is_vector);
            assert_eq!(field.array_size, size);
        };
        expect(0, "v1", BasicType::Int8, false, 0);
        expect(1, "v2", BasicType::Float64, false, 0);
        expect(2, "array", BasicType::Float32, true, 5);
        expect(3, "vect", BasicType::Int32, true, 0);
        expect(4, "is_true", BasicType::Bool, false, 0);
        expect(5, "blob", BasicType::Char, true, 256);
        expect(6, "my/short", BasicType::Uint16, false, 0);
    }

    #[test]
    fn test_headers_and_hash_verification() {
        let fields = "float64 x\nint32 n\n";
        let computed = {
            let schema = schema_from_text(fields).unwrap();
            schema.hash
        };

        let text =
            format!("__version__: 3\n__hash__: {computed}\n__channel_name__: chan\n{fields}");
        let schema = schema_from_text(&text).unwrap();
        assert_eq!(schema.channel_name, "chan");
        assert_eq!(schema.hash, computed);

        let bad = format!("__hash__: {}\n{fields}", computed ^ 1);
        assert!(matches!(
            schema_from_text(&bad),
            Err(ParseError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = schema_from_text("int8 x\nfloat64 x\n").unwrap_err();
        assert_eq!(err, ParseError::DuplicateField("x".to_string()));
    }

    #[test]
    fn test_malformed_lines_rejected() {
        assert!(schema_from_text("float64\n").is_err());
        assert!(schema_from_text("float64 a b\n").is_err());
        assert!(schema_from_text("float64[zero] a\n").is_err());
        assert!(schema_from_text("float64[0] a\n").is_err());
    }

    #[test]
    fn test_custom_type_block_round_trip() {
        let text = "Point3D point\n\
                    float64 stamp\n\
                    ---------\n\
                    Point3D\n\
                    ---------\n\
                    float32 x\n\
                    float32 y\n\
                    float32 z\n";

        let schema = schema_from_text(text).unwrap();
        assert_eq!(schema.fields[0].basic_type, BasicType::Other);
        assert_eq!(schema.fields[0].custom_type_name(), Some("Point3D"));
        let custom = schema.fields[0].custom_type.as_ref().unwrap();
        assert_eq!(
            custom.type_schema(),
            Some("float32 x\nfloat32 y\nfloat32 z\n")
        );

        // Emitting the parsed schema and parsing again is a fixed point.
        let reparsed = schema_from_text(&schema.to_string()).unwrap();
        assert_eq!(reparsed.fields, schema.fields);
        assert_eq!(reparsed.hash, schema.hash);
    }

    #[test]
    fn test_unknown_type_without_block_is_opaque() {
        let schema = schema_from_text("Quat orientation\n").unwrap();
        assert_eq!(schema.fields[0].basic_type, BasicType::Other);
        assert_eq!(schema.fields[0].custom_type_name(), Some("Quat"));
        assert_eq!(
            schema.fields[0].custom_type.as_ref().unwrap().type_schema(),
            None
        );
    }

    fn layout_schema() -> Schema {
        schema_from_text(
            "float64 speed\n\
             int32[] samples\n\
             uint8[2] pair\n\
             Blob blob\n",
        )
        .unwrap()
    }

    fn snapshot_for(schema: &Schema, mask: Vec<u8>, payload: Vec<u8>) -> Snapshot {
        Snapshot {
            schema_hash: schema.hash,
            timestamp_ns: 0,
            active_mask: mask,
            payload,
        }
    }

    #[test]
    fn test_decode_snapshot_all_active() {
        let schema = layout_schema();
        let mut payload = Vec::new();
        payload.extend_from_slice(&3.5f64.to_le_bytes());
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.extend_from_slice(&7i32.to_le_bytes());
        payload.extend_from_slice(&8i32.to_le_bytes());
        payload.extend_from_slice(&[10u8, 20u8]);
        payload.extend_from_slice(&3u32.to_le_bytes());
        payload.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let snapshot = snapshot_for(&schema, vec![0b0000_1111], payload);
        let decoded = decode_snapshot(&schema, &snapshot).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[0].value, DecodedValue::Scalar(Value::Float64(3.5)));
        assert_eq!(
            decoded[1].value,
            DecodedValue::Sequence(vec![Value::Int32(7), Value::Int32(8)])
        );
        assert_eq!(
            decoded[2].value,
            DecodedValue::Sequence(vec![Value::Uint8(10), Value::Uint8(20)])
        );
        assert_eq!(
            decoded[3].value,
            DecodedValue::Custom(vec![0xAA, 0xBB, 0xCC])
        );
    }

    #[test]
    fn test_decode_snapshot_skips_masked_fields() {
        let schema = layout_schema();
        let mut payload = Vec::new();
        payload.extend_from_slice(&1.0f64.to_le_bytes());
        payload.extend_from_slice(&[1u8, 2u8]);

        // Only fields 0 and 2 present.
        let snapshot = snapshot_for(&schema, vec![0b0000_0101], payload);
        let decoded = decode_snapshot(&schema, &snapshot).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].field.name, "speed");
        assert_eq!(decoded[1].field.name, "pair");
    }

    #[test]
    fn test_decode_snapshot_errors() {
        let schema = layout_schema();

        let wrong_hash = Snapshot {
            schema_hash: schema.hash ^ 1,
            timestamp_ns: 0,
            active_mask: vec![0],
            payload: Vec::new(),
        };
        assert!(matches!(
            decode_snapshot(&schema, &wrong_hash),
            Err(ParseError::WrongSchema { .. })
        ));

        let bad_mask = snapshot_for(&schema, vec![0, 0], Vec::new());
        assert!(matches!(
            decode_snapshot(&schema, &bad_mask),
            Err(ParseError::MaskLength { .. })
        ));

        let truncated = snapshot_for(&schema, vec![0b0000_0001], vec![0u8; 4]);
        assert!(matches!(
            decode_snapshot(&schema, &truncated),
            Err(ParseError::Truncated { .. })
        ));

        let mut payload = 1.0f64.to_le_bytes().to_vec();
        payload.push(0xFF);
        let trailing = snapshot_for(&schema, vec![0b0000_0001], payload);
        assert!(matches!(
            decode_snapshot(&schema, &trailing),
            Err(ParseError::TrailingBytes(1))
        ));
    }
}
