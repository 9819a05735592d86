//! Error handling for statetap
//!
//! This module defines the error types returned at the library boundary and
//! a `Result` alias used throughout the crate.
//!
//! Registration errors ([`ChannelError`]) are reported synchronously to the
//! caller and never change channel state. Errors on the sink side of the
//! pipeline are not surfaced here at all: a full queue or a failing sink is
//! counted and swallowed, and `take_snapshot` reports it only through its
//! boolean return value.

use thiserror::Error;

/// Errors returned by channel registration operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// A value was registered under an existing name with a different
    /// type signature (basic type, scalar/array/vector shape, or custom
    /// type name).
    #[error("type mismatch for field '{name}': registered as '{registered}', new value is '{requested}'")]
    TypeMismatch {
        /// The field name that was re-registered.
        name: String,
        /// Signature of the field already in the schema (e.g. `float64[4]`).
        registered: String,
        /// Signature of the rejected value.
        requested: String,
    },

    /// A brand-new field name was registered after the first snapshot
    /// froze the schema.
    #[error("schema of channel '{channel}' is locked after the first snapshot; cannot add field '{name}'")]
    SchemaLocked {
        /// The channel whose schema is frozen.
        channel: String,
        /// The rejected field name.
        name: String,
    },
}

/// Errors returned when parsing a textual schema or decoding a snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A line in the textual schema could not be parsed as a header or a
    /// field declaration.
    #[error("schema line {line}: {message}")]
    InvalidSchemaLine {
        /// 1-based line number in the input text.
        line: usize,
        /// Description of what was wrong with the line.
        message: String,
    },

    /// The same field name appeared twice in one schema.
    #[error("duplicate field name '{0}' in schema")]
    DuplicateField(String),

    /// The `__hash__` header did not match the hash recomputed from the
    /// parsed fields.
    #[error("declared schema hash {declared} does not match computed hash {computed}")]
    HashMismatch {
        /// Hash read from the `__hash__` header.
        declared: u64,
        /// Hash recomputed from the parsed field list.
        computed: u64,
    },

    /// The snapshot's schema hash does not belong to the schema used to
    /// decode it.
    #[error("snapshot carries schema hash {snapshot}, schema hash is {schema}")]
    WrongSchema {
        /// Hash stored in the snapshot.
        snapshot: u64,
        /// Hash of the schema handed to the decoder.
        schema: u64,
    },

    /// The active mask is shorter or longer than the field count requires.
    #[error("active mask is {actual} bytes, schema with {fields} fields needs {expected}")]
    MaskLength {
        /// Number of fields in the schema.
        fields: usize,
        /// Expected mask length in bytes.
        expected: usize,
        /// Actual mask length in bytes.
        actual: usize,
    },

    /// The payload (or an encoded snapshot record) ended before a field
    /// was fully read.
    #[error("input truncated while reading '{context}'")]
    Truncated {
        /// What was being read when the bytes ran out.
        context: String,
    },

    /// The payload contained more bytes than the active fields account for.
    #[error("payload has {0} trailing bytes after the last active field")]
    TrailingBytes(usize),
}

/// Result type alias for statetap operations.
pub type Result<T, E = ChannelError> = std::result::Result<T, E>;
