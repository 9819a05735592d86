//! Type-erased references to live program variables.
//!
//! A [`ValueRef`] is the channel's handle to one observed variable: it knows
//! the variable's wire type and shape, can report the exact number of bytes
//! the current value serialises to, and can append those bytes to a buffer.
//! The erasure mirrors the shapes a field can take — scalar, fixed array,
//! dynamic vector, or custom — with the per-type code monomorphised into
//! closures at registration time.
//!
//! # Safety
//!
//! A `ValueRef` stores the raw address of a user-owned variable. The
//! constructors are `unsafe`; the caller promises that the variable
//! outlives the channel holding the reference and is not mutated while a
//! snapshot is being taken. The library upholds its half of the contract by
//! dereferencing the address only inside `take_snapshot`, under the channel
//! lock.

use std::sync::Arc;

use crate::schema::CustomTypeInfo;
use crate::types::BasicType;

/// Serialisation hooks for registering values of a user-defined type.
///
/// Implementations must write exactly [`serialized_size`] bytes in
/// [`serialize`] and return the count written; the channel prefixes every
/// custom payload with that size so readers can skip types they cannot
/// decode.
///
/// [`serialized_size`]: CustomSerializer::serialized_size
/// [`serialize`]: CustomSerializer::serialize
pub trait CustomSerializer<T>: CustomTypeInfo {
    /// Exact byte count `serialize` will produce for `value` right now.
    fn serialized_size(&self, value: &T) -> u32;

    /// Appends the serialised form of `value` to `dst`; returns the number
    /// of bytes written.
    fn serialize(&self, value: &T, dst: &mut Vec<u8>) -> u32;
}

/// Raw address of an observed variable, shared with serialisation closures.
///
/// Safety: the pointee is only dereferenced inside `take_snapshot` while
/// the channel lock is held, and the registration contract requires it to
/// outlive the channel.
#[derive(Clone, Copy)]
struct RawPtr(*const ());

unsafe impl Send for RawPtr {}
unsafe impl Sync for RawPtr {}

type SizeFn = Box<dyn Fn() -> u32 + Send + Sync>;
type WriteFn = Box<dyn Fn(&mut Vec<u8>) -> u32 + Send + Sync>;

/// Type-erased handle to one live variable.
pub struct ValueRef {
    basic_type: BasicType,
    is_vector: bool,
    array_size: u16,
    custom: Option<Arc<dyn CustomTypeInfo>>,
    size_fn: SizeFn,
    write_fn: WriteFn,
}

impl ValueRef {
    /// Reference to a single primitive value.
    ///
    /// # Safety
    ///
    /// `value` must outlive the channel this reference is registered on and
    /// must not be mutated concurrently with `take_snapshot`.
    pub unsafe fn scalar<T: Primitive>(value: *const T) -> Self {
        let ptr = RawPtr(value as *const ());
        Self {
            basic_type: T::BASIC_TYPE,
            is_vector: false,
            array_size: 0,
            custom: None,
            size_fn: Box::new(|| std::mem::size_of::<T>() as u32),
            write_fn: Box::new(move |dst| {
                let ptr = ptr;
                let v = unsafe { *(ptr.0 as *const T) };
                v.write_le(dst);
                std::mem::size_of::<T>() as u32
            }),
        }
    }

    /// Reference to a fixed-length array of primitives.
    ///
    /// # Safety
    ///
    /// Same contract as [`ValueRef::scalar`].
    pub unsafe fn array<T: Primitive, const N: usize>(value: *const [T; N]) -> Self {
        assert!(N <= u16::MAX as usize, "array too long for a schema field");
        let ptr = RawPtr(value as *const ());
        Self {
            basic_type: T::BASIC_TYPE,
            is_vector: true,
            array_size: N as u16,
            custom: None,
            size_fn: Box::new(|| (N * std::mem::size_of::<T>()) as u32),
            write_fn: Box::new(move |dst| {
                let ptr = ptr;
                let array = unsafe { &*(ptr.0 as *const [T; N]) };
                for element in array {
                    element.write_le(dst);
                }
                (N * std::mem::size_of::<T>()) as u32
            }),
        }
    }

    /// Reference to a dynamic vector of primitives; the current length is
    /// serialised as a `u32` prefix on every snapshot.
    ///
    /// # Safety
    ///
    /// Same contract as [`ValueRef::scalar`]; this includes not pushing to
    /// or reallocating the vector while a snapshot is being taken.
    pub unsafe fn vector<T: Primitive>(value: *const Vec<T>) -> Self {
        let ptr = RawPtr(value as *const ());
        Self {
            basic_type: T::BASIC_TYPE,
            is_vector: true,
            array_size: 0,
            custom: None,
            size_fn: Box::new(move || {
                let ptr = ptr;
                let vect = unsafe { &*(ptr.0 as *const Vec<T>) };
                (4 + vect.len() * std::mem::size_of::<T>()) as u32
            }),
            write_fn: Box::new(move |dst| {
                let ptr = ptr;
                let vect = unsafe { &*(ptr.0 as *const Vec<T>) };
                dst.extend_from_slice(&(vect.len() as u32).to_le_bytes());
                for element in vect {
                    element.write_le(dst);
                }
                (4 + vect.len() * std::mem::size_of::<T>()) as u32
            }),
        }
    }

    /// Reference to a single custom-typed value, serialised as
    /// `[u32 size][bytes]`.
    ///
    /// # Safety
    ///
    /// Same contract as [`ValueRef::scalar`].
    pub unsafe fn custom<T, S>(value: *const T, info: Arc<S>) -> Self
    where
        T: 'static,
        S: CustomSerializer<T> + 'static,
    {
        let ptr = RawPtr(value as *const ());
        let size_info = info.clone();
        let write_info = info.clone();
        Self {
            basic_type: BasicType::Other,
            is_vector: false,
            array_size: 0,
            custom: Some(info),
            size_fn: Box::new(move || {
                let ptr = ptr;
                let v = unsafe { &*(ptr.0 as *const T) };
                4 + size_info.serialized_size(v)
            }),
            write_fn: Box::new(move |dst| {
                let ptr = ptr;
                let v = unsafe { &*(ptr.0 as *const T) };
                4 + write_sized(write_info.as_ref(), v, dst)
            }),
        }
    }

    /// Reference to a fixed-length array of custom-typed values; each
    /// element is serialised as `[u32 size][bytes]`.
    ///
    /// # Safety
    ///
    /// Same contract as [`ValueRef::scalar`].
    pub unsafe fn custom_array<T, S, const N: usize>(value: *const [T; N], info: Arc<S>) -> Self
    where
        T: 'static,
        S: CustomSerializer<T> + 'static,
    {
        assert!(N <= u16::MAX as usize, "array too long for a schema field");
        let ptr = RawPtr(value as *const ());
        let size_info = info.clone();
        let write_info = info.clone();
        Self {
            basic_type: BasicType::Other,
            is_vector: true,
            array_size: N as u16,
            custom: Some(info),
            size_fn: Box::new(move || {
                let ptr = ptr;
                let array = unsafe { &*(ptr.0 as *const [T; N]) };
                array
                    .iter()
                    .map(|v| 4 + size_info.serialized_size(v))
                    .sum()
            }),
            write_fn: Box::new(move |dst| {
                let ptr = ptr;
                let array = unsafe { &*(ptr.0 as *const [T; N]) };
                array
                    .iter()
                    .map(|v| 4 + write_sized(write_info.as_ref(), v, dst))
                    .sum()
            }),
        }
    }

    /// Reference to a dynamic vector of custom-typed values: a `u32` length
    /// prefix, then `[u32 size][bytes]` per element.
    ///
    /// # Safety
    ///
    /// Same contract as [`ValueRef::vector`].
    pub unsafe fn custom_vec<T, S>(value: *const Vec<T>, info: Arc<S>) -> Self
    where
        T: 'static,
        S: CustomSerializer<T> + 'static,
    {
        let ptr = RawPtr(value as *const ());
        let size_info = info.clone();
        let write_info = info.clone();
        Self {
            basic_type: BasicType::Other,
            is_vector: true,
            array_size: 0,
            custom: Some(info),
            size_fn: Box::new(move || {
                let ptr = ptr;
                let vect = unsafe { &*(ptr.0 as *const Vec<T>) };
                4 + vect
                    .iter()
                    .map(|v| 4 + size_info.serialized_size(v))
                    .sum::<u32>()
            }),
            write_fn: Box::new(move |dst| {
                let ptr = ptr;
                let vect = unsafe { &*(ptr.0 as *const Vec<T>) };
                dst.extend_from_slice(&(vect.len() as u32).to_le_bytes());
                4 + vect
                    .iter()
                    .map(|v| 4 + write_sized(write_info.as_ref(), v, dst))
                    .sum::<u32>()
            }),
        }
    }

    /// The primary type tag; `Other` for custom types.
    pub fn basic_type(&self) -> BasicType {
        self.basic_type
    }

    /// Whether this reference is an array or vector.
    pub fn is_vector(&self) -> bool {
        self.is_vector
    }

    /// Fixed element count; 0 for scalars and dynamic vectors.
    pub fn array_size(&self) -> u16 {
        self.array_size
    }

    /// Shared custom-type description, if any.
    pub fn custom_type(&self) -> Option<&Arc<dyn CustomTypeInfo>> {
        self.custom.as_ref()
    }

    /// Exact byte count the next [`serialize`](ValueRef::serialize) call
    /// will write. Reads the live value for vectors and custom types.
    pub fn serialized_size(&self) -> u32 {
        (self.size_fn)()
    }

    /// Appends the current value's bytes to `dst`; returns the count
    /// written.
    pub fn serialize(&self, dst: &mut Vec<u8>) -> u32 {
        (self.write_fn)(dst)
    }

    /// Whether two references have the same wire signature: basic type,
    /// shape, and custom type name. Replacing a registered value is only
    /// valid when the signatures match.
    pub fn matches(&self, other: &ValueRef) -> bool {
        self.basic_type == other.basic_type
            && self.is_vector == other.is_vector
            && self.array_size == other.array_size
            && self.custom_type_name() == other.custom_type_name()
    }

    /// Human-readable signature, e.g. `float64`, `int32[]`, `Pose[4]`.
    pub fn signature(&self) -> String {
        let base = match &self.custom {
            Some(custom) => custom.type_name().to_string(),
            None => self.basic_type.as_str().to_string(),
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

    fn custom_type_name(&self) -> Option<&str> {
        self.custom.as_deref().map(CustomTypeInfo::type_name)
    }
}

impl std::fmt::Debug for ValueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueRef")
            .field("signature", &self.signature())
            .finish()
    }
}

/// Serialises one custom value with its `u32` size prefix; returns the
/// payload size excluding the prefix.
fn write_sized<T, S: CustomSerializer<T> + ?Sized>(info: &S, value: &T, dst: &mut Vec<u8>) -> u32 {
    let size = info.serialized_size(value);
    dst.extend_from_slice(&size.to_le_bytes());
    let written = info.serialize(value, dst);
    debug_assert_eq!(written, size, "custom serializer wrote a different size than it declared");
    written
}

mod sealed {
    pub trait Sealed {}
}

/// Primitive value types that map directly onto a [`BasicType`] and
/// serialise as their little-endian byte representation.
///
/// This trait is sealed; the implementations cover exactly the wire-level
/// scalar types.
pub trait Primitive: Copy + Send + Sync + sealed::Sealed + 'static {
    /// The wire type this primitive serialises as.
    const BASIC_TYPE: BasicType;

    /// Appends the little-endian representation to `dst`.
    fn write_le(&self, dst: &mut Vec<u8>);
}

/// Types that can be registered on a channel with `register_value`:
/// primitives, fixed arrays of primitives, and `Vec`s of primitives.
pub trait Observable {
    /// Builds the type-erased reference for a value of this type.
    ///
    /// # Safety
    ///
    /// Same contract as the [`ValueRef`] constructors: the pointee must
    /// outlive the channel and must not be mutated during snapshots.
    unsafe fn value_ref(ptr: *const Self) -> ValueRef;
}

macro_rules! impl_primitive {
    ($($ty:ty => $tag:expr),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Primitive for $ty {
                const BASIC_TYPE: BasicType = $tag;

                fn write_le(&self, dst: &mut Vec<u8>) {
                    dst.extend_from_slice(&self.to_le_bytes());
                }
            }

            impl Observable for $ty {
                unsafe fn value_ref(ptr: *const Self) -> ValueRef {
                    ValueRef::scalar(ptr)
                }
            }
        )*
    };
}

impl_primitive! {
    i8 => BasicType::Int8,
    u8 => BasicType::Uint8,
    i16 => BasicType::Int16,
    u16 => BasicType::Uint16,
    i32 => BasicType::Int32,
    u32 => BasicType::Uint32,
    i64 => BasicType::Int64,
    u64 => BasicType::Uint64,
    f32 => BasicType::Float32,
    f64 => BasicType::Float64,
}

impl sealed::Sealed for bool {}

impl Primitive for bool {
    const BASIC_TYPE: BasicType = BasicType::Bool;

    fn write_le(&self, dst: &mut Vec<u8>) {
        dst.push(u8::from(*self));
    }
}

impl Observable for bool {
    unsafe fn value_ref(ptr: *const Self) -> ValueRef {
        ValueRef::scalar(ptr)
    }
}

impl<T: Primitive, const N: usize> Observable for [T; N] {
    unsafe fn value_ref(ptr: *const Self) -> ValueRef {
        ValueRef::array(ptr)
    }
}

impl<T: Primitive> Observable for Vec<T> {
    unsafe fn value_ref(ptr: *const Self) -> ValueRef {
        ValueRef::vector(ptr)
    }
}
