//! Wire-level type tags.
//!
//! Built-in types use negative tags; a non-negative tag is a user type id.

use crate::error::{PofError, PofResult};

/// Built-in wire type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TypeTag {
    /// Signed 8-bit integer.
    Int8 = -1,
    /// Signed 16-bit integer.
    Int16 = -2,
    /// Signed 32-bit integer.
    Int32 = -3,
    /// Signed 64-bit integer.
    Int64 = -4,
    /// Signed 128-bit integer.
    Int128 = -5,
    /// 32-bit floating point.
    Float32 = -6,
    /// 64-bit floating point.
    Float64 = -7,
    /// Packed decimal with a 32-bit unscaled value.
    Decimal32 = -8,
    /// Packed decimal with a 64-bit unscaled value.
    Decimal64 = -9,
    /// Packed decimal with a 128-bit unscaled value.
    Decimal128 = -10,
    /// Boolean value.
    Boolean = -11,
    /// Opaque byte blob.
    OctetString = -12,
    /// UTF-8 character string.
    CharString = -13,
    /// Calendar date.
    Date = -14,
    /// Time of day, optionally zoned.
    Time = -15,
    /// Date and time of day, optionally zoned.
    DateTime = -16,
    /// Interval expressed in years and months.
    YearMonthInterval = -17,
    /// Interval expressed in hours through nanoseconds.
    TimeInterval = -18,
    /// Interval expressed in days through nanoseconds.
    DayTimeInterval = -19,
    /// Indexed array of heterogeneous values.
    Array = -20,
    /// Indexed array of values sharing one type.
    UniformArray = -21,
    /// Unordered collection of heterogeneous values.
    Collection = -22,
    /// Unordered collection of values sharing one type.
    UniformCollection = -23,
    /// Index-to-value array with gaps allowed.
    SparseArray = -24,
    /// Sparse array of values sharing one type.
    UniformSparseArray = -25,
    /// Key-to-value map.
    Map = -26,
    /// Map whose keys share one type.
    UniformKeysMap = -27,
    /// Map whose keys and values each share one type.
    UniformMap = -28,
    /// Marker assigning an identity to the value that follows.
    Identity = -29,
    /// Back-reference to a previously assigned identity.
    Reference = -30,
    /// Null reference.
    Null = -31,
}

impl TypeTag {
    /// Creates a `TypeTag` from its wire representation.
    pub fn from_id(id: i32) -> PofResult<Self> {
        match id {
            -1 => Ok(Self::Int8),
            -2 => Ok(Self::Int16),
            -3 => Ok(Self::Int32),
            -4 => Ok(Self::Int64),
            -5 => Ok(Self::Int128),
            -6 => Ok(Self::Float32),
            -7 => Ok(Self::Float64),
            -8 => Ok(Self::Decimal32),
            -9 => Ok(Self::Decimal64),
            -10 => Ok(Self::Decimal128),
            -11 => Ok(Self::Boolean),
            -12 => Ok(Self::OctetString),
            -13 => Ok(Self::CharString),
            -14 => Ok(Self::Date),
            -15 => Ok(Self::Time),
            -16 => Ok(Self::DateTime),
            -17 => Ok(Self::YearMonthInterval),
            -18 => Ok(Self::TimeInterval),
            -19 => Ok(Self::DayTimeInterval),
            -20 => Ok(Self::Array),
            -21 => Ok(Self::UniformArray),
            -22 => Ok(Self::Collection),
            -23 => Ok(Self::UniformCollection),
            -24 => Ok(Self::SparseArray),
            -25 => Ok(Self::UniformSparseArray),
            -26 => Ok(Self::Map),
            -27 => Ok(Self::UniformKeysMap),
            -28 => Ok(Self::UniformMap),
            -29 => Ok(Self::Identity),
            -30 => Ok(Self::Reference),
            -31 => Ok(Self::Null),
            _ => Err(PofError::Format(format!("unknown type tag: {}", id))),
        }
    }

    /// Returns the wire representation of this tag.
    pub fn id(&self) -> i32 {
        *self as i32
    }

    /// Returns true if this tag opens a complex (container) value.
    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            Self::Array
                | Self::UniformArray
                | Self::Collection
                | Self::UniformCollection
                | Self::SparseArray
                | Self::UniformSparseArray
                | Self::Map
                | Self::UniformKeysMap
                | Self::UniformMap
        )
    }
}
