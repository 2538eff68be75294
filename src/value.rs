//! The POF data model: wire values and user-type records.

use crate::error::{PofError, PofResult};
use crate::evolvable::Evolvable;
use crate::tags::TypeTag;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Time zone information attached to a time or date-time value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// No zone information.
    None,
    /// Coordinated universal time.
    Utc,
    /// Fixed offset from UTC.
    Offset {
        /// Offset hours, -23..=23.
        hours: i8,
        /// Offset minutes, 0..=59 (sign carried by `hours`).
        minutes: i8,
    },
}

/// An interval expressed in hours through nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeInterval {
    /// Hour component.
    pub hours: i32,
    /// Minute component.
    pub minutes: i32,
    /// Second component.
    pub seconds: i32,
    /// Nanosecond component.
    pub nanos: i32,
}

/// Sparse array contents: index to value, gaps allowed.
pub type SparseEntries = BTreeMap<i32, PofValue>;

/// A single POF wire value.
///
/// Complex variants are `Rc`-wrapped: identity and back-references operate
/// on pointer identity, never on structural equality.
#[derive(Debug, Clone, PartialEq)]
pub enum PofValue {
    /// Null reference.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Signed 8-bit integer.
    Int8(i8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Signed 128-bit integer.
    Int128(i128),
    /// 32-bit floating point.
    Float32(f32),
    /// 64-bit floating point.
    Float64(f64),
    /// Packed decimal; the wire width is the minimal one that holds the
    /// unscaled value.
    Decimal(Decimal),
    /// Opaque byte blob.
    Octets(Vec<u8>),
    /// UTF-8 character string.
    String(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day with optional zone.
    Time {
        /// Time of day.
        time: NaiveTime,
        /// Zone information.
        zone: Zone,
    },
    /// Date and time of day with optional zone.
    DateTime {
        /// Timestamp without zone.
        stamp: NaiveDateTime,
        /// Zone information.
        zone: Zone,
    },
    /// Interval in hours through nanoseconds.
    TimeInterval(TimeInterval),
    /// Interval in years and months.
    YearMonthInterval {
        /// Year component.
        years: i32,
        /// Month component.
        months: i32,
    },
    /// Interval in days through nanoseconds.
    DayTimeInterval {
        /// Day component.
        days: i32,
        /// Sub-day component.
        interval: TimeInterval,
    },
    /// Indexed array, uniform when an element type is declared.
    Array {
        /// Declared element type, if uniform.
        uniform: Option<i32>,
        /// Elements in index order.
        items: Rc<Vec<PofValue>>,
    },
    /// Collection, uniform when an element type is declared.
    Collection {
        /// Declared element type, if uniform.
        uniform: Option<i32>,
        /// Elements in emission order.
        items: Rc<Vec<PofValue>>,
    },
    /// Sparse indexed array.
    SparseArray {
        /// Declared element type, if uniform.
        uniform: Option<i32>,
        /// Index-to-value entries.
        entries: Rc<SparseEntries>,
    },
    /// Key-to-value map; key/value types declared when uniform.
    Map {
        /// Declared key type, if keys are uniform.
        key_type: Option<i32>,
        /// Declared value type, if values are uniform (requires `key_type`).
        value_type: Option<i32>,
        /// Entries in emission order.
        entries: Rc<Vec<(PofValue, PofValue)>>,
    },
    /// User-type instance.
    UserType(Rc<UserTypeRecord>),
}

impl PofValue {
    /// Convenience constructor for a non-uniform array.
    pub fn array(items: Vec<PofValue>) -> Self {
        PofValue::Array {
            uniform: None,
            items: Rc::new(items),
        }
    }

    /// Convenience constructor for a uniform array.
    pub fn uniform_array(element_type: i32, items: Vec<PofValue>) -> Self {
        PofValue::Array {
            uniform: Some(element_type),
            items: Rc::new(items),
        }
    }

    /// Convenience constructor for a non-uniform collection.
    pub fn collection(items: Vec<PofValue>) -> Self {
        PofValue::Collection {
            uniform: None,
            items: Rc::new(items),
        }
    }

    /// Convenience constructor for a non-uniform map.
    pub fn map(entries: Vec<(PofValue, PofValue)>) -> Self {
        PofValue::Map {
            key_type: None,
            value_type: None,
            entries: Rc::new(entries),
        }
    }

    /// Convenience constructor for a string value.
    pub fn string(s: impl Into<String>) -> Self {
        PofValue::String(s.into())
    }

    /// Returns the wire type tag for this value, or an error for `Null`,
    /// which has no type of its own.
    pub fn wire_tag(&self) -> PofResult<i32> {
        let tag = match self {
            PofValue::Null => {
                return Err(PofError::Unsupported(
                    "null has no wire type".to_string(),
                ))
            }
            PofValue::Boolean(_) => TypeTag::Boolean.id(),
            PofValue::Int8(_) => TypeTag::Int8.id(),
            PofValue::Int16(_) => TypeTag::Int16.id(),
            PofValue::Int32(_) => TypeTag::Int32.id(),
            PofValue::Int64(_) => TypeTag::Int64.id(),
            PofValue::Int128(_) => TypeTag::Int128.id(),
            PofValue::Float32(_) => TypeTag::Float32.id(),
            PofValue::Float64(_) => TypeTag::Float64.id(),
            PofValue::Decimal(d) => decimal_tag(d).id(),
            PofValue::Octets(_) => TypeTag::OctetString.id(),
            PofValue::String(_) => TypeTag::CharString.id(),
            PofValue::Date(_) => TypeTag::Date.id(),
            PofValue::Time { .. } => TypeTag::Time.id(),
            PofValue::DateTime { .. } => TypeTag::DateTime.id(),
            PofValue::TimeInterval(_) => TypeTag::TimeInterval.id(),
            PofValue::YearMonthInterval { .. } => TypeTag::YearMonthInterval.id(),
            PofValue::DayTimeInterval { .. } => TypeTag::DayTimeInterval.id(),
            PofValue::Array { uniform: None, .. } => TypeTag::Array.id(),
            PofValue::Array { .. } => TypeTag::UniformArray.id(),
            PofValue::Collection { uniform: None, .. } => TypeTag::Collection.id(),
            PofValue::Collection { .. } => TypeTag::UniformCollection.id(),
            PofValue::SparseArray { uniform: None, .. } => TypeTag::SparseArray.id(),
            PofValue::SparseArray { .. } => TypeTag::UniformSparseArray.id(),
            PofValue::Map {
                key_type: None, ..
            } => TypeTag::Map.id(),
            PofValue::Map {
                value_type: None, ..
            } => TypeTag::UniformKeysMap.id(),
            PofValue::Map { .. } => TypeTag::UniformMap.id(),
            PofValue::UserType(rec) => rec.type_id(),
        };
        Ok(tag)
    }

    /// Returns the heap address used for identity tracking, or `None` for
    /// values that never participate in identity/back-references.
    pub(crate) fn identity_ptr(&self) -> Option<usize> {
        match self {
            PofValue::Array { items, .. } | PofValue::Collection { items, .. } => {
                Some(Rc::as_ptr(items) as usize)
            }
            PofValue::SparseArray { entries, .. } => Some(Rc::as_ptr(entries) as usize),
            PofValue::Map { entries, .. } => Some(Rc::as_ptr(entries) as usize),
            PofValue::UserType(rec) => Some(Rc::as_ptr(rec) as usize),
            _ => None,
        }
    }
}

/// Selects the minimal decimal width holding the unscaled value.
pub(crate) fn decimal_tag(d: &Decimal) -> TypeTag {
    let mantissa = d.mantissa();
    if i32::try_from(mantissa).is_ok() {
        TypeTag::Decimal32
    } else if i64::try_from(mantissa).is_ok() {
        TypeTag::Decimal64
    } else {
        TypeTag::Decimal128
    }
}

/// A user-type instance: type id, version id, ordered indexed properties,
/// and an optional opaque remainder captured from a newer schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserTypeRecord {
    type_id: i32,
    version: i32,
    props: Vec<(i32, PofValue)>,
    remainder: Option<Vec<u8>>,
}

impl UserTypeRecord {
    /// Creates an empty record for the given type and version.
    pub fn new(type_id: i32, version: i32) -> Self {
        Self {
            type_id,
            version,
            props: Vec::new(),
            remainder: None,
        }
    }

    /// Returns the user type identifier.
    pub fn type_id(&self) -> i32 {
        self.type_id
    }

    /// Returns the schema version identifier.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Returns the ordered (index, value) properties.
    pub fn props(&self) -> &[(i32, PofValue)] {
        &self.props
    }

    /// Returns the opaque remainder, if any.
    pub fn remainder(&self) -> Option<&[u8]> {
        self.remainder.as_deref()
    }

    /// Appends a property. Indices must be non-negative and strictly
    /// increasing.
    pub fn push(&mut self, index: i32, value: PofValue) -> PofResult<()> {
        if index < 0 {
            return Err(PofError::Ordering(format!(
                "property index {} is negative",
                index
            )));
        }
        if let Some((last, _)) = self.props.last() {
            if index <= *last {
                return Err(PofError::Ordering(format!(
                    "property index {} does not follow {}",
                    index, last
                )));
            }
        }
        self.props.push((index, value));
        Ok(())
    }

    /// Returns the value at a property index, if present.
    pub fn get(&self, index: i32) -> Option<&PofValue> {
        self.props
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, v)| v)
    }

    /// Wraps this record as a shared `PofValue`.
    pub fn into_value(self) -> PofValue {
        PofValue::UserType(Rc::new(self))
    }
}

impl Evolvable for UserTypeRecord {
    fn data_version(&self) -> i32 {
        self.version
    }

    fn set_data_version(&mut self, version: i32) {
        self.version = version;
    }

    fn future_data(&self) -> Option<&[u8]> {
        self.remainder.as_deref()
    }

    fn set_future_data(&mut self, data: Option<Vec<u8>>) {
        self.remainder = data;
    }
}
