//! Low-level stream encoder: one wire primitive or structural marker per
//! call.
//!
//! The encoder knows nothing about application types. It tracks only the
//! innermost open complex-value frames, enough to decide whether a value
//! needs a position prefix (user types, sparse arrays), whether its type
//! tag is implied by a uniform container, and whether the frame ends with a
//! `-1` sentinel.

use crate::error::{PofError, PofResult};
use crate::tags::TypeTag;
use crate::value::Zone;
use crate::write_buffer::WriteBuffer;
use rust_decimal::Decimal;

#[derive(Debug)]
enum ComplexKind {
    Plain,
    Uniform(i32),
    UniformMap {
        key: i32,
        value: Option<i32>,
        next_is_key: bool,
    },
}

#[derive(Debug)]
struct Complex {
    positional: bool,
    sentinel: bool,
    kind: ComplexKind,
}

/// Stream encoder over a [`WriteBuffer`].
#[derive(Debug)]
pub struct PofEncoder<'a> {
    out: &'a mut WriteBuffer,
    complex: Vec<Complex>,
    pending_identity: Option<i32>,
}

impl<'a> PofEncoder<'a> {
    /// Creates an encoder over the given sink.
    pub fn new(out: &'a mut WriteBuffer) -> Self {
        Self {
            out,
            complex: Vec::new(),
            pending_identity: None,
        }
    }

    /// Returns true if the next value slot is inside a uniform run and must
    /// therefore be written without a type tag (and without identity
    /// markers).
    pub fn in_uniform_slot(&self) -> bool {
        match self.complex.last().map(|c| &c.kind) {
            Some(ComplexKind::Uniform(_)) => true,
            Some(ComplexKind::UniformMap {
                value, next_is_key, ..
            }) => *next_is_key || value.is_some(),
            _ => false,
        }
    }

    /// Registers an identity for the value about to be written. The marker
    /// is emitted just before that value's tag.
    pub fn register_identity(&mut self, id: i32) -> PofResult<()> {
        if self.pending_identity.is_some() {
            return Err(PofError::Protocol(
                "identity already registered for the next value".to_string(),
            ));
        }
        self.pending_identity = Some(id);
        Ok(())
    }

    /// Starts a value: position prefix when the innermost frame is
    /// positional, then any pending identity marker. Returns the uniform
    /// type implied for this slot, if any.
    fn begin_value(&mut self, pos: i32) -> PofResult<Option<i32>> {
        let uniform = match self.complex.last_mut() {
            None => None,
            Some(frame) => {
                if frame.positional {
                    self.out.write_packed_i32(pos)?;
                }
                match &mut frame.kind {
                    ComplexKind::Plain => None,
                    ComplexKind::Uniform(t) => Some(*t),
                    ComplexKind::UniformMap {
                        key,
                        value,
                        next_is_key,
                    } => {
                        let slot = if *next_is_key { Some(*key) } else { *value };
                        *next_is_key = !*next_is_key;
                        slot
                    }
                }
            }
        };
        if let Some(id) = self.pending_identity.take() {
            if uniform.is_some() {
                return Err(PofError::Protocol(
                    "identity marker inside a uniform container".to_string(),
                ));
            }
            self.out.write_packed_i32(TypeTag::Identity.id())?;
            self.out.write_packed_i32(id)?;
        }
        Ok(uniform)
    }

    fn write_tag(&mut self, uniform: Option<i32>, tag: i32) -> PofResult<()> {
        match uniform {
            Some(t) if t == tag => Ok(()),
            Some(t) => Err(PofError::Protocol(format!(
                "value of type {} in uniform run of type {}",
                tag, t
            ))),
            None => self.out.write_packed_i32(tag),
        }
    }

    /// Emits a null-reference marker.
    pub fn write_null(&mut self, pos: i32) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        if uniform.is_some() {
            return Err(PofError::Protocol(
                "null inside a uniform container".to_string(),
            ));
        }
        self.out.write_packed_i32(TypeTag::Null.id())
    }

    /// Emits a back-reference to a previously assigned identity.
    pub fn write_reference(&mut self, pos: i32, id: i32) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        if uniform.is_some() {
            return Err(PofError::Protocol(
                "back-reference inside a uniform container".to_string(),
            ));
        }
        self.out.write_packed_i32(TypeTag::Reference.id())?;
        self.out.write_packed_i32(id)
    }

    /// Emits a boolean value.
    pub fn write_bool(&mut self, pos: i32, v: bool) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::Boolean.id())?;
        self.out.write_bool(v)
    }

    /// Emits an 8-bit integer.
    pub fn write_i8(&mut self, pos: i32, v: i8) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::Int8.id())?;
        self.out.write_i8(v)
    }

    /// Emits a 16-bit integer.
    pub fn write_i16(&mut self, pos: i32, v: i16) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::Int16.id())?;
        self.out.write_packed_i32(v as i32)
    }

    /// Emits a 32-bit integer.
    pub fn write_i32(&mut self, pos: i32, v: i32) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::Int32.id())?;
        self.out.write_packed_i32(v)
    }

    /// Emits a 64-bit integer.
    pub fn write_i64(&mut self, pos: i32, v: i64) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::Int64.id())?;
        self.out.write_packed_i64(v)
    }

    /// Emits a 128-bit integer.
    pub fn write_i128(&mut self, pos: i32, v: i128) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::Int128.id())?;
        self.out.write_packed_i128(v)
    }

    /// Emits a 32-bit float.
    pub fn write_f32(&mut self, pos: i32, v: f32) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::Float32.id())?;
        self.out.write_f32(v)
    }

    /// Emits a 64-bit float.
    pub fn write_f64(&mut self, pos: i32, v: f64) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::Float64.id())?;
        self.out.write_f64(v)
    }

    /// Emits a packed decimal at the minimal width holding its unscaled
    /// value.
    pub fn write_decimal(&mut self, pos: i32, v: &Decimal) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        let tag = crate::value::decimal_tag(v);
        self.write_tag(uniform, tag.id())?;
        let mantissa = v.mantissa();
        match tag {
            TypeTag::Decimal32 => self.out.write_packed_i32(mantissa as i32)?,
            TypeTag::Decimal64 => self.out.write_packed_i64(mantissa as i64)?,
            _ => self.out.write_packed_i128(mantissa)?,
        }
        self.out.write_packed_i32(v.scale() as i32)
    }

    /// Emits an opaque byte blob.
    pub fn write_octets(&mut self, pos: i32, v: &[u8]) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::OctetString.id())?;
        self.out.write_packed_i32(v.len() as i32)?;
        self.out.write_bytes(v)
    }

    /// Emits a character string.
    pub fn write_string(&mut self, pos: i32, v: &str) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::CharString.id())?;
        self.out.write_string(v)
    }

    fn write_zone(&mut self, zone: Zone) -> PofResult<()> {
        match zone {
            Zone::None => self.out.write_packed_i32(0),
            Zone::Utc => self.out.write_packed_i32(1),
            Zone::Offset { hours, minutes } => {
                self.out.write_packed_i32(2)?;
                self.out.write_packed_i32(hours as i32)?;
                self.out.write_packed_i32(minutes as i32)
            }
        }
    }

    fn write_date_fields(&mut self, year: i32, month: u32, day: u32) -> PofResult<()> {
        self.out.write_packed_i32(year)?;
        self.out.write_packed_i32(month as i32)?;
        self.out.write_packed_i32(day as i32)
    }

    fn write_time_fields(
        &mut self,
        hour: u32,
        minute: u32,
        second: u32,
        nanos: u32,
        zone: Zone,
    ) -> PofResult<()> {
        self.out.write_packed_i32(hour as i32)?;
        self.out.write_packed_i32(minute as i32)?;
        self.out.write_packed_i32(second as i32)?;
        self.out.write_packed_i32(nanos as i32)?;
        self.write_zone(zone)
    }

    /// Emits a calendar date.
    pub fn write_date(&mut self, pos: i32, year: i32, month: u32, day: u32) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::Date.id())?;
        self.write_date_fields(year, month, day)
    }

    /// Emits a time of day with optional zone.
    #[allow(clippy::too_many_arguments)]
    pub fn write_time(
        &mut self,
        pos: i32,
        hour: u32,
        minute: u32,
        second: u32,
        nanos: u32,
        zone: Zone,
    ) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::Time.id())?;
        self.write_time_fields(hour, minute, second, nanos, zone)
    }

    /// Emits a date-time with optional zone.
    #[allow(clippy::too_many_arguments)]
    pub fn write_datetime(
        &mut self,
        pos: i32,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
        nanos: u32,
        zone: Zone,
    ) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::DateTime.id())?;
        self.write_date_fields(year, month, day)?;
        self.write_time_fields(hour, minute, second, nanos, zone)
    }

    /// Emits a year-month interval.
    pub fn write_year_month_interval(
        &mut self,
        pos: i32,
        years: i32,
        months: i32,
    ) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::YearMonthInterval.id())?;
        self.out.write_packed_i32(years)?;
        self.out.write_packed_i32(months)
    }

    /// Emits a time interval.
    pub fn write_time_interval(
        &mut self,
        pos: i32,
        hours: i32,
        minutes: i32,
        seconds: i32,
        nanos: i32,
    ) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::TimeInterval.id())?;
        self.out.write_packed_i32(hours)?;
        self.out.write_packed_i32(minutes)?;
        self.out.write_packed_i32(seconds)?;
        self.out.write_packed_i32(nanos)
    }

    /// Emits a day-time interval.
    #[allow(clippy::too_many_arguments)]
    pub fn write_day_time_interval(
        &mut self,
        pos: i32,
        days: i32,
        hours: i32,
        minutes: i32,
        seconds: i32,
        nanos: i32,
    ) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::DayTimeInterval.id())?;
        self.out.write_packed_i32(days)?;
        self.out.write_packed_i32(hours)?;
        self.out.write_packed_i32(minutes)?;
        self.out.write_packed_i32(seconds)?;
        self.out.write_packed_i32(nanos)
    }

    fn begin_frame(&mut self, positional: bool, sentinel: bool, kind: ComplexKind) {
        self.complex.push(Complex {
            positional,
            sentinel,
            kind,
        });
    }

    /// Begins a heterogeneous array of `count` elements.
    pub fn begin_array(&mut self, pos: i32, count: i32) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::Array.id())?;
        self.out.write_packed_i32(count)?;
        self.begin_frame(false, false, ComplexKind::Plain);
        Ok(())
    }

    /// Begins a uniform array of `count` elements of one declared type.
    pub fn begin_uniform_array(&mut self, pos: i32, count: i32, elem: i32) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::UniformArray.id())?;
        self.out.write_packed_i32(count)?;
        self.out.write_packed_i32(elem)?;
        self.begin_frame(false, false, ComplexKind::Uniform(elem));
        Ok(())
    }

    /// Begins a heterogeneous collection.
    pub fn begin_collection(&mut self, pos: i32, count: i32) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::Collection.id())?;
        self.out.write_packed_i32(count)?;
        self.begin_frame(false, false, ComplexKind::Plain);
        Ok(())
    }

    /// Begins a uniform collection.
    pub fn begin_uniform_collection(&mut self, pos: i32, count: i32, elem: i32) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::UniformCollection.id())?;
        self.out.write_packed_i32(count)?;
        self.out.write_packed_i32(elem)?;
        self.begin_frame(false, false, ComplexKind::Uniform(elem));
        Ok(())
    }

    /// Begins a sparse array with the declared size (last index + 1).
    pub fn begin_sparse_array(&mut self, pos: i32, size: i32) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::SparseArray.id())?;
        self.out.write_packed_i32(size)?;
        self.begin_frame(true, true, ComplexKind::Plain);
        Ok(())
    }

    /// Begins a uniform sparse array.
    pub fn begin_uniform_sparse_array(
        &mut self,
        pos: i32,
        size: i32,
        elem: i32,
    ) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::UniformSparseArray.id())?;
        self.out.write_packed_i32(size)?;
        self.out.write_packed_i32(elem)?;
        self.begin_frame(true, true, ComplexKind::Uniform(elem));
        Ok(())
    }

    /// Begins a map of `count` entries; keys and values alternate.
    pub fn begin_map(&mut self, pos: i32, count: i32) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::Map.id())?;
        self.out.write_packed_i32(count)?;
        self.begin_frame(false, false, ComplexKind::Plain);
        Ok(())
    }

    /// Begins a map whose keys share one declared type.
    pub fn begin_uniform_keys_map(&mut self, pos: i32, count: i32, key: i32) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::UniformKeysMap.id())?;
        self.out.write_packed_i32(count)?;
        self.out.write_packed_i32(key)?;
        self.begin_frame(
            false,
            false,
            ComplexKind::UniformMap {
                key,
                value: None,
                next_is_key: true,
            },
        );
        Ok(())
    }

    /// Begins a map whose keys and values each share one declared type.
    pub fn begin_uniform_map(
        &mut self,
        pos: i32,
        count: i32,
        key: i32,
        value: i32,
    ) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        self.write_tag(uniform, TypeTag::UniformMap.id())?;
        self.out.write_packed_i32(count)?;
        self.out.write_packed_i32(key)?;
        self.out.write_packed_i32(value)?;
        self.begin_frame(
            false,
            false,
            ComplexKind::UniformMap {
                key,
                value: Some(value),
                next_is_key: true,
            },
        );
        Ok(())
    }

    /// Begins a user-type record. Inside a uniform run the type id is
    /// implied and omitted.
    pub fn begin_user_type(&mut self, pos: i32, type_id: i32, version: i32) -> PofResult<()> {
        let uniform = self.begin_value(pos)?;
        match uniform {
            Some(t) if t == type_id => {}
            Some(t) => {
                return Err(PofError::Protocol(format!(
                    "user type {} in uniform run of type {}",
                    type_id, t
                )))
            }
            None => self.out.write_packed_i32(type_id)?,
        }
        self.out.write_packed_i32(version)?;
        self.begin_frame(true, true, ComplexKind::Plain);
        Ok(())
    }

    /// Appends pre-encoded property bytes verbatim (an opaque remainder).
    pub fn write_raw(&mut self, bytes: &[u8]) -> PofResult<()> {
        self.out.write_bytes(bytes)
    }

    /// Ends the innermost open complex value, writing the `-1` sentinel
    /// where the format requires one.
    pub fn end_complex(&mut self) -> PofResult<()> {
        let frame = self.complex.pop().ok_or_else(|| {
            PofError::Protocol("end of complex value with none open".to_string())
        })?;
        if frame.sentinel {
            self.out.write_packed_i32(-1)?;
        }
        Ok(())
    }

    /// Returns true if any complex value is still open.
    pub fn has_open_complex(&self) -> bool {
        !self.complex.is_empty()
    }

    /// Returns the number of open complex frames.
    pub fn frame_depth(&self) -> usize {
        self.complex.len()
    }
}
