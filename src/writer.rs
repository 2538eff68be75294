//! Property writer for one in-progress user-type record.
//!
//! A `PofWriter` is handed to a serializer and accepts properties in
//! strictly increasing index order. The record header (type id and version)
//! is emitted lazily on the first property, so the version can still be set
//! until then. `write_remainder` terminates the record; the generic path
//! auto-closes serializers that return without terminating.

use crate::context::PofContext;
use crate::encode::PofEncoder;
use crate::error::{PofError, PofResult};
use crate::refs::WriterRefs;
use crate::value::{PofValue, TimeInterval, Zone};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotStarted,
    HeaderWritten,
    Terminated,
}

/// Writes the properties of one user-type record.
pub struct PofWriter<'a, 'buf> {
    enc: &'a mut PofEncoder<'buf>,
    ctx: &'a dyn PofContext,
    refs: Option<&'a mut WriterRefs>,
    type_id: i32,
    version: i32,
    pos: i32,
    state: State,
    prev_index: i32,
    evolvable: bool,
    base_depth: usize,
}

impl<'a, 'buf> PofWriter<'a, 'buf> {
    pub(crate) fn new(
        enc: &'a mut PofEncoder<'buf>,
        ctx: &'a dyn PofContext,
        refs: Option<&'a mut WriterRefs>,
        pos: i32,
        type_id: i32,
        version: i32,
        evolvable: bool,
    ) -> Self {
        let base_depth = enc.frame_depth();
        Self {
            enc,
            ctx,
            refs,
            type_id,
            version,
            pos,
            state: State::NotStarted,
            prev_index: -1,
            evolvable,
            base_depth,
        }
    }

    /// Returns the user type identifier of the record being written.
    pub fn type_id(&self) -> i32 {
        self.type_id
    }

    /// Returns the version that will be (or was) written in the header.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Sets the schema version. Legal only before the first property has
    /// been written.
    pub fn set_version(&mut self, version: i32) -> PofResult<()> {
        if self.state != State::NotStarted {
            return Err(PofError::Protocol(
                "version set after the record header was written".to_string(),
            ));
        }
        if version < 0 {
            return Err(PofError::Protocol(format!(
                "negative version: {}",
                version
            )));
        }
        self.version = version;
        Ok(())
    }

    fn ensure_header(&mut self) -> PofResult<()> {
        if self.state == State::NotStarted {
            self.enc
                .begin_user_type(self.pos, self.type_id, self.version)?;
            self.state = State::HeaderWritten;
        }
        Ok(())
    }

    fn begin_prop(&mut self, index: i32) -> PofResult<()> {
        if self.state == State::Terminated {
            return Err(PofError::Protocol(
                "write after the record was terminated".to_string(),
            ));
        }
        if index < 0 {
            return Err(PofError::Ordering(format!(
                "property index {} is negative",
                index
            )));
        }
        if index <= self.prev_index {
            return Err(PofError::Ordering(format!(
                "property index {} does not follow {}",
                index, self.prev_index
            )));
        }
        self.ensure_header()?;
        self.prev_index = index;
        Ok(())
    }

    fn poison_on_transport<T>(&mut self, result: PofResult<T>) -> PofResult<T> {
        if let Err(e) = &result {
            if e.is_transport() {
                self.state = State::Terminated;
            }
        }
        result
    }

    /// Writes a null property.
    pub fn write_null(&mut self, index: i32) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_null(index);
        self.poison_on_transport(r)
    }

    /// Writes a boolean property.
    pub fn write_bool(&mut self, index: i32, v: bool) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_bool(index, v);
        self.poison_on_transport(r)
    }

    /// Writes an 8-bit integer property.
    pub fn write_i8(&mut self, index: i32, v: i8) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_i8(index, v);
        self.poison_on_transport(r)
    }

    /// Writes a 16-bit integer property.
    pub fn write_i16(&mut self, index: i32, v: i16) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_i16(index, v);
        self.poison_on_transport(r)
    }

    /// Writes a 32-bit integer property.
    pub fn write_i32(&mut self, index: i32, v: i32) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_i32(index, v);
        self.poison_on_transport(r)
    }

    /// Writes a 64-bit integer property.
    pub fn write_i64(&mut self, index: i32, v: i64) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_i64(index, v);
        self.poison_on_transport(r)
    }

    /// Writes a 128-bit integer property.
    pub fn write_i128(&mut self, index: i32, v: i128) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_i128(index, v);
        self.poison_on_transport(r)
    }

    /// Writes a 32-bit float property.
    pub fn write_f32(&mut self, index: i32, v: f32) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_f32(index, v);
        self.poison_on_transport(r)
    }

    /// Writes a 64-bit float property.
    pub fn write_f64(&mut self, index: i32, v: f64) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_f64(index, v);
        self.poison_on_transport(r)
    }

    /// Writes a decimal property at the minimal wire width.
    pub fn write_decimal(&mut self, index: i32, v: &Decimal) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_decimal(index, v);
        self.poison_on_transport(r)
    }

    /// Writes an octet-string property.
    pub fn write_octets(&mut self, index: i32, v: &[u8]) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_octets(index, v);
        self.poison_on_transport(r)
    }

    /// Writes a character-string property.
    pub fn write_string(&mut self, index: i32, v: &str) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_string(index, v);
        self.poison_on_transport(r)
    }

    /// Writes a date property.
    pub fn write_date(&mut self, index: i32, v: &NaiveDate) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_date(index, v.year(), v.month(), v.day());
        self.poison_on_transport(r)
    }

    /// Writes a time-of-day property.
    pub fn write_time(&mut self, index: i32, v: &NaiveTime, zone: Zone) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self
            .enc
            .write_time(index, v.hour(), v.minute(), v.second(), v.nanosecond(), zone);
        self.poison_on_transport(r)
    }

    /// Writes a date-time property.
    pub fn write_datetime(&mut self, index: i32, v: &NaiveDateTime, zone: Zone) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_datetime(
            index,
            v.year(),
            v.month(),
            v.day(),
            v.hour(),
            v.minute(),
            v.second(),
            v.nanosecond(),
            zone,
        );
        self.poison_on_transport(r)
    }

    /// Writes a time-interval property.
    pub fn write_time_interval(&mut self, index: i32, v: &TimeInterval) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self
            .enc
            .write_time_interval(index, v.hours, v.minutes, v.seconds, v.nanos);
        self.poison_on_transport(r)
    }

    /// Writes a year-month interval property.
    pub fn write_year_month_interval(
        &mut self,
        index: i32,
        years: i32,
        months: i32,
    ) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.enc.write_year_month_interval(index, years, months);
        self.poison_on_transport(r)
    }

    /// Writes a day-time interval property.
    pub fn write_day_time_interval(
        &mut self,
        index: i32,
        days: i32,
        v: &TimeInterval,
    ) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self
            .enc
            .write_day_time_interval(index, days, v.hours, v.minutes, v.seconds, v.nanos);
        self.poison_on_transport(r)
    }

    /// Writes any value as a property, dispatching on its variant. User
    /// types go through their registered serializer.
    pub fn write_any(&mut self, index: i32, value: &PofValue) -> PofResult<()> {
        self.begin_prop(index)?;
        let r = self.emit_value(index, value);
        self.poison_on_transport(r)
    }

    /// Opens a nested record at the given property index. The child borrows
    /// this writer exclusively; it must be terminated with
    /// `write_remainder` before the parent can continue.
    pub fn begin_nested(&mut self, index: i32, type_id: i32) -> PofResult<PofWriter<'_, 'buf>> {
        self.begin_prop(index)?;
        let evolvable = self.evolvable
            || self
                .ctx
                .serializer(type_id)
                .map(|s| s.is_evolvable())
                .unwrap_or(false);
        Ok(PofWriter::new(
            self.enc,
            self.ctx,
            self.refs.as_deref_mut(),
            index,
            type_id,
            0,
            evolvable,
        ))
    }

    /// Terminates the record: emits the header if no property forced it
    /// yet, appends the opaque remainder verbatim, and writes the sentinel.
    /// Every record must be terminated exactly once.
    pub fn write_remainder(&mut self, remainder: Option<&[u8]>) -> PofResult<()> {
        if self.state == State::Terminated {
            return Err(PofError::Protocol(
                "record already terminated".to_string(),
            ));
        }
        self.ensure_header()?;
        // close any nested records a serializer left open
        while self.enc.frame_depth() > self.base_depth + 1 {
            self.enc.end_complex()?;
        }
        if let Some(bytes) = remainder {
            let r = self.enc.write_raw(bytes);
            self.poison_on_transport(r)?;
        }
        self.enc.end_complex()?;
        self.state = State::Terminated;
        Ok(())
    }

    pub(crate) fn close_if_open(&mut self) -> PofResult<()> {
        if self.state != State::Terminated {
            self.write_remainder(None)?;
        }
        Ok(())
    }

    fn is_evolvable_value(&self, value: &PofValue) -> PofResult<bool> {
        match value {
            PofValue::UserType(rec) => Ok(self.ctx.serializer(rec.type_id())?.is_evolvable()),
            _ => Ok(false),
        }
    }

    /// Returns the element type the container will actually be encoded
    /// with: the declared one, or `None` when a null element forces the
    /// non-uniform encoding. A non-null element of another type is an
    /// error.
    fn effective_uniform<'v>(
        &self,
        declared: Option<i32>,
        values: impl Iterator<Item = &'v PofValue>,
    ) -> PofResult<Option<i32>> {
        let Some(t) = declared else {
            return Ok(None);
        };
        let mut downgrade = false;
        for v in values {
            match v {
                PofValue::Null => downgrade = true,
                other => {
                    let tag = other.wire_tag()?;
                    if tag != t {
                        return Err(PofError::TypeMismatch(format!(
                            "value of type {} in uniform container of type {}",
                            tag, t
                        )));
                    }
                }
            }
        }
        Ok(if downgrade { None } else { Some(t) })
    }

    pub(crate) fn emit_value(&mut self, pos: i32, value: &PofValue) -> PofResult<()> {
        if let PofValue::Null = value {
            return self.enc.write_null(pos);
        }
        if let Some(ptr) = value.identity_ptr() {
            if !self.enc.in_uniform_slot() && !self.evolvable && !self.is_evolvable_value(value)? {
                if let Some(refs) = self.refs.as_deref_mut() {
                    if let Some(id) = refs.identity_of(ptr) {
                        return self.enc.write_reference(pos, id);
                    }
                    let id = refs.assign(ptr)?;
                    self.enc.register_identity(id)?;
                }
            }
        }
        match value {
            PofValue::Null => unreachable!("handled above"),
            PofValue::Boolean(v) => self.enc.write_bool(pos, *v),
            PofValue::Int8(v) => self.enc.write_i8(pos, *v),
            PofValue::Int16(v) => self.enc.write_i16(pos, *v),
            PofValue::Int32(v) => self.enc.write_i32(pos, *v),
            PofValue::Int64(v) => self.enc.write_i64(pos, *v),
            PofValue::Int128(v) => self.enc.write_i128(pos, *v),
            PofValue::Float32(v) => self.enc.write_f32(pos, *v),
            PofValue::Float64(v) => self.enc.write_f64(pos, *v),
            PofValue::Decimal(d) => self.enc.write_decimal(pos, d),
            PofValue::Octets(b) => self.enc.write_octets(pos, b),
            PofValue::String(s) => self.enc.write_string(pos, s),
            PofValue::Date(d) => self.enc.write_date(pos, d.year(), d.month(), d.day()),
            PofValue::Time { time, zone } => self.enc.write_time(
                pos,
                time.hour(),
                time.minute(),
                time.second(),
                time.nanosecond(),
                *zone,
            ),
            PofValue::DateTime { stamp, zone } => self.enc.write_datetime(
                pos,
                stamp.year(),
                stamp.month(),
                stamp.day(),
                stamp.hour(),
                stamp.minute(),
                stamp.second(),
                stamp.nanosecond(),
                *zone,
            ),
            PofValue::TimeInterval(iv) => self
                .enc
                .write_time_interval(pos, iv.hours, iv.minutes, iv.seconds, iv.nanos),
            PofValue::YearMonthInterval { years, months } => {
                self.enc.write_year_month_interval(pos, *years, *months)
            }
            PofValue::DayTimeInterval { days, interval } => self.enc.write_day_time_interval(
                pos,
                *days,
                interval.hours,
                interval.minutes,
                interval.seconds,
                interval.nanos,
            ),
            PofValue::Array { uniform, items } => {
                let elem = self.effective_uniform(*uniform, items.iter())?;
                match elem {
                    Some(t) => self.enc.begin_uniform_array(pos, items.len() as i32, t)?,
                    None => self.enc.begin_array(pos, items.len() as i32)?,
                }
                for (i, item) in items.iter().enumerate() {
                    self.emit_value(i as i32, item)?;
                }
                self.enc.end_complex()
            }
            PofValue::Collection { uniform, items } => {
                let elem = self.effective_uniform(*uniform, items.iter())?;
                match elem {
                    Some(t) => self
                        .enc
                        .begin_uniform_collection(pos, items.len() as i32, t)?,
                    None => self.enc.begin_collection(pos, items.len() as i32)?,
                }
                for (i, item) in items.iter().enumerate() {
                    self.emit_value(i as i32, item)?;
                }
                self.enc.end_complex()
            }
            PofValue::SparseArray { uniform, entries } => {
                if let Some((&first, _)) = entries.iter().next() {
                    if first < 0 {
                        return Err(PofError::IndexRange(format!(
                            "sparse array index {} is negative",
                            first
                        )));
                    }
                }
                let size = match entries.iter().next_back() {
                    Some((&last, _)) if last == i32::MAX => {
                        return Err(PofError::IndexRange(format!(
                            "sparse array index {} leaves no room for the declared size",
                            last
                        )))
                    }
                    Some((&last, _)) => last + 1,
                    None => 0,
                };
                let elem = self.effective_uniform(*uniform, entries.values())?;
                match elem {
                    Some(t) => self.enc.begin_uniform_sparse_array(pos, size, t)?,
                    None => self.enc.begin_sparse_array(pos, size)?,
                }
                for (&k, v) in entries.iter() {
                    self.emit_value(k, v)?;
                }
                self.enc.end_complex()
            }
            PofValue::Map {
                key_type,
                value_type,
                entries,
            } => {
                let declared_kt = *key_type;
                let declared_vt = if declared_kt.is_some() {
                    *value_type
                } else {
                    None
                };
                let kt = self.effective_uniform(declared_kt, entries.iter().map(|(k, _)| k))?;
                let vt = self.effective_uniform(declared_vt, entries.iter().map(|(_, v)| v))?;
                // a null key, or a null value when both types are declared,
                // forces the whole map down to the plain encoding
                let (kt, vt) = if kt.is_none() || (declared_vt.is_some() && vt.is_none()) {
                    (None, None)
                } else {
                    (kt, vt)
                };
                let count = entries.len() as i32;
                match (kt, vt) {
                    (Some(k), Some(v)) => self.enc.begin_uniform_map(pos, count, k, v)?,
                    (Some(k), None) => self.enc.begin_uniform_keys_map(pos, count, k)?,
                    (None, _) => self.enc.begin_map(pos, count)?,
                }
                for (i, (k, v)) in entries.iter().enumerate() {
                    self.emit_value(i as i32, k)?;
                    self.emit_value(i as i32, v)?;
                }
                self.enc.end_complex()
            }
            PofValue::UserType(rec) => {
                let ser = self.ctx.serializer(rec.type_id())?;
                let evolvable = self.evolvable || ser.is_evolvable();
                let mut child = PofWriter::new(
                    self.enc,
                    self.ctx,
                    self.refs.as_deref_mut(),
                    pos,
                    rec.type_id(),
                    rec.version(),
                    evolvable,
                );
                ser.serialize(&mut child, rec)?;
                child.close_if_open()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimplePofContext;
    use crate::tags::TypeTag;
    use crate::write_buffer::WriteBuffer;

    fn with_writer(
        ctx: &SimplePofContext,
        type_id: i32,
        build: impl FnOnce(&mut PofWriter<'_, '_>) -> PofResult<()>,
    ) -> PofResult<Vec<u8>> {
        let mut buf = WriteBuffer::new();
        let mut enc = PofEncoder::new(&mut buf);
        let mut writer = PofWriter::new(&mut enc, ctx, None, -1, type_id, 0, false);
        build(&mut writer)?;
        Ok(buf.into_bytes())
    }

    #[test]
    fn test_monotonic_indices_are_accepted() {
        let ctx = SimplePofContext::new();
        with_writer(&ctx, 100, |w| {
            w.write_i32(0, 1)?;
            w.write_i32(2, 2)?;
            w.write_i32(5, 3)?;
            w.write_remainder(None)
        })
        .unwrap();
    }

    #[test]
    fn test_repeated_index_is_ordering_error() {
        let ctx = SimplePofContext::new();
        let err = with_writer(&ctx, 100, |w| {
            w.write_i32(0, 1)?;
            w.write_i32(2, 2)?;
            w.write_i32(2, 3)
        })
        .unwrap_err();
        assert!(matches!(err, PofError::Ordering(_)));
    }

    #[test]
    fn test_descending_index_is_ordering_error() {
        let ctx = SimplePofContext::new();
        let err = with_writer(&ctx, 100, |w| {
            w.write_i32(2, 1)?;
            w.write_i32(0, 2)
        })
        .unwrap_err();
        assert!(matches!(err, PofError::Ordering(_)));
    }

    #[test]
    fn test_negative_index_is_ordering_error() {
        let ctx = SimplePofContext::new();
        let err = with_writer(&ctx, 100, |w| w.write_i32(-3, 1)).unwrap_err();
        assert!(matches!(err, PofError::Ordering(_)));
    }

    #[test]
    fn test_write_after_termination_is_protocol_error() {
        let ctx = SimplePofContext::new();
        let err = with_writer(&ctx, 100, |w| {
            w.write_i32(0, 1)?;
            w.write_remainder(None)?;
            w.write_i32(1, 2)
        })
        .unwrap_err();
        assert!(matches!(err, PofError::Protocol(_)));
    }

    #[test]
    fn test_double_termination_is_protocol_error() {
        let ctx = SimplePofContext::new();
        let err = with_writer(&ctx, 100, |w| {
            w.write_remainder(None)?;
            w.write_remainder(None)
        })
        .unwrap_err();
        assert!(matches!(err, PofError::Protocol(_)));
    }

    #[test]
    fn test_set_version_after_first_write_is_protocol_error() {
        let ctx = SimplePofContext::new();
        let err = with_writer(&ctx, 100, |w| {
            w.write_i32(0, 1)?;
            w.set_version(2)
        })
        .unwrap_err();
        assert!(matches!(err, PofError::Protocol(_)));
    }

    #[test]
    fn test_header_and_sentinel_bytes() {
        let ctx = SimplePofContext::new();
        let bytes = with_writer(&ctx, 12, |w| {
            w.set_version(3)?;
            w.write_bool(1, true)?;
            w.write_remainder(None)
        })
        .unwrap();

        let mut expected = WriteBuffer::new();
        expected.write_packed_i32(12).unwrap();
        expected.write_packed_i32(3).unwrap();
        expected.write_packed_i32(1).unwrap();
        expected.write_packed_i32(TypeTag::Boolean.id()).unwrap();
        expected.write_bool(true).unwrap();
        expected.write_packed_i32(-1).unwrap();
        assert_eq!(bytes, expected.into_bytes());
    }

    #[test]
    fn test_remainder_bytes_are_appended_verbatim() {
        let ctx = SimplePofContext::new();
        // a property at index 9: [9][Int32 tag][7]
        let mut raw = WriteBuffer::new();
        raw.write_packed_i32(9).unwrap();
        raw.write_packed_i32(TypeTag::Int32.id()).unwrap();
        raw.write_packed_i32(7).unwrap();
        let raw = raw.into_bytes();

        let bytes = with_writer(&ctx, 100, |w| {
            w.write_i32(0, 1)?;
            w.write_remainder(Some(&raw))
        })
        .unwrap();

        let mut expected = WriteBuffer::new();
        expected.write_packed_i32(100).unwrap();
        expected.write_packed_i32(0).unwrap();
        expected.write_packed_i32(0).unwrap();
        expected.write_packed_i32(TypeTag::Int32.id()).unwrap();
        expected.write_packed_i32(1).unwrap();
        expected.write_bytes(&raw).unwrap();
        expected.write_packed_i32(-1).unwrap();
        assert_eq!(bytes, expected.into_bytes());
    }

    #[test]
    fn test_uniform_with_null_downgrades_to_plain_encoding() {
        let ctx = SimplePofContext::new();
        let uniform = PofValue::uniform_array(
            TypeTag::Int32.id(),
            vec![PofValue::Int32(1), PofValue::Null],
        );
        let plain = PofValue::array(vec![PofValue::Int32(1), PofValue::Null]);

        let a = with_writer(&ctx, 100, |w| {
            w.write_any(0, &uniform)?;
            w.write_remainder(None)
        })
        .unwrap();
        let b = with_writer(&ctx, 100, |w| {
            w.write_any(0, &plain)?;
            w.write_remainder(None)
        })
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_uniform_type_mismatch_is_rejected() {
        let ctx = SimplePofContext::new();
        let bad = PofValue::uniform_array(
            TypeTag::Int32.id(),
            vec![PofValue::Int32(1), PofValue::string("x")],
        );
        let err = with_writer(&ctx, 100, |w| w.write_any(0, &bad)).unwrap_err();
        assert!(matches!(err, PofError::TypeMismatch(_)));
    }

    #[test]
    fn test_sparse_negative_key_is_index_range_error() {
        let ctx = SimplePofContext::new();
        let mut entries = crate::value::SparseEntries::new();
        entries.insert(-1, PofValue::Int32(1));
        let sparse = PofValue::SparseArray {
            uniform: None,
            entries: std::rc::Rc::new(entries),
        };
        let err = with_writer(&ctx, 100, |w| w.write_any(0, &sparse)).unwrap_err();
        assert!(matches!(err, PofError::IndexRange(_)));
    }

    #[test]
    fn test_sparse_max_key_is_index_range_error() {
        let ctx = SimplePofContext::new();
        let mut entries = crate::value::SparseEntries::new();
        entries.insert(i32::MAX, PofValue::Int32(1));
        let sparse = PofValue::SparseArray {
            uniform: None,
            entries: std::rc::Rc::new(entries),
        };
        let err = with_writer(&ctx, 100, |w| w.write_any(0, &sparse)).unwrap_err();
        assert!(matches!(err, PofError::IndexRange(_)));
    }

    #[test]
    fn test_uniform_map_mismatch_is_rejected_even_when_a_null_downgrades() {
        let ctx = SimplePofContext::new();
        let bad = PofValue::Map {
            key_type: Some(TypeTag::CharString.id()),
            value_type: Some(TypeTag::Int32.id()),
            entries: std::rc::Rc::new(vec![
                (PofValue::string("a"), PofValue::Null),
                (PofValue::string("b"), PofValue::Int64(2)),
            ]),
        };
        let err = with_writer(&ctx, 100, |w| w.write_any(0, &bad)).unwrap_err();
        assert!(matches!(err, PofError::TypeMismatch(_)));
    }

    fn encode_nested(
        ctx: &SimplePofContext,
        payload: &PofValue,
        refs: Option<&mut WriterRefs>,
    ) -> Vec<u8> {
        let mut buf = WriteBuffer::new();
        let mut enc = PofEncoder::new(&mut buf);
        let mut writer = PofWriter::new(&mut enc, ctx, refs, -1, 1, 0, false);
        {
            let mut child = writer.begin_nested(0, 2).unwrap();
            child.write_any(0, payload).unwrap();
            child.write_remainder(None).unwrap();
        }
        writer.write_remainder(None).unwrap();
        buf.into_bytes()
    }

    #[test]
    fn test_nested_evolvable_child_is_exempt_from_identity() {
        let mut ctx = SimplePofContext::new();
        ctx.register_evolvable_type(2).unwrap();
        let payload = PofValue::array(vec![PofValue::Int32(1)]);

        let mut refs = WriterRefs::new();
        let with_refs = encode_nested(&ctx, &payload, Some(&mut refs));
        let without_refs = encode_nested(&ctx, &payload, None);
        assert_eq!(with_refs, without_refs);
    }

    #[test]
    fn test_nested_records_close_in_lifo_order() {
        let ctx = SimplePofContext::new();
        let bytes = with_writer(&ctx, 1, |w| {
            w.write_i32(0, 7)?;
            {
                let mut child = w.begin_nested(1, 2)?;
                child.write_string(0, "inner")?;
                child.write_remainder(None)?;
            }
            w.write_i32(2, 8)?;
            w.write_remainder(None)
        })
        .unwrap();

        let mut expected = WriteBuffer::new();
        expected.write_packed_i32(1).unwrap(); // outer type
        expected.write_packed_i32(0).unwrap(); // outer version
        expected.write_packed_i32(0).unwrap();
        expected.write_packed_i32(TypeTag::Int32.id()).unwrap();
        expected.write_packed_i32(7).unwrap();
        expected.write_packed_i32(1).unwrap(); // nested at index 1
        expected.write_packed_i32(2).unwrap(); // nested type
        expected.write_packed_i32(0).unwrap(); // nested version
        expected.write_packed_i32(0).unwrap();
        expected.write_packed_i32(TypeTag::CharString.id()).unwrap();
        expected.write_string("inner").unwrap();
        expected.write_packed_i32(-1).unwrap(); // nested sentinel
        expected.write_packed_i32(2).unwrap();
        expected.write_packed_i32(TypeTag::Int32.id()).unwrap();
        expected.write_packed_i32(8).unwrap();
        expected.write_packed_i32(-1).unwrap(); // outer sentinel
        assert_eq!(bytes, expected.into_bytes());
    }
}
