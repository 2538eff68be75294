//! Property reader for one encoded user-type record, and materialization
//! of whole values.
//!
//! The reader mirrors the writer's discipline: properties may be requested
//! in strictly increasing index order only. A requested index the stream
//! does not carry yields the type's default without consuming anything,
//! which is what lets old readers consume data written by newer schemas.

use crate::context::PofContext;
use crate::decode::PofDecoder;
use crate::error::{PofError, PofResult};
use crate::refs::ReaderRefs;
use crate::tags::TypeTag;
use crate::value::{PofValue, SparseEntries, TimeInterval, Zone};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::rc::Rc;

// keeps a hostile count from pre-allocating unbounded memory
const MAX_PREALLOC: usize = 1024;

#[derive(Debug, Clone, Copy)]
enum NextProp {
    /// The next property index has not been read from the stream yet.
    Unread,
    /// The next property index was pre-read; `start` is the byte offset of
    /// its index prefix, for verbatim remainder capture.
    Known { index: i32, start: usize },
    /// The `-1` sentinel was consumed; the record holds nothing further.
    Terminated,
}

/// Reads the properties of one user-type record.
pub struct PofReader<'a, 'de> {
    dec: &'a mut PofDecoder<'de>,
    ctx: &'a dyn PofContext,
    refs: Option<&'a mut ReaderRefs>,
    type_id: i32,
    version: i32,
    depth: usize,
    next_prop: NextProp,
    prev_requested: i32,
    complete: bool,
    poisoned: bool,
    identity: Option<i32>,
}

impl<'a, 'de> PofReader<'a, 'de> {
    /// Creates a reader positioned just past the record's type id; reads
    /// the version.
    pub(crate) fn new(
        dec: &'a mut PofDecoder<'de>,
        ctx: &'a dyn PofContext,
        refs: Option<&'a mut ReaderRefs>,
        type_id: i32,
        depth: usize,
    ) -> PofResult<Self> {
        if depth == 0 {
            return Err(PofError::Format("nesting too deep".to_string()));
        }
        let version = dec.input_mut().read_packed_i32()?;
        if version < 0 {
            return Err(PofError::Format(format!("negative version: {}", version)));
        }
        Ok(Self {
            dec,
            ctx,
            refs,
            type_id,
            version,
            depth,
            next_prop: NextProp::Unread,
            prev_requested: -1,
            complete: false,
            poisoned: false,
            identity: None,
        })
    }

    /// Returns the user type identifier of the record being read.
    pub fn type_id(&self) -> i32 {
        self.type_id
    }

    /// Returns the schema version the record was written with.
    pub fn version(&self) -> i32 {
        self.version
    }

    fn note_transport<T>(&mut self, r: PofResult<T>) -> PofResult<T> {
        if let Err(e) = &r {
            if e.is_transport() {
                self.poisoned = true;
            }
        }
        r
    }

    fn with_guard<T>(&mut self, f: impl FnOnce(&mut Self) -> PofResult<T>) -> PofResult<T> {
        let r = f(self);
        self.note_transport(r)
    }

    fn check_open(&self) -> PofResult<()> {
        if self.poisoned {
            return Err(PofError::Transport(
                "record poisoned by an earlier transport failure".to_string(),
            ));
        }
        if self.complete {
            return Err(PofError::Protocol("record already complete".to_string()));
        }
        Ok(())
    }

    fn load_next(&mut self) -> PofResult<()> {
        if let NextProp::Unread = self.next_prop {
            let start = self.dec.input().position();
            let index = self.dec.read_index()?;
            self.next_prop = match index {
                -1 => NextProp::Terminated,
                i if i < -1 => {
                    return Err(PofError::Format(format!("invalid property index: {}", i)))
                }
                i => NextProp::Known { index: i, start },
            };
        }
        Ok(())
    }

    /// Peeks the index of the next unread property without consuming its
    /// value, or `None` once the sentinel has been reached.
    pub fn next_index(&mut self) -> PofResult<Option<i32>> {
        if self.complete {
            return Ok(None);
        }
        self.with_guard(|r| {
            r.load_next()?;
            Ok(match r.next_prop {
                NextProp::Known { index, .. } => Some(index),
                _ => None,
            })
        })
    }

    /// Positions the cursor for the requested index. Returns true when the
    /// stream carries that exact property (its value is next); false when
    /// the property is absent and the caller owes the default.
    fn advance_to(&mut self, index: i32) -> PofResult<bool> {
        self.check_open()?;
        if index < 0 {
            return Err(PofError::Ordering(format!(
                "property index {} is negative",
                index
            )));
        }
        if index <= self.prev_requested {
            return Err(PofError::Ordering(format!(
                "property index {} does not follow {}",
                index, self.prev_requested
            )));
        }
        self.prev_requested = index;
        loop {
            self.load_next()?;
            match self.next_prop {
                NextProp::Terminated => return Ok(false),
                NextProp::Known { index: i, .. } if i < index => {
                    self.next_prop = NextProp::Unread;
                    self.dec.skip_value()?;
                }
                NextProp::Known { index: i, .. } if i == index => {
                    self.next_prop = NextProp::Unread;
                    return Ok(true);
                }
                NextProp::Known { .. } => return Ok(false),
                NextProp::Unread => unreachable!("load_next always resolves"),
            }
        }
    }

    fn mismatch(found: i32, wanted: TypeTag) -> PofError {
        PofError::TypeMismatch(format!(
            "stream holds type {} where {} was requested",
            found,
            wanted.id()
        ))
    }

    /// Reads a boolean property; absent or null yields `false`.
    pub fn read_bool(&mut self, index: i32) -> PofResult<bool> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(false);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(false),
                t if t == TypeTag::Boolean.id() => r.dec.input_mut().read_bool(),
                t => Err(Self::mismatch(t, TypeTag::Boolean)),
            }
        })
    }

    /// Reads an 8-bit integer property; absent or null yields `0`.
    pub fn read_i8(&mut self, index: i32) -> PofResult<i8> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(0);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(0),
                t if t == TypeTag::Int8.id() => r.dec.input_mut().read_i8(),
                t => Err(Self::mismatch(t, TypeTag::Int8)),
            }
        })
    }

    /// Reads a 16-bit integer property; absent or null yields `0`.
    pub fn read_i16(&mut self, index: i32) -> PofResult<i16> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(0);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(0),
                t if t == TypeTag::Int16.id() => {
                    let v = r.dec.input_mut().read_packed_i32()?;
                    i16::try_from(v)
                        .map_err(|_| PofError::Format(format!("16-bit value out of range: {}", v)))
                }
                t => Err(Self::mismatch(t, TypeTag::Int16)),
            }
        })
    }

    /// Reads a 32-bit integer property; absent or null yields `0`.
    pub fn read_i32(&mut self, index: i32) -> PofResult<i32> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(0);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(0),
                t if t == TypeTag::Int32.id() => r.dec.input_mut().read_packed_i32(),
                t => Err(Self::mismatch(t, TypeTag::Int32)),
            }
        })
    }

    /// Reads a 64-bit integer property; absent or null yields `0`.
    pub fn read_i64(&mut self, index: i32) -> PofResult<i64> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(0);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(0),
                t if t == TypeTag::Int64.id() => r.dec.input_mut().read_packed_i64(),
                t => Err(Self::mismatch(t, TypeTag::Int64)),
            }
        })
    }

    /// Reads a 128-bit integer property; absent or null yields `0`.
    pub fn read_i128(&mut self, index: i32) -> PofResult<i128> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(0);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(0),
                t if t == TypeTag::Int128.id() => r.dec.input_mut().read_packed_i128(),
                t => Err(Self::mismatch(t, TypeTag::Int128)),
            }
        })
    }

    /// Reads a 32-bit float property; absent or null yields `0.0`.
    pub fn read_f32(&mut self, index: i32) -> PofResult<f32> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(0.0);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(0.0),
                t if t == TypeTag::Float32.id() => r.dec.input_mut().read_f32(),
                t => Err(Self::mismatch(t, TypeTag::Float32)),
            }
        })
    }

    /// Reads a 64-bit float property; absent or null yields `0.0`.
    pub fn read_f64(&mut self, index: i32) -> PofResult<f64> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(0.0);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(0.0),
                t if t == TypeTag::Float64.id() => r.dec.input_mut().read_f64(),
                t => Err(Self::mismatch(t, TypeTag::Float64)),
            }
        })
    }

    /// Reads a decimal property; absent or null yields `None`.
    pub fn read_decimal(&mut self, index: i32) -> PofResult<Option<Decimal>> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(None);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(None),
                t if t == TypeTag::Decimal32.id()
                    || t == TypeTag::Decimal64.id()
                    || t == TypeTag::Decimal128.id() =>
                {
                    read_decimal_payload(r.dec, TypeTag::from_id(t)?).map(Some)
                }
                t => Err(Self::mismatch(t, TypeTag::Decimal128)),
            }
        })
    }

    /// Reads an octet-string property; absent or null yields `None`.
    pub fn read_octets(&mut self, index: i32) -> PofResult<Option<Vec<u8>>> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(None);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(None),
                t if t == TypeTag::OctetString.id() => {
                    let len = r.dec.read_count()?;
                    r.dec.input_mut().read_bytes(len as usize).map(Some)
                }
                t => Err(Self::mismatch(t, TypeTag::OctetString)),
            }
        })
    }

    /// Reads a character-string property; absent or null yields `None`.
    pub fn read_string(&mut self, index: i32) -> PofResult<Option<String>> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(None);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(None),
                t if t == TypeTag::CharString.id() => r.dec.input_mut().read_string().map(Some),
                t => Err(Self::mismatch(t, TypeTag::CharString)),
            }
        })
    }

    /// Reads a date property; absent or null yields `None`.
    pub fn read_date(&mut self, index: i32) -> PofResult<Option<NaiveDate>> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(None);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(None),
                t if t == TypeTag::Date.id() => read_date_payload(r.dec).map(Some),
                t => Err(Self::mismatch(t, TypeTag::Date)),
            }
        })
    }

    /// Reads a time property; absent or null yields `None`.
    pub fn read_time(&mut self, index: i32) -> PofResult<Option<(NaiveTime, Zone)>> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(None);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(None),
                t if t == TypeTag::Time.id() => read_time_payload(r.dec).map(Some),
                t => Err(Self::mismatch(t, TypeTag::Time)),
            }
        })
    }

    /// Reads a date-time property; absent or null yields `None`.
    pub fn read_datetime(&mut self, index: i32) -> PofResult<Option<(NaiveDateTime, Zone)>> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(None);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(None),
                t if t == TypeTag::DateTime.id() => read_datetime_payload(r.dec).map(Some),
                t => Err(Self::mismatch(t, TypeTag::DateTime)),
            }
        })
    }

    /// Reads a time-interval property; absent or null yields `None`.
    pub fn read_time_interval(&mut self, index: i32) -> PofResult<Option<TimeInterval>> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(None);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(None),
                t if t == TypeTag::TimeInterval.id() => {
                    read_time_interval_payload(r.dec).map(Some)
                }
                t => Err(Self::mismatch(t, TypeTag::TimeInterval)),
            }
        })
    }

    /// Reads a year-month interval property; absent or null yields `None`.
    pub fn read_year_month_interval(&mut self, index: i32) -> PofResult<Option<(i32, i32)>> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(None);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(None),
                t if t == TypeTag::YearMonthInterval.id() => {
                    let years = r.dec.input_mut().read_packed_i32()?;
                    let months = r.dec.input_mut().read_packed_i32()?;
                    Ok(Some((years, months)))
                }
                t => Err(Self::mismatch(t, TypeTag::YearMonthInterval)),
            }
        })
    }

    /// Reads a day-time interval property; absent or null yields `None`.
    pub fn read_day_time_interval(
        &mut self,
        index: i32,
    ) -> PofResult<Option<(i32, TimeInterval)>> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(None);
            }
            match r.dec.read_tag()? {
                t if t == TypeTag::Null.id() => Ok(None),
                t if t == TypeTag::DayTimeInterval.id() => {
                    let days = r.dec.input_mut().read_packed_i32()?;
                    let iv = read_time_interval_payload(r.dec)?;
                    Ok(Some((days, iv)))
                }
                t => Err(Self::mismatch(t, TypeTag::DayTimeInterval)),
            }
        })
    }

    /// Reads any value as a property; an absent property yields
    /// [`PofValue::Null`].
    pub fn read_any(&mut self, index: i32) -> PofResult<PofValue> {
        self.with_guard(|r| {
            if !r.advance_to(index)? {
                return Ok(PofValue::Null);
            }
            let depth = r.depth;
            ValueDecoder {
                dec: &mut *r.dec,
                ctx: r.ctx,
                refs: r.refs.as_deref_mut(),
            }
            .read_value(depth)
        })
    }

    /// Opens a child reader for a nested record at the given index, or
    /// `None` when the property is absent or null. The child borrows this
    /// reader exclusively and must be driven to completion (its
    /// `read_remainder` or `finish`) before the parent continues.
    ///
    /// When the stream assigned the record an identity, the child consumes
    /// the marker; call [`register_identity`](Self::register_identity) on
    /// the child with the value you built from it so later back-references
    /// resolve. A property that arrives as a back-reference cannot be
    /// streamed and must be read with [`read_any`](Self::read_any) instead.
    pub fn begin_nested(&mut self, index: i32) -> PofResult<Option<PofReader<'_, 'de>>> {
        self.check_open()?;
        let present = self.advance_to(index);
        let present = self.note_transport(present)?;
        if !present {
            return Ok(None);
        }
        let tag = self.dec.read_tag();
        let mut tag = self.note_transport(tag)?;
        let mut identity = None;
        if tag == TypeTag::Identity.id() {
            let id = self.dec.input_mut().read_packed_i32();
            identity = Some(self.note_transport(id)?);
            let next = self.dec.read_tag();
            tag = self.note_transport(next)?;
        }
        if tag == TypeTag::Null.id() {
            return Ok(None);
        }
        if tag == TypeTag::Reference.id() {
            let id = self.dec.input_mut().read_packed_i32();
            let id = self.note_transport(id)?;
            return Err(PofError::Unsupported(format!(
                "property {} is a back-reference to identity {}; resolve it with read_any",
                index, id
            )));
        }
        if tag < 0 {
            return Err(PofError::TypeMismatch(format!(
                "stream holds type {} where a user type was requested",
                tag
            )));
        }
        let mut child = PofReader::new(
            self.dec,
            self.ctx,
            self.refs.as_deref_mut(),
            tag,
            self.depth - 1,
        )?;
        child.identity = identity;
        Ok(Some(child))
    }

    /// Registers the value the caller materialized from this record under
    /// the identity the stream assigned to it, so later back-references
    /// resolve to the same allocation. No-op when the stream carried no
    /// identity marker or reference support is disabled.
    pub fn register_identity(&mut self, value: &PofValue) -> PofResult<()> {
        if let Some(id) = self.identity.take() {
            if let Some(refs) = self.refs.as_deref_mut() {
                refs.register(id, value.clone())?;
            }
        }
        Ok(())
    }

    /// Captures the raw bytes of every property past the highest requested
    /// index, verbatim, and consumes the sentinel. Legal exactly once;
    /// empty remainders come back as `None`.
    pub fn read_remainder(&mut self) -> PofResult<Option<Vec<u8>>> {
        self.check_open()?;
        self.with_guard(|r| {
            r.load_next()?;
            let begin = match r.next_prop {
                NextProp::Terminated => {
                    r.complete = true;
                    return Ok(None);
                }
                NextProp::Known { start, .. } => start,
                NextProp::Unread => unreachable!("load_next always resolves"),
            };
            loop {
                // the index prefix is consumed; skip its value, then look
                // at what follows
                r.next_prop = NextProp::Unread;
                r.dec.skip_value()?;
                let end = r.dec.input().position();
                r.load_next()?;
                if let NextProp::Terminated = r.next_prop {
                    r.complete = true;
                    return Ok(Some(r.dec.input().slice(begin, end).to_vec()));
                }
            }
        })
    }

    /// Consumes the rest of the record if the caller has not; the
    /// remainder, if any, is discarded.
    pub fn finish(&mut self) -> PofResult<()> {
        if !self.complete {
            self.read_remainder()?;
        }
        Ok(())
    }
}

/// Materializes whole tagged values, consulting the registry for user
/// types and the reference table for identities.
pub(crate) struct ValueDecoder<'a, 'de> {
    pub(crate) dec: &'a mut PofDecoder<'de>,
    pub(crate) ctx: &'a dyn PofContext,
    pub(crate) refs: Option<&'a mut ReaderRefs>,
}

impl<'a, 'de> ValueDecoder<'a, 'de> {
    /// Reads one tagged value.
    pub(crate) fn read_value(&mut self, depth: usize) -> PofResult<PofValue> {
        if depth == 0 {
            return Err(PofError::Format("nesting too deep".to_string()));
        }
        let tag = self.dec.read_tag()?;
        if tag == TypeTag::Identity.id() {
            let id = self.dec.input_mut().read_packed_i32()?;
            let value = self.read_value(depth - 1)?;
            match self.refs.as_deref_mut() {
                Some(refs) => refs.register(id, value.clone())?,
                None => {
                    return Err(PofError::Format(
                        "identity marker with reference support disabled".to_string(),
                    ))
                }
            }
            return Ok(value);
        }
        if tag == TypeTag::Reference.id() {
            let id = self.dec.input_mut().read_packed_i32()?;
            return match self.refs.as_deref() {
                Some(refs) => refs.lookup(id),
                None => Err(PofError::Format(
                    "back-reference with reference support disabled".to_string(),
                )),
            };
        }
        self.read_payload(tag, depth)
    }

    /// Reads the payload of a value whose tag is already known (read from
    /// the stream or implied by a uniform container).
    fn read_payload(&mut self, tag: i32, depth: usize) -> PofResult<PofValue> {
        if depth == 0 {
            return Err(PofError::Format("nesting too deep".to_string()));
        }
        if tag >= 0 {
            return self.read_user_type(tag, depth);
        }
        let value = match TypeTag::from_id(tag)? {
            TypeTag::Null => PofValue::Null,
            TypeTag::Boolean => PofValue::Boolean(self.dec.input_mut().read_bool()?),
            TypeTag::Int8 => PofValue::Int8(self.dec.input_mut().read_i8()?),
            TypeTag::Int16 => {
                let v = self.dec.input_mut().read_packed_i32()?;
                PofValue::Int16(i16::try_from(v).map_err(|_| {
                    PofError::Format(format!("16-bit value out of range: {}", v))
                })?)
            }
            TypeTag::Int32 => PofValue::Int32(self.dec.input_mut().read_packed_i32()?),
            TypeTag::Int64 => PofValue::Int64(self.dec.input_mut().read_packed_i64()?),
            TypeTag::Int128 => PofValue::Int128(self.dec.input_mut().read_packed_i128()?),
            TypeTag::Float32 => PofValue::Float32(self.dec.input_mut().read_f32()?),
            TypeTag::Float64 => PofValue::Float64(self.dec.input_mut().read_f64()?),
            TypeTag::Decimal32 | TypeTag::Decimal64 | TypeTag::Decimal128 => {
                PofValue::Decimal(read_decimal_payload(self.dec, TypeTag::from_id(tag)?)?)
            }
            TypeTag::OctetString => {
                let len = self.dec.read_count()?;
                PofValue::Octets(self.dec.input_mut().read_bytes(len as usize)?)
            }
            TypeTag::CharString => PofValue::String(self.dec.input_mut().read_string()?),
            TypeTag::Date => PofValue::Date(read_date_payload(self.dec)?),
            TypeTag::Time => {
                let (time, zone) = read_time_payload(self.dec)?;
                PofValue::Time { time, zone }
            }
            TypeTag::DateTime => {
                let (stamp, zone) = read_datetime_payload(self.dec)?;
                PofValue::DateTime { stamp, zone }
            }
            TypeTag::YearMonthInterval => PofValue::YearMonthInterval {
                years: self.dec.input_mut().read_packed_i32()?,
                months: self.dec.input_mut().read_packed_i32()?,
            },
            TypeTag::TimeInterval => {
                PofValue::TimeInterval(read_time_interval_payload(self.dec)?)
            }
            TypeTag::DayTimeInterval => PofValue::DayTimeInterval {
                days: self.dec.input_mut().read_packed_i32()?,
                interval: read_time_interval_payload(self.dec)?,
            },
            TypeTag::Array => PofValue::Array {
                uniform: None,
                items: Rc::new(self.read_items(None, depth)?),
            },
            TypeTag::UniformArray => {
                let (elem, items) = self.read_uniform_items(depth)?;
                PofValue::Array {
                    uniform: Some(elem),
                    items: Rc::new(items),
                }
            }
            TypeTag::Collection => PofValue::Collection {
                uniform: None,
                items: Rc::new(self.read_items(None, depth)?),
            },
            TypeTag::UniformCollection => {
                let (elem, items) = self.read_uniform_items(depth)?;
                PofValue::Collection {
                    uniform: Some(elem),
                    items: Rc::new(items),
                }
            }
            TypeTag::SparseArray => PofValue::SparseArray {
                uniform: None,
                entries: Rc::new(self.read_sparse_entries(None, depth)?),
            },
            TypeTag::UniformSparseArray => {
                self.dec.read_count()?; // declared size, implied by the keys
                let elem = self.dec.read_tag()?;
                PofValue::SparseArray {
                    uniform: Some(elem),
                    entries: Rc::new(self.read_sparse_entries_with(Some(elem), depth)?),
                }
            }
            TypeTag::Map => {
                let count = self.dec.read_count()? as usize;
                let mut entries = Vec::with_capacity(count.min(MAX_PREALLOC));
                for _ in 0..count {
                    let k = self.read_value(depth - 1)?;
                    let v = self.read_value(depth - 1)?;
                    entries.push((k, v));
                }
                PofValue::Map {
                    key_type: None,
                    value_type: None,
                    entries: Rc::new(entries),
                }
            }
            TypeTag::UniformKeysMap => {
                let count = self.dec.read_count()? as usize;
                let key = self.dec.read_tag()?;
                let mut entries = Vec::with_capacity(count.min(MAX_PREALLOC));
                for _ in 0..count {
                    let k = self.read_payload(key, depth - 1)?;
                    let v = self.read_value(depth - 1)?;
                    entries.push((k, v));
                }
                PofValue::Map {
                    key_type: Some(key),
                    value_type: None,
                    entries: Rc::new(entries),
                }
            }
            TypeTag::UniformMap => {
                let count = self.dec.read_count()? as usize;
                let key = self.dec.read_tag()?;
                let value = self.dec.read_tag()?;
                let mut entries = Vec::with_capacity(count.min(MAX_PREALLOC));
                for _ in 0..count {
                    let k = self.read_payload(key, depth - 1)?;
                    let v = self.read_payload(value, depth - 1)?;
                    entries.push((k, v));
                }
                PofValue::Map {
                    key_type: Some(key),
                    value_type: Some(value),
                    entries: Rc::new(entries),
                }
            }
            TypeTag::Identity | TypeTag::Reference => {
                return Err(PofError::Format(
                    "identity marker inside a uniform container".to_string(),
                ))
            }
        };
        Ok(value)
    }

    fn read_items(&mut self, elem: Option<i32>, depth: usize) -> PofResult<Vec<PofValue>> {
        let count = self.dec.read_count()? as usize;
        let mut items = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            let item = match elem {
                Some(t) => self.read_payload(t, depth - 1)?,
                None => self.read_value(depth - 1)?,
            };
            items.push(item);
        }
        Ok(items)
    }

    fn read_uniform_items(&mut self, depth: usize) -> PofResult<(i32, Vec<PofValue>)> {
        let count = self.dec.read_count()? as usize;
        let elem = self.dec.read_tag()?;
        let mut items = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            items.push(self.read_payload(elem, depth - 1)?);
        }
        Ok((elem, items))
    }

    fn read_sparse_entries(
        &mut self,
        elem: Option<i32>,
        depth: usize,
    ) -> PofResult<SparseEntries> {
        self.dec.read_count()?; // declared size, implied by the keys
        self.read_sparse_entries_with(elem, depth)
    }

    fn read_sparse_entries_with(
        &mut self,
        elem: Option<i32>,
        depth: usize,
    ) -> PofResult<SparseEntries> {
        let mut entries = SparseEntries::new();
        loop {
            let index = self.dec.read_index()?;
            if index == -1 {
                return Ok(entries);
            }
            if index < 0 {
                return Err(PofError::Format(format!(
                    "invalid sparse array index: {}",
                    index
                )));
            }
            let value = match elem {
                Some(t) => self.read_payload(t, depth - 1)?,
                None => self.read_value(depth - 1)?,
            };
            if entries.insert(index, value).is_some() {
                return Err(PofError::Format(format!(
                    "duplicate sparse array index: {}",
                    index
                )));
            }
        }
    }

    fn read_user_type(&mut self, type_id: i32, depth: usize) -> PofResult<PofValue> {
        let ser = self.ctx.serializer(type_id)?;
        let mut reader = PofReader::new(
            self.dec,
            self.ctx,
            self.refs.as_deref_mut(),
            type_id,
            depth,
        )?;
        let rec = ser.deserialize(&mut reader)?;
        reader.finish()?;
        if rec.type_id() != type_id {
            return Err(PofError::Protocol(format!(
                "serializer for type {} produced a record of type {}",
                type_id,
                rec.type_id()
            )));
        }
        Ok(rec.into_value())
    }
}

fn read_zone(dec: &mut PofDecoder<'_>) -> PofResult<Zone> {
    match dec.input_mut().read_packed_i32()? {
        0 => Ok(Zone::None),
        1 => Ok(Zone::Utc),
        2 => {
            let hours = dec.input_mut().read_packed_i32()?;
            let minutes = dec.input_mut().read_packed_i32()?;
            let hours = i8::try_from(hours)
                .map_err(|_| PofError::Format(format!("zone offset hours out of range: {}", hours)))?;
            let minutes = i8::try_from(minutes).map_err(|_| {
                PofError::Format(format!("zone offset minutes out of range: {}", minutes))
            })?;
            Ok(Zone::Offset { hours, minutes })
        }
        z => Err(PofError::Format(format!("invalid zone kind: {}", z))),
    }
}

fn read_date_payload(dec: &mut PofDecoder<'_>) -> PofResult<NaiveDate> {
    let year = dec.input_mut().read_packed_i32()?;
    let month = dec.input_mut().read_packed_i32()?;
    let day = dec.input_mut().read_packed_i32()?;
    let (month, day) = match (u32::try_from(month), u32::try_from(day)) {
        (Ok(m), Ok(d)) => (m, d),
        _ => {
            return Err(PofError::Format(format!(
                "invalid date: {}-{}-{}",
                year, month, day
            )))
        }
    };
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| PofError::Format(format!("invalid date: {}-{}-{}", year, month, day)))
}

fn read_time_payload(dec: &mut PofDecoder<'_>) -> PofResult<(NaiveTime, Zone)> {
    let hour = dec.input_mut().read_packed_i32()?;
    let minute = dec.input_mut().read_packed_i32()?;
    let second = dec.input_mut().read_packed_i32()?;
    let nanos = dec.input_mut().read_packed_i32()?;
    let zone = read_zone(dec)?;
    let time = match (
        u32::try_from(hour),
        u32::try_from(minute),
        u32::try_from(second),
        u32::try_from(nanos),
    ) {
        (Ok(h), Ok(m), Ok(s), Ok(n)) => NaiveTime::from_hms_nano_opt(h, m, s, n),
        _ => None,
    };
    let time = time.ok_or_else(|| {
        PofError::Format(format!(
            "invalid time: {}:{}:{}.{}",
            hour, minute, second, nanos
        ))
    })?;
    Ok((time, zone))
}

fn read_datetime_payload(dec: &mut PofDecoder<'_>) -> PofResult<(NaiveDateTime, Zone)> {
    let date = read_date_payload(dec)?;
    let (time, zone) = read_time_payload(dec)?;
    Ok((NaiveDateTime::new(date, time), zone))
}

fn read_decimal_payload(dec: &mut PofDecoder<'_>, width: TypeTag) -> PofResult<Decimal> {
    let mantissa = match width {
        TypeTag::Decimal32 => i128::from(dec.input_mut().read_packed_i32()?),
        TypeTag::Decimal64 => i128::from(dec.input_mut().read_packed_i64()?),
        _ => dec.input_mut().read_packed_i128()?,
    };
    let scale = dec.input_mut().read_packed_i32()?;
    let scale = u32::try_from(scale)
        .map_err(|_| PofError::Format(format!("negative decimal scale: {}", scale)))?;
    Decimal::try_from_i128_with_scale(mantissa, scale)
        .map_err(|e| PofError::Format(format!("invalid decimal: {}", e)))
}

fn read_time_interval_payload(dec: &mut PofDecoder<'_>) -> PofResult<TimeInterval> {
    Ok(TimeInterval {
        hours: dec.input_mut().read_packed_i32()?,
        minutes: dec.input_mut().read_packed_i32()?,
        seconds: dec.input_mut().read_packed_i32()?,
        nanos: dec.input_mut().read_packed_i32()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimplePofContext;
    use crate::encode::PofEncoder;
    use crate::write_buffer::WriteBuffer;

    fn record_bytes(build: impl FnOnce(&mut PofEncoder<'_>)) -> Vec<u8> {
        let mut buf = WriteBuffer::new();
        let mut enc = PofEncoder::new(&mut buf);
        build(&mut enc);
        buf.into_bytes()
    }

    fn with_reader<T>(
        bytes: &[u8],
        f: impl FnOnce(&mut PofReader<'_, '_>) -> PofResult<T>,
    ) -> PofResult<T> {
        let ctx = SimplePofContext::new();
        let mut dec = PofDecoder::new(bytes);
        let type_id = dec.read_tag()?;
        let mut reader = PofReader::new(&mut dec, &ctx, None, type_id, crate::decode::MAX_DEPTH)?;
        f(&mut reader)
    }

    fn sample_record() -> Vec<u8> {
        record_bytes(|e| {
            e.begin_user_type(-1, 100, 1).unwrap();
            e.write_i32(0, 42).unwrap();
            e.write_string(3, "hello").unwrap();
            e.end_complex().unwrap();
        })
    }

    #[test]
    fn test_reads_present_properties() {
        with_reader(&sample_record(), |r| {
            assert_eq!(r.type_id(), 100);
            assert_eq!(r.version(), 1);
            assert_eq!(r.read_i32(0)?, 42);
            assert_eq!(r.read_string(3)?, Some("hello".to_string()));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_missing_property_yields_default() {
        with_reader(&sample_record(), |r| {
            assert_eq!(r.read_i32(0)?, 42);
            assert_eq!(r.read_i64(1)?, 0); // not in the stream
            assert_eq!(r.read_string(3)?, Some("hello".to_string()));
            assert_eq!(r.read_string(7)?, None); // past the last property
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_unrequested_properties_are_skipped() {
        with_reader(&sample_record(), |r| {
            // jump straight past index 0
            assert_eq!(r.read_string(3)?, Some("hello".to_string()));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_repeated_request_is_ordering_error() {
        let err = with_reader(&sample_record(), |r| {
            r.read_i32(0)?;
            r.read_i32(0)
        })
        .unwrap_err();
        assert!(matches!(err, PofError::Ordering(_)));
    }

    #[test]
    fn test_descending_request_is_ordering_error() {
        let err = with_reader(&sample_record(), |r| {
            r.read_string(3)?;
            r.read_i32(0)
        })
        .unwrap_err();
        assert!(matches!(err, PofError::Ordering(_)));
    }

    #[test]
    fn test_wrong_type_is_mismatch_error() {
        let err = with_reader(&sample_record(), |r| r.read_bool(0)).unwrap_err();
        assert!(matches!(err, PofError::TypeMismatch(_)));
    }

    #[test]
    fn test_next_index_does_not_consume() {
        with_reader(&sample_record(), |r| {
            assert_eq!(r.next_index()?, Some(0));
            assert_eq!(r.next_index()?, Some(0));
            assert_eq!(r.read_i32(0)?, 42);
            assert_eq!(r.next_index()?, Some(3));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_remainder_captures_unread_tail_verbatim() {
        // what the tail looks like on the wire: [3][CharString]["hello"]
        let mut tail = WriteBuffer::new();
        tail.write_packed_i32(3).unwrap();
        tail.write_packed_i32(TypeTag::CharString.id()).unwrap();
        tail.write_string("hello").unwrap();
        let tail = tail.into_bytes();

        with_reader(&sample_record(), |r| {
            assert_eq!(r.read_i32(0)?, 42);
            assert_eq!(r.read_remainder()?, Some(tail.clone()));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_empty_remainder_is_none() {
        with_reader(&sample_record(), |r| {
            r.read_i32(0)?;
            r.read_string(3)?;
            assert_eq!(r.read_remainder()?, None);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_second_remainder_is_protocol_error() {
        let err = with_reader(&sample_record(), |r| {
            r.read_remainder()?;
            r.read_remainder()
        })
        .unwrap_err();
        assert!(matches!(err, PofError::Protocol(_)));
    }

    #[test]
    fn test_truncated_record_poisons_the_reader() {
        let bytes = sample_record();
        let truncated = &bytes[..bytes.len() - 4];
        let err = with_reader(truncated, |r| {
            r.read_i32(0)?;
            r.read_string(3)?;
            r.read_remainder()
        })
        .unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_nested_record_round_trip() {
        let bytes = record_bytes(|e| {
            e.begin_user_type(-1, 1, 0).unwrap();
            e.begin_user_type(0, 2, 0).unwrap();
            e.write_i32(0, 9).unwrap();
            e.end_complex().unwrap();
            e.write_bool(1, true).unwrap();
            e.end_complex().unwrap();
        });
        with_reader(&bytes, |r| {
            {
                let mut child = r.begin_nested(0)?.expect("nested record present");
                assert_eq!(child.type_id(), 2);
                assert_eq!(child.read_i32(0)?, 9);
                child.finish()?;
            }
            assert!(r.read_bool(1)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_nested_reader_consumes_identity_marker() {
        use crate::value::UserTypeRecord;

        let bytes = record_bytes(|e| {
            e.begin_user_type(-1, 1, 0).unwrap();
            e.register_identity(0).unwrap();
            e.begin_user_type(0, 2, 0).unwrap();
            e.write_i32(0, 9).unwrap();
            e.end_complex().unwrap();
            e.end_complex().unwrap();
        });

        let ctx = SimplePofContext::new();
        let mut refs = ReaderRefs::new();
        let mut dec = PofDecoder::new(&bytes);
        let type_id = dec.read_tag().unwrap();
        let mut reader = PofReader::new(
            &mut dec,
            &ctx,
            Some(&mut refs),
            type_id,
            crate::decode::MAX_DEPTH,
        )
        .unwrap();
        {
            let mut child = reader.begin_nested(0).unwrap().expect("nested record present");
            assert_eq!(child.type_id(), 2);
            let mut rec = UserTypeRecord::new(child.type_id(), child.version());
            rec.push(0, PofValue::Int32(child.read_i32(0).unwrap())).unwrap();
            child.register_identity(&rec.into_value()).unwrap();
            child.finish().unwrap();
        }
        reader.finish().unwrap();
        assert!(refs.lookup(0).is_ok());
    }

    #[test]
    fn test_nested_reader_rejects_back_reference() {
        // [index 0][Reference tag][identity 3]
        let bytes = record_bytes(|e| {
            e.begin_user_type(-1, 1, 0).unwrap();
            e.write_raw(&[0x00, 0x3B, 0x06]).unwrap();
            e.end_complex().unwrap();
        });
        let err = with_reader(&bytes, |r| {
            r.begin_nested(0)?;
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, PofError::Unsupported(_)));
    }

    #[test]
    fn test_read_any_materializes_containers() {
        let bytes = record_bytes(|e| {
            e.begin_user_type(-1, 5, 0).unwrap();
            e.begin_uniform_array(0, 2, TypeTag::Int32.id()).unwrap();
            e.write_i32(0, 1).unwrap();
            e.write_i32(1, 2).unwrap();
            e.end_complex().unwrap();
            e.end_complex().unwrap();
        });
        with_reader(&bytes, |r| {
            let v = r.read_any(0)?;
            assert_eq!(
                v,
                PofValue::uniform_array(
                    TypeTag::Int32.id(),
                    vec![PofValue::Int32(1), PofValue::Int32(2)]
                )
            );
            Ok(())
        })
        .unwrap();
    }
}
