//! Serializer registry glue.
//!
//! The engine itself never knows how to map a type id to application code;
//! it asks a [`PofContext`] for the serializer. [`SimplePofContext`] is the
//! map-backed implementation used by tests and by callers that assemble
//! their registry by hand.

use crate::error::{PofError, PofResult};
use crate::evolvable::Evolvable;
use crate::reader::PofReader;
use crate::value::UserTypeRecord;
use crate::writer::PofWriter;
use std::collections::HashMap;
use std::sync::Arc;

/// Converts one user type between records and the wire.
pub trait PofSerializer: Send + Sync {
    /// Writes the record's properties in index order and terminates it.
    fn serialize(&self, writer: &mut PofWriter<'_, '_>, record: &UserTypeRecord)
        -> PofResult<()>;

    /// Reads a record from the stream.
    fn deserialize(&self, reader: &mut PofReader<'_, '_>) -> PofResult<UserTypeRecord>;

    /// Returns true if instances of this type carry a schema version and an
    /// opaque remainder across re-encoding. Evolvable values are exempt
    /// from identity tracking.
    fn is_evolvable(&self) -> bool {
        false
    }
}

/// Resolves user type ids to serializers.
pub trait PofContext {
    /// Returns the serializer registered for a type id, or
    /// [`PofError::Unsupported`] when none is.
    fn serializer(&self, type_id: i32) -> PofResult<Arc<dyn PofSerializer>>;

    /// Returns true if identity/back-reference support is enabled.
    fn reference_enabled(&self) -> bool;
}

/// Map-backed [`PofContext`].
#[derive(Default)]
pub struct SimplePofContext {
    serializers: HashMap<i32, Arc<dyn PofSerializer>>,
    reference_enabled: bool,
}

impl SimplePofContext {
    /// Creates an empty context with reference support disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a serializer for a user type id.
    pub fn register_serializer(
        &mut self,
        type_id: i32,
        serializer: Arc<dyn PofSerializer>,
    ) -> PofResult<()> {
        if type_id < 0 {
            return Err(PofError::Protocol(format!(
                "user type id {} is negative",
                type_id
            )));
        }
        if self.serializers.contains_key(&type_id) {
            return Err(PofError::DuplicateRegistration(format!(
                "serializer already registered for type {}",
                type_id
            )));
        }
        self.serializers.insert(type_id, serializer);
        Ok(())
    }

    /// Registers the generic lossless record serializer for a type id.
    pub fn register_record_type(&mut self, type_id: i32) -> PofResult<()> {
        self.register_serializer(type_id, Arc::new(GenericRecordSerializer::new()))
    }

    /// Registers the generic record serializer in evolvable mode.
    pub fn register_evolvable_type(&mut self, type_id: i32) -> PofResult<()> {
        self.register_serializer(type_id, Arc::new(GenericRecordSerializer::evolvable()))
    }

    /// Enables or disables identity/back-reference support.
    pub fn set_reference_enabled(&mut self, enabled: bool) {
        self.reference_enabled = enabled;
    }
}

impl PofContext for SimplePofContext {
    fn serializer(&self, type_id: i32) -> PofResult<Arc<dyn PofSerializer>> {
        self.serializers.get(&type_id).cloned().ok_or_else(|| {
            PofError::Unsupported(format!("no serializer registered for type {}", type_id))
        })
    }

    fn reference_enabled(&self) -> bool {
        self.reference_enabled
    }
}

/// Serializer that round-trips a [`UserTypeRecord`] losslessly: every
/// property through `write_any`/`read_any`, the stored remainder verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericRecordSerializer {
    evolvable: bool,
}

impl GenericRecordSerializer {
    /// Creates the serializer in its plain (non-evolvable) mode.
    pub fn new() -> Self {
        Self { evolvable: false }
    }

    /// Creates the serializer in evolvable mode.
    pub fn evolvable() -> Self {
        Self { evolvable: true }
    }
}

impl PofSerializer for GenericRecordSerializer {
    fn serialize(
        &self,
        writer: &mut PofWriter<'_, '_>,
        record: &UserTypeRecord,
    ) -> PofResult<()> {
        writer.set_version(record.version())?;
        for (index, value) in record.props() {
            writer.write_any(*index, value)?;
        }
        writer.write_remainder(record.remainder())
    }

    fn deserialize(&self, reader: &mut PofReader<'_, '_>) -> PofResult<UserTypeRecord> {
        let mut record = UserTypeRecord::new(reader.type_id(), reader.version());
        while let Some(index) = reader.next_index()? {
            let value = reader.read_any(index)?;
            record.push(index, value)?;
        }
        record.set_future_data(reader.read_remainder()?);
        Ok(record)
    }

    fn is_evolvable(&self) -> bool {
        self.evolvable
    }
}
