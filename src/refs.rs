//! Identity tables for shared-reference encoding and decoding.
//!
//! A table is created lazily when the context enables reference support and
//! lives for exactly one encode or decode call tree. Identity is heap
//! pointer identity, never structural equality.

use crate::error::{PofError, PofResult};
use crate::value::PofValue;
use std::collections::HashMap;

/// Write-side identity table: heap address to assigned integer, in emission
/// order.
#[derive(Debug, Default)]
pub struct WriterRefs {
    ids: HashMap<usize, i32>,
    next: i32,
}

impl WriterRefs {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identity already assigned to the object, if any.
    pub fn identity_of(&self, ptr: usize) -> Option<i32> {
        self.ids.get(&ptr).copied()
    }

    /// Assigns the next sequential identity to a previously unseen object.
    pub fn assign(&mut self, ptr: usize) -> PofResult<i32> {
        if let Some(id) = self.ids.get(&ptr) {
            return Err(PofError::DuplicateRegistration(format!(
                "object already assigned identity {}",
                id
            )));
        }
        let id = self.next;
        self.next += 1;
        self.ids.insert(ptr, id);
        Ok(id)
    }
}

/// Read-side identity table: assigned integer to the materialized value.
///
/// Lookup clones the value, which for complex variants clones the inner
/// `Rc`, so every alias resolves to the identical allocation.
#[derive(Debug, Default)]
pub struct ReaderRefs {
    values: HashMap<i32, PofValue>,
}

impl ReaderRefs {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a materialized value under an identity from the stream.
    pub fn register(&mut self, id: i32, value: PofValue) -> PofResult<()> {
        if self.values.contains_key(&id) {
            return Err(PofError::DuplicateRegistration(format!(
                "identity {} registered twice in stream",
                id
            )));
        }
        self.values.insert(id, value);
        Ok(())
    }

    /// Resolves a back-reference to the previously materialized value.
    pub fn lookup(&self, id: i32) -> PofResult<PofValue> {
        self.values.get(&id).cloned().ok_or_else(|| {
            PofError::Format(format!("back-reference to unknown identity {}", id))
        })
    }
}
