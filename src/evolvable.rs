//! Forward/backward schema compatibility support.

/// A value that survives schema evolution.
///
/// An evolvable object carries the version identifier of the schema it was
/// read from and an opaque remainder holding any properties that schema
/// knows but this code does not. Re-emitting the object writes the stored
/// version and remainder back verbatim, so data from a newer schema is
/// neither lost nor misinterpreted.
pub trait Evolvable {
    /// Returns the version identifier of this object's data.
    fn data_version(&self) -> i32;

    /// Sets the version identifier of this object's data.
    fn set_data_version(&mut self, version: i32);

    /// Returns the opaque remainder captured from a newer schema, if any.
    fn future_data(&self) -> Option<&[u8]>;

    /// Stores the opaque remainder captured during deserialization.
    fn set_future_data(&mut self, data: Option<Vec<u8>>);
}

/// A standalone holder for evolvable state, for types that embed it rather
/// than track version and remainder themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvolvableHolder {
    version: i32,
    future_data: Option<Vec<u8>>,
}

impl EvolvableHolder {
    /// Creates a holder at the given implementation version.
    pub fn new(version: i32) -> Self {
        Self {
            version,
            future_data: None,
        }
    }
}

impl Evolvable for EvolvableHolder {
    fn data_version(&self) -> i32 {
        self.version
    }

    fn set_data_version(&mut self, version: i32) {
        self.version = version;
    }

    fn future_data(&self) -> Option<&[u8]> {
        self.future_data.as_deref()
    }

    fn set_future_data(&mut self, data: Option<Vec<u8>>) {
        self.future_data = data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holder_round_trip() {
        let mut holder = EvolvableHolder::new(1);
        assert_eq!(holder.data_version(), 1);
        assert_eq!(holder.future_data(), None);

        holder.set_data_version(2);
        holder.set_future_data(Some(vec![0xAB, 0xCD]));
        assert_eq!(holder.data_version(), 2);
        assert_eq!(holder.future_data(), Some(&[0xAB, 0xCD][..]));

        holder.set_future_data(None);
        assert_eq!(holder.future_data(), None);
    }
}
