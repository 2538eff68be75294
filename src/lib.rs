//! POF (Portable Object Format): a self-describing binary object format
//! for distributed-cache payloads.
//!
//! Every encoded value carries its own type information, so a stream can be
//! decoded without the class that produced it. User types are numbered,
//! versioned records whose properties are written in strictly increasing
//! index order; readers built against an older schema skip what they do not
//! know and get defaults for what the stream does not carry, which is what
//! lets schemas evolve in both directions.
//!
//! The layers, bottom up:
//!
//! - [`write_buffer`]/[`read_buffer`]: packed integers and raw primitives.
//! - [`encode`]/[`decode`]: tag-aware stream handlers, no type registry.
//! - [`writer`]/[`reader`]: the property engines serializers program
//!   against.
//! - [`context`]: the serializer registry; [`codec`]: whole-value entry
//!   points.

#![warn(missing_docs)]

pub mod codec;
pub mod context;
pub mod decode;
pub mod encode;
pub mod error;
pub mod evolvable;
pub mod reader;
pub mod read_buffer;
pub mod refs;
pub mod tags;
pub mod value;
pub mod write_buffer;
pub mod writer;

pub use codec::{decode as decode_value, encode as encode_value};
pub use context::{GenericRecordSerializer, PofContext, PofSerializer, SimplePofContext};
pub use error::{PofError, PofResult};
pub use evolvable::{Evolvable, EvolvableHolder};
pub use reader::PofReader;
pub use tags::TypeTag;
pub use value::{PofValue, SparseEntries, TimeInterval, UserTypeRecord, Zone};
pub use writer::PofWriter;
