//! Whole-value encode and decode entry points.

use crate::context::PofContext;
use crate::decode::{PofDecoder, MAX_DEPTH};
use crate::encode::PofEncoder;
use crate::error::{PofError, PofResult};
use crate::reader::ValueDecoder;
use crate::refs::{ReaderRefs, WriterRefs};
use crate::value::PofValue;
use crate::write_buffer::WriteBuffer;
use crate::writer::PofWriter;
use tracing::trace;

/// Encodes one value as a complete, self-describing byte stream.
///
/// A fresh identity table covers exactly this call when the context has
/// reference support enabled.
pub fn encode(ctx: &dyn PofContext, value: &PofValue) -> PofResult<Vec<u8>> {
    let mut buf = WriteBuffer::new();
    let mut enc = PofEncoder::new(&mut buf);
    let mut refs = ctx.reference_enabled().then(WriterRefs::new);
    let mut root = PofWriter::new(&mut enc, ctx, refs.as_mut(), -1, -1, 0, false);
    root.emit_value(-1, value)?;
    let bytes = buf.into_bytes();
    trace!(len = bytes.len(), "encoded value");
    Ok(bytes)
}

/// Decodes one complete value from a byte stream.
///
/// Trailing bytes after the value are a malformed stream.
pub fn decode(ctx: &dyn PofContext, bytes: &[u8]) -> PofResult<PofValue> {
    trace!(len = bytes.len(), "decoding value");
    let mut dec = PofDecoder::new(bytes);
    let mut refs = ctx.reference_enabled().then(ReaderRefs::new);
    let value = ValueDecoder {
        dec: &mut dec,
        ctx,
        refs: refs.as_mut(),
    }
    .read_value(MAX_DEPTH)?;
    let trailing = dec.input().remaining();
    if trailing != 0 {
        return Err(PofError::Format(format!(
            "{} trailing bytes after the value",
            trailing
        )));
    }
    Ok(value)
}
