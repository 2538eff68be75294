//! Schema-evolution tests: an old reader must carry a newer writer's data
//! through unchanged.

use pof_core::codec::{decode, encode};
use pof_core::{
    Evolvable, PofReader, PofResult, PofSerializer, PofValue, PofWriter, SimplePofContext,
    UserTypeRecord,
};
use std::sync::Arc;

const PERSON: i32 = 10;

/// A serializer compiled against schema v1: it only knows properties 0
/// (name) and 1 (age). Everything past that travels in the remainder.
struct PersonV1;

impl PofSerializer for PersonV1 {
    fn serialize(
        &self,
        writer: &mut PofWriter<'_, '_>,
        record: &UserTypeRecord,
    ) -> PofResult<()> {
        writer.set_version(record.version())?;
        if let Some(name) = record.get(0) {
            writer.write_any(0, name)?;
        }
        if let Some(age) = record.get(1) {
            writer.write_any(1, age)?;
        }
        writer.write_remainder(record.remainder())
    }

    fn deserialize(&self, reader: &mut PofReader<'_, '_>) -> PofResult<UserTypeRecord> {
        let mut record = UserTypeRecord::new(reader.type_id(), reader.version());
        record.push(0, reader.read_any(0)?)?;
        record.push(1, reader.read_any(1)?)?;
        record.set_future_data(reader.read_remainder()?);
        Ok(record)
    }

    fn is_evolvable(&self) -> bool {
        true
    }
}

fn v2_context() -> SimplePofContext {
    let mut ctx = SimplePofContext::new();
    ctx.register_evolvable_type(PERSON).unwrap();
    ctx
}

fn v1_context() -> SimplePofContext {
    let mut ctx = SimplePofContext::new();
    ctx.register_serializer(PERSON, Arc::new(PersonV1)).unwrap();
    ctx
}

fn v2_person() -> PofValue {
    let mut rec = UserTypeRecord::new(PERSON, 2);
    rec.push(0, PofValue::string("alice")).unwrap();
    rec.push(1, PofValue::Int32(30)).unwrap();
    rec.push(5, PofValue::Float64(1.72)).unwrap();
    rec.push(7, PofValue::string("added in v2")).unwrap();
    rec.into_value()
}

#[test]
fn test_old_reader_preserves_new_data_byte_for_byte() {
    let v2_bytes = encode(&v2_context(), &v2_person()).unwrap();

    // decode with the v1 serializer: known properties materialize, the
    // rest lands in the remainder
    let ctx_v1 = v1_context();
    let carried = decode(&ctx_v1, &v2_bytes).unwrap();
    let rec = match &carried {
        PofValue::UserType(rec) => rec,
        other => panic!("expected a user type, got {:?}", other),
    };
    assert_eq!(rec.version(), 2);
    assert_eq!(rec.get(0), Some(&PofValue::string("alice")));
    assert_eq!(rec.get(1), Some(&PofValue::Int32(30)));
    assert!(rec.remainder().is_some());

    // re-encoding through the v1 serializer reproduces the v2 stream
    // exactly: same version, same unknown trailing properties
    let re_encoded = encode(&ctx_v1, &carried).unwrap();
    assert_eq!(re_encoded, v2_bytes);
}

#[test]
fn test_carried_data_survives_a_full_cycle_back_to_v2() {
    let v2_bytes = encode(&v2_context(), &v2_person()).unwrap();
    let ctx_v1 = v1_context();

    let carried = decode(&ctx_v1, &v2_bytes).unwrap();
    let re_encoded = encode(&ctx_v1, &carried).unwrap();

    // a v2 reader sees every property again
    let restored = decode(&v2_context(), &re_encoded).unwrap();
    assert_eq!(restored, v2_person());
}

#[test]
fn test_same_version_round_trip_has_empty_remainder() {
    let ctx_v1 = v1_context();
    let mut rec = UserTypeRecord::new(PERSON, 1);
    rec.push(0, PofValue::string("bob")).unwrap();
    rec.push(1, PofValue::Int32(40)).unwrap();
    let bytes = encode(&ctx_v1, &rec.clone().into_value()).unwrap();

    let back = decode(&ctx_v1, &bytes).unwrap();
    match &back {
        PofValue::UserType(rec) => {
            assert_eq!(rec.version(), 1);
            assert_eq!(rec.remainder(), None);
        }
        other => panic!("expected a user type, got {:?}", other),
    }
}

#[test]
fn test_missing_properties_read_as_defaults_in_old_reader() {
    // v2 writes only the new property; v1 still decodes
    let mut rec = UserTypeRecord::new(PERSON, 2);
    rec.push(5, PofValue::Float64(9.9)).unwrap();
    let bytes = encode(&v2_context(), &rec.into_value()).unwrap();

    let carried = decode(&v1_context(), &bytes).unwrap();
    match &carried {
        PofValue::UserType(rec) => {
            // properties 0 and 1 were absent upstream of index 5
            assert_eq!(rec.get(0), Some(&PofValue::Null));
            assert_eq!(rec.get(1), Some(&PofValue::Null));
            assert!(rec.remainder().is_some());
        }
        other => panic!("expected a user type, got {:?}", other),
    }
}
