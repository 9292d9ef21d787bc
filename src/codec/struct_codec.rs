//! The Struct Codec Engine (spec §4.5): generic read (struct-begin, loop
//! reading fields and skipping unknowns/mismatched-type fields, validate
//! required, construct) and generic write (struct-begin, id-ordered
//! extract-and-emit, field-stop, struct-end), plus union cardinality
//! enforcement on both paths (spec §4.3, §4.5, §8).

use std::any::Any;
use std::sync::Arc;

use super::{Codec, CodecRegistry, CoercedCodec};
use crate::{
    metadata::{Category, ConstructionPlan, DecodedValue, FieldMetadata, Injection, Requiredness, StructMetadata},
    thrift::{TStructIdentifier, TType},
    wire::{ProtocolReader, ProtocolWriter},
    CodecError, CodecErrorKind,
};

struct CodecField {
    id: i16,
    name: &'static str,
    requiredness: Requiredness,
    injections: Vec<Injection>,
    extraction: Option<Arc<dyn Fn(&(dyn Any + Send)) -> Option<DecodedValue> + Send + Sync>>,
    default: Option<Arc<dyn Fn() -> DecodedValue + Send + Sync>>,
    codec: Arc<dyn Codec>,
}

pub struct StructCodec {
    name: &'static str,
    category: Category,
    /// Sorted by id, same order as `StructMetadata::fields`.
    fields: Vec<CodecField>,
    construction: ConstructionPlan,
}

impl StructCodec {
    pub fn build(metadata: &StructMetadata, registry: &CodecRegistry) -> Result<Self, CodecError> {
        let mut fields = Vec::with_capacity(metadata.fields.len());
        for field in &metadata.fields {
            fields.push(build_field(field, registry)?);
        }
        Ok(StructCodec {
            name: metadata.name,
            category: metadata.category,
            fields,
            construction: metadata.construction.clone(),
        })
    }

    fn field_index_by_id(&self, id: i16) -> Option<usize> {
        self.fields.iter().position(|f| f.id == id)
    }

    fn construct(&self, mut slots: Vec<Option<DecodedValue>>) -> Result<DecodedValue, CodecError> {
        match &self.construction {
            ConstructionPlan::Constructor(ctor) => {
                let mut args: Vec<Option<DecodedValue>> = Vec::new();
                for (idx, field) in self.fields.iter().enumerate() {
                    for inj in &field.injections {
                        if let Injection::ConstructorArg(position) = inj {
                            if args.len() <= *position {
                                args.resize_with(*position + 1, || None);
                            }
                            let value = match slots[idx].take() {
                                Some(v) => v,
                                None => match &field.default {
                                    Some(default) => default(),
                                    None => {
                                        return Err(CodecError::metadata(format!(
                                            "{}: field {} missing for constructor and has no default",
                                            self.name, field.name
                                        )))
                                    }
                                },
                            };
                            args[*position] = Some(value);
                        }
                    }
                }
                let args: Vec<DecodedValue> = args
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| {
                        v.ok_or_else(|| {
                            CodecError::metadata(format!(
                                "{}: no field maps to constructor argument {}",
                                self.name, i
                            ))
                        })
                    })
                    .collect::<Result<_, _>>()?;
                Ok(ctor(args))
            }
            ConstructionPlan::Builder { new_builder, build } => {
                let mut instance = new_builder();
                self.inject_in_id_order(&mut instance, &mut slots)?;
                Ok(build(instance))
            }
            ConstructionPlan::DefaultAndInject(new_default) => {
                let mut instance = new_default();
                self.inject_in_id_order(&mut instance, &mut slots)?;
                Ok(instance)
            }
            ConstructionPlan::FromUnionField(ctor) => {
                let (idx, value) = slots
                    .into_iter()
                    .enumerate()
                    .find_map(|(idx, slot)| slot.map(|v| (idx, v)))
                    .ok_or_else(|| CodecError::union_cardinality(0))?;
                Ok(ctor(self.fields[idx].id, value))
            }
        }
    }

    fn inject_in_id_order(
        &self,
        instance: &mut DecodedValue,
        slots: &mut [Option<DecodedValue>],
    ) -> Result<(), CodecError> {
        for (idx, field) in self.fields.iter().enumerate() {
            let Some(value) = slots[idx].take() else { continue };
            for inj in &field.injections {
                match inj {
                    Injection::ConstructorArg(_) => {}
                    Injection::Setter(apply) | Injection::DirectSet(apply) => {
                        // Each injected value is consumed once; a field
                        // with more than one non-constructor injection
                        // would need the value cloned, which this engine
                        // doesn't support (hand-authored descriptors are
                        // expected to register exactly one).
                        apply(instance.as_mut(), value);
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

fn build_field(field: &FieldMetadata, registry: &CodecRegistry) -> Result<CodecField, CodecError> {
    let base = registry.get_or_build(&field.ttype)?;
    let codec: Arc<dyn Codec> = match &field.coercion {
        Some(coercion) => Arc::new(CoercedCodec::new(base, coercion.clone())),
        None => base,
    };
    Ok(CodecField {
        id: field.id,
        name: field.name,
        requiredness: field.requiredness,
        injections: field.injections.clone(),
        extraction: field.extraction.clone(),
        default: field.default.clone(),
        codec,
    })
}

impl Codec for StructCodec {
    fn wire_type(&self) -> TType {
        TType::Struct
    }

    fn read(&self, reader: &mut dyn ProtocolReader) -> Result<DecodedValue, CodecError> {
        reader.read_struct_begin()?;
        let mut slots: Vec<Option<DecodedValue>> = (0..self.fields.len()).map(|_| None).collect();

        loop {
            let field_ident = reader.read_field_begin()?;
            if field_ident.field_type == TType::Stop {
                break;
            }
            let id = field_ident.id.unwrap_or(i16::MIN);
            match self.field_index_by_id(id) {
                Some(idx) if field_ident.field_type == self.fields[idx].codec.wire_type() => {
                    slots[idx] = Some(self.fields[idx].codec.read(reader)?);
                }
                _ => reader.skip(field_ident.field_type)?,
            }
            reader.read_field_end()?;
        }
        reader.read_struct_end()?;

        for (idx, field) in self.fields.iter().enumerate() {
            if field.requiredness == Requiredness::Required && slots[idx].is_none() {
                return Err(CodecError::missing_required_field(field.id, field.name));
            }
        }

        if self.category == Category::Union {
            let set_count = slots.iter().filter(|s| s.is_some()).count();
            if set_count != 1 {
                return Err(CodecError::union_cardinality(set_count));
            }
        }

        self.construct(slots)
    }

    fn write(&self, value: &(dyn Any + Send), writer: &mut dyn ProtocolWriter) -> Result<(), CodecError> {
        writer.write_struct_begin(&TStructIdentifier::new(Some(self.name)));

        let mut extracted_count = 0usize;
        for field in &self.fields {
            let Some(extraction) = &field.extraction else { continue };
            let value = extraction(value);
            match value {
                Some(value) => {
                    extracted_count += 1;
                    writer.write_field_begin(field.codec.wire_type(), field.id);
                    field.codec.write(value.as_ref(), writer)?;
                    writer.write_field_end();
                }
                None if field.requiredness == Requiredness::Required => {
                    return Err(CodecError::missing_required_field(field.id, field.name));
                }
                None => {}
            }
        }

        if self.category == Category::Union && extracted_count != 1 {
            return Err(CodecError::union_cardinality(extracted_count));
        }

        writer.write_field_stop();
        writer.write_struct_end();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::{
        metadata::{Coercion, StructMetadataBuilder, ThriftType},
        wire::{BinaryReader, BinaryWriter, CompactReader, CompactWriter},
    };

    #[derive(Debug, Default, PartialEq)]
    struct Bonk {
        message: String,
        kind: i32,
        tag: Option<String>,
    }

    fn bonk_metadata() -> StructMetadata {
        StructMetadataBuilder::new("Bonk", Category::Struct)
            .field(
                FieldMetadata::new(1, "message", ThriftType::String)
                    .required()
                    .direct_set::<Bonk, String>(|s, v| s.message = v)
                    .getter::<Bonk, String>(|s| s.message.clone()),
            )
            .field(
                FieldMetadata::new(2, "type", ThriftType::I32)
                    .required()
                    .direct_set::<Bonk, i32>(|s, v| s.kind = v)
                    .getter::<Bonk, i32>(|s| s.kind),
            )
            .field(
                FieldMetadata::new(3, "tag", ThriftType::String)
                    .optional()
                    .direct_set::<Bonk, String>(|s, v| s.tag = Some(v))
                    .getter_optional::<Bonk, String>(|s| s.tag.clone()),
            )
            .default_and_inject(|| Box::new(Bonk::default()) as DecodedValue)
            .build()
            .unwrap()
    }

    fn build_codec(metadata: &StructMetadata) -> StructCodec {
        let registry = CodecRegistry::new();
        StructCodec::build(metadata, &registry).unwrap()
    }

    #[test]
    fn binary_round_trip_with_optional_field_present() {
        let metadata = bonk_metadata();
        let codec = build_codec(&metadata);
        let value = Bonk {
            message: "hello".into(),
            kind: 42,
            tag: Some("x".into()),
        };

        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            codec.write(&value as &(dyn Any + Send), &mut w).unwrap();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let decoded = codec.read(&mut r).unwrap();
        let decoded = decoded.downcast::<Bonk>().unwrap();
        assert_eq!(*decoded, value);
    }

    #[test]
    fn compact_round_trip_parity() {
        let metadata = bonk_metadata();
        let codec = build_codec(&metadata);
        let value = Bonk {
            message: "hello".into(),
            kind: 42,
            tag: None,
        };

        let mut buf = BytesMut::new();
        {
            let mut w = CompactWriter::new(&mut buf);
            codec.write(&value as &(dyn Any + Send), &mut w).unwrap();
        }
        let mut r = CompactReader::new(buf.freeze());
        let decoded = codec.read(&mut r).unwrap();
        let decoded = decoded.downcast::<Bonk>().unwrap();
        assert_eq!(*decoded, value);
    }

    #[test]
    fn optional_field_omitted_when_absent() {
        let metadata = bonk_metadata();
        let codec = build_codec(&metadata);
        let value = Bonk {
            message: "hi".into(),
            kind: 1,
            tag: None,
        };
        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            codec.write(&value as &(dyn Any + Send), &mut w).unwrap();
        }
        let mut r = BinaryReader::new(buf.freeze());
        r.read_struct_begin().unwrap();
        let mut ids = Vec::new();
        loop {
            let field = r.read_field_begin().unwrap();
            if field.field_type == TType::Stop {
                break;
            }
            ids.push(field.id.unwrap());
            r.skip(field.field_type).unwrap();
            r.read_field_end().unwrap();
        }
        assert_eq!(ids, vec![1, 2]);
    }

    /// Spec §8: unknown fields (and known fields whose wire type doesn't
    /// match the expected one) are skipped rather than failing the read.
    #[test]
    fn unknown_and_mismatched_type_fields_are_skipped() {
        let metadata = bonk_metadata();
        let codec = build_codec(&metadata);

        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            w.write_struct_begin(&TStructIdentifier::new(Some("Bonk")));
            w.write_field_begin(TType::Binary, 1);
            w.write_string("hello");
            w.write_field_end();
            // id=2 ("type") written with the wrong wire type: must be skipped.
            w.write_field_begin(TType::Binary, 2);
            w.write_string("not an i32");
            w.write_field_end();
            w.write_field_begin(TType::I32, 2);
            w.write_i32(42);
            w.write_field_end();
            // unknown field id=99.
            w.write_field_begin(TType::I32, 99);
            w.write_i32(7);
            w.write_field_end();
            w.write_field_stop();
            w.write_struct_end();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let decoded = codec.read(&mut r).unwrap();
        let decoded = decoded.downcast::<Bonk>().unwrap();
        assert_eq!(decoded.message, "hello");
        assert_eq!(decoded.kind, 42);
    }

    #[test]
    fn missing_required_field_fails_decode() {
        let metadata = bonk_metadata();
        let codec = build_codec(&metadata);

        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            w.write_struct_begin(&TStructIdentifier::new(Some("Bonk")));
            w.write_field_begin(TType::Binary, 1);
            w.write_string("hello");
            w.write_field_end();
            w.write_field_stop();
            w.write_struct_end();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let err = codec.read(&mut r).unwrap_err();
        assert!(matches!(
            err.kind,
            CodecErrorKind::MissingRequiredField { id: 2, name: "type" }
        ));
    }

    #[test]
    fn missing_required_field_fails_encode() {
        // `message` is required but given no extraction, so write must fail.
        let fields_without_message = StructMetadataBuilder::new("Bonk", Category::Struct)
            .field(FieldMetadata::new(1, "message", ThriftType::String).required())
            .field(
                FieldMetadata::new(2, "type", ThriftType::I32)
                    .required()
                    .getter::<Bonk, i32>(|s| s.kind),
            )
            .default_and_inject(|| Box::new(Bonk::default()) as DecodedValue)
            .build()
            .unwrap();
        let codec = StructCodec::build(&fields_without_message, &CodecRegistry::new()).unwrap();
        let value = Bonk {
            message: "hello".into(),
            kind: 1,
            tag: None,
        };
        let mut buf = BytesMut::new();
        let mut w = BinaryWriter::new(&mut buf);
        let err = codec.write(&value as &(dyn Any + Send), &mut w).unwrap_err();
        assert!(matches!(
            err.kind,
            CodecErrorKind::MissingRequiredField { id: 1, name: "message" }
        ));
    }

    #[test]
    fn coercion_wraps_field_codec() {
        #[derive(Debug, Default, PartialEq)]
        struct Wrapper {
            millis: std::time::Duration,
        }

        let coercion = Coercion {
            from_wire: Arc::new(|boxed| {
                let v = *boxed.downcast::<i64>().unwrap();
                Box::new(std::time::Duration::from_millis(v as u64)) as DecodedValue
            }),
            to_wire: Arc::new(|value| {
                let v = value.downcast_ref::<std::time::Duration>().unwrap();
                Box::new(v.as_millis() as i64) as DecodedValue
            }),
        };

        let metadata = StructMetadataBuilder::new("Wrapper", Category::Struct)
            .field(
                FieldMetadata::new(1, "millis", ThriftType::I64)
                    .required()
                    .with_coercion(coercion)
                    .direct_set::<Wrapper, std::time::Duration>(|s, v| s.millis = v)
                    .getter::<Wrapper, std::time::Duration>(|s| s.millis),
            )
            .default_and_inject(|| Box::new(Wrapper::default()) as DecodedValue)
            .build()
            .unwrap();
        let codec = build_codec(&metadata);

        let value = Wrapper {
            millis: std::time::Duration::from_millis(1500),
        };
        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            codec.write(&value as &(dyn Any + Send), &mut w).unwrap();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let decoded = codec.read(&mut r).unwrap();
        assert_eq!(*decoded.downcast::<Wrapper>().unwrap(), value);
    }

    #[derive(Debug, PartialEq)]
    enum Choice {
        Number(i32),
        Text(String),
    }

    fn union_metadata() -> StructMetadata {
        StructMetadataBuilder::new("Choice", Category::Union)
            .field(
                FieldMetadata::new(1, "number", ThriftType::I32).getter_optional::<Choice, i32>(|u| {
                    match u {
                        Choice::Number(v) => Some(*v),
                        _ => None,
                    }
                }),
            )
            .field(
                FieldMetadata::new(2, "text", ThriftType::String).getter_optional::<Choice, String>(
                    |u| match u {
                        Choice::Text(v) => Some(v.clone()),
                        _ => None,
                    },
                ),
            )
            .union_from_field(|id, value| match id {
                1 => Box::new(Choice::Number(*value.downcast::<i32>().unwrap())) as DecodedValue,
                2 => Box::new(Choice::Text(*value.downcast::<String>().unwrap())) as DecodedValue,
                other => panic!("unexpected union field id {other}"),
            })
            .build()
            .unwrap()
    }

    #[test]
    fn union_round_trips_each_variant() {
        let metadata = union_metadata();
        let codec = build_codec(&metadata);

        for value in [Choice::Number(9), Choice::Text("hi".into())] {
            let mut buf = BytesMut::new();
            {
                let mut w = BinaryWriter::new(&mut buf);
                codec.write(&value as &(dyn Any + Send), &mut w).unwrap();
            }
            let mut r = BinaryReader::new(buf.freeze());
            let decoded = codec.read(&mut r).unwrap();
            assert_eq!(*decoded.downcast::<Choice>().unwrap(), value);
        }
    }

    /// Spec §8: a union decoded with zero or ≥2 fields set must fail
    /// with `UNION_CARDINALITY`.
    #[test]
    fn union_with_zero_fields_set_fails_cardinality() {
        let metadata = union_metadata();
        let codec = build_codec(&metadata);

        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            w.write_struct_begin(&TStructIdentifier::new(Some("Choice")));
            w.write_field_stop();
            w.write_struct_end();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let err = codec.read(&mut r).unwrap_err();
        assert!(matches!(err.kind, CodecErrorKind::UnionCardinality { found: 0 }));
    }

    #[test]
    fn union_with_two_fields_set_fails_cardinality() {
        let metadata = union_metadata();
        let codec = build_codec(&metadata);

        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            w.write_struct_begin(&TStructIdentifier::new(Some("Choice")));
            w.write_field_begin(TType::I32, 1);
            w.write_i32(1);
            w.write_field_end();
            w.write_field_begin(TType::Binary, 2);
            w.write_string("also set");
            w.write_field_end();
            w.write_field_stop();
            w.write_struct_end();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let err = codec.read(&mut r).unwrap_err();
        assert!(matches!(err.kind, CodecErrorKind::UnionCardinality { found: 2 }));
    }
}
