//! Enum codec (spec §4.4: "enum codec"). On the wire an enum is always an
//! `i32` (spec §3: `ThriftType::wire_type` maps `Enum` to `TType::I32`);
//! the codec's native Rust value is therefore plain `i32`; a field whose
//! Rust type is a real enum reaches its variant through `FieldMetadata`'s
//! coercion (ground: `crate::metadata::Coercion`, wired the same way a
//! coerced scalar field is).

use std::any::Any;
use std::sync::Arc;

use super::Codec;
use crate::{
    metadata::{DecodedValue, EnumMetadata},
    thrift::TType,
    wire::{ProtocolReader, ProtocolWriter},
    CodecError, CodecErrorKind,
};

pub struct EnumCodec {
    meta: Arc<EnumMetadata>,
}

impl EnumCodec {
    pub fn new(meta: Arc<EnumMetadata>) -> Self {
        Self { meta }
    }
}

impl Codec for EnumCodec {
    fn wire_type(&self) -> TType {
        TType::I32
    }

    fn read(&self, reader: &mut dyn ProtocolReader) -> Result<DecodedValue, CodecError> {
        let value = reader.read_i32()?;
        if !self.meta.is_valid(value) {
            return Err(CodecError::new(
                CodecErrorKind::InvalidData,
                format!("{} has no variant for value {value}", self.meta.name),
            ));
        }
        Ok(Box::new(value))
    }

    fn write(&self, value: &(dyn Any + Send), writer: &mut dyn ProtocolWriter) -> Result<(), CodecError> {
        let value = *value.downcast_ref::<i32>().ok_or_else(|| {
            CodecError::new(
                CodecErrorKind::Metadata,
                format!("{} field codec expected an i32 variant value", self.meta.name),
            )
        })?;
        if !self.meta.is_valid(value) {
            return Err(CodecError::new(
                CodecErrorKind::InvalidData,
                format!("{} has no variant for value {value}", self.meta.name),
            ));
        }
        writer.write_i32(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::wire::{BinaryReader, BinaryWriter};

    fn explicit_meta() -> Arc<EnumMetadata> {
        Arc::new(EnumMetadata {
            name: "Color",
            explicit: true,
            value_to_constant: vec![(0, "RED"), (5, "BLUE")],
            variant_count: 2,
        })
    }

    fn implicit_meta() -> Arc<EnumMetadata> {
        Arc::new(EnumMetadata {
            name: "Color",
            explicit: false,
            value_to_constant: Vec::new(),
            variant_count: 2,
        })
    }

    #[test]
    fn explicit_enum_round_trips_declared_value() {
        let codec = EnumCodec::new(explicit_meta());
        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            codec.write(&5i32 as &(dyn Any + Send), &mut w).unwrap();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let decoded = codec.read(&mut r).unwrap();
        assert_eq!(*decoded.downcast::<i32>().unwrap(), 5);
    }

    /// Spec §8: an explicit enum with an undeclared integer value fails decode.
    #[test]
    fn explicit_enum_rejects_unknown_value() {
        let codec = EnumCodec::new(explicit_meta());
        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            w.write_i32(99);
        }
        let mut r = BinaryReader::new(buf.freeze());
        let err = codec.read(&mut r).unwrap_err();
        assert!(matches!(err.kind, CodecErrorKind::InvalidData));
    }

    /// Spec §8: an implicit (ordinal) enum with a value ≥ variant count fails.
    #[test]
    fn implicit_enum_rejects_out_of_range_ordinal() {
        let codec = EnumCodec::new(implicit_meta());
        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            w.write_i32(2);
        }
        let mut r = BinaryReader::new(buf.freeze());
        let err = codec.read(&mut r).unwrap_err();
        assert!(matches!(err.kind, CodecErrorKind::InvalidData));
    }

    #[test]
    fn implicit_enum_accepts_in_range_ordinal() {
        let codec = EnumCodec::new(implicit_meta());
        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            w.write_i32(1);
        }
        let mut r = BinaryReader::new(buf.freeze());
        assert_eq!(*codec.read(&mut r).unwrap().downcast::<i32>().unwrap(), 1);
    }

    #[test]
    fn write_rejects_unknown_value_too() {
        let codec = EnumCodec::new(explicit_meta());
        let mut buf = BytesMut::new();
        let mut w = BinaryWriter::new(&mut buf);
        let err = codec.write(&42i32 as &(dyn Any + Send), &mut w).unwrap_err();
        assert!(matches!(err.kind, CodecErrorKind::InvalidData));
    }
}
