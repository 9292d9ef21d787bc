//! Built-in codecs for the eight Thrift primitive types (spec §4.4: "Built-in
//! codecs: scalars..."). Each is a stateless unit struct so `get_or_build`
//! can hand out a shared `Arc` without ever touching the registry's lock.

use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;

use super::Codec;
use crate::{
    metadata::DecodedValue,
    thrift::TType,
    wire::{ProtocolReader, ProtocolWriter},
    CodecError, CodecErrorKind,
};

macro_rules! scalar_codec {
    ($name:ident, $rust:ty, $wire:expr, $read:ident, $write:ident) => {
        struct $name;

        impl Codec for $name {
            fn wire_type(&self) -> TType {
                $wire
            }

            fn read(&self, reader: &mut dyn ProtocolReader) -> Result<DecodedValue, CodecError> {
                let value: $rust = reader.$read()?;
                Ok(Box::new(value))
            }

            fn write(&self, value: &(dyn Any + Send), writer: &mut dyn ProtocolWriter) -> Result<(), CodecError> {
                let value = downcast::<$rust>(value)?;
                writer.$write(*value);
                Ok(())
            }
        }
    };
}

fn downcast<T: 'static>(value: &(dyn Any + Send)) -> Result<&T, CodecError> {
    value.downcast_ref::<T>().ok_or_else(|| {
        CodecError::new(
            CodecErrorKind::Metadata,
            format!(
                "field codec expected a {} value, got something else",
                std::any::type_name::<T>()
            ),
        )
    })
}

scalar_codec!(BoolCodec, bool, TType::Bool, read_bool, write_bool);
scalar_codec!(I8Codec, i8, TType::I8, read_i8, write_i8);
scalar_codec!(I16Codec, i16, TType::I16, read_i16, write_i16);
scalar_codec!(I32Codec, i32, TType::I32, read_i32, write_i32);
scalar_codec!(I64Codec, i64, TType::I64, read_i64, write_i64);
scalar_codec!(DoubleCodec, f64, TType::Double, read_double, write_double);

struct StringCodec;

impl Codec for StringCodec {
    fn wire_type(&self) -> TType {
        TType::Binary
    }

    fn read(&self, reader: &mut dyn ProtocolReader) -> Result<DecodedValue, CodecError> {
        Ok(Box::new(reader.read_string()?))
    }

    fn write(&self, value: &(dyn Any + Send), writer: &mut dyn ProtocolWriter) -> Result<(), CodecError> {
        let value = downcast::<String>(value)?;
        writer.write_string(value);
        Ok(())
    }
}

struct BinaryCodec;

impl Codec for BinaryCodec {
    fn wire_type(&self) -> TType {
        TType::Binary
    }

    fn read(&self, reader: &mut dyn ProtocolReader) -> Result<DecodedValue, CodecError> {
        Ok(Box::new(reader.read_binary()?))
    }

    fn write(&self, value: &(dyn Any + Send), writer: &mut dyn ProtocolWriter) -> Result<(), CodecError> {
        let value = downcast::<Bytes>(value)?;
        writer.write_binary(value);
        Ok(())
    }
}

macro_rules! singleton {
    ($fn_name:ident, $ty:ident) => {
        pub fn $fn_name() -> Arc<dyn Codec> {
            static CODEC: once_cell::sync::Lazy<Arc<dyn Codec>> =
                once_cell::sync::Lazy::new(|| Arc::new($ty));
            CODEC.clone()
        }
    };
}

singleton!(bool_codec, BoolCodec);
singleton!(i8_codec, I8Codec);
singleton!(i16_codec, I16Codec);
singleton!(i32_codec, I32Codec);
singleton!(i64_codec, I64Codec);
singleton!(double_codec, DoubleCodec);
singleton!(string_codec, StringCodec);
singleton!(binary_codec, BinaryCodec);
