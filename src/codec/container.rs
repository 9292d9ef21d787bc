//! List/Set/Map codecs (spec §4.4), parameterized by element codecs.
//! Their native Rust representation is a type-erased `Vec<DecodedValue>`
//! (map: `Vec<(DecodedValue, DecodedValue)>`, order-preserving rather than
//! requiring `Hash`/`Eq` on a boxed key) — the same "wire-native but not
//! yet the user's concrete container type" stance `CoercedCodec` already
//! assumes for scalars. A field typed `Vec<i32>`/`HashSet<String>`/
//! `HashMap<K, V>` reaches its concrete Rust container type through a
//! `Coercion` built by the `crate::metadata::coercion` helpers, exactly as
//! a coerced enum or newtype field does.

use std::any::Any;

use super::Codec;
use crate::{
    metadata::DecodedValue,
    thrift::{TListIdentifier, TMapIdentifier, TSetIdentifier, TType},
    wire::{ProtocolReader, ProtocolWriter},
    CodecError, CodecErrorKind,
};

fn downcast_items(value: &(dyn Any + Send)) -> Result<&Vec<DecodedValue>, CodecError> {
    value.downcast_ref::<Vec<DecodedValue>>().ok_or_else(|| {
        CodecError::new(
            CodecErrorKind::Metadata,
            "container field codec expected a Vec<DecodedValue> wire value; register a Coercion \
             for the concrete container type",
        )
    })
}

pub struct ListCodec {
    elem: std::sync::Arc<dyn Codec>,
}

impl ListCodec {
    pub fn new(elem: std::sync::Arc<dyn Codec>) -> Self {
        Self { elem }
    }
}

impl Codec for ListCodec {
    fn wire_type(&self) -> TType {
        TType::List
    }

    fn read(&self, reader: &mut dyn ProtocolReader) -> Result<DecodedValue, CodecError> {
        let ident = reader.read_list_begin()?;
        let mut items = Vec::with_capacity(ident.size.min(4096));
        for _ in 0..ident.size {
            items.push(self.elem.read(reader)?);
        }
        reader.read_list_end()?;
        Ok(Box::new(items))
    }

    fn write(&self, value: &(dyn Any + Send), writer: &mut dyn ProtocolWriter) -> Result<(), CodecError> {
        let items = downcast_items(value)?;
        writer.write_list_begin(&TListIdentifier::new(self.elem.wire_type(), items.len()));
        for item in items {
            self.elem.write(item.as_ref(), writer)?;
        }
        writer.write_list_end();
        Ok(())
    }
}

pub struct SetCodec {
    elem: std::sync::Arc<dyn Codec>,
}

impl SetCodec {
    pub fn new(elem: std::sync::Arc<dyn Codec>) -> Self {
        Self { elem }
    }
}

impl Codec for SetCodec {
    fn wire_type(&self) -> TType {
        TType::Set
    }

    fn read(&self, reader: &mut dyn ProtocolReader) -> Result<DecodedValue, CodecError> {
        let ident = reader.read_set_begin()?;
        let mut items = Vec::with_capacity(ident.size.min(4096));
        for _ in 0..ident.size {
            items.push(self.elem.read(reader)?);
        }
        reader.read_set_end()?;
        Ok(Box::new(items))
    }

    fn write(&self, value: &(dyn Any + Send), writer: &mut dyn ProtocolWriter) -> Result<(), CodecError> {
        let items = downcast_items(value)?;
        writer.write_set_begin(&TSetIdentifier::new(self.elem.wire_type(), items.len()));
        for item in items {
            self.elem.write(item.as_ref(), writer)?;
        }
        writer.write_set_end();
        Ok(())
    }
}

pub struct MapCodec {
    key: std::sync::Arc<dyn Codec>,
    value: std::sync::Arc<dyn Codec>,
}

impl MapCodec {
    pub fn new(key: std::sync::Arc<dyn Codec>, value: std::sync::Arc<dyn Codec>) -> Self {
        Self { key, value }
    }
}

impl Codec for MapCodec {
    fn wire_type(&self) -> TType {
        TType::Map
    }

    fn read(&self, reader: &mut dyn ProtocolReader) -> Result<DecodedValue, CodecError> {
        let ident = reader.read_map_begin()?;
        let mut entries: Vec<(DecodedValue, DecodedValue)> = Vec::with_capacity(ident.size.min(4096));
        for _ in 0..ident.size {
            let k = self.key.read(reader)?;
            let v = self.value.read(reader)?;
            entries.push((k, v));
        }
        reader.read_map_end()?;
        Ok(Box::new(entries))
    }

    fn write(&self, value: &(dyn Any + Send), writer: &mut dyn ProtocolWriter) -> Result<(), CodecError> {
        let entries = value
            .downcast_ref::<Vec<(DecodedValue, DecodedValue)>>()
            .ok_or_else(|| {
                CodecError::new(
                    CodecErrorKind::Metadata,
                    "map field codec expected a Vec<(DecodedValue, DecodedValue)> wire value; \
                     register a Coercion for the concrete map type",
                )
            })?;
        writer.write_map_begin(&TMapIdentifier::new(
            self.key.wire_type(),
            self.value.wire_type(),
            entries.len(),
        ));
        for (k, v) in entries {
            self.key.write(k.as_ref(), writer)?;
            self.value.write(v.as_ref(), writer)?;
        }
        writer.write_map_end();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::{
        codec::scalar::{i32_codec, string_codec},
        wire::{BinaryReader, BinaryWriter},
    };

    #[test]
    fn list_codec_round_trip() {
        let codec = ListCodec::new(i32_codec());
        let items: Vec<DecodedValue> = vec![Box::new(1i32), Box::new(2i32), Box::new(3i32)];

        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            codec.write(&items as &(dyn Any + Send), &mut w).unwrap();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let decoded = codec.read(&mut r).unwrap();
        let decoded = decoded.downcast::<Vec<DecodedValue>>().unwrap();
        let values: Vec<i32> = decoded.into_iter().map(|v| *v.downcast::<i32>().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn empty_list_round_trips() {
        let codec = ListCodec::new(i32_codec());
        let items: Vec<DecodedValue> = Vec::new();
        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            codec.write(&items as &(dyn Any + Send), &mut w).unwrap();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let decoded = codec.read(&mut r).unwrap();
        assert!(decoded.downcast::<Vec<DecodedValue>>().unwrap().is_empty());
    }

    #[test]
    fn set_codec_round_trip() {
        let codec = SetCodec::new(string_codec());
        let items: Vec<DecodedValue> = vec![Box::new("a".to_string()), Box::new("b".to_string())];

        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            codec.write(&items as &(dyn Any + Send), &mut w).unwrap();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let decoded = codec.read(&mut r).unwrap();
        let decoded = decoded.downcast::<Vec<DecodedValue>>().unwrap();
        let values: Vec<String> = decoded.into_iter().map(|v| *v.downcast::<String>().unwrap()).collect();
        assert_eq!(values, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn map_codec_round_trip() {
        let codec = MapCodec::new(string_codec(), i32_codec());
        let entries: Vec<(DecodedValue, DecodedValue)> = vec![
            (Box::new("one".to_string()), Box::new(1i32)),
            (Box::new("two".to_string()), Box::new(2i32)),
        ];

        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            codec.write(&entries as &(dyn Any + Send), &mut w).unwrap();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let decoded = codec.read(&mut r).unwrap();
        let decoded = decoded.downcast::<Vec<(DecodedValue, DecodedValue)>>().unwrap();
        let values: Vec<(String, i32)> = decoded
            .into_iter()
            .map(|(k, v)| (*k.downcast::<String>().unwrap(), *v.downcast::<i32>().unwrap()))
            .collect();
        assert_eq!(values, vec![("one".to_string(), 1), ("two".to_string(), 2)]);
    }

    #[test]
    fn nested_list_of_lists_round_trips() {
        let inner = ListCodec::new(i32_codec());
        let outer = ListCodec::new(std::sync::Arc::new(inner));

        let row = |vals: &[i32]| -> DecodedValue {
            Box::new(vals.iter().map(|v| Box::new(*v) as DecodedValue).collect::<Vec<_>>())
        };
        let matrix: Vec<DecodedValue> = vec![row(&[1, 2]), row(&[3, 4, 5])];

        let mut buf = BytesMut::new();
        {
            let mut w = BinaryWriter::new(&mut buf);
            outer.write(&matrix as &(dyn Any + Send), &mut w).unwrap();
        }
        let mut r = BinaryReader::new(buf.freeze());
        let decoded = outer.read(&mut r).unwrap();
        let rows = decoded.downcast::<Vec<DecodedValue>>().unwrap();
        assert_eq!(rows.len(), 2);
        let first_row = rows[0]
            .downcast_ref::<Vec<DecodedValue>>()
            .unwrap()
            .iter()
            .map(|v| *v.downcast_ref::<i32>().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(first_row, vec![1, 2]);
    }
}
