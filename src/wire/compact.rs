//! Thrift Compact Protocol: zigzag varints for signed scalars, a varint
//! byte count for strings/binaries/containers, delta-encoded field ids,
//! and the short-form boolean field that folds the value into the field
//! header itself. Ground: bytedance-g3's `target/thrift/protocol/compact.rs`
//! (builder) and `compact/parser.rs` (parser) for the header byte layout
//! and `integer_encoding::VarInt` usage; field-id delta/short-bool scheme
//! follows Apache Thrift's compact protocol definition.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use integer_encoding::VarInt;

use super::{ProtocolReader, ProtocolWriter, MAX_SKIP_DEPTH};
use crate::{
    thrift::{
        TFieldIdentifier, TListIdentifier, TMapIdentifier, TMessageIdentifier, TMessageType,
        TSetIdentifier, TStructIdentifier, TType,
    },
    CodecError, CodecErrorKind,
};

const PROTOCOL_ID: u8 = 0x82;
const VERSION: u8 = 1;
const VERSION_MASK: u8 = 0x1f;
const TYPE_SHIFT_AMOUNT: u8 = 5;

const CT_STOP: u8 = 0;
const CT_BOOLEAN_TRUE: u8 = 1;
const CT_BOOLEAN_FALSE: u8 = 2;
const CT_BYTE: u8 = 3;
const CT_I16: u8 = 4;
const CT_I32: u8 = 5;
const CT_I64: u8 = 6;
const CT_DOUBLE: u8 = 7;
const CT_BINARY: u8 = 8;
const CT_LIST: u8 = 9;
const CT_SET: u8 = 10;
const CT_MAP: u8 = 11;
const CT_STRUCT: u8 = 12;

fn ttype_to_compact(ttype: TType) -> Result<u8, CodecError> {
    Ok(match ttype {
        TType::Stop => CT_STOP,
        TType::Bool => CT_BOOLEAN_TRUE,
        TType::I8 => CT_BYTE,
        TType::I16 => CT_I16,
        TType::I32 => CT_I32,
        TType::I64 => CT_I64,
        TType::Double => CT_DOUBLE,
        TType::Binary => CT_BINARY,
        TType::List => CT_LIST,
        TType::Set => CT_SET,
        TType::Map => CT_MAP,
        TType::Struct => CT_STRUCT,
        TType::Void | TType::Uuid => {
            return Err(CodecError::new(
                CodecErrorKind::InvalidData,
                format!("{:?} has no compact-protocol wire representation", ttype),
            ))
        }
    })
}

fn compact_to_ttype(code: u8) -> Result<TType, CodecError> {
    Ok(match code {
        CT_STOP => TType::Stop,
        CT_BOOLEAN_TRUE | CT_BOOLEAN_FALSE => TType::Bool,
        CT_BYTE => TType::I8,
        CT_I16 => TType::I16,
        CT_I32 => TType::I32,
        CT_I64 => TType::I64,
        CT_DOUBLE => TType::Double,
        CT_BINARY => TType::Binary,
        CT_LIST => TType::List,
        CT_SET => TType::Set,
        CT_MAP => TType::Map,
        CT_STRUCT => TType::Struct,
        other => {
            return Err(CodecError::new(
                CodecErrorKind::InvalidData,
                format!("invalid compact-protocol type code {other}"),
            ))
        }
    })
}

/// Reads Compact-protocol-encoded values out of an owned `Bytes` buffer.
pub struct CompactReader {
    buf: Bytes,
    /// One entry per struct currently being read; the last field id seen
    /// directly inside that struct, for delta decoding.
    last_field_id: Vec<i16>,
    /// A bool field's value is carried entirely in its field header; the
    /// subsequent `read_bool` call drains it from here instead of the wire.
    pending_bool: Option<bool>,
}

impl CompactReader {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self {
            buf: buf.into(),
            last_field_id: Vec::new(),
            pending_bool: None,
        }
    }

    #[inline]
    fn require(&self, n: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < n {
            return Err(CodecError::new(
                CodecErrorKind::UnexpectedEof,
                "unexpected end of compact-protocol buffer",
            ));
        }
        Ok(())
    }

    fn read_varint<T: VarInt>(&mut self) -> Result<T, CodecError> {
        let (value, consumed) = T::decode_var(self.buf.chunk()).ok_or_else(|| {
            CodecError::new(CodecErrorKind::UnexpectedEof, "truncated varint")
        })?;
        self.buf.advance(consumed);
        Ok(value)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.require(1)?;
        Ok(self.buf.get_u8())
    }
}

impl ProtocolReader for CompactReader {
    fn read_message_begin(&mut self) -> Result<TMessageIdentifier, CodecError> {
        let protocol_id = self.read_u8()?;
        if protocol_id != PROTOCOL_ID {
            return Err(CodecError::new(
                CodecErrorKind::BadVersion,
                "missing compact-protocol id byte",
            ));
        }
        let version_and_type = self.read_u8()?;
        let version = version_and_type & VERSION_MASK;
        if version != VERSION {
            return Err(CodecError::new(
                CodecErrorKind::BadVersion,
                "unsupported compact-protocol version",
            ));
        }
        let message_type = TMessageType::try_from(version_and_type >> TYPE_SHIFT_AMOUNT)?;
        let sequence_number: u32 = self.read_varint()?;
        let name = self.read_string()?;
        Ok(TMessageIdentifier::new(name, message_type, sequence_number as i32))
    }

    fn read_message_end(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<TStructIdentifier, CodecError> {
        self.last_field_id.push(0);
        Ok(TStructIdentifier::new(None))
    }

    fn read_struct_end(&mut self) -> Result<(), CodecError> {
        self.last_field_id.pop();
        Ok(())
    }

    fn read_field_begin(&mut self) -> Result<TFieldIdentifier, CodecError> {
        let header = self.read_u8()?;
        if header == CT_STOP {
            return Ok(TFieldIdentifier::new(None, TType::Stop, None));
        }
        let delta = (header >> 4) & 0x0f;
        let type_code = header & 0x0f;
        let last = *self.last_field_id.last().unwrap_or(&0);
        let id = if delta == 0 {
            self.read_varint::<i16>()?
        } else {
            last + delta as i16
        };
        if let Some(slot) = self.last_field_id.last_mut() {
            *slot = id;
        }
        let field_type = match type_code {
            CT_BOOLEAN_TRUE => {
                self.pending_bool = Some(true);
                TType::Bool
            }
            CT_BOOLEAN_FALSE => {
                self.pending_bool = Some(false);
                TType::Bool
            }
            other => compact_to_ttype(other)?,
        };
        Ok(TFieldIdentifier::new(None, field_type, Some(id)))
    }

    fn read_field_end(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn read_list_begin(&mut self) -> Result<TListIdentifier, CodecError> {
        let header = self.read_u8()?;
        let size_nibble = (header >> 4) & 0x0f;
        let element_type = compact_to_ttype(header & 0x0f)?;
        let size = if size_nibble == 0x0f {
            self.read_varint::<u32>()? as usize
        } else {
            size_nibble as usize
        };
        Ok(TListIdentifier::new(element_type, size))
    }

    fn read_list_end(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn read_set_begin(&mut self) -> Result<TSetIdentifier, CodecError> {
        let list = self.read_list_begin()?;
        Ok(TSetIdentifier::new(list.element_type, list.size))
    }

    fn read_set_end(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn read_map_begin(&mut self) -> Result<TMapIdentifier, CodecError> {
        let size: u32 = self.read_varint()?;
        if size == 0 {
            return Ok(TMapIdentifier::new(TType::Void, TType::Void, 0));
        }
        let types = self.read_u8()?;
        let key_type = compact_to_ttype(types >> 4)?;
        let value_type = compact_to_ttype(types & 0x0f)?;
        Ok(TMapIdentifier::new(key_type, value_type, size as usize))
    }

    fn read_map_end(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn read_bool(&mut self) -> Result<bool, CodecError> {
        if let Some(value) = self.pending_bool.take() {
            return Ok(value);
        }
        Ok(self.read_u8()? == CT_BOOLEAN_TRUE)
    }

    fn read_i8(&mut self) -> Result<i8, CodecError> {
        self.require(1)?;
        Ok(self.buf.get_i8())
    }

    fn read_i16(&mut self) -> Result<i16, CodecError> {
        self.read_varint()
    }

    fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.read_varint()
    }

    fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.read_varint()
    }

    fn read_double(&mut self) -> Result<f64, CodecError> {
        self.require(8)?;
        Ok(f64::from_le_bytes(self.buf.split_to(8).as_ref().try_into().unwrap()))
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.read_binary()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CodecError::new(CodecErrorKind::InvalidData, "string is not valid utf-8"))
    }

    fn read_binary(&mut self) -> Result<Bytes, CodecError> {
        let len: u32 = self.read_varint()?;
        let len = len as usize;
        self.require(len)?;
        Ok(self.buf.split_to(len))
    }

    fn skip(&mut self, ttype: TType) -> Result<(), CodecError> {
        self.skip_inner(ttype, 0)
    }
}

impl CompactReader {
    fn skip_inner(&mut self, ttype: TType, depth: usize) -> Result<(), CodecError> {
        if depth >= MAX_SKIP_DEPTH {
            return Err(CodecError::new(CodecErrorKind::DepthLimit, "skip nesting too deep"));
        }
        match ttype {
            TType::Bool => {
                self.read_bool()?;
            }
            TType::I8 => {
                self.read_i8()?;
            }
            TType::I16 => {
                self.read_i16()?;
            }
            TType::I32 => {
                self.read_i32()?;
            }
            TType::I64 => {
                self.read_i64()?;
            }
            TType::Double => {
                self.read_double()?;
            }
            TType::Binary => {
                self.read_binary()?;
            }
            TType::Struct => {
                self.read_struct_begin()?;
                loop {
                    let field = self.read_field_begin()?;
                    if field.field_type == TType::Stop {
                        break;
                    }
                    self.skip_inner(field.field_type, depth + 1)?;
                }
                self.read_struct_end()?;
            }
            TType::List => {
                let list = self.read_list_begin()?;
                for _ in 0..list.size {
                    self.skip_inner(list.element_type, depth + 1)?;
                }
            }
            TType::Set => {
                let set = self.read_set_begin()?;
                for _ in 0..set.size {
                    self.skip_inner(set.element_type, depth + 1)?;
                }
            }
            TType::Map => {
                let map = self.read_map_begin()?;
                for _ in 0..map.size {
                    self.skip_inner(map.key_type, depth + 1)?;
                    self.skip_inner(map.value_type, depth + 1)?;
                }
            }
            other => {
                return Err(CodecError::new(
                    CodecErrorKind::InvalidData,
                    format!("ttype {:?} cannot be skipped", other),
                ))
            }
        }
        Ok(())
    }
}

/// Writes Compact-protocol-encoded values into a caller-owned `BytesMut`.
pub struct CompactWriter<'a> {
    buf: &'a mut BytesMut,
    last_field_id: Vec<i16>,
    pending_bool_field_id: Option<i16>,
}

impl<'a> CompactWriter<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self {
            buf,
            last_field_id: Vec::new(),
            pending_bool_field_id: None,
        }
    }

    fn write_varint<T: VarInt>(&mut self, value: T) {
        let mut tmp = [0u8; 10];
        let len = value.encode_var(&mut tmp);
        self.buf.put_slice(&tmp[..len]);
    }

    fn write_field_header(&mut self, compact_type: u8, id: i16) {
        let last = *self.last_field_id.last().unwrap_or(&0);
        let delta = id.wrapping_sub(last);
        if delta > 0 && delta <= 15 {
            self.buf.put_u8(((delta as u8) << 4) | compact_type);
        } else {
            self.buf.put_u8(compact_type);
            self.write_varint(id);
        }
        if let Some(slot) = self.last_field_id.last_mut() {
            *slot = id;
        }
    }

    fn write_collection_header(&mut self, size: usize, element_type: TType) -> Result<(), CodecError> {
        let code = ttype_to_compact(element_type)?;
        if size < 15 {
            self.buf.put_u8(((size as u8) << 4) | code);
        } else {
            self.buf.put_u8(0xf0 | code);
            self.write_varint(size as u32);
        }
        Ok(())
    }
}

impl<'a> ProtocolWriter for CompactWriter<'a> {
    fn write_message_begin(&mut self, identifier: &TMessageIdentifier) {
        self.buf.put_u8(PROTOCOL_ID);
        self.buf
            .put_u8((VERSION & VERSION_MASK) | (u8::from(identifier.message_type) << TYPE_SHIFT_AMOUNT));
        self.write_varint(identifier.sequence_number as u32);
        self.write_string(&identifier.name);
    }

    fn write_message_end(&mut self) {}

    fn write_struct_begin(&mut self, _identifier: &TStructIdentifier) {
        self.last_field_id.push(0);
    }

    fn write_struct_end(&mut self) {
        self.last_field_id.pop();
    }

    fn write_field_begin(&mut self, field_type: TType, id: i16) {
        if field_type == TType::Bool {
            self.pending_bool_field_id = Some(id);
            return;
        }
        let code = ttype_to_compact(field_type).unwrap_or(CT_STOP);
        self.write_field_header(code, id);
    }

    fn write_field_end(&mut self) {}

    fn write_field_stop(&mut self) {
        self.buf.put_u8(CT_STOP);
    }

    fn write_list_begin(&mut self, identifier: &TListIdentifier) {
        let _ = self.write_collection_header(identifier.size, identifier.element_type);
    }

    fn write_list_end(&mut self) {}

    fn write_set_begin(&mut self, identifier: &TSetIdentifier) {
        let _ = self.write_collection_header(identifier.size, identifier.element_type);
    }

    fn write_set_end(&mut self) {}

    fn write_map_begin(&mut self, identifier: &TMapIdentifier) {
        self.write_varint(identifier.size as u32);
        if identifier.size > 0 {
            let key_code = ttype_to_compact(identifier.key_type).unwrap_or(CT_STOP);
            let value_code = ttype_to_compact(identifier.value_type).unwrap_or(CT_STOP);
            self.buf.put_u8((key_code << 4) | value_code);
        }
    }

    fn write_map_end(&mut self) {}

    fn write_bool(&mut self, value: bool) {
        if let Some(id) = self.pending_bool_field_id.take() {
            let code = if value { CT_BOOLEAN_TRUE } else { CT_BOOLEAN_FALSE };
            self.write_field_header(code, id);
        } else {
            self.buf.put_u8(if value { CT_BOOLEAN_TRUE } else { CT_BOOLEAN_FALSE });
        }
    }

    fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    fn write_i16(&mut self, value: i16) {
        self.write_varint(value);
    }

    fn write_i32(&mut self, value: i32) {
        self.write_varint(value);
    }

    fn write_i64(&mut self, value: i64) {
        self.write_varint(value);
    }

    fn write_double(&mut self, value: f64) {
        self.buf.put_slice(&value.to_le_bytes());
    }

    fn write_string(&mut self, value: &str) {
        self.write_binary(value.as_bytes());
    }

    fn write_binary(&mut self, value: &[u8]) {
        self.write_varint(value.len() as u32);
        self.buf.put_slice(value);
    }
}
