//! The Codec Registry (spec §4.4): resolves a `ThriftType` to an
//! `Arc<dyn Codec>`, memoizing composed codecs the same way
//! `crate::catalog` memoizes `ThriftType`s, and using the identical
//! placeholder trick to break cycles through recursive struct codecs.

pub mod container;
pub mod enum_codec;
pub mod scalar;
pub mod struct_codec;

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{Arc, OnceLock, RwLock},
};

use crate::{
    metadata::{Coercion, DecodedValue, ThriftType},
    thrift::TType,
    wire::{ProtocolReader, ProtocolWriter},
    CodecError, CodecErrorKind,
};

pub use container::{ListCodec, MapCodec, SetCodec};
pub use enum_codec::EnumCodec;
pub use struct_codec::StructCodec;

/// A value codec: reads/writes one `ThriftType`'s wire representation.
/// Object-safe so the struct codec engine and RPC dispatcher can hold
/// `Arc<dyn Codec>` without knowing the concrete value type (spec §9
/// "Polymorphism": "a capability set `{read, write}`... virtual dispatch
/// only for the `Codec` interface itself").
pub trait Codec: Send + Sync {
    fn wire_type(&self) -> TType;
    fn read(&self, reader: &mut dyn ProtocolReader) -> Result<DecodedValue, CodecError>;
    fn write(&self, value: &(dyn Any + Send), writer: &mut dyn ProtocolWriter) -> Result<(), CodecError>;
}

/// Wraps an inner codec with a user-domain `Coercion`, so a field whose
/// Rust type isn't natively representable (e.g. a newtype over `i64`)
/// still reads/writes through an ordinary built-in codec.
pub struct CoercedCodec {
    inner: Arc<dyn Codec>,
    coercion: Coercion,
}

impl CoercedCodec {
    pub fn new(inner: Arc<dyn Codec>, coercion: Coercion) -> Self {
        Self { inner, coercion }
    }
}

impl Codec for CoercedCodec {
    fn wire_type(&self) -> TType {
        self.inner.wire_type()
    }

    fn read(&self, reader: &mut dyn ProtocolReader) -> Result<DecodedValue, CodecError> {
        let wire_value = self.inner.read(reader)?;
        Ok((self.coercion.from_wire)(wire_value))
    }

    fn write(&self, value: &(dyn Any + Send), writer: &mut dyn ProtocolWriter) -> Result<(), CodecError> {
        let wire_value = (self.coercion.to_wire)(value);
        self.inner.write(wire_value.as_ref(), writer)
    }
}

/// A codec not yet finished building, standing in for a struct codec
/// that is still walking its own fields (one of which may recurse back
/// to the same struct type). Ground: the same `OnceLock` placeholder
/// technique as `crate::catalog::TypeCatalog::get_or_build_struct`.
struct DeferredCodec {
    wire_type: TType,
    cell: Arc<OnceLock<Arc<dyn Codec>>>,
}

impl Codec for DeferredCodec {
    fn wire_type(&self) -> TType {
        self.wire_type
    }

    fn read(&self, reader: &mut dyn ProtocolReader) -> Result<DecodedValue, CodecError> {
        self.resolved()?.read(reader)
    }

    fn write(&self, value: &(dyn Any + Send), writer: &mut dyn ProtocolWriter) -> Result<(), CodecError> {
        self.resolved()?.write(value, writer)
    }
}

impl DeferredCodec {
    fn resolved(&self) -> Result<&Arc<dyn Codec>, CodecError> {
        self.cell.get().ok_or_else(|| {
            CodecError::new(
                CodecErrorKind::Metadata,
                "struct codec used before its own construction finished",
            )
        })
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Hash)]
enum CodecKey {
    Bool,
    I8,
    I16,
    I32,
    I64,
    Double,
    String,
    Binary,
    /// Identity of the `Arc<EnumMetadata>`/`LazyStruct` cell, for
    /// memoizing composed enum/struct/container codecs.
    Struct(usize),
    Enum(usize),
    List(usize),
    Set(usize),
    Map(usize),
}

#[derive(Default)]
pub struct CodecRegistry {
    cache: RwLock<HashMap<CodecKey, Arc<dyn Codec>>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve (building and memoizing as needed) the codec for `ttype`.
    pub fn get_or_build(&self, ttype: &ThriftType) -> Result<Arc<dyn Codec>, CodecError> {
        let key = match ttype {
            ThriftType::Bool => return Ok(scalar::bool_codec()),
            ThriftType::I8 => return Ok(scalar::i8_codec()),
            ThriftType::I16 => return Ok(scalar::i16_codec()),
            ThriftType::I32 => return Ok(scalar::i32_codec()),
            ThriftType::I64 => return Ok(scalar::i64_codec()),
            ThriftType::Double => return Ok(scalar::double_codec()),
            ThriftType::String => return Ok(scalar::string_codec()),
            ThriftType::Binary => return Ok(scalar::binary_codec()),
            ThriftType::Void => {
                return Err(CodecError::new(
                    CodecErrorKind::Metadata,
                    "Void has no codec; it is return-type-only",
                ))
            }
            ThriftType::Enum(meta) => CodecKey::Enum(Arc::as_ptr(meta) as *const () as usize),
            ThriftType::Struct(cell) => {
                CodecKey::Struct(Arc::as_ptr(cell) as *const () as usize)
            }
            ThriftType::List(_, id) => CodecKey::List(type_id_key(*id)),
            ThriftType::Set(_, id) => CodecKey::Set(type_id_key(*id)),
            ThriftType::Map(_, _, id) => CodecKey::Map(type_id_key(*id)),
        };

        if let Some(codec) = self.cache.read().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Ok(codec.clone());
        }

        match ttype {
            ThriftType::Enum(meta) => {
                let codec: Arc<dyn Codec> = Arc::new(EnumCodec::new(meta.clone()));
                self.publish(key, codec.clone());
                Ok(codec)
            }
            ThriftType::Struct(cell) => self.build_struct(key, cell.clone()),
            ThriftType::List(elem, _) => {
                let elem_codec = self.get_or_build(elem)?;
                let codec: Arc<dyn Codec> = Arc::new(ListCodec::new(elem_codec));
                self.publish(key, codec.clone());
                Ok(codec)
            }
            ThriftType::Set(elem, _) => {
                let elem_codec = self.get_or_build(elem)?;
                let codec: Arc<dyn Codec> = Arc::new(SetCodec::new(elem_codec));
                self.publish(key, codec.clone());
                Ok(codec)
            }
            ThriftType::Map(k, v, _) => {
                let key_codec = self.get_or_build(k)?;
                let value_codec = self.get_or_build(v)?;
                let codec: Arc<dyn Codec> = Arc::new(MapCodec::new(key_codec, value_codec));
                self.publish(key, codec.clone());
                Ok(codec)
            }
            _ => unreachable!("scalar/void types returned above"),
        }
    }

    fn build_struct(
        &self,
        key: CodecKey,
        cell: crate::metadata::LazyStruct,
    ) -> Result<Arc<dyn Codec>, CodecError> {
        let deferred_cell = Arc::new(OnceLock::new());
        let deferred: Arc<dyn Codec> = Arc::new(DeferredCodec {
            wire_type: TType::Struct,
            cell: deferred_cell.clone(),
        });
        self.publish(key, deferred.clone());

        let metadata = cell.get().ok_or_else(|| {
            CodecError::new(
                CodecErrorKind::Metadata,
                "struct metadata must be fully built before codecs are constructed",
            )
        })?;
        let struct_codec: Arc<dyn Codec> = Arc::new(StructCodec::build(metadata, self)?);
        let _ = deferred_cell.set(struct_codec);

        Ok(deferred)
    }

    fn publish(&self, key: CodecKey, codec: Arc<dyn Codec>) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_insert(codec);
    }
}

fn type_id_key(id: TypeId) -> usize {
    // `TypeId` isn't guaranteed to expose a stable integer across Rust
    // versions, but within one process/build it is `Copy`+`Hash`, so we
    // hash it down to a `usize` bucket purely as a cache key, never
    // serialized or compared across processes.
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish() as usize
}

#[cfg(test)]
mod tests {
    use std::any::TypeId;

    use super::*;
    use crate::metadata::{Category, FieldMetadata, StructMetadataBuilder};

    #[test]
    fn scalar_codecs_have_the_expected_wire_type() {
        let registry = CodecRegistry::new();
        assert_eq!(registry.get_or_build(&ThriftType::Bool).unwrap().wire_type(), TType::Bool);
        assert_eq!(registry.get_or_build(&ThriftType::I64).unwrap().wire_type(), TType::I64);
        assert_eq!(
            registry.get_or_build(&ThriftType::String).unwrap().wire_type(),
            TType::Binary
        );
    }

    #[test]
    fn void_has_no_codec() {
        let registry = CodecRegistry::new();
        let err = registry.get_or_build(&ThriftType::Void).unwrap_err();
        assert!(matches!(err.kind, CodecErrorKind::Metadata));
    }

    #[test]
    fn list_codec_is_memoized_by_element_type_id() {
        let registry = CodecRegistry::new();
        let list_type = ThriftType::List(Box::new(ThriftType::I32), TypeId::of::<Vec<i32>>());
        let a = registry.get_or_build(&list_type).unwrap();
        let b = registry.get_or_build(&list_type).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn struct_codec_resolves_through_recursive_field() {
        struct Node {
            #[allow(dead_code)]
            children: Vec<()>,
        }

        let cell: crate::metadata::LazyStruct = Arc::new(OnceLock::new());
        let recursive_field_type = ThriftType::Struct(cell.clone());
        let metadata = StructMetadataBuilder::new("Node", Category::Struct)
            .field(FieldMetadata::new(1, "child", recursive_field_type).optional())
            .default_and_inject(|| Box::new(Node { children: Vec::new() }) as DecodedValue)
            .build()
            .unwrap();
        cell.set(metadata).unwrap();

        let registry = CodecRegistry::new();
        let codec = registry.get_or_build(&ThriftType::Struct(cell)).unwrap();
        assert_eq!(codec.wire_type(), TType::Struct);
    }
}
