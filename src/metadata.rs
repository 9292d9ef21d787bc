//! The normalized description of a user-domain type: `ThriftType` and its
//! supporting `StructMetadata`/`FieldMetadata`/`EnumMetadata`/
//! `MethodMetadata` shapes. This is the reflection-free stand-in for the
//! source's annotation-driven discovery (see `crate::catalog`): nothing
//! here inspects a Rust type's fields at runtime, it is all explicit
//! descriptor data plus type-erased accessor closures supplied by hand.

use std::{
    any::{Any, TypeId},
    fmt::{self, Debug, Formatter},
    sync::{Arc, OnceLock},
};

use crate::{thrift::TType, CodecError};

/// A struct's metadata, shared behind a cell that may still be empty.
/// Recursive (directly or mutually) struct types hand out this same
/// `Arc` to every field that refers back to the type under
/// construction; `TypeCatalog::get_or_build_struct` is the only thing
/// that ever calls `.set()` on it (see `crate::catalog`).
pub type LazyStruct = Arc<OnceLock<StructMetadata>>;

/// Identifies which Thrift wire category a `ThriftType` belongs to, and
/// for the compound kinds, carries the supporting metadata.
#[derive(Clone)]
pub enum ThriftType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    Double,
    String,
    Binary,
    Enum(Arc<EnumMetadata>),
    Struct(LazyStruct),
    List(Box<ThriftType>, TypeId),
    Set(Box<ThriftType>, TypeId),
    Map(Box<ThriftType>, Box<ThriftType>, TypeId),
    /// Return-type-only: a method declared to return nothing.
    Void,
}

impl ThriftType {
    /// The one-byte wire tag this type is framed with.
    pub fn wire_type(&self) -> TType {
        match self {
            ThriftType::Bool => TType::Bool,
            ThriftType::I8 => TType::I8,
            ThriftType::I16 => TType::I16,
            ThriftType::I32 => TType::I32,
            ThriftType::I64 => TType::I64,
            ThriftType::Double => TType::Double,
            ThriftType::String | ThriftType::Binary => TType::Binary,
            ThriftType::Enum(_) => TType::I32,
            ThriftType::Struct(_) => TType::Struct,
            ThriftType::List(..) => TType::List,
            ThriftType::Set(..) => TType::Set,
            ThriftType::Map(..) => TType::Map,
            ThriftType::Void => TType::Void,
        }
    }
}

impl Debug for ThriftType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ThriftType::Bool => write!(f, "Bool"),
            ThriftType::I8 => write!(f, "I8"),
            ThriftType::I16 => write!(f, "I16"),
            ThriftType::I32 => write!(f, "I32"),
            ThriftType::I64 => write!(f, "I64"),
            ThriftType::Double => write!(f, "Double"),
            ThriftType::String => write!(f, "String"),
            ThriftType::Binary => write!(f, "Binary"),
            ThriftType::Enum(e) => write!(f, "Enum({})", e.name),
            ThriftType::Struct(s) => match s.get() {
                Some(m) => write!(f, "Struct({})", m.name),
                None => write!(f, "Struct(<building>)"),
            },
            ThriftType::List(elem, _) => write!(f, "List({:?})", elem),
            ThriftType::Set(elem, _) => write!(f, "Set({:?})", elem),
            ThriftType::Map(k, v, _) => write!(f, "Map({:?}, {:?})", k, v),
            ThriftType::Void => write!(f, "Void"),
        }
    }
}

/// Per-field requiredness policy (spec GLOSSARY: "Requiredness").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Requiredness {
    Required,
    Optional,
    /// No explicit marker; also the default when a descriptor doesn't
    /// specify one, for both struct fields and method parameters.
    None,
}

/// What a `FieldMetadata` is standing in for within its containing
/// struct: an ordinary field, or the hidden discriminator of a union.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldKind {
    Field,
    UnionDiscriminator,
}

/// A value decoded off the wire, carried generically until an injection
/// point consumes it.
pub type DecodedValue = Box<dyn Any + Send>;

/// One way a decoded field value can be delivered into a struct under
/// construction: positional constructor argument, a setter method, or a
/// direct field write performed after default-construction.
#[derive(Clone)]
pub enum Injection {
    /// Value becomes argument `position` (0-based) of the designated
    /// constructor.
    ConstructorArg(usize),
    /// Value is passed to a setter/builder method on the
    /// partially-built instance.
    Setter(Arc<dyn Fn(&mut (dyn Any + Send), DecodedValue) + Send + Sync>),
    /// Value is written directly into a field of the instance.
    DirectSet(Arc<dyn Fn(&mut (dyn Any + Send), DecodedValue) + Send + Sync>),
}

/// How a field's value is produced during write: a getter invoked on the
/// instance, or a direct field read. Returns `None` when the field has
/// no value set (permitted unless `requiredness = Required`).
pub type Extraction = Arc<dyn Fn(&(dyn Any + Send)) -> Option<DecodedValue> + Send + Sync>;

/// A bidirectional transform between a user-domain type and the
/// natively wire-representable type a codec already knows how to
/// read/write (spec GLOSSARY: "Coercion").
#[derive(Clone)]
pub struct Coercion {
    pub from_wire: Arc<dyn Fn(DecodedValue) -> DecodedValue + Send + Sync>,
    pub to_wire: Arc<dyn Fn(&(dyn Any + Send)) -> DecodedValue + Send + Sync>,
}

impl Debug for Coercion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Coercion")
    }
}

#[derive(Clone)]
pub struct FieldMetadata {
    pub id: i16,
    pub name: &'static str,
    pub requiredness: Requiredness,
    pub ttype: ThriftType,
    pub kind: FieldKind,
    pub injections: Vec<Injection>,
    pub extraction: Option<Extraction>,
    pub coercion: Option<Coercion>,
    /// Supplies a value for `ConstructionPlan::Constructor` when this
    /// field is absent after decode (legal only when `requiredness !=
    /// Required`, since a `Constructor` plan has no way to leave an
    /// argument position unfilled). `Builder`/`DefaultAndInject` plans
    /// never consult this — an absent field there simply isn't injected
    /// and the default-constructed instance's own field default stands.
    pub default: Option<Arc<dyn Fn() -> DecodedValue + Send + Sync>>,
}

impl Debug for FieldMetadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldMetadata")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("requiredness", &self.requiredness)
            .field("ttype", &self.ttype)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Which construction strategy a `StructMetadata` uses (spec §4.3,
/// resolution order: constructor > builder > default+inject).
/// `FromUnionField` is a supplemented fourth strategy, specific to
/// `Category::Union`: Rust's idiomatic representation of a Thrift union
/// is a field-less `enum` (ground: the same shape apache-thrift and
/// volo-thrift codegen both emit), which fits none of the struct-shaped
/// strategies above — there's no "default" union variant to construct
/// and then mutate.
#[derive(Clone)]
pub enum ConstructionPlan {
    /// Call this constructor with arguments assembled by position, in
    /// the order `FieldMetadata::injections` designates `ConstructorArg`
    /// slots for.
    Constructor(Arc<dyn Fn(Vec<DecodedValue>) -> DecodedValue + Send + Sync>),
    /// Two-phase: create a builder, call per-field setters (carried on
    /// each field's own `Injection::Setter`), then this terminal call.
    Builder {
        new_builder: Arc<dyn Fn() -> DecodedValue + Send + Sync>,
        build: Arc<dyn Fn(DecodedValue) -> DecodedValue + Send + Sync>,
    },
    /// Default-construct, then run each field's injection in id order.
    DefaultAndInject(Arc<dyn Fn() -> DecodedValue + Send + Sync>),
    /// Build the one set variant directly from its field id and decoded
    /// value: `fn(id, value) -> instance`.
    FromUnionField(Arc<dyn Fn(i16, DecodedValue) -> DecodedValue + Send + Sync>),
}

impl Debug for ConstructionPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConstructionPlan::Constructor(_) => "Constructor",
            ConstructionPlan::Builder { .. } => "Builder",
            ConstructionPlan::DefaultAndInject(_) => "DefaultAndInject",
            ConstructionPlan::FromUnionField(_) => "FromUnionField",
        };
        write!(f, "ConstructionPlan::{label}")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Category {
    Struct,
    Union,
    Exception,
}

#[derive(Debug)]
pub struct StructMetadata {
    pub name: &'static str,
    pub category: Category,
    /// Sorted by id; the struct codec engine writes fields in this order.
    pub fields: Vec<FieldMetadata>,
    pub construction: ConstructionPlan,
}

impl StructMetadata {
    pub fn field_by_id(&self, id: i16) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.id == id)
    }
}

#[derive(Debug)]
pub struct EnumMetadata {
    pub name: &'static str,
    pub explicit: bool,
    /// Populated when `explicit`; empty (ordinals only) otherwise.
    pub value_to_constant: Vec<(i32, &'static str)>,
    /// Number of declared variants; used to range-check implicit
    /// (ordinal) enums on decode.
    pub variant_count: usize,
}

impl EnumMetadata {
    pub fn constant_for(&self, value: i32) -> Option<&'static str> {
        if self.explicit {
            self.value_to_constant
                .iter()
                .find(|(v, _)| *v == value)
                .map(|(_, name)| *name)
        } else if value >= 0 && (value as usize) < self.variant_count {
            Some("")
        } else {
            None
        }
    }

    pub fn is_valid(&self, value: i32) -> bool {
        if self.explicit {
            self.value_to_constant.iter().any(|(v, _)| *v == value)
        } else {
            value >= 0 && (value as usize) < self.variant_count
        }
    }
}

/// A declared method argument or return/exception type, named the way
/// `MethodMetadata` wants it (spec §3: "MethodMetadata").
#[derive(Debug)]
pub struct MethodMetadata {
    pub name: &'static str,
    pub qualified_name: &'static str,
    pub return_type: ThriftType,
    /// Ids default to 1-based declaration order when not explicit.
    pub parameters: Vec<FieldMetadata>,
    /// Declared exception types keyed by their `_result` field id.
    pub exceptions: Vec<(i16, ThriftType)>,
    pub oneway: bool,
    pub is_async: bool,
}

impl FieldMetadata {
    /// Starts a field descriptor defaulting to `Requiredness::None` (spec
    /// §9 Open Question, resolved: unspecified defaults to `NONE` for
    /// both struct fields and method parameters).
    pub fn new(id: i16, name: &'static str, ttype: ThriftType) -> Self {
        FieldMetadata {
            id,
            name,
            requiredness: Requiredness::None,
            ttype,
            kind: FieldKind::Field,
            injections: Vec::new(),
            extraction: None,
            coercion: None,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.requiredness = Requiredness::Required;
        self
    }

    pub fn optional(mut self) -> Self {
        self.requiredness = Requiredness::Optional;
        self
    }

    /// Marks this field as the hidden discriminator of a union rather
    /// than an ordinary field (spec §3: `FieldKind::THRIFT_UNION_ID`).
    pub fn union_discriminator(mut self) -> Self {
        self.kind = FieldKind::UnionDiscriminator;
        self.id = crate::thrift::UNION_DISCRIMINATOR_ID;
        self
    }

    pub fn with_coercion(mut self, coercion: Coercion) -> Self {
        self.coercion = Some(coercion);
        self
    }

    pub fn with_default(mut self, default: impl Fn() -> DecodedValue + Send + Sync + 'static) -> Self {
        self.default = Some(Arc::new(default));
        self
    }

    /// Registers this field as positional argument `position` of the
    /// owning struct's designated constructor.
    pub fn constructor_arg(mut self, position: usize) -> Self {
        self.injections.push(Injection::ConstructorArg(position));
        self
    }

    /// Registers a setter-style injection: `set(&mut S, V)` called on a
    /// builder or partially-built instance of `S` with the decoded `V`.
    pub fn setter<S: 'static, V: 'static>(
        mut self,
        set: impl Fn(&mut S, V) + Send + Sync + 'static,
    ) -> Self {
        self.injections.push(Injection::Setter(Arc::new(move |obj, value| {
            let obj = obj
                .downcast_mut::<S>()
                .expect("setter injection target type mismatch");
            let value = *value.downcast::<V>().expect("setter injection value type mismatch");
            set(obj, value);
        })));
        self
    }

    /// Registers a direct-field-write injection, used by the
    /// default-construct-and-inject plan.
    pub fn direct_set<S: 'static, V: 'static>(
        mut self,
        set: impl Fn(&mut S, V) + Send + Sync + 'static,
    ) -> Self {
        self.injections.push(Injection::DirectSet(Arc::new(move |obj, value| {
            let obj = obj
                .downcast_mut::<S>()
                .expect("direct-set injection target type mismatch");
            let value = *value.downcast::<V>().expect("direct-set injection value type mismatch");
            set(obj, value);
        })));
        self
    }

    /// Registers a getter extraction for a field that always has a value
    /// once `S` is constructed (typically a `REQUIRED` or `NONE` field).
    pub fn getter<S: 'static, V: Send + 'static>(
        mut self,
        get: impl Fn(&S) -> V + Send + Sync + 'static,
    ) -> Self {
        self.extraction = Some(Arc::new(move |obj| {
            let obj = obj.downcast_ref::<S>().expect("getter source type mismatch");
            Some(Box::new(get(obj)) as DecodedValue)
        }));
        self
    }

    /// Registers a getter extraction for an `OPTIONAL` field backed by an
    /// `Option<V>`; a `None` return omits the field on write.
    pub fn getter_optional<S: 'static, V: Send + 'static>(
        mut self,
        get: impl Fn(&S) -> Option<V> + Send + Sync + 'static,
    ) -> Self {
        self.extraction = Some(Arc::new(move |obj| {
            let obj = obj.downcast_ref::<S>().expect("getter source type mismatch");
            get(obj).map(|value| Box::new(value) as DecodedValue)
        }));
        self
    }
}

/// Hand-rolled coercions (spec §4.2 `registerCoercion`) for the container
/// shapes a `ThriftType::List`/`Set`/`Map` codec produces natively
/// (`Vec<DecodedValue>` / `Vec<(DecodedValue, DecodedValue)>`, see
/// `crate::codec::container`) versus the concrete Rust collection a
/// struct field actually holds. Every list/set/map field needs one of
/// these (or a hand-written equivalent) because the container codecs
/// themselves stay type-erased — there is no reflection to discover the
/// concrete element type from.
pub mod coercion {
    use std::collections::{HashMap, HashSet};
    use std::hash::Hash;

    use super::{Coercion, DecodedValue};
    use std::sync::Arc;

    pub fn list<T: Clone + Send + 'static>() -> Coercion {
        Coercion {
            from_wire: Arc::new(|boxed: DecodedValue| {
                let items = *boxed
                    .downcast::<Vec<DecodedValue>>()
                    .expect("list coercion: wire value wasn't Vec<DecodedValue>");
                let vec: Vec<T> = items
                    .into_iter()
                    .map(|b| *b.downcast::<T>().expect("list coercion: element type mismatch"))
                    .collect();
                Box::new(vec)
            }),
            to_wire: Arc::new(|value| {
                let vec = value
                    .downcast_ref::<Vec<T>>()
                    .expect("list coercion: field type mismatch");
                let items: Vec<DecodedValue> =
                    vec.iter().cloned().map(|v| Box::new(v) as DecodedValue).collect();
                Box::new(items)
            }),
        }
    }

    pub fn set<T: Clone + Eq + Hash + Send + 'static>() -> Coercion {
        Coercion {
            from_wire: Arc::new(|boxed: DecodedValue| {
                let items = *boxed
                    .downcast::<Vec<DecodedValue>>()
                    .expect("set coercion: wire value wasn't Vec<DecodedValue>");
                let set: HashSet<T> = items
                    .into_iter()
                    .map(|b| *b.downcast::<T>().expect("set coercion: element type mismatch"))
                    .collect();
                Box::new(set)
            }),
            to_wire: Arc::new(|value| {
                let set = value
                    .downcast_ref::<HashSet<T>>()
                    .expect("set coercion: field type mismatch");
                let items: Vec<DecodedValue> =
                    set.iter().cloned().map(|v| Box::new(v) as DecodedValue).collect();
                Box::new(items)
            }),
        }
    }

    pub fn map<K: Clone + Eq + Hash + Send + 'static, V: Clone + Send + 'static>() -> Coercion {
        Coercion {
            from_wire: Arc::new(|boxed: DecodedValue| {
                let entries = *boxed
                    .downcast::<Vec<(DecodedValue, DecodedValue)>>()
                    .expect("map coercion: wire value wasn't Vec<(DecodedValue, DecodedValue)>");
                let map: HashMap<K, V> = entries
                    .into_iter()
                    .map(|(k, v)| {
                        (
                            *k.downcast::<K>().expect("map coercion: key type mismatch"),
                            *v.downcast::<V>().expect("map coercion: value type mismatch"),
                        )
                    })
                    .collect();
                Box::new(map)
            }),
            to_wire: Arc::new(|value| {
                let map = value
                    .downcast_ref::<HashMap<K, V>>()
                    .expect("map coercion: field type mismatch");
                let entries: Vec<(DecodedValue, DecodedValue)> = map
                    .iter()
                    .map(|(k, v)| {
                        (Box::new(k.clone()) as DecodedValue, Box::new(v.clone()) as DecodedValue)
                    })
                    .collect();
                Box::new(entries)
            }),
        }
    }

    /// A coercion between a wire-native `i32` (what `EnumCodec` produces)
    /// and a concrete Rust enum `E`, via a pair of total/partial maps. Use
    /// when `E` isn't representable as a bare `i32` field.
    pub fn enum_value<E, ToI32, FromI32>(to_i32: ToI32, from_i32: FromI32) -> Coercion
    where
        E: Send + 'static,
        ToI32: Fn(&E) -> i32 + Send + Sync + 'static,
        FromI32: Fn(i32) -> E + Send + Sync + 'static,
    {
        Coercion {
            from_wire: Arc::new(move |boxed: DecodedValue| {
                let value = *boxed.downcast::<i32>().expect("enum coercion: wire value wasn't i32");
                Box::new(from_i32(value))
            }),
            to_wire: Arc::new(move |value| {
                let value = value.downcast_ref::<E>().expect("enum coercion: field type mismatch");
                Box::new(to_i32(value))
            }),
        }
    }
}

/// Accumulates `StructMetadata` construction, enforcing spec §4.3's
/// deterministic resolution order (constructor > builder >
/// default-construct-and-inject) and its metadata-error rules (duplicate
/// ids/names, more than one designated constructor).
pub struct StructMetadataBuilder {
    name: &'static str,
    category: Category,
    fields: Vec<FieldMetadata>,
    constructor: Option<Arc<dyn Fn(Vec<DecodedValue>) -> DecodedValue + Send + Sync>>,
    builder: Option<(
        Arc<dyn Fn() -> DecodedValue + Send + Sync>,
        Arc<dyn Fn(DecodedValue) -> DecodedValue + Send + Sync>,
    )>,
    default_ctor: Option<Arc<dyn Fn() -> DecodedValue + Send + Sync>>,
    union_ctor: Option<Arc<dyn Fn(i16, DecodedValue) -> DecodedValue + Send + Sync>>,
}

impl StructMetadataBuilder {
    pub fn new(name: &'static str, category: Category) -> Self {
        StructMetadataBuilder {
            name,
            category,
            fields: Vec::new(),
            constructor: None,
            builder: None,
            default_ctor: None,
            union_ctor: None,
        }
    }

    pub fn field(mut self, field: FieldMetadata) -> Self {
        self.fields.push(field);
        self
    }

    pub fn constructor(
        mut self,
        ctor: impl Fn(Vec<DecodedValue>) -> DecodedValue + Send + Sync + 'static,
    ) -> Self {
        self.constructor = Some(Arc::new(ctor));
        self
    }

    pub fn builder_constructor(
        mut self,
        new_builder: impl Fn() -> DecodedValue + Send + Sync + 'static,
        build: impl Fn(DecodedValue) -> DecodedValue + Send + Sync + 'static,
    ) -> Self {
        self.builder = Some((Arc::new(new_builder), Arc::new(build)));
        self
    }

    pub fn default_and_inject(
        mut self,
        new_default: impl Fn() -> DecodedValue + Send + Sync + 'static,
    ) -> Self {
        self.default_ctor = Some(Arc::new(new_default));
        self
    }

    pub fn union_from_field(
        mut self,
        ctor: impl Fn(i16, DecodedValue) -> DecodedValue + Send + Sync + 'static,
    ) -> Self {
        self.union_ctor = Some(Arc::new(ctor));
        self
    }

    /// Collects every validation problem instead of stopping at the
    /// first (spec §4.3 rules), for use by authoring/lint tooling.
    pub fn validate(&self) -> Vec<CodecError> {
        use std::collections::HashSet;

        let mut errors = Vec::new();

        let mut seen_ids = HashSet::new();
        let mut seen_names = HashSet::new();
        for field in &self.fields {
            if field.kind == FieldKind::Field && field.id < 0 {
                errors.push(CodecError::metadata(format!(
                    "{}: field id {} must be non-negative",
                    self.name, field.id
                )));
            }
            if field.kind == FieldKind::Field && !seen_ids.insert(field.id) {
                errors.push(CodecError::metadata(format!(
                    "{}: duplicate field id {}",
                    self.name, field.id
                )));
            }
            if !seen_names.insert(field.name) {
                errors.push(CodecError::metadata(format!(
                    "{}: duplicate field name {}",
                    self.name, field.name
                )));
            }
        }

        let designated = [
            self.constructor.is_some(),
            self.builder.is_some(),
            self.default_ctor.is_some(),
            self.union_ctor.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if designated == 0 {
            errors.push(CodecError::metadata(format!(
                "{}: no construction plan designated",
                self.name
            )));
        } else if designated > 1 {
            errors.push(CodecError::metadata(format!(
                "{}: more than one designated constructor",
                self.name
            )));
        }

        match self.category {
            Category::Union if self.union_ctor.is_none() => {
                errors.push(CodecError::metadata(format!(
                    "{}: union requires a union_from_field construction plan",
                    self.name
                )));
            }
            cat if cat != Category::Union && self.union_ctor.is_some() => {
                errors.push(CodecError::metadata(format!(
                    "{}: union_from_field construction plan is only valid for unions",
                    self.name
                )));
            }
            _ => {}
        }

        if self.constructor.is_some() {
            for field in &self.fields {
                if field.kind != FieldKind::Field {
                    continue;
                }
                let has_arg = field
                    .injections
                    .iter()
                    .any(|inj| matches!(inj, Injection::ConstructorArg(_)));
                if !has_arg {
                    errors.push(CodecError::metadata(format!(
                        "{}: field {} has no constructor-arg injection for the designated constructor",
                        self.name, field.name
                    )));
                }
                if field.requiredness != Requiredness::Required && field.default.is_none() {
                    errors.push(CodecError::metadata(format!(
                        "{}: optional field {} used in a constructor plan needs a default",
                        self.name, field.name
                    )));
                }
            }
        }

        errors
    }

    pub fn build(mut self) -> Result<StructMetadata, CodecError> {
        let mut errors = self.validate();
        if let Some(first) = errors.drain(..1).next() {
            return Err(first);
        }

        self.fields.sort_by_key(|f| f.id);

        let construction = if let Some(ctor) = self.constructor.take() {
            ConstructionPlan::Constructor(ctor)
        } else if let Some((new_builder, build)) = self.builder.take() {
            ConstructionPlan::Builder { new_builder, build }
        } else if let Some(union_ctor) = self.union_ctor.take() {
            ConstructionPlan::FromUnionField(union_ctor)
        } else {
            ConstructionPlan::DefaultAndInject(
                self.default_ctor.take().expect("validate() guarantees one plan is set"),
            )
        };

        Ok(StructMetadata {
            name: self.name,
            category: self.category,
            fields: self.fields,
            construction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Widget {
        id: i32,
    }

    #[test]
    fn duplicate_field_id_is_a_metadata_error() {
        let errors = StructMetadataBuilder::new("Widget", Category::Struct)
            .field(FieldMetadata::new(1, "a", ThriftType::I32).direct_set::<Widget, i32>(|_, _| {}))
            .field(FieldMetadata::new(1, "b", ThriftType::I32).direct_set::<Widget, i32>(|_, _| {}))
            .default_and_inject(|| Box::new(Widget::default()) as DecodedValue)
            .validate();
        assert!(errors.iter().any(|e| e.message.contains("duplicate field id")));
    }

    #[test]
    fn duplicate_field_name_is_a_metadata_error() {
        let errors = StructMetadataBuilder::new("Widget", Category::Struct)
            .field(FieldMetadata::new(1, "a", ThriftType::I32).direct_set::<Widget, i32>(|_, _| {}))
            .field(FieldMetadata::new(2, "a", ThriftType::I32).direct_set::<Widget, i32>(|_, _| {}))
            .default_and_inject(|| Box::new(Widget::default()) as DecodedValue)
            .validate();
        assert!(errors.iter().any(|e| e.message.contains("duplicate field name")));
    }

    #[test]
    fn negative_field_id_is_a_metadata_error() {
        let errors = StructMetadataBuilder::new("Widget", Category::Struct)
            .field(FieldMetadata::new(-1, "a", ThriftType::I32).direct_set::<Widget, i32>(|_, _| {}))
            .default_and_inject(|| Box::new(Widget::default()) as DecodedValue)
            .validate();
        assert!(errors.iter().any(|e| e.message.contains("must be non-negative")));
    }

    #[test]
    fn no_construction_plan_is_a_metadata_error() {
        let errors = StructMetadataBuilder::new("Widget", Category::Struct)
            .field(FieldMetadata::new(1, "a", ThriftType::I32))
            .validate();
        assert!(errors.iter().any(|e| e.message.contains("no construction plan")));
    }

    #[test]
    fn more_than_one_designated_constructor_is_a_metadata_error() {
        let errors = StructMetadataBuilder::new("Widget", Category::Struct)
            .field(
                FieldMetadata::new(1, "id", ThriftType::I32)
                    .required()
                    .constructor_arg(0),
            )
            .constructor(|mut args| args.remove(0))
            .default_and_inject(|| Box::new(Widget::default()) as DecodedValue)
            .validate();
        assert!(errors.iter().any(|e| e.message.contains("more than one designated constructor")));
    }

    #[test]
    fn union_without_union_constructor_is_a_metadata_error() {
        let errors = StructMetadataBuilder::new("U", Category::Union)
            .field(FieldMetadata::new(1, "a", ThriftType::I32))
            .default_and_inject(|| Box::new(()) as DecodedValue)
            .validate();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("requires a union_from_field construction plan")));
    }

    #[test]
    fn union_constructor_outside_union_category_is_a_metadata_error() {
        let errors = StructMetadataBuilder::new("Widget", Category::Struct)
            .field(FieldMetadata::new(1, "a", ThriftType::I32))
            .union_from_field(|_, v| v)
            .validate();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("only valid for unions")));
    }

    #[test]
    fn optional_field_in_constructor_plan_needs_a_default() {
        let errors = StructMetadataBuilder::new("Widget", Category::Struct)
            .field(
                FieldMetadata::new(1, "id", ThriftType::I32)
                    .optional()
                    .constructor_arg(0),
            )
            .constructor(|mut args| args.remove(0))
            .validate();
        assert!(errors.iter().any(|e| e.message.contains("needs a default")));
    }

    #[test]
    fn valid_struct_builds_with_fields_sorted_by_id() {
        let metadata = StructMetadataBuilder::new("Widget", Category::Struct)
            .field(
                FieldMetadata::new(2, "id", ThriftType::I32)
                    .required()
                    .direct_set::<Widget, i32>(|s, v| s.id = v)
                    .getter::<Widget, i32>(|s| s.id),
            )
            .field(
                FieldMetadata::new(1, "name", ThriftType::String)
                    .optional()
                    .direct_set::<Widget, String>(|_, _| {}),
            )
            .default_and_inject(|| Box::new(Widget::default()) as DecodedValue)
            .build()
            .unwrap();
        assert_eq!(metadata.fields.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(metadata.field_by_id(2).unwrap().name, "id");
    }

    #[test]
    fn union_discriminator_gets_sentinel_id() {
        let field = FieldMetadata::new(1, "kind", ThriftType::I32).union_discriminator();
        assert_eq!(field.id, crate::thrift::UNION_DISCRIMINATOR_ID);
        assert_eq!(field.kind, FieldKind::UnionDiscriminator);
    }

    #[test]
    fn enum_metadata_explicit_values() {
        let meta = EnumMetadata {
            name: "Color",
            explicit: true,
            value_to_constant: vec![(0, "RED"), (5, "BLUE")],
            variant_count: 2,
        };
        assert!(meta.is_valid(5));
        assert!(!meta.is_valid(1));
        assert_eq!(meta.constant_for(5), Some("BLUE"));
        assert_eq!(meta.constant_for(1), None);
    }

    #[test]
    fn enum_metadata_implicit_ordinals() {
        let meta = EnumMetadata {
            name: "Color",
            explicit: false,
            value_to_constant: Vec::new(),
            variant_count: 3,
        };
        assert!(meta.is_valid(0));
        assert!(meta.is_valid(2));
        assert!(!meta.is_valid(3));
        assert!(!meta.is_valid(-1));
    }

    #[test]
    fn list_coercion_round_trips_through_vec_of_decoded_values() {
        let c = coercion::list::<i32>();
        let wire: DecodedValue = Box::new(vec![
            Box::new(1i32) as DecodedValue,
            Box::new(2i32) as DecodedValue,
        ]);
        let native = (c.from_wire)(wire);
        let vec = native.downcast::<Vec<i32>>().unwrap();
        assert_eq!(*vec, vec![1, 2]);

        let back = (c.to_wire)(&*vec as &(dyn Any + Send));
        let items = back.downcast::<Vec<DecodedValue>>().unwrap();
        assert_eq!(items.len(), 2);
    }
}
