//! `TypeCatalog`: the registry mapping a user-domain Rust type to its
//! canonical `ThriftType`, memoized and cycle-broken so mutually
//! recursive structs resolve instead of recursing forever. Ground:
//! spec's "insertions are serialized and publish a fully constructed
//! entry" contract (§4.4) maps directly onto a `RwLock`-guarded map, the
//! same register-once/read-many shape the teacher crate's header maps
//! follow; the catalog itself is supplemented (the teacher crate has no
//! type registry of its own since it isn't a generic ORM-style codec).

use std::{
    any::TypeId,
    collections::HashMap,
    sync::{Arc, OnceLock, RwLock},
};

use crate::{
    metadata::{Coercion, LazyStruct, StructMetadata, ThriftType},
    CodecError, CodecErrorKind,
};

enum CatalogEntry {
    /// A struct whose fields are still being walked; recursive field
    /// types resolve to `ThriftType::Struct` over this same cell instead
    /// of re-entering construction.
    Building(LazyStruct),
    Ready(ThriftType),
}

#[derive(Default)]
pub struct TypeCatalog {
    entries: RwLock<HashMap<TypeId, CatalogEntry>>,
    coercions: RwLock<HashMap<TypeId, Coercion>>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized `ThriftType` for `type_id`, whether the
    /// struct it names (if any) is fully built yet or still `Building`.
    pub fn lookup(&self, type_id: TypeId) -> Option<ThriftType> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        match entries.get(&type_id)? {
            CatalogEntry::Ready(t) => Some(t.clone()),
            CatalogEntry::Building(cell) => Some(ThriftType::Struct(cell.clone())),
        }
    }

    /// Get-or-build a struct's `ThriftType`. If `type_id` is unseen, a
    /// `Building` placeholder is published before `build` runs, so any
    /// field type `build` constructs for a recursive reference to the
    /// same `type_id` observes the placeholder (via a nested call to
    /// this same method, or `lookup`) instead of looping. `build` must
    /// return the completed `StructMetadata`; this method fills the
    /// cell and republishes the entry as `Ready`.
    pub fn get_or_build_struct<F>(&self, type_id: TypeId, build: F) -> Result<ThriftType, CodecError>
    where
        F: FnOnce(&LazyStruct) -> Result<StructMetadata, CodecError>,
    {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(&type_id) {
                Some(CatalogEntry::Ready(t)) => return Ok(t.clone()),
                Some(CatalogEntry::Building(cell)) => {
                    return Ok(ThriftType::Struct(cell.clone()))
                }
                None => {}
            }
        }

        let cell: LazyStruct = Arc::new(OnceLock::new());
        {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            // Another thread may have raced us between the read above
            // and this write; `or_insert_with` keeps whichever cell was
            // published first so every caller converges on one `Arc`.
            entries
                .entry(type_id)
                .or_insert_with(|| CatalogEntry::Building(cell.clone()));
        }
        let cell = match self.entries.read().unwrap_or_else(|e| e.into_inner()).get(&type_id) {
            Some(CatalogEntry::Building(cell)) => cell.clone(),
            Some(CatalogEntry::Ready(t)) => return Ok(t.clone()),
            None => unreachable!("just inserted"),
        };

        let metadata = build(&cell)?;
        cell.set(metadata).map_err(|_| {
            CodecError::new(
                CodecErrorKind::Metadata,
                "struct metadata was already published for this type",
            )
        })?;

        let ready = ThriftType::Struct(cell);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(type_id, CatalogEntry::Ready(ready.clone()));
        Ok(ready)
    }

    /// Register a reversible coercion for `type_id`, consulted by the
    /// codec registry when building a scalar/list/set/map codec whose
    /// element type isn't natively representable.
    pub fn register_coercion(&self, type_id: TypeId, coercion: Coercion) {
        let mut coercions = self.coercions.write().unwrap_or_else(|e| e.into_inner());
        coercions.insert(type_id, coercion);
    }

    pub fn coercion_for(&self, type_id: TypeId) -> Option<Coercion> {
        let coercions = self.coercions.read().unwrap_or_else(|e| e.into_inner());
        coercions.get(&type_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Category, ConstructionPlan, DecodedValue, FieldMetadata, StructMetadataBuilder};

    struct Tree {
        #[allow(dead_code)]
        value: i32,
    }

    fn leaf_metadata() -> StructMetadata {
        StructMetadataBuilder::new("Tree", Category::Struct)
            .field(FieldMetadata::new(1, "value", ThriftType::I32).required())
            .default_and_inject(|| Box::new(Tree { value: 0 }) as DecodedValue)
            .build()
            .unwrap()
    }

    #[test]
    fn unseen_type_has_no_entry() {
        let catalog = TypeCatalog::new();
        assert!(catalog.lookup(TypeId::of::<Tree>()).is_none());
    }

    #[test]
    fn get_or_build_struct_memoizes_by_type_id() {
        let catalog = TypeCatalog::new();
        let type_id = TypeId::of::<Tree>();

        let first = catalog.get_or_build_struct(type_id, |_cell| Ok(leaf_metadata())).unwrap();
        let second = catalog
            .get_or_build_struct(type_id, |_cell| panic!("must not rebuild an already-Ready entry"))
            .unwrap();

        match (first, second) {
            (ThriftType::Struct(a), ThriftType::Struct(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("expected struct types"),
        }
    }

    /// A field type can recurse back to the struct currently under
    /// construction (direct or mutual recursion) by reading the same
    /// `LazyStruct` cell the in-progress build was handed; the catalog
    /// must report it as `Building` (a `ThriftType::Struct` over the
    /// still-empty cell) rather than re-entering `build`.
    #[test]
    fn recursive_field_resolves_through_building_placeholder() {
        let catalog = TypeCatalog::new();
        let type_id = TypeId::of::<Tree>();

        let result = catalog.get_or_build_struct(type_id, |cell| {
            let recursive_field_type = ThriftType::Struct(cell.clone());
            assert!(matches!(recursive_field_type, ThriftType::Struct(_)));
            assert!(cell.get().is_none(), "cell must still be empty mid-construction");

            // A second lookup from within the same build observes the
            // same Building placeholder instead of recursing.
            match catalog.lookup(type_id) {
                Some(ThriftType::Struct(placeholder)) => assert!(Arc::ptr_eq(&placeholder, cell)),
                other => panic!("expected Building placeholder, got {other:?}"),
            }

            Ok(StructMetadata {
                name: "Tree",
                category: Category::Struct,
                fields: vec![FieldMetadata::new(1, "child", recursive_field_type).optional()],
                construction: ConstructionPlan::DefaultAndInject(Arc::new(|| {
                    Box::new(Tree { value: 0 }) as DecodedValue
                })),
            })
        });

        match result.unwrap() {
            ThriftType::Struct(cell) => assert!(cell.get().is_some(), "cell must be published after build"),
            _ => panic!("expected struct type"),
        }
    }

    #[test]
    fn coercion_registration_round_trips() {
        let catalog = TypeCatalog::new();
        let type_id = TypeId::of::<i64>();
        assert!(catalog.coercion_for(type_id).is_none());

        catalog.register_coercion(
            type_id,
            Coercion {
                from_wire: Arc::new(|v| v),
                to_wire: Arc::new(|v| {
                    let n = v.downcast_ref::<i64>().unwrap();
                    Box::new(*n)
                }),
            },
        );
        assert!(catalog.coercion_for(type_id).is_some());
    }
}
