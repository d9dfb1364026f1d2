mod memory;

pub use memory::{
    AssociationDef, DiscriminatorDef, FieldDef, JoinTableDef, MemoryTypeModel, OrderBy, TypeDef,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Association multiplicity between two persisted types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    ManyToMany,
    OneToMany,
    ManyToOne,
    OneToOne,
}

impl AssociationKind {
    /// Collection-valued associations fetch multiple rows and project as
    /// collections; single-valued ones fetch one row and project as entities.
    pub fn is_collection_valued(self) -> bool {
        matches!(self, AssociationKind::ManyToMany | AssociationKind::OneToMany)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Metadata provider describing the persisted types a schema projects.
///
/// The engine only consumes this contract; `MemoryTypeModel` is a reference
/// implementation for tests and standalone tooling.
pub trait TypeModel {
    fn has_type(&self, type_name: &str) -> bool;

    fn has_field(&self, type_name: &str, field: &str) -> bool;

    fn has_association(&self, type_name: &str, name: &str) -> bool;

    fn association_kind(&self, type_name: &str, name: &str) -> Option<AssociationKind>;

    fn is_collection_valued(&self, type_name: &str, name: &str) -> bool {
        self.association_kind(type_name, name)
            .map(AssociationKind::is_collection_valued)
            .unwrap_or(false)
    }

    fn target_type(&self, type_name: &str, name: &str) -> Option<String>;

    /// Declared ordering of a collection-valued association.
    fn association_order_by(&self, type_name: &str, name: &str) -> Vec<(String, SortOrder)>;

    fn identifier_fields(&self, type_name: &str) -> Vec<String>;

    /// Declared scalar type of a stored field, `None` for associations and
    /// unknown names.
    fn field_type(&self, type_name: &str, field: &str) -> Option<String>;

    fn field_comment(&self, type_name: &str, field: &str) -> Option<String>;

    fn column_name(&self, type_name: &str, field: &str) -> Option<String>;

    fn table_name(&self, type_name: &str) -> Option<String>;

    fn discriminator_column(&self, type_name: &str) -> Option<String>;

    fn discriminator_map(&self, type_name: &str) -> BTreeMap<String, String>;

    fn subclasses(&self, type_name: &str) -> Vec<String>;

    /// `name: type` pairs for every field and association of a type, used in
    /// validation remediation messages.
    fn available_properties(&self, type_name: &str) -> Vec<String>;
}
