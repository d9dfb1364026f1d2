use crate::error::Result;
use crate::metadata::{AssociationKind, SortOrder, TypeModel};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Serde-loadable `TypeModel`: a YAML document describing types, fields,
/// associations, and discriminators. Used by the CLI and by tests; a host
/// application with a real mapping layer implements `TypeModel` directly.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryTypeModel {
    #[serde(default)]
    pub types: BTreeMap<String, TypeDef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TypeDef {
    #[serde(default)]
    pub table: Option<String>,
    /// Identifier field names; subtype definitions repeat inherited fields.
    #[serde(default)]
    pub identifiers: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDef>,
    #[serde(default)]
    pub associations: BTreeMap<String, AssociationDef>,
    #[serde(default)]
    pub discriminator: Option<DiscriminatorDef>,
    #[serde(default)]
    pub subclasses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssociationDef {
    pub kind: AssociationKind,
    pub target: String,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    /// Foreign-key column: on the owner for single-valued associations, on
    /// the target when `inverse` is set (and for one-to-many).
    #[serde(default)]
    pub join_column: Option<String>,
    #[serde(default)]
    pub join_table: Option<JoinTableDef>,
    #[serde(default)]
    pub inverse: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortOrder,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinTableDef {
    pub name: String,
    pub owner_column: String,
    pub target_column: String,
}

impl MemoryTypeModel {
    pub fn from_yaml_file(path: &Path) -> Result<MemoryTypeModel> {
        let content = std::fs::read_to_string(path)?;
        MemoryTypeModel::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<MemoryTypeModel> {
        let model: MemoryTypeModel = serde_yaml::from_str(content)?;
        Ok(model)
    }

    pub fn type_def(&self, type_name: &str) -> Option<&TypeDef> {
        self.types.get(type_name)
    }

    pub fn association(&self, type_name: &str, name: &str) -> Option<&AssociationDef> {
        self.types.get(type_name)?.associations.get(name)
    }
}

impl TypeModel for MemoryTypeModel {
    fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    fn has_field(&self, type_name: &str, field: &str) -> bool {
        self.types
            .get(type_name)
            .map(|t| t.fields.contains_key(field))
            .unwrap_or(false)
    }

    fn has_association(&self, type_name: &str, name: &str) -> bool {
        self.association(type_name, name).is_some()
    }

    fn association_kind(&self, type_name: &str, name: &str) -> Option<AssociationKind> {
        self.association(type_name, name).map(|a| a.kind)
    }

    fn target_type(&self, type_name: &str, name: &str) -> Option<String> {
        self.association(type_name, name).map(|a| a.target.clone())
    }

    fn association_order_by(&self, type_name: &str, name: &str) -> Vec<(String, SortOrder)> {
        self.association(type_name, name)
            .map(|a| {
                a.order_by
                    .iter()
                    .map(|o| (o.field.clone(), o.direction))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn identifier_fields(&self, type_name: &str) -> Vec<String> {
        self.types
            .get(type_name)
            .map(|t| t.identifiers.clone())
            .unwrap_or_default()
    }

    fn field_type(&self, type_name: &str, field: &str) -> Option<String> {
        self.types
            .get(type_name)?
            .fields
            .get(field)
            .map(|f| f.field_type.clone())
    }

    fn field_comment(&self, type_name: &str, field: &str) -> Option<String> {
        self.types
            .get(type_name)?
            .fields
            .get(field)
            .and_then(|f| f.comment.clone())
    }

    fn column_name(&self, type_name: &str, field: &str) -> Option<String> {
        let def = self.types.get(type_name)?.fields.get(field)?;
        Some(def.column.clone().unwrap_or_else(|| field.to_string()))
    }

    fn table_name(&self, type_name: &str) -> Option<String> {
        self.types.get(type_name)?.table.clone()
    }

    fn discriminator_column(&self, type_name: &str) -> Option<String> {
        self.types
            .get(type_name)?
            .discriminator
            .as_ref()
            .map(|d| d.column.clone())
    }

    fn discriminator_map(&self, type_name: &str) -> BTreeMap<String, String> {
        self.types
            .get(type_name)
            .and_then(|t| t.discriminator.as_ref())
            .map(|d| d.map.clone())
            .unwrap_or_default()
    }

    fn subclasses(&self, type_name: &str) -> Vec<String> {
        self.types
            .get(type_name)
            .map(|t| t.subclasses.clone())
            .unwrap_or_default()
    }

    fn available_properties(&self, type_name: &str) -> Vec<String> {
        let Some(def) = self.types.get(type_name) else {
            return Vec::new();
        };

        let mut out: Vec<String> = def
            .fields
            .iter()
            .map(|(name, field)| format!("{name}: {}", field.field_type))
            .collect();

        for (name, assoc) in &def.associations {
            if assoc.kind.is_collection_valued() {
                out.push(format!("{name}: {}[]", assoc.target));
            } else {
                out.push(format!("{name}: {}", assoc.target));
            }
        }

        out
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscriminatorDef {
    pub column: String,
    #[serde(default)]
    pub map: BTreeMap<String, String>,
}
