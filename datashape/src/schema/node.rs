use crate::error::{DataShapeError, Result};
use crate::schema::types::JoinMode;
use serde::Serialize;
use std::collections::BTreeMap;

/// Hard cap on `source` chain length; a chain longer than this fails with
/// `MaxSourceDepthExceeded` instead of walking forever through a loop.
pub const MAX_SOURCE_DEPTH: usize = 10;

/// Classification of a property's value once compiled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Plain stored or declared scalar, tagged with its type name.
    Scalar(String),
    Array,
    JsonArray,
    Entity,
    Collection,
}

impl ValueType {
    pub fn parse(name: &str) -> ValueType {
        match name {
            "array" => ValueType::Array,
            "json_array" => ValueType::JsonArray,
            "entity" => ValueType::Entity,
            "collection" => ValueType::Collection,
            other => ValueType::Scalar(other.to_string()),
        }
    }

    /// Container types render `null` as an empty collection.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ValueType::Array | ValueType::JsonArray | ValueType::Collection
        )
    }
}

/// One compiled schema level: the root document or a nested object/collection.
///
/// Immutable once compiled; shared through the schema cache.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SchemaNode {
    pub type_name: Option<String>,
    /// Roles allowed to see this level; empty means public.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    pub filter_null_values: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub has_subclasses: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discriminator_column: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub discriminator_map: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_identity: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub query_selects: BTreeMap<String, String>,
    pub properties: Vec<PropertyNode>,
}

/// One property rule within a `SchemaNode`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyNode {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested: Option<Box<SchemaNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignore_discriminator_mismatch: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    pub join: JoinMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub from_store: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_field: Option<String>,
}

impl PropertyNode {
    pub fn new(name: &str) -> PropertyNode {
        PropertyNode {
            name: name.to_string(),
            schema_ref: None,
            nested: None,
            value_type: None,
            source: None,
            decode: None,
            hidden: false,
            discriminator: None,
            ignore_discriminator_mismatch: false,
            conditions: Vec::new(),
            join: JoinMode::None,
            description: None,
            from_store: false,
            storage_field: None,
        }
    }

    pub fn is_nested(&self) -> bool {
        self.nested.is_some()
    }

    /// Names in the `decode` pipeline, declaration order.
    pub fn decode_pipeline(&self) -> Vec<&str> {
        match &self.decode {
            Some(decode) => decode
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect(),
            None => Vec::new(),
        }
    }
}

impl SchemaNode {
    /// An empty node: what a role-gated compile or filter returns.
    pub fn empty(type_name: Option<&str>) -> SchemaNode {
        SchemaNode {
            type_name: type_name.map(str::to_string),
            filter_null_values: true,
            ..SchemaNode::default()
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyNode> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// Schema/type identity used in error messages.
    pub fn identity(&self) -> &str {
        self.type_name.as_deref().unwrap_or("<anonymous>")
    }

    /// Shallow copy with no properties; the filter rebuilds the property
    /// list into this.
    pub fn shell(&self) -> SchemaNode {
        SchemaNode {
            type_name: self.type_name.clone(),
            roles: self.roles.clone(),
            filter_null_values: self.filter_null_values,
            has_subclasses: self.has_subclasses,
            discriminator_column: self.discriminator_column.clone(),
            discriminator_map: self.discriminator_map.clone(),
            table_identity: self.table_identity.clone(),
            query_selects: self.query_selects.clone(),
            properties: Vec::new(),
        }
    }

    /// Resolve the `source` dependency chain of `name`, outward-in.
    ///
    /// The chain stops early at a registered query select (the select is the
    /// terminal producer). Each hop must name an existing property; a hop
    /// returning to the originating property is a cycle; chains longer than
    /// `MAX_SOURCE_DEPTH` fail. On failure the error message carries the
    /// visited stack as `a > b > c`.
    pub fn source_chain(&self, name: &str) -> Result<Vec<&PropertyNode>> {
        let mut chain: Vec<&PropertyNode> = Vec::new();
        let mut current = match self.property(name) {
            Some(p) => p,
            None => return Ok(chain),
        };

        let result = loop {
            let source = match current.source.as_deref() {
                Some(s) => s,
                None => break Ok(()),
            };

            if self.query_selects.contains_key(source) {
                break Ok(());
            }

            if source == name {
                break Err(DataShapeError::property(
                    name,
                    "shouldn't refer to itself in \"source\" option",
                ));
            }

            match self.property(source) {
                Some(p) => {
                    chain.push(p);
                    current = p;
                }
                None => {
                    break Err(DataShapeError::property(
                        name,
                        format!(
                            "invalid \"source\" option: referred property \"{source}\" doesn't exist"
                        ),
                    ));
                }
            }

            if chain.len() > MAX_SOURCE_DEPTH {
                break Err(DataShapeError::MaxSourceDepthExceeded {
                    property: name.to_string(),
                });
            }
        };

        match result {
            Ok(()) => Ok(chain),
            Err(err) => {
                let mut stack: Vec<&str> = vec![name];
                stack.extend(chain.iter().map(|p| p.name.as_str()));
                Err(DataShapeError::configuration(
                    self.identity(),
                    format!("Sources stack: {}. {}", stack.join(" > "), err),
                ))
            }
        }
    }

    /// Stored field names this node needs from the store, honoring an
    /// optional scope mask: scoped-out visible properties contribute
    /// nothing, virtual properties contribute their chain's stored members.
    pub fn database_fields(&self, scope: Option<&crate::scope::ScopeNode>) -> Result<Vec<String>> {
        let mut fields: Vec<String> = Vec::new();

        if let Some(column) = &self.discriminator_column {
            fields.push(column.clone());
        }

        for property in &self.properties {
            if let (Some(scope), false) = (scope, property.hidden) {
                if !scope.contains(&property.name) {
                    continue;
                }
            }

            let chain = self.source_chain(&property.name)?;
            if chain.is_empty() {
                if property.from_store && !fields.contains(&property.name) {
                    fields.push(property.name.clone());
                }
            } else {
                for member in chain {
                    if member.from_store && !fields.contains(&member.name) {
                        fields.push(member.name.clone());
                    }
                }
            }
        }

        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with_sources() -> SchemaNode {
        let mut node = SchemaNode::empty(Some("Article"));
        let mut title = PropertyNode::new("title");
        title.from_store = true;
        title.storage_field = Some("title".to_string());
        let mut headline = PropertyNode::new("headline");
        headline.source = Some("title".to_string());
        node.properties.push(title);
        node.properties.push(headline);
        node
    }

    #[test]
    fn test_source_chain_single_hop() {
        let node = node_with_sources();
        let chain = node.source_chain("headline").unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].name, "title");
    }

    #[test]
    fn test_source_chain_stops_at_query_select() {
        let mut node = node_with_sources();
        node.query_selects
            .insert("comment_count".to_string(), "COUNT(c.id)".to_string());
        let mut counter = PropertyNode::new("comments");
        counter.source = Some("comment_count".to_string());
        node.properties.push(counter);

        let chain = node.source_chain("comments").unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn test_source_chain_cycle_fails() {
        let mut node = SchemaNode::empty(Some("Article"));
        let mut a = PropertyNode::new("a");
        a.source = Some("b".to_string());
        let mut b = PropertyNode::new("b");
        b.source = Some("a".to_string());
        node.properties.push(a);
        node.properties.push(b);

        let err = node.source_chain("a").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Sources stack: a > b"), "{message}");
    }

    #[test]
    fn test_source_chain_missing_property_fails() {
        let mut node = SchemaNode::empty(Some("Article"));
        let mut p = PropertyNode::new("alias");
        p.source = Some("ghost".to_string());
        node.properties.push(p);

        let err = node.source_chain("alias").unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_decode_pipeline_split_and_trim() {
        let mut p = PropertyNode::new("x");
        p.decode = Some(" trim |uppercase| parse_json ".to_string());
        assert_eq!(p.decode_pipeline(), vec!["trim", "uppercase", "parse_json"]);
    }

    #[test]
    fn test_database_fields_walk_sources() {
        let node = node_with_sources();
        let fields = node.database_fields(None).unwrap();
        assert_eq!(fields, vec!["title".to_string()]);
    }

    #[test]
    fn test_database_fields_include_discriminator_column() {
        let mut node = node_with_sources();
        node.has_subclasses = true;
        node.discriminator_column = Some("kind".to_string());
        let fields = node.database_fields(None).unwrap();
        assert_eq!(fields[0], "kind");
    }
}
