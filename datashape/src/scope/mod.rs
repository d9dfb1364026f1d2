use crate::error::{DataShapeError, Result};
use std::path::Path;

/// Caller-supplied projection mask.
///
/// A scope document is a tree of property names: a `null` value keeps the
/// property as-is, a nested mapping restricts a nested object the same way.
/// Absence of a scope altogether (`Option<&ScopeNode>::None` at the API
/// boundary) means "no restriction".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeNode {
    entries: Vec<(String, Option<ScopeNode>)>,
}

impl ScopeNode {
    pub fn new() -> ScopeNode {
        ScopeNode::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    /// The nested mask under `name`, if the entry is a mapping rather than
    /// a leaf.
    pub fn child(&self, name: &str) -> Option<&ScopeNode> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn insert_leaf(&mut self, name: &str) {
        self.insert(name, None);
    }

    pub fn insert(&mut self, name: &str, child: Option<ScopeNode>) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| k == name) {
            slot.1 = child;
        } else {
            self.entries.push((name.to_string(), child));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&ScopeNode>)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Render back to YAML (used by the scope-skeleton generator).
    pub fn to_yaml_value(&self) -> serde_yaml::Value {
        let mut mapping = serde_yaml::Mapping::new();
        for (name, child) in &self.entries {
            let value = match child {
                Some(sub) => sub.to_yaml_value(),
                None => serde_yaml::Value::Null,
            };
            mapping.insert(serde_yaml::Value::String(name.clone()), value);
        }
        serde_yaml::Value::Mapping(mapping)
    }
}

/// Parse a scope document from a YAML file.
pub fn parse_scope(path: &Path) -> Result<ScopeNode> {
    let content = std::fs::read_to_string(path)?;
    parse_scope_str(&content)
}

/// Parse a scope document from a YAML string.
pub fn parse_scope_str(content: &str) -> Result<ScopeNode> {
    let value: serde_yaml::Value = serde_yaml::from_str(content)?;
    scope_from_value(&value)
}

fn scope_from_value(value: &serde_yaml::Value) -> Result<ScopeNode> {
    let mut scope = ScopeNode::new();

    let mapping = match value {
        serde_yaml::Value::Mapping(m) => m,
        serde_yaml::Value::Null => return Ok(scope),
        _ => {
            return Err(DataShapeError::configuration(
                "<scope>",
                "scope document must be a mapping of property names",
            ))
        }
    };

    for (key, entry) in mapping {
        let name = key.as_str().ok_or_else(|| {
            DataShapeError::configuration("<scope>", "scope keys must be strings")
        })?;

        match entry {
            serde_yaml::Value::Null => scope.insert_leaf(name),
            serde_yaml::Value::Mapping(_) => {
                let child = scope_from_value(entry)?;
                scope.insert(name, Some(child));
            }
            _ => {
                return Err(DataShapeError::configuration(
                    "<scope>",
                    format!("scope entry \"{name}\" must be null or a nested mapping"),
                ))
            }
        }
    }

    Ok(scope)
}
