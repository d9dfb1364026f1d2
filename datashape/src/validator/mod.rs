use crate::error::{DataShapeError, Result};
use crate::metadata::TypeModel;
use crate::schema::{PropertyNode, SchemaNode, SchemaSource};
use crate::transformer::TransformerRegistry;

/// Static referential checks of a compiled schema tree against the type
/// model and the transform registry. Meant to run offline (deploy-time or
/// via the CLI); projection assumes a validated tree.
pub struct SchemaValidator<'a> {
    model: &'a dyn TypeModel,
    transformers: &'a TransformerRegistry,
    source: &'a dyn SchemaSource,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(
        model: &'a dyn TypeModel,
        transformers: &'a TransformerRegistry,
        source: &'a dyn SchemaSource,
    ) -> SchemaValidator<'a> {
        SchemaValidator {
            model,
            transformers,
            source,
        }
    }

    pub fn validate(&self, node: &SchemaNode, depth_budget: i32) -> Result<()> {
        self.validate_node(node, depth_budget, false)
    }

    fn validate_node(&self, node: &SchemaNode, depth_budget: i32, is_nested: bool) -> Result<()> {
        if depth_budget < 0 {
            return Err(DataShapeError::NestingDepthExceeded);
        }

        self.check_shape(node, is_nested)
            .and_then(|()| self.check_properties(node, depth_budget))
            .map_err(|err| err.into_configuration_error(node.identity()))
    }

    fn check_shape(&self, node: &SchemaNode, is_nested: bool) -> Result<()> {
        let has_class_and_properties = node.type_name.is_some() && !node.properties.is_empty();

        if !is_nested && !has_class_and_properties {
            return Err(DataShapeError::configuration(
                node.identity(),
                "should have \"class\" and \"properties\" defined and not empty",
            ));
        }

        if let Some(type_name) = &node.type_name {
            if !self.model.has_type(type_name) {
                return Err(DataShapeError::configuration(
                    node.identity(),
                    format!("unknown class \"{type_name}\""),
                ));
            }
        }

        Ok(())
    }

    fn check_properties(&self, node: &SchemaNode, depth_budget: i32) -> Result<()> {
        for property in &node.properties {
            if property.source.is_some() {
                // Existence and acyclicity of the whole chain; the chain
                // formats its own stacked error message.
                node.source_chain(&property.name)?;
            } else if node.type_name.is_some() {
                self.check_class_property(node, property)?;
            }

            if property.is_nested() {
                self.check_nested(node, property, depth_budget)?;
            }

            for transformer in property.decode_pipeline() {
                if !self.transformers.has(transformer) {
                    let inner = DataShapeError::DataTransformerNotExists(transformer.to_string());
                    return Err(DataShapeError::property(&property.name, inner.to_string()));
                }
            }
        }

        Ok(())
    }

    fn check_nested(
        &self,
        node: &SchemaNode,
        property: &PropertyNode,
        depth_budget: i32,
    ) -> Result<()> {
        if let Some(reference) = &property.schema_ref {
            if !self.source.exists(reference) {
                return Err(DataShapeError::property(
                    &property.name,
                    format!("nested property refers to nonexistent schema \"{reference}\""),
                ));
            }
        }

        let Some(nested) = &property.nested else {
            return Ok(());
        };

        let acceptable = property.schema_ref.is_some()
            || (nested.type_name.is_some() && !nested.properties.is_empty());
        if !acceptable {
            return Err(DataShapeError::property(
                &property.name,
                "nested property should have \"class\" and \"properties\" or \"schema\" defined",
            ));
        }

        self.validate_node(nested, depth_budget - 1, true)
            .map_err(|err| DataShapeError::property(&property.name, err.to_string()))
    }

    fn check_class_property(&self, node: &SchemaNode, property: &PropertyNode) -> Result<()> {
        let class = node.type_name.as_deref().unwrap_or_default();
        let name = property.name.as_str();
        let exists_on_base =
            self.model.has_field(class, name) || self.model.has_association(class, name);

        if exists_on_base {
            // A discriminator tag on a property the base type already has
            // is ambiguous: the branch and the base would both claim it.
            if property.discriminator.is_some() && !property.ignore_discriminator_mismatch {
                return Err(DataShapeError::property(
                    name,
                    "shouldn't have \"discriminator\" defined",
                ));
            }
            return self.check_association_shape(class, property);
        }

        if node.discriminator_map.is_empty() {
            return Err(DataShapeError::property(
                name,
                format!(
                    "not found in class \"{class}\". Available properties: {}",
                    self.model.available_properties(class).join(", ")
                ),
            ));
        }

        match &property.discriminator {
            Some(tag) => {
                let Some(subclass) = node.discriminator_map.get(tag) else {
                    let tags: Vec<&str> =
                        node.discriminator_map.keys().map(String::as_str).collect();
                    return Err(DataShapeError::property(
                        name,
                        format!(
                            "invalid discriminator \"{tag}\". Available discriminators: {}",
                            tags.join(", ")
                        ),
                    ));
                };

                let on_subclass = self.model.has_field(subclass, name)
                    || self.model.has_association(subclass, name);
                if !on_subclass {
                    self.hint_sibling_branch(subclass, name, node)?;
                    return Err(DataShapeError::property(
                        name,
                        format!("class \"{subclass}\" and all its siblings don't have this property"),
                    ));
                }

                self.check_association_shape(subclass, property)
            }
            None => {
                if property.is_nested() && !self.model.has_association(class, name) {
                    return Err(DataShapeError::property(
                        name,
                        "nested property should have an association mapping",
                    ));
                }

                self.hint_sibling_branch(class, name, node)?;
                Err(DataShapeError::property(
                    name,
                    format!("class \"{class}\" and all its subclasses don't have this property"),
                ))
            }
        }
    }

    /// When the property lives on a sibling discriminator branch, point the
    /// author at the tag they probably meant.
    fn hint_sibling_branch(&self, class: &str, name: &str, node: &SchemaNode) -> Result<()> {
        for (tag, mapped) in &node.discriminator_map {
            if mapped == class {
                continue;
            }
            if self.model.has_field(mapped, name) || self.model.has_association(mapped, name) {
                return Err(DataShapeError::property(
                    name,
                    format!(
                        "class \"{class}\" doesn't have this property, but \"{mapped}\" has. \
                         You probably meant to use the \"{tag}\" discriminator"
                    ),
                ));
            }
        }
        Ok(())
    }

    fn check_association_shape(&self, class: &str, property: &PropertyNode) -> Result<()> {
        let name = property.name.as_str();
        let is_association = self.model.has_association(class, name);

        if property.is_nested() && !is_association {
            return Err(DataShapeError::property(
                name,
                "nested property should have an association mapping",
            ));
        }
        if !property.is_nested() && is_association {
            return Err(DataShapeError::property(
                name,
                "association property should declare nested \"properties\" or a \"schema\"",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::SchemaCompiler;
    use crate::schema::parse_schema_str;
    use crate::test_fixtures::{schema_source, type_model};

    const DEPTH: i32 = 4;

    fn validate(yaml: &str) -> Result<()> {
        let model = type_model();
        let source = schema_source();
        let registry = TransformerRegistry::with_builtins();
        let compiler = SchemaCompiler::new(&source, &model);
        let raw = parse_schema_str(yaml).unwrap();
        let node = compiler.compile(&raw, None, None, DEPTH).unwrap();
        SchemaValidator::new(&model, &registry, &source).validate(&node, DEPTH)
    }

    #[test]
    fn test_valid_schema_passes() {
        validate(
            r#"
class: Article
properties:
  title: {}
  author:
    properties:
      name: {}
"#,
        )
        .unwrap();
    }

    #[test]
    fn test_missing_class_fails() {
        let err = validate("properties:\n  title: {}\n").unwrap_err();
        assert!(err.to_string().contains("class"));
    }

    #[test]
    fn test_unknown_class_fails() {
        let err = validate("class: Ghost\nproperties:\n  x: {}\n").unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn test_unknown_property_lists_available() {
        let err = validate("class: Author\nproperties:\n  nickname: {}\n").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("nickname"), "{message}");
        assert!(message.contains("name: string"), "{message}");
    }

    #[test]
    fn test_leaf_association_fails() {
        let err = validate("class: Article\nproperties:\n  author: {}\n").unwrap_err();
        assert!(err.to_string().contains("nested"), "{err}");
    }

    #[test]
    fn test_nested_non_association_fails() {
        let err = validate(
            r#"
class: Article
properties:
  title:
    class: Author
    properties:
      name: {}
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("association"), "{err}");
    }

    #[test]
    fn test_unknown_transformer_fails() {
        let err = validate(
            "class: Article\nproperties:\n  title:\n    decode: sparkle\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("sparkle"), "{err}");
    }

    #[test]
    fn test_source_cycle_fails() {
        let err = validate(
            r#"
class: Article
properties:
  a: { source: b }
  b: { source: a }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Sources stack"), "{err}");
    }

    #[test]
    fn test_sibling_discriminator_hint() {
        let err = validate(
            r#"
class: Media
properties:
  duration: {}
"#,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("video"), "{message}");
        assert!(message.contains("VideoMedia"), "{message}");
    }

    #[test]
    fn test_unknown_discriminator_lists_tags() {
        let err = validate(
            r#"
class: Media
properties:
  width:
    discriminator: audio
"#,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("audio"), "{message}");
        assert!(message.contains("image"), "{message}");
    }

    #[test]
    fn test_discriminator_on_base_property_is_ambiguous() {
        let err = validate(
            r#"
class: Media
properties:
  title:
    discriminator: image
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("discriminator"), "{err}");
    }

    #[test]
    fn test_ignore_discriminator_mismatch_suppresses_ambiguity() {
        validate(
            r#"
class: Media
properties:
  title:
    discriminator: image
    ignore_discriminator_mismatch: true
"#,
        )
        .unwrap();
    }

    #[test]
    fn test_discriminated_subtype_property_passes() {
        validate(
            r#"
class: Media
properties:
  width:
    discriminator: image
"#,
        )
        .unwrap();
    }

    #[test]
    fn test_error_carries_schema_identity() {
        let err = validate("class: Author\nproperties:\n  nickname: {}\n").unwrap_err();
        assert!(err.to_string().contains("Author"), "{err}");
    }

    #[test]
    fn test_negative_depth_fails() {
        let model = type_model();
        let source = schema_source();
        let registry = TransformerRegistry::with_builtins();
        let compiler = SchemaCompiler::new(&source, &model);
        let raw = parse_schema_str("class: Article\nproperties:\n  title: {}\n").unwrap();
        let node = compiler.compile(&raw, None, None, DEPTH).unwrap();

        let err = SchemaValidator::new(&model, &registry, &source)
            .validate(&node, -1)
            .unwrap_err();
        assert!(matches!(err, DataShapeError::NestingDepthExceeded));
    }
}
