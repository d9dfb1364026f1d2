use crate::error::Result;
use crate::metadata::TypeModel;
use crate::schema::{PropertyNode, SchemaNode};
use crate::scope::ScopeNode;
use std::collections::HashSet;

/// Prunes a compiled schema tree against the caller's granted roles and an
/// optional scope mask, producing the per-request tree the projection
/// engine walks.
///
/// The depth budget bounds expansion through nested branches the caller
/// did not explicitly request, which keeps self-referential schemas finite
/// under an absent scope.
pub struct ScopeFilter<'a> {
    model: &'a dyn TypeModel,
    granted_roles: HashSet<String>,
}

impl<'a> ScopeFilter<'a> {
    pub fn new(model: &'a dyn TypeModel, granted_roles: &[String]) -> ScopeFilter<'a> {
        ScopeFilter {
            model,
            granted_roles: granted_roles.iter().cloned().collect(),
        }
    }

    pub fn is_granted(&self, roles: &[String]) -> bool {
        roles.is_empty() || roles.iter().any(|role| self.granted_roles.contains(role))
    }

    /// Filter one schema level. An empty result at the root means "nothing
    /// to render"; callers surface that as an empty document.
    pub fn filter(
        &self,
        node: &SchemaNode,
        scope: Option<&ScopeNode>,
        depth_budget: i32,
    ) -> Result<SchemaNode> {
        if !self.is_granted(&node.roles) {
            return Ok(SchemaNode::empty(node.type_name.as_deref()));
        }

        let identifiers = match &node.type_name {
            Some(type_name) => self.model.identifier_fields(type_name),
            None => Vec::new(),
        };

        let mut result = node.shell();

        for property in &node.properties {
            let explicit = scope.map(|s| s.contains(&property.name)).unwrap_or(false);
            let is_identifier = identifiers.iter().any(|id| *id == property.name);

            let allowed = scope.is_none() || explicit || property.hidden || is_identifier;
            if !allowed {
                continue;
            }
            if property.is_nested() && !explicit && depth_budget <= 0 {
                continue;
            }

            // A virtual property is only computable with its whole source
            // chain present, so chain members ride along even unscoped.
            if property.source.is_some() {
                for member in node.source_chain(&property.name)? {
                    if result.has_property(&member.name) {
                        continue;
                    }
                    let member_scope = scope.and_then(|s| s.child(&member.name));
                    if let Some(filtered) =
                        self.filter_property(member, member_scope, depth_budget - 1)?
                    {
                        result.properties.push(filtered);
                    }
                }
            }

            if result.has_property(&property.name) {
                continue;
            }

            let property_scope = scope.and_then(|s| s.child(&property.name));
            if let Some(filtered) =
                self.filter_property(property, property_scope, depth_budget - 1)?
            {
                result.properties.push(filtered);
            }
        }

        Ok(result)
    }

    /// Filter a single property; nested properties recurse into their
    /// subtree and drop out entirely when nothing of it survives.
    fn filter_property(
        &self,
        property: &PropertyNode,
        scope: Option<&ScopeNode>,
        depth_budget: i32,
    ) -> Result<Option<PropertyNode>> {
        let Some(nested) = &property.nested else {
            return Ok(Some(property.clone()));
        };

        let filtered = self.filter(nested, scope, depth_budget)?;
        if filtered.properties.is_empty() {
            return Ok(None);
        }

        let mut kept = property.clone();
        kept.nested = Some(Box::new(filtered));
        Ok(Some(kept))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::SchemaCompiler;
    use crate::schema::parse_schema_str;
    use crate::scope::parse_scope_str;
    use crate::test_fixtures::{schema_source, type_model};
    use pretty_assertions::assert_eq;

    const DEPTH: i32 = 4;

    fn compile(yaml: &str) -> SchemaNode {
        let model = type_model();
        let source = schema_source();
        let compiler = SchemaCompiler::new(&source, &model);
        let raw = parse_schema_str(yaml).unwrap();
        compiler.compile(&raw, None, None, DEPTH).unwrap()
    }

    fn article_node() -> SchemaNode {
        compile(
            r#"
class: Article
properties:
  title: {}
  body: {}
  author:
    properties:
      name: {}
"#,
        )
    }

    #[test]
    fn test_no_scope_keeps_everything() {
        let model = type_model();
        let filter = ScopeFilter::new(&model, &[]);
        let node = article_node();

        let filtered = filter.filter(&node, None, DEPTH).unwrap();
        assert!(filtered.has_property("title"));
        assert!(filtered.has_property("body"));
        assert!(filtered.has_property("author"));
        assert!(filtered.has_property("id"));
    }

    #[test]
    fn test_scope_prunes_unrequested() {
        let model = type_model();
        let filter = ScopeFilter::new(&model, &[]);
        let node = article_node();
        let scope = parse_scope_str("title: ~\n").unwrap();

        let filtered = filter.filter(&node, Some(&scope), DEPTH).unwrap();
        assert!(filtered.has_property("title"));
        assert!(!filtered.has_property("body"));
        assert!(!filtered.has_property("author"));
        // Identifiers are always retained.
        assert!(filtered.has_property("id"));
    }

    #[test]
    fn test_role_gate() {
        let model = type_model();
        let mut node = article_node();
        node.roles = vec!["ROLE_ADMIN".to_string()];

        let anonymous = ScopeFilter::new(&model, &[]);
        let filtered = anonymous.filter(&node, None, DEPTH).unwrap();
        assert!(filtered.properties.is_empty());

        let admin = ScopeFilter::new(&model, &["ROLE_ADMIN".to_string()]);
        let filtered = admin.filter(&node, None, DEPTH).unwrap();
        assert!(!filtered.properties.is_empty());
    }

    #[test]
    fn test_role_gated_nested_property_dropped() {
        let model = type_model();
        let mut node = article_node();
        if let Some(author) = node
            .properties
            .iter_mut()
            .find(|p| p.name == "author")
            .and_then(|p| p.nested.as_mut())
        {
            author.roles = vec!["ROLE_ADMIN".to_string()];
        }

        let filter = ScopeFilter::new(&model, &[]);
        let filtered = filter.filter(&node, None, DEPTH).unwrap();
        assert!(!filtered.has_property("author"));
        assert!(filtered.has_property("title"));
    }

    #[test]
    fn test_depth_bound_on_unscoped_nesting() {
        // A self-referential schema: Comment.replies -> Comment.
        let node = compile(
            r#"
class: Comment
properties:
  message: {}
  replies:
    properties:
      message: {}
      replies:
        properties:
          message: {}
"#,
        );
        let model = type_model();
        let filter = ScopeFilter::new(&model, &[]);

        let filtered = filter.filter(&node, None, 1).unwrap();
        let replies = filtered.property("replies").expect("first level kept");
        let nested = replies.nested.as_ref().unwrap();
        assert!(
            !nested.has_property("replies"),
            "second level must be pruned at depth 1"
        );
    }

    #[test]
    fn test_explicit_scope_overrides_depth() {
        let node = compile(
            r#"
class: Comment
properties:
  message: {}
  replies:
    properties:
      message: {}
"#,
        );
        let model = type_model();
        let filter = ScopeFilter::new(&model, &[]);
        let scope = parse_scope_str("replies:\n  message: ~\n").unwrap();

        let filtered = filter.filter(&node, Some(&scope), 0).unwrap();
        assert!(filtered.has_property("replies"));
    }

    #[test]
    fn test_source_dependencies_included() {
        let node = compile(
            r#"
class: Article
properties:
  full_name:
    source: first
    decode: concat_names
  first: { hidden: true }
  last: { hidden: true }
"#,
        );
        let model = type_model();
        let filter = ScopeFilter::new(&model, &[]);
        let scope = parse_scope_str("full_name: ~\n").unwrap();

        let filtered = filter.filter(&node, Some(&scope), DEPTH).unwrap();
        assert!(filtered.has_property("full_name"));
        // The chain member rides along even though the scope never asked
        // for it; hidden siblings are kept by the hidden rule anyway.
        assert!(filtered.has_property("first"));
        assert!(filtered.has_property("last"));
    }

    #[test]
    fn test_source_chain_member_inserted_before_dependent() {
        let node = compile(
            r#"
class: Article
properties:
  headline:
    source: title
  title: {}
"#,
        );
        let model = type_model();
        let filter = ScopeFilter::new(&model, &[]);
        let scope = parse_scope_str("headline: ~\n").unwrap();

        let filtered = filter.filter(&node, Some(&scope), DEPTH).unwrap();
        let names: Vec<&str> = filtered.properties.iter().map(|p| p.name.as_str()).collect();
        let title = names.iter().position(|n| *n == "title").unwrap();
        let headline = names.iter().position(|n| *n == "headline").unwrap();
        assert!(title < headline);
    }

    #[test]
    fn test_source_cycle_fails() {
        let node = compile(
            r#"
class: Article
properties:
  a: { source: b }
  b: { source: a }
"#,
        );
        let model = type_model();
        let filter = ScopeFilter::new(&model, &[]);

        let err = filter.filter(&node, None, DEPTH).unwrap_err();
        assert!(err.to_string().contains("Sources stack"));
    }

    #[test]
    fn test_filter_is_idempotent() {
        let node = article_node();
        let model = type_model();
        let filter = ScopeFilter::new(&model, &[]);
        let scope = parse_scope_str("title: ~\nauthor:\n  name: ~\n").unwrap();

        let once = filter.filter(&node, Some(&scope), DEPTH).unwrap();
        let twice = filter.filter(&once, Some(&scope), DEPTH).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_filter_is_deterministic() {
        let node = article_node();
        let model = type_model();
        let filter = ScopeFilter::new(&model, &[]);

        let a = filter.filter(&node, None, DEPTH).unwrap();
        let b = filter.filter(&node, None, DEPTH).unwrap();
        assert_eq!(a, b);
    }
}
