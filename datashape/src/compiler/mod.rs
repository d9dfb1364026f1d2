use crate::error::{DataShapeError, Result};
use crate::metadata::TypeModel;
use crate::schema::{
    JoinMode, OrderedMap, PropertyNode, RawSchema, SchemaNode, SchemaSource, ValueType,
};
use crate::scope::ScopeNode;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

/// Compiles raw declarative schema documents into immutable `SchemaNode`
/// trees: resolves `schema:` includes, injects identifier fields, attaches
/// discriminator metadata, and classifies every property against the type
/// model.
pub struct SchemaCompiler<'a> {
    source: &'a dyn SchemaSource,
    model: &'a dyn TypeModel,
    /// `None` bypasses the role gate (cache-path compiles keep every
    /// role-restricted branch; the per-request filter applies the gate).
    granted_roles: Option<HashSet<String>>,
}

impl<'a> SchemaCompiler<'a> {
    /// Compiler with no role gate: every branch is compiled and role lists
    /// are kept on the nodes for later filtering.
    pub fn new(source: &'a dyn SchemaSource, model: &'a dyn TypeModel) -> SchemaCompiler<'a> {
        SchemaCompiler {
            source,
            model,
            granted_roles: None,
        }
    }

    /// Compiler gating role-restricted branches against the caller's
    /// granted roles at compile time.
    pub fn with_roles(
        source: &'a dyn SchemaSource,
        model: &'a dyn TypeModel,
        granted_roles: &[String],
    ) -> SchemaCompiler<'a> {
        SchemaCompiler {
            source,
            model,
            granted_roles: Some(granted_roles.iter().cloned().collect()),
        }
    }

    /// Load a schema document by name and compile it, unscoped.
    pub fn compile_named(&self, name: &str, depth_budget: i32) -> Result<SchemaNode> {
        let raw = self.source.load(name)?;
        let mut include_stack = vec![name.to_string()];
        self.compile_node(
            &raw,
            raw.class.as_deref(),
            None,
            depth_budget,
            &mut include_stack,
        )
    }

    /// Compile an already-parsed document.
    ///
    /// `type_name` overrides the document's own `class`; `scope` prunes
    /// unrequested properties during compilation exactly as the filter
    /// would; `depth_budget` bounds nesting (a nested property with no
    /// remaining budget fails with `NestingDepthExceeded`).
    pub fn compile(
        &self,
        raw: &RawSchema,
        type_name: Option<&str>,
        scope: Option<&ScopeNode>,
        depth_budget: i32,
    ) -> Result<SchemaNode> {
        let type_name = type_name.or(raw.class.as_deref());
        self.compile_node(raw, type_name, scope, depth_budget, &mut Vec::new())
    }

    fn compile_node(
        &self,
        raw: &RawSchema,
        type_name: Option<&str>,
        scope: Option<&ScopeNode>,
        depth_budget: i32,
        include_stack: &mut Vec<String>,
    ) -> Result<SchemaNode> {
        let raw = self.resolve_includes(raw, include_stack)?;
        let raw = raw.as_ref();
        let type_name = type_name.or(raw.class.as_deref());

        if let Some(granted) = &self.granted_roles {
            if !is_granted(granted, &raw.roles) {
                return Ok(SchemaNode::empty(type_name));
            }
        }

        let mut node = SchemaNode {
            type_name: type_name.map(str::to_string),
            roles: raw.roles.clone(),
            filter_null_values: raw.filter_null_values.unwrap_or(true),
            has_subclasses: false,
            discriminator_column: None,
            discriminator_map: BTreeMap::new(),
            table_identity: None,
            query_selects: raw
                .query
                .selects
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            properties: Vec::new(),
        };

        let type_known = type_name.map(|t| self.model.has_type(t)).unwrap_or(false);
        if type_known {
            let type_name = type_name.unwrap_or_default();
            node.table_identity = self.model.table_name(type_name);

            if !self.model.subclasses(type_name).is_empty() {
                let column = self.model.discriminator_column(type_name);
                let map = self.model.discriminator_map(type_name);
                match (column, map) {
                    (Some(column), map) if !map.is_empty() => {
                        node.has_subclasses = true;
                        node.discriminator_column = Some(column);
                        node.discriminator_map = map;
                    }
                    _ => {
                        return Err(DataShapeError::configuration(
                            type_name,
                            "type declares subclasses but no discriminator column/map",
                        ))
                    }
                }
            }
        }

        if raw.properties.is_empty() {
            return Ok(node);
        }

        // Identifier fields ride along even when undeclared; they stay
        // hidden but downstream association fetches depend on them.
        let identifiers = match (type_known, type_name) {
            (true, Some(t)) => self.model.identifier_fields(t),
            _ => Vec::new(),
        };
        let mut declared: Vec<(&str, std::borrow::Cow<RawSchema>)> = raw
            .properties
            .iter()
            .map(|(name, prop)| (name, std::borrow::Cow::Borrowed(prop)))
            .collect();
        for id in &identifiers {
            if !raw.properties.contains_key(id) {
                let injected = RawSchema {
                    hidden: true,
                    ..RawSchema::default()
                };
                declared.push((id.as_str(), std::borrow::Cow::Owned(injected)));
            }
        }

        for (name, prop_raw) in declared {
            let prop_raw = prop_raw.as_ref();
            let is_identifier = identifiers.iter().any(|id| id == name);

            if let Some(scope) = scope {
                if !is_identifier && !prop_raw.hidden && !scope.contains(name) {
                    continue;
                }
            }

            let property =
                self.compile_property(name, prop_raw, &node, scope, depth_budget, include_stack)?;
            node.properties.push(property);
        }

        Ok(node)
    }

    fn compile_property(
        &self,
        name: &str,
        raw: &RawSchema,
        node: &SchemaNode,
        scope: Option<&ScopeNode>,
        depth_budget: i32,
        include_stack: &mut Vec<String>,
    ) -> Result<PropertyNode> {
        // Under a discriminator tag the property describes the mapped
        // subtype; the base type is the fallback when the tag is unknown.
        let owner_type: Option<&str> = match raw
            .discriminator
            .as_deref()
            .and_then(|tag| node.discriminator_map.get(tag))
        {
            Some(subtype) => Some(subtype.as_str()),
            None => node.type_name.as_deref(),
        };
        let owner_known = owner_type.map(|t| self.model.has_type(t)).unwrap_or(false);

        let mut property = PropertyNode::new(name);
        property.source = raw.source.clone();
        property.decode = raw.decode.clone();
        property.hidden = raw.hidden;
        property.discriminator = raw.discriminator.clone();
        property.ignore_discriminator_mismatch = raw.ignore_discriminator_mismatch;
        property.conditions = raw.conditions.clone();
        property.join = raw.join.unwrap_or_default();
        property.description = raw.description.clone();

        if property.description.is_none() {
            if let (true, Some(owner)) = (owner_known, owner_type) {
                property.description = self.model.field_comment(owner, name);
            }
        }

        if raw.is_nested() {
            if raw.discriminator.is_some() && property.join != JoinMode::None {
                return Err(DataShapeError::configuration(
                    node.identity(),
                    format!(
                        "property \"{name}\": the join type cannot be other than \"none\" \
                         if the discriminator is defined"
                    ),
                ));
            }

            if depth_budget <= 0 {
                return Err(DataShapeError::NestingDepthExceeded);
            }

            let association = owner_type
                .filter(|_| owner_known)
                .filter(|owner| self.model.has_association(owner, name));

            let target = match (&raw.class, association) {
                (Some(class), _) => Some(class.clone()),
                (None, Some(owner)) => self.model.target_type(owner, name),
                (None, None) => None,
            };

            property.schema_ref = raw.schema.clone();
            let nested = self.compile_node(
                raw,
                target.as_deref(),
                scope.and_then(|s| s.child(name)),
                depth_budget - 1,
                include_stack,
            )?;
            property.nested = Some(Box::new(nested));

            property.value_type = match association {
                Some(owner) if self.model.is_collection_valued(owner, name) => {
                    Some(ValueType::Collection)
                }
                Some(_) => Some(ValueType::Entity),
                None => raw.value_type.as_deref().map(ValueType::parse),
            };
        } else {
            let stored_type = match (owner_known, owner_type) {
                (true, Some(owner)) => self.model.field_type(owner, name),
                _ => None,
            };

            property.value_type = raw
                .value_type
                .as_deref()
                .map(ValueType::parse)
                .or_else(|| stored_type.clone().map(ValueType::Scalar));
            property.from_store = stored_type.is_some();
            property.storage_field = match (property.from_store, owner_type) {
                (true, Some(owner)) => self.model.column_name(owner, name),
                _ => None,
            };
        }

        Ok(property)
    }

    /// Splice `schema:` references: load the base document, resolve its own
    /// includes, and deep-merge the local declaration on top. Reference
    /// cycles across documents are a configuration error.
    fn resolve_includes<'r>(
        &self,
        raw: &'r RawSchema,
        include_stack: &mut Vec<String>,
    ) -> Result<std::borrow::Cow<'r, RawSchema>> {
        let Some(reference) = raw.schema.clone() else {
            return Ok(std::borrow::Cow::Borrowed(raw));
        };

        if include_stack.iter().any(|seen| *seen == reference) {
            return Err(DataShapeError::configuration(
                &reference,
                format!(
                    "circular schema reference: {} > {reference}",
                    include_stack.join(" > ")
                ),
            ));
        }

        let base = self.source.load(&reference)?;
        include_stack.push(reference);
        let base = self.resolve_includes(&base, include_stack)?;
        let merged = merge_raw(base.as_ref(), raw);
        include_stack.pop();

        Ok(std::borrow::Cow::Owned(merged))
    }
}

/// Deep-merge a local schema declaration over an inherited base: base
/// property order is kept for properties both sides declare, local-only
/// properties append in local order, and any top-level option absent
/// locally is inherited.
fn merge_raw(base: &RawSchema, local: &RawSchema) -> RawSchema {
    let mut merged = RawSchema::default();

    merged.class = local.class.clone().or_else(|| base.class.clone());
    merged.roles = if local.roles.is_empty() {
        base.roles.clone()
    } else {
        local.roles.clone()
    };
    merged.filter_null_values = local.filter_null_values.or(base.filter_null_values);
    merged.description = local.description.clone().or_else(|| base.description.clone());
    merged.discriminator = local
        .discriminator
        .clone()
        .or_else(|| base.discriminator.clone());
    merged.ignore_discriminator_mismatch =
        local.ignore_discriminator_mismatch || base.ignore_discriminator_mismatch;
    merged.join = local.join.or(base.join);
    merged.value_type = local.value_type.clone().or_else(|| base.value_type.clone());
    merged.source = local.source.clone().or_else(|| base.source.clone());
    merged.decode = local.decode.clone().or_else(|| base.decode.clone());
    merged.hidden = local.hidden || base.hidden;
    merged.conditions = if local.conditions.is_empty() {
        base.conditions.clone()
    } else {
        local.conditions.clone()
    };

    let mut selects: OrderedMap<String> = OrderedMap::new();
    for (name, expr) in base.query.selects.iter() {
        selects.insert(name.to_string(), expr.clone());
    }
    for (name, expr) in local.query.selects.iter() {
        selects.insert(name.to_string(), expr.clone());
    }
    merged.query.selects = selects;

    let mut properties: OrderedMap<RawSchema> = OrderedMap::new();
    for (name, base_prop) in base.properties.iter() {
        match local.properties.get(name) {
            Some(local_prop) => {
                properties.insert(name.to_string(), merge_raw(base_prop, local_prop))
            }
            None => properties.insert(name.to_string(), base_prop.clone()),
        }
    }
    for (name, local_prop) in local.properties.iter() {
        if !properties.contains_key(name) {
            properties.insert(name.to_string(), local_prop.clone());
        }
    }
    merged.properties = properties;

    merged
}

fn is_granted(granted: &HashSet<String>, roles: &[String]) -> bool {
    roles.is_empty() || roles.iter().any(|role| granted.contains(role))
}

/// Process-wide cache of compiled schema trees, keyed by schema identity.
///
/// Entries are written once and shared; invalidation is the host
/// application's concern (manual or redeploy-only). Cached trees are
/// compiled without scope or role gating, so one tree serves every caller
/// and the per-request `ScopeFilter` applies the policy.
#[derive(Default)]
pub struct SchemaCache {
    entries: RwLock<HashMap<String, Arc<SchemaNode>>>,
}

impl SchemaCache {
    pub fn new() -> SchemaCache {
        SchemaCache::default()
    }

    pub fn get_or_compile(
        &self,
        name: &str,
        compiler: &SchemaCompiler,
        depth_budget: i32,
    ) -> Result<Arc<SchemaNode>> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = entries.get(name) {
                return Ok(Arc::clone(hit));
            }
        }

        let compiled = Arc::new(compiler.compile_named(name, depth_budget)?);

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&compiled));
        Ok(Arc::clone(entry))
    }

    pub fn invalidate(&self, name: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
