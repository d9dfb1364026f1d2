use crate::condition::ConditionRenderer;
use crate::error::{DataShapeError, Result};
use crate::metadata::TypeModel;
use crate::persister::{AssociationRef, Persister};
use crate::schema::{PropertyNode, SchemaNode, ValueType};
use crate::scope::ScopeNode;
use crate::transformer::{TransformEvent, TransformerRegistry};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;

/// A raw or enriched record: logical field/association names to values.
pub type Record = Map<String, Value>;

/// The two-phase fetch/shape walker.
///
/// `fetch` enriches a raw record with everything the filtered schema needs:
/// association rows, virtual selects, and missing stored scalars, the last
/// batched into one round trip per record. `shape` then renders the
/// enriched record into the output document: branch selection, scope
/// masking, decode pipelines, and the null policy.
pub struct ProjectionEngine<'a> {
    model: &'a dyn TypeModel,
    persister: &'a dyn Persister,
    transformers: &'a TransformerRegistry,
    renderer: &'a dyn ConditionRenderer,
    /// Association lookups repeat heavily inside one projection; memoized
    /// per engine instance.
    associations: RefCell<HashMap<(String, String), Option<AssociationRef>>>,
}

impl<'a> ProjectionEngine<'a> {
    pub fn new(
        model: &'a dyn TypeModel,
        persister: &'a dyn Persister,
        transformers: &'a TransformerRegistry,
        renderer: &'a dyn ConditionRenderer,
    ) -> ProjectionEngine<'a> {
        ProjectionEngine {
            model,
            persister,
            transformers,
            renderer,
            associations: RefCell::new(HashMap::new()),
        }
    }

    /// Fetch then shape one record.
    pub fn project(
        &self,
        record: &Record,
        node: &SchemaNode,
        scope: Option<&ScopeNode>,
    ) -> Result<Record> {
        let enriched = self.fetch(record, node, scope)?;
        self.shape(&enriched, node, scope, None, None)
    }

    /// Project every record of a sequence through one filtered schema,
    /// short-circuiting to `default` when there is nothing to do.
    pub fn project_list(
        &self,
        records: &[Record],
        node: &SchemaNode,
        scope: Option<&ScopeNode>,
        default: Vec<Record>,
    ) -> Result<Vec<Record>> {
        if records.is_empty() || node.properties.is_empty() {
            return Ok(default);
        }

        records
            .iter()
            .map(|record| self.project(record, node, scope))
            .collect()
    }

    /// Phase A: enrich a record with every value shaping will need. The
    /// caller's record is never mutated.
    pub fn fetch(
        &self,
        record: &Record,
        node: &SchemaNode,
        scope: Option<&ScopeNode>,
    ) -> Result<Record> {
        let mut enriched = record.clone();
        if node.properties.is_empty() {
            return Ok(enriched);
        }

        let branch = self.resolve_branch(record, node)?;
        let owner_type = branch
            .as_ref()
            .map(|(_, concrete)| concrete.as_str())
            .or(node.type_name.as_deref());
        let owner_id = self.identifier_value(record, owner_type);

        let mut deferred: Vec<String> = Vec::new();

        for property in &node.properties {
            if !branch_applies(property, &branch) {
                continue;
            }

            let select_expr = property
                .source
                .as_deref()
                .and_then(|source| node.query_selects.get(source).map(|expr| (source, expr)));

            if let Some((select_name, expr)) = select_expr {
                if enriched.contains_key(select_name) {
                    continue;
                }
                let (Some(owner), Some(id)) = (owner_type, &owner_id) else {
                    log::warn!(
                        "skipping virtual select \"{select_name}\": no identifier on record"
                    );
                    continue;
                };
                let value = self.persister.run_select(owner, expr, id)?;
                enriched.insert(select_name.to_string(), value);
                continue;
            }

            if let Some(present) = record.get(&property.name) {
                if let Some(nested) = &property.nested {
                    let sub_scope = scope.and_then(|s| s.child(&property.name));
                    let refreshed = match present {
                        Value::Array(items) => {
                            let mut fetched = Vec::with_capacity(items.len());
                            for item in items {
                                match item.as_object() {
                                    Some(map) => fetched.push(Value::Object(self.fetch(
                                        map, nested, sub_scope,
                                    )?)),
                                    None => fetched.push(item.clone()),
                                }
                            }
                            Some(Value::Array(fetched))
                        }
                        Value::Object(map) => {
                            Some(Value::Object(self.fetch(map, nested, sub_scope)?))
                        }
                        _ => None,
                    };
                    if let Some(value) = refreshed {
                        enriched.insert(property.name.clone(), value);
                    }
                }
                continue;
            }

            if let Some(nested) = &property.nested {
                let Some(owner) = owner_type else { continue };
                let Some(assoc) = self.association(owner, &property.name) else {
                    continue;
                };
                let Some(id) = &owner_id else {
                    log::warn!(
                        "skipping association \"{}\": no identifier on record",
                        property.name
                    );
                    continue;
                };

                let sub_scope = scope.and_then(|s| s.child(&property.name));
                let fields = nested.database_fields(sub_scope)?;
                let alias = nested
                    .table_identity
                    .clone()
                    .unwrap_or_else(|| assoc.target_type.clone());
                let conditions = self.render_conditions(&property.conditions, &alias)?;

                if assoc.kind.is_collection_valued() {
                    let order_by = self.model.association_order_by(owner, &property.name);
                    let rows = self.persister.fetch_multi_row(
                        &assoc, id, &fields, &conditions, &order_by,
                    )?;
                    let mut fetched = Vec::with_capacity(rows.len());
                    for row in &rows {
                        fetched.push(Value::Object(self.fetch(row, nested, sub_scope)?));
                    }
                    enriched.insert(property.name.clone(), Value::Array(fetched));
                } else {
                    let row = self
                        .persister
                        .fetch_single_row(&assoc, id, &fields, &conditions)?;
                    let value = match row {
                        Some(row) => Value::Object(self.fetch(&row, nested, sub_scope)?),
                        None => Value::Null,
                    };
                    enriched.insert(property.name.clone(), value);
                }
                continue;
            }

            if property.from_store && !deferred.contains(&property.name) {
                deferred.push(property.name.clone());
            }
        }

        if !deferred.is_empty() {
            if let (Some(owner), Some(id)) = (owner_type, &owner_id) {
                let fetched = self.persister.fetch_fields_by_id(owner, &deferred, id)?;
                for (key, value) in fetched {
                    enriched.entry(key).or_insert(value);
                }
            } else {
                log::warn!(
                    "cannot batch-fetch {} missing field(s): no identifier on record",
                    deferred.len()
                );
            }
        }

        Ok(enriched)
    }

    /// Phase B: render an enriched record into the output document.
    pub fn shape(
        &self,
        record: &Record,
        node: &SchemaNode,
        scope: Option<&ScopeNode>,
        parent_type: Option<&str>,
        parent_property: Option<&str>,
    ) -> Result<Record> {
        let mut output = Record::new();
        if node.properties.is_empty() {
            return Ok(output);
        }

        let branch = self.resolve_branch(record, node)?;
        let owner_type = branch
            .as_ref()
            .map(|(_, concrete)| concrete.as_str())
            .or(node.type_name.as_deref());

        for property in &node.properties {
            if property.hidden {
                // Hidden values stay available to source chains but are
                // never emitted.
                continue;
            }
            if !branch_applies(property, &branch) {
                continue;
            }

            let property_scope = match scope {
                Some(scope) if !scope.contains(&property.name) => continue,
                Some(scope) => scope.child(&property.name),
                None => None,
            };

            let value = property
                .source
                .as_deref()
                .and_then(|source| record.get(source))
                .or_else(|| record.get(&property.name))
                .cloned()
                .unwrap_or(Value::Null);

            let value = match &property.nested {
                Some(nested) => match value {
                    Value::Array(items) => {
                        let mut shaped = Vec::with_capacity(items.len());
                        for item in &items {
                            if let Some(map) = item.as_object() {
                                shaped.push(Value::Object(self.shape(
                                    map,
                                    nested,
                                    property_scope,
                                    owner_type,
                                    Some(&property.name),
                                )?));
                            }
                        }
                        Value::Array(shaped)
                    }
                    Value::Object(map) => {
                        // A row of nothing but nulls is a join placeholder,
                        // not an entity.
                        if map.values().all(Value::is_null) {
                            Value::Null
                        } else {
                            Value::Object(self.shape(
                                &map,
                                nested,
                                property_scope,
                                owner_type,
                                Some(&property.name),
                            )?)
                        }
                    }
                    other => other,
                },
                None => value,
            };

            if value.is_null() {
                let is_container = property
                    .value_type
                    .as_ref()
                    .map(ValueType::is_container)
                    .unwrap_or(false);
                if is_container {
                    output.insert(property.name.clone(), Value::Array(Vec::new()));
                } else if !node.filter_null_values {
                    output.insert(property.name.clone(), Value::Null);
                }
                continue;
            }

            let mut value = value;
            for transformer_name in property.decode_pipeline() {
                let transformer = self.transformers.resolve(transformer_name)?;
                let event = TransformEvent {
                    owner_type,
                    property_name: &property.name,
                    property,
                    parent_type,
                    parent_property,
                    record,
                };
                value = transformer.transform(value, &event)?;
            }

            if property.decode.is_some() {
                if let (Value::Object(map), Some(mask)) = (&value, property_scope) {
                    value = Value::Object(scoped_value(map, mask));
                }
            }

            output.insert(property.name.clone(), value);
        }

        Ok(output)
    }

    /// Concrete branch of a polymorphic node: the discriminator tag and the
    /// mapped type. `None` when the node has no subclasses.
    fn resolve_branch(
        &self,
        record: &Record,
        node: &SchemaNode,
    ) -> Result<Option<(String, String)>> {
        if !node.has_subclasses {
            return Ok(None);
        }

        let column = node.discriminator_column.as_deref().unwrap_or_default();
        let tag = match record.get(column) {
            Some(Value::String(tag)) if !tag.is_empty() => tag.clone(),
            Some(Value::Number(tag)) => tag.to_string(),
            _ => {
                return Err(DataShapeError::MissingDiscriminator(format!(
                    "no value in column \"{column}\" of type \"{}\"",
                    node.identity()
                )))
            }
        };

        match node.discriminator_map.get(&tag) {
            Some(concrete) => Ok(Some((tag, concrete.clone()))),
            None => Err(DataShapeError::MissingDiscriminator(format!(
                "unmapped value \"{tag}\" in column \"{column}\" of type \"{}\"",
                node.identity()
            ))),
        }
    }

    fn association(&self, owner_type: &str, name: &str) -> Option<AssociationRef> {
        let key = (owner_type.to_string(), name.to_string());
        if let Some(cached) = self.associations.borrow().get(&key) {
            return cached.clone();
        }

        let resolved = match (
            self.model.association_kind(owner_type, name),
            self.model.target_type(owner_type, name),
        ) {
            (Some(kind), Some(target_type)) => Some(AssociationRef {
                owner_type: owner_type.to_string(),
                name: name.to_string(),
                kind,
                target_type,
            }),
            _ => None,
        };

        self.associations.borrow_mut().insert(key, resolved.clone());
        resolved
    }

    fn identifier_value(&self, record: &Record, owner_type: Option<&str>) -> Option<Value> {
        let id_field = owner_type
            .map(|t| self.model.identifier_fields(t))
            .and_then(|ids| ids.into_iter().next())
            .unwrap_or_else(|| "id".to_string());
        record.get(&id_field).filter(|v| !v.is_null()).cloned()
    }

    fn render_conditions(&self, conditions: &[String], alias: &str) -> Result<Vec<String>> {
        let mut rendered = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let prepared = self.renderer.render(condition, alias)?;
            if !prepared.is_empty() {
                rendered.push(prepared);
            }
        }
        Ok(rendered)
    }
}

/// A property with a discriminator tag only applies to its own branch.
fn branch_applies(property: &PropertyNode, branch: &Option<(String, String)>) -> bool {
    match (&property.discriminator, branch) {
        (None, _) => true,
        (Some(tag), Some((resolved, _))) => tag == resolved,
        (Some(_), None) => false,
    }
}

/// Intersect a transformed object value against a scope mask: keys absent
/// from the mask are dropped, nested maps recurse through nested masks.
fn scoped_value(value: &Record, scope: &ScopeNode) -> Record {
    let mut out = Record::new();

    for (key, entry) in value {
        if !scope.contains(key) {
            continue;
        }
        match (entry, scope.child(key)) {
            (Value::Object(map), Some(mask)) => {
                out.insert(key.clone(), Value::Object(scoped_value(map, mask)));
            }
            _ => {
                out.insert(key.clone(), entry.clone());
            }
        }
    }

    out
}
