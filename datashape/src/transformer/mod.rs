mod builtin;

use crate::error::{DataShapeError, Result};
use crate::schema::PropertyNode;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Context handed to a transform for one property evaluation. Built fresh
/// per pipeline step, never retained.
pub struct TransformEvent<'a> {
    pub owner_type: Option<&'a str>,
    pub property_name: &'a str,
    pub property: &'a PropertyNode,
    pub parent_type: Option<&'a str>,
    pub parent_property: Option<&'a str>,
    /// The enriched record at this level; transforms may read sibling
    /// values (e.g. a concatenation reading a second hidden field).
    pub record: &'a Map<String, Value>,
}

pub trait DataTransformer {
    fn transform(&self, value: Value, event: &TransformEvent) -> Result<Value>;
}

/// Closure-backed transformer for hosts that register plain functions.
pub struct FnDataTransformer<F>(F);

impl<F> FnDataTransformer<F>
where
    F: Fn(Value, &TransformEvent) -> Result<Value>,
{
    pub fn new(f: F) -> FnDataTransformer<F> {
        FnDataTransformer(f)
    }
}

impl<F> DataTransformer for FnDataTransformer<F>
where
    F: Fn(Value, &TransformEvent) -> Result<Value>,
{
    fn transform(&self, value: Value, event: &TransformEvent) -> Result<Value> {
        (self.0)(value, event)
    }
}

/// Named transform registry consulted by validation and by the decode
/// pipeline at shaping time.
#[derive(Default)]
pub struct TransformerRegistry {
    registry: HashMap<String, Box<dyn DataTransformer + Send + Sync>>,
}

impl TransformerRegistry {
    pub fn new() -> TransformerRegistry {
        TransformerRegistry::default()
    }

    /// A registry pre-populated with the built-in transforms.
    pub fn with_builtins() -> TransformerRegistry {
        let mut registry = TransformerRegistry::new();
        builtin::register(&mut registry);
        registry
    }

    pub fn add(&mut self, name: &str, transformer: Box<dyn DataTransformer + Send + Sync>) {
        self.registry.insert(name.to_string(), transformer);
    }

    pub fn add_fn<F>(&mut self, name: &str, f: F)
    where
        F: Fn(Value, &TransformEvent) -> Result<Value> + Send + Sync + 'static,
    {
        self.add(name, Box::new(FnDataTransformer::new(f)));
    }

    pub fn has(&self, name: &str) -> bool {
        self.registry.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&(dyn DataTransformer + Send + Sync)> {
        self.registry.get(name).map(|b| b.as_ref())
    }

    pub fn resolve(&self, name: &str) -> Result<&(dyn DataTransformer + Send + Sync)> {
        self.get(name)
            .ok_or_else(|| DataShapeError::DataTransformerNotExists(name.to_string()))
    }
}
