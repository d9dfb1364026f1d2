pub mod compiler;
pub mod condition;
pub mod error;
pub mod filter;
pub mod metadata;
pub mod persister;
pub mod projection;
pub mod schema;
pub mod scope;
pub mod transformer;
pub mod validator;

#[cfg(test)]
mod test_fixtures;

pub use compiler::{SchemaCache, SchemaCompiler};
pub use condition::{ConditionRenderer, PlaceholderRenderer};
pub use error::{DataShapeError, Result};
pub use filter::ScopeFilter;
pub use metadata::{AssociationKind, MemoryTypeModel, SortOrder, TypeModel};
pub use persister::{AssociationRef, Persister, SqlitePersister};
pub use projection::{ProjectionEngine, Record};
pub use schema::{
    parse_schema, parse_schema_str, JoinMode, PropertyNode, RawSchema, SchemaNode, SchemaSource,
    ValueType, YamlSchemaDir,
};
pub use scope::{parse_scope, parse_scope_str, ScopeNode};
pub use transformer::{DataTransformer, TransformEvent, TransformerRegistry};
pub use validator::SchemaValidator;
