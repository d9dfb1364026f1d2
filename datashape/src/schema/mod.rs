mod node;
mod parser;
mod types;

pub use node::{PropertyNode, SchemaNode, ValueType, MAX_SOURCE_DEPTH};
pub use parser::{parse_schema, parse_schema_str, MemorySchemaSource, SchemaSource, YamlSchemaDir};
pub use types::{JoinMode, OrderedMap, RawQuery, RawSchema};
