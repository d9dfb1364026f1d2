mod sqlite;

pub use sqlite::SqlitePersister;

use crate::error::Result;
use crate::metadata::{AssociationKind, SortOrder};
use serde_json::{Map, Value};

/// One association to traverse, resolved from the type model. The engine
/// builds these; persisters translate them into store queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationRef {
    pub owner_type: String,
    pub name: String,
    pub kind: AssociationKind,
    pub target_type: String,
}

/// Store access the projection engine needs, and nothing more. Condition
/// strings arrive already rendered; fields are logical field names the
/// persister maps to columns itself.
pub trait Persister {
    /// Ordered rows of a collection-valued association.
    fn fetch_multi_row(
        &self,
        assoc: &AssociationRef,
        owner_id: &Value,
        fields: &[String],
        conditions: &[String],
        order_by: &[(String, SortOrder)],
    ) -> Result<Vec<Map<String, Value>>>;

    /// The single row of a single-valued association, if present.
    fn fetch_single_row(
        &self,
        assoc: &AssociationRef,
        owner_id: &Value,
        fields: &[String],
        conditions: &[String],
    ) -> Result<Option<Map<String, Value>>>;

    /// Batched scalar fetch: the remaining stored fields of one record.
    fn fetch_fields_by_id(
        &self,
        type_name: &str,
        fields: &[String],
        id: &Value,
    ) -> Result<Map<String, Value>>;

    /// Execute a named virtual-select expression for one record.
    fn run_select(&self, type_name: &str, select_expr: &str, id: &Value) -> Result<Value>;
}
