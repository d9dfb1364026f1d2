use crate::error::{DataShapeError, Result};
use crate::metadata::{AssociationDef, AssociationKind, MemoryTypeModel, SortOrder, TypeModel};
use crate::persister::{AssociationRef, Persister};
use serde_json::{Map, Value};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Reference `Persister` over a SQLite database.
///
/// Physical mapping (tables, columns, join columns/tables) comes from a
/// `MemoryTypeModel`; an association without a usable join mapping is an
/// `InvalidQuery`. Result columns are aliased back to logical field names,
/// so rows come out keyed the way the engine expects.
pub struct SqlitePersister {
    conn: rusqlite::Connection,
    model: MemoryTypeModel,
}

impl SqlitePersister {
    pub fn new(conn: rusqlite::Connection, model: MemoryTypeModel) -> SqlitePersister {
        SqlitePersister { conn, model }
    }

    fn table(&self, type_name: &str) -> Result<String> {
        self.model.table_name(type_name).ok_or_else(|| {
            DataShapeError::InvalidQuery(format!("no table mapped for type \"{type_name}\""))
        })
    }

    fn column(&self, type_name: &str, field: &str) -> String {
        self.model
            .column_name(type_name, field)
            .unwrap_or_else(|| field.to_string())
    }

    fn id_column(&self, type_name: &str) -> String {
        let field = self
            .model
            .identifier_fields(type_name)
            .into_iter()
            .next()
            .unwrap_or_else(|| "id".to_string());
        self.column(type_name, &field)
    }

    /// `table.col AS field, ...` with every projected column aliased back
    /// to its logical name.
    fn select_list(&self, type_name: &str, table: &str, fields: &[String]) -> String {
        fields
            .iter()
            .map(|field| format!("{table}.{} AS {field}", self.column(type_name, field)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn association_def(&self, assoc: &AssociationRef) -> Result<&AssociationDef> {
        self.model
            .association(&assoc.owner_type, &assoc.name)
            .ok_or_else(|| {
                DataShapeError::InvalidQuery(format!(
                    "no association mapping for \"{}.{}\"",
                    assoc.owner_type, assoc.name
                ))
            })
    }

    fn query_rows(&self, sql: &str, id: &Value) -> Result<Vec<Map<String, Value>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query(rusqlite::params![json_to_sql(id)])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_map(row, &columns)?);
        }
        Ok(out)
    }
}

impl Persister for SqlitePersister {
    fn fetch_multi_row(
        &self,
        assoc: &AssociationRef,
        owner_id: &Value,
        fields: &[String],
        conditions: &[String],
        order_by: &[(String, SortOrder)],
    ) -> Result<Vec<Map<String, Value>>> {
        let def = self.association_def(assoc)?;
        let target = &assoc.target_type;
        let target_table = self.table(target)?;
        let select = self.select_list(target, &target_table, fields);

        let mut sql = match (assoc.kind, &def.join_column, &def.join_table) {
            (AssociationKind::OneToMany, Some(fk), _) => {
                format!("SELECT {select} FROM {target_table} WHERE {target_table}.{fk} = ?1")
            }
            (AssociationKind::ManyToMany, _, Some(join)) => {
                let target_id = self.id_column(target);
                format!(
                    "SELECT {select} FROM {target_table} \
                     JOIN {jt} ON {jt}.{tc} = {target_table}.{target_id} \
                     WHERE {jt}.{oc} = ?1",
                    jt = join.name,
                    tc = join.target_column,
                    oc = join.owner_column,
                )
            }
            _ => {
                return Err(DataShapeError::InvalidQuery(format!(
                    "the join part cannot be built for \"{}.{}\"; \
                     the association mapping may need a join column or join table",
                    assoc.owner_type, assoc.name
                )))
            }
        };

        for condition in conditions {
            sql.push_str(&format!(" AND ({condition})"));
        }

        let order: Vec<String> = order_by
            .iter()
            .map(|(field, direction)| {
                let dir = match direction {
                    SortOrder::Asc => "ASC",
                    SortOrder::Desc => "DESC",
                };
                format!("{target_table}.{} {dir}", self.column(target, field))
            })
            .collect();
        if !order.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }

        self.query_rows(&sql, owner_id)
    }

    fn fetch_single_row(
        &self,
        assoc: &AssociationRef,
        owner_id: &Value,
        fields: &[String],
        conditions: &[String],
    ) -> Result<Option<Map<String, Value>>> {
        let def = self.association_def(assoc)?;
        let target = &assoc.target_type;
        let target_table = self.table(target)?;
        let select = self.select_list(target, &target_table, fields);

        let Some(fk) = &def.join_column else {
            return Err(DataShapeError::InvalidQuery(format!(
                "the join part cannot be built for \"{}.{}\"; \
                 the association mapping may need a join column",
                assoc.owner_type, assoc.name
            )));
        };

        let mut sql = if def.inverse {
            // Foreign key lives on the target side.
            format!("SELECT {select} FROM {target_table} WHERE {target_table}.{fk} = ?1")
        } else {
            let owner_table = self.table(&assoc.owner_type)?;
            let owner_id_column = self.id_column(&assoc.owner_type);
            let target_id = self.id_column(target);
            format!(
                "SELECT {select} FROM {target_table} \
                 JOIN {owner_table} ON {target_table}.{target_id} = {owner_table}.{fk} \
                 WHERE {owner_table}.{owner_id_column} = ?1"
            )
        };

        for condition in conditions {
            sql.push_str(&format!(" AND ({condition})"));
        }

        Ok(self.query_rows(&sql, owner_id)?.into_iter().next())
    }

    fn fetch_fields_by_id(
        &self,
        type_name: &str,
        fields: &[String],
        id: &Value,
    ) -> Result<Map<String, Value>> {
        let table = self.table(type_name)?;
        let id_column = self.id_column(type_name);

        let mut projected: Vec<String> = fields.to_vec();
        let id_field = self
            .model
            .identifier_fields(type_name)
            .into_iter()
            .next()
            .unwrap_or_else(|| "id".to_string());
        if !projected.contains(&id_field) {
            projected.push(id_field);
        }

        let select = self.select_list(type_name, &table, &projected);
        let sql = format!("SELECT {select} FROM {table} WHERE {table}.{id_column} = ?1");

        self.query_rows(&sql, id)?
            .into_iter()
            .next()
            .ok_or(DataShapeError::Sqlite(
                rusqlite::Error::QueryReturnedNoRows,
            ))
    }

    fn run_select(&self, type_name: &str, select_expr: &str, id: &Value) -> Result<Value> {
        let table = self.table(type_name)?;
        let id_column = self.id_column(type_name);

        // Well-formedness check before touching the store; the parameter
        // slot is replaced with NULL for parsing only.
        let check = format!("SELECT {select_expr} FROM {table} WHERE {table}.{id_column} = NULL");
        Parser::parse_sql(&GenericDialect {}, &check).map_err(|e| {
            DataShapeError::InvalidQuery(format!("select \"{select_expr}\": {e}"))
        })?;

        let sql = format!("SELECT {select_expr} FROM {table} WHERE {table}.{id_column} = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params![json_to_sql(id)])?;
        match rows.next()? {
            Some(row) => Ok(sql_to_json(row.get_ref(0)?)),
            None => Ok(Value::Null),
        }
    }
}

fn row_to_map(row: &rusqlite::Row, columns: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for (index, name) in columns.iter().enumerate() {
        map.insert(name.clone(), sql_to_json(row.get_ref(index)?));
    }
    Ok(map)
}

fn sql_to_json(value: rusqlite::types::ValueRef) -> Value {
    use rusqlite::types::ValueRef;

    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => {
            log::warn!("blob column surfaced to projection; emitting null");
            Value::Null
        }
    }
}

fn json_to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;

    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Sql::Integer(i),
            (None, Some(f)) => Sql::Real(f),
            (None, None) => Sql::Null,
        },
        Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}
