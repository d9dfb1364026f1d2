//! Shared fixtures for module tests: a small publishing domain (articles,
//! authors, comments, tags) plus a polymorphic media hierarchy, and an
//! in-memory persister that records every call it receives.

use crate::error::Result;
use crate::metadata::{MemoryTypeModel, SortOrder};
use crate::persister::{AssociationRef, Persister};
use crate::schema::MemorySchemaSource;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;

pub fn type_model() -> MemoryTypeModel {
    MemoryTypeModel::from_yaml_str(
        r#"
types:
  Article:
    table: articles
    identifiers: [id]
    fields:
      id: { type: integer }
      title: { type: string, comment: "Article title" }
      body: { type: string }
      created_at: { type: datetime }
      first: { type: string }
      last: { type: string }
      meta: { type: string }
    associations:
      author:
        kind: many_to_one
        target: Author
        join_column: author_id
      comments:
        kind: one_to_many
        target: Comment
        join_column: article_id
        order_by:
          - { field: created_at, direction: asc }
      tags:
        kind: many_to_many
        target: Tag
        join_table: { name: article_tags, owner_column: article_id, target_column: tag_id }
  Author:
    table: authors
    identifiers: [id]
    fields:
      id: { type: integer }
      name: { type: string }
      email: { type: string }
  Comment:
    table: comments
    identifiers: [id]
    fields:
      id: { type: integer }
      message: { type: string }
      created_at: { type: datetime }
      author_id: { type: integer }
    associations:
      replies:
        kind: one_to_many
        target: Comment
        join_column: parent_id
  Tag:
    table: tags
    identifiers: [id]
    fields:
      id: { type: integer }
      label: { type: string }
  Media:
    table: media
    identifiers: [id]
    fields:
      id: { type: integer }
      kind: { type: string }
      title: { type: string }
    discriminator:
      column: kind
      map: { image: ImageMedia, video: VideoMedia }
    subclasses: [ImageMedia, VideoMedia]
  ImageMedia:
    table: media
    identifiers: [id]
    fields:
      id: { type: integer }
      kind: { type: string }
      title: { type: string }
      width: { type: integer }
      height: { type: integer }
  VideoMedia:
    table: media
    identifiers: [id]
    fields:
      id: { type: integer }
      kind: { type: string }
      title: { type: string }
      duration: { type: integer }
"#,
    )
    .expect("fixture model parses")
}

pub fn schema_source() -> MemorySchemaSource {
    let mut source = MemorySchemaSource::new();
    source.add(
        "article_base.yml",
        r#"
class: Article
filter_null_values: true
properties:
  title: {}
  body: {}
"#,
    );
    source.add(
        "author.yml",
        r#"
class: Author
properties:
  name: {}
"#,
    );
    source
}

/// Build a record from a `json!` object literal.
pub fn record(value: Value) -> Map<String, Value> {
    value.as_object().expect("fixture record is an object").clone()
}

/// In-memory persister with canned responses and a call log, so tests can
/// assert what was fetched and how often.
#[derive(Default)]
pub struct RecordingPersister {
    single: RefCell<HashMap<String, Map<String, Value>>>,
    multi: RefCell<HashMap<String, Vec<Map<String, Value>>>>,
    fields: RefCell<HashMap<String, Map<String, Value>>>,
    selects: RefCell<HashMap<String, Value>>,
    calls: RefCell<Vec<String>>,
}

impl RecordingPersister {
    pub fn new() -> RecordingPersister {
        RecordingPersister::default()
    }

    pub fn put_single(&self, assoc_name: &str, id: Value, row: Value) {
        self.single.borrow_mut().insert(
            format!("{assoc_name}:{id}"),
            row.as_object().expect("row is an object").clone(),
        );
    }

    pub fn put_multi(&self, assoc_name: &str, id: Value, rows: Vec<Map<String, Value>>) {
        self.multi.borrow_mut().insert(format!("{assoc_name}:{id}"), rows);
    }

    pub fn put_fields(&self, type_name: &str, id: Value, row: Value) {
        self.fields.borrow_mut().insert(
            format!("{type_name}:{id}"),
            row.as_object().expect("row is an object").clone(),
        );
    }

    pub fn put_select(&self, select_expr: &str, id: Value, value: Value) {
        self.selects
            .borrow_mut()
            .insert(format!("{select_expr}:{id}"), value);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl Persister for RecordingPersister {
    fn fetch_multi_row(
        &self,
        assoc: &AssociationRef,
        owner_id: &Value,
        fields: &[String],
        conditions: &[String],
        _order_by: &[(String, SortOrder)],
    ) -> Result<Vec<Map<String, Value>>> {
        self.log(format!(
            "fetch_multi_row {} {owner_id} fields=[{}] conditions=[{}]",
            assoc.name,
            fields.join(","),
            conditions.join(" && "),
        ));
        Ok(self
            .multi
            .borrow()
            .get(&format!("{}:{owner_id}", assoc.name))
            .cloned()
            .unwrap_or_default())
    }

    fn fetch_single_row(
        &self,
        assoc: &AssociationRef,
        owner_id: &Value,
        fields: &[String],
        conditions: &[String],
    ) -> Result<Option<Map<String, Value>>> {
        self.log(format!(
            "fetch_single_row {} {owner_id} fields=[{}] conditions=[{}]",
            assoc.name,
            fields.join(","),
            conditions.join(" && "),
        ));
        Ok(self
            .single
            .borrow()
            .get(&format!("{}:{owner_id}", assoc.name))
            .cloned())
    }

    fn fetch_fields_by_id(
        &self,
        type_name: &str,
        fields: &[String],
        id: &Value,
    ) -> Result<Map<String, Value>> {
        self.log(format!(
            "fetch_fields_by_id {type_name} {id} [{}]",
            fields.join(",")
        ));
        Ok(self
            .fields
            .borrow()
            .get(&format!("{type_name}:{id}"))
            .cloned()
            .unwrap_or_default())
    }

    fn run_select(&self, type_name: &str, select_expr: &str, id: &Value) -> Result<Value> {
        self.log(format!("run_select {type_name} {select_expr} {id}"));
        Ok(self
            .selects
            .borrow()
            .get(&format!("{select_expr}:{id}"))
            .cloned()
            .unwrap_or(Value::Null))
    }
}
