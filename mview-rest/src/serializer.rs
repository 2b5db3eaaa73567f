//! Graph serializer
//!
//! Walks each record and its relations up to the requested depth and emits a
//! plain nested JSON document. Relations are expanded only while the current
//! depth is below the requested depth and the related type has not already
//! been expanded on the current branch; the root type counts as expanded.
//! The visited set is copied per branch so siblings never suppress each other.
//!
//! Unlike the query translator, the serializer is strict: a declared field
//! missing from a record is a defect and fails the request.

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, error};

use mview_common::error::{Error, Result};
use mview_common::types::FieldKind;

use crate::pagination::hyperlink;
use crate::query::QuerySpec;
use crate::schema::{EntitySchema, SchemaRegistry};
use crate::store::{value_key, EntityStore, Record};

pub struct GraphSerializer<'a> {
    registry: &'a SchemaRegistry,
    store: &'a dyn EntityStore,
    root_url: &'a str,
    hyperlinks: bool,
}

impl<'a> GraphSerializer<'a> {
    pub fn new(registry: &'a SchemaRegistry, store: &'a dyn EntityStore) -> Self {
        Self {
            registry,
            store,
            root_url: "",
            hyperlinks: true,
        }
    }

    /// Scheme and host used for hyperlinks; empty means relative mode
    #[must_use]
    pub fn with_root_url(mut self, root_url: &'a str) -> Self {
        self.root_url = root_url.trim_end_matches('/');
        self
    }

    #[must_use]
    pub fn with_hyperlinks(mut self, enabled: bool) -> Self {
        self.hyperlinks = enabled;
        self
    }

    fn linking(&self) -> bool {
        self.hyperlinks && !self.root_url.is_empty()
    }

    /// Serialize records of `schema` according to the field selection and depth of `spec`
    ///
    /// # Errors
    /// Returns `SerializationDefect` when a record lacks a declared field or a
    /// relation target is not registered, and propagates store failures from
    /// relation traversal.
    pub fn serialize(
        &self,
        records: &[Record],
        spec: &QuerySpec,
        schema: &EntitySchema,
    ) -> Result<Vec<Value>> {
        let fields: Vec<String> = if spec.fields.is_restricted() {
            schema
                .field_names
                .iter()
                .filter(|f| spec.fields.base.contains(f))
                .cloned()
                .collect()
        } else {
            schema.field_names.clone()
        };

        let mut visited = BTreeSet::new();
        visited.insert(schema.name.clone());

        let top_level_url = self.linking() && !spec.fields.is_restricted();
        let mut documents = Vec::with_capacity(records.len());
        for record in records {
            let mut doc = self.document(record, schema, &fields, spec, 0, &visited)?;
            if top_level_url {
                doc.insert("url".to_string(), self.url_of(record, schema)?);
            }
            documents.push(Value::Object(doc));
        }

        debug!(
            resource = %schema.name,
            rows = documents.len(),
            depth = spec.depth,
            "Serialized records"
        );
        Ok(documents)
    }

    fn document(
        &self,
        record: &Record,
        schema: &EntitySchema,
        fields: &[String],
        spec: &QuerySpec,
        depth: usize,
        visited: &BTreeSet<String>,
    ) -> Result<Map<String, Value>> {
        let mut doc = Map::new();

        for name in fields {
            let Some(kind) = schema.kind(name) else {
                return Err(defect(format!("{} is not declared on {}", name, schema.name)));
            };

            match kind {
                FieldKind::Scalar => {
                    doc.insert(name.clone(), field_value(record, schema, name)?.clone());
                }
                FieldKind::File => {
                    doc.insert(name.clone(), file_name(field_value(record, schema, name)?));
                }
                FieldKind::ToOne | FieldKind::ToMany => {
                    if depth >= spec.depth {
                        continue;
                    }
                    let target_name = schema
                        .relation_target(name)
                        .ok_or_else(|| defect(format!("{}.{} has no target", schema.name, name)))?;
                    if visited.contains(target_name) {
                        continue;
                    }
                    let target = self.registry.get(target_name).ok_or_else(|| {
                        defect(format!("{} is not a registered resource", target_name))
                    })?;

                    let mut branch = visited.clone();
                    branch.insert(target.name.clone());
                    let nested_fields = nested_fields(spec, name, &target);

                    let related = self.store.related(schema, record, name, &target)?;
                    let mut expanded = Vec::with_capacity(related.len());
                    for child in &related {
                        let mut child_doc =
                            self.document(child, &target, &nested_fields, spec, depth + 1, &branch)?;
                        if self.linking() {
                            child_doc.insert("url".to_string(), self.url_of(child, &target)?);
                        }
                        expanded.push(Value::Object(child_doc));
                    }

                    let value = if kind == FieldKind::ToOne {
                        expanded.into_iter().next().unwrap_or(Value::Null)
                    } else {
                        Value::Array(expanded)
                    };
                    doc.insert(name.clone(), value);
                }
            }
        }

        Ok(doc)
    }

    fn url_of(&self, record: &Record, schema: &EntitySchema) -> Result<Value> {
        let id = field_value(record, schema, &schema.unique_id)?;
        Ok(Value::String(hyperlink(
            self.root_url,
            &schema.resource_path,
            &format!("{}/", value_key(id)),
        )))
    }
}

/// Per-relation selection intersected with the target's fields, else all of them
fn nested_fields(spec: &QuerySpec, relation: &str, target: &EntitySchema) -> Vec<String> {
    let selected: Vec<String> = spec
        .fields
        .nested
        .get(relation)
        .map(|requested| {
            target
                .field_names
                .iter()
                .filter(|f| requested.contains(f))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    if selected.is_empty() {
        target.field_names.clone()
    } else {
        selected
    }
}

fn field_value<'r>(record: &'r Record, schema: &EntitySchema, name: &str) -> Result<&'r Value> {
    record.get(name).ok_or_else(|| {
        defect(format!(
            "record of {} is missing declared field {}",
            schema.name, name
        ))
    })
}

fn file_name(value: &Value) -> Value {
    match value {
        Value::Object(map) => map.get("name").cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}

fn defect(message: String) -> Error {
    error!("Serialization defect: {}", message);
    Error::SerializationDefect(message)
}
