//! Entity store interface and in-memory implementation
//!
//! The REST layer only talks to persistence through [`EntityStore`]. Calls are
//! synchronous; the HTTP layer runs them on the blocking pool.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use mview_common::error::{Error, Result};
use mview_common::types::FieldKind;

use crate::query::{IdFilter, StoreFilter};
use crate::schema::{EntitySchema, SchemaRegistry};

/// An entity as returned by the store
///
/// To-one relations hold the related primary key; to-many relations are only
/// reachable through [`EntityStore::related`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub resource: String,
    pub values: Map<String, Value>,
}

impl Record {
    pub fn new(resource: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            resource: resource.into(),
            values,
        }
    }

    /// Build from a JSON object; anything else yields an empty record
    pub fn from_value(resource: impl Into<String>, value: Value) -> Self {
        let values = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(resource, values)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Primary key as a comparable string
    pub fn key(&self, schema: &EntitySchema) -> Option<String> {
        self.values
            .get(&schema.primary_key)
            .filter(|v| !v.is_null())
            .map(value_key)
    }
}

/// One entity to create plus the to-many ids to attach to it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewEntity {
    pub data: Map<String, Value>,
    pub relations: Vec<(String, Vec<Value>)>,
}

impl NewEntity {
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            data,
            relations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_relation(mut self, field: impl Into<String>, ids: Vec<Value>) -> Self {
        self.relations.push((field.into(), ids));
        self
    }
}

/// Ids to add to and remove from one to-many relation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationDelta {
    pub field: String,
    pub add: Vec<Value>,
    pub delete: Vec<Value>,
}

/// Field changes and relation deltas for every record a filter selects
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityChange {
    pub filter: StoreFilter,
    pub changes: Map<String, Value>,
    pub deltas: Vec<RelationDelta>,
}

/// Persistence collaborator
pub trait EntityStore: Send + Sync {
    /// Records matching the filter, in store order
    fn select(&self, schema: &EntitySchema, filter: &StoreFilter) -> Result<Vec<Record>>;

    /// Records reachable from `record` through relation `field`
    fn related(
        &self,
        schema: &EntitySchema,
        record: &Record,
        field: &str,
        target: &EntitySchema,
    ) -> Result<Vec<Record>>;

    fn create(&self, schema: &EntitySchema, data: &Map<String, Value>) -> Result<Record>;

    /// Create every item and attach its relations, or change nothing
    fn bulk_create(&self, schema: &EntitySchema, items: &[NewEntity]) -> Result<Vec<Record>>;

    /// Apply `changes` to every matching record and return the updated records
    fn update(
        &self,
        schema: &EntitySchema,
        filter: &StoreFilter,
        changes: &Map<String, Value>,
    ) -> Result<Vec<Record>>;

    /// Apply every change in order, or none of them
    ///
    /// Returns the number of records the changes selected.
    fn bulk_update(&self, schema: &EntitySchema, changes: &[EntityChange]) -> Result<usize>;

    /// Add ids to a to-many relation; every id must name an existing target
    fn link(&self, schema: &EntitySchema, record: &Record, field: &str, ids: &[Value])
        -> Result<()>;

    /// Remove ids from a to-many relation
    fn unlink(
        &self,
        schema: &EntitySchema,
        record: &Record,
        field: &str,
        ids: &[Value],
    ) -> Result<()>;

    /// Delete matching records, returning how many were removed
    fn delete(&self, schema: &EntitySchema, filter: &StoreFilter) -> Result<usize>;
}

/// Comparable string form of a key value
pub fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Match a stored value against a raw query-string value
pub fn value_matches(value: &Value, raw: &str) -> bool {
    match value {
        Value::Null => raw == "null",
        Value::Bool(b) => match raw {
            "true" | "True" | "1" => *b,
            "false" | "False" | "0" => !*b,
            _ => false,
        },
        Value::Number(n) => {
            n.to_string() == raw
                || raw
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .zip(n.as_f64())
                    .is_some_and(|(a, b)| (a - b).abs() < f64::EPSILON)
        }
        Value::String(s) => s == raw,
        Value::Array(items) => items.iter().any(|v| value_matches(v, raw)),
        Value::Object(map) => map.get("name").is_some_and(|v| value_matches(v, raw)),
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

static NULL: Value = Value::Null;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LinkKey {
    resource: String,
    field: String,
    owner: String,
}

#[derive(Debug, Clone)]
struct LinkSet {
    target: String,
    ids: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Map<String, Value>>>,
    /// Primary key field per table, recorded on insert
    keys: HashMap<String, String>,
    links: HashMap<LinkKey, LinkSet>,
    sequences: HashMap<String, i64>,
}

impl MemoryState {
    fn rows(&self, resource: &str) -> &[Map<String, Value>] {
        self.tables
            .get(resource)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn linked_ids(&self, resource: &str, field: &str, owner: &str) -> &[Value] {
        let key = LinkKey {
            resource: resource.to_string(),
            field: field.to_string(),
            owner: owner.to_string(),
        };
        self.links
            .get(&key)
            .map(|set| set.ids.as_slice())
            .unwrap_or_default()
    }

    fn matches(&self, schema: &EntitySchema, row: &Map<String, Value>, filter: &StoreFilter) -> bool {
        let key_of = |field: &str| row.get(field).unwrap_or(&NULL);

        let ids_match = match &filter.ids {
            IdFilter::None => true,
            IdFilter::Single { field, value } => value_matches(key_of(field.as_str()), value),
            IdFilter::Set { field, values } => {
                values.iter().any(|v| value_matches(key_of(field.as_str()), v))
            }
        };
        if !ids_match {
            return false;
        }

        filter.equals.iter().all(|(field, raw)| {
            if schema.kind(field) == Some(FieldKind::ToMany) {
                let owner = row
                    .get(&schema.primary_key)
                    .map(value_key)
                    .unwrap_or_default();
                self.linked_ids(&schema.name, field, &owner)
                    .iter()
                    .any(|id| value_matches(id, raw))
            } else {
                value_matches(key_of(field.as_str()), raw)
            }
        })
    }

    /// Validate a create payload and fill defaults
    fn prepare(&mut self, schema: &EntitySchema, data: &Map<String, Value>) -> Result<Map<String, Value>> {
        check_fields(schema, data)?;

        let mut row = Map::new();
        for name in schema.info().fields.iter().map(|f| &f.name) {
            if schema.kind(name) == Some(FieldKind::ToMany) {
                continue;
            }
            row.insert(name.clone(), data.get(name).cloned().unwrap_or(Value::Null));
        }

        let pk = &schema.primary_key;
        let sequence = self.sequences.entry(schema.name.clone()).or_insert(0);
        if row.get(pk).map_or(true, Value::is_null) {
            *sequence += 1;
            row.insert(pk.clone(), Value::from(*sequence));
        } else if let Some(n) = row.get(pk).and_then(Value::as_i64) {
            *sequence = (*sequence).max(n);
        }

        let key = row.get(pk).map(value_key).unwrap_or_default();
        if self
            .rows(&schema.name)
            .iter()
            .any(|r| r.get(pk).map(value_key).as_deref() == Some(key.as_str()))
        {
            return Err(Error::InvalidPayload(format!(
                "A {} with {} {} already exists.",
                schema.name, pk, key
            )));
        }
        Ok(row)
    }

    fn insert(&mut self, schema: &EntitySchema, data: &Map<String, Value>) -> Result<Record> {
        let row = self.prepare(schema, data)?;
        self.keys
            .entry(schema.name.clone())
            .or_insert_with(|| schema.primary_key.clone());
        self.tables
            .entry(schema.name.clone())
            .or_default()
            .push(row.clone());
        Ok(Record::new(schema.name.clone(), row))
    }

    fn update_rows(
        &mut self,
        schema: &EntitySchema,
        filter: &StoreFilter,
        changes: &Map<String, Value>,
    ) -> Result<Vec<Record>> {
        check_fields(schema, changes)?;

        let matching: Vec<usize> = self
            .rows(&schema.name)
            .iter()
            .enumerate()
            .filter(|(_, row)| self.matches(schema, row, filter))
            .map(|(i, _)| i)
            .collect();

        let mut updated = Vec::with_capacity(matching.len());
        if let Some(rows) = self.tables.get_mut(&schema.name) {
            for index in matching {
                let row = &mut rows[index];
                for (field, value) in changes {
                    row.insert(field.clone(), value.clone());
                }
                updated.push(Record::new(schema.name.clone(), row.clone()));
            }
        }
        Ok(updated)
    }

    fn link_ids(
        &mut self,
        schema: &EntitySchema,
        record: &Record,
        field: &str,
        ids: &[Value],
    ) -> Result<()> {
        let target = relation_target(schema, field)?.to_string();
        let owner = record
            .key(schema)
            .ok_or_else(|| Error::StoreError(format!("{} record has no key", schema.name)))?;

        let target_key = self.keys.get(&target).map_or("id", String::as_str);
        let known: HashSet<String> = self
            .rows(&target)
            .iter()
            .filter_map(|row| row.get(target_key))
            .map(value_key)
            .collect();
        if let Some(unknown) = ids.iter().find(|id| !known.contains(&value_key(id))) {
            return Err(Error::InvalidPayload(format!(
                "{} is not a valid {} id for {}.",
                value_key(unknown),
                target,
                field
            )));
        }

        let set = self
            .links
            .entry(LinkKey {
                resource: schema.name.clone(),
                field: field.to_string(),
                owner,
            })
            .or_insert_with(|| LinkSet {
                target,
                ids: Vec::new(),
            });
        for id in ids {
            let key = value_key(id);
            if !set.ids.iter().any(|existing| value_key(existing) == key) {
                set.ids.push(id.clone());
            }
        }
        Ok(())
    }

    fn unlink_ids(
        &mut self,
        schema: &EntitySchema,
        record: &Record,
        field: &str,
        ids: &[Value],
    ) -> Result<()> {
        relation_target(schema, field)?;
        let Some(owner) = record.key(schema) else {
            return Ok(());
        };
        let key = LinkKey {
            resource: schema.name.clone(),
            field: field.to_string(),
            owner,
        };
        let removed: Vec<String> = ids.iter().map(value_key).collect();
        if let Some(set) = self.links.get_mut(&key) {
            set.ids.retain(|id| !removed.contains(&value_key(id)));
        }
        Ok(())
    }

    fn apply(&mut self, schema: &EntitySchema, change: &EntityChange) -> Result<usize> {
        let records = self.update_rows(schema, &change.filter, &change.changes)?;
        for delta in &change.deltas {
            for record in &records {
                if !delta.add.is_empty() {
                    self.link_ids(schema, record, &delta.field, &delta.add)?;
                }
                if !delta.delete.is_empty() {
                    self.unlink_ids(schema, record, &delta.field, &delta.delete)?;
                }
            }
        }
        Ok(records.len())
    }
}

fn check_fields(schema: &EntitySchema, data: &Map<String, Value>) -> Result<()> {
    for name in data.keys() {
        match schema.kind(name) {
            None => {
                return Err(Error::InvalidPayload(format!(
                    "{} is not a field of {}.",
                    name, schema.name
                )))
            }
            Some(FieldKind::ToMany) => {
                return Err(Error::InvalidPayload(format!(
                    "{} is a to-many relation and cannot be set directly.",
                    name
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn relation_target<'a>(schema: &'a EntitySchema, field: &str) -> Result<&'a str> {
    schema.relation_target(field).ok_or_else(|| {
        Error::StoreError(format!("{} is not a relation of {}", field, schema.name))
    })
}

/// In-memory store for development and testing
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Seed records for the sample schema (authors, posts, tags)
    ///
    /// # Errors
    /// Fails if the registry does not declare the sample resources.
    pub fn with_sample_data(self, registry: &SchemaRegistry) -> Result<Self> {
        let schema = |name: &str| {
            registry
                .get(name)
                .ok_or_else(|| Error::ResourceNotFound(name.to_string()))
        };
        let (author, post, tag) = (schema("author")?, schema("post")?, schema("tag")?);

        for label in ["rust", "web", "databases"] {
            self.create(&tag, &object(serde_json::json!({ "label": label })))?;
        }
        self.bulk_create(
            &author,
            &[
                NewEntity::new(object(serde_json::json!({
                    "name": "Ada",
                    "email": "ada@example.com",
                    "avatar": {"name": "avatars/ada.png", "size": 2048}
                }))),
                NewEntity::new(object(serde_json::json!({
                    "name": "Grace",
                    "email": "grace@example.com"
                }))),
            ],
        )?;

        let posts = [
            (serde_json::json!({"title": "Hello World", "score": 1, "published": true, "author": 1}), vec![1, 2]),
            (serde_json::json!({"title": "Borrowing", "score": 2, "published": true, "author": 1}), vec![1]),
            (serde_json::json!({"title": "Lifetimes", "score": 3, "published": false, "author": 2}), vec![1, 3]),
            (serde_json::json!({"title": "Async", "score": 4, "published": true, "author": 2}), vec![]),
        ]
        .into_iter()
        .map(|(data, tags)| {
            NewEntity::new(object(data))
                .with_relation("tags", tags.into_iter().map(Value::from).collect())
        })
        .collect::<Vec<_>>();
        self.bulk_create(&post, &posts)?;

        self.update(
            &author,
            &StoreFilter::field_equals("id", "1"),
            &object(serde_json::json!({"featured": 2})),
        )?;

        info!("Seeded sample data");
        Ok(self)
    }

    /// Run `f` under one write guard, restoring the prior state if it fails
    fn atomically<T>(&self, f: impl FnOnce(&mut MemoryState) -> Result<T>) -> Result<T> {
        let mut state = self.state.write();
        let snapshot = MemoryState::clone(&state);
        let result = f(&mut *state);
        if result.is_err() {
            *state = snapshot;
        }
        result
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for InMemoryStore {
    fn select(&self, schema: &EntitySchema, filter: &StoreFilter) -> Result<Vec<Record>> {
        let state = self.state.read();
        let records: Vec<Record> = state
            .rows(&schema.name)
            .iter()
            .filter(|row| state.matches(schema, row, filter))
            .map(|row| Record::new(schema.name.clone(), row.clone()))
            .collect();
        debug!(resource = %schema.name, rows = records.len(), "Selected records");
        Ok(records)
    }

    fn related(
        &self,
        schema: &EntitySchema,
        record: &Record,
        field: &str,
        target: &EntitySchema,
    ) -> Result<Vec<Record>> {
        relation_target(schema, field)?;
        let state = self.state.read();

        let ids: Vec<Value> = match schema.kind(field) {
            Some(FieldKind::ToMany) => {
                let owner = record.key(schema).unwrap_or_default();
                state.linked_ids(&schema.name, field, &owner).to_vec()
            }
            _ => record
                .get(field)
                .filter(|v| !v.is_null())
                .cloned()
                .into_iter()
                .collect(),
        };

        let rows = state.rows(&target.name);
        Ok(ids
            .iter()
            .filter_map(|id| {
                let key = value_key(id);
                rows.iter().find(|row| {
                    row.get(&target.primary_key).map(value_key).as_deref() == Some(key.as_str())
                })
            })
            .map(|row| Record::new(target.name.clone(), row.clone()))
            .collect())
    }

    fn create(&self, schema: &EntitySchema, data: &Map<String, Value>) -> Result<Record> {
        let record = self.state.write().insert(schema, data)?;
        debug!(resource = %schema.name, "Created record");
        Ok(record)
    }

    fn bulk_create(&self, schema: &EntitySchema, items: &[NewEntity]) -> Result<Vec<Record>> {
        let created = self.atomically(|state| {
            let mut created = Vec::with_capacity(items.len());
            for item in items {
                let record = state.insert(schema, &item.data)?;
                for (field, ids) in &item.relations {
                    state.link_ids(schema, &record, field, ids)?;
                }
                created.push(record);
            }
            Ok(created)
        })?;
        debug!(resource = %schema.name, rows = created.len(), "Bulk created records");
        Ok(created)
    }

    fn update(
        &self,
        schema: &EntitySchema,
        filter: &StoreFilter,
        changes: &Map<String, Value>,
    ) -> Result<Vec<Record>> {
        let updated = self.state.write().update_rows(schema, filter, changes)?;
        debug!(resource = %schema.name, rows = updated.len(), "Updated records");
        Ok(updated)
    }

    fn bulk_update(&self, schema: &EntitySchema, changes: &[EntityChange]) -> Result<usize> {
        let touched = self.atomically(|state| {
            let mut touched = 0;
            for change in changes {
                touched += state.apply(schema, change)?;
            }
            Ok(touched)
        })?;
        debug!(resource = %schema.name, rows = touched, "Bulk updated records");
        Ok(touched)
    }

    fn link(
        &self,
        schema: &EntitySchema,
        record: &Record,
        field: &str,
        ids: &[Value],
    ) -> Result<()> {
        self.state.write().link_ids(schema, record, field, ids)
    }

    fn unlink(
        &self,
        schema: &EntitySchema,
        record: &Record,
        field: &str,
        ids: &[Value],
    ) -> Result<()> {
        self.state.write().unlink_ids(schema, record, field, ids)
    }

    fn delete(&self, schema: &EntitySchema, filter: &StoreFilter) -> Result<usize> {
        let mut state = self.state.write();
        let rows = state.tables.remove(&schema.name).unwrap_or_default();

        let (deleted, kept): (Vec<_>, Vec<_>) = rows
            .into_iter()
            .partition(|row| state.matches(schema, row, filter));
        state.tables.insert(schema.name.clone(), kept);

        let keys: Vec<String> = deleted
            .iter()
            .filter_map(|row| row.get(&schema.primary_key).map(value_key))
            .collect();
        state
            .links
            .retain(|k, _| !(k.resource == schema.name && keys.contains(&k.owner)));
        for set in state.links.values_mut().filter(|s| s.target == schema.name) {
            set.ids.retain(|id| !keys.contains(&value_key(id)));
        }

        debug!(resource = %schema.name, rows = deleted.len(), "Deleted records");
        Ok(deleted.len())
    }
}
