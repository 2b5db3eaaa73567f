//! Write boundary: create, update and delete payloads
//!
//! Create body:
//!
//! ```json
//! {"data": {"title": "x"}, "tags": [1, 2]}
//! {"data": [{"title": "x"}, {"entity": {"title": "y"}, "tags": [3]}]}
//! ```
//!
//! Update body (filtered like a GET, or bulk by lookup field):
//!
//! ```json
//! {"data": {"title": "x"}, "tags": {"add": [1], "delete": [2]}}
//! {"lookup": "id", "data": [{"data": {"id": 1, "title": "x"}, "tags": {"add": [3]}}]}
//! ```

use serde_json::{Map, Value};
use tracing::info;

use mview_common::error::{Error, Result};
use mview_common::types::Principal;

use crate::query::StoreFilter;
use crate::schema::EntitySchema;
use crate::store::{value_key, EntityChange, EntityStore, NewEntity, Record, RelationDelta};

/// Parse a request body; an empty body is `None`
///
/// # Errors
/// Returns `InvalidPayload` when the body is not valid JSON.
pub fn read_body(body: &[u8]) -> Result<Option<Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| Error::InvalidPayload(format!("Not a valid json object: {e}")))
}

fn expect_object(value: Value, what: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::InvalidPayload(format!("{what} must be a json object."))),
    }
}

fn take_data(body: &mut Map<String, Value>) -> Result<Value> {
    body.remove("data")
        .ok_or_else(|| Error::InvalidPayload("Payload must contain a data field.".to_string()))
}

// ============================================================================
// Create
// ============================================================================

fn new_entity(data: Map<String, Value>, extra: &Map<String, Value>, schema: &EntitySchema) -> NewEntity {
    let relations = schema
        .to_many
        .iter()
        .filter_map(|name| match extra.get(name) {
            Some(Value::Array(ids)) => Some((name.clone(), ids.clone())),
            _ => None,
        })
        .collect();
    NewEntity { data, relations }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreatePayload {
    One(NewEntity),
    Many(Vec<NewEntity>),
}

impl CreatePayload {
    /// # Errors
    /// Returns `InvalidPayload` for a missing or malformed `data` field.
    pub fn parse(body: Option<Value>, schema: &EntitySchema) -> Result<Self> {
        let body = body.ok_or_else(|| Error::InvalidPayload("Empty request body.".to_string()))?;
        let mut body = expect_object(body, "Payload")?;

        match take_data(&mut body)? {
            Value::Object(data) => Ok(Self::One(new_entity(data, &body, schema))),
            Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    let mut item = expect_object(item, "Each data item")?;
                    match item.remove("entity") {
                        Some(entity) => Ok(new_entity(
                            expect_object(entity, "entity")?,
                            &item,
                            schema,
                        )),
                        None => Ok(new_entity(item, &Map::new(), schema)),
                    }
                })
                .collect::<Result<Vec<_>>>()
                .map(Self::Many),
            _ => Err(Error::InvalidPayload(
                "data must be a json object or array.".to_string(),
            )),
        }
    }
}

/// Create the payload's entities and attach their to-many relations
///
/// # Errors
/// Propagates store failures; nothing is created when any item fails.
pub fn create(
    store: &dyn EntityStore,
    schema: &EntitySchema,
    payload: CreatePayload,
    principal: &Principal,
) -> Result<Vec<Record>> {
    let mut items = match payload {
        CreatePayload::One(item) => vec![item],
        CreatePayload::Many(items) => items,
    };

    if let (Some(owner), Some(id)) = (&schema.info().owner_field, &principal.id) {
        for item in &mut items {
            item.data.insert(owner.clone(), id.clone());
        }
    }

    let records = store.bulk_create(schema, &items)?;
    info!(resource = %schema.name, rows = records.len(), "Created entities");
    Ok(records)
}

// ============================================================================
// Update
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateItem {
    pub data: Map<String, Value>,
    pub deltas: Vec<RelationDelta>,
}

impl UpdateItem {
    fn from_parts(
        data: Map<String, Value>,
        extra: &Map<String, Value>,
        schema: &EntitySchema,
    ) -> Self {
        let ids = |delta: &Map<String, Value>, key: &str| match delta.get(key) {
            Some(Value::Array(ids)) => ids.clone(),
            _ => Vec::new(),
        };
        let deltas = schema
            .to_many
            .iter()
            .filter_map(|name| match extra.get(name) {
                Some(Value::Object(delta)) => Some(RelationDelta {
                    field: name.clone(),
                    add: ids(delta, "add"),
                    delete: ids(delta, "delete"),
                }),
                _ => None,
            })
            .collect();
        Self { data, deltas }
    }

    /// Store change for `filter`, without the primary key or fields declared
    /// as not updatable
    fn into_change(mut self, schema: &EntitySchema, filter: StoreFilter) -> EntityChange {
        self.data.remove(&schema.primary_key);
        for field in &schema.info().no_update_fields {
            self.data.remove(field);
        }
        EntityChange {
            filter,
            changes: self.data,
            deltas: self.deltas,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePayload {
    /// Applied to every entity the request's filters select
    Filtered(UpdateItem),
    /// Each item selects its own entities by `lookup`
    Bulk { lookup: String, items: Vec<UpdateItem> },
}

impl UpdatePayload {
    /// Parse and validate an update body
    ///
    /// # Errors
    /// Returns `InvalidPayload` for a malformed body and `LookupError` when a
    /// bulk item lacks the lookup field; nothing has been written either way.
    pub fn parse(body: Option<Value>, schema: &EntitySchema) -> Result<Self> {
        let body = body.ok_or_else(|| Error::InvalidPayload("Empty request body.".to_string()))?;
        let mut body = expect_object(body, "Payload")?;

        match take_data(&mut body)? {
            Value::Object(data) => Ok(Self::Filtered(UpdateItem::from_parts(data, &body, schema))),
            Value::Array(items) => {
                let lookup = match body.get("lookup") {
                    Some(Value::String(lookup)) => lookup.clone(),
                    Some(_) => {
                        return Err(Error::InvalidPayload("lookup must be a string.".to_string()))
                    }
                    None => schema.unique_id.clone(),
                };

                let mut parsed = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let mut item = expect_object(item, "Each data item")?;
                    let data = match item.remove("data") {
                        Some(Value::Object(data)) => data,
                        _ => Map::new(),
                    };
                    if !data.contains_key(&lookup) {
                        return Err(Error::LookupError {
                            field: lookup,
                            index,
                        });
                    }
                    parsed.push(UpdateItem::from_parts(data, &item, schema));
                }
                Ok(Self::Bulk {
                    lookup,
                    items: parsed,
                })
            }
            _ => Err(Error::InvalidPayload(
                "data must be a json object or array.".to_string(),
            )),
        }
    }
}

/// Apply an update, returning the number of entities touched
///
/// All items are applied as one unit: when any of them fails, nothing is
/// written.
///
/// # Errors
/// Propagates store failures.
pub fn update(
    store: &dyn EntityStore,
    schema: &EntitySchema,
    payload: UpdatePayload,
    filter: &StoreFilter,
) -> Result<usize> {
    let changes: Vec<EntityChange> = match payload {
        UpdatePayload::Filtered(item) => vec![item.into_change(schema, filter.clone())],
        UpdatePayload::Bulk { lookup, items } => items
            .into_iter()
            .map(|item| {
                let value = item.data.get(&lookup).map(value_key).unwrap_or_default();
                item.into_change(schema, StoreFilter::field_equals(lookup.clone(), value))
            })
            .collect(),
    };

    let touched = store.bulk_update(schema, &changes)?;
    info!(resource = %schema.name, rows = touched, "Updated entities");
    Ok(touched)
}

// ============================================================================
// Delete
// ============================================================================

/// Delete the entities selected by ids (and any field filters)
///
/// # Errors
/// Returns `MissingIds` when the request names no ids.
pub fn delete(store: &dyn EntityStore, schema: &EntitySchema, filter: &StoreFilter) -> Result<usize> {
    if filter.ids.is_none() {
        return Err(Error::MissingIds);
    }
    let removed = store.delete(schema, filter)?;
    info!(resource = %schema.name, rows = removed, "Deleted entities");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QuerySpec;
    use crate::schema::SchemaRegistry;
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (SchemaRegistry, InMemoryStore, Arc<EntitySchema>) {
        let registry = SchemaRegistry::with_sample_schema();
        let store = InMemoryStore::new().with_sample_data(&registry).unwrap();
        let post = registry.get("post").unwrap();
        (registry, store, post)
    }

    fn select(store: &InMemoryStore, schema: &EntitySchema, query: &str) -> Vec<Record> {
        let spec = QuerySpec::parse(query, schema, &[]).unwrap();
        store.select(schema, &spec.filter).unwrap()
    }

    #[test]
    fn test_read_body() {
        assert_eq!(read_body(b"").unwrap(), None);
        assert_eq!(read_body(b"  \n").unwrap(), None);
        assert_eq!(read_body(br#"{"a": 1}"#).unwrap(), Some(json!({"a": 1})));
        let err = read_body(b"{nope").unwrap_err();
        assert!(err.to_string().starts_with("Not a valid json object"));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_create_one_with_relations() {
        let (registry, store, post) = setup();
        let payload = CreatePayload::parse(
            Some(json!({"data": {"title": "New", "author": 2}, "tags": [2, 3], "junk": 1})),
            &post,
        )
        .unwrap();
        let created = create(&store, &post, payload, &Principal::anonymous()).unwrap();
        assert_eq!(created.len(), 1);

        let tag = registry.get("tag").unwrap();
        let tags = store.related(&post, &created[0], "tags", &tag).unwrap();
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_create_many_with_entity_items() {
        let (_, store, post) = setup();
        let payload = CreatePayload::parse(
            Some(json!({"data": [
                {"title": "A"},
                {"entity": {"title": "B"}, "tags": [1]}
            ]})),
            &post,
        )
        .unwrap();
        match &payload {
            CreatePayload::Many(items) => {
                assert!(items[0].relations.is_empty());
                assert_eq!(items[1].relations, vec![("tags".to_string(), vec![json!(1)])]);
            }
            CreatePayload::One(_) => panic!("expected many"),
        }
        let created = create(&store, &post, payload, &Principal::anonymous()).unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(select(&store, &post, "tags=1").len(), 4);
    }

    #[test]
    fn test_create_sets_owner_field() {
        let mut info = mview_common::types::ResourceInfo::new(
            "note",
            vec![
                mview_common::types::FieldInfo::scalar("id"),
                mview_common::types::FieldInfo::scalar("owner"),
            ],
        );
        info.owner_field = Some("owner".to_string());
        let schema = EntitySchema::from_info(&info);
        let store = InMemoryStore::new();

        let payload = CreatePayload::parse(Some(json!({"data": {}})), &schema).unwrap();
        let created = create(&store, &schema, payload, &Principal::authenticated("u7", 1)).unwrap();
        assert_eq!(created[0].get("owner"), Some(&json!("u7")));
    }

    #[test]
    fn test_create_rejects_bad_shapes() {
        let (_, _, post) = setup();
        assert!(CreatePayload::parse(None, &post).is_err());
        assert!(CreatePayload::parse(Some(json!([1])), &post).is_err());
        assert!(CreatePayload::parse(Some(json!({"title": "x"})), &post).is_err());
        assert!(CreatePayload::parse(Some(json!({"data": 3})), &post).is_err());
    }

    #[test]
    fn test_filtered_update_strips_protected_fields() {
        let (_, store, post) = setup();
        let payload = UpdatePayload::parse(
            Some(json!({"data": {"id": 99, "score": 10}, "tags": {"add": [3], "delete": [1]}})),
            &post,
        )
        .unwrap();
        let spec = QuerySpec::parse("published=true", &post, &[]).unwrap();
        let touched = update(&store, &post, payload, &spec.filter).unwrap();
        assert_eq!(touched, 3);

        assert_eq!(select(&store, &post, "score=10").len(), 3);
        assert!(select(&store, &post, "id=99").is_empty());
        // Deltas apply to every matched entity.
        assert_eq!(select(&store, &post, "tags=3").len(), 4);
        assert_eq!(select(&store, &post, "tags=1").len(), 1);
    }

    #[test]
    fn test_update_nothing_succeeds() {
        let (_, store, post) = setup();
        let payload = UpdatePayload::parse(Some(json!({"data": {"score": 5}})), &post).unwrap();
        let filter = StoreFilter::field_equals("title", "Missing");
        assert_eq!(update(&store, &post, payload, &filter).unwrap(), 0);
    }

    #[test]
    fn test_bulk_update() {
        let (_, store, post) = setup();
        let payload = UpdatePayload::parse(
            Some(json!({"data": [
                {"data": {"id": 1, "title": "One"}},
                {"data": {"id": 2, "title": "Two"}, "tags": {"add": [3]}}
            ]})),
            &post,
        )
        .unwrap();
        let touched = update(&store, &post, payload, &StoreFilter::default()).unwrap();
        assert_eq!(touched, 2);
        assert_eq!(select(&store, &post, "title=Two&tags=3").len(), 1);
    }

    #[test]
    fn test_bulk_update_failure_leaves_earlier_items_unwritten() {
        let (_, store, post) = setup();
        let payload = UpdatePayload::parse(
            Some(json!({"data": [
                {"data": {"id": 1, "title": "Changed"}},
                {"data": {"id": 2, "bogus": 1}}
            ]})),
            &post,
        )
        .unwrap();
        let err = update(&store, &post, payload, &StoreFilter::default()).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(select(&store, &post, "title=Changed").is_empty());
        assert_eq!(select(&store, &post, "title=Hello%20World").len(), 1);
    }

    #[test]
    fn test_create_with_unknown_relation_id_creates_nothing() {
        let (_, store, post) = setup();
        let payload = CreatePayload::parse(
            Some(json!({"data": [
                {"title": "Fine"},
                {"entity": {"title": "Broken"}, "tags": [1, 42]}
            ]})),
            &post,
        )
        .unwrap();
        let err = create(&store, &post, payload, &Principal::anonymous()).unwrap_err();
        assert!(err.to_string().contains("42"));
        assert_eq!(select(&store, &post, "").len(), 4);
        assert_eq!(select(&store, &post, "tags=1").len(), 3);
    }

    #[test]
    fn test_bulk_update_validates_lookups_first() {
        let (_, store, post) = setup();
        let result = UpdatePayload::parse(
            Some(json!({"lookup": "title", "data": [
                {"data": {"title": "Hello World", "score": 50}},
                {"data": {"score": 60}}
            ]})),
            &post,
        );
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "Lookup title was not found in object number 1");
        assert!(select(&store, &post, "score=50").is_empty());
    }

    #[test]
    fn test_no_update_fields() {
        let mut info = mview_common::types::ResourceInfo::new(
            "doc",
            vec![
                mview_common::types::FieldInfo::scalar("id"),
                mview_common::types::FieldInfo::scalar("slug"),
                mview_common::types::FieldInfo::scalar("body"),
            ],
        );
        info.no_update_fields = vec!["slug".to_string()];
        let schema = EntitySchema::from_info(&info);
        let store = InMemoryStore::new();
        let mut data = Map::new();
        data.insert("slug".into(), json!("a"));
        store.create(&schema, &data).unwrap();

        let payload =
            UpdatePayload::parse(Some(json!({"data": {"slug": "b", "body": "x"}})), &schema)
                .unwrap();
        update(&store, &schema, payload, &StoreFilter::default()).unwrap();
        let rows = store.select(&schema, &StoreFilter::default()).unwrap();
        assert_eq!(rows[0].get("slug"), Some(&json!("a")));
        assert_eq!(rows[0].get("body"), Some(&json!("x")));
    }

    #[test]
    fn test_delete_requires_ids() {
        let (_, store, post) = setup();
        let filter = StoreFilter::field_equals("published", "true");
        assert!(matches!(delete(&store, &post, &filter), Err(Error::MissingIds)));

        let spec = QuerySpec::parse("ids=1,2,42", &post, &[]).unwrap();
        assert_eq!(delete(&store, &post, &spec.filter).unwrap(), 2);

        let spec = QuerySpec::parse("", &post, &["42".to_string()]).unwrap();
        assert_eq!(delete(&store, &post, &spec.filter).unwrap(), 0);
    }
}
