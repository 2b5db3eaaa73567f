//! Per-request orchestration over the query, serializer and write modules
//!
//! GET: translate -> select -> aggregate -> latest -> paginate -> serialize -> envelope.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use mview_common::config::RestConfig;
use mview_common::error::Result;
use mview_common::types::Principal;

use crate::aggregate::aggregate;
use crate::envelope::{self, SinglePolicy};
use crate::pagination::paginate;
use crate::query::QuerySpec;
use crate::schema::{EntitySchema, SchemaRegistry};
use crate::serializer::GraphSerializer;
use crate::store::EntityStore;
use crate::write::{self, CreatePayload, UpdatePayload};

/// Process-wide response settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSettings {
    pub hyperlink_values: bool,
    pub return_singles: bool,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            hyperlink_values: true,
            return_singles: true,
        }
    }
}

impl From<&RestConfig> for ViewSettings {
    fn from(config: &RestConfig) -> Self {
        Self {
            hyperlink_values: config.hyperlink_values,
            return_singles: config.return_singles,
        }
    }
}

/// Model-backed REST operations for every registered resource
pub struct ModelView {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn EntityStore>,
    settings: ViewSettings,
    levels: HashMap<String, i64>,
}

impl ModelView {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        store: Arc<dyn EntityStore>,
        settings: ViewSettings,
        levels: HashMap<String, i64>,
    ) -> Self {
        Self {
            registry,
            store,
            settings,
            levels,
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> ViewSettings {
        self.settings
    }

    fn policy(&self, schema: &EntitySchema) -> SinglePolicy {
        SinglePolicy {
            return_singles: self.settings.return_singles,
            no_singles: schema.info().no_singles,
        }
    }

    fn link_root<'r>(&self, root_url: &'r str) -> &'r str {
        if self.settings.hyperlink_values {
            root_url
        } else {
            ""
        }
    }

    fn serializer<'s>(&'s self, root_url: &'s str) -> GraphSerializer<'s> {
        GraphSerializer::new(&self.registry, self.store.as_ref())
            .with_root_url(root_url)
            .with_hyperlinks(self.settings.hyperlink_values)
    }

    /// Read entities and build the response document
    ///
    /// # Errors
    /// Propagates store failures and serializer defects.
    pub fn get(&self, schema: &EntitySchema, spec: &QuerySpec, root_url: &str) -> Result<Value> {
        let mut records = self.store.select(schema, &spec.filter)?;

        // Aggregates cover the whole filtered set, before `latest` and paging.
        let extra = (!spec.aggregations.is_empty()).then(|| aggregate(&records, &spec.aggregations));

        if spec.latest {
            records.truncate(1);
        }

        if spec.aggs_only && extra.is_some() {
            return Ok(envelope::build(Vec::new(), None, extra, self.policy(schema)));
        }

        let (rows, paging) = match spec.page {
            Some(request) => {
                let page = paginate(records.len(), request.limit, request.page);
                let paging = page
                    .meta
                    .to_document(self.link_root(root_url), &schema.resource_path);
                (page.slice(&records), Some(paging))
            }
            None => (records.as_slice(), None),
        };

        let documents = self.serializer(root_url).serialize(rows, spec, schema)?;
        debug!(resource = %schema.name, rows = documents.len(), "GET");
        Ok(envelope::build(documents, paging, extra, self.policy(schema)))
    }

    /// Create entities and return them serialized with at least one level of expansion
    ///
    /// # Errors
    /// Returns `InvalidPayload` for malformed bodies and propagates store failures.
    pub fn post(
        &self,
        schema: &EntitySchema,
        spec: &QuerySpec,
        body: Option<Value>,
        principal: &Principal,
        root_url: &str,
    ) -> Result<Value> {
        let payload = CreatePayload::parse(body, schema)?;
        let records = write::create(self.store.as_ref(), schema, payload, principal)?;

        let spec = QuerySpec {
            depth: spec.depth.max(1),
            ..spec.clone()
        };
        let documents = self.serializer(root_url).serialize(&records, &spec, schema)?;
        Ok(envelope::build(documents, None, None, self.policy(schema)))
    }

    /// Update the entities selected like a GET (or by bulk lookup)
    ///
    /// # Errors
    /// Returns `InvalidPayload` or `LookupError`; a failed update writes nothing.
    pub fn put(&self, schema: &EntitySchema, spec: &QuerySpec, body: Option<Value>) -> Result<usize> {
        let payload = UpdatePayload::parse(body, schema)?;
        write::update(self.store.as_ref(), schema, payload, &spec.filter)
    }

    /// # Errors
    /// Returns `MissingIds` when no ids were given.
    pub fn delete(&self, schema: &EntitySchema, spec: &QuerySpec) -> Result<usize> {
        write::delete(self.store.as_ref(), schema, &spec.filter)
    }

    /// Metadata document describing a resource
    pub fn options(&self, schema: &EntitySchema) -> Value {
        let info = schema.info();
        let mut no_updates = info.no_update_fields.clone();
        if !no_updates.contains(&schema.primary_key) {
            no_updates.push(schema.primary_key.clone());
        }
        let mut levels: Vec<(&String, &i64)> = self.levels.iter().collect();
        levels.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        let perm_level: Map<String, Value> = levels
            .into_iter()
            .map(|(name, level)| (name.clone(), Value::from(*level)))
            .collect();
        let mut req_perms: Vec<(&String, &String)> = info.perms.iter().collect();
        req_perms.sort();
        let req_perms: Map<String, Value> = req_perms
            .into_iter()
            .map(|(method, level)| (method.clone(), Value::String(level.clone())))
            .collect();

        json!({
            "resource": schema.name,
            "description": info.description,
            "content_types": ["application/json"],
            "accepts": ["application/json"],
            "no_updates": no_updates,
            "no_display": info.no_display,
            "display_order": info.display_order,
            "fields": schema.field_names,
            "req_perms": req_perms,
            "perm_level": perm_level,
        })
    }

    /// Value of the `Allow` header for a resource
    pub fn allow_header(schema: &EntitySchema) -> String {
        schema
            .info()
            .allowed_methods
            .iter()
            .map(|m| m.to_uppercase())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Every declared resource path with its description
    pub fn discovery(&self) -> Value {
        let resources: Vec<Value> = self
            .registry
            .resources()
            .into_iter()
            .map(|info| {
                json!({
                    "resource": info.name,
                    "path": format!("/{}/", info.path.as_deref().unwrap_or(&info.name).trim_matches('/')),
                    "description": info.description,
                })
            })
            .collect();
        json!({ "count": resources.len(), "data": resources })
    }
}
