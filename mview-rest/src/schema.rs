//! Entity schema registry
//!
//! Resources are declared up front (`ResourceInfo`), validated once, and the
//! derived `EntitySchema` for each type is computed on first access and shared
//! for the lifetime of the process.

use once_cell::sync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use mview_common::error::{Error, Result};
use mview_common::types::{FieldInfo, FieldKind, ResourceInfo};

/// Query parameters with control meaning; never treated as field filters
pub const RESERVED_PARAMS: &[&str] = &[
    "ids",
    "_fields",
    "_depth",
    "_expand",
    "_aggs",
    "_aggs_only",
    "_limit",
    "_page",
    "latest",
];

/// Field/relation/primary-key description of one entity type
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub name: String,
    pub resource_path: String,
    pub primary_key: String,
    /// Field used for hyperlinks and bulk lookups
    pub unique_id: String,
    /// Exposed fields, in declaration order (`public_fields` when declared)
    pub field_names: Vec<String>,
    pub to_one: Vec<String>,
    pub to_many: Vec<String>,
    fields: HashMap<String, FieldInfo>,
    info: ResourceInfo,
}

impl EntitySchema {
    /// Derive the schema of a declared resource
    pub fn from_info(info: &ResourceInfo) -> Self {
        let declared: Vec<String> = info.fields.iter().map(|f| f.name.clone()).collect();
        let field_names = match &info.public_fields {
            Some(public) if !public.is_empty() => declared
                .iter()
                .filter(|name| public.contains(name))
                .cloned()
                .collect(),
            _ => declared,
        };

        let relation_names = |kind: FieldKind| -> Vec<String> {
            info.fields
                .iter()
                .filter(|f| f.kind == kind)
                .map(|f| f.name.clone())
                .collect()
        };

        Self {
            name: info.name.clone(),
            resource_path: info
                .path
                .clone()
                .unwrap_or_else(|| info.name.clone())
                .trim_matches('/')
                .to_string(),
            primary_key: info.primary_key.clone(),
            unique_id: info
                .unique_id
                .clone()
                .unwrap_or_else(|| info.primary_key.clone()),
            field_names,
            to_one: relation_names(FieldKind::ToOne),
            to_many: relation_names(FieldKind::ToMany),
            fields: info
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.clone()))
                .collect(),
            info: info.clone(),
        }
    }

    /// Check if a field is exposed by this schema
    pub fn has_field(&self, name: &str) -> bool {
        self.field_names.iter().any(|f| f == name)
    }

    /// Get a declared field (exposed or not)
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.get(name)
    }

    pub fn kind(&self, name: &str) -> Option<FieldKind> {
        self.fields.get(name).map(|f| f.kind)
    }

    pub fn is_relation(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(FieldInfo::is_relation)
    }

    /// Related resource name of a relation field
    pub fn relation_target(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .filter(|f| f.is_relation())
            .and_then(|f| f.target.as_deref())
    }

    /// The declaration this schema was derived from
    pub fn info(&self) -> &ResourceInfo {
        &self.info
    }
}

struct SchemaEntry {
    info: ResourceInfo,
    schema: OnceCell<Arc<EntitySchema>>,
}

/// Registry of declared entity types with build-once schema cache
pub struct SchemaRegistry {
    entries: HashMap<String, SchemaEntry>,
    /// (resource path, resource name), longest path first
    paths: Vec<(String, String)>,
}

impl SchemaRegistry {
    /// Validate declarations and create the registry
    ///
    /// # Errors
    /// Returns `ConfigError` for duplicate names or paths, a primary key or
    /// unique id that is not declared, or a relation with a missing target.
    pub fn new(resources: Vec<ResourceInfo>) -> Result<Self> {
        let names: HashSet<&str> = resources.iter().map(|r| r.name.as_str()).collect();
        if names.len() != resources.len() {
            return Err(Error::ConfigError("duplicate resource name".to_string()));
        }

        for info in &resources {
            validate_resource(info, &names)?;
        }

        let mut paths: Vec<(String, String)> = resources
            .iter()
            .map(|r| {
                let path = r.path.as_deref().unwrap_or(&r.name).trim_matches('/');
                (path.to_string(), r.name.clone())
            })
            .collect();
        let unique_paths: HashSet<&str> = paths.iter().map(|(p, _)| p.as_str()).collect();
        if unique_paths.len() != paths.len() {
            return Err(Error::ConfigError("duplicate resource path".to_string()));
        }
        paths.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        let entries = resources
            .into_iter()
            .map(|info| {
                (
                    info.name.clone(),
                    SchemaEntry {
                        info,
                        schema: OnceCell::new(),
                    },
                )
            })
            .collect();

        Ok(Self { entries, paths })
    }

    /// Registry with the built-in sample schema (authors, posts, tags)
    pub fn with_sample_schema() -> Self {
        // The sample declarations are static and known to validate.
        Self::new(sample_resources()).unwrap_or_else(|_| Self {
            entries: HashMap::new(),
            paths: Vec::new(),
        })
    }

    /// Get the schema of a resource, computing it on first access
    pub fn get(&self, name: &str) -> Option<Arc<EntitySchema>> {
        let entry = self.entries.get(name)?;
        let schema = entry.schema.get_or_init(|| {
            debug!("Building entity schema for '{}'", name);
            Arc::new(EntitySchema::from_info(&entry.info))
        });
        Some(Arc::clone(schema))
    }

    /// Check if a resource is declared
    pub fn has_resource(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Declared resources, ordered by path
    pub fn resources(&self) -> Vec<&ResourceInfo> {
        let mut infos: Vec<&ResourceInfo> = self.entries.values().map(|e| &e.info).collect();
        infos.sort_by(|a, b| {
            let pa = a.path.as_deref().unwrap_or(&a.name);
            let pb = b.path.as_deref().unwrap_or(&b.name);
            pa.cmp(pb)
        });
        infos
    }

    /// Resolve a request path to its resource schema and trailing id segments
    pub fn resolve(&self, path: &str) -> Option<(Arc<EntitySchema>, Vec<String>)> {
        let path = path.trim_matches('/');
        for (prefix, name) in &self.paths {
            let rest = if path == prefix {
                ""
            } else if let Some(rest) = path
                .strip_prefix(prefix.as_str())
                .and_then(|r| r.strip_prefix('/'))
            {
                rest
            } else {
                continue;
            };

            let ids = rest
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            return self.get(name).map(|schema| (schema, ids));
        }
        None
    }
}

fn validate_resource(info: &ResourceInfo, names: &HashSet<&str>) -> Result<()> {
    let declared: HashSet<&str> = info.fields.iter().map(|f| f.name.as_str()).collect();
    if declared.len() != info.fields.len() {
        return Err(Error::ConfigError(format!(
            "duplicate field on resource '{}'",
            info.name
        )));
    }
    if !declared.contains(info.primary_key.as_str()) {
        return Err(Error::ConfigError(format!(
            "primary key '{}' is not a field of '{}'",
            info.primary_key, info.name
        )));
    }
    for (role, field) in [("unique id", &info.unique_id), ("owner field", &info.owner_field)] {
        if let Some(field) = field {
            if !declared.contains(field.as_str()) {
                return Err(Error::ConfigError(format!(
                    "{} '{}' is not a field of '{}'",
                    role, field, info.name
                )));
            }
        }
    }
    for field in info.fields.iter().filter(|f| f.is_relation()) {
        match field.target.as_deref() {
            Some(target) if names.contains(target) => {}
            Some(target) => {
                return Err(Error::ConfigError(format!(
                    "relation '{}.{}' targets unknown resource '{}'",
                    info.name, field.name, target
                )))
            }
            None => {
                return Err(Error::ConfigError(format!(
                    "relation '{}.{}' has no target",
                    info.name, field.name
                )))
            }
        }
    }
    if let Some(field) = info
        .fields
        .iter()
        .find(|f| RESERVED_PARAMS.contains(&f.name.as_str()))
    {
        return Err(Error::ConfigError(format!(
            "field '{}.{}' shares its name with a reserved query parameter",
            info.name, field.name
        )));
    }
    Ok(())
}

/// Sample declarations used when no resources are configured
pub fn sample_resources() -> Vec<ResourceInfo> {
    let author = ResourceInfo::new(
        "author",
        vec![
            FieldInfo::scalar("id"),
            FieldInfo::scalar("name"),
            FieldInfo::scalar("email"),
            FieldInfo::file("avatar"),
            FieldInfo::to_one("featured", "post"),
        ],
    )
    .with_path("blog/author")
    .with_description("A person who writes posts.");

    let post = ResourceInfo::new(
        "post",
        vec![
            FieldInfo::scalar("id"),
            FieldInfo::scalar("title"),
            FieldInfo::scalar("score"),
            FieldInfo::scalar("published"),
            FieldInfo::to_one("author", "author"),
            FieldInfo::to_many("tags", "tag"),
        ],
    )
    .with_path("blog/post")
    .with_description("A blog post.");

    let tag = ResourceInfo::new(
        "tag",
        vec![FieldInfo::scalar("id"), FieldInfo::scalar("label")],
    )
    .with_path("blog/tag");

    vec![author, post, tag]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_schema() {
        let registry = SchemaRegistry::with_sample_schema();
        let post = registry.get("post").unwrap();
        assert_eq!(post.resource_path, "blog/post");
        assert_eq!(post.primary_key, "id");
        assert_eq!(post.unique_id, "id");
        assert_eq!(post.to_one, vec!["author"]);
        assert_eq!(post.to_many, vec!["tags"]);
        assert_eq!(post.relation_target("author"), Some("author"));
        assert!(!post.is_relation("title"));
    }

    #[test]
    fn test_schema_built_once() {
        let registry = SchemaRegistry::with_sample_schema();
        let first = registry.get("tag").unwrap();
        let second = registry.get("tag").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_concurrent_first_access_shares_one_schema() {
        let registry = Arc::new(SchemaRegistry::with_sample_schema());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get("post").unwrap())
            })
            .collect();
        let schemas: Vec<Arc<EntitySchema>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(schemas.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_public_fields_restrict_field_names() {
        let mut info = ResourceInfo::new(
            "user",
            vec![
                FieldInfo::scalar("id"),
                FieldInfo::scalar("email"),
                FieldInfo::scalar("password"),
            ],
        );
        info.public_fields = Some(vec!["id".to_string(), "email".to_string()]);
        let schema = EntitySchema::from_info(&info);
        assert_eq!(schema.field_names, vec!["id", "email"]);
        assert!(schema.field("password").is_some());
        assert!(!schema.has_field("password"));
    }

    #[test]
    fn test_resolve_path_and_ids() {
        let registry = SchemaRegistry::with_sample_schema();
        let (schema, ids) = registry.resolve("/blog/post/1/2/4/").unwrap();
        assert_eq!(schema.name, "post");
        assert_eq!(ids, vec!["1", "2", "4"]);

        let (schema, ids) = registry.resolve("blog/tag").unwrap();
        assert_eq!(schema.name, "tag");
        assert!(ids.is_empty());

        assert!(registry.resolve("blog/posts").is_none());
        assert!(registry.resolve("nothing/here").is_none());
    }

    #[test]
    fn test_rejects_unknown_relation_target() {
        let info = ResourceInfo::new(
            "post",
            vec![FieldInfo::scalar("id"), FieldInfo::to_one("author", "ghost")],
        );
        let result = SchemaRegistry::new(vec![info]);
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_rejects_missing_primary_key() {
        let mut info = ResourceInfo::new("post", vec![FieldInfo::scalar("slug")]);
        info.primary_key = "id".to_string();
        assert!(SchemaRegistry::new(vec![info]).is_err());
    }

    #[test]
    fn test_rejects_duplicate_paths() {
        let a = ResourceInfo::new("a", vec![FieldInfo::scalar("id")]).with_path("x");
        let b = ResourceInfo::new("b", vec![FieldInfo::scalar("id")]).with_path("x");
        assert!(SchemaRegistry::new(vec![a, b]).is_err());
    }

    #[test]
    fn test_rejects_reserved_field_name() {
        let info = ResourceInfo::new(
            "feed",
            vec![FieldInfo::scalar("id"), FieldInfo::scalar("latest")],
        );
        assert!(matches!(
            SchemaRegistry::new(vec![info]),
            Err(Error::ConfigError(_))
        ));
    }
}
