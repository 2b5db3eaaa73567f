//! Query string translation into a structured `QuerySpec`
//!
//! Translation is lenient: unknown filter keys, unknown `_fields` entries and
//! malformed aggregation tokens are dropped rather than rejected.

use std::collections::HashMap;
use tracing::debug;

use mview_common::error::{Error, Result};

use crate::aggregate::{parse_aggregations, AggRequest};
use crate::schema::{EntitySchema, RESERVED_PARAMS};

/// Primary-key restriction derived from path segments and `ids`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IdFilter {
    #[default]
    None,
    Single { field: String, value: String },
    Set { field: String, values: Vec<String> },
}

impl IdFilter {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Filter handed to the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreFilter {
    pub ids: IdFilter,
    /// Field equality filters, in schema field order
    pub equals: Vec<(String, String)>,
}

impl StoreFilter {
    /// Filter matching a single field value
    pub fn field_equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            ids: IdFilter::None,
            equals: vec![(field.into(), value.into())],
        }
    }
}

/// Requested output fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelection {
    /// Base-level fields; empty means all
    pub base: Vec<String>,
    /// Per-relation field lists, keyed by relation name
    pub nested: HashMap<String, Vec<String>>,
}

impl FieldSelection {
    /// Whether the caller restricted the base fields
    pub fn is_restricted(&self) -> bool {
        !self.base.is_empty()
    }
}

/// Raw pagination parameters; `None` inside means absent or non-numeric
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: Option<i64>,
    pub page: Option<i64>,
}

/// Parsed request intent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub filter: StoreFilter,
    pub fields: FieldSelection,
    /// Relation hops to expand; 0 is flat serialization
    pub depth: usize,
    pub aggregations: Vec<AggRequest>,
    pub aggs_only: bool,
    /// Present when pagination is active
    pub page: Option<PageRequest>,
    pub latest: bool,
}

impl QuerySpec {
    /// Parse a raw query string into a `QuerySpec`
    ///
    /// # Errors
    /// See [`translate`].
    pub fn parse(query_string: &str, schema: &EntitySchema, path_ids: &[String]) -> Result<Self> {
        let params = parse_params(query_string);
        translate(&params, schema, path_ids)
    }
}

/// Decode a query string into a parameter map
pub fn parse_params(query_string: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query_string.as_bytes())
        .into_owned()
        .collect()
}

/// Translate raw request parameters into a `QuerySpec`
///
/// # Errors
/// Returns `QueryError` when a supplied control parameter is also a field of
/// the schema, since the key would be ambiguous.
pub fn translate(
    params: &HashMap<String, String>,
    schema: &EntitySchema,
    path_ids: &[String],
) -> Result<QuerySpec> {
    for key in RESERVED_PARAMS {
        if params.contains_key(*key) && schema.has_field(key) {
            return Err(Error::QueryError(format!(
                "Parameter '{}' is reserved and collides with a field of {}",
                key, schema.name
            )));
        }
    }

    let spec = QuerySpec {
        filter: StoreFilter {
            ids: parse_ids(params, schema, path_ids),
            equals: parse_field_filters(params, schema),
        },
        fields: params
            .get("_fields")
            .map(|raw| parse_fields(raw, schema))
            .unwrap_or_default(),
        depth: parse_depth(params),
        aggregations: params
            .get("_aggs")
            .map(|raw| parse_aggregations(raw, schema))
            .unwrap_or_default(),
        aggs_only: params.contains_key("_aggs_only"),
        page: parse_page(params, schema),
        latest: params.contains_key("latest"),
    };

    debug!(
        resource = %schema.name,
        depth = spec.depth,
        filters = spec.filter.equals.len(),
        "Translated query"
    );
    Ok(spec)
}

/// Union path ids with the `ids` csv
fn parse_ids(
    params: &HashMap<String, String>,
    schema: &EntitySchema,
    path_ids: &[String],
) -> IdFilter {
    let mut ids: Vec<String> = path_ids
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if let Some(csv) = params.get("ids") {
        ids.extend(
            csv.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
    }

    let conventional = schema.has_field("id");
    match ids.len() {
        0 => IdFilter::None,
        1 if conventional => IdFilter::Single {
            field: "id".to_string(),
            value: ids.remove(0),
        },
        _ if conventional => IdFilter::Set {
            field: "id".to_string(),
            values: ids,
        },
        _ => IdFilter::Set {
            field: schema.primary_key.clone(),
            values: ids,
        },
    }
}

fn parse_field_filters(
    params: &HashMap<String, String>,
    schema: &EntitySchema,
) -> Vec<(String, String)> {
    schema
        .field_names
        .iter()
        .filter(|f| !RESERVED_PARAMS.contains(&f.as_str()))
        .filter_map(|f| params.get(f).map(|v| (f.clone(), v.clone())))
        .collect()
}

fn parse_fields(raw: &str, schema: &EntitySchema) -> FieldSelection {
    let mut selection = FieldSelection::default();

    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let base = if let Some((relation, field)) = token.split_once('.') {
            if !(schema.has_field(relation) && schema.is_relation(relation)) || field.is_empty() {
                continue;
            }
            let nested = selection.nested.entry(relation.to_string()).or_default();
            if !nested.iter().any(|f| f == field) {
                nested.push(field.to_string());
            }
            relation
        } else if schema.has_field(token) {
            token
        } else {
            continue;
        };

        if !selection.base.iter().any(|f| f == base) {
            selection.base.push(base.to_string());
        }
    }

    selection
}

fn parse_depth(params: &HashMap<String, String>) -> usize {
    let explicit = params
        .get("_depth")
        .filter(|d| !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()))
        .and_then(|d| d.parse().ok());

    match explicit {
        Some(depth) => depth,
        None if params.contains_key("_expand") => 1,
        None => 0,
    }
}

fn parse_page(params: &HashMap<String, String>, schema: &EntitySchema) -> Option<PageRequest> {
    let limit = params.get("_limit");
    let page = params.get("_page");

    if limit.is_none() && page.is_none() {
        return schema.info().default_page_size.map(|size| PageRequest {
            limit: Some(size),
            page: None,
        });
    }

    Some(PageRequest {
        limit: limit
            .and_then(|l| l.trim().parse().ok())
            .or(schema.info().default_page_size),
        page: page.and_then(|p| p.trim().parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggOp;
    use crate::schema::SchemaRegistry;
    use mview_common::types::{FieldInfo, ResourceInfo};

    fn post_schema() -> std::sync::Arc<EntitySchema> {
        SchemaRegistry::with_sample_schema().get("post").unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_path_and_csv_ids_are_unioned() {
        let schema = post_schema();
        let spec = translate(
            &params(&[("ids", "3,4")]),
            &schema,
            &["1".to_string(), "2".to_string()],
        )
        .unwrap();
        assert_eq!(
            spec.filter.ids,
            IdFilter::Set {
                field: "id".to_string(),
                values: vec!["1".into(), "2".into(), "3".into(), "4".into()],
            }
        );
    }

    #[test]
    fn test_single_id_is_equality() {
        let schema = post_schema();
        let spec = translate(&HashMap::new(), &schema, &["7".to_string()]).unwrap();
        assert_eq!(
            spec.filter.ids,
            IdFilter::Single {
                field: "id".to_string(),
                value: "7".to_string(),
            }
        );
    }

    #[test]
    fn test_unconventional_primary_key() {
        let mut info = ResourceInfo::new(
            "country",
            vec![FieldInfo::scalar("code"), FieldInfo::scalar("name")],
        );
        info.primary_key = "code".to_string();
        let schema = EntitySchema::from_info(&info);
        let spec = translate(&HashMap::new(), &schema, &["NZ".to_string()]).unwrap();
        assert_eq!(
            spec.filter.ids,
            IdFilter::Set {
                field: "code".to_string(),
                values: vec!["NZ".to_string()],
            }
        );
    }

    #[test]
    fn test_unknown_filter_keys_are_dropped() {
        let schema = post_schema();
        let spec = translate(
            &params(&[("title", "Hello"), ("colour", "red")]),
            &schema,
            &[],
        )
        .unwrap();
        assert_eq!(
            spec.filter.equals,
            vec![("title".to_string(), "Hello".to_string())]
        );
    }

    #[test]
    fn test_fields_intersected_with_schema() {
        let schema = post_schema();
        let spec = QuerySpec::parse("_fields=title,bogus,score", &schema, &[]).unwrap();
        assert_eq!(spec.fields.base, vec!["title", "score"]);
        assert!(spec.fields.is_restricted());
    }

    #[test]
    fn test_nested_fields() {
        let schema = post_schema();
        let spec = QuerySpec::parse("_fields=title,author.name,title.x", &schema, &[]).unwrap();
        assert_eq!(spec.fields.base, vec!["title", "author"]);
        assert_eq!(spec.fields.nested["author"], vec!["name"]);
        assert!(!spec.fields.nested.contains_key("title"));
    }

    #[test]
    fn test_depth_rules() {
        let schema = post_schema();
        assert_eq!(QuerySpec::parse("", &schema, &[]).unwrap().depth, 0);
        assert_eq!(QuerySpec::parse("_expand", &schema, &[]).unwrap().depth, 1);
        assert_eq!(QuerySpec::parse("_depth=3", &schema, &[]).unwrap().depth, 3);
        assert_eq!(QuerySpec::parse("_depth=0&_expand", &schema, &[]).unwrap().depth, 0);
        assert_eq!(QuerySpec::parse("_depth=x&_expand", &schema, &[]).unwrap().depth, 1);
    }

    #[test]
    fn test_aggregations_and_flags() {
        let schema = post_schema();
        let spec =
            QuerySpec::parse("_aggs=avg+score,sum+score,max+nope&_aggs_only&latest", &schema, &[])
                .unwrap();
        assert_eq!(spec.aggregations.len(), 1);
        assert_eq!(spec.aggregations[0].op, AggOp::Avg);
        assert!(spec.aggs_only);
        assert!(spec.latest);
    }

    #[test]
    fn test_pagination_params() {
        let schema = post_schema();
        assert_eq!(QuerySpec::parse("", &schema, &[]).unwrap().page, None);

        let spec = QuerySpec::parse("_page=2&_limit=abc", &schema, &[]).unwrap();
        assert_eq!(
            spec.page,
            Some(PageRequest {
                limit: None,
                page: Some(2),
            })
        );
    }

    #[test]
    fn test_model_default_page_size() {
        let mut info = ResourceInfo::new("tag", vec![FieldInfo::scalar("id")]);
        info.default_page_size = Some(25);
        let schema = EntitySchema::from_info(&info);
        let spec = translate(&HashMap::new(), &schema, &[]).unwrap();
        assert_eq!(
            spec.page,
            Some(PageRequest {
                limit: Some(25),
                page: None,
            })
        );
    }

    #[test]
    fn test_reserved_collision_is_an_error() {
        let info = ResourceInfo::new(
            "entry",
            vec![FieldInfo::scalar("id"), FieldInfo::scalar("latest")],
        );
        let schema = EntitySchema::from_info(&info);
        let result = translate(&params(&[("latest", "1")]), &schema, &[]);
        assert!(matches!(result, Err(Error::QueryError(_))));

        // Not supplied, no collision.
        assert!(translate(&HashMap::new(), &schema, &[]).is_ok());
    }
}
