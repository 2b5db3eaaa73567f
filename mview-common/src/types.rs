//! Common types for the mview REST layer

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Resource Declaration Types
// ============================================================================

/// Declared entity type, as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub name: String,
    /// Resource path used in routes and hyperlinks (defaults to `name`)
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Field used for hyperlinks and bulk lookups (defaults to the primary key)
    #[serde(default)]
    pub unique_id: Option<String>,
    pub fields: Vec<FieldInfo>,
    #[serde(default)]
    pub public_fields: Option<Vec<String>>,
    #[serde(default)]
    pub no_update_fields: Vec<String>,
    #[serde(default)]
    pub no_display: Vec<String>,
    #[serde(default)]
    pub display_order: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,
    /// Method name (lowercase) to required level name
    #[serde(default)]
    pub perms: HashMap<String, String>,
    #[serde(default)]
    pub default_page_size: Option<i64>,
    #[serde(default)]
    pub no_singles: bool,
    /// Field filled with the authenticated principal's id on create
    #[serde(default)]
    pub owner_field: Option<String>,
}

fn default_primary_key() -> String {
    "id".to_string()
}

fn default_allowed_methods() -> Vec<String> {
    ["get", "post", "put", "delete", "head", "options"]
        .iter()
        .map(|m| (*m).to_string())
        .collect()
}

impl ResourceInfo {
    pub fn new(name: impl Into<String>, fields: Vec<FieldInfo>) -> Self {
        Self {
            name: name.into(),
            path: None,
            primary_key: default_primary_key(),
            unique_id: None,
            fields,
            public_fields: None,
            no_update_fields: Vec::new(),
            no_display: Vec::new(),
            display_order: Vec::new(),
            description: None,
            allowed_methods: default_allowed_methods(),
            perms: HashMap::new(),
            default_page_size: None,
            no_singles: false,
            owner_field: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Declared field of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
    /// Related resource name for `to_one` / `to_many` fields
    #[serde(default)]
    pub target: Option<String>,
}

impl FieldInfo {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar,
            target: None,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::File,
            target: None,
        }
    }

    pub fn to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::ToOne,
            target: Some(target.into()),
        }
    }

    pub fn to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::ToMany,
            target: Some(target.into()),
        }
    }

    #[must_use]
    pub fn is_relation(&self) -> bool {
        matches!(self.kind, FieldKind::ToOne | FieldKind::ToMany)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Scalar,
    /// Blob reference; serialized as its logical name
    File,
    ToOne,
    ToMany,
}

// ============================================================================
// Principal Types
// ============================================================================

/// The caller as established by the authentication collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Option<serde_json::Value>,
    pub level: i64,
}

impl Principal {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(id: impl Into<serde_json::Value>, level: i64) -> Self {
        Self {
            id: Some(id.into()),
            level,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.id.is_some()
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Error body returned for every user-facing failure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub err: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            err: message.into(),
        }
    }
}

impl From<&crate::error::Error> for ErrorBody {
    fn from(error: &crate::error::Error) -> Self {
        Self::new(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_defaults_from_toml_shape() {
        let info: ResourceInfo = serde_json::from_value(serde_json::json!({
            "name": "post",
            "fields": [
                {"name": "id"},
                {"name": "author", "kind": "to_one", "target": "author"}
            ]
        }))
        .unwrap();
        assert_eq!(info.primary_key, "id");
        assert_eq!(info.allowed_methods.len(), 6);
        assert_eq!(info.fields[0].kind, FieldKind::Scalar);
        assert!(info.fields[1].is_relation());
    }

    #[test]
    fn test_principal() {
        assert!(!Principal::anonymous().is_authenticated());
        assert!(Principal::authenticated(7, 2).is_authenticated());
    }

    #[test]
    fn test_error_body() {
        let body = ErrorBody::from(&crate::error::Error::MissingIds);
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            serde_json::json!({"err": "Did not contain any valid ids to delete."})
        );
    }
}
