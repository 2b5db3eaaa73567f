//! Response envelope builder

use serde_json::{Map, Value};

/// Settings deciding whether a lone result is returned bare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinglePolicy {
    /// Process-wide RETURN_SINGLES setting
    pub return_singles: bool,
    /// Per-resource override forcing a list
    pub no_singles: bool,
}

impl Default for SinglePolicy {
    fn default() -> Self {
        Self {
            return_singles: true,
            no_singles: false,
        }
    }
}

/// Assemble the response document
///
/// A single row with no paging block is returned as the bare document unless
/// the policy forces a list. `extra` is added under the `extra` key in both
/// shapes.
pub fn build(
    mut rows: Vec<Value>,
    paging: Option<Map<String, Value>>,
    extra: Option<Map<String, Value>>,
    policy: SinglePolicy,
) -> Value {
    let single = rows.len() == 1 && paging.is_none() && policy.return_singles && !policy.no_singles;

    let mut doc = if single {
        match rows.pop() {
            Some(Value::Object(map)) => map,
            Some(other) => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
            None => Map::new(),
        }
    } else {
        let mut map = Map::new();
        map.insert("count".to_string(), rows.len().into());
        map.insert("data".to_string(), Value::Array(rows));
        if let Some(paging) = paging {
            map.extend(paging);
        }
        map
    };

    if let Some(extra) = extra {
        doc.insert("extra".to_string(), Value::Object(extra));
    }
    Value::Object(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_single_row_is_bare() {
        let doc = build(vec![json!({"id": 1})], None, None, SinglePolicy::default());
        assert_eq!(doc, json!({"id": 1}));
    }

    #[test]
    fn test_many_rows_are_wrapped() {
        let doc = build(
            vec![json!({"id": 1}), json!({"id": 2})],
            None,
            None,
            SinglePolicy::default(),
        );
        assert_eq!(doc, json!({"count": 2, "data": [{"id": 1}, {"id": 2}]}));

        let doc = build(Vec::new(), None, None, SinglePolicy::default());
        assert_eq!(doc, json!({"count": 0, "data": []}));
    }

    #[test]
    fn test_policy_forces_list() {
        let rows = vec![json!({"id": 1})];
        let off = SinglePolicy {
            return_singles: false,
            no_singles: false,
        };
        assert_eq!(build(rows.clone(), None, None, off)["count"], json!(1));

        let forced = SinglePolicy {
            return_singles: true,
            no_singles: true,
        };
        assert_eq!(build(rows, None, None, forced)["count"], json!(1));
    }

    #[test]
    fn test_paging_forces_list_and_merges() {
        let doc = build(
            vec![json!({"id": 1})],
            Some(object(json!({"page_count": 1, "next": null}))),
            None,
            SinglePolicy::default(),
        );
        assert_eq!(
            doc,
            json!({"count": 1, "data": [{"id": 1}], "page_count": 1, "next": null})
        );
    }

    #[test]
    fn test_extra_in_both_shapes() {
        let extra = object(json!({"avg_score": 2.5}));
        let doc = build(
            vec![json!({"id": 1})],
            None,
            Some(extra.clone()),
            SinglePolicy::default(),
        );
        assert_eq!(doc, json!({"id": 1, "extra": {"avg_score": 2.5}}));

        let doc = build(Vec::new(), None, Some(extra), SinglePolicy::default());
        assert_eq!(
            doc,
            json!({"count": 0, "data": [], "extra": {"avg_score": 2.5}})
        );
    }
}
