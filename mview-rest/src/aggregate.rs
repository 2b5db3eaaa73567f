//! Aggregation requests and evaluation over a filtered set

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::fmt;

use crate::schema::EntitySchema;
use crate::store::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Max,
    Min,
    Avg,
}

impl AggOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "max" => Some(Self::Max),
            "min" => Some(Self::Min),
            "avg" => Some(Self::Avg),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Min => "min",
            Self::Avg => "avg",
        }
    }
}

impl fmt::Display for AggOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(op, field)` aggregation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggRequest {
    pub op: AggOp,
    pub field: String,
}

impl AggRequest {
    /// Name of the result entry, `<op>_<field>`
    pub fn key(&self) -> String {
        format!("{}_{}", self.op, self.field)
    }
}

/// Parse the `_aggs` csv; malformed tokens, unknown ops and unknown fields are dropped
pub fn parse_aggregations(raw: &str, schema: &EntitySchema) -> Vec<AggRequest> {
    let mut requests: Vec<AggRequest> = Vec::new();

    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let Some((op, field)) = token.split_once(' ').or_else(|| token.split_once('+')) else {
            continue;
        };
        let (op, field) = (op.trim(), field.trim());
        let Some(op) = AggOp::parse(op) else {
            continue;
        };
        if !schema.has_field(field) || schema.is_relation(field) {
            continue;
        }

        let request = AggRequest {
            op,
            field: field.to_string(),
        };
        if !requests.contains(&request) {
            requests.push(request);
        }
    }

    requests
}

/// Evaluate aggregations over the filtered set
///
/// Over an empty set (or a field with no numeric values for `avg`) the result
/// is `null`. `max`/`min` fall back to lexical comparison for non-numeric fields.
pub fn aggregate(rows: &[Record], requests: &[AggRequest]) -> Map<String, Value> {
    requests
        .iter()
        .map(|request| (request.key(), evaluate(rows, request)))
        .collect()
}

fn evaluate(rows: &[Record], request: &AggRequest) -> Value {
    let values: Vec<&Value> = rows
        .iter()
        .filter_map(|r| r.get(&request.field))
        .filter(|v| !v.is_null())
        .collect();
    let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();

    match request.op {
        AggOp::Avg => {
            if numbers.is_empty() {
                return Value::Null;
            }
            #[allow(clippy::cast_precision_loss)]
            let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
            Number::from_f64(mean).map_or(Value::Null, Value::Number)
        }
        AggOp::Max | AggOp::Min => {
            let wanted = if request.op == AggOp::Max {
                Ordering::Greater
            } else {
                Ordering::Less
            };
            if numbers.is_empty() {
                extreme_string(&values, wanted)
            } else {
                extreme_number(&values, wanted)
            }
        }
    }
}

fn extreme_number(values: &[&Value], wanted: Ordering) -> Value {
    let mut best: Option<(&Value, f64)> = None;
    for value in values {
        let Some(n) = value.as_f64() else { continue };
        match best {
            Some((_, current)) if n.partial_cmp(&current) != Some(wanted) => {}
            _ => best = Some((value, n)),
        }
    }
    best.map_or(Value::Null, |(v, _)| v.clone())
}

fn extreme_string(values: &[&Value], wanted: Ordering) -> Value {
    let mut best: Option<&str> = None;
    for s in values.iter().filter_map(|v| v.as_str()) {
        match best {
            Some(current) if s.cmp(current) != wanted => {}
            _ => best = Some(s),
        }
    }
    best.map_or(Value::Null, |s| Value::String(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;
    use serde_json::json;

    fn scored(scores: &[i64]) -> Vec<Record> {
        scores
            .iter()
            .map(|s| Record::from_value("post", json!({"id": s, "score": s, "title": format!("t{s}")})))
            .collect()
    }

    fn req(op: AggOp, field: &str) -> AggRequest {
        AggRequest {
            op,
            field: field.to_string(),
        }
    }

    #[test]
    fn test_parse_both_separators() {
        let schema = SchemaRegistry::with_sample_schema().get("post").unwrap();
        let parsed = parse_aggregations("avg score,max+score, min id", &schema);
        assert_eq!(
            parsed,
            vec![
                req(AggOp::Avg, "score"),
                req(AggOp::Max, "score"),
                req(AggOp::Min, "id"),
            ]
        );
    }

    #[test]
    fn test_parse_drops_invalid_tokens() {
        let schema = SchemaRegistry::with_sample_schema().get("post").unwrap();
        let parsed = parse_aggregations("sum score,avg nope,avgscore,max tags", &schema);
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_average() {
        let result = aggregate(&scored(&[1, 2, 3, 4]), &[req(AggOp::Avg, "score")]);
        assert_eq!(result["avg_score"], json!(2.5));
    }

    #[test]
    fn test_max_and_min() {
        let result = aggregate(
            &scored(&[3, 9, 1]),
            &[req(AggOp::Max, "score"), req(AggOp::Min, "score")],
        );
        assert_eq!(result["max_score"], json!(9));
        assert_eq!(result["min_score"], json!(1));
    }

    #[test]
    fn test_string_extremes() {
        let result = aggregate(
            &scored(&[1, 2, 3]),
            &[req(AggOp::Max, "title"), req(AggOp::Avg, "title")],
        );
        assert_eq!(result["max_title"], json!("t3"));
        assert_eq!(result["avg_title"], Value::Null);
    }

    #[test]
    fn test_empty_set_is_null() {
        let result = aggregate(&[], &[req(AggOp::Avg, "score"), req(AggOp::Max, "score")]);
        assert_eq!(result["avg_score"], Value::Null);
        assert_eq!(result["max_score"], Value::Null);
    }
}
