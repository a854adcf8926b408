//! Record ⇄ point conversion shared by the vector-store adapters.

use fieldflow_utils::{ConnectorError, FieldflowResult, Record, Value};
use serde_json::{Map, Value as Json};

use crate::pipeline::DataSourceConfig;

pub(crate) const DEFAULT_ID_FIELD: &str = "id";
pub(crate) const DEFAULT_VECTOR_FIELD: &str = "values";

/// Which record fields carry the point id and the embedding.
pub(crate) struct PointFields<'a> {
    pub id: &'a str,
    pub vector: &'a str,
}

impl<'a> PointFields<'a> {
    pub(crate) fn from_config(config: &'a DataSourceConfig) -> Self {
        Self {
            id: config.param_or("idField", DEFAULT_ID_FIELD),
            vector: config.param_or("vectorField", DEFAULT_VECTOR_FIELD),
        }
    }
}

/// An embedding held as a JSON array string or comma-separated numbers.
pub(crate) fn parse_vector(value: &Value) -> Option<Vec<f32>> {
    let text = match value {
        Value::String(s) => s.trim(),
        _ => return None,
    };
    if text.starts_with('[') {
        return serde_json::from_str::<Vec<f32>>(text).ok();
    }
    text.split(',')
        .map(|part| part.trim().parse::<f32>().ok())
        .collect::<Option<Vec<_>>>()
        .filter(|v| !v.is_empty())
}

/// Split a record into (id, vector, payload). Null payload values are dropped
/// because vector stores reject them.
pub(crate) fn split_point(
    connector: &str,
    record: &Record,
    fields: &PointFields<'_>,
) -> FieldflowResult<(Json, Vec<f32>, Map<String, Json>)> {
    let id = match record.get(fields.id) {
        Some(Value::Int(i)) => Json::from(*i),
        Some(v) if !v.is_empty() => Json::String(v.to_string()),
        _ => {
            let message = format!("record has no '{}' id field", fields.id);
            return Err(ConnectorError::new(connector, message).into());
        }
    };
    let vector = record
        .get(fields.vector)
        .and_then(parse_vector)
        .ok_or_else(|| {
            ConnectorError::new(
                connector,
                format!("record {id} has no numeric vector in '{}'", fields.vector),
            )
        })?;
    let payload = record
        .iter()
        .filter(|(k, v)| *k != fields.id && *k != fields.vector && !v.is_null())
        .map(|(k, v)| (k.to_string(), v.to_json()))
        .collect();
    Ok((id, vector, payload))
}

/// Rebuild a record from a point: id first, then the vector (as JSON text),
/// then payload fields.
pub(crate) fn join_point(
    id: &Json,
    vector: Option<&Json>,
    payload: Option<&Map<String, Json>>,
    fields: &PointFields<'_>,
) -> Record {
    let mut record = Record::new();
    record.insert(fields.id, Value::from_json(id.clone()));
    if let Some(v) = vector.filter(|v| !v.is_null()) {
        record.insert(fields.vector, v.to_string());
    }
    for (k, v) in payload.into_iter().flatten() {
        record.insert(k.as_str(), Value::from_json(v.clone()));
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> PointFields<'static> {
        PointFields { id: "id", vector: "values" }
    }

    #[test]
    fn vectors_parse_from_json_or_csv() {
        assert_eq!(parse_vector(&Value::from("[0.5, 1, -2]")), Some(vec![0.5, 1.0, -2.0]));
        assert_eq!(parse_vector(&Value::from("0.1, 0.2")), Some(vec![0.1, 0.2]));
        assert_eq!(parse_vector(&Value::from("a,b")), None);
        assert_eq!(parse_vector(&Value::from("")), None);
        assert_eq!(parse_vector(&Value::Int(1)), None);
    }

    #[test]
    fn split_drops_nulls_and_routing_fields() {
        let record: Record = [
            ("id", Value::from("doc-1")),
            ("values", Value::from("[1, 2]")),
            ("title", Value::from("hello")),
            ("gone", Value::Null),
        ]
        .into_iter()
        .collect();
        let (id, vector, payload) = split_point("pinecone", &record, &fields()).unwrap();
        assert_eq!(id, json!("doc-1"));
        assert_eq!(vector, vec![1.0, 2.0]);
        assert_eq!(Json::Object(payload), json!({"title": "hello"}));
    }

    #[test]
    fn split_requires_id_and_vector() {
        let no_id: Record = [("values", "[1]")].into_iter().collect();
        let err = split_point("qdrant", &no_id, &fields()).unwrap_err();
        assert_eq!(err.to_string(), "qdrant: record has no 'id' id field");

        let no_vec: Record = [("id", Value::Int(7))].into_iter().collect();
        let err = split_point("qdrant", &no_vec, &fields()).unwrap_err();
        assert_eq!(err.to_string(), "qdrant: record 7 has no numeric vector in 'values'");
    }

    #[test]
    fn join_orders_id_vector_payload() {
        let payload = json!({"title": "t", "tags": ["a"]});
        let record = join_point(&json!(3), Some(&json!([0.5])), payload.as_object(), &fields());
        let names: Vec<&str> = record.fields().collect();
        assert_eq!(names, vec!["id", "values", "title", "tags"]);
        assert_eq!(record.get("values"), Some(&Value::from("[0.5]")));
        assert_eq!(record.get("tags"), Some(&Value::from("[\"a\"]")));
    }
}
