use serde_json::{Map, Value};

use crate::constants::{FIELD_AMOUNT, FIELD_ARTICLE, FIELD_TYPE, FIELD_YEAR};
use crate::domain::CanonicalRecord;
use crate::error::{CanonError, Result, SchemaViolationKind};

/// Forces one decoded element into the four-text-field canonical shape.
///
/// Missing `article`, `amount` and `year` default to empty text; a missing `type` is a
/// schema violation. Scalars are rendered textually, nested values are rejected and
/// unrecognized keys are ignored. Keys match case-insensitively.
pub fn coerce_record(element: &Value) -> Result<CanonicalRecord> {
    let map = element
        .as_object()
        .ok_or_else(|| CanonError::schema(SchemaViolationKind::NotAnObject))?;

    let record_type = field(map, FIELD_TYPE)?
        .ok_or_else(|| CanonError::schema(SchemaViolationKind::MissingType))?;

    Ok(CanonicalRecord {
        record_type,
        article: field(map, FIELD_ARTICLE)?.unwrap_or_default(),
        amount: field(map, FIELD_AMOUNT)?.unwrap_or_default(),
        year: field(map, FIELD_YEAR)?.unwrap_or_default(),
    })
}

/// Coerces every element, failing on the first violation
pub fn coerce_all(elements: &[Value]) -> Result<Vec<CanonicalRecord>> {
    elements.iter().map(coerce_record).collect()
}

fn field(map: &Map<String, Value>, name: &str) -> Result<Option<String>> {
    let value = map
        .get(name)
        .or_else(|| map.iter().find(|(k, _)| k.trim().eq_ignore_ascii_case(name)).map(|(_, v)| v));
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(Value::Array(_)) | Some(Value::Object(_)) => Err(CanonError::schema(
            SchemaViolationKind::UnsupportedValueType { field: name.to_string() },
        )),
    }
}
