use serde::Serialize;
use serde_json::Value;

use super::BackendError;

/// The fields of a backend response that Tessera keeps.
///
/// Node add responses, pinning service uploads and pin listings all name
/// the same facts differently; [`normalize`] maps them onto this record and
/// drops everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendRecord {
    pub id: String,
    pub name: Option<String>,
    pub size: Option<u64>,
    pub created_at: Option<String>,
}

const ID_FIELDS: &[&str] = &["Hash", "IpfsHash", "ipfs_pin_hash", "cid"];
const NAME_FIELDS: &[&str] = &["Name", "name"];
const SIZE_FIELDS: &[&str] = &["Size", "PinSize", "size"];
const CREATED_FIELDS: &[&str] = &["Timestamp", "date_pinned", "created"];

/// Reduce a backend JSON record to an allow-listed [`BackendRecord`].
///
/// The record must carry an id; everything else is optional. Sizes are
/// accepted as numbers or numeric strings, since node APIs return strings.
pub fn normalize(value: &Value) -> Result<BackendRecord, BackendError> {
    let object = value
        .as_object()
        .ok_or_else(|| BackendError::Rejected("backend record is not an object".into()))?;

    let first = |fields: &[&str]| fields.iter().find_map(|f| object.get(*f)).filter(|v| !v.is_null());

    let id = first(ID_FIELDS)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BackendError::Rejected("backend record has no content id".into()))?
        .to_string();

    let name = first(NAME_FIELDS)
        .or_else(|| object.get("metadata").and_then(|m| m.get("name")))
        .and_then(Value::as_str)
        .map(str::to_string);

    let size = first(SIZE_FIELDS).and_then(|v| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    });

    let created_at = first(CREATED_FIELDS)
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(BackendRecord {
        id,
        name,
        size,
        created_at,
    })
}
