//! Document shape and the two reserved fields every stored value carries.

use serde_json::{Map, Value};

pub const ID_FIELD: &str = "_id";
pub const REV_FIELD: &str = "_rev";

/// A schemaless document body. Always a JSON object; `_id` and `_rev` are
/// reserved and managed by the document store rather than the caller.
pub type Document = Map<String, Value>;

/// Result of a successful `insert` or `replace`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InsertResult {
    pub ok: bool,
    pub id: String,
    pub rev: String,
}

pub fn has_rev(doc: &Document) -> bool {
    doc.contains_key(REV_FIELD)
}

pub fn strip_rev(doc: &mut Document) {
    doc.remove(REV_FIELD);
}

pub fn set_id(doc: &mut Document, id: &str) {
    doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
}

pub fn with_rev(mut doc: Document, rev: &str) -> Document {
    doc.insert(REV_FIELD.to_string(), Value::String(rev.to_string()));
    doc
}

pub fn get_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}
