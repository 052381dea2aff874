//! View definitions: map/reduce function registry, rows and design records.

pub mod engine;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::key::EmitKey;

/// Callback a map function uses to produce index rows for the document it was
/// invoked with. A bare scalar `key` is treated as a one-element tuple.
pub type EmitFn<'a> = dyn FnMut(EmitKey, Option<Value>) + 'a;

/// `fn(doc, emit)`.
pub type MapFn = Arc<dyn Fn(&Document, &mut EmitFn) + Send + Sync>;

/// `fn(keys, values) -> value`, where `keys` is every `(emit_key, doc_id)` pair
/// in the group and `values` is the row payload emitted alongside each.
pub type ReduceFn = Arc<dyn Fn(&[(EmitKey, String)], &[Value]) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct ViewDef {
    pub map: MapFn,
    pub reduce: Option<ReduceFn>,
    pub signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesignState {
    Building,
    Ready,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignRecord {
    pub signature: String,
    pub state: DesignState,
}

/// A map-only result row.
#[derive(Debug, Clone, Serialize)]
pub struct Row {
    pub key: EmitKey,
    pub id: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

/// A reduced result row. `key` is `None` for the "reduce everything" group.
#[derive(Debug, Clone, Serialize)]
pub struct ReducedRow {
    pub key: Option<EmitKey>,
    pub value: Value,
}

/// The persisted payload stored alongside each view row: the row's `value` plus
/// the document snapshot at emit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowPayload {
    pub value: Value,
    pub doc: Value,
}

/// Per-document record of every composite key it last contributed to a view,
/// enabling O(k) invalidation on mutation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackRef {
    pub keys: Vec<EmitKey>,
}
