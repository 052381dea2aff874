//! Translates a [`QuerySpec`] into an ordered-range scan and streams rows or
//! performs grouped reduction.

use async_stream::try_stream;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::error::{Result, ViewBaseError};
use crate::key::{self, EmitKey};
use crate::kv::{Entry, KeySelector, ListOptions, Store};
use crate::query::{QuerySpec, Shape};
use crate::view::engine::ViewEngine;
use crate::view::{ReducedRow, Row, RowPayload};

/// Either a lazy stream of map rows, or a materialized vector of reduced rows
/// (reduction inherently requires the full selected range before grouping can
/// be paginated).
pub enum QueryOutcome {
    Rows(BoxStream<'static, Result<Row>>),
    Reduced(Vec<ReducedRow>),
}

pub async fn execute(
    engine: &ViewEngine,
    store: &dyn Store,
    ns: &str,
    spec: &QuerySpec,
    platform_scan_limit: usize,
) -> Result<QueryOutcome> {
    let def = engine
        .view_def(&spec.view_name)
        .await
        .ok_or_else(|| ViewBaseError::UndefinedView(spec.view_name.clone()))?;

    let selector = match &spec.shape {
        Shape::Keys(_) => return Err(ViewBaseError::NotImplemented("keys")),
        Shape::Scan => KeySelector::Prefix(key::view_prefix(ns, &spec.view_name)),
        Shape::Key(k) => KeySelector::Prefix(key::view_prefix_with(ns, &spec.view_name, &k.0)),
        Shape::Prefix(p) => KeySelector::Prefix(key::view_prefix_with(ns, &spec.view_name, &p.0)),
        Shape::Range {
            start,
            end,
            start_doc_id,
            end_doc_id,
        } => KeySelector::Range {
            start: key::view_bound(ns, &spec.view_name, &start.0, start_doc_id.as_deref()),
            end: key::view_bound(ns, &spec.view_name, &end.0, end_doc_id.as_deref()),
        },
    };

    let want_reduce = spec.reduce && def.reduce.is_some();
    let store_limit = if want_reduce {
        None
    } else {
        Some(spec.skip.saturating_add(spec.limit).min(platform_scan_limit))
    };

    let entries = store
        .list(
            selector,
            ListOptions {
                reverse: spec.descending,
                limit: store_limit,
            },
        )
        .await?;

    let raw_entries: Vec<Entry> = futures_util::StreamExt::collect(entries).await;
    let decoded: Vec<(EmitKey, String, RowPayload)> = raw_entries
        .into_iter()
        .filter_map(|entry| decode_entry(ns, &spec.view_name, entry))
        .collect();

    if want_reduce {
        let reduce_fn = def.reduce.clone().expect("checked above");
        let grouped = group_rows(decoded, spec.group_level);
        let mut rows = Vec::new();
        for (group_key, keys, values) in grouped.into_iter().skip(spec.skip).take(spec.limit) {
            let value = reduce_fn(&keys, &values);
            rows.push(ReducedRow { key: group_key, value });
        }
        Ok(QueryOutcome::Reduced(rows))
    } else {
        let include_docs = spec.include_docs;
        let page: Vec<(EmitKey, String, RowPayload)> =
            decoded.into_iter().skip(spec.skip).take(spec.limit).collect();
        let stream = try_stream! {
            for (key, id, payload) in page {
                yield Row {
                    key,
                    id,
                    value: payload.value,
                    doc: if include_docs { Some(payload.doc) } else { None },
                };
            }
        };
        Ok(QueryOutcome::Rows(Box::pin(stream)))
    }
}

fn decode_entry(ns: &str, view: &str, entry: Entry) -> Option<(EmitKey, String, RowPayload)> {
    let (emit_key, id) = key::decode_row_key(ns, view, &entry.key)?;
    let payload: RowPayload = serde_json::from_slice(&entry.value).ok()?;
    Some((emit_key, id, payload))
}

type Group = (Option<EmitKey>, Vec<(EmitKey, String)>, Vec<Value>);

/// Groups decoded rows in encounter order, preserving first-seen order so that
/// `skip`/`limit` over groups is deterministic under the scan direction.
fn group_rows(rows: Vec<(EmitKey, String, RowPayload)>, group_level: Option<usize>) -> Vec<Group> {
    let mut order: Vec<Option<EmitKey>> = Vec::new();
    let mut index: std::collections::HashMap<Vec<u8>, usize> = std::collections::HashMap::new();
    let mut groups: Vec<(Vec<(EmitKey, String)>, Vec<Value>)> = Vec::new();

    for (emit_key, id, payload) in rows {
        let group_key: Option<EmitKey> = match group_level {
            None => None,
            Some(0) => Some(emit_key.clone()),
            Some(n) => Some(EmitKey(emit_key.prefix_parts(n).to_vec())),
        };
        let index_bytes = match &group_key {
            Some(k) => key::encode_tuple(&k.0),
            None => vec![0xff],
        };
        let idx = *index.entry(index_bytes).or_insert_with(|| {
            order.push(group_key.clone());
            groups.push((Vec::new(), Vec::new()));
            groups.len() - 1
        });
        groups[idx].0.push((emit_key, id));
        groups[idx].1.push(payload.value);
    }

    order
        .into_iter()
        .zip(groups)
        .map(|(key, (keys, values))| (key, keys, values))
        .collect()
}

