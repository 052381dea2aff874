//! The document store: CRUD with optimistic concurrency, wired to the view
//! engine so every mutation fans out to the views it affects.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Settings;
use crate::document::{self, Document, InsertResult};
use crate::error::{Result, ViewBaseError};
use crate::executor::{self, QueryOutcome};
use crate::key;
use crate::kv::{AtomicWrite, MemoryStore, Store, Versionstamp};
use crate::query::QuerySpec;
use crate::view::engine::ViewEngine;
use crate::view::{MapFn, ReduceFn};

pub struct Database {
    store: Arc<dyn Store>,
    engine: ViewEngine,
    namespace: String,
    settings: Settings,
    closed: AtomicBool,
}

impl Database {
    /// Opens a database over `store`, or an in-process [`MemoryStore`] if none
    /// is given. `settings.namespace` scopes every key written by this handle.
    pub fn open(settings: Option<Settings>, store: Option<Arc<dyn Store>>) -> Self {
        let settings = settings.unwrap_or_default();
        let store = store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let engine = ViewEngine::new(store.clone(), settings.namespace.clone(), settings.rebuild_batch_size);
        Database {
            store,
            engine,
            namespace: settings.namespace.clone(),
            settings,
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(AtomicOrdering::Acquire) {
            Err(ViewBaseError::ClosedDatabase)
        } else {
            Ok(())
        }
    }

    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        self.check_open()?;
        let key = key::doc_key(&self.namespace, id);
        match self.store.get(&key).await? {
            Some((bytes, vs)) => {
                let mut doc: Document = serde_json::from_slice(&bytes)?;
                doc = document::with_rev(doc, &vs.to_string());
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    pub async fn insert(&self, mut doc: Document) -> Result<InsertResult> {
        self.check_open()?;
        if document::has_rev(&doc) {
            return Err(ViewBaseError::UnexpectedRev);
        }
        let id = document::get_id(&doc)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        document::set_id(&mut doc, &id);

        let key = key::doc_key(&self.namespace, &id);
        let bytes = serde_json::to_vec(&doc)?;
        let ok = self
            .store
            .commit(AtomicWrite::new().check(key.clone(), None).set(key.clone(), bytes))
            .await?;
        if !ok {
            return Err(ViewBaseError::DuplicateDocument(id));
        }
        let (_, vs) = self.store.get(&key).await?.expect("just written");
        debug!(doc = %id, rev = %vs, "document inserted");
        let doc_with_rev = document::with_rev(doc.clone(), &vs.to_string());
        self.engine.update_for_doc(&id, Some(&doc_with_rev)).await?;
        Ok(InsertResult {
            ok: true,
            id,
            rev: vs.to_string(),
        })
    }

    pub async fn replace(&self, id: &str, rev: &str, mut doc: Document) -> Result<InsertResult> {
        self.check_open()?;
        document::strip_rev(&mut doc);
        document::set_id(&mut doc, id);

        let expected = Versionstamp::parse(rev).ok_or_else(|| ViewBaseError::RevisionConflict(id.to_string()))?;
        let expected = Some(expected);
        let key = key::doc_key(&self.namespace, id);
        let bytes = serde_json::to_vec(&doc)?;
        let ok = self
            .store
            .commit(AtomicWrite::new().check(key.clone(), expected).set(key.clone(), bytes))
            .await?;
        if !ok {
            return Err(ViewBaseError::RevisionConflict(id.to_string()));
        }
        let (_, vs) = self.store.get(&key).await?.expect("just written");
        debug!(doc = %id, rev = %vs, "document replaced");
        let doc_with_rev = document::with_rev(doc.clone(), &vs.to_string());
        self.engine.update_for_doc(id, Some(&doc_with_rev)).await?;
        Ok(InsertResult {
            ok: true,
            id: id.to_string(),
            rev: vs.to_string(),
        })
    }

    pub async fn remove(&self, id: &str, rev: &str) -> Result<()> {
        self.check_open()?;
        let expected = Versionstamp::parse(rev).ok_or_else(|| ViewBaseError::RevisionConflict(id.to_string()))?;
        let expected = Some(expected);
        let key = key::doc_key(&self.namespace, id);
        let ok = self
            .store
            .commit(AtomicWrite::new().check(key.clone(), expected).delete(key.clone()))
            .await?;
        if !ok {
            return Err(ViewBaseError::RevisionConflict(id.to_string()));
        }
        debug!(doc = %id, "document removed");
        self.engine.update_for_doc(id, None).await?;
        Ok(())
    }

    /// Registers a view. `map_source` identifies the map function's logic for
    /// the signature check that decides whether a rebuild is needed; it is not
    /// otherwise interpreted.
    pub async fn define_view(&self, name: &str, map_source: &str, map: MapFn, reduce: Option<ReduceFn>) -> Result<()> {
        self.check_open()?;
        info!(view = name, "defining view");
        self.engine.define_view(name, map_source, map, reduce).await
    }

    pub async fn wait_for_view_ready(&self, name: &str) -> Result<()> {
        self.check_open()?;
        self.engine.wait_for_view_ready(name).await
    }

    pub async fn query(&self, spec: &QuerySpec) -> Result<QueryOutcome> {
        self.check_open()?;
        executor::execute(&self.engine, self.store.as_ref(), &self.namespace, spec, self.settings.platform_scan_limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::EmitKey;
    use crate::query::QueryBuilder;
    use crate::view::Row;
    use futures_util::StreamExt;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    async fn rows_of(db: &Database, spec: &crate::query::QuerySpec) -> Vec<Row> {
        match db.query(spec).await.unwrap() {
            QueryOutcome::Rows(mut s) => {
                let mut out = Vec::new();
                while let Some(r) = s.next().await {
                    out.push(r.unwrap());
                }
                out
            }
            QueryOutcome::Reduced(_) => panic!("expected map rows"),
        }
    }

    fn by_name_map() -> MapFn {
        std::sync::Arc::new(|d: &Document, emit: &mut crate::view::EmitFn| {
            if d.get("type").and_then(|v| v.as_str()) == Some("user") {
                if let Some(name) = d.get("name").and_then(|v| v.as_str()) {
                    emit(EmitKey::from(name), None);
                }
            }
        })
    }

    // S1 — basic CRUD: insert, duplicate rejection, get, replace, stale-rev rejection.
    #[tokio::test]
    async fn s1_basic_crud() {
        init_tracing();
        let db = Database::open(None, None);
        let inserted = db
            .insert(doc(json!({"_id": "alice", "type": "user", "name": "Alice"})))
            .await
            .unwrap();
        let rev1 = inserted.rev.clone();

        let fetched = db.get("alice").await.unwrap().unwrap();
        assert_eq!(fetched.get("name").unwrap(), "Alice");
        assert_eq!(fetched.get("_rev").unwrap().as_str().unwrap(), rev1);

        let dup = db
            .insert(doc(json!({"_id": "alice", "type": "user", "name": "Again"})))
            .await;
        assert!(matches!(dup, Err(ViewBaseError::DuplicateDocument(_))));

        let replaced = db
            .replace("alice", &rev1, doc(json!({"type": "user", "name": "A2"})))
            .await
            .unwrap();
        assert_ne!(replaced.rev, rev1);

        let stale = db
            .replace("alice", &rev1, doc(json!({"type": "user", "name": "A3"})))
            .await;
        assert!(matches!(stale, Err(ViewBaseError::RevisionConflict(_))));
    }

    // S2 — incremental view maintenance across insert and replace.
    #[tokio::test]
    async fn s2_incremental_view_maintenance() {
        let db = Database::open(None, None);
        db.define_view("by-name", "emit(doc.name)", by_name_map(), None)
            .await
            .unwrap();

        let alice = db
            .insert(doc(json!({"_id": "alice", "type": "user", "name": "Alice"})))
            .await
            .unwrap();
        db.insert(doc(json!({"_id": "bob", "type": "user", "name": "Bob"})))
            .await
            .unwrap();

        let rows = rows_of(&db, &QueryBuilder::for_view("by-name").get_params()).await;
        let names: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        db.replace("alice", &alice.rev, doc(json!({"type": "user", "name": "Alicia"})))
            .await
            .unwrap();

        let old_name = rows_of(&db, &QueryBuilder::for_view("by-name").key("Alice").get_params()).await;
        assert!(old_name.is_empty());
        let new_name = rows_of(&db, &QueryBuilder::for_view("by-name").key("Alicia").get_params()).await;
        assert_eq!(new_name.len(), 1);
    }

    // S4 — grouped reduce: reduce-all and group(true).
    #[tokio::test]
    async fn s4_grouped_reduce() {
        let db = Database::open(None, None);
        let map: MapFn = std::sync::Arc::new(|d: &Document, emit: &mut crate::view::EmitFn| {
            if let Some(dept) = d.get("department").and_then(|v| v.as_str()) {
                emit(EmitKey::from(dept), None);
            }
        });
        let reduce: ReduceFn = std::sync::Arc::new(|keys, _values| json!(keys.len()));
        db.define_view("by-dept", "emit(doc.department)", map, Some(reduce))
            .await
            .unwrap();

        for (id, dept) in [("a", "engineering"), ("b", "engineering"), ("c", "sales")] {
            db.insert(doc(json!({"_id": id, "department": dept}))).await.unwrap();
        }

        let total = db
            .query(&QueryBuilder::for_view("by-dept").reduce().get_params())
            .await
            .unwrap();
        match total {
            QueryOutcome::Reduced(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].value, json!(3));
            }
            _ => panic!("expected reduced"),
        }

        let grouped = db
            .query(
                &QueryBuilder::for_view("by-dept")
                    .reduce()
                    .group(true)
                    .unwrap()
                    .get_params(),
            )
            .await
            .unwrap();
        match grouped {
            QueryOutcome::Reduced(rows) => {
                assert_eq!(rows.len(), 2);
                let values: Vec<i64> = rows.iter().map(|r| r.value.as_i64().unwrap()).collect();
                assert_eq!(values.iter().sum::<i64>(), 3);
            }
            _ => panic!("expected reduced"),
        }
    }

    // S5 — descending order and skip/limit pagination.
    #[tokio::test]
    async fn s5_descending_and_pagination() {
        let db = Database::open(None, None);
        db.define_view("by-name", "emit(doc.name)", by_name_map(), None)
            .await
            .unwrap();
        for (id, name) in [("a", "Alice"), ("b", "Bob"), ("c", "Charlie"), ("d", "Diana")] {
            db.insert(doc(json!({"_id": id, "type": "user", "name": name})))
                .await
                .unwrap();
        }

        let desc = rows_of(
            &db,
            &QueryBuilder::for_view("by-name")
                .order(crate::query::Direction::Descending)
                .get_params(),
        )
        .await;
        let ids: Vec<String> = desc.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["d", "c", "b", "a"]);

        let page = rows_of(&db, &QueryBuilder::for_view("by-name").skip(1).limit(2).get_params()).await;
        let ids: Vec<String> = page.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    // Regression: insert/replace must drive the view engine with a document
    // that already carries its new `_rev`, not the bare pre-commit body.
    #[tokio::test]
    async fn s_includes_rev_in_views() {
        let db = Database::open(None, None);
        let map: MapFn = std::sync::Arc::new(|d: &Document, emit: &mut crate::view::EmitFn| {
            if d.get("type").and_then(|v| v.as_str()) == Some("user") {
                emit(EmitKey::from("all"), d.get("_rev").cloned());
            }
        });
        db.define_view("with-rev", "emit('all', doc._rev)", map, None)
            .await
            .unwrap();

        let inserted = db
            .insert(doc(json!({"_id": "alice", "type": "user", "name": "Alice"})))
            .await
            .unwrap();

        let rows = rows_of(&db, &QueryBuilder::for_view("with-rev").include_docs().get_params()).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, json!(inserted.rev));
        let doc_snapshot = rows[0].doc.as_ref().unwrap();
        assert_eq!(doc_snapshot.get("_rev").unwrap(), &json!(inserted.rev));

        let replaced = db
            .replace("alice", &inserted.rev, doc(json!({"type": "user", "name": "Alicia"})))
            .await
            .unwrap();
        assert_ne!(replaced.rev, inserted.rev);

        let rows = rows_of(&db, &QueryBuilder::for_view("with-rev").include_docs().get_params()).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, json!(replaced.rev));
    }

    #[tokio::test]
    async fn closed_database_rejects_operations() {
        let db = Database::open(None, None);
        db.close();
        let err = db.get("anything").await;
        assert!(matches!(err, Err(ViewBaseError::ClosedDatabase)));
    }

    // S3 — compound prefix query over a two-part emit key.
    #[tokio::test]
    async fn s3_compound_prefix() {
        let db = Database::open(None, None);
        let map: MapFn = std::sync::Arc::new(|d: &Document, emit: &mut crate::view::EmitFn| {
            if let (Some(dept), Some(name)) = (
                d.get("department").and_then(|v| v.as_str()),
                d.get("name").and_then(|v| v.as_str()),
            ) {
                emit(EmitKey(vec![dept.into(), name.into()]), None);
            }
        });
        db.define_view("by-dept-name", "emit([doc.department, doc.name])", map, None)
            .await
            .unwrap();

        db.insert(doc(json!({"_id": "a", "department": "engineering", "name": "Alice"})))
            .await
            .unwrap();
        db.insert(doc(json!({"_id": "b", "department": "engineering", "name": "Bob"})))
            .await
            .unwrap();
        db.insert(doc(json!({"_id": "c", "department": "sales", "name": "Charlie"})))
            .await
            .unwrap();

        let rows = rows_of(
            &db,
            &QueryBuilder::for_view("by-dept-name")
                .prefix(EmitKey(vec!["engineering".into()]))
                .get_params(),
        )
        .await;
        assert_eq!(rows.len(), 2);
        let ids: std::collections::HashSet<String> = rows.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, ["a", "b"].into_iter().map(String::from).collect());
    }

    // S6 — cursor pagination by id-range within a shared range query.
    #[tokio::test]
    async fn s6_cursor_pagination_by_id_range() {
        let db = Database::open(None, None);
        let map: MapFn = std::sync::Arc::new(|d: &Document, emit: &mut crate::view::EmitFn| {
            if let Some(dept) = d.get("department").and_then(|v| v.as_str()) {
                emit(EmitKey::from(dept), None);
            }
        });
        db.define_view("by-dept", "emit(doc.department)", map, None)
            .await
            .unwrap();

        for id in ["a", "b", "c", "d"] {
            db.insert(doc(json!({"_id": id, "department": "engineering"})))
                .await
                .unwrap();
        }

        let page1 = rows_of(
            &db,
            &QueryBuilder::for_view("by-dept")
                .range(
                    EmitKey(vec!["engineering".into()]),
                    EmitKey(vec!["engineering\u{ffff}".into()]),
                )
                .limit(2)
                .get_params(),
        )
        .await;
        assert_eq!(page1.len(), 2);
        let last_id = page1[1].id.clone();

        let page2 = rows_of(
            &db,
            &QueryBuilder::for_view("by-dept")
                .range(
                    EmitKey(vec!["engineering".into()]),
                    EmitKey(vec!["engineering\u{ffff}".into()]),
                )
                .id_range(last_id.clone(), "")
                .skip(1)
                .limit(2)
                .get_params(),
        )
        .await;

        let mut all_ids: Vec<String> = page1.iter().map(|r| r.id.clone()).collect();
        all_ids.extend(page2.iter().map(|r| r.id.clone()));
        let unique: std::collections::HashSet<&String> = all_ids.iter().collect();
        assert_eq!(unique.len(), 4);
    }
}
