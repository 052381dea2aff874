//! Incremental maintenance of materialized map-reduce views.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::error::{Result, ViewBaseError};
use crate::key::{self, EmitKey};
use crate::kv::{AtomicWrite, KeySelector, ListOptions, Store};
use crate::view::{BackRef, DesignRecord, DesignState, MapFn, ReduceFn, RowPayload, ViewDef};

pub struct ViewEngine {
    store: Arc<dyn Store>,
    namespace: String,
    rebuild_batch_size: usize,
    registry: RwLock<HashMap<String, ViewDef>>,
}

fn signature_of(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl ViewEngine {
    pub fn new(store: Arc<dyn Store>, namespace: String, rebuild_batch_size: usize) -> Self {
        ViewEngine {
            store,
            namespace,
            rebuild_batch_size,
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub async fn view_def(&self, name: &str) -> Option<ViewDef> {
        self.registry.read().await.get(name).cloned()
    }

    /// Registers `map`/`reduce` under `name` and rebuilds the view if the
    /// textual source of the map function (used only to compute its digest)
    /// differs from what was persisted last time this view was built.
    pub async fn define_view(
        &self,
        name: &str,
        map_source: &str,
        map: MapFn,
        reduce: Option<ReduceFn>,
    ) -> Result<()> {
        let signature = signature_of(map_source);
        {
            let mut registry = self.registry.write().await;
            registry.insert(
                name.to_string(),
                ViewDef {
                    map,
                    reduce,
                    signature: signature.clone(),
                },
            );
        }

        let design_key = key::design_key(&self.namespace, name);
        let existing = self.read_design(&design_key).await?;
        if let Some(record) = &existing {
            if record.signature == signature {
                debug!(view = name, "view signature unchanged, skipping rebuild");
                return Ok(());
            }
            if record.state == DesignState::Building {
                debug!(view = name, "rebuild already in progress, skipping");
                return Ok(());
            }
        }

        self.rebuild(name, &signature).await
    }

    async fn read_design(&self, design_key: &[u8]) -> Result<Option<DesignRecord>> {
        match self.store.get(design_key).await? {
            Some((bytes, _)) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn write_design(&self, name: &str, record: &DesignRecord) -> Result<()> {
        let design_key = key::design_key(&self.namespace, name);
        let bytes = serde_json::to_vec(record)?;
        self.store.commit(AtomicWrite::new().set(design_key, bytes)).await?;
        Ok(())
    }

    async fn rebuild(&self, name: &str, signature: &str) -> Result<()> {
        info!(view = name, "rebuilding view");
        self.write_design(
            name,
            &DesignRecord {
                signature: signature.to_string(),
                state: DesignState::Building,
            },
        )
        .await?;

        self.clear_prefix(&key::view_prefix(&self.namespace, name)).await?;
        self.clear_prefix(&key::viewref_prefix(&self.namespace, name)).await?;

        let def = self
            .view_def(name)
            .await
            .expect("just registered above");

        let doc_prefix = key::doc_prefix(&self.namespace);
        let mut docs = self
            .store
            .list(KeySelector::Prefix(doc_prefix), ListOptions::default())
            .await?;

        let mut batch = AtomicWrite::new();
        let mut batch_len = 0usize;
        while let Some(entry) = docs.next().await {
            let doc: Document = serde_json::from_slice(&entry.value)?;
            let id = doc
                .get(crate::document::ID_FIELD)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            let mut emitted: Vec<EmitKey> = Vec::new();
            {
                let mut emit = |k: EmitKey, v: Option<serde_json::Value>| {
                    let payload = RowPayload {
                        value: v.unwrap_or(serde_json::Value::Null),
                        doc: serde_json::Value::Object(doc.clone()),
                    };
                    if let Ok(bytes) = serde_json::to_vec(&payload) {
                        let row_key = key::view_row_key(&self.namespace, name, &k, &id);
                        batch = std::mem::take(&mut batch).set(row_key, bytes);
                        batch_len += 1;
                    }
                    emitted.push(k);
                };
                (def.map)(&doc, &mut emit);
            }

            let backref = BackRef { keys: emitted };
            let backref_key = key::viewref_key(&self.namespace, name, &id);
            batch = batch.set(backref_key, serde_json::to_vec(&backref)?);
            batch_len += 1;

            if batch_len >= self.rebuild_batch_size {
                self.store.commit(std::mem::take(&mut batch)).await?;
                batch_len = 0;
            }
        }
        if batch_len > 0 {
            self.store.commit(batch).await?;
        }

        self.write_design(
            name,
            &DesignRecord {
                signature: signature.to_string(),
                state: DesignState::Ready,
            },
        )
        .await?;
        info!(view = name, "view rebuild complete");
        Ok(())
    }

    async fn clear_prefix(&self, prefix: &[u8]) -> Result<()> {
        let mut entries = self
            .store
            .list(KeySelector::Prefix(prefix.to_vec()), ListOptions::default())
            .await?;
        let mut batch = AtomicWrite::new();
        let mut n = 0usize;
        while let Some(entry) = entries.next().await {
            batch = batch.delete(entry.key);
            n += 1;
            if n >= self.rebuild_batch_size {
                self.store.commit(std::mem::take(&mut batch)).await?;
                n = 0;
            }
        }
        if n > 0 {
            self.store.commit(batch).await?;
        }
        Ok(())
    }

    /// Re-emits rows for `id` across every registered view. `doc` is `None` on removal.
    pub async fn update_for_doc(&self, id: &str, doc: Option<&Document>) -> Result<()> {
        let names: Vec<String> = self.registry.read().await.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.update_view_for_doc(&name, id, doc).await {
                warn!(view = %name, doc = id, error = %e, "view update failed after document commit");
                return Err(e);
            }
        }
        Ok(())
    }

    async fn update_view_for_doc(&self, name: &str, id: &str, doc: Option<&Document>) -> Result<()> {
        let def = match self.view_def(name).await {
            Some(d) => d,
            None => return Ok(()),
        };

        let backref_key = key::viewref_key(&self.namespace, name, id);
        let old = match self.store.get(&backref_key).await? {
            Some((bytes, _)) => serde_json::from_slice::<BackRef>(&bytes)?,
            None => BackRef::default(),
        };

        let mut batch = AtomicWrite::new();
        for old_key in &old.keys {
            batch = batch.delete(key::view_row_key(&self.namespace, name, old_key, id));
        }

        let doc = match doc {
            None => {
                batch = batch.delete(backref_key);
                self.store.commit(batch).await?;
                return Ok(());
            }
            Some(d) => d,
        };

        let mut emitted: Vec<EmitKey> = Vec::new();
        {
            let mut emit = |k: EmitKey, v: Option<serde_json::Value>| {
                let payload = RowPayload {
                    value: v.unwrap_or(serde_json::Value::Null),
                    doc: serde_json::Value::Object(doc.clone()),
                };
                if let Ok(bytes) = serde_json::to_vec(&payload) {
                    let row_key = key::view_row_key(&self.namespace, name, &k, id);
                    batch = std::mem::take(&mut batch).set(row_key, bytes);
                }
                emitted.push(k);
            };
            (def.map)(doc, &mut emit);
        }

        let backref = BackRef { keys: emitted };
        batch = batch.set(backref_key, serde_json::to_vec(&backref)?);
        self.store.commit(batch).await?;
        Ok(())
    }

    /// Polls the design record until the view leaves the `building` state.
    /// Not required by any query path; exposed for callers that want to avoid
    /// observing partial results from a rebuild in progress.
    pub async fn wait_for_view_ready(&self, name: &str) -> Result<()> {
        let design_key = key::design_key(&self.namespace, name);
        loop {
            match self.read_design(&design_key).await? {
                Some(record) if record.state == DesignState::Ready => return Ok(()),
                Some(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
                None => return Err(ViewBaseError::UndefinedView(name.to_string())),
            }
        }
    }
}
