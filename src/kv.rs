//! The `Store` contract: the ordered key-value store the rest of the crate treats
//! as an external collaborator, plus [`MemoryStore`], the in-process reference
//! implementation used by tests and by callers with no durable backend wired in.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use tokio::sync::Mutex;

use crate::error::{Result, ViewBaseError};

/// Opaque, monotonically increasing per-key identifier assigned by the store on
/// every write. Used directly as a document's `_rev` and as the CAS predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Versionstamp(pub u64);

impl fmt::Display for Versionstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Versionstamp {
    pub fn parse(s: &str) -> Option<Self> {
        u64::from_str_radix(s, 16).ok().map(Versionstamp)
    }
}

/// Which range of keys a [`Store::list`] call should iterate.
#[derive(Clone, Debug)]
pub enum KeySelector {
    Prefix(Vec<u8>),
    Range { start: Vec<u8>, end: Vec<u8> },
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ListOptions {
    pub reverse: bool,
    pub limit: Option<usize>,
}

/// A single entry observed by a [`Store::list`] scan.
#[derive(Clone, Debug)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub versionstamp: Versionstamp,
}

/// One `(key, expected_versionstamp)` precondition of an [`AtomicWrite`].
/// `None` means "key must be absent".
#[derive(Clone, Debug)]
pub struct Check {
    pub key: Vec<u8>,
    pub expected: Option<Versionstamp>,
}

#[derive(Clone, Debug)]
pub enum Mutation {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A batch of checks and mutations applied atomically by [`Store::commit`]: either
/// every check passes and every mutation lands, or nothing changes.
#[derive(Clone, Debug, Default)]
pub struct AtomicWrite {
    pub checks: Vec<Check>,
    pub mutations: Vec<Mutation>,
}

impl AtomicWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(mut self, key: Vec<u8>, expected: Option<Versionstamp>) -> Self {
        self.checks.push(Check { key, expected });
        self
    }

    pub fn set(mut self, key: Vec<u8>, value: Vec<u8>) -> Self {
        self.mutations.push(Mutation::Set(key, value));
        self
    }

    pub fn delete(mut self, key: Vec<u8>) -> Self {
        self.mutations.push(Mutation::Delete(key));
        self
    }
}

/// The ordered KV store abstraction. The crate's document and view engine logic
/// is written entirely against this trait; [`MemoryStore`] is the only
/// implementation shipped here, but a durable backend only needs to implement it.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Versionstamp)>>;

    /// Returns every matching entry, ordered ascending unless `options.reverse`.
    /// Implementations may stream lazily; [`MemoryStore`] snapshots eagerly under
    /// its lock and replays the snapshot as a stream.
    async fn list(&self, selector: KeySelector, options: ListOptions) -> Result<BoxStream<'static, Entry>>;

    /// Applies an atomic batch. Returns `Ok(false)` if any check failed (nothing
    /// was written); `Ok(true)` on success.
    async fn commit(&self, write: AtomicWrite) -> Result<bool>;
}

/// In-process ordered store backed by a `BTreeMap`, guarded by a `tokio::sync::Mutex`.
/// Versionstamps are assigned from a monotonic counter shared by every key.
pub struct MemoryStore {
    data: Mutex<BTreeMap<Vec<u8>, (Vec<u8>, Versionstamp)>>,
    counter: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            data: Mutex::new(BTreeMap::new()),
            counter: AtomicU64::new(1),
        }
    }

    fn next_versionstamp(&self) -> Versionstamp {
        Versionstamp(self.counter.fetch_add(1, AtomicOrdering::SeqCst))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Versionstamp)>> {
        let data = self.data.lock().await;
        Ok(data.get(key).cloned())
    }

    async fn list(&self, selector: KeySelector, options: ListOptions) -> Result<BoxStream<'static, Entry>> {
        let data = self.data.lock().await;
        let (start, end): (Vec<u8>, Option<Vec<u8>>) = match selector {
            KeySelector::Prefix(p) => (p.clone(), Some(prefix_upper_bound(&p))),
            KeySelector::Range { start, end } => (start, Some(end)),
        };
        let mut entries: Vec<Entry> = data
            .range(start..)
            .take_while(|(k, _)| match &end {
                Some(e) => k.as_slice() < e.as_slice(),
                None => true,
            })
            .map(|(k, (v, vs))| Entry {
                key: k.clone(),
                value: v.clone(),
                versionstamp: *vs,
            })
            .collect();
        if options.reverse {
            entries.reverse();
        }
        if let Some(limit) = options.limit {
            entries.truncate(limit);
        }
        Ok(Box::pin(stream::iter(entries)))
    }

    async fn commit(&self, write: AtomicWrite) -> Result<bool> {
        let mut data = self.data.lock().await;
        for check in &write.checks {
            let actual = data.get(&check.key).map(|(_, vs)| *vs);
            if actual != check.expected {
                return Ok(false);
            }
        }
        let vs = self.next_versionstamp();
        for mutation in write.mutations {
            match mutation {
                Mutation::Set(k, v) => {
                    data.insert(k, (v, vs));
                }
                Mutation::Delete(k) => {
                    data.remove(&k);
                }
            }
        }
        Ok(true)
    }
}

/// Smallest byte string that is strictly greater than every string with prefix `p`,
/// used to turn a prefix selector into a `[start, end)` range scan.
fn prefix_upper_bound(p: &[u8]) -> Vec<u8> {
    let mut out = p.to_vec();
    for i in (0..out.len()).rev() {
        if out[i] != 0xff {
            out[i] += 1;
            out.truncate(i + 1);
            return out;
        }
    }
    // all-0xff prefix: no finite upper bound short of unbounded; push a sentinel byte.
    out.push(0xff);
    out
}

pub fn store_err<E: std::fmt::Display>(e: E) -> ViewBaseError {
    ViewBaseError::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn cas_insert_then_conflict() {
        let store = MemoryStore::new();
        let key = b"k".to_vec();
        let ok = store
            .commit(AtomicWrite::new().check(key.clone(), None).set(key.clone(), b"v1".to_vec()))
            .await
            .unwrap();
        assert!(ok);
        let ok2 = store
            .commit(AtomicWrite::new().check(key.clone(), None).set(key.clone(), b"v2".to_vec()))
            .await
            .unwrap();
        assert!(!ok2);
    }

    #[tokio::test]
    async fn prefix_scan_respects_bound() {
        let store = MemoryStore::new();
        store
            .commit(AtomicWrite::new().set(b"a/1".to_vec(), b"x".to_vec()))
            .await
            .unwrap();
        store
            .commit(AtomicWrite::new().set(b"a/2".to_vec(), b"y".to_vec()))
            .await
            .unwrap();
        store
            .commit(AtomicWrite::new().set(b"b/1".to_vec(), b"z".to_vec()))
            .await
            .unwrap();
        let mut stream = store
            .list(KeySelector::Prefix(b"a/".to_vec()), ListOptions::default())
            .await
            .unwrap();
        let mut count = 0;
        while stream.next().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
