//! In-memory backend, `memory://<name>`, usually for testing.
//!
//! Named databases live as long as the factory that created them; an
//! empty name provisions a private database that cannot be reopened.
//! Writers serialize on a database-wide lock. Transactions hold that lock
//! for their lifetime and work on a private copy of the profile's records,
//! swapped in on commit. Readers and scans see the last committed copy.

use crate::backend::traits::*;
use crate::backend::*;
use crate::types::*;
use crate::*;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Create a factory for in-memory backends.
pub fn create_mem_backend_factory() -> BackendFactory {
    BackendFactory(Arc::new(PrivMemFactory {
        dbs: Mutex::new(HashMap::new()),
    }))
}

// -- private -- //

struct PrivMemFactory {
    dbs: Mutex<HashMap<String, Arc<MemDb>>>,
}

impl AsBackendFactory for PrivMemFactory {
    fn provision(
        &self,
        uri: StoreUri,
        config: Arc<StoreConfig>,
        recreate: bool,
    ) -> BoxFuture<'static, AskarResult<Backend>> {
        let name = uri.path().to_string();
        let res = if name.is_empty() {
            Ok(MemDb::new(config))
        } else {
            let mut dbs = self.dbs.lock();
            if dbs.contains_key(&name) && !recreate {
                Err(err_duplicate(format!("Store already exists: {uri}")))
            } else {
                let db = MemDb::new(config);
                dbs.insert(name, db.clone());
                Ok(db)
            }
        };
        async move { res.map(|db| Backend(Arc::new(MemBackend(db)))) }.boxed()
    }

    fn open(
        &self,
        uri: StoreUri,
        _config: Arc<StoreConfig>,
    ) -> BoxFuture<'static, AskarResult<Backend>> {
        let res = self
            .dbs
            .lock()
            .get(uri.path())
            .cloned()
            .map(|db| Backend(Arc::new(MemBackend(db))))
            .ok_or_else(|| err_not_found(format!("Store not found: {uri}")));
        async move { res }.boxed()
    }

    fn remove(&self, uri: StoreUri) -> BoxFuture<'static, AskarResult<bool>> {
        let removed = self.dbs.lock().remove(uri.path()).is_some();
        async move { Ok(removed) }.boxed()
    }
}

type Items = BTreeMap<i64, MemItem>;

#[derive(Clone)]
struct MemItem {
    kind: EntryKind,
    entry: EncEntry,
}

struct MemProfile {
    id: i64,
    profile_key: Vec<u8>,
    items: Arc<Items>,
}

struct MemInner {
    config: BTreeMap<String, String>,
    profiles: BTreeMap<String, MemProfile>,
    next_profile_id: i64,
}

impl MemInner {
    fn profile_mut(&mut self, id: i64) -> AskarResult<&mut MemProfile> {
        self.profiles
            .values_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| err_not_found("Profile not found"))
    }

    fn items(&self, id: i64) -> AskarResult<Arc<Items>> {
        self.profiles
            .values()
            .find(|p| p.id == id)
            .map(|p| p.items.clone())
            .ok_or_else(|| err_not_found("Profile not found"))
    }
}

struct MemBackend(Arc<MemDb>);

struct MemDb {
    inner: RwLock<MemInner>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    next_item_id: AtomicI64,
    config: Arc<StoreConfig>,
}

impl MemDb {
    fn new(config: Arc<StoreConfig>) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(MemInner {
                config: BTreeMap::new(),
                profiles: BTreeMap::new(),
                next_profile_id: 1,
            }),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            next_item_id: AtomicI64::new(1),
            config,
        })
    }

    async fn lock_write(&self) -> AskarResult<OwnedMutexGuard<()>> {
        tokio::time::timeout(
            self.config.busy_timeout(),
            self.write_lock.clone().lock_owned(),
        )
        .await
        .map_err(|_| err_busy("Timed out waiting for the store write lock"))
    }

    fn record(p: &MemProfile, name: &str) -> ProfileRecord {
        ProfileRecord {
            id: p.id,
            name: name.to_string(),
            profile_key: p.profile_key.clone(),
        }
    }
}

fn find_id(items: &Items, kind: EntryKind, category: &[u8], name: &[u8]) -> Option<i64> {
    items
        .iter()
        .find(|(_, i)| i.kind == kind && i.entry.category == category && i.entry.name == name)
        .map(|(id, _)| *id)
}

fn select(items: &Items, query: &EntryQuery, now: i64) -> Vec<(i64, EncEntry)> {
    let matched = items.iter().filter(|(_, i)| {
        i.kind == query.kind && i.entry.is_live(now) && query.matches(&i.entry)
    });
    let mut out: Vec<(i64, EncEntry)> = if query.descending {
        matched.rev().map(|(id, i)| (*id, i.entry.clone())).collect()
    } else {
        matched.map(|(id, i)| (*id, i.entry.clone())).collect()
    };
    let offset = query.offset.unwrap_or(0).max(0) as usize;
    if offset > 0 {
        out.drain(..offset.min(out.len()));
    }
    if let Some(limit) = query.limit {
        if limit >= 0 {
            out.truncate(limit as usize);
        }
    }
    out
}

fn apply_update(
    items: &mut Items,
    next_id: &AtomicI64,
    kind: EntryKind,
    operation: EntryOperation,
    entry: EncEntry,
    now: i64,
) -> AskarResult<()> {
    let existing = find_id(items, kind, &entry.category, &entry.name);
    // expired records no longer occupy their slot
    let existing = match existing {
        Some(id) if !items[&id].entry.is_live(now) => {
            items.remove(&id);
            None
        }
        other => other,
    };
    match (operation, existing) {
        (EntryOperation::Insert, Some(_)) => Err(err_duplicate("Duplicate entry")),
        (EntryOperation::Remove, None) => Err(err_not_found("Entry not found")),
        (EntryOperation::Remove, Some(id)) => {
            items.remove(&id);
            Ok(())
        }
        (EntryOperation::Replace, Some(id)) => {
            items.insert(id, MemItem { kind, entry });
            Ok(())
        }
        (_, None) => {
            let id = next_id.fetch_add(1, Ordering::SeqCst);
            items.insert(id, MemItem { kind, entry });
            Ok(())
        }
    }
}

impl AsBackend for MemBackend {
    fn get_config(&self, name: String) -> BoxFuture<'static, AskarResult<Option<String>>> {
        let value = self.0.inner.read().config.get(&name).cloned();
        async move { Ok(value) }.boxed()
    }

    fn set_config(&self, name: String, value: String) -> BoxFuture<'static, AskarResult<()>> {
        self.0.inner.write().config.insert(name, value);
        async move { Ok(()) }.boxed()
    }

    fn list_profiles(&self) -> BoxFuture<'static, AskarResult<Vec<ProfileRecord>>> {
        let list = self
            .0
            .inner
            .read()
            .profiles
            .iter()
            .map(|(name, p)| MemDb::record(p, name))
            .collect();
        async move { Ok(list) }.boxed()
    }

    fn get_profile(&self, name: String) -> BoxFuture<'static, AskarResult<Option<ProfileRecord>>> {
        let record = self
            .0
            .inner
            .read()
            .profiles
            .get(&name)
            .map(|p| MemDb::record(p, &name));
        async move { Ok(record) }.boxed()
    }

    fn create_profile(
        &self,
        name: String,
        profile_key: Vec<u8>,
    ) -> BoxFuture<'static, AskarResult<ProfileRecord>> {
        let mut inner = self.0.inner.write();
        let res = if inner.profiles.contains_key(&name) {
            Err(err_duplicate(format!("Duplicate profile name: {name}")))
        } else {
            let id = inner.next_profile_id;
            inner.next_profile_id += 1;
            let profile = MemProfile {
                id,
                profile_key,
                items: Arc::new(Items::new()),
            };
            let record = MemDb::record(&profile, &name);
            inner.profiles.insert(name, profile);
            Ok(record)
        };
        drop(inner);
        async move { res }.boxed()
    }

    fn remove_profile(&self, name: String) -> BoxFuture<'static, AskarResult<bool>> {
        let removed = self.0.inner.write().profiles.remove(&name).is_some();
        async move { Ok(removed) }.boxed()
    }

    fn rename_profile(&self, from: String, to: String) -> BoxFuture<'static, AskarResult<bool>> {
        let mut inner = self.0.inner.write();
        let res = if !inner.profiles.contains_key(&from) {
            Ok(false)
        } else if inner.profiles.contains_key(&to) {
            Err(err_duplicate(format!("Duplicate profile name: {to}")))
        } else {
            if let Some(p) = inner.profiles.remove(&from) {
                inner.profiles.insert(to, p);
            }
            Ok(true)
        };
        drop(inner);
        async move { res }.boxed()
    }

    fn rekey(
        &self,
        key_reference: String,
        profile_keys: Vec<(i64, Vec<u8>)>,
    ) -> BoxFuture<'static, AskarResult<()>> {
        let mut inner = self.0.inner.write();
        let res = (|| {
            // validate before mutating anything
            for (id, _) in &profile_keys {
                inner.profile_mut(*id)?;
            }
            for (id, key) in profile_keys {
                inner.profile_mut(id)?.profile_key = key;
            }
            inner.config.insert("key".to_string(), key_reference);
            Ok(())
        })();
        drop(inner);
        async move { res }.boxed()
    }

    fn session(
        &self,
        profile_id: i64,
        transaction: bool,
    ) -> BoxFuture<'static, AskarResult<BackendSession>> {
        let db = self.0.clone();
        async move {
            let txn = if transaction {
                let guard = db.lock_write().await?;
                let items = (*db.inner.read().items(profile_id)?).clone();
                Some(MemTxn {
                    _guard: guard,
                    items,
                })
            } else {
                db.inner.read().items(profile_id)?;
                None
            };
            Ok(BackendSession(Box::new(MemSession {
                db,
                profile_id,
                txn,
                closed: false,
            })))
        }
        .boxed()
    }

    fn scan(
        &self,
        profile_id: i64,
        query: EntryQuery,
    ) -> BoxFuture<'static, AskarResult<BackendScan>> {
        let res = self.0.inner.read().items(profile_id).map(|items| {
            let rows = select(&items, &query, now_ms())
                .into_iter()
                .map(|(_, e)| e)
                .collect();
            BackendScan(Box::new(MemScan {
                rows,
                pos: 0,
                page_size: self.0.config.scan_page_size.max(1),
            }))
        });
        async move { res }.boxed()
    }

    fn close(&self) -> BoxFuture<'static, AskarResult<()>> {
        async move { Ok(()) }.boxed()
    }
}

struct MemTxn {
    _guard: OwnedMutexGuard<()>,
    items: Items,
}

struct MemSession {
    db: Arc<MemDb>,
    profile_id: i64,
    txn: Option<MemTxn>,
    closed: bool,
}

impl MemSession {
    fn check_open(&self) -> AskarResult<()> {
        if self.closed {
            return Err(err_invalid_state("Session is closed"));
        }
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&Items) -> R) -> AskarResult<R> {
        self.check_open()?;
        match &self.txn {
            Some(txn) => Ok(f(&txn.items)),
            None => {
                let items = self.db.inner.read().items(self.profile_id)?;
                Ok(f(&items))
            }
        }
    }

    async fn write<R>(
        &mut self,
        f: impl FnOnce(&mut Items, &AtomicI64) -> AskarResult<R>,
    ) -> AskarResult<R> {
        self.check_open()?;
        if let Some(txn) = self.txn.as_mut() {
            return f(&mut txn.items, &self.db.next_item_id);
        }
        let _guard = self.db.lock_write().await?;
        let mut inner = self.db.inner.write();
        let profile = inner.profile_mut(self.profile_id)?;
        // copy on write when a scan still holds the committed snapshot
        let mut items = (*profile.items).clone();
        let out = f(&mut items, &self.db.next_item_id)?;
        profile.items = Arc::new(items);
        Ok(out)
    }
}

impl AsBackendSession for MemSession {
    fn count(&mut self, query: EntryQuery) -> BoxFuture<'_, AskarResult<i64>> {
        let res = self.read(|items| select(items, &query, now_ms()).len() as i64);
        async move { res }.boxed()
    }

    fn fetch(
        &mut self,
        kind: EntryKind,
        category: Vec<u8>,
        name: Vec<u8>,
        _for_update: bool,
    ) -> BoxFuture<'_, AskarResult<Option<EncEntry>>> {
        let now = now_ms();
        let res = self.read(|items| {
            find_id(items, kind, &category, &name)
                .map(|id| items[&id].entry.clone())
                .filter(|e| e.is_live(now))
        });
        async move { res }.boxed()
    }

    fn fetch_all(
        &mut self,
        query: EntryQuery,
        _for_update: bool,
    ) -> BoxFuture<'_, AskarResult<Vec<EncEntry>>> {
        let res = self.read(|items| {
            select(items, &query, now_ms())
                .into_iter()
                .map(|(_, e)| e)
                .collect()
        });
        async move { res }.boxed()
    }

    fn update(
        &mut self,
        kind: EntryKind,
        operation: EntryOperation,
        entry: EncEntry,
    ) -> BoxFuture<'_, AskarResult<()>> {
        async move {
            let now = now_ms();
            self.write(move |items, next_id| {
                apply_update(items, next_id, kind, operation, entry, now)
            })
            .await
        }
        .boxed()
    }

    fn remove_all(&mut self, query: EntryQuery) -> BoxFuture<'_, AskarResult<i64>> {
        async move {
            let now = now_ms();
            self.write(move |items, _| {
                let ids: Vec<i64> = select(items, &query, now)
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect();
                for id in &ids {
                    items.remove(id);
                }
                Ok(ids.len() as i64)
            })
            .await
        }
        .boxed()
    }

    fn close(&mut self, commit: bool) -> BoxFuture<'_, AskarResult<()>> {
        async move {
            self.check_open()?;
            self.closed = true;
            if let Some(txn) = self.txn.take() {
                if commit {
                    let MemTxn { _guard, items } = txn;
                    let mut inner = self.db.inner.write();
                    inner.profile_mut(self.profile_id)?.items = Arc::new(items);
                    drop(inner);
                    drop(_guard);
                }
            }
            Ok(())
        }
        .boxed()
    }
}

struct MemScan {
    rows: Vec<EncEntry>,
    pos: usize,
    page_size: usize,
}

impl AsBackendScan for MemScan {
    fn next(&mut self) -> BoxFuture<'_, AskarResult<Option<Vec<EncEntry>>>> {
        let res = if self.pos >= self.rows.len() {
            None
        } else {
            let end = (self.pos + self.page_size).min(self.rows.len());
            let page = self.rows[self.pos..end].to_vec();
            self.pos = end;
            Some(page)
        };
        async move { Ok(res) }.boxed()
    }
}
