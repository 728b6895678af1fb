use crate::backend::*;
use crate::store::*;
use crate::store_key::ProfileKey;
use crate::types::*;
use crate::wql::{TagFilter, TagName};
use crate::*;
use askar_crypto::{KeyAlg, LocalKey};
use std::sync::Arc;
use tokio::sync::OwnedRwLockReadGuard;

/// A session on one profile of a [`Store`]: either a series of
/// independent operations or, for a transaction, a unit committed or
/// rolled back as a whole.
///
/// Operations after `close`, `commit` or `rollback` fail with
/// `InvalidState`, as do operations after the store is closed.
pub struct Session {
    store: Store,
    active: Option<ActiveSession>,
    backend: Option<BackendSession>,
    transaction: bool,
    _guard: Option<OwnedRwLockReadGuard<()>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store)
            .field("transaction", &self.transaction)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn err_closed() -> OneErr {
    err_invalid_state("Session is closed")
}

pub(crate) fn build_query(
    key: &ProfileKey,
    kind: EntryKind,
    category: Option<&str>,
    filter: Option<TagFilter>,
) -> AskarResult<EntryQuery> {
    let mut query = EntryQuery::new(kind);
    query.category = category.map(|c| key.encrypt_category(c)).transpose()?;
    query.filter = filter
        .map(|f| key.encrypt_tag_query(f.into_query()))
        .transpose()?;
    Ok(query)
}

fn prefix_user_tags(filter: TagFilter) -> AskarResult<TagFilter> {
    let query = filter.into_query().try_map(
        &mut |name: TagName| {
            Ok(TagName {
                name: format!("{KEY_USER_TAG_PREFIX}{}", name.name),
                plaintext: name.plaintext,
            })
        },
        &mut |_, _: &TagName, value: String| Ok(value),
    )?;
    Ok(TagFilter { query })
}

impl Session {
    pub(crate) async fn start(
        store: Store,
        profile: Option<&str>,
        transaction: bool,
    ) -> AskarResult<Self> {
        let profile = store.profile_state(profile).await?;
        let guard = if transaction {
            Some(store.shared_guard().await?)
        } else {
            None
        };
        let backend = store.backend().session(profile.id, transaction).await?;
        trace!(profile_id = profile.id, %transaction, "session started");
        Ok(Self {
            store,
            active: Some(ActiveSession::new(profile)),
            backend: Some(backend),
            transaction,
            _guard: guard,
        })
    }

    /// Whether this session is a transaction.
    pub fn is_transaction(&self) -> bool {
        self.transaction
    }

    /// Whether this session has ended.
    pub fn is_closed(&self) -> bool {
        self.backend.is_none()
    }

    // transactions already hold the shared guard
    async fn op_guard(&mut self) -> AskarResult<Option<OwnedRwLockReadGuard<()>>> {
        if self.transaction || self.is_closed() {
            return Ok(None);
        }
        self.store.shared_guard().await.map(Some)
    }

    fn parts(&mut self) -> AskarResult<(Arc<ProfileKey>, &mut BackendSession)> {
        self.store.check_open()?;
        let (active, backend) = match (self.active.as_ref(), self.backend.as_mut()) {
            (Some(active), Some(backend)) => (active, backend),
            _ => return Err(err_closed()),
        };
        if active.profile().is_removed() {
            return Err(err_invalid_state("Profile has been removed"));
        }
        Ok((active.profile().key.clone(), backend))
    }

    /// Count live entries.
    pub async fn count(
        &mut self,
        category: Option<&str>,
        filter: Option<TagFilter>,
    ) -> AskarResult<i64> {
        let _guard = self.op_guard().await?;
        let (key, backend) = self.parts()?;
        let query = build_query(&key, EntryKind::Item, category, filter)?;
        backend.count(query).await
    }

    /// Fetch one entry. Within a transaction `for_update` locks the entry
    /// until the transaction ends.
    pub async fn fetch(
        &mut self,
        category: &str,
        name: &str,
        for_update: bool,
    ) -> AskarResult<Option<Entry>> {
        let enc = self
            .fetch_raw(EntryKind::Item, category, name, for_update)
            .await?;
        match enc {
            Some((key, enc)) => Ok(Some(key.decrypt_entry(&enc)?)),
            None => Ok(None),
        }
    }

    async fn fetch_raw(
        &mut self,
        kind: EntryKind,
        category: &str,
        name: &str,
        for_update: bool,
    ) -> AskarResult<Option<(Arc<ProfileKey>, EncEntry)>> {
        let _guard = self.op_guard().await?;
        let transaction = self.transaction;
        let (key, backend) = self.parts()?;
        let enc = backend
            .fetch(
                kind,
                key.encrypt_category(category)?,
                key.encrypt_name(name)?,
                for_update && transaction,
            )
            .await?;
        Ok(enc.map(|enc| (key, enc)))
    }

    /// Fetch matching entries in insertion order, or reversed with
    /// `descending`. `category` of `None` matches every category.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_all(
        &mut self,
        category: Option<&str>,
        filter: Option<TagFilter>,
        limit: Option<i64>,
        order_by: Option<OrderBy>,
        descending: bool,
        for_update: bool,
    ) -> AskarResult<Vec<Entry>> {
        let (key, rows) = self
            .fetch_all_raw(
                EntryKind::Item,
                category,
                filter,
                limit,
                order_by,
                descending,
                for_update,
            )
            .await?;
        rows.iter().map(|enc| key.decrypt_entry(enc)).collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_all_raw(
        &mut self,
        kind: EntryKind,
        category: Option<&str>,
        filter: Option<TagFilter>,
        limit: Option<i64>,
        order_by: Option<OrderBy>,
        descending: bool,
        for_update: bool,
    ) -> AskarResult<(Arc<ProfileKey>, Vec<EncEntry>)> {
        let _guard = self.op_guard().await?;
        let transaction = self.transaction;
        let (key, backend) = self.parts()?;
        let mut query = build_query(&key, kind, category, filter)?;
        query.limit = limit;
        query.descending = descending;
        match order_by.unwrap_or_default() {
            OrderBy::Id => (),
        }
        let rows = backend
            .fetch_all(query, for_update && transaction)
            .await?;
        Ok((key, rows))
    }

    /// Insert, replace or remove an entry. `expiry_ms` is relative to now.
    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        &mut self,
        operation: EntryOperation,
        category: &str,
        name: &str,
        value: &[u8],
        tags: Option<&[EntryTag]>,
        expiry_ms: Option<i64>,
    ) -> AskarResult<()> {
        self.update_kind(
            EntryKind::Item,
            operation,
            category,
            name,
            value,
            tags,
            expiry_ms,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn update_kind(
        &mut self,
        kind: EntryKind,
        operation: EntryOperation,
        category: &str,
        name: &str,
        value: &[u8],
        tags: Option<&[EntryTag]>,
        expiry_ms: Option<i64>,
    ) -> AskarResult<()> {
        let _guard = self.op_guard().await?;
        let (key, backend) = self.parts()?;
        let enc = match operation {
            EntryOperation::Remove => EncEntry {
                category: key.encrypt_category(category)?,
                name: key.encrypt_name(name)?,
                value: Vec::new(),
                tags: Vec::new(),
                expiry_ms: None,
            },
            _ => key.encrypt_entry(
                category,
                name,
                value,
                tags.unwrap_or(&[]),
                expiry_ms.map(|ms| now_ms().saturating_add(ms)),
            )?,
        };
        backend.update(kind, operation, enc).await
    }

    /// Insert a new entry, failing with `Duplicate` if it exists.
    pub async fn insert(
        &mut self,
        category: &str,
        name: &str,
        value: &[u8],
        tags: Option<&[EntryTag]>,
        expiry_ms: Option<i64>,
    ) -> AskarResult<()> {
        self.update(EntryOperation::Insert, category, name, value, tags, expiry_ms)
            .await
    }

    /// Insert or overwrite an entry.
    pub async fn replace(
        &mut self,
        category: &str,
        name: &str,
        value: &[u8],
        tags: Option<&[EntryTag]>,
        expiry_ms: Option<i64>,
    ) -> AskarResult<()> {
        self.update(EntryOperation::Replace, category, name, value, tags, expiry_ms)
            .await
    }

    /// Remove an entry, failing with `NotFound` if it does not exist.
    pub async fn remove(&mut self, category: &str, name: &str) -> AskarResult<()> {
        self.update(EntryOperation::Remove, category, name, &[], None, None)
            .await
    }

    /// Remove matching entries, returning how many were removed.
    pub async fn remove_all(
        &mut self,
        category: Option<&str>,
        filter: Option<TagFilter>,
    ) -> AskarResult<i64> {
        let _guard = self.op_guard().await?;
        let (key, backend) = self.parts()?;
        let query = build_query(&key, EntryKind::Item, category, filter)?;
        backend.remove_all(query).await
    }

    /// Store a key under `name`.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_key(
        &mut self,
        name: &str,
        key: &LocalKey,
        metadata: Option<&str>,
        reference: Option<&str>,
        tags: Option<&[EntryTag]>,
        expiry_ms: Option<i64>,
    ) -> AskarResult<()> {
        let params = KeyParams {
            metadata: metadata.map(str::to_string),
            reference: reference.map(str::to_string),
            data: Some(key.to_jwk_secret()?.to_vec()),
        };
        let value = params.to_bytes()?;
        let mut tags = key_user_tags(tags.unwrap_or(&[]));
        tags.push(EntryTag::Encrypted(
            KEY_TAG_ALG.to_string(),
            key.algorithm().to_string(),
        ));
        if let Ok(thumb) = key.to_jwk_thumbprint() {
            tags.push(EntryTag::Encrypted(KEY_TAG_THUMB.to_string(), thumb));
        }
        self.update_kind(
            EntryKind::Kms,
            EntryOperation::Insert,
            KEY_CATEGORY,
            name,
            &value,
            Some(&tags),
            expiry_ms,
        )
        .await
    }

    /// Fetch a stored key.
    pub async fn fetch_key(
        &mut self,
        name: &str,
        for_update: bool,
    ) -> AskarResult<Option<KeyEntry>> {
        match self
            .fetch_raw(EntryKind::Kms, KEY_CATEGORY, name, for_update)
            .await?
        {
            Some((key, enc)) => Ok(Some(KeyEntry::from_entry(key.decrypt_entry(&enc)?)?)),
            None => Ok(None),
        }
    }

    /// Fetch stored keys by algorithm, JWK thumbprint and user tags.
    pub async fn fetch_all_keys(
        &mut self,
        algorithm: Option<KeyAlg>,
        thumbprint: Option<&str>,
        filter: Option<TagFilter>,
        limit: Option<i64>,
        for_update: bool,
    ) -> AskarResult<Vec<KeyEntry>> {
        let mut clauses = Vec::new();
        if let Some(alg) = algorithm {
            clauses.push(TagFilter::is_eq(KEY_TAG_ALG, alg.to_string()));
        }
        if let Some(thumb) = thumbprint {
            clauses.push(TagFilter::is_eq(KEY_TAG_THUMB, thumb));
        }
        if let Some(filter) = filter {
            clauses.push(prefix_user_tags(filter)?);
        }
        let filter = if clauses.is_empty() {
            None
        } else {
            Some(TagFilter::all_of(clauses))
        };
        let (key, rows) = self
            .fetch_all_raw(
                EntryKind::Kms,
                Some(KEY_CATEGORY),
                filter,
                limit,
                None,
                false,
                for_update,
            )
            .await?;
        rows.iter()
            .map(|enc| KeyEntry::from_entry(key.decrypt_entry(enc)?))
            .collect()
    }

    /// Replace a stored key's metadata, user tags and expiry.
    pub async fn update_key(
        &mut self,
        name: &str,
        metadata: Option<&str>,
        tags: Option<&[EntryTag]>,
        expiry_ms: Option<i64>,
    ) -> AskarResult<()> {
        let (key, enc) = self
            .fetch_raw(EntryKind::Kms, KEY_CATEGORY, name, true)
            .await?
            .ok_or_else(|| err_not_found(format!("Key not found: {name}")))?;
        let entry = key.decrypt_entry(&enc)?;
        let mut params = KeyParams::from_bytes(&entry.value)?;
        params.metadata = metadata.map(str::to_string);
        let value = params.to_bytes()?;
        let mut new_tags: Vec<EntryTag> = entry
            .tags
            .into_iter()
            .filter(|t| t.name() == KEY_TAG_ALG || t.name() == KEY_TAG_THUMB)
            .collect();
        new_tags.extend(key_user_tags(tags.unwrap_or(&[])));
        self.update_kind(
            EntryKind::Kms,
            EntryOperation::Replace,
            KEY_CATEGORY,
            name,
            &value,
            Some(&new_tags),
            expiry_ms,
        )
        .await
    }

    /// Remove a stored key, failing with `NotFound` if it does not exist.
    pub async fn remove_key(&mut self, name: &str) -> AskarResult<()> {
        self.update_kind(
            EntryKind::Kms,
            EntryOperation::Remove,
            KEY_CATEGORY,
            name,
            &[],
            None,
            None,
        )
        .await
    }

    async fn finish(&mut self, commit: bool) -> AskarResult<()> {
        let mut backend = self.backend.take().ok_or_else(err_closed)?;
        let res = backend.close(commit).await;
        self.active = None;
        self._guard = None;
        res
    }

    /// Apply a transaction's changes and end it.
    pub async fn commit(&mut self) -> AskarResult<()> {
        if !self.transaction {
            return Err(err_invalid_state("Session is not a transaction"));
        }
        if self.is_closed() {
            return Err(err_closed());
        }
        self.store.check_open()?;
        self.finish(true).await
    }

    /// Discard a transaction's changes and end it.
    pub async fn rollback(&mut self) -> AskarResult<()> {
        if !self.transaction {
            return Err(err_invalid_state("Session is not a transaction"));
        }
        self.finish(false).await
    }

    /// End the session. A transaction is rolled back.
    pub async fn close(&mut self) -> AskarResult<()> {
        self.finish(false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_key::{generate_raw_key, PassKey, StoreKeyMethod};
    use pretty_assertions::assert_eq;

    async fn store() -> Store {
        Store::provision(
            &Backends::default(),
            "memory://",
            StoreKeyMethod::RawKey,
            PassKey::from(generate_raw_key(None).unwrap()),
            None,
            false,
        )
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closed_session_rejects_use() {
        let store = store().await;
        let mut session = store.session(None).await.unwrap();
        session.close().await.unwrap();
        let err = session.count(None, None).await.unwrap_err();
        assert_eq!(ErrorKind::InvalidState, err.kind());
        let err = session.close().await.unwrap_err();
        assert_eq!(ErrorKind::InvalidState, err.kind());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commit_requires_transaction() {
        let store = store().await;
        let mut session = store.session(None).await.unwrap();
        let err = session.commit().await.unwrap_err();
        assert_eq!(ErrorKind::InvalidState, err.kind());
        let err = session.rollback().await.unwrap_err();
        assert_eq!(ErrorKind::InvalidState, err.kind());

        let mut txn = store.transaction(None).await.unwrap();
        txn.commit().await.unwrap();
        let err = txn.commit().await.unwrap_err();
        assert_eq!(ErrorKind::InvalidState, err.kind());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn store_close_invalidates_session() {
        let store = store().await;
        let mut session = store.session(None).await.unwrap();
        store.close().await.unwrap();
        let err = session.fetch("c", "n", false).await.unwrap_err();
        assert_eq!(ErrorKind::InvalidState, err.kind());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn entry_expiry() {
        let store = store().await;
        let mut session = store.session(None).await.unwrap();
        session
            .insert("cat", "gone", b"v", None, Some(-1))
            .await
            .unwrap();
        session
            .insert("cat", "kept", b"v", None, Some(60_000))
            .await
            .unwrap();
        assert_eq!(None, session.fetch("cat", "gone", false).await.unwrap());
        assert_eq!(1, session.count(Some("cat"), None).await.unwrap());
        // an expired entry no longer blocks its name
        session
            .insert("cat", "gone", b"again", None, None)
            .await
            .unwrap();
        assert_eq!(2, session.count(Some("cat"), None).await.unwrap());
    }

    #[test]
    fn user_tag_prefixing() {
        let filter: TagFilter = r#"{"a": "1", "~b": {"$gt": "2"}}"#.parse().unwrap();
        let prefixed = prefix_user_tags(filter).unwrap();
        let expected: TagFilter = r#"{"user:a": "1", "~user:b": {"$gt": "2"}}"#.parse().unwrap();
        assert_eq!(expected, prefixed);
    }
}
