use crate::backend::*;
use crate::store_key::*;
use crate::types::*;
use crate::wql::TagFilter;
use crate::*;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};

const CONFIG_KEY: &str = "key";
const CONFIG_DEFAULT_PROFILE: &str = "default_profile";

/// Cached per-profile state shared by the sessions on that profile.
pub(crate) struct ProfileState {
    pub(crate) id: i64,
    pub(crate) key: ProfileKeyRef,
    active_sessions: AtomicUsize,
    removed: AtomicBool,
}

impl ProfileState {
    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

/// Counts a session against its profile until dropped.
pub(crate) struct ActiveSession(Arc<ProfileState>);

impl ActiveSession {
    pub(crate) fn new(profile: Arc<ProfileState>) -> Self {
        profile.active_sessions.fetch_add(1, Ordering::AcqRel);
        Self(profile)
    }

    pub(crate) fn profile(&self) -> &Arc<ProfileState> {
        &self.0
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.active_sessions.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) struct StoreInner {
    uri: String,
    backend: Backend,
    config: Arc<StoreConfig>,
    wrap_key: RwLock<Arc<WrapKey>>,
    profile_name: RwLock<String>,
    profiles: Mutex<HashMap<String, Arc<ProfileState>>>,
    closed: AtomicBool,
    // shared by transactions and single operations, exclusive for
    // rekey and profile removal
    structure: Arc<tokio::sync::RwLock<()>>,
}

/// An open store. Clones share the same backend connection.
#[derive(Clone)]
pub struct Store(pub(crate) Arc<StoreInner>);

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("uri", &self.0.uri).finish()
    }
}

impl Store {
    /// Create a new store, replacing an existing one only if `recreate`.
    /// The default profile is `profile` or a generated name.
    pub async fn provision(
        backends: &Backends,
        uri: &str,
        method: StoreKeyMethod,
        pass_key: PassKey,
        profile: Option<&str>,
        recreate: bool,
    ) -> AskarResult<Self> {
        let (factory, store_uri) = backends.resolve(uri)?;
        let config = backends.config();
        let backend = factory
            .provision(store_uri, config.clone(), recreate)
            .await?;
        let (wrap_key, reference) = new_wrap_key(method, pass_key).await?;
        let profile = profile
            .map(|p| p.to_string())
            .unwrap_or_else(|| nanoid::nanoid!());
        let profile_key = ProfileKey::new();
        Self::init_backend(
            &backend,
            &wrap_key,
            reference,
            &profile,
            vec![(profile.clone(), &profile_key)],
        )
        .await?;
        info!(%uri, %method, %profile, "provisioned store");
        Ok(Self::from_parts(uri, backend, config, wrap_key, profile))
    }

    /// Open an existing store. `method` is checked against the stored
    /// key method when given.
    pub async fn open(
        backends: &Backends,
        uri: &str,
        method: Option<StoreKeyMethod>,
        pass_key: PassKey,
        profile: Option<&str>,
    ) -> AskarResult<Self> {
        let (factory, store_uri) = backends.resolve(uri)?;
        let config = backends.config();
        let backend = factory.open(store_uri, config.clone()).await?;
        let reference = backend
            .get_config(CONFIG_KEY)
            .await?
            .ok_or_else(|| err_backend("Store key not found"))?;
        let wrap_key = open_wrap_key(&reference, method, pass_key).await?;
        let profile = match profile {
            Some(profile) => profile.to_string(),
            None => backend
                .get_config(CONFIG_DEFAULT_PROFILE)
                .await?
                .ok_or_else(|| err_backend("Default profile not found"))?,
        };
        let store = Self::from_parts(uri, backend, config, wrap_key, profile);
        // verifies the pass key against the wrapped profile key
        store.profile_state(None).await?;
        debug!(%uri, "opened store");
        Ok(store)
    }

    /// Delete a store's backing resource.
    pub async fn remove(backends: &Backends, uri: &str) -> AskarResult<bool> {
        let (factory, store_uri) = backends.resolve(uri)?;
        let removed = factory.remove(store_uri).await?;
        debug!(%uri, %removed, "removed store");
        Ok(removed)
    }

    fn from_parts(
        uri: &str,
        backend: Backend,
        config: Arc<StoreConfig>,
        wrap_key: WrapKey,
        profile: String,
    ) -> Self {
        Self(Arc::new(StoreInner {
            uri: uri.to_string(),
            backend,
            config,
            wrap_key: RwLock::new(Arc::new(wrap_key)),
            profile_name: RwLock::new(profile),
            profiles: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            structure: Arc::new(tokio::sync::RwLock::new(())),
        }))
    }

    async fn init_backend(
        backend: &Backend,
        wrap_key: &WrapKey,
        reference: String,
        default_profile: &str,
        profiles: Vec<(String, &ProfileKey)>,
    ) -> AskarResult<()> {
        backend.set_config(CONFIG_KEY, reference).await?;
        backend
            .set_config(CONFIG_DEFAULT_PROFILE, default_profile.to_string())
            .await?;
        for (name, key) in profiles {
            backend.create_profile(name, key.wrap(wrap_key)?).await?;
        }
        Ok(())
    }

    /// The URI this store was opened with.
    pub fn uri(&self) -> &str {
        &self.0.uri
    }

    /// The runtime config.
    pub fn config(&self) -> &StoreConfig {
        &self.0.config
    }

    /// The profile used when none is given.
    pub fn get_profile_name(&self) -> String {
        self.0.profile_name.read().clone()
    }

    pub(crate) fn check_open(&self) -> AskarResult<()> {
        if self.0.closed.load(Ordering::Acquire) {
            return Err(err_invalid_state("Store is closed"));
        }
        Ok(())
    }

    pub(crate) fn backend(&self) -> &Backend {
        &self.0.backend
    }

    pub(crate) async fn shared_guard(&self) -> AskarResult<OwnedRwLockReadGuard<()>> {
        tokio::time::timeout(
            self.0.config.busy_timeout(),
            self.0.structure.clone().read_owned(),
        )
        .await
        .map_err(|_| err_busy("Timed out waiting for a structural store operation"))
    }

    async fn exclusive_guard(&self) -> AskarResult<OwnedRwLockWriteGuard<()>> {
        tokio::time::timeout(
            self.0.config.busy_timeout(),
            self.0.structure.clone().write_owned(),
        )
        .await
        .map_err(|_| err_busy("Timed out waiting for active transactions"))
    }

    pub(crate) async fn profile_state(
        &self,
        profile: Option<&str>,
    ) -> AskarResult<Arc<ProfileState>> {
        self.check_open()?;
        let name = match profile {
            Some(name) => name.to_string(),
            None => self.get_profile_name(),
        };
        let cached = self.0.profiles.lock().get(&name).cloned();
        if let Some(state) = cached {
            if !state.is_removed() {
                return Ok(state);
            }
        }
        let record = self
            .0
            .backend
            .get_profile(name.clone())
            .await?
            .ok_or_else(|| err_not_found(format!("Profile not found: {name}")))?;
        let wrap_key = self.0.wrap_key.read().clone();
        let key = ProfileKey::from_wrapped(&wrap_key, &record.profile_key)?;
        let state = Arc::new(ProfileState {
            id: record.id,
            key: Arc::new(key),
            active_sessions: AtomicUsize::new(0),
            removed: AtomicBool::new(false),
        });
        Ok(self
            .0
            .profiles
            .lock()
            .entry(name)
            .or_insert(state)
            .clone())
    }

    /// Create a profile, returning its name.
    pub async fn create_profile(&self, name: Option<&str>) -> AskarResult<String> {
        self.check_open()?;
        let name = name
            .map(|n| n.to_string())
            .unwrap_or_else(|| nanoid::nanoid!());
        let wrapped = {
            let wrap_key = self.0.wrap_key.read().clone();
            ProfileKey::new().wrap(&wrap_key)?
        };
        self.0.backend.create_profile(name.clone(), wrapped).await?;
        debug!(profile = %name, "created profile");
        Ok(name)
    }

    /// Remove a profile and its entries. The store's default profile
    /// cannot be removed, nor a profile with open sessions.
    pub async fn remove_profile(&self, name: &str) -> AskarResult<bool> {
        self.check_open()?;
        if Some(name) == self.0.backend.get_config(CONFIG_DEFAULT_PROFILE).await?.as_deref() {
            return Err(err_input("The default profile cannot be removed"));
        }
        let cached = self.0.profiles.lock().get(name).cloned();
        let busy = |state: &Option<Arc<ProfileState>>| {
            state
                .as_ref()
                .map_or(false, |s| s.active_sessions.load(Ordering::Acquire) > 0)
        };
        if busy(&cached) {
            return Err(err_busy(format!("Profile has open sessions: {name}")));
        }
        let _guard = self.exclusive_guard().await?;
        if busy(&cached) {
            return Err(err_busy(format!("Profile has open sessions: {name}")));
        }
        let removed = self.0.backend.remove_profile(name.to_string()).await?;
        if let Some(state) = self.0.profiles.lock().remove(name) {
            state.removed.store(true, Ordering::Release);
        }
        debug!(profile = %name, %removed, "removed profile");
        Ok(removed)
    }

    /// Rename a profile, returning whether it existed.
    pub async fn rename_profile(&self, from: &str, to: &str) -> AskarResult<bool> {
        self.check_open()?;
        let renamed = self
            .0
            .backend
            .rename_profile(from.to_string(), to.to_string())
            .await?;
        if !renamed {
            return Ok(false);
        }
        {
            let mut profiles = self.0.profiles.lock();
            if let Some(state) = profiles.remove(from) {
                profiles.insert(to.to_string(), state);
            }
        }
        if Some(from) == self.0.backend.get_config(CONFIG_DEFAULT_PROFILE).await?.as_deref() {
            self.0
                .backend
                .set_config(CONFIG_DEFAULT_PROFILE, to.to_string())
                .await?;
        }
        {
            let mut current = self.0.profile_name.write();
            if *current == from {
                *current = to.to_string();
            }
        }
        debug!(%from, %to, "renamed profile");
        Ok(true)
    }

    /// The store's persisted default profile.
    pub async fn get_default_profile(&self) -> AskarResult<String> {
        self.check_open()?;
        self.0
            .backend
            .get_config(CONFIG_DEFAULT_PROFILE)
            .await?
            .ok_or_else(|| err_not_found("Default profile not set"))
    }

    /// Change the persisted default profile.
    pub async fn set_default_profile(&self, name: &str) -> AskarResult<()> {
        self.check_open()?;
        if self.0.backend.get_profile(name.to_string()).await?.is_none() {
            return Err(err_not_found(format!("Profile not found: {name}")));
        }
        self.0
            .backend
            .set_config(CONFIG_DEFAULT_PROFILE, name.to_string())
            .await
    }

    /// All profile names, sorted.
    pub async fn list_profiles(&self) -> AskarResult<Vec<String>> {
        self.check_open()?;
        let mut names: Vec<String> = self
            .0
            .backend
            .list_profiles()
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Re-wrap every profile key under a new store key.
    pub async fn rekey(&self, method: StoreKeyMethod, pass_key: PassKey) -> AskarResult<()> {
        self.check_open()?;
        let _guard = self.exclusive_guard().await?;
        let (new_key, reference) = new_wrap_key(method, pass_key).await?;
        let old_key = self.0.wrap_key.read().clone();
        let mut updates = Vec::new();
        for record in self.0.backend.list_profiles().await? {
            let key = ProfileKey::from_wrapped(&old_key, &record.profile_key)?;
            updates.push((record.id, key.wrap(&new_key)?));
        }
        let count = updates.len();
        self.0.backend.rekey(reference, updates).await?;
        *self.0.wrap_key.write() = Arc::new(new_key);
        info!(uri = %self.0.uri, %method, profiles = count, "rekeyed store");
        Ok(())
    }

    async fn profile_keys(&self) -> AskarResult<Vec<(ProfileRecord, ProfileKey)>> {
        let wrap_key = self.0.wrap_key.read().clone();
        self.0
            .backend
            .list_profiles()
            .await?
            .into_iter()
            .map(|record| {
                let key = ProfileKey::from_wrapped(&wrap_key, &record.profile_key)?;
                Ok((record, key))
            })
            .collect()
    }

    /// Copy every profile and entry into a newly provisioned store
    /// protected by a different key.
    pub async fn copy_to(
        &self,
        backends: &Backends,
        target_uri: &str,
        method: StoreKeyMethod,
        pass_key: PassKey,
        recreate: bool,
    ) -> AskarResult<Store> {
        self.check_open()?;
        let _guard = self.shared_guard().await?;
        let (factory, store_uri) = backends.resolve(target_uri)?;
        let config = backends.config();
        let target = factory
            .provision(store_uri, config.clone(), recreate)
            .await?;
        let (wrap_key, reference) = new_wrap_key(method, pass_key).await?;
        let default_profile = self.get_default_profile().await?;
        let profiles = self.profile_keys().await?;
        Self::init_backend(
            &target,
            &wrap_key,
            reference,
            &default_profile,
            profiles.iter().map(|(r, k)| (r.name.clone(), k)).collect(),
        )
        .await?;
        for (record, _) in &profiles {
            let target_record = target
                .get_profile(record.name.clone())
                .await?
                .ok_or_else(|| err_unexpected("Copied profile not found"))?;
            copy_records(&self.0.backend, record.id, &target, target_record.id).await?;
        }
        info!(from = %self.0.uri, to = %target_uri, profiles = profiles.len(), "copied store");
        Ok(Self::from_parts(
            target_uri,
            target,
            config,
            wrap_key,
            self.get_profile_name(),
        ))
    }

    /// Copy one profile's entries into another store under a new name.
    pub async fn copy_profile(
        &self,
        target: &Store,
        from_profile: &str,
        to_profile: &str,
    ) -> AskarResult<()> {
        self.check_open()?;
        target.check_open()?;
        let _guard = self.shared_guard().await?;
        let source = self.profile_state(Some(from_profile)).await?;
        let wrapped = {
            let wrap_key = target.0.wrap_key.read().clone();
            source.key.wrap(&wrap_key)?
        };
        let record = target
            .0
            .backend
            .create_profile(to_profile.to_string(), wrapped)
            .await?;
        copy_records(&self.0.backend, source.id, &target.0.backend, record.id).await?;
        debug!(%from_profile, %to_profile, to = %target.0.uri, "copied profile");
        Ok(())
    }

    /// Start a session on `profile`, or the default profile.
    pub async fn session(&self, profile: Option<&str>) -> AskarResult<Session> {
        Session::start(self.clone(), profile, false).await
    }

    /// Start a transaction on `profile`, or the default profile.
    pub async fn transaction(&self, profile: Option<&str>) -> AskarResult<Session> {
        Session::start(self.clone(), profile, true).await
    }

    /// Prepare a lazy scan. Nothing is read until the first page.
    #[allow(clippy::too_many_arguments)]
    pub async fn scan(
        &self,
        profile: Option<&str>,
        category: Option<&str>,
        filter: Option<TagFilter>,
        offset: Option<i64>,
        limit: Option<i64>,
        order_by: Option<OrderBy>,
        descending: bool,
    ) -> AskarResult<Scan> {
        self.check_open()?;
        let profile = self.profile_state(profile).await?;
        let mut query = EntryQuery::new(EntryKind::Item);
        query.category = category
            .map(|c| profile.key.encrypt_category(c))
            .transpose()?;
        query.filter = filter
            .map(|f| profile.key.encrypt_tag_query(f.into_query()))
            .transpose()?;
        query.offset = offset;
        query.limit = limit;
        query.descending = descending;
        match order_by.unwrap_or_default() {
            OrderBy::Id => (),
        }
        Ok(Scan::new(self.clone(), profile, query))
    }

    /// Close the store. Open sessions and scans fail afterwards.
    pub async fn close(&self) -> AskarResult<()> {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return Err(err_invalid_state("Store is already closed"));
        }
        self.0.profiles.lock().clear();
        self.0.backend.close().await?;
        debug!(uri = %self.0.uri, "closed store");
        Ok(())
    }
}

async fn copy_records(
    from: &Backend,
    from_profile: i64,
    to: &Backend,
    to_profile: i64,
) -> AskarResult<()> {
    // read everything first, the target may share a single connection
    // with the source
    let mut records = Vec::new();
    for kind in [EntryKind::Kms, EntryKind::Item] {
        let mut scan = from.scan(from_profile, EntryQuery::new(kind)).await?;
        while let Some(page) = scan.next().await? {
            records.extend(page.into_iter().map(|entry| (kind, entry)));
        }
    }
    let mut txn = to.session(to_profile, true).await?;
    for (kind, entry) in records {
        txn.update(kind, EntryOperation::Insert, entry).await?;
    }
    txn.close(true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn provision(uri: &str) -> (Backends, Store, String) {
        let backends = Backends::default();
        let key = generate_raw_key(None).unwrap();
        let store = Store::provision(
            &backends,
            uri,
            StoreKeyMethod::RawKey,
            PassKey::from(key.as_str()),
            Some("main"),
            false,
        )
        .await
        .unwrap();
        (backends, store, key)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn provision_twice_is_duplicate() {
        let (backends, _store, key) = provision("memory://dup").await;
        let err = Store::provision(
            &backends,
            "memory://dup",
            StoreKeyMethod::RawKey,
            PassKey::from(key.as_str()),
            None,
            false,
        )
        .await
        .unwrap_err();
        assert_eq!(ErrorKind::Duplicate, err.kind());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_checks_key() {
        let (backends, store, key) = provision("memory://open").await;
        store.close().await.unwrap();

        let wrong = generate_raw_key(None).unwrap();
        let err = Store::open(
            &backends,
            "memory://open",
            None,
            PassKey::from(wrong.as_str()),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(ErrorKind::Encryption, err.kind());

        let err = Store::open(
            &backends,
            "memory://open",
            Some(StoreKeyMethod::Unprotected),
            PassKey::from(key.as_str()),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(ErrorKind::Encryption, err.kind());

        let store = Store::open(
            &backends,
            "memory://open",
            Some(StoreKeyMethod::RawKey),
            PassKey::from(key.as_str()),
            None,
        )
        .await
        .unwrap();
        assert_eq!("main", store.get_profile_name());

        let err = Store::open(&backends, "memory://missing", None, PassKey::empty(), None)
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::NotFound, err.kind());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn profile_management() {
        let (_backends, store, _key) = provision("memory://profiles").await;
        let generated = store.create_profile(None).await.unwrap();
        store.create_profile(Some("other")).await.unwrap();
        let err = store.create_profile(Some("other")).await.unwrap_err();
        assert_eq!(ErrorKind::Duplicate, err.kind());

        let mut expected = vec!["main".to_string(), "other".to_string(), generated.clone()];
        expected.sort();
        assert_eq!(expected, store.list_profiles().await.unwrap());

        assert!(store.rename_profile("main", "primary").await.unwrap());
        assert!(!store.rename_profile("main", "primary2").await.unwrap());
        assert_eq!("primary", store.get_default_profile().await.unwrap());
        assert_eq!("primary", store.get_profile_name());

        let err = store.remove_profile("primary").await.unwrap_err();
        assert_eq!(ErrorKind::Input, err.kind());

        store.set_default_profile("other").await.unwrap();
        let err = store.set_default_profile("nope").await.unwrap_err();
        assert_eq!(ErrorKind::NotFound, err.kind());

        assert!(store.remove_profile(&generated).await.unwrap());
        assert!(!store.remove_profile(&generated).await.unwrap());
        assert!(store.remove_profile("primary").await.unwrap());
        assert_eq!(vec!["other".to_string()], store.list_profiles().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_profile_with_session_is_busy() {
        let (_backends, store, _key) = provision("memory://busy").await;
        store.create_profile(Some("side")).await.unwrap();
        let session = store.session(Some("side")).await.unwrap();
        let err = store.remove_profile("side").await.unwrap_err();
        assert_eq!(ErrorKind::Busy, err.kind());
        drop(session);
        assert!(store.remove_profile("side").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_twice_fails() {
        let (_backends, store, _key) = provision("memory://close").await;
        store.close().await.unwrap();
        let err = store.close().await.unwrap_err();
        assert_eq!(ErrorKind::InvalidState, err.kind());
        let err = store.session(None).await.unwrap_err();
        assert_eq!(ErrorKind::InvalidState, err.kind());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_store() {
        let (backends, store, _key) = provision("memory://gone").await;
        store.close().await.unwrap();
        assert!(Store::remove(&backends, "memory://gone").await.unwrap());
        assert!(!Store::remove(&backends, "memory://gone").await.unwrap());
    }
}
