//! Generational handle arenas and the numeric call contract.
//!
//! Callers outside of Rust refer to stores, sessions, scans and keys by
//! opaque [`Handle`]s. A freed or stale handle resolves to an
//! `InvalidState` error instead of a dangling resource. Synchronous
//! operations return an [`ErrorCode`] and an optional value; asynchronous
//! operations run on the context's runtime and report through a callback
//! invoked exactly once.

use crate::backend::Backends;
use crate::store_key::{generate_raw_key, PassKey, StoreKeyMethod};
use crate::types::*;
use crate::wql::TagFilter;
use crate::*;
use askar_crypto::{KeyAlg, KeyBackend, LocalKey};
use futures::future::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

/// Caller-chosen id echoed back to an async callback.
pub type CallbackId = i64;

/// An opaque resource reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Pack into a single integer, never zero.
    pub fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64 + 1)
    }

    /// Unpack a raw handle. Zero and garbage values simply fail lookup.
    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: ((raw & 0xffff_ffff) as u32).wrapping_sub(1),
            generation: (raw >> 32) as u32,
        }
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

struct ArenaInner<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

/// Resources addressed by generational indices.
pub struct HandleArena<T> {
    kind: &'static str,
    inner: Mutex<ArenaInner<T>>,
}

impl<T: Clone> HandleArena<T> {
    /// An empty arena. `kind` names the resource in errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            inner: Mutex::new(ArenaInner {
                slots: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    fn invalid(&self) -> OneErr {
        err_invalid_state(format!("Invalid {} handle", self.kind))
    }

    /// Take ownership of a resource.
    pub fn insert(&self, value: T) -> Handle {
        let mut inner = self.inner.lock();
        match inner.free.pop() {
            Some(index) => {
                let slot = &mut inner.slots[index as usize];
                slot.value = Some(value);
                Handle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = inner.slots.len() as u32;
                inner.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                Handle {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// A clone of the resource.
    pub fn get(&self, handle: Handle) -> AskarResult<T> {
        let inner = self.inner.lock();
        match inner.slots.get(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation => {
                slot.value.clone().ok_or_else(|| self.invalid())
            }
            _ => Err(self.invalid()),
        }
    }

    /// Free a handle, returning the resource.
    pub fn remove(&self, handle: Handle) -> AskarResult<T> {
        let mut inner = self.inner.lock();
        let value = match inner.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.value.is_some() => {
                slot.generation = slot.generation.wrapping_add(1);
                slot.value.take()
            }
            _ => None,
        };
        match value {
            Some(value) => {
                inner.free.push(handle.index);
                Ok(value)
            }
            None => Err(self.invalid()),
        }
    }

    /// Live resources.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.slots.len() - inner.free.len()
    }

    /// Whether no resources are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sync_result<T>(res: AskarResult<T>) -> (ErrorCode, Option<T>) {
    match res {
        Ok(value) => (ErrorCode::Success, Some(value)),
        Err(err) => (set_current_error(&err), None),
    }
}

fn parse_filter(filter: Option<&str>) -> AskarResult<Option<TagFilter>> {
    filter.map(|f| f.parse()).transpose()
}

type SharedSession = Arc<tokio::sync::Mutex<Session>>;
type SharedScan = Arc<tokio::sync::Mutex<Scan>>;

struct ContextInner {
    runtime: tokio::runtime::Handle,
    backends: Backends,
    stores: HandleArena<Store>,
    sessions: HandleArena<SharedSession>,
    scans: HandleArena<SharedScan>,
    keys: HandleArena<LocalKey>,
}

/// Owns every resource reachable through handles, plus the runtime that
/// drives asynchronous operations.
#[derive(Clone)]
pub struct AskarContext(Arc<ContextInner>);

impl AskarContext {
    /// A context driving async operations on `runtime`.
    pub fn new(runtime: tokio::runtime::Handle, backends: Backends) -> Self {
        Self(Arc::new(ContextInner {
            runtime,
            backends,
            stores: HandleArena::new("store"),
            sessions: HandleArena::new("session"),
            scans: HandleArena::new("scan"),
            keys: HandleArena::new("key"),
        }))
    }

    /// The backend registry stores are resolved against.
    pub fn backends(&self) -> &Backends {
        &self.0.backends
    }

    /// Drive `fut` on the context runtime, invoking `cb` exactly once with
    /// its outcome. Failures are also recorded as the current error of the
    /// thread running the callback.
    pub fn spawn_call<T, Fut, Cb>(&self, id: CallbackId, fut: Fut, cb: Cb) -> ErrorCode
    where
        T: 'static + Send,
        Fut: Future<Output = AskarResult<T>> + 'static + Send,
        Cb: FnOnce(CallbackId, ErrorCode, Option<T>) + 'static + Send,
    {
        self.0.runtime.spawn(async move {
            let res = std::panic::AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(err_unexpected("Operation panicked")));
            match res {
                Ok(value) => cb(id, ErrorCode::Success, Some(value)),
                Err(err) => {
                    let code = set_current_error(&err);
                    cb(id, code, None)
                }
            }
        });
        ErrorCode::Success
    }

    fn reject(err: OneErr) -> ErrorCode {
        set_current_error(&err)
    }

    // -- keys -- //

    /// Generate a key.
    pub fn key_generate(
        &self,
        alg: &str,
        backend: &str,
        ephemeral: bool,
    ) -> (ErrorCode, Option<Handle>) {
        sync_result((|| {
            let alg: KeyAlg = alg.parse()?;
            let backend: KeyBackend = backend.parse()?;
            let key = LocalKey::generate(alg, backend, ephemeral)?;
            Ok(self.0.keys.insert(key))
        })())
    }

    /// Import a JWK.
    pub fn key_from_jwk(&self, jwk: &str) -> (ErrorCode, Option<Handle>) {
        sync_result(LocalKey::from_jwk(jwk).map(|key| self.0.keys.insert(key)))
    }

    /// A key's algorithm name.
    pub fn key_get_algorithm(&self, key: Handle) -> (ErrorCode, Option<String>) {
        sync_result(self.0.keys.get(key).map(|k| k.algorithm().to_string()))
    }

    /// A key's public JWK.
    pub fn key_get_jwk_public(&self, key: Handle) -> (ErrorCode, Option<String>) {
        sync_result(self.0.keys.get(key).and_then(|k| k.to_jwk_public()))
    }

    /// A key's RFC 7638 thumbprint.
    pub fn key_get_jwk_thumbprint(&self, key: Handle) -> (ErrorCode, Option<String>) {
        sync_result(self.0.keys.get(key).and_then(|k| k.to_jwk_thumbprint()))
    }

    /// Sign with a key.
    pub fn key_sign_message(
        &self,
        key: Handle,
        message: &[u8],
        sig_type: Option<&str>,
    ) -> (ErrorCode, Option<Vec<u8>>) {
        sync_result((|| {
            let sig_type = sig_type.map(|s| s.parse()).transpose()?;
            self.0.keys.get(key)?.sign_message(message, sig_type)
        })())
    }

    /// Verify a signature. Mismatches are `Some(false)`, not errors.
    pub fn key_verify_signature(
        &self,
        key: Handle,
        message: &[u8],
        signature: &[u8],
        sig_type: Option<&str>,
    ) -> (ErrorCode, Option<bool>) {
        sync_result((|| {
            let sig_type = sig_type.map(|s| s.parse()).transpose()?;
            self.0
                .keys
                .get(key)?
                .verify_signature(message, signature, sig_type)
        })())
    }

    /// Release a key handle.
    pub fn key_free(&self, key: Handle) -> ErrorCode {
        sync_result(self.0.keys.remove(key)).0
    }

    /// Generate a raw store key.
    pub fn generate_raw_key(&self, seed: Option<&[u8]>) -> (ErrorCode, Option<String>) {
        sync_result(generate_raw_key(seed))
    }

    // -- stores -- //

    /// Provision a store.
    #[allow(clippy::too_many_arguments)]
    pub fn store_provision<Cb>(
        &self,
        uri: String,
        key_method: &str,
        pass_key: String,
        profile: Option<String>,
        recreate: bool,
        id: CallbackId,
        cb: Cb,
    ) -> ErrorCode
    where
        Cb: FnOnce(CallbackId, ErrorCode, Option<Handle>) + 'static + Send,
    {
        let method: StoreKeyMethod = match key_method.parse() {
            Ok(method) => method,
            Err(err) => return Self::reject(err),
        };
        let ctx = self.clone();
        self.spawn_call(
            id,
            async move {
                let store = Store::provision(
                    &ctx.0.backends,
                    &uri,
                    method,
                    PassKey::from(pass_key),
                    profile.as_deref(),
                    recreate,
                )
                .await?;
                Ok(ctx.0.stores.insert(store))
            },
            cb,
        )
    }

    /// Open a store.
    pub fn store_open<Cb>(
        &self,
        uri: String,
        key_method: Option<&str>,
        pass_key: String,
        profile: Option<String>,
        id: CallbackId,
        cb: Cb,
    ) -> ErrorCode
    where
        Cb: FnOnce(CallbackId, ErrorCode, Option<Handle>) + 'static + Send,
    {
        let method: Option<StoreKeyMethod> = match key_method.map(|m| m.parse()).transpose() {
            Ok(method) => method,
            Err(err) => return Self::reject(err),
        };
        let ctx = self.clone();
        self.spawn_call(
            id,
            async move {
                let store = Store::open(
                    &ctx.0.backends,
                    &uri,
                    method,
                    PassKey::from(pass_key),
                    profile.as_deref(),
                )
                .await?;
                Ok(ctx.0.stores.insert(store))
            },
            cb,
        )
    }

    /// Create a profile.
    pub fn store_create_profile<Cb>(
        &self,
        store: Handle,
        profile: Option<String>,
        id: CallbackId,
        cb: Cb,
    ) -> ErrorCode
    where
        Cb: FnOnce(CallbackId, ErrorCode, Option<String>) + 'static + Send,
    {
        let store = match self.0.stores.get(store) {
            Ok(store) => store,
            Err(err) => return Self::reject(err),
        };
        self.spawn_call(
            id,
            async move { store.create_profile(profile.as_deref()).await },
            cb,
        )
    }

    /// Close a store and free its handle.
    pub fn store_close<Cb>(&self, store: Handle, id: CallbackId, cb: Cb) -> ErrorCode
    where
        Cb: FnOnce(CallbackId, ErrorCode, Option<()>) + 'static + Send,
    {
        let store = match self.0.stores.remove(store) {
            Ok(store) => store,
            Err(err) => return Self::reject(err),
        };
        self.spawn_call(id, async move { store.close().await }, cb)
    }

    // -- sessions -- //

    /// Start a session or transaction.
    pub fn session_start<Cb>(
        &self,
        store: Handle,
        profile: Option<String>,
        as_transaction: bool,
        id: CallbackId,
        cb: Cb,
    ) -> ErrorCode
    where
        Cb: FnOnce(CallbackId, ErrorCode, Option<Handle>) + 'static + Send,
    {
        let store = match self.0.stores.get(store) {
            Ok(store) => store,
            Err(err) => return Self::reject(err),
        };
        let ctx = self.clone();
        self.spawn_call(
            id,
            async move {
                let session = if as_transaction {
                    store.transaction(profile.as_deref()).await?
                } else {
                    store.session(profile.as_deref()).await?
                };
                Ok(ctx
                    .0
                    .sessions
                    .insert(Arc::new(tokio::sync::Mutex::new(session))))
            },
            cb,
        )
    }

    /// Count entries.
    pub fn session_count<Cb>(
        &self,
        session: Handle,
        category: Option<String>,
        tag_filter: Option<&str>,
        id: CallbackId,
        cb: Cb,
    ) -> ErrorCode
    where
        Cb: FnOnce(CallbackId, ErrorCode, Option<i64>) + 'static + Send,
    {
        let (session, filter) = match self
            .0
            .sessions
            .get(session)
            .and_then(|s| Ok((s, parse_filter(tag_filter)?)))
        {
            Ok(found) => found,
            Err(err) => return Self::reject(err),
        };
        self.spawn_call(
            id,
            async move {
                session
                    .lock()
                    .await
                    .count(category.as_deref(), filter)
                    .await
            },
            cb,
        )
    }

    /// Fetch an entry.
    pub fn session_fetch<Cb>(
        &self,
        session: Handle,
        category: String,
        name: String,
        for_update: bool,
        id: CallbackId,
        cb: Cb,
    ) -> ErrorCode
    where
        Cb: FnOnce(CallbackId, ErrorCode, Option<Option<Entry>>) + 'static + Send,
    {
        let session = match self.0.sessions.get(session) {
            Ok(session) => session,
            Err(err) => return Self::reject(err),
        };
        self.spawn_call(
            id,
            async move {
                session
                    .lock()
                    .await
                    .fetch(&category, &name, for_update)
                    .await
            },
            cb,
        )
    }

    /// Insert, replace or remove an entry. `tags` is a JSON object.
    #[allow(clippy::too_many_arguments)]
    pub fn session_update<Cb>(
        &self,
        session: Handle,
        operation: EntryOperation,
        category: String,
        name: String,
        value: Vec<u8>,
        tags: Option<&str>,
        expiry_ms: Option<i64>,
        id: CallbackId,
        cb: Cb,
    ) -> ErrorCode
    where
        Cb: FnOnce(CallbackId, ErrorCode, Option<()>) + 'static + Send,
    {
        let (session, tags) = match self
            .0
            .sessions
            .get(session)
            .and_then(|s| Ok((s, tags.map(tags_from_json).transpose()?)))
        {
            Ok(found) => found,
            Err(err) => return Self::reject(err),
        };
        let value = askar_crypto::secret_bytes_from(&value);
        self.spawn_call(
            id,
            async move {
                session
                    .lock()
                    .await
                    .update(
                        operation,
                        &category,
                        &name,
                        &value,
                        tags.as_deref(),
                        expiry_ms,
                    )
                    .await
            },
            cb,
        )
    }

    /// Store a key from the key arena.
    #[allow(clippy::too_many_arguments)]
    pub fn session_insert_key<Cb>(
        &self,
        session: Handle,
        key: Handle,
        name: String,
        metadata: Option<String>,
        tags: Option<&str>,
        expiry_ms: Option<i64>,
        id: CallbackId,
        cb: Cb,
    ) -> ErrorCode
    where
        Cb: FnOnce(CallbackId, ErrorCode, Option<()>) + 'static + Send,
    {
        let found = (|| {
            Ok((
                self.0.sessions.get(session)?,
                self.0.keys.get(key)?,
                tags.map(tags_from_json).transpose()?,
            ))
        })();
        let (session, key, tags) = match found {
            Ok(found) => found,
            Err(err) => return Self::reject(err),
        };
        self.spawn_call(
            id,
            async move {
                session
                    .lock()
                    .await
                    .insert_key(
                        &name,
                        &key,
                        metadata.as_deref(),
                        None,
                        tags.as_deref(),
                        expiry_ms,
                    )
                    .await
            },
            cb,
        )
    }

    /// Fetch a stored key into the key arena.
    pub fn session_fetch_key<Cb>(
        &self,
        session: Handle,
        name: String,
        for_update: bool,
        id: CallbackId,
        cb: Cb,
    ) -> ErrorCode
    where
        Cb: FnOnce(CallbackId, ErrorCode, Option<Option<Handle>>) + 'static + Send,
    {
        let session = match self.0.sessions.get(session) {
            Ok(session) => session,
            Err(err) => return Self::reject(err),
        };
        let ctx = self.clone();
        self.spawn_call(
            id,
            async move {
                let entry = session.lock().await.fetch_key(&name, for_update).await?;
                match entry {
                    Some(entry) => Ok(Some(ctx.0.keys.insert(entry.load_local_key()?))),
                    None => Ok(None),
                }
            },
            cb,
        )
    }

    /// End a session and free its handle, committing a transaction if
    /// `commit`.
    pub fn session_close<Cb>(
        &self,
        session: Handle,
        commit: bool,
        id: CallbackId,
        cb: Cb,
    ) -> ErrorCode
    where
        Cb: FnOnce(CallbackId, ErrorCode, Option<()>) + 'static + Send,
    {
        let session = match self.0.sessions.remove(session) {
            Ok(session) => session,
            Err(err) => return Self::reject(err),
        };
        self.spawn_call(
            id,
            async move {
                let mut session = session.lock().await;
                if commit {
                    session.commit().await
                } else {
                    session.close().await
                }
            },
            cb,
        )
    }

    // -- scans -- //

    /// Start a scan.
    #[allow(clippy::too_many_arguments)]
    pub fn scan_start<Cb>(
        &self,
        store: Handle,
        profile: Option<String>,
        category: Option<String>,
        tag_filter: Option<&str>,
        offset: Option<i64>,
        limit: Option<i64>,
        id: CallbackId,
        cb: Cb,
    ) -> ErrorCode
    where
        Cb: FnOnce(CallbackId, ErrorCode, Option<Handle>) + 'static + Send,
    {
        let (store, filter) = match self
            .0
            .stores
            .get(store)
            .and_then(|s| Ok((s, parse_filter(tag_filter)?)))
        {
            Ok(found) => found,
            Err(err) => return Self::reject(err),
        };
        let ctx = self.clone();
        self.spawn_call(
            id,
            async move {
                let scan = store
                    .scan(
                        profile.as_deref(),
                        category.as_deref(),
                        filter,
                        offset,
                        limit,
                        None,
                        false,
                    )
                    .await?;
                Ok(ctx.0.scans.insert(Arc::new(tokio::sync::Mutex::new(scan))))
            },
            cb,
        )
    }

    /// The next page of a scan, `None` once exhausted.
    pub fn scan_next<Cb>(&self, scan: Handle, id: CallbackId, cb: Cb) -> ErrorCode
    where
        Cb: FnOnce(CallbackId, ErrorCode, Option<Option<Vec<Entry>>>) + 'static + Send,
    {
        let scan = match self.0.scans.get(scan) {
            Ok(scan) => scan,
            Err(err) => return Self::reject(err),
        };
        self.spawn_call(id, async move { scan.lock().await.next().await }, cb)
    }

    /// Release a scan handle.
    pub fn scan_free(&self, scan: Handle) -> ErrorCode {
        sync_result(self.0.scans.remove(scan)).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::oneshot;

    #[test]
    fn arena_generations() {
        let arena = HandleArena::new("thing");
        let a = arena.insert(1);
        assert_eq!(1, arena.get(a).unwrap());
        assert_eq!(1, arena.remove(a).unwrap());
        let err = arena.get(a).unwrap_err();
        assert_eq!(ErrorKind::InvalidState, err.kind());
        assert_eq!("Invalid thing handle", err.get_message().unwrap_or_default());

        // the slot is reused under a new generation
        let b = arena.insert(2);
        assert_ne!(a, b);
        assert!(arena.get(a).is_err());
        assert_eq!(2, arena.get(b).unwrap());
        assert_eq!(b, Handle::from_raw(b.to_raw()));
        assert!(arena.get(Handle::from_raw(0)).is_err());
        assert_eq!(1, arena.len());
    }

    fn callback<T: Send + 'static>(
    ) -> (
        impl FnOnce(CallbackId, ErrorCode, Option<T>) + Send + 'static,
        oneshot::Receiver<(CallbackId, ErrorCode, Option<T>)>,
    ) {
        let (send, recv) = oneshot::channel();
        (
            move |id, code, value| {
                let _ = send.send((id, code, value));
            },
            recv,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn key_handles() {
        let ctx = AskarContext::new(tokio::runtime::Handle::current(), Backends::default());
        let (code, key) = ctx.key_generate("ed25519", "software", false);
        assert_eq!(ErrorCode::Success, code);
        let key = key.unwrap();
        let (_, alg) = ctx.key_get_algorithm(key);
        assert_eq!(Some("ed25519".to_string()), alg);

        let (_, sig) = ctx.key_sign_message(key, b"msg", None);
        let sig = sig.unwrap();
        assert_eq!(
            (ErrorCode::Success, Some(true)),
            ctx.key_verify_signature(key, b"msg", &sig, None)
        );

        assert_eq!(ErrorCode::Success, ctx.key_free(key));
        let (code, value) = ctx.key_get_algorithm(key);
        assert_eq!(ErrorCode::Input, code);
        assert_eq!(None, value);
        let current = get_current_error().unwrap();
        assert_eq!("InvalidState", current.kind);

        let (code, _) = ctx.key_generate("nope", "software", false);
        assert_eq!(ErrorCode::Unsupported, code);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn async_store_flow() {
        let ctx = AskarContext::new(tokio::runtime::Handle::current(), Backends::default());
        let (_, raw) = ctx.generate_raw_key(None);

        let (cb, recv) = callback();
        let code = ctx.store_provision(
            "memory://ctx".to_string(),
            "raw",
            raw.unwrap(),
            None,
            false,
            7,
            cb,
        );
        assert_eq!(ErrorCode::Success, code);
        let (id, code, store) = recv.await.unwrap();
        assert_eq!((7, ErrorCode::Success), (id, code));
        let store = store.unwrap();

        let (cb, recv) = callback();
        ctx.session_start(store, None, false, 8, cb);
        let session = recv.await.unwrap().2.unwrap();

        let (cb, recv) = callback();
        ctx.session_update(
            session,
            EntryOperation::Insert,
            "cat".to_string(),
            "name".to_string(),
            b"value".to_vec(),
            Some(r#"{"color": "blue"}"#),
            None,
            9,
            cb,
        );
        assert_eq!(ErrorCode::Success, recv.await.unwrap().1);

        let (cb, recv) = callback();
        ctx.session_update(
            session,
            EntryOperation::Insert,
            "cat".to_string(),
            "name".to_string(),
            b"value".to_vec(),
            None,
            None,
            10,
            cb,
        );
        let (_, code, value) = recv.await.unwrap();
        assert_eq!(ErrorCode::Duplicate, code);
        assert_eq!(None, value);

        let (cb, recv) = callback();
        ctx.session_count(
            session,
            Some("cat".to_string()),
            Some(r#"{"color": "blue"}"#),
            11,
            cb,
        );
        assert_eq!(Some(1), recv.await.unwrap().2);

        // invalid filters are rejected before anything is scheduled
        let (cb, _recv) = callback::<i64>();
        let code = ctx.session_count(session, None, Some("not json"), 12, cb);
        assert_eq!(ErrorCode::Input, code);

        let (cb, recv) = callback();
        ctx.session_close(session, false, 13, cb);
        assert_eq!(ErrorCode::Success, recv.await.unwrap().1);

        let (cb, _recv) = callback::<Option<Entry>>();
        let code = ctx.session_fetch(session, "cat".to_string(), "name".to_string(), false, 14, cb);
        assert_eq!(ErrorCode::Input, code);

        let (cb, recv) = callback();
        ctx.scan_start(store, None, Some("cat".to_string()), None, None, None, 15, cb);
        let scan = recv.await.unwrap().2.unwrap();
        let (cb, recv) = callback();
        ctx.scan_next(scan, 16, cb);
        let page = recv.await.unwrap().2.unwrap().unwrap();
        assert_eq!(1, page.len());
        assert_eq!("name", page[0].name);
        let (cb, recv) = callback();
        ctx.scan_next(scan, 17, cb);
        assert_eq!(Some(None), recv.await.unwrap().2);
        assert_eq!(ErrorCode::Success, ctx.scan_free(scan));

        let (cb, recv) = callback();
        ctx.store_close(store, 18, cb);
        assert_eq!(ErrorCode::Success, recv.await.unwrap().1);
    }
}
