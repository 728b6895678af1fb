//! Storage backend traits. Backends persist encrypted records and know
//! nothing of keys: every name, category and tag they see is ciphertext.

use crate::types::*;
use crate::wql::EncTagQuery;
use crate::*;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// A stored profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    /// backend identifier
    pub id: i64,
    /// unique profile name
    pub name: String,
    /// wrapped profile key
    pub profile_key: Vec<u8>,
}

/// Selection of records for count, fetch_all, remove_all and scans.
#[derive(Debug, Clone)]
pub struct EntryQuery {
    /// record namespace
    pub kind: EntryKind,
    /// encrypted category, `None` for all categories
    pub category: Option<Vec<u8>>,
    /// encrypted tag filter
    pub filter: Option<EncTagQuery>,
    /// records to skip
    pub offset: Option<i64>,
    /// maximum records to return
    pub limit: Option<i64>,
    /// reverse insertion order
    pub descending: bool,
}

impl EntryQuery {
    /// Select all records of a kind.
    pub fn new(kind: EntryKind) -> Self {
        Self {
            kind,
            category: None,
            filter: None,
            offset: None,
            limit: None,
            descending: false,
        }
    }

    /// Whether a record matches the category and filter.
    pub fn matches(&self, entry: &EncEntry) -> bool {
        if let Some(category) = &self.category {
            if *category != entry.category {
                return false;
            }
        }
        match &self.filter {
            Some(filter) => filter.matches(&entry.tags),
            None => true,
        }
    }
}

/// Helper traits for backend implementations.
pub mod traits {
    use super::*;

    /// An open storage backend.
    pub trait AsBackend: 'static + Send + Sync {
        /// Read a store config value.
        fn get_config(
            &self,
            name: String,
        ) -> BoxFuture<'static, AskarResult<Option<String>>>;

        /// Write a store config value.
        fn set_config(
            &self,
            name: String,
            value: String,
        ) -> BoxFuture<'static, AskarResult<()>>;

        /// All profiles, ordered by name.
        fn list_profiles(
            &self,
        ) -> BoxFuture<'static, AskarResult<Vec<ProfileRecord>>>;

        /// Look up a profile by name.
        fn get_profile(
            &self,
            name: String,
        ) -> BoxFuture<'static, AskarResult<Option<ProfileRecord>>>;

        /// Create a profile. Fails with `Duplicate` if the name is taken.
        fn create_profile(
            &self,
            name: String,
            profile_key: Vec<u8>,
        ) -> BoxFuture<'static, AskarResult<ProfileRecord>>;

        /// Remove a profile and all of its records.
        fn remove_profile(&self, name: String) -> BoxFuture<'static, AskarResult<bool>>;

        /// Rename a profile. Fails with `Duplicate` if `to` is taken.
        fn rename_profile(
            &self,
            from: String,
            to: String,
        ) -> BoxFuture<'static, AskarResult<bool>>;

        /// Atomically replace the stored key reference and every
        /// wrapped profile key.
        fn rekey(
            &self,
            key_reference: String,
            profile_keys: Vec<(i64, Vec<u8>)>,
        ) -> BoxFuture<'static, AskarResult<()>>;

        /// Start a session on a profile.
        fn session(
            &self,
            profile_id: i64,
            transaction: bool,
        ) -> BoxFuture<'static, AskarResult<BackendSession>>;

        /// Start a paged scan on a profile.
        fn scan(
            &self,
            profile_id: i64,
            query: EntryQuery,
        ) -> BoxFuture<'static, AskarResult<BackendScan>>;

        /// Release backend resources.
        fn close(&self) -> BoxFuture<'static, AskarResult<()>>;
    }

    /// Record operations bound to one profile.
    pub trait AsBackendSession: 'static + Send {
        /// Count live records.
        fn count(&mut self, query: EntryQuery) -> BoxFuture<'_, AskarResult<i64>>;

        /// Fetch one live record.
        fn fetch(
            &mut self,
            kind: EntryKind,
            category: Vec<u8>,
            name: Vec<u8>,
            for_update: bool,
        ) -> BoxFuture<'_, AskarResult<Option<EncEntry>>>;

        /// Fetch live records in id order.
        fn fetch_all(
            &mut self,
            query: EntryQuery,
            for_update: bool,
        ) -> BoxFuture<'_, AskarResult<Vec<EncEntry>>>;

        /// Insert, replace or remove one record.
        fn update(
            &mut self,
            kind: EntryKind,
            operation: EntryOperation,
            entry: EncEntry,
        ) -> BoxFuture<'_, AskarResult<()>>;

        /// Remove matching records, returning how many were removed.
        fn remove_all(&mut self, query: EntryQuery) -> BoxFuture<'_, AskarResult<i64>>;

        /// End the session, committing a transaction if `commit`.
        fn close(&mut self, commit: bool) -> BoxFuture<'_, AskarResult<()>>;
    }

    /// A paged cursor.
    pub trait AsBackendScan: 'static + Send {
        /// The next page, `None` once exhausted.
        fn next(&mut self) -> BoxFuture<'_, AskarResult<Option<Vec<EncEntry>>>>;
    }

    /// Opens backends for one URI scheme.
    pub trait AsBackendFactory: 'static + Send + Sync {
        /// Create a new backing resource, replacing an existing one only
        /// if `recreate`, otherwise failing with `Duplicate`.
        fn provision(
            &self,
            uri: StoreUri,
            config: Arc<StoreConfig>,
            recreate: bool,
        ) -> BoxFuture<'static, AskarResult<Backend>>;

        /// Open an existing resource, failing with `NotFound`.
        fn open(
            &self,
            uri: StoreUri,
            config: Arc<StoreConfig>,
        ) -> BoxFuture<'static, AskarResult<Backend>>;

        /// Delete a backing resource, returning whether it existed.
        fn remove(&self, uri: StoreUri) -> BoxFuture<'static, AskarResult<bool>>;
    }
}
use traits::*;

/// An open storage backend.
#[derive(Clone)]
pub struct Backend(pub Arc<dyn AsBackend>);

impl Backend {
    /// Read a store config value.
    pub fn get_config(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = AskarResult<Option<String>>> + 'static + Send
    {
        AsBackend::get_config(&*self.0, name.to_string())
    }

    /// Write a store config value.
    pub fn set_config(
        &self,
        name: &str,
        value: String,
    ) -> impl std::future::Future<Output = AskarResult<()>> + 'static + Send {
        AsBackend::set_config(&*self.0, name.to_string(), value)
    }
}

impl std::ops::Deref for Backend {
    type Target = dyn AsBackend;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

/// A backend session.
pub struct BackendSession(pub Box<dyn AsBackendSession>);

impl std::ops::Deref for BackendSession {
    type Target = dyn AsBackendSession;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl std::ops::DerefMut for BackendSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.0
    }
}

/// A backend scan.
pub struct BackendScan(pub Box<dyn AsBackendScan>);

impl BackendScan {
    /// The next page, `None` once exhausted.
    pub async fn next(&mut self) -> AskarResult<Option<Vec<EncEntry>>> {
        self.0.next().await
    }
}

/// A backend factory.
#[derive(Clone)]
pub struct BackendFactory(pub Arc<dyn AsBackendFactory>);

impl std::ops::Deref for BackendFactory {
    type Target = dyn AsBackendFactory;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

/// A parsed store URI, `<scheme>://<path>[?<key>=<value>&..]`.
///
/// The path and the query are percent-decoded. The path is kept verbatim
/// otherwise, so `sqlite://:memory:` and relative file paths survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUri {
    uri: String,
    scheme: String,
    path: String,
    params: Vec<(String, String)>,
}

impl StoreUri {
    /// Parse a store URI.
    pub fn parse(uri: &str) -> AskarResult<Self> {
        let invalid = || err_input(format!("Invalid store URI: {uri}"));
        let (scheme, rest) = uri.split_once("://").ok_or_else(invalid)?;
        let mut chars = scheme.chars();
        let scheme_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c));
        if !scheme_ok {
            return Err(invalid());
        }
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        let path = percent_encoding::percent_decode_str(path)
            .decode_utf8()
            .map_err(|_| invalid())?
            .into_owned();
        let params = query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            uri: uri.to_string(),
            scheme: scheme.to_ascii_lowercase(),
            path,
            params,
        })
    }

    /// Lowercase scheme.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Everything between `://` and `?`, decoded.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// A query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The original text.
    pub fn as_str(&self) -> &str {
        &self.uri
    }
}

impl std::fmt::Display for StoreUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Backend factories by URI scheme, plus the runtime config they share.
#[derive(Clone)]
pub struct Backends {
    config: Arc<StoreConfig>,
    factories: HashMap<String, BackendFactory>,
}

impl Default for Backends {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl Backends {
    /// A registry holding the in-memory backend under `memory://`.
    pub fn new(config: StoreConfig) -> Self {
        let mut factories = HashMap::new();
        factories.insert("memory".to_string(), mem_store::create_mem_backend_factory());
        Self {
            config: Arc::new(config),
            factories,
        }
    }

    /// Register a factory for a scheme.
    pub fn with_backend(mut self, scheme: &str, factory: BackendFactory) -> Self {
        self.factories.insert(scheme.to_ascii_lowercase(), factory);
        self
    }

    /// The shared config.
    pub fn config(&self) -> Arc<StoreConfig> {
        self.config.clone()
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut out: Vec<String> = self.factories.keys().cloned().collect();
        out.sort();
        out
    }

    /// Find the factory for a URI.
    pub fn resolve(&self, uri: &str) -> AskarResult<(BackendFactory, StoreUri)> {
        let uri = StoreUri::parse(uri)?;
        let factory = self.factories.get(uri.scheme()).cloned().ok_or_else(|| {
            err_unsupported(format!("Unsupported store scheme: {}", uri.scheme()))
        })?;
        Ok((factory, uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_uris() {
        let uri = StoreUri::parse("sqlite://./a/b.db?max_connections=3&x").unwrap();
        assert_eq!("sqlite", uri.scheme());
        assert_eq!("./a/b.db", uri.path());
        assert_eq!(Some("3"), uri.param("max_connections"));
        assert_eq!(Some(""), uri.param("x"));
        assert_eq!(None, uri.param("y"));

        let uri = StoreUri::parse("SQLite://:memory:").unwrap();
        assert_eq!("sqlite", uri.scheme());
        assert_eq!(":memory:", uri.path());

        let uri =
            StoreUri::parse("sqlite://./my%20db.db?max_connections=%34&name=a+b%26c")
                .unwrap();
        assert_eq!("./my db.db", uri.path());
        assert_eq!(Some("4"), uri.param("max_connections"));
        assert_eq!(Some("a b&c"), uri.param("name"));

        for bad in ["/tmp/x.db", "://x", "1x://y", "sqlite://%ff"] {
            assert_eq!(ErrorKind::Input, StoreUri::parse(bad).unwrap_err().kind());
        }
    }

    #[test]
    fn resolve_scheme() {
        let backends = Backends::default();
        assert!(backends.resolve("memory://x").is_ok());
        let err = backends.resolve("postgres://x").err().unwrap();
        assert_eq!(ErrorKind::Unsupported, err.kind());
    }
}
