//! askar store backend on a sqlite database file
//!
//! `sqlite://<path>` opens a file database, `sqlite://:memory:` a private
//! in-memory database. File databases run in WAL mode with a pool of up to
//! `max_connections` connections. Transactions hold one connection for
//! their lifetime and take the database write lock up front
//! (`BEGIN IMMEDIATE`), so concurrent transactions serialize rather than
//! fail on commit.

use crate::dependencies::*;
use crate::sql;
use askar_store_api::backend::traits::*;
use askar_store_api::backend::*;
use askar_store_api::types::*;
use askar_store_api::wql::{EncTagName, EncTagQuery, Query};
use askar_store_api::*;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, OptionalExtension};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Path selecting a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Create a factory for sqlite backends.
pub fn create_sqlite_backend_factory() -> BackendFactory {
    BackendFactory(Arc::new(PrivSqliteFactory))
}

/// Classify a sqlite error.
pub(crate) fn err_sql(err: rusqlite::Error) -> OneErr {
    match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy)
        | Some(rusqlite::ErrorCode::DatabaseLocked) => ErrorKind::Busy.err(err),
        Some(rusqlite::ErrorCode::ConstraintViolation) => {
            ErrorKind::Duplicate.err(err)
        }
        _ => ErrorKind::Backend.err(err),
    }
}

pub(crate) fn err_io(err: std::io::Error) -> OneErr {
    ErrorKind::Backend.err(err)
}

struct SqlPoolInner {
    path: PathBuf,
    in_memory: bool,
    config: Arc<StoreConfig>,
    limit: Arc<Semaphore>,
    idle: Mutex<Vec<rusqlite::Connection>>,
}

/// A pooled connection. Returned to the pool on drop, rolling back any
/// transaction left open.
pub(crate) struct SqlCon {
    _permit: OwnedSemaphorePermit,
    con: Option<rusqlite::Connection>,
    in_txn: bool,
    pool: Arc<SqlPoolInner>,
}

impl Drop for SqlCon {
    fn drop(&mut self) {
        if let Some(con) = self.con.take() {
            if self.in_txn {
                if let Err(err) = con.execute_batch("ROLLBACK;") {
                    tracing::warn!(?err, "rollback of abandoned transaction failed");
                }
            }
            self.pool.idle.lock().push(con);
        }
    }
}

impl SqlCon {
    /// Run `f` against the connection on the blocking thread pool.
    pub(crate) async fn run<R, F>(&mut self, f: F) -> AskarResult<R>
    where
        R: 'static + Send,
        F: 'static + FnOnce(&mut rusqlite::Connection) -> AskarResult<R> + Send,
    {
        let mut con = self.con.take().ok_or_else(|| {
            ErrorKind::Backend.err("Database connection was lost")
        })?;
        let (con, r) = tokio::task::spawn_blocking(move || {
            let r = f(&mut con);
            (con, r)
        })
        .await
        .map_err(OneErr::new)?;
        self.con = Some(con);
        r
    }

    /// Run `f` inside an immediate transaction, committing if it succeeds.
    pub(crate) async fn transaction<R, F>(&mut self, f: F) -> AskarResult<R>
    where
        R: 'static + Send,
        F: 'static + FnOnce(&rusqlite::Connection) -> AskarResult<R> + Send,
    {
        self.run(move |con| {
            let txn = con
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(err_sql)?;
            let r = f(&txn)?;
            txn.commit().map_err(err_sql)?;
            Ok(r)
        })
        .await
    }

    async fn begin(&mut self) -> AskarResult<()> {
        self.run(|con| con.execute_batch("BEGIN IMMEDIATE;").map_err(err_sql))
            .await?;
        self.in_txn = true;
        Ok(())
    }

    async fn finish(&mut self, commit: bool) -> AskarResult<()> {
        let stmt = if commit { "COMMIT;" } else { "ROLLBACK;" };
        self.run(move |con| con.execute_batch(stmt).map_err(err_sql))
            .await?;
        self.in_txn = false;
        Ok(())
    }
}

/// extension trait for execute that we don't care about results
pub(crate) trait ExecExt {
    fn execute_optional<P>(&self, sql: &str, params: P) -> AskarResult<()>
    where
        P: rusqlite::Params;
}

impl ExecExt for rusqlite::Connection {
    fn execute_optional<P>(&self, sql: &str, params: P) -> AskarResult<()>
    where
        P: rusqlite::Params,
    {
        self.query_row(sql, params, |_| Ok(()))
            .optional()
            .map_err(err_sql)?;
        Ok(())
    }
}

/// A sqlite connection pool.
#[derive(Clone)]
pub(crate) struct SqlPool(Arc<SqlPoolInner>);

impl SqlPool {
    fn open_con(
        path: &Path,
        in_memory: bool,
        config: &StoreConfig,
        create: bool,
    ) -> AskarResult<rusqlite::Connection> {
        use rusqlite::OpenFlags;

        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        if create {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        let con = if in_memory {
            rusqlite::Connection::open_in_memory_with_flags(flags)
        } else {
            rusqlite::Connection::open_with_flags(path, flags)
        }
        .map_err(err_sql)?;

        set_pragmas(&con, config)?;

        Ok(con)
    }

    fn new_sync(
        path: PathBuf,
        config: Arc<StoreConfig>,
        create: bool,
    ) -> AskarResult<Self> {
        let in_memory = path.as_os_str() == MEMORY_PATH;
        let con = Self::open_con(&path, in_memory, &config, create)?;

        if !in_memory {
            // only set WAL mode on the first connection
            // it's a slow operation, and persists in the file.
            con.pragma_update(None, "journal_mode", "WAL")
                .map_err(err_sql)?;
        }

        if create {
            con.execute_batch(sql::SCHEMA).map_err(err_sql)?;
        }

        // every in-memory connection is a distinct database
        let max = if in_memory {
            1
        } else {
            config.max_connections.max(1)
        };

        Ok(Self(Arc::new(SqlPoolInner {
            path,
            in_memory,
            config,
            limit: Arc::new(Semaphore::new(max)),
            idle: Mutex::new(vec![con]),
        })))
    }

    /// Open a pool on a database file, creating the schema if `create`.
    pub(crate) fn new(
        path: PathBuf,
        config: Arc<StoreConfig>,
        create: bool,
    ) -> impl Future<Output = AskarResult<Self>> + 'static + Send {
        async move {
            tokio::task::spawn_blocking(move || Self::new_sync(path, config, create))
                .await
                .map_err(OneErr::new)?
        }
    }

    /// Check out a connection, waiting at most the busy timeout.
    pub(crate) fn acquire(
        &self,
    ) -> impl Future<Output = AskarResult<SqlCon>> + 'static + Send {
        let inner = self.0.clone();
        async move {
            let permit = tokio::time::timeout(
                inner.config.busy_timeout(),
                inner.limit.clone().acquire_owned(),
            )
            .await
            .map_err(|_| {
                ErrorKind::Busy.err("Timed out waiting for a database connection")
            })?
            .map_err(|_| ErrorKind::InvalidState.err("Database is closed"))?;

            let idle = inner.idle.lock().pop();
            let con = match idle {
                Some(con) => con,
                None if inner.in_memory => {
                    return Err(ErrorKind::Backend
                        .err("In-memory database connection was lost"));
                }
                None => {
                    let path = inner.path.clone();
                    let config = inner.config.clone();
                    tokio::task::spawn_blocking(move || {
                        Self::open_con(&path, false, &config, false)
                    })
                    .await
                    .map_err(OneErr::new)??
                }
            };

            Ok(SqlCon {
                _permit: permit,
                con: Some(con),
                in_txn: false,
                pool: inner,
            })
        }
    }

    fn close(&self) {
        self.0.limit.close();
        self.0.idle.lock().clear();
    }
}

fn set_pragmas(con: &rusqlite::Connection, config: &StoreConfig) -> AskarResult<()> {
    con.busy_timeout(config.busy_timeout()).map_err(err_sql)?;

    con.pragma_update(None, "trusted_schema", "0")
        .map_err(err_sql)?;

    con.pragma_update(None, "synchronous", "1")
        .map_err(err_sql)?;

    con.pragma_update(None, "foreign_keys", "1")
        .map_err(err_sql)?;

    Ok(())
}

fn db_path(uri: &StoreUri) -> AskarResult<PathBuf> {
    if uri.path().is_empty() {
        return Err(ErrorKind::Input.err(format!("Missing database path: {uri}")));
    }
    Ok(PathBuf::from(uri.path()))
}

/// Apply the `max_connections` URI parameter over the registry config.
fn uri_config(uri: &StoreUri, config: Arc<StoreConfig>) -> AskarResult<Arc<StoreConfig>> {
    match uri.param("max_connections") {
        None => Ok(config),
        Some(max) => {
            let max: usize = max.parse().ok().filter(|m| *m > 0).ok_or_else(|| {
                ErrorKind::Input.err(format!("Invalid max_connections: {max}"))
            })?;
            Ok(Arc::new((*config).clone().with_max_connections(max)))
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut out = path.as_os_str().to_owned();
    out.push(suffix);
    PathBuf::from(out)
}

/// Delete a database file and its WAL companions. Returns whether the
/// main file existed.
pub(crate) async fn remove_db_files(path: &Path) -> AskarResult<bool> {
    let mut existed = false;
    for (idx, file) in [
        path.to_path_buf(),
        with_suffix(path, "-wal"),
        with_suffix(path, "-shm"),
    ]
    .into_iter()
    .enumerate()
    {
        match tokio::fs::remove_file(&file).await {
            Ok(()) => existed |= idx == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
            Err(e) => return Err(err_io(e)),
        }
    }
    Ok(existed)
}

struct PrivSqliteFactory;

impl AsBackendFactory for PrivSqliteFactory {
    fn provision(
        &self,
        uri: StoreUri,
        config: Arc<StoreConfig>,
        recreate: bool,
    ) -> BoxFuture<'static, AskarResult<Backend>> {
        async move {
            let path = db_path(&uri)?;
            let config = uri_config(&uri, config)?;
            if path.as_os_str() != MEMORY_PATH {
                if tokio::fs::metadata(&path).await.is_ok() {
                    if !recreate {
                        return Err(ErrorKind::Duplicate
                            .err(format!("Store already exists: {uri}")));
                    }
                    remove_db_files(&path).await?;
                }
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await.map_err(err_io)?;
                    }
                }
            }
            tracing::debug!(%uri, "provision sqlite store");
            let pool = SqlPool::new(path, config, true).await?;
            Ok(Backend(Arc::new(SqliteBackend { pool })))
        }
        .boxed()
    }

    fn open(
        &self,
        uri: StoreUri,
        config: Arc<StoreConfig>,
    ) -> BoxFuture<'static, AskarResult<Backend>> {
        async move {
            let path = db_path(&uri)?;
            if path.as_os_str() == MEMORY_PATH
                || tokio::fs::metadata(&path).await.is_err()
            {
                return Err(ErrorKind::NotFound.err(format!("Store not found: {uri}")));
            }
            tracing::debug!(%uri, "open sqlite store");
            let config = uri_config(&uri, config)?;
            let pool = SqlPool::new(path, config, false).await?;
            Ok(Backend(Arc::new(SqliteBackend { pool })))
        }
        .boxed()
    }

    fn remove(&self, uri: StoreUri) -> BoxFuture<'static, AskarResult<bool>> {
        async move {
            let path = db_path(&uri)?;
            if path.as_os_str() == MEMORY_PATH {
                return Ok(false);
            }
            remove_db_files(&path).await
        }
        .boxed()
    }
}

struct SqliteBackend {
    pool: SqlPool,
}

fn profile_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRecord> {
    Ok(ProfileRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        profile_key: row.get(2)?,
    })
}

fn err_profile_name(err: OneErr, name: &str) -> OneErr {
    if err.kind() == ErrorKind::Duplicate {
        ErrorKind::Duplicate.err(format!("Duplicate profile name: {name}"))
    } else {
        err
    }
}

impl AsBackend for SqliteBackend {
    fn get_config(
        &self,
        name: String,
    ) -> BoxFuture<'static, AskarResult<Option<String>>> {
        let con = self.pool.acquire();
        async move {
            con.await?
                .run(move |con| {
                    con.query_row(
                        "SELECT value FROM config WHERE name = ?1;",
                        params![name],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(err_sql)
                })
                .await
        }
        .boxed()
    }

    fn set_config(
        &self,
        name: String,
        value: String,
    ) -> BoxFuture<'static, AskarResult<()>> {
        let con = self.pool.acquire();
        async move {
            con.await?
                .transaction(move |txn| {
                    txn.execute(sql::UPSERT_CONFIG, params![name, value])
                        .map_err(err_sql)?;
                    Ok(())
                })
                .await
        }
        .boxed()
    }

    fn list_profiles(&self) -> BoxFuture<'static, AskarResult<Vec<ProfileRecord>>> {
        let con = self.pool.acquire();
        async move {
            con.await?
                .run(|con| {
                    let mut stmt = con.prepare(sql::SELECT_PROFILES).map_err(err_sql)?;
                    let rows = stmt
                        .query_map([], profile_record)
                        .map_err(err_sql)?
                        .collect::<rusqlite::Result<Vec<_>>>()
                        .map_err(err_sql)?;
                    Ok(rows)
                })
                .await
        }
        .boxed()
    }

    fn get_profile(
        &self,
        name: String,
    ) -> BoxFuture<'static, AskarResult<Option<ProfileRecord>>> {
        let con = self.pool.acquire();
        async move {
            con.await?
                .run(move |con| {
                    con.query_row(sql::SELECT_PROFILE, params![name], profile_record)
                        .optional()
                        .map_err(err_sql)
                })
                .await
        }
        .boxed()
    }

    fn create_profile(
        &self,
        name: String,
        profile_key: Vec<u8>,
    ) -> BoxFuture<'static, AskarResult<ProfileRecord>> {
        let con = self.pool.acquire();
        async move {
            con.await?
                .transaction(move |txn| {
                    txn.execute(sql::INSERT_PROFILE, params![name, profile_key])
                        .map_err(|e| err_profile_name(err_sql(e), &name))?;
                    Ok(ProfileRecord {
                        id: txn.last_insert_rowid(),
                        name,
                        profile_key,
                    })
                })
                .await
        }
        .boxed()
    }

    fn remove_profile(&self, name: String) -> BoxFuture<'static, AskarResult<bool>> {
        let con = self.pool.acquire();
        async move {
            con.await?
                .transaction(move |txn| {
                    let count = txn
                        .execute("DELETE FROM profiles WHERE name = ?1;", params![name])
                        .map_err(err_sql)?;
                    Ok(count > 0)
                })
                .await
        }
        .boxed()
    }

    fn rename_profile(
        &self,
        from: String,
        to: String,
    ) -> BoxFuture<'static, AskarResult<bool>> {
        let con = self.pool.acquire();
        async move {
            con.await?
                .transaction(move |txn| {
                    let count = txn
                        .execute(
                            "UPDATE profiles SET name = ?2 WHERE name = ?1;",
                            params![from, to],
                        )
                        .map_err(|e| err_profile_name(err_sql(e), &to))?;
                    Ok(count > 0)
                })
                .await
        }
        .boxed()
    }

    fn rekey(
        &self,
        key_reference: String,
        profile_keys: Vec<(i64, Vec<u8>)>,
    ) -> BoxFuture<'static, AskarResult<()>> {
        let con = self.pool.acquire();
        async move {
            con.await?
                .transaction(move |txn| {
                    for (id, key) in profile_keys {
                        let count = txn
                            .execute(
                                "UPDATE profiles SET profile_key = ?2 WHERE id = ?1;",
                                params![id, key],
                            )
                            .map_err(err_sql)?;
                        if count == 0 {
                            return Err(ErrorKind::NotFound.err("Profile not found"));
                        }
                    }
                    txn.execute(sql::UPSERT_CONFIG, params!["key", key_reference])
                        .map_err(err_sql)?;
                    Ok(())
                })
                .await
        }
        .boxed()
    }

    fn session(
        &self,
        profile_id: i64,
        transaction: bool,
    ) -> BoxFuture<'static, AskarResult<BackendSession>> {
        let pool = self.pool.clone();
        async move {
            let txn = if transaction {
                let mut con = pool.acquire().await?;
                con.begin().await?;
                Some(con)
            } else {
                None
            };
            Ok(BackendSession(Box::new(SqliteSession {
                pool,
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
        let page_size = self.pool.0.config.scan_page_size.max(1) as i64;
        let scan = SqliteScan {
            pool: self.pool.clone(),
            profile_id,
            offset: query.offset.unwrap_or(0).max(0),
            remaining: query.limit.filter(|l| *l >= 0),
            query,
            page_size,
            bound: None,
            last_id: None,
            done: false,
        };
        async move { Ok(BackendScan(Box::new(scan))) }.boxed()
    }

    fn close(&self) -> BoxFuture<'static, AskarResult<()>> {
        self.pool.close();
        async move { Ok(()) }.boxed()
    }
}

// -- query translation -- //

fn push_tag_select(name: &EncTagName, sql: &mut String, params: &mut Vec<SqlValue>) {
    sql.push_str(
        "i.id IN (SELECT item_id FROM items_tags WHERE name = ? AND plaintext = ?",
    );
    params.push(SqlValue::Blob(name.name.clone()));
    params.push(SqlValue::Integer(name.plaintext as i64));
}

fn push_list(
    list: &[EncTagQuery],
    joiner: &str,
    empty: &str,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) {
    if list.is_empty() {
        sql.push_str(empty);
        return;
    }
    sql.push('(');
    for (idx, q) in list.iter().enumerate() {
        if idx > 0 {
            sql.push_str(joiner);
        }
        push_filter(q, sql, params);
    }
    sql.push(')');
}

/// Append a tag filter as a boolean SQL expression over `items i`.
pub(crate) fn push_filter(
    query: &EncTagQuery,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) {
    match query {
        Query::And(list) => push_list(list, " AND ", "1", sql, params),
        Query::Or(list) => push_list(list, " OR ", "0", sql, params),
        Query::Not(q) => {
            sql.push_str("NOT (");
            push_filter(q, sql, params);
            sql.push(')');
        }
        Query::Compare(op, name, value) => {
            push_tag_select(name, sql, params);
            sql.push_str(" AND value ");
            sql.push_str(op.as_sql());
            sql.push_str(" ?)");
            params.push(SqlValue::Blob(value.clone()));
        }
        Query::In(name, values) => {
            if values.is_empty() {
                sql.push('0');
                return;
            }
            push_tag_select(name, sql, params);
            sql.push_str(" AND value IN (");
            for (idx, value) in values.iter().enumerate() {
                if idx > 0 {
                    sql.push_str(", ");
                }
                sql.push('?');
                params.push(SqlValue::Blob(value.clone()));
            }
            sql.push_str("))");
        }
        Query::Exist(names) => {
            if names.is_empty() {
                sql.push('1');
                return;
            }
            sql.push('(');
            for (idx, name) in names.iter().enumerate() {
                if idx > 0 {
                    sql.push_str(" AND ");
                }
                push_tag_select(name, sql, params);
                sql.push(')');
            }
            sql.push(')');
        }
    }
}

fn where_clause(profile_id: i64, query: &EntryQuery, now: i64) -> (String, Vec<SqlValue>) {
    let mut sql = String::from(
        "i.profile_id = ? AND i.kind = ? AND (i.expiry IS NULL OR i.expiry > ?)",
    );
    let mut params = vec![
        SqlValue::Integer(profile_id),
        SqlValue::Integer(query.kind.as_i64()),
        SqlValue::Integer(now),
    ];
    if let Some(category) = &query.category {
        sql.push_str(" AND i.category = ?");
        params.push(SqlValue::Blob(category.clone()));
    }
    if let Some(filter) = &query.filter {
        sql.push_str(" AND ");
        push_filter(filter, &mut sql, &mut params);
    }
    (sql, params)
}

fn load_tags(con: &rusqlite::Connection, item_id: i64) -> AskarResult<Vec<EncEntryTag>> {
    let mut stmt = con.prepare_cached(sql::SELECT_TAGS).map_err(err_sql)?;
    let tags = stmt
        .query_map(params![item_id], |row| {
            Ok(EncEntryTag {
                name: row.get(0)?,
                value: row.get(1)?,
                plaintext: row.get(2)?,
            })
        })
        .map_err(err_sql)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(err_sql)?;
    Ok(tags)
}

fn select_entries(
    con: &rusqlite::Connection,
    sql: &str,
    params: &[SqlValue],
) -> AskarResult<Vec<(i64, EncEntry)>> {
    let mut stmt = con.prepare(sql).map_err(err_sql)?;
    let mut rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                EncEntry {
                    category: row.get(1)?,
                    name: row.get(2)?,
                    value: row.get(3)?,
                    tags: Vec::new(),
                    expiry_ms: row.get(4)?,
                },
            ))
        })
        .map_err(err_sql)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(err_sql)?;
    for (id, entry) in rows.iter_mut() {
        entry.tags = load_tags(con, *id)?;
    }
    Ok(rows)
}

fn insert_tags(
    con: &rusqlite::Connection,
    item_id: i64,
    tags: &[EncEntryTag],
) -> AskarResult<()> {
    let mut stmt = con.prepare_cached(sql::INSERT_TAG).map_err(err_sql)?;
    for tag in tags {
        stmt.execute(params![item_id, tag.name, tag.value, tag.plaintext])
            .map_err(err_sql)?;
    }
    Ok(())
}

/// Insert a new record with its tags, returning the row id.
pub(crate) fn insert_entry(
    con: &rusqlite::Connection,
    profile_id: i64,
    kind: EntryKind,
    entry: &EncEntry,
) -> AskarResult<i64> {
    con.execute(
        sql::INSERT_ITEM,
        params![
            profile_id,
            kind.as_i64(),
            entry.category,
            entry.name,
            entry.value,
            entry.expiry_ms
        ],
    )
    .map_err(err_sql)?;
    let id = con.last_insert_rowid();
    insert_tags(con, id, &entry.tags)?;
    Ok(id)
}

fn update_entry(
    con: &rusqlite::Connection,
    profile_id: i64,
    kind: EntryKind,
    operation: EntryOperation,
    entry: EncEntry,
    now: i64,
) -> AskarResult<()> {
    let existing: Option<(i64, Option<i64>)> = con
        .query_row(
            sql::SELECT_ITEM_ID,
            params![profile_id, kind.as_i64(), entry.category, entry.name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(err_sql)?;
    // expired records no longer occupy their slot
    let existing = match existing {
        Some((id, Some(expiry))) if expiry <= now => {
            con.execute("DELETE FROM items WHERE id = ?1;", params![id])
                .map_err(err_sql)?;
            None
        }
        other => other.map(|(id, _)| id),
    };
    match (operation, existing) {
        (EntryOperation::Insert, Some(_)) => {
            Err(ErrorKind::Duplicate.err("Duplicate entry"))
        }
        (EntryOperation::Remove, None) => Err(ErrorKind::NotFound.err("Entry not found")),
        (EntryOperation::Remove, Some(id)) => {
            con.execute("DELETE FROM items WHERE id = ?1;", params![id])
                .map_err(err_sql)?;
            Ok(())
        }
        (EntryOperation::Replace, Some(id)) => {
            con.execute(sql::UPDATE_ITEM, params![id, entry.value, entry.expiry_ms])
                .map_err(err_sql)?;
            con.execute("DELETE FROM items_tags WHERE item_id = ?1;", params![id])
                .map_err(err_sql)?;
            insert_tags(con, id, &entry.tags)
        }
        (_, None) => insert_entry(con, profile_id, kind, &entry).map(|_| ()),
    }
}

struct SqliteSession {
    pool: SqlPool,
    profile_id: i64,
    txn: Option<SqlCon>,
    closed: bool,
}

impl SqliteSession {
    /// Run `f` on the transaction connection, or on a pooled connection
    /// (wrapped in its own transaction when `write`).
    async fn exec<R, F>(&mut self, write: bool, f: F) -> AskarResult<R>
    where
        R: 'static + Send,
        F: 'static + FnOnce(&rusqlite::Connection) -> AskarResult<R> + Send,
    {
        if self.closed {
            return Err(ErrorKind::InvalidState.err("Session is closed"));
        }
        match self.txn.as_mut() {
            Some(con) => con.run(move |con| f(con)).await,
            None => {
                let mut con = self.pool.acquire().await?;
                if write {
                    con.transaction(f).await
                } else {
                    con.run(move |con| f(con)).await
                }
            }
        }
    }
}

impl AsBackendSession for SqliteSession {
    fn count(&mut self, query: EntryQuery) -> BoxFuture<'_, AskarResult<i64>> {
        let profile_id = self.profile_id;
        async move {
            self.exec(false, move |con| {
                let (clause, params) = where_clause(profile_id, &query, now_ms());
                con.query_row(
                    &format!("SELECT COUNT(*) FROM items i WHERE {clause};"),
                    rusqlite::params_from_iter(params.iter()),
                    |row| row.get(0),
                )
                .map_err(err_sql)
            })
            .await
        }
        .boxed()
    }

    fn fetch(
        &mut self,
        kind: EntryKind,
        category: Vec<u8>,
        name: Vec<u8>,
        // transactions already hold the write lock from BEGIN IMMEDIATE
        _for_update: bool,
    ) -> BoxFuture<'_, AskarResult<Option<EncEntry>>> {
        let profile_id = self.profile_id;
        async move {
            self.exec(false, move |con| {
                let row: Option<(i64, Vec<u8>, Option<i64>)> = con
                    .query_row(
                        sql::SELECT_ITEM,
                        params![profile_id, kind.as_i64(), category, name, now_ms()],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()
                    .map_err(err_sql)?;
                match row {
                    None => Ok(None),
                    Some((id, value, expiry_ms)) => Ok(Some(EncEntry {
                        category,
                        name,
                        value,
                        tags: load_tags(con, id)?,
                        expiry_ms,
                    })),
                }
            })
            .await
        }
        .boxed()
    }

    fn fetch_all(
        &mut self,
        query: EntryQuery,
        // see fetch
        _for_update: bool,
    ) -> BoxFuture<'_, AskarResult<Vec<EncEntry>>> {
        let profile_id = self.profile_id;
        async move {
            self.exec(false, move |con| {
                let (clause, mut params) = where_clause(profile_id, &query, now_ms());
                let order = if query.descending { "DESC" } else { "ASC" };
                params.push(SqlValue::Integer(query.limit.filter(|l| *l >= 0).unwrap_or(-1)));
                params.push(SqlValue::Integer(query.offset.unwrap_or(0).max(0)));
                let rows = select_entries(
                    con,
                    &format!(
                        "SELECT i.id, i.category, i.name, i.value, i.expiry \
                         FROM items i WHERE {clause} \
                         ORDER BY i.id {order} LIMIT ? OFFSET ?;"
                    ),
                    &params,
                )?;
                Ok(rows.into_iter().map(|(_, e)| e).collect())
            })
            .await
        }
        .boxed()
    }

    fn update(
        &mut self,
        kind: EntryKind,
        operation: EntryOperation,
        entry: EncEntry,
    ) -> BoxFuture<'_, AskarResult<()>> {
        let profile_id = self.profile_id;
        async move {
            self.exec(true, move |con| {
                update_entry(con, profile_id, kind, operation, entry, now_ms())
            })
            .await
        }
        .boxed()
    }

    fn remove_all(&mut self, query: EntryQuery) -> BoxFuture<'_, AskarResult<i64>> {
        let profile_id = self.profile_id;
        async move {
            self.exec(true, move |con| {
                let (clause, params) = where_clause(profile_id, &query, now_ms());
                let count = con
                    .execute(
                        &format!(
                            "DELETE FROM items WHERE id IN \
                             (SELECT i.id FROM items i WHERE {clause});"
                        ),
                        rusqlite::params_from_iter(params.iter()),
                    )
                    .map_err(err_sql)?;
                Ok(count as i64)
            })
            .await
        }
        .boxed()
    }

    fn close(&mut self, commit: bool) -> BoxFuture<'_, AskarResult<()>> {
        async move {
            if self.closed {
                return Err(ErrorKind::InvalidState.err("Session is closed"));
            }
            self.closed = true;
            if let Some(mut con) = self.txn.take() {
                con.finish(commit).await?;
            }
            Ok(())
        }
        .boxed()
    }
}

/// Keyset-paged cursor. Rows inserted after the first page are not
/// visited; each page checks out its own connection.
struct SqliteScan {
    pool: SqlPool,
    profile_id: i64,
    query: EntryQuery,
    page_size: i64,
    offset: i64,
    remaining: Option<i64>,
    bound: Option<i64>,
    last_id: Option<i64>,
    done: bool,
}

impl AsBackendScan for SqliteScan {
    fn next(&mut self) -> BoxFuture<'_, AskarResult<Option<Vec<EncEntry>>>> {
        async move {
            if self.done {
                return Ok(None);
            }
            let mut page = self.page_size;
            if let Some(remaining) = self.remaining {
                if remaining <= 0 {
                    self.done = true;
                    return Ok(None);
                }
                page = page.min(remaining);
            }

            let profile_id = self.profile_id;
            let query = self.query.clone();
            let bound = self.bound;
            let last_id = self.last_id;
            let offset = std::mem::take(&mut self.offset);

            let mut con = self.pool.acquire().await?;
            let (bound, rows) = con
                .run(move |con| {
                    let bound = match bound {
                        Some(bound) => bound,
                        None => con
                            .query_row("SELECT COALESCE(MAX(id), 0) FROM items;", [], |row| {
                                row.get(0)
                            })
                            .map_err(err_sql)?,
                    };
                    let (mut clause, mut params) =
                        where_clause(profile_id, &query, now_ms());
                    clause.push_str(" AND i.id <= ?");
                    params.push(SqlValue::Integer(bound));
                    if let Some(last_id) = last_id {
                        clause.push_str(if query.descending {
                            " AND i.id < ?"
                        } else {
                            " AND i.id > ?"
                        });
                        params.push(SqlValue::Integer(last_id));
                    }
                    let order = if query.descending { "DESC" } else { "ASC" };
                    params.push(SqlValue::Integer(page));
                    params.push(SqlValue::Integer(offset));
                    let rows = select_entries(
                        con,
                        &format!(
                            "SELECT i.id, i.category, i.name, i.value, i.expiry \
                             FROM items i WHERE {clause} \
                             ORDER BY i.id {order} LIMIT ? OFFSET ?;"
                        ),
                        &params,
                    )?;
                    Ok((bound, rows))
                })
                .await?;
            drop(con);

            self.bound = Some(bound);
            if rows.is_empty() {
                self.done = true;
                return Ok(None);
            }
            if (rows.len() as i64) < page {
                self.done = true;
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= rows.len() as i64;
            }
            self.last_id = rows.last().map(|(id, _)| *id);
            Ok(Some(rows.into_iter().map(|(_, e)| e).collect()))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use askar_store_api::wql::CompareOp;

    fn name(n: &[u8], plaintext: bool) -> EncTagName {
        EncTagName {
            name: n.to_vec(),
            plaintext,
        }
    }

    #[test]
    fn filter_translation() {
        let query: EncTagQuery = Query::And(vec![
            Query::Compare(CompareOp::Eq, name(b"a", false), b"1".to_vec()),
            Query::Not(Box::new(Query::In(
                name(b"b", true),
                vec![b"x".to_vec(), b"y".to_vec()],
            ))),
            Query::Or(vec![]),
            Query::Exist(vec![name(b"c", false)]),
        ]);
        let mut sql = String::new();
        let mut params = Vec::new();
        push_filter(&query, &mut sql, &mut params);
        assert_eq!(
            "(i.id IN (SELECT item_id FROM items_tags WHERE name = ? AND plaintext = ? AND value = ?) \
             AND NOT (i.id IN (SELECT item_id FROM items_tags WHERE name = ? AND plaintext = ? AND value IN (?, ?))) \
             AND 0 \
             AND (i.id IN (SELECT item_id FROM items_tags WHERE name = ? AND plaintext = ?)))",
            sql
        );
        assert_eq!(9, params.len());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn memory_pool_is_single_connection() {
        let config = Arc::new(StoreConfig::default().with_busy_timeout_ms(50));
        let pool = SqlPool::new(MEMORY_PATH.into(), config, true).await.unwrap();
        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.err().unwrap();
        assert_eq!(ErrorKind::Busy, err.kind());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn abandoned_transaction_rolls_back() {
        let tmpdir = tempdir::TempDir::new("askar-sqlite-test").unwrap();
        let path = tmpdir.path().join("db.sqlite3");
        let config = Arc::new(StoreConfig::default());
        let pool = SqlPool::new(path, config, true).await.unwrap();

        {
            let mut con = pool.acquire().await.unwrap();
            con.begin().await.unwrap();
            con.run(|con| {
                con.execute(sql::UPSERT_CONFIG, params!["a", "b"])
                    .map_err(err_sql)?;
                Ok(())
            })
            .await
            .unwrap();
        }

        let mut con = pool.acquire().await.unwrap();
        let value: Option<String> = con
            .run(|con| {
                con.query_row("SELECT value FROM config WHERE name = 'a';", [], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(err_sql)
            })
            .await
            .unwrap();
        assert_eq!(None, value);
    }
}
