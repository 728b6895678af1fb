use askar_store::dependencies::*;
use askar_store::prelude::*;
use pretty_assertions::assert_eq;

mod common;
use common::*;

#[tokio::test(flavor = "multi_thread")]
async fn entries_persist_across_reopen() {
    init_tracing();
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let uri = db_uri(&tmpdir, "store.db");
    let backends = default_backends(StoreConfig::default());
    let (store, pass_key) = provision(&backends, &uri).await;

    let mut session = store.session(None).await.unwrap();
    let t = tags(r#"{"color": "blue", "~size": "10"}"#);
    session
        .insert("cat", "name", b"one", Some(&t), None)
        .await
        .unwrap();
    let err = session
        .insert("cat", "name", b"two", None, None)
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::Duplicate, err.kind());
    session.close().await.unwrap();
    store.close().await.unwrap();

    let store = Store::open(&backends, &uri, None, PassKey::from(pass_key), None)
        .await
        .unwrap();
    assert_eq!("default", store.get_default_profile().await.unwrap());
    let mut session = store.session(None).await.unwrap();
    let found = session.fetch("cat", "name", false).await.unwrap().unwrap();
    assert_eq!(b"one".to_vec(), found.value.to_vec());
    assert_eq!(
        Entry::new("cat", "name", b"one", t).sorted_tags(),
        found.sorted_tags()
    );

    session
        .replace("cat", "name", b"two", None, None)
        .await
        .unwrap();
    let found = session.fetch("cat", "name", false).await.unwrap().unwrap();
    assert_eq!(b"two".to_vec(), found.value.to_vec());
    assert!(found.tags.is_empty());

    session.remove("cat", "name").await.unwrap();
    let err = session.remove("cat", "name").await.unwrap_err();
    assert_eq!(ErrorKind::NotFound, err.kind());
}

#[tokio::test(flavor = "multi_thread")]
async fn provision_and_open_errors() {
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let uri = db_uri(&tmpdir, "nested/dir/store.db");
    let backends = default_backends(StoreConfig::default());

    let err = Store::open(&backends, &uri, None, PassKey::empty(), None)
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::NotFound, err.kind());

    let (store, pass_key) = provision(&backends, &uri).await;
    store.close().await.unwrap();

    let err = Store::provision(
        &backends,
        &uri,
        StoreKeyMethod::RawKey,
        PassKey::from(pass_key.as_str()),
        None,
        false,
    )
    .await
    .unwrap_err();
    assert_eq!(ErrorKind::Duplicate, err.kind());

    let wrong = generate_raw_key(Some(b"wrong")).unwrap();
    let err = Store::open(&backends, &uri, None, PassKey::from(wrong), None)
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::Encryption, err.kind());

    // recreate discards the old contents
    let store = Store::provision(
        &backends,
        &uri,
        StoreKeyMethod::Unprotected,
        PassKey::empty(),
        Some("fresh"),
        true,
    )
    .await
    .unwrap();
    assert_eq!(vec!["fresh".to_string()], store.list_profiles().await.unwrap());
    store.close().await.unwrap();

    assert!(Store::remove(&backends, &uri).await.unwrap());
    assert!(!Store::remove(&backends, &uri).await.unwrap());

    let err = Store::provision(
        &backends,
        "sqlite://",
        StoreKeyMethod::Unprotected,
        PassKey::empty(),
        None,
        false,
    )
    .await
    .unwrap_err();
    assert_eq!(ErrorKind::Input, err.kind());
}

#[tokio::test(flavor = "multi_thread")]
async fn memory_database() {
    let backends = default_backends(StoreConfig::default());
    let (store, _) = provision(&backends, "sqlite://:memory:").await;
    let mut session = store.session(None).await.unwrap();
    session.insert("cat", "a", b"1", None, None).await.unwrap();
    assert_eq!(1, session.count(None, None).await.unwrap());
    session.close().await.unwrap();

    let err = Store::open(&backends, "sqlite://:memory:", None, PassKey::empty(), None)
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::NotFound, err.kind());
    assert!(!Store::remove(&backends, "sqlite://:memory:").await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn tag_filters() {
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let backends = default_backends(StoreConfig::default());
    let (store, _) = provision(&backends, &db_uri(&tmpdir, "filters.db")).await;
    let mut session = store.session(None).await.unwrap();
    for (name, color, size) in [("a", "red", "1"), ("b", "blue", "5"), ("c", "red", "9")] {
        let t = tags(&format!(r#"{{"color": "{color}", "~size": "{size}"}}"#));
        session
            .insert("cat", name, name.as_bytes(), Some(&t), None)
            .await
            .unwrap();
    }
    session.insert("other", "d", b"d", None, None).await.unwrap();

    let names = |entries: Vec<Entry>| entries.into_iter().map(|e| e.name).collect::<Vec<_>>();

    let filter: TagFilter = r#"{"color": "red"}"#.parse().unwrap();
    let found = session
        .fetch_all(Some("cat"), Some(filter), None, None, false, false)
        .await
        .unwrap();
    assert_eq!(vec!["a", "c"], names(found));

    let filter: TagFilter = r#"{"~size": {"$gte": "5"}}"#.parse().unwrap();
    let found = session
        .fetch_all(Some("cat"), Some(filter), None, None, true, false)
        .await
        .unwrap();
    assert_eq!(vec!["c", "b"], names(found));

    let filter: TagFilter = r#"{"~size": {"$like": "%9"}}"#.parse().unwrap();
    assert_eq!(1, session.count(Some("cat"), Some(filter)).await.unwrap());

    let filter: TagFilter =
        r#"{"$or": [{"color": "blue"}, {"$not": {"~size": {"$lt": "5"}}}]}"#.parse().unwrap();
    assert_eq!(2, session.count(Some("cat"), Some(filter)).await.unwrap());

    let filter: TagFilter = r#"{"color": {"$in": ["blue", "green"]}}"#.parse().unwrap();
    assert_eq!(1, session.count(Some("cat"), Some(filter)).await.unwrap());

    let filter: TagFilter = r#"{"$exist": ["~size", "color"]}"#.parse().unwrap();
    assert_eq!(3, session.count(None, Some(filter)).await.unwrap());

    let filter: TagFilter = r#"{"color": {"$neq": "red"}}"#.parse().unwrap();
    assert_eq!(1, session.count(Some("cat"), Some(filter)).await.unwrap());

    let filter: TagFilter = r#"{"color": {"$gt": "a"}}"#.parse().unwrap();
    let err = session.count(Some("cat"), Some(filter)).await.unwrap_err();
    assert_eq!(ErrorKind::Unsupported, err.kind());

    let found = session
        .fetch_all(None, None, Some(2), None, false, false)
        .await
        .unwrap();
    assert_eq!(vec!["a", "b"], names(found));

    let filter: TagFilter = r#"{"color": "red"}"#.parse().unwrap();
    assert_eq!(2, session.remove_all(Some("cat"), Some(filter)).await.unwrap());
    assert_eq!(2, session.count(None, None).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_entries_are_hidden() {
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let backends = default_backends(StoreConfig::default());
    let (store, _) = provision(&backends, &db_uri(&tmpdir, "expiry.db")).await;
    let mut session = store.session(None).await.unwrap();

    session
        .insert("cat", "gone", b"v", None, Some(-1000))
        .await
        .unwrap();
    session
        .insert("cat", "kept", b"v", None, Some(60_000))
        .await
        .unwrap();
    assert_eq!(None, session.fetch("cat", "gone", false).await.unwrap());
    assert_eq!(1, session.count(Some("cat"), None).await.unwrap());

    // the expired slot is free again
    session.insert("cat", "gone", b"new", None, None).await.unwrap();
    let found = session.fetch("cat", "gone", false).await.unwrap().unwrap();
    assert_eq!(b"new".to_vec(), found.value.to_vec());
}

#[tokio::test(flavor = "multi_thread")]
async fn transaction_isolation() {
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let backends = default_backends(StoreConfig::default());
    let (store, _) = provision(&backends, &db_uri(&tmpdir, "isolation.db")).await;

    let mut txn = store.transaction(None).await.unwrap();
    txn.insert("cat", "committed", b"v", None, None).await.unwrap();
    assert!(txn.fetch("cat", "committed", true).await.unwrap().is_some());

    let mut reader = store.session(None).await.unwrap();
    assert_eq!(None, reader.fetch("cat", "committed", false).await.unwrap());

    txn.commit().await.unwrap();
    assert!(reader.fetch("cat", "committed", false).await.unwrap().is_some());
    let err = txn.insert("cat", "late", b"v", None, None).await.unwrap_err();
    assert_eq!(ErrorKind::InvalidState, err.kind());

    let mut txn = store.transaction(None).await.unwrap();
    txn.insert("cat", "discarded", b"v", None, None).await.unwrap();
    txn.rollback().await.unwrap();
    assert_eq!(None, reader.fetch("cat", "discarded", false).await.unwrap());

    let mut txn = store.transaction(None).await.unwrap();
    txn.insert("cat", "dropped", b"v", None, None).await.unwrap();
    drop(txn);
    assert_eq!(None, reader.fetch("cat", "dropped", false).await.unwrap());
    assert_eq!(1, reader.count(Some("cat"), None).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn no_lost_updates() {
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let backends = default_backends(StoreConfig::default());
    let (store, _) = provision(&backends, &db_uri(&tmpdir, "counter.db")).await;
    let mut session = store.session(None).await.unwrap();
    session.insert("cnt", "n", b"0", None, None).await.unwrap();
    session.close().await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        tasks.push(tokio::task::spawn(async move {
            let mut txn = store.transaction(None).await.unwrap();
            let entry = txn.fetch("cnt", "n", true).await.unwrap().unwrap();
            let n: u32 = std::str::from_utf8(&entry.value).unwrap().parse().unwrap();
            txn.replace("cnt", "n", (n + 1).to_string().as_bytes(), None, None)
                .await
                .unwrap();
            txn.commit().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut session = store.session(None).await.unwrap();
    let entry = session.fetch("cnt", "n", false).await.unwrap().unwrap();
    assert_eq!(b"8".to_vec(), entry.value.to_vec());
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_limit_from_uri() {
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let backends = default_backends(StoreConfig::builder().with_busy_timeout_ms(100));
    let uri = format!("{}?max_connections=1", db_uri(&tmpdir, "limit.db"));
    let (store, _) = provision(&backends, &uri).await;

    let txn = store.transaction(None).await.unwrap();
    let mut reader = store.session(None).await.unwrap();
    let err = reader.count(None, None).await.unwrap_err();
    assert_eq!(ErrorKind::Busy, err.kind());
    drop(txn);
    assert_eq!(0, reader.count(None, None).await.unwrap());

    let err = Store::provision(
        &backends,
        &format!("{}?max_connections=none", db_uri(&tmpdir, "bad.db")),
        StoreKeyMethod::Unprotected,
        PassKey::empty(),
        None,
        false,
    )
    .await
    .unwrap_err();
    assert_eq!(ErrorKind::Input, err.kind());
}

#[tokio::test(flavor = "multi_thread")]
async fn profiles() {
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let backends = default_backends(StoreConfig::default());
    let (store, _) = provision(&backends, &db_uri(&tmpdir, "profiles.db")).await;

    assert_eq!("b", store.create_profile(Some("b")).await.unwrap());
    let err = store.create_profile(Some("b")).await.unwrap_err();
    assert_eq!(ErrorKind::Duplicate, err.kind());
    let generated = store.create_profile(None).await.unwrap();
    assert!(!generated.is_empty());

    let mut a = store.session(None).await.unwrap();
    a.insert("cat", "name", b"a", None, None).await.unwrap();
    let mut b = store.session(Some("b")).await.unwrap();
    assert_eq!(None, b.fetch("cat", "name", false).await.unwrap());
    b.insert("cat", "name", b"b", None, None).await.unwrap();
    b.close().await.unwrap();
    drop(b);

    let mut expect = vec!["b".to_string(), "default".to_string(), generated.clone()];
    expect.sort();
    assert_eq!(expect, store.list_profiles().await.unwrap());

    assert!(store.rename_profile("b", "c").await.unwrap());
    let mut c = store.session(Some("c")).await.unwrap();
    let found = c.fetch("cat", "name", false).await.unwrap().unwrap();
    assert_eq!(b"b".to_vec(), found.value.to_vec());
    c.close().await.unwrap();
    drop(c);

    assert!(store.remove_profile("c").await.unwrap());
    assert!(!store.remove_profile("c").await.unwrap());
    let err = store.session(Some("c")).await.unwrap_err();
    assert_eq!(ErrorKind::NotFound, err.kind());

    let err = store.remove_profile("default").await.unwrap_err();
    assert_eq!(ErrorKind::Input, err.kind());

    store.set_default_profile(&generated).await.unwrap();
    assert_eq!(generated, store.get_default_profile().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn scan_pages() {
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let backends = default_backends(StoreConfig::builder().with_scan_page_size(3));
    let (store, _) = provision(&backends, &db_uri(&tmpdir, "scan.db")).await;
    let mut session = store.session(None).await.unwrap();
    for i in 0..10 {
        let t = tags(&format!(r#"{{"~idx": "{i}", "even": "{}"}}"#, i % 2 == 0));
        session
            .insert("cat", &format!("item{i:02}"), b"v", Some(&t), None)
            .await
            .unwrap();
    }
    session.insert("skip", "x", b"v", None, None).await.unwrap();

    let mut scan = store
        .scan(None, Some("cat"), None, None, None, None, false)
        .await
        .unwrap();
    let mut pages = Vec::new();
    while let Some(page) = scan.next().await.unwrap() {
        pages.push(page.len());
    }
    assert_eq!(vec![3, 3, 3, 1], pages);
    assert_eq!(None, scan.next().await.unwrap());

    let filter: TagFilter = r#"{"even": "true"}"#.parse().unwrap();
    let found = store
        .scan(None, Some("cat"), Some(filter), Some(1), Some(3), None, true)
        .await
        .unwrap()
        .fetch_all()
        .await
        .unwrap();
    let names: Vec<String> = found.into_iter().map(|e| e.name).collect();
    assert_eq!(vec!["item06", "item04", "item02"], names);

    // entries added after the first page are not visited
    let mut scan = store
        .scan(None, None, None, None, None, Some(OrderBy::Id), false)
        .await
        .unwrap();
    let mut seen = scan.next().await.unwrap().unwrap().len();
    session.insert("late", "y", b"v", None, None).await.unwrap();
    while let Some(page) = scan.next().await.unwrap() {
        seen += page.len();
    }
    assert_eq!(11, seen);
}

#[tokio::test(flavor = "multi_thread")]
async fn rekey_and_reopen() {
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let uri = db_uri(&tmpdir, "rekey.db");
    let backends = default_backends(StoreConfig::default());
    let (store, old_key) = provision(&backends, &uri).await;
    store.create_profile(Some("second")).await.unwrap();
    let mut session = store.session(Some("second")).await.unwrap();
    session.insert("cat", "name", b"value", None, None).await.unwrap();
    session.close().await.unwrap();
    drop(session);

    store
        .rekey(
            StoreKeyMethod::DeriveKey(Argon2Parameters::Interactive),
            PassKey::from("new passphrase"),
        )
        .await
        .unwrap();
    store.close().await.unwrap();

    let err = Store::open(&backends, &uri, None, PassKey::from(old_key), None)
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::Encryption, err.kind());

    let err = Store::open(
        &backends,
        &uri,
        Some(StoreKeyMethod::RawKey),
        PassKey::from("new passphrase"),
        None,
    )
    .await
    .unwrap_err();
    assert_eq!(ErrorKind::Encryption, err.kind());

    let store = Store::open(
        &backends,
        &uri,
        None,
        PassKey::from("new passphrase"),
        Some("second"),
    )
    .await
    .unwrap();
    let mut session = store.session(None).await.unwrap();
    let entry = session.fetch("cat", "name", false).await.unwrap().unwrap();
    assert_eq!(b"value".to_vec(), entry.value.to_vec());
}

#[tokio::test(flavor = "multi_thread")]
async fn key_entries() {
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let backends = default_backends(StoreConfig::default());
    let (store, _) = provision(&backends, &db_uri(&tmpdir, "keys.db")).await;
    let mut session = store.session(None).await.unwrap();

    let ed = LocalKey::generate(KeyAlg::Ed25519, KeyBackend::Software, false).unwrap();
    session
        .insert_key("ed", &ed, Some("meta"), None, Some(&tags(r#"{"role": "signing"}"#)), None)
        .await
        .unwrap();
    session.insert("cat", "ed", b"item", None, None).await.unwrap();
    assert_eq!(1, session.count(None, None).await.unwrap());

    let thumb = ed.to_jwk_thumbprint().unwrap();
    let found = session
        .fetch_all_keys(Some(KeyAlg::Ed25519), Some(thumb.as_str()), None, None, false)
        .await
        .unwrap();
    assert_eq!(1, found.len());
    let loaded = found[0].load_local_key().unwrap();
    assert_eq!(ed.to_jwk_public().unwrap(), loaded.to_jwk_public().unwrap());

    session.remove_key("ed").await.unwrap();
    assert!(session.fetch_key("ed", false).await.unwrap().is_none());
    assert!(session.fetch("cat", "ed", false).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn copy_between_backends() {
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let backends = default_backends(StoreConfig::default());
    let (store, _) = provision(&backends, &db_uri(&tmpdir, "src.db")).await;
    store.create_profile(Some("second")).await.unwrap();
    let key = LocalKey::generate(KeyAlg::X25519, KeyBackend::Software, false).unwrap();
    {
        let mut session = store.session(None).await.unwrap();
        session
            .insert("cat", "a", b"1", Some(&tags(r#"{"t": "x", "~p": "y"}"#)), None)
            .await
            .unwrap();
        session.insert_key("k", &key, None, None, None, None).await.unwrap();
        session.close().await.unwrap();
        let mut second = store.session(Some("second")).await.unwrap();
        second.insert("cat", "b", b"2", None, None).await.unwrap();
        second.close().await.unwrap();
    }

    let target_uri = db_uri(&tmpdir, "dst.db");
    let copy = store
        .copy_to(
            &backends,
            &target_uri,
            StoreKeyMethod::Unprotected,
            PassKey::empty(),
            false,
        )
        .await
        .unwrap();
    copy.close().await.unwrap();

    let copy = Store::open(&backends, &target_uri, None, PassKey::empty(), None)
        .await
        .unwrap();
    assert_eq!(
        vec!["default".to_string(), "second".to_string()],
        copy.list_profiles().await.unwrap()
    );
    let mut session = copy.session(None).await.unwrap();
    let entry = session.fetch("cat", "a", false).await.unwrap().unwrap();
    assert_eq!(tags(r#"{"t": "x", "~p": "y"}"#).len(), entry.tags.len());
    let filter: TagFilter = r#"{"t": "x"}"#.parse().unwrap();
    assert_eq!(1, session.count(Some("cat"), Some(filter)).await.unwrap());
    assert!(session.fetch_key("k", false).await.unwrap().is_some());
    session.close().await.unwrap();

    // into a sqlite memory store, which runs on one connection
    let (memory, _) = provision(&backends, "sqlite://:memory:").await;
    store.copy_profile(&memory, "second", "copied").await.unwrap();
    let mut session = memory.session(Some("copied")).await.unwrap();
    let entry = session.fetch("cat", "b", false).await.unwrap().unwrap();
    assert_eq!(b"2".to_vec(), entry.value.to_vec());

    let err = store
        .copy_profile(&memory, "second", "copied")
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::Duplicate, err.kind());
}

#[tokio::test(flavor = "multi_thread")]
async fn scan_invalidated_by_profile_removal() {
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let backends = default_backends(StoreConfig::builder().with_scan_page_size(1));
    let (store, _) = provision(&backends, &db_uri(&tmpdir, "scan-removed.db")).await;
    store.create_profile(Some("temp")).await.unwrap();
    let mut session = store.session(Some("temp")).await.unwrap();
    session.insert("cat", "a", b"v", None, None).await.unwrap();
    session.insert("cat", "b", b"v", None, None).await.unwrap();
    session.close().await.unwrap();
    drop(session);

    let mut scan = store
        .scan(Some("temp"), None, None, None, None, None, false)
        .await
        .unwrap();
    assert_eq!(1, scan.next().await.unwrap().unwrap().len());
    assert!(store.remove_profile("temp").await.unwrap());
    let err = scan.next().await.unwrap_err();
    assert_eq!(ErrorKind::InvalidState, err.kind());
}

#[tokio::test(flavor = "multi_thread")]
async fn percent_encoded_uri() {
    let tmpdir = tempdir::TempDir::new("askar_sqlite").unwrap();
    let uri = format!(
        "sqlite://{}/my%20db.db?max_connections=%32",
        tmpdir.path().display()
    );
    let backends = default_backends(StoreConfig::default());
    let (store, _pass_key) = provision(&backends, &uri).await;
    store.close().await.unwrap();

    assert!(tmpdir.path().join("my db.db").exists());
    assert!(!tmpdir.path().join("my%20db.db").exists());

    assert!(Store::remove(&backends, &uri).await.unwrap());
    assert!(!tmpdir.path().join("my db.db").exists());
}
