use askar_store::dependencies::*;
use askar_store::prelude::*;
use askar_store_api::store_key::{
    encrypt_random, encrypt_searchable, PassKey, StoreKeyReference, WrapKey,
};
use pretty_assertions::assert_eq;
use rusqlite::params;
use std::path::Path;
use std::sync::Arc;

mod common;
use common::*;

const INDY_SCHEMA: &str = "
CREATE TABLE metadata (id INTEGER NOT NULL, value NOT NULL, PRIMARY KEY (id));
CREATE TABLE items (
    id INTEGER NOT NULL, type NOT NULL, name NOT NULL, value NOT NULL, key NOT NULL,
    PRIMARY KEY (id)
);
CREATE UNIQUE INDEX ux_items_type_name ON items (type, name);
CREATE TABLE tags_encrypted (
    name NOT NULL, value NOT NULL, item_id INTEGER NOT NULL,
    PRIMARY KEY (name, item_id),
    FOREIGN KEY (item_id) REFERENCES items (id) ON DELETE CASCADE
);
CREATE TABLE tags_plaintext (
    name NOT NULL, value NOT NULL, item_id INTEGER NOT NULL,
    PRIMARY KEY (name, item_id),
    FOREIGN KEY (item_id) REFERENCES items (id) ON DELETE CASCADE
);
";

// type, name, value, item hmac, tag name, tag value, tags hmac
fn indy_keys() -> [Vec<u8>; 7] {
    [1u8, 2, 3, 4, 5, 6, 7].map(|b| vec![b; 32])
}

struct IndyItem<'a> {
    category: &'a str,
    name: &'a str,
    value: &'a [u8],
    encrypted_tags: &'a [(&'a str, &'a str)],
    plaintext_tags: &'a [(&'a str, &'a str)],
}

fn write_indy_wallet(
    path: &Path,
    wrap_key: &WrapKey,
    salt: &[u8],
    items: &[IndyItem<'_>],
) {
    let [type_key, name_key, value_key, item_hmac, tag_name_key, tag_value_key, tags_hmac] =
        indy_keys();
    let parts: Vec<serde_bytes::ByteBuf> = indy_keys()
        .into_iter()
        .map(serde_bytes::ByteBuf::from)
        .collect();
    let wrapped = wrap_key
        .wrap_data(&rmp_serde::to_vec(&parts).unwrap())
        .unwrap();
    let meta = serde_json::json!({
        "keys": wrapped,
        "master_key_salt": salt,
    });

    let con = rusqlite::Connection::open(path).unwrap();
    con.execute_batch(INDY_SCHEMA).unwrap();
    con.execute(
        "INSERT INTO metadata (value) VALUES (?1);",
        params![serde_json::to_vec(&meta).unwrap()],
    )
    .unwrap();

    for (idx, item) in items.iter().enumerate() {
        let item_key = vec![100 + idx as u8; 32];
        con.execute(
            "INSERT INTO items (type, name, value, key) VALUES (?1, ?2, ?3, ?4);",
            params![
                encrypt_searchable(&type_key, &item_hmac, item.category.as_bytes()).unwrap(),
                encrypt_searchable(&name_key, &item_hmac, item.name.as_bytes()).unwrap(),
                encrypt_random(&item_key, item.value).unwrap(),
                encrypt_random(&value_key, &item_key).unwrap(),
            ],
        )
        .unwrap();
        let item_id = con.last_insert_rowid();
        for (name, value) in item.encrypted_tags {
            con.execute(
                "INSERT INTO tags_encrypted (name, value, item_id) VALUES (?1, ?2, ?3);",
                params![
                    encrypt_searchable(&tag_name_key, &tags_hmac, name.as_bytes()).unwrap(),
                    encrypt_searchable(&tag_value_key, &tags_hmac, value.as_bytes()).unwrap(),
                    item_id,
                ],
            )
            .unwrap();
        }
        for (name, value) in item.plaintext_tags {
            con.execute(
                "INSERT INTO tags_plaintext (name, value, item_id) VALUES (?1, ?2, ?3);",
                params![
                    encrypt_searchable(&tag_name_key, &tags_hmac, name.as_bytes()).unwrap(),
                    value,
                    item_id,
                ],
            )
            .unwrap();
        }
    }
}

fn items() -> Vec<IndyItem<'static>> {
    vec![
        IndyItem {
            category: "Indy::Did",
            name: "did:one",
            value: br#"{"did":"one"}"#,
            encrypted_tags: &[("role", "steward")],
            plaintext_tags: &[("created", "100")],
        },
        IndyItem {
            category: "Indy::Did",
            name: "did:two",
            value: br#"{"did":"two"}"#,
            encrypted_tags: &[("role", "user")],
            plaintext_tags: &[("created", "200")],
        },
        IndyItem {
            category: "Indy::Key",
            name: "verkey",
            value: b"key",
            encrypted_tags: &[],
            plaintext_tags: &[],
        },
    ]
}

#[tokio::test(flavor = "multi_thread")]
async fn migrate_raw_wallet() {
    init_tracing();
    let tmpdir = tempdir::TempDir::new("askar_migrate").unwrap();
    let path = tmpdir.path().join("wallet.db");
    let raw_key = generate_raw_key(Some(b"indy wallet")).unwrap();
    let wrap_key = StoreKeyReference {
        method: StoreKeyMethod::RawKey,
        salt: None,
    }
    .resolve(PassKey::from(raw_key.as_str()))
    .await
    .unwrap();
    write_indy_wallet(&path, &wrap_key, &[0; 32], &items());

    let config = Arc::new(StoreConfig::default());
    let spec_uri = format!("sqlite://{}", path.display());
    migrate_indy_sdk(&spec_uri, "wallet", &raw_key, IndyKdfLevel::Raw, config.clone())
        .await
        .unwrap();

    let backends = default_backends(StoreConfig::default());
    let store = Store::open(
        &backends,
        &spec_uri,
        Some(StoreKeyMethod::RawKey),
        PassKey::from(raw_key.as_str()),
        None,
    )
    .await
    .unwrap();
    assert_eq!(vec!["wallet".to_string()], store.list_profiles().await.unwrap());
    assert_eq!("wallet", store.get_default_profile().await.unwrap());

    let mut session = store.session(None).await.unwrap();
    let entry = session
        .fetch("Indy::Did", "did:one", false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(br#"{"did":"one"}"#.to_vec(), entry.value.to_vec());
    let mut expect = tags(r#"{"role": "steward", "~created": "100"}"#);
    expect.sort();
    assert_eq!(expect, entry.sorted_tags());
    assert_eq!(2, session.count(Some("Indy::Did"), None).await.unwrap());

    let filter: TagFilter = r#"{"role": "user"}"#.parse().unwrap();
    let found = session
        .fetch_all(Some("Indy::Did"), Some(filter), None, None, false, false)
        .await
        .unwrap();
    assert_eq!(1, found.len());
    assert_eq!("did:two", found[0].name);

    let filter: TagFilter = r#"{"~created": {"$gt": "150"}}"#.parse().unwrap();
    assert_eq!(1, session.count(None, Some(filter)).await.unwrap());

    let key = session.fetch("Indy::Key", "verkey", false).await.unwrap().unwrap();
    assert_eq!(b"key".to_vec(), key.value.to_vec());
    session.close().await.unwrap();
    store.close().await.unwrap();

    let err = migrate_indy_sdk(&spec_uri, "wallet", &raw_key, IndyKdfLevel::Raw, config)
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::Backend, err.kind());
}

#[tokio::test(flavor = "multi_thread")]
async fn migrate_argon2_wallet() {
    let tmpdir = tempdir::TempDir::new("askar_migrate").unwrap();
    let path = tmpdir.path().join("wallet.db");
    let salt: Vec<u8> = (0..32).collect();
    let wrap_key = StoreKeyReference {
        method: StoreKeyMethod::DeriveKey(Argon2Parameters::Interactive),
        salt: Some(salt[..16].to_vec()),
    }
    .resolve(PassKey::from("wallet pass"))
    .await
    .unwrap();
    write_indy_wallet(&path, &wrap_key, &salt, &items()[2..]);
    let wallet = path.to_string_lossy().to_string();
    let config = Arc::new(StoreConfig::default());

    // a wrong key leaves the wallet untouched
    let err = migrate_indy_sdk(
        &wallet,
        "wallet",
        "wrong pass",
        IndyKdfLevel::Argon2iInt,
        config.clone(),
    )
    .await
    .unwrap_err();
    assert_eq!(ErrorKind::Encryption, err.kind());

    migrate_indy_sdk(
        &wallet,
        "wallet",
        "wallet pass",
        IndyKdfLevel::Argon2iInt,
        config,
    )
    .await
    .unwrap();

    let backends = default_backends(StoreConfig::default());
    let store = Store::open(
        &backends,
        &format!("sqlite://{wallet}"),
        Some(StoreKeyMethod::DeriveKey(Argon2Parameters::Interactive)),
        PassKey::from("wallet pass"),
        None,
    )
    .await
    .unwrap();
    let mut session = store.session(None).await.unwrap();
    let key = session.fetch("Indy::Key", "verkey", false).await.unwrap().unwrap();
    assert_eq!(b"key".to_vec(), key.value.to_vec());
}

#[tokio::test(flavor = "multi_thread")]
async fn migrate_missing_wallet() {
    let tmpdir = tempdir::TempDir::new("askar_migrate").unwrap();
    let path = tmpdir.path().join("missing.db");
    let err = migrate_indy_sdk(
        &path.to_string_lossy(),
        "wallet",
        "key",
        IndyKdfLevel::Raw,
        Arc::new(StoreConfig::default()),
    )
    .await
    .unwrap_err();
    assert_eq!(ErrorKind::NotFound, err.kind());
    assert!(!path.exists());
}
