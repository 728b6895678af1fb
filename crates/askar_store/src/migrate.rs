//! Convert an indy-sdk sqlite wallet into an askar store in place.
//!
//! The wallet's item and tag ciphertexts already use the searchable
//! encryption askar expects, so only item values are re-encrypted. The
//! indy keys become the keys of a single profile named after the wallet.

use crate::dependencies::*;
use crate::sql;
use crate::sqlite::*;
use askar_store_api::store_key::{decrypt_nonce_prefixed, ProfileKey, StoreKeyReference};
use askar_store_api::types::{EncEntry, EncEntryTag, EntryKind};
use askar_store_api::*;
use askar_store_api::prelude::{Argon2Parameters, PassKey, StoreKeyMethod};
use rusqlite::params;
use std::path::PathBuf;
use std::sync::Arc;

const INDY_SALT_LEN: usize = 16;

/// Key derivation used by the indy wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndyKdfLevel {
    /// base58 encoded raw key
    Raw,
    /// argon2i, moderate limits
    Argon2iMod,
    /// argon2i, interactive limits
    Argon2iInt,
}

impl std::str::FromStr for IndyKdfLevel {
    type Err = OneErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RAW" => Ok(Self::Raw),
            "ARGON2I_MOD" => Ok(Self::Argon2iMod),
            "ARGON2I_INT" => Ok(Self::Argon2iInt),
            _ => Err(ErrorKind::Input.err(format!("Unsupported kdf level: {s}"))),
        }
    }
}

impl IndyKdfLevel {
    fn method(&self) -> StoreKeyMethod {
        match self {
            Self::Raw => StoreKeyMethod::RawKey,
            Self::Argon2iMod => StoreKeyMethod::DeriveKey(Argon2Parameters::Moderate),
            Self::Argon2iInt => StoreKeyMethod::DeriveKey(Argon2Parameters::Interactive),
        }
    }
}

struct IndyKeys {
    type_key: Vec<u8>,
    name_key: Vec<u8>,
    value_key: Vec<u8>,
    profile_key: ProfileKey,
}

impl IndyKeys {
    fn decode(bytes: &[u8]) -> AskarResult<Self> {
        let parts: Vec<serde_bytes::ByteBuf> = rmp_serde::from_slice(bytes)
            .map_err(|_| ErrorKind::Encryption.err("Invalid wallet keys"))?;
        let [type_key, name_key, value_key, item_hmac_key, tag_name_key, tag_value_key, tags_hmac_key]: [serde_bytes::ByteBuf; 7] =
            parts
                .try_into()
                .map_err(|_| ErrorKind::Encryption.err("Invalid wallet keys"))?;
        let profile_key = ProfileKey::from_parts(
            &type_key,
            &name_key,
            &item_hmac_key,
            &tag_name_key,
            &tag_value_key,
            &tags_hmac_key,
        )?;
        Ok(Self {
            type_key: type_key.into_vec(),
            name_key: name_key.into_vec(),
            value_key: value_key.into_vec(),
            profile_key,
        })
    }
}

fn column_bytes(value: rusqlite::types::Value) -> AskarResult<Vec<u8>> {
    use rusqlite::types::Value;
    match value {
        Value::Blob(b) => Ok(b),
        Value::Text(t) => Ok(t.into_bytes()),
        _ => Err(ErrorKind::Backend.err("Unexpected wallet column type")),
    }
}

fn json_bytes(meta: &serde_json::Value, field: &str) -> AskarResult<Option<Vec<u8>>> {
    match meta.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Array(list)) => list
            .iter()
            .map(|b| {
                b.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| ErrorKind::Backend.err("Invalid wallet metadata"))
            })
            .collect::<AskarResult<Vec<u8>>>()
            .map(Some),
        Some(_) => Err(ErrorKind::Backend.err("Invalid wallet metadata")),
    }
}

fn utf8(bytes: &[u8]) -> AskarResult<String> {
    std::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|_| ErrorKind::Encryption.err("Decrypted text is not UTF-8"))
}

fn load_tags(
    con: &rusqlite::Connection,
    table: &str,
    item_id: i64,
    plaintext: bool,
) -> AskarResult<Vec<EncEntryTag>> {
    let mut stmt = con
        .prepare(&format!("SELECT name, value FROM {table} WHERE item_id = ?1;"))
        .map_err(err_sql)?;
    let rows = stmt
        .query_map(params![item_id], |row| {
            Ok((
                row.get::<_, rusqlite::types::Value>(0)?,
                row.get::<_, rusqlite::types::Value>(1)?,
            ))
        })
        .map_err(err_sql)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(err_sql)?;
    rows.into_iter()
        .map(|(name, value)| {
            Ok(EncEntryTag {
                name: column_bytes(name)?,
                value: column_bytes(value)?,
                plaintext,
            })
        })
        .collect()
}

fn read_metadata(con: &rusqlite::Connection) -> AskarResult<serde_json::Value> {
    let tables: i64 = con
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'metadata';",
            [],
            |row| row.get(0),
        )
        .map_err(err_sql)?;
    if tables == 0 {
        return Err(ErrorKind::Backend.err("Database is already migrated"));
    }
    let value: rusqlite::types::Value = con
        .query_row("SELECT value FROM metadata LIMIT 1;", [], |row| row.get(0))
        .map_err(err_sql)?;
    serde_json::from_slice(&column_bytes(value)?)
        .map_err(|_| ErrorKind::Backend.err("Invalid wallet metadata"))
}

fn convert(
    con: &rusqlite::Connection,
    keys: &IndyKeys,
    key_reference: &str,
    wrapped_profile_key: &[u8],
    wallet_name: &str,
) -> AskarResult<usize> {
    con.execute_optional(sql::INDY_RENAME, [])?;
    con.execute_batch(sql::SCHEMA).map_err(err_sql)?;
    con.execute(sql::UPSERT_CONFIG, params!["key", key_reference])
        .map_err(err_sql)?;
    con.execute(sql::UPSERT_CONFIG, params!["default_profile", wallet_name])
        .map_err(err_sql)?;
    con.execute(sql::INSERT_PROFILE, params![wallet_name, wrapped_profile_key])
        .map_err(err_sql)?;
    let profile_id = con.last_insert_rowid();

    let mut stmt = con
        .prepare("SELECT id, type, name, value, key FROM items_old ORDER BY id;")
        .map_err(err_sql)?;
    let items = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, Vec<u8>>(4)?,
            ))
        })
        .map_err(err_sql)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(err_sql)?;
    drop(stmt);

    let count = items.len();
    for (id, category, name, value, value_key) in items {
        let plain_category = utf8(&decrypt_nonce_prefixed(&keys.type_key, &category)?)?;
        let plain_name = utf8(&decrypt_nonce_prefixed(&keys.name_key, &name)?)?;
        let value_key = decrypt_nonce_prefixed(&keys.value_key, &value_key)?;
        let value = decrypt_nonce_prefixed(&value_key, &value)?;

        let mut tags = load_tags(con, "tags_encrypted", id, false)?;
        tags.extend(load_tags(con, "tags_plaintext", id, true)?);

        let entry = EncEntry {
            value: keys
                .profile_key
                .encrypt_value(&plain_category, &plain_name, &value)?,
            category,
            name,
            tags,
            expiry_ms: None,
        };
        insert_entry(con, profile_id, EntryKind::Item, &entry)?;
    }

    con.execute_batch(sql::INDY_DROP).map_err(err_sql)?;
    Ok(count)
}

/// Migrate the indy-sdk wallet database at `spec_uri` (a file path or a
/// `sqlite://` URI) to an askar store. The wallet key is checked against
/// the wallet's stored keys before anything is modified; the conversion
/// itself runs in a single transaction. Fails with `Backend` if the
/// database has already been migrated.
pub async fn migrate_indy_sdk(
    spec_uri: &str,
    wallet_name: &str,
    wallet_key: &str,
    kdf_level: IndyKdfLevel,
    config: Arc<StoreConfig>,
) -> AskarResult<()> {
    let path = PathBuf::from(spec_uri.strip_prefix("sqlite://").unwrap_or(spec_uri));
    if tokio::fs::metadata(&path).await.is_err() {
        return Err(ErrorKind::NotFound.err(format!("Wallet not found: {spec_uri}")));
    }
    tracing::info!(?path, wallet_name, ?kdf_level, "migrating indy-sdk wallet");

    let pool = SqlPool::new(path, config, false).await?;
    let mut con = pool.acquire().await?;
    let meta = con.run(|con| read_metadata(con)).await?;

    let wallet_keys = json_bytes(&meta, "keys")?
        .ok_or_else(|| ErrorKind::Backend.err("Wallet metadata is missing its keys"))?;
    let salt = match kdf_level {
        IndyKdfLevel::Raw => None,
        _ => {
            let salt = json_bytes(&meta, "master_key_salt")?
                .filter(|s| s.len() >= INDY_SALT_LEN)
                .ok_or_else(|| ErrorKind::Backend.err("Wallet metadata is missing its salt"))?;
            Some(salt[..INDY_SALT_LEN].to_vec())
        }
    };
    let reference = StoreKeyReference {
        method: kdf_level.method(),
        salt,
    };
    let wrap_key = reference.resolve(PassKey::from(wallet_key)).await?;
    let keys = IndyKeys::decode(&wrap_key.unwrap_data(&wallet_keys)?)?;
    let wrapped_profile_key = keys.profile_key.wrap(&wrap_key)?;

    let key_reference = reference.to_reference();
    let wallet_name = wallet_name.to_string();
    let count = con
        .transaction(move |txn| {
            convert(txn, &keys, &key_reference, &wrapped_profile_key, &wallet_name)
        })
        .await?;
    drop(con);

    tracing::info!(count, "indy-sdk wallet migrated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_levels() {
        assert_eq!(IndyKdfLevel::Raw, "RAW".parse().unwrap());
        assert_eq!(
            StoreKeyMethod::DeriveKey(Argon2Parameters::Interactive),
            "ARGON2I_INT".parse::<IndyKdfLevel>().unwrap().method()
        );
        let err = "argon2i_mod".parse::<IndyKdfLevel>().unwrap_err();
        assert_eq!(ErrorKind::Input, err.kind());
    }

    #[test]
    fn metadata_bytes() {
        let meta: serde_json::Value =
            serde_json::from_str(r#"{"keys":[1,2,255],"master_key_salt":null}"#).unwrap();
        assert_eq!(Some(vec![1, 2, 255]), json_bytes(&meta, "keys").unwrap());
        assert_eq!(None, json_bytes(&meta, "master_key_salt").unwrap());

        let meta: serde_json::Value = serde_json::from_str(r#"{"keys":[256]}"#).unwrap();
        assert!(json_bytes(&meta, "keys").is_err());
    }
}
