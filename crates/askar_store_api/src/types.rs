//! Entry and key entry records.

use crate::*;
use askar_crypto::{KeyAlg, SecretBytes};

/// Disjoint record namespaces within a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// key entries
    Kms = 1,
    /// plain entries
    Item = 2,
}

impl EntryKind {
    /// Stored integer value.
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    /// Parse a stored integer value.
    pub fn from_i64(kind: i64) -> AskarResult<Self> {
        match kind {
            1 => Ok(Self::Kms),
            2 => Ok(Self::Item),
            _ => Err(err_unexpected(format!("unknown entry kind {kind}"))),
        }
    }
}

/// The mutation applied by an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOperation {
    /// fail with `Duplicate` if present
    Insert,
    /// upsert
    Replace,
    /// fail with `NotFound` if absent
    Remove,
}

/// Result ordering. Ties cannot occur since ids are unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    /// insertion order
    #[default]
    Id,
}

impl std::str::FromStr for OrderBy {
    type Err = OneErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "id" => Ok(Self::Id),
            _ => Err(err_input(format!("Unsupported ordering: {s}"))),
        }
    }
}

/// A tag attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryTag {
    /// Stored encrypted, supports equality filters only.
    Encrypted(String, String),
    /// Stored with a plaintext value, supports range and `$like`.
    Plaintext(String, String),
}

impl EntryTag {
    /// Tag name without the `~` marker.
    pub fn name(&self) -> &str {
        match self {
            Self::Encrypted(name, _) | Self::Plaintext(name, _) => name,
        }
    }

    /// Tag value.
    pub fn value(&self) -> &str {
        match self {
            Self::Encrypted(_, value) | Self::Plaintext(_, value) => value,
        }
    }

    /// Whether the value is stored in plaintext.
    pub fn is_plaintext(&self) -> bool {
        matches!(self, Self::Plaintext(..))
    }

    fn from_name(name: &str, value: String) -> Self {
        match name.strip_prefix('~') {
            Some(name) => Self::Plaintext(name.to_string(), value),
            None => Self::Encrypted(name.to_string(), value),
        }
    }
}

/// Parse a JSON tag object. Names prefixed with `~` are plaintext tags,
/// and an array value yields one tag per element.
pub fn tags_from_json(json: &str) -> AskarResult<Vec<EntryTag>> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| err_input(format!("invalid tags JSON: {e}")))?;
    tags_from_value(&value)
}

/// Parse tags from a JSON value, see [`tags_from_json`].
pub fn tags_from_value(value: &serde_json::Value) -> AskarResult<Vec<EntryTag>> {
    use serde_json::Value;
    let map = match value {
        Value::Object(map) => map,
        Value::Null => return Ok(Vec::new()),
        _ => return Err(err_input("tags must be a JSON object")),
    };
    let mut out = Vec::with_capacity(map.len());
    for (name, value) in map {
        match value {
            Value::String(s) => out.push(EntryTag::from_name(name, s.clone())),
            Value::Array(list) => {
                for item in list {
                    match item {
                        Value::String(s) => {
                            out.push(EntryTag::from_name(name, s.clone()))
                        }
                        _ => {
                            return Err(err_input(format!(
                                "tag {name} must have string values"
                            )))
                        }
                    }
                }
            }
            _ => {
                return Err(err_input(format!(
                    "tag {name} must have string values"
                )))
            }
        }
    }
    Ok(out)
}

/// Encode tags as a JSON object, grouping repeated names into arrays.
pub fn tags_to_value(tags: &[EntryTag]) -> serde_json::Value {
    use serde_json::{Map, Value};
    let mut map = Map::new();
    for tag in tags {
        let name = if tag.is_plaintext() {
            format!("~{}", tag.name())
        } else {
            tag.name().to_string()
        };
        let value = Value::String(tag.value().to_string());
        match map.get_mut(&name) {
            None => {
                map.insert(name, value);
            }
            Some(Value::Array(list)) => list.push(value),
            Some(prev) => {
                let first = prev.take();
                *prev = Value::Array(vec![first, value]);
            }
        }
    }
    Value::Object(map)
}

/// A decrypted record.
#[derive(Clone, PartialEq, Eq)]
pub struct Entry {
    /// record category
    pub category: String,
    /// record name, unique within the category
    pub name: String,
    /// record value
    pub value: SecretBytes,
    /// record tags
    pub tags: Vec<EntryTag>,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("category", &self.category)
            .field("name", &self.name)
            .field("value", &"<secret>")
            .field("tags", &self.tags)
            .finish()
    }
}

impl Entry {
    /// Construct an entry.
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        value: impl AsRef<[u8]>,
        tags: Vec<EntryTag>,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            value: askar_crypto::secret_bytes_from(value.as_ref()),
            tags,
        }
    }

    /// Sorted copy of the tags, for order-independent comparison.
    pub fn sorted_tags(&self) -> Vec<EntryTag> {
        let mut tags = self.tags.clone();
        tags.sort();
        tags
    }
}

/// Category under which key entries are stored.
pub const KEY_CATEGORY: &str = "cryptokey";

/// Reserved tag names on key entries.
pub(crate) const KEY_TAG_ALG: &str = "alg";
pub(crate) const KEY_TAG_THUMB: &str = "thumb";
pub(crate) const KEY_USER_TAG_PREFIX: &str = "user:";

/// Serialized key entry value.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct KeyParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub data: Option<Vec<u8>>,
}

impl Drop for KeyParams {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        if let Some(data) = self.data.as_mut() {
            data.zeroize();
        }
    }
}

impl KeyParams {
    pub fn to_bytes(&self) -> AskarResult<SecretBytes> {
        rmp_serde::to_vec_named(self)
            .map(SecretBytes::new)
            .map_err(|e| err_unexpected(format!("key params encoding: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> AskarResult<Self> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| err_unexpected(format!("key params decoding: {e}")))
    }
}

/// A stored key with its metadata.
#[derive(Clone)]
pub struct KeyEntry {
    /// key name
    pub name: String,
    /// algorithm, from the internal `alg` tag
    pub algorithm: Option<KeyAlg>,
    /// free-form metadata
    pub metadata: Option<String>,
    /// optional external reference
    pub reference: Option<String>,
    /// user tags
    pub tags: Vec<EntryTag>,
    jwk: SecretBytes,
}

impl std::fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEntry")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("metadata", &self.metadata)
            .field("reference", &self.reference)
            .field("tags", &self.tags)
            .finish()
    }
}

impl KeyEntry {
    /// Split a decrypted key record into a key entry.
    pub(crate) fn from_entry(entry: Entry) -> AskarResult<Self> {
        let mut params = KeyParams::from_bytes(&entry.value)?;
        let mut algorithm = None;
        let mut tags = Vec::new();
        for tag in entry.tags {
            match &tag {
                EntryTag::Encrypted(name, value) if name == KEY_TAG_ALG => {
                    algorithm = value.parse().ok();
                }
                EntryTag::Encrypted(name, _) if name == KEY_TAG_THUMB => (),
                _ => {
                    if let Some(user) = tag.name().strip_prefix(KEY_USER_TAG_PREFIX) {
                        let user = user.to_string();
                        tags.push(match tag {
                            EntryTag::Encrypted(_, v) => EntryTag::Encrypted(user, v),
                            EntryTag::Plaintext(_, v) => EntryTag::Plaintext(user, v),
                        });
                    }
                }
            }
        }
        let jwk = SecretBytes::new(params.data.take().unwrap_or_default());
        Ok(Self {
            name: entry.name,
            algorithm,
            metadata: params.metadata.take(),
            reference: params.reference.take(),
            tags,
            jwk,
        })
    }

    /// Whether this entry carries key material.
    pub fn is_local(&self) -> bool {
        !self.jwk.is_empty()
    }

    /// Load the stored key.
    pub fn load_local_key(&self) -> AskarResult<askar_crypto::LocalKey> {
        if self.jwk.is_empty() {
            return Err(err_not_found("Key entry has no key material"));
        }
        let jwk = std::str::from_utf8(&self.jwk)
            .map_err(|_| err_unexpected("stored key is not valid JSON"))?;
        askar_crypto::LocalKey::from_jwk(jwk)
    }
}

/// Prefix user tag names on a key entry.
pub(crate) fn key_user_tags(tags: &[EntryTag]) -> Vec<EntryTag> {
    tags.iter()
        .map(|tag| {
            let name = format!("{KEY_USER_TAG_PREFIX}{}", tag.name());
            match tag {
                EntryTag::Encrypted(_, v) => EntryTag::Encrypted(name, v.clone()),
                EntryTag::Plaintext(_, v) => EntryTag::Plaintext(name, v.clone()),
            }
        })
        .collect()
}

/// An encrypted tag as persisted by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncEntryTag {
    /// searchable-encrypted name
    pub name: Vec<u8>,
    /// searchable-encrypted value, or raw value bytes if plaintext
    pub value: Vec<u8>,
    /// plaintext marker
    pub plaintext: bool,
}

/// An encrypted record as persisted by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncEntry {
    /// searchable-encrypted category
    pub category: Vec<u8>,
    /// searchable-encrypted name
    pub name: Vec<u8>,
    /// value ciphertext
    pub value: Vec<u8>,
    /// encrypted tags
    pub tags: Vec<EncEntryTag>,
    /// absolute expiry, unix milliseconds
    pub expiry_ms: Option<i64>,
}

impl EncEntry {
    /// Whether the record is still live at `now_ms`.
    pub fn is_live(&self, now_ms: i64) -> bool {
        self.expiry_ms.map_or(true, |e| e > now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tags_json() {
        let tags =
            tags_from_json(r#"{"a": "1", "~b": "2", "c": ["x", "y"]}"#).unwrap();
        let mut sorted = tags.clone();
        sorted.sort();
        assert_eq!(
            vec![
                EntryTag::Encrypted("a".into(), "1".into()),
                EntryTag::Encrypted("c".into(), "x".into()),
                EntryTag::Encrypted("c".into(), "y".into()),
                EntryTag::Plaintext("b".into(), "2".into()),
            ],
            sorted
        );
        let value = tags_to_value(&tags);
        assert_eq!(serde_json::json!(["x", "y"]), value["c"]);
        assert_eq!(serde_json::json!("2"), value["~b"]);

        assert!(tags_from_json(r#"{"a": 1}"#).is_err());
        assert!(tags_from_json("null").unwrap().is_empty());
    }

    #[test]
    fn expiry() {
        let mut entry = EncEntry {
            category: vec![],
            name: vec![],
            value: vec![],
            tags: vec![],
            expiry_ms: None,
        };
        assert!(entry.is_live(10));
        entry.expiry_ms = Some(10);
        assert!(!entry.is_live(10));
        assert!(entry.is_live(9));
    }
}
