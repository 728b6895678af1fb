// random key generation is not a sensible Default
#![allow(clippy::new_without_default)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(warnings)]
//! Askar encrypted, profile-partitioned entry store.
//!
//! A [`Store`] is opened against a storage [`Backend`] selected by URI
//! scheme from an explicit [`Backends`] registry. Entries are encrypted
//! with per-profile keys before they reach the backend, so backends only
//! ever see ciphertext.
//!
//! ```
//! # use askar_store_api::prelude::*;
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() -> AskarResult<()> {
//! let backends = Backends::default();
//! let store = Store::provision(
//!     &backends,
//!     "memory://doc",
//!     StoreKeyMethod::RawKey,
//!     PassKey::from(generate_raw_key(None)?),
//!     None,
//!     false,
//! )
//! .await?;
//! let mut session = store.session(None).await?;
//! session.insert("cat", "name", b"value", None, None).await?;
//! assert_eq!(1, session.count(Some("cat"), None).await?);
//! session.close().await?;
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

/// Re-exported dependencies.
pub mod dependencies {
    pub use askar_crypto;
    pub use futures;
    pub use one_err;
    pub use rmp_serde;
    pub use serde;
    pub use serde_json;
    pub use serde_yaml;
    pub use tokio;
    pub use tracing;
    pub use url;
}

use dependencies::tracing::*;

mod error;
pub use error::*;

mod config;
pub use config::*;

pub mod types;

pub mod wql;

pub mod store_key;

pub mod backend;

pub mod mem_store;

mod store;
pub use store::*;

mod session;
pub use session::*;

mod scan;
pub use scan::*;

pub mod handles;

/// Common imports.
pub mod prelude {
    pub use crate::backend::{Backend, BackendFactory, Backends, StoreUri};
    pub use crate::store_key::{generate_raw_key, PassKey, StoreKeyMethod};
    pub use crate::types::*;
    pub use crate::wql::TagFilter;
    pub use crate::*;
    pub use askar_crypto::kdf::Argon2Parameters;
    pub use askar_crypto::{KeyAlg, KeyBackend, LocalKey};
}

/// Current unix time in milliseconds, the clock entry expiry is measured on.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
