// pool futures must be 'static + Send, which async fn can't state
#![allow(clippy::manual_async_fn)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(warnings)]
//! askar store on sqlite
//!
//! Registers the `sqlite://` backend alongside the in-memory one, and
//! provides the indy-sdk wallet migration and the `askar-store` binary.
//!
//! ```
//! # use askar_store::dependencies::*;
//! # use askar_store_api::prelude::*;
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() -> AskarResult<()> {
//! let backends = askar_store::default_backends(StoreConfig::default());
//! let store = Store::provision(
//!     &backends,
//!     "sqlite://:memory:",
//!     StoreKeyMethod::RawKey,
//!     PassKey::from(generate_raw_key(None)?),
//!     None,
//!     false,
//! )
//! .await?;
//! assert_eq!(1, store.list_profiles().await?.len());
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

/// Re-exported dependencies.
pub mod dependencies {
    pub use askar_store_api;
    pub use askar_store_api::dependencies::*;
    pub use rusqlite;
}

use askar_store_api::handles::*;
use askar_store_api::*;

mod sql;

pub mod sqlite;

pub mod migrate;

/// Backends for the in-memory and sqlite schemes.
pub fn default_backends(config: StoreConfig) -> askar_store_api::backend::Backends {
    askar_store_api::backend::Backends::new(config)
        .with_backend("sqlite", sqlite::create_sqlite_backend_factory())
}

/// Call-contract entry for [`migrate::migrate_indy_sdk`]. `kdf_level` is
/// one of `RAW`, `ARGON2I_MOD` or `ARGON2I_INT`.
pub fn migrate_indy_sdk_call<Cb>(
    ctx: &AskarContext,
    spec_uri: String,
    wallet_name: String,
    wallet_key: String,
    kdf_level: &str,
    id: CallbackId,
    cb: Cb,
) -> ErrorCode
where
    Cb: FnOnce(CallbackId, ErrorCode, Option<()>) + 'static + Send,
{
    let kdf_level: migrate::IndyKdfLevel = match kdf_level.parse() {
        Ok(level) => level,
        Err(err) => return set_current_error(&err),
    };
    let config = ctx.backends().config();
    ctx.spawn_call(
        id,
        async move {
            migrate::migrate_indy_sdk(&spec_uri, &wallet_name, &wallet_key, kdf_level, config)
                .await
        },
        cb,
    )
}

/// Common imports.
pub mod prelude {
    pub use crate::default_backends;
    pub use crate::migrate::{migrate_indy_sdk, IndyKdfLevel};
    pub use askar_store_api::prelude::*;
}
