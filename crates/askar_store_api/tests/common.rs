use askar_store_api::dependencies::tracing;
use askar_store_api::prelude::*;

pub fn init_tracing() {
    let _ = tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .compact()
            .finish(),
    );
}

/// Provision a raw-key memory store, returning it with its pass key.
pub async fn provision(backends: &Backends, uri: &str) -> (Store, String) {
    let pass_key = generate_raw_key(None).unwrap();
    let store = Store::provision(
        backends,
        uri,
        StoreKeyMethod::RawKey,
        PassKey::from(pass_key.as_str()),
        Some("default"),
        false,
    )
    .await
    .unwrap();
    (store, pass_key)
}

#[allow(dead_code)]
pub fn tags(json: &str) -> Vec<EntryTag> {
    tags_from_json(json).unwrap()
}
