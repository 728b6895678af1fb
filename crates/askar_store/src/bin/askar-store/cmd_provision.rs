use super::*;

pub(crate) async fn exec(backends: Backends, opt: OptProvision) -> AskarResult<()> {
    let OptProvision {
        piped,
        key_method,
        profile,
        recreate,
        uri,
    } = opt;

    let pass = if key_method == StoreKeyMethod::Unprotected {
        PassKey::empty()
    } else {
        read_passphrase(piped, "\n# new store passphrase> ").await?
    };

    println!("\n# askar-store provision {key_method} store...");

    let store = Store::provision(
        &backends,
        &uri,
        key_method,
        pass,
        profile.as_deref(),
        recreate,
    )
    .await?;

    println!("\n# askar-store provision default profile:");
    println!("{}", store.get_default_profile().await?);

    store.close().await
}
