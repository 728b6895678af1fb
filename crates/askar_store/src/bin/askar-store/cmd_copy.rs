use super::*;

pub(crate) async fn exec(backends: Backends, opt: OptCopy) -> AskarResult<()> {
    let OptCopy {
        piped,
        key_method,
        recreate,
        uri,
        target_uri,
    } = opt;

    let (pass, target_pass) = if key_method == StoreKeyMethod::Unprotected {
        (read_passphrase(piped, "\n# store passphrase> ").await?, PassKey::empty())
    } else {
        let mut list = read_passphrases(
            piped,
            &["\n# store passphrase> ", "\n# target store passphrase> "],
        )
        .await?;
        let target_pass = list.pop();
        match (list.pop(), target_pass) {
            (Some(pass), Some(target_pass)) => (pass, target_pass),
            _ => return Err(ErrorKind::Unexpected.err("passphrases not read")),
        }
    };

    let store = Store::open(&backends, &uri, None, pass, None).await?;
    let target = store
        .copy_to(&backends, &target_uri, key_method, target_pass, recreate)
        .await?;

    println!(
        "\n# askar-store copy complete, {} profiles",
        target.list_profiles().await?.len()
    );

    target.close().await?;
    store.close().await
}
