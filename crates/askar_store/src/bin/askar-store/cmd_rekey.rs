use super::*;

pub(crate) async fn exec(backends: Backends, opt: OptRekey) -> AskarResult<()> {
    let OptRekey {
        piped,
        key_method,
        uri,
    } = opt;

    let (pass, new_pass) = if key_method == StoreKeyMethod::Unprotected {
        (read_passphrase(piped, "\n# store passphrase> ").await?, PassKey::empty())
    } else {
        let mut list = read_passphrases(
            piped,
            &["\n# store passphrase> ", "\n# new store passphrase> "],
        )
        .await?;
        let new_pass = list.pop();
        match (list.pop(), new_pass) {
            (Some(pass), Some(new_pass)) => (pass, new_pass),
            _ => return Err(ErrorKind::Unexpected.err("passphrases not read")),
        }
    };

    let store = Store::open(&backends, &uri, None, pass, None).await?;
    store.rekey(key_method, new_pass).await?;

    println!("\n# askar-store rekey complete: {key_method}");

    store.close().await
}
