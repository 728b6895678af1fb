use super::*;

pub(crate) async fn exec(backends: Backends, opt: OptMigrateIndySdk) -> AskarResult<()> {
    let OptMigrateIndySdk {
        piped,
        kdf_level,
        wallet_path,
        wallet_name,
    } = opt;

    let wallet_path = dunce::canonicalize(&wallet_path).map_err(|e| {
        ErrorKind::NotFound.err(format!("Wallet not found {wallet_path:?} - {e}"))
    })?;
    let wallet_key = read_passphrase(piped, "\n# wallet key> ").await?;

    println!("\n# askar-store migrating {wallet_path:?}...");

    migrate_indy_sdk(
        &wallet_path.to_string_lossy(),
        &wallet_name,
        wallet_key.as_str(),
        kdf_level,
        backends.config(),
    )
    .await?;

    println!("\n# askar-store migration complete, default profile:");
    println!("{wallet_name}");

    Ok(())
}
