use super::*;

pub(crate) async fn exec(backends: Backends, opt: OptProfile) -> AskarResult<()> {
    let name = opt
        .name
        .ok_or_else(|| ErrorKind::Input.err("a profile name is required"))?;
    let store = open_store(&backends, &opt.open.uri, opt.open.piped).await?;
    if !store.remove_profile(&name).await? {
        store.close().await?;
        return Err(ErrorKind::NotFound.err(format!("Profile not found: {name}")));
    }
    println!("\n# askar-store removed profile {name}");
    store.close().await
}
