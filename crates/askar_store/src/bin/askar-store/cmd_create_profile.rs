use super::*;

pub(crate) async fn exec(backends: Backends, opt: OptProfile) -> AskarResult<()> {
    let store = open_store(&backends, &opt.open.uri, opt.open.piped).await?;
    let name = store.create_profile(opt.name.as_deref()).await?;
    println!("{name}");
    store.close().await
}
