use super::*;

pub(crate) async fn exec(backends: Backends, opt: OptOpen) -> AskarResult<()> {
    let store = open_store(&backends, &opt.uri, opt.piped).await?;
    for name in store.list_profiles().await? {
        println!("{name}");
    }
    store.close().await
}
