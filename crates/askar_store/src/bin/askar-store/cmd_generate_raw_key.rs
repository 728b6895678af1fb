use super::*;

pub(crate) async fn exec(opt: OptGenerateRawKey) -> AskarResult<()> {
    let key = generate_raw_key(opt.seed.as_deref().map(str::as_bytes))?;
    println!("{key}");
    Ok(())
}
