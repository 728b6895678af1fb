#![deny(missing_docs)]
#![deny(unsafe_code)]

//! askar store administration binary

use askar_store::dependencies::*;
use askar_store::prelude::*;
use structopt::StructOpt;

mod cmd_copy;
mod cmd_create_profile;
mod cmd_generate_raw_key;
mod cmd_list_profiles;
mod cmd_migrate_indy_sdk;
mod cmd_provision;
mod cmd_rekey;
mod cmd_remove_profile;

pub(crate) async fn read_interactive_passphrase(prompt: &str) -> AskarResult<PassKey> {
    let prompt = prompt.to_owned();
    let pass = tokio::task::spawn_blocking(move || {
        rpassword::prompt_password(prompt).map_err(OneErr::new)
    })
    .await
    .map_err(OneErr::new)??;
    Ok(PassKey::from(pass))
}

/// Read `count` newline delimited passphrases from stdin.
pub(crate) async fn read_piped_passphrases(count: usize) -> AskarResult<Vec<PassKey>> {
    use tokio::io::AsyncReadExt;

    let mut stdin = tokio::io::stdin();
    let mut pass_tmp = zeroize::Zeroizing::new(Vec::new());
    stdin.read_to_end(&mut pass_tmp).await.map_err(OneErr::new)?;

    let text = std::str::from_utf8(&pass_tmp)
        .map_err(|_| ErrorKind::Input.err("piped passphrases must be utf8"))?;
    let list: Vec<PassKey> = text
        .split('\n')
        .take(count)
        .map(|line| PassKey::from(line.strip_suffix('\r').unwrap_or(line)))
        .collect();
    if list.len() != count {
        return Err(ErrorKind::Input.err(format!(
            "expected {count} newline delimited passphrases"
        )));
    }
    Ok(list)
}

/// One passphrase per prompt, interactively or piped.
pub(crate) async fn read_passphrases(
    piped: bool,
    prompts: &[&str],
) -> AskarResult<Vec<PassKey>> {
    if piped {
        return read_piped_passphrases(prompts.len()).await;
    }
    let mut out = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        out.push(read_interactive_passphrase(prompt).await?);
    }
    Ok(out)
}

/// Read a single passphrase.
pub(crate) async fn read_passphrase(piped: bool, prompt: &str) -> AskarResult<PassKey> {
    let mut list = read_passphrases(piped, &[prompt]).await?;
    list.pop()
        .ok_or_else(|| ErrorKind::Unexpected.err("no passphrase read"))
}

/// Open an existing store using its stored key method.
pub(crate) async fn open_store(
    backends: &Backends,
    uri: &str,
    piped: bool,
) -> AskarResult<Store> {
    let pass = read_passphrase(piped, "\n# store passphrase> ").await?;
    Store::open(backends, uri, None, pass, None).await
}

#[derive(Debug, StructOpt)]
pub(crate) struct OptOpen {
    /// Instead of the normal "interactive" method of passphrase
    /// retrieval, read the passphrase from stdin. Be careful
    /// how you make use of this, as it could be less secure,
    /// for example, make sure it is not saved in your
    /// `~/.bash_history`.
    #[structopt(short = "p", long, verbatim_doc_comment)]
    pub piped: bool,

    /// The store uri, `sqlite://<path>`.
    #[structopt(verbatim_doc_comment)]
    pub uri: String,
}

#[derive(Debug, StructOpt)]
pub(crate) struct OptProvision {
    /// Instead of the normal "interactive" method of passphrase
    /// retrieval, read the passphrase from stdin. Be careful
    /// how you make use of this, as it could be less secure,
    /// for example, make sure it is not saved in your
    /// `~/.bash_history`.
    #[structopt(short = "p", long, verbatim_doc_comment)]
    pub piped: bool,

    /// How the store key is derived from the passphrase:
    /// `kdf:argon2i:mod`, `kdf:argon2i:int`, `raw` or `none`.
    /// A `raw` passphrase is a key from 'askar-store generate-raw-key'.
    #[structopt(short = "k", long, default_value = "kdf:argon2i:mod", verbatim_doc_comment)]
    pub key_method: StoreKeyMethod,

    /// Name of the initial default profile.
    /// A random name is generated if not given.
    #[structopt(long, verbatim_doc_comment)]
    pub profile: Option<String>,

    /// Replace an existing store at this uri.
    #[structopt(long, verbatim_doc_comment)]
    pub recreate: bool,

    /// The store uri, `sqlite://<path>`.
    #[structopt(verbatim_doc_comment)]
    pub uri: String,
}

#[derive(Debug, StructOpt)]
pub(crate) struct OptRekey {
    /// Instead of the normal "interactive" method of passphrase
    /// retrieval, read the passphrases from stdin. Be careful
    /// how you make use of this, as it could be less secure.
    /// Passphrases are newline delimited in this order:
    /// - 1 - current store passphrase
    /// - 2 - new store passphrase
    ///       (unless -k / --key-method is `none`)
    #[structopt(short = "p", long, verbatim_doc_comment)]
    pub piped: bool,

    /// The new key method, see 'askar-store provision --help'.
    #[structopt(short = "k", long, default_value = "kdf:argon2i:mod", verbatim_doc_comment)]
    pub key_method: StoreKeyMethod,

    /// The store uri, `sqlite://<path>`.
    #[structopt(verbatim_doc_comment)]
    pub uri: String,
}

#[derive(Debug, StructOpt)]
pub(crate) struct OptCopy {
    /// Instead of the normal "interactive" method of passphrase
    /// retrieval, read the passphrases from stdin. Be careful
    /// how you make use of this, as it could be less secure.
    /// Passphrases are newline delimited in this order:
    /// - 1 - source store passphrase
    /// - 2 - target store passphrase
    ///       (unless -k / --key-method is `none`)
    #[structopt(short = "p", long, verbatim_doc_comment)]
    pub piped: bool,

    /// The target key method, see 'askar-store provision --help'.
    #[structopt(short = "k", long, default_value = "kdf:argon2i:mod", verbatim_doc_comment)]
    pub key_method: StoreKeyMethod,

    /// Replace an existing store at the target uri.
    #[structopt(long, verbatim_doc_comment)]
    pub recreate: bool,

    /// The source store uri.
    #[structopt(verbatim_doc_comment)]
    pub uri: String,

    /// The target store uri.
    #[structopt(verbatim_doc_comment)]
    pub target_uri: String,
}

#[derive(Debug, StructOpt)]
pub(crate) struct OptProfile {
    #[structopt(flatten)]
    pub open: OptOpen,

    /// The profile name.
    #[structopt(verbatim_doc_comment)]
    pub name: Option<String>,
}

#[derive(Debug, StructOpt)]
pub(crate) struct OptGenerateRawKey {
    /// Derive the key deterministically from this seed.
    #[structopt(short = "s", long, verbatim_doc_comment)]
    pub seed: Option<String>,
}

#[derive(Debug, StructOpt)]
pub(crate) struct OptMigrateIndySdk {
    /// Instead of the normal "interactive" method of wallet
    /// key retrieval, read the wallet key from stdin.
    #[structopt(short = "p", long, verbatim_doc_comment)]
    pub piped: bool,

    /// The wallet key derivation:
    /// `RAW`, `ARGON2I_MOD` or `ARGON2I_INT`.
    #[structopt(long, default_value = "ARGON2I_MOD", verbatim_doc_comment)]
    pub kdf_level: IndyKdfLevel,

    /// Path to the indy-sdk wallet sqlite file.
    #[structopt(verbatim_doc_comment)]
    pub wallet_path: std::path::PathBuf,

    /// The wallet name, used as the default profile name.
    #[structopt(verbatim_doc_comment)]
    pub wallet_name: String,
}

#[derive(Debug, StructOpt)]
enum Cmd {
    /// Create a new store.
    #[structopt(verbatim_doc_comment)]
    Provision(OptProvision),

    /// Change the store passphrase and / or key method.
    /// Every profile key is re-wrapped in one atomic update.
    #[structopt(verbatim_doc_comment)]
    Rekey(OptRekey),

    /// Copy every profile of a store into a new store.
    #[structopt(verbatim_doc_comment)]
    Copy(OptCopy),

    /// Print the profile names of a store, one per line.
    #[structopt(verbatim_doc_comment)]
    ListProfiles(OptOpen),

    /// Add a profile to a store, printing its name.
    #[structopt(verbatim_doc_comment)]
    CreateProfile(OptProfile),

    /// Remove a profile and every entry in it.
    /// The default profile cannot be removed.
    #[structopt(verbatim_doc_comment)]
    RemoveProfile(OptProfile),

    /// Print a new base58 raw store key.
    #[structopt(verbatim_doc_comment)]
    GenerateRawKey(OptGenerateRawKey),

    /// Convert an indy-sdk wallet into a store, in place.
    #[structopt(verbatim_doc_comment)]
    MigrateIndySdk(OptMigrateIndySdk),
}

#[derive(Debug, StructOpt)]
#[structopt(about = "askar encrypted store administration")]
struct Opt {
    /// Store runtime config yaml (busyTimeoutMs, maxConnections,
    /// scanPageSize).
    #[structopt(short = "c", long, env = "ASKAR_STORE_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// The subcommand to execute
    #[structopt(subcommand)]
    cmd: Cmd,
}

async fn get_config(config_n: Option<std::path::PathBuf>) -> AskarResult<StoreConfig> {
    let config_n = match config_n {
        None => return Ok(StoreConfig::default()),
        Some(config_n) => dunce::canonicalize(&config_n).map_err(|e| {
            ErrorKind::Input.err(format!("Could not find config file {config_n:?} - {e}"))
        })?,
    };

    let bytes = tokio::fs::read(&config_n).await.map_err(|e| {
        ErrorKind::Input.err(format!("Could not read config file {config_n:?} - {e}"))
    })?;

    StoreConfig::from_bytes(&bytes)
}

async fn exec() -> AskarResult<()> {
    let opt = Opt::from_args();
    let Opt { config, cmd } = opt;
    let backends = default_backends(get_config(config).await?);
    match cmd {
        Cmd::Provision(opt) => cmd_provision::exec(backends, opt).await,
        Cmd::Rekey(opt) => cmd_rekey::exec(backends, opt).await,
        Cmd::Copy(opt) => cmd_copy::exec(backends, opt).await,
        Cmd::ListProfiles(opt) => cmd_list_profiles::exec(backends, opt).await,
        Cmd::CreateProfile(opt) => cmd_create_profile::exec(backends, opt).await,
        Cmd::RemoveProfile(opt) => cmd_remove_profile::exec(backends, opt).await,
        Cmd::GenerateRawKey(opt) => cmd_generate_raw_key::exec(opt).await,
        Cmd::MigrateIndySdk(opt) => cmd_migrate_indy_sdk::exec(backends, opt).await,
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let _ = tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .compact()
            .finish(),
    );

    if let Err(e) = exec().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
