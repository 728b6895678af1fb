use crate::*;

/// Output length of password derivation.
pub const PASSWORD_KEY_LEN: usize = 32;

/// Minimum salt length accepted.
pub const SALT_MIN_LEN: usize = 8;

/// Argon2 variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Argon2Algorithm {
    /// data-dependent
    Argon2d = 0,
    /// data-independent
    Argon2i = 1,
    /// hybrid
    Argon2id = 2,
}

/// Argon2 version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Argon2Version {
    /// 0x10
    V0x10 = 0x10,
    /// 0x13
    V0x13 = 0x13,
}

/// Full Argon2 cost configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Argon2Config {
    /// variant
    pub algorithm: Argon2Algorithm,
    /// version
    pub version: Argon2Version,
    /// lanes
    pub parallelism: u32,
    /// memory in KiB
    pub mem_cost: u32,
    /// iterations
    pub time_cost: u32,
}

impl Argon2Config {
    /// Low cpu/mem preset.
    pub const INTERACTIVE: Argon2Config = Argon2Config {
        algorithm: Argon2Algorithm::Argon2i,
        version: Argon2Version::V0x13,
        parallelism: 1,
        mem_cost: 32768,
        time_cost: 4,
    };

    /// Middle cpu/mem preset.
    pub const MODERATE: Argon2Config = Argon2Config {
        algorithm: Argon2Algorithm::Argon2i,
        version: Argon2Version::V0x13,
        parallelism: 1,
        mem_cost: 131072,
        time_cost: 6,
    };

    /// Derive a 32 byte key from a password and salt.
    pub fn derive_password(
        &self,
        password: &[u8],
        salt: &[u8],
    ) -> AskarResult<SecretBytes> {
        if salt.len() < SALT_MIN_LEN {
            return Err(err_input("Argon2 salt is too short"));
        }
        let params = ::argon2::Params::new(
            self.mem_cost,
            self.time_cost,
            self.parallelism,
            Some(PASSWORD_KEY_LEN),
        )
        .map_err(|e| err_input(format!("invalid Argon2 parameters: {e}")))?;
        let alg = match self.algorithm {
            Argon2Algorithm::Argon2d => ::argon2::Algorithm::Argon2d,
            Argon2Algorithm::Argon2i => ::argon2::Algorithm::Argon2i,
            Argon2Algorithm::Argon2id => ::argon2::Algorithm::Argon2id,
        };
        let version = match self.version {
            Argon2Version::V0x10 => ::argon2::Version::V0x10,
            Argon2Version::V0x13 => ::argon2::Version::V0x13,
        };
        let mut out = SecretBytes::new(vec![0; PASSWORD_KEY_LEN]);
        ::argon2::Argon2::new(alg, version, params)
            .hash_password_into(password, salt, &mut out)
            .map_err(|e| ErrorKind::Unexpected.err(format!("Argon2 failure: {e}")))?;
        Ok(out)
    }
}

/// Named presets, or a custom configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argon2Parameters {
    /// Middle cpu/mem limits (index 0).
    Moderate,

    /// Low cpu/mem limits (index 1).
    Interactive,

    /// Explicit configuration.
    Custom(Argon2Config),
}

impl Argon2Parameters {
    /// Map a numeric preset index.
    pub fn from_index(index: i32) -> AskarResult<Self> {
        match index {
            0 => Ok(Self::Moderate),
            1 => Ok(Self::Interactive),
            _ => Err(err_input("Unknown Argon2 parameters")),
        }
    }

    /// The effective configuration.
    pub fn config(&self) -> Argon2Config {
        match self {
            Self::Moderate => Argon2Config::MODERATE,
            Self::Interactive => Argon2Config::INTERACTIVE,
            Self::Custom(config) => *config,
        }
    }

    /// Derive a key synchronously.
    pub fn derive_password(
        &self,
        password: &[u8],
        salt: &[u8],
    ) -> AskarResult<SecretBytes> {
        self.config().derive_password(password, salt)
    }

    /// Derive a key on the blocking thread pool.
    pub async fn derive_password_async(
        self,
        password: SecretBytes,
        salt: Vec<u8>,
    ) -> AskarResult<SecretBytes> {
        tokio::task::spawn_blocking(move || self.derive_password(&password, &salt))
            .await
            .map_err(OneErr::new)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactive_fixture() {
        let out = Argon2Parameters::Interactive
            .derive_password(b"my password", b"long enough salt")
            .unwrap();
        assert_eq!(
            "9ef87bcf828c46c0136a0d1d9e391d713f75b327c6dc190455bd36c1bae33259",
            hex::encode(&out[..])
        );
    }

    #[test]
    fn custom_argon2id_fixture() {
        let params = Argon2Parameters::Custom(Argon2Config {
            algorithm: Argon2Algorithm::Argon2id,
            version: Argon2Version::V0x13,
            parallelism: 4,
            mem_cost: 64 * 1024,
            time_cost: 8,
        });
        let out = params
            .derive_password(
                b"000000",
                b"13622169116451511306218218219151372412051474242757211221731116372255771137912226",
            )
            .unwrap();
        assert_eq!(
            "1128133bb2b55a35c801f1dfc99a525cb8ff27a519bcd035f1a07f9a1cf6eae9",
            hex::encode(&out[..])
        );
    }

    #[test]
    fn short_salt_rejected() {
        let err = Argon2Parameters::Interactive
            .derive_password(b"pw", b"short")
            .unwrap_err();
        assert_eq!(ErrorKind::Input, err.kind());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn async_matches_sync() {
        let sync = Argon2Parameters::Interactive
            .derive_password(b"pw", b"0123456789abcdef")
            .unwrap();
        let not_sync = Argon2Parameters::Interactive
            .derive_password_async(secret_bytes_from(b"pw"), b"0123456789abcdef".to_vec())
            .await
            .unwrap();
        assert_eq!(sync, not_sync);
    }
}
