//! Error kinds shared by every askar crate.
//!
//! Errors are plain [`OneErr`] values whose string kind is one of the
//! [`ErrorKind`] variants, so they can cross crate boundaries (and be
//! translated into numeric codes) without a dedicated error enum.

pub use one_err::OneErr;

/// Askar result type.
pub type AskarResult<T> = Result<T, OneErr>;

/// The error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Underlying storage failure.
    Backend,

    /// Lock or timeout contention.
    Busy,

    /// Uniqueness violation.
    Duplicate,

    /// Wrong key or authenticated decryption failure.
    Encryption,

    /// Invalid argument.
    Input,

    /// Operation on a closed, freed or otherwise invalid handle.
    InvalidState,

    /// Missing store, profile or record.
    NotFound,

    /// Internal failure.
    Unexpected,

    /// Unknown or incompatible algorithm.
    Unsupported,

    /// Caller-synthesized error.
    Custom,
}

impl ErrorKind {
    /// All kinds, in code order.
    pub const ALL: &'static [ErrorKind] = &[
        ErrorKind::Backend,
        ErrorKind::Busy,
        ErrorKind::Duplicate,
        ErrorKind::Encryption,
        ErrorKind::Input,
        ErrorKind::InvalidState,
        ErrorKind::NotFound,
        ErrorKind::Unexpected,
        ErrorKind::Unsupported,
        ErrorKind::Custom,
    ];

    /// The `one_err` string kind for this variant.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Backend => "Backend",
            Self::Busy => "Busy",
            Self::Duplicate => "Duplicate",
            Self::Encryption => "Encryption",
            Self::Input => "Input",
            Self::InvalidState => "InvalidState",
            Self::NotFound => "NotFound",
            Self::Unexpected => "Unexpected",
            Self::Unsupported => "Unsupported",
            Self::Custom => "Custom",
        }
    }

    /// Numeric code reported across the call boundary.
    pub const fn code(&self) -> i64 {
        match self {
            Self::Backend => 1,
            Self::Busy => 2,
            Self::Duplicate => 3,
            Self::Encryption => 4,
            Self::Input | Self::InvalidState => 5,
            Self::NotFound => 6,
            Self::Unexpected => 7,
            Self::Unsupported => 8,
            Self::Custom => 100,
        }
    }

    /// Classify an error. Foreign kinds are `Unexpected`.
    pub fn of(err: &OneErr) -> Self {
        let kind = err.str_kind();
        Self::ALL
            .iter()
            .find(|k| k.as_str() == kind)
            .copied()
            .unwrap_or(Self::Unexpected)
    }

    /// Construct an error of this kind.
    pub fn err<M: std::fmt::Display>(&self, msg: M) -> OneErr {
        OneErr::with_message(self.as_str(), msg.to_string())
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extension for checking the kind of an error.
pub trait OneErrKindExt {
    /// Get the [`ErrorKind`] of this error.
    fn kind(&self) -> ErrorKind;
}

impl OneErrKindExt for OneErr {
    fn kind(&self) -> ErrorKind {
        ErrorKind::of(self)
    }
}

pub(crate) fn err_input<M: std::fmt::Display>(msg: M) -> OneErr {
    ErrorKind::Input.err(msg)
}

pub(crate) fn err_unsupported<M: std::fmt::Display>(msg: M) -> OneErr {
    ErrorKind::Unsupported.err(msg)
}

pub(crate) fn err_encryption<M: std::fmt::Display>(msg: M) -> OneErr {
    ErrorKind::Encryption.err(msg)
}
