pub use askar_crypto::error::{AskarResult, ErrorKind, OneErr, OneErrKindExt};
use std::cell::RefCell;

/// Numeric result codes reported across the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[repr(i64)]
pub enum ErrorCode {
    /// no error
    Success = 0,
    /// storage failure
    Backend = 1,
    /// lock or timeout contention
    Busy = 2,
    /// uniqueness violation
    Duplicate = 3,
    /// wrong key or decryption failure
    Encryption = 4,
    /// invalid argument or invalid handle
    Input = 5,
    /// missing record
    NotFound = 6,
    /// internal failure
    Unexpected = 7,
    /// unknown algorithm
    Unsupported = 8,
    /// caller-synthesized error
    Custom = 100,
}

impl ErrorCode {
    /// Code for an error kind. `InvalidState` reports as `Input`.
    pub fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Backend => Self::Backend,
            ErrorKind::Busy => Self::Busy,
            ErrorKind::Duplicate => Self::Duplicate,
            ErrorKind::Encryption => Self::Encryption,
            ErrorKind::Input | ErrorKind::InvalidState => Self::Input,
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::Unexpected => Self::Unexpected,
            ErrorKind::Unsupported => Self::Unsupported,
            ErrorKind::Custom => Self::Custom,
        }
    }

    /// The raw numeric value.
    pub fn code(&self) -> i64 {
        *self as i64
    }
}

impl From<&OneErr> for ErrorCode {
    fn from(err: &OneErr) -> Self {
        Self::from_kind(err.kind())
    }
}

/// The most recent error recorded on this thread.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CurrentError {
    /// numeric code
    pub code: i64,
    /// error kind
    pub kind: String,
    /// error message
    pub message: String,
}

impl CurrentError {
    /// JSON encoding, `{"code":..,"kind":..,"message":..}`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

thread_local! {
    static CURRENT_ERROR: RefCell<Option<CurrentError>> = const { RefCell::new(None) };
}

/// Record `err` as this thread's current error and return its code.
pub fn set_current_error(err: &OneErr) -> ErrorCode {
    let code = ErrorCode::from(err);
    let current = CurrentError {
        code: code.code(),
        kind: err.str_kind().to_string(),
        message: err
            .get_message()
            .map(|m| m.to_string())
            .unwrap_or_else(|| err.to_string()),
    };
    CURRENT_ERROR.with(|c| *c.borrow_mut() = Some(current));
    code
}

/// The most recently recorded error on the calling thread, if any.
///
/// Subsequent failures on the same thread overwrite it.
pub fn get_current_error() -> Option<CurrentError> {
    CURRENT_ERROR.with(|c| c.borrow().clone())
}

pub(crate) fn err_backend<M: std::fmt::Display>(msg: M) -> OneErr {
    ErrorKind::Backend.err(msg)
}

pub(crate) fn err_busy<M: std::fmt::Display>(msg: M) -> OneErr {
    ErrorKind::Busy.err(msg)
}

pub(crate) fn err_duplicate<M: std::fmt::Display>(msg: M) -> OneErr {
    ErrorKind::Duplicate.err(msg)
}

pub(crate) fn err_encryption<M: std::fmt::Display>(msg: M) -> OneErr {
    ErrorKind::Encryption.err(msg)
}

pub(crate) fn err_input<M: std::fmt::Display>(msg: M) -> OneErr {
    ErrorKind::Input.err(msg)
}

pub(crate) fn err_invalid_state<M: std::fmt::Display>(msg: M) -> OneErr {
    ErrorKind::InvalidState.err(msg)
}

pub(crate) fn err_not_found<M: std::fmt::Display>(msg: M) -> OneErr {
    ErrorKind::NotFound.err(msg)
}

pub(crate) fn err_unexpected<M: std::fmt::Display>(msg: M) -> OneErr {
    ErrorKind::Unexpected.err(msg)
}

pub(crate) fn err_unsupported<M: std::fmt::Display>(msg: M) -> OneErr {
    ErrorKind::Unsupported.err(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_error_side_channel() {
        assert_eq!(
            ErrorCode::Duplicate,
            set_current_error(&ErrorKind::Duplicate.err("dup"))
        );
        let code = set_current_error(&ErrorKind::InvalidState.err("Invalid handle"));
        assert_eq!(ErrorCode::Input, code);
        let current = get_current_error().unwrap();
        assert_eq!(5, current.code);
        assert_eq!("InvalidState", current.kind);
        assert_eq!("Invalid handle", current.message);
        assert!(current.to_json().contains("\"code\":5"));

        // other threads see their own slot
        std::thread::spawn(|| assert!(get_current_error().is_none()))
            .join()
            .unwrap();
    }
}
