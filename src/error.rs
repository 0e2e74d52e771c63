//! Error taxonomy and exit-code mapping.
//!
//! Most of the crate propagates plain `anyhow::Result` — IO, JSON decoding,
//! and one-off `bail!`s that only need to be logged and turned into a
//! non-zero exit. `UpdataError` exists for the handful of outcomes each
//! binary's `main` must branch on to pick a specific exit code (see
//! spec §6 "Exit codes").

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdataError {
    #[error("main system version could not be determined")]
    MainVersionUnreadable,

    #[error("recovery system version could not be determined")]
    RecoveryVersionUnreadable,

    #[error("reboot failed: {0}")]
    RebootFailed(String),

    #[error("REST API connection failed: {0}")]
    RestConnection(String),

    #[error("no compatibility document available for target version {target}")]
    MissingCompatibilityDocument { target: String },

    #[error("no compatible recovery system revision for target version {target}")]
    NoCompatibleRevision { target: String },

    #[error("{endpoint} reported state {state:?}, expected \"valid\"")]
    RestValidationFailure { endpoint: String, state: String },

    #[error("{what}: {message}")]
    ParseError { what: String, message: String },
}

impl UpdataError {
    /// Maps this error to the process exit code in spec §6. Anything not
    /// explicitly listed there is handled by the `Other` fallback in the
    /// binaries' `main` (any non-zero code not in {10, 20, 23, 24}).
    pub fn exit_code(&self) -> i32 {
        match self {
            UpdataError::RebootFailed(_) => 10,
            UpdataError::RestConnection(_) => 20,
            UpdataError::MainVersionUnreadable => 23,
            UpdataError::RecoveryVersionUnreadable => 24,
            _ => 1,
        }
    }
}

/// Resolves the process exit code for an arbitrary error returned from
/// `main`: downcasts to `UpdataError` where possible, recognizes a bare
/// `reqwest` connection error raised outside of our own taxonomy, and
/// otherwise falls back to a generic non-zero status.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(updata_err) = cause.downcast_ref::<UpdataError>() {
            return updata_err.exit_code();
        }

        if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
            if reqwest_err.is_connect() {
                return 20;
            }
        }
    }

    1
}
