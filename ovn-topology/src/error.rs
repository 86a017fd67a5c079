use thiserror::Error;

/// Classification of everything that can stop a provisioning run. These are raised inside
/// `anyhow::Error` so they can travel with context, and recovered with `downcast_ref` where the
/// kind matters (retry decisions, tests).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// malformed input, found before anything was changed on the host
    #[error("invalid topology: {0}")]
    Validation(String),
    #[error("unusable resource name {name:?}: {reason}")]
    InvalidName {
        name: String,
        reason: String,
    },
    #[error("command ({command}) failed: {stderr}")]
    CommandFailed {
        command: String,
        stderr: String,
        transient: bool,
    },
    #[error("command ({command}) did not finish within {timeout_secs}s")]
    TimedOut {
        command: String,
        timeout_secs: u64,
    },
    #[error("command ({command}) returned output that could not be understood: {output:?}")]
    UnexpectedOutput {
        command: String,
        output: String,
    },
    #[error("no free address left in {range}")]
    Exhausted {
        range: String,
    },
    #[error("expected {what} to exist but it was not found")]
    MissingState {
        what: String,
    },
}

impl ProvisionError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        ProvisionError::Validation(msg.into())
    }

    /// Transient errors are worth retrying, everything else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match &self {
            ProvisionError::CommandFailed { transient, .. } => *transient,
            ProvisionError::TimedOut { .. } => true,
            _ => false,
        }
    }

    /// Whether the command may have been carried out even though it reported an error. A timed
    /// out command was cancelled on our side only, the database may well have committed it.
    pub fn may_have_applied(&self) -> bool {
        matches!(self, ProvisionError::TimedOut { .. })
    }
}

/// Messages printed by `ovn-nbctl`/`ovs-vsctl` when the database could not be reached, rather
/// than when the request itself was wrong.
const TRANSIENT_STDERR: [&str; 4] = [
    "database connection failed",
    "Connection refused",
    "connection attempt failed",
    "Resource temporarily unavailable",
];

pub fn stderr_is_transient(stderr: &str) -> bool {
    TRANSIENT_STDERR.iter().any(|msg| stderr.contains(msg))
}

/// Pull the `ProvisionError` out of an `anyhow::Error` chain, if there is one.
pub fn provision_error(err: &anyhow::Error) -> Option<&ProvisionError> {
    err.chain().find_map(|cause| cause.downcast_ref::<ProvisionError>())
}
