//! The error taxonomy from spec §7, typed with `thiserror` instead of the
//! ad hoc `color_eyre::eyre::bail!` call sites the teacher uses throughout
//! `provisioner.rs`. Each variant carries enough context for an operator to
//! act, and each boundary error exposes `is_retryable`/`is_ignorable` so the
//! orchestrator can decide scheduler feedback without re-deriving policy at
//! every call site.

use thiserror::Error;

/// Error returned by a [`crate::provider::Provider`] implementation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A transient failure (API conflict, timeout, backend flake). The
    /// scheduler's backoff and the next resync will retry.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// A permanent-local failure (missing class, unsupported access modes,
    /// invalid parameters). No retry until the claim/class changes.
    #[error("permanent provider error: {0}")]
    PermanentLocal(String),

    /// The target object does not belong to this provider instance
    /// (identity annotation mismatch). Swallowed without an event.
    #[error("ignorable provider error: {0}")]
    Ignorable(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    pub fn is_ignorable(&self) -> bool {
        matches!(self, ProviderError::Ignorable(_))
    }
}

/// Error surfaced by the provision path (§4.5.1).
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("storage class {0:?} not found")]
    StorageClassNotFound(String),

    #[error("claim requests access modes not supported by the provider: {0:?}")]
    UnsupportedAccessModes(Vec<String>),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The API server rejected every create attempt, and cleaning up the
    /// already-created backend asset also failed. Spec's "Orphaning" kind —
    /// logged, an event is emitted, and no further automatic retry happens.
    #[error("volume create failed after all retries and cleanup also failed: {0}")]
    OrphanedAsset(String),

    #[error("cluster API error: {0}")]
    Api(String),
}

impl ProvisionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProvisionError::Provider(e) => e.is_retryable(),
            ProvisionError::Api(_) => true,
            ProvisionError::StorageClassNotFound(_) => true,
            ProvisionError::UnsupportedAccessModes(_) => false,
            ProvisionError::OrphanedAsset(_) => false,
        }
    }

    pub fn is_ignorable(&self) -> bool {
        matches!(self, ProvisionError::Provider(e) if e.is_ignorable())
    }
}

/// Error surfaced by the delete path (§4.5.2).
#[derive(Debug, Error)]
pub enum DeleteError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("cluster API error: {0}")]
    Api(String),
}

impl DeleteError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DeleteError::Provider(e) => e.is_retryable(),
            DeleteError::Api(_) => true,
        }
    }

    pub fn is_ignorable(&self) -> bool {
        matches!(self, DeleteError::Provider(e) if e.is_ignorable())
    }
}

/// Fatal, process-terminating conditions (spec §7 kind 5): unreachable API at
/// startup, unrecoverable configuration. Never returned from an operation
/// closure — only from bootstrapping code in `main.rs`.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("failed to reach cluster API: {0}")]
    ApiUnreachable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
