//! Error taxonomy for the reconciliation core.
//!
//! Every failure is point-in-time: nothing here is retried by the core.
//! [`EnroberError::class`] folds the variants into the handful of outcomes
//! the REST surface distinguishes.

use std::fmt;

use enrober_state::StateError;
use thiserror::Error;

/// Result type alias for core operations.
pub type EnroberResult<T> = Result<T, EnroberError>;

/// Which step of a deployment cascade delete failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeStage {
    ReadDeployment,
    ReplicaSets,
    Pods,
    Deployment,
}

impl fmt::Display for CascadeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CascadeStage::ReadDeployment => "read deployment",
            CascadeStage::ReplicaSets => "delete replica sets",
            CascadeStage::Pods => "delete pods",
            CascadeStage::Deployment => "delete deployment",
        })
    }
}

/// Coarse outcome of an error, used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input. No store mutation was attempted.
    Validation,
    /// An invariant (hostname, selector, name) would be violated.
    Conflict,
    NotFound,
    /// No credentials were presented.
    Unauthenticated,
    /// Credentials were presented and rejected.
    Forbidden,
    /// The store or an external service failed.
    Upstream,
}

#[derive(Debug, Error)]
pub enum EnroberError {
    // ── Validation ────────────────────────────────────────────────
    #[error("invalid hostname: {0}")]
    InvalidHostname(String),

    #[error("no publicHosts or privateHosts given")]
    MissingRoutingTarget,

    #[error("no pts or ptsURL given")]
    MissingTemplate,

    #[error("pod template has no \"{0}\" label")]
    MissingSelectorLabel(String),

    #[error("invalid environment name: {0}")]
    InvalidEnvironmentName(String),

    #[error("invalid deployment name: {0:?}")]
    InvalidDeploymentName(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("privileged containers are not allowed: {0}")]
    PrivilegedContainer(String),

    #[error("attempting to use pod template from unauthorized host: {host}, expected: {expected}")]
    UnauthorizedOrigin { host: String, expected: String },

    // ── Conflict ──────────────────────────────────────────────────
    #[error("duplicate hostname: {0}")]
    DuplicateHost(String),

    #[error("LabelSelector {0} already exists")]
    SelectorConflict(String),

    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: &'static str, name: String },

    // ── Not found ─────────────────────────────────────────────────
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: &'static str, name: String },

    // ── Caller identity ───────────────────────────────────────────
    #[error("missing Authorization header")]
    MissingCredentials,

    #[error("caller is not an admin of organization {0}")]
    Forbidden(String),

    // ── Upstream ──────────────────────────────────────────────────
    #[error("pod template fetch failed: {0}")]
    Fetch(String),

    #[error("key-value map sync failed: {0}")]
    KvmSync(String),

    #[error("admin check failed: {0}")]
    AdminCheck(String),

    #[error("failed to obtain secure randomness: {0}")]
    Entropy(String),

    #[error("cascade delete failed at {stage}: {source}")]
    Cascade {
        stage: CascadeStage,
        #[source]
        source: Box<EnroberError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    State(#[from] StateError),
}

impl EnroberError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn cascade(stage: CascadeStage, source: impl Into<EnroberError>) -> Self {
        Self::Cascade {
            stage,
            source: Box::new(source.into()),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            EnroberError::InvalidHostname(_)
            | EnroberError::MissingRoutingTarget
            | EnroberError::MissingTemplate
            | EnroberError::MissingSelectorLabel(_)
            | EnroberError::InvalidEnvironmentName(_)
            | EnroberError::InvalidDeploymentName(_)
            | EnroberError::InvalidBody(_)
            | EnroberError::PrivilegedContainer(_)
            | EnroberError::UnauthorizedOrigin { .. } => ErrorClass::Validation,

            EnroberError::DuplicateHost(_)
            | EnroberError::SelectorConflict(_)
            | EnroberError::AlreadyExists { .. } => ErrorClass::Conflict,

            EnroberError::NotFound { .. } => ErrorClass::NotFound,

            EnroberError::MissingCredentials => ErrorClass::Unauthenticated,
            EnroberError::Forbidden(_) => ErrorClass::Forbidden,

            // A cascade whose first read found nothing is a plain 404.
            EnroberError::Cascade {
                stage: CascadeStage::ReadDeployment,
                source,
            } if source.class() == ErrorClass::NotFound => ErrorClass::NotFound,

            EnroberError::State(StateError::NotFound { .. }) => ErrorClass::NotFound,
            EnroberError::State(StateError::AlreadyExists { .. }) => ErrorClass::Conflict,

            EnroberError::Fetch(_)
            | EnroberError::KvmSync(_)
            | EnroberError::AdminCheck(_)
            | EnroberError::Entropy(_)
            | EnroberError::Cascade { .. }
            | EnroberError::Config(_)
            | EnroberError::State(_) => ErrorClass::Upstream,
        }
    }
}
