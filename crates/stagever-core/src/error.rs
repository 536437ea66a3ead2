//! Error types for stagever-core

use thiserror::Error;

use crate::policy::PolicyError;
use crate::store::StoreError;
use crate::tracker::TrackerError;
use crate::version::VersionError;

/// Errors that can occur when working with configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error("invalid configuration: {0}")]
    Deserialize(#[from] Box<figment::Error>),
}

/// Result type alias using [`ConfigError`].
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors surfaced by the event handlers of [`VersionEngine`](crate::engine::VersionEngine).
#[derive(Error, Debug)]
pub enum EngineError {
    /// The repository has no configuration record.
    #[error("no configuration for repository {repository_id}")]
    ConfigNotFound {
        /// The requested repository.
        repository_id: String,
    },

    /// The repository's stored policy is unusable.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// A release tag is not a semantic version.
    #[error("release tag {tag:?} is not a valid version: {source}")]
    InvalidVersionFormat {
        /// The tag as received.
        tag: String,
        /// Why it did not parse.
        source: VersionError,
    },

    /// The next version could not be computed.
    #[error("version calculation failed: {0}")]
    VersionCalculation(#[from] VersionError),

    /// Promotion found nothing to promote and fallback is disabled.
    #[error("no development version to promote for repository {repository_id}")]
    PromotionSourceMissing {
        /// The repository being promoted.
        repository_id: String,
    },

    /// The version store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An issue tracker collaborator failed.
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl From<PolicyError> for EngineError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::NotFound { repository_id } => Self::ConfigNotFound { repository_id },
            PolicyError::Invalid { .. } => Self::InvalidPolicy(err.to_string()),
            PolicyError::Tracker(e) => Self::Tracker(e),
        }
    }
}

/// Result type alias using [`EngineError`].
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_errors_map_to_engine_errors() {
        let err: EngineError = PolicyError::NotFound {
            repository_id: "web".into(),
        }
        .into();
        assert!(matches!(
            err,
            EngineError::ConfigNotFound { repository_id } if repository_id == "web"
        ));

        let err: EngineError = PolicyError::Invalid {
            repository_id: "web".into(),
            message: "bad".into(),
        }
        .into();
        assert!(matches!(err, EngineError::InvalidPolicy(ref m) if m.contains("bad")));
    }
}
