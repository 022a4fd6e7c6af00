use std::path::PathBuf;

use thiserror::Error;

/// Why no template was selected for an object.
///
/// The first three variants are skip signals: the object is admitted unmodified.
/// [`DecisionError::RequestedSidecarNotFound`] points at a misconfigured manifest.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecisionError {
    #[error("namespace {0} is ignored")]
    IgnoredNamespace(String),

    #[error("object is already injected")]
    AlreadyInjected,

    #[error("object has no injection request annotation")]
    MissingRequestAnnotation,

    #[error("requested sidecar {0:?} is not configured")]
    RequestedSidecarNotFound(String),
}

impl DecisionError {
    /// True for outcomes that mean "leave the object alone".
    pub fn is_skip(&self) -> bool {
        !matches!(self, Self::RequestedSidecarNotFound(_))
    }
}

/// Failures while building the injection patch for a pod.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("pod definition must have a spec")]
    MissingPodSpec,

    #[error("container {0:?} referenced by the template does not exist on the pod")]
    ContainerNotFound(String),

    #[error("container {0:?} already exists on the pod")]
    ContainerNameConflict(String),

    #[error("cannot append to {0}: target is not an array")]
    MissingArray(String),

    #[error("patch operation on {path} does not apply: {reason}")]
    Apply { path: String, reason: String },

    #[error("could not encode patch: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Failures while loading injection templates from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("injection config in {} has no name", .0.display())]
    MissingName(PathBuf),

    #[error("injection config {0:?} is defined more than once")]
    DuplicateName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unknown_sidecar_is_not_a_skip() {
        assert!(DecisionError::IgnoredNamespace("kube-system".into()).is_skip());
        assert!(DecisionError::AlreadyInjected.is_skip());
        assert!(DecisionError::MissingRequestAnnotation.is_skip());
        assert!(!DecisionError::RequestedSidecarNotFound("typo".into()).is_skip());
    }

    #[test]
    fn messages_name_the_offender() {
        let err = DecisionError::RequestedSidecarNotFound("this-doesnt-exist".into());
        assert_eq!(
            err.to_string(),
            "requested sidecar \"this-doesnt-exist\" is not configured"
        );
        let err = PatchError::ContainerNotFound("app".into());
        assert!(err.to_string().contains("\"app\""));
    }
}
