//! Error types for the builder.

use kiln_cloud::CloudError;
use kiln_converge::ConvergenceError;
use thiserror::Error;

/// Problems with the build template.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read build template {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid build template TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Every validation failure found, in template order.
    #[error("invalid build template:\n  * {}", .0.join("\n  * "))]
    Invalid(Vec<String>),
}

/// Why a step stopped the pipeline.
#[derive(Debug, Error)]
pub enum StepError {
    /// A remote call failed outright.
    #[error("{context}: {source}")]
    Cloud {
        context: String,
        #[source]
        source: CloudError,
    },

    /// A convergence wait ended without reaching its target.
    #[error("{context}: {source}")]
    Wait {
        context: String,
        #[source]
        source: ConvergenceError,
    },

    /// An earlier step did not produce a value this step requires.
    #[error("build state is missing `{0}`")]
    MissingState(&'static str),

    #[error("{0}")]
    Failed(String),

    #[error("provisioning hook `{command}` failed: {reason}")]
    Hook { command: String, reason: String },

    #[error("build cancelled")]
    Cancelled,
}

impl StepError {
    pub fn cloud(context: impl Into<String>, source: CloudError) -> Self {
        StepError::Cloud {
            context: context.into(),
            source,
        }
    }

    pub fn wait(context: impl Into<String>, source: ConvergenceError) -> Self {
        StepError::Wait {
            context: context.into(),
            source,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }

    /// True when the step stopped because the run was interrupted.
    pub fn is_cancelled(&self) -> bool {
        match self {
            StepError::Cancelled => true,
            StepError::Wait { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// The single error a failed build reports. Template problems surface
/// earlier, as a [`ConfigError`], before any build starts.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("step {step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: StepError,
    },

    #[error("build cancelled")]
    Cancelled,
}

impl BuildError {
    /// Name of the step that halted the build, if one did.
    pub fn step(&self) -> Option<&'static str> {
        match self {
            BuildError::Step { step, .. } => Some(step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_id::ResourceKind;

    #[test]
    fn test_invalid_lists_every_problem() {
        let err = ConfigError::Invalid(vec![
            "image_name must be specified".into(),
            "A flavor must be specified".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "invalid build template:\n  * image_name must be specified\n  * A flavor must be specified"
        );
    }

    #[test]
    fn test_step_error_keeps_remote_text() {
        let err = StepError::cloud(
            "Error creating VPC",
            CloudError::not_found(ResourceKind::Network, "net-1"),
        );
        let build = BuildError::Step {
            step: "create-network",
            source: err,
        };
        assert_eq!(
            build.to_string(),
            "step create-network failed: Error creating VPC: network net-1 not found"
        );
        assert_eq!(build.step(), Some("create-network"));
    }

    #[test]
    fn test_cancelled_build_names_no_step() {
        assert_eq!(BuildError::Cancelled.step(), None);
        assert_eq!(BuildError::Cancelled.to_string(), "build cancelled");
    }

    #[test]
    fn test_cancelled_wait_is_cancellation() {
        let err = StepError::wait("Error waiting for server", ConvergenceError::Cancelled);
        assert!(err.is_cancelled());
        assert!(!StepError::MissingState("server_id").is_cancelled());
    }
}
