//! Error types and handling
//!
//! Domain-specific error enums (execution, job, deploy, hook, configuration)
//! wrapped in the main `BosunError` enum for unified error handling. Failures
//! of external commands are deliberately *not* errors: the executor reports
//! them through its result so the orchestrator can record a terminal job
//! status instead of unwinding.

use crate::job::JobStatus;
use thiserror::Error;

/// Command execution errors
///
/// Only programmer errors surface here (bad executable, malformed request).
/// A child process that exits non-zero or overruns its timeout is reported
/// via [`crate::exec::ExecOutcome`].
#[derive(Error, Debug)]
pub enum ExecError {
    /// The command could not be invoked at all
    #[error("Failed to invoke '{program}': {message}")]
    Invocation { program: String, message: String },

    /// I/O failure while supervising the child process
    #[error("I/O error while supervising child process")]
    Io(#[from] std::io::Error),
}

/// Job state errors
#[derive(Error, Debug)]
pub enum JobError {
    /// A status transition was attempted out of a terminal state
    #[error("Invalid job transition: {from} is terminal, cannot become {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

/// Deploy lifecycle errors
#[derive(Error, Debug)]
pub enum DeployError {
    /// Bad input (empty reference, unknown status filter, ...)
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Start was attempted while the deploy still awaits buddy approval
    #[error("Deploy is awaiting buddy approval and cannot be started")]
    NotApproved,

    /// The requester tried to approve their own deploy
    #[error("Deploys must be approved by someone other than their requester")]
    SelfApproval,

    /// Approval was attempted twice
    #[error("Deploy is already approved")]
    AlreadyApproved,

    /// Approval was attempted on a deploy that does not require it
    #[error("Deploy does not require buddy approval")]
    ApprovalNotRequired,

    /// The actor lacks the privilege for the attempted action
    #[error("{actor} is not allowed to {action} this deploy")]
    Unauthorized { actor: String, action: String },

    /// A setup-class hook rejected the deploy before execution started
    #[error("Deploy rejected by extension: {message}")]
    HookRejected { message: String },
}

/// Hook registry and extension errors
#[derive(Error, Debug)]
pub enum HookError {
    /// User-facing rejection: aborts the firing sequence and propagates to
    /// the operation that fired the hook
    #[error("{0}")]
    User(String),

    /// Internal extension failure: logged and swallowed so one broken
    /// extension cannot abort the others or the triggering operation
    #[error("Hook failed internally: {0}")]
    Internal(#[from] anyhow::Error),

    /// Registration was attempted after the registry was sealed
    #[error("Hook registry is sealed; register extensions during startup")]
    RegistrySealed,
}

/// Stage configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file parsing error
    #[error("Failed to parse stage configuration")]
    Parsing(#[from] serde_json::Error),

    /// Configuration validation error
    #[error("Stage configuration validation error: {message}")]
    Validation { message: String },

    /// Configuration file not found
    #[error("Stage configuration file not found: {path}")]
    NotFound { path: String },

    /// Configuration file I/O error
    #[error("Failed to read stage configuration file")]
    Io(#[from] std::io::Error),
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum BosunError {
    /// Command execution errors
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Job state errors
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    /// Deploy lifecycle errors
    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    /// Hook registry and extension errors
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    /// Stage configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Convenience type alias for Results with BosunError
pub type Result<T> = std::result::Result<T, BosunError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_exec_error_display() {
        let error = ExecError::Invocation {
            program: "does-not-exist".to_string(),
            message: "No such file or directory".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Failed to invoke 'does-not-exist': No such file or directory"
        );
    }

    #[test]
    fn test_job_error_display() {
        let error = JobError::InvalidTransition {
            from: JobStatus::Succeeded,
            to: JobStatus::Cancelled,
        };
        assert_eq!(
            format!("{}", error),
            "Invalid job transition: succeeded is terminal, cannot become cancelled"
        );
    }

    #[test]
    fn test_deploy_error_display() {
        let error = DeployError::Validation {
            message: "Reference must not be blank".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Validation error: Reference must not be blank"
        );

        let error = DeployError::SelfApproval;
        assert_eq!(
            format!("{}", error),
            "Deploys must be approved by someone other than their requester"
        );

        let error = DeployError::Unauthorized {
            actor: "viewer".to_string(),
            action: "stop".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "viewer is not allowed to stop this deploy"
        );
    }

    #[test]
    fn test_hook_error_display() {
        let error = HookError::User("Dockerfile template is invalid".to_string());
        assert_eq!(format!("{}", error), "Dockerfile template is invalid");

        let error = HookError::Internal(anyhow::anyhow!("scanner crashed"));
        assert_eq!(
            format!("{}", error),
            "Hook failed internally: scanner crashed"
        );
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::NotFound {
            path: "/path/to/stages.json".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Stage configuration file not found: /path/to/stages.json"
        );
    }

    #[test]
    fn test_bosun_error_from_domain_errors() {
        let job_error = JobError::InvalidTransition {
            from: JobStatus::Failed,
            to: JobStatus::Running,
        };
        let bosun_error: BosunError = job_error.into();
        assert!(matches!(bosun_error, BosunError::Job(_)));

        let deploy_error = DeployError::NotApproved;
        let bosun_error: BosunError = deploy_error.into();
        assert!(matches!(bosun_error, BosunError::Deploy(_)));

        let hook_error = HookError::RegistrySealed;
        let bosun_error: BosunError = hook_error.into();
        assert!(matches!(bosun_error, BosunError::Hook(_)));
    }

    #[test]
    fn test_error_source_chain() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let config_error = ConfigError::Io(io_error);
        let bosun_error = BosunError::Config(config_error);

        assert!(bosun_error.source().is_some());
        if let Some(source) = bosun_error.source() {
            assert!(source.source().is_some());
        }
    }
}
