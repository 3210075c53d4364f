//! Deploy lifecycle: a job bound to a stage and reference, plus buddy approval
//!
//! A deploy is the user-facing unit: it wraps a [`Job`] against a specific
//! stage and source reference and adds the buddy-check gate. Once approval is
//! granted it is immutable; once the underlying job reaches a terminal status
//! the deploy is immutable history.

use crate::errors::DeployError;
use crate::job::{Job, JobStatus};
use crate::stage::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;

/// Identity of a requester, approver, or stopper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    /// Admins may stop any deploy
    #[serde(default)]
    pub admin: bool,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            admin: false,
        }
    }

    pub fn admin(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            admin: true,
            ..Self::new(id, name)
        }
    }
}

/// Buddy-approval state of a deploy.
///
/// `Approved` is immutable once reached; the approver identity and timestamp
/// are recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum BuddyApproval {
    /// The stage/requester combination does not require approval
    NotRequired,
    /// Approval required, not yet granted; the deploy may not start
    Pending,
    /// Approved by a user distinct from the requester
    Approved { approver: User, at: DateTime<Utc> },
}

impl BuddyApproval {
    /// Whether the deploy may start executing.
    pub fn permits_start(&self) -> bool {
        matches!(self, BuddyApproval::NotRequired | BuddyApproval::Approved { .. })
    }
}

/// User-facing view of a deploy's lifecycle position, derived from approval
/// state and job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Pending,
    AwaitingApproval,
    Running,
    Succeeded,
    Failed,
    Errored,
    Cancelled,
}

/// One user-initiated attempt to release a reference to a stage.
#[derive(Debug)]
pub struct Deploy {
    id: String,
    stage: Stage,
    reference: String,
    requester: User,
    approval: Mutex<BuddyApproval>,
    job: Arc<Job>,
    cancel_tx: watch::Sender<bool>,
}

impl Deploy {
    /// Create a deploy of `reference` to `stage`, requested by `requester`.
    ///
    /// The reference is trimmed and must be non-empty. When
    /// `approval_required` is true the deploy starts in the awaiting-approval
    /// state and cannot run until a buddy confirms it.
    ///
    /// Must be called within a tokio runtime (the job's output task is
    /// spawned here).
    pub fn new(
        stage: Stage,
        reference: impl Into<String>,
        requester: User,
        approval_required: bool,
    ) -> Result<Arc<Self>, DeployError> {
        let reference = reference.into().trim().to_string();
        if reference.is_empty() {
            return Err(DeployError::Validation {
                message: "Reference must not be blank".to_string(),
            });
        }

        let approval = if approval_required {
            BuddyApproval::Pending
        } else {
            BuddyApproval::NotRequired
        };
        let (cancel_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            id: format!("{:016x}", fastrand::u64(..)),
            job: Arc::new(Job::new(requester.clone())),
            stage,
            reference,
            requester,
            approval: Mutex::new(approval),
            cancel_tx,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn requester(&self) -> &User {
        &self.requester
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    /// Current buddy-approval state.
    pub fn approval(&self) -> BuddyApproval {
        self.approval.lock().unwrap().clone()
    }

    /// Derived lifecycle state.
    pub fn state(&self) -> DeployState {
        match self.job.status() {
            JobStatus::Pending => match *self.approval.lock().unwrap() {
                BuddyApproval::Pending => DeployState::AwaitingApproval,
                _ => DeployState::Pending,
            },
            JobStatus::Running => DeployState::Running,
            JobStatus::Succeeded => DeployState::Succeeded,
            JobStatus::Failed => DeployState::Failed,
            JobStatus::Errored => DeployState::Errored,
            JobStatus::Cancelled => DeployState::Cancelled,
        }
    }

    /// Record buddy approval by `approver`.
    ///
    /// Rejected when the approver is the requester ([`DeployError::SelfApproval`]),
    /// when the deploy does not require approval, or when it is already
    /// approved. Approval, once granted, never changes.
    pub fn confirm_buddy(&self, approver: &User) -> Result<(), DeployError> {
        if approver.id == self.requester.id {
            return Err(DeployError::SelfApproval);
        }

        let mut approval = self.approval.lock().unwrap();
        match *approval {
            BuddyApproval::NotRequired => Err(DeployError::ApprovalNotRequired),
            BuddyApproval::Approved { .. } => Err(DeployError::AlreadyApproved),
            BuddyApproval::Pending => {
                debug!(deploy = %self.id, approver = %approver.name, "Buddy approval recorded");
                *approval = BuddyApproval::Approved {
                    approver: approver.clone(),
                    at: Utc::now(),
                };
                Ok(())
            }
        }
    }

    /// Signal cancellation to the running command sequence.
    pub(crate) fn request_cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Whether cancellation has been requested.
    pub fn cancel_requested(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Receiver observed by the executing task and the command executor.
    pub(crate) fn subscribe_cancel(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }
}
