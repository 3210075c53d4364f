//! Deploy service: orchestrates deploys end to end
//!
//! Creates the deploy/job pair, applies the buddy-check policy, runs the
//! stage's command sequence on a dedicated task, mirrors terminal status into
//! the store, and fires lifecycle hooks at each transition. Callers never
//! block on a deploy's completion; the spawned task owns execution.

use crate::auth::AuthPolicy;
use crate::deploy::{Deploy, User};
use crate::errors::{DeployError, JobError, Result};
use crate::exec::{CommandExecutor, ExecRequest};
use crate::hooks::{HookEvent, HookRegistry};
use crate::job::JobStatus;
use crate::stage::Stage;
use crate::store::DeployStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Ambient variables allowed through to stage commands; everything else
/// ambient is stripped.
const COMMAND_WHITELIST_ENV: &[&str] = &["PATH", "HOME"];

/// Orchestrates deploy creation, approval, execution, and stopping.
pub struct DeployService {
    executor: CommandExecutor,
    store: Arc<dyn DeployStore>,
    policy: Arc<dyn AuthPolicy>,
}

impl DeployService {
    pub fn new(store: Arc<dyn DeployStore>, policy: Arc<dyn AuthPolicy>) -> Self {
        Self {
            executor: CommandExecutor::new(),
            store,
            policy,
        }
    }

    /// Create and persist a deploy of `reference` to `stage`.
    ///
    /// Validates the stage and reference, applies the buddy-check policy, and
    /// gives setup-class hooks the chance to reject the deploy before it is
    /// persisted. The deploy comes back in `Pending` or `AwaitingApproval`.
    #[instrument(skip(self, stage, requester), fields(stage = %stage.name, reference))]
    pub fn create_deploy(
        &self,
        stage: &Stage,
        reference: &str,
        requester: &User,
    ) -> Result<Arc<Deploy>> {
        stage.validate()?;

        let approval_required = self.policy.requires_approval(stage, requester);
        let deploy = Deploy::new(
            stage.clone(),
            reference,
            requester.clone(),
            approval_required,
        )?;

        // A user-facing rejection here aborts creation; nothing is persisted.
        if let Err(crate::errors::HookError::User(message)) =
            HookRegistry::fire(HookEvent::DeploySetup { deploy: &deploy })
        {
            return Err(DeployError::HookRejected { message }.into());
        }

        self.store.insert(deploy.clone());
        info!(
            deploy = %deploy.id(),
            stage = %stage.name,
            reference = %deploy.reference(),
            approval_required,
            "Deploy created"
        );
        Ok(deploy)
    }

    /// Record buddy approval of `deploy` by `approver`.
    ///
    /// The approval is recorded before the `DeployApproved` hook fires; a
    /// user-facing hook error propagates to the caller but does not revoke
    /// the approval.
    #[instrument(skip(self, deploy, approver), fields(deploy = %deploy.id(), approver = %approver.name))]
    pub fn approve(&self, deploy: &Arc<Deploy>, approver: &User) -> Result<()> {
        if !self.policy.can_approve(approver, deploy) {
            return Err(DeployError::Unauthorized {
                actor: approver.name.clone(),
                action: "approve".to_string(),
            }
            .into());
        }

        deploy.confirm_buddy(approver)?;
        info!(deploy = %deploy.id(), approver = %approver.name, "Deploy approved");

        HookRegistry::fire(HookEvent::DeployApproved { deploy })?;
        Ok(())
    }

    /// Start executing `deploy` on its own task.
    ///
    /// Fails with [`DeployError::NotApproved`] while the buddy check is
    /// outstanding. The returned handle is for callers that want to await
    /// completion; dropping it does not cancel the deploy.
    #[instrument(skip(self, deploy), fields(deploy = %deploy.id()))]
    pub fn start(&self, deploy: &Arc<Deploy>) -> Result<JoinHandle<()>> {
        if !deploy.approval().permits_start() {
            return Err(DeployError::NotApproved.into());
        }

        deploy.job().transition(JobStatus::Running)?;
        self.store.update_status(deploy.id(), JobStatus::Running);
        info!(deploy = %deploy.id(), stage = %deploy.stage().name, "Deploy started");

        let executor = self.executor.clone();
        let store = self.store.clone();
        let deploy = deploy.clone();
        Ok(tokio::spawn(run_deploy(executor, store, deploy)))
    }

    /// Stop `deploy` on behalf of `actor`.
    ///
    /// Fails with [`DeployError::Unauthorized`] when the actor lacks stop
    /// privilege and with an invalid-transition error when the deploy has
    /// already finished. A pending deploy is cancelled immediately; a running
    /// one is signalled and its task records the cancellation when the
    /// in-flight command has been killed.
    #[instrument(skip(self, deploy, actor), fields(deploy = %deploy.id(), actor = %actor.name))]
    pub fn stop(&self, deploy: &Arc<Deploy>, actor: &User) -> Result<()> {
        if !self.policy.can_stop(actor, deploy) {
            return Err(DeployError::Unauthorized {
                actor: actor.name.clone(),
                action: "stop".to_string(),
            }
            .into());
        }

        let status = deploy.job().status();
        if status.is_terminal() {
            return Err(JobError::InvalidTransition {
                from: status,
                to: JobStatus::Cancelled,
            }
            .into());
        }

        deploy.request_cancel();
        info!(deploy = %deploy.id(), actor = %actor.name, "Deploy stop requested");

        if status == JobStatus::Pending {
            // Not yet running: no task will observe the signal, finish here.
            // Losing the race against a concurrent start is fine; the running
            // task sees the cancel flag and winds down on its own.
            if deploy.job().transition(JobStatus::Cancelled).is_ok() {
                deploy.job().append_output("Deploy cancelled before start\n");
                self.store.update_status(deploy.id(), JobStatus::Cancelled);
                if let Err(e) = HookRegistry::fire(HookEvent::DeployStopped {
                    deploy,
                    job: deploy.job(),
                }) {
                    warn!(deploy = %deploy.id(), "deploy_stopped hook rejected: {}", e);
                }
            }
        }
        Ok(())
    }
}

/// Run the stage's command sequence for one deploy, then settle terminal
/// state and fire terminal hooks. Always runs on its own task.
async fn run_deploy(executor: CommandExecutor, store: Arc<dyn DeployStore>, deploy: Arc<Deploy>) {
    let stage = deploy.stage().clone();
    let job = deploy.job().clone();
    let cancel_rx = deploy.subscribe_cancel();

    let mut final_status = JobStatus::Succeeded;

    for template in &stage.commands {
        if deploy.cancel_requested() {
            final_status = JobStatus::Cancelled;
            break;
        }

        // Stage validation checked these templates at load time; a parse
        // failure here is a programmer error and settles as errored.
        let words = match shell_words::split(template) {
            Ok(words) if !words.is_empty() => words,
            _ => {
                job.append_output(format!("Unparsable command: {}\n", template));
                final_status = JobStatus::Errored;
                break;
            }
        };

        job.append_output(format!("$ {}\n", template));

        let request = ExecRequest::new(&words[0])
            .with_args(words[1..].iter().cloned())
            .with_env("DEPLOY_ID", deploy.id())
            .with_env("DEPLOY_STAGE", &stage.name)
            .with_env("DEPLOY_REFERENCE", deploy.reference())
            .with_env("DEPLOYER", &deploy.requester().name)
            .with_whitelist_env(COMMAND_WHITELIST_ENV.iter().copied())
            .with_timeout(stage.command_timeout());

        match executor
            .execute_with_cancel(&request, cancel_rx.clone())
            .await
        {
            Ok(outcome) => {
                job.append_output(outcome.output);
                if outcome.stopped {
                    final_status = JobStatus::Cancelled;
                    break;
                }
                if !outcome.success {
                    final_status = JobStatus::Failed;
                    break;
                }
            }
            Err(e) => {
                job.append_output(format!("{}\n", e));
                final_status = JobStatus::Errored;
                break;
            }
        }
    }

    if let Err(e) = job.transition(final_status) {
        // Already settled elsewhere; nothing more to record.
        debug!(deploy = %deploy.id(), "Terminal transition lost: {}", e);
    }
    let settled = job.status();
    store.update_status(deploy.id(), settled);
    info!(deploy = %deploy.id(), status = %settled, "Deploy finished");

    // Terminal hooks are informational; a user-facing error here cannot undo
    // a finished deploy, so it is logged rather than propagated.
    if settled == JobStatus::Succeeded && !stage.commands.is_empty() {
        if let Err(e) = HookRegistry::fire(HookEvent::BuildFinished {
            deploy: &deploy,
            job: &job,
            image_tag: deploy.reference(),
        }) {
            warn!(deploy = %deploy.id(), "build_finished hook rejected: {}", e);
        }
    }
    if settled == JobStatus::Cancelled {
        if let Err(e) = HookRegistry::fire(HookEvent::DeployStopped {
            deploy: &deploy,
            job: &job,
        }) {
            warn!(deploy = %deploy.id(), "deploy_stopped hook rejected: {}", e);
        }
    }
    if let Err(e) = HookRegistry::fire(HookEvent::DeployFinished {
        deploy: &deploy,
        job: &job,
    }) {
        warn!(deploy = %deploy.id(), "deploy_finished hook rejected: {}", e);
    }
}
