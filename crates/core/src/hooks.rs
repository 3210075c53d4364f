//! Lifecycle hook registry for extending deploy behavior
//!
//! Extensions implement the [`DeployHook`] trait and are registered once
//! during startup; after [`HookRegistry::seal`] the registry is read-only for
//! the remainder of the process lifetime. Events are a closed enum carrying
//! typed argument bundles, so extensions never see untyped positional
//! arguments.
//!
//! ## Error contract
//!
//! Fan-out is synchronous, in registration order, on the firing task. A
//! [`HookError::User`] stops the sequence and propagates to the operation
//! that fired the event (so e.g. deploy setup can be rejected before a build
//! starts). Any other hook failure is logged and fan-out continues: a broken
//! third-party extension must not be able to abort deploys, but one that
//! deliberately rejects input must be able to.
//!
//! ## Re-run safety
//!
//! Idempotence is per-hook-defined: an event may fire more than once over a
//! deploy's lifetime of retries, and each hook documents whether it skips or
//! repeats its work.

use crate::deploy::Deploy;
use crate::errors::HookError;
use crate::job::Job;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, error};

/// Result type for hook callbacks
pub type HookResult = std::result::Result<(), HookError>;

/// A lifecycle event with its typed argument bundle.
#[derive(Debug, Clone, Copy)]
pub enum HookEvent<'a> {
    /// A deploy was requested and validated, but not yet persisted or started.
    /// A `User` error here rejects the deploy.
    DeploySetup { deploy: &'a Deploy },
    /// A buddy approved the deploy; fired before execution starts.
    DeployApproved { deploy: &'a Deploy },
    /// The stage's command sequence completed successfully and produced a
    /// build artifact.
    BuildFinished {
        deploy: &'a Deploy,
        job: &'a Arc<Job>,
        image_tag: &'a str,
    },
    /// The deploy reached a terminal status.
    DeployFinished { deploy: &'a Deploy, job: &'a Arc<Job> },
    /// The deploy was stopped by a user.
    DeployStopped { deploy: &'a Deploy, job: &'a Arc<Job> },
}

impl HookEvent<'_> {
    /// Event name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            HookEvent::DeploySetup { .. } => "deploy_setup",
            HookEvent::DeployApproved { .. } => "deploy_approved",
            HookEvent::BuildFinished { .. } => "build_finished",
            HookEvent::DeployFinished { .. } => "deploy_finished",
            HookEvent::DeployStopped { .. } => "deploy_stopped",
        }
    }
}

/// Extension contract: one callback per lifecycle event, all defaulting to
/// no-ops so hooks subscribe only to the events they care about.
///
/// Callbacks run synchronously on the firing task and must return promptly;
/// long-running work (scans, uploads) spawns its own task and appends results
/// to the job output later, which is legal even after the job is terminal.
pub trait DeployHook: Send + Sync {
    /// Unique name of this hook, for registry logging
    fn name(&self) -> &'static str;

    fn on_deploy_setup(&self, _deploy: &Deploy) -> HookResult {
        Ok(())
    }

    fn on_deploy_approved(&self, _deploy: &Deploy) -> HookResult {
        Ok(())
    }

    fn on_build_finished(&self, _deploy: &Deploy, _job: &Arc<Job>, _image_tag: &str) -> HookResult {
        Ok(())
    }

    fn on_deploy_finished(&self, _deploy: &Deploy, _job: &Arc<Job>) -> HookResult {
        Ok(())
    }

    fn on_deploy_stopped(&self, _deploy: &Deploy, _job: &Arc<Job>) -> HookResult {
        Ok(())
    }
}

struct RegistryState {
    hooks: Vec<Box<dyn DeployHook>>,
    sealed: bool,
}

static HOOK_REGISTRY: OnceLock<Mutex<RegistryState>> = OnceLock::new();

fn registry() -> &'static Mutex<RegistryState> {
    HOOK_REGISTRY.get_or_init(|| {
        Mutex::new(RegistryState {
            hooks: Vec::new(),
            sealed: false,
        })
    })
}

/// Process-wide hook registry.
///
/// Populated during startup, sealed before the first deploy, read-only
/// thereafter. Fan-out order is stable FIFO registration order.
pub struct HookRegistry;

impl HookRegistry {
    /// Register a hook. Fails with [`HookError::RegistrySealed`] once the
    /// registry has been sealed.
    pub fn register(hook: Box<dyn DeployHook>) -> HookResult {
        let mut state = registry().lock().unwrap();
        if state.sealed {
            return Err(HookError::RegistrySealed);
        }
        debug!("Registered deploy hook: {}", hook.name());
        state.hooks.push(hook);
        Ok(())
    }

    /// Seal the registry; further registration is rejected.
    pub fn seal() {
        let mut state = registry().lock().unwrap();
        state.sealed = true;
        debug!("Hook registry sealed with {} hooks", state.hooks.len());
    }

    /// Number of registered hooks.
    pub fn hook_count() -> usize {
        registry().lock().unwrap().hooks.len()
    }

    /// Fire an event through every registered hook, in registration order,
    /// on the caller's task.
    ///
    /// Stops at the first [`HookError::User`] and propagates it. Logs and
    /// skips past any other failure. [`HookError::RegistrySealed`] is treated
    /// as an internal failure if a hook returns it.
    pub fn fire(event: HookEvent<'_>) -> HookResult {
        let state = registry().lock().unwrap();
        for hook in &state.hooks {
            let result = match event {
                HookEvent::DeploySetup { deploy } => hook.on_deploy_setup(deploy),
                HookEvent::DeployApproved { deploy } => hook.on_deploy_approved(deploy),
                HookEvent::BuildFinished {
                    deploy,
                    job,
                    image_tag,
                } => hook.on_build_finished(deploy, job, image_tag),
                HookEvent::DeployFinished { deploy, job } => {
                    hook.on_deploy_finished(deploy, job)
                }
                HookEvent::DeployStopped { deploy, job } => hook.on_deploy_stopped(deploy, job),
            };

            match result {
                Ok(()) => {}
                Err(HookError::User(message)) => {
                    debug!(
                        event = event.name(),
                        hook = hook.name(),
                        "Hook rejected event: {}",
                        message
                    );
                    return Err(HookError::User(message));
                }
                Err(other) => {
                    error!(
                        event = event.name(),
                        hook = hook.name(),
                        "Hook failed, continuing with remaining hooks: {}",
                        other
                    );
                }
            }
        }
        Ok(())
    }

    /// Reset the registry (for tests only).
    #[cfg(test)]
    pub fn clear() {
        let mut state = registry().lock().unwrap();
        state.hooks.clear();
        state.sealed = false;
    }
}

/// The registry is process-wide; unit tests that register hooks or fire
/// events hold this lock to avoid interfering with each other.
#[cfg(test)]
pub(crate) static TEST_LOCK: Mutex<()> = Mutex::new(());
