//! End-to-end deploy flows: create, approve, run, stop, and hook fan-out
//! against real shell commands.

#![cfg(unix)]

use bosun_core::auth::ProductionPolicy;
use bosun_core::deploy::{Deploy, DeployState, User};
use bosun_core::errors::{BosunError, DeployError, HookError};
use bosun_core::hooks::{DeployHook, HookRegistry, HookResult};
use bosun_core::job::{Job, JobStatus};
use bosun_core::service::DeployService;
use bosun_core::stage::Stage;
use bosun_core::store::{DeployStore, MemoryStore};
use std::sync::{Arc, Mutex, Once, OnceLock};
use std::time::Duration;

/// Lifecycle events observed by the recording hook, as (event, deploy id).
fn events() -> &'static Mutex<Vec<(String, String)>> {
    static EVENTS: OnceLock<Mutex<Vec<(String, String)>>> = OnceLock::new();
    EVENTS.get_or_init(|| Mutex::new(Vec::new()))
}

fn events_for(deploy_id: &str) -> Vec<String> {
    events()
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, id)| id == deploy_id)
        .map(|(event, _)| event.clone())
        .collect()
}

struct RecordingHook;

impl RecordingHook {
    fn record(&self, event: &str, deploy: &Deploy) {
        events()
            .lock()
            .unwrap()
            .push((event.to_string(), deploy.id().to_string()));
    }
}

impl DeployHook for RecordingHook {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn on_deploy_setup(&self, deploy: &Deploy) -> HookResult {
        self.record("deploy_setup", deploy);
        if deploy.reference() == "reject-me" {
            return Err(HookError::User("reference is blocked".to_string()));
        }
        Ok(())
    }

    fn on_deploy_approved(&self, deploy: &Deploy) -> HookResult {
        self.record("deploy_approved", deploy);
        Ok(())
    }

    fn on_build_finished(&self, deploy: &Deploy, _job: &Arc<Job>, _image_tag: &str) -> HookResult {
        self.record("build_finished", deploy);
        Ok(())
    }

    fn on_deploy_finished(&self, deploy: &Deploy, _job: &Arc<Job>) -> HookResult {
        self.record("deploy_finished", deploy);
        Ok(())
    }

    fn on_deploy_stopped(&self, deploy: &Deploy, _job: &Arc<Job>) -> HookResult {
        self.record("deploy_stopped", deploy);
        Ok(())
    }
}

/// The registry is process-wide and sealed after startup; register the
/// recording hook exactly once for the whole test binary.
fn setup_registry() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        HookRegistry::register(Box::new(RecordingHook)).unwrap();
        HookRegistry::seal();
    });
}

fn service() -> (DeployService, Arc<MemoryStore>) {
    setup_registry();
    let store = Arc::new(MemoryStore::new());
    let service = DeployService::new(store.clone(), Arc::new(ProductionPolicy));
    (service, store)
}

async fn wait_for_output(deploy: &Deploy, needle: &str) -> String {
    let mut log = String::new();
    for _ in 0..250 {
        log = deploy.job().output_snapshot().await;
        if log.contains(needle) {
            return log;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("output never contained {:?}, got: {}", needle, log);
}

#[tokio::test]
async fn test_successful_deploy_runs_commands_in_order() {
    let (service, store) = service();
    let stage = Stage::new(
        "staging",
        vec![
            "sh -c 'echo building $DEPLOY_REFERENCE'".to_string(),
            "sh -c 'echo pushing $DEPLOY_REFERENCE'".to_string(),
        ],
    );
    let alice = User::new("u1", "alice");

    let deploy = service.create_deploy(&stage, "v1.2.3", &alice).unwrap();
    assert_eq!(deploy.state(), DeployState::Pending);

    let handle = service.start(&deploy).unwrap();
    handle.await.unwrap();

    assert_eq!(deploy.state(), DeployState::Succeeded);
    assert_eq!(
        store.mirrored_status(deploy.id()),
        Some(JobStatus::Succeeded)
    );

    let log = deploy.job().output_snapshot().await;
    let building = log.find("building v1.2.3").unwrap();
    let pushing = log.find("pushing v1.2.3").unwrap();
    assert!(building < pushing, "commands ran out of order: {}", log);
    assert!(log.contains("$ sh -c 'echo building $DEPLOY_REFERENCE'"));

    let observed = events_for(deploy.id());
    assert_eq!(
        observed,
        vec!["deploy_setup", "build_finished", "deploy_finished"]
    );
}

#[tokio::test]
async fn test_production_deploy_requires_buddy_approval() {
    let (service, _) = service();
    let stage = Stage::production("production", vec!["sh -c 'echo releasing'".to_string()]);
    let alice = User::new("u1", "alice");
    let bob = User::new("u2", "bob");

    let deploy = service.create_deploy(&stage, "v2.0.0", &alice).unwrap();
    assert_eq!(deploy.state(), DeployState::AwaitingApproval);

    let err = service.start(&deploy).unwrap_err();
    assert!(matches!(err, BosunError::Deploy(DeployError::NotApproved)));

    let err = service.approve(&deploy, &alice).unwrap_err();
    assert!(matches!(err, BosunError::Deploy(DeployError::SelfApproval)));
    assert_eq!(deploy.state(), DeployState::AwaitingApproval);

    service.approve(&deploy, &bob).unwrap();
    assert_eq!(deploy.state(), DeployState::Pending);

    let handle = service.start(&deploy).unwrap();
    handle.await.unwrap();
    assert_eq!(deploy.state(), DeployState::Succeeded);

    let observed = events_for(deploy.id());
    assert_eq!(
        observed,
        vec![
            "deploy_setup",
            "deploy_approved",
            "build_finished",
            "deploy_finished"
        ]
    );
}

#[tokio::test]
async fn test_stop_cancels_running_deploy() {
    let (service, store) = service();
    let stage = Stage::new(
        "staging",
        vec!["sh -c 'echo running; exec sleep 30'".to_string()],
    );
    let alice = User::new("u1", "alice");

    let deploy = service.create_deploy(&stage, "v1", &alice).unwrap();
    let handle = service.start(&deploy).unwrap();
    wait_for_output(&deploy, "running").await;

    service.stop(&deploy, &alice).unwrap();
    handle.await.unwrap();

    assert_eq!(deploy.state(), DeployState::Cancelled);
    assert_eq!(
        store.mirrored_status(deploy.id()),
        Some(JobStatus::Cancelled)
    );

    let log = deploy.job().output_snapshot().await;
    assert!(log.contains("### command stopped"));

    let observed = events_for(deploy.id());
    assert_eq!(
        observed,
        vec!["deploy_setup", "deploy_stopped", "deploy_finished"]
    );
}

#[tokio::test]
async fn test_failed_command_stops_the_sequence() {
    let (service, store) = service();
    let stage = Stage::new(
        "staging",
        vec![
            "sh -c 'echo step-one; exit 2'".to_string(),
            "sh -c 'echo step-two'".to_string(),
        ],
    );
    let alice = User::new("u1", "alice");

    let deploy = service.create_deploy(&stage, "v1", &alice).unwrap();
    let handle = service.start(&deploy).unwrap();
    handle.await.unwrap();

    assert_eq!(deploy.state(), DeployState::Failed);
    assert_eq!(store.mirrored_status(deploy.id()), Some(JobStatus::Failed));

    let log = deploy.job().output_snapshot().await;
    assert!(log.contains("step-one"));
    assert!(!log.contains("step-two"), "second command ran: {}", log);

    // a failed deploy produced no build artifact
    let observed = events_for(deploy.id());
    assert_eq!(observed, vec!["deploy_setup", "deploy_finished"]);
}

#[tokio::test]
async fn test_setup_hook_rejection_aborts_creation() {
    let (service, store) = service();
    let stage = Stage::new("staging", vec!["sh -c 'echo build'".to_string()]);
    let alice = User::new("u1", "alice");

    let err = service
        .create_deploy(&stage, "reject-me", &alice)
        .unwrap_err();
    assert!(matches!(
        err,
        BosunError::Deploy(DeployError::HookRejected { ref message }) if message == "reference is blocked"
    ));

    // nothing was persisted
    let listed = store.list(&Default::default(), Default::default());
    assert!(listed.is_empty());
}
