//! Deploy command: run one deploy to completion and print its output

use anyhow::{anyhow, Result};
use bosun_core::auth::ProductionPolicy;
use bosun_core::deploy::User;
use bosun_core::job::JobStatus;
use bosun_core::service::DeployService;
use bosun_core::stage::StageConfig;
use bosun_core::store::MemoryStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument};

/// Arguments for the deploy command
#[derive(Debug)]
pub struct DeployArgs {
    pub config: PathBuf,
    pub stage: String,
    pub reference: String,
    pub user: String,
    pub approve_as: Option<String>,
}

/// Create, optionally approve, and run a deploy, blocking until it settles.
///
/// The job output streams nowhere while the deploy runs; the full log is
/// printed to stdout when it finishes. A deploy that does not succeed maps to
/// a non-zero exit status.
#[instrument(skip(args), fields(stage = %args.stage, reference = %args.reference))]
pub async fn execute(args: DeployArgs) -> Result<()> {
    let config = StageConfig::from_json(&args.config).map_err(bosun_core::errors::BosunError::from)?;
    let stage = config
        .find(&args.stage)
        .ok_or_else(|| anyhow!("Unknown stage '{}' in {}", args.stage, args.config.display()))?;

    let store = Arc::new(MemoryStore::new());
    let service = DeployService::new(store, Arc::new(ProductionPolicy));

    let requester = User::new(args.user.clone(), args.user.clone());
    let deploy = service.create_deploy(stage, &args.reference, &requester)?;
    info!(deploy = %deploy.id(), "Deploy created");

    if let Some(ref approver_name) = args.approve_as {
        let approver = User::new(approver_name.clone(), approver_name.clone());
        service.approve(&deploy, &approver)?;
    }

    let handle = service.start(&deploy)?;
    handle.await?;

    let log = deploy.job().output_snapshot().await;
    print!("{}", log);

    let status = deploy.job().status();
    println!("Deploy {} of {} to {}: {}", deploy.id(), deploy.reference(), args.stage, status);

    if status != JobStatus::Succeeded {
        return Err(anyhow!("deploy finished with status '{}'", status));
    }
    Ok(())
}
