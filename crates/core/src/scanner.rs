//! Post-build vulnerability scanner hook
//!
//! Example extension demonstrating the hook contract: it subscribes to the
//! build-finished event, returns promptly, and does its real work (another
//! command execution) on a background task that appends its verdict to the
//! job output, which stays legal after the job has reached a terminal status.
//!
//! Re-run safety: this hook re-scans on every firing; it keeps no marker of
//! previous scans.

use crate::deploy::Deploy;
use crate::exec::{CommandExecutor, ExecRequest};
use crate::hooks::{DeployHook, HookResult};
use crate::job::Job;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Ambient variables the scanner binary is allowed to see.
const SCANNER_WHITELIST_ENV: &[&str] = &["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "PATH"];

const SCAN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Runs an external vulnerability scanner against the image a deploy built.
///
/// Disabled (a no-op on every event) unless a scanner executable is
/// configured.
pub struct ScannerHook {
    scanner_path: Option<String>,
    registry_user: Option<String>,
    registry_pass: Option<String>,
    executor: CommandExecutor,
}

impl ScannerHook {
    /// Configure from the process environment at plugin-load time:
    /// `BOSUN_SCANNER_PATH` enables the hook; `BOSUN_REGISTRY_USER` /
    /// `BOSUN_REGISTRY_PASS` are handed to the scanner as credentials.
    pub fn from_env() -> Self {
        Self {
            scanner_path: std::env::var("BOSUN_SCANNER_PATH").ok(),
            registry_user: std::env::var("BOSUN_REGISTRY_USER").ok(),
            registry_pass: std::env::var("BOSUN_REGISTRY_PASS").ok(),
            executor: CommandExecutor::new(),
        }
    }

    /// Configure with an explicit scanner executable (used by tests).
    pub fn with_scanner(path: impl Into<String>) -> Self {
        Self {
            scanner_path: Some(path.into()),
            registry_user: None,
            registry_pass: None,
            executor: CommandExecutor::new(),
        }
    }

    fn scan_request(&self, stage_name: &str, image_tag: &str) -> ExecRequest {
        let mut request = ExecRequest::new(self.scanner_path.clone().unwrap_or_default())
            .with_args([stage_name, image_tag])
            .with_whitelist_env(SCANNER_WHITELIST_ENV.iter().copied())
            .with_timeout(SCAN_TIMEOUT);
        if let Some(ref user) = self.registry_user {
            request = request.with_env("DOCKER_REGISTRY_USER", user);
        }
        if let Some(ref pass) = self.registry_pass {
            request = request.with_env("DOCKER_REGISTRY_PASS", pass);
        }
        request
    }
}

impl DeployHook for ScannerHook {
    fn name(&self) -> &'static str {
        "vulnerability-scanner"
    }

    fn on_build_finished(&self, deploy: &Deploy, job: &Arc<Job>, image_tag: &str) -> HookResult {
        if self.scanner_path.is_none() {
            return Ok(());
        }

        job.append_output("### vulnerability scan: started\n");

        let request = self.scan_request(&deploy.stage().name, image_tag);
        let executor = self.executor.clone();
        let job = job.clone();
        let deploy_id = deploy.id().to_string();

        // Return promptly; the scan must never hold up the firing task.
        tokio::spawn(async move {
            match executor.execute(&request).await {
                Ok(outcome) => {
                    let verdict = if outcome.success {
                        "success"
                    } else {
                        "errored or vulnerabilities found"
                    };
                    debug!(deploy = %deploy_id, verdict, "Vulnerability scan finished");
                    job.append_output(format!(
                        "### vulnerability scan: {} in {:.1}s\n{}",
                        verdict,
                        outcome.elapsed.as_secs_f64(),
                        outcome.output
                    ));
                }
                Err(e) => {
                    // A scanner that cannot start must not affect the deploy.
                    error!(deploy = %deploy_id, "Vulnerability scan could not run: {}", e);
                    job.append_output(format!("### vulnerability scan: could not run: {}\n", e));
                }
            }
        });

        Ok(())
    }
}
