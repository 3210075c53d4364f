//! Persistence collaborator
//!
//! The engine only needs create, read, status mirroring, and filtered
//! listing with pagination; the exact query language belongs to the
//! embedding application. [`MemoryStore`] is the reference implementation
//! used by the service and tests.

use crate::deploy::Deploy;
use crate::errors::DeployError;
use crate::job::JobStatus;
use std::sync::{Arc, Mutex};

/// Filter for deploy listings. All fields are conjunctive; `None` matches
/// everything.
#[derive(Debug, Clone, Default)]
pub struct DeployFilter {
    /// Match the current job status
    pub status: Option<JobStatus>,
    /// Exact stage name
    pub stage: Option<String>,
    /// Substring match on the requester's name
    pub deployer: Option<String>,
    /// Match the stage's production flag
    pub production: Option<bool>,
}

impl DeployFilter {
    /// Set the status filter from its string form, rejecting unknown values.
    pub fn with_status_str(mut self, status: &str) -> Result<Self, DeployError> {
        match JobStatus::parse(status) {
            Some(parsed) => {
                self.status = Some(parsed);
                Ok(self)
            }
            None => Err(DeployError::Validation {
                message: format!("invalid status filter '{}'", status),
            }),
        }
    }

    fn matches(&self, deploy: &Deploy) -> bool {
        if let Some(status) = self.status {
            if deploy.job().status() != status {
                return false;
            }
        }
        if let Some(ref stage) = self.stage {
            if deploy.stage().name != *stage {
                return false;
            }
        }
        if let Some(ref deployer) = self.deployer {
            if !deploy.requester().name.contains(deployer.as_str()) {
                return false;
            }
        }
        if let Some(production) = self.production {
            if deploy.stage().production != production {
                return false;
            }
        }
        true
    }
}

/// One page of a listing. Pages are 1-based.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: usize,
    pub per_page: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 30,
        }
    }
}

/// CRUD surface the engine requires from persistence.
pub trait DeployStore: Send + Sync {
    /// Persist a newly created deploy.
    fn insert(&self, deploy: Arc<Deploy>);

    /// Look up a deploy by id.
    fn get(&self, id: &str) -> Option<Arc<Deploy>>;

    /// Mirror a job status change into persistence.
    fn update_status(&self, deploy_id: &str, status: JobStatus);

    /// List deploys matching `filter`, newest first, paginated.
    fn list(&self, filter: &DeployFilter, page: Page) -> Vec<Arc<Deploy>>;
}

/// In-memory store: deploys in insertion order plus a mirrored status column.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Vec<StoredDeploy>>,
}

struct StoredDeploy {
    deploy: Arc<Deploy>,
    mirrored_status: JobStatus,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last status mirrored via [`DeployStore::update_status`].
    pub fn mirrored_status(&self, deploy_id: &str) -> Option<JobStatus> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.deploy.id() == deploy_id)
            .map(|s| s.mirrored_status)
    }
}

impl DeployStore for MemoryStore {
    fn insert(&self, deploy: Arc<Deploy>) {
        let mut inner = self.inner.lock().unwrap();
        let status = deploy.job().status();
        inner.push(StoredDeploy {
            deploy,
            mirrored_status: status,
        });
    }

    fn get(&self, id: &str) -> Option<Arc<Deploy>> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.deploy.id() == id)
            .map(|s| s.deploy.clone())
    }

    fn update_status(&self, deploy_id: &str, status: JobStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(stored) = inner.iter_mut().find(|s| s.deploy.id() == deploy_id) {
            stored.mirrored_status = status;
        }
    }

    fn list(&self, filter: &DeployFilter, page: Page) -> Vec<Arc<Deploy>> {
        let inner = self.inner.lock().unwrap();
        let per_page = page.per_page.max(1);
        let skip = page.page.saturating_sub(1) * per_page;
        inner
            .iter()
            .rev()
            .map(|s| &s.deploy)
            .filter(|d| filter.matches(d))
            .skip(skip)
            .take(per_page)
            .cloned()
            .collect()
    }
}
