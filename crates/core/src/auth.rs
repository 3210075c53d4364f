//! Authorization collaborator
//!
//! The deploy service consults an [`AuthPolicy`] for every gate decision;
//! the engine itself never hard-codes who may approve or stop a deploy.

use crate::deploy::{Deploy, User};
use crate::stage::Stage;

/// Boolean policy checks supplied by the embedding application.
pub trait AuthPolicy: Send + Sync {
    /// Whether a deploy of `stage` requested by `requester` must pass the
    /// buddy check before it may start.
    fn requires_approval(&self, stage: &Stage, requester: &User) -> bool;

    /// Whether `user` may approve `deploy`. The distinct-approver rule is
    /// enforced separately by the deploy itself.
    fn can_approve(&self, user: &User, deploy: &Deploy) -> bool;

    /// Whether `user` may stop `deploy`.
    fn can_stop(&self, user: &User, deploy: &Deploy) -> bool;
}

/// Default policy: production stages (and stages flagged `confirm`) require
/// buddy approval; any user may approve; a deploy may be stopped by its
/// requester or by an admin.
#[derive(Debug, Clone, Default)]
pub struct ProductionPolicy;

impl AuthPolicy for ProductionPolicy {
    fn requires_approval(&self, stage: &Stage, _requester: &User) -> bool {
        stage.production || stage.confirm
    }

    fn can_approve(&self, _user: &User, _deploy: &Deploy) -> bool {
        true
    }

    fn can_stop(&self, user: &User, deploy: &Deploy) -> bool {
        user.admin || user.id == deploy.requester().id
    }
}
