//! Pipe selection entry points.

use std::sync::Arc;

use tracing::{debug, info, warn};

use arbiter_core::{
    ConcurrencyRuleTable, PipeDescriptor, PipeRole, PolicyConfigManager, SessionAction, SessionDescriptor,
    StaticPolicy,
};

use crate::batch::BatchReconciler;
use crate::matcher::PipeMatcher;
use crate::registry::PipeRegistry;
use crate::resolver::ConcurrencyResolver;

/// Plans pipe lists for sessions against the registry.
///
/// Planning works on snapshots; nothing reaches the registry until
/// [`PipeSelector::commit`]. Callers that need fetch and commit to be atomic
/// must serialize them themselves.
pub struct PipeSelector {
    registry: Arc<PipeRegistry>,
    policy: Arc<dyn PolicyConfigManager>,
    rules: Arc<dyn ConcurrencyRuleTable>,
}

impl PipeSelector {
    #[must_use]
    pub fn new(
        registry: Arc<PipeRegistry>,
        policy: Arc<dyn PolicyConfigManager>,
        rules: Arc<dyn ConcurrencyRuleTable>,
    ) -> Self {
        Self { registry, policy, rules }
    }

    /// Selector whose policy also supplies the concurrency rules.
    #[must_use]
    pub fn with_policy(registry: Arc<PipeRegistry>, policy: Arc<StaticPolicy>) -> Self {
        Self::new(registry, policy.clone(), policy)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PipeRegistry> {
        &self.registry
    }

    /// Plan the session's role pipes with the session merged in.
    ///
    /// On success the session's route flag and action are updated. If the
    /// policy cannot place the session, the registry snapshot is returned
    /// unchanged and so is the session.
    pub fn fetch_pipe(&self, session: &mut SessionDescriptor) -> Vec<PipeDescriptor> {
        let role = session.role();
        let snapshot = self.registry.get_role(role);
        let mut pipes = snapshot.clone();
        let mut incoming = session.clone();

        // A session appears at most once
        let mut stale = None;
        for (index, pipe) in pipes.iter_mut().enumerate() {
            if pipe.detach(incoming.session_id).is_some() {
                stale.get_or_insert(index);
            }
        }

        if incoming.route_flag.is_unset() {
            incoming.route_flag = self.policy.route_flag(&incoming);
            ConcurrencyResolver::new(self.rules.as_ref()).scan(&mut pipes, &mut incoming);
        }
        incoming.action = SessionAction::New;

        let matcher = PipeMatcher::new(self.policy.as_ref());
        let placement = match matcher.resolve(&incoming) {
            Ok(placement) => placement,
            Err(e) => {
                warn!(session_id = incoming.session_id, error = %e, "Cannot place session");
                return snapshot;
            }
        };

        let session_id = incoming.session_id;
        let target = matcher.place(&mut pipes, incoming, &placement);
        if let Some(source) = stale.filter(|&s| s != target) {
            pipes[source].mark_updated();
        }
        if let Some(placed) = pipes[target].session(session_id) {
            session.route_flag = placed.route_flag;
            session.action = placed.action;
        }

        matcher.relocate_demoted(&mut pipes, |pipe, relocated| {
            debug!(session_id = relocated, pipe = %pipe, "Resident relocated");
        });

        debug!(session_id, %role, pipes = pipes.len(), "Planned pipes for session");
        pipes
    }

    /// Replan every session of one role. All sessions must share a role;
    /// sessions of the other role are skipped.
    pub fn fetch_pipes(&self, sessions: &mut [SessionDescriptor]) -> Vec<PipeDescriptor> {
        let Some(role) = sessions.first().map(SessionDescriptor::role) else {
            return Vec::new();
        };
        let current = self.registry.get_role(role);
        BatchReconciler::new(self.policy.as_ref(), self.rules.as_ref()).reconcile(&current, sessions)
    }

    /// Install a planned pipe list for one role.
    pub fn commit(&self, role: PipeRole, pipes: Vec<PipeDescriptor>) {
        info!(%role, pipes = pipes.len(), "Committing pipes");
        self.registry.replace_role_pipes(role, pipes);
    }
}
