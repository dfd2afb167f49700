//! Batch replanning of every session of one role.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use arbiter_core::{ConcurrencyRuleTable, PipeAction, PipeDescriptor, PolicyConfigManager, SessionAction, SessionDescriptor};

use crate::matcher::PipeMatcher;
use crate::resolver::ConcurrencyResolver;

/// Transition a session needs when moving from `old` to `new`.
///
/// Dedicated tiers cannot be relocated live, so leaving or entering one
/// forces the stream to be recreated.
#[must_use]
pub fn judge_action(new: &PipeDescriptor, old: &PipeDescriptor) -> SessionAction {
    if new.matches(&old.adapter_name, old.route_flag) {
        SessionAction::Default
    } else if new.route_flag.is_dedicated() || old.route_flag.is_dedicated() {
        SessionAction::Recreate
    } else {
        SessionAction::Move
    }
}

/// Rebuilds a role's pipe list from scratch for a set of sessions.
pub struct BatchReconciler<'a> {
    policy: &'a dyn PolicyConfigManager,
    resolver: ConcurrencyResolver<'a>,
    matcher: PipeMatcher<'a>,
}

impl<'a> BatchReconciler<'a> {
    #[must_use]
    pub fn new(policy: &'a dyn PolicyConfigManager, rules: &'a dyn ConcurrencyRuleTable) -> Self {
        Self { policy, resolver: ConcurrencyResolver::new(rules), matcher: PipeMatcher::new(policy) }
    }

    /// Plan a fresh pipe list for `sessions`, starting from the role's current
    /// pipes. Placed sessions get their route flag and action written back.
    /// A session that cannot be placed keeps its previous pipe and route, or
    /// is left out of the plan if it had none.
    pub fn reconcile(&self, current: &[PipeDescriptor], sessions: &mut [SessionDescriptor]) -> Vec<PipeDescriptor> {
        let Some(role) = sessions.first().map(SessionDescriptor::role) else {
            debug!("No sessions to reconcile");
            return Vec::new();
        };

        // Where every session lived before this pass
        let mut previous: HashMap<u32, PipeDescriptor> = HashMap::new();
        for pipe in current.iter().filter(|p| p.role == role) {
            let mut stripped = pipe.clone();
            stripped.clear_sessions();
            for session in pipe.sessions() {
                previous.insert(session.session_id, stripped.clone());
            }
        }

        let mut working: Vec<PipeDescriptor> = current
            .iter()
            .filter(|p| p.role == role)
            .map(|p| {
                let mut pipe = p.clone();
                pipe.clear_sessions();
                pipe.action = PipeAction::Default;
                pipe
            })
            .collect();
        let original = working.len();

        let mut order: Vec<usize> = (0..sessions.len()).collect();
        order.sort_by_key(|&i| sessions[i].start_timestamp);

        for index in order {
            let mut session = sessions[index].clone();
            if session.role() != role {
                warn!(session_id = session.session_id, %role, "Skipping session of the other role");
                continue;
            }

            session.route_flag = self.policy.route_flag(&session);
            session.action = SessionAction::Default;

            let mut trial = working.clone();
            self.resolver.scan(&mut trial, &mut session);
            let placement = match self.matcher.resolve(&session) {
                Ok(placement) => placement,
                Err(e) => {
                    warn!(session_id = session.session_id, error = %e, "Session left unplaced");
                    Self::keep_previous(current, &previous, &mut working, session.session_id);
                    continue;
                }
            };
            working = trial;

            let session_id = session.session_id;
            let target = self.matcher.place(&mut working, session, &placement);
            let action = Self::action_for(&previous, &working[target], session_id);
            if let Some(placed) = working[target].session_mut(session_id) {
                placed.action = action;
            }
        }

        self.matcher.relocate_demoted(&mut working, |pipe, session_id| {
            let action = Self::action_for(&previous, pipe, session_id);
            if let Some(placed) = pipe.session_mut(session_id) {
                placed.action = action;
            }
        });

        // Emptied pipes are left for the caller to reclaim
        for pipe in working[..original].iter_mut().filter(|p| p.is_idle()) {
            pipe.action = PipeAction::Default;
        }

        for session in sessions.iter_mut() {
            if let Some(placed) = working.iter().find_map(|p| p.session(session.session_id)) {
                session.route_flag = placed.route_flag;
                session.action = placed.action;
            }
        }

        info!(%role, pipes = working.len(), sessions = sessions.len(), "Replanned pipes");
        working
    }

    /// Put the registry copy of an unplaceable session back on its old pipe.
    fn keep_previous(
        current: &[PipeDescriptor],
        previous: &HashMap<u32, PipeDescriptor>,
        working: &mut [PipeDescriptor],
        session_id: u32,
    ) {
        let Some(old) = previous.get(&session_id) else {
            return;
        };
        let Some(mut kept) = current.iter().find_map(|p| p.session(session_id)).cloned() else {
            return;
        };
        if let Some(pipe) = working.iter_mut().find(|p| p.matches(&old.adapter_name, old.route_flag)) {
            debug!(session_id, pipe = %pipe, "Session keeps its previous pipe");
            kept.action = SessionAction::Default;
            pipe.attach(kept);
        }
    }

    fn action_for(previous: &HashMap<u32, PipeDescriptor>, pipe: &PipeDescriptor, session_id: u32) -> SessionAction {
        previous.get(&session_id).map_or(SessionAction::New, |old| judge_action(pipe, old))
    }
}
