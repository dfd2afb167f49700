//! Conflict resolution between a resident and an incoming session.

use tracing::debug;

use arbiter_core::{AudioMode, ConcurrencyAction, ConcurrencyRuleTable, PipeDescriptor, SessionAction, SessionDescriptor};

/// Applies the concurrency rule table to pairs of sessions.
pub struct ConcurrencyResolver<'a> {
    rules: &'a dyn ConcurrencyRuleTable,
}

impl<'a> ConcurrencyResolver<'a> {
    #[must_use]
    pub fn new(rules: &'a dyn ConcurrencyRuleTable) -> Self {
        Self { rules }
    }

    /// Resolve one (resident, incoming) pair.
    ///
    /// Returns true if the resident session was changed, in which case the
    /// pipe holding it has to be marked updated.
    pub fn resolve(&self, resident: &mut SessionDescriptor, incoming: &mut SessionDescriptor) -> bool {
        let existing_type = resident.pipe_type();
        let incoming_type = incoming.pipe_type();
        let action = self.rules.concurrency_action(existing_type, incoming_type);
        debug!(
            resident = resident.session_id,
            incoming = incoming.session_id,
            ?existing_type,
            ?incoming_type,
            ?action,
            "Concurrency rule"
        );

        match action {
            ConcurrencyAction::PlayBoth => false,
            ConcurrencyAction::ConcedeIncoming => {
                incoming.demote_to_normal();
                false
            }
            ConcurrencyAction::ConcedeExisting => {
                // Capture sessions cannot share non-normal tiers, even transitively
                if resident.audio_mode == AudioMode::Record && incoming.audio_mode == AudioMode::Record {
                    incoming.demote_to_normal();
                }
                resident.demote_to_normal();
                resident.action = SessionAction::Recreate;
                true
            }
        }
    }

    /// Resolve the incoming session against every resident session of every pipe.
    pub fn scan(&self, pipes: &mut [PipeDescriptor], incoming: &mut SessionDescriptor) {
        for pipe in pipes.iter_mut() {
            let mut touched = false;
            for resident in pipe.sessions_mut() {
                if resident.session_id == incoming.session_id {
                    continue;
                }
                touched |= self.resolve(resident, incoming);
            }
            if touched {
                pipe.mark_updated();
            }
        }
        debug!(session_id = incoming.session_id, route_flag = %incoming.route_flag, "Route flag after concurrency");
    }
}

#[cfg(test)]
mod tests {
    use arbiter_core::{ConcurrencyRules, PipeAction, PipeRole, PipeType, RouteFlag};

    use super::*;

    fn session(id: u32, mode: AudioMode, flag: RouteFlag) -> SessionDescriptor {
        let mut s = SessionDescriptor::new(id, mode);
        s.route_flag = flag;
        s
    }

    fn rules(existing: PipeType, incoming: PipeType, action: ConcurrencyAction) -> ConcurrencyRules {
        ConcurrencyRules::new().with_rule(existing, incoming, action)
    }

    #[test]
    fn test_play_both_changes_nothing() {
        let table = ConcurrencyRules::new();
        let resolver = ConcurrencyResolver::new(&table);
        let mut resident = session(1, AudioMode::Playback, RouteFlag::OUTPUT_FAST);
        resident.action = SessionAction::Move;
        let mut incoming = session(2, AudioMode::Playback, RouteFlag::OUTPUT_FAST);

        assert!(!resolver.resolve(&mut resident, &mut incoming));
        assert_eq!(resident.route_flag, RouteFlag::OUTPUT_FAST);
        assert_eq!(resident.action, SessionAction::Move);
        assert_eq!(incoming.route_flag, RouteFlag::OUTPUT_FAST);
    }

    #[test]
    fn test_concede_incoming_demotes_incoming() {
        let table = rules(PipeType::CallIn, PipeType::LowLatencyIn, ConcurrencyAction::ConcedeIncoming);
        let resolver = ConcurrencyResolver::new(&table);
        let mut resident = session(1, AudioMode::Record, RouteFlag::INPUT_FAST | RouteFlag::INPUT_VOIP);
        let mut incoming = session(2, AudioMode::Record, RouteFlag::INPUT_FAST);

        assert!(!resolver.resolve(&mut resident, &mut incoming));
        assert_eq!(incoming.route_flag, RouteFlag::INPUT_NORMAL);
        assert_eq!(incoming.action, SessionAction::Default);
        assert_eq!(resident.route_flag, RouteFlag::INPUT_FAST | RouteFlag::INPUT_VOIP);
    }

    #[test]
    fn test_concede_existing_demotes_resident() {
        let table = rules(PipeType::DirectOut, PipeType::DirectOut, ConcurrencyAction::ConcedeExisting);
        let resolver = ConcurrencyResolver::new(&table);
        let mut resident = session(1, AudioMode::Playback, RouteFlag::OUTPUT_DIRECT);
        let mut incoming = session(2, AudioMode::Playback, RouteFlag::OUTPUT_DIRECT);

        assert!(resolver.resolve(&mut resident, &mut incoming));
        assert_eq!(resident.route_flag, RouteFlag::OUTPUT_NORMAL);
        assert!(!resident.route_flag.is_scarce());
        assert_eq!(resident.action, SessionAction::Recreate);
        assert_eq!(incoming.route_flag, RouteFlag::OUTPUT_DIRECT);
    }

    #[test]
    fn test_concede_existing_between_records_demotes_both() {
        let table = rules(PipeType::LowLatencyIn, PipeType::CallIn, ConcurrencyAction::ConcedeExisting);
        let resolver = ConcurrencyResolver::new(&table);
        let mut resident = session(1, AudioMode::Record, RouteFlag::INPUT_FAST);
        let mut incoming = session(2, AudioMode::Record, RouteFlag::INPUT_FAST | RouteFlag::INPUT_VOIP);

        assert!(resolver.resolve(&mut resident, &mut incoming));
        assert_eq!(resident.route_flag, RouteFlag::INPUT_NORMAL);
        assert_eq!(incoming.route_flag, RouteFlag::INPUT_NORMAL);
    }

    #[test]
    fn test_scan_marks_touched_pipe_only() {
        let table = rules(PipeType::LowLatencyOut, PipeType::LowLatencyOut, ConcurrencyAction::ConcedeExisting);
        let resolver = ConcurrencyResolver::new(&table);

        let mut normal = PipeDescriptor::new("primary", "primary_output", RouteFlag::OUTPUT_NORMAL, PipeRole::Output);
        normal.attach(session(1, AudioMode::Playback, RouteFlag::OUTPUT_NORMAL));
        let mut fast = PipeDescriptor::new("primary", "fast_output", RouteFlag::OUTPUT_FAST, PipeRole::Output);
        fast.attach(session(2, AudioMode::Playback, RouteFlag::OUTPUT_FAST));
        let mut pipes = vec![normal, fast];

        let mut incoming = session(3, AudioMode::Playback, RouteFlag::OUTPUT_FAST);
        resolver.scan(&mut pipes, &mut incoming);

        assert_eq!(pipes[0].action, PipeAction::Default);
        assert_eq!(pipes[1].action, PipeAction::Update);
        assert_eq!(pipes[1].sessions()[0].route_flag, RouteFlag::OUTPUT_NORMAL);
        assert_eq!(incoming.route_flag, RouteFlag::OUTPUT_FAST);
    }

    #[test]
    fn test_scan_skips_own_stale_copy() {
        let table = rules(PipeType::LowLatencyOut, PipeType::LowLatencyOut, ConcurrencyAction::ConcedeExisting);
        let resolver = ConcurrencyResolver::new(&table);

        let mut fast = PipeDescriptor::new("primary", "fast_output", RouteFlag::OUTPUT_FAST, PipeRole::Output);
        fast.attach(session(1, AudioMode::Playback, RouteFlag::OUTPUT_FAST));
        let mut pipes = vec![fast];

        let mut incoming = session(1, AudioMode::Playback, RouteFlag::OUTPUT_FAST);
        resolver.scan(&mut pipes, &mut incoming);

        assert_eq!(pipes[0].action, PipeAction::Default);
        assert_eq!(pipes[0].sessions()[0].route_flag, RouteFlag::OUTPUT_FAST);
    }
}
