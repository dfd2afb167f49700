//! Matching sessions to existing pipes or synthesizing new ones.

use tracing::{debug, info, warn};

use arbiter_core::{
    Error, ModuleInfo, PipeAction, PipeDescriptor, PipeTemplate, PolicyConfigManager, Result, SessionDescriptor,
    StreamPropInfo, TemplateKind,
};

/// Channel count multichannel buffers are scaled down to.
const STEREO: u32 = 2;

/// Where a session should go, resolved from the policy.
#[derive(Debug, Clone)]
pub struct Placement {
    pub props: StreamPropInfo,
    pub template: PipeTemplate,
}

impl Placement {
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.props.template.adapter
    }
}

/// Finds a compatible pipe for a session or builds one.
pub struct PipeMatcher<'a> {
    policy: &'a dyn PolicyConfigManager,
}

impl<'a> PipeMatcher<'a> {
    #[must_use]
    pub fn new(policy: &'a dyn PolicyConfigManager) -> Self {
        Self { policy }
    }

    /// Resolve stream properties and template for the session's route flag.
    ///
    /// # Errors
    /// Returns [`Error::MissingDependency`] if the policy has no answer.
    pub fn resolve(&self, session: &SessionDescriptor) -> Result<Placement> {
        let props = self
            .policy
            .stream_prop_info(session)
            .ok_or_else(|| Error::missing(session.session_id, "stream prop info"))?;
        let template = self
            .policy
            .pipe_template(&props.template)
            .filter(|t| t.role == session.role())
            .ok_or_else(|| Error::missing(session.session_id, "pipe template"))?;
        Ok(Placement { props, template })
    }

    /// Attach the session to the pipe matching its adapter and route flag,
    /// or append a new pipe for it. Returns the index of the pipe used.
    pub fn place(&self, pipes: &mut Vec<PipeDescriptor>, session: SessionDescriptor, placement: &Placement) -> usize {
        let adapter = placement.adapter_name();
        if let Some(index) = pipes.iter().position(|p| p.matches(adapter, session.route_flag)) {
            let pipe = &mut pipes[index];
            debug!(session_id = session.session_id, pipe = %pipe, "Using existing pipe");
            pipe.attach(session);
            pipe.mark_updated();
            return index;
        }

        let pipe = self.build_pipe(session, placement);
        info!(pipe = %pipe, "Using new pipe");
        pipes.push(pipe);
        pipes.len() - 1
    }

    /// Synthesize a new pipe carrying the session.
    #[must_use]
    pub fn build_pipe(&self, session: SessionDescriptor, placement: &Placement) -> PipeDescriptor {
        let Placement { props, template } = placement;
        let adapter = placement.adapter_name();

        let mut module_info = ModuleInfo {
            format: props.format.clone(),
            rate: props.sample_rate,
            channels: props.channels,
            buffer_size: props.buffer_size,
            lib: template.lib.clone(),
            pa_role: template.pa_role.clone(),
            module_name: template.module_name.clone(),
            adapter_name: adapter.to_string(),
            class_name: adapter.to_string(),
            open_mic_speaker: self.policy.update_route_support(),
            device_type: session.device.device_type,
            network_id: session.device.network_id.clone(),
            source_type: session.source_type,
            ..ModuleInfo::default()
        };

        match template.kind {
            TemplateKind::Standard => {}
            TemplateKind::Multichannel => {
                module_info.class_name = "multichannel".to_string();
                module_info.file_name = Some("mch_dump_file".to_string());
                module_info.fixed_latency = true;
                if props.channels > 0 {
                    module_info.buffer_size = props.buffer_size / props.channels * STEREO;
                } else {
                    warn!(pipe = %template.name, "Multichannel template without channels");
                }
            }
            TemplateKind::Offload => {
                module_info.class_name = "offload".to_string();
                module_info.file_name = Some("offload_dump_file".to_string());
                module_info.fixed_latency = true;
                module_info.offload_enable = true;
            }
        }

        let mut pipe = PipeDescriptor::new(adapter, &template.name, session.route_flag, template.role);
        pipe.module_info = module_info;
        pipe.action = PipeAction::New;
        pipe.attach(session);
        pipe
    }

    /// Move every session whose route flag no longer matches its pipe onto a
    /// pipe for its new flag. `on_placed` sees each relocated session in its
    /// new pipe. Sessions that cannot be resolved stay where they were.
    pub fn relocate_demoted<F>(&self, pipes: &mut Vec<PipeDescriptor>, mut on_placed: F)
    where
        F: FnMut(&mut PipeDescriptor, u32),
    {
        let original_len = pipes.len();
        for index in 0..original_len {
            let moved = pipes[index].detach_mismatched();
            if moved.is_empty() {
                continue;
            }
            pipes[index].mark_updated();

            for session in moved {
                let session_id = session.session_id;
                match self.resolve(&session) {
                    Ok(placement) => {
                        debug!(session_id, route_flag = %session.route_flag, "Relocating demoted session");
                        let target = self.place(pipes, session, &placement);
                        on_placed(&mut pipes[target], session_id);
                    }
                    Err(e) => {
                        warn!(session_id, error = %e, "Demoted session left on its pipe");
                        pipes[index].attach(session);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use arbiter_core::{
        AudioMode, DeviceInfo, DeviceType, PipeRole, PolicyConfig, RouteFlag, SessionAction, StaticPolicy,
    };

    use super::*;

    fn playback(id: u32, flag: RouteFlag) -> SessionDescriptor {
        let mut s = SessionDescriptor::new(id, AudioMode::Playback);
        s.route_flag = flag;
        s
    }

    #[test]
    fn test_resolve_uses_route_flag() {
        let policy = StaticPolicy::default();
        let matcher = PipeMatcher::new(&policy);

        let placement = matcher.resolve(&playback(1, RouteFlag::OUTPUT_FAST)).unwrap();
        assert_eq!(placement.adapter_name(), "primary");
        assert_eq!(placement.template.name, "fast_output");
    }

    #[test]
    fn test_resolve_missing_props() {
        let policy = StaticPolicy::default();
        let matcher = PipeMatcher::new(&policy);

        let result = matcher.resolve(&playback(9, RouteFlag::OUTPUT_LOWPOWER));
        assert!(matches!(result, Err(Error::MissingDependency { session_id: 9, .. })));
    }

    #[test]
    fn test_place_reuses_matching_pipe() {
        let policy = StaticPolicy::default();
        let matcher = PipeMatcher::new(&policy);
        let mut pipes = Vec::new();

        let s1 = playback(1, RouteFlag::OUTPUT_NORMAL);
        let placement = matcher.resolve(&s1).unwrap();
        assert_eq!(matcher.place(&mut pipes, s1, &placement), 0);
        assert_eq!(pipes[0].action, PipeAction::New);

        let s2 = playback(2, RouteFlag::OUTPUT_NORMAL);
        assert_eq!(matcher.place(&mut pipes, s2, &placement), 0);
        assert_eq!(pipes.len(), 1);
        assert_eq!(pipes[0].session_count(), 2);
        // Still has to be opened
        assert_eq!(pipes[0].action, PipeAction::New);
    }

    #[test]
    fn test_build_pipe_from_template() {
        let mut config = PolicyConfig::default();
        config.update_route_support = true;
        let policy = StaticPolicy::new(config);
        let matcher = PipeMatcher::new(&policy);

        let session = playback(1, RouteFlag::OUTPUT_FAST).with_device(DeviceInfo::local(DeviceType::WiredHeadset));
        let placement = matcher.resolve(&session).unwrap();
        let pipe = matcher.build_pipe(session, &placement);

        assert_eq!(pipe.adapter_name, "primary");
        assert_eq!(pipe.name, "fast_output");
        assert_eq!(pipe.role, PipeRole::Output);
        assert_eq!(pipe.route_flag, RouteFlag::OUTPUT_FAST);
        assert_eq!(pipe.action, PipeAction::New);
        assert!(pipe.contains(1));
        assert_eq!(pipe.module_info.module_name, "Speaker_mmap");
        assert_eq!(pipe.module_info.class_name, "primary");
        assert_eq!(pipe.module_info.buffer_size, 1920);
        assert_eq!(pipe.module_info.device_type, DeviceType::WiredHeadset);
        assert!(pipe.module_info.open_mic_speaker);
        assert!(pipe.module_info.file_name.is_none());
    }

    #[test]
    fn test_multichannel_overrides() {
        let policy = StaticPolicy::default();
        let matcher = PipeMatcher::new(&policy);
        let session = playback(1, RouteFlag::OUTPUT_MULTICHANNEL);
        let placement = matcher.resolve(&session).unwrap();
        let pipe = matcher.build_pipe(session, &placement);

        assert_eq!(pipe.module_info.class_name, "multichannel");
        assert_eq!(pipe.module_info.file_name.as_deref(), Some("mch_dump_file"));
        assert!(pipe.module_info.fixed_latency);
        // 11520 bytes over 6 channels, rescaled to stereo
        assert_eq!(pipe.module_info.buffer_size, 3840);
    }

    #[test]
    fn test_offload_overrides() {
        let policy = StaticPolicy::default();
        let matcher = PipeMatcher::new(&policy);
        let session = playback(1, RouteFlag::OUTPUT_COMPRESS_OFFLOAD);
        let placement = matcher.resolve(&session).unwrap();
        let pipe = matcher.build_pipe(session, &placement);

        assert_eq!(pipe.module_info.class_name, "offload");
        assert_eq!(pipe.module_info.file_name.as_deref(), Some("offload_dump_file"));
        assert!(pipe.module_info.offload_enable);
        assert!(pipe.module_info.fixed_latency);
    }

    #[test]
    fn test_relocate_demoted_moves_to_normal_pipe() {
        let policy = StaticPolicy::default();
        let matcher = PipeMatcher::new(&policy);

        let mut fast = PipeDescriptor::new("primary", "fast_output", RouteFlag::OUTPUT_FAST, PipeRole::Output);
        let mut demoted = playback(1, RouteFlag::OUTPUT_NORMAL);
        demoted.action = SessionAction::Recreate;
        fast.attach(demoted);
        fast.attach(playback(2, RouteFlag::OUTPUT_FAST));
        let mut pipes = vec![fast];

        let mut relocated = Vec::new();
        matcher.relocate_demoted(&mut pipes, |pipe, id| relocated.push((id, pipe.route_flag)));

        assert_eq!(relocated, vec![(1, RouteFlag::OUTPUT_NORMAL)]);
        assert_eq!(pipes.len(), 2);
        assert_eq!(pipes[0].action, PipeAction::Update);
        assert!(!pipes[0].contains(1));
        assert!(pipes[1].contains(1));
        assert_eq!(pipes[1].action, PipeAction::New);
        assert_eq!(pipes[1].session(1).unwrap().action, SessionAction::Recreate);
    }

    #[test]
    fn test_relocate_unresolvable_stays() {
        let policy = StaticPolicy::default();
        let matcher = PipeMatcher::new(&policy);

        let mut fast = PipeDescriptor::new("primary", "fast_output", RouteFlag::OUTPUT_FAST, PipeRole::Output);
        fast.attach(playback(1, RouteFlag::OUTPUT_LOWPOWER));
        let mut pipes = vec![fast];

        matcher.relocate_demoted(&mut pipes, |_, _| panic!("nothing should be placed"));
        assert_eq!(pipes.len(), 1);
        assert!(pipes[0].contains(1));
    }
}
