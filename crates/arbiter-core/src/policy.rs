//! Policy lookups consumed by arbitration.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::concurrency::{ConcurrencyAction, ConcurrencyRuleTable, ConcurrencyRules};
use crate::config::{PipeTemplate, PolicyConfig};
use crate::error::Result;
use crate::flags::RouteFlag;
use crate::pipe::PipeType;
use crate::session::SessionDescriptor;

/// Key of a pipe template inside the policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateKey {
    pub adapter: String,
    pub pipe: String,
}

impl TemplateKey {
    #[must_use]
    pub fn new(adapter: &str, pipe: &str) -> Self {
        Self { adapter: adapter.to_string(), pipe: pipe.to_string() }
    }
}

/// Stream properties resolved for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPropInfo {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u32,
    pub buffer_size: u32,
    /// Template the session should be opened on
    pub template: TemplateKey,
}

/// Device and format selection used by the pipe selector.
pub trait PolicyConfigManager: Send + Sync {
    /// Resolve the route flag for a session.
    fn route_flag(&self, session: &SessionDescriptor) -> RouteFlag;

    /// Resolve stream properties and the pipe template for the session's
    /// current route flag.
    fn stream_prop_info(&self, session: &SessionDescriptor) -> Option<StreamPropInfo>;

    /// Look up a pipe template.
    fn pipe_template(&self, key: &TemplateKey) -> Option<PipeTemplate>;

    /// Whether opened pipes may switch mic/speaker routes live.
    fn update_route_support(&self) -> bool {
        false
    }
}

/// A validated policy with its rule table built.
#[derive(Debug)]
struct LoadedPolicy {
    config: PolicyConfig,
    rules: ConcurrencyRules,
}

impl LoadedPolicy {
    fn new(config: PolicyConfig) -> Self {
        let rules = config.concurrency.iter().copied().collect();
        Self { config, rules }
    }
}

/// Policy backed by a [`PolicyConfig`] that can be swapped atomically.
///
/// Readers never block; a reload is visible to the next lookup.
#[derive(Debug)]
pub struct StaticPolicy {
    current: ArcSwap<LoadedPolicy>,
}

impl StaticPolicy {
    /// Create a policy from an already validated config.
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        Self { current: ArcSwap::from_pointee(LoadedPolicy::new(config)) }
    }

    /// Validate and install a new config.
    ///
    /// # Errors
    /// Returns an error and keeps the previous config if validation fails.
    pub fn reload(&self, config: PolicyConfig) -> Result<()> {
        config.validate()?;
        info!(
            adapters = config.adapters.len(),
            routes = config.routes.len(),
            "Installing new policy config"
        );
        self.current.store(Arc::new(LoadedPolicy::new(config)));
        Ok(())
    }

    /// Snapshot of the active config.
    #[must_use]
    pub fn config(&self) -> PolicyConfig {
        self.current.load().config.clone()
    }
}

impl Default for StaticPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

impl PolicyConfigManager for StaticPolicy {
    fn route_flag(&self, session: &SessionDescriptor) -> RouteFlag {
        let policy = self.current.load();
        let config = &policy.config;
        let flag = config
            .routes
            .iter()
            .find(|r| r.matches_request(session))
            .and_then(|r| config.template(&r.adapter, &r.pipe))
            .map_or_else(|| RouteFlag::normal_for(session.role()), |t| t.route_flag);
        debug!(session_id = session.session_id, requested = %session.requested_flag, %flag, "Route flag resolved");
        flag
    }

    fn stream_prop_info(&self, session: &SessionDescriptor) -> Option<StreamPropInfo> {
        let policy = self.current.load();
        let config = &policy.config;
        config.routes.iter().filter(|r| r.applies_to(session)).find_map(|r| {
            let template = config.template(&r.adapter, &r.pipe)?;
            (template.route_flag == session.route_flag).then(|| StreamPropInfo {
                format: template.stream.format.clone(),
                sample_rate: template.stream.sample_rate,
                channels: template.stream.channels,
                buffer_size: template.stream.buffer_size,
                template: TemplateKey::new(&r.adapter, &r.pipe),
            })
        })
    }

    fn pipe_template(&self, key: &TemplateKey) -> Option<PipeTemplate> {
        self.current.load().config.template(&key.adapter, &key.pipe).cloned()
    }

    fn update_route_support(&self) -> bool {
        self.current.load().config.update_route_support
    }
}

impl ConcurrencyRuleTable for StaticPolicy {
    fn concurrency_action(&self, existing: PipeType, incoming: PipeType) -> ConcurrencyAction {
        self.current.load().rules.concurrency_action(existing, incoming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplateKind;
    use crate::session::{AudioMode, DeviceInfo, DeviceType};

    fn playback(id: u32, requested: RouteFlag) -> SessionDescriptor {
        SessionDescriptor::new(id, AudioMode::Playback).with_requested_flag(requested)
    }

    #[test]
    fn test_route_flag_from_request() {
        let policy = StaticPolicy::default();

        assert_eq!(policy.route_flag(&playback(1, RouteFlag::OUTPUT_FAST)), RouteFlag::OUTPUT_FAST);
        assert_eq!(
            policy.route_flag(&playback(2, RouteFlag::OUTPUT_FAST | RouteFlag::OUTPUT_VOIP)),
            RouteFlag::OUTPUT_FAST | RouteFlag::OUTPUT_VOIP
        );
        assert_eq!(policy.route_flag(&playback(3, RouteFlag::empty())), RouteFlag::OUTPUT_NORMAL);

        let record = SessionDescriptor::new(4, AudioMode::Record).with_requested_flag(RouteFlag::INPUT_FAST);
        assert_eq!(policy.route_flag(&record), RouteFlag::INPUT_FAST);
    }

    #[test]
    fn test_device_rule_overrides_request() {
        let policy = StaticPolicy::default();
        let session = playback(1, RouteFlag::OUTPUT_FAST).with_device(DeviceInfo::local(DeviceType::BluetoothA2dp));

        assert_eq!(policy.route_flag(&session), RouteFlag::OUTPUT_NORMAL);
    }

    #[test]
    fn test_route_flag_without_rules_is_normal() {
        let config = PolicyConfig { routes: Vec::new(), ..PolicyConfig::default() };
        let policy = StaticPolicy::new(config);
        let record = SessionDescriptor::new(1, AudioMode::Record).with_requested_flag(RouteFlag::INPUT_FAST);

        assert_eq!(policy.route_flag(&record), RouteFlag::INPUT_NORMAL);
    }

    #[test]
    fn test_stream_props_follow_route_flag() {
        let policy = StaticPolicy::default();
        let mut session = playback(1, RouteFlag::OUTPUT_FAST);

        session.route_flag = RouteFlag::OUTPUT_FAST;
        let info = policy.stream_prop_info(&session).expect("fast template");
        assert_eq!(info.template, TemplateKey::new("primary", "fast_output"));
        assert_eq!(info.buffer_size, 1920);

        // A demoted session resolves to the normal template
        session.route_flag = RouteFlag::OUTPUT_NORMAL;
        let info = policy.stream_prop_info(&session).expect("normal template");
        assert_eq!(info.template, TemplateKey::new("primary", "primary_output"));
    }

    #[test]
    fn test_stream_props_missing_for_unknown_tier() {
        let policy = StaticPolicy::default();
        let mut session = playback(1, RouteFlag::empty());
        session.route_flag = RouteFlag::OUTPUT_LOWPOWER;

        assert!(policy.stream_prop_info(&session).is_none());
    }

    #[test]
    fn test_pipe_template_lookup() {
        let policy = StaticPolicy::default();
        let template = policy.pipe_template(&TemplateKey::new("primary", "offload_output")).unwrap();
        assert_eq!(template.kind, TemplateKind::Offload);
        assert!(policy.pipe_template(&TemplateKey::new("primary", "nope")).is_none());
    }

    #[test]
    fn test_reload_swaps_rules() {
        let policy = StaticPolicy::default();
        assert_eq!(
            policy.concurrency_action(PipeType::LowLatencyOut, PipeType::LowLatencyOut),
            ConcurrencyAction::ConcedeExisting
        );

        let config = PolicyConfig { concurrency: Vec::new(), ..PolicyConfig::default() };
        policy.reload(config).unwrap();
        assert_eq!(
            policy.concurrency_action(PipeType::LowLatencyOut, PipeType::LowLatencyOut),
            ConcurrencyAction::PlayBoth
        );
    }

    #[test]
    fn test_reload_rejects_invalid_config() {
        let policy = StaticPolicy::default();
        let mut config = PolicyConfig::default();
        config.adapters.clear();

        assert!(policy.reload(config).is_err());
        assert_eq!(policy.config(), PolicyConfig::default());
    }
}
