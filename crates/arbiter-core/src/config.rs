//! Policy configuration: adapters, pipe templates, route rules and concurrency rules.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::concurrency::{ConcurrencyRule, default_rules};
use crate::error::{Error, Result};
use crate::flags::RouteFlag;
use crate::pipe::PipeRole;
use crate::session::{AudioMode, DeviceType, SessionDescriptor};

/// Module name of the built-in microphone source.
pub const PRIMARY_MIC: &str = "Built_in_mic";
/// Module name of the Bluetooth microphone source.
pub const BLUETOOTH_MIC: &str = "Bt_Mic";

/// Template specific module overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    #[default]
    Standard,
    /// Multichannel render pipe, buffer scaled to stereo
    Multichannel,
    /// Compressed offload render pipe
    Offload,
}

/// Default stream properties of a pipe template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProps {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
}

impl Default for StreamProps {
    fn default() -> Self {
        Self {
            format: default_format(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_format() -> String {
    "s16le".to_string()
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_channels() -> u32 {
    2
}

fn default_buffer_size() -> u32 {
    3840
}

/// A pipe an adapter is able to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeTemplate {
    /// Template name (e.g. "fast_output")
    pub name: String,
    pub role: PipeRole,
    /// Tier served by pipes opened from this template
    pub route_flag: RouteFlag,
    #[serde(default)]
    pub kind: TemplateKind,
    /// Sink/source library
    #[serde(default)]
    pub lib: String,
    /// Sound server role ("sink" or "source")
    #[serde(default)]
    pub pa_role: String,
    pub module_name: String,
    #[serde(default)]
    pub stream: StreamProps,
}

/// An audio adapter and the pipes it offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterInfo {
    pub name: String,
    #[serde(default)]
    pub pipes: Vec<PipeTemplate>,
}

impl AdapterInfo {
    #[must_use]
    pub fn pipe(&self, name: &str) -> Option<&PipeTemplate> {
        self.pipes.iter().find(|p| p.name == name)
    }
}

/// Maps a session to a pipe template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub mode: AudioMode,
    /// Bits the session must have requested; empty matches any request
    #[serde(default)]
    pub requested: RouteFlag,
    /// Only match sessions on this device
    #[serde(default)]
    pub device_type: Option<DeviceType>,
    pub adapter: String,
    pub pipe: String,
}

impl RouteRule {
    /// Whether the rule applies to the session's mode and device.
    #[must_use]
    pub fn applies_to(&self, session: &SessionDescriptor) -> bool {
        self.mode == session.audio_mode
            && self.device_type.is_none_or(|d| d == session.device.device_type)
    }

    /// Whether the rule matches what the session requested.
    #[must_use]
    pub fn matches_request(&self, session: &SessionDescriptor) -> bool {
        self.applies_to(session) && session.requested_flag.contains(self.requested)
    }
}

/// Complete policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Whether opened pipes may switch mic/speaker routes live
    #[serde(default)]
    pub update_route_support: bool,
    #[serde(default)]
    pub adapters: Vec<AdapterInfo>,
    /// Route rules, first match wins
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    #[serde(default)]
    pub concurrency: Vec<ConcurrencyRule>,
}

impl PolicyConfig {
    /// Parse and validate a policy from TOML text.
    ///
    /// # Errors
    /// Returns an error if the text is not valid TOML or the policy is inconsistent.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a policy file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        info!(?path, "Loading policy config");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check that every route points at an existing template of the right role
    /// and that no adapter offers two templates for the same tier.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let mut adapter_names = HashSet::new();
        for adapter in &self.adapters {
            if !adapter_names.insert(adapter.name.as_str()) {
                return Err(Error::InvalidConfig(format!("duplicate adapter {}", adapter.name)));
            }
            let mut tiers = HashSet::new();
            for pipe in &adapter.pipes {
                if pipe.route_flag.is_unset() {
                    return Err(Error::InvalidConfig(format!(
                        "pipe {}:{} has no route flag",
                        adapter.name, pipe.name
                    )));
                }
                if !tiers.insert((pipe.role, pipe.route_flag)) {
                    return Err(Error::InvalidConfig(format!(
                        "adapter {} offers two {} pipes for {}",
                        adapter.name, pipe.role, pipe.route_flag
                    )));
                }
            }
        }

        for route in &self.routes {
            let template = self.template(&route.adapter, &route.pipe).ok_or_else(|| {
                Error::InvalidConfig(format!("route targets unknown pipe {}:{}", route.adapter, route.pipe))
            })?;
            if template.role != route.mode.role() {
                return Err(Error::InvalidConfig(format!(
                    "route for {:?} targets {} pipe {}:{}",
                    route.mode, template.role, route.adapter, route.pipe
                )));
            }
        }

        debug!(
            adapters = self.adapters.len(),
            routes = self.routes.len(),
            rules = self.concurrency.len(),
            "Policy config validated"
        );
        Ok(())
    }

    #[must_use]
    pub fn adapter(&self, name: &str) -> Option<&AdapterInfo> {
        self.adapters.iter().find(|a| a.name == name)
    }

    /// Look up a pipe template by adapter and template name.
    #[must_use]
    pub fn template(&self, adapter: &str, pipe: &str) -> Option<&PipeTemplate> {
        self.adapter(adapter).and_then(|a| a.pipe(pipe))
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            update_route_support: false,
            adapters: default_adapters(),
            routes: default_route_rules(),
            concurrency: default_rules(),
        }
    }
}

fn template(
    name: &str,
    role: PipeRole,
    route_flag: RouteFlag,
    kind: TemplateKind,
    module_name: &str,
    stream: StreamProps,
) -> PipeTemplate {
    let (lib, pa_role) = match role {
        PipeRole::Output => ("libmodule-hdi-sink.z.so", "sink"),
        PipeRole::Input => ("libmodule-hdi-source.z.so", "source"),
    };
    PipeTemplate {
        name: name.to_string(),
        role,
        route_flag,
        kind,
        lib: lib.to_string(),
        pa_role: pa_role.to_string(),
        module_name: module_name.to_string(),
        stream,
    }
}

fn props(format: &str, sample_rate: u32, channels: u32, buffer_size: u32) -> StreamProps {
    StreamProps { format: format.to_string(), sample_rate, channels, buffer_size }
}

/// Built-in adapter table: a primary adapter and a Bluetooth adapter.
#[must_use]
pub fn default_adapters() -> Vec<AdapterInfo> {
    use PipeRole::{Input, Output};
    use TemplateKind::{Multichannel, Offload, Standard};

    vec![
        AdapterInfo {
            name: "primary".into(),
            pipes: vec![
                template("primary_output", Output, RouteFlag::OUTPUT_NORMAL, Standard, "Speaker", StreamProps::default()),
                template("fast_output", Output, RouteFlag::OUTPUT_FAST, Standard, "Speaker_mmap", props("s16le", 48_000, 2, 1920)),
                template("direct_output", Output, RouteFlag::OUTPUT_DIRECT, Standard, "direct", props("s32le", 48_000, 2, 7680)),
                template(
                    "voip_output",
                    Output,
                    RouteFlag::OUTPUT_FAST | RouteFlag::OUTPUT_VOIP,
                    Standard,
                    "Speaker_voip",
                    props("s16le", 16_000, 1, 640),
                ),
                template("offload_output", Output, RouteFlag::OUTPUT_COMPRESS_OFFLOAD, Offload, "offload", props("s32le", 48_000, 2, 7680)),
                template(
                    "multichannel_output",
                    Output,
                    RouteFlag::OUTPUT_MULTICHANNEL,
                    Multichannel,
                    "multichannel",
                    props("s16le", 48_000, 6, 11_520),
                ),
                template("primary_input", Input, RouteFlag::INPUT_NORMAL, Standard, PRIMARY_MIC, StreamProps::default()),
                template("fast_input", Input, RouteFlag::INPUT_FAST, Standard, "Built_in_mic_mmap", props("s16le", 48_000, 2, 1920)),
                template(
                    "voip_input",
                    Input,
                    RouteFlag::INPUT_FAST | RouteFlag::INPUT_VOIP,
                    Standard,
                    "Built_in_mic_voip",
                    props("s16le", 16_000, 1, 640),
                ),
            ],
        },
        AdapterInfo {
            name: "bluetooth".into(),
            pipes: vec![
                template("bt_output", Output, RouteFlag::OUTPUT_NORMAL, Standard, "Bt_Speaker", StreamProps::default()),
                template("bt_input", Input, RouteFlag::INPUT_NORMAL, Standard, BLUETOOTH_MIC, props("s16le", 16_000, 1, 640)),
            ],
        },
    ]
}

fn route(mode: AudioMode, requested: RouteFlag, device_type: Option<DeviceType>, adapter: &str, pipe: &str) -> RouteRule {
    RouteRule { mode, requested, device_type, adapter: adapter.to_string(), pipe: pipe.to_string() }
}

/// Built-in route rules matching [`default_adapters`].
#[must_use]
pub fn default_route_rules() -> Vec<RouteRule> {
    use AudioMode::{Playback, Record};

    vec![
        // Bluetooth devices only have a normal tier
        route(Playback, RouteFlag::empty(), Some(DeviceType::BluetoothA2dp), "bluetooth", "bt_output"),
        route(Record, RouteFlag::empty(), Some(DeviceType::BluetoothSco), "bluetooth", "bt_input"),
        route(Playback, RouteFlag::OUTPUT_FAST | RouteFlag::OUTPUT_VOIP, None, "primary", "voip_output"),
        route(Playback, RouteFlag::OUTPUT_FAST, None, "primary", "fast_output"),
        route(Playback, RouteFlag::OUTPUT_DIRECT, None, "primary", "direct_output"),
        route(Playback, RouteFlag::OUTPUT_COMPRESS_OFFLOAD, None, "primary", "offload_output"),
        route(Playback, RouteFlag::OUTPUT_MULTICHANNEL, None, "primary", "multichannel_output"),
        route(Playback, RouteFlag::empty(), None, "primary", "primary_output"),
        route(Record, RouteFlag::INPUT_FAST | RouteFlag::INPUT_VOIP, None, "primary", "voip_input"),
        route(Record, RouteFlag::INPUT_FAST, None, "primary", "fast_input"),
        route(Record, RouteFlag::empty(), None, "primary", "primary_input"),
    ]
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;

    use super::*;
    use crate::pipe::PipeType;

    const SMALL_POLICY: &str = r#"
        update_route_support = true

        [[adapters]]
        name = "usb"

        [[adapters.pipes]]
        name = "usb_output"
        role = "output"
        route_flag = "OUTPUT_NORMAL"
        module_name = "Usb_Speaker"

        [[adapters.pipes]]
        name = "usb_fast_output"
        role = "output"
        route_flag = "OUTPUT_FAST"
        module_name = "Usb_Speaker_mmap"

        [adapters.pipes.stream]
        buffer_size = 960

        [[routes]]
        mode = "playback"
        requested = "OUTPUT_FAST"
        adapter = "usb"
        pipe = "usb_fast_output"

        [[routes]]
        mode = "playback"
        adapter = "usb"
        pipe = "usb_output"

        [[concurrency]]
        existing = "LOWLATENCY_OUT"
        incoming = "LOWLATENCY_OUT"
        action = "CONCEDE_INCOMING"
    "#;

    #[test]
    fn test_default_config_is_valid() {
        let config = PolicyConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.template("primary", "fast_output").is_some());
        assert!(config.template("bluetooth", "bt_input").is_some());
    }

    #[test]
    fn test_parse_small_policy() {
        let config = PolicyConfig::from_toml_str(SMALL_POLICY).expect("policy should parse");

        assert!(config.update_route_support);
        assert_eq!(config.adapters.len(), 1);
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[1].requested, RouteFlag::empty());
        assert_eq!(config.concurrency[0].existing, PipeType::LowLatencyOut);

        let fast = config.template("usb", "usb_fast_output").unwrap();
        assert_eq!(fast.stream.buffer_size, 960);
        assert_eq!(fast.stream.sample_rate, 48_000);
        assert_eq!(fast.kind, TemplateKind::Standard);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SMALL_POLICY.as_bytes()).unwrap();

        let config = PolicyConfig::load(file.path()).expect("policy file should load");
        assert_eq!(config.adapters[0].name, "usb");
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = PolicyConfig::load(&dir.path().join("absent.toml"));
        assert_matches!(result, Err(Error::Io(_)));
    }

    #[test]
    fn test_rejects_unknown_route_target() {
        let text = r#"
            [[routes]]
            mode = "record"
            adapter = "primary"
            pipe = "primary_input"
        "#;
        assert_matches!(PolicyConfig::from_toml_str(text), Err(Error::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_role_mismatch() {
        let mut config = PolicyConfig::default();
        config.routes.push(route(AudioMode::Record, RouteFlag::empty(), None, "primary", "primary_output"));
        assert_matches!(config.validate(), Err(Error::InvalidConfig(msg)) if msg.contains("primary_output"));
    }

    #[test]
    fn test_rejects_duplicate_tier() {
        let mut config = PolicyConfig::default();
        let mut dup = config.adapters[0].pipes[0].clone();
        dup.name = "other_output".into();
        config.adapters[0].pipes.push(dup);
        assert_matches!(config.validate(), Err(Error::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_bad_toml() {
        assert_matches!(PolicyConfig::from_toml_str("adapters = 3"), Err(Error::ConfigParse(_)));
    }

    #[test]
    fn test_route_rule_matching() {
        let rule = route(AudioMode::Playback, RouteFlag::OUTPUT_FAST, None, "primary", "fast_output");

        let fast = SessionDescriptor::new(1, AudioMode::Playback)
            .with_requested_flag(RouteFlag::OUTPUT_FAST | RouteFlag::OUTPUT_NORMAL);
        assert!(rule.matches_request(&fast));

        let normal = SessionDescriptor::new(2, AudioMode::Playback);
        assert!(!rule.matches_request(&normal));
        assert!(rule.applies_to(&normal));

        let record = SessionDescriptor::new(3, AudioMode::Record).with_requested_flag(RouteFlag::OUTPUT_FAST);
        assert!(!rule.applies_to(&record));
    }
}
