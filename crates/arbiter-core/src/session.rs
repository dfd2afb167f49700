//! Audio session records.

use serde::{Deserialize, Serialize};

use crate::flags::RouteFlag;
use crate::pipe::{PipeRole, PipeType};

/// Whether a session renders or captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    Playback,
    Record,
}

impl AudioMode {
    /// Role of the pipes that carry sessions in this mode.
    #[must_use]
    pub const fn role(self) -> PipeRole {
        match self {
            Self::Playback => PipeRole::Output,
            Self::Record => PipeRole::Input,
        }
    }
}

/// What the caller has to do with a session after arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionAction {
    /// Keep the session where it is
    #[default]
    Default,
    /// Tear down and reopen the session's stream on its new pipe
    Recreate,
    /// Move the session to its new pipe without reopening
    Move,
    /// Session is being placed for the first time
    New,
}

/// Lifecycle status tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    New,
    Started,
    Paused,
    Stopped,
}

/// Device kinds a session can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    Speaker,
    Earpiece,
    WiredHeadset,
    UsbHeadset,
    BluetoothSco,
    BluetoothA2dp,
    Mic,
    RemoteCast,
}

/// Device assignment of a session. Read-only for arbitration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub device_type: DeviceType,
    /// Network id, "LocalDevice" for local devices
    #[serde(default = "local_network_id")]
    pub network_id: String,
}

/// Network id of devices on this host.
pub const LOCAL_NETWORK_ID: &str = "LocalDevice";

fn local_network_id() -> String {
    LOCAL_NETWORK_ID.to_string()
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::local(DeviceType::default())
    }
}

impl DeviceInfo {
    /// A device on this host.
    #[must_use]
    pub fn local(device_type: DeviceType) -> Self {
        Self { device_type, network_id: local_network_id() }
    }
}

/// One logical render or capture stream competing for a pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Unique id assigned upstream
    pub session_id: u32,
    pub audio_mode: AudioMode,
    /// Tier the client asked for; input to route flag resolution
    #[serde(default)]
    pub requested_flag: RouteFlag,
    /// Resolved tier, written by arbitration
    #[serde(default)]
    pub route_flag: RouteFlag,
    /// Transition decided by arbitration
    #[serde(default)]
    pub action: SessionAction,
    /// Earlier sessions win ties for scarce tiers
    #[serde(default)]
    pub start_timestamp: i64,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub device: DeviceInfo,
    /// Capture source type, zero for playback
    #[serde(default)]
    pub source_type: i32,
}

impl SessionDescriptor {
    /// Create a session with an unresolved route.
    #[must_use]
    pub fn new(session_id: u32, audio_mode: AudioMode) -> Self {
        Self {
            session_id,
            audio_mode,
            requested_flag: RouteFlag::empty(),
            route_flag: RouteFlag::empty(),
            action: SessionAction::Default,
            start_timestamp: 0,
            status: SessionStatus::New,
            device: DeviceInfo::local(match audio_mode {
                AudioMode::Playback => DeviceType::Speaker,
                AudioMode::Record => DeviceType::Mic,
            }),
            source_type: 0,
        }
    }

    #[must_use]
    pub fn with_requested_flag(mut self, flag: RouteFlag) -> Self {
        self.requested_flag = flag;
        self
    }

    #[must_use]
    pub fn with_start_timestamp(mut self, start_timestamp: i64) -> Self {
        self.start_timestamp = start_timestamp;
        self
    }

    #[must_use]
    pub fn with_device(mut self, device: DeviceInfo) -> Self {
        self.device = device;
        self
    }

    /// Role of the pipes this session can use.
    #[must_use]
    pub const fn role(&self) -> PipeRole {
        self.audio_mode.role()
    }

    /// Pipe type of the session's current route flag.
    #[must_use]
    pub fn pipe_type(&self) -> PipeType {
        PipeType::classify(self.route_flag, self.audio_mode)
    }

    /// Force the session onto its role's normal tier.
    pub fn demote_to_normal(&mut self) {
        self.route_flag = RouteFlag::normal_for(self.role());
    }
}
