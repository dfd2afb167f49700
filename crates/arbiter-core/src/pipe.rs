//! Pipe descriptors and pipe classification.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flags::RouteFlag;
use crate::session::{AudioMode, DeviceType, SessionDescriptor};

/// Direction of a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeRole {
    /// Capture pipe (record sessions)
    Input,
    /// Render pipe (playback sessions)
    Output,
}

impl PipeRole {
    /// Audio mode of the sessions this role carries.
    #[must_use]
    pub const fn audio_mode(self) -> AudioMode {
        match self {
            Self::Input => AudioMode::Record,
            Self::Output => AudioMode::Playback,
        }
    }
}

impl fmt::Display for PipeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "INPUT",
            Self::Output => "OUTPUT",
        })
    }
}

/// Planning state of a pipe within one arbitration pass.
///
/// The registry only ever stores `Default`; `New` and `Update` describe what
/// the caller has to do downstream before committing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PipeAction {
    #[default]
    Default,
    /// Pipe does not exist yet and has to be opened
    New,
    /// Pipe exists and its session set or a resident route changed
    Update,
}

/// Classification of a route flag for a given audio mode.
///
/// This is the key into the concurrency rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipeType {
    NormalOut,
    NormalIn,
    #[serde(rename = "LOWLATENCY_OUT")]
    LowLatencyOut,
    #[serde(rename = "LOWLATENCY_IN")]
    LowLatencyIn,
    DirectOut,
    CallOut,
    CallIn,
    Offload,
    Multichannel,
}

impl PipeType {
    /// Derive the pipe type for a route flag.
    #[must_use]
    pub fn classify(flag: RouteFlag, mode: AudioMode) -> Self {
        match mode {
            AudioMode::Playback => {
                if flag.contains(RouteFlag::OUTPUT_FAST) {
                    if flag.contains(RouteFlag::OUTPUT_VOIP) { Self::CallOut } else { Self::LowLatencyOut }
                } else if flag.contains(RouteFlag::OUTPUT_DIRECT) {
                    if flag.contains(RouteFlag::OUTPUT_VOIP) { Self::CallOut } else { Self::DirectOut }
                } else if flag.contains(RouteFlag::OUTPUT_COMPRESS_OFFLOAD) {
                    Self::Offload
                } else if flag.contains(RouteFlag::OUTPUT_MULTICHANNEL) {
                    Self::Multichannel
                } else {
                    Self::NormalOut
                }
            }
            AudioMode::Record => {
                if flag.contains(RouteFlag::INPUT_FAST) {
                    if flag.contains(RouteFlag::INPUT_VOIP) { Self::CallIn } else { Self::LowLatencyIn }
                } else {
                    Self::NormalIn
                }
            }
        }
    }
}

/// Opaque downstream handle of an opened pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IoHandle(pub u32);

impl IoHandle {
    /// Handle of a pipe that has not been opened yet.
    pub const INVALID: Self = Self(u32::MAX);

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl Default for IoHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for IoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() { write!(f, "{}", self.0) } else { f.write_str("invalid") }
    }
}

/// Opaque index of the pipe inside the sound server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaIndex(pub u32);

impl PaIndex {
    pub const INVALID: Self = Self(u32::MAX);

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl Default for PaIndex {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Parameters handed to the sound server when the pipe is opened.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ModuleInfo {
    /// Sample format (e.g. "s16le")
    pub format: String,
    /// Sample rate in Hz
    pub rate: u32,
    /// Channel count
    pub channels: u32,
    /// Buffer size in bytes
    pub buffer_size: u32,
    /// Sink/source library
    pub lib: String,
    /// Sound server role ("sink" or "source")
    pub pa_role: String,
    /// Module name (e.g. "Speaker", "Built_in_mic")
    pub module_name: String,
    pub adapter_name: String,
    /// Module class, the adapter name unless a template overrides it
    pub class_name: String,
    /// Dump file name for templates that carry one
    pub file_name: Option<String>,
    pub fixed_latency: bool,
    pub offload_enable: bool,
    pub open_mic_speaker: bool,
    /// Device the pipe was opened for
    pub device_type: DeviceType,
    pub network_id: String,
    pub source_type: i32,
}

/// One active pipe instance and the sessions attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeDescriptor {
    /// Downstream handle, invalid until opened
    pub id: IoHandle,
    /// Sound server index
    pub pa_index: PaIndex,
    /// Adapter the pipe belongs to
    pub adapter_name: String,
    /// Pipe template name (e.g. "primary_output")
    pub name: String,
    /// Tier of this pipe
    pub route_flag: RouteFlag,
    pub role: PipeRole,
    /// Planning state, always `Default` once committed
    pub action: PipeAction,
    pub module_info: ModuleInfo,
    /// Attached sessions in attach order, unique by session id
    sessions: Vec<SessionDescriptor>,
}

impl PipeDescriptor {
    /// Create an empty, unopened pipe.
    #[must_use]
    pub fn new(adapter_name: &str, name: &str, route_flag: RouteFlag, role: PipeRole) -> Self {
        Self {
            id: IoHandle::INVALID,
            pa_index: PaIndex::INVALID,
            adapter_name: adapter_name.to_string(),
            name: name.to_string(),
            route_flag,
            role,
            action: PipeAction::Default,
            module_info: ModuleInfo::default(),
            sessions: Vec::new(),
        }
    }

    /// Set the downstream handle.
    #[must_use]
    pub fn with_id(mut self, id: IoHandle) -> Self {
        self.id = id;
        self
    }

    /// Derived pipe type of this pipe.
    #[must_use]
    pub fn pipe_type(&self) -> PipeType {
        PipeType::classify(self.route_flag, self.role.audio_mode())
    }

    /// Whether this pipe serves the given adapter and tier.
    #[must_use]
    pub fn matches(&self, adapter_name: &str, route_flag: RouteFlag) -> bool {
        self.adapter_name == adapter_name && self.route_flag == route_flag
    }

    /// Whether two descriptors denote the same pipe.
    ///
    /// Same role and (adapter, route flag), or the same valid handle.
    #[must_use]
    pub fn is_same_pipe(&self, other: &Self) -> bool {
        (self.role == other.role && self.matches(&other.adapter_name, other.route_flag))
            || (self.id.is_valid() && self.id == other.id)
    }

    /// Attached sessions in attach order.
    #[must_use]
    pub fn sessions(&self) -> &[SessionDescriptor] {
        &self.sessions
    }

    /// Mutable access to attached sessions; the set itself cannot change.
    pub fn sessions_mut(&mut self) -> &mut [SessionDescriptor] {
        &mut self.sessions
    }

    /// Attach a session, replacing a previous entry with the same id.
    pub fn attach(&mut self, session: SessionDescriptor) {
        match self.sessions.iter_mut().find(|s| s.session_id == session.session_id) {
            Some(existing) => *existing = session,
            None => self.sessions.push(session),
        }
    }

    /// Detach a session by id.
    pub fn detach(&mut self, session_id: u32) -> Option<SessionDescriptor> {
        let pos = self.sessions.iter().position(|s| s.session_id == session_id)?;
        Some(self.sessions.remove(pos))
    }

    /// Detach every session whose route flag no longer matches this pipe.
    pub fn detach_mismatched(&mut self) -> Vec<SessionDescriptor> {
        let route_flag = self.route_flag;
        let (kept, moved) = std::mem::take(&mut self.sessions)
            .into_iter()
            .partition(|s| s.route_flag == route_flag);
        self.sessions = kept;
        moved
    }

    /// Drop all sessions.
    pub fn clear_sessions(&mut self) {
        self.sessions.clear();
    }

    #[must_use]
    pub fn session(&self, session_id: u32) -> Option<&SessionDescriptor> {
        self.sessions.iter().find(|s| s.session_id == session_id)
    }

    pub fn session_mut(&mut self, session_id: u32) -> Option<&mut SessionDescriptor> {
        self.sessions.iter_mut().find(|s| s.session_id == session_id)
    }

    #[must_use]
    pub fn contains(&self, session_id: u32) -> bool {
        self.session(session_id).is_some()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the pipe has no attached sessions.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Mark the pipe touched, unless it is about to be created.
    pub fn mark_updated(&mut self) {
        if self.action != PipeAction::New {
            self.action = PipeAction::Update;
        }
    }
}

impl fmt::Display for PipeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} [{}] role={} id={} action={:?} sessions={}",
            self.adapter_name,
            self.name,
            self.route_flag,
            self.role,
            self.id,
            self.action,
            self.sessions.len()
        )
    }
}
