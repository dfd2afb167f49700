//! Registry of active pipes.

use std::collections::HashMap;
use std::fmt::{self, Write};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use arbiter_core::config::{BLUETOOTH_MIC, PRIMARY_MIC};
use arbiter_core::{
    DeviceInfo, DeviceType, IoHandle, PaIndex, PipeAction, PipeDescriptor, PipeRole, RouteFlag,
    SessionDescriptor, SessionStatus,
};

/// First session id handed out upstream.
pub const FIRST_SESSION_ID: u32 = 100_000;
/// Largest session id accepted in the modem table.
pub const MAX_VALID_SESSION_ID: u32 = u32::MAX - FIRST_SESSION_ID;

/// Module name reported for sessions captured from a remote cast device.
pub const REMOTE_CAST_MODULE: &str = "RemoteCastInnerCapturer";

#[derive(Debug, Default)]
struct RegistryState {
    pipes: Vec<PipeDescriptor>,
    /// Modem communication session id -> client uid
    modem_sessions: HashMap<u32, i32>,
}

impl RegistryState {
    fn find_session(&self, session_id: u32) -> Option<(&PipeDescriptor, &SessionDescriptor)> {
        self.pipes.iter().find_map(|p| p.session(session_id).map(|s| (p, s)))
    }

    fn find_session_mut(&mut self, session_id: u32) -> Option<&mut SessionDescriptor> {
        self.pipes.iter_mut().find_map(|p| p.session_mut(session_id))
    }

    /// Overwrite the first pipe with the same identity and drop any further
    /// matches. Returns false if nothing matched.
    fn overwrite(&mut self, pipe: &PipeDescriptor) -> bool {
        let mut matches = self
            .pipes
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_same_pipe(pipe))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        if matches.is_empty() {
            return false;
        }
        let first = matches.remove(0);
        for index in matches.into_iter().rev() {
            let dropped = self.pipes.remove(index);
            warn!(pipe = %dropped, "Dropping pipe superseded by overwrite");
        }
        self.pipes[first] = pipe.clone();
        self.pipes[first].action = PipeAction::Default;
        true
    }

    /// Pipe opened with `id`. Unopened pipes never match.
    fn find_by_io_handle(&self, id: IoHandle) -> Option<usize> {
        if !id.is_valid() {
            return None;
        }
        self.pipes.iter().position(|p| p.id == id)
    }

    fn set_status(&mut self, session_id: u32, status: SessionStatus) -> bool {
        match self.find_session_mut(session_id) {
            Some(session) => {
                session.status = status;
                debug!(session_id, ?status, "Session status changed");
                true
            }
            None => {
                warn!(session_id, ?status, "Session not found for status change");
                false
            }
        }
    }
}

/// The single authoritative collection of active pipes.
///
/// Every call is atomic on its own; a read-plan-write sequence needs an
/// external lock around it.
#[derive(Debug, Default)]
pub struct PipeRegistry {
    state: RwLock<RegistryState>,
}

impl PipeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pipe. A pipe with the same identity is overwritten instead.
    pub fn add(&self, pipe: PipeDescriptor) {
        let mut state = self.state.write();
        if state.overwrite(&pipe) {
            warn!(pipe = %pipe, "Pipe already registered, overwritten");
            return;
        }
        info!(pipe = %pipe, "Pipe added");
        let mut pipe = pipe;
        pipe.action = PipeAction::Default;
        state.pipes.push(pipe);
    }

    /// Remove the pipe with the same identity. Returns whether one was removed.
    pub fn remove(&self, pipe: &PipeDescriptor) -> bool {
        let mut state = self.state.write();
        match state.pipes.iter().position(|p| p.is_same_pipe(pipe)) {
            Some(index) => {
                let removed = state.pipes.remove(index);
                info!(pipe = %removed, "Pipe removed");
                true
            }
            None => false,
        }
    }

    /// Remove the pipe opened with `id`.
    pub fn remove_by_id(&self, id: IoHandle) -> bool {
        let mut state = self.state.write();
        match state.find_by_io_handle(id) {
            Some(index) => {
                let removed = state.pipes.remove(index);
                info!(%id, pipe = %removed, "Pipe removed");
                true
            }
            None => false,
        }
    }

    /// Overwrite the registered pipe with the same identity field by field.
    /// Returns false if no such pipe is registered.
    pub fn update(&self, pipe: &PipeDescriptor) -> bool {
        let updated = self.state.write().overwrite(pipe);
        if updated {
            debug!(pipe = %pipe, "Pipe updated");
        } else {
            warn!(pipe = %pipe, "Pipe to update not found");
        }
        updated
    }

    /// Snapshot of all pipes.
    #[must_use]
    pub fn get_all(&self) -> Vec<PipeDescriptor> {
        self.state.read().pipes.clone()
    }

    /// Snapshot of one role's pipes.
    #[must_use]
    pub fn get_role(&self, role: PipeRole) -> Vec<PipeDescriptor> {
        self.state.read().pipes.iter().filter(|p| p.role == role).cloned().collect()
    }

    /// Idle pipes on scarce tiers, candidates for closing.
    #[must_use]
    pub fn get_unused(&self) -> Vec<PipeDescriptor> {
        self.state
            .read()
            .pipes
            .iter()
            .filter(|p| p.is_idle() && p.route_flag.is_scarce())
            .cloned()
            .collect()
    }

    pub fn start_session(&self, session_id: u32) -> bool {
        self.state.write().set_status(session_id, SessionStatus::Started)
    }

    pub fn pause_session(&self, session_id: u32) -> bool {
        self.state.write().set_status(session_id, SessionStatus::Paused)
    }

    pub fn stop_session(&self, session_id: u32) -> bool {
        self.state.write().set_status(session_id, SessionStatus::Stopped)
    }

    /// Detach a session from whichever pipe holds it.
    pub fn remove_session(&self, session_id: u32) -> bool {
        let mut state = self.state.write();
        debug!(pipes = state.pipes.len(), session_id, "Removing session");
        let mut removed = false;
        for pipe in &mut state.pipes {
            removed |= pipe.detach(session_id).is_some();
        }
        removed
    }

    /// Copy of an attached session.
    #[must_use]
    pub fn session(&self, session_id: u32) -> Option<SessionDescriptor> {
        self.state.read().find_session(session_id).map(|(_, s)| s.clone())
    }

    /// Sessions attached to the pipe opened with `id`.
    #[must_use]
    pub fn sessions_by_io_handle(&self, id: IoHandle) -> Vec<SessionDescriptor> {
        let state = self.state.read();
        state.find_by_io_handle(id).map(|i| state.pipes[i].sessions().to_vec()).unwrap_or_default()
    }

    /// Every session attached to a pipe of `role`.
    #[must_use]
    pub fn role_sessions(&self, role: PipeRole) -> Vec<SessionDescriptor> {
        self.state
            .read()
            .pipes
            .iter()
            .filter(|p| p.role == role)
            .flat_map(|p| p.sessions().iter().cloned())
            .collect()
    }

    #[must_use]
    pub fn pipe_by_adapter_and_flag(&self, adapter_name: &str, route_flag: RouteFlag) -> Option<PipeDescriptor> {
        let pipe = self.state.read().pipes.iter().find(|p| p.matches(adapter_name, route_flag)).cloned();
        if pipe.is_none() {
            debug!(adapter_name, %route_flag, "No pipe for adapter and flag");
        }
        pipe
    }

    #[must_use]
    pub fn pipe_by_module_and_flag(&self, module_name: &str, route_flag: RouteFlag) -> Option<PipeDescriptor> {
        self.state
            .read()
            .pipes
            .iter()
            .find(|p| p.module_info.module_name == module_name && p.route_flag == route_flag)
            .cloned()
    }

    /// Normal capture pipe on the built-in mic, else on the Bluetooth mic.
    #[must_use]
    pub fn normal_source(&self) -> Option<PipeDescriptor> {
        self.pipe_by_module_and_flag(PRIMARY_MIC, RouteFlag::INPUT_NORMAL)
            .or_else(|| self.pipe_by_module_and_flag(BLUETOOTH_MIC, RouteFlag::INPUT_NORMAL))
    }

    /// Number of sessions on the pipe for (adapter, flag), zero if absent.
    #[must_use]
    pub fn session_count(&self, adapter_name: &str, route_flag: RouteFlag) -> usize {
        self.state
            .read()
            .pipes
            .iter()
            .find(|p| p.matches(adapter_name, route_flag))
            .map_or(0, PipeDescriptor::session_count)
    }

    /// Sessions on the low power render pipe.
    #[must_use]
    pub fn lowpower_session_count(&self) -> usize {
        self.state
            .read()
            .pipes
            .iter()
            .find(|p| p.route_flag.contains(RouteFlag::OUTPUT_LOWPOWER))
            .map_or(0, PipeDescriptor::session_count)
    }

    /// Sound server index of the pipe opened with `id`.
    #[must_use]
    pub fn pa_index_by_io_handle(&self, id: IoHandle) -> PaIndex {
        let state = self.state.read();
        state.find_by_io_handle(id).map_or(PaIndex::INVALID, |i| state.pipes[i].pa_index)
    }

    /// Module name of the pipe carrying a session.
    #[must_use]
    pub fn module_name_by_session(&self, session_id: u32) -> Option<String> {
        let state = self.state.read();
        let Some((pipe, session)) = state.find_session(session_id) else {
            warn!(session_id, "Session not attached to any pipe");
            return None;
        };
        Some(if session.device.device_type == DeviceType::RemoteCast {
            REMOTE_CAST_MODULE.to_string()
        } else {
            pipe.module_info.module_name.clone()
        })
    }

    /// Device assignment of an attached session.
    #[must_use]
    pub fn device_by_session(&self, session_id: u32) -> Option<DeviceInfo> {
        self.state.read().find_session(session_id).map(|(_, s)| s.device.clone())
    }

    /// Swap one role's pipes for a freshly planned list.
    pub fn replace_role_pipes(&self, role: PipeRole, pipes: Vec<PipeDescriptor>) {
        let mut state = self.state.write();
        state.pipes.retain(|p| p.role != role);
        let before = state.pipes.len();
        for mut pipe in pipes {
            if pipe.role != role {
                warn!(pipe = %pipe, %role, "Skipping pipe of other role in replace");
                continue;
            }
            pipe.action = PipeAction::Default;
            state.pipes.push(pipe);
        }
        info!(%role, count = state.pipes.len() - before, "Role pipes replaced");
    }

    /// Record a modem communication session. Ids outside the valid session
    /// range are rejected.
    pub fn add_modem_session(&self, session_id: u32, client_uid: i32) -> bool {
        if !(FIRST_SESSION_ID..=MAX_VALID_SESSION_ID).contains(&session_id) {
            warn!(session_id, "Invalid modem communication session id");
            return false;
        }
        self.state.write().modem_sessions.insert(session_id, client_uid);
        true
    }

    pub fn remove_modem_session(&self, session_id: u32) -> bool {
        let removed = self.state.write().modem_sessions.remove(&session_id).is_some();
        if removed {
            debug!(session_id, "Modem communication session removed");
        } else {
            warn!(session_id, "Modem communication session not found");
        }
        removed
    }

    #[must_use]
    pub fn has_modem_session(&self, session_id: u32) -> bool {
        self.state.read().modem_sessions.contains_key(&session_id)
    }

    #[must_use]
    pub fn has_any_modem_session(&self) -> bool {
        !self.state.read().modem_sessions.is_empty()
    }

    /// Copy of the modem session table (session id -> client uid).
    #[must_use]
    pub fn modem_sessions(&self) -> HashMap<u32, i32> {
        self.state.read().modem_sessions.clone()
    }

    /// Human readable dump of every pipe and its sessions.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        if self.write_dump(&mut out).is_err() {
            warn!("Registry dump truncated");
        }
        out
    }

    fn write_dump(&self, out: &mut impl Write) -> fmt::Result {
        let state = self.state.read();
        writeln!(out, "Pipe registry: {} pipes", state.pipes.len())?;
        for (index, pipe) in state.pipes.iter().enumerate() {
            writeln!(out, "\n[pipe {}] {}:{}", index + 1, pipe.adapter_name, pipe.name)?;
            writeln!(out, "  id: {}  pa_index: {}", pipe.id, pipe.pa_index.0)?;
            writeln!(out, "  role: {}  route_flag: {}  type: {:?}", pipe.role, pipe.route_flag, pipe.pipe_type())?;
            writeln!(
                out,
                "  module: {} ({} {}Hz {}ch buffer {})",
                pipe.module_info.module_name,
                pipe.module_info.format,
                pipe.module_info.rate,
                pipe.module_info.channels,
                pipe.module_info.buffer_size
            )?;
            for session in pipe.sessions() {
                writeln!(
                    out,
                    "    session {}: {:?} route_flag={} status={:?} device={:?} started={}",
                    session.session_id,
                    session.audio_mode,
                    session.route_flag,
                    session.status,
                    session.device.device_type,
                    session.start_timestamp
                )?;
            }
        }
        if !state.modem_sessions.is_empty() {
            let mut ids: Vec<_> = state.modem_sessions.keys().copied().collect();
            ids.sort_unstable();
            writeln!(out, "\nModem communication sessions: {ids:?}")?;
        }
        Ok(())
    }
}
