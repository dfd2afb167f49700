//! Session scenarios replayed against the selector.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use arbiter_core::SessionDescriptor;
use arbiter_pipes::PipeSelector;

/// One replayed event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Place a single session and commit the plan
    Fetch { session: SessionDescriptor },
    /// Replan a role from a full session list and commit the plan
    Batch { sessions: Vec<SessionDescriptor> },
    Start { session_id: u32 },
    Pause { session_id: u32 },
    Stop { session_id: u32 },
    /// Detach a session from its pipe
    Remove { session_id: u32 },
    AddModem { session_id: u32, client_uid: i32 },
    RemoveModem { session_id: u32 },
}

/// A scenario file: steps applied in order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read scenario file: {path:?}"))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse scenario file: {path:?}"))
    }

    /// Apply every step. Returns the number of steps that took effect.
    pub fn run(&self, selector: &PipeSelector) -> usize {
        let mut applied = 0;
        for (index, step) in self.steps.iter().enumerate() {
            if apply(selector, step.clone()) {
                applied += 1;
            } else {
                warn!(index, ?step, "Step had no effect");
            }
        }
        info!(steps = self.steps.len(), applied, "Scenario finished");
        applied
    }
}

fn apply(selector: &PipeSelector, step: Step) -> bool {
    let registry = selector.registry();
    match step {
        Step::Fetch { mut session } => {
            let pipes = selector.fetch_pipe(&mut session);
            info!(session_id = session.session_id, route_flag = %session.route_flag, action = ?session.action, "Session placed");
            selector.commit(session.role(), pipes);
            registry.session(session.session_id).is_some()
        }
        Step::Batch { mut sessions } => {
            let Some(role) = sessions.first().map(SessionDescriptor::role) else {
                return false;
            };
            let pipes = selector.fetch_pipes(&mut sessions);
            for session in &sessions {
                info!(session_id = session.session_id, route_flag = %session.route_flag, action = ?session.action, "Session replanned");
            }
            selector.commit(role, pipes);
            true
        }
        Step::Start { session_id } => registry.start_session(session_id),
        Step::Pause { session_id } => registry.pause_session(session_id),
        Step::Stop { session_id } => registry.stop_session(session_id),
        Step::Remove { session_id } => registry.remove_session(session_id),
        Step::AddModem { session_id, client_uid } => registry.add_modem_session(session_id, client_uid),
        Step::RemoveModem { session_id } => registry.remove_modem_session(session_id),
    }
}
