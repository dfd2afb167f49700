//! Concurrency rules between pipe types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pipe::PipeType;

/// Outcome of a conflict lookup between a resident and an incoming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConcurrencyAction {
    /// Both sessions keep their tiers
    #[default]
    PlayBoth,
    /// The incoming session falls back to the normal tier
    ConcedeIncoming,
    /// The resident session falls back to the normal tier and is recreated
    ConcedeExisting,
}

/// Lookup of the action for an ordered (resident, incoming) pair.
pub trait ConcurrencyRuleTable: Send + Sync {
    /// Action to apply when `incoming` arrives while `existing` is active.
    fn concurrency_action(&self, existing: PipeType, incoming: PipeType) -> ConcurrencyAction;
}

/// A single entry of the rule table, as written in policy files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyRule {
    pub existing: PipeType,
    pub incoming: PipeType,
    pub action: ConcurrencyAction,
}

impl ConcurrencyRule {
    #[must_use]
    pub const fn new(existing: PipeType, incoming: PipeType, action: ConcurrencyAction) -> Self {
        Self { existing, incoming, action }
    }
}

/// Map-backed rule table. Pairs without an entry play both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcurrencyRules {
    rules: HashMap<(PipeType, PipeType), ConcurrencyAction>,
}

impl ConcurrencyRules {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a rule.
    #[must_use]
    pub fn with_rule(mut self, existing: PipeType, incoming: PipeType, action: ConcurrencyAction) -> Self {
        self.insert(ConcurrencyRule::new(existing, incoming, action));
        self
    }

    /// Add or replace a rule.
    pub fn insert(&mut self, rule: ConcurrencyRule) {
        self.rules.insert((rule.existing, rule.incoming), rule.action);
    }

    /// Explicitly configured action for a pair, if any.
    #[must_use]
    pub fn get(&self, existing: PipeType, incoming: PipeType) -> Option<ConcurrencyAction> {
        self.rules.get(&(existing, incoming)).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<ConcurrencyRule> for ConcurrencyRules {
    fn from_iter<I: IntoIterator<Item = ConcurrencyRule>>(iter: I) -> Self {
        let mut rules = Self::new();
        for rule in iter {
            rules.insert(rule);
        }
        rules
    }
}

impl ConcurrencyRuleTable for ConcurrencyRules {
    fn concurrency_action(&self, existing: PipeType, incoming: PipeType) -> ConcurrencyAction {
        self.get(existing, incoming).unwrap_or_default()
    }
}

/// Built-in rules: dedicated tiers hold one session, calls outrank plain low latency capture.
#[must_use]
pub fn default_rules() -> Vec<ConcurrencyRule> {
    use ConcurrencyAction::{ConcedeExisting, ConcedeIncoming};
    use PipeType::{CallIn, DirectOut, LowLatencyIn, LowLatencyOut, Offload};

    vec![
        ConcurrencyRule::new(LowLatencyOut, LowLatencyOut, ConcedeExisting),
        ConcurrencyRule::new(DirectOut, DirectOut, ConcedeExisting),
        ConcurrencyRule::new(Offload, Offload, ConcedeExisting),
        ConcurrencyRule::new(LowLatencyIn, LowLatencyIn, ConcedeExisting),
        ConcurrencyRule::new(LowLatencyIn, CallIn, ConcedeExisting),
        ConcurrencyRule::new(CallIn, LowLatencyIn, ConcedeIncoming),
        ConcurrencyRule::new(CallIn, CallIn, ConcedeExisting),
    ]
}
