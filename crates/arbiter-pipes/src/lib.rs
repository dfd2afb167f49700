//! Arbiter Pipes - Pipe registry and pipe selection.
//!
//! This crate decides which pipe every session should use:
//! - Tracking active pipes and their sessions in a shared registry
//! - Resolving conflicts between sessions competing for scarce tiers
//! - Attaching sessions to compatible pipes or planning new ones
//! - Replanning all sessions of a role in one pass

pub mod batch;
pub mod matcher;
pub mod registry;
pub mod resolver;
pub mod selector;

pub use batch::{BatchReconciler, judge_action};
pub use matcher::{PipeMatcher, Placement};
pub use registry::PipeRegistry;
pub use resolver::ConcurrencyResolver;
pub use selector::PipeSelector;
