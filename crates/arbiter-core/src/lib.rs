//! Arbiter Core - Domain types for audio pipe arbitration.
//!
//! This crate holds the route flags, pipe and session descriptors, the
//! concurrency rule table and the policy configuration shared by the
//! registry, the pipe selector and the replay tool.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod flags;
pub mod pipe;
pub mod policy;
pub mod session;

pub use concurrency::{ConcurrencyAction, ConcurrencyRule, ConcurrencyRuleTable, ConcurrencyRules};
pub use config::{AdapterInfo, PipeTemplate, PolicyConfig, RouteRule, TemplateKind};
pub use error::{Error, Result};
pub use flags::RouteFlag;
pub use pipe::{IoHandle, ModuleInfo, PaIndex, PipeAction, PipeDescriptor, PipeRole, PipeType};
pub use policy::{PolicyConfigManager, StaticPolicy, StreamPropInfo, TemplateKey};
pub use session::{AudioMode, DeviceInfo, DeviceType, SessionAction, SessionDescriptor, SessionStatus};
