//! Replay configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use tracing::info;

use arbiter_core::PolicyConfig;

/// Load the policy from `explicit`, else from the user config directory,
/// else fall back to the built-in tables.
pub fn load_policy(explicit: Option<&Path>) -> Result<PolicyConfig> {
    if let Some(path) = explicit {
        return PolicyConfig::load(path).with_context(|| format!("Failed to load policy file: {path:?}"));
    }

    match policy_path() {
        Some(path) if path.exists() => {
            PolicyConfig::load(&path).with_context(|| format!("Failed to load policy file: {path:?}"))
        }
        path => {
            info!(?path, "Policy file not found, using built-in policy");
            Ok(PolicyConfig::default())
        }
    }
}

/// Get the default policy file path.
fn policy_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "arbiter", "arbiter").map(|dirs| dirs.config_dir().join("policy.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_explicit_policy_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"update_route_support = true\n").unwrap();

        let config = load_policy(Some(file.path())).unwrap();
        assert!(config.update_route_support);
        assert!(config.adapters.is_empty());
    }

    #[test]
    fn test_explicit_policy_errors_carry_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let err = load_policy(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }
}
