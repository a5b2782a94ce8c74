use crate::core::{ContentPack, MigrationError, PackSource, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which content packs a migration run touches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PackPolicy {
    /// Migrate packs authored inside the world.
    pub world_packs: bool,
    /// Migrate packs shipped by installed extensions.
    pub extension_packs: bool,
    /// Temporarily unlock locked packs. When false, locked packs are skipped.
    pub unlock_locked: bool,
}

impl Default for PackPolicy {
    fn default() -> Self {
        Self {
            world_packs: true,
            extension_packs: false,
            unlock_locked: true,
        }
    }
}

/// Whether a pack takes part in the packs phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackAdmission {
    Migrate { unlock: bool },
    Skip(&'static str),
}

impl PackPolicy {
    pub fn admit(&self, pack: &ContentPack) -> PackAdmission {
        let scope_enabled = match pack.source {
            PackSource::World => self.world_packs,
            PackSource::Extension { .. } => self.extension_packs,
            PackSource::BuiltIn => return PackAdmission::Skip("built-in packs ship migrated"),
        };
        if !scope_enabled {
            return PackAdmission::Skip("pack scope is disabled");
        }
        if pack.locked && !self.unlock_locked {
            return PackAdmission::Skip("pack is locked");
        }
        PackAdmission::Migrate {
            unlock: pack.locked,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MigrationConfig {
    pub packs: PackPolicy,
    /// Upper bound on in-flight per-record operations; `None` fans out fully.
    pub fan_out_limit: Option<usize>,
    /// Name prefix for backup workspace folders.
    pub workspace_prefix: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            packs: PackPolicy::default(),
            fan_out_limit: None,
            workspace_prefix: "Migration Workspace".to_string(),
        }
    }
}

impl MigrationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pack_policy(mut self, packs: PackPolicy) -> Self {
        self.packs = packs;
        self
    }

    pub fn extension_packs(mut self, enabled: bool) -> Self {
        self.packs.extension_packs = enabled;
        self
    }

    pub fn world_packs(mut self, enabled: bool) -> Self {
        self.packs.world_packs = enabled;
        self
    }

    pub fn fan_out_limit(mut self, limit: usize) -> Self {
        self.fan_out_limit = Some(limit);
        self
    }

    pub fn workspace_prefix(mut self, prefix: &str) -> Self {
        self.workspace_prefix = prefix.to_string();
        self
    }

    /// True when `folder_name` belongs to a backup workspace.
    pub fn is_workspace_folder(&self, folder_name: &str) -> bool {
        folder_name.starts_with(&self.workspace_prefix)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workspace_prefix.trim().is_empty() {
            return Err(MigrationError::Config(
                "workspace_prefix must not be empty".to_string(),
            ));
        }
        if self.fan_out_limit == Some(0) {
            return Err(MigrationError::Config(
                "fan_out_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PackContentKind;

    fn pack(source: PackSource) -> ContentPack {
        ContentPack::new("p", "P", source, PackContentKind::Records)
    }

    #[test]
    fn defaults_cover_world_packs_only() {
        let policy = PackPolicy::default();
        assert_eq!(
            policy.admit(&pack(PackSource::World)),
            PackAdmission::Migrate { unlock: false }
        );
        assert!(matches!(
            policy.admit(&pack(PackSource::Extension {
                package: "netrunner-kit".into()
            })),
            PackAdmission::Skip(_)
        ));
        assert!(matches!(
            policy.admit(&pack(PackSource::BuiltIn)),
            PackAdmission::Skip(_)
        ));
    }

    #[test]
    fn locked_packs_follow_unlock_flag() {
        let locked = pack(PackSource::World).locked();
        assert_eq!(
            PackPolicy::default().admit(&locked),
            PackAdmission::Migrate { unlock: true }
        );
        let strict = PackPolicy {
            unlock_locked: false,
            ..PackPolicy::default()
        };
        assert!(matches!(strict.admit(&locked), PackAdmission::Skip(_)));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = MigrationConfig::from_json_str(r#"{"fan_out_limit": 8}"#).unwrap();
        assert_eq!(config.fan_out_limit, Some(8));
        assert!(config.packs.world_packs);
        assert_eq!(config.workspace_prefix, "Migration Workspace");
    }

    #[test]
    fn zero_fan_out_is_rejected() {
        assert!(MigrationConfig::from_json_str(r#"{"fan_out_limit": 0}"#).is_err());
    }
}
