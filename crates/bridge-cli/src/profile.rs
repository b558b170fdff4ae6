// Profile module - persists the server address and caller identity

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DEFAULT_SERVER: &str = "http://localhost:8080";

/// Connection settings stored in `~/.bridge/profile.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub server: String,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub role: Option<String>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            user_id: None,
            role: None,
        }
    }
}

impl Profile {
    /// Applies command-line overrides on top of the stored profile.
    pub fn with_overrides(
        mut self,
        server: Option<String>,
        user_id: Option<Uuid>,
        role: Option<String>,
    ) -> Self {
        if let Some(server) = server {
            self.server = server;
        }
        if user_id.is_some() {
            self.user_id = user_id;
        }
        if role.is_some() {
            self.role = role;
        }
        self
    }

    pub fn require_user(&self) -> Result<Uuid> {
        self.user_id.ok_or_else(|| {
            anyhow!("No user configured. Run `bridge profile set --user <UUID>` or pass --user")
        })
    }
}

/// Get the default profile path (~/.bridge/profile.json)
pub fn default_path() -> Result<PathBuf> {
    #[cfg(unix)]
    let home = std::env::var("HOME")
        .map_err(|_| anyhow!("HOME environment variable not set"))?;

    #[cfg(windows)]
    let home = std::env::var("USERPROFILE")
        .map_err(|_| anyhow!("USERPROFILE environment variable not set"))?;

    Ok(PathBuf::from(home).join(".bridge").join("profile.json"))
}

/// Loads the profile at `path`, or the default profile if the file is absent.
pub fn load(path: &Path) -> Result<Profile> {
    if !path.exists() {
        return Ok(Profile::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read profile '{}'", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse profile '{}'", path.display()))
}

/// Writes the profile, creating the parent directory if needed.
pub fn save(path: &Path, profile: &Profile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(profile)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write profile '{}'", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_profile_is_default() {
        let dir = TempDir::new().unwrap();
        let profile = load(&dir.path().join("profile.json")).unwrap();
        assert_eq!(profile, Profile::default());
        assert!(profile.require_user().is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("profile.json");
        let profile = Profile {
            server: "http://bridge.internal:9000".to_string(),
            user_id: Some(Uuid::new_v4()),
            role: Some("admin".to_string()),
        };

        save(&path, &profile).unwrap();
        assert_eq!(load(&path).unwrap(), profile);
    }

    #[test]
    fn test_overrides_win() {
        let user = Uuid::new_v4();
        let profile = Profile::default().with_overrides(
            Some("http://other:1".to_string()),
            Some(user),
            None,
        );
        assert_eq!(profile.server, "http://other:1");
        assert_eq!(profile.require_user().unwrap(), user);
        assert_eq!(profile.role, None);
    }

    #[test]
    fn test_corrupt_profile_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load(&path).is_err());
    }
}
