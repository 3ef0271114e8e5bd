//! Configuration loading and root folder resolution
//!
//! Root folder resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable consulted when no CLI argument is given
pub const ROOT_FOLDER_ENV: &str = "LOOPCAST_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "loopcast.db";

/// Directory (inside the root folder) holding the slot files
pub const MEDIA_DIR: &str = "media";

/// Contents of `config.toml`
///
/// Every field is optional; a missing or unreadable file never prevents startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Root folder for the database and media slots
    pub root_folder: Option<PathBuf>,
    /// Catalog database path
    pub catalog_db: Option<PathBuf>,
    /// Default log filter (e.g. "info", "loopcast_rd=debug")
    pub log_level: Option<String>,
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config file: {}", e)))
    }

    /// Load the first config file found in the platform search path
    ///
    /// Returns defaults (all `None`) when no file exists or it fails to parse.
    pub fn load() -> Self {
        let Some(path) = config_file_path() else {
            debug!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Ignoring config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Cannot read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Resolve the root folder following the documented priority order
pub fn resolve_root_folder(cli_arg: Option<&Path>, env_var_name: &str) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(root_folder) = TomlConfig::load().root_folder {
        return root_folder;
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Locate the config file for the platform
///
/// Linux checks `~/.config/loopcast/config.toml` then `/etc/loopcast/config.toml`.
fn config_file_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("loopcast").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/loopcast/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("loopcast"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/loopcast"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("loopcast"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/loopcast"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("loopcast"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\loopcast"))
    } else {
        PathBuf::from("./loopcast_data")
    }
}

/// Creates the root folder layout on first run
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root and media directories if missing
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(self.media_dir())?;
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Path of the rotation state database
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    /// Directory holding the current/next/temp slot files
    pub fn media_dir(&self) -> PathBuf {
        self.root_folder.join(MEDIA_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_full_config() {
        let config = TomlConfig::parse(
            r#"
            root_folder = "/srv/loopcast"
            catalog_db = "/srv/catalog/media_library.db"
            log_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.root_folder, Some(PathBuf::from("/srv/loopcast")));
        assert_eq!(
            config.catalog_db,
            Some(PathBuf::from("/srv/catalog/media_library.db"))
        );
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_parse_empty_config() {
        let config = TomlConfig::parse("").unwrap();
        assert!(config.root_folder.is_none());
        assert!(config.catalog_db.is_none());
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = TomlConfig::parse("root_folder = [");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_cli_argument_wins() {
        let path = PathBuf::from("/tmp/loopcast-cli");
        let resolved = resolve_root_folder(Some(&path), "LOOPCAST_TEST_UNSET_VAR");
        assert_eq!(resolved, path);
    }

    #[test]
    #[serial]
    fn test_env_var_used_without_cli_argument() {
        std::env::set_var("LOOPCAST_TEST_ROOT", "/tmp/loopcast-env");
        let resolved = resolve_root_folder(None, "LOOPCAST_TEST_ROOT");
        std::env::remove_var("LOOPCAST_TEST_ROOT");
        assert_eq!(resolved, PathBuf::from("/tmp/loopcast-env"));
    }

    #[test]
    #[serial]
    fn test_empty_env_var_is_ignored() {
        std::env::set_var("LOOPCAST_TEST_ROOT", "");
        let resolved = resolve_root_folder(None, "LOOPCAST_TEST_ROOT");
        std::env::remove_var("LOOPCAST_TEST_ROOT");
        assert_ne!(resolved, PathBuf::from(""));
    }

    #[test]
    fn test_initializer_layout() {
        let temp = tempfile::tempdir().unwrap();
        let init = RootFolderInitializer::new(temp.path().join("root"));
        init.ensure_directories().unwrap();

        assert!(init.media_dir().is_dir());
        assert_eq!(init.database_path(), temp.path().join("root").join(DATABASE_FILE));
    }
}
