//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (handled by the binary, passed to [`RootFolderResolver::with_cli_arg`])
//! 2. Environment variable (`SIFT_ROOT_FOLDER`, then `SIFT_ROOT`)
//! 3. TOML config file (`<config_dir>/photosift/<module>.toml`)
//! 4. OS-dependent compiled default

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Primary environment variable for the root folder
pub const ROOT_FOLDER_ENV: &str = "SIFT_ROOT_FOLDER";

/// Legacy/short alias for the root folder environment variable
pub const ROOT_ENV_ALIAS: &str = "SIFT_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "photosift.db";

/// Logging section of the TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter level ("error", "warn", "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Per-module TOML configuration
///
/// Every field is optional so that older files keep parsing as fields are added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database and job staging directories
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// API key for the remote vision model endpoint
    #[serde(default)]
    pub vision_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible vision endpoint
    #[serde(default)]
    pub vision_endpoint: Option<String>,
}

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was compiled for
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: default_log_level(),
        }
    }
}

/// Resolves the root folder following the priority order in the module docs
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
}

impl RootFolderResolver {
    /// Create resolver for a module (module name selects the TOML file)
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
        }
    }

    /// Supply a command-line override (highest priority)
    pub fn with_cli_arg(mut self, cli_arg: Option<PathBuf>) -> Self {
        self.cli_arg = cli_arg;
        self
    }

    /// Path of this module's TOML config file, if a config directory exists
    pub fn config_file_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| {
            d.join("photosift")
                .join(format!("{}.toml", self.module_name))
        })
    }

    /// Load the module's TOML config; a missing or unreadable file yields defaults
    pub fn load_toml(&self) -> TomlConfig {
        match self.config_file_path() {
            Some(path) if path.exists() => match load_toml_config(&path) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Ignoring unreadable config file {}: {}", path.display(), e);
                    TomlConfig::default()
                }
            },
            _ => {
                debug!(module = %self.module_name, "No TOML config file, using defaults");
                TomlConfig::default()
            }
        }
    }

    /// Resolve the root folder; never fails (falls back to compiled default)
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("Root folder from command line: {}", path.display());
            return path.clone();
        }

        for var in [ROOT_FOLDER_ENV, ROOT_ENV_ALIAS] {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    info!("Root folder from {}: {}", var, value);
                    return PathBuf::from(value);
                }
            }
        }

        if let Some(path) = self.load_toml().root_folder {
            info!("Root folder from TOML config: {}", path.display());
            return path;
        }

        let fallback = CompiledDefaults::for_current_platform().root_folder;
        info!("Root folder from compiled default: {}", fallback.display());
        fallback
    }
}

/// Creates the root folder and derives paths inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder (and parents) if missing; idempotent
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    /// Directory under which per-job staging data (grid composites) lives
    pub fn jobs_path(&self) -> PathBuf {
        self.root_folder.join("jobs")
    }
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Write a TOML config atomically (temp file + rename)
///
/// On Unix the file is restricted to 0600 since it may contain an API key.
pub fn write_toml_config(config: &TomlConfig, target: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = target.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&temp_path, target)?;
    Ok(())
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("photosift"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/photosift"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("photosift"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/photosift"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("photosift"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\photosift"))
    } else {
        PathBuf::from("./photosift_data")
    }
}
