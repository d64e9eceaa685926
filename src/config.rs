/// Host configuration for the stream launcher.
///
/// This module provides functionality for managing host configuration,
/// including:
/// - Locating the app list and the frame-generation tool
/// - Display policy and the capture output name
/// - Global prep/state commands shared by every app
/// - Detector timing and scoring weights
///
/// The configuration is saved to and loaded from a `config.json` file in the
/// platform-specific data directory (%APPDATA%/StreamHostLauncher/ on
/// Windows).
///
/// # Example
///
/// ```no_run
/// use stream_host_launcher::config::{load_config, save_config};
///
/// let mut config = load_config();
/// config.output_name = "DISPLAY2".to_string();
/// save_config(&config).expect("Failed to save config");
/// ```
use crate::app_context::{CatalogOptions, CommandEntry};
use crate::detector::{DetectorSettings, ScoringWeights};
use crate::virtual_display::DisplayPolicy;
use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Name of the app list file inside the data directory
pub const APPS_FILE_NAME: &str = "apps.json";

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Location of the frame-generation tool
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct FrameGenToolConfig {
    /// JSON settings file holding the tool's global profile
    pub settings_path: Option<PathBuf>,
    pub executable: Option<PathBuf>,
}

/// Host configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// App list path (None = apps.json in the data directory)
    pub apps_file: Option<PathBuf>,
    pub display_policy: DisplayPolicy,
    /// Host has no physical display attached
    pub headless_mode: bool,
    /// Output the capture pipeline streams from
    pub output_name: String,
    pub persist_display_changes: bool,
    /// Double the virtual display refresh rate for every app
    pub double_refresh: bool,
    pub ignore_encoder_probe_failure: bool,
    pub virtual_display_entry: bool,
    pub remote_input_entry: bool,
    pub global_prep_cmds: Vec<CommandEntry>,
    pub global_state_cmds: Vec<CommandEntry>,
    /// Every launch shares one virtual display identity
    pub shared_virtual_display: bool,
    pub shared_virtual_display_guid: Option<Uuid>,
    /// Emulated gamepad type
    pub gamepad: String,
    pub frame_gen_tool: FrameGenToolConfig,
    pub detector: DetectorSettings,
    pub scoring: ScoringWeights,
    pub plugin_auto_update: bool,
    pub plugin_required_version: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            apps_file: None,
            display_policy: DisplayPolicy::Default,
            headless_mode: false,
            output_name: String::new(),
            persist_display_changes: false,
            double_refresh: false,
            ignore_encoder_probe_failure: false,
            virtual_display_entry: cfg!(windows),
            remote_input_entry: false,
            global_prep_cmds: Vec::new(),
            global_state_cmds: Vec::new(),
            shared_virtual_display: false,
            shared_virtual_display_guid: None,
            gamepad: "auto".to_string(),
            frame_gen_tool: FrameGenToolConfig::default(),
            detector: DetectorSettings::default(),
            scoring: ScoringWeights::default(),
            plugin_auto_update: false,
            plugin_required_version: None,
        }
    }
}

impl HostConfig {
    /// Synthetic catalog entries enabled by this config
    pub fn catalog_options(&self) -> CatalogOptions {
        CatalogOptions {
            virtual_display_entry: self.virtual_display_entry,
            remote_input_entry: self.remote_input_entry,
        }
    }

    /// App list path, defaulting to the data directory
    pub fn resolve_apps_file(&self) -> Result<PathBuf> {
        match &self.apps_file {
            Some(path) => Ok(path.clone()),
            None => Ok(get_data_directory()?.join(APPS_FILE_NAME)),
        }
    }

    /// Shared virtual display GUID, generated on first use.
    /// The flag is true when a new GUID was generated and should be saved.
    pub fn ensure_shared_guid(&mut self) -> (Uuid, bool) {
        match self.shared_virtual_display_guid {
            Some(guid) => (guid, false),
            None => {
                let guid = Uuid::new_v4();
                self.shared_virtual_display_guid = Some(guid);
                (guid, true)
            }
        }
    }
}

/// Get the application's data directory
/// Returns %APPDATA%/StreamHostLauncher/ on Windows
/// Creates directory if it doesn't exist
pub fn get_data_directory() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "StreamHostLauncher")
        .ok_or_else(|| anyhow!("Failed to determine user data directory"))?;

    let data_dir = project_dirs.data_dir();

    fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

    Ok(data_dir.to_path_buf())
}

/// Path of config.json in the data directory
pub fn config_file_path() -> Result<PathBuf> {
    Ok(get_data_directory()?.join(CONFIG_FILE_NAME))
}

/// Load host configuration from config.json
/// Returns default config if file doesn't exist or on error
pub fn load_config() -> HostConfig {
    let Ok(path) = config_file_path() else {
        return HostConfig::default();
    };

    load_config_from(&path)
}

/// Load host configuration from an explicit path
pub fn load_config_from(path: &Path) -> HostConfig {
    if !path.exists() {
        return HostConfig::default();
    }

    let Ok(contents) = fs::read_to_string(path) else {
        return HostConfig::default();
    };

    serde_json::from_str(&contents).unwrap_or_default()
}

/// Save host configuration to config.json
pub fn save_config(config: &HostConfig) -> Result<()> {
    save_config_to(config, &config_file_path()?)
}

/// Record a generated shared display GUID in the file at `path`.
///
/// Only the GUID changes; everything else is kept as it is on disk, so
/// overrides applied to a running configuration never leak into the file.
pub fn persist_shared_guid(path: &Path, guid: Uuid) -> Result<()> {
    let mut on_disk = load_config_from(path);
    on_disk.shared_virtual_display_guid = Some(guid);
    save_config_to(&on_disk, path)
}

/// Save host configuration to an explicit path
pub fn save_config_to(config: &HostConfig, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;

    Ok(())
}
