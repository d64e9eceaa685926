//! Frame-generation tool integration
//!
//! The detector talks to the tool through `FrameGenTool`. `SettingsFileTool`
//! drives tools that keep their global profile in a JSON settings file and
//! pick it up on restart.

use crate::env::Environment;
use crate::process::{self, LaunchCommand};
use crate::session::FrameGenParams;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::System;
use tracing::{debug, info, warn};

/// Key of the global profile inside the settings document.
pub const GLOBAL_PROFILE_KEY: &str = "global-profile";

/// Tool handle shared between the orchestrator and the detector thread.
pub type SharedTool = Arc<parking_lot::Mutex<dyn FrameGenTool>>;

/// Global profile written for the detected game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProfileOptions {
    pub target_executable: Option<PathBuf>,
    pub install_dir: Option<PathBuf>,
    pub capture_api: String,
    pub queue_target: u32,
    pub performance_mode: bool,
    pub hdr: bool,
    pub flow_scale: f64,
    pub resolution_scale: f64,
    pub scaling_mode: String,
    pub sharpening: u32,
    pub anime4k_type: String,
    pub anime4k_vrs: bool,
    pub target_fps: u32,
    pub capture_limiter: bool,
}

impl ProfileOptions {
    /// Options for `params`, not yet bound to a game.
    pub fn from_params(params: &FrameGenParams) -> Self {
        Self {
            target_executable: None,
            install_dir: None,
            capture_api: params.capture_api.clone(),
            queue_target: params.queue_target,
            performance_mode: params.performance_mode,
            hdr: params.hdr,
            flow_scale: params.flow_scale,
            resolution_scale: params.resolution_scale,
            scaling_mode: params.scaling_mode.clone(),
            sharpening: params.sharpening,
            anime4k_type: params.anime4k_type.clone(),
            anime4k_vrs: params.anime4k_vrs,
            target_fps: params.target_fps,
            capture_limiter: params.capture_limiter,
        }
    }
}

/// Game process the tool is pointed at.
#[derive(Debug, Clone, Copy)]
pub struct ProfileTarget<'a> {
    pub pid: u32,
    pub exe: &'a Path,
    pub install_dir: Option<&'a Path>,
}

/// Whether the tool was running before we touched it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolRuntime {
    pub was_running: bool,
    pub executable: Option<PathBuf>,
}

/// Saved settings to put back after the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileBackup {
    /// A profile was applied and `contents` holds what it replaced
    pub valid: bool,
    /// Previous settings file contents, `None` if there was no file
    pub contents: Option<String>,
}

/// Frame-generation tool capability.
///
/// The detector calls `capture_state`, `stop_processes`,
/// `apply_global_profile` and `restart_foreground` in that order.
pub trait FrameGenTool: Send {
    /// Current global profile, if the tool has one.
    fn read_options(&self) -> Option<ProfileOptions>;
    fn capture_state(&mut self) -> ToolRuntime;
    /// Stop every running instance. Returns how many were stopped.
    fn stop_processes(&mut self, runtime: &ToolRuntime) -> usize;
    /// Bind `options` to `target` and make it the global profile.
    /// Returns whether the stored profile changed, and the backup.
    fn apply_global_profile(
        &mut self,
        options: &ProfileOptions,
        target: &ProfileTarget,
    ) -> (bool, ProfileBackup);
    fn restore_global_profile(&mut self, backup: &ProfileBackup) -> bool;
    /// Bring the tool back up attached to `target`.
    fn restart_foreground(&mut self, runtime: &ToolRuntime, changed: bool, target: &ProfileTarget) -> bool;
}

/// Environment variables telling a restarted tool which game to attach to.
pub const TARGET_PID_VAR: &str = "FRAMEGEN_TARGET_PID";
pub const TARGET_EXE_VAR: &str = "FRAMEGEN_TARGET_EXE";

/// Tool configured through a JSON settings file.
pub struct SettingsFileTool {
    settings_path: PathBuf,
    executable: Option<PathBuf>,
    system: System,
}

impl SettingsFileTool {
    pub fn new(settings_path: impl Into<PathBuf>, executable: Option<PathBuf>) -> Self {
        Self {
            settings_path: settings_path.into(),
            executable,
            system: System::new(),
        }
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    fn process_name(&self, runtime: Option<&ToolRuntime>) -> Option<String> {
        runtime
            .and_then(|r| r.executable.as_ref())
            .or(self.executable.as_ref())
            .and_then(|exe| exe.file_name())
            .map(|name| name.to_string_lossy().into_owned())
    }

    fn read_raw(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.settings_path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_profile(&self, current: Option<&str>, options: &ProfileOptions) -> io::Result<()> {
        let mut doc = current
            .and_then(|text| serde_json::from_str::<Value>(text).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Map::new()));

        let profile = serde_json::to_value(options)?;
        if let Value::Object(map) = &mut doc {
            map.insert(GLOBAL_PROFILE_KEY.to_string(), profile);
        }

        if let Some(dir) = self.settings_path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.settings_path, serde_json::to_string_pretty(&doc)?)
    }
}

impl FrameGenTool for SettingsFileTool {
    fn read_options(&self) -> Option<ProfileOptions> {
        let text = self.read_raw().ok()??;
        let doc: Value = serde_json::from_str(&text).ok()?;
        serde_json::from_value(doc.get(GLOBAL_PROFILE_KEY)?.clone()).ok()
    }

    fn capture_state(&mut self) -> ToolRuntime {
        let Some(name) = self.process_name(None) else {
            return ToolRuntime::default();
        };

        self.system.refresh_processes();
        let running = self
            .system
            .processes()
            .values()
            .find(|p| p.name().eq_ignore_ascii_case(&name));

        match running {
            Some(process) => ToolRuntime {
                was_running: true,
                executable: process
                    .exe()
                    .map(Path::to_path_buf)
                    .or_else(|| self.executable.clone()),
            },
            None => ToolRuntime {
                was_running: false,
                executable: self.executable.clone(),
            },
        }
    }

    fn stop_processes(&mut self, runtime: &ToolRuntime) -> usize {
        let Some(name) = self.process_name(Some(runtime)) else {
            return 0;
        };

        self.system.refresh_processes();
        let mut stopped = 0;
        for process in self.system.processes().values() {
            if process.name().eq_ignore_ascii_case(&name) && process.kill() {
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!("Stopped {} instance(s) of {}", stopped, name);
        }
        stopped
    }

    fn apply_global_profile(
        &mut self,
        options: &ProfileOptions,
        target: &ProfileTarget,
    ) -> (bool, ProfileBackup) {
        let contents = match self.read_raw() {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read {:?}: {}", self.settings_path, e);
                return (false, ProfileBackup::default());
            }
        };

        let mut bound = options.clone();
        bound.target_executable = Some(target.exe.to_path_buf());
        bound.install_dir = target.install_dir.map(Path::to_path_buf);
        let changed = self.read_options().as_ref() != Some(&bound);

        if let Err(e) = self.write_profile(contents.as_deref(), &bound) {
            warn!("Failed to write profile to {:?}: {}", self.settings_path, e);
            return (false, ProfileBackup::default());
        }

        debug!("Applied global profile for {:?} (changed: {})", target.exe, changed);
        (
            changed,
            ProfileBackup {
                valid: true,
                contents,
            },
        )
    }

    fn restore_global_profile(&mut self, backup: &ProfileBackup) -> bool {
        if !backup.valid {
            return false;
        }

        let result = match &backup.contents {
            Some(contents) => fs::write(&self.settings_path, contents),
            None => match fs::remove_file(&self.settings_path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };

        match result {
            Ok(()) => {
                info!("Restored frame generation settings");
                true
            }
            Err(e) => {
                warn!("Failed to restore {:?}: {}", self.settings_path, e);
                false
            }
        }
    }

    fn restart_foreground(&mut self, runtime: &ToolRuntime, changed: bool, target: &ProfileTarget) -> bool {
        if !changed && !runtime.was_running {
            return false;
        }
        let Some(exe) = runtime.executable.as_ref().or(self.executable.as_ref()) else {
            return false;
        };

        let line = format!("\"{}\"", exe.display());
        let mut env = Environment::from_process();
        env.set(TARGET_PID_VAR, target.pid.to_string());
        env.set(TARGET_EXE_VAR, target.exe.display().to_string());
        let mut launch = LaunchCommand::new(&line, &env);
        launch.working_dir = exe.parent().filter(|dir| !dir.as_os_str().is_empty());
        match process::start(&launch) {
            Ok(spawned) => {
                process::detach_child(spawned.child);
                true
            }
            Err(e) => {
                warn!("Failed to restart frame generation tool: {}", e);
                false
            }
        }
    }
}
