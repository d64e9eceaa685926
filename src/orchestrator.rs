//! Launch Orchestrator
//!
//! Owns the lifecycle of the one app a remote client streams: prepares the
//! display and environment, runs prep commands, starts the app, answers
//! liveness queries, and tears everything down again in reverse.
//!
//! ```text
//! Idle --execute--> Launching --ok--> Running <--pause/resume--> Paused
//!                       |                |                         |
//!                       +--error---------+--terminate--------------+--> Terminating --> Idle
//! ```

use crate::app_context::{AppCatalog, AppContext, CatalogOptions, CommandEntry, TERMINATE_APP_UUID};
use crate::collaborators::{
    DisplayConfigurator, EncoderProber, LauncherPlugin, NoSessions, NullDisplayConfigurator,
    SessionRegistry, StaticProber, VideoConfig,
};
use crate::config::{self, HostConfig};
use crate::detector::{
    snapshot_baseline, CandidateDetector, DetectorJob, ProcessSampler, SysinfoSampler,
};
use crate::env::{project_launch_env, Environment};
use crate::error::{LaunchError, STATUS_OK};
use crate::process::{self, command_executable, LaunchCommand, ProcessGroup};
use crate::profile::SharedTool;
use crate::session::{scale_resolution, FrameGenParams, SharedSession};
use crate::virtual_display::{
    derive_display_guid, refresh_millihertz, DisplayDecision, DisplayRequest, IdentityMode,
    NullDisplayDriver, VirtualDisplayCoordinator, VirtualDisplayDriver, VirtualDisplayRecord,
};
use crate::worker::{CommandJob, CommandWorker, JobTicket, QueuedCommand};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Child;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A primary command exiting within this window counts as a launcher that
/// handed off to the real app.
pub const AUTO_DETACH_WINDOW: Duration = Duration::from_secs(5);

/// Catalog shared with the configuration API.
pub type CatalogHandle = Arc<parking_lot::Mutex<AppCatalog>>;

/// Builds a fresh process sampler for each detection run.
pub type SamplerFactory = Box<dyn Fn() -> Box<dyn ProcessSampler> + Send>;

/// Launch lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Idle,
    Launching,
    Running,
    Paused,
    Terminating,
}

/// Capabilities the orchestrator runs against.
pub struct OrchestratorDeps {
    pub display: Box<dyn DisplayConfigurator>,
    pub virtual_display: Box<dyn VirtualDisplayDriver>,
    pub sessions: Box<dyn SessionRegistry>,
    pub prober: Box<dyn EncoderProber>,
    pub plugin: Option<Box<dyn LauncherPlugin>>,
    pub frame_gen_tool: Option<SharedTool>,
    pub sampler_factory: SamplerFactory,
    /// Environment apps inherit, before the app list's own variables
    pub base_env: Environment,
    /// config.json that receives a generated shared display GUID
    pub config_file: Option<PathBuf>,
}

impl OrchestratorDeps {
    /// Null collaborators and the current process environment.
    pub fn standalone() -> Self {
        Self {
            display: Box::new(NullDisplayConfigurator::default()),
            virtual_display: Box::new(NullDisplayDriver),
            sessions: Box::new(NoSessions),
            prober: Box::new(StaticProber::default()),
            plugin: None,
            frame_gen_tool: None,
            sampler_factory: Box::new(|| Box::new(SysinfoSampler::new())),
            base_env: Environment::from_process(),
            config_file: config::config_file_path().ok(),
        }
    }
}

/// Everything owned by the current launch.
struct ActiveLaunch {
    app: AppContext,
    session: SharedSession,
    env: Environment,
    prep_cmds: Vec<CommandEntry>,
    state_cmds: Vec<CommandEntry>,
    /// Indices into `prep_cmds` whose "do" ran
    prep_ran: Vec<usize>,
    child: Option<Child>,
    group: Option<ProcessGroup>,
    placebo: bool,
    launched_at: Instant,
    virtual_display: Option<VirtualDisplayRecord>,
    display_applied: bool,
    detector: Option<CandidateDetector>,
    plugin_game: Option<String>,
}

/// Starts, tracks and stops the streamed app.
pub struct Orchestrator {
    config: HostConfig,
    config_file: Option<PathBuf>,
    apps_file: Option<PathBuf>,
    catalog: CatalogHandle,
    base_env: Environment,
    display: Box<dyn DisplayConfigurator>,
    vdisplay: VirtualDisplayCoordinator,
    sessions: Box<dyn SessionRegistry>,
    prober: Box<dyn EncoderProber>,
    plugin: Option<Box<dyn LauncherPlugin>>,
    frame_gen_tool: Option<SharedTool>,
    sampler_factory: SamplerFactory,
    worker: Option<CommandWorker>,
    state: LaunchState,
    active: Option<ActiveLaunch>,
    last_run_app_name: String,
    saved_output_name: Option<String>,
    saved_gamepad: Option<String>,
}

impl Orchestrator {
    /// Load the app list and get ready to launch.
    pub fn new(deps: OrchestratorDeps, config: HostConfig) -> Self {
        let apps_file = match config.resolve_apps_file() {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("No app list location: {:#}", e);
                None
            }
        };

        let catalog = load_catalog(apps_file.as_deref(), &config.catalog_options(), &deps.base_env);

        let mut orchestrator = Self {
            config,
            config_file: deps.config_file,
            apps_file,
            catalog: Arc::new(parking_lot::Mutex::new(catalog)),
            base_env: deps.base_env,
            display: deps.display,
            vdisplay: VirtualDisplayCoordinator::new(deps.virtual_display),
            sessions: deps.sessions,
            prober: deps.prober,
            plugin: deps.plugin,
            frame_gen_tool: deps.frame_gen_tool,
            sampler_factory: deps.sampler_factory,
            worker: Some(CommandWorker::spawn()),
            state: LaunchState::Idle,
            active: None,
            last_run_app_name: String::new(),
            saved_output_name: None,
            saved_gamepad: None,
        };

        if !orchestrator.config.persist_display_changes {
            orchestrator.display.reset_persistence();
        }
        orchestrator.update_plugin();
        orchestrator
    }

    fn update_plugin(&mut self) {
        if !self.config.plugin_auto_update {
            return;
        }
        let (Some(plugin), Some(required)) =
            (self.plugin.as_mut(), self.config.plugin_required_version.as_ref())
        else {
            return;
        };

        let installed = plugin.installed_version();
        if installed.as_deref() == Some(required.as_str()) {
            return;
        }

        info!(
            "Launcher plugin version {:?} does not match {}, installing",
            installed, required
        );
        if !plugin.install() {
            warn!("Launcher plugin install failed");
        }
    }

    /// Terminate any running app and stop the worker.
    pub fn shutdown(mut self) {
        self.terminate(true, false);
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn catalog(&self) -> CatalogHandle {
        self.catalog.clone()
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    /// Launch `app` for `session`. Returns 0, 503, or -1.
    pub fn execute(&mut self, app: &AppContext, session: SharedSession) -> i32 {
        match self.try_execute(app, session) {
            Ok(()) => STATUS_OK,
            Err(e) => {
                error!("Failed to launch {:?}: {}", app.name, e);
                e.status_code()
            }
        }
    }

    /// Launch `app` for `session`.
    ///
    /// On error everything acquired so far is released before returning.
    pub fn try_execute(&mut self, app: &AppContext, session: SharedSession) -> Result<(), LaunchError> {
        if self.active.is_some() {
            self.terminate(false, false);
        }

        if app.uuid == TERMINATE_APP_UUID {
            info!("Terminate entry selected, nothing to launch");
            return Ok(());
        }

        self.state = LaunchState::Launching;
        match self.launch(app, session) {
            Ok(()) => {
                self.state = LaunchState::Running;
                info!("{:?} is running", app.name);
                Ok(())
            }
            Err(e) => {
                self.terminate(false, false);
                Err(e)
            }
        }
    }

    fn launch(&mut self, app: &AppContext, session: SharedSession) -> Result<(), LaunchError> {
        info!("Launching {:?} ({})", app.name, app.uuid);
        self.last_run_app_name = app.name.clone();

        let prep_cmds = with_globals(&self.config.global_prep_cmds, &app.prep_cmds, app.exclude_global_prep_cmd);
        let state_cmds = with_globals(&self.config.global_state_cmds, &app.state_cmds, app.exclude_global_state_cmd);

        self.active = Some(ActiveLaunch {
            app: app.clone(),
            session: session.clone(),
            env: Environment::new(),
            prep_cmds,
            state_cmds,
            prep_ran: Vec::new(),
            child: None,
            group: None,
            placebo: false,
            launched_at: Instant::now(),
            virtual_display: None,
            display_applied: false,
            detector: None,
            plugin_game: None,
        });

        if let Some(gamepad) = &app.gamepad {
            let previous = std::mem::replace(&mut self.config.gamepad, gamepad.clone());
            self.saved_gamepad = Some(previous);
        }

        {
            let mut s = session.lock();
            let factor = if app.scale_factor != 100 {
                app.scale_factor
            } else {
                s.scale_factor
            };
            let (width, height) = scale_resolution(s.requested_width, s.requested_height, factor);
            s.width = width;
            s.height = height;
            s.frame_gen = FrameGenParams::resolve(app, &s);
        }

        self.prepare_display(app, &session);

        if self.sessions.active_sessions() == 0 && !self.prober.probe() {
            if self.config.ignore_encoder_probe_failure {
                warn!("Encoder probe failed, continuing anyway");
            } else {
                return Err(LaunchError::EncoderProbeFailed);
            }
        }

        let env = {
            let catalog = self.catalog.lock();
            project_launch_env(&catalog.env, app, &session.lock())
        };
        if let Some(active) = self.active.as_mut() {
            active.env = env.clone();
        }

        self.run_prep_commands(app, &env)?;

        // Plugin and fullscreen launches outlive their launcher process
        let direct_launch = app.playnite_id.is_none() && !app.playnite_fullscreen;
        let frame_gen_active =
            direct_launch && session.lock().frame_gen.is_some() && self.frame_gen_tool.is_some();
        let mut sampler = frame_gen_active.then(|| (self.sampler_factory)());
        let baseline = sampler
            .as_mut()
            .map(|s| snapshot_baseline(s.as_mut()))
            .unwrap_or_default();

        let first_detached = self.start_detached(app, &env);

        let primary_pid = self.start_primary(app, &env)?;

        if let Some(sampler) = sampler {
            let seed_pid = first_detached.map(|(pid, _)| pid).or(primary_pid);
            let seed_cmd = first_detached.map(|(_, cmd)| cmd).unwrap_or(app.cmd.as_str());
            if seed_pid.is_some() {
                self.start_detector(app, &session, sampler, baseline, seed_pid, seed_cmd);
            }
        }

        if let Some(active) = self.active.as_mut() {
            active.launched_at = Instant::now();
        }
        Ok(())
    }

    fn prepare_display(&mut self, app: &AppContext, session: &SharedSession) {
        let decision = {
            let s = session.lock();
            DisplayDecision {
                headless: self.config.headless_mode,
                app_requested: app.virtual_display,
                session_requested: s.virtual_display,
                physical_available: self.display.physical_display_available(),
            }
        };

        if decision.use_virtual_display() && self.vdisplay.available() {
            self.provision_virtual_display(app, session);
        } else if decision.use_virtual_display() {
            warn!("Virtual display requested but no driver is available");
        }

        let video = VideoConfig {
            output_name: self.config.output_name.clone(),
            persist_changes: self.config.persist_display_changes,
            policy: self.config.display_policy,
        };
        let applied = self.display.apply(&video, &session.lock());
        if !applied {
            warn!("Display configuration failed, streaming the current layout");
        }
        if let Some(active) = self.active.as_mut() {
            active.display_applied = applied;
        }
    }

    fn provision_virtual_display(&mut self, app: &AppContext, session: &SharedSession) {
        let mode = IdentityMode::select(
            self.config.shared_virtual_display,
            app.use_app_identity,
            app.per_client_app_identity,
        );

        let shared_guid = if mode == IdentityMode::Shared {
            let (guid, generated) = self.config.ensure_shared_guid();
            match self.config_file.as_deref() {
                Some(path) if generated => {
                    if let Err(e) = config::persist_shared_guid(path, guid) {
                        warn!("Failed to persist shared display GUID: {:#}", e);
                    }
                }
                _ => {}
            }
            guid
        } else {
            Uuid::nil()
        };

        let mut s = session.lock();
        let guid = derive_display_guid(mode, &app.uuid, &s.client_uuid, &shared_guid);
        let identity = if s.client_name.is_empty() {
            app.name.clone()
        } else {
            s.client_name.clone()
        };
        let request = DisplayRequest {
            identity,
            display_name: app.name.clone(),
            width: s.width,
            height: s.height,
            refresh_millihertz: refresh_millihertz(
                s.fps,
                app.frame_gen_fix || self.config.double_refresh,
            ),
            guid,
        };

        let Some((record, device)) = self.vdisplay.provision(&request) else {
            return;
        };

        s.virtual_display_guid = Some(guid);
        s.display_device_id = Some(device.device_id);
        s.display_name = Some(device.display_name.clone());

        let previous = std::mem::replace(&mut self.config.output_name, device.display_name);
        self.saved_output_name.get_or_insert(previous);
        if let Some(active) = self.active.as_mut() {
            active.virtual_display = Some(record);
        }
    }

    fn run_prep_commands(&mut self, app: &AppContext, env: &Environment) -> Result<(), LaunchError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };

        for (index, entry) in active.prep_cmds.iter().enumerate() {
            if entry.do_cmd.trim().is_empty() {
                active.prep_ran.push(index);
                continue;
            }

            let mut launch = LaunchCommand::new(&entry.do_cmd, env);
            launch.working_dir = app.working_dir.as_deref();
            launch.elevated = entry.elevated;

            info!("Executing prep command {:?}", entry.do_cmd);
            match process::run(&launch) {
                Ok(_) => active.prep_ran.push(index),
                Err(e) if app.cmd.is_empty() && e.is_permission_denied() => {
                    warn!("Prep command {:?} not permitted, skipping: {}", entry.do_cmd, e);
                }
                Err(source) => {
                    return Err(LaunchError::PrepCommand {
                        command: entry.do_cmd.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Start detached commands. Returns the first one that started.
    fn start_detached<'a>(&mut self, app: &'a AppContext, env: &Environment) -> Option<(u32, &'a str)> {
        let mut first = None;
        for cmd in &app.detached {
            let mut launch = LaunchCommand::new(cmd, env);
            launch.working_dir = app.working_dir.as_deref();
            launch.elevated = app.elevated;

            info!("Spawning detached command {:?}", cmd);
            match process::start(&launch) {
                Ok(spawned) => {
                    first.get_or_insert((spawned.pid(), cmd.as_str()));
                    process::detach_child(spawned.child);
                }
                Err(e) => warn!("Detached command failed: {}", e),
            }
        }
        first
    }

    /// Take exactly one execution path. Returns the primary pid, if any.
    fn start_primary(&mut self, app: &AppContext, env: &Environment) -> Result<Option<u32>, LaunchError> {
        if let Some(game_id) = &app.playnite_id {
            return self.start_plugin_game(game_id, env).map(|_| None);
        }

        let fullscreen_cmd;
        let cmd = if app.playnite_fullscreen {
            let plugin = self
                .plugin
                .as_ref()
                .ok_or_else(|| LaunchError::PluginUnavailable("fullscreen".into()))?;
            fullscreen_cmd = plugin
                .fullscreen_command()
                .ok_or_else(|| LaunchError::PluginUnavailable("fullscreen".into()))?;
            fullscreen_cmd.as_str()
        } else {
            app.cmd.as_str()
        };

        let Some(active) = self.active.as_mut() else {
            return Ok(None);
        };

        if cmd.trim().is_empty() {
            info!("No command for {:?}, running as placebo", app.name);
            active.placebo = true;
            return Ok(None);
        }

        let launch = LaunchCommand {
            cmd,
            working_dir: app.working_dir.as_deref(),
            env,
            output: app.output.as_deref(),
            elevated: app.elevated,
            grouped: true,
        };

        info!("Executing {:?}", cmd);
        let spawned = process::start(&launch).map_err(|source| LaunchError::Primary {
            command: cmd.to_string(),
            source,
        })?;
        let pid = spawned.pid();
        active.child = Some(spawned.child);
        active.group = spawned.group;
        Ok(Some(pid))
    }

    fn start_plugin_game(&mut self, game_id: &str, env: &Environment) -> Result<(), LaunchError> {
        let plugin = self
            .plugin
            .as_mut()
            .ok_or_else(|| LaunchError::PluginUnavailable(game_id.to_string()))?;
        let cmd = plugin
            .launcher_command(game_id)
            .ok_or_else(|| LaunchError::PluginUnavailable(game_id.to_string()))?;

        info!("Starting game {} through the launcher plugin", game_id);
        let spawned = process::start(&LaunchCommand::new(&cmd, env)).map_err(|source| {
            LaunchError::Primary {
                command: cmd.clone(),
                source,
            }
        })?;
        plugin.announce_launcher(spawned.pid(), game_id);
        process::detach_child(spawned.child);

        if let Some(active) = self.active.as_mut() {
            // The plugin tracks the game's lifetime
            active.placebo = true;
            active.plugin_game = Some(game_id.to_string());
        }
        Ok(())
    }

    fn start_detector(
        &mut self,
        app: &AppContext,
        session: &SharedSession,
        sampler: Box<dyn ProcessSampler>,
        baseline: HashSet<u32>,
        seed_pid: Option<u32>,
        seed_cmd: &str,
    ) {
        let (Some(tool), Some(params)) = (self.frame_gen_tool.clone(), session.lock().frame_gen.clone())
        else {
            return;
        };

        let install_dir_hint = app.working_dir.clone().or_else(|| {
            command_executable(seed_cmd)
                .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
                .filter(|dir| !dir.as_os_str().is_empty())
        });

        let job = DetectorJob {
            baseline,
            direct_pid: seed_pid,
            install_dir_hint,
            params,
            settings: self.config.detector,
            weights: self.config.scoring,
        };
        debug!("Starting frame generation detector seeded with {:?}", seed_pid);

        if let Some(active) = self.active.as_mut() {
            active.detector = Some(CandidateDetector::start(job, sampler, tool));
        }
    }

    /// App id while the launch counts as running, otherwise 0.
    pub fn running(&mut self) -> u32 {
        let Some(active) = self.active.as_mut() else {
            return 0;
        };
        if !matches!(self.state, LaunchState::Running | LaunchState::Paused) {
            return 0;
        }

        let id = active.app.id;
        if active.placebo {
            return id;
        }

        if active.app.wait_all {
            if let Some(group) = active.group.as_mut() {
                if group.is_alive() {
                    return id;
                }
            }
        }

        let primary_alive = match active.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        };
        if primary_alive {
            return id;
        }

        if active.app.auto_detach && active.launched_at.elapsed() < AUTO_DETACH_WINDOW {
            info!(
                "{:?} exited quickly, treating it as a launcher and staying attached",
                active.app.name
            );
            active.placebo = true;
            return id;
        }

        0
    }

    /// Pause the stream: terminate, or run state "undo" commands.
    pub fn pause(&mut self) -> Option<JobTicket> {
        let active = self.active.as_ref()?;
        if self.state != LaunchState::Running {
            return None;
        }

        if active.app.terminate_on_pause {
            info!("{:?} terminates on pause", active.app.name);
            self.terminate(false, false);
            return None;
        }

        let commands = active
            .state_cmds
            .iter()
            .rev()
            .filter(|entry| !entry.undo_cmd.trim().is_empty())
            .map(|entry| QueuedCommand {
                cmd: entry.undo_cmd.clone(),
                elevated: entry.elevated,
            })
            .collect();
        let job = CommandJob {
            label: format!("pause commands for {}", active.app.name),
            commands,
            env: active.env.clone(),
            working_dir: active.app.working_dir.clone(),
        };

        self.state = LaunchState::Paused;
        self.worker.as_ref()?.submit(job)
    }

    /// Resume the stream: run state "do" commands.
    pub fn resume(&mut self) -> Option<JobTicket> {
        let active = self.active.as_ref()?;
        if self.state != LaunchState::Paused {
            return None;
        }

        let commands = active
            .state_cmds
            .iter()
            .filter(|entry| !entry.do_cmd.trim().is_empty())
            .map(|entry| QueuedCommand {
                cmd: entry.do_cmd.clone(),
                elevated: entry.elevated,
            })
            .collect();
        let job = CommandJob {
            label: format!("resume commands for {}", active.app.name),
            commands,
            env: active.env.clone(),
            working_dir: active.app.working_dir.clone(),
        };

        self.state = LaunchState::Running;
        self.worker.as_ref()?.submit(job)
    }

    /// Stop the app and release everything the launch acquired.
    ///
    /// `immediate` skips the graceful exit budget. `needs_refresh` reloads
    /// the app list afterwards. Calling this with nothing running is a no-op
    /// apart from the optional reload.
    pub fn terminate(&mut self, immediate: bool, needs_refresh: bool) {
        if let Some(mut active) = self.active.take() {
            self.state = LaunchState::Terminating;
            info!("Terminating {:?}", active.app.name);

            if let Some(detector) = active.detector.take() {
                detector.stop();
            }

            let mut budget = if immediate {
                Duration::ZERO
            } else {
                active.app.exit_timeout
            };

            if let (Some(plugin), Some(game_id)) = (self.plugin.as_mut(), active.plugin_game.as_ref()) {
                if !budget.is_zero() {
                    let started = Instant::now();
                    if !plugin.stop_game(game_id, budget) {
                        warn!("Launcher plugin could not stop game {}", game_id);
                    }
                    budget = budget.saturating_sub(started.elapsed());
                }
            }

            process::terminate_group(active.child.take(), active.group.take(), budget);

            for index in active.prep_ran.iter().rev() {
                let entry = &active.prep_cmds[*index];
                if entry.undo_cmd.trim().is_empty() {
                    continue;
                }
                let mut launch = LaunchCommand::new(&entry.undo_cmd, &active.env);
                launch.working_dir = active.app.working_dir.as_deref();
                launch.elevated = entry.elevated;

                info!("Executing undo command {:?}", entry.undo_cmd);
                if let Err(e) = process::run(&launch) {
                    warn!("Undo command failed: {}", e);
                }
            }

            if let Some(mut record) = active.virtual_display.take() {
                self.vdisplay.teardown(&mut record);
            }
            if active.display_applied {
                self.display.revert();
            }
            active.session.lock().clear_launch_state();
        }

        if let Some(gamepad) = self.saved_gamepad.take() {
            self.config.gamepad = gamepad;
        }
        if let Some(output_name) = self.saved_output_name.take() {
            self.config.output_name = output_name;
        }

        self.state = LaunchState::Idle;

        if needs_refresh {
            self.refresh();
        }
    }

    /// Reload the app list. A running launch keeps its own copy of the app.
    pub fn refresh(&mut self) {
        let catalog = load_catalog(
            self.apps_file.as_deref(),
            &self.config.catalog_options(),
            &self.base_env,
        );
        *self.catalog.lock() = catalog;
        debug!("App list refreshed");
    }

    pub fn get_apps(&self) -> Vec<AppContext> {
        self.catalog.lock().apps.clone()
    }

    pub fn get_last_run_app_name(&self) -> &str {
        &self.last_run_app_name
    }

    pub fn get_running_app_uuid(&self) -> Option<Uuid> {
        self.active.as_ref().map(|active| active.app.uuid)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if self.active.is_some() {
            self.terminate(true, false);
        }
    }
}

fn with_globals(globals: &[CommandEntry], own: &[CommandEntry], exclude: bool) -> Vec<CommandEntry> {
    let mut commands = Vec::new();
    if !exclude {
        commands.extend_from_slice(globals);
    }
    commands.extend_from_slice(own);
    commands
}

fn load_catalog(path: Option<&std::path::Path>, options: &CatalogOptions, base_env: &Environment) -> AppCatalog {
    match path {
        Some(path) => AppCatalog::load(path, options, base_env),
        None => AppCatalog::fallback(options, base_env),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_context::CommandEntry;

    #[test]
    fn test_globals_come_first_unless_excluded() {
        let globals = vec![CommandEntry::new("global", "")];
        let own = vec![CommandEntry::new("own", "")];
        let merged = with_globals(&globals, &own, false);
        assert_eq!(merged[0].do_cmd, "global");
        assert_eq!(merged[1].do_cmd, "own");
        assert_eq!(with_globals(&globals, &own, true).len(), 1);
    }
}
