//! End-to-end launch scenarios against fake collaborators

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use stream_host_launcher::app_context::{AppContext, CommandEntry};
use stream_host_launcher::collaborators::{LauncherPlugin, NullDisplayConfigurator, StaticProber};
use stream_host_launcher::config::{self, HostConfig};
use stream_host_launcher::detector::{DetectorSettings, ProcessSample, ProcessSampler};
use stream_host_launcher::error::{STATUS_ENCODER_PROBE_FAILED, STATUS_LAUNCH_FAILED, STATUS_OK};
use stream_host_launcher::orchestrator::{LaunchState, Orchestrator, OrchestratorDeps};
use stream_host_launcher::profile::{
    FrameGenTool, ProfileBackup, ProfileOptions, ProfileTarget, SharedTool, ToolRuntime,
};
use stream_host_launcher::session::LaunchSession;
use stream_host_launcher::virtual_display::{
    DeviceInfo, DisplayPolicy, DisplayRequest, DriverStatus, VirtualDisplayDriver,
};
use tempfile::TempDir;
use uuid::Uuid;

#[derive(Default, Clone)]
struct DriverLog {
    created: Arc<Mutex<Vec<DisplayRequest>>>,
    removed: Arc<Mutex<Vec<Uuid>>>,
}

struct FakeDriver(DriverLog);

impl VirtualDisplayDriver for FakeDriver {
    fn status(&self) -> DriverStatus {
        DriverStatus::Ok
    }

    fn create(&self, request: &DisplayRequest) -> Option<DeviceInfo> {
        self.0.created.lock().push(request.clone());
        Some(DeviceInfo {
            device_id: "vdd-0".into(),
            display_name: "VIRTUAL1".into(),
        })
    }

    fn remove(&self, guid: &Uuid) -> bool {
        self.0.removed.lock().push(*guid);
        true
    }
}

#[derive(Default, Clone)]
struct PluginLog {
    fullscreen: Option<String>,
    announced: Arc<Mutex<Vec<(u32, String)>>>,
    stopped: Arc<Mutex<Vec<(String, Duration)>>>,
    installs: Arc<Mutex<usize>>,
}

struct FakePlugin(PluginLog);

impl LauncherPlugin for FakePlugin {
    fn launcher_command(&self, game_id: &str) -> Option<String> {
        (game_id != "unknown").then(|| "true".to_string())
    }

    fn fullscreen_command(&self) -> Option<String> {
        self.0.fullscreen.clone()
    }

    fn announce_launcher(&mut self, pid: u32, game_id: &str) {
        self.0.announced.lock().push((pid, game_id.to_string()));
    }

    fn stop_game(&mut self, game_id: &str, timeout: Duration) -> bool {
        self.0.stopped.lock().push((game_id.to_string(), timeout));
        true
    }

    fn installed_version(&self) -> Option<String> {
        Some("1.0".into())
    }

    fn install(&mut self) -> bool {
        *self.0.installs.lock() += 1;
        true
    }
}

/// Records every call the detector makes on the tool.
#[derive(Default)]
struct RecordingTool {
    calls: Vec<&'static str>,
}

impl FrameGenTool for RecordingTool {
    fn read_options(&self) -> Option<ProfileOptions> {
        None
    }

    fn capture_state(&mut self) -> ToolRuntime {
        self.calls.push("capture");
        ToolRuntime::default()
    }

    fn stop_processes(&mut self, _runtime: &ToolRuntime) -> usize {
        self.calls.push("stop");
        0
    }

    fn apply_global_profile(
        &mut self,
        _options: &ProfileOptions,
        _target: &ProfileTarget,
    ) -> (bool, ProfileBackup) {
        self.calls.push("apply");
        (
            true,
            ProfileBackup {
                valid: true,
                contents: None,
            },
        )
    }

    fn restore_global_profile(&mut self, _backup: &ProfileBackup) -> bool {
        self.calls.push("restore");
        true
    }

    fn restart_foreground(&mut self, _runtime: &ToolRuntime, _changed: bool, _target: &ProfileTarget) -> bool {
        self.calls.push("restart");
        true
    }
}

/// Empty baseline, then one busy game process.
struct GameAppears {
    calls: Arc<AtomicUsize>,
}

impl ProcessSampler for GameAppears {
    fn sample(&mut self) -> Vec<ProcessSample> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
        if n == 0 {
            return Vec::new();
        }
        vec![ProcessSample {
            pid: 777_777,
            exe: Some(PathBuf::from("/games/game")),
            cpu_time: Duration::from_millis(n * 50),
            memory: 1 << 20,
        }]
    }
}

/// Deps with a recording tool and a sampler that counts its calls.
fn frame_gen_deps() -> (OrchestratorDeps, Arc<Mutex<RecordingTool>>, Arc<AtomicUsize>) {
    let recording = Arc::new(Mutex::new(RecordingTool::default()));
    let tool: SharedTool = recording.clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let factory_calls = calls.clone();

    let mut deps = OrchestratorDeps::standalone();
    deps.frame_gen_tool = Some(tool);
    deps.sampler_factory = Box::new(move || {
        Box::new(GameAppears {
            calls: factory_calls.clone(),
        })
    });
    (deps, recording, calls)
}

struct Fixture {
    dir: TempDir,
    apps_file: PathBuf,
}

impl Fixture {
    fn new(apps: Value) -> Self {
        let dir = TempDir::new().unwrap();
        let apps_file = dir.path().join("apps.json");
        fs::write(
            &apps_file,
            serde_json::to_string_pretty(&json!({ "version": 2, "env": {}, "apps": apps })).unwrap(),
        )
        .unwrap();
        Self { dir, apps_file }
    }

    fn log(&self) -> PathBuf {
        self.dir.path().join("log.txt")
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.json")
    }

    fn read_log(&self) -> String {
        fs::read_to_string(self.log()).unwrap_or_default()
    }

    fn config(&self) -> HostConfig {
        HostConfig {
            apps_file: Some(self.apps_file.clone()),
            output_name: "HDMI-1".into(),
            virtual_display_entry: false,
            ..HostConfig::default()
        }
    }

    fn orchestrator(&self, deps: OrchestratorDeps) -> Orchestrator {
        Orchestrator::new(deps, self.config())
    }
}

fn append(log: &Path, text: &str) -> String {
    format!("echo {} >> '{}'", text, log.display())
}

fn app_named(orchestrator: &Orchestrator, name: &str) -> AppContext {
    orchestrator
        .get_apps()
        .into_iter()
        .find(|app| app.name == name)
        .unwrap()
}

fn session() -> Arc<Mutex<LaunchSession>> {
    LaunchSession::new(1920, 1080, 60.0).into_shared()
}

#[test]
fn test_placebo_launch_with_virtual_display() {
    let fixture = Fixture::new(json!([{ "name": "Desktop", "virtual-display": true }]));
    let driver = DriverLog::default();
    let mut deps = OrchestratorDeps::standalone();
    deps.virtual_display = Box::new(FakeDriver(driver.clone()));
    let mut orchestrator = fixture.orchestrator(deps);

    let app = app_named(&orchestrator, "Desktop");
    let shared = session();
    assert_eq!(orchestrator.execute(&app, shared.clone()), STATUS_OK);
    assert_eq!(orchestrator.state(), LaunchState::Running);
    assert_eq!(orchestrator.running(), app.id);
    assert_eq!(orchestrator.get_running_app_uuid(), Some(app.uuid));
    assert_eq!(orchestrator.get_last_run_app_name(), "Desktop");

    let request = driver.created.lock()[0].clone();
    assert_eq!((request.width, request.height), (1920, 1080));
    assert_eq!(request.refresh_millihertz, 60000);
    assert_eq!(shared.lock().display_name.as_deref(), Some("VIRTUAL1"));
    assert_eq!(shared.lock().virtual_display_guid, Some(request.guid));
    assert_eq!(orchestrator.config().output_name, "VIRTUAL1");

    orchestrator.terminate(false, false);
    assert_eq!(orchestrator.config().output_name, "HDMI-1");
    assert_eq!(*driver.removed.lock(), vec![request.guid]);
    assert_eq!(orchestrator.state(), LaunchState::Idle);
    assert_eq!(orchestrator.running(), 0);
    assert!(shared.lock().display_name.is_none());
}

#[test]
fn test_missing_physical_display_forces_virtual_display() {
    let fixture = Fixture::new(json!([{ "name": "Desktop" }]));
    let driver = DriverLog::default();
    let mut deps = OrchestratorDeps::standalone();
    deps.virtual_display = Box::new(FakeDriver(driver.clone()));
    deps.display = Box::new(NullDisplayConfigurator {
        physical_available: false,
    });
    let mut config = fixture.config();
    config.display_policy = DisplayPolicy::EnsureOnlyDisplay;
    let mut orchestrator = Orchestrator::new(deps, config);

    let app = app_named(&orchestrator, "Desktop");
    let shared = session();
    assert_eq!(orchestrator.execute(&app, shared.clone()), STATUS_OK);
    assert_eq!(driver.created.lock().len(), 1);
    assert_eq!(orchestrator.config().output_name, "VIRTUAL1");
    assert_eq!(shared.lock().display_name.as_deref(), Some("VIRTUAL1"));

    orchestrator.terminate(false, false);
    assert_eq!(driver.removed.lock().len(), 1);
    assert_eq!(orchestrator.config().output_name, "HDMI-1");
}

#[test]
fn test_physical_display_wins_without_a_request() {
    let fixture = Fixture::new(json!([{ "name": "Desktop" }]));
    let driver = DriverLog::default();
    let mut deps = OrchestratorDeps::standalone();
    deps.virtual_display = Box::new(FakeDriver(driver.clone()));
    let mut config = fixture.config();
    config.display_policy = DisplayPolicy::EnsureOnlyDisplay;
    let mut orchestrator = Orchestrator::new(deps, config);

    let app = app_named(&orchestrator, "Desktop");
    assert_eq!(orchestrator.execute(&app, session()), STATUS_OK);
    assert!(driver.created.lock().is_empty());
    assert_eq!(orchestrator.config().output_name, "HDMI-1");
}

#[test]
fn test_shared_display_guid_saved_without_launch_overrides() {
    let fixture = Fixture::new(json!([
        { "name": "Desktop", "virtual-display": true, "gamepad": "x360" }
    ]));
    let mut config = fixture.config();
    config.shared_virtual_display = true;
    config::save_config_to(&config, &fixture.config_path()).unwrap();

    let driver = DriverLog::default();
    let mut deps = OrchestratorDeps::standalone();
    deps.virtual_display = Box::new(FakeDriver(driver.clone()));
    deps.config_file = Some(fixture.config_path());
    let mut orchestrator = Orchestrator::new(deps, config);

    let app = app_named(&orchestrator, "Desktop");
    assert_eq!(orchestrator.execute(&app, session()), STATUS_OK);
    assert_eq!(orchestrator.config().gamepad, "x360");
    let guid = orchestrator.config().shared_virtual_display_guid.unwrap();
    assert_eq!(driver.created.lock()[0].guid, guid);

    orchestrator.terminate(false, false);
    assert_eq!(orchestrator.config().gamepad, "auto");
    assert_eq!(orchestrator.config().output_name, "HDMI-1");

    let on_disk = config::load_config_from(&fixture.config_path());
    assert_eq!(on_disk.shared_virtual_display_guid, Some(guid));
    assert_eq!(on_disk.gamepad, "auto");
    assert_eq!(on_disk.output_name, "HDMI-1");
}

#[test]
fn test_terminate_is_idempotent() {
    let fixture = Fixture::new(json!([{ "name": "Desktop" }]));
    let mut orchestrator = fixture.orchestrator(OrchestratorDeps::standalone());
    orchestrator.terminate(false, false);
    assert_eq!(orchestrator.state(), LaunchState::Idle);

    let app = app_named(&orchestrator, "Desktop");
    assert_eq!(orchestrator.execute(&app, session()), STATUS_OK);
    orchestrator.terminate(false, false);
    orchestrator.terminate(true, true);
    assert_eq!(orchestrator.state(), LaunchState::Idle);
    assert_eq!(orchestrator.get_running_app_uuid(), None);
    orchestrator.shutdown();
}

#[test]
fn test_encoder_probe_failure() {
    let fixture = Fixture::new(json!([{ "name": "Desktop" }]));
    let mut deps = OrchestratorDeps::standalone();
    deps.prober = Box::new(StaticProber(false));
    let mut orchestrator = fixture.orchestrator(deps);

    let app = app_named(&orchestrator, "Desktop");
    assert_eq!(
        orchestrator.execute(&app, session()),
        STATUS_ENCODER_PROBE_FAILED
    );
    assert_eq!(orchestrator.state(), LaunchState::Idle);
    assert_eq!(orchestrator.running(), 0);

    let mut deps = OrchestratorDeps::standalone();
    deps.prober = Box::new(StaticProber(false));
    let mut config = fixture.config();
    config.ignore_encoder_probe_failure = true;
    let mut lenient = Orchestrator::new(deps, config);
    assert_eq!(lenient.execute(&app, session()), STATUS_OK);
}

#[test]
fn test_scale_factor_shrinks_render_size() {
    let fixture = Fixture::new(json!([{ "name": "Desktop", "scale-factor": 50 }]));
    let mut orchestrator = fixture.orchestrator(OrchestratorDeps::standalone());
    let app = app_named(&orchestrator, "Desktop");

    let shared = session();
    assert_eq!(orchestrator.execute(&app, shared.clone()), STATUS_OK);
    let s = shared.lock();
    assert_eq!((s.width, s.height), (960, 540));
    assert_eq!(s.requested_width, 1920);
}

#[test]
fn test_launcher_plugin_path() {
    let fixture = Fixture::new(json!([
        { "name": "Library Game", "playnite-id": "g1" },
        { "name": "Missing Game", "playnite-id": "unknown" }
    ]));
    let plugin = PluginLog::default();
    let mut deps = OrchestratorDeps::standalone();
    deps.plugin = Some(Box::new(FakePlugin(plugin.clone())));
    let mut config = fixture.config();
    config.plugin_auto_update = true;
    config.plugin_required_version = Some("2.0".into());
    let mut orchestrator = Orchestrator::new(deps, config);
    assert_eq!(*plugin.installs.lock(), 1);

    let app = app_named(&orchestrator, "Library Game");
    assert_eq!(orchestrator.execute(&app, session()), STATUS_OK);
    assert_eq!(plugin.announced.lock()[0].1, "g1");
    assert_eq!(orchestrator.running(), app.id);

    orchestrator.terminate(false, false);
    assert_eq!(
        *plugin.stopped.lock(),
        vec![("g1".to_string(), app.exit_timeout)]
    );

    let missing = app_named(&orchestrator, "Missing Game");
    assert_eq!(orchestrator.execute(&missing, session()), STATUS_LAUNCH_FAILED);
    assert_eq!(orchestrator.state(), LaunchState::Idle);
}

#[test]
fn test_refresh_swaps_catalog_while_running() {
    let fixture = Fixture::new(json!([{ "name": "Desktop" }]));
    let mut orchestrator = fixture.orchestrator(OrchestratorDeps::standalone());
    let app = app_named(&orchestrator, "Desktop");
    assert_eq!(orchestrator.execute(&app, session()), STATUS_OK);

    fs::write(
        &fixture.apps_file,
        json!({ "version": 2, "apps": [{ "name": "Desktop", "uuid": app.uuid.to_string() }, { "name": "New" }] })
            .to_string(),
    )
    .unwrap();
    orchestrator.refresh();

    assert!(orchestrator.get_apps().iter().any(|a| a.name == "New"));
    assert_eq!(orchestrator.get_running_app_uuid(), Some(app.uuid));
    assert_eq!(orchestrator.running(), app.id);
}

#[cfg(unix)]
mod unix {
    use super::*;

    fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(50));
        }
        condition()
    }

    #[test]
    fn test_quick_exit_becomes_placebo() {
        let fixture = Fixture::new(json!([{ "name": "Launcher", "cmd": "true" }]));
        let mut orchestrator = fixture.orchestrator(OrchestratorDeps::standalone());
        let app = app_named(&orchestrator, "Launcher");

        assert_eq!(orchestrator.execute(&app, session()), STATUS_OK);
        thread::sleep(Duration::from_millis(300));
        assert_eq!(orchestrator.running(), app.id);
        assert_eq!(orchestrator.running(), app.id);
        orchestrator.terminate(false, false);
    }

    #[test]
    fn test_exited_primary_stops_running_without_auto_detach() {
        let fixture = Fixture::new(json!([{ "name": "Tool", "cmd": "true", "auto-detach": false }]));
        let mut orchestrator = fixture.orchestrator(OrchestratorDeps::standalone());
        let app = app_named(&orchestrator, "Tool");

        assert_eq!(orchestrator.execute(&app, session()), STATUS_OK);
        assert!(wait_until(|| orchestrator.running() == 0, Duration::from_secs(5)));
        orchestrator.terminate(false, false);
        assert_eq!(orchestrator.state(), LaunchState::Idle);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_wait_all_follows_the_group() {
        let fixture = Fixture::new(json!([
            { "name": "Primary only", "cmd": "sleep 30 & exit 0", "wait-all": false, "auto-detach": false, "exit-timeout": 1 },
            { "name": "Whole group", "cmd": "sleep 30 & exit 0", "auto-detach": false, "exit-timeout": 1 }
        ]));
        let mut orchestrator = fixture.orchestrator(OrchestratorDeps::standalone());

        let primary_only = app_named(&orchestrator, "Primary only");
        assert_eq!(orchestrator.execute(&primary_only, session()), STATUS_OK);
        assert!(wait_until(|| orchestrator.running() == 0, Duration::from_secs(5)));
        orchestrator.terminate(false, false);

        let whole_group = app_named(&orchestrator, "Whole group");
        assert_eq!(orchestrator.execute(&whole_group, session()), STATUS_OK);
        thread::sleep(Duration::from_millis(500));
        assert_eq!(orchestrator.running(), whole_group.id);

        let started = Instant::now();
        orchestrator.terminate(false, false);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(orchestrator.running(), 0);
    }

    #[test]
    fn test_prep_failure_unwinds_only_commands_that_ran() {
        let fixture = Fixture::new(Value::Null);
        let log = fixture.log();
        fs::write(
            &fixture.apps_file,
            json!({
                "version": 2,
                "apps": [{
                    "name": "Game",
                    "cmd": "sleep 30",
                    "prep-cmd": [
                        { "do": append(&log, "do-a"), "undo": append(&log, "undo-a") },
                        { "do": "exit 3", "undo": append(&log, "undo-b") }
                    ]
                }]
            })
            .to_string(),
        )
        .unwrap();

        let mut orchestrator = fixture.orchestrator(OrchestratorDeps::standalone());
        let app = app_named(&orchestrator, "Game");
        assert_eq!(orchestrator.execute(&app, session()), STATUS_LAUNCH_FAILED);
        assert_eq!(fixture.read_log(), "do-a\nundo-a\n");
        assert_eq!(orchestrator.state(), LaunchState::Idle);
        assert_eq!(orchestrator.get_running_app_uuid(), None);
    }

    #[test]
    fn test_global_prep_and_undo_order() {
        let fixture = Fixture::new(Value::Null);
        let log = fixture.log();
        fs::write(
            &fixture.apps_file,
            json!({
                "version": 2,
                "apps": [
                    { "name": "Game", "prep-cmd": [{ "do": append(&log, "app-do"), "undo": append(&log, "app-undo") }] },
                    { "name": "Solo", "exclude-global-prep-cmd": true }
                ]
            })
            .to_string(),
        )
        .unwrap();

        let mut config = fixture.config();
        config.global_prep_cmds = vec![CommandEntry::new(
            append(&log, "global-do"),
            append(&log, "global-undo"),
        )];
        let mut orchestrator = Orchestrator::new(OrchestratorDeps::standalone(), config);

        let game = app_named(&orchestrator, "Game");
        assert_eq!(orchestrator.execute(&game, session()), STATUS_OK);
        orchestrator.terminate(false, false);
        assert_eq!(
            fixture.read_log(),
            "global-do\napp-do\napp-undo\nglobal-undo\n"
        );

        fs::remove_file(fixture.log()).unwrap();
        let solo = app_named(&orchestrator, "Solo");
        assert_eq!(orchestrator.execute(&solo, session()), STATUS_OK);
        orchestrator.terminate(false, false);
        assert_eq!(fixture.read_log(), "");
    }

    #[test]
    fn test_launch_environment_reaches_commands() {
        let fixture = Fixture::new(Value::Null);
        let log = fixture.log();
        fs::write(
            &fixture.apps_file,
            json!({
                "version": 2,
                "env": { "GREETING": "hello" },
                "apps": [{
                    "name": "Game",
                    "prep-cmd": [{
                        "do": format!("echo \"$GREETING $STREAM_APP_NAME $STREAM_CLIENT_WIDTH\" >> '{}'", log.display()),
                        "undo": ""
                    }]
                }]
            })
            .to_string(),
        )
        .unwrap();

        let mut orchestrator = fixture.orchestrator(OrchestratorDeps::standalone());
        let app = app_named(&orchestrator, "Game");
        assert_eq!(orchestrator.execute(&app, session()), STATUS_OK);
        assert_eq!(fixture.read_log(), "hello Game 1920\n");
    }

    #[test]
    fn test_pause_and_resume_run_state_commands() {
        let fixture = Fixture::new(Value::Null);
        let log = fixture.log();
        fs::write(
            &fixture.apps_file,
            json!({
                "version": 2,
                "apps": [
                    {
                        "name": "Game",
                        "state-cmd": [
                            { "do": append(&log, "resume-1"), "undo": append(&log, "pause-1") },
                            { "do": append(&log, "resume-2"), "undo": append(&log, "pause-2") }
                        ]
                    },
                    { "name": "Strict", "terminate-on-pause": true }
                ]
            })
            .to_string(),
        )
        .unwrap();

        let mut orchestrator = fixture.orchestrator(OrchestratorDeps::standalone());
        let game = app_named(&orchestrator, "Game");
        assert_eq!(orchestrator.execute(&game, session()), STATUS_OK);

        let paused = orchestrator.pause().unwrap();
        assert_eq!(paused.wait(Duration::from_secs(10)), Some(2));
        assert_eq!(orchestrator.state(), LaunchState::Paused);
        assert_eq!(orchestrator.running(), game.id);

        let resumed = orchestrator.resume().unwrap();
        assert_eq!(resumed.wait(Duration::from_secs(10)), Some(2));
        assert_eq!(orchestrator.state(), LaunchState::Running);
        assert_eq!(
            fixture.read_log(),
            "pause-2\npause-1\nresume-1\nresume-2\n"
        );

        let strict = app_named(&orchestrator, "Strict");
        assert_eq!(orchestrator.execute(&strict, session()), STATUS_OK);
        assert!(orchestrator.pause().is_none());
        assert_eq!(orchestrator.state(), LaunchState::Idle);
        orchestrator.shutdown();
    }

    fn frame_gen_config(fixture: &Fixture, window: Duration) -> HostConfig {
        let mut config = fixture.config();
        config.detector = DetectorSettings {
            window,
            tick: Duration::from_millis(20),
        };
        config
    }

    #[test]
    fn test_terminate_restores_applied_profile() {
        let fixture = Fixture::new(json!([{
            "name": "Game",
            "cmd": "sleep 30",
            "frame-gen": { "provider": "lossless-scaling" }
        }]));
        let (deps, recording, calls) = frame_gen_deps();
        let config = frame_gen_config(&fixture, Duration::from_millis(200));
        let mut orchestrator = Orchestrator::new(deps, config);

        let app = app_named(&orchestrator, "Game");
        assert_eq!(orchestrator.execute(&app, session()), STATUS_OK);
        assert!(wait_until(
            || recording.lock().calls.contains(&"restart"),
            Duration::from_secs(5)
        ));
        assert!(calls.load(Ordering::SeqCst) > 1);

        orchestrator.terminate(false, false);
        assert_eq!(
            recording.lock().calls,
            vec!["capture", "stop", "apply", "restart", "stop", "restore"]
        );
    }

    #[test]
    fn test_terminate_cancels_running_detector() {
        let fixture = Fixture::new(json!([{
            "name": "Game",
            "cmd": "sleep 30",
            "frame-gen": { "provider": "lossless-scaling" }
        }]));
        let (deps, recording, calls) = frame_gen_deps();
        let config = frame_gen_config(&fixture, Duration::from_secs(60));
        let mut orchestrator = Orchestrator::new(deps, config);

        let app = app_named(&orchestrator, "Game");
        assert_eq!(orchestrator.execute(&app, session()), STATUS_OK);
        assert!(wait_until(|| calls.load(Ordering::SeqCst) > 2, Duration::from_secs(5)));

        let started = Instant::now();
        orchestrator.terminate(false, false);
        assert!(started.elapsed() < Duration::from_secs(5));

        let after_terminate = calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(200));
        assert_eq!(calls.load(Ordering::SeqCst), after_terminate);
        assert!(recording.lock().calls.is_empty());
    }

    #[test]
    fn test_plugin_and_fullscreen_launches_skip_detection() {
        let fixture = Fixture::new(json!([
            {
                "name": "Fullscreen",
                "playnite-fullscreen": true,
                "frame-gen": { "provider": "lossless-scaling" }
            },
            {
                "name": "Library Game",
                "playnite-id": "g1",
                "detached": ["true"],
                "frame-gen": { "provider": "lossless-scaling" }
            }
        ]));
        let (mut deps, recording, calls) = frame_gen_deps();
        deps.plugin = Some(Box::new(FakePlugin(PluginLog {
            fullscreen: Some("sleep 30".into()),
            ..PluginLog::default()
        })));
        let config = frame_gen_config(&fixture, Duration::from_millis(300));
        let mut orchestrator = Orchestrator::new(deps, config);

        for name in ["Fullscreen", "Library Game"] {
            let app = app_named(&orchestrator, name);
            assert_eq!(orchestrator.execute(&app, session()), STATUS_OK);
            assert_eq!(orchestrator.running(), app.id);
            thread::sleep(Duration::from_millis(500));
            orchestrator.terminate(false, false);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(recording.lock().calls.is_empty());
    }
}
