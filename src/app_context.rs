//! App Context Model
//!
//! An app list document looks like:
//!
//! ```json
//! { "version": 2, "env": { "NAME": "value" }, "apps": [ { "name": "Desktop" } ] }
//! ```
//!
//! `AppCatalog::load` reads the document, migrates it forward (writing the
//! upgraded document back in place), and turns it into typed `AppContext`
//! values. Loading never fails: after three unsuccessful attempts the
//! catalog falls back to a single "Desktop" entry.

use crate::env::Environment;
use crate::error::ParseError;
use crate::migration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::{uuid, Uuid};

/// Number of parse attempts before falling back to the Desktop entry.
pub const MAX_PARSE_ATTEMPTS: usize = 3;

/// Default graceful-exit budget for apps that do not set one.
pub const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reserved UUID of the synthetic "Virtual Display" entry.
pub const VIRTUAL_DISPLAY_UUID: Uuid = uuid!("8902CB19-674A-403D-A587-41B092E900BA");
/// Reserved UUID of the synthetic "Remote Input" entry.
pub const REMOTE_INPUT_UUID: Uuid = uuid!("8CB5C136-DA67-4F99-B4A1-F9CD35005CF4");
/// Reserved UUID of the synthetic "Terminate" entry.
pub const TERMINATE_APP_UUID: Uuid = uuid!("E16CBE1B-295D-4632-9A76-EC4180C857D3");

/// A do/undo command pair.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandEntry {
    #[serde(rename = "do", default)]
    pub do_cmd: String,
    #[serde(rename = "undo", default)]
    pub undo_cmd: String,
    #[serde(default)]
    pub elevated: bool,
}

impl CommandEntry {
    pub fn new(do_cmd: impl Into<String>, undo_cmd: impl Into<String>) -> Self {
        Self {
            do_cmd: do_cmd.into(),
            undo_cmd: undo_cmd.into(),
            elevated: false,
        }
    }
}

/// Third-party frame-generation tool selected for an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameGenProvider {
    #[default]
    None,
    LosslessScaling,
}

impl FrameGenProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameGenProvider::None => "none",
            FrameGenProvider::LosslessScaling => "lossless-scaling",
        }
    }
}

/// Per-app frame-generation tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FrameGenSettings {
    pub provider: FrameGenProvider,
    /// Target frame rate; `None` follows the client's rate
    pub target_fps: Option<u32>,
    pub capture_limiter: bool,
    pub capture_api: String,
    pub queue_target: u32,
    pub performance_mode: bool,
    pub flow_scale: f64,
    pub resolution_scale: f64,
    pub scaling_mode: String,
    pub sharpening: u32,
    pub anime4k_type: String,
    pub anime4k_vrs: bool,
}

impl Default for FrameGenSettings {
    fn default() -> Self {
        Self {
            provider: FrameGenProvider::None,
            target_fps: None,
            capture_limiter: false,
            capture_api: "dxgi".to_string(),
            queue_target: 1,
            performance_mode: false,
            flow_scale: 1.0,
            resolution_scale: 1.0,
            scaling_mode: "off".to_string(),
            sharpening: 5,
            anime4k_type: "a".to_string(),
            anime4k_vrs: false,
        }
    }
}

/// One launchable application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppContext {
    /// Position in the catalog
    pub idx: usize,
    /// Effective id (one of the two below)
    pub id: u32,
    pub id_without_index: u32,
    pub id_with_index: u32,
    pub name: String,
    pub uuid: Uuid,
    pub cmd: String,
    pub working_dir: Option<PathBuf>,
    /// File receiving the primary command's stdout/stderr
    pub output: Option<PathBuf>,
    pub image_path: Option<PathBuf>,
    pub prep_cmds: Vec<CommandEntry>,
    pub state_cmds: Vec<CommandEntry>,
    pub detached: Vec<String>,
    pub exclude_global_prep_cmd: bool,
    pub exclude_global_state_cmd: bool,
    pub elevated: bool,
    pub wait_all: bool,
    pub auto_detach: bool,
    pub exit_timeout: Duration,
    pub use_app_identity: bool,
    pub per_client_app_identity: bool,
    pub virtual_display: bool,
    /// Render scale in percent
    pub scale_factor: u32,
    pub frame_gen: FrameGenSettings,
    /// Double the virtual display refresh rate for frame generation
    pub frame_gen_fix: bool,
    pub gamepad: Option<String>,
    pub terminate_on_pause: bool,
    pub playnite_id: Option<String>,
    pub playnite_fullscreen: bool,
}

impl AppContext {
    /// Bare entry with defaults and no command line.
    pub fn placeholder(name: &str) -> Self {
        let (id_without_index, id_with_index) = compute_app_ids(name, None, 0);
        Self {
            idx: 0,
            id: id_without_index,
            id_without_index,
            id_with_index,
            name: name.to_string(),
            uuid: Uuid::new_v4(),
            cmd: String::new(),
            working_dir: None,
            output: None,
            image_path: None,
            prep_cmds: Vec::new(),
            state_cmds: Vec::new(),
            detached: Vec::new(),
            exclude_global_prep_cmd: false,
            exclude_global_state_cmd: false,
            elevated: false,
            wait_all: true,
            auto_detach: true,
            exit_timeout: DEFAULT_EXIT_TIMEOUT,
            use_app_identity: false,
            per_client_app_identity: false,
            virtual_display: false,
            scale_factor: 100,
            frame_gen: FrameGenSettings::default(),
            frame_gen_fix: false,
            gamepad: None,
            terminate_on_pause: false,
            playnite_id: None,
            playnite_fullscreen: false,
        }
    }

    /// True for the reserved trailing entries.
    pub fn is_synthetic(&self) -> bool {
        [VIRTUAL_DISPLAY_UUID, REMOTE_INPUT_UUID, TERMINATE_APP_UUID].contains(&self.uuid)
    }
}

/// App entry as stored on disk (current schema).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawApp {
    name: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    cmd: String,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    image_path: Option<String>,
    #[serde(default)]
    prep_cmd: Vec<CommandEntry>,
    #[serde(default)]
    state_cmd: Vec<CommandEntry>,
    #[serde(default)]
    detached: Vec<String>,
    #[serde(default)]
    exclude_global_prep_cmd: bool,
    #[serde(default)]
    exclude_global_state_cmd: bool,
    #[serde(default)]
    elevated: bool,
    #[serde(default = "default_true")]
    wait_all: bool,
    #[serde(default = "default_true")]
    auto_detach: bool,
    #[serde(default)]
    exit_timeout: Option<u64>,
    #[serde(default)]
    use_app_identity: bool,
    #[serde(default)]
    per_client_app_identity: bool,
    #[serde(default)]
    virtual_display: bool,
    #[serde(default = "default_scale")]
    scale_factor: u32,
    #[serde(default)]
    frame_gen: FrameGenSettings,
    #[serde(default)]
    frame_gen_fix: bool,
    #[serde(default)]
    gamepad: Option<String>,
    #[serde(default)]
    terminate_on_pause: bool,
    #[serde(default)]
    playnite_id: Option<String>,
    #[serde(default)]
    playnite_fullscreen: bool,
}

fn default_true() -> bool {
    true
}

fn default_scale() -> u32 {
    100
}

#[derive(Debug, Deserialize)]
struct AppDocument {
    #[serde(default)]
    env: Map<String, Value>,
    #[serde(default)]
    apps: Vec<RawApp>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Compute the `(without_index, with_index)` id pair for an app.
///
/// The digest covers the name and, when the image file is readable, its
/// contents; otherwise the image path string. Ids are positive 31-bit
/// integers and never zero.
pub fn compute_app_ids(name: &str, image_path: Option<&Path>, index: usize) -> (u32, u32) {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());

    if let Some(path) = image_path {
        match fs::read(path) {
            Ok(bytes) => hasher.update(Sha256::digest(&bytes)),
            Err(_) => hasher.update(path.to_string_lossy().as_bytes()),
        }
    }

    let without_index = hasher.clone().finalize();
    hasher.update(index.to_string().as_bytes());
    let with_index = hasher.finalize();

    (digest_to_id(&without_index), digest_to_id(&with_index))
}

fn digest_to_id(digest: &[u8]) -> u32 {
    let id = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7FFF_FFFF;
    id.max(1)
}

/// Which synthetic entries to append after the user's apps.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogOptions {
    /// Add the "Virtual Display" entry (platform has a driver)
    pub virtual_display_entry: bool,
    /// Add the "Remote Input" entry
    pub remote_input_entry: bool,
}

/// Parsed app list together with the environment derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct AppCatalog {
    pub apps: Vec<AppContext>,
    pub env: Environment,
}

impl AppCatalog {
    /// Load, migrate and parse an app list file.
    ///
    /// Never fails; problems are logged and end in the Desktop fallback.
    pub fn load(path: &Path, options: &CatalogOptions, base_env: &Environment) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(source) => {
                let err = ParseError::Io {
                    path: path.to_path_buf(),
                    source,
                };
                warn!("{}", err);
                return Self::fallback(options, base_env);
            }
        };

        let mut doc: Value = match serde_json::from_str(&text) {
            Ok(doc) => doc,
            Err(e) => {
                error!("{}", ParseError::Syntax(e));
                return Self::fallback(options, base_env);
            }
        };

        let base_dir = path.parent().map(Path::to_path_buf);

        for attempt in 0..MAX_PARSE_ATTEMPTS {
            if attempt > 0 {
                migration::reset_version(&mut doc);
            }

            if migration::migrate(&mut doc) {
                if let Err(e) = write_document(path, &doc) {
                    warn!("Failed to write migrated app list {:?}: {}", path, e);
                }
            }

            match Self::from_document(&doc, base_dir.as_deref(), options, base_env) {
                Ok(catalog) => {
                    info!("Loaded {} apps from {:?}", catalog.apps.len(), path);
                    return catalog;
                }
                Err(e) => {
                    warn!(
                        "App list parse attempt {}/{} failed: {}",
                        attempt + 1,
                        MAX_PARSE_ATTEMPTS,
                        e
                    );
                }
            }
        }

        error!("Giving up on {:?}, falling back to Desktop", path);
        Self::fallback(options, base_env)
    }

    /// Build a catalog from an already migrated document.
    pub fn from_document(
        doc: &Value,
        base_dir: Option<&Path>,
        options: &CatalogOptions,
        base_env: &Environment,
    ) -> Result<Self, ParseError> {
        let parsed: AppDocument =
            serde_json::from_value(doc.clone()).map_err(ParseError::Schema)?;

        // Document variables expand against everything defined before them
        let mut env = base_env.clone();
        for (name, value) in &parsed.env {
            let raw = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            let expanded = env.expand(&raw);
            env.set(name.clone(), expanded);
        }

        let mut builder = CatalogBuilder::default();
        for (index, raw) in parsed.apps.into_iter().enumerate() {
            let app = convert_app(raw, index, base_dir)?;
            builder.push(app)?;
        }
        builder.push_synthetic(options);

        Ok(Self {
            apps: builder.apps,
            env,
        })
    }

    /// Single Desktop entry plus the synthetic entries.
    pub fn fallback(options: &CatalogOptions, base_env: &Environment) -> Self {
        let mut builder = CatalogBuilder::default();
        let mut desktop = AppContext::placeholder("Desktop");
        desktop.image_path = Some(PathBuf::from("desktop.png"));
        // Pushing into an empty builder cannot collide
        let _ = builder.push(desktop);
        builder.push_synthetic(options);

        Self {
            apps: builder.apps,
            env: base_env.clone(),
        }
    }

    pub fn find_by_uuid(&self, uuid: &Uuid) -> Option<&AppContext> {
        self.apps.iter().find(|app| app.uuid == *uuid)
    }

    pub fn find_by_id(&self, id: u32) -> Option<&AppContext> {
        self.apps.iter().find(|app| app.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&AppContext> {
        self.apps
            .iter()
            .find(|app| app.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Default)]
struct CatalogBuilder {
    apps: Vec<AppContext>,
    ids: HashSet<u32>,
    uuids: HashSet<Uuid>,
}

impl CatalogBuilder {
    fn push(&mut self, mut app: AppContext) -> Result<(), ParseError> {
        if !self.uuids.insert(app.uuid) {
            return Err(ParseError::DuplicateUuid(app.uuid));
        }

        app.idx = self.apps.len();
        let (without_index, with_index) =
            compute_app_ids(&app.name, app.image_path.as_deref(), app.idx);
        app.id_without_index = without_index;
        app.id_with_index = with_index;
        app.id = if self.ids.contains(&without_index) {
            with_index
        } else {
            without_index
        };
        self.ids.insert(app.id);
        self.apps.push(app);
        Ok(())
    }

    fn push_synthetic(&mut self, options: &CatalogOptions) {
        let mut entries = Vec::new();
        if options.virtual_display_entry {
            entries.push(("Virtual Display", VIRTUAL_DISPLAY_UUID, true));
        }
        if options.remote_input_entry {
            entries.push(("Remote Input", REMOTE_INPUT_UUID, false));
        }
        entries.push(("Terminate", TERMINATE_APP_UUID, false));

        for (name, uuid, virtual_display) in entries {
            // A user app squatting on a reserved UUID loses the slot
            if let Some(pos) = self.apps.iter().position(|a| a.uuid == uuid) {
                warn!("App {:?} uses a reserved uuid, dropping it", self.apps[pos].name);
                self.apps.remove(pos);
                self.uuids.remove(&uuid);
            }

            let mut app = AppContext::placeholder(name);
            app.uuid = uuid;
            app.virtual_display = virtual_display;
            let _ = self.push(app);
        }
    }
}

fn convert_app(raw: RawApp, index: usize, base_dir: Option<&Path>) -> Result<AppContext, ParseError> {
    let uuid = match non_empty(raw.uuid) {
        Some(value) => Uuid::parse_str(&value)
            .map_err(|_| ParseError::InvalidUuid { index, value })?,
        None => Uuid::new_v4(),
    };

    let image_path = non_empty(raw.image_path).map(|p| {
        let path = PathBuf::from(p);
        match base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        }
    });

    let mut app = AppContext::placeholder(&raw.name);
    app.uuid = uuid;
    app.cmd = raw.cmd.trim().to_string();
    app.working_dir = non_empty(raw.working_dir).map(PathBuf::from);
    app.output = non_empty(raw.output).map(PathBuf::from);
    app.image_path = image_path;
    app.prep_cmds = raw.prep_cmd;
    app.state_cmds = raw.state_cmd;
    app.detached = raw
        .detached
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();
    app.exclude_global_prep_cmd = raw.exclude_global_prep_cmd;
    app.exclude_global_state_cmd = raw.exclude_global_state_cmd;
    app.elevated = raw.elevated;
    app.wait_all = raw.wait_all;
    app.auto_detach = raw.auto_detach;
    app.exit_timeout = raw
        .exit_timeout
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_EXIT_TIMEOUT);
    app.use_app_identity = raw.use_app_identity;
    app.per_client_app_identity = raw.per_client_app_identity;
    app.virtual_display = raw.virtual_display;
    app.scale_factor = raw.scale_factor;
    app.frame_gen = raw.frame_gen;
    app.frame_gen_fix = raw.frame_gen_fix;
    app.gamepad = non_empty(raw.gamepad);
    app.terminate_on_pause = raw.terminate_on_pause;
    app.playnite_id = non_empty(raw.playnite_id);
    app.playnite_fullscreen = raw.playnite_fullscreen;
    Ok(app)
}

fn write_document(path: &Path, doc: &Value) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(doc)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_list(dir: &TempDir, doc: &Value) -> PathBuf {
        let path = dir.path().join("apps.json");
        fs::write(&path, serde_json::to_string_pretty(doc).unwrap()).unwrap();
        path
    }

    fn user_apps(catalog: &AppCatalog) -> Vec<&AppContext> {
        catalog.apps.iter().filter(|a| !a.is_synthetic()).collect()
    }

    #[test]
    fn test_legacy_exit_timeout_migrates_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = write_list(
            &dir,
            &json!({ "version": 1, "apps": [{ "name": "Game", "cmd": "game", "exit-timeout": "5" }] }),
        );

        let catalog = AppCatalog::load(&path, &CatalogOptions::default(), &Environment::new());
        assert_eq!(user_apps(&catalog)[0].exit_timeout, Duration::from_secs(5));

        let stored: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored["version"], json!(migration::CURRENT_VERSION));
        assert_eq!(stored["apps"][0]["exit-timeout"], json!(5));
    }

    #[test]
    fn test_duplicate_names_get_index_qualified_id() {
        let dir = TempDir::new().unwrap();
        let path = write_list(
            &dir,
            &json!({ "version": 2, "apps": [{ "name": "Same" }, { "name": "Same" }] }),
        );

        let catalog = AppCatalog::load(&path, &CatalogOptions::default(), &Environment::new());
        let apps = user_apps(&catalog);
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].id_without_index, apps[1].id_without_index);
        assert_eq!(apps[0].id, apps[0].id_without_index);
        assert_eq!(apps[1].id, apps[1].id_with_index);
        assert_ne!(apps[0].id, apps[1].id);
        assert_ne!(apps[0].uuid, apps[1].uuid);
    }

    #[test]
    fn test_image_contents_change_the_id() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("cover.png");
        fs::write(&image, b"first").unwrap();
        let (a, _) = compute_app_ids("Game", Some(&image), 0);
        fs::write(&image, b"second").unwrap();
        let (b, _) = compute_app_ids("Game", Some(&image), 0);
        assert_ne!(a, b);

        // Unreadable images fall back to hashing the path string
        let missing = dir.path().join("missing.png");
        assert_eq!(
            compute_app_ids("Game", Some(&missing), 3),
            compute_app_ids("Game", Some(&missing), 3)
        );
    }

    #[test]
    fn test_synthetic_entries_follow_user_apps() {
        let dir = TempDir::new().unwrap();
        let path = write_list(&dir, &json!({ "version": 2, "apps": [{ "name": "Game" }] }));
        let options = CatalogOptions {
            virtual_display_entry: true,
            remote_input_entry: true,
        };

        let catalog = AppCatalog::load(&path, &options, &Environment::new());
        let uuids: Vec<Uuid> = catalog.apps.iter().skip(1).map(|a| a.uuid).collect();
        assert_eq!(
            uuids,
            vec![VIRTUAL_DISPLAY_UUID, REMOTE_INPUT_UUID, TERMINATE_APP_UUID]
        );
        assert!(catalog.apps[1].virtual_display);

        let minimal = AppCatalog::load(&path, &CatalogOptions::default(), &Environment::new());
        assert_eq!(minimal.apps.last().unwrap().uuid, TERMINATE_APP_UUID);
        assert_eq!(minimal.apps.len(), 2);
    }

    #[test]
    fn test_invalid_json_falls_back_to_desktop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("apps.json");
        fs::write(&path, "{ not json").unwrap();

        let catalog = AppCatalog::load(&path, &CatalogOptions::default(), &Environment::new());
        let apps = user_apps(&catalog);
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "Desktop");
        assert!(apps[0].cmd.is_empty());
    }

    #[test]
    fn test_schema_error_recovers_through_remigration() {
        let dir = TempDir::new().unwrap();
        // Claims the current version but still carries a legacy string
        let path = write_list(
            &dir,
            &json!({ "version": 2, "apps": [{ "name": "Game", "uuid": "A1B2C3D4-0000-4000-8000-000000000001", "wait-all": "false" }] }),
        );

        let catalog = AppCatalog::load(&path, &CatalogOptions::default(), &Environment::new());
        let apps = user_apps(&catalog);
        assert_eq!(apps[0].name, "Game");
        assert!(!apps[0].wait_all);
    }

    #[test]
    fn test_hopeless_document_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = write_list(&dir, &json!({ "version": 2, "apps": [{ "cmd": 7 }] }));

        let catalog = AppCatalog::load(&path, &CatalogOptions::default(), &Environment::new());
        assert_eq!(user_apps(&catalog)[0].name, "Desktop");
    }

    #[test]
    fn test_document_env_is_expanded_in_order() {
        let mut base = Environment::with_case_rule(false);
        base.set("ROOT", "/srv");
        let doc = json!({
            "version": 2,
            "env": { "GAMES": "$(ROOT)/games", "SAVES": "$(GAMES)/saves", "PRICE": "$$3" },
            "apps": []
        });

        let catalog =
            AppCatalog::from_document(&doc, None, &CatalogOptions::default(), &base).unwrap();
        assert_eq!(catalog.env.get("GAMES"), Some("/srv/games"));
        assert_eq!(catalog.env.get("SAVES"), Some("/srv/games/saves"));
        assert_eq!(catalog.env.get("PRICE"), Some("$3"));
        // Base environment is left untouched
        assert_eq!(base.get("GAMES"), None);
    }

    #[test]
    fn test_parses_commands_and_frame_gen() {
        let doc = json!({
            "version": 2,
            "apps": [{
                "name": "Game",
                "cmd": " game.exe ",
                "prep-cmd": [{ "do": "a", "undo": "b", "elevated": true }],
                "state-cmd": [{ "do": "c" }],
                "detached": ["helper", "  "],
                "frame-gen": { "provider": "lossless-scaling", "flow-scale": 0.5 }
            }]
        });
        let catalog = AppCatalog::from_document(
            &doc,
            None,
            &CatalogOptions::default(),
            &Environment::new(),
        )
        .unwrap();
        let app = &catalog.apps[0];
        assert_eq!(app.cmd, "game.exe");
        assert!(app.prep_cmds[0].elevated);
        assert_eq!(app.state_cmds[0].undo_cmd, "");
        assert_eq!(app.detached, vec!["helper".to_string()]);
        assert_eq!(app.frame_gen.provider, FrameGenProvider::LosslessScaling);
        assert_eq!(app.frame_gen.flow_scale, 0.5);
        assert_eq!(app.frame_gen.capture_api, "dxgi");
    }
}
