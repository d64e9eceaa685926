//! Forward migration of app list documents
//!
//! Documents carry a numeric `version`. Each step upgrades the raw JSON by
//! one version:
//! - 0 -> 1: structural repair (`env`/`apps` present, bare-string prep
//!   commands turned into `{ "do": .., "undo": "" }` objects)
//! - 1 -> 2: string-typed booleans and integers normalized, every app given
//!   a unique UUID
//!
//! Migration works on `serde_json::Value` so that documents written by older
//! hosts never have to match today's typed schema.

use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Schema version written by this host.
pub const CURRENT_VERSION: u64 = 2;

const APP_BOOL_KEYS: &[&str] = &[
    "elevated",
    "auto-detach",
    "wait-all",
    "exclude-global-prep-cmd",
    "exclude-global-state-cmd",
    "virtual-display",
    "use-app-identity",
    "per-client-app-identity",
    "terminate-on-pause",
    "playnite-fullscreen",
    "frame-gen-fix",
];

const APP_INT_KEYS: &[&str] = &["exit-timeout", "scale-factor"];

const COMMAND_LIST_KEYS: &[&str] = &["prep-cmd", "state-cmd"];

const FRAME_GEN_BOOL_KEYS: &[&str] = &["performance-mode", "anime4k-vrs", "capture-limiter"];

const FRAME_GEN_INT_KEYS: &[&str] = &["queue-target", "sharpening", "target-fps"];

const FRAME_GEN_FLOAT_KEYS: &[&str] = &["flow-scale", "resolution-scale"];

/// Read the document's version. Missing or malformed versions count as 0.
pub fn document_version(doc: &Value) -> u64 {
    match doc.get("version") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Force the document back to version 0 so every step runs again.
pub fn reset_version(doc: &mut Value) {
    if let Value::Object(map) = doc {
        map.insert("version".into(), Value::from(0u64));
    }
}

/// Upgrade `doc` to [`CURRENT_VERSION`]. Returns true if anything changed.
pub fn migrate(doc: &mut Value) -> bool {
    let mut start = document_version(doc);
    if start >= CURRENT_VERSION {
        if !has_missing_uuids(doc) {
            return false;
        }
        // Apps added by hand still need a stable identity
        start = CURRENT_VERSION - 1;
    }

    if !doc.is_object() {
        // A bare array of apps predates versioning entirely
        let apps = match doc.take() {
            Value::Array(apps) => apps,
            _ => Vec::new(),
        };
        let mut map = Map::new();
        map.insert("apps".into(), Value::Array(apps));
        *doc = Value::Object(map);
    }

    let mut version = start;
    while version < CURRENT_VERSION {
        match version {
            0 => migrate_v0_to_v1(doc),
            1 => migrate_v1_to_v2(doc),
            _ => {}
        }
        version += 1;
        debug!("App list migrated to version {}", version);
    }

    if let Value::Object(map) = doc {
        map.insert("version".into(), Value::from(CURRENT_VERSION));
    }

    info!(
        "Migrated app list from version {} to {}",
        start, CURRENT_VERSION
    );
    true
}

fn has_missing_uuids(doc: &Value) -> bool {
    doc.get("apps")
        .and_then(Value::as_array)
        .map_or(false, |apps| {
            apps.iter()
                .any(|app| app.is_object() && !app.get("uuid").map_or(false, Value::is_string))
        })
}

fn migrate_v0_to_v1(doc: &mut Value) {
    let Value::Object(map) = doc else {
        return;
    };

    if !matches!(map.get("env"), Some(Value::Object(_))) {
        map.insert("env".into(), Value::Object(Map::new()));
    }
    if !matches!(map.get("apps"), Some(Value::Array(_))) {
        map.insert("apps".into(), Value::Array(Vec::new()));
    }

    if let Some(Value::Array(apps)) = map.get_mut("apps") {
        // Entries that are not objects cannot be salvaged
        apps.retain(Value::is_object);

        for app in apps.iter_mut() {
            for key in COMMAND_LIST_KEYS {
                if let Some(Value::Array(cmds)) = app.get_mut(*key) {
                    for cmd in cmds.iter_mut() {
                        if let Value::String(line) = cmd {
                            let mut entry = Map::new();
                            entry.insert("do".into(), Value::String(std::mem::take(line)));
                            entry.insert("undo".into(), Value::String(String::new()));
                            *cmd = Value::Object(entry);
                        }
                    }
                    cmds.retain(Value::is_object);
                }
            }

            if let Some(Value::String(line)) = app.get("detached") {
                let line = line.clone();
                if let Value::Object(app) = app {
                    app.insert("detached".into(), Value::Array(vec![Value::String(line)]));
                }
            }
        }
    }
}

fn migrate_v1_to_v2(doc: &mut Value) {
    let Some(Value::Array(apps)) = doc.get_mut("apps") else {
        return;
    };

    let mut seen = HashSet::new();
    for app in apps.iter_mut() {
        let Value::Object(app) = app else {
            continue;
        };

        normalize_keys(app, APP_BOOL_KEYS, normalize_bool);
        normalize_keys(app, APP_INT_KEYS, normalize_int);

        for key in COMMAND_LIST_KEYS {
            if let Some(Value::Array(cmds)) = app.get_mut(*key) {
                for cmd in cmds.iter_mut() {
                    if let Value::Object(cmd) = cmd {
                        normalize_keys(cmd, &["elevated"], normalize_bool);
                    }
                }
            }
        }

        if let Some(Value::Object(frame_gen)) = app.get_mut("frame-gen") {
            normalize_keys(frame_gen, FRAME_GEN_BOOL_KEYS, normalize_bool);
            normalize_keys(frame_gen, FRAME_GEN_INT_KEYS, normalize_int);
            normalize_keys(frame_gen, FRAME_GEN_FLOAT_KEYS, normalize_float);
        }

        let existing = app
            .get("uuid")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s.trim()).ok());
        let uuid = match existing {
            Some(uuid) if seen.insert(uuid) => uuid,
            _ => {
                let fresh = Uuid::new_v4();
                seen.insert(fresh);
                fresh
            }
        };
        app.insert(
            "uuid".into(),
            Value::String(uuid.to_string().to_uppercase()),
        );
    }
}

/// Apply `normalize` to each present key; drop keys that cannot be salvaged.
fn normalize_keys(map: &mut Map<String, Value>, keys: &[&str], normalize: fn(&Value) -> Option<Value>) {
    for key in keys {
        if let Some(value) = map.get(*key) {
            match normalize(value) {
                Some(fixed) => {
                    map.insert((*key).to_string(), fixed);
                }
                None => {
                    map.remove(*key);
                }
            }
        }
    }
}

fn normalize_bool(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value.clone()),
        Value::Number(n) => Some(Value::Bool(n.as_f64().map_or(false, |v| v != 0.0))),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" | "enabled" => Some(Value::Bool(true)),
            "false" | "0" | "no" | "off" | "disabled" | "" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn normalize_int(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_u64() || n.is_i64() => Some(value.clone()),
        Value::Number(n) => n.as_f64().map(|v| Value::from(v.round() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        Value::Bool(b) => Some(Value::from(*b as i64)),
        _ => None,
    }
}

fn normalize_float(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
        _ => None,
    }
}
