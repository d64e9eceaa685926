//! Child-process environment handling
//!
//! `Environment` is an ordered name/value list. Name comparison is
//! case-insensitive on Windows and exact elsewhere. `project_launch_env`
//! fills in the streaming-context variables a launched app can read.

use crate::app_context::AppContext;
use crate::session::{AudioLayout, FrameGenParams, LaunchSession};
use std::process::Command;

/// Variables describing the stream, set on every launch.
pub const STREAM_VARS: &[&str] = &[
    "STREAM_APP_ID",
    "STREAM_APP_NAME",
    "STREAM_APP_UUID",
    "STREAM_CLIENT_UUID",
    "STREAM_CLIENT_NAME",
    "STREAM_CLIENT_WIDTH",
    "STREAM_CLIENT_HEIGHT",
    "STREAM_CLIENT_REQUESTED_WIDTH",
    "STREAM_CLIENT_REQUESTED_HEIGHT",
    "STREAM_CLIENT_FPS",
    "STREAM_CLIENT_FPS_X1000",
    "STREAM_CLIENT_HDR",
    "STREAM_CLIENT_AUDIO_CONFIGURATION",
    "STREAM_CLIENT_HOST_AUDIO",
];

/// Frame-generation profile variables. Cleared when no provider is active.
pub const FRAME_GEN_VARS: &[&str] = &[
    "FRAMEGEN_PROVIDER",
    "FRAMEGEN_CAPTURE_API",
    "FRAMEGEN_QUEUE_TARGET",
    "FRAMEGEN_PERFORMANCE_MODE",
    "FRAMEGEN_HDR",
    "FRAMEGEN_FLOW_SCALE",
    "FRAMEGEN_RESOLUTION_SCALE",
    "FRAMEGEN_SCALING_MODE",
    "FRAMEGEN_SHARPENING",
    "FRAMEGEN_ANIME4K_TYPE",
    "FRAMEGEN_ANIME4K_VRS",
    "FRAMEGEN_TARGET_FPS",
    "FRAMEGEN_CAPTURE_LIMITER",
];

/// Ordered environment block for child processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    vars: Vec<(String, String)>,
    case_insensitive: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// Empty environment using the platform's name comparison rule.
    pub fn new() -> Self {
        Self::with_case_rule(cfg!(windows))
    }

    /// Empty environment with an explicit name comparison rule.
    pub fn with_case_rule(case_insensitive: bool) -> Self {
        Self {
            vars: Vec::new(),
            case_insensitive,
        }
    }

    /// Snapshot of the current process environment.
    pub fn from_process() -> Self {
        let mut env = Self::new();
        for (name, value) in std::env::vars_os() {
            if let (Ok(name), Ok(value)) = (name.into_string(), value.into_string()) {
                env.set(name, value);
            }
        }
        env
    }

    /// Whether names compare case-insensitively.
    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    fn names_match(&self, a: &str, b: &str) -> bool {
        if self.case_insensitive {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.vars.iter().position(|(n, _)| self.names_match(n, name))
    }

    /// Look up a variable using the environment's name comparison rule.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.vars[i].1.as_str())
    }

    /// Set a variable, replacing an existing entry in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.vars[i].1 = value,
            None => self.vars.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.vars.remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Expand `$(NAME)` references and `$$` escapes.
    ///
    /// Expansion runs left to right and is not recursive: text substituted
    /// for a reference is never scanned again. Unknown names expand to the
    /// empty string; a `$` that starts neither form is kept as-is.
    pub fn expand(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("$$") {
                out.push('$');
                rest = &tail[2..];
            } else if tail.starts_with("$(") {
                match tail[2..].find(')') {
                    Some(end) => {
                        let name = &tail[2..2 + end];
                        out.push_str(self.get(name).unwrap_or_default());
                        rest = &tail[2 + end + 1..];
                    }
                    None => {
                        // Unterminated reference
                        out.push_str(tail);
                        rest = "";
                    }
                }
            } else {
                out.push('$');
                rest = &tail[1..];
            }
        }

        out.push_str(rest);
        out
    }

    /// Replace a command's inherited environment with this one.
    pub fn apply_to(&self, command: &mut Command) {
        command.env_clear();
        command.envs(self.vars.iter().map(|(n, v)| (n, v)));
    }
}

fn format_fps(fps: f64) -> String {
    let rounded = (fps * 1000.0).round() / 1000.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        let text = format!("{:.3}", rounded);
        text.trim_end_matches('0').to_string()
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn audio_configuration(layout: AudioLayout) -> &'static str {
    match layout {
        AudioLayout::Stereo => "2.0",
        AudioLayout::Surround51 => "5.1",
        AudioLayout::Surround71 => "7.1",
    }
}

/// Build the environment for one launch from the catalog environment.
///
/// `session.width`/`height` are the render size after scaling, the
/// requested size is kept in `requested_width`/`requested_height`.
pub fn project_launch_env(
    base: &Environment,
    app: &AppContext,
    session: &LaunchSession,
) -> Environment {
    let mut env = base.clone();

    env.set("STREAM_APP_ID", app.id.to_string());
    env.set("STREAM_APP_NAME", app.name.clone());
    env.set("STREAM_APP_UUID", app.uuid.to_string().to_uppercase());
    env.set(
        "STREAM_CLIENT_UUID",
        session.client_uuid.to_string().to_uppercase(),
    );
    env.set("STREAM_CLIENT_NAME", session.client_name.clone());
    env.set("STREAM_CLIENT_WIDTH", session.width.to_string());
    env.set("STREAM_CLIENT_HEIGHT", session.height.to_string());
    env.set(
        "STREAM_CLIENT_REQUESTED_WIDTH",
        session.requested_width.to_string(),
    );
    env.set(
        "STREAM_CLIENT_REQUESTED_HEIGHT",
        session.requested_height.to_string(),
    );
    env.set("STREAM_CLIENT_FPS", format_fps(session.fps));
    env.set(
        "STREAM_CLIENT_FPS_X1000",
        ((session.fps * 1000.0).round() as i64).to_string(),
    );
    env.set("STREAM_CLIENT_HDR", flag(session.enable_hdr));
    env.set(
        "STREAM_CLIENT_AUDIO_CONFIGURATION",
        audio_configuration(session.surround),
    );
    env.set("STREAM_CLIENT_HOST_AUDIO", flag(session.host_audio));

    match &session.frame_gen {
        Some(params) => set_frame_gen_vars(&mut env, params),
        None => {
            for name in FRAME_GEN_VARS {
                env.set(*name, "");
            }
        }
    }

    env
}

fn set_frame_gen_vars(env: &mut Environment, params: &FrameGenParams) {
    env.set("FRAMEGEN_PROVIDER", params.provider.as_str());
    env.set("FRAMEGEN_CAPTURE_API", params.capture_api.clone());
    env.set("FRAMEGEN_QUEUE_TARGET", params.queue_target.to_string());
    env.set("FRAMEGEN_PERFORMANCE_MODE", flag(params.performance_mode));
    env.set("FRAMEGEN_HDR", flag(params.hdr));
    env.set("FRAMEGEN_FLOW_SCALE", format!("{:.2}", params.flow_scale));
    env.set(
        "FRAMEGEN_RESOLUTION_SCALE",
        format!("{:.2}", params.resolution_scale),
    );
    env.set("FRAMEGEN_SCALING_MODE", params.scaling_mode.clone());
    env.set("FRAMEGEN_SHARPENING", params.sharpening.to_string());
    env.set("FRAMEGEN_ANIME4K_TYPE", params.anime4k_type.clone());
    env.set("FRAMEGEN_ANIME4K_VRS", flag(params.anime4k_vrs));
    env.set("FRAMEGEN_TARGET_FPS", params.target_fps.to_string());
    env.set("FRAMEGEN_CAPTURE_LIMITER", flag(params.capture_limiter));
}
