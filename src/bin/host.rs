//! StreamHostLauncher - standalone launcher
//!
//! Launches one app from the app list the way the streaming host would,
//! keeps it attached while it runs, and tears it down when it exits or
//! when the launcher receives end of input on stdin.
//!
//! Usage: `stream_host_launcher <app name or uuid> [WIDTHxHEIGHT@FPS]`

use anyhow::{anyhow, bail, Context, Result};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stream_host_launcher::{
    config,
    orchestrator::{Orchestrator, OrchestratorDeps},
    profile::{SettingsFileTool, SharedTool},
    session::LaunchSession,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Parse `1920x1080@59.94`.
fn parse_mode(mode: &str) -> Result<(u32, u32, f64)> {
    let (size, fps) = mode.split_once('@').unwrap_or((mode, "60"));
    let (width, height) = size
        .split_once('x')
        .ok_or_else(|| anyhow!("Expected WIDTHxHEIGHT@FPS, got {:?}", mode))?;
    Ok((
        width.parse().context("Invalid width")?,
        height.parse().context("Invalid height")?,
        fps.parse().context("Invalid frame rate")?,
    ))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(target) = args.next() else {
        bail!("Usage: stream_host_launcher <app name or uuid> [WIDTHxHEIGHT@FPS]");
    };
    let (width, height, fps) = parse_mode(&args.next().unwrap_or_else(|| "1920x1080@60".into()))?;

    tracing::info!("StreamHostLauncher starting...");

    let host_config = config::load_config();

    let mut deps = OrchestratorDeps::standalone();
    if let Some(settings_path) = host_config.frame_gen_tool.settings_path.clone() {
        let tool = SettingsFileTool::new(settings_path, host_config.frame_gen_tool.executable.clone());
        let tool: SharedTool = Arc::new(parking_lot::Mutex::new(tool));
        deps.frame_gen_tool = Some(tool);
    }

    let mut orchestrator = Orchestrator::new(deps, host_config);
    let apps = orchestrator.get_apps();
    tracing::info!("Loaded {} apps", apps.len());

    let app = match Uuid::parse_str(&target) {
        Ok(uuid) => apps.iter().find(|app| app.uuid == uuid),
        Err(_) => apps.iter().find(|app| app.name.eq_ignore_ascii_case(&target)),
    }
    .cloned()
    .ok_or_else(|| anyhow!("No app named {:?}", target))?;

    let mut session = LaunchSession::new(width, height, fps);
    session.client_name = "local".to_string();
    session.client_uuid = Uuid::new_v4();

    let status = orchestrator.execute(&app, session.into_shared());
    if status != 0 {
        orchestrator.shutdown();
        bail!("Launch of {:?} failed with status {}", app.name, status);
    }

    // Closing stdin asks for a teardown
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        thread::spawn(move || {
            let mut sink = Vec::new();
            let _ = std::io::stdin().read_to_end(&mut sink);
            stop.store(true, Ordering::SeqCst);
        });
    }

    while !stop.load(Ordering::SeqCst) && orchestrator.running() != 0 {
        thread::sleep(POLL_INTERVAL);
    }

    tracing::info!("{:?} stopped, cleaning up", orchestrator.get_last_run_app_name());
    orchestrator.shutdown();
    Ok(())
}
