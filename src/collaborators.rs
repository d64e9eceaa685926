//! Capabilities the launcher consumes but does not implement.
//!
//! The streaming host plugs its display configuration, session tracking,
//! encoder pipeline and game-library integration in through these traits.
//! Each has a null implementation so the launcher works standalone.

use crate::session::LaunchSession;
use crate::virtual_display::DisplayPolicy;
use std::time::Duration;

/// Video settings relevant to physical display configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoConfig {
    /// Output the capture pipeline streams from
    pub output_name: String,
    /// Keep display changes across host restarts
    pub persist_changes: bool,
    pub policy: DisplayPolicy,
}

/// Physical display configuration for a stream.
pub trait DisplayConfigurator: Send {
    /// Reconfigure the physical outputs for `session`. True on success.
    fn apply(&mut self, video: &VideoConfig, session: &LaunchSession) -> bool;
    /// Undo the last successful `apply`.
    fn revert(&mut self);
    /// Forget any persisted display state.
    fn reset_persistence(&mut self);
    /// True when at least one physical display answers.
    fn physical_display_available(&self) -> bool;
}

/// Tracks active streaming sessions.
pub trait SessionRegistry: Send {
    fn active_sessions(&self) -> usize;
}

/// Checks that a hardware or software encoder can be initialised.
pub trait EncoderProber: Send {
    fn probe(&mut self) -> bool;
}

/// Game-library integration able to start games through a launcher.
pub trait LauncherPlugin: Send {
    /// Command line that asks the launcher to start `game_id`
    fn launcher_command(&self, game_id: &str) -> Option<String>;
    /// Command line that opens the launcher in fullscreen mode
    fn fullscreen_command(&self) -> Option<String>;
    /// Tell the plugin which launcher process serves `game_id`
    fn announce_launcher(&mut self, pid: u32, game_id: &str);
    /// Ask the launcher to stop `game_id`, giving up after `timeout`.
    /// True when the game is gone.
    fn stop_game(&mut self, game_id: &str, timeout: Duration) -> bool;
    fn installed_version(&self) -> Option<String>;
    fn install(&mut self) -> bool;
}

/// Display configurator for hosts without display control.
#[derive(Debug)]
pub struct NullDisplayConfigurator {
    pub physical_available: bool,
}

impl Default for NullDisplayConfigurator {
    fn default() -> Self {
        Self {
            physical_available: true,
        }
    }
}

impl DisplayConfigurator for NullDisplayConfigurator {
    fn apply(&mut self, _video: &VideoConfig, _session: &LaunchSession) -> bool {
        true
    }

    fn revert(&mut self) {}

    fn reset_persistence(&mut self) {}

    fn physical_display_available(&self) -> bool {
        self.physical_available
    }
}

/// Registry that never reports an active session.
#[derive(Debug, Default)]
pub struct NoSessions;

impl SessionRegistry for NoSessions {
    fn active_sessions(&self) -> usize {
        0
    }
}

/// Prober with a fixed answer.
#[derive(Debug)]
pub struct StaticProber(pub bool);

impl Default for StaticProber {
    fn default() -> Self {
        StaticProber(true)
    }
}

impl EncoderProber for StaticProber {
    fn probe(&mut self) -> bool {
        self.0
    }
}
