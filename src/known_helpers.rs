/// Known launcher and helper executables
///
/// Launch chains often start one of these before the real game appears.
/// The candidate detector uses the table to push them down the ranking.
use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperKind {
    Launcher,
    AntiCheat,
    Installer,
    CrashReporter,
}

/// Executables that are part of a launch chain but never the game itself
pub const KNOWN_HELPERS: &[(&str, &str, HelperKind)] = &[
    // Store launchers
    ("Steam", "steam.exe", HelperKind::Launcher),
    ("Steam Web Helper", "steamwebhelper.exe", HelperKind::Launcher),
    ("Steam (Linux)", "steam", HelperKind::Launcher),
    ("Epic Games Launcher", "EpicGamesLauncher.exe", HelperKind::Launcher),
    ("Epic Web Helper", "EpicWebHelper.exe", HelperKind::Launcher),
    ("GOG Galaxy", "GalaxyClient.exe", HelperKind::Launcher),
    ("GOG Galaxy Helper", "GalaxyClient Helper.exe", HelperKind::Launcher),
    ("Battle.net", "Battle.net.exe", HelperKind::Launcher),
    ("Ubisoft Connect", "UbisoftConnect.exe", HelperKind::Launcher),
    ("Ubisoft Connect (legacy)", "upc.exe", HelperKind::Launcher),
    ("EA App", "EADesktop.exe", HelperKind::Launcher),
    ("Rockstar Launcher", "Launcher.exe", HelperKind::Launcher),
    ("Playnite", "Playnite.DesktopApp.exe", HelperKind::Launcher),
    ("Playnite Fullscreen", "Playnite.FullscreenApp.exe", HelperKind::Launcher),
    ("Heroic", "heroic", HelperKind::Launcher),
    ("Lutris", "lutris", HelperKind::Launcher),

    // Anti-cheat shims
    ("Easy Anti-Cheat", "EasyAntiCheat.exe", HelperKind::AntiCheat),
    ("Easy Anti-Cheat EOS", "EasyAntiCheat_EOS.exe", HelperKind::AntiCheat),
    ("BattlEye Service", "BEService.exe", HelperKind::AntiCheat),
    ("Vanguard", "vgc.exe", HelperKind::AntiCheat),

    // Redistributable installers
    ("VC++ Redistributable (x64)", "vc_redist.x64.exe", HelperKind::Installer),
    ("VC++ Redistributable (x86)", "vc_redist.x86.exe", HelperKind::Installer),
    ("DirectX Setup", "DXSETUP.exe", HelperKind::Installer),

    // Crash reporters
    ("Steam Error Reporter", "steamerrorreporter.exe", HelperKind::CrashReporter),
    ("Unreal Crash Reporter", "CrashReportClient.exe", HelperKind::CrashReporter),
    ("Unity Crash Handler", "UnityCrashHandler64.exe", HelperKind::CrashReporter),
    ("Unity Crash Handler (32-bit)", "UnityCrashHandler32.exe", HelperKind::CrashReporter),
];

/// Lowercased executable name -> index into `KNOWN_HELPERS`
static HELPER_INDEX: Lazy<HashMap<String, usize>> = Lazy::new(|| {
    KNOWN_HELPERS
        .iter()
        .enumerate()
        .map(|(index, (_, exe, _))| (exe.to_ascii_lowercase(), index))
        .collect()
});

pub fn find_helper_by_executable(
    executable: &str,
) -> Option<&'static (&'static str, &'static str, HelperKind)> {
    HELPER_INDEX
        .get(&executable.to_ascii_lowercase())
        .map(|index| &KNOWN_HELPERS[*index])
}

/// True when the file name of `path` is a known launcher or helper
pub fn is_known_helper(path: &std::path::Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| find_helper_by_executable(name).is_some())
}
