//! Process-Group Lifecycle Manager
//!
//! Commands run through the platform shell. The primary app command is
//! started under a `ProcessGroup`, which tracks the root process and every
//! descendant discovered while it runs so that termination reaches the
//! whole tree, including processes whose parent already exited.

use crate::env::Environment;
use crate::error::SpawnError;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, System};
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::{getpgid, Pid as NixPid};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
#[cfg(windows)]
use std::os::windows::process::CommandExt;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Interval between liveness checks while waiting for a graceful exit.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Everything needed to start one command.
#[derive(Debug, Clone, Copy)]
pub struct LaunchCommand<'a> {
    pub cmd: &'a str,
    pub working_dir: Option<&'a Path>,
    pub env: &'a Environment,
    /// Append stdout/stderr to this file instead of discarding them
    pub output: Option<&'a Path>,
    pub elevated: bool,
    /// Track the command and its descendants as a group
    pub grouped: bool,
}

impl<'a> LaunchCommand<'a> {
    pub fn new(cmd: &'a str, env: &'a Environment) -> Self {
        Self {
            cmd,
            working_dir: None,
            env,
            output: None,
            elevated: false,
            grouped: false,
        }
    }
}

/// A started command.
#[derive(Debug)]
pub struct Spawned {
    pub child: Child,
    pub group: Option<ProcessGroup>,
}

impl Spawned {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

/// First token of a command line, honouring double quotes.
pub fn command_executable(cmd: &str) -> Option<PathBuf> {
    let cmd = cmd.trim_start();
    let token = if let Some(rest) = cmd.strip_prefix('"') {
        rest.split('"').next()?
    } else {
        cmd.split_whitespace().next()?
    };
    if token.is_empty() {
        None
    } else {
        Some(PathBuf::from(token))
    }
}

/// Directory a command should run in when the app does not name one.
pub fn default_working_dir(cmd: &str) -> Option<PathBuf> {
    let exe = command_executable(cmd)?;
    if !exe.is_absolute() {
        return None;
    }
    exe.parent()
        .filter(|dir| dir.is_dir())
        .map(Path::to_path_buf)
}

fn shell_command(cmd: &str) -> Command {
    #[cfg(windows)]
    {
        let mut command = Command::new("cmd");
        command.raw_arg("/C").raw_arg(cmd);
        command.creation_flags(CREATE_NO_WINDOW);
        command
    }

    #[cfg(not(windows))]
    {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        command
    }
}

fn open_log(path: &Path) -> Result<File, SpawnError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| SpawnError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Start a command.
///
/// With `grouped` set the command becomes the root of a new process group
/// and the returned `Spawned` carries a `ProcessGroup` for it.
pub fn start(launch: &LaunchCommand) -> Result<Spawned, SpawnError> {
    let line = launch.cmd.trim();
    if line.is_empty() {
        return Err(SpawnError::EmptyCommand);
    }

    let mut command = shell_command(line);
    launch.env.apply_to(&mut command);

    let working_dir = launch
        .working_dir
        .map(Path::to_path_buf)
        .or_else(|| default_working_dir(line));
    if let Some(dir) = &working_dir {
        command.current_dir(dir);
    }

    command.stdin(Stdio::null());
    match launch.output {
        Some(path) => {
            let log = open_log(path)?;
            let log_err = log.try_clone().map_err(|source| SpawnError::LogFile {
                path: path.to_path_buf(),
                source,
            })?;
            command.stdout(log).stderr(log_err);
        }
        None => {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }

    if launch.elevated {
        // No portable elevation primitive; the command keeps our token
        info!("Running {:?} as elevated with the current privileges", line);
    }

    #[cfg(unix)]
    {
        if launch.grouped {
            command.process_group(0);
        }
    }

    let child = command.spawn().map_err(|source| SpawnError::Io {
        command: line.to_string(),
        source,
    })?;

    debug!("Spawned {:?} as pid {}", line, child.id());

    let group = launch.grouped.then(|| ProcessGroup::attach(child.id()));
    Ok(Spawned { child, group })
}

/// Start a command and wait for it, failing on a non-zero exit status.
pub fn run(launch: &LaunchCommand) -> Result<ExitStatus, SpawnError> {
    let mut spawned = start(launch)?;
    let status = spawned.child.wait().map_err(|source| SpawnError::Io {
        command: launch.cmd.to_string(),
        source,
    })?;
    if let Some(mut group) = spawned.group.take() {
        group.detach();
    }

    if status.success() {
        Ok(status)
    } else {
        Err(SpawnError::Failed {
            command: launch.cmd.trim().to_string(),
            status: status.to_string(),
        })
    }
}

/// Hand a child to a reaper thread so it never lingers as a zombie.
pub fn detach_child(child: Child) {
    let pid = child.id();
    let mut child = child;
    let spawned = thread::Builder::new()
        .name(format!("reap-{}", pid))
        .spawn(move || {
            if let Ok(status) = child.wait() {
                debug!("Detached process {} exited with {}", pid, status);
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to start reaper for pid {}: {}", pid, e);
    }
}

/// A launched command and all of its descendants.
///
/// The group must be terminated or detached before it is dropped; dropping
/// an attached group kills its members and logs an error.
#[derive(Debug)]
pub struct ProcessGroup {
    root: u32,
    /// pid -> start time, `None` when the process was gone before we saw it
    members: HashMap<u32, Option<u64>>,
    system: System,
    /// The root was started as the leader of its own process group
    leads_group: bool,
    attached: bool,
}

impl ProcessGroup {
    /// Start tracking the tree rooted at `root_pid`.
    pub fn attach(root_pid: u32) -> Self {
        let mut group = Self {
            root: root_pid,
            members: HashMap::new(),
            system: System::new(),
            leads_group: same_process_group(root_pid, root_pid),
            attached: true,
        };
        group.system.refresh_processes();
        let start_time = group
            .system
            .process(Pid::from_u32(root_pid))
            .map(|p| p.start_time());
        group.members.insert(root_pid, start_time);
        group.discover_members();
        group
    }

    pub fn root_pid(&self) -> u32 {
        self.root
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Add every process whose parent is a member, or that shares our
    /// process group id, to the member set.
    fn discover_members(&mut self) {
        loop {
            let mut found = Vec::new();
            for (pid, process) in self.system.processes() {
                let pid = pid.as_u32();
                if self.members.contains_key(&pid) {
                    continue;
                }
                let child_of_member = process
                    .parent()
                    .map_or(false, |parent| self.members.contains_key(&parent.as_u32()));
                if child_of_member || same_process_group(pid, self.root) {
                    found.push((pid, process.start_time()));
                }
            }
            if found.is_empty() {
                break;
            }
            for (pid, start_time) in found {
                self.members.insert(pid, Some(start_time));
            }
        }
    }

    fn refresh(&mut self) {
        self.system.refresh_processes();
        self.discover_members();
    }

    /// Pids of members that are still running.
    pub fn live_members(&mut self) -> Vec<u32> {
        if !self.attached {
            return Vec::new();
        }
        self.refresh();
        let system = &self.system;
        self.members
            .iter()
            .filter(|(pid, start_time)| {
                system.process(Pid::from_u32(**pid)).map_or(false, |p| {
                    let same_process = start_time.map_or(true, |t| t == p.start_time());
                    same_process && !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
                })
            })
            .map(|(pid, _)| *pid)
            .collect()
    }

    /// True while any member is running.
    pub fn is_alive(&mut self) -> bool {
        !self.live_members().is_empty()
    }

    /// Ask every member to exit. Returns false if the request could not be
    /// delivered to any of them.
    pub fn request_exit(&mut self) -> bool {
        let members = self.live_members();
        if members.is_empty() {
            return true;
        }

        #[cfg(windows)]
        {
            let status = Command::new("taskkill")
                .args(["/PID", &self.root.to_string(), "/T"])
                .creation_flags(CREATE_NO_WINDOW)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            let mut delivered = matches!(status, Ok(s) if s.success());
            for pid in members.iter().filter(|pid| **pid != self.root) {
                let status = Command::new("taskkill")
                    .args(["/PID", &pid.to_string()])
                    .creation_flags(CREATE_NO_WINDOW)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
                delivered |= matches!(status, Ok(s) if s.success());
            }
            delivered
        }

        #[cfg(unix)]
        {
            let grouped = self.leads_group;
            let mut delivered = grouped && signal_group(self.root, Signal::SIGTERM);
            for pid in members {
                if grouped && same_process_group(pid, self.root) {
                    continue;
                }
                if let Some(process) = self.system.process(Pid::from_u32(pid)) {
                    delivered |= process.kill_with(sysinfo::Signal::Term).unwrap_or(false);
                }
            }
            delivered
        }
    }

    /// Forcefully kill every running member.
    pub fn kill(&mut self) {
        #[cfg(unix)]
        let grouped = self.leads_group && signal_group(self.root, Signal::SIGKILL);
        #[cfg(not(unix))]
        let grouped = false;

        for pid in self.live_members() {
            if grouped && same_process_group(pid, self.root) {
                continue;
            }
            if let Some(process) = self.system.process(Pid::from_u32(pid)) {
                if !process.kill() {
                    warn!("Failed to kill pid {}", pid);
                }
            }
        }
    }

    /// Stop tracking the group without touching its members.
    pub fn detach(&mut self) {
        self.attached = false;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.attached {
            error!("Process group {} dropped while attached, killing it", self.root);
            self.kill();
            self.attached = false;
        }
    }
}

#[cfg(unix)]
fn same_process_group(pid: u32, group_id: u32) -> bool {
    matches!(
        getpgid(Some(NixPid::from_raw(pid as i32))),
        Ok(pgid) if pgid.as_raw() as u32 == group_id
    )
}

#[cfg(not(unix))]
fn same_process_group(_pid: u32, _group_id: u32) -> bool {
    false
}

/// Signal a whole process group. False when nothing received it.
#[cfg(unix)]
fn signal_group(group_id: u32, signal: Signal) -> bool {
    match killpg(NixPid::from_raw(group_id as i32), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            warn!("Failed to send {} to process group {}: {}", signal, group_id, e);
            false
        }
    }
}

/// Terminate a launched command and its group.
///
/// 1. A group that is not alive is left alone.
/// 2. With a non-zero `exit_timeout` the group is asked to exit and polled
///    once per second until it is gone or the budget is spent.
/// 3. Whatever is left is killed and the group is detached.
/// 4. The primary process handle is detached, not waited on.
pub fn terminate_group(child: Option<Child>, group: Option<ProcessGroup>, exit_timeout: Duration) {
    if let Some(mut group) = group {
        if group.is_alive() {
            if !exit_timeout.is_zero() {
                if group.request_exit() {
                    let mut remaining = exit_timeout;
                    while !remaining.is_zero() && group.is_alive() {
                        let step = remaining.min(EXIT_POLL_INTERVAL);
                        thread::sleep(step);
                        remaining = remaining.saturating_sub(step);
                    }
                } else {
                    warn!(
                        "Could not ask process group {} to exit, killing it",
                        group.root_pid()
                    );
                }
            }

            if group.is_alive() {
                info!("Forcefully terminating process group {}", group.root_pid());
            }
            group.kill();
        } else {
            debug!("Process group {} already exited", group.root_pid());
        }
        group.detach();
    }

    if let Some(child) = child {
        detach_child(child);
    }
}
