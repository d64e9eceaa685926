//! Frame-Generation Candidate Detector
//!
//! After a launch, watches processes that appear for a short window and
//! picks the one most likely to be the game. The winner gets a global
//! frame-generation profile and the tool is restarted to load it.
//!
//! Scoring:
//!
//! ```text
//! score = cpu_weight * cpu_norm + memory_weight * mem_norm
//!       + install_dir_bonus + direct_spawn_adjustment
//!       - system_path_penalty - known_helper_penalty
//! ```
//!
//! `cpu_norm` and `mem_norm` are relative to the busiest candidate. Only
//! processes that made CPU progress and expose an executable path compete.

use crate::known_helpers::is_known_helper;
use crate::profile::{ProfileBackup, ProfileOptions, ProfileTarget, SharedTool, ToolRuntime};
use crate::session::FrameGenParams;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::{debug, info};

/// One observation of a running process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub exe: Option<PathBuf>,
    /// CPU time consumed so far
    pub cpu_time: Duration,
    pub memory: u64,
}

/// Source of process observations.
pub trait ProcessSampler: Send {
    fn sample(&mut self) -> Vec<ProcessSample>;
}

/// `sysinfo`-backed sampler.
///
/// sysinfo reports CPU usage as a percentage since the previous refresh,
/// so cumulative CPU time is integrated across samples.
pub struct SysinfoSampler {
    system: System,
    cpu_time: HashMap<u32, Duration>,
    last_refresh: Option<Instant>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            cpu_time: HashMap::new(),
            last_refresh: None,
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSampler for SysinfoSampler {
    fn sample(&mut self) -> Vec<ProcessSample> {
        self.system.refresh_processes();
        let now = Instant::now();
        let elapsed = self
            .last_refresh
            .map(|last| now.duration_since(last))
            .unwrap_or_default();
        self.last_refresh = Some(now);

        let mut seen = HashSet::new();
        let mut samples = Vec::new();
        for (pid, process) in self.system.processes() {
            let pid = pid.as_u32();
            seen.insert(pid);
            let share = f64::from(process.cpu_usage()).max(0.0) / 100.0;
            let total = self.cpu_time.entry(pid).or_default();
            *total += elapsed.mul_f64(share);
            samples.push(ProcessSample {
                pid,
                exe: process.exe().map(Path::to_path_buf),
                cpu_time: *total,
                memory: process.memory(),
            });
        }
        self.cpu_time.retain(|pid, _| seen.contains(pid));
        samples
    }
}

/// Timing of the observation window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    #[serde(with = "millis")]
    pub window: Duration,
    #[serde(with = "millis")]
    pub tick: Duration,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            tick: Duration::from_millis(250),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Scoring constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub cpu_weight_high: f64,
    pub cpu_weight_low: f64,
    pub memory_weight: f64,
    /// Summed CPU ratio above which CPU dominates the score
    pub high_cpu_threshold: f64,
    pub low_usage_threshold: f64,
    pub install_dir_bonus: f64,
    pub direct_spawn_adjustment: f64,
    pub system_path_penalty: f64,
    pub known_helper_penalty: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            cpu_weight_high: 0.7,
            cpu_weight_low: 0.4,
            memory_weight: 0.3,
            high_cpu_threshold: 0.08,
            low_usage_threshold: 0.2,
            install_dir_bonus: 0.25,
            // Launch wrappers are usually the direct child, not the game
            direct_spawn_adjustment: -0.05,
            system_path_penalty: 0.3,
            known_helper_penalty: 0.4,
        }
    }
}

/// Observed history of one process.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub pid: u32,
    pub exe: Option<PathBuf>,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub first_cpu: Duration,
    pub last_cpu: Duration,
    pub peak_memory: u64,
    pub discovery_order: usize,
}

impl Candidate {
    fn new(sample: &ProcessSample, now: Instant, discovery_order: usize) -> Self {
        Self {
            pid: sample.pid,
            exe: sample.exe.clone(),
            first_seen: now,
            last_seen: now,
            first_cpu: sample.cpu_time,
            last_cpu: sample.cpu_time,
            peak_memory: sample.memory,
            discovery_order,
        }
    }

    fn update(&mut self, sample: &ProcessSample, now: Instant) {
        self.last_seen = now;
        self.last_cpu = sample.cpu_time;
        self.peak_memory = self.peak_memory.max(sample.memory);
        if self.exe.is_none() {
            self.exe = sample.exe.clone();
        }
    }

    /// CPU time per wall-clock second over the observed span.
    fn cpu_ratio(&self, min_span: Duration) -> f64 {
        let progress = self.last_cpu.saturating_sub(self.first_cpu);
        let span = self.last_seen.duration_since(self.first_seen).max(min_span);
        progress.as_secs_f64() / span.as_secs_f64().max(f64::EPSILON)
    }
}

/// Processes seen since the launch, excluding the baseline.
#[derive(Debug, Default)]
pub struct CandidateTable {
    baseline: HashSet<u32>,
    candidates: HashMap<u32, Candidate>,
}

impl CandidateTable {
    pub fn new(baseline: HashSet<u32>) -> Self {
        Self {
            baseline,
            candidates: HashMap::new(),
        }
    }

    pub fn observe(&mut self, samples: &[ProcessSample], now: Instant) {
        for sample in samples {
            if self.baseline.contains(&sample.pid) {
                continue;
            }
            let next_order = self.candidates.len();
            self.candidates
                .entry(sample.pid)
                .and_modify(|c| c.update(sample, now))
                .or_insert_with(|| Candidate::new(sample, now, next_order));
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidates(&self) -> Vec<&Candidate> {
        let mut list: Vec<&Candidate> = self.candidates.values().collect();
        list.sort_by_key(|c| c.discovery_order);
        list
    }
}

/// Context that biases scoring toward the launched app.
#[derive(Debug, Clone, Default)]
pub struct ScoringContext<'a> {
    pub install_dir: Option<&'a Path>,
    pub direct_pid: Option<u32>,
    /// Shortest span used when turning CPU time into a ratio
    pub min_span: Duration,
}

/// A scored candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub pid: u32,
    pub exe: PathBuf,
    pub score: f64,
}

/// True for executables under an operating system directory.
pub fn is_system_path(path: &Path) -> bool {
    #[cfg(windows)]
    {
        let root = std::env::var("SystemRoot").unwrap_or_else(|_| "C:\\Windows".to_string());
        let path = path.to_string_lossy().to_ascii_lowercase();
        path.starts_with(&root.to_ascii_lowercase())
    }

    #[cfg(not(windows))]
    {
        const SYSTEM_DIRS: &[&str] = &[
            "/bin",
            "/sbin",
            "/usr/bin",
            "/usr/sbin",
            "/usr/lib",
            "/usr/libexec",
            "/lib",
            "/lib64",
        ];
        SYSTEM_DIRS.iter().any(|dir| path.starts_with(dir))
    }
}

/// Score every eligible candidate, in discovery order.
pub fn score_candidates(
    table: &CandidateTable,
    weights: &ScoringWeights,
    context: &ScoringContext,
) -> Vec<Scored> {
    let eligible: Vec<(&Candidate, &PathBuf, f64)> = table
        .candidates()
        .into_iter()
        .filter(|c| c.last_cpu > c.first_cpu)
        .filter_map(|c| {
            let exe = c.exe.as_ref()?;
            Some((c, exe, c.cpu_ratio(context.min_span)))
        })
        .collect();

    if eligible.is_empty() {
        return Vec::new();
    }

    let total_cpu: f64 = eligible.iter().map(|(_, _, ratio)| ratio).sum();
    let max_cpu = eligible
        .iter()
        .map(|(_, _, ratio)| *ratio)
        .fold(0.0, f64::max);
    let max_memory = eligible
        .iter()
        .map(|(c, _, _)| c.peak_memory)
        .max()
        .unwrap_or(0);

    let cpu_weight = if total_cpu > weights.high_cpu_threshold {
        weights.cpu_weight_high
    } else {
        weights.cpu_weight_low
    };

    eligible
        .into_iter()
        .map(|(candidate, exe, ratio)| {
            let cpu_norm = if max_cpu > 0.0 { ratio / max_cpu } else { 0.0 };
            let mem_norm = if max_memory > 0 {
                candidate.peak_memory as f64 / max_memory as f64
            } else {
                0.0
            };

            let mut score = cpu_weight * cpu_norm + weights.memory_weight * mem_norm;
            if context.install_dir.map_or(false, |dir| exe.starts_with(dir)) {
                score += weights.install_dir_bonus;
            }
            if context.direct_pid == Some(candidate.pid) {
                score += weights.direct_spawn_adjustment;
            }
            if is_system_path(exe)
                && cpu_norm < weights.low_usage_threshold
                && mem_norm < weights.low_usage_threshold
            {
                score -= weights.system_path_penalty;
            }
            if is_known_helper(exe) {
                score -= weights.known_helper_penalty;
            }

            Scored {
                pid: candidate.pid,
                exe: exe.clone(),
                score,
            }
        })
        .collect()
}

/// Highest score wins; ties keep the first discovered.
pub fn select_candidate(scored: &[Scored]) -> Option<&Scored> {
    scored.iter().fold(None, |best: Option<&Scored>, current| match best {
        Some(best) if best.score >= current.score => Some(best),
        _ => Some(current),
    })
}

/// Pids running right now, used as the detector baseline.
pub fn snapshot_baseline(sampler: &mut dyn ProcessSampler) -> HashSet<u32> {
    sampler.sample().into_iter().map(|s| s.pid).collect()
}

/// Parameters for one detection run.
#[derive(Debug, Clone)]
pub struct DetectorJob {
    pub baseline: HashSet<u32>,
    pub direct_pid: Option<u32>,
    pub install_dir_hint: Option<PathBuf>,
    pub params: FrameGenParams,
    pub settings: DetectorSettings,
    pub weights: ScoringWeights,
}

/// Profile applied to a selected process.
#[derive(Debug, Clone)]
pub struct AppliedProfile {
    pub pid: u32,
    pub exe: PathBuf,
    pub runtime: ToolRuntime,
    pub backup: ProfileBackup,
}

/// A running detection thread.
pub struct CandidateDetector {
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<Option<AppliedProfile>>>,
    tool: SharedTool,
}

impl CandidateDetector {
    /// Spawn the detection thread.
    pub fn start(job: DetectorJob, sampler: Box<dyn ProcessSampler>, tool: SharedTool) -> Self {
        let (cancel_tx, cancel_rx) = bounded(1);
        let worker_tool = tool.clone();

        let spawned = thread::Builder::new()
            .name("framegen-detector".into())
            .spawn(move || run_detection(job, sampler, worker_tool, cancel_rx));

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!("Failed to start candidate detector: {}", e);
                None
            }
        };

        Self {
            cancel: Some(cancel_tx),
            handle,
            tool,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel, join, and undo any profile the thread applied.
    ///
    /// Returns the profile that was undone, if any.
    pub fn stop(mut self) -> Option<AppliedProfile> {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.try_send(());
        }

        let applied = self
            .handle
            .take()
            .and_then(|handle| handle.join().ok())
            .flatten();

        if let Some(applied) = &applied {
            if applied.backup.valid {
                let mut tool = self.tool.lock();
                tool.stop_processes(&applied.runtime);
                tool.restore_global_profile(&applied.backup);
                info!("Frame generation profile for pid {} undone", applied.pid);
            }
        }
        applied
    }
}

fn run_detection(
    job: DetectorJob,
    mut sampler: Box<dyn ProcessSampler>,
    tool: SharedTool,
    cancel: Receiver<()>,
) -> Option<AppliedProfile> {
    let started = Instant::now();
    let mut table = CandidateTable::new(job.baseline);

    while started.elapsed() < job.settings.window {
        match cancel.recv_timeout(job.settings.tick) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                debug!("Candidate detection cancelled");
                return None;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        let samples = sampler.sample();
        table.observe(&samples, Instant::now());
    }

    let context = ScoringContext {
        install_dir: job.install_dir_hint.as_deref(),
        direct_pid: job.direct_pid,
        min_span: job.settings.tick,
    };
    let scored = score_candidates(&table, &job.weights, &context);
    for entry in &scored {
        debug!("Candidate {} {:?} scored {:.3}", entry.pid, entry.exe, entry.score);
    }

    let Some(winner) = select_candidate(&scored).cloned() else {
        debug!("No frame generation candidate among {} new processes", table.len());
        return None;
    };

    // Last chance to bail out before touching the tool
    if cancel.try_recv().is_ok() {
        return None;
    }

    info!("Frame generation target: pid {} ({:?})", winner.pid, winner.exe);
    let mut tool = tool.lock();
    if let Some(previous) = tool.read_options() {
        debug!("Replacing profile targeting {:?}", previous.target_executable);
    }
    let install_dir = candidate_install_dir(&winner.exe, job.install_dir_hint.as_deref());
    let target = ProfileTarget {
        pid: winner.pid,
        exe: &winner.exe,
        install_dir: install_dir.as_deref(),
    };
    let runtime = tool.capture_state();
    tool.stop_processes(&runtime);
    let (changed, backup) = tool.apply_global_profile(&ProfileOptions::from_params(&job.params), &target);
    if !backup.valid {
        debug!("Frame generation profile was not applied");
    }
    tool.restart_foreground(&runtime, changed, &target);

    Some(AppliedProfile {
        pid: winner.pid,
        exe: winner.exe,
        runtime,
        backup,
    })
}

/// The app's install directory when `exe` lives in it, else the exe's own folder.
fn candidate_install_dir(exe: &Path, hint: Option<&Path>) -> Option<PathBuf> {
    match hint {
        Some(dir) if exe.starts_with(dir) => Some(dir.to_path_buf()),
        _ => exe
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf),
    }
}
