//! # Resource Profiler
//!
//! Scopes process resource sampling to a single trial. At trial start a
//! memory snapshot is written to `mem-<N>workers.json`; while the trial runs a
//! background task samples process CPU and memory, and on finish the samples
//! are written to `cpu-<N>workers.json`. Both land in the profile directory,
//! which is created on first use.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{Pid, System};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{BenchError, Result};

/// Summary of one trial's resource usage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSample {
    pub peak_memory_bytes: u64,
    pub average_cpu_percent: f32,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CpuSample {
    pub elapsed_ms: u64,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

#[derive(Debug, Serialize)]
struct MemorySnapshot {
    worker_count: usize,
    pid: u32,
    captured_at: DateTime<Utc>,
    process_memory_bytes: u64,
    process_virtual_memory_bytes: u64,
    system_total_memory_bytes: u64,
    system_used_memory_bytes: u64,
}

#[derive(Debug, Serialize)]
struct CpuProfile<'a> {
    worker_count: usize,
    pid: u32,
    started_at: DateTime<Utc>,
    duration_ms: u64,
    sample_interval_ms: u64,
    average_cpu_percent: f32,
    peak_memory_bytes: u64,
    samples: &'a [CpuSample],
}

/// Writes per-trial CPU and memory profiles
#[derive(Debug, Clone)]
pub struct ResourceProfiler {
    output_dir: PathBuf,
    sample_interval: Duration,
}

impl ResourceProfiler {
    pub fn new(output_dir: impl Into<PathBuf>, sample_interval: Duration) -> Self {
        Self {
            output_dir: output_dir.into(),
            sample_interval: sample_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn memory_profile_path(&self, worker_count: usize) -> PathBuf {
        self.output_dir.join(format!("mem-{worker_count}workers.json"))
    }

    pub fn cpu_profile_path(&self, worker_count: usize) -> PathBuf {
        self.output_dir.join(format!("cpu-{worker_count}workers.json"))
    }

    /// Snapshot memory and start CPU sampling for a trial with `worker_count`
    /// workers
    pub async fn begin(&self, worker_count: usize) -> Result<ProfileSession> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let pid = sysinfo::get_current_pid()
            .map_err(|err| BenchError::Profiling(format!("cannot determine process id: {err}")))?;

        let mut system = System::new();
        system.refresh_memory();
        refresh(&mut system, pid)?;
        let (process_memory_bytes, process_virtual_memory_bytes) = system
            .process(pid)
            .map(|p| (p.memory(), p.virtual_memory()))
            .ok_or_else(|| BenchError::Profiling(format!("process {pid} not visible")))?;

        let snapshot = MemorySnapshot {
            worker_count,
            pid: pid.as_u32(),
            captured_at: Utc::now(),
            process_memory_bytes,
            process_virtual_memory_bytes,
            system_total_memory_bytes: system.total_memory(),
            system_used_memory_bytes: system.used_memory(),
        };
        let memory_path = self.memory_profile_path(worker_count);
        tokio::fs::write(&memory_path, serde_json::to_vec_pretty(&snapshot)?).await?;
        debug!(path = %memory_path.display(), worker_count, "Wrote memory snapshot");

        let (stop, stopped) = oneshot::channel();
        let sampler = tokio::spawn(sample_until_stopped(
            system,
            pid,
            self.sample_interval,
            stopped,
        ));

        Ok(ProfileSession {
            worker_count,
            pid,
            cpu_path: self.cpu_profile_path(worker_count),
            sample_interval: self.sample_interval,
            started: Instant::now(),
            started_at: Utc::now(),
            baseline_memory_bytes: process_memory_bytes,
            stop: Some(stop),
            sampler: Some(sampler),
        })
    }
}

/// Profiling attached to one running trial
///
/// Dropping a session without calling [`finish`](Self::finish) stops
/// sampling and writes nothing.
#[derive(Debug)]
pub struct ProfileSession {
    worker_count: usize,
    pid: Pid,
    cpu_path: PathBuf,
    sample_interval: Duration,
    started: Instant,
    started_at: DateTime<Utc>,
    baseline_memory_bytes: u64,
    stop: Option<oneshot::Sender<()>>,
    sampler: Option<JoinHandle<Vec<CpuSample>>>,
}

impl ProfileSession {
    /// Stop sampling and write the CPU profile
    pub async fn finish(mut self) -> Result<ResourceSample> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let samples = match self.sampler.take() {
            Some(sampler) => sampler
                .await
                .map_err(|err| BenchError::Profiling(format!("sampler task failed: {err}")))?,
            None => Vec::new(),
        };

        let peak_memory_bytes = samples
            .iter()
            .map(|s| s.memory_bytes)
            .max()
            .unwrap_or(0)
            .max(self.baseline_memory_bytes);
        let average_cpu_percent = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|s| s.cpu_percent).sum::<f32>() / samples.len() as f32
        };

        let profile = CpuProfile {
            worker_count: self.worker_count,
            pid: self.pid.as_u32(),
            started_at: self.started_at,
            duration_ms: millis(self.started.elapsed()),
            sample_interval_ms: millis(self.sample_interval),
            average_cpu_percent,
            peak_memory_bytes,
            samples: &samples,
        };
        tokio::fs::write(&self.cpu_path, serde_json::to_vec_pretty(&profile)?).await?;
        debug!(
            path = %self.cpu_path.display(),
            samples = samples.len(),
            "Wrote CPU profile"
        );

        Ok(ResourceSample {
            peak_memory_bytes,
            average_cpu_percent,
            samples: samples.len(),
        })
    }
}

impl Drop for ProfileSession {
    fn drop(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
    }
}

fn refresh(system: &mut System, pid: Pid) -> Result<()> {
    if system.refresh_process(pid) {
        Ok(())
    } else {
        Err(BenchError::Profiling(format!("process {pid} not visible")))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn sample_until_stopped(
    mut system: System,
    pid: Pid,
    sample_interval: Duration,
    mut stopped: oneshot::Receiver<()>,
) -> Vec<CpuSample> {
    let started = Instant::now();
    let mut samples = Vec::new();
    let mut ticker = tokio::time::interval(sample_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut stopped => break,
            _ = ticker.tick() => {
                if !system.refresh_process(pid) {
                    warn!(%pid, "Process disappeared from sampler view");
                    break;
                }
                if let Some(process) = system.process(pid) {
                    samples.push(CpuSample {
                        elapsed_ms: millis(started.elapsed()),
                        cpu_percent: process.cpu_usage(),
                        memory_bytes: process.memory(),
                    });
                }
            }
        }
    }
    samples
}
