//! Gauge sampling.
//!
//! Each [`Sampler`] reads a fixed catalogue of gauges. Collectors run one per
//! sampler, overwrite the agent's snapshot on every poll tick and never report
//! anything themselves.

use metrix_core::{MemoryStorage, Metrics, Repository};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Gauge that changes on every sample so a stuck pipeline is visible server-side.
pub const RANDOM_VALUE: &str = "RandomValue";

/// A source of named gauge readings.
pub trait Sampler: Send + 'static {
    fn name(&self) -> &'static str;

    /// Every gauge name [`Sampler::sample`] can produce.
    fn gauge_names(&self) -> Vec<String>;

    /// Take one reading of the catalogue.
    fn sample(&mut self) -> Vec<Metrics>;
}

/// Readings about the agent process itself.
pub struct RuntimeSampler {
    system: System,
    pid: Option<Pid>,
}

impl RuntimeSampler {
    const GAUGES: [&'static str; 7] = [
        "ProcessResidentMemory",
        "ProcessVirtualMemory",
        "ProcessCPUUsage",
        "ProcessRunTime",
        "ProcessDiskReadBytes",
        "ProcessDiskWrittenBytes",
        RANDOM_VALUE,
    ];

    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = e, "Cannot resolve own pid, process gauges stay at zero");
                None
            }
        };
        Self { system: System::new(), pid }
    }
}

impl Default for RuntimeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RuntimeSampler {
    fn name(&self) -> &'static str {
        "runtime"
    }

    fn gauge_names(&self) -> Vec<String> {
        Self::GAUGES.iter().map(|name| name.to_string()).collect()
    }

    fn sample(&mut self) -> Vec<Metrics> {
        let mut readings = Vec::with_capacity(Self::GAUGES.len());

        if let Some(pid) = self.pid {
            self.system.refresh_process(pid);
            if let Some(process) = self.system.process(pid) {
                let disk = process.disk_usage();
                readings.extend([
                    Metrics::gauge("ProcessResidentMemory", process.memory() as f64),
                    Metrics::gauge("ProcessVirtualMemory", process.virtual_memory() as f64),
                    Metrics::gauge("ProcessCPUUsage", f64::from(process.cpu_usage())),
                    Metrics::gauge("ProcessRunTime", process.run_time() as f64),
                    Metrics::gauge("ProcessDiskReadBytes", disk.total_read_bytes as f64),
                    Metrics::gauge("ProcessDiskWrittenBytes", disk.total_written_bytes as f64),
                ]);
            }
        }

        readings.push(Metrics::gauge(RANDOM_VALUE, rand::thread_rng().gen_range(0.0..1.0)));
        readings
    }
}

/// Host-wide memory and per-CPU utilisation.
pub struct HostSampler {
    system: System,
}

impl HostSampler {
    const GAUGES: [&'static str; 5] =
        ["TotalMemory", "FreeMemory", "UsedMemory", "TotalSwap", "UsedSwap"];

    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; prime the first one.
        system.refresh_cpu();
        Self { system }
    }

    fn cpu_gauge(index: usize) -> String {
        format!("CPUutilization{}", index + 1)
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for HostSampler {
    fn name(&self) -> &'static str {
        "host"
    }

    fn gauge_names(&self) -> Vec<String> {
        let cpus = (0..self.system.cpus().len()).map(Self::cpu_gauge);
        Self::GAUGES.iter().map(|name| name.to_string()).chain(cpus).collect()
    }

    fn sample(&mut self) -> Vec<Metrics> {
        self.system.refresh_memory();
        self.system.refresh_cpu();

        let system = &self.system;
        let mut readings = vec![
            Metrics::gauge("TotalMemory", system.total_memory() as f64),
            Metrics::gauge("FreeMemory", system.free_memory() as f64),
            Metrics::gauge("UsedMemory", system.used_memory() as f64),
            Metrics::gauge("TotalSwap", system.total_swap() as f64),
            Metrics::gauge("UsedSwap", system.used_swap() as f64),
        ];
        readings.extend(
            system
                .cpus()
                .iter()
                .enumerate()
                .map(|(i, cpu)| Metrics::gauge(Self::cpu_gauge(i), f64::from(cpu.cpu_usage()))),
        );
        readings
    }
}

/// Agent snapshot seeded with every gauge the samplers can produce, all zero.
pub fn snapshot_for(samplers: &[Box<dyn Sampler>]) -> Arc<MemoryStorage> {
    let names = samplers.iter().flat_map(|sampler| sampler.gauge_names());
    Arc::new(MemoryStorage::with_gauges(names))
}

/// Take one sample and write it into the snapshot as a single batch.
pub async fn collect_once(sampler: &mut dyn Sampler, snapshot: &MemoryStorage) {
    let readings = sampler.sample();
    match snapshot.update_many(&readings).await {
        Ok(applied) => debug!(sampler = sampler.name(), gauges = applied.len(), "Sample stored"),
        Err(e) => warn!(sampler = sampler.name(), error = %e, "Discarding sample"),
    }
}

/// Run `sampler` on every poll tick until `token` is cancelled.
pub fn spawn_collector(
    mut sampler: Box<dyn Sampler>,
    snapshot: Arc<MemoryStorage>,
    poll: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(sampler = sampler.name(), ?poll, "Collector started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => collect_once(sampler.as_mut(), &snapshot).await,
            }
        }

        info!(sampler = sampler.name(), "Collector stopped");
    })
}
