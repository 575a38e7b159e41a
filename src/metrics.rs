use crate::capability::Capability;
use crate::gpu::{self, GpuReadings, GpuTelemetry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::System;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Point-in-time bundle of readings. `None` means the sensor was not
/// reachable on this run, which is different from a zero reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: Option<f32>,
    pub ram_used_gb: Option<f64>,
    pub ram_total_gb: Option<f64>,
    #[serde(flatten)]
    pub gpu: GpuReadings,
    pub fps: Option<f32>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            timestamp: Utc::now(),
            cpu_percent: None,
            ram_used_gb: None,
            ram_total_gb: None,
            gpu: GpuReadings::default(),
            fps: None,
        }
    }

    pub fn with_fps(mut self, fps: Option<f32>) -> Self {
        self.fps = fps;
        self
    }

    /// RAM usage as a 0-100 percentage, with the total floored at 0.1 GB.
    pub fn ram_percent(&self) -> f32 {
        let used = self.ram_used_gb.unwrap_or(0.0);
        let total = self.ram_total_gb.unwrap_or(0.0).max(0.1);
        (used / total * 100.0) as f32
    }
}

/// Rounds a byte count to gigabytes with two decimals.
pub fn bytes_to_gb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_GB * 100.0).round() / 100.0
}

pub struct MetricsSource {
    system: System,
    gpu: Capability<Box<dyn GpuTelemetry>>,
}

impl MetricsSource {
    pub fn new() -> Self {
        Self::with_gpu(gpu::probe())
    }

    pub fn with_gpu(gpu: Capability<Box<dyn GpuTelemetry>>) -> Self {
        let mut system = System::new();
        // Prime the CPU counters so the next refresh yields a delta.
        system.refresh_cpu_usage();

        if let Capability::Present(handle) = &gpu {
            tracing::info!(
                "GPU telemetry: {}",
                handle.name().unwrap_or_else(|| "unknown device".to_string())
            );
        }

        Self { system, gpu }
    }

    pub fn gpu_available(&self) -> bool {
        self.gpu.is_present()
    }

    /// Takes one snapshot. Never fails; unavailable sensors leave their
    /// fields empty.
    pub fn sample(&mut self) -> Snapshot {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpu_percent = if self.system.cpus().is_empty() {
            None
        } else {
            Some(self.system.global_cpu_usage())
        };

        let total = self.system.total_memory();
        let (ram_used_gb, ram_total_gb) = if total == 0 {
            (None, None)
        } else {
            let used = total.saturating_sub(self.system.available_memory());
            (Some(bytes_to_gb(used)), Some(bytes_to_gb(total)))
        };

        let gpu = match &self.gpu {
            Capability::Present(handle) => handle.read(),
            Capability::Absent { .. } => GpuReadings::default(),
        };

        Snapshot {
            timestamp: Utc::now(),
            cpu_percent,
            ram_used_gb,
            ram_total_gb,
            gpu,
            fps: None,
        }
    }

    /// Releases the vendor handle if one was acquired. Safe to call twice.
    pub fn shutdown(&mut self) {
        if let Capability::Present(handle) = &mut self.gpu {
            handle.shutdown();
        }
        self.gpu = Capability::absent("shut down");
    }
}

impl Default for MetricsSource {
    fn default() -> Self {
        Self::new()
    }
}
