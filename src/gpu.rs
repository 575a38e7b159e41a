use crate::capability::Capability;
use serde::{Deserialize, Serialize};

/// One read of the GPU sensors. Every field is independent: a sensor that
/// errors leaves only its own field empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuReadings {
    pub gpu_util_percent: Option<f32>,
    pub gpu_temp_c: Option<f32>,
    pub gpu_mem_used_gb: Option<f64>,
    pub gpu_mem_total_gb: Option<f64>,
    pub gpu_fan_percent: Option<f32>,
    pub gpu_clock_mhz: Option<f32>,
}

/// Vendor telemetry handle acquired once per process.
#[cfg_attr(test, mockall::automock)]
pub trait GpuTelemetry: Send {
    fn name(&self) -> Option<String>;
    fn read(&self) -> GpuReadings;
    /// Releases the vendor handle. Further reads return empty readings.
    fn shutdown(&mut self);
}

pub fn probe() -> Capability<Box<dyn GpuTelemetry>> {
    #[cfg(feature = "nvml")]
    {
        Capability::resolve(
            "NVML",
            nvml::NvmlGpu::init(0).map(|gpu| Box::new(gpu) as Box<dyn GpuTelemetry>),
        )
    }
    #[cfg(not(feature = "nvml"))]
    {
        Capability::absent("built without NVML support")
    }
}

#[cfg(feature = "nvml")]
mod nvml {
    use super::{GpuReadings, GpuTelemetry};
    use crate::error::{OverlayError, Result};
    use crate::metrics::bytes_to_gb;
    use nvml_wrapper::enum_wrappers::device::{Clock, TemperatureSensor};
    use nvml_wrapper::Nvml;

    pub struct NvmlGpu {
        nvml: Option<Nvml>,
        index: u32,
    }

    impl NvmlGpu {
        pub fn init(index: u32) -> Result<Self> {
            let nvml = Nvml::init().map_err(|e| OverlayError::Unavailable(format!("NVML: {}", e)))?;
            nvml.device_by_index(index).map_err(|e| {
                OverlayError::Unavailable(format!("NVIDIA device {}: {}", index, e))
            })?;

            Ok(Self {
                nvml: Some(nvml),
                index,
            })
        }
    }

    impl GpuTelemetry for NvmlGpu {
        fn name(&self) -> Option<String> {
            let nvml = self.nvml.as_ref()?;
            nvml.device_by_index(self.index).ok()?.name().ok()
        }

        fn read(&self) -> GpuReadings {
            let Some(nvml) = self.nvml.as_ref() else {
                return GpuReadings::default();
            };
            let Ok(device) = nvml.device_by_index(self.index) else {
                return GpuReadings::default();
            };

            let memory = device.memory_info().ok();

            GpuReadings {
                gpu_util_percent: device.utilization_rates().ok().map(|u| u.gpu as f32),
                gpu_temp_c: device
                    .temperature(TemperatureSensor::Gpu)
                    .ok()
                    .map(|t| t as f32),
                gpu_mem_used_gb: memory.as_ref().map(|m| bytes_to_gb(m.used)),
                gpu_mem_total_gb: memory.as_ref().map(|m| bytes_to_gb(m.total)),
                gpu_fan_percent: device.fan_speed(0).ok().map(|f| f as f32),
                gpu_clock_mhz: device.clock_info(Clock::Graphics).ok().map(|c| c as f32),
            }
        }

        fn shutdown(&mut self) {
            if let Some(nvml) = self.nvml.take() {
                if let Err(e) = nvml.shutdown() {
                    tracing::debug!("NVML shutdown failed: {}", e);
                }
            }
        }
    }
}
