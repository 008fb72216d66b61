//! Device and precision policy.
//!
//! Both resolvers are pure: they translate a caller preference plus what the
//! runtime reports into a concrete value, and never fail.

use crate::types::{AcceleratorKind, Device, DevicePreference, Precision, PrecisionPreference};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

const NVIDIA_DRIVER_PROC: &str = "/proc/driver/nvidia/version";

/// Memory utilization reported for an accelerator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub memory_allocated_bytes: u64,
    pub memory_reserved_bytes: u64,
}

impl DeviceStats {
    pub fn allocated_gb(&self) -> f64 {
        self.memory_allocated_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    pub fn reserved_gb(&self) -> f64 {
        self.memory_reserved_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// What the runtime can execute on
#[cfg_attr(test, mockall::automock)]
pub trait CapabilityProbe: Send + Sync {
    /// Primary accelerator (CUDA) is usable
    fn accelerator_available(&self) -> bool;

    /// Secondary accelerator kind (Metal) is usable
    fn secondary_accelerator_available(&self) -> bool;

    /// Utilization figures for `device`, when obtainable
    fn device_stats(&self, device: Device) -> Option<DeviceStats>;
}

/// Probes the host the process runs on
#[derive(Debug, Clone, Default)]
pub struct SystemProbe;

impl CapabilityProbe for SystemProbe {
    fn accelerator_available(&self) -> bool {
        if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
            let visible = visible.trim();
            if visible.is_empty() || visible == "-1" {
                return false;
            }
        }
        Path::new(NVIDIA_DRIVER_PROC).exists()
    }

    fn secondary_accelerator_available(&self) -> bool {
        cfg!(all(target_os = "macos", target_arch = "aarch64"))
    }

    fn device_stats(&self, _device: Device) -> Option<DeviceStats> {
        None
    }
}

/// Reports fixed capabilities
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    pub accelerator: bool,
    pub secondary_accelerator: bool,
    pub stats: Option<DeviceStats>,
}

impl StaticProbe {
    pub fn cpu_only() -> Self {
        Self::default()
    }

    pub fn with_accelerator() -> Self {
        Self {
            accelerator: true,
            ..Default::default()
        }
    }

    pub fn with_stats(mut self, stats: DeviceStats) -> Self {
        self.stats = Some(stats);
        self
    }
}

impl CapabilityProbe for StaticProbe {
    fn accelerator_available(&self) -> bool {
        self.accelerator
    }

    fn secondary_accelerator_available(&self) -> bool {
        self.secondary_accelerator
    }

    fn device_stats(&self, device: Device) -> Option<DeviceStats> {
        if device.is_accelerator() {
            self.stats
        } else {
            None
        }
    }
}

pub struct DeviceResolver;

impl DeviceResolver {
    /// Explicit preferences are trusted as given; `auto` picks the primary
    /// accelerator, then the secondary kind, then the CPU.
    pub fn resolve(preference: DevicePreference, probe: &dyn CapabilityProbe) -> Device {
        let device = match preference {
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Accelerator(kind) => Device::Accelerator(kind),
            DevicePreference::Auto => {
                if probe.accelerator_available() {
                    Device::Accelerator(AcceleratorKind::Cuda)
                } else if probe.secondary_accelerator_available() {
                    Device::Accelerator(AcceleratorKind::Metal)
                } else {
                    Device::Cpu
                }
            }
        };
        debug!("Resolved device {} -> {}", preference, device);
        device
    }
}

pub struct PrecisionResolver;

impl PrecisionResolver {
    /// `auto` is half precision on accelerators and full precision on CPU
    pub fn resolve(preference: PrecisionPreference, device: Device) -> Precision {
        let precision = match preference {
            PrecisionPreference::Explicit(precision) => precision,
            PrecisionPreference::Auto if device.is_accelerator() => Precision::Float16,
            PrecisionPreference::Auto => Precision::Float32,
        };
        debug!(
            "Resolved precision {} on {} -> {}",
            preference, device, precision
        );
        precision
    }
}
