use sysinfo::System;
use tracing::info;

use crate::models::QuantizationConfig;

/// Rough resident size of a ~7B checkpoint, used for the memory-pressure note.
const REFERENCE_PARAMS_BILLIONS: f64 = 7.0;

#[derive(Debug, Clone)]
pub struct HostContext {
    pub total_ram_gb: f64,
    pub available_ram_gb: f64,
    pub cpu_count: usize,
}

impl HostContext {
    /// Gigabytes needed to hold `params_billions` parameters at the given bit width.
    pub fn estimate_weights_gb(params_billions: f64, bits: u8) -> f64 {
        params_billions * bits as f64 / 8.0
    }

    /// Heuristic: weights taking more than 40% of total RAM will push the host into swap
    /// if the model ends up on the CPU.
    pub fn is_memory_tight(&self, weights_gb: f64) -> bool {
        if self.total_ram_gb <= 0.0 {
            return true;
        }
        weights_gb / self.total_ram_gb > 0.4
    }

    pub fn summary(&self) -> String {
        format!(
            "{} CPUs, {:.1} GB RAM ({:.1} GB available)",
            self.cpu_count, self.total_ram_gb, self.available_ram_gb
        )
    }
}

pub fn inspect_host() -> HostContext {
    let mut sys = System::new();
    sys.refresh_memory();
    let to_gb = |bytes: u64| bytes as f64 / 1024.0 / 1024.0 / 1024.0;

    let host = HostContext {
        total_ram_gb: to_gb(sys.total_memory()),
        available_ram_gb: to_gb(sys.available_memory()),
        cpu_count: num_cpus::get(),
    };

    info!("🖥️  Host: {}", host.summary());
    host
}

/// Logs whether a reference 7B checkpoint at the chosen bit width fits comfortably.
pub fn log_memory_outlook(host: &HostContext, quantization: Option<&QuantizationConfig>) {
    let bits = quantization.map(|q| q.bits).unwrap_or(16);
    let weights_gb = HostContext::estimate_weights_gb(REFERENCE_PARAMS_BILLIONS, bits);

    if host.is_memory_tight(weights_gb) {
        info!(
            "⚠️  A {:.0}B checkpoint at {} bits needs ~{:.1} GB; that is tight on this host if it lands on the CPU.",
            REFERENCE_PARAMS_BILLIONS, bits, weights_gb
        );
    } else {
        info!(
            "🧠 A {:.0}B checkpoint at {} bits needs ~{:.1} GB; host memory is ample.",
            REFERENCE_PARAMS_BILLIONS, bits, weights_gb
        );
    }
}
