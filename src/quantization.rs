use tracing::debug;

use crate::config::RunConfig;
use crate::models::{CapabilityRecord, Precision, QuantizationConfig};

pub const QUANT_BITS: u8 = 4;
pub const QUANT_SCHEME: &str = "nf4";

/// Decides whether to load in 4-bit.
///
/// Returns `None` when quantization is unsupported, opted out with `--no-quant`,
/// or not requested by the preset. Otherwise the parameters are fixed policy:
/// 4-bit weights, half-precision compute, nf4, double quantization. That is the
/// usual fit for ~7B checkpoints on memory-constrained accelerators.
pub fn build_quantization_config(
    capabilities: &CapabilityRecord,
    config: &RunConfig,
) -> Option<QuantizationConfig> {
    if !capabilities.has_quantization_support {
        debug!("Quantization not supported in this environment");
        return None;
    }
    if config.disable_quantization {
        debug!("Quantization disabled with --no-quant");
        return None;
    }
    if !config.preset.requests_quantization() {
        debug!("Preset {:?} loads at default precision", config.preset);
        return None;
    }

    Some(QuantizationConfig {
        enabled: true,
        bits: QUANT_BITS,
        compute_precision: Precision::Half,
        quant_scheme: QUANT_SCHEME,
        double_quant: true,
    })
}
