use tracing::info;

use crate::models::{
    DeviceAssignment, DeviceKind, Placement, Precision, QuantizationConfig, TensorRuntime,
};

/// Picks the device kind and precision for this run.
///
/// The accelerator is used whenever the runtime reports one right now. Precision
/// is half when on an accelerator or when quantization is active; otherwise the
/// loading capability keeps its own default.
pub fn resolve_device<R: TensorRuntime + ?Sized>(
    runtime: &R,
    quantization: Option<&QuantizationConfig>,
    placement: Placement,
) -> DeviceAssignment {
    let kind = if runtime.accelerator_available() {
        DeviceKind::Accelerator
    } else {
        DeviceKind::GeneralPurpose
    };

    let precision = if kind == DeviceKind::Accelerator || quantization.is_some() {
        Precision::Half
    } else {
        Precision::Default
    };

    let device = DeviceAssignment {
        kind,
        placement,
        precision,
    };
    info!("Resolved device: {}", device);
    device
}
