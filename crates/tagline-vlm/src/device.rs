use candle_core::{DType, Device};
use tagline::model::DeviceKind;

/// Pick the candle device and compute dtype for the requested placement.
///
/// `DeviceKind::Gpu` falls back to the CPU with a warning when no accelerator
/// is compiled in or available.
pub fn select_device(kind: DeviceKind) -> (Device, DType) {
    if kind == DeviceKind::Cpu {
        return (Device::Cpu, DType::F32);
    }

    #[cfg(feature = "cuda")]
    match Device::cuda_if_available(0) {
        Ok(device) if device.is_cuda() => return (device, DType::BF16),
        Ok(_) => log::warn!("CUDA not available, defaulting to CPU"),
        Err(e) => log::warn!("CUDA not available, defaulting to CPU: {e}"),
    }

    #[cfg(feature = "metal")]
    match Device::new_metal(0) {
        Ok(device) => return (device, DType::F32),
        Err(e) => log::warn!("Metal not available, defaulting to CPU: {e}"),
    }

    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    log::warn!("Built without accelerator support (enable the `cuda` or `metal` feature), running on CPU");

    (Device::Cpu, DType::F32)
}

/// Name of the accelerator candle can reach, `None` when only the CPU is usable.
pub fn available_accelerator() -> Option<&'static str> {
    if candle_core::utils::cuda_is_available() {
        Some("cuda")
    } else if candle_core::utils::metal_is_available() {
        Some("metal")
    } else {
        None
    }
}

/// The placement actually obtained for a device.
pub fn device_kind(device: &Device) -> DeviceKind {
    if device.is_cpu() {
        DeviceKind::Cpu
    } else {
        DeviceKind::Gpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_request_stays_on_cpu() {
        let (device, dtype) = select_device(DeviceKind::Cpu);
        assert!(device.is_cpu());
        assert_eq!(dtype, DType::F32);
        assert_eq!(device_kind(&device), DeviceKind::Cpu);
    }

    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    #[test]
    fn cpu_build_has_no_accelerator() {
        assert_eq!(available_accelerator(), None);
    }
}
