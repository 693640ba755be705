//! One-time backend selection for a processor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use senga_core::backend::FilterBackend;
use senga_core::error::{EngineError, Result};

use crate::cpu::CpuFilter;
use crate::shader::{FragmentDevice, GpuFilter, ReferenceDevice};

/// Which fragment device to open for the GPU path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// CUDA when compiled in and present, else the reference device.
    #[default]
    Auto,
    Cuda,
    Reference,
}

impl FromStr for DeviceKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cuda" => Ok(Self::Cuda),
            "reference" | "ref" => Ok(Self::Reference),
            other => Err(EngineError::Config(format!(
                "Unknown device '{other}' (expected auto, cuda or reference)"
            ))),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Cuda => "cuda",
            Self::Reference => "reference",
        })
    }
}

/// Open a fragment device of the requested kind.
///
/// # Errors
///
/// [`EngineError::BackendInit`] when `Cuda` is requested but the build has no
/// CUDA support, or [`EngineError::Device`] when the device cannot be opened.
pub fn open_device(kind: DeviceKind) -> Result<Box<dyn FragmentDevice>> {
    match kind {
        DeviceKind::Reference => Ok(Box::new(ReferenceDevice::new())),
        DeviceKind::Cuda => open_cuda(),
        DeviceKind::Auto => match open_cuda() {
            Ok(device) => Ok(device),
            Err(err) => {
                info!(error = %err, "CUDA device unavailable; using reference fragment device");
                Ok(Box::new(ReferenceDevice::new()))
            }
        },
    }
}

#[cfg(feature = "cuda")]
fn open_cuda() -> Result<Box<dyn FragmentDevice>> {
    Ok(Box::new(crate::cuda::CudaFragmentDevice::new(0)?))
}

#[cfg(not(feature = "cuda"))]
fn open_cuda() -> Result<Box<dyn FragmentDevice>> {
    Err(EngineError::BackendInit(
        "senga-filters was built without the `cuda` feature".into(),
    ))
}

/// Result of backend selection.
pub struct BackendSelection {
    pub backend: Box<dyn FilterBackend>,
    /// Why the GPU path was not taken, when it was requested.
    pub init_fault: Option<EngineError>,
}

/// Build the GPU backend on `device`, or the CPU backend when no device is
/// given or the program does not build.  The choice is final.
pub fn select_backend(
    device: Option<Result<Box<dyn FragmentDevice>>>,
    cpu: impl FnOnce() -> CpuFilter,
) -> BackendSelection {
    let fault = match device {
        None => None,
        Some(opened) => match opened.and_then(GpuFilter::new) {
            Ok(gpu) => {
                return BackendSelection {
                    backend: Box::new(gpu),
                    init_fault: None,
                };
            }
            Err(err) => {
                let err = match err {
                    EngineError::BackendInit(_) => err,
                    other => EngineError::BackendInit(other.to_string()),
                };
                warn!(error = %err, code = err.error_code(), "GPU backend unavailable; falling back to CPU");
                Some(err)
            }
        },
    };
    BackendSelection {
        backend: Box::new(cpu()),
        init_fault: fault,
    }
}

#[cfg(test)]
mod tests {
    use senga_core::backend::BackendKind;

    use super::*;

    #[test]
    fn reference_device_selects_gpu() {
        let selection = select_backend(
            Some(open_device(DeviceKind::Reference)),
            CpuFilter::settings_driven,
        );
        assert_eq!(selection.backend.kind(), BackendKind::Gpu);
        assert!(selection.init_fault.is_none());
    }

    #[test]
    fn no_device_selects_cpu_without_fault() {
        let selection = select_backend(None, CpuFilter::fixed_preset);
        assert_eq!(selection.backend.kind(), BackendKind::Cpu);
        assert!(selection.init_fault.is_none());
    }

    #[test]
    fn device_open_failure_is_recorded_as_backend_init() {
        let selection = select_backend(
            Some(Err(EngineError::Device("no driver".into()))),
            CpuFilter::settings_driven,
        );
        assert_eq!(selection.backend.kind(), BackendKind::Cpu);
        let fault = selection.init_fault.expect("fault recorded");
        assert_eq!(fault.error_code(), 200);
    }

    #[test]
    fn device_kind_parses() {
        assert_eq!("CUDA".parse::<DeviceKind>().ok(), Some(DeviceKind::Cuda));
        assert!("metal".parse::<DeviceKind>().is_err());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn auto_falls_back_to_reference_without_cuda() {
        let device = open_device(DeviceKind::Auto).expect("auto always opens");
        assert_eq!(device.name(), "reference");
        assert!(open_device(DeviceKind::Cuda).is_err());
    }
}
