#![doc = include_str!("../README.md")]

pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod fragment;
pub mod select;
pub mod shader;

pub use cpu::{CpuFilter, CpuMode};
pub use select::{BackendSelection, DeviceKind, open_device, select_backend};
pub use shader::{FragmentDevice, GpuFilter, ProgramSource, ReferenceDevice};
