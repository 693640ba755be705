//! CUDA fragment device.
//!
//! The enhancement program compiled once via NVRTC and launched as a 2D
//! grid, one thread per output pixel, which is what the full-screen quad's
//! fragment stage does on a raster pipeline.  Frames are staged through two
//! device buffers reused across draws and reallocated on size change only.

use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaFunction, CudaSlice, LaunchAsync, LaunchConfig};
use tracing::{debug, info};

use senga_core::error::{EngineError, Result};
use senga_core::frame::Frame;

use crate::fragment::{CUDA_KERNEL_NAME, Uniforms};
use crate::shader::{FragmentDevice, ProgramSource};

const MODULE_NAME: &str = "senga_enhance";
const KERNEL_NAMES: &[&str] = &[CUDA_KERNEL_NAME];

/// Number of CUDA devices visible to the driver.
pub fn device_count() -> Result<usize> {
    let count = CudaDevice::count().map_err(|e| EngineError::Device(format!("cuInit: {e}")))?;
    Ok(count.max(0) as usize)
}

pub struct CudaFragmentDevice {
    device: Arc<CudaDevice>,
    name: String,
    kernel: Option<CudaFunction>,
    input: Option<CudaSlice<u8>>,
    output: Option<CudaSlice<u8>>,
}

impl CudaFragmentDevice {
    /// Open device `ordinal`.
    ///
    /// # Errors
    ///
    /// [`EngineError::Device`] if the driver or device is unavailable.
    pub fn new(ordinal: usize) -> Result<Self> {
        let device = CudaDevice::new(ordinal)
            .map_err(|e| EngineError::Device(format!("CUDA device {ordinal}: {e}")))?;
        let name = device
            .name()
            .map(|n| format!("cuda:{ordinal} ({n})"))
            .unwrap_or_else(|_| format!("cuda:{ordinal}"));
        Ok(Self {
            device,
            name,
            kernel: None,
            input: None,
            output: None,
        })
    }

    fn ensure_buffers(&mut self, len: usize) -> Result<()> {
        let fits = |slot: &Option<CudaSlice<u8>>| slot.as_ref().is_some_and(|b| b.len() == len);
        if fits(&self.input) && fits(&self.output) {
            return Ok(());
        }
        debug!(bytes = len, "Reallocating CUDA frame buffers");
        let alloc = |device: &Arc<CudaDevice>| {
            device
                .alloc_zeros::<u8>(len)
                .map_err(|e| EngineError::Device(format!("alloc {len} bytes: {e}")))
        };
        self.input = Some(alloc(&self.device)?);
        self.output = Some(alloc(&self.device)?);
        Ok(())
    }
}

impl FragmentDevice for CudaFragmentDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_program(&mut self, source: &ProgramSource) -> Result<()> {
        let ptx = cudarc::nvrtc::compile_ptx_with_opts(
            source.kernel_cuda,
            cudarc::nvrtc::CompileOptions {
                ftz: Some(true),
                prec_div: Some(false),
                prec_sqrt: Some(false),
                ..Default::default()
            },
        )
        .map_err(|e| EngineError::BackendInit(format!("NVRTC compile: {e}")))?;

        self.device
            .load_ptx(ptx, MODULE_NAME, KERNEL_NAMES)
            .map_err(|e| EngineError::BackendInit(format!("module load: {e}")))?;

        let kernel = self
            .device
            .get_func(MODULE_NAME, CUDA_KERNEL_NAME)
            .ok_or_else(|| {
                EngineError::BackendInit(format!(
                    "Kernel function '{CUDA_KERNEL_NAME}' not found in module '{MODULE_NAME}'"
                ))
            })?;
        self.kernel = Some(kernel);
        info!(device = %self.name, "NVRTC: compiled enhancement kernel");
        Ok(())
    }

    fn draw(&mut self, input: &Frame, uniforms: &Uniforms, output: &mut Frame) -> Result<()> {
        let Some(kernel) = self.kernel.clone() else {
            return Err(EngineError::Device("draw before program build".into()));
        };
        let len = input.as_bytes().len();
        self.ensure_buffers(len)?;
        let (Some(d_in), Some(d_out)) = (self.input.as_mut(), self.output.as_mut()) else {
            return Err(EngineError::Device("frame buffers missing".into()));
        };

        self.device
            .htod_sync_copy_into(input.as_bytes(), d_in)
            .map_err(|e| EngineError::Device(format!("upload: {e}")))?;

        let config = launch_config_2d(input.width(), input.height());
        // SAFETY:
        // - `d_in` and `d_out` are `width * height * 4` bytes on this device.
        // - The kernel guards `x < width && y < height` before any access.
        // - Both buffers outlive the launch: the copy below synchronizes.
        unsafe {
            kernel.launch(
                config,
                (
                    &*d_in,
                    &mut *d_out,
                    input.width() as i32,
                    input.height() as i32,
                    uniforms.sharpness,
                    uniforms.edge_enhance,
                    uniforms.time,
                ),
            )
        }
        .map_err(|e| EngineError::Device(format!("launch: {e}")))?;

        self.device
            .dtoh_sync_copy_into(d_out, output.as_bytes_mut())
            .map_err(|e| EngineError::Device(format!("download: {e}")))?;
        Ok(())
    }

    fn release(&mut self) {
        self.kernel = None;
        self.input = None;
        self.output = None;
    }
}

fn launch_config_2d(width: u32, height: u32) -> LaunchConfig {
    let block = (16u32, 16u32, 1u32);
    LaunchConfig {
        grid_dim: (width.div_ceil(block.0), height.div_ceil(block.1), 1),
        block_dim: block,
        shared_mem_bytes: 0,
    }
}
