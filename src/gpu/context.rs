// ============================================================================
// GPU CONTEXT - wgpu Device, Queue, and adapter initialization
// ============================================================================

use std::sync::Arc;

use crate::error::{ComputeError, ComputeResult};

/// Holds the core wgpu resources shared by every synchronized array, the
/// kernel registry and the dispatcher.  Created once at startup.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_name: String,
    /// Largest storage buffer binding the device accepts, in bytes.
    pub max_storage_binding: u64,
}

impl GpuContext {
    /// Create a headless compute context.  Tries hardware first, then falls
    /// back to a software adapter (`force_fallback_adapter`).
    ///
    /// We use `pollster::block_on` because eframe doesn't expose its wgpu
    /// device to application code and the compute core needs its own.
    pub fn new(preferred_gpu: &str) -> ComputeResult<Self> {
        match pollster::block_on(Self::new_async(preferred_gpu, false)) {
            Ok(ctx) => return Ok(ctx),
            Err(err) => {
                tracing::warn!("hardware adapter unavailable ({err}); trying software fallback")
            }
        }
        pollster::block_on(Self::new_async(preferred_gpu, true))
    }

    async fn new_async(preferred_gpu: &str, force_fallback: bool) -> ComputeResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let power = match preferred_gpu.to_lowercase().as_str() {
            "low power" | "integrated" => wgpu::PowerPreference::LowPower,
            _ => wgpu::PowerPreference::HighPerformance,
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: power,
                compatible_surface: None,
                force_fallback_adapter: force_fallback,
            })
            .await
            .ok_or(ComputeError::NoAdapter)?;

        let adapter_name = adapter.get_info().name.clone();
        let limits = adapter.limits();

        // The combination kernels bind up to five storage buffers at once,
        // more than the downlevel default of four.
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("climfractal compute"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size,
                        max_storage_buffers_per_shader_stage: limits
                            .max_storage_buffers_per_shader_stage,
                        max_compute_workgroup_size_x: limits.max_compute_workgroup_size_x,
                        max_compute_workgroup_size_y: limits.max_compute_workgroup_size_y,
                        max_compute_invocations_per_workgroup: limits
                            .max_compute_invocations_per_workgroup,
                        max_compute_workgroups_per_dimension: limits
                            .max_compute_workgroups_per_dimension,
                        ..wgpu::Limits::downlevel_defaults()
                    },
                },
                None,
            )
            .await
            .map_err(|e| ComputeError::Device(e.to_string()))?;

        tracing::info!(
            adapter = %adapter_name,
            fallback = force_fallback,
            "compute device ready"
        );

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name,
            max_storage_binding: limits.max_storage_buffer_binding_size as u64,
        })
    }

    /// Submit a single encoder's commands.  Returns immediately.
    pub fn submit_one(&self, encoder: wgpu::CommandEncoder) -> wgpu::SubmissionIndex {
        self.queue.submit(std::iter::once(encoder.finish()))
    }

    /// Block until every submitted command buffer has finished executing.
    pub fn wait_idle(&self) {
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }
}
