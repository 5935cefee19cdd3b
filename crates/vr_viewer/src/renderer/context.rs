use anyhow::{anyhow, bail, Result};
use trisort::MAX_TRIANGLE;

/// Workgroup memory the large sort kernel needs for its depth array.
pub const SORT_WORKGROUP_STORAGE: u32 = MAX_TRIANGLE * 4;
/// Storage buffers bound by one sort pass.
pub const SORT_STORAGE_BUFFERS: u32 = 8;

/// Holds the headless device and queue shared by the sort backend and the eye renderer.
pub struct GfxContext {
    pub device: wgpu::Device,
    pub queue:  wgpu::Queue,
    pub info:   wgpu::AdapterInfo,
}

impl GfxContext {
    /// Creates a compute-capable device with no presentation surface; eye
    /// images are handed to the compositor instead.
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference:       wgpu::PowerPreference::HighPerformance,
                compatible_surface:     None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow!("Failed to find a suitable GPU adapter."))?;
        let info = adapter.get_info();

        // The large kernel keeps one depth per triangle in workgroup memory.
        let available = adapter.limits();
        if available.max_compute_workgroup_storage_size < SORT_WORKGROUP_STORAGE {
            bail!(
                "Adapter '{}' offers {} bytes of workgroup storage, sort kernels need {}",
                info.name,
                available.max_compute_workgroup_storage_size,
                SORT_WORKGROUP_STORAGE
            );
        }
        if available.max_storage_buffers_per_shader_stage < SORT_STORAGE_BUFFERS {
            bail!(
                "Adapter '{}' binds {} storage buffers per stage, sort kernels need {}",
                info.name,
                available.max_storage_buffers_per_shader_stage,
                SORT_STORAGE_BUFFERS
            );
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label:             Some("VR Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits:   wgpu::Limits {
                        max_compute_workgroup_storage_size: SORT_WORKGROUP_STORAGE,
                        max_storage_buffers_per_shader_stage: SORT_STORAGE_BUFFERS,
                        max_storage_buffer_binding_size: available.max_storage_buffer_binding_size,
                        max_buffer_size: available.max_buffer_size,
                        ..wgpu::Limits::default()
                    },
                },
                None, // no trace
            )
            .await?;

        // Errors we care about are captured with error scopes; anything else is logged.
        device.on_uncaptured_error(Box::new(|e| {
            log::error!("Uncaptured GPU error: {}", e);
        }));

        log::info!("GPU adapter: {} ({:?})", info.name, info.backend);
        Ok(Self { device, queue, info })
    }
}
