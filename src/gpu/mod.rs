// gpu/mod.rs — wgpu compute pipeline for the wavelet transform.
//
// Every kernel here mirrors a CPU algorithm in the parent crate; the
// CPU implementations are the authoritative reference and each GPU
// kernel is validated against them element for element.
//
// Architecture: the whole per-frame pipeline
//
//   upload → pad/filter cascade → quad-to-complex → energy maps
//          → find-max → accumulate/concat → descriptors
//
// is recorded as one dependency DAG of compute dispatches over strided
// storage buffers (see buffer.rs for the layout, signal.rs for the DAG
// recording). The host blocks only at the upload and readback
// boundaries; all scratch is allocated once per configuration and
// reused in place.

pub mod buffer;
pub mod descriptor;
pub mod device;
pub mod energy;
pub mod filter;
pub mod peaks;
pub mod quad;
pub mod signal;
pub mod transform;

use wgpu::util::DeviceExt;

/// Create an initialised uniform buffer from a Pod parameter struct.
pub(crate) fn uniform_init<T: bytemuck::Pod>(
    device: &wgpu::Device,
    label: &str,
    value: &T,
) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(value),
        usage: wgpu::BufferUsages::UNIFORM,
    })
}

/// Bind group layout entry for a compute-stage uniform buffer.
pub(crate) fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Bind group layout entry for a compute-stage storage buffer.
pub(crate) fn bgl_storage(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
