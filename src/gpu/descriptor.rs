// gpu/descriptor.rs — Descriptor extraction pipeline.
//
// GPU counterpart of descriptor.rs: one thread per (sample, keypoint)
// over the 13-point fine pattern plus the coarse centre sample. Reads
// keypoint records straight from the compacted list the peak detector
// produced, so detection and description run in one submission; the
// host only needs the keypoint count (from the detector readback) to
// size the dispatch.

use crate::descriptor::DESCRIPTOR_LENGTH;
use crate::gpu::buffer::{GpuImageBuffer, ImageGeom};
use crate::gpu::device::{GpuDevice, GpuError};
use crate::gpu::signal::{FrameGraph, Signal};
use crate::gpu::{bgl_storage, bgl_uniform, uniform_init};
use crate::image::Complex32;

use wgpu::util::DeviceExt;

/// Threads along x: 13 fine samples + 1 coarse.
const SAMPLE_THREADS: u32 = 14;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DescriptorParams {
    fine_geom: ImageGeom,
    coarse_geom: ImageGeom,
    inv_fine_scale: f32,
    num_keypoints: u32,
    _pad0: u32,
    _pad1: u32,
}

/// GPU-resident descriptor output for up to `capacity` keypoints.
pub struct DescriptorBuffers {
    output: wgpu::Buffer,
    capacity: usize,
}

impl DescriptorBuffers {
    pub fn new(gpu: &GpuDevice, capacity: usize) -> Self {
        assert!(capacity > 0);
        DescriptorBuffers {
            output: gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("descriptors"),
                size: (capacity * DESCRIPTOR_LENGTH * std::mem::size_of::<Complex32>()) as u64,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read the first `count` descriptors back to the host.
    pub fn read(&self, gpu: &GpuDevice, count: usize) -> Result<Vec<Complex32>, GpuError> {
        assert!(count <= self.capacity);
        crate::gpu::peaks::read_buffer(gpu, &self.output, count * DESCRIPTOR_LENGTH)
    }
}

pub struct DescriptorPipeline {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

impl DescriptorPipeline {
    pub fn new(gpu: &GpuDevice) -> Self {
        let module = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("descriptor.wgsl"),
                source: wgpu::ShaderSource::Wgsl(
                    gpu.workgroup_size
                        .specialise(include_str!("../shaders/descriptor.wgsl"))
                        .into(),
                ),
            });

        let bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("descriptor BGL"),
                entries: &[
                    bgl_uniform(0),
                    bgl_storage(1, true),
                    bgl_storage(2, true),
                    bgl_storage(3, true),
                    bgl_storage(4, false),
                ],
            });
        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("descriptor layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        let pipeline = gpu
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("extract_descriptors"),
                layout: Some(&layout),
                module: &module,
                entry_point: "extract_descriptors",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        DescriptorPipeline { pipeline, bgl }
    }

    /// Record extraction of `num_keypoints` descriptors from the two
    /// levels bracketing the keypoints' scale. `keypoints` holds 4-float
    /// records in centred real-image units; `fine_scale` is the fine
    /// level's image-space scale. `deps` must cover the subband and
    /// keypoint writes.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        fine_level: &GpuImageBuffer<Complex32>,
        coarse_level: &GpuImageBuffer<Complex32>,
        fine_scale: f32,
        keypoints: &wgpu::Buffer,
        num_keypoints: usize,
        output: &DescriptorBuffers,
        deps: &[Signal],
    ) -> Signal {
        assert_eq!(fine_level.slices(), 6, "fine level needs 6 subbands");
        assert_eq!(coarse_level.slices(), 6, "coarse level needs 6 subbands");
        assert!(fine_scale > 0.0);
        assert!(num_keypoints <= output.capacity, "descriptor output too small");

        let params = uniform_init(&gpu.device, "DescriptorParams", &DescriptorParams {
            fine_geom: ImageGeom::of(fine_level),
            coarse_geom: ImageGeom::of(coarse_level),
            inv_fine_scale: 1.0 / fine_scale,
            num_keypoints: num_keypoints as u32,
            _pad0: 0,
            _pad1: 0,
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("descriptor bind group"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: fine_level.raw().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: coarse_level.raw().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: keypoints.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: output.output.as_entire_binding(),
                },
            ],
        });

        let signal = graph.record(deps);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("extract_descriptors"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let (dx, dy) = gpu.dispatch_size(SAMPLE_THREADS, num_keypoints as u32);
        pass.dispatch_workgroups(dx, dy, 1);
        signal
    }
}

/// Upload keypoint records as a storage buffer, for driving the
/// descriptor pipeline from host-side keypoints.
pub fn keypoint_buffer(gpu: &GpuDevice, keypoints: &[crate::peaks::Keypoint]) -> wgpu::Buffer {
    gpu.device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("keypoints"),
            contents: bytemuck::cast_slice(keypoints),
            usage: wgpu::BufferUsages::STORAGE,
        })
}
