// gpu/peaks.rs — Scale-space peak detection and list compaction.
//
// GPU counterpart of peaks.rs and compact.rs. One find_max dispatch per
// energy map appends keypoint records to that level's segment of a flat
// list through an atomic counter; a single-invocation accumulate pass
// turns the counters into saturated offsets; a concat pass gathers the
// segments into one dense list. The counters keep the true totals even
// when a segment overflows, so the host can detect truncation after
// readback.
//
// Per-level capacity is uniform (`capacity` records per level). Counts
// and the combined list are cleared at the start of every recording, so
// surplus slots of an overflowed level read as zeroed records.

use crate::gpu::buffer::{GpuImageBuffer, ImageGeom};
use crate::gpu::device::{GpuDevice, GpuError};
use crate::gpu::signal::{FrameGraph, Signal};
use crate::gpu::{bgl_storage, bgl_uniform, uniform_init};
use crate::peaks::{Keypoint, PeakDetectorConfig, FLOATS_PER_KEYPOINT};

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FindMaxParams {
    map_geom: ImageGeom,
    finer_geom: ImageGeom,
    coarser_geom: ImageGeom,
    map_scale: f32,
    finer_scale: f32,
    coarser_scale: f32,
    threshold: f32,
    eigen_ratio_threshold: f32,
    has_finer: u32,
    has_coarser: u32,
    level: u32,
    capacity: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CompactParams {
    num_levels: u32,
    max_total: u32,
    capacity: u32,
    pos_len: u32,
}

/// Host-side view of one detection run.
#[derive(Debug)]
pub struct PeakResults {
    /// True per-level totals (may exceed the per-level capacity).
    pub counts: Vec<u32>,
    /// Saturated exclusive prefix sum; `offsets[n]..offsets[n+1]` is
    /// level n's span of `keypoints`.
    pub offsets: Vec<u32>,
    /// The compacted records. Spans a level claimed but did not store
    /// are zeroed.
    pub keypoints: Vec<Keypoint>,
}

pub struct PeakDetector {
    find_max: wgpu::ComputePipeline,
    find_bgl: wgpu::BindGroupLayout,
    accumulate: wgpu::ComputePipeline,
    concat: wgpu::ComputePipeline,
    compact_bgl: wgpu::BindGroupLayout,

    counts: wgpu::Buffer,
    cum: wgpu::Buffer,
    lists: wgpu::Buffer,
    combined: wgpu::Buffer,
    /// Bound in the finer/coarser slots of levels with no neighbour.
    dummy: wgpu::Buffer,

    num_levels: usize,
    capacity: usize,
    max_total: usize,
    pub config: PeakDetectorConfig,
}

impl PeakDetector {
    /// `capacity` records per level, at most `max_total` in the combined
    /// list.
    pub fn new(
        gpu: &GpuDevice,
        num_levels: usize,
        capacity: usize,
        max_total: usize,
        config: PeakDetectorConfig,
    ) -> Self {
        assert!(num_levels > 0 && capacity > 0 && max_total > 0);

        let find_module = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("find_max.wgsl"),
                source: wgpu::ShaderSource::Wgsl(
                    gpu.workgroup_size
                        .specialise(include_str!("../shaders/find_max.wgsl"))
                        .into(),
                ),
            });
        let compact_module = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("compact.wgsl"),
                source: wgpu::ShaderSource::Wgsl(
                    gpu.workgroup_size
                        .specialise(include_str!("../shaders/compact.wgsl"))
                        .into(),
                ),
            });

        let find_bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("find_max BGL"),
                entries: &[
                    bgl_uniform(0),
                    bgl_storage(1, true),
                    bgl_storage(2, true),
                    bgl_storage(3, true),
                    bgl_storage(4, false),
                    bgl_storage(5, false),
                ],
            });
        let find_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("find_max layout"),
                bind_group_layouts: &[&find_bgl],
                push_constant_ranges: &[],
            });
        let find_max = gpu
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("find_max"),
                layout: Some(&find_layout),
                module: &find_module,
                entry_point: "find_max",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        let compact_bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("compact BGL"),
                entries: &[
                    bgl_uniform(0),
                    bgl_storage(1, true),
                    bgl_storage(2, false),
                    bgl_storage(3, true),
                    bgl_storage(4, false),
                ],
            });
        let compact_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("compact layout"),
                bind_group_layouts: &[&compact_bgl],
                push_constant_ranges: &[],
            });
        let compact_pipeline = |entry: &str| {
            gpu.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry),
                    layout: Some(&compact_layout),
                    module: &compact_module,
                    entry_point: entry,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
        };

        let storage = |label: &str, bytes: u64| {
            gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: bytes,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        let f32s = std::mem::size_of::<f32>() as u64;
        let u32s = std::mem::size_of::<u32>() as u64;

        PeakDetector {
            find_max,
            find_bgl,
            accumulate: compact_pipeline("accumulate"),
            concat: compact_pipeline("concat"),
            compact_bgl,
            counts: storage("peak counts", num_levels as u64 * u32s),
            cum: storage("peak offsets", (num_levels as u64 + 1) * u32s),
            lists: storage(
                "peak lists",
                (num_levels * capacity * FLOATS_PER_KEYPOINT) as u64 * f32s,
            ),
            combined: storage(
                "peak combined",
                (max_total * FLOATS_PER_KEYPOINT) as u64 * f32s,
            ),
            dummy: storage("peak dummy neighbour", u32s),
            num_levels,
            capacity,
            max_total,
            config,
        }
    }

    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    fn record_find_max(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        maps: &[&GpuImageBuffer<f32>],
        scales: &[f32],
        level: usize,
        deps: &[Signal],
    ) -> Signal {
        let map = maps[level];
        let finer = level.checked_sub(1).map(|m| (maps[m], scales[m]));
        let coarser = (level + 1 < maps.len()).then(|| (maps[level + 1], scales[level + 1]));

        let neighbour_geom = |n: Option<(&GpuImageBuffer<f32>, f32)>| match n {
            Some((img, _)) => ImageGeom::of(img),
            None => bytemuck::Zeroable::zeroed(),
        };
        let params = uniform_init(&gpu.device, "FindMaxParams", &FindMaxParams {
            map_geom: ImageGeom::of(map),
            finer_geom: neighbour_geom(finer),
            coarser_geom: neighbour_geom(coarser),
            map_scale: scales[level],
            finer_scale: finer.map_or(1.0, |(_, s)| s),
            coarser_scale: coarser.map_or(1.0, |(_, s)| s),
            threshold: self.config.threshold,
            eigen_ratio_threshold: self.config.eigen_ratio_threshold,
            has_finer: u32::from(finer.is_some()),
            has_coarser: u32::from(coarser.is_some()),
            level: level as u32,
            capacity: self.capacity as u32,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        });

        let finer_buf = match finer {
            Some((img, _)) => img.raw(),
            None => &self.dummy,
        };
        let coarser_buf = match coarser {
            Some((img, _)) => img.raw(),
            None => &self.dummy,
        };
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("find_max bind group"),
            layout: &self.find_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: map.raw().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: finer_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: coarser_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: self.lists.as_entire_binding(),
                },
            ],
        });

        let signal = graph.record(deps);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("find_max"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.find_max);
        pass.set_bind_group(0, &bind_group, &[]);
        let (dx, dy) = gpu.dispatch_size(map.width() as u32, map.height() as u32);
        pass.dispatch_workgroups(dx, dy, 1);
        signal
    }

    /// Record detection over an energy-map stack (finest first, one
    /// scale per map) followed by compaction. `deps` must cover the
    /// dispatches that wrote the maps. Returns the signal of the concat
    /// pass; results are on the GPU until [`PeakDetector::read_results`].
    pub fn record_detect(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        maps: &[&GpuImageBuffer<f32>],
        scales: &[f32],
        deps: &[Signal],
    ) -> Signal {
        assert_eq!(maps.len(), self.num_levels, "one map per configured level");
        assert_eq!(maps.len(), scales.len(), "one scale per energy map");

        encoder.clear_buffer(&self.counts, 0, None);
        encoder.clear_buffer(&self.combined, 0, None);
        let cleared = graph.record(deps);

        let find_signals: Vec<Signal> = (0..maps.len())
            .map(|level| {
                self.record_find_max(gpu, encoder, graph, maps, scales, level, &[cleared])
            })
            .collect();

        let params = uniform_init(&gpu.device, "CompactParams", &CompactParams {
            num_levels: self.num_levels as u32,
            max_total: self.max_total as u32,
            capacity: self.capacity as u32,
            pos_len: FLOATS_PER_KEYPOINT as u32,
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("compact bind group"),
            layout: &self.compact_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.cum.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.lists.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.combined.as_entire_binding(),
                },
            ],
        });

        let accumulated = graph.record(&find_signals);
        let concatenated = graph.record(&[accumulated]);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("peak compaction"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.accumulate);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(1, 1, 1);
        pass.set_pipeline(&self.concat);
        pass.set_bind_group(0, &bind_group, &[]);
        let (dx, dy) = gpu.dispatch_size(self.capacity as u32, self.num_levels as u32);
        pass.dispatch_workgroups(dx, dy, 1);
        drop(pass);

        concatenated
    }

    /// Read counts, offsets and the compacted keypoints back to the
    /// host. Synchronous; call after submitting the recorded frame.
    pub fn read_results(&self, gpu: &GpuDevice) -> Result<PeakResults, GpuError> {
        let counts: Vec<u32> = read_buffer(gpu, &self.counts, self.num_levels)?;
        let offsets: Vec<u32> = read_buffer(gpu, &self.cum, self.num_levels + 1)?;
        let total = *offsets.last().unwrap_or(&0) as usize;
        let floats: Vec<f32> = read_buffer(gpu, &self.combined, total * FLOATS_PER_KEYPOINT)?;
        let keypoints = bytemuck::cast_slice(&floats).to_vec();
        Ok(PeakResults {
            counts,
            offsets,
            keypoints,
        })
    }
}

/// Copy the first `len` elements of a storage buffer to the host.
pub(crate) fn read_buffer<T: bytemuck::Pod>(
    gpu: &GpuDevice,
    buffer: &wgpu::Buffer,
    len: usize,
) -> Result<Vec<T>, GpuError> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let size_bytes = (len * std::mem::size_of::<T>()) as u64;
    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("read_buffer staging"),
        size: size_bytes,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("read_buffer"),
        });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size_bytes);
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|_| GpuError::ReadbackFailed)?
        .map_err(|_| GpuError::ReadbackFailed)?;

    let out = {
        let mapped = slice.get_mapped_range();
        bytemuck::cast_slice(&mapped).to_vec()
    };
    staging.unmap();
    Ok(out)
}
