// gpu/filter.rs — Pad and convolution compute pipelines.
//
// GPU counterparts of image.rs `pad_x`/`pad_y` and the convolutions in
// convolution.rs. The filter kernels never branch on borders: they read
// the mirror extension the pad kernels materialised, so every record_*
// call takes the pad dispatch's signal as a predecessor.
//
// Filter taps live in small storage buffers created once per transform
// configuration (`FilterBank`); per-dispatch parameters go in throwaway
// uniform buffers, as the pipelines are recorded a handful of times per
// frame.

use crate::filters::{level1_filters, level2_filters};
use crate::gpu::buffer::{GpuImageBuffer, ImageGeom};
use crate::gpu::device::GpuDevice;
use crate::gpu::signal::{FrameGraph, Signal};
use crate::gpu::{bgl_storage, bgl_uniform, uniform_init};
use crate::image::Element;

use wgpu::util::DeviceExt;

fn shader_module(gpu: &GpuDevice, label: &str, template: &str) -> wgpu::ShaderModule {
    gpu.device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(gpu.workgroup_size.specialise(template).into()),
        })
}

fn compute_pipeline(
    gpu: &GpuDevice,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry: &str,
) -> wgpu::ComputePipeline {
    gpu.device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry),
            layout: Some(layout),
            module,
            entry_point: entry,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        })
}

// ---------------------------------------------------------------------------
// Filter bank
// ---------------------------------------------------------------------------

/// GPU-resident tap buffers for one transform configuration.
///
/// `l2_triple` holds the level-≥2 row filters concatenated in the order
/// the fused kernel expects: lowpass, bandpass, highpass.
pub struct FilterBank {
    pub l1_h0: wgpu::Buffer,
    pub l1_h1: wgpu::Buffer,
    pub l1_bp: wgpu::Buffer,
    pub l2_h0: wgpu::Buffer,
    pub l2_h1: wgpu::Buffer,
    pub l2_bp: wgpu::Buffer,
    pub l2_triple: wgpu::Buffer,
    pub l1_h0_len: usize,
    pub l1_h1_len: usize,
    pub l1_bp_len: usize,
    pub l2_len: usize,
}

impl FilterBank {
    pub fn new(gpu: &GpuDevice, scale_factor: f32) -> Self {
        let l1 = level1_filters(scale_factor);
        let l2 = level2_filters(scale_factor);

        let taps = |label: &str, coeffs: &[f32]| {
            gpu.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(coeffs),
                    usage: wgpu::BufferUsages::STORAGE,
                })
        };

        let mut triple = Vec::with_capacity(3 * l2.h0.len());
        triple.extend_from_slice(&l2.h0);
        triple.extend_from_slice(&l2.bp);
        triple.extend_from_slice(&l2.h1);

        FilterBank {
            l1_h0: taps("filter l1 h0", &l1.h0),
            l1_h1: taps("filter l1 h1", &l1.h1),
            l1_bp: taps("filter l1 bp", &l1.bp),
            l2_h0: taps("filter l2 h0", &l2.h0),
            l2_h1: taps("filter l2 h1", &l2.h1),
            l2_bp: taps("filter l2 bp", &l2.bp),
            l2_triple: taps("filter l2 triple", &triple),
            l1_h0_len: l1.h0.len(),
            l1_h1_len: l1.h1.len(),
            l1_bp_len: l1.bp.len(),
            l2_len: l2.h0.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pad pipeline
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct PadParams {
    geom: ImageGeom,
}

/// Mirror-border materialisation (pad.wgsl).
pub struct PadPipeline {
    pad_x: wgpu::ComputePipeline,
    pad_y: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

impl PadPipeline {
    pub fn new(gpu: &GpuDevice) -> Self {
        let module = shader_module(gpu, "pad.wgsl", include_str!("../shaders/pad.wgsl"));

        let bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("pad BGL"),
                entries: &[bgl_uniform(0), bgl_storage(1, false)],
            });
        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("pad layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        PadPipeline {
            pad_x: compute_pipeline(gpu, &layout, &module, "pad_x"),
            pad_y: compute_pipeline(gpu, &layout, &module, "pad_y"),
            bgl,
        }
    }

    fn record(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        img: &GpuImageBuffer<f32>,
        horizontal: bool,
        deps: &[Signal],
    ) -> Signal {
        let params = uniform_init(&gpu.device, "PadParams", &PadParams {
            geom: ImageGeom::of(img),
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pad bind group"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: img.raw().as_entire_binding(),
                },
            ],
        });

        let signal = graph.record(deps);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("pad"),
            timestamp_writes: None,
        });
        if horizontal {
            pass.set_pipeline(&self.pad_x);
            let (dx, dy) = gpu.dispatch_size(img.padding() as u32, img.height() as u32);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(dx, dy, img.slices() as u32);
        } else {
            pass.set_pipeline(&self.pad_y);
            let (dx, dy) = gpu.dispatch_size(img.width() as u32, img.padding() as u32);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(dx, dy, img.slices() as u32);
        }
        signal
    }

    /// Fill the left/right borders of every slice.
    pub fn record_x(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        img: &GpuImageBuffer<f32>,
        deps: &[Signal],
    ) -> Signal {
        self.record(gpu, encoder, graph, img, true, deps)
    }

    /// Fill the top/bottom borders of every slice.
    pub fn record_y(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        img: &GpuImageBuffer<f32>,
        deps: &[Signal],
    ) -> Signal {
        self.record(gpu, encoder, graph, img, false, deps)
    }
}

// ---------------------------------------------------------------------------
// Non-decimating filter pipeline
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FilterParams {
    in_geom: ImageGeom,
    out_geom: ImageGeom,
    filter_len: u32,
    slice_in: u32,
    slice_out: u32,
    _pad: u32,
}

/// Per-dispatch slice routing for the convolution pipelines.
#[derive(Copy, Clone, Debug, Default)]
pub struct SliceRoute {
    pub slice_in: usize,
    pub slice_out: usize,
}

/// Odd-length FIR convolution (filter.wgsl).
///
/// The output extent may exceed the input's by one along the filtered
/// axis (level-1 evenisation); anything else is a configuration bug and
/// asserts.
pub struct FilterPipeline {
    filter_x: wgpu::ComputePipeline,
    filter_y: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

impl FilterPipeline {
    pub fn new(gpu: &GpuDevice) -> Self {
        let module = shader_module(gpu, "filter.wgsl", include_str!("../shaders/filter.wgsl"));

        let bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("filter BGL"),
                entries: &[
                    bgl_uniform(0),
                    bgl_storage(1, true),
                    bgl_storage(2, true),
                    bgl_storage(3, false),
                ],
            });
        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("filter layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        FilterPipeline {
            filter_x: compute_pipeline(gpu, &layout, &module, "filter_x"),
            filter_y: compute_pipeline(gpu, &layout, &module, "filter_y"),
            bgl,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        input: &GpuImageBuffer<f32>,
        taps: &wgpu::Buffer,
        filter_len: usize,
        route: SliceRoute,
        output: &GpuImageBuffer<f32>,
        horizontal: bool,
        deps: &[Signal],
    ) -> Signal {
        assert!(filter_len % 2 == 1, "non-decimating filters have odd length");
        assert!(
            (filter_len - 1) / 2 <= input.padding(),
            "filter half-width {} exceeds padding {}",
            (filter_len - 1) / 2,
            input.padding(),
        );
        if horizontal {
            assert!(
                (input.width()..=input.width() + 1).contains(&output.width())
                    && output.height() == input.height(),
            );
        } else {
            assert!(
                (input.height()..=input.height() + 1).contains(&output.height())
                    && output.width() == input.width(),
            );
        }

        let params = uniform_init(&gpu.device, "FilterParams", &FilterParams {
            in_geom: ImageGeom::of(input),
            out_geom: ImageGeom::of(output),
            filter_len: filter_len as u32,
            slice_in: route.slice_in as u32,
            slice_out: route.slice_out as u32,
            _pad: 0,
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("filter bind group"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input.raw().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: taps.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: output.raw().as_entire_binding(),
                },
            ],
        });

        let signal = graph.record(deps);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("filter"),
            timestamp_writes: None,
        });
        pass.set_pipeline(if horizontal { &self.filter_x } else { &self.filter_y });
        pass.set_bind_group(0, &bind_group, &[]);
        let (dx, dy) = gpu.dispatch_size(output.width() as u32, output.height() as u32);
        pass.dispatch_workgroups(dx, dy, 1);
        signal
    }

    /// Row convolution; needs the input's pad_x signal among `deps`.
    #[allow(clippy::too_many_arguments)]
    pub fn record_x(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        input: &GpuImageBuffer<f32>,
        taps: &wgpu::Buffer,
        filter_len: usize,
        route: SliceRoute,
        output: &GpuImageBuffer<f32>,
        deps: &[Signal],
    ) -> Signal {
        self.record(
            gpu, encoder, graph, input, taps, filter_len, route, output, true, deps,
        )
    }

    /// Column convolution; needs the input's pad_y signal among `deps`.
    #[allow(clippy::too_many_arguments)]
    pub fn record_y(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        input: &GpuImageBuffer<f32>,
        taps: &wgpu::Buffer,
        filter_len: usize,
        route: SliceRoute,
        output: &GpuImageBuffer<f32>,
        deps: &[Signal],
    ) -> Signal {
        self.record(
            gpu, encoder, graph, input, taps, filter_len, route, output, false, deps,
        )
    }
}

// ---------------------------------------------------------------------------
// Decimating filter pipeline
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DecimateParams {
    in_geom: ImageGeom,
    out_geom: ImageGeom,
    filter_len: u32,
    swap: u32,
    offset: i32,
    slice_in: u32,
    slice_out: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

/// Read-origin offset of the decimating kernels: `len - 2`, plus one
/// extra symmetric-extension sample when the pre-decimation extent is
/// not a multiple of 4.
fn decimate_offset(extent: usize, filter_len: usize) -> i32 {
    (filter_len - 2 + usize::from(extent % 4 != 0)) as i32
}

/// Even-length two-tree decimating convolution (decimate.wgsl).
pub struct DecimatePipeline {
    decimate_x: wgpu::ComputePipeline,
    decimate_y: wgpu::ComputePipeline,
    decimate_triple_x: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

impl DecimatePipeline {
    pub fn new(gpu: &GpuDevice) -> Self {
        let module =
            shader_module(gpu, "decimate.wgsl", include_str!("../shaders/decimate.wgsl"));

        let bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("decimate BGL"),
                entries: &[
                    bgl_uniform(0),
                    bgl_storage(1, true),
                    bgl_storage(2, true),
                    bgl_storage(3, false),
                ],
            });
        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("decimate layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        DecimatePipeline {
            decimate_x: compute_pipeline(gpu, &layout, &module, "decimate_x"),
            decimate_y: compute_pipeline(gpu, &layout, &module, "decimate_y"),
            decimate_triple_x: compute_pipeline(gpu, &layout, &module, "decimate_triple_x"),
            bgl,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        pipeline: &wgpu::ComputePipeline,
        input: &GpuImageBuffer<f32>,
        taps: &wgpu::Buffer,
        filter_len: usize,
        swap: bool,
        route: SliceRoute,
        output: &GpuImageBuffer<f32>,
        horizontal: bool,
        deps: &[Signal],
    ) -> Signal {
        assert!(filter_len % 2 == 0, "decimating filters have even length");
        let in_extent = if horizontal { input.width() } else { input.height() };
        let out_extent = if horizontal { output.width() } else { output.height() };
        assert_eq!(
            out_extent,
            crate::dtcwt::decimated_extent(in_extent),
            "decimated output extent mismatch",
        );
        assert!(
            filter_len - 1 <= input.padding(),
            "decimating read reach {} exceeds padding {}",
            filter_len - 1,
            input.padding(),
        );

        let params = uniform_init(&gpu.device, "DecimateParams", &DecimateParams {
            in_geom: ImageGeom::of(input),
            out_geom: ImageGeom::of(output),
            filter_len: filter_len as u32,
            swap: u32::from(swap),
            offset: decimate_offset(in_extent, filter_len),
            slice_in: route.slice_in as u32,
            slice_out: route.slice_out as u32,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("decimate bind group"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input.raw().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: taps.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: output.raw().as_entire_binding(),
                },
            ],
        });

        let signal = graph.record(deps);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("decimate"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        // One thread per output pair along the decimated axis.
        let (dx, dy) = if horizontal {
            gpu.dispatch_size(
                (output.width() as u32).div_ceil(2),
                output.height() as u32,
            )
        } else {
            gpu.dispatch_size(
                output.width() as u32,
                (output.height() as u32).div_ceil(2),
            )
        };
        pass.dispatch_workgroups(dx, dy, 1);
        signal
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_x(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        input: &GpuImageBuffer<f32>,
        taps: &wgpu::Buffer,
        filter_len: usize,
        swap: bool,
        route: SliceRoute,
        output: &GpuImageBuffer<f32>,
        deps: &[Signal],
    ) -> Signal {
        self.record(
            gpu,
            encoder,
            graph,
            &self.decimate_x,
            input,
            taps,
            filter_len,
            swap,
            route,
            output,
            true,
            deps,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_y(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        input: &GpuImageBuffer<f32>,
        taps: &wgpu::Buffer,
        filter_len: usize,
        swap: bool,
        route: SliceRoute,
        output: &GpuImageBuffer<f32>,
        deps: &[Signal],
    ) -> Signal {
        self.record(
            gpu,
            encoder,
            graph,
            &self.decimate_y,
            input,
            taps,
            filter_len,
            swap,
            route,
            output,
            false,
            deps,
        )
    }

    /// Fused row pass for output-producing levels: applies the bank's
    /// three level-≥2 filters over one read of the input, writing the
    /// lowpass / bandpass / highpass results to output slices 0 / 1 / 2
    /// (tree pair swapped on slices 1 and 2). Scheduling optimisation
    /// only — results match three separate record_x calls.
    #[allow(clippy::too_many_arguments)]
    pub fn record_triple_x(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        input: &GpuImageBuffer<f32>,
        bank: &FilterBank,
        output: &GpuImageBuffer<f32>,
        deps: &[Signal],
    ) -> Signal {
        assert!(output.slices() >= 3, "triple pass writes slices 0..3");
        self.record(
            gpu,
            encoder,
            graph,
            &self.decimate_triple_x,
            input,
            &bank.l2_triple,
            bank.l2_len,
            false, // per-slice swap pattern is fixed in the kernel
            SliceRoute::default(),
            output,
            true,
            deps,
        )
    }
}

/// Record an upload as a graph node: `queue.write_buffer` data is
/// committed ahead of the frame's submit, so it precedes every dispatch
/// recorded after it.
pub fn record_upload<T: Element>(
    gpu: &GpuDevice,
    graph: &mut FrameGraph,
    dst: &GpuImageBuffer<T>,
    src: &crate::image::ImageBuffer<T>,
) -> Signal {
    dst.upload(gpu, src);
    graph.record(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convolution;
    use crate::image::ImageBuffer;

    // ---- Pure CPU tests ----------------------------------------------

    #[test]
    fn test_decimate_offset_parities() {
        // 14-tap set: len - 2 = 12, +1 when the extent needs extending.
        assert_eq!(decimate_offset(16, 14), 12);
        assert_eq!(decimate_offset(14, 14), 13);
        assert_eq!(decimate_offset(18, 14), 13);
    }

    #[test]
    fn test_params_layouts() {
        // Must match the WGSL uniform structs.
        assert_eq!(std::mem::size_of::<PadParams>(), 32);
        assert_eq!(std::mem::size_of::<FilterParams>(), 80);
        assert_eq!(std::mem::size_of::<DecimateParams>(), 96);
    }

    // ---- GPU integration tests (subprocess isolation) ----------------

    fn run_gpu_test_in_subprocess(test_name: &str) -> String {
        let output = std::process::Command::new("cargo")
            .args([
                "test", "--lib", "--",
                test_name, "--exact", "--ignored", "--nocapture",
            ])
            .output()
            .unwrap_or_else(|e| panic!("subprocess failed for {test_name}: {e}"));
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        print!("{stdout}");
        eprint!("{stderr}");
        stdout + &stderr
    }

    fn noise_image(width: usize, height: usize, seed: u32) -> ImageBuffer<f32> {
        let mut rng = seed;
        let data: Vec<f32> = (0..width * height)
            .map(|_| {
                rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
                ((rng >> 16) & 0xff) as f32 / 255.0
            })
            .collect();
        ImageBuffer::from_vec(width, height, data)
    }

    fn assert_matches_cpu(gpu_out: &ImageBuffer<f32>, cpu_out: &ImageBuffer<f32>, what: &str) {
        assert_eq!(gpu_out.width(), cpu_out.width());
        assert_eq!(gpu_out.height(), cpu_out.height());
        for (x, y, c) in cpu_out.pixels() {
            let g = gpu_out.get(x, y);
            assert!(
                (g - c).abs() < 1e-4,
                "{what} ({x},{y}): GPU={g:.6} CPU={c:.6}",
            );
        }
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_pad_x_matches_cpu() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let pads = PadPipeline::new(&gpu);

        let src = noise_image(20, 12, 7);
        let img = GpuImageBuffer::<f32>::new(&gpu, 20, 12, "pad test");
        let mut host = img.host_buffer();
        for (x, y, v) in src.pixels() {
            host.set(x, y, v);
        }
        img.upload(&gpu, &host);

        let mut graph = FrameGraph::new();
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        let up = graph.record(&[]);
        pads.record_x(&gpu, &mut encoder, &mut graph, &img, &[up]);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let back = img.readback(&gpu).expect("readback");
        host.pad_x();
        for y in 0..12i32 {
            for p in 1..=host.padding() as i32 {
                assert_eq!(
                    back.get_padded(-(p as isize), y as isize),
                    host.get_padded(-(p as isize), y as isize),
                    "left pad ({p},{y})",
                );
                let xr = 20 - 1 + p;
                assert_eq!(
                    back.get_padded(xr as isize, y as isize),
                    host.get_padded(xr as isize, y as isize),
                    "right pad ({p},{y})",
                );
            }
        }
        println!("GPU_TEST_OK");
        drop(img);
        drop(gpu);
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_filter_x_matches_cpu() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let pads = PadPipeline::new(&gpu);
        let filters = FilterPipeline::new(&gpu);
        let bank = FilterBank::new(&gpu, 1.0);

        let src = noise_image(33, 21, 99);
        let input = GpuImageBuffer::<f32>::new(&gpu, 33, 21, "filter in");
        // Output width evened: 33 → 34.
        let output = GpuImageBuffer::<f32>::new(&gpu, 34, 21, "filter out");
        let mut host = input.host_buffer();
        for (x, y, v) in src.pixels() {
            host.set(x, y, v);
        }
        input.upload(&gpu, &host);

        let mut graph = FrameGraph::new();
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        let up = graph.record(&[]);
        let padded = pads.record_x(&gpu, &mut encoder, &mut graph, &input, &[up]);
        filters.record_x(
            &gpu,
            &mut encoder,
            &mut graph,
            &input,
            &bank.l1_h0,
            bank.l1_h0_len,
            SliceRoute::default(),
            &output,
            &[padded],
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let cpu = convolution::filter_x(&src, &crate::filters::level1_filters(1.0).h0);
        let back = output.readback(&gpu).expect("readback");
        // Compare the original extent; the evened column duplicates the
        // last one.
        for y in 0..21 {
            for x in 0..33 {
                let g = back.get(x, y);
                let c = cpu.get(x, y);
                assert!((g - c).abs() < 1e-4, "({x},{y}): GPU={g} CPU={c}");
            }
            assert!((back.get(33, y) - back.get(32, y)).abs() < 1e-4, "evened column");
        }
        println!("GPU_TEST_OK");
        drop(input);
        drop(output);
        drop(gpu);
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_decimate_x_matches_cpu() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let pads = PadPipeline::new(&gpu);
        let decims = DecimatePipeline::new(&gpu);
        let bank = FilterBank::new(&gpu, 1.0);

        // Both extent parities, both swap settings.
        for (width, swap) in [(32usize, false), (30usize, true)] {
            let src = noise_image(width, 16, width as u32);
            let out_w = crate::dtcwt::decimated_extent(width);
            let input = GpuImageBuffer::<f32>::new(&gpu, width, 16, "decimate in");
            let output = GpuImageBuffer::<f32>::new(&gpu, out_w, 16, "decimate out");
            let mut host = input.host_buffer();
            for (x, y, v) in src.pixels() {
                host.set(x, y, v);
            }
            input.upload(&gpu, &host);

            let mut graph = FrameGraph::new();
            let mut encoder = gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
            let up = graph.record(&[]);
            let padded = pads.record_x(&gpu, &mut encoder, &mut graph, &input, &[up]);
            decims.record_x(
                &gpu,
                &mut encoder,
                &mut graph,
                &input,
                &bank.l2_h0,
                bank.l2_len,
                swap,
                SliceRoute::default(),
                &output,
                &[padded],
            );
            gpu.queue.submit(std::iter::once(encoder.finish()));

            let cpu = convolution::decimate_filter_x(
                &src,
                &crate::filters::level2_filters(1.0).h0,
                swap,
            );
            let back = output.readback(&gpu).expect("readback");
            assert_matches_cpu(&back, &cpu, &format!("decimate_x w={width} swap={swap}"));
        }
        println!("GPU_TEST_OK");
        drop(gpu);
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_triple_x_matches_separate_passes() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let pads = PadPipeline::new(&gpu);
        let decims = DecimatePipeline::new(&gpu);
        let bank = FilterBank::new(&gpu, 1.0);

        let src = noise_image(24, 10, 5);
        let out_w = crate::dtcwt::decimated_extent(24);
        let input = GpuImageBuffer::<f32>::new(&gpu, 24, 10, "triple in");
        let output = GpuImageBuffer::<f32>::with_slices(&gpu, out_w, 10, 3, "triple out");
        let mut host = input.host_buffer();
        for (x, y, v) in src.pixels() {
            host.set(x, y, v);
        }
        input.upload(&gpu, &host);

        let mut graph = FrameGraph::new();
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        let up = graph.record(&[]);
        let padded = pads.record_x(&gpu, &mut encoder, &mut graph, &input, &[up]);
        decims.record_triple_x(&gpu, &mut encoder, &mut graph, &input, &bank, &output, &[padded]);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let l2 = crate::filters::level2_filters(1.0);
        let expect = [
            convolution::decimate_filter_x(&src, &l2.h0, false),
            convolution::decimate_filter_x(&src, &l2.bp, true),
            convolution::decimate_filter_x(&src, &l2.h1, true),
        ];
        let back = output.readback(&gpu).expect("readback");
        for (slice, cpu) in expect.iter().enumerate() {
            for (x, y, c) in cpu.pixels() {
                let g = back.get_in(slice, x, y);
                assert!(
                    (g - c).abs() < 1e-4,
                    "triple slice {slice} ({x},{y}): GPU={g} CPU={c}",
                );
            }
        }
        println!("GPU_TEST_OK");
        drop(gpu);
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_pad_x_matches_cpu() {
        let out = run_gpu_test_in_subprocess("gpu::filter::tests::inner_pad_x_matches_cpu");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_filter_x_matches_cpu() {
        let out = run_gpu_test_in_subprocess("gpu::filter::tests::inner_filter_x_matches_cpu");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_decimate_x_matches_cpu() {
        let out = run_gpu_test_in_subprocess("gpu::filter::tests::inner_decimate_x_matches_cpu");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_triple_x_matches_separate_passes() {
        let out = run_gpu_test_in_subprocess(
            "gpu::filter::tests::inner_triple_x_matches_separate_passes",
        );
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
