// gpu/quad.rs — Quad-to-complex pipeline.
//
// GPU counterpart of convolution.rs `quad_to_complex`: collapses the
// interleaved 2×2 tree samples of one real slice into a conjugate pair
// of oriented complex subbands.

use crate::gpu::buffer::{GpuImageBuffer, ImageGeom};
use crate::gpu::device::GpuDevice;
use crate::gpu::signal::{FrameGraph, Signal};
use crate::gpu::{bgl_storage, bgl_uniform, uniform_init};
use crate::image::Complex32;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct QuadParams {
    in_geom: ImageGeom,
    out_geom: ImageGeom,
    slice_in: u32,
    slice_a: u32,
    slice_b: u32,
    _pad: u32,
}

pub struct QuadPipeline {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

impl QuadPipeline {
    pub fn new(gpu: &GpuDevice) -> Self {
        let module = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("quad.wgsl"),
                source: wgpu::ShaderSource::Wgsl(
                    gpu.workgroup_size
                        .specialise(include_str!("../shaders/quad.wgsl"))
                        .into(),
                ),
            });

        let bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("quad BGL"),
                entries: &[bgl_uniform(0), bgl_storage(1, true), bgl_storage(2, false)],
            });
        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("quad layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        let pipeline = gpu
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("quad_to_complex"),
                layout: Some(&layout),
                module: &module,
                entry_point: "quad_to_complex",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        QuadPipeline { pipeline, bgl }
    }

    /// Collapse slice `slice_in` of `input` into subband slices
    /// `slice_a` / `slice_b` of `output`. The output extent must be half
    /// the (even) input extent.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        input: &GpuImageBuffer<f32>,
        slice_in: usize,
        output: &GpuImageBuffer<Complex32>,
        slice_a: usize,
        slice_b: usize,
        deps: &[Signal],
    ) -> Signal {
        assert!(input.width() % 2 == 0 && input.height() % 2 == 0);
        assert_eq!(output.width(), input.width() / 2);
        assert_eq!(output.height(), input.height() / 2);
        assert!(slice_in < input.slices());
        assert!(slice_a < output.slices() && slice_b < output.slices());

        let params = uniform_init(&gpu.device, "QuadParams", &QuadParams {
            in_geom: ImageGeom::of(input),
            out_geom: ImageGeom::of(output),
            slice_in: slice_in as u32,
            slice_a: slice_a as u32,
            slice_b: slice_b as u32,
            _pad: 0,
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("quad bind group"),
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
                    resource: output.raw().as_entire_binding(),
                },
            ],
        });

        let signal = graph.record(deps);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("quad_to_complex"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let (dx, dy) = gpu.dispatch_size(output.width() as u32, output.height() as u32);
        pass.dispatch_workgroups(dx, dy, 1);
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convolution;
    use crate::image::ImageBuffer;

    #[test]
    fn test_quad_params_layout() {
        assert_eq!(std::mem::size_of::<QuadParams>(), 80);
    }

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

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_quad_matches_cpu() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let quad = QuadPipeline::new(&gpu);

        let mut src = ImageBuffer::<f32>::from_vec(
            12,
            8,
            (0..12 * 8).map(|i| ((i * 37) % 11) as f32 - 5.0).collect(),
        );
        src.pad_x();
        src.pad_y();

        let input = GpuImageBuffer::<f32>::new(&gpu, 12, 8, "quad in");
        let output = GpuImageBuffer::<Complex32>::with_slices(&gpu, 6, 4, 6, "quad out");
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
        quad.record(&gpu, &mut encoder, &mut graph, &input, 0, &output, 0, 5, &[up]);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let (cpu_a, cpu_b) = convolution::quad_to_complex(&src);
        let back = output.readback(&gpu).expect("readback");
        for (x, y, c) in cpu_a.pixels() {
            let g = back.get_in(0, x, y);
            assert!(
                (g.re - c.re).abs() < 1e-5 && (g.im - c.im).abs() < 1e-5,
                "slice a ({x},{y}): GPU={g:?} CPU={c:?}",
            );
        }
        for (x, y, c) in cpu_b.pixels() {
            let g = back.get_in(5, x, y);
            assert!(
                (g.re - c.re).abs() < 1e-5 && (g.im - c.im).abs() < 1e-5,
                "slice b ({x},{y}): GPU={g:?} CPU={c:?}",
            );
        }
        println!("GPU_TEST_OK");
        drop(gpu);
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_quad_matches_cpu() {
        let out = run_gpu_test_in_subprocess("gpu::quad::tests::inner_quad_matches_cpu");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
