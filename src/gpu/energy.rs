// gpu/energy.rs — Interest-energy map pipeline.
//
// GPU counterpart of energy.rs `energy_map`: pointwise over a level's
// six subbands, one dispatch per level.

use crate::gpu::buffer::{GpuImageBuffer, ImageGeom};
use crate::gpu::device::GpuDevice;
use crate::gpu::signal::{FrameGraph, Signal};
use crate::gpu::{bgl_storage, bgl_uniform, uniform_init};
use crate::image::Complex32;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct EnergyParams {
    in_geom: ImageGeom,
    out_geom: ImageGeom,
}

pub struct EnergyMapPipeline {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

impl EnergyMapPipeline {
    pub fn new(gpu: &GpuDevice) -> Self {
        let module = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("energy.wgsl"),
                source: wgpu::ShaderSource::Wgsl(
                    gpu.workgroup_size
                        .specialise(include_str!("../shaders/energy.wgsl"))
                        .into(),
                ),
            });

        let bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("energy BGL"),
                entries: &[bgl_uniform(0), bgl_storage(1, true), bgl_storage(2, false)],
            });
        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("energy layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        let pipeline = gpu
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("energy_map"),
                layout: Some(&layout),
                module: &module,
                entry_point: "energy_map",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        EnergyMapPipeline { pipeline, bgl }
    }

    /// Record the energy map of one 6-slice subband level. `deps` must
    /// cover every dispatch that wrote the level.
    pub fn record(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        graph: &mut FrameGraph,
        level: &GpuImageBuffer<Complex32>,
        output: &GpuImageBuffer<f32>,
        deps: &[Signal],
    ) -> Signal {
        assert_eq!(level.slices(), 6, "energy map needs the 6 oriented subbands");
        assert_eq!(output.width(), level.width());
        assert_eq!(output.height(), level.height());

        let params = uniform_init(&gpu.device, "EnergyParams", &EnergyParams {
            in_geom: ImageGeom::of(level),
            out_geom: ImageGeom::of(output),
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("energy bind group"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: level.raw().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.raw().as_entire_binding(),
                },
            ],
        });

        let signal = graph.record(deps);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("energy_map"),
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
    use crate::energy;
    use crate::image::ImageBuffer;

    #[test]
    fn test_energy_params_layout() {
        assert_eq!(std::mem::size_of::<EnergyParams>(), 64);
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
    fn inner_energy_matches_cpu() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let pipeline = EnergyMapPipeline::new(&gpu);

        let mut src = ImageBuffer::<Complex32>::with_slices(12, 9, 0, 1, 6);
        let mut rng = 42u32;
        for s in 0..6 {
            for y in 0..9 {
                for x in 0..12 {
                    rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
                    let re = ((rng >> 16) & 0xff) as f32 - 128.0;
                    rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
                    let im = ((rng >> 16) & 0xff) as f32 - 128.0;
                    src.set_in(s, x, y, Complex32::new(re, im));
                }
            }
        }

        let level = GpuImageBuffer::<Complex32>::with_slices(&gpu, 12, 9, 6, "energy in");
        let map = GpuImageBuffer::<f32>::new(&gpu, 12, 9, "energy out");
        let mut host = level.host_buffer();
        for s in 0..6 {
            for y in 0..9 {
                for x in 0..12 {
                    host.set_in(s, x, y, src.get_in(s, x, y));
                }
            }
        }
        level.upload(&gpu, &host);

        let mut graph = FrameGraph::new();
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        let up = graph.record(&[]);
        pipeline.record(&gpu, &mut encoder, &mut graph, &level, &map, &[up]);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let cpu = energy::energy_map(&src);
        let back = map.readback(&gpu).expect("readback");
        for (x, y, c) in cpu.pixels() {
            let g = back.get(x, y);
            assert!(
                (g - c).abs() < 1e-4 * c.abs().max(1.0),
                "({x},{y}): GPU={g} CPU={c}",
            );
        }
        println!("GPU_TEST_OK");
        drop(gpu);
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_energy_matches_cpu() {
        let out = run_gpu_test_in_subprocess("gpu::energy::tests::inner_energy_matches_cpu");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
