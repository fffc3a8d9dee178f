// gpu/buffer.rs — Strided image storage buffers.
//
// The GPU side mirrors the CPU `ImageBuffer<T>` layout exactly: one flat
// storage buffer per image, holding `slices` planes of
// `stride × padded_height` elements, logical pixels inset by `padding`.
// Identical layout means upload and readback are single memcpy-shaped
// transfers with no repacking, and a GPU-vs-CPU test can compare backing
// stores element for element.
//
// Storage buffers rather than textures: the filter kernels need padded
// reads at negative offsets, multi-slice outputs from a single binding,
// and exact control over the mirror extension — all of which the strided
// buffer gives directly, where a texture would fight us on addressing
// and border modes.

use std::marker::PhantomData;

use crate::gpu::device::{GpuDevice, GpuError};
use crate::image::{Element, ImageBuffer};

/// Padding carried by every GPU image, in elements per side.
///
/// Must cover both the widest filter half-width ((15 − 1)/2 = 7) and the
/// read overshoot of the decimating kernels, whose leftmost tap for
/// output pair 0 sits at `-(L - 2) - 1 = -13`.
pub const GPU_PADDING: usize = 16;

/// Stride / padded-height alignment for GPU images, in elements.
pub const GPU_ALIGNMENT: usize = 32;

/// A GPU-resident image with the `ImageBuffer` layout.
///
/// The geometry fields are host-side copies used to build kernel
/// parameter blocks and to validate uploads; the data itself lives in
/// `buffer`.
pub struct GpuImageBuffer<T: Element> {
    buffer: wgpu::Buffer,
    width: usize,
    height: usize,
    padding: usize,
    stride: usize,
    padded_height: usize,
    slices: usize,
    _marker: PhantomData<T>,
}

impl<T: Element> GpuImageBuffer<T> {
    /// Allocate a zeroed single-slice image.
    pub fn new(gpu: &GpuDevice, width: usize, height: usize, label: &str) -> Self {
        Self::with_slices(gpu, width, height, 1, label)
    }

    /// Allocate a zeroed image of `slices` contiguous planes, with the
    /// crate-wide `GPU_PADDING` / `GPU_ALIGNMENT` geometry.
    pub fn with_slices(
        gpu: &GpuDevice,
        width: usize,
        height: usize,
        slices: usize,
        label: &str,
    ) -> Self {
        assert!(width > 0 && height > 0 && slices > 0, "image must be non-empty");

        let stride = crate::image::align_up(width + 2 * GPU_PADDING, GPU_ALIGNMENT);
        let padded_height = crate::image::align_up(height + 2 * GPU_PADDING, GPU_ALIGNMENT);
        let len = stride * padded_height * slices;

        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (len * std::mem::size_of::<T>()) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        GpuImageBuffer {
            buffer,
            width,
            height,
            padding: GPU_PADDING,
            stride,
            padded_height,
            slices,
            _marker: PhantomData,
        }
    }

    // --- Accessors ---

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn padding(&self) -> usize {
        self.padding
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn padded_height(&self) -> usize {
        self.padded_height
    }

    #[inline]
    pub fn slices(&self) -> usize {
        self.slices
    }

    /// Elements per slice.
    #[inline]
    pub fn plane_len(&self) -> usize {
        self.stride * self.padded_height
    }

    /// Linear element offset of logical (0, 0) within a plane.
    #[inline]
    pub fn start(&self) -> usize {
        self.padding * self.stride + self.padding
    }

    /// Total element count of the backing buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.plane_len() * self.slices
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false // constructor rejects empty images
    }

    /// The underlying wgpu buffer, for bind group construction.
    #[inline]
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// An `ImageBuffer` with this image's exact geometry, zeroed. The CPU
    /// counterpart for uploads and GPU-vs-CPU comparisons.
    pub fn host_buffer(&self) -> ImageBuffer<T> {
        ImageBuffer::with_slices(self.width, self.height, GPU_PADDING, GPU_ALIGNMENT, self.slices)
    }

    /// Upload a CPU image wholesale (padding and slices included).
    ///
    /// # Panics
    /// Panics unless `src` has this image's exact geometry — build it
    /// with [`GpuImageBuffer::host_buffer`] or matching constructor
    /// arguments.
    pub fn upload(&self, gpu: &GpuDevice, src: &ImageBuffer<T>) {
        assert!(
            src.width() == self.width
                && src.height() == self.height
                && src.padding() == self.padding
                && src.stride() == self.stride
                && src.padded_height() == self.padded_height
                && src.slices() == self.slices,
            "upload geometry mismatch: host {}×{}×{} stride {}, gpu {}×{}×{} stride {}",
            src.width(),
            src.height(),
            src.slices(),
            src.stride(),
            self.width,
            self.height,
            self.slices,
            self.stride,
        );
        gpu.queue
            .write_buffer(&self.buffer, 0, bytemuck::cast_slice(src.as_slice()));
    }

    /// Read the whole image back to a CPU `ImageBuffer`.
    ///
    /// **Expensive and synchronous** — submits a copy, then stalls until
    /// the GPU finishes everything queued so far. Use at frame
    /// boundaries and in tests only.
    pub fn readback(&self, gpu: &GpuDevice) -> Result<ImageBuffer<T>, GpuError> {
        let size_bytes = (self.len() * std::mem::size_of::<T>()) as u64;

        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuImageBuffer::readback staging"),
            size: size_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("GpuImageBuffer::readback"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, size_bytes);
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

        let mut out = self.host_buffer();
        {
            let mapped = slice.get_mapped_range();
            out.as_mut_slice()
                .copy_from_slice(bytemuck::cast_slice(&mapped));
        }
        staging.unmap();
        Ok(out)
    }
}

/// Geometry block shared by most kernel parameter structs. Mirrors the
/// WGSL `ImageGeom` struct field for field.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ImageGeom {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    /// Element offset of logical (0, 0) within a plane.
    pub start: u32,
    /// Elements per slice.
    pub plane: u32,
    pub padding: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

impl ImageGeom {
    pub fn of<T: Element>(img: &GpuImageBuffer<T>) -> Self {
        ImageGeom {
            width: img.width() as u32,
            height: img.height() as u32,
            stride: img.stride() as u32,
            start: img.start() as u32,
            plane: img.plane_len() as u32,
            padding: img.padding() as u32,
            _pad0: 0,
            _pad1: 0,
        }
    }
}
