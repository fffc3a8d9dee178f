// image.rs — Padded, strided image container for the wavelet pipeline.
//
// Every filter stage in this crate (CPU reference and GPU alike) works on
// the same memory layout: a flat buffer holding `slices` copies of a 2D
// plane, each plane `stride × padded_height` elements, with the logical
// `width × height` image inset by `padding` elements on every side.
//
// One plane (width = 4, padding = 2, stride = 8):
//
//   ·  ·  ·  ·  ·  ·  ·  ·      ← padding rows (filled by pad_y)
//   ·  ·  ·  ·  ·  ·  ·  ·
//   p  p  ■  ■  ■  ■  p  p      ← logical row 0 (p = pad_x mirror values)
//   p  p  ■  ■  ■  ■  p  p
//   p  p  ■  ■  ■  ■  p  p
//   ·  ·  ·  ·  ·  ·  ·  ·
//   ·  ·  ·  ·  ·  ·  ·  ·
//
// The padding region exists so filter kernels can read a fixed window
// around every output pixel with no per-tap bounds checks: the mirror
// extension is materialised once per pass by pad_x()/pad_y() and the
// filters then read it like any other memory. Reading the border before
// padding has run is a logic error (stale values near edges, not a
// crash); on the GPU the orchestrator makes the ordering structural via
// completion signals.
//
// Multiple slices share one allocation so that related intermediates
// (the lo/bp/hi row-filter outputs of one level, or the six subbands of
// one level) bind to a kernel as a single buffer.

use std::fmt;

// ---------------------------------------------------------------------------
// Elements
// ---------------------------------------------------------------------------

/// Trait for types that can be stored in an `ImageBuffer`.
///
/// `bytemuck::Pod` is required so a buffer can be uploaded to the GPU by
/// reinterpreting the backing `Vec<T>` as bytes, with no per-element
/// conversion.
pub trait Element: Copy + Default + bytemuck::Pod + Send + Sync + 'static {}

impl Element for f32 {}
impl Element for Complex32 {}

/// A complex value stored as an interleaved (re, im) float pair.
///
/// Matches the `vec2<f32>` layout the WGSL kernels use, so a slice of
/// `Complex32` uploads directly as a subband buffer.
#[repr(C)]
#[derive(Copy, Clone, Default, PartialEq, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Complex32 {
    pub re: f32,
    pub im: f32,
}

impl Complex32 {
    #[inline]
    pub fn new(re: f32, im: f32) -> Self {
        Complex32 { re, im }
    }

    /// Squared magnitude |z|². The energy map works entirely in squared
    /// magnitudes, so no sqrt is taken on that path.
    #[inline]
    pub fn abs_sq(self) -> f32 {
        self.re * self.re + self.im * self.im
    }

    #[inline]
    pub fn mul(self, other: Complex32) -> Complex32 {
        Complex32 {
            re: self.re * other.re - self.im * other.im,
            im: self.re * other.im + self.im * other.re,
        }
    }

    #[inline]
    pub fn scale(self, s: f32) -> Complex32 {
        Complex32 {
            re: self.re * s,
            im: self.im * s,
        }
    }

    #[inline]
    pub fn add(self, other: Complex32) -> Complex32 {
        Complex32 {
            re: self.re + other.re,
            im: self.im + other.im,
        }
    }

    /// e^{jθ} as a complex value.
    #[inline]
    pub fn from_angle(theta: f32) -> Complex32 {
        Complex32 {
            re: theta.cos(),
            im: theta.sin(),
        }
    }
}

// ---------------------------------------------------------------------------
// Mirror reflection
// ---------------------------------------------------------------------------

/// Reflect an index into `[0, extent)` by symmetric extension that does
/// NOT repeat the edge sample: index -1 maps to 0, -2 to 1, `extent` to
/// `extent - 1`, and so on, repeating with period `2 * extent`.
///
/// This is the boundary rule every filter in the transform assumes; the
/// two decimation trees only stay aligned at image edges because the edge
/// sample appears exactly once per half-period.
#[inline]
pub fn reflect(i: isize, extent: usize) -> usize {
    debug_assert!(extent > 0, "reflect: extent must be positive");
    let period = 2 * extent as isize;
    let m = i.rem_euclid(period);
    m.min(period - 1 - m) as usize
}

// ---------------------------------------------------------------------------
// ImageBuffer<T>
// ---------------------------------------------------------------------------

/// A 2D image with explicit edge padding, row stride and optional slices.
///
/// - `width`, `height`: logical extent in pixels.
/// - `padding`: extra elements on each side, populated by `pad_x`/`pad_y`.
/// - `stride`: row pitch in elements, `width + 2 * padding` rounded up to
///   the construction-time `alignment`.
/// - `slices`: number of contiguous repeats of the padded plane.
#[derive(Clone)]
pub struct ImageBuffer<T: Element> {
    data: Vec<T>,
    width: usize,
    height: usize,
    padding: usize,
    stride: usize,
    padded_height: usize,
    slices: usize,
}

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub(crate) fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment > 0);
    (value + alignment - 1) / alignment * alignment
}

impl<T: Element> ImageBuffer<T> {
    /// Create a zero-initialised single-slice image.
    pub fn new(width: usize, height: usize, padding: usize, alignment: usize) -> Self {
        Self::with_slices(width, height, padding, alignment, 1)
    }

    /// Create a zero-initialised image with `slices` contiguous planes.
    ///
    /// Both the stride and the padded height are rounded up to `alignment`,
    /// so vectorised loads stay aligned and a kernel reading the last
    /// padded row of one slice never lands in the next slice's rows.
    ///
    /// # Panics
    /// Panics if any dimension is zero.
    pub fn with_slices(
        width: usize,
        height: usize,
        padding: usize,
        alignment: usize,
        slices: usize,
    ) -> Self {
        assert!(width > 0 && height > 0, "image must be non-empty");
        assert!(alignment > 0, "alignment must be positive");
        assert!(slices > 0, "slices must be positive");

        let stride = align_up(width + 2 * padding, alignment);
        let padded_height = align_up(height + 2 * padding, alignment);

        ImageBuffer {
            data: vec![T::default(); stride * padded_height * slices],
            width,
            height,
            padding,
            stride,
            padded_height,
            slices,
        }
    }

    /// Create a single-slice, zero-padding image from compact row-major
    /// data.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        Self::from_vec_padded(width, height, 0, 1, data)
    }

    /// Create a padded single-slice image from compact row-major data.
    /// The padding region is left zeroed; call `pad_x`/`pad_y` to fill it.
    pub fn from_vec_padded(
        width: usize,
        height: usize,
        padding: usize,
        alignment: usize,
        data: Vec<T>,
    ) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        let mut img = Self::new(width, height, padding, alignment);
        for y in 0..height {
            for x in 0..width {
                img.set(x, y, data[y * width + x]);
            }
        }
        img
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

    /// Elements per slice (stride × padded height).
    #[inline]
    pub fn plane_len(&self) -> usize {
        self.stride * self.padded_height
    }

    /// Linear offset of the logical (0, 0) pixel within a plane.
    #[inline]
    pub fn start(&self) -> usize {
        self.padding * self.stride + self.padding
    }

    #[inline]
    fn index_in(&self, slice: usize, x: usize, y: usize) -> usize {
        slice * self.plane_len() + self.start() + y * self.stride + x
    }

    /// Read the logical pixel (x, y) of slice 0.
    ///
    /// # Panics
    /// Panics if (x, y) is out of the logical bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.get_in(0, x, y)
    }

    /// Read the logical pixel (x, y) of a given slice.
    #[inline]
    pub fn get_in(&self, slice: usize, x: usize, y: usize) -> T {
        assert!(
            slice < self.slices && x < self.width && y < self.height,
            "pixel ({x},{y}) slice {slice} out of bounds for {}×{}×{}",
            self.width,
            self.height,
            self.slices,
        );
        self.data[self.index_in(slice, x, y)]
    }

    /// Write the logical pixel (x, y) of slice 0.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.set_in(0, x, y, value);
    }

    /// Write the logical pixel (x, y) of a given slice.
    #[inline]
    pub fn set_in(&mut self, slice: usize, x: usize, y: usize, value: T) {
        assert!(
            slice < self.slices && x < self.width && y < self.height,
            "pixel ({x},{y}) slice {slice} out of bounds for {}×{}×{}",
            self.width,
            self.height,
            self.slices,
        );
        let idx = self.index_in(slice, x, y);
        self.data[idx] = value;
    }

    /// Read a pixel of slice 0 with signed coordinates that may extend
    /// into the padding region: x in `[-padding, width + padding)`,
    /// likewise y.
    ///
    /// Returns whatever is currently stored there; the caller is
    /// responsible for having run `pad_x`/`pad_y` first.
    #[inline]
    pub fn get_padded(&self, x: isize, y: isize) -> T {
        self.get_padded_in(0, x, y)
    }

    /// `get_padded` for an arbitrary slice.
    #[inline]
    pub fn get_padded_in(&self, slice: usize, x: isize, y: isize) -> T {
        let p = self.padding as isize;
        assert!(
            slice < self.slices
                && x >= -p
                && x < self.width as isize + p
                && y >= -p
                && y < self.height as isize + p,
            "padded read ({x},{y}) slice {slice} outside padded region",
        );
        let idx = slice as isize * self.plane_len() as isize
            + self.start() as isize
            + y * self.stride as isize
            + x;
        self.data[idx as usize]
    }

    #[inline]
    fn set_padded_in(&mut self, slice: usize, x: isize, y: isize, value: T) {
        let p = self.padding as isize;
        debug_assert!(
            x >= -p && x < self.width as isize + p && y >= -p && y < self.height as isize + p
        );
        let idx = slice as isize * self.plane_len() as isize
            + self.start() as isize
            + y * self.stride as isize
            + x;
        self.data[idx as usize] = value;
    }

    // --- Padding ---

    /// Fill the left/right borders of every slice by mirror reflection of
    /// the logical rows. Covers the logical row range only; the corner
    /// regions are never read (row filters extend logical rows, column
    /// filters extend logical columns) and stay untouched.
    ///
    /// Idempotent while the interior is unchanged.
    pub fn pad_x(&mut self) {
        for slice in 0..self.slices {
            for y in 0..self.height as isize {
                for p in 1..=self.padding as isize {
                    let left = self.get_padded_in(slice, reflect(-p, self.width) as isize, y);
                    self.set_padded_in(slice, -p, y, left);

                    let xr = self.width as isize - 1 + p;
                    let right = self.get_padded_in(slice, reflect(xr, self.width) as isize, y);
                    self.set_padded_in(slice, xr, y, right);
                }
            }
        }
    }

    /// Fill the top/bottom borders of every slice by mirror reflection of
    /// the logical columns. Coverage contract as for `pad_x`.
    pub fn pad_y(&mut self) {
        for slice in 0..self.slices {
            for x in 0..self.width as isize {
                for p in 1..=self.padding as isize {
                    let top = self.get_padded_in(slice, x, reflect(-p, self.height) as isize);
                    self.set_padded_in(slice, x, -p, top);

                    let yb = self.height as isize - 1 + p;
                    let bottom = self.get_padded_in(slice, x, reflect(yb, self.height) as isize);
                    self.set_padded_in(slice, x, yb, bottom);
                }
            }
        }
    }

    // --- Bulk access ---

    /// The full backing buffer, padding and slices included. This is the
    /// exact layout uploaded to the GPU.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Copy the logical region of one slice out as a compact row-major
    /// Vec.
    pub fn to_compact_vec(&self, slice: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                out.push(self.get_in(slice, x, y));
            }
        }
        out
    }

    /// Iterate over the logical pixels of slice 0 as `(x, y, value)`.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| (x, y, self.get(x, y))))
    }
}

impl<T: Element + fmt::Debug> fmt::Debug for ImageBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ImageBuffer<{}> {{ {}×{}, padding={}, stride={}, slices={} }}",
            std::any::type_name::<T>(),
            self.width,
            self.height,
            self.padding,
            self.stride,
            self.slices,
        )?;
        for y in 0..self.height.min(8) {
            write!(f, "  row {y}: [")?;
            for x in 0..self.width.min(12) {
                if x > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}", self.get(x, y))?;
            }
            writeln!(f, "]")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bilinear sampling
// ---------------------------------------------------------------------------

/// Bilinear interpolation with zero outside the logical image.
///
/// The peak detector compares a candidate's energy against the adjacent
/// levels' maps at the corresponding position; reads landing outside a
/// map must behave as if the map were embedded in an infinite zero field,
/// so any part of the 2×2 footprint that falls outside contributes zero.
pub fn sample_bilinear_zero(img: &ImageBuffer<f32>, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let tap = |ix: isize, iy: isize| -> f32 {
        if ix < 0 || iy < 0 || ix >= img.width() as isize || iy >= img.height() as isize {
            0.0
        } else {
            img.get(ix as usize, iy as usize)
        }
    };

    let ix = x0 as isize;
    let iy = y0 as isize;
    (1.0 - fx) * (1.0 - fy) * tap(ix, iy)
        + fx * (1.0 - fy) * tap(ix + 1, iy)
        + (1.0 - fx) * fy * tap(ix, iy + 1)
        + fx * fy * tap(ix + 1, iy + 1)
}
