// convolution.rs — CPU reference convolutions for the wavelet transform.
//
// These are the ground-truth implementations the GPU kernels are tested
// against. Three operations:
//
//   filter_x / filter_y            non-decimating FIR, odd-length filter,
//                                  output extent = input extent
//   decimate_filter_x / _y         even-length filter applied twice per
//                                  output pair (the two quarter-shift
//                                  trees), halving the extent
//   quad_to_complex                2×2 interleaved tree samples → two
//                                  complex values
//
// BORDER HANDLING: symmetric extension without edge repetition, via the
// shared `reflect` rule. Clamp/replicate would break the transform's
// shift-invariance at the borders.
//
// The convolution is a true convolution, not correlation: taps are
// applied time-reversed.

use crate::image::{reflect, Complex32, ImageBuffer};

/// Sample row `y` of `input` at a possibly out-of-range x.
#[inline]
fn tap_x(input: &ImageBuffer<f32>, x: isize, y: usize) -> f32 {
    input.get(reflect(x, input.width()), y)
}

/// Sample column `x` of `input` at a possibly out-of-range y.
#[inline]
fn tap_y(input: &ImageBuffer<f32>, x: usize, y: isize) -> f32 {
    input.get(x, reflect(y, input.height()))
}

/// Convolve each row with an odd-length filter, centred on each output
/// pixel. Output has the input's extent.
///
/// Interior pixels (where the window stays inside the image) take a
/// direct path; border pixels reflect.
///
/// # Panics
/// Panics if the filter length is even.
pub fn filter_x(input: &ImageBuffer<f32>, filter: &[f32]) -> ImageBuffer<f32> {
    assert!(
        filter.len() % 2 == 1,
        "filter_x requires an odd-length filter, got {}",
        filter.len(),
    );
    let len = filter.len();
    let offset = (len - 1) / 2;
    let (width, height) = (input.width(), input.height());

    let mut output = ImageBuffer::new(width, height, 0, 1);
    let interior = if width > 2 * offset {
        offset..width - offset
    } else {
        0..0
    };

    for y in 0..height {
        for x in interior.clone() {
            let mut v = 0.0;
            for n in 0..len {
                v += filter[len - 1 - n] * input.get(x - offset + n, y);
            }
            output.set(x, y, v);
        }
        for x in (0..interior.start).chain(interior.end..width) {
            let mut v = 0.0;
            for n in 0..len {
                v += filter[len - 1 - n]
                    * tap_x(input, x as isize - offset as isize + n as isize, y);
            }
            output.set(x, y, v);
        }
    }
    output
}

/// Convolve each column with an odd-length filter. See `filter_x`.
pub fn filter_y(input: &ImageBuffer<f32>, filter: &[f32]) -> ImageBuffer<f32> {
    assert!(
        filter.len() % 2 == 1,
        "filter_y requires an odd-length filter, got {}",
        filter.len(),
    );
    let len = filter.len();
    let offset = ((len - 1) / 2) as isize;
    let (width, height) = (input.width(), input.height());

    let mut output = ImageBuffer::new(width, height, 0, 1);
    for y in 0..height {
        for x in 0..width {
            let mut v = 0.0;
            for n in 0..len {
                v += filter[len - 1 - n] * tap_y(input, x, y as isize - offset + n as isize);
            }
            output.set(x, y, v);
        }
    }
    output
}

/// Decimating convolution along rows with an even-length filter.
///
/// Each output pair (c, c+1) holds one sample from each of the two
/// quarter-shifted trees: one tree applies the filter time-reversed to
/// the even input phase, the other applies it forwards to the odd phase.
/// `swap_outputs` exchanges which tree lands on the even output column —
/// the highpass and bandpass bands need this to keep the complex pairing
/// consistent across orientations.
///
/// When the input extent is not a multiple of 4 the two trees would come
/// out unbalanced, so one extra symmetric-extension sample is taken at
/// each end, giving `(extent + 2) / 2` outputs instead of `extent / 2`.
pub fn decimate_filter_x(
    input: &ImageBuffer<f32>,
    filter: &[f32],
    swap_outputs: bool,
) -> ImageBuffer<f32> {
    assert!(
        filter.len() % 2 == 0 && !filter.is_empty(),
        "decimate_filter_x requires an even-length filter, got {}",
        filter.len(),
    );
    let len = filter.len();
    let (width, height) = (input.width(), input.height());

    let extend = width % 4 != 0;
    let offset = (len - 2 + usize::from(extend)) as isize;
    let out_width = (width + if extend { 2 } else { 0 }) / 2;

    let mut output = ImageBuffer::new(out_width, height, 0, 1);
    for y in 0..height {
        for c in (0..out_width).step_by(2) {
            let mut v1 = 0.0;
            let mut v2 = 0.0;
            for n in 0..len {
                let base = 2 * c as isize + 2 * n as isize - offset;
                v1 += filter[len - 1 - n] * tap_x(input, base, y);
                v2 += filter[n] * tap_x(input, base + 1, y);
            }
            if swap_outputs {
                output.set(c, y, v2);
                output.set(c + 1, y, v1);
            } else {
                output.set(c, y, v1);
                output.set(c + 1, y, v2);
            }
        }
    }
    output
}

/// Decimating convolution along columns. See `decimate_filter_x`.
pub fn decimate_filter_y(
    input: &ImageBuffer<f32>,
    filter: &[f32],
    swap_outputs: bool,
) -> ImageBuffer<f32> {
    assert!(
        filter.len() % 2 == 0 && !filter.is_empty(),
        "decimate_filter_y requires an even-length filter, got {}",
        filter.len(),
    );
    let len = filter.len();
    let (width, height) = (input.width(), input.height());

    let extend = height % 4 != 0;
    let offset = (len - 2 + usize::from(extend)) as isize;
    let out_height = (height + if extend { 2 } else { 0 }) / 2;

    let mut output = ImageBuffer::new(width, out_height, 0, 1);
    for c in (0..out_height).step_by(2) {
        for x in 0..width {
            let mut v1 = 0.0;
            let mut v2 = 0.0;
            for n in 0..len {
                let base = 2 * c as isize + 2 * n as isize - offset;
                v1 += filter[len - 1 - n] * tap_y(input, x, base);
                v2 += filter[n] * tap_y(input, x, base + 1);
            }
            if swap_outputs {
                output.set(x, c, v2);
                output.set(x, c + 1, v1);
            } else {
                output.set(x, c, v1);
                output.set(x, c + 1, v2);
            }
        }
    }
    output
}

/// Combine each 2×2 block of interleaved tree samples into one complex
/// value per subband pair.
///
/// With ul/ur/ll/lr the corners of a block, the two outputs are
///   (ul - lr, ur + ll) / sqrt(2)   and   (ul + lr, ur - ll) / sqrt(2),
/// a unitary rotation that turns the four real trees into two
/// approximately-analytic complex signals of opposite orientation.
///
/// # Panics
/// Panics unless both extents are even.
pub fn quad_to_complex(
    input: &ImageBuffer<f32>,
) -> (ImageBuffer<Complex32>, ImageBuffer<Complex32>) {
    let (width, height) = (input.width(), input.height());
    assert!(
        width % 2 == 0 && height % 2 == 0,
        "quad_to_complex needs even extents, got {width}×{height}",
    );

    let factor = 1.0 / std::f32::consts::SQRT_2;
    let mut sb0 = ImageBuffer::new(width / 2, height / 2, 0, 1);
    let mut sb1 = ImageBuffer::new(width / 2, height / 2, 0, 1);

    for y in (0..height).step_by(2) {
        for x in (0..width).step_by(2) {
            let ul = input.get(x, y);
            let ur = input.get(x + 1, y);
            let ll = input.get(x, y + 1);
            let lr = input.get(x + 1, y + 1);

            sb0.set(
                x / 2,
                y / 2,
                Complex32::new((ul - lr) * factor, (ur + ll) * factor),
            );
            sb1.set(
                x / 2,
                y / 2,
                Complex32::new((ul + lr) * factor, (ur - ll) * factor),
            );
        }
    }
    (sb0, sb1)
}
