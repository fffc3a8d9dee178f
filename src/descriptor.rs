// descriptor.rs — CPU reference polar-sampled keypoint descriptors.
//
// A descriptor samples all six complex subbands of two adjacent levels
// around a keypoint: a centre-plus-12-point ring on the finer level and
// a single centre sample on the coarser one, 14 samples of 6 complex
// values each (168 floats).
//
// Sampling uses Keys bicubic interpolation. Interpolating a complex
// subband directly would thrash the phase (the coefficients ride on an
// oriented carrier), so each tap is first derotated by the subband's
// approximate carrier frequency, the smooth residual is interpolated,
// and the carrier phase is restored at the interpolated position. A
// fixed per-subband unit factor is applied before derotation so the
// phase behaves consistently across subbands.
//
// Sample positions falling outside a subband read zero; descriptors
// near the image edge degrade instead of failing.

use crate::image::{Complex32, ImageBuffer};

/// Samples per descriptor (13 fine + 1 coarse).
pub const DESCRIPTOR_SAMPLES: usize = 14;

/// Complex values per descriptor.
pub const DESCRIPTOR_LENGTH: usize = DESCRIPTOR_SAMPLES * 6;

/// Unit factors applied to each subband before derotation.
const PHASE_OFFSETS: [Complex32; 6] = [
    Complex32 { re: 0.0, im: 1.0 },
    Complex32 { re: 0.0, im: -1.0 },
    Complex32 { re: 0.0, im: 1.0 },
    Complex32 { re: -1.0, im: 0.0 },
    Complex32 { re: 1.0, im: 0.0 },
    Complex32 { re: -1.0, im: 0.0 },
];

/// Approximate carrier (angular frequency) of each subband, in radians
/// per subband pixel, as (ωx, ωy).
fn angular_freq(n: usize) -> (f32, f32) {
    const K: f32 = std::f32::consts::PI / 2.15;
    let s5 = 5.0f32.sqrt();
    let (wx, wy) = [
        (-1.0, -3.0),
        (-s5, -s5),
        (-3.0, -1.0),
        (-3.0, 1.0),
        (-s5, s5),
        (-1.0, 3.0),
    ][n];
    (wx * K, wy * K)
}

/// Keys cubic convolution weights for a fractional position in [0, 1),
/// over the taps at offsets -1, 0, 1, 2.
fn cubic_coefficients(x: f32) -> [f32; 4] {
    [
        -0.5 * (x + 1.0).powi(3) + 2.5 * (x + 1.0).powi(2) - 4.0 * (x + 1.0) + 2.0,
        1.5 * x.powi(3) - 2.5 * x.powi(2) + 1.0,
        1.5 * (1.0 - x).powi(3) - 2.5 * (1.0 - x).powi(2) + 1.0,
        -0.5 * (2.0 - x).powi(3) + 2.5 * (2.0 - x).powi(2) - 4.0 * (2.0 - x) + 2.0,
    ]
}

/// One level's sampling pattern and where its samples land in the
/// descriptor.
pub struct SamplingPattern {
    /// Sample offsets around the keypoint, in subband pixels of the
    /// pattern's own level.
    pub locations: Vec<(f32, f32)>,
    /// Converts keypoint coordinates (fine-level subband pixels relative
    /// to the image centre) into this level's subband pixels.
    pub scale_factor: f32,
    /// Slot in the descriptor where this pattern's samples start.
    pub output_offset: usize,
}

/// Centre plus a 12-point unit ring, sampled on the finer level.
pub fn fine_pattern() -> SamplingPattern {
    let mut locations = vec![(0.0, 0.0)];
    for n in 0..12 {
        let theta = n as f32 / 12.0 * std::f32::consts::TAU;
        locations.push((theta.sin(), theta.cos()));
    }
    SamplingPattern {
        locations,
        scale_factor: 1.0,
        output_offset: 0,
    }
}

/// Single centre sample on the coarser level (half the fine resolution).
pub fn coarse_pattern() -> SamplingPattern {
    SamplingPattern {
        locations: vec![(0.0, 0.0)],
        scale_factor: 0.5,
        output_offset: 13,
    }
}

/// Read a subband at integer coordinates, zero outside, and remove the
/// carrier phase at that position.
fn read_derotated(
    level: &ImageBuffer<Complex32>,
    subband: usize,
    x: isize,
    y: isize,
) -> Complex32 {
    let val = if x < 0 || y < 0 || x >= level.width() as isize || y >= level.height() as isize {
        Complex32::default()
    } else {
        level.get_in(subband, x as usize, y as usize)
    };
    let val = val.mul(PHASE_OFFSETS[subband]);

    let (wx, wy) = angular_freq(subband);
    let phase = x as f32 * wx + y as f32 * wy;
    val.mul(Complex32::from_angle(-phase))
}

#[inline]
fn centre(extent: usize) -> f32 {
    (extent as f32 - 1.0) / 2.0
}

/// Sample every subband of one level at `pattern`'s locations around
/// each keypoint, writing into the keypoint's descriptor slots.
///
/// `positions` are keypoint coordinates relative to the image centre in
/// fine-level subband pixels; `output` must hold
/// `positions.len() * DESCRIPTOR_LENGTH` complex values.
///
/// # Panics
/// Panics if `output` is too small or `level` lacks the 6 subbands.
pub fn extract_into(
    level: &ImageBuffer<Complex32>,
    positions: &[(f32, f32)],
    pattern: &SamplingPattern,
    output: &mut [Complex32],
) {
    assert_eq!(level.slices(), 6, "descriptor needs the 6 oriented subbands");
    assert!(
        output.len() >= positions.len() * DESCRIPTOR_LENGTH,
        "output holds {} values, need {}",
        output.len(),
        positions.len() * DESCRIPTOR_LENGTH,
    );

    let (cx, cy) = (centre(level.width()), centre(level.height()));

    for (idx, &(px, py)) in positions.iter().enumerate() {
        // Keypoint position in this level's pixels, corner-origin.
        let fx = cx + px * pattern.scale_factor;
        let fy = cy + py * pattern.scale_factor;
        let int_x = fx.floor();
        let int_y = fy.floor();
        let round_x = fx - int_x;
        let round_y = fy - int_y;

        for (s, &(lx, ly)) in pattern.locations.iter().enumerate() {
            // Split the sampling offset into an integer tap shift and a
            // fractional part for the cubic weights.
            let tx = round_x + lx;
            let ty = round_y + ly;
            let shift_x = tx.floor();
            let shift_y = ty.floor();
            let coeffs_x = cubic_coefficients(tx - shift_x);
            let coeffs_y = cubic_coefficients(ty - shift_y);

            let base_x = int_x as isize + shift_x as isize;
            let base_y = int_y as isize + shift_y as isize;

            for n in 0..6 {
                let mut result = Complex32::default();
                for (i1, &cyw) in coeffs_y.iter().enumerate() {
                    let mut row = Complex32::default();
                    for (i2, &cxw) in coeffs_x.iter().enumerate() {
                        let sample = read_derotated(
                            level,
                            n,
                            base_x - 1 + i2 as isize,
                            base_y - 1 + i1 as isize,
                        );
                        row = row.add(sample.scale(cxw));
                    }
                    result = result.add(row.scale(cyw));
                }

                // Restore the carrier at the interpolated position.
                let (wx, wy) = angular_freq(n);
                let phase = (fx + lx) * wx + (fy + ly) * wy;
                let result = result.mul(Complex32::from_angle(phase));

                output[n + (s + pattern.output_offset) * 6 + idx * DESCRIPTOR_LENGTH] = result;
            }
        }
    }
}

/// Build full descriptors for a set of keypoints from the two levels
/// bracketing their scale.
pub fn extract_descriptors(
    fine_level: &ImageBuffer<Complex32>,
    coarse_level: &ImageBuffer<Complex32>,
    positions: &[(f32, f32)],
) -> Vec<Complex32> {
    let mut output = vec![Complex32::default(); positions.len() * DESCRIPTOR_LENGTH];
    extract_into(fine_level, positions, &fine_pattern(), &mut output);
    extract_into(coarse_level, positions, &coarse_pattern(), &mut output);
    output
}
