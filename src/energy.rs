// energy.rs — Interest-energy map from one level's subbands.
//
// Treats the six oriented subband energies as samples of a local
// frequency distribution and accumulates them into a 2×2 structure
// tensor, weighting each subband by its approximate angular centre
// frequency. The map value is the ratio of the tensor's smaller
// eigenvalue to its (damped) larger one:
//
//   corner-like (energy in several orientations) → both eigenvalues
//   large → value near 1
//   edge-like (energy in one orientation)        → rank-1 tensor →
//   smaller eigenvalue ~0 → value ~0
//   flat                                         → value 0
//
// The +1000 damping keeps low-energy noise from producing spuriously
// high ratios.

use crate::image::{Complex32, ImageBuffer};

/// Angular centre frequencies of the six subbands, radians/sample.
const WX: [f32; 6] = [-1.4612, -3.2674, -4.3836, -4.3836, -3.2674, -1.4612];
const WY: [f32; 6] = [-4.3836, -3.2674, -1.4612, 1.4612, 3.2674, 4.3836];

/// Damping added to the larger eigenvalue before taking the ratio.
const DAMPING: f32 = 1000.0;

/// Eigenvalue ratio at a single pixel given the six |h|² energies.
#[inline]
fn eigen_ratio(abs_h_2: &[f32; 6]) -> f32 {
    let mut h00 = 0.0f32;
    let mut h11 = 0.0f32;
    let mut h01 = 0.0f32;
    for n in 0..6 {
        h00 -= WX[n] * WX[n] * abs_h_2[n];
        h11 -= WY[n] * WY[n] * abs_h_2[n];
        h01 -= WX[n] * WY[n] * abs_h_2[n];
    }

    // Closed-form eigenvalues of the (negated) 2×2 tensor.
    let root = (h00 * h00 + h11 * h11 - 2.0 * h11 * h00 + 4.0 * h01 * h01).sqrt();
    let l0 = -(h00 + h11 + root) / 2.0;
    let l1 = -(h00 + h11 - root) / 2.0;

    l0 / (l1 + DAMPING)
}

/// Compute the energy map of a 6-slice subband level.
///
/// Output has the level's extent, one f32 per pixel.
///
/// # Panics
/// Panics unless `level` has exactly 6 slices.
pub fn energy_map(level: &ImageBuffer<Complex32>) -> ImageBuffer<f32> {
    assert_eq!(
        level.slices(),
        6,
        "energy map needs the 6 oriented subbands, got {} slices",
        level.slices(),
    );

    let (width, height) = (level.width(), level.height());
    let mut out = ImageBuffer::new(width, height, 0, 1);

    for y in 0..height {
        for x in 0..width {
            let mut abs_h_2 = [0.0f32; 6];
            for (n, e) in abs_h_2.iter_mut().enumerate() {
                *e = level.get_in(n, x, y).abs_sq();
            }
            out.set(x, y, eigen_ratio(&abs_h_2));
        }
    }
    out
}
