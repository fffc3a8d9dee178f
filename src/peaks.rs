// peaks.rs — CPU reference scale-space peak detector.
//
// Works over a stack of energy maps, one per scale, with coarser maps
// smaller than finer ones. A pixel becomes a keypoint when it is
//
//   1. a strict maximum over its 8 in-level neighbours,
//   2. at least `threshold`,
//   3. greater than the bilinearly-sampled energy at the corresponding
//      position of the adjacent finer and coarser maps (levels with no
//      finer/coarser neighbour compare against an implicit zero map, so
//      condition 3 degenerates to "energy positive"),
//   4. not edge-shaped, when the eigenvalue-ratio test is enabled.
//
// Map centres are aligned across levels: pixel p of a map with scale s
// sits at real-image position (p - centre) * s, centre = (extent-1)/2.
// Keypoint coordinates are reported in those centred real units, which
// is also what the descriptor sampler consumes.
//
// Positions are refined to sub-pixel accuracy with an independent
// parabolic fit per axis.

use crate::image::{sample_bilinear_zero, ImageBuffer};

/// Floats per keypoint record in flattened buffers.
pub const FLOATS_PER_KEYPOINT: usize = 4;

/// One detected keypoint. `x`/`y` are centred real-image coordinates,
/// `scale` the detecting level's scale, `strength` the peak energy.
///
/// The layout matches the GPU keypoint record (4 floats).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub strength: f32,
}

/// Detection thresholds.
#[derive(Copy, Clone, Debug)]
pub struct PeakDetectorConfig {
    /// Minimum energy for a maximum to count.
    pub threshold: f32,
    /// Minimum |λ_small| / |λ_large| of the energy map's local Hessian;
    /// ridge-shaped maxima fall below this. 0 disables the test.
    pub eigen_ratio_threshold: f32,
}

impl Default for PeakDetectorConfig {
    fn default() -> Self {
        PeakDetectorConfig {
            threshold: 0.1,
            eigen_ratio_threshold: 0.0,
        }
    }
}

/// Maxima of one level: the stored records plus the total found, which
/// may exceed `peaks.len()` when capacity ran out.
#[derive(Debug, Default)]
pub struct LevelPeaks {
    pub peaks: Vec<Keypoint>,
    pub found: usize,
}

#[inline]
fn centre(extent: usize) -> f32 {
    (extent as f32 - 1.0) / 2.0
}

/// Sample an optional neighbour map at the real-image position `rx, ry`.
/// A missing neighbour acts as an infinite zero field.
fn neighbour_energy(neighbour: Option<(&ImageBuffer<f32>, f32)>, rx: f32, ry: f32) -> f32 {
    match neighbour {
        None => 0.0,
        Some((map, scale)) => {
            let px = rx / scale + centre(map.width());
            let py = ry / scale + centre(map.height());
            sample_bilinear_zero(map, px, py)
        }
    }
}

/// Parabolic sub-pixel offset from three samples along one axis,
/// clamped to half a pixel. `c` is the peak value, `m`/`p` its
/// neighbours.
#[inline]
fn parabolic_offset(m: f32, c: f32, p: f32) -> f32 {
    let denom = m - 2.0 * c + p;
    if denom == 0.0 {
        return 0.0;
    }
    (0.5 * (m - p) / denom).clamp(-0.5, 0.5)
}

/// Eigenvalue ratio |λ_small| / |λ_large| of the local 3×3 Hessian.
fn hessian_eigen_ratio(map: &ImageBuffer<f32>, x: usize, y: usize) -> f32 {
    let f = |dx: isize, dy: isize| -> f32 {
        map.get(
            (x as isize + dx) as usize,
            (y as isize + dy) as usize,
        )
    };
    let dxx = f(-1, 0) - 2.0 * f(0, 0) + f(1, 0);
    let dyy = f(0, -1) - 2.0 * f(0, 0) + f(0, 1);
    let dxy = (f(1, 1) - f(-1, 1) - f(1, -1) + f(-1, -1)) / 4.0;

    let root = ((dxx - dyy) * (dxx - dyy) + 4.0 * dxy * dxy).sqrt();
    let l0 = ((dxx + dyy + root) / 2.0).abs();
    let l1 = ((dxx + dyy - root) / 2.0).abs();

    let (small, large) = if l0 < l1 { (l0, l1) } else { (l1, l0) };
    if large == 0.0 {
        0.0
    } else {
        small / large
    }
}

/// Find the scale-space maxima of one energy map.
///
/// At most `max_outputs` records are stored; `found` keeps counting past
/// that so callers can detect truncation.
pub fn find_peaks(
    map: &ImageBuffer<f32>,
    scale: f32,
    finer: Option<(&ImageBuffer<f32>, f32)>,
    coarser: Option<(&ImageBuffer<f32>, f32)>,
    config: &PeakDetectorConfig,
    max_outputs: usize,
) -> LevelPeaks {
    let (width, height) = (map.width(), map.height());
    let mut result = LevelPeaks::default();
    if width < 3 || height < 3 {
        return result;
    }

    let (cx, cy) = (centre(width), centre(height));

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let v = map.get(x, y);
            if v < config.threshold {
                continue;
            }

            // Strict maximum over the 8 in-level neighbours.
            let mut surround_max = f32::NEG_INFINITY;
            for (dx, dy) in [
                (-1, -1),
                (0, -1),
                (1, -1),
                (-1, 0),
                (1, 0),
                (-1, 1),
                (0, 1),
                (1, 1),
            ] {
                let n = map.get(
                    (x as isize + dx) as usize,
                    (y as isize + dy) as usize,
                );
                surround_max = surround_max.max(n);
            }
            if v <= surround_max {
                continue;
            }

            // Must also dominate scale space.
            let rx = (x as f32 - cx) * scale;
            let ry = (y as f32 - cy) * scale;
            if v <= neighbour_energy(finer, rx, ry) {
                continue;
            }
            if v <= neighbour_energy(coarser, rx, ry) {
                continue;
            }

            if config.eigen_ratio_threshold > 0.0
                && hessian_eigen_ratio(map, x, y) < config.eigen_ratio_threshold
            {
                continue;
            }

            let sub_x = parabolic_offset(map.get(x - 1, y), v, map.get(x + 1, y));
            let sub_y = parabolic_offset(map.get(x, y - 1), v, map.get(x, y + 1));

            result.found += 1;
            if result.peaks.len() < max_outputs {
                result.peaks.push(Keypoint {
                    x: (x as f32 + sub_x - cx) * scale,
                    y: (y as f32 + sub_y - cy) * scale,
                    scale,
                    strength: v,
                });
            }
        }
    }
    result
}

/// Run `find_peaks` on every level of an energy-map stack, wiring each
/// level's finer and coarser neighbours.
///
/// # Panics
/// Panics unless `maps`, `scales` and `max_counts` agree in length.
pub fn detect_across_levels(
    maps: &[ImageBuffer<f32>],
    scales: &[f32],
    config: &PeakDetectorConfig,
    max_counts: &[usize],
) -> Vec<LevelPeaks> {
    assert_eq!(maps.len(), scales.len(), "one scale per energy map");
    assert_eq!(maps.len(), max_counts.len(), "one capacity per energy map");

    (0..maps.len())
        .map(|n| {
            let finer = n.checked_sub(1).map(|m| (&maps[m], scales[m]));
            let coarser = (n + 1 < maps.len()).then(|| (&maps[n + 1], scales[n + 1]));
            find_peaks(&maps[n], scales[n], finer, coarser, config, max_counts[n])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with_peak(extent: usize, x: usize, y: usize, v: f32) -> ImageBuffer<f32> {
        let mut map = ImageBuffer::new(extent, extent, 0, 1);
        map.set(x, y, v);
        map
    }

    fn config() -> PeakDetectorConfig {
        PeakDetectorConfig {
            threshold: 0.1,
            eigen_ratio_threshold: 0.0,
        }
    }

    #[test]
    fn test_single_peak_centred_coordinates() {
        let map = map_with_peak(9, 6, 4, 1.0);
        let out = find_peaks(&map, 2.0, None, None, &config(), 10);
        assert_eq!(out.found, 1);
        let kp = out.peaks[0];
        // Centre is pixel 4; (6 - 4) * 2 = 4 real units right of it.
        assert!((kp.x - 4.0).abs() < 1e-6);
        assert!((kp.y - 0.0).abs() < 1e-6);
        assert_eq!(kp.scale, 2.0);
        assert_eq!(kp.strength, 1.0);
    }

    #[test]
    fn test_threshold_rejects_weak_peaks() {
        let map = map_with_peak(9, 4, 4, 0.05);
        let out = find_peaks(&map, 1.0, None, None, &config(), 10);
        assert_eq!(out.found, 0);
    }

    #[test]
    fn test_plateau_is_not_strict_maximum() {
        let mut map = ImageBuffer::new(9, 9, 0, 1);
        map.set(4, 4, 1.0);
        map.set(5, 4, 1.0);
        let out = find_peaks(&map, 1.0, None, None, &config(), 10);
        assert_eq!(out.found, 0);
    }

    #[test]
    fn test_border_pixels_never_maxima() {
        let map = map_with_peak(9, 0, 4, 5.0);
        let out = find_peaks(&map, 1.0, None, None, &config(), 10);
        assert_eq!(out.found, 0);
    }

    #[test]
    fn test_coarser_level_suppresses() {
        // Peak at the exact centre so the cross-level mapping is exact.
        let map = map_with_peak(9, 4, 4, 1.0);
        // Coarser map (half extent, double scale) carries more energy at
        // the same real position.
        let coarser = map_with_peak(5, 2, 2, 2.0);
        let out = find_peaks(&map, 1.0, None, Some((&coarser, 2.0)), &config(), 10);
        assert_eq!(out.found, 0);

        // With a weaker coarser value the peak survives.
        let coarser = map_with_peak(5, 2, 2, 0.5);
        let out = find_peaks(&map, 1.0, None, Some((&coarser, 2.0)), &config(), 10);
        assert_eq!(out.found, 1);
    }

    #[test]
    fn test_finer_level_suppresses() {
        let map = map_with_peak(9, 4, 4, 1.0);
        let finer = map_with_peak(17, 8, 8, 1.5);
        let out = find_peaks(&map, 2.0, Some((&finer, 1.0)), None, &config(), 10);
        assert_eq!(out.found, 0);
    }

    #[test]
    fn test_subpixel_shifts_toward_heavier_neighbour() {
        let mut map = ImageBuffer::new(9, 9, 0, 1);
        map.set(4, 4, 1.0);
        map.set(5, 4, 0.5);
        // Parabola through (3,0), (4,1), (5,0.5): apex right of centre.
        let out = find_peaks(&map, 1.0, None, None, &config(), 10);
        assert_eq!(out.found, 1);
        let kp = out.peaks[0];
        assert!(kp.x > 0.0 && kp.x <= 0.5, "sub-pixel x was {}", kp.x);
        assert!((kp.y - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_capacity_truncates_but_counts() {
        let mut map = ImageBuffer::new(16, 16, 0, 1);
        map.set(3, 3, 1.0);
        map.set(9, 9, 1.0);
        map.set(12, 4, 1.0);
        let out = find_peaks(&map, 1.0, None, None, &config(), 2);
        assert_eq!(out.found, 3);
        assert_eq!(out.peaks.len(), 2);
    }

    #[test]
    fn test_eigen_ratio_rejects_ridge() {
        // Sharp along x, nearly flat along y: an edge response.
        let mut map = ImageBuffer::new(9, 9, 0, 1);
        for y in 0..9 {
            let falloff = 1.0 - 0.001 * (y as f32 - 4.0).abs();
            map.set(4, y, falloff);
        }
        let strict = PeakDetectorConfig {
            threshold: 0.1,
            eigen_ratio_threshold: 0.4,
        };
        let out = find_peaks(&map, 1.0, None, None, &strict, 10);
        assert_eq!(out.found, 0, "ridge survived the eigen-ratio test");

        // Disabled, the ridge's apex is still a strict maximum.
        let out = find_peaks(&map, 1.0, None, None, &config(), 10);
        assert_eq!(out.found, 1);
    }

    #[test]
    fn test_detect_across_levels_wires_neighbours() {
        // Same real-position peak on two levels; only the stronger wins.
        let mut fine = ImageBuffer::new(9, 9, 0, 1);
        fine.set(4, 4, 1.0);
        let mut coarse = ImageBuffer::new(5, 5, 0, 1);
        coarse.set(2, 2, 2.0);

        let out = detect_across_levels(
            &[fine, coarse],
            &[1.0, 2.0],
            &config(),
            &[10, 10],
        );
        assert_eq!(out[0].found, 0);
        assert_eq!(out[1].found, 1);
        assert_eq!(out[1].peaks[0].scale, 2.0);
    }
}
