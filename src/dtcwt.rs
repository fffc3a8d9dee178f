// dtcwt.rs — CPU reference dual-tree complex wavelet transform.
//
// Level 1 applies the odd-length filters without decimation (this also
// absorbs odd-sized inputs: the filtered planes are extended to even
// extents before the complex conversion). Levels ≥ 2 apply the
// even-length quarter-shift filters, decimating by two per axis and
// interleaving the two trees in the output columns/rows. Each
// output-producing level then converts interleaved 2×2 blocks into six
// oriented complex subbands:
//
//   slice   orientation   produced from
//     0        ~15°       lo(x) then highpass(y)      ("hilo")
//     1        ~45°       bandpass both axes          ("bpbp")
//     2        ~75°       highpass(x) then lo(y)      ("lohi")
//     3       ~105°       lohi, conjugate partner
//     4       ~135°       bpbp, conjugate partner
//     5       ~165°       hilo, conjugate partner
//
// Levels below `start_level` compute only the lowpass cascade.

use crate::convolution::{
    decimate_filter_x, decimate_filter_y, filter_x, filter_y, quad_to_complex,
};
use crate::filters::{level1_filters, level2_filters};
use crate::image::{Complex32, ImageBuffer};

/// Extent of one axis after a decimating level: halve, then round up to
/// even. The extra sample appears exactly when the decimating filters
/// take their symmetric extension (input extent not a multiple of 4), so
/// the two trees stay balanced.
pub fn decimated_extent(extent: usize) -> usize {
    extent / 2 + usize::from(extent % 4 != 0)
}

/// The subbands of the levels `start_level .. start_level + num_levels`.
/// Each level is a 6-slice complex image.
pub struct TransformOutput {
    start_level: usize,
    levels: Vec<ImageBuffer<Complex32>>,
}

impl TransformOutput {
    /// Subbands of absolute level `level_num` (1-based, ≥ `start_level`).
    pub fn level(&self, level_num: usize) -> &ImageBuffer<Complex32> {
        &self.levels[level_num - self.start_level]
    }

    pub fn start_level(&self) -> usize {
        self.start_level
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Iterate levels from `start_level` upwards.
    pub fn iter(&self) -> impl Iterator<Item = &ImageBuffer<Complex32>> {
        self.levels.iter()
    }
}

/// Append one duplicated column if the width is odd.
///
/// The level-1 filters are symmetric, so evaluating them one sample past
/// the end of the mirror-extended signal reproduces the last output;
/// duplication is exact, not an approximation.
fn evenize_x(img: ImageBuffer<f32>) -> ImageBuffer<f32> {
    if img.width() % 2 == 0 {
        return img;
    }
    let (w, h) = (img.width(), img.height());
    let mut out = ImageBuffer::new(w + 1, h, 0, 1);
    for y in 0..h {
        for x in 0..w {
            out.set(x, y, img.get(x, y));
        }
        out.set(w, y, img.get(w - 1, y));
    }
    out
}

/// Append one duplicated row if the height is odd. See `evenize_x`.
fn evenize_y(img: ImageBuffer<f32>) -> ImageBuffer<f32> {
    if img.height() % 2 == 0 {
        return img;
    }
    let (w, h) = (img.width(), img.height());
    let mut out = ImageBuffer::new(w, h + 1, 0, 1);
    for y in 0..h {
        for x in 0..w {
            out.set(x, y, img.get(x, y));
        }
    }
    for x in 0..w {
        out.set(x, h, img.get(x, h - 1));
    }
    out
}

/// Write a subband pair into two slices of the 6-slice level image.
fn store_pair(
    level: &mut ImageBuffer<Complex32>,
    quad: &ImageBuffer<f32>,
    slice_a: usize,
    slice_b: usize,
) {
    let (sb0, sb1) = quad_to_complex(quad);
    for (x, y, v) in sb0.pixels() {
        level.set_in(slice_a, x, y, v);
    }
    for (x, y, v) in sb1.pixels() {
        level.set_in(slice_b, x, y, v);
    }
}

/// Run the transform over `num_levels` levels starting at `start_level`.
///
/// `scale_factor` is folded into the filters as an overall per-level
/// gain (each level's outputs scale linearly with it); pass 1.0 for the
/// plain transform.
///
/// # Panics
/// Panics if `start_level` is 0 or `num_levels` is 0.
pub fn transform(
    image: &ImageBuffer<f32>,
    start_level: usize,
    num_levels: usize,
    scale_factor: f32,
) -> TransformOutput {
    assert!(start_level >= 1, "levels are 1-based; start_level must be >= 1");
    assert!(num_levels >= 1, "num_levels must be >= 1");

    let l1 = level1_filters(scale_factor);
    let l2 = level2_filters(scale_factor);

    let mut levels = Vec::with_capacity(num_levels);
    let mut lolo: Option<ImageBuffer<f32>> = None;

    for l in 1..start_level + num_levels {
        let produces_outputs = l >= start_level;

        if l == 1 {
            // Non-decimating level over the raw input.
            let lo = evenize_x(filter_x(image, &l1.h0));
            let next_lolo = evenize_y(filter_y(&lo, &l1.h0));

            if produces_outputs {
                let hi = evenize_x(filter_x(image, &l1.h1));
                let bp = evenize_x(filter_x(image, &l1.bp));

                let lohi = evenize_y(filter_y(&hi, &l1.h0));
                let hilo = evenize_y(filter_y(&lo, &l1.h1));
                let bpbp = evenize_y(filter_y(&bp, &l1.bp));

                let mut level = ImageBuffer::with_slices(
                    next_lolo.width() / 2,
                    next_lolo.height() / 2,
                    0,
                    1,
                    6,
                );
                store_pair(&mut level, &lohi, 2, 3);
                store_pair(&mut level, &hilo, 0, 5);
                store_pair(&mut level, &bpbp, 1, 4);
                levels.push(level);
            }
            lolo = Some(next_lolo);
        } else {
            let input = lolo.take().unwrap_or_else(|| unreachable!());

            let lo = decimate_filter_x(&input, &l2.h0, false);
            let next_lolo = decimate_filter_y(&lo, &l2.h0, false);

            if produces_outputs {
                let hi = decimate_filter_x(&input, &l2.h1, true);
                let bp = decimate_filter_x(&input, &l2.bp, true);

                let hilo = decimate_filter_y(&lo, &l2.h1, true);
                let bpbp = decimate_filter_y(&bp, &l2.bp, true);
                let lohi = decimate_filter_y(&hi, &l2.h0, false);

                let mut level = ImageBuffer::with_slices(
                    next_lolo.width() / 2,
                    next_lolo.height() / 2,
                    0,
                    1,
                    6,
                );
                store_pair(&mut level, &hilo, 0, 5);
                store_pair(&mut level, &bpbp, 1, 4);
                store_pair(&mut level, &lohi, 2, 3);
                levels.push(level);
            }
            lolo = Some(next_lolo);
        }
    }

    TransformOutput {
        start_level,
        levels,
    }
}

// ---------------------------------------------------------------------------
// Interleaved multi-scale trees
// ---------------------------------------------------------------------------

/// Transforms of several pre-scaled copies of one input, giving a finer
/// sampling of scale space than the octave-per-level transform alone.
///
/// Outputs are indexed tree-major within each level, so consecutive
/// indices walk scale space monotonically when the per-tree scales do.
pub struct InterleavedOutput {
    scales: Vec<f32>,
    start_level: usize,
    num_levels: usize,
    trees: Vec<TransformOutput>,
}

impl InterleavedOutput {
    pub fn num_trees(&self) -> usize {
        self.scales.len()
    }

    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    pub fn start_level(&self) -> usize {
        self.start_level
    }

    /// Flat index of (tree, level): trees interleave within each level.
    pub fn idx_from_tree_level(&self, tree: usize, level: usize) -> usize {
        tree + self.num_trees() * (level - self.start_level)
    }

    /// Inverse of `idx_from_tree_level`.
    pub fn tree_level_from_idx(&self, idx: usize) -> (usize, usize) {
        let tree = idx % self.num_trees();
        let level = self.start_level + (idx - tree) / self.num_trees();
        (tree, level)
    }

    /// Image-space scale of one output: the tree's pre-scale times the
    /// level's octave factor.
    pub fn scale(&self, tree: usize, level: usize) -> f32 {
        self.scales[tree] * (1u32 << level) as f32
    }

    pub fn scale_of_idx(&self, idx: usize) -> f32 {
        let (tree, level) = self.tree_level_from_idx(idx);
        self.scale(tree, level)
    }

    pub fn level(&self, tree: usize, level: usize) -> &ImageBuffer<Complex32> {
        self.trees[tree].level(level)
    }

    pub fn subbands(&self, idx: usize) -> &ImageBuffer<Complex32> {
        let (tree, level) = self.tree_level_from_idx(idx);
        self.level(tree, level)
    }

    /// Total number of subband sets across all trees and levels.
    pub fn len(&self) -> usize {
        self.num_trees() * self.num_levels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bilinear resize by `scale`, centre-aligned, clamping at the edges.
fn rescale(input: &ImageBuffer<f32>, scale: f32) -> ImageBuffer<f32> {
    let out_w = ((input.width() as f32 * scale) as usize).max(1);
    let out_h = ((input.height() as f32 * scale) as usize).max(1);
    let mut out = ImageBuffer::new(out_w, out_h, 0, 1);

    let clamped = |ix: isize, iy: isize| -> f32 {
        let x = ix.clamp(0, input.width() as isize - 1) as usize;
        let y = iy.clamp(0, input.height() as isize - 1) as usize;
        input.get(x, y)
    };

    for y in 0..out_h {
        for x in 0..out_w {
            let sx = (x as f32 + 0.5) / scale - 0.5;
            let sy = (y as f32 + 0.5) / scale - 0.5;
            let x0 = sx.floor();
            let y0 = sy.floor();
            let fx = sx - x0;
            let fy = sy - y0;
            let (ix, iy) = (x0 as isize, y0 as isize);
            let v = (1.0 - fx) * (1.0 - fy) * clamped(ix, iy)
                + fx * (1.0 - fy) * clamped(ix + 1, iy)
                + (1.0 - fx) * fy * clamped(ix, iy + 1)
                + fx * fy * clamped(ix + 1, iy + 1);
            out.set(x, y, v);
        }
    }
    out
}

/// Run one transform per entry of `scales`, each over a bilinearly
/// rescaled copy of the input. The per-tree gain compensation is folded
/// into each tree's filters via `scale_factor`.
///
/// # Panics
/// Panics if `scales` is empty or contains a non-positive scale.
pub fn interleaved_scales(
    image: &ImageBuffer<f32>,
    start_level: usize,
    num_levels: usize,
    scale_factor: f32,
    scales: &[f32],
) -> InterleavedOutput {
    assert!(!scales.is_empty(), "need at least one tree scale");
    assert!(
        scales.iter().all(|&s| s > 0.0),
        "tree scales must be positive"
    );

    let trees = scales
        .iter()
        .map(|&s| {
            let scaled = if (s - 1.0).abs() < f32::EPSILON {
                image.clone()
            } else {
                rescale(image, s)
            };
            transform(&scaled, start_level, num_levels, scale_factor)
        })
        .collect();

    InterleavedOutput {
        scales: scales.to_vec(),
        start_level,
        num_levels,
        trees,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centred_impulse(extent: usize) -> ImageBuffer<f32> {
        let mut img = ImageBuffer::new(extent, extent, 0, 1);
        img.set(extent / 2, extent / 2, 1.0);
        img
    }

    fn max_abs(level: &ImageBuffer<Complex32>, slice: usize) -> f32 {
        let mut m = 0.0f32;
        for y in 0..level.height() {
            for x in 0..level.width() {
                m = m.max(level.get_in(slice, x, y).abs_sq());
            }
        }
        m.sqrt()
    }

    #[test]
    fn test_output_extents() {
        let img = ImageBuffer::new(32, 32, 0, 1);
        let out = transform(&img, 1, 3, 1.0);
        assert_eq!(out.num_levels(), 3);
        assert_eq!(out.level(1).width(), 16);
        assert_eq!(out.level(1).height(), 16);
        assert_eq!(out.level(2).width(), 8);
        assert_eq!(out.level(3).width(), 4);
        for level in out.iter() {
            assert_eq!(level.slices(), 6);
        }
    }

    #[test]
    fn test_odd_input_extents() {
        // 31 → level 1 treats it as 32; decimation continues from there.
        let img = ImageBuffer::new(31, 17, 0, 1);
        let out = transform(&img, 1, 2, 1.0);
        assert_eq!(out.level(1).width(), 16);
        assert_eq!(out.level(1).height(), 9);
        // Level 2 input is 32×18; 18 % 4 != 0 so the height pads.
        assert_eq!(out.level(2).width(), 8);
        assert_eq!(out.level(2).height(), 5);
    }

    #[test]
    fn test_decimated_extent() {
        assert_eq!(decimated_extent(32), 16);
        assert_eq!(decimated_extent(18), 10);
        assert_eq!(decimated_extent(20), 10);
    }

    #[test]
    fn test_start_level_skips_outputs() {
        let img = centred_impulse(64);
        let out = transform(&img, 3, 2, 1.0);
        assert_eq!(out.start_level(), 3);
        assert_eq!(out.num_levels(), 2);
        // Level 3 input extent: 64 → 32 → 16; subbands 8×8.
        assert_eq!(out.level(3).width(), 8);
        assert_eq!(out.level(4).width(), 4);
    }

    #[test]
    fn test_impulse_excites_all_orientations() {
        let img = centred_impulse(32);
        let out = transform(&img, 1, 2, 1.0);
        for level_num in 1..=2 {
            for slice in 0..6 {
                assert!(
                    max_abs(out.level(level_num), slice) > 1e-4,
                    "level {level_num} subband {slice} is dead",
                );
            }
        }
    }

    #[test]
    fn test_constant_image_has_silent_subbands() {
        let img = ImageBuffer::from_vec(16, 16, vec![7.0; 256]);
        let out = transform(&img, 1, 2, 1.0);
        // Every subband involves at least one (near-)zero-DC filter.
        for level_num in 1..=2 {
            for slice in 0..6 {
                assert!(
                    max_abs(out.level(level_num), slice) < 2e-2,
                    "level {level_num} subband {slice} leaked DC",
                );
            }
        }
    }

    #[test]
    fn test_scale_factor_scales_outputs_linearly() {
        let mut img = ImageBuffer::new(16, 16, 0, 1);
        for (i, v) in (0..256).enumerate() {
            img.set(i % 16, i / 16, ((v * 13 + 5) % 23) as f32);
        }
        let unit = transform(&img, 1, 1, 1.0);
        let tripled = transform(&img, 1, 1, 3.0);
        for slice in 0..6 {
            for y in 0..unit.level(1).height() {
                for x in 0..unit.level(1).width() {
                    let a = unit.level(1).get_in(slice, x, y);
                    let b = tripled.level(1).get_in(slice, x, y);
                    assert!((b.re - 3.0 * a.re).abs() < 1e-2);
                    assert!((b.im - 3.0 * a.im).abs() < 1e-2);
                }
            }
        }
    }

    #[test]
    fn test_interleaved_index_mapping() {
        let img = ImageBuffer::new(32, 32, 0, 1);
        let out = interleaved_scales(&img, 1, 2, 1.0, &[1.0, 0.7]);
        assert_eq!(out.num_trees(), 2);
        assert_eq!(out.len(), 4);
        // Tree-major within a level.
        assert_eq!(out.idx_from_tree_level(0, 1), 0);
        assert_eq!(out.idx_from_tree_level(1, 1), 1);
        assert_eq!(out.idx_from_tree_level(0, 2), 2);
        for idx in 0..out.len() {
            let (tree, level) = out.tree_level_from_idx(idx);
            assert_eq!(out.idx_from_tree_level(tree, level), idx);
        }
    }

    #[test]
    fn test_interleaved_scale_values() {
        let img = ImageBuffer::new(32, 32, 0, 1);
        let out = interleaved_scales(&img, 1, 2, 1.0, &[1.0, 0.5]);
        assert_eq!(out.scale(0, 1), 2.0);
        assert_eq!(out.scale(1, 1), 1.0);
        assert_eq!(out.scale(0, 2), 4.0);
        assert_eq!(out.scale_of_idx(1), 1.0);
    }

    #[test]
    fn test_interleaved_tree_extents_follow_prescale() {
        let img = ImageBuffer::new(64, 64, 0, 1);
        let out = interleaved_scales(&img, 1, 1, 1.0, &[1.0, 0.5]);
        assert_eq!(out.level(0, 1).width(), 32);
        assert_eq!(out.level(1, 1).width(), 16);
    }
}
