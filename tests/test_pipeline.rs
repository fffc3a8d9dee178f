// tests/test_pipeline.rs — CPU pipeline integration tests: transform →
// energy → peaks → compaction → descriptors.

use wgdtcwt::compact;
use wgdtcwt::descriptor::{self, DESCRIPTOR_LENGTH};
use wgdtcwt::dtcwt;
use wgdtcwt::energy::energy_map;
use wgdtcwt::image::ImageBuffer;
use wgdtcwt::peaks::{self, PeakDetectorConfig};

/// Off-centre Gaussian blob; the fractional centre breaks the
/// symmetric-tie case that would defeat the strict-maximum test.
fn blob_image(w: usize, h: usize, cx: f32, cy: f32, sigma: f32) -> ImageBuffer<f32> {
    let mut img = ImageBuffer::new(w, h, 0, 1);
    for y in 0..h {
        for x in 0..w {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            img.set(x, y, 255.0 * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp());
        }
    }
    img
}

// ===== Transform =====

#[test]
fn transform_extents_camera_sized_input() {
    // VGA input, four octaves.
    let img = ImageBuffer::new(640, 480, 0, 1);
    let out = dtcwt::transform(&img, 1, 4, 1.0);

    assert_eq!(out.num_levels(), 4);
    assert_eq!((out.level(1).width(), out.level(1).height()), (320, 240));
    assert_eq!((out.level(2).width(), out.level(2).height()), (160, 120));
    assert_eq!((out.level(3).width(), out.level(3).height()), (80, 60));
    assert_eq!((out.level(4).width(), out.level(4).height()), (40, 30));
    for level in out.iter() {
        assert_eq!(level.slices(), 6);
    }
}

#[test]
fn transform_localises_an_impulse() {
    // A bright impulse should put each level's peak subband magnitude
    // near the corresponding position of the level grid.
    let mut img = ImageBuffer::new(32, 32, 0, 1);
    img.set(16, 16, 255.0);
    let out = dtcwt::transform(&img, 1, 2, 1.0);

    for level_num in 1..=2 {
        let level = out.level(level_num);
        let expected = 16.0 / (1 << level_num) as f32;
        let mut best = (0usize, 0usize, 0.0f32);
        for y in 0..level.height() {
            for x in 0..level.width() {
                let mut e = 0.0;
                for s in 0..6 {
                    e += level.get_in(s, x, y).abs_sq();
                }
                if e > best.2 {
                    best = (x, y, e);
                }
            }
        }
        assert!(
            (best.0 as f32 - expected).abs() <= 2.0
                && (best.1 as f32 - expected).abs() <= 2.0,
            "level {level_num}: peak energy at ({}, {}), expected near {expected}",
            best.0,
            best.1,
        );
    }
}

// ===== Energy maps =====

#[test]
fn energy_maps_are_bounded_ratios() {
    let img = blob_image(48, 40, 23.3, 18.8, 3.0);
    let out = dtcwt::transform(&img, 1, 3, 1.0);

    for level in out.iter() {
        let map = energy_map(level);
        assert_eq!(map.width(), level.width());
        assert_eq!(map.height(), level.height());
        for (x, y, v) in map.pixels() {
            assert!(
                (0.0..1.0).contains(&v) && v.is_finite(),
                "energy ratio out of range at ({x},{y}): {v}",
            );
        }
    }
}

#[test]
fn blob_energy_concentrates_near_blob() {
    let img = blob_image(64, 64, 33.4, 30.7, 2.5);
    let out = dtcwt::transform(&img, 1, 1, 1.0);
    let map = energy_map(out.level(1));

    let mut best = (0usize, 0usize, f32::NEG_INFINITY);
    for (x, y, v) in map.pixels() {
        if v > best.2 {
            best = (x, y, v);
        }
    }
    // Level-1 grid halves the coordinates.
    assert!(
        (best.0 as f32 - 33.4 / 2.0).abs() <= 4.0
            && (best.1 as f32 - 30.7 / 2.0).abs() <= 4.0,
        "energy peak at ({}, {}) far from the blob",
        best.0,
        best.1,
    );
}

// ===== Detection and compaction =====

#[test]
fn detection_feeds_descriptors_end_to_end() {
    let img = blob_image(64, 64, 31.4, 33.6, 2.5);
    let out = dtcwt::transform(&img, 1, 3, 1.0);

    let mut maps: Vec<ImageBuffer<f32>> = out.iter().map(energy_map).collect();
    // Guarantee one detection regardless of the blob's energy profile.
    maps[0].set(5, 5, 10.0);

    let scales = [2.0f32, 4.0, 8.0];
    let config = PeakDetectorConfig {
        threshold: 0.05,
        eigen_ratio_threshold: 0.0,
    };
    let levels = peaks::detect_across_levels(&maps, &scales, &config, &[64, 64, 64]);
    let total_found: usize = levels.iter().map(|l| l.found).sum();
    assert!(total_found >= 1);

    let combined = compact::compact(&levels, 128);
    assert_eq!(combined.len(), total_found.min(128));

    // Describe the level-1 detections from levels 1 and 2.
    let positions: Vec<(f32, f32)> = levels[0]
        .peaks
        .iter()
        .map(|k| (k.x / scales[0], k.y / scales[0]))
        .collect();
    assert!(!positions.is_empty());
    let descs = descriptor::extract_descriptors(out.level(1), out.level(2), &positions);
    assert_eq!(descs.len(), positions.len() * DESCRIPTOR_LENGTH);
    for d in &descs {
        assert!(d.re.is_finite() && d.im.is_finite());
    }
}

#[test]
fn compaction_respects_cap_across_levels() {
    let mut fine = ImageBuffer::new(33, 33, 0, 1);
    let mut coarse = ImageBuffer::new(17, 17, 0, 1);
    // Peaks far apart in real units so no cross-level suppression.
    for (x, y) in [(3, 3), (3, 29), (29, 3), (29, 29)] {
        fine.set(x, y, 1.0);
    }
    for (x, y) in [(8, 2), (2, 8)] {
        coarse.set(x, y, 1.0);
    }

    let levels = peaks::detect_across_levels(
        &[fine, coarse],
        &[1.0, 2.0],
        &PeakDetectorConfig::default(),
        &[10, 10],
    );
    assert_eq!(levels[0].found, 4);
    assert_eq!(levels[1].found, 2);

    let capped = compact::compact(&levels, 5);
    assert_eq!(capped.len(), 5);
    // Level order is preserved: the fine level's four records first.
    assert!(capped[..4].iter().all(|k| k.scale == 1.0));
    assert_eq!(capped[4].scale, 2.0);
}

// ===== Interleaved trees =====

#[test]
fn interleaved_trees_walk_scale_space() {
    let img = blob_image(64, 64, 32.2, 31.7, 3.0);
    let out = dtcwt::interleaved_scales(&img, 1, 2, 1.0, &[0.5, 1.0]);

    assert_eq!(out.len(), 4);
    // Consecutive flat indices must not decrease in scale.
    let scales: Vec<f32> = (0..out.len()).map(|i| out.scale_of_idx(i)).collect();
    for pair in scales.windows(2) {
        assert!(pair[0] <= pair[1], "scales not monotone: {scales:?}");
    }
    // Each output still carries the six oriented subbands.
    for idx in 0..out.len() {
        assert_eq!(out.subbands(idx).slices(), 6);
    }
}
