// filters.rs — Wavelet analysis filter coefficients.
//
// Two coefficient sets drive the whole transform:
//
//   Level 1 (odd-length, non-decimating): h0 lowpass, h1 highpass and a
//   bandpass h2 used to synthesise the 45°/135° subbands with better
//   directional selectivity than the plain highpass would give.
//
//   Levels ≥ 2 (even-length, decimating quarter-sample-shift): h0/h1/h2
//   again, applied twice per output sample to produce the two
//   quarter-shifted trees.
//
// Every coefficient is pre-multiplied by sqrt(scale_factor) at
// construction. A filter is applied once per axis, so a full 2D level
// scales by scale_factor overall; interleaved multi-scale trees use this
// to fold their per-tree gain into the filters instead of adding a
// separate scaling pass.

/// One level's analysis filters. `h0` is the lowpass, `h1` the highpass,
/// `bp` the bandpass used for the two diagonal subband pairs.
#[derive(Clone, Debug)]
pub struct FilterSet {
    pub h0: Vec<f32>,
    pub h1: Vec<f32>,
    pub bp: Vec<f32>,
}

impl FilterSet {
    /// Longest filter length in the set.
    pub fn max_len(&self) -> usize {
        self.h0.len().max(self.h1.len()).max(self.bp.len())
    }
}

// 13-tap near-symmetric lowpass.
const H0_LEVEL1: [f64; 13] = [
    -0.001757812500000,
    0.0,
    0.022265625000000,
    -0.046875000000000,
    -0.048242187500000,
    0.296875000000000,
    0.555468750000000,
    0.296875000000000,
    -0.048242187500000,
    -0.046875000000000,
    0.022265625000000,
    0.0,
    -0.001757812500000,
];

// 15-tap near-symmetric highpass.
const H1_LEVEL1: [f64; 15] = [
    0.001341901506696,
    -0.001883370535714,
    -0.007156808035714,
    0.023856026785714,
    0.055643136160714,
    -0.051688058035714,
    -0.299757603236607,
    0.559430803571429,
    -0.299757603236607,
    -0.051688058035714,
    0.055643136160714,
    0.023856026785714,
    -0.007156808035714,
    -0.001883370535714,
    0.001341901506696,
];

// 15-tap bandpass for the diagonal subbands.
const BP_LEVEL1: [f64; 15] = [
    -7.817824798259500e-05,
    4.185820847068100e-03,
    8.191787178883640e-03,
    -7.423274024802630e-03,
    -6.153842687991170e-02,
    -1.481582309116910e-01,
    -1.170763016392160e-01,
    6.529082158435900e-01,
    -1.170763016392160e-01,
    -1.481582309116910e-01,
    -6.153842687991170e-02,
    -7.423274024802630e-03,
    8.191787178883640e-03,
    4.185820847068100e-03,
    -7.817824798259490e-05,
];

// 14-tap quarter-sample-shift lowpass.
const H0_LEVEL2: [f64; 14] = [
    -0.00455689562847549,
    -0.00543947593727412,
    0.01702522388155399,
    0.02382538479492030,
    -0.10671180468666540,
    0.01186609203379700,
    0.56881042071212273,
    0.75614564389252248,
    0.27529538466888204,
    -0.11720388769911527,
    -0.03887280126882779,
    0.03466034684485349,
    -0.00388321199915849,
    0.00325314276365318,
];

// 14-tap quarter-sample-shift highpass.
const H1_LEVEL2: [f64; 14] = [
    -0.00325314276365318,
    -0.00388321199915849,
    -0.03466034684485349,
    -0.03887280126882779,
    0.11720388769911527,
    0.27529538466888204,
    -0.75614564389252248,
    0.56881042071212273,
    -0.01186609203379700,
    -0.10671180468666540,
    -0.02382538479492030,
    0.01702522388155399,
    0.00543947593727412,
    -0.00455689562847549,
];

// 14-tap quarter-sample-shift bandpass.
const BP_LEVEL2: [f64; 14] = [
    -2.77165349347537e-03,
    -4.32919303381105e-04,
    2.10100577283097e-02,
    6.14446533755929e-02,
    1.73241472867428e-01,
    -4.47647940175083e-02,
    -8.38137840090472e-01,
    4.36787385780317e-01,
    2.62691880616686e-01,
    -7.62474758151248e-03,
    -2.63685613793659e-02,
    -2.54554351814246e-02,
    -9.59514305416110e-03,
    -2.43562670333119e-05,
];

fn scaled(coeffs: &[f64], scale_factor: f32) -> Vec<f32> {
    let g = (scale_factor as f64).sqrt();
    coeffs.iter().map(|&c| (c * g) as f32).collect()
}

/// Level-1 (non-decimating) filters, pre-scaled by `sqrt(scale_factor)`.
///
/// # Panics
/// Panics if `scale_factor` is not positive.
pub fn level1_filters(scale_factor: f32) -> FilterSet {
    assert!(scale_factor > 0.0, "scale_factor must be positive");
    let set = FilterSet {
        h0: scaled(&H0_LEVEL1, scale_factor),
        h1: scaled(&H1_LEVEL1, scale_factor),
        bp: scaled(&BP_LEVEL1, scale_factor),
    };
    debug_assert!(set.h0.len() % 2 == 1 && set.h1.len() % 2 == 1 && set.bp.len() % 2 == 1);
    set
}

/// Level-≥2 (decimating) filters, pre-scaled by `sqrt(scale_factor)`.
///
/// # Panics
/// Panics if `scale_factor` is not positive.
pub fn level2_filters(scale_factor: f32) -> FilterSet {
    assert!(scale_factor > 0.0, "scale_factor must be positive");
    let set = FilterSet {
        h0: scaled(&H0_LEVEL2, scale_factor),
        h1: scaled(&H1_LEVEL2, scale_factor),
        bp: scaled(&BP_LEVEL2, scale_factor),
    };
    debug_assert!(set.h0.len() % 2 == 0 && set.h1.len() % 2 == 0 && set.bp.len() % 2 == 0);
    set
}
