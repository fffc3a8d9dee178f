// wgdtcwt: wgpu-accelerated dual-tree complex wavelet keypoints
// CPU reference implementations live beside the GPU pipeline; every
// kernel is validated against its CPU counterpart.
//
// Reference: Kingsbury — "Complex Wavelets for Shift Invariant Analysis
// and Filtering of Signals" (ACHA 2001); Nelson, Gibberd, Kingsbury —
// rotation-invariant DTCWT feature descriptors

pub mod compact;
pub mod convolution;
pub mod descriptor;
pub mod dtcwt;
pub mod energy;
pub mod filters;
pub mod gpu;
pub mod image;
pub mod peaks;
