//! Transposed-convolution (upsampling) compute core.
//!
//! Computes 1D and 2D transposed convolution as a sequence of small dense
//! matrix-vector products, without ever materializing the zero-inserted
//! upsampled tensor. Two interchangeable realizations:
//!
//! * **batch** — the whole input is resident; every output position is
//!   computed independently from a freshly assembled weight/input window.
//! * **streaming** — the input arrives one pixel at a time in raster
//!   order; windows are reconstructed from bounded shift and line buffers
//!   and outputs are re-sequenced into raster order on the fly.
//!
//! Both produce identical values for any valid configuration.

pub mod blob;
pub mod config;
pub mod conv;
pub mod weights;

pub use config::{Strategy, Transpose1d, Transpose2d};
pub use conv::{conv_1d_transpose, conv_2d_transpose};
pub use weights::{Kernel1d, Kernel2d};
