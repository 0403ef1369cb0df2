//! Dense multiply-accumulate engines.
//!
//! The window builders hand every engine the same three flat buffers: an
//! input window of length `windowLen`, a weight window flattened
//! filter-major to `n_filt × windowLen`, and a bias of length `n_filt`.
//! The engine produces `out[f] = Σ window·weights[f] + bias[f]`.
//!
//! Engines are substitutable: a fully parallel realization and a
//! resource-shared one must produce identical values, so the sharing
//! factor stays a pure throughput/area knob.

use ndarray::linalg::general_mat_vec_mul;
use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, LinalgScalar};

/// Contract of the dense primitive consumed by the drivers.
pub trait DenseEngine<F: LinalgScalar> {
    /// `out[f] = Σ_i window[i] · weights[f·windowLen + i] + bias[f]`.
    ///
    /// `weights.len()` must equal `bias.len() · window.len()` and
    /// `out.len()` must equal `bias.len()`.
    fn forward(&self, window: &[F], weights: &[F], bias: &[F], out: &mut [F]);
}

/// Matrix-vector realization on top of `ndarray`'s GEMM kernels.
#[derive(Debug, Clone, Copy, Default)]
pub struct GemmEngine;

impl<F: LinalgScalar> DenseEngine<F> for GemmEngine {
    fn forward(&self, window: &[F], weights: &[F], bias: &[F], out: &mut [F]) {
        let n_filt = bias.len();
        let len = window.len();
        debug_assert_eq!(weights.len(), n_filt * len);
        debug_assert_eq!(out.len(), n_filt);

        out.copy_from_slice(bias);
        let w = ArrayView2::from_shape((n_filt, len), weights).unwrap();
        let x = ArrayView1::from(window);
        let mut y = ArrayViewMut1::from(&mut *out);
        general_mat_vec_mul(F::one(), &w, &x, F::one(), &mut y);
    }
}

/// Explicit multiply-accumulate loop scheduled in `reuse_factor` rounds
/// over contiguous window blocks, modelling hardware where several window
/// slots share one physical multiplier. The round structure only changes
/// the schedule; per-output accumulation order is the plain left-to-right
/// walk, so results match a fully parallel pass.
#[derive(Debug, Clone, Copy)]
pub struct SharedEngine {
    pub reuse_factor: usize,
}

impl SharedEngine {
    pub fn new(reuse_factor: usize) -> Self {
        Self {
            reuse_factor: reuse_factor.max(1),
        }
    }
}

impl<F: LinalgScalar> DenseEngine<F> for SharedEngine {
    fn forward(&self, window: &[F], weights: &[F], bias: &[F], out: &mut [F]) {
        let n_filt = bias.len();
        let len = window.len();
        debug_assert_eq!(weights.len(), n_filt * len);
        debug_assert_eq!(out.len(), n_filt);

        out.copy_from_slice(bias);
        let rounds = self.reuse_factor.max(1);
        let block = len.div_ceil(rounds);
        for round in 0..rounds {
            let lo = (round * block).min(len);
            let hi = ((round + 1) * block).min(len);
            if lo == hi {
                break;
            }
            for f in 0..n_filt {
                let row = &weights[f * len..(f + 1) * len];
                let mut acc = F::zero();
                for i in lo..hi {
                    acc = acc + window[i] * row[i];
                }
                out[f] = out[f] + acc;
            }
        }
    }
}

/// Runtime-selected engine: fully parallel when nothing is shared, the
/// explicit round schedule otherwise.
#[derive(Debug, Clone, Copy)]
pub enum MacEngine {
    Gemm(GemmEngine),
    Shared(SharedEngine),
}

impl MacEngine {
    pub fn from_reuse(reuse_factor: usize) -> Self {
        if reuse_factor <= 1 {
            Self::Gemm(GemmEngine)
        } else {
            Self::Shared(SharedEngine::new(reuse_factor))
        }
    }
}

impl<F: LinalgScalar> DenseEngine<F> for MacEngine {
    fn forward(&self, window: &[F], weights: &[F], bias: &[F], out: &mut [F]) {
        match self {
            Self::Gemm(e) => e.forward(window, weights, bias, out),
            Self::Shared(e) => e.forward(window, weights, bias, out),
        }
    }
}
