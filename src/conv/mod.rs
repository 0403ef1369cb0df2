//! Transposed-convolution drivers.
//!
//! The operator is decomposed into small pure pieces — position planning
//! ([`plan`]), window assembly ([`window`]), dense multiply-accumulate
//! ([`dense`]) — orchestrated by either a batch driver ([`batch`]) or a
//! streaming driver ([`stream`]). The entry points below pick the driver
//! from the configuration's execution strategy and the engine from its
//! reuse factor.

pub mod batch;
pub mod dense;
pub mod plan;
pub mod stream;
pub mod window;

use anyhow::Result;
use ndarray::LinalgScalar;

use crate::config::{Strategy, Transpose1d, Transpose2d};
use crate::conv::dense::MacEngine;
use crate::conv::stream::{Stream1d, Stream2d};
use crate::weights::{Kernel1d, Kernel2d};

/// Run one full 1D pass with the configured strategy and reuse factor.
///
/// `data` is `in_width × n_chan` channel-interleaved; the result is
/// `out_width × n_filt`. Both strategies produce identical values.
pub fn conv_1d_transpose<F: LinalgScalar>(
    cfg: &Transpose1d,
    kernel: &Kernel1d<F>,
    data: &[F],
) -> Result<Vec<F>> {
    let engine = MacEngine::from_reuse(cfg.reuse_factor);
    match cfg.strategy {
        Strategy::Batch => batch::conv_1d(cfg, kernel, data, &engine),
        Strategy::Streaming => {
            let mut driver = Stream1d::new(cfg.clone(), kernel.clone(), engine)?;
            driver.run(data)
        }
    }
}

/// Run one full 2D pass with the configured strategy and reuse factor.
///
/// `data` is `in_height × in_width × n_chan` in raster order; the result
/// is `out_height × out_width × n_filt`. Both strategies produce identical
/// values.
pub fn conv_2d_transpose<F: LinalgScalar>(
    cfg: &Transpose2d,
    kernel: &Kernel2d<F>,
    data: &[F],
) -> Result<Vec<F>> {
    let engine = MacEngine::from_reuse(cfg.reuse_factor);
    match cfg.strategy {
        Strategy::Batch => batch::conv_2d(cfg, kernel, data, &engine),
        Strategy::Streaming => {
            let mut driver = Stream2d::new(cfg.clone(), kernel.clone(), engine)?;
            driver.run(data)
        }
    }
}
